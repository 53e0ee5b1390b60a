//! The paging swap area (PSA): a fixed run of blocks on the swap device that
//! holds evicted heap pages, handed out one page-sized group at a time.

pub mod page_replacement;

use crate::block::{Block, BlockBuf, BlockSector, BLOCK_SECTOR_SIZE};
use crate::config::PagerConfig;
use crate::error::{ConfigError, PagingError};
use crate::mem::PageBuf;
use crate::sync::mutex::Mutex;
use bitvec::order::Lsb0;
use bitvec::vec::BitVec;
use core::fmt;
use lazypage_shared::sizes::BLOCKS_PER_PAGE;

/// A group of `BLOCKS_PER_PAGE` swap blocks holding one page.
///
/// Only [`SwapSpace::allocate`] creates these, so the lead block is always
/// group-aligned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SwapSlot(u32);

impl SwapSlot {
    /// Lead block, relative to the start of the swap area.
    pub fn psa_block(self) -> u32 {
        self.0
    }

    fn blocks(self) -> core::ops::Range<usize> {
        let lead = self.0 as usize;
        lead..lead + BLOCKS_PER_PAGE
    }
}

impl fmt::Display for SwapSlot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "PSA block {}", self.0)
    }
}

struct SwapArea {
    /// One bit per block; set bits are in use.
    bitmap: BitVec<usize, Lsb0>,
    device: Block,
    psa_start: BlockSector,
}

impl SwapArea {
    fn sector(&self, slot: SwapSlot, block: usize) -> BlockSector {
        self.psa_start + slot.0 + block as u32
    }

    fn is_allocated(&self, slot: SwapSlot) -> bool {
        self.bitmap[slot.blocks()].all()
    }
}

/// Kernel-wide owner of the swap bitmap and the swap device.
///
/// Every operation takes the same lock, so allocation and block I/O from
/// faults on different harts never interleave.
pub struct SwapSpace {
    inner: Mutex<SwapArea>,
}

impl SwapSpace {
    /// Takes over `device` with every block of the swap area free.
    pub fn new(device: Block, config: &PagerConfig) -> Result<Self, ConfigError> {
        config.validate_for_device(device.get_size())?;
        Ok(Self {
            inner: Mutex::new(SwapArea {
                bitmap: BitVec::repeat(false, config.psa_blocks as usize),
                device,
                psa_start: config.psa_start,
            }),
        })
    }

    /// Claims the first free group.
    pub fn allocate(&self) -> Result<SwapSlot, PagingError> {
        let mut area = self.inner.lock();
        Self::allocate_locked(&mut area)
    }

    fn allocate_locked(area: &mut SwapArea) -> Result<SwapSlot, PagingError> {
        let lead = (0..area.bitmap.len())
            .step_by(BLOCKS_PER_PAGE)
            .find(|&lead| !area.bitmap[lead])
            .ok_or(PagingError::SwapExhausted)?;

        let slot = SwapSlot(lead as u32);
        debug_assert!(area.bitmap[slot.blocks()].not_any());
        area.bitmap[slot.blocks()].fill(true);
        Ok(slot)
    }

    /// Returns a group to the free pool.
    pub fn release(&self, slot: SwapSlot) -> Result<(), PagingError> {
        let mut area = self.inner.lock();
        Self::release_locked(&mut area, slot)
    }

    fn release_locked(area: &mut SwapArea, slot: SwapSlot) -> Result<(), PagingError> {
        if !area.is_allocated(slot) {
            return Err(PagingError::SwapDoubleFree(slot.0));
        }
        area.bitmap[slot.blocks()].fill(false);
        Ok(())
    }

    /// Writes `page` to the blocks of `slot`, in page-offset order.
    pub fn write_page(&self, slot: SwapSlot, page: &PageBuf) -> Result<(), PagingError> {
        let mut area = self.inner.lock();
        Self::write_locked(&mut area, slot, page)
    }

    fn write_locked(area: &mut SwapArea, slot: SwapSlot, page: &PageBuf) -> Result<(), PagingError> {
        if !area.is_allocated(slot) {
            return Err(PagingError::SwapDoubleFree(slot.0));
        }
        for (i, chunk) in page.0.chunks_exact(BLOCK_SECTOR_SIZE).enumerate() {
            let mut buf = BlockBuf::new(area.sector(slot, i));
            buf.data_mut().copy_from_slice(chunk);
            area.device.bwrite(&buf)?;
        }
        Ok(())
    }

    /// Reads the blocks of `slot` into `page`, in page-offset order.
    pub fn read_page(&self, slot: SwapSlot, page: &mut PageBuf) -> Result<(), PagingError> {
        let mut area = self.inner.lock();
        if !area.is_allocated(slot) {
            return Err(PagingError::SwapDoubleFree(slot.0));
        }
        for (i, chunk) in page.0.chunks_exact_mut(BLOCK_SECTOR_SIZE).enumerate() {
            let sector = area.sector(slot, i);
            let buf = area.device.bread(sector)?;
            chunk.copy_from_slice(buf.data());
        }
        Ok(())
    }

    /// Allocates a group and writes `page` to it under one lock. The group is
    /// released again if the write fails.
    pub fn swap_out(&self, page: &PageBuf) -> Result<SwapSlot, PagingError> {
        let mut area = self.inner.lock();
        let slot = Self::allocate_locked(&mut area)?;
        if let Err(err) = Self::write_locked(&mut area, slot, page) {
            Self::release_locked(&mut area, slot)?;
            return Err(err);
        }
        Ok(slot)
    }

    pub fn is_allocated(&self, slot: SwapSlot) -> bool {
        self.inner.lock().is_allocated(slot)
    }

    /// Number of groups the swap area holds.
    pub fn groups(&self) -> usize {
        self.inner.lock().bitmap.len() / BLOCKS_PER_PAGE
    }

    pub fn free_groups(&self) -> usize {
        let area = self.inner.lock();
        area.bitmap.count_zeros() / BLOCKS_PER_PAGE
    }
}
