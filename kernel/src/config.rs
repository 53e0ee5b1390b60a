use crate::block::BlockSector;
use crate::error::ConfigError;
use lazypage_shared::sizes::{
    BLOCKS_PER_PAGE, MAX_HEAP_PAGES, MAX_RESIDENT_HEAP_PAGES, PSA_BLOCKS, PSA_START,
};

/// Limits the pager enforces, and where the swap area lives on the swap device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagerConfig {
    /// Heap tracker slots per process.
    pub max_heap_pages: usize,
    /// Heap pages a process may keep mapped before the oldest is evicted.
    pub max_resident_heap_pages: usize,
    /// First block of the paging swap area.
    pub psa_start: BlockSector,
    /// Length of the paging swap area, in blocks.
    pub psa_blocks: u32,
}

impl PagerConfig {
    pub const DEFAULT: Self = Self {
        max_heap_pages: MAX_HEAP_PAGES,
        max_resident_heap_pages: MAX_RESIDENT_HEAP_PAGES,
        psa_start: PSA_START,
        psa_blocks: PSA_BLOCKS,
    };

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.psa_blocks == 0 {
            return Err(ConfigError::EmptySwapArea);
        }
        if self.psa_blocks as usize % BLOCKS_PER_PAGE != 0 {
            return Err(ConfigError::UnalignedSwapArea(self.psa_blocks));
        }
        if self.max_resident_heap_pages == 0 {
            return Err(ConfigError::ZeroResidentBudget);
        }
        if self.max_resident_heap_pages > self.max_heap_pages {
            return Err(ConfigError::ResidentExceedsHeap {
                resident: self.max_resident_heap_pages,
                heap: self.max_heap_pages,
            });
        }
        Ok(())
    }

    /// Checks that the swap area fits on a device of `device_size` blocks.
    pub fn validate_for_device(&self, device_size: BlockSector) -> Result<(), ConfigError> {
        self.validate()?;
        let end = u64::from(self.psa_start) + u64::from(self.psa_blocks);
        if end > u64::from(device_size) {
            return Err(ConfigError::SwapAreaPastDevice { end, device_size });
        }
        Ok(())
    }

    /// Number of page-sized groups in the swap area.
    pub fn psa_groups(&self) -> usize {
        self.psa_blocks as usize / BLOCKS_PER_PAGE
    }
}

impl Default for PagerConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
