use super::{FramePool, PageTable, PageTableError, PtePermissions};
use alloc::collections::BTreeMap;
use lazypage_shared::mem::{is_page_aligned, page_round_up, split_page, PAGE_FRAME_SIZE};

const PAGE: u64 = PAGE_FRAME_SIZE as u64;

#[derive(Clone, Copy)]
struct Pte {
    frame: usize,
    perms: PtePermissions,
}

/// A page table whose "physical memory" is a [`FramePool`] owned by the table.
///
/// The pool size stands in for the memory available to the process, so running
/// out of frames is as reproducible as any other fault.
pub struct SimulatedPageTable {
    entries: BTreeMap<u64, Pte>,
    frames: FramePool,
    flushes: usize,
}

impl SimulatedPageTable {
    pub fn new(frames: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            frames: FramePool::new(frames),
            flushes: 0,
        }
    }

    /// Permissions of the page containing `va`, if it is mapped.
    pub fn translate(&self, va: u64) -> Option<PtePermissions> {
        let (page, _) = split_page(va);
        self.entries.get(&page).map(|pte| pte.perms)
    }

    pub fn is_mapped(&self, va: u64) -> bool {
        self.translate(va).is_some()
    }

    pub fn mapped_pages(&self) -> usize {
        self.entries.len()
    }

    pub fn free_frames(&self) -> usize {
        self.frames.free_frames()
    }

    pub fn flush_count(&self) -> usize {
        self.flushes
    }

    fn user_pte(&self, va: u64) -> Result<Pte, PageTableError> {
        let (page, _) = split_page(va);
        let pte = *self.entries.get(&page).ok_or(PageTableError::NotMapped(page))?;
        if !pte.perms.user() {
            return Err(PageTableError::NotUser(page));
        }
        Ok(pte)
    }
}

impl PageTable for SimulatedPageTable {
    fn map_range(
        &mut self,
        start: u64,
        end: u64,
        perms: PtePermissions,
    ) -> Result<(), PageTableError> {
        debug_assert!(is_page_aligned(start));
        let end = page_round_up(end);

        let mut va = start;
        while va < end {
            if self.entries.contains_key(&va) {
                return Err(PageTableError::AlreadyMapped(va));
            }
            va += PAGE;
        }

        let mut va = start;
        while va < end {
            let Some(frame) = self.frames.alloc() else {
                // Undo the partial mapping.
                let mapped = ((va - start) / PAGE) as usize;
                self.unmap_range(start, mapped, true)?;
                return Err(PageTableError::OutOfFrames);
            };
            self.entries.insert(va, Pte { frame, perms });
            va += PAGE;
        }
        Ok(())
    }

    fn unmap_range(
        &mut self,
        start: u64,
        pages: usize,
        free_physical: bool,
    ) -> Result<(), PageTableError> {
        debug_assert!(is_page_aligned(start));
        for i in 0..pages as u64 {
            let va = start + i * PAGE;
            let pte = self
                .entries
                .remove(&va)
                .ok_or(PageTableError::NotMapped(va))?;
            if free_physical {
                self.frames.dealloc(pte.frame);
            }
        }
        Ok(())
    }

    fn copy_in(&self, dst: &mut [u8], src: u64) -> Result<(), PageTableError> {
        let mut copied = 0;
        while copied < dst.len() {
            let va = src + copied as u64;
            let pte = self.user_pte(va)?;
            let (_, offset) = split_page(va);
            let n = (PAGE_FRAME_SIZE - offset).min(dst.len() - copied);
            let frame = &self.frames.frame(pte.frame).0;
            dst[copied..copied + n].copy_from_slice(&frame[offset..offset + n]);
            copied += n;
        }
        Ok(())
    }

    fn copy_out(&mut self, dst: u64, src: &[u8]) -> Result<(), PageTableError> {
        let mut copied = 0;
        while copied < src.len() {
            let va = dst + copied as u64;
            let pte = self.user_pte(va)?;
            let (_, offset) = split_page(va);
            let n = (PAGE_FRAME_SIZE - offset).min(src.len() - copied);
            let frame = &mut self.frames.frame_mut(pte.frame).0;
            frame[offset..offset + n].copy_from_slice(&src[copied..copied + n]);
            copied += n;
        }
        Ok(())
    }

    fn flush(&mut self) {
        self.flushes += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_is_zero_filled() {
        let mut pt = SimulatedPageTable::new(2);
        pt.map_range(0x1000, 0x2000, PtePermissions::user_read_write())
            .unwrap();
        let mut buf = [0xFFu8; 16];
        pt.copy_in(&mut buf, 0x1ff0).unwrap();
        assert_eq!(buf, [0; 16]);
        assert_eq!(pt.free_frames(), 1);
    }

    #[test]
    fn copies_cross_page_boundaries() {
        let mut pt = SimulatedPageTable::new(2);
        pt.map_range(0x1000, 0x3000, PtePermissions::user_read_write())
            .unwrap();
        pt.copy_out(0x1ffe, b"abcd").unwrap();
        let mut buf = [0u8; 4];
        pt.copy_in(&mut buf, 0x1ffe).unwrap();
        assert_eq!(&buf, b"abcd");
    }

    #[test]
    fn remap_is_refused() {
        let mut pt = SimulatedPageTable::new(4);
        let perms = PtePermissions::user_read_write();
        pt.map_range(0x1000, 0x2000, perms).unwrap();
        assert_eq!(
            pt.map_range(0x0000, 0x3000, perms),
            Err(PageTableError::AlreadyMapped(0x1000))
        );
        assert_eq!(pt.mapped_pages(), 1);
    }

    #[test]
    fn failed_map_leaves_nothing_behind() {
        let mut pt = SimulatedPageTable::new(1);
        let perms = PtePermissions::user_read_write();
        assert_eq!(
            pt.map_range(0x4000, 0x6000, perms),
            Err(PageTableError::OutOfFrames)
        );
        assert_eq!(pt.mapped_pages(), 0);
        assert_eq!(pt.free_frames(), 1);
    }

    #[test]
    fn unmap_frees_frames() {
        let mut pt = SimulatedPageTable::new(1);
        pt.map_range(0x1000, 0x2000, PtePermissions::user_read_write())
            .unwrap();
        pt.unmap_range(0x1000, 1, true).unwrap();
        assert!(!pt.is_mapped(0x1000));
        assert_eq!(pt.free_frames(), 1);
        assert_eq!(
            pt.unmap_range(0x1000, 1, true),
            Err(PageTableError::NotMapped(0x1000))
        );
    }

    #[test]
    fn kernel_only_pages_reject_user_copies() {
        let mut pt = SimulatedPageTable::new(1);
        let perms = PtePermissions::DEFAULT.with_readable(true);
        pt.map_range(0x1000, 0x2000, perms).unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(
            pt.copy_in(&mut buf, 0x1000),
            Err(PageTableError::NotUser(0x1000))
        );
    }
}
