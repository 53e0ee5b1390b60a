//! Per-process bookkeeping for demand-paged heap pages.

use crate::error::PagingError;
use crate::swapping::SwapSlot;
use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;
use lazypage_shared::mem::is_page_aligned;

/// One slot of the heap tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeapPageEntry {
    address: Option<u64>,
    resident: bool,
    last_load_time: u64,
    backing: Option<SwapSlot>,
}

impl HeapPageEntry {
    /// Page-aligned virtual address, or `None` for an unused slot.
    pub fn address(&self) -> Option<u64> {
        self.address
    }

    pub fn is_resident(&self) -> bool {
        self.resident
    }

    pub fn last_load_time(&self) -> u64 {
        self.last_load_time
    }

    /// The swap group holding this page's contents while it is evicted.
    pub fn backing(&self) -> Option<SwapSlot> {
        self.backing
    }

    pub fn is_swapped(&self) -> bool {
        self.backing.is_some()
    }
}

/// Fixed-capacity table of the heap pages a process has touched or reserved.
///
/// Entries never move, so a slot index stays valid for the life of the page.
#[derive(Debug)]
pub struct HeapTracker {
    entries: Box<[HeapPageEntry]>,
    resident_pages: usize,
}

impl HeapTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: vec![HeapPageEntry::default(); capacity].into_boxed_slice(),
            resident_pages: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[HeapPageEntry] {
        &self.entries
    }

    pub fn entry(&self, slot: usize) -> &HeapPageEntry {
        &self.entries[slot]
    }

    /// Slots with no page registered.
    pub fn free_slots(&self) -> usize {
        self.entries.iter().filter(|e| e.address.is_none()).count()
    }

    /// Number of entries currently mapped.
    pub fn resident_pages(&self) -> usize {
        self.resident_pages
    }

    pub fn find(&self, addr: u64) -> Option<usize> {
        self.entries.iter().position(|e| e.address == Some(addr))
    }

    /// The slot for `addr` if its contents are out on swap.
    pub fn find_swapped(&self, addr: u64) -> Option<usize> {
        self.find(addr).filter(|&slot| self.entries[slot].is_swapped())
    }

    /// Claims the first unused slot for `addr`. The page is neither resident
    /// nor swapped until it is first touched.
    pub fn register(&mut self, addr: u64) -> Result<usize, PagingError> {
        debug_assert!(is_page_aligned(addr));
        if self.find(addr).is_some() {
            return Err(PagingError::TrackerInconsistent(addr));
        }

        let slot = self
            .entries
            .iter()
            .position(|e| e.address.is_none())
            .ok_or(PagingError::HeapTrackerFull)?;
        self.entries[slot] = HeapPageEntry {
            address: Some(addr),
            ..HeapPageEntry::default()
        };
        Ok(slot)
    }

    /// Records that the slot's page was just mapped at tick `now`.
    pub fn mark_resident(&mut self, slot: usize, now: u64) -> Result<(), PagingError> {
        let entry = &mut self.entries[slot];
        let addr = entry.address.ok_or(PagingError::TrackerInconsistent(0))?;
        if entry.resident || entry.backing.is_some() {
            return Err(PagingError::TrackerInconsistent(addr));
        }

        entry.resident = true;
        entry.last_load_time = now;
        self.resident_pages += 1;
        Ok(())
    }

    /// Records that the slot's page was unmapped and written to `backing`.
    pub fn mark_evicted(&mut self, slot: usize, backing: SwapSlot) -> Result<(), PagingError> {
        let entry = &mut self.entries[slot];
        let addr = entry.address.ok_or(PagingError::TrackerInconsistent(0))?;
        if !entry.resident || entry.backing.is_some() {
            return Err(PagingError::TrackerInconsistent(addr));
        }

        entry.resident = false;
        entry.backing = Some(backing);
        self.resident_pages -= 1;
        Ok(())
    }

    /// Forgets the swap group of a page whose contents were read back.
    pub fn clear_backing(&mut self, slot: usize) -> Option<SwapSlot> {
        self.entries[slot].backing.take()
    }

    /// Empties the tracker, handing back every entry that was in use.
    pub fn drain(&mut self) -> Vec<HeapPageEntry> {
        self.resident_pages = 0;
        self.entries
            .iter_mut()
            .map(core::mem::take)
            .filter(|e| e.address.is_some())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swapping::test::swap_space;

    #[test]
    fn register_claims_first_free_slot() {
        let mut tracker = HeapTracker::new(3);
        assert_eq!(tracker.register(0x10000), Ok(0));
        assert_eq!(tracker.register(0x11000), Ok(1));
        assert_eq!(tracker.find(0x11000), Some(1));
        assert_eq!(tracker.free_slots(), 1);

        let entry = tracker.entry(0);
        assert!(!entry.is_resident() && !entry.is_swapped());
    }

    #[test]
    fn addresses_are_unique() {
        let mut tracker = HeapTracker::new(3);
        tracker.register(0x10000).unwrap();
        assert_eq!(
            tracker.register(0x10000),
            Err(PagingError::TrackerInconsistent(0x10000))
        );
    }

    #[test]
    fn full_tracker() {
        let mut tracker = HeapTracker::new(1);
        tracker.register(0x10000).unwrap();
        assert_eq!(tracker.register(0x11000), Err(PagingError::HeapTrackerFull));
    }

    #[test]
    fn resident_counter_follows_transitions() {
        let swap = swap_space(1);
        let mut tracker = HeapTracker::new(2);
        let a = tracker.register(0x10000).unwrap();
        let b = tracker.register(0x11000).unwrap();

        tracker.mark_resident(a, 1).unwrap();
        tracker.mark_resident(b, 2).unwrap();
        assert_eq!(tracker.resident_pages(), 2);
        assert_eq!(tracker.entry(b).last_load_time(), 2);

        let slot = swap.allocate().unwrap();
        tracker.mark_evicted(a, slot).unwrap();
        assert_eq!(tracker.resident_pages(), 1);
        assert_eq!(tracker.find_swapped(0x10000), Some(a));
        assert_eq!(tracker.find_swapped(0x11000), None);
    }

    #[test]
    fn never_resident_with_backing() {
        let swap = swap_space(1);
        let mut tracker = HeapTracker::new(1);
        let a = tracker.register(0x10000).unwrap();
        tracker.mark_resident(a, 1).unwrap();
        tracker.mark_evicted(a, swap.allocate().unwrap()).unwrap();

        assert_eq!(
            tracker.mark_resident(a, 2),
            Err(PagingError::TrackerInconsistent(0x10000))
        );
        assert!(tracker.clear_backing(a).is_some());
        tracker.mark_resident(a, 2).unwrap();
        assert_eq!(
            tracker.mark_resident(a, 3),
            Err(PagingError::TrackerInconsistent(0x10000))
        );
    }

    #[test]
    fn drain_empties_the_tracker() {
        let mut tracker = HeapTracker::new(4);
        let a = tracker.register(0x10000).unwrap();
        tracker.register(0x11000).unwrap();
        tracker.mark_resident(a, 1).unwrap();

        assert_eq!(tracker.drain().len(), 2);
        assert_eq!(tracker.resident_pages(), 0);
        assert_eq!(tracker.free_slots(), 4);
    }
}
