use crate::user_program::heap::HeapPageEntry;

pub trait PageReplacementPolicy {
    /// Picks the tracker slot of the resident page to evict, or `None` if no
    /// page is resident.
    fn select_victim(&self, entries: &[HeapPageEntry]) -> Option<usize>;
}

/// First in, first out: the page loaded longest ago goes first, and among
/// pages loaded on the same tick the lowest slot goes first.
#[derive(Debug, Default, Clone, Copy)]
pub struct OldestLoaded;

impl PageReplacementPolicy for OldestLoaded {
    fn select_victim(&self, entries: &[HeapPageEntry]) -> Option<usize> {
        entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.is_resident())
            .min_by_key(|&(slot, entry)| (entry.last_load_time(), slot))
            .map(|(slot, _)| slot)
    }
}
