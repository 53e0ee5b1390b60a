use crate::mem::PAGE_FRAME_SIZE;

pub const KB: usize = 1024;

/// Size of one disk block, the unit the swap area is addressed in.
pub const BLOCK_SIZE: usize = KB;
/// A page is swapped out as this many consecutive blocks.
pub const BLOCKS_PER_PAGE: usize = PAGE_FRAME_SIZE / BLOCK_SIZE;

/// Default capacity of a process's heap tracker, in pages.
pub const MAX_HEAP_PAGES: usize = 1024;
/// Default bound on heap pages a process may keep mapped at once.
pub const MAX_RESIDENT_HEAP_PAGES: usize = 100;

/// First block of the paging swap area on the swap device.
pub const PSA_START: u32 = 2000;
/// Length of the paging swap area in blocks.
pub const PSA_BLOCKS: u32 = 1024;

const _: () = assert!(PAGE_FRAME_SIZE % BLOCK_SIZE == 0);
const _: () = assert!(PSA_BLOCKS as usize % BLOCKS_PER_PAGE == 0);
