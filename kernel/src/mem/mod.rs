//! The page-table interface the pager drives, and a simulated implementation
//! used on hosted builds.

pub mod frame_allocator;
pub mod simulated;

pub use frame_allocator::{FramePool, PageBuf};
pub use lazypage_shared::paging::PtePermissions;
pub use simulated::SimulatedPageTable;

use core::error::Error;
use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageTableError {
    /// No free physical frame to back the mapping.
    OutOfFrames,
    /// The page at this address is already mapped.
    AlreadyMapped(u64),
    /// The page at this address is not mapped.
    NotMapped(u64),
    /// The page at this address is not accessible from user mode.
    NotUser(u64),
}

impl fmt::Display for PageTableError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PageTableError::OutOfFrames => write!(f, "out of physical frames"),
            PageTableError::AlreadyMapped(va) => write!(f, "remap of {va:#x}"),
            PageTableError::NotMapped(va) => write!(f, "{va:#x} is not mapped"),
            PageTableError::NotUser(va) => write!(f, "{va:#x} is not a user page"),
        }
    }
}

impl Error for PageTableError {}

/// One process's address space as seen by the fault handler.
///
/// Addresses passed to `map_range` and `unmap_range` are page aligned; the copy
/// routines accept any address and may cross page boundaries.
pub trait PageTable {
    /// Maps zero-filled pages covering `[start, end)` with `perms`. On failure
    /// nothing is mapped.
    fn map_range(&mut self, start: u64, end: u64, perms: PtePermissions)
        -> Result<(), PageTableError>;

    /// Removes `pages` mappings starting at `start`, returning their frames to
    /// the allocator when `free_physical` is set.
    fn unmap_range(&mut self, start: u64, pages: usize, free_physical: bool)
        -> Result<(), PageTableError>;

    /// Copies `dst.len()` bytes from user address `src` into `dst`.
    fn copy_in(&self, dst: &mut [u8], src: u64) -> Result<(), PageTableError>;

    /// Copies `src` to user address `dst`. Kernel writes ignore the write bit so
    /// read-only segments can be populated.
    fn copy_out(&mut self, dst: u64, src: &[u8]) -> Result<(), PageTableError>;

    /// Drops stale translations so the hardware sees the current mappings.
    fn flush(&mut self);
}
