// Page table entry bits as the pager hands them to a page table, and the
// decomposition of a virtual address into page number and offset.

use arbitrary_int::{u12, u52};
use bitbybit::bitfield;

#[bitfield(u8, default = 0)]
#[derive(Debug, PartialEq, Eq)]
pub struct PtePermissions {
    #[bit(0, rw)]
    readable: bool,
    #[bit(1, rw)]
    writable: bool,
    #[bit(2, rw)]
    executable: bool,
    #[bit(3, rw)]
    user: bool,
}

impl PtePermissions {
    /// Permissions for anonymous heap memory. Heap pages are never executable.
    pub const fn user_read_write() -> Self {
        Self::DEFAULT
            .with_readable(true)
            .with_writable(true)
            .with_user(true)
    }
}

#[bitfield(u64)]
pub struct VirtualAddress {
    #[bits(12..=63, r)]
    page_number: u52,
    #[bits(0..=11, r)]
    offset: u12,
}

impl VirtualAddress {
    pub const fn page_base(&self) -> u64 {
        self.page_number().value() << 12
    }
}
