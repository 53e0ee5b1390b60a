use crate::paging::VirtualAddress;
use crate::sizes::KB;

// Page size is 4KB on every target we page for.
pub const PAGE_FRAME_SIZE: usize = 4 * KB;

const PAGE_MASK: u64 = PAGE_FRAME_SIZE as u64 - 1;

#[inline]
pub const fn page_round_down(addr: u64) -> u64 {
    addr & !PAGE_MASK
}

#[inline]
pub const fn page_round_up(addr: u64) -> u64 {
    page_round_down(addr + PAGE_MASK)
}

#[inline]
pub const fn is_page_aligned(addr: u64) -> bool {
    addr & PAGE_MASK == 0
}

/// Splits `addr` into the page-aligned base and the offset within that page.
#[inline]
pub fn split_page(addr: u64) -> (u64, usize) {
    let va = VirtualAddress::new_with_raw_value(addr);
    (va.page_base(), usize::from(va.offset().value()))
}
