//! Demand loading of pages that belong to a program's loadable segments.

use crate::error::PagingError;
use crate::mem::{PageBuf, PageTable, PageTableError};
use crate::user_program::elf::{ElfError, ElfProgramHeader};
use crate::user_program::image::ExecutableImage;
use lazypage_shared::mem::{is_page_aligned, PAGE_FRAME_SIZE};

/// Where the bytes of a freshly loaded page came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentLoad {
    pub file_offset: u64,
    /// Bytes actually present in the image; the rest of the page is zero.
    pub bytes_read: usize,
}

/// Maps the page at `addr` with the segment's permissions and fills it with
/// one page of the image, starting at the matching offset in the file.
///
/// The whole page is copied even when the segment's file size ends inside
/// it, mirroring how the linker lays segments out back to back.
pub fn load_segment_page<P: PageTable>(
    page_table: &mut P,
    image: &dyn ExecutableImage,
    segment: &ElfProgramHeader,
    addr: u64,
) -> Result<SegmentLoad, PagingError> {
    debug_assert!(is_page_aligned(addr));
    debug_assert!(segment.contains(addr));

    let out_of_range = PagingError::ImageCorrupt(ElfError::SegmentOutOfRange);
    let file_offset = segment
        .offset
        .checked_add(addr - segment.virtual_address)
        .ok_or(out_of_range)?;
    let end = addr.checked_add(PAGE_FRAME_SIZE as u64).ok_or(out_of_range)?;
    let mut page = PageBuf::new_zeroed();
    let bytes_read = image.read_at(file_offset, &mut page.0);

    page_table
        .map_range(addr, end, segment.permissions())
        .map_err(|err| match err {
            PageTableError::AlreadyMapped(_) => PagingError::AccessViolation(addr),
            err => PagingError::from_page_table(err, addr),
        })?;

    if let Err(err) = page_table.copy_out(addr, &page.0) {
        page_table
            .unmap_range(addr, 1, true)
            .map_err(|err| PagingError::from_page_table(err, addr))?;
        return Err(PagingError::from_page_table(err, addr));
    }

    Ok(SegmentLoad {
        file_offset,
        bytes_read,
    })
}
