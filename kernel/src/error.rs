use crate::block::BlockError;
use crate::mem::PageTableError;
use crate::user_program::elf::ElfError;
use crate::user_program::process::Pid;
use core::error::Error;
use core::fmt::{self, Debug, Display, Formatter};

/// A [`crate::config::PagerConfig`] that cannot describe a working pager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// The swap area has no blocks.
    EmptySwapArea,
    /// The swap area is not a whole number of page-sized block groups.
    UnalignedSwapArea(u32),
    /// The swap area runs past the end of the swap device.
    SwapAreaPastDevice { end: u64, device_size: u32 },
    /// A process must be allowed at least one resident heap page.
    ZeroResidentBudget,
    /// More resident pages allowed than the heap tracker can hold.
    ResidentExceedsHeap { resident: usize, heap: usize },
    /// The kernel-wide swap space was already set up.
    SwapAlreadyInitialized,
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::EmptySwapArea => write!(f, "swap area is empty"),
            ConfigError::UnalignedSwapArea(blocks) => {
                write!(f, "swap area of {blocks} blocks is not a whole number of pages")
            }
            ConfigError::SwapAreaPastDevice { end, device_size } => write!(
                f,
                "swap area ends at block {end} but the device has {device_size} blocks"
            ),
            ConfigError::ZeroResidentBudget => write!(f, "resident heap budget is zero"),
            ConfigError::ResidentExceedsHeap { resident, heap } => write!(
                f,
                "resident heap budget {resident} exceeds heap tracker capacity {heap}"
            ),
            ConfigError::SwapAlreadyInitialized => write!(f, "swap space already initialized"),
        }
    }
}

impl Error for ConfigError {}

/// Everything that can stop a page fault from being resolved.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum PagingError {
    /// No executable image is registered under the process's name.
    ImageMissing,
    /// The executable image is not a usable ELF file.
    ImageCorrupt(ElfError),
    /// The address is neither heap nor part of a loadable segment.
    SegmentNotFound(u64),
    /// The address is already mapped, so the fault was a permission violation.
    AccessViolation(u64),
    /// No physical frame was available to back a new mapping at this address.
    AllocationExhausted(u64),
    /// Every block group in the swap area is in use.
    SwapExhausted,
    /// The heap tracker disagrees with itself or with the swap bitmap.
    TrackerInconsistent(u64),
    /// A swap group was released, read or written while free. The value is
    /// the lead block of the group.
    SwapDoubleFree(u32),
    /// Every heap tracker slot is taken.
    HeapTrackerFull,
    /// Heap growth would exceed the tracker capacity.
    HeapLimit { requested: usize, available: usize },
    /// The swap device failed.
    Block(BlockError),
    /// A fault was reported for a process the kernel does not know.
    UnknownProcess(Pid),
    Config(ConfigError),
}

/// What the trap handler must do with a fault that could not be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Kill the faulting process; the rest of the system is intact.
    KillProcess,
    /// Kernel state can no longer be trusted.
    HaltKernel,
}

impl PagingError {
    pub fn termination(&self) -> Termination {
        match self {
            PagingError::ImageMissing
            | PagingError::ImageCorrupt(_)
            | PagingError::SegmentNotFound(_)
            | PagingError::AccessViolation(_)
            | PagingError::AllocationExhausted(_)
            | PagingError::SwapExhausted
            | PagingError::HeapTrackerFull
            | PagingError::HeapLimit { .. } => Termination::KillProcess,
            PagingError::TrackerInconsistent(_)
            | PagingError::SwapDoubleFree(_)
            | PagingError::Block(_)
            | PagingError::UnknownProcess(_)
            | PagingError::Config(_) => Termination::HaltKernel,
        }
    }
}

impl PagingError {
    /// Attributes a page table failure at `addr` to the fault being handled.
    pub(crate) fn from_page_table(err: PageTableError, addr: u64) -> Self {
        match err {
            PageTableError::OutOfFrames => PagingError::AllocationExhausted(addr),
            PageTableError::AlreadyMapped(va)
            | PageTableError::NotMapped(va)
            | PageTableError::NotUser(va) => PagingError::TrackerInconsistent(va),
        }
    }
}

impl Debug for PagingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            PagingError::ImageMissing => write!(f, "ImageMissing"),
            PagingError::ImageCorrupt(err) => write!(f, "ImageCorrupt({err:?})"),
            PagingError::SegmentNotFound(addr) => write!(f, "SegmentNotFound({addr:#x})"),
            PagingError::AccessViolation(addr) => write!(f, "AccessViolation({addr:#x})"),
            PagingError::AllocationExhausted(addr) => write!(f, "AllocationExhausted({addr:#x})"),
            PagingError::SwapExhausted => write!(f, "SwapExhausted"),
            PagingError::TrackerInconsistent(addr) => write!(f, "TrackerInconsistent({addr:#x})"),
            PagingError::SwapDoubleFree(block) => write!(f, "SwapDoubleFree({block})"),
            PagingError::HeapTrackerFull => write!(f, "HeapTrackerFull"),
            PagingError::HeapLimit {
                requested,
                available,
            } => write!(f, "HeapLimit {{ requested: {requested}, available: {available} }}"),
            PagingError::Block(err) => write!(f, "Block({err:?})"),
            PagingError::UnknownProcess(pid) => write!(f, "UnknownProcess({pid})"),
            PagingError::Config(err) => write!(f, "Config({err:?})"),
        }
    }
}

impl Display for PagingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            PagingError::ImageMissing => write!(f, "process image not found"),
            PagingError::ImageCorrupt(err) => write!(f, "ELF image unusable: {err}"),
            PagingError::SegmentNotFound(addr) => {
                write!(f, "access violation at {addr:#x}: no heap page or loadable segment")
            }
            PagingError::AccessViolation(addr) => {
                write!(f, "access violation at {addr:#x}: page is mapped without that access")
            }
            PagingError::AllocationExhausted(addr) => {
                write!(f, "free page allocation failed for {addr:#x}")
            }
            PagingError::SwapExhausted => write!(f, "paging swap area exhausted"),
            PagingError::TrackerInconsistent(addr) => {
                write!(f, "heap tracker inconsistent at {addr:#x}")
            }
            PagingError::SwapDoubleFree(block) => {
                write!(f, "swap group at PSA block {block} is not allocated")
            }
            PagingError::HeapTrackerFull => write!(f, "heap tracker full"),
            PagingError::HeapLimit {
                requested,
                available,
            } => write!(
                f,
                "heap growth of {requested} pages exceeds the {available} tracker slots left"
            ),
            PagingError::Block(err) => write!(f, "swap device: {err}"),
            PagingError::UnknownProcess(pid) => write!(f, "page fault for unknown pid {pid}"),
            PagingError::Config(err) => write!(f, "pager configuration: {err}"),
        }
    }
}

impl Error for PagingError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PagingError::ImageCorrupt(err) => Some(err),
            PagingError::Block(err) => Some(err),
            PagingError::Config(err) => Some(err),
            _ => None,
        }
    }
}

impl From<BlockError> for PagingError {
    fn from(err: BlockError) -> Self {
        PagingError::Block(err)
    }
}

impl From<ElfError> for PagingError {
    fn from(err: ElfError) -> Self {
        PagingError::ImageCorrupt(err)
    }
}

impl From<ConfigError> for PagingError {
    fn from(err: ConfigError) -> Self {
        PagingError::Config(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn corruption_halts_the_kernel() {
        assert_eq!(
            PagingError::TrackerInconsistent(0x4000).termination(),
            Termination::HaltKernel
        );
        assert_eq!(
            PagingError::Block(BlockError::WriteError).termination(),
            Termination::HaltKernel
        );
    }

    #[test]
    fn resource_exhaustion_kills_the_process() {
        assert_eq!(PagingError::SwapExhausted.termination(), Termination::KillProcess);
        assert_eq!(
            PagingError::AllocationExhausted(0x1000).termination(),
            Termination::KillProcess
        );
        assert_eq!(
            PagingError::ImageCorrupt(ElfError::InvalidMagicNumber).termination(),
            Termination::KillProcess
        );
    }

    #[test]
    fn page_table_failures_are_attributed() {
        assert_eq!(
            PagingError::from_page_table(PageTableError::OutOfFrames, 0x5000),
            PagingError::AllocationExhausted(0x5000)
        );
        assert_eq!(
            PagingError::from_page_table(PageTableError::NotMapped(0x6000), 0x5000),
            PagingError::TrackerInconsistent(0x6000)
        );
    }

    #[test]
    fn messages_carry_the_address() {
        let message = PagingError::SegmentNotFound(0xdead_0000).to_string();
        assert!(message.contains("0xdead0000"));
    }
}
