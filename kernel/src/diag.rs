//! Paging events for whoever is watching the console.
//!
//! Sinks are fire-and-forget: recording an event never fails and never changes
//! how a fault is handled.

use core::fmt;
use lazypage_shared::println;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingEvent<'a> {
    PageFault {
        process: &'a str,
        addr: u64,
    },
    SegmentLoad {
        addr: u64,
        file_offset: u64,
        size: usize,
    },
    /// `psa_block` is relative to the start of the swap area.
    Evict {
        addr: u64,
        psa_block: u32,
    },
    Retrieve {
        addr: u64,
        psa_block: u32,
    },
}

impl fmt::Display for PagingEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PagingEvent::PageFault { process, addr } => write!(
                f,
                "#PF: Proc name ({process}), Page fault at address ({addr:#x})"
            ),
            PagingEvent::SegmentLoad {
                addr,
                file_offset,
                size,
            } => write!(
                f,
                "Loading segment at {addr:#x} from file offset {file_offset:#x} ({size} bytes)"
            ),
            PagingEvent::Evict { addr, psa_block } => {
                write!(f, "Evicting heap page {addr:#x} to PSA block {psa_block}")
            }
            PagingEvent::Retrieve { addr, psa_block } => {
                write!(f, "Retrieving heap page {addr:#x} from PSA block {psa_block}")
            }
        }
    }
}

pub trait DiagnosticsSink {
    fn record(&self, event: &PagingEvent);
}

/// Prints every event on its own line.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl DiagnosticsSink for ConsoleSink {
    fn record(&self, event: &PagingEvent) {
        println!("{}", event);
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl DiagnosticsSink for NullSink {
    fn record(&self, _event: &PagingEvent) {}
}
