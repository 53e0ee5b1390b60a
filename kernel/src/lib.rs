//! Demand paging for user processes: lazy loading of program segments,
//! lazily mapped heap pages and swapping of heap pages to a block device.

#![cfg_attr(target_os = "none", no_std)]

extern crate alloc;

pub mod block;
pub mod config;
pub mod diag;
pub mod error;
pub mod fault;
pub mod mem;
pub mod swapping;
pub mod sync;
pub mod system;
pub mod time;
pub mod user_program;

pub use error::{PagingError, Termination};
pub use fault::{handle_page_fault, FaultKind, Pager};
