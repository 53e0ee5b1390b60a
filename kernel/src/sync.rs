//! Locks usable from fault context, where nothing may sleep.

pub mod mutex;
