pub mod elf;
pub mod heap;
pub mod image;
pub mod process;
pub mod segment_loader;
