use crate::block::Block;
use crate::config::PagerConfig;
use crate::error::{ConfigError, PagingError};
use crate::swapping::SwapSpace;
use alloc::boxed::Box;
use once_cell::race::OnceBox;

// Written once while the kernel brings up its swap device, read by every
// page fault after that.
static SWAP_SPACE: OnceBox<SwapSpace> = OnceBox::new();

/// Hands `device` over to the kernel-wide swap space. Only the first call
/// succeeds; a later or racing call gets `SwapAlreadyInitialized` back and
/// its device is dropped unused.
pub fn init_swap_space(
    device: Block,
    config: &PagerConfig,
) -> Result<&'static SwapSpace, PagingError> {
    if SWAP_SPACE.get().is_some() {
        return Err(ConfigError::SwapAlreadyInitialized.into());
    }
    let swap = Box::new(SwapSpace::new(device, config)?);
    SWAP_SPACE
        .set(swap)
        .map_err(|_| ConfigError::SwapAlreadyInitialized)?;
    SWAP_SPACE
        .get()
        .ok_or(ConfigError::SwapAlreadyInitialized.into())
}

pub fn swap_space() -> Option<&'static SwapSpace> {
    SWAP_SPACE.get()
}
