use core::sync::atomic::{AtomicU64, Ordering};

/// Source of load timestamps for heap pages.
///
/// Readings never decrease. Two readings may be equal; eviction breaks such
/// ties by tracker slot.
pub trait Clock {
    fn now(&self) -> u64;
}

/// A clock advanced by the timer interrupt.
#[derive(Debug, Default)]
pub struct TickClock {
    ticks: AtomicU64,
}

impl TickClock {
    pub const fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
        }
    }

    /// Called once per timer interrupt.
    pub fn tick(&self) {
        self.ticks.fetch_add(1, Ordering::AcqRel);
    }

    /// Jumps forward to `ticks`. Earlier values are ignored.
    pub fn advance_to(&self, ticks: u64) {
        self.ticks.fetch_max(ticks, Ordering::AcqRel);
    }
}

impl Clock for TickClock {
    fn now(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }
}
