//! The free-running hardware counter the algorithm maps onto UTC (spec §4.1).
//!
//! Reads must be idempotent and monotone-nondecreasing. The algorithm never
//! touches the counter except to bracket an in-daemon stamp or to evaluate
//! the clock for reporting (see [`crate::time::bracket_stamp`]).

/// A monotone free-running counter with a known width and wrap mask.
pub trait CounterOracle: Send + Sync {
    /// Current raw count. Must not have side effects and must never decrease
    /// except by wrapping at `wrap_mask`.
    fn read_counter(&self) -> u64;

    /// Bitmask applied to raw reads (`u64::MAX` for a full 64-bit counter).
    fn wrap_mask(&self) -> u64;

    /// Largest safe interval, in counts, between two updates. Longer
    /// intervals risk the counter wrapping within a single update.
    fn max_cycles(&self) -> u64;
}

/// Reads the x86 time-stamp counter directly.
#[cfg(target_arch = "x86_64")]
pub struct TscOracle {
    wrap_mask: u64,
    max_cycles: u64,
}

#[cfg(target_arch = "x86_64")]
impl TscOracle {
    pub fn new() -> Self {
        TscOracle {
            wrap_mask: u64::MAX,
            max_cycles: u64::MAX / 2,
        }
    }
}

#[cfg(target_arch = "x86_64")]
impl Default for TscOracle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_arch = "x86_64")]
impl CounterOracle for TscOracle {
    fn read_counter(&self) -> u64 {
        // SAFETY: RDTSC has no side effects and is available on every
        // x86_64 target this crate builds for.
        unsafe { core::arch::x86_64::_rdtsc() & self.wrap_mask }
    }

    fn wrap_mask(&self) -> u64 {
        self.wrap_mask
    }

    fn max_cycles(&self) -> u64 {
        self.max_cycles
    }
}

/// A deterministic counter for scenario tests (spec §8): callers advance it
/// explicitly rather than relying on wall-clock-derived ticks.
#[cfg(test)]
pub struct FakeOracle {
    count: std::sync::atomic::AtomicU64,
}

#[cfg(test)]
impl FakeOracle {
    pub fn new(start: u64) -> Self {
        FakeOracle {
            count: std::sync::atomic::AtomicU64::new(start),
        }
    }

    pub fn advance_to(&self, value: u64) {
        self.count.store(value, std::sync::atomic::Ordering::Relaxed);
    }
}

#[cfg(test)]
impl CounterOracle for FakeOracle {
    fn read_counter(&self) -> u64 {
        self.count.load(std::sync::atomic::Ordering::Relaxed)
    }

    fn wrap_mask(&self) -> u64 {
        u64::MAX
    }

    fn max_cycles(&self) -> u64 {
        u64::MAX / 2
    }
}
