//! # Platform Abstraction
//!
//! Time services the driver needs from its host kernel.

// =============================================================================
// CLOCK TRAIT
// =============================================================================

/// Monotonic time source and delay primitives
///
/// Each host (Helix, Linux shim, test harness) implements this trait.
/// `sleep_us` may reschedule and is only legal in sleepable context;
/// `delay_us` busy-waits and is safe anywhere.
pub trait Clock: Send + Sync {
    /// Monotonic time in microseconds
    fn now_us(&self) -> u64;

    /// Sleep for a duration in `[min_us, max_us]`
    fn sleep_us(&self, min_us: u32, max_us: u32);

    /// Busy-wait for `us` microseconds
    fn delay_us(&self, us: u32);
}

// =============================================================================
// STD CLOCK
// =============================================================================

/// Hosted clock backed by `std::time`
#[cfg(feature = "std")]
#[derive(Debug)]
pub struct StdClock {
    origin: std::time::Instant,
}

#[cfg(feature = "std")]
impl StdClock {
    /// Create a clock whose epoch is now
    pub fn new() -> Self {
        Self {
            origin: std::time::Instant::now(),
        }
    }
}

#[cfg(feature = "std")]
impl Clock for StdClock {
    fn now_us(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }

    fn sleep_us(&self, min_us: u32, _max_us: u32) {
        std::thread::sleep(std::time::Duration::from_micros(min_us as u64));
    }

    fn delay_us(&self, us: u32) {
        let start = std::time::Instant::now();
        while start.elapsed().as_micros() < us as u128 {
            arch::spin_hint();
        }
    }
}

// =============================================================================
// ARCHITECTURE HELPERS
// =============================================================================

/// Architecture-specific operations
pub mod arch {
    //! Architecture-specific helpers

    /// Pause hint for spin loops
    #[inline(always)]
    pub fn spin_hint() {
        core::hint::spin_loop();
    }
}
