//! # Polling With Backoff
//!
//! Every hardware wait in the driver is a blocking poll bounded by a single
//! wall-clock deadline. The policy is plain data so each wait loop can be
//! exercised against a [`ManualClock`] without real time passing.
//!
//! ```text
//!  read ──► condition met? ──yes──► Ok
//!              │ no
//!              ▼
//!         deadline passed? ──yes──► Timeout
//!              │ no
//!              ▼
//!         sleep(delay, 2*delay); delay = min(delay * mult, max)
//! ```

use core::sync::atomic::{AtomicU64, Ordering};

use crate::platform::Clock;

// =============================================================================
// CONSTANTS
// =============================================================================

/// Smallest sleep between polls
pub const POLL_DELAY_MIN_US: u32 = 10;
/// Largest sleep between polls
pub const POLL_DELAY_MAX_US: u32 = 200;
/// Default device-wide poll timeout
pub const DEFAULT_POLL_TIMEOUT_US: u64 = 3_000_000;

// =============================================================================
// POLICY
// =============================================================================

/// Retry policy for a hardware poll loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// First delay between reads
    pub initial_delay_us: u32,
    /// Growth factor applied after each sleeping iteration
    pub multiplier: u32,
    /// Delay cap
    pub max_delay_us: u32,
    /// Deadline measured from [`PollPolicy::start`]
    pub timeout_us: u64,
}

impl PollPolicy {
    /// Driver default: 10us doubling to 200us, 3s deadline
    pub const DEFAULT: Self = Self::new(POLL_DELAY_MIN_US, POLL_DELAY_MAX_US, DEFAULT_POLL_TIMEOUT_US);

    /// Create a doubling policy
    pub const fn new(initial_delay_us: u32, max_delay_us: u32, timeout_us: u64) -> Self {
        Self {
            initial_delay_us,
            multiplier: 2,
            max_delay_us,
            timeout_us,
        }
    }

    /// Same policy with another initial delay
    pub const fn with_initial_delay_us(mut self, initial_delay_us: u32) -> Self {
        self.initial_delay_us = initial_delay_us;
        self
    }

    /// Same policy with another deadline
    pub const fn with_timeout_us(mut self, timeout_us: u64) -> Self {
        self.timeout_us = timeout_us;
        self
    }

    /// Arm the deadline and return a poller bound to `clock`
    pub fn start<'a>(&self, clock: &'a dyn Clock) -> Poller<'a> {
        Poller {
            clock,
            deadline: Deadline::after(clock, self.timeout_us),
            backoff: Backoff::new(self),
        }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

// =============================================================================
// BACKOFF
// =============================================================================

/// Exponential delay sequence
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    current_us: u32,
    multiplier: u32,
    max_us: u32,
}

impl Backoff {
    /// Start at the policy's initial delay
    pub const fn new(policy: &PollPolicy) -> Self {
        Self {
            current_us: policy.initial_delay_us,
            multiplier: policy.multiplier,
            max_us: policy.max_delay_us,
        }
    }

    /// Delay for the next sleep
    #[inline]
    pub const fn current_us(&self) -> u32 {
        self.current_us
    }

    /// Grow the delay, saturating at the cap
    pub fn advance(&mut self) {
        self.current_us = self
            .current_us
            .saturating_mul(self.multiplier)
            .min(self.max_us);
    }
}

// =============================================================================
// DEADLINE
// =============================================================================

/// Absolute expiry time on a [`Clock`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    expires_at_us: u64,
}

impl Deadline {
    /// Deadline `timeout_us` from now
    pub fn after(clock: &dyn Clock, timeout_us: u64) -> Self {
        Self {
            expires_at_us: clock.now_us().saturating_add(timeout_us),
        }
    }

    /// Whether the deadline has passed
    #[inline]
    pub fn expired(&self, clock: &dyn Clock) -> bool {
        clock.now_us() >= self.expires_at_us
    }
}

// =============================================================================
// POLLER
// =============================================================================

/// State of one running poll loop
pub struct Poller<'a> {
    clock: &'a dyn Clock,
    deadline: Deadline,
    backoff: Backoff,
}

impl Poller<'_> {
    /// Whether the loop has run out of time
    #[inline]
    pub fn expired(&self) -> bool {
        self.deadline.expired(self.clock)
    }

    /// Current backoff delay
    #[inline]
    pub fn delay_us(&self) -> u32 {
        self.backoff.current_us()
    }

    /// Wait before the next read
    ///
    /// Sleeping waits grow the delay; busy waits keep it fixed so
    /// non-sleepable callers stay latency bound.
    pub fn wait(&mut self, allow_sleep: bool) {
        let delay = self.backoff.current_us();
        if allow_sleep {
            self.clock.sleep_us(delay, delay.saturating_mul(2));
            self.backoff.advance();
        } else {
            self.clock.delay_us(delay);
        }
    }
}

impl core::fmt::Debug for Poller<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Poller")
            .field("deadline", &self.deadline)
            .field("backoff", &self.backoff)
            .finish()
    }
}

// =============================================================================
// MANUAL CLOCK
// =============================================================================

/// Deterministic clock that only advances when waited on
///
/// Used by simulation and tests; sleeps advance by their minimum bound.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_us: AtomicU64,
    sleeps: AtomicU64,
    delays: AtomicU64,
}

impl ManualClock {
    /// Clock at time zero
    pub const fn new() -> Self {
        Self {
            now_us: AtomicU64::new(0),
            sleeps: AtomicU64::new(0),
            delays: AtomicU64::new(0),
        }
    }

    /// Move time forward
    pub fn advance_us(&self, us: u64) {
        self.now_us.fetch_add(us, Ordering::SeqCst);
    }

    /// Number of `sleep_us` calls so far
    pub fn sleep_count(&self) -> u64 {
        self.sleeps.load(Ordering::SeqCst)
    }

    /// Number of `delay_us` calls so far
    pub fn delay_count(&self) -> u64 {
        self.delays.load(Ordering::SeqCst)
    }
}

impl Clock for ManualClock {
    fn now_us(&self) -> u64 {
        self.now_us.load(Ordering::SeqCst)
    }

    fn sleep_us(&self, min_us: u32, _max_us: u32) {
        self.sleeps.fetch_add(1, Ordering::SeqCst);
        self.advance_us(min_us as u64);
    }

    fn delay_us(&self, us: u32) {
        self.delays.fetch_add(1, Ordering::SeqCst);
        self.advance_us(us as u64);
    }
}

static_assertions::assert_impl_all!(ManualClock: Clock, Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;

    #[test]
    fn test_backoff_doubles_to_cap() {
        let mut backoff = Backoff::new(&PollPolicy::new(10, 200, 1_000));
        let mut seen = Vec::new();
        for _ in 0..7 {
            seen.push(backoff.current_us());
            backoff.advance();
        }
        assert_eq!(seen, [10, 20, 40, 80, 160, 200, 200]);
    }

    #[test]
    fn test_poller_expires_on_manual_clock() {
        let clock = ManualClock::new();
        let policy = PollPolicy::new(10, 40, 100);
        let mut poller = policy.start(&clock);

        let mut iterations = 0;
        while !poller.expired() {
            poller.wait(true);
            iterations += 1;
        }
        // 10 + 20 + 40 + 40 = 110 >= 100
        assert_eq!(iterations, 4);
        assert_eq!(clock.sleep_count(), 4);
        assert_eq!(clock.delay_count(), 0);
    }

    #[test]
    fn test_busy_wait_keeps_delay_fixed() {
        let clock = ManualClock::new();
        let mut poller = PollPolicy::new(5, 200, 50).start(&clock);
        poller.wait(false);
        poller.wait(false);
        assert_eq!(poller.delay_us(), 5);
        assert_eq!(clock.now_us(), 10);
        assert_eq!(clock.delay_count(), 2);
    }

    #[test]
    fn test_deadline_is_relative_to_start() {
        let clock = ManualClock::new();
        clock.advance_us(1_000);
        let deadline = Deadline::after(&clock, 500);
        assert!(!deadline.expired(&clock));
        clock.advance_us(499);
        assert!(!deadline.expired(&clock));
        clock.advance_us(1);
        assert!(deadline.expired(&clock));
    }
}
