//! # MAGMA HAL
//!
//! Hardware abstraction for the graphics-engine stack: register access,
//! host time services and the retry policy every hardware wait is built on.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │                      magma-hal                        │
//! │  ┌────────────┐   ┌──────────────┐   ┌─────────────┐  │
//! │  │    mmio    │   │   platform   │   │    poll     │  │
//! │  │ RegisterIo │   │    Clock     │   │ PollPolicy  │  │
//! │  │ MmioRegion │   │   StdClock   │   │ ManualClock │  │
//! │  └────────────┘   └──────────────┘   └─────────────┘  │
//! └───────────────────────────────────────────────────────┘
//! ```

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod mmio;
pub mod platform;
pub mod poll;

// Re-exports
pub use mmio::{MmioRegion, RegisterIo};
pub use platform::Clock;
pub use poll::{Backoff, Deadline, ManualClock, PollPolicy, Poller};
