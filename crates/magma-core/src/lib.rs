//! # MAGMA Core
//!
//! Foundational error and value types for the MAGMA graphics-engine stack.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                 magma-core                  │
//! │  ┌──────────────────┐  ┌─────────────────┐  │
//! │  │      Types       │  │      Error      │  │
//! │  │ (PhysAddr, ids,  │  │    Handling     │  │
//! │  │  ByteSize)       │  │                 │  │
//! │  └──────────────────┘  └─────────────────┘  │
//! └─────────────────────────────────────────────┘
//! ```

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

#[cfg(any(test, feature = "std"))]
extern crate std;

// =============================================================================
// MODULE EXPORTS
// =============================================================================

pub mod error;
pub mod types;

// Re-exports for convenience
pub use error::{Error, Result};
pub use types::*;
