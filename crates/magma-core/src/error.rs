//! # MAGMA Error Handling
//!
//! Error taxonomy shared by the graphics-engine control stack.
//!
//! The split between *expected* and *fatal* failures matters to callers:
//! [`Error::NotFound`] from the context-image resolver means "this register
//! has no saved copy, skip it", while every other variant aborts the
//! operation that produced it.

use core::fmt;

// =============================================================================
// RESULT TYPE
// =============================================================================

/// MAGMA Result type alias
pub type Result<T> = core::result::Result<T, Error>;

// =============================================================================
// ERROR ENUM
// =============================================================================

/// MAGMA unified error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    // =========================================================================
    // Generic Errors
    // =========================================================================
    /// Invalid parameter provided
    InvalidParameter,
    /// Resource not found (soft failure, caller may keep scanning)
    NotFound,
    /// Operation timed out
    Timeout,
    /// Operation not supported on this hardware
    NotSupported,
    /// Required state has not been created yet
    NotInitialized,
    /// Caller-sized output would overflow
    ResourceExhausted,

    // =========================================================================
    // Firmware Errors
    // =========================================================================
    /// Falcon ucode reported its failure value in a mailbox
    UcodeError,
    /// Inconsistent request or data that indicates a driver bug
    ProtocolMisuse,

    // =========================================================================
    // Hardware Errors
    // =========================================================================
    /// GPU reported a fault that needs recovery above this layer
    GpuFault,
    /// SM cannot lock down because an MMU fault is pending
    MmuFaultAbort,
    /// Operation requires an attached SM debugger
    DebuggerNotAttached,

    // =========================================================================
    // Memory Errors
    // =========================================================================
    /// Out of system memory
    OutOfMemory,
    /// Read or write past the end of a buffer
    BufferOverflow,
}

impl Error {
    /// Whether the error is the recoverable "no saved location" result
    #[inline]
    pub const fn is_not_found(self) -> bool {
        matches!(self, Self::NotFound)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Generic
            Self::InvalidParameter => write!(f, "invalid parameter"),
            Self::NotFound => write!(f, "resource not found"),
            Self::Timeout => write!(f, "operation timed out"),
            Self::NotSupported => write!(f, "operation not supported"),
            Self::NotInitialized => write!(f, "state not initialized"),
            Self::ResourceExhausted => write!(f, "output capacity exceeded"),

            // Firmware
            Self::UcodeError => write!(f, "ucode reported failure"),
            Self::ProtocolMisuse => write!(f, "protocol misuse"),

            // Hardware
            Self::GpuFault => write!(f, "GPU fault detected"),
            Self::MmuFaultAbort => write!(f, "aborted on pending MMU fault"),
            Self::DebuggerNotAttached => write!(f, "SM debugger not attached"),

            // Memory
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::BufferOverflow => write!(f, "buffer overflow"),
        }
    }
}

static_assertions::assert_impl_all!(Error: Copy, Send, Sync, fmt::Display);
