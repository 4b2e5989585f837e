//! # MAGMA Core Types
//!
//! Address, size and identifier types shared across the engine stack.

use core::fmt;

// =============================================================================
// PHYSICAL ADDRESS
// =============================================================================

/// Physical memory address (instance blocks, context buffers)
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct PhysAddr(u64);

impl PhysAddr {
    /// Create a new physical address
    #[inline]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Get the raw u64 value
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Page frame number for a `1 << shift` sized page
    #[inline]
    pub const fn frame(self, shift: u32) -> u64 {
        self.0 >> shift
    }
}

impl fmt::Debug for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysAddr(0x{:016x})", self.0)
    }
}

// =============================================================================
// APERTURE
// =============================================================================

/// Memory aperture a GPU-visible buffer lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Aperture {
    /// Video memory
    #[default]
    VidMem,
    /// Coherent system memory
    SysMemCoherent,
    /// Non-coherent system memory
    SysMemNonCoherent,
}

// =============================================================================
// SIZE TYPES
// =============================================================================

/// Size in bytes
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct ByteSize(u64);

impl ByteSize {
    /// Zero size
    pub const ZERO: Self = Self(0);

    /// Create from bytes
    #[inline]
    pub const fn from_bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    /// Create from KiB
    #[inline]
    pub const fn from_kib(kib: u64) -> Self {
        Self(kib * 1024)
    }

    /// Get as bytes
    #[inline]
    pub const fn as_bytes(self) -> u64 {
        self.0
    }

    /// Check for zero
    #[inline]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 >= 1024 * 1024 {
            write!(f, "{} MiB", self.0 / (1024 * 1024))
        } else if self.0 >= 1024 {
            write!(f, "{} KiB", self.0 / 1024)
        } else {
            write!(f, "{} B", self.0)
        }
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Hardware channel id
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ChannelId(pub u32);

/// Timeslice group id
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct TsgId(pub u32);

impl TsgId {
    /// Id reported when a channel is not bound to any TSG
    pub const INVALID: Self = Self(u32::MAX);

    /// Check for a bound TSG
    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 != u32::MAX
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::format;

    #[test]
    fn test_phys_addr_frame() {
        let addr = PhysAddr::new(0x1_2345_6000);
        assert_eq!(addr.frame(12), 0x123456);
    }

    #[test]
    fn test_byte_size_display() {
        assert_eq!(format!("{}", ByteSize::from_bytes(256)), "256 B");
        assert_eq!(format!("{}", ByteSize::from_kib(8)), "8 KiB");
        assert!(ByteSize::ZERO.is_zero());
    }

    #[test]
    fn test_tsg_invalid() {
        assert!(!TsgId::INVALID.is_valid());
        assert!(TsgId(3).is_valid());
    }
}
