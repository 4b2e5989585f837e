//! # Memory-Mapped I/O Operations
//!
//! Register access for the GPU's BAR0 window.
//!
//! Engine code never touches raw pointers: it talks to a [`RegisterIo`]
//! implementation, which is either a volatile [`MmioRegion`] on real
//! hardware or a scripted register file in tests.

use core::ptr::NonNull;

// =============================================================================
// REGISTER ACCESS TRAIT
// =============================================================================

/// 32-bit register access to a GPU priv space
///
/// Offsets are byte offsets from BAR0. Implementations use interior
/// mutability: MMIO writes are side effects on the device, not on `self`.
pub trait RegisterIo: Send + Sync {
    /// Read a 32-bit register
    fn read32(&self, offset: u32) -> u32;

    /// Write a 32-bit register
    fn write32(&self, offset: u32, value: u32);

    /// Read-modify-write of the bits selected by `mask`
    fn modify32(&self, offset: u32, mask: u32, value: u32) {
        let current = self.read32(offset);
        self.write32(offset, set_field(current, mask, value));
    }
}

// =============================================================================
// MMIO REGION
// =============================================================================

/// Volatile view of a mapped BAR region
#[derive(Debug)]
pub struct MmioRegion {
    base: NonNull<u32>,
    size: usize,
}

// SAFETY: the region is device memory; every access is a single volatile
// 32-bit load or store, which the device serializes.
unsafe impl Send for MmioRegion {}
// SAFETY: see above, no CPU-side state is shared through `&self`.
unsafe impl Sync for MmioRegion {}

impl MmioRegion {
    /// Wrap an already mapped region
    ///
    /// # Safety
    /// - `base` must point to a live uncached mapping of at least `size` bytes
    /// - `base` must be 4-byte aligned
    /// - The mapping must outlive the returned value
    pub unsafe fn from_raw(base: NonNull<u8>, size: usize) -> Self {
        Self {
            base: base.cast(),
            size,
        }
    }

    /// Get region size in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    fn in_bounds(&self, offset: u32) -> bool {
        offset % 4 == 0 && (offset as usize).saturating_add(4) <= self.size
    }
}

impl RegisterIo for MmioRegion {
    fn read32(&self, offset: u32) -> u32 {
        if !self.in_bounds(offset) {
            log::error!("mmio: read outside BAR0 window: 0x{:08x}", offset);
            return u32::MAX;
        }
        // SAFETY: offset is aligned and within the mapping checked above
        let value = unsafe { self.base.as_ptr().add(offset as usize / 4).read_volatile() };
        fence::mmio_read_barrier();
        value
    }

    fn write32(&self, offset: u32, value: u32) {
        if !self.in_bounds(offset) {
            log::error!("mmio: write outside BAR0 window: 0x{:08x}", offset);
            return;
        }
        fence::mmio_write_barrier();
        // SAFETY: offset is aligned and within the mapping checked above
        unsafe { self.base.as_ptr().add(offset as usize / 4).write_volatile(value) }
    }
}

static_assertions::assert_impl_all!(MmioRegion: RegisterIo);

// =============================================================================
// MMIO UTILS
// =============================================================================

/// Replace the bits selected by `mask` with those of `field`
#[inline]
pub const fn set_field(value: u32, mask: u32, field: u32) -> u32 {
    (value & !mask) | (field & mask)
}

// =============================================================================
// MEMORY FENCE OPERATIONS
// =============================================================================

/// Memory barrier types for MMIO
pub mod fence {
    //! Memory barrier operations

    /// Compiler fence (prevents reordering)
    #[inline(always)]
    pub fn compiler() {
        core::sync::atomic::compiler_fence(core::sync::atomic::Ordering::SeqCst);
    }

    /// Memory barrier before MMIO write
    #[inline(always)]
    pub fn mmio_write_barrier() {
        cfg_if::cfg_if! {
            if #[cfg(target_arch = "aarch64")] {
                // SAFETY: store barrier, no memory operands
                unsafe {
                    core::arch::asm!("dmb st", options(nostack, preserves_flags));
                }
            } else {
                compiler();
            }
        }
    }

    /// Memory barrier after MMIO read
    #[inline(always)]
    pub fn mmio_read_barrier() {
        cfg_if::cfg_if! {
            if #[cfg(target_arch = "aarch64")] {
                // SAFETY: load barrier, no memory operands
                unsafe {
                    core::arch::asm!("dmb ld", options(nostack, preserves_flags));
                }
            } else {
                compiler();
            }
        }
    }
}
