//! # Global Context Buffers
//!
//! Buffers shared by every graphics context on the GPU: the bundle
//! circular buffer, the page pool, the attribute circular buffer and the
//! priv access map. Each protected (VPR) variant has the size of its
//! regular counterpart.

use arrayvec::ArrayVec;

use magma_core::{ByteSize, Error, Result};

use crate::config::GrConfig;
use crate::hw::ChipOps;
use crate::services::{BufferAllocator, BufferHandle};

/// Size of the priv access map
pub const PRIV_ACCESS_MAP_SIZE: ByteSize = ByteSize::from_kib(512);

/// Global context buffer kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum GlobalCtxBufferKind {
    /// Bundle circular buffer
    Circular = 0,
    /// Page pool
    Pagepool = 1,
    /// Attribute circular buffer
    Attribute = 2,
    /// Protected bundle circular buffer
    CircularVpr = 3,
    /// Protected page pool
    PagepoolVpr = 4,
    /// Protected attribute circular buffer
    AttributeVpr = 5,
    /// Priv register whitelist
    PrivAccessMap = 6,
    /// FECS context switch trace buffer
    FecsTrace = 7,
}

impl GlobalCtxBufferKind {
    /// Number of kinds
    pub const COUNT: usize = 8;

    /// Every kind, in allocation order
    pub const ALL: [Self; Self::COUNT] = [
        Self::Circular,
        Self::Pagepool,
        Self::Attribute,
        Self::CircularVpr,
        Self::PagepoolVpr,
        Self::AttributeVpr,
        Self::PrivAccessMap,
        Self::FecsTrace,
    ];

    /// Whether the engine cannot run without this buffer
    pub const fn is_required(self) -> bool {
        !matches!(self, Self::FecsTrace)
    }

    /// Regular buffer a protected variant mirrors
    pub const fn vpr_source(self) -> Option<Self> {
        match self {
            Self::CircularVpr => Some(Self::Circular),
            Self::PagepoolVpr => Some(Self::Pagepool),
            Self::AttributeVpr => Some(Self::Attribute),
            _ => None,
        }
    }
}

/// Sizes and backing store of the global context buffers
#[derive(Debug, Default)]
pub struct GlobalCtxBuffers {
    sizes: [ByteSize; GlobalCtxBufferKind::COUNT],
    handles: ArrayVec<BufferHandle, { GlobalCtxBufferKind::COUNT }>,
}

impl GlobalCtxBuffers {
    /// Empty descriptor table
    pub fn new() -> Self {
        Self::default()
    }

    /// Descriptor table sized for a chip and its floorswept population
    pub fn for_chip(chip: &dyn ChipOps, config: &GrConfig) -> Self {
        let mut buffers = Self::new();
        let cb = ByteSize::from_bytes(u64::from(chip.global_ctx_cb_size()));
        let pagepool = ByteSize::from_bytes(u64::from(chip.global_ctx_pagepool_size()));
        let attrib = ByteSize::from_bytes(u64::from(
            chip.global_ctx_attrib_cb_size(config.tpc_count(), config.max_tpc_per_gpc_count * config.max_gpc_count),
        ));

        log::debug!("gr: cb {} pagepool {} attrib {}", cb, pagepool, attrib);
        buffers.set_size(GlobalCtxBufferKind::Circular, cb);
        buffers.set_size(GlobalCtxBufferKind::Pagepool, pagepool);
        buffers.set_size(GlobalCtxBufferKind::Attribute, attrib);
        buffers.set_size(GlobalCtxBufferKind::PrivAccessMap, PRIV_ACCESS_MAP_SIZE);
        buffers.mirror_vpr_sizes();
        buffers
    }

    /// Set the size of one buffer
    pub fn set_size(&mut self, kind: GlobalCtxBufferKind, size: ByteSize) {
        self.sizes[kind as usize] = size;
    }

    /// Size of one buffer
    #[inline]
    pub fn size(&self, kind: GlobalCtxBufferKind) -> ByteSize {
        self.sizes[kind as usize]
    }

    /// Sum of all buffer sizes
    pub fn total_size(&self) -> ByteSize {
        ByteSize::from_bytes(self.sizes.iter().map(|s| s.as_bytes()).sum())
    }

    fn mirror_vpr_sizes(&mut self) {
        for kind in GlobalCtxBufferKind::ALL {
            if let Some(src) = kind.vpr_source() {
                self.sizes[kind as usize] = self.size(src);
            }
        }
    }

    /// Check every required buffer is sized
    pub fn validate(&self) -> Result<()> {
        for kind in GlobalCtxBufferKind::ALL {
            if kind.is_required() && self.size(kind).is_zero() {
                log::error!("gr: global ctx buffer {:?} has no size", kind);
                return Err(Error::InvalidParameter);
            }
            if let Some(src) = kind.vpr_source() {
                if self.size(kind) != self.size(src) {
                    log::error!("gr: {:?} size does not match {:?}", kind, src);
                    return Err(Error::InvalidParameter);
                }
            }
        }
        Ok(())
    }

    /// Allocate backing store for every sized buffer
    ///
    /// On failure the buffers allocated so far are released.
    pub fn alloc(&mut self, allocator: &dyn BufferAllocator) -> Result<()> {
        self.validate()?;
        if !self.handles.is_empty() {
            return Ok(());
        }

        for kind in GlobalCtxBufferKind::ALL {
            let size = self.size(kind);
            if size.is_zero() {
                continue;
            }
            match allocator.alloc(kind, size) {
                Ok(handle) => self.handles.push(handle),
                Err(err) => {
                    log::error!("gr: failed to allocate {:?} ({}): {:?}", kind, size, err);
                    self.free(allocator);
                    return Err(err);
                }
            }
        }
        log::info!("gr: allocated {} of global ctx buffers", self.total_size());
        Ok(())
    }

    /// Release every allocated buffer
    pub fn free(&mut self, allocator: &dyn BufferAllocator) {
        for handle in self.handles.drain(..) {
            allocator.free(handle);
        }
    }

    /// Backing store of one buffer, once allocated
    pub fn handle(&self, kind: GlobalCtxBufferKind) -> Option<&BufferHandle> {
        self.handles.iter().find(|h| h.kind == kind)
    }

    /// Whether backing store is allocated
    #[inline]
    pub fn is_allocated(&self) -> bool {
        !self.handles.is_empty()
    }
}
