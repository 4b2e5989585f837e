//! # Host Services
//!
//! The graphics engine core does not own channels, memory or power
//! management. It reaches those through the small traits below, which the
//! surrounding driver implements and hands over in [`GrServices`].

use alloc::sync::Arc;

use magma_core::{Aperture, ByteSize, ChannelId, PhysAddr, Result, TsgId};
use magma_hal::{Clock, RegisterIo};

use crate::falcon::CurrentCtx;
use crate::global_ctx::GlobalCtxBufferKind;

// =============================================================================
// INSTANCE BLOCKS
// =============================================================================

/// Channel instance block, the identity FECS knows a context by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstBlock {
    /// Physical address, 4 KiB aligned
    pub addr: PhysAddr,
    /// Memory the block lives in
    pub aperture: Aperture,
}

impl InstBlock {
    /// Instance block in video memory
    pub const fn vidmem(addr: PhysAddr) -> Self {
        Self {
            addr,
            aperture: Aperture::VidMem,
        }
    }

    /// 4 KiB frame number, as programmed into FECS
    #[inline]
    pub const fn ptr(&self) -> u32 {
        self.addr.frame(12) as u32
    }

    /// Current-context word FECS reports while this block is resident
    #[inline]
    pub fn current_ctx(&self) -> CurrentCtx {
        CurrentCtx::from_inst_block(self)
    }
}

// =============================================================================
// COLLABORATOR TRAITS
// =============================================================================

/// Engine-level power gating (ELPG)
pub trait PowerGating: Send + Sync {
    /// Disable power gating and wait until the engine is powered
    fn elpg_disable(&self) -> Result<()>;

    /// Re-enable power gating
    fn elpg_enable(&self) -> Result<()>;
}

/// Channel bookkeeping owned by the FIFO layer
pub trait ChannelTable: Send + Sync {
    /// Number of hardware channel ids
    fn num_channels(&self) -> u32;

    /// Instance block of a live channel, `None` for a free id
    fn inst_block(&self, chid: ChannelId) -> Option<InstBlock>;

    /// TSG a live channel is bound to
    fn tsg_id(&self, chid: ChannelId) -> TsgId;

    /// Keep the scheduler from running `chid`'s TSG
    fn disable_tsg(&self, chid: ChannelId);

    /// Let the scheduler run `chid`'s TSG again
    fn enable_tsg(&self, chid: ChannelId);
}

/// Falcon and error reporting sinks
pub trait Diagnostics: Send + Sync {
    /// Dump falcon debug state after a failed ucode wait
    fn dump_falcon_stats(&self);

    /// Report an SM machine-check error
    fn report_sm_exception(&self, report: &crate::sm::SmErrorReport);
}

/// Debugger and fault state owned by other engines
pub trait DebuggerHost: Send + Sync {
    /// Whether an MMU fault is pending
    fn mmu_fault_pending(&self) -> bool;

    /// Wake debugger clients waiting on a breakpoint event
    fn post_bpt_event(&self, event: crate::sm::BptEvent);
}

/// Engine setup steps owned by other layers, run during the golden bootstrap
pub trait GrInitOps: Send + Sync {
    /// Wait until the graphics engine and its FIFO are idle
    fn wait_idle(&self) -> Result<()>;

    /// Point the engine at the global context buffers
    fn commit_global_ctx_buffers(&self) -> Result<()>;

    /// Program the global timeslice
    fn commit_global_timeslice(&self) -> Result<()>;

    /// Apply floorsweeping state
    fn init_fs_state(&self) -> Result<()>;

    /// Program preemption timeouts
    fn init_preemption_state(&self, _timeout: u32) -> Result<()> {
        Ok(())
    }

    /// Initialize zcull for the golden context
    fn init_zcull(&self) -> Result<()>;

    /// Read back the saved context image of the bound channel
    fn read_context_image(&self, out: &mut [u8]) -> Result<()>;
}

/// Backing store of a global context buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferHandle {
    /// Buffer kind
    pub kind: GlobalCtxBufferKind,
    /// GPU physical address
    pub addr: PhysAddr,
    /// Allocated size
    pub size: ByteSize,
}

/// DMA allocator for global context buffers
pub trait BufferAllocator: Send + Sync {
    /// Allocate a buffer of `size` bytes
    fn alloc(&self, kind: GlobalCtxBufferKind, size: ByteSize) -> Result<BufferHandle>;

    /// Release a buffer
    fn free(&self, handle: BufferHandle);
}

// =============================================================================
// SERVICE BUNDLE
// =============================================================================

/// Everything the engine core borrows from its host
#[derive(Clone)]
pub struct GrServices {
    /// BAR0 register access
    pub regs: Arc<dyn RegisterIo>,
    /// Time source
    pub clock: Arc<dyn Clock>,
    /// Power gating
    pub pg: Arc<dyn PowerGating>,
    /// Channel table
    pub channels: Arc<dyn ChannelTable>,
    /// Diagnostics sinks
    pub diag: Arc<dyn Diagnostics>,
    /// Debugger state
    pub debugger: Arc<dyn DebuggerHost>,
    /// Bootstrap collaborators
    pub init: Arc<dyn GrInitOps>,
}

impl core::fmt::Debug for GrServices {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GrServices").finish_non_exhaustive()
    }
}
