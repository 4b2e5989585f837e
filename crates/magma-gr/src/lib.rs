//! # MAGMA Graphics Engine
//!
//! Context-switch control and diagnostics for the PGRAPH engine of NVIDIA
//! GPUs.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            magma-gr                              │
//! │                                                                  │
//! │   ┌──────────┐   ┌──────────┐   ┌────────────┐   ┌───────────┐   │
//! │   │  falcon  │   │  golden  │   │    pri     │   │    sm     │   │
//! │   │ mailbox, │   │ bootstrap│   │  decode,   │   │ lock-down,│   │
//! │   │ methods, │   │  image   │   │  tables    │   │ exceptions│   │
//! │   │ ctxsw    │   └──────────┘   └─────┬──────┘   └───────────┘   │
//! │   └──────────┘                        │                          │
//! │                               ┌───────▼──────┐   ┌───────────┐   │
//! │   ┌──────────┐   ┌────────┐   │  ctx_image   │   │global_ctx │   │
//! │   │    hw    │   │  tlb   │   │   offsets    │   │  buffers  │   │
//! │   │ ChipOps  │   └────────┘   └──────────────┘   └───────────┘   │
//! │   └──────────┘                                                   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The engine never owns channels, memory or power management; it reaches
//! them through the traits in [`services`].

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

extern crate alloc;

#[cfg(any(test, feature = "std"))]
extern crate std;

// =============================================================================
// MODULE EXPORTS
// =============================================================================

pub mod config;
pub mod ctx_image;
pub mod falcon;
pub mod global_ctx;
pub mod golden;
pub mod gr;
pub mod hw;
pub mod netlist;
pub mod pri;
pub mod services;
pub mod sm;
pub mod tlb;

#[cfg(test)]
mod testing;

// Re-exports for convenience
pub use config::{GrConfig, GrParams, SmInfo};
pub use ctx_image::{CtxImage, HwpmMap, OffsetResolver};
pub use falcon::{CtxImageSizes, CtxswControl, CtxswGate, CurrentCtx, Fecs, FecsMethod};
pub use global_ctx::{GlobalCtxBufferKind, GlobalCtxBuffers};
pub use golden::{GoldenBootstrap, GoldenImage};
pub use gr::Gr;
pub use hw::{ChipOps, Gm20b, Gv100, GM20B, GV100};
pub use netlist::Netlist;
pub use pri::{AddrType, BroadcastFlags, PrivAddr, PrivAddrDecoder, PrivAddrTable};
pub use services::{GrServices, InstBlock};
pub use sm::{BptEvent, GlobalEsr, SmController, SmErrorState, WarpState};
pub use tlb::ChannelTlb;
