//! # Netlist Register Lists
//!
//! Register lists shipped with the ctxsw firmware. The `ctxsw_regs` lists
//! describe which registers the ucode saves and at which word index, and
//! `pm_regs` does the same for the PM image. The `sw_*` lists are replayed
//! by the golden-image bootstrap to bring the engine into its canonical
//! state.

use alloc::vec::Vec;

/// Register saved by the ctxsw ucode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AivEntry {
    /// Register address (unicast GPC0/TPC0 form for per-unit lists)
    pub addr: u32,
    /// Byte index of the saved value within its segment
    pub index: u32,
    /// Init value
    pub value: u32,
}

/// Address/value pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvEntry {
    /// Register or bundle address
    pub addr: u32,
    /// Value
    pub value: u32,
}

/// Address with a 64-bit value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Av64Entry {
    /// Bundle address
    pub addr: u32,
    /// Low word
    pub value_lo: u32,
    /// High word
    pub value_hi: u32,
}

/// Saved-register lists, one per unit class
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CtxswRegLists {
    /// SYS and BE broadcast registers
    pub sys: Vec<AivEntry>,
    /// GPC registers
    pub gpc: Vec<AivEntry>,
    /// TPC registers
    pub tpc: Vec<AivEntry>,
    /// PPC registers
    pub ppc: Vec<AivEntry>,
    /// Extended TPC registers
    pub etpc: Vec<AivEntry>,
}

/// Firmware-provided register tables
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Netlist {
    /// Saved-register layout
    pub ctxsw_regs: CtxswRegLists,
    /// Registers saved in the PM image; `index` is the byte offset
    pub pm_regs: Vec<AivEntry>,
    /// Registers loaded before the golden save
    pub sw_ctx_load: Vec<AvEntry>,
    /// Pipe bundles
    pub sw_bundle_init: Vec<AvEntry>,
    /// Pipe bundles with 64-bit data
    pub sw_bundle64_init: Vec<Av64Entry>,
    /// Per-VEID bundles
    pub sw_veid_bundle_init: Vec<AvEntry>,
    /// MME shadow RAM methods
    pub sw_method_init: Vec<AvEntry>,
}
