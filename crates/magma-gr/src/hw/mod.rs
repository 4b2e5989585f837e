//! # Hardware Description
//!
//! Everything that differs between GPU generations lives behind
//! [`ChipOps`]: unit counts and strides ("litter" values), the
//! context-image header layout, SM register offsets, and the handful of
//! hooks where one generation decodes or expands addresses differently.
//!
//! ```text
//!            ┌──────────────────────────┐
//!            │        ChipOps           │
//!            │ litter() ctxsw_prog()    │
//!            │ sm_regs() perf tables    │
//!            │ egpc / ltc / fbpa hooks  │
//!            └────────────┬─────────────┘
//!                ┌────────┴────────┐
//!            ┌───┴───┐         ┌───┴───┐
//!            │ GM20B │         │ GV100 │
//!            └───────┘         └───────┘
//! ```

pub mod gm20b;
pub mod gv100;
pub mod regs;

pub use gm20b::{Gm20b, GM20B};
pub use gv100::{Gv100, GV100};

use magma_core::Result;

use crate::config::GrConfig;
use crate::pri::{PrivAddr, PrivAddrTable};
use crate::sm::{GlobalEsr, SmException, SmPreProcess};

// =============================================================================
// LITTER VALUES
// =============================================================================

/// Per-generation unit counts, bases and strides of the priv address map
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Litter {
    /// Maximum number of GPCs
    pub num_gpcs: u32,
    /// Maximum number of TPCs in a GPC
    pub num_tpc_per_gpc: u32,
    /// PES (PPC) units per GPC
    pub num_pes_per_gpc: u32,
    /// SMs per TPC
    pub num_sm_per_tpc: u32,
    /// Frame buffer partitions
    pub num_fbps: u32,
    /// Frame buffer partition memory controllers
    pub num_fbpas: u32,

    /// First unicast GPC
    pub gpc_base: u32,
    /// Distance between GPCs
    pub gpc_stride: u32,
    /// GPC broadcast window
    pub gpc_shared_base: u32,

    /// First TPC inside a GPC window
    pub tpc_in_gpc_base: u32,
    /// Distance between TPCs
    pub tpc_in_gpc_stride: u32,
    /// TPC broadcast window inside a GPC window
    pub tpc_in_gpc_shared_base: u32,

    /// First PPC inside a GPC window
    pub ppc_in_gpc_base: u32,
    /// Distance between PPCs
    pub ppc_in_gpc_stride: u32,
    /// PPC broadcast window inside a GPC window
    pub ppc_in_gpc_shared_base: u32,

    /// First unicast ROP
    pub rop_base: u32,
    /// Distance between ROPs
    pub rop_stride: u32,
    /// ROP broadcast window
    pub rop_shared_base: u32,

    /// First unicast FBPA
    pub fbpa_base: u32,
    /// Distance between FBPAs
    pub fbpa_stride: u32,
    /// FBPA broadcast window
    pub fbpa_shared_base: u32,

    /// Start of the L2 (LTC) priv window
    pub pltcg_base: u32,
    /// Last address of the L2 priv window
    pub pltcg_extent: u32,
    /// LTS registers of LTC0, used as the LTSS template
    pub ltc0_ltss_base: u32,
    /// First LTS of LTC0
    pub ltc0_lts0_base: u32,
    /// LTS broadcast to every LTC
    pub ltcs_ltss_base: u32,
    /// Distance between LTCs
    pub ltc_stride: u32,
    /// Distance between LTS slices
    pub lts_stride: u32,
}

// =============================================================================
// CONTEXT IMAGE LAYOUT
// =============================================================================

/// Byte layout of the headers inside a saved context image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CtxswProgLayout {
    /// Size of the main header and of the FECS local header
    pub fecs_header_size: u32,
    /// Size of each GPCCS local header
    pub gpccs_header_size: u32,
    /// Offset of the magic word in any header
    pub magic_offset: u32,
    /// Magic of the main header
    pub main_image_magic: u32,
    /// Magic of FECS and GPCCS local headers
    pub local_image_magic: u32,
    /// Main header: GPC count
    pub main_num_gpcs_offset: u32,
    /// Main header: extended buffer control word
    pub main_extended_buffer_ctl_offset: u32,
    /// Local header: priv register segment control word
    pub local_priv_register_ctl_offset: u32,
    /// Local header: PPC count and mask
    pub local_ppc_info_offset: u32,
    /// Local header: TPC count
    pub local_num_tpcs_offset: u32,
    /// Granularity of segment offsets
    pub segment_size: u32,
    /// Extended buffer segment granularity
    pub extended_segment_size: u32,
    /// Marker word at the start of each extended GPC segment
    pub extended_marker_size: u32,
    /// Words per TPC in the perf counter control area
    pub extended_perf_ctrl_stride: u32,
}

impl CtxswProgLayout {
    /// Layout shared by Maxwell through Volta ctxsw ucode
    pub const DEFAULT: Self = Self {
        fecs_header_size: 0x100,
        gpccs_header_size: 0x100,
        magic_offset: 0xfc,
        main_image_magic: 0x600d_c0de,
        local_image_magic: 0xad0b_ecab,
        main_num_gpcs_offset: 0x08,
        main_extended_buffer_ctl_offset: 0xec,
        local_priv_register_ctl_offset: 0x0c,
        local_ppc_info_offset: 0xf4,
        local_num_tpcs_offset: 0xf8,
        segment_size: 256,
        extended_segment_size: 256,
        extended_marker_size: 4,
        extended_perf_ctrl_stride: 7,
    };
}

// =============================================================================
// SM REGISTERS
// =============================================================================

/// SM debugger register offsets, relative to GPC0/TPC0/SM0
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmRegs {
    /// Debugger control
    pub dbgr_control0: u32,
    /// Debugger status
    pub dbgr_status0: u32,
    /// Global exception status
    pub hww_global_esr: u32,
    /// Warp exception status
    pub hww_warp_esr: u32,
    /// Faulting warp program counter
    pub hww_warp_esr_pc: u32,
    /// Valid warps, low word
    pub warp_valid_mask_0: u32,
    /// Valid warps, high word
    pub warp_valid_mask_1: u32,
    /// Paused warps, low word
    pub bpt_pause_mask_0: u32,
    /// Paused warps, high word
    pub bpt_pause_mask_1: u32,
    /// Trapped warps, low word
    pub bpt_trap_mask_0: u32,
    /// Trapped warps, high word
    pub bpt_trap_mask_1: u32,
    /// TPC exception forwarding enables
    pub tpc_exception_en: u32,
    /// Broadcast debugger control to every SM
    pub gpcs_tpcs_dbgr_control0: u32,
    /// Broadcast pause mask to every SM
    pub gpcs_tpcs_bpt_pause_mask: u32,
    /// Broadcast TPC exception enables
    pub gpcs_tpcs_tpc_exception_en: u32,
    /// Distance between SMs of one TPC
    pub sm_stride: u32,
}

// =============================================================================
// CHIP OPERATIONS
// =============================================================================

/// Generation-specific behavior of the graphics engine
///
/// Default methods implement the Maxwell behavior; newer chips override
/// only what changed.
pub trait ChipOps: Send + Sync + core::fmt::Debug {
    /// Marketing-free chip name used in logs
    fn name(&self) -> &'static str;

    /// Unit counts and priv map geometry
    fn litter(&self) -> &Litter;

    /// Context image header layout
    fn ctxsw_prog(&self) -> &CtxswProgLayout {
        &CtxswProgLayout::DEFAULT
    }

    /// SM debugger register block
    fn sm_regs(&self) -> &SmRegs;

    /// SM perf counter registers saved in the extended buffer
    fn sm_dsm_perf_regs(&self) -> &[u32];

    /// SM perf counter control registers saved in the extended buffer
    fn sm_dsm_perf_ctrl_regs(&self) -> &[u32];

    /// Whether the ctxsw ucode supports graphics/compute preemption
    fn supports_preemption(&self) -> bool {
        false
    }

    // -------------------------------------------------------------------------
    // TPC
    // -------------------------------------------------------------------------

    /// Whether a GPC-relative address is inside a TPC window
    fn is_tpc_addr(&self, gpc_addr: u32) -> bool {
        self.litter().is_tpc_addr(gpc_addr)
    }

    /// TPC index of a GPC-relative address, 0 when not unicast TPC
    fn get_tpc_num(&self, gpc_addr: u32) -> u32 {
        self.litter().tpc_num(gpc_addr)
    }

    // -------------------------------------------------------------------------
    // EGPC / ETPC
    // -------------------------------------------------------------------------

    /// Base of the extended GPC window, if the chip has one
    fn egpc_base(&self) -> Option<u32> {
        None
    }

    /// Whether `addr` is inside the extended GPC window
    fn is_egpc_addr(&self, _addr: u32) -> bool {
        false
    }

    /// Whether `addr` is an extended TPC address
    fn is_etpc_addr(&self, _addr: u32) -> bool {
        false
    }

    /// GPC and TPC index of an extended TPC address
    fn egpc_etpc_num(&self, _addr: u32) -> (u32, u32) {
        (0, 0)
    }

    /// Decode an address inside the extended GPC window
    fn decode_egpc_addr(&self, _addr: u32) -> Result<PrivAddr> {
        Err(magma_core::Error::NotSupported)
    }

    /// Expand an extended GPC/TPC address into unicast addresses
    fn egpc_etpc_priv_addr_table(
        &self,
        _addr: u32,
        _decoded: &PrivAddr,
        _config: &GrConfig,
        _table: &mut PrivAddrTable,
    ) -> Result<()> {
        Err(magma_core::Error::NotSupported)
    }

    // -------------------------------------------------------------------------
    // L2 CACHE
    // -------------------------------------------------------------------------

    /// Whether `addr` is inside the L2 priv window
    fn is_ltc_addr(&self, addr: u32) -> bool {
        let l = self.litter();
        addr >= l.pltcg_base && addr <= l.pltcg_extent
    }

    /// Whether `addr` is an LTS register broadcast to every LTC
    fn is_ltcs_ltss_addr(&self, addr: u32) -> bool {
        let l = self.litter();
        addr >= l.ltcs_ltss_base && addr < l.ltcs_ltss_base + l.lts_stride
    }

    /// Whether `addr` is an LTS register broadcast to every slice of one LTC
    fn is_ltcn_ltss_addr(&self, addr: u32) -> bool {
        let l = self.litter();
        let masked = addr & (l.ltc_stride - 1);
        let base = l.ltc0_ltss_base & (l.ltc_stride - 1);
        masked >= base && masked < base + l.lts_stride
    }

    /// Expand an LTSS broadcast into every slice of the addressed LTC
    fn split_lts_broadcast_addr(&self, addr: u32, config: &GrConfig, table: &mut PrivAddrTable) -> Result<()> {
        let l = self.litter();
        let ltc = (0..config.ltc_count).find(|&i| {
            let start = l.pltcg_base + i * l.ltc_stride;
            addr >= start && addr < start + l.ltc_stride
        });
        let Some(ltc) = ltc else {
            return Ok(());
        };
        for lts in 0..config.lts_per_ltc {
            table.push(l.lts_addr(addr, ltc, lts))?;
        }
        Ok(())
    }

    /// Expand an LTCS broadcast into every slice of every LTC
    fn split_ltc_broadcast_addr(&self, addr: u32, config: &GrConfig, table: &mut PrivAddrTable) -> Result<()> {
        let l = self.litter();
        for ltc in 0..config.ltc_count {
            for lts in 0..config.lts_per_ltc {
                table.push(l.lts_addr(addr, ltc, lts))?;
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // FBPA
    // -------------------------------------------------------------------------

    /// Expand an FBPA broadcast into every FBPA
    fn split_fbpa_broadcast_addr(&self, addr: u32, _config: &GrConfig, table: &mut PrivAddrTable) -> Result<()> {
        let l = self.litter();
        for fbpa in 0..l.num_fbpas {
            table.push(l.fbpa_addr(addr, fbpa))?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // SM EXCEPTIONS
    // -------------------------------------------------------------------------

    /// Global ESR bits that do not require a warp sync
    fn no_lock_down_global_esr_mask(&self) -> GlobalEsr {
        GlobalEsr::BPT_INT | GlobalEsr::BPT_PAUSE | GlobalEsr::SINGLE_STEP_COMPLETE
    }

    /// Chip hook run before the generic SM exception handling
    fn pre_process_sm_exception(&self, _exception: &SmException) -> Result<SmPreProcess> {
        Ok(SmPreProcess::default())
    }

    // -------------------------------------------------------------------------
    // GLOBAL CONTEXT BUFFERS
    // -------------------------------------------------------------------------

    /// Bundle circular buffer size
    fn global_ctx_cb_size(&self) -> u32;

    /// Page pool size
    fn global_ctx_pagepool_size(&self) -> u32;

    /// Attribute circular buffer size for the given TPC population
    fn global_ctx_attrib_cb_size(&self, tpc_count: u32, max_tpc: u32) -> u32;
}
