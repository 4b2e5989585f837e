//! GM20B (Maxwell) graphics engine description.

use super::{ChipOps, Litter, SmRegs};

const LITTER: Litter = Litter {
    num_gpcs: 1,
    num_tpc_per_gpc: 2,
    num_pes_per_gpc: 1,
    num_sm_per_tpc: 1,
    num_fbps: 1,
    num_fbpas: 1,

    gpc_base: 0x0050_0000,
    gpc_stride: 0x8000,
    gpc_shared_base: 0x0041_8000,

    tpc_in_gpc_base: 0x4000,
    tpc_in_gpc_stride: 0x800,
    tpc_in_gpc_shared_base: 0x1800,

    ppc_in_gpc_base: 0x3000,
    ppc_in_gpc_stride: 0x200,
    ppc_in_gpc_shared_base: 0x3e00,

    rop_base: 0x0041_0000,
    rop_stride: 0x400,
    rop_shared_base: 0x0040_8800,

    fbpa_base: 0x0090_0000,
    fbpa_stride: 0x4000,
    fbpa_shared_base: 0x009a_0000,

    pltcg_base: 0x0014_0000,
    pltcg_extent: 0x0017_ffff,
    ltc0_ltss_base: 0x0014_0200,
    ltc0_lts0_base: 0x0014_0400,
    ltcs_ltss_base: 0x0017_e200,
    ltc_stride: 0x2000,
    lts_stride: 0x200,
};

const SM_REGS: SmRegs = SmRegs {
    dbgr_control0: 0x0050_460c,
    dbgr_status0: 0x0050_462c,
    hww_global_esr: 0x0050_4650,
    hww_warp_esr: 0x0050_4648,
    hww_warp_esr_pc: 0x0050_464c,
    warp_valid_mask_0: 0x0050_4614,
    warp_valid_mask_1: 0x0050_4618,
    bpt_pause_mask_0: 0x0050_4624,
    bpt_pause_mask_1: 0x0050_4628,
    bpt_trap_mask_0: 0x0050_4634,
    bpt_trap_mask_1: 0x0050_4638,
    tpc_exception_en: 0x0050_450c,
    gpcs_tpcs_dbgr_control0: 0x0041_9e0c,
    gpcs_tpcs_bpt_pause_mask: 0x0041_9e24,
    gpcs_tpcs_tpc_exception_en: 0x0041_9d0c,
    sm_stride: 0,
};

// SM DSM perf counters, GPC0/TPC0 unicast
const SM_DSM_PERF_REGS: [u32; 5] = [
    0x0050_4700, // status
    0x0050_4704, // counter 0
    0x0050_4708, // counter 1
    0x0050_470c, // counter 2
    0x0050_4710, // counter 3
];

const SM_DSM_PERF_CTRL_REGS: [u32; 4] = [0x0050_4720, 0x0050_4724, 0x0050_4728, 0x0050_472c];

// SCC bundle CB, 256B granules
const BUNDLE_CB_SIZE_DIV_256B: u32 = 0x18;
const PAGEPOOL_TOTAL_PAGES: u32 = 0x80;
const ATTRIB_CB_DEFAULT_SIZE: u32 = 0x800;
const ALPHA_CB_DEFAULT_SIZE: u32 = 0x400;
const CB_SIZE_GRANULARITY: u32 = 32;

/// Maxwell GM20B
#[derive(Debug, Clone, Copy, Default)]
pub struct Gm20b;

/// Shared GM20B description
pub static GM20B: Gm20b = Gm20b;

impl ChipOps for Gm20b {
    fn name(&self) -> &'static str {
        "gm20b"
    }

    fn litter(&self) -> &Litter {
        &LITTER
    }

    fn sm_regs(&self) -> &SmRegs {
        &SM_REGS
    }

    fn sm_dsm_perf_regs(&self) -> &[u32] {
        &SM_DSM_PERF_REGS
    }

    fn sm_dsm_perf_ctrl_regs(&self) -> &[u32] {
        &SM_DSM_PERF_CTRL_REGS
    }

    fn global_ctx_cb_size(&self) -> u32 {
        BUNDLE_CB_SIZE_DIV_256B * 256
    }

    fn global_ctx_pagepool_size(&self) -> u32 {
        PAGEPOOL_TOTAL_PAGES * 256
    }

    fn global_ctx_attrib_cb_size(&self, _tpc_count: u32, max_tpc: u32) -> u32 {
        (ATTRIB_CB_DEFAULT_SIZE + ALPHA_CB_DEFAULT_SIZE) * CB_SIZE_GRANULARITY * max_tpc
    }
}

static_assertions::const_assert!(LITTER.tpc_in_gpc_base + LITTER.num_tpc_per_gpc * LITTER.tpc_in_gpc_stride <= LITTER.gpc_stride);
static_assertions::const_assert!(LITTER.ltc_stride.is_power_of_two());
static_assertions::const_assert!(LITTER.lts_stride.is_power_of_two());
