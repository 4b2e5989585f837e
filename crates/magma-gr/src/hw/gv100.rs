//! GV100 (Volta) graphics engine description.
//!
//! Volta adds the extended GPC window (EGPC/ETPC), two SMs per TPC,
//! floorswept FBPAs and ctxsw preemption support.

use magma_core::{Error, Result};

use super::{ChipOps, Litter, SmRegs};
use crate::config::GrConfig;
use crate::pri::{AddrType, BroadcastFlags, PrivAddr, PrivAddrTable};

const LITTER: Litter = Litter {
    num_gpcs: 6,
    num_tpc_per_gpc: 7,
    num_pes_per_gpc: 2,
    num_sm_per_tpc: 2,
    num_fbps: 8,
    num_fbpas: 16,

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

/// First unicast extended GPC
pub const EGPC_PRI_BASE: u32 = 0x0058_0000;
/// Extended GPC broadcast window
pub const EGPC_PRI_SHARED_BASE: u32 = 0x0048_0000;

const SM_REGS: SmRegs = SmRegs {
    dbgr_control0: 0x0050_4730,
    dbgr_status0: 0x0050_473c,
    hww_global_esr: 0x0050_4750,
    hww_warp_esr: 0x0050_4748,
    hww_warp_esr_pc: 0x0050_474c,
    warp_valid_mask_0: 0x0050_4708,
    warp_valid_mask_1: 0x0050_470c,
    bpt_pause_mask_0: 0x0050_4710,
    bpt_pause_mask_1: 0x0050_4714,
    bpt_trap_mask_0: 0x0050_4718,
    bpt_trap_mask_1: 0x0050_471c,
    tpc_exception_en: 0x0050_450c,
    gpcs_tpcs_dbgr_control0: 0x0041_9e84,
    gpcs_tpcs_bpt_pause_mask: 0x0041_9e90,
    gpcs_tpcs_tpc_exception_en: 0x0041_9d0c,
    sm_stride: 0x80,
};

const SM_DSM_PERF_REGS: [u32; 5] = [0x0050_4a04, 0x0050_4a08, 0x0050_4a0c, 0x0050_4a10, 0x0050_4a14];

const SM_DSM_PERF_CTRL_REGS: [u32; 4] = [0x0050_4a20, 0x0050_4a24, 0x0050_4a28, 0x0050_4a2c];

const BUNDLE_CB_SIZE_DIV_256B: u32 = 0x30;
const PAGEPOOL_TOTAL_PAGES: u32 = 0x200;
const ATTRIB_CB_DEFAULT_SIZE: u32 = 0x800;
const ALPHA_CB_DEFAULT_SIZE: u32 = 0x800;
const CB_SIZE_GRANULARITY: u32 = 32;

/// Volta GV100
#[derive(Debug, Clone, Copy, Default)]
pub struct Gv100;

/// Shared GV100 description
pub static GV100: Gv100 = Gv100;

impl Gv100 {
    fn is_egpc_addr_shared(addr: u32) -> bool {
        addr >= EGPC_PRI_SHARED_BASE && addr < EGPC_PRI_SHARED_BASE + LITTER.gpc_stride
    }

    fn egpc_addr(gpc_addr: u32, gpc: u32) -> u32 {
        EGPC_PRI_BASE + gpc * LITTER.gpc_stride + gpc_addr
    }

    fn etpc_addr(tpc_addr: u32, gpc: u32, tpc: u32) -> u32 {
        Self::egpc_addr(LITTER.tpc_in_gpc_base + tpc * LITTER.tpc_in_gpc_stride + tpc_addr, gpc)
    }
}

impl ChipOps for Gv100 {
    fn name(&self) -> &'static str {
        "gv100"
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

    fn supports_preemption(&self) -> bool {
        true
    }

    fn egpc_base(&self) -> Option<u32> {
        Some(EGPC_PRI_BASE)
    }

    fn is_egpc_addr(&self, addr: u32) -> bool {
        (addr >= EGPC_PRI_BASE && addr < EGPC_PRI_BASE + LITTER.num_gpcs * LITTER.gpc_stride)
            || Self::is_egpc_addr_shared(addr)
    }

    fn is_etpc_addr(&self, addr: u32) -> bool {
        self.is_egpc_addr(addr) && LITTER.is_tpc_addr(LITTER.gpccs_addr_mask(addr))
    }

    fn egpc_etpc_num(&self, addr: u32) -> (u32, u32) {
        let gpc = (0..LITTER.num_gpcs)
            .find(|&i| {
                let start = EGPC_PRI_BASE + i * LITTER.gpc_stride;
                addr >= start && addr < start + LITTER.gpc_stride
            })
            .unwrap_or(0);
        (gpc, LITTER.tpc_num(LITTER.gpccs_addr_mask(addr)))
    }

    fn decode_egpc_addr(&self, addr: u32) -> Result<PrivAddr> {
        if !self.is_egpc_addr(addr) {
            return Err(Error::InvalidParameter);
        }

        let gpc_addr = LITTER.gpccs_addr_mask(addr);
        let mut decoded = PrivAddr::new(AddrType::Egpc);
        if Self::is_egpc_addr_shared(addr) {
            decoded.broadcast |= BroadcastFlags::EGPC;
        } else {
            decoded.gpc_num = self.egpc_etpc_num(addr).0;
        }

        if LITTER.is_tpc_addr(gpc_addr) {
            decoded.addr_type = AddrType::Etpc;
            if LITTER.is_tpc_addr_shared(gpc_addr) {
                decoded.broadcast |= BroadcastFlags::ETPC;
                return Ok(decoded);
            }
            decoded.tpc_num = LITTER.tpc_num(gpc_addr);
        }

        log::trace!(
            "gv100: egpc addr 0x{:08x} gpc {} tpc {} flags {:?}",
            addr,
            decoded.gpc_num,
            decoded.tpc_num,
            decoded.broadcast
        );
        Ok(decoded)
    }

    fn egpc_etpc_priv_addr_table(
        &self,
        addr: u32,
        decoded: &PrivAddr,
        config: &GrConfig,
        table: &mut PrivAddrTable,
    ) -> Result<()> {
        let gpc_addr = LITTER.gpccs_addr_mask(addr);
        let tpc_addr = LITTER.tpccs_addr_mask(addr);

        if decoded.broadcast.contains(BroadcastFlags::EGPC) {
            for gpc in 0..config.gpc_count() {
                if decoded.broadcast.contains(BroadcastFlags::ETPC) {
                    for tpc in 0..config.gpc_tpc_count(gpc) {
                        table.push(Self::etpc_addr(tpc_addr, gpc, tpc))?;
                    }
                } else if decoded.addr_type == AddrType::Etpc {
                    if decoded.tpc_num < config.gpc_tpc_count(gpc) {
                        table.push(Self::etpc_addr(tpc_addr, gpc, decoded.tpc_num))?;
                    }
                } else {
                    table.push(Self::egpc_addr(gpc_addr, gpc))?;
                }
            }
        } else if decoded.broadcast.contains(BroadcastFlags::ETPC) {
            for tpc in 0..config.gpc_tpc_count(decoded.gpc_num) {
                table.push(Self::etpc_addr(tpc_addr, decoded.gpc_num, tpc))?;
            }
        } else {
            table.push(addr)?;
        }
        Ok(())
    }

    fn split_fbpa_broadcast_addr(&self, addr: u32, config: &GrConfig, table: &mut PrivAddrTable) -> Result<()> {
        for fbpa in 0..LITTER.num_fbpas {
            if config.fbpa_active_mask & (1 << fbpa) != 0 {
                table.push(LITTER.fbpa_addr(addr, fbpa))?;
            }
        }
        Ok(())
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

static_assertions::const_assert!(LITTER.ppc_in_gpc_base + LITTER.num_pes_per_gpc * LITTER.ppc_in_gpc_stride <= LITTER.tpc_in_gpc_base);
static_assertions::const_assert!(LITTER.num_fbpas <= 32);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pri::PrivAddrDecoder;
    use std::vec;

    fn config() -> GrConfig {
        GrConfig::new(&LITTER, &[2, 1], &[1, 1]).unwrap()
    }

    #[test]
    fn test_egpc_unicast_decode() {
        let addr = EGPC_PRI_BASE + LITTER.gpc_stride + 0x0100;
        let decoded = GV100.decode_egpc_addr(addr).unwrap();
        assert_eq!(decoded.addr_type, AddrType::Egpc);
        assert_eq!(decoded.gpc_num, 1);
        assert!(decoded.broadcast.is_empty());
    }

    #[test]
    fn test_etpc_broadcast_expands_per_gpc() {
        let config = config();
        let addr = EGPC_PRI_SHARED_BASE + LITTER.tpc_in_gpc_shared_base + 0x20;
        let decoder = PrivAddrDecoder::new(&GV100, &config);
        let decoded = decoder.decode(addr).unwrap();
        assert_eq!(decoded.addr_type, AddrType::Etpc);
        assert!(decoded.broadcast.contains(BroadcastFlags::EGPC | BroadcastFlags::ETPC));

        let table = decoder.build_table(addr).unwrap();
        assert_eq!(
            table.as_slice(),
            &[
                Gv100::etpc_addr(0x20, 0, 0),
                Gv100::etpc_addr(0x20, 0, 1),
                Gv100::etpc_addr(0x20, 1, 0),
            ]
        );
        for &unicast in table.as_slice() {
            let again = decoder.decode(unicast).unwrap();
            assert!(again.broadcast.is_empty());
            assert_eq!(again.addr_type, AddrType::Etpc);
        }
    }

    #[test]
    fn test_fbpa_split_honors_active_mask() {
        let config = config().with_fbpa_active_mask(0b1010);
        let decoder = PrivAddrDecoder::new(&GV100, &config);
        let table = decoder.build_table(LITTER.fbpa_shared_base + 0x44).unwrap();
        assert_eq!(
            table.as_slice(),
            &vec![LITTER.fbpa_addr(0x44, 1), LITTER.fbpa_addr(0x44, 3)][..]
        );
    }
}
