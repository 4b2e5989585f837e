//! Priv address classification and broadcast expansion.

use magma_core::Result;

use super::{AddrType, BroadcastFlags, PrivAddr, PrivAddrTable};
use crate::config::GrConfig;
use crate::hw::ChipOps;

/// Decoder bound to one chip and its floorsweeping configuration
#[derive(Debug, Clone, Copy)]
pub struct PrivAddrDecoder<'a> {
    chip: &'a dyn ChipOps,
    config: &'a GrConfig,
}

impl<'a> PrivAddrDecoder<'a> {
    /// Create a decoder
    pub fn new(chip: &'a dyn ChipOps, config: &'a GrConfig) -> Self {
        Self { chip, config }
    }

    /// Classify `addr`
    ///
    /// First match wins: GPC, BE, LTC, FBPA, extended GPC, SYS. An address
    /// inside a GPC window that matches no sub-unit stays a GPC address.
    pub fn decode(&self, addr: u32) -> Result<PrivAddr> {
        let l = self.chip.litter();
        log::trace!("pri: decode addr=0x{:08x}", addr);

        if l.is_gpc_addr(addr) {
            let mut decoded = PrivAddr::new(AddrType::Gpc);
            let gpc_addr = l.gpccs_addr_mask(addr);
            if l.is_gpc_addr_shared(addr) {
                decoded.broadcast |= BroadcastFlags::GPC;
            } else {
                decoded.gpc_num = l.gpc_num(addr);
            }

            if l.is_ppc_addr(gpc_addr) {
                decoded.addr_type = AddrType::Ppc;
                if l.is_ppc_addr_shared(gpc_addr) {
                    decoded.broadcast |= BroadcastFlags::PPC;
                    return Ok(decoded);
                }
                decoded.ppc_num = l.ppc_num(gpc_addr);
            }
            if self.chip.is_tpc_addr(gpc_addr) {
                decoded.addr_type = AddrType::Tpc;
                if l.is_tpc_addr_shared(gpc_addr) {
                    decoded.broadcast |= BroadcastFlags::TPC;
                    return Ok(decoded);
                }
                decoded.tpc_num = self.chip.get_tpc_num(gpc_addr);
            }
            return Ok(decoded);
        }

        if l.is_be_addr(addr, self.config.ltc_count) {
            let mut decoded = PrivAddr::new(AddrType::Be);
            if l.is_be_addr_shared(addr) {
                decoded.broadcast |= BroadcastFlags::BE;
            } else {
                decoded.be_num = l.be_num(addr, self.config.ltc_count);
            }
            return Ok(decoded);
        }

        if self.chip.is_ltc_addr(addr) {
            let mut decoded = PrivAddr::new(AddrType::Ltcs);
            if self.chip.is_ltcs_ltss_addr(addr) {
                decoded.broadcast |= BroadcastFlags::LTCS;
            } else if self.chip.is_ltcn_ltss_addr(addr) {
                decoded.broadcast |= BroadcastFlags::LTSS;
            }
            return Ok(decoded);
        }

        if l.is_fbpa_addr(addr) {
            let mut decoded = PrivAddr::new(AddrType::Fbpa);
            if l.is_fbpa_addr_shared(addr) {
                decoded.broadcast |= BroadcastFlags::FBPA;
            }
            return Ok(decoded);
        }

        if self.chip.is_egpc_addr(addr) {
            return self.chip.decode_egpc_addr(addr);
        }

        Ok(PrivAddr::new(AddrType::Sys))
    }

    /// Expand `addr` into the unicast addresses the context image stores
    ///
    /// Unicast BE addresses become their broadcast form, because the image
    /// only keeps the broadcast copy of BE registers. Floorswept units are
    /// skipped silently.
    pub fn build_table(&self, addr: u32) -> Result<PrivAddrTable> {
        let mut table = PrivAddrTable::with_capacity(self.config.max_priv_addr_table_len(self.chip.litter()));
        self.build_table_into(addr, &mut table)?;
        Ok(table)
    }

    /// Like [`Self::build_table`] but fills a caller-owned table
    pub fn build_table_into(&self, addr: u32, table: &mut PrivAddrTable) -> Result<()> {
        let l = self.chip.litter();
        let decoded = self.decode(addr)?;
        log::trace!("pri: addr=0x{:08x} decoded {:?}", addr, decoded);

        if matches!(decoded.addr_type, AddrType::Sys | AddrType::Be) {
            let entry = if decoded.addr_type == AddrType::Be && !decoded.broadcast.contains(BroadcastFlags::BE) {
                l.be_shared_addr(addr)
            } else {
                addr
            };
            return table.push(entry);
        }

        let flags = decoded.broadcast;
        if flags.contains(BroadcastFlags::GPC) {
            for gpc in 0..self.config.gpc_count() {
                if flags.contains(BroadcastFlags::TPC) {
                    for tpc in 0..self.config.gpc_tpc_count(gpc) {
                        table.push(l.tpc_addr(l.tpccs_addr_mask(addr), gpc, tpc))?;
                    }
                } else if flags.contains(BroadcastFlags::PPC) {
                    self.split_ppc_broadcast_addr(addr, gpc, table)?;
                } else {
                    let priv_addr = l.gpc_addr(l.gpccs_addr_mask(addr), gpc);
                    let tpc = self.chip.get_tpc_num(l.gpccs_addr_mask(priv_addr));
                    if tpc >= self.config.gpc_tpc_count(gpc) {
                        continue;
                    }
                    table.push(priv_addr)?;
                }
            }
        } else if flags.intersects(BroadcastFlags::EGPC | BroadcastFlags::ETPC)
            || matches!(decoded.addr_type, AddrType::Egpc | AddrType::Etpc)
        {
            self.chip.egpc_etpc_priv_addr_table(addr, &decoded, self.config, table)?;
        } else if flags.contains(BroadcastFlags::LTSS) {
            self.chip.split_lts_broadcast_addr(addr, self.config, table)?;
        } else if flags.contains(BroadcastFlags::LTCS) {
            self.chip.split_ltc_broadcast_addr(addr, self.config, table)?;
        } else if flags.contains(BroadcastFlags::FBPA) {
            self.chip.split_fbpa_broadcast_addr(addr, self.config, table)?;
        } else if decoded.addr_type == AddrType::Tpc && flags.contains(BroadcastFlags::TPC) {
            for tpc in 0..self.config.gpc_tpc_count(decoded.gpc_num) {
                table.push(l.tpc_addr(l.tpccs_addr_mask(addr), decoded.gpc_num, tpc))?;
            }
        } else if decoded.addr_type == AddrType::Ppc && flags.contains(BroadcastFlags::PPC) {
            self.split_ppc_broadcast_addr(addr, decoded.gpc_num, table)?;
        } else {
            table.push(addr)?;
        }
        Ok(())
    }

    fn split_ppc_broadcast_addr(&self, addr: u32, gpc: u32, table: &mut PrivAddrTable) -> Result<()> {
        let l = self.chip.litter();
        for ppc in 0..self.config.gpc_ppc_count(gpc) {
            table.push(l.ppc_addr(l.ppccs_addr_mask(addr), gpc, ppc))?;
        }
        Ok(())
    }
}
