//! Register offset lookup inside a saved context image.
//!
//! SM perf counter control registers live in the extended buffer, every
//! other saved register lives in the segment of the unit that owns it.
//! Inside TPC and PPC segments the data of all instances is interleaved
//! word by word:
//!
//! ```text
//!   word   0    1    2    3    4    5  ...
//!   reg-tpc 0-0 0-1  1-0  1-1  2-0  2-1 ...   (num_tpcs = 2)
//! ```

use magma_core::{Error, Result};

use super::{CtxImage, LocalHeader};
use crate::config::GrConfig;
use crate::hw::ChipOps;
use crate::netlist::{AivEntry, Netlist};
use crate::pri::{AddrType, PrivAddr, PrivAddrDecoder};

/// Locates the saved copy of a register inside a context image
#[derive(Debug, Clone, Copy)]
pub struct OffsetResolver<'a> {
    chip: &'a dyn ChipOps,
    config: &'a GrConfig,
    netlist: &'a Netlist,
}

impl<'a> OffsetResolver<'a> {
    /// Create a resolver
    pub fn new(chip: &'a dyn ChipOps, config: &'a GrConfig, netlist: &'a Netlist) -> Self {
        Self { chip, config, netlist }
    }

    /// Byte offset of unicast register `addr` inside `image`
    ///
    /// `NotFound` means the register is not saved in this image and should
    /// be skipped. `ProtocolMisuse` means the lookup tables disagree with the
    /// address map and is never recoverable.
    pub fn find_priv_offset_in_buffer(&self, addr: u32, is_quad: bool, quad: u32, image: &[u8]) -> Result<u32> {
        log::trace!("ctx image: find offset addr=0x{:08x}", addr);

        let decoded = PrivAddrDecoder::new(self.chip, self.config).decode(addr)?;
        let ctx = CtxImage::new(image, self.chip.ctxsw_prog());
        let main = ctx.main_header()?;
        let sys_priv_segment = ctx.fecs_header()?.priv_segment;

        match self.find_priv_offset_in_ext_buffer(addr, &ctx) {
            Ok(offset) => return Ok(offset),
            Err(Error::ProtocolMisuse) => return Err(Error::ProtocolMisuse),
            Err(err) if is_quad => {
                log::debug!("ctx image: quad {} addr 0x{:08x} not in extended buffer", quad, addr);
                return Err(err);
            }
            Err(_) => {}
        }

        let segment_size = ctx.layout().segment_size;
        if matches!(decoded.addr_type, AddrType::Sys | AddrType::Be) {
            let offset = find_in_list(&self.netlist.ctxsw_regs.sys, |reg| reg.addr == addr)
                .map(|reg| reg.index)
                .ok_or(Error::NotFound)?;
            return Ok(sys_priv_segment * segment_size + offset);
        }

        if decoded.gpc_num >= main.num_gpcs {
            log::error!("ctx image: GPC {} not in this context buffer", decoded.gpc_num);
            return Err(Error::NotFound);
        }

        // GPC headers are consecutive, so every header up to ours is validated
        for gpc in 0..=decoded.gpc_num {
            let header = ctx.gpccs_header(gpc, self.chip.litter())?;
            self.check_ppc_configuration()?;
            if gpc != decoded.gpc_num {
                continue;
            }

            if decoded.tpc_num >= header.num_tpcs {
                log::error!(
                    "ctx image: GPC {} TPC {} not in this context buffer",
                    decoded.gpc_num,
                    decoded.tpc_num
                );
                return Err(Error::NotFound);
            }

            let offset_in_segment = self.offset_in_gpccs_segment(decoded.addr_type, &header)?;
            let offset = self.process_gpc_segment(addr, &decoded, &header)?;
            let priv_offset = header
                .priv_segment
                .checked_mul(segment_size)
                .and_then(|base| base.checked_add(offset_in_segment))
                .and_then(|base| base.checked_add(offset))
                .ok_or(Error::NotFound)?;
            log::trace!(
                "ctx image: addr 0x{:08x} gpc segment 0x{:x} offset 0x{:x}",
                addr,
                header.priv_segment,
                priv_offset
            );
            return Ok(priv_offset);
        }
        Err(Error::NotFound)
    }

    /// PES registers sit in the GPC list when there is one PES per GPC, so
    /// an empty PPC list is only a problem with several.
    fn check_ppc_configuration(&self) -> Result<()> {
        if self.netlist.ctxsw_regs.ppc.is_empty() && self.chip.litter().num_pes_per_gpc > 1 {
            log::error!("ctx image: no PPC register list for {} PES per GPC", self.chip.litter().num_pes_per_gpc);
            return Err(Error::NotFound);
        }
        Ok(())
    }

    /// Byte offset of the addressed unit's data inside its GPC segment
    fn offset_in_gpccs_segment(&self, addr_type: AddrType, header: &LocalHeader) -> Result<u32> {
        let regs = &self.netlist.ctxsw_regs;
        let tpc_words = regs.tpc.len() as u32;
        let all_tpc_words = tpc_words.saturating_add(regs.etpc.len() as u32);

        match addr_type {
            AddrType::Tpc => Ok(0),
            AddrType::Egpc | AddrType::Etpc => unit_bytes(tpc_words, header.num_tpcs),
            AddrType::Ppc => unit_bytes(all_tpc_words, header.num_tpcs),
            AddrType::Gpc => {
                let tpc_data = unit_bytes(all_tpc_words, header.num_tpcs)?;
                if self.chip.litter().num_pes_per_gpc > 1 {
                    let ppc_data = unit_bytes(regs.ppc.len() as u32, header.num_ppcs)?;
                    tpc_data.checked_add(ppc_data).ok_or(Error::NotFound)
                } else {
                    Ok(tpc_data)
                }
            }
            _ => {
                log::debug!("ctx image: {:?} has no GPC segment", addr_type);
                Err(Error::NotFound)
            }
        }
    }

    /// Offset of `addr` inside the data of its unit
    fn process_gpc_segment(&self, addr: u32, decoded: &PrivAddr, header: &LocalHeader) -> Result<u32> {
        let l = self.chip.litter();
        let regs = &self.netlist.ctxsw_regs;
        let gpc = decoded.gpc_num;

        let tpc_base = |base: u32| move |tpc: u32| base + gpc * l.gpc_stride + l.tpc_in_gpc_base + tpc * l.tpc_in_gpc_stride;
        let tpccs = |a: u32| l.tpccs_addr_mask(a);

        let found = match decoded.addr_type {
            AddrType::Tpc => find_interleaved(&regs.tpc, header.num_tpcs, addr, tpc_base(l.gpc_base), tpccs),
            AddrType::Egpc | AddrType::Etpc => {
                let egpc_base = self.chip.egpc_base().ok_or(Error::NotFound)?;
                find_interleaved(&regs.etpc, header.num_tpcs, addr, tpc_base(egpc_base), tpccs)
            }
            AddrType::Ppc => find_interleaved(
                &regs.ppc,
                header.num_ppcs,
                addr,
                |ppc| l.gpc_base + gpc * l.gpc_stride + l.ppc_in_gpc_base + ppc * l.ppc_in_gpc_stride,
                |a| l.ppccs_addr_mask(a),
            ),
            AddrType::Gpc => find_in_list(&regs.gpc, |reg| l.gpc_addr(l.gpccs_addr_mask(reg.addr), gpc) == addr)
                .map(|reg| reg.index),
            _ => None,
        };
        found.ok_or(Error::NotFound)
    }

    /// Look `addr` up in the SM perf counter area of the extended buffer
    fn find_priv_offset_in_ext_buffer(&self, addr: u32, ctx: &CtxImage<'_>) -> Result<u32> {
        let l = self.chip.litter();
        let layout = ctx.layout();

        let (gpc_num, tpc_num, gpc_base) = if l.is_gpc_addr(addr) {
            let gpc_addr = l.gpccs_addr_mask(addr);
            if !self.chip.is_tpc_addr(gpc_addr) {
                return Err(Error::NotFound);
            }
            (l.gpc_num(addr), self.chip.get_tpc_num(gpc_addr), l.gpc_base)
        } else if self.chip.is_etpc_addr(addr) {
            let (gpc, tpc) = self.chip.egpc_etpc_num(addr);
            (gpc, tpc, self.chip.egpc_base().ok_or(Error::NotFound)?)
        } else {
            log::trace!("ctx image: 0x{:08x} not in extended buffer", addr);
            return Err(Error::NotFound);
        };

        let main = ctx.main_header()?;
        if gpc_num >= main.num_gpcs {
            log::error!("ctx image: GPC {} beyond image count {}", gpc_num, main.num_gpcs);
            return Err(Error::NotFound);
        }
        if main.ext_size == 0 {
            log::debug!("ctx image: no extended buffer");
            return Err(Error::NotFound);
        }
        ctx.fecs_header()?;

        let tpc_gpc_mask = l.tpc_in_gpc_stride - 1;
        let expected = |reg: u32| {
            gpc_base + gpc_num * l.gpc_stride + l.tpc_in_gpc_base + tpc_num * l.tpc_in_gpc_stride + (reg & tpc_gpc_mask)
        };
        let lookup = |table: &[u32]| -> Result<Option<u32>> {
            let Some(id) = table.iter().position(|&reg| reg & tpc_gpc_mask == addr & tpc_gpc_mask) else {
                return Ok(None);
            };
            let chk_addr = expected(table[id]);
            if chk_addr != addr {
                log::error!("ctx image: address mismatch 0x{:08x} != 0x{:08x}", addr, chk_addr);
                return Err(Error::ProtocolMisuse);
            }
            Ok(Some(id as u32))
        };

        if lookup(self.chip.sm_dsm_perf_regs())?.is_some() {
            // counters themselves are not addressable, only their controls
            return Err(Error::NotFound);
        }
        let ctrl_id = lookup(self.chip.sm_dsm_perf_ctrl_regs())?.ok_or(Error::NotFound)?;

        let segment_bytes = layout.extended_segment_size;
        let mut offset = main.ext_offset * layout.segment_size;
        let end = offset + main.ext_size * segment_bytes;

        // skip the FECS extended header, then the segments of earlier GPCs
        let segments_per_gpc = (self.config.max_tpc_per_gpc_count + 1) / 2;
        offset += segment_bytes;
        offset += segments_per_gpc * segment_bytes * gpc_num;

        let marker_words = layout.extended_marker_size >> 2;
        let word = marker_words + tpc_num * layout.extended_perf_ctrl_stride + ctrl_id;
        offset += word * 4;

        if offset > end {
            log::error!("ctx image: extended offset 0x{:x} beyond 0x{:x}", offset, end);
            return Err(Error::BufferOverflow);
        }
        Ok(offset)
    }
}

/// Offset of `addr` in a list whose units are interleaved word by word
fn find_interleaved(
    list: &[AivEntry],
    count: u32,
    addr: u32,
    unit_base: impl Fn(u32) -> u32,
    unit_mask: impl Fn(u32) -> u32,
) -> Option<u32> {
    (0..count).find_map(|unit| {
        list.iter()
            .find(|reg| unit_base(unit) + unit_mask(reg.addr) == addr)
            .and_then(|reg| reg.index.checked_mul(count)?.checked_add(unit * 4))
    })
}

/// Bytes taken by `words` registers saved for each of `count` units
fn unit_bytes(words: u32, count: u32) -> Result<u32> {
    words
        .checked_mul(count)
        .and_then(|w| w.checked_mul(4))
        .ok_or(Error::NotFound)
}

fn find_in_list(list: &[AivEntry], pred: impl Fn(&AivEntry) -> bool) -> Option<&AivEntry> {
    list.iter().find(|reg| pred(reg))
}
