//! # Priv Address Space
//!
//! PGRAPH registers exist once per hardware unit. Each unit instance owns a
//! unicast window and every unit level also has a broadcast ("shared")
//! window whose writes reach all instances at once:
//!
//! ```text
//!   GPC window (gpc_base + gpc * gpc_stride, or gpc_shared_base)
//!   ├── GPC-local registers           0x0000 ..
//!   ├── TPC broadcast                 tpc_in_gpc_shared_base
//!   ├── PPC unicast / broadcast       ppc_in_gpc_base / ppc_in_gpc_shared_base
//!   └── TPC unicast                   tpc_in_gpc_base + tpc * tpc_in_gpc_stride
//! ```
//!
//! [`PrivAddrDecoder::decode`] classifies an address, and
//! [`PrivAddrDecoder::build_table`] turns it into the unicast addresses the
//! saved context image is indexed by.

mod decode;
mod table;

pub use decode::PrivAddrDecoder;
pub use table::PrivAddrTable;

use bitflags::bitflags;

use crate::hw::Litter;

// =============================================================================
// ADDRESS WIDTHS
// =============================================================================

/// Bits of a GPC-relative address
pub const GPCCS_ADDR_WIDTH: u32 = 15;
/// Bits of a TPC-relative address
pub const TPCCS_ADDR_WIDTH: u32 = 11;
/// Bits of a PPC-relative address
pub const PPCCS_ADDR_WIDTH: u32 = 9;
/// Bits of a BE-relative address
pub const BECS_ADDR_WIDTH: u32 = 10;

// =============================================================================
// CLASSIFICATION
// =============================================================================

/// Hardware unit an address belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddrType {
    /// System (FE, FECS, ...) register
    #[default]
    Sys,
    /// GPC register
    Gpc,
    /// TPC register
    Tpc,
    /// PPC register
    Ppc,
    /// Back end (ROP) register
    Be,
    /// L2 cache register
    Ltcs,
    /// Frame buffer partition register
    Fbpa,
    /// Extended GPC register
    Egpc,
    /// Extended TPC register
    Etpc,
}

bitflags! {
    /// Levels at which an address is a broadcast
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BroadcastFlags: u32 {
        /// Every GPC
        const GPC = 1 << 0;
        /// Every TPC of the GPC(s)
        const TPC = 1 << 1;
        /// Every BE
        const BE = 1 << 2;
        /// Every PPC of the GPC(s)
        const PPC = 1 << 3;
        /// Every LTS of every LTC
        const LTCS = 1 << 4;
        /// Every LTS of one LTC
        const LTSS = 1 << 5;
        /// Every FBPA
        const FBPA = 1 << 6;
        /// Every extended GPC
        const EGPC = 1 << 7;
        /// Every extended TPC
        const ETPC = 1 << 8;
    }
}

/// Result of decoding a priv address
///
/// Instance numbers are only meaningful for levels that are not broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PrivAddr {
    /// Owning unit
    pub addr_type: AddrType,
    /// GPC instance
    pub gpc_num: u32,
    /// TPC instance within the GPC
    pub tpc_num: u32,
    /// PPC instance within the GPC
    pub ppc_num: u32,
    /// BE instance
    pub be_num: u32,
    /// Broadcast levels
    pub broadcast: BroadcastFlags,
}

impl PrivAddr {
    /// Unicast decode of the given type, all instances zero
    pub const fn new(addr_type: AddrType) -> Self {
        Self {
            addr_type,
            gpc_num: 0,
            tpc_num: 0,
            ppc_num: 0,
            be_num: 0,
            broadcast: BroadcastFlags::empty(),
        }
    }

    /// Whether any level is a broadcast
    #[inline]
    pub fn is_broadcast(&self) -> bool {
        !self.broadcast.is_empty()
    }

    /// Structured view of the decode
    pub fn class(&self) -> PrivAddrClass {
        let b = self.broadcast;
        match self.addr_type {
            AddrType::Sys => PrivAddrClass::Sys,
            AddrType::Gpc => PrivAddrClass::Gpc {
                num: self.gpc_num,
                broadcast: b.contains(BroadcastFlags::GPC),
            },
            AddrType::Tpc => PrivAddrClass::Tpc {
                gpc: self.gpc_num,
                num: self.tpc_num,
                broadcast: b.contains(BroadcastFlags::TPC),
            },
            AddrType::Ppc => PrivAddrClass::Ppc {
                gpc: self.gpc_num,
                num: self.ppc_num,
                broadcast: b.contains(BroadcastFlags::PPC),
            },
            AddrType::Be => PrivAddrClass::Be {
                num: self.be_num,
                broadcast: b.contains(BroadcastFlags::BE),
            },
            AddrType::Ltcs => PrivAddrClass::Ltc {
                flavor: if b.contains(BroadcastFlags::LTCS) {
                    LtcBroadcast::AllLtcs
                } else if b.contains(BroadcastFlags::LTSS) {
                    LtcBroadcast::AllSlices
                } else {
                    LtcBroadcast::None
                },
            },
            AddrType::Fbpa => PrivAddrClass::Fbpa {
                broadcast: b.contains(BroadcastFlags::FBPA),
            },
            AddrType::Egpc | AddrType::Etpc => PrivAddrClass::Egpc {
                gpc: self.gpc_num,
                tpc: (self.addr_type == AddrType::Etpc).then_some(self.tpc_num),
                broadcast: b.intersects(BroadcastFlags::EGPC | BroadcastFlags::ETPC),
            },
        }
    }
}

/// L2 broadcast flavor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LtcBroadcast {
    /// Unicast LTS register
    None,
    /// Every slice of one LTC
    AllSlices,
    /// Every slice of every LTC
    AllLtcs,
}

/// Decoded address with its instance data
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivAddrClass {
    /// System register
    Sys,
    /// GPC register
    Gpc { num: u32, broadcast: bool },
    /// TPC register
    Tpc { gpc: u32, num: u32, broadcast: bool },
    /// PPC register
    Ppc { gpc: u32, num: u32, broadcast: bool },
    /// BE register
    Be { num: u32, broadcast: bool },
    /// L2 register
    Ltc { flavor: LtcBroadcast },
    /// FBPA register
    Fbpa { broadcast: bool },
    /// Extended GPC or TPC register
    Egpc { gpc: u32, tpc: Option<u32>, broadcast: bool },
}

// =============================================================================
// ADDRESS ARITHMETIC
// =============================================================================

#[inline]
const fn width_mask(width: u32) -> u32 {
    (1 << width) - 1
}

impl Litter {
    /// GPC-relative part of an address
    #[inline]
    pub const fn gpccs_addr_mask(&self, addr: u32) -> u32 {
        addr & width_mask(GPCCS_ADDR_WIDTH)
    }

    /// TPC-relative part of an address
    #[inline]
    pub const fn tpccs_addr_mask(&self, addr: u32) -> u32 {
        addr & width_mask(TPCCS_ADDR_WIDTH)
    }

    /// PPC-relative part of an address
    #[inline]
    pub const fn ppccs_addr_mask(&self, addr: u32) -> u32 {
        addr & width_mask(PPCCS_ADDR_WIDTH)
    }

    /// BE-relative part of an address
    #[inline]
    pub const fn becs_addr_mask(&self, addr: u32) -> u32 {
        addr & width_mask(BECS_ADDR_WIDTH)
    }

    /// FBPA-relative part of an address
    #[inline]
    pub const fn fbpa_addr_mask(&self, addr: u32) -> u32 {
        addr & (self.fbpa_stride - 1)
    }

    // -------------------------------------------------------------------------
    // GPC
    // -------------------------------------------------------------------------

    /// Unicast GPC address
    #[inline]
    pub const fn gpc_addr(&self, gpc_addr: u32, gpc: u32) -> u32 {
        self.gpc_base + gpc * self.gpc_stride + gpc_addr
    }

    /// Whether `addr` is in the GPC broadcast window
    pub const fn is_gpc_addr_shared(&self, addr: u32) -> bool {
        addr >= self.gpc_shared_base && addr < self.gpc_shared_base + self.gpc_stride
    }

    /// Whether `addr` is in any GPC window
    pub const fn is_gpc_addr(&self, addr: u32) -> bool {
        (addr >= self.gpc_base && addr < self.gpc_base + self.num_gpcs * self.gpc_stride)
            || self.is_gpc_addr_shared(addr)
    }

    /// GPC index of a unicast address, 0 if not found
    pub fn gpc_num(&self, addr: u32) -> u32 {
        (0..self.num_gpcs)
            .find(|&i| {
                let start = self.gpc_addr(0, i);
                addr >= start && addr < start + self.gpc_stride
            })
            .unwrap_or(0)
    }

    // -------------------------------------------------------------------------
    // TPC
    // -------------------------------------------------------------------------

    /// Unicast TPC address
    #[inline]
    pub const fn tpc_addr(&self, addr: u32, gpc: u32, tpc: u32) -> u32 {
        self.gpc_addr(self.tpc_in_gpc_base + tpc * self.tpc_in_gpc_stride + addr, gpc)
    }

    /// Whether a GPC-relative address is in the TPC broadcast window
    pub const fn is_tpc_addr_shared(&self, gpc_addr: u32) -> bool {
        gpc_addr >= self.tpc_in_gpc_shared_base
            && gpc_addr < self.tpc_in_gpc_shared_base + self.tpc_in_gpc_stride
    }

    /// Whether a GPC-relative address is in any TPC window
    pub const fn is_tpc_addr(&self, gpc_addr: u32) -> bool {
        (gpc_addr >= self.tpc_in_gpc_base
            && gpc_addr < self.tpc_in_gpc_base + self.num_tpc_per_gpc * self.tpc_in_gpc_stride)
            || self.is_tpc_addr_shared(gpc_addr)
    }

    /// TPC index of a GPC-relative address, 0 if not found
    pub fn tpc_num(&self, gpc_addr: u32) -> u32 {
        (0..self.num_tpc_per_gpc)
            .find(|&i| {
                let start = self.tpc_in_gpc_base + i * self.tpc_in_gpc_stride;
                gpc_addr >= start && gpc_addr < start + self.tpc_in_gpc_stride
            })
            .unwrap_or(0)
    }

    // -------------------------------------------------------------------------
    // PPC
    // -------------------------------------------------------------------------

    /// Unicast PPC address
    #[inline]
    pub const fn ppc_addr(&self, addr: u32, gpc: u32, ppc: u32) -> u32 {
        self.gpc_addr(self.ppc_in_gpc_base + ppc * self.ppc_in_gpc_stride + addr, gpc)
    }

    /// Whether a GPC-relative address is in the PPC broadcast window
    pub const fn is_ppc_addr_shared(&self, gpc_addr: u32) -> bool {
        gpc_addr >= self.ppc_in_gpc_shared_base
            && gpc_addr < self.ppc_in_gpc_shared_base + self.ppc_in_gpc_stride
    }

    /// Whether a GPC-relative address is in any PPC window
    pub const fn is_ppc_addr(&self, gpc_addr: u32) -> bool {
        (gpc_addr >= self.ppc_in_gpc_base
            && gpc_addr < self.ppc_in_gpc_base + self.num_pes_per_gpc * self.ppc_in_gpc_stride)
            || self.is_ppc_addr_shared(gpc_addr)
    }

    /// PPC index of a GPC-relative address, 0 if not found
    pub fn ppc_num(&self, gpc_addr: u32) -> u32 {
        (0..self.num_pes_per_gpc)
            .find(|&i| {
                let start = self.ppc_in_gpc_base + i * self.ppc_in_gpc_stride;
                gpc_addr >= start && gpc_addr < start + self.ppc_in_gpc_stride
            })
            .unwrap_or(0)
    }

    // -------------------------------------------------------------------------
    // BE (ROP)
    // -------------------------------------------------------------------------

    /// Whether `addr` is in the ROP broadcast window
    pub const fn is_be_addr_shared(&self, addr: u32) -> bool {
        addr >= self.rop_shared_base && addr < self.rop_shared_base + self.rop_stride
    }

    /// Whether `addr` is in any ROP window for `ltc_count` populated LTCs
    pub const fn is_be_addr(&self, addr: u32, ltc_count: u32) -> bool {
        (addr >= self.rop_base && addr < self.rop_base + ltc_count * self.rop_stride)
            || self.is_be_addr_shared(addr)
    }

    /// ROP index of a unicast address among `ltc_count` ROPs, 0 if not found
    pub fn be_num(&self, addr: u32, ltc_count: u32) -> u32 {
        (0..ltc_count)
            .find(|&i| {
                let start = self.rop_base + i * self.rop_stride;
                addr >= start && addr < start + self.rop_stride
            })
            .unwrap_or(0)
    }

    /// Broadcast equivalent of a unicast ROP address
    #[inline]
    pub const fn be_shared_addr(&self, addr: u32) -> u32 {
        self.rop_shared_base + self.becs_addr_mask(addr)
    }

    // -------------------------------------------------------------------------
    // FBPA
    // -------------------------------------------------------------------------

    /// Whether `addr` is in the FBPA broadcast window
    pub const fn is_fbpa_addr_shared(&self, addr: u32) -> bool {
        addr >= self.fbpa_shared_base && addr < self.fbpa_shared_base + self.fbpa_stride
    }

    /// Whether `addr` is in any FBPA window
    pub const fn is_fbpa_addr(&self, addr: u32) -> bool {
        (addr >= self.fbpa_base && addr < self.fbpa_base + self.num_fbpas * self.fbpa_stride)
            || self.is_fbpa_addr_shared(addr)
    }

    /// Unicast FBPA address
    #[inline]
    pub const fn fbpa_addr(&self, addr: u32, fbpa: u32) -> u32 {
        self.fbpa_base + self.fbpa_addr_mask(addr) + fbpa * self.fbpa_stride
    }

    // -------------------------------------------------------------------------
    // LTC
    // -------------------------------------------------------------------------

    /// Unicast LTS address
    #[inline]
    pub const fn lts_addr(&self, addr: u32, ltc: u32, lts: u32) -> u32 {
        self.ltc0_lts0_base + ltc * self.ltc_stride + lts * self.lts_stride + (addr & (self.lts_stride - 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::{ChipOps, GM20B, GV100};

    #[test]
    fn test_unit_numbers_round_trip() {
        let l = GV100.litter();
        for gpc in 0..l.num_gpcs {
            for tpc in 0..l.num_tpc_per_gpc {
                let addr = l.tpc_addr(0x24, gpc, tpc);
                assert!(l.is_gpc_addr(addr));
                assert_eq!(l.gpc_num(addr), gpc);
                let gpc_addr = l.gpccs_addr_mask(addr);
                assert!(l.is_tpc_addr(gpc_addr));
                assert!(!l.is_tpc_addr_shared(gpc_addr));
                assert_eq!(l.tpc_num(gpc_addr), tpc);
            }
            for ppc in 0..l.num_pes_per_gpc {
                let gpc_addr = l.gpccs_addr_mask(l.ppc_addr(0x10, gpc, ppc));
                assert!(l.is_ppc_addr(gpc_addr));
                assert_eq!(l.ppc_num(gpc_addr), ppc);
            }
        }
    }

    #[test]
    fn test_be_shared_conversion() {
        let l = GM20B.litter();
        let unicast = l.rop_base + l.rop_stride + 0x84;
        assert!(l.is_be_addr(unicast, 2));
        assert!(!l.is_be_addr(unicast, 1));
        assert_eq!(l.be_num(unicast, 2), 1);
        assert_eq!(l.be_num(unicast, 1), 0);
        assert_eq!(l.be_shared_addr(unicast), l.rop_shared_base + 0x84);
        assert!(l.is_be_addr_shared(l.be_shared_addr(unicast)));
    }

    #[test]
    fn test_lts_and_fbpa_addr() {
        let l = GM20B.litter();
        assert_eq!(l.lts_addr(0x0017_e244, 1, 1), 0x0014_0400 + 0x2000 + 0x200 + 0x44);
        assert_eq!(l.fbpa_addr(0x009a_0010, 0), 0x0090_0010);
    }

    #[test]
    fn test_class_view() {
        let mut decoded = PrivAddr::new(AddrType::Tpc);
        decoded.gpc_num = 1;
        decoded.tpc_num = 3;
        assert_eq!(
            decoded.class(),
            PrivAddrClass::Tpc { gpc: 1, num: 3, broadcast: false }
        );
        decoded.broadcast = BroadcastFlags::GPC | BroadcastFlags::TPC;
        assert!(decoded.is_broadcast());

        let mut ltc = PrivAddr::new(AddrType::Ltcs);
        ltc.broadcast = BroadcastFlags::LTSS;
        assert_eq!(ltc.class(), PrivAddrClass::Ltc { flavor: LtcBroadcast::AllSlices });
    }
}
