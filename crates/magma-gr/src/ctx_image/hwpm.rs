//! Register offsets inside the PM context image.
//!
//! Performance monitor state is saved to its own buffer with a flat layout,
//! one word per register. The map is sorted by address so lookups are a
//! binary search.

use alloc::vec::Vec;

use magma_core::{Error, Result};

use crate::netlist::AivEntry;

/// Address to PM image offset map
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HwpmMap {
    entries: Vec<(u32, u32)>,
}

impl HwpmMap {
    /// Build the map from the netlist PM register list
    ///
    /// The first entry wins when an address is listed twice.
    pub fn new(pm_regs: &[AivEntry]) -> Self {
        let mut entries: Vec<(u32, u32)> = pm_regs.iter().map(|reg| (reg.addr, reg.index)).collect();
        entries.sort_by_key(|&(addr, _)| addr);
        entries.dedup_by_key(|&mut (addr, _)| addr);
        Self { entries }
    }

    /// Registers in the map
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Byte offset of `addr` inside the PM image
    pub fn find_priv_offset(&self, addr: u32) -> Result<u32> {
        self.entries
            .binary_search_by_key(&addr, |&(a, _)| a)
            .map(|i| self.entries[i].1)
            .map_err(|_| {
                log::trace!("hwpm: 0x{:08x} not in pm image", addr);
                Error::NotFound
            })
    }
}
