//! # Engine Configuration
//!
//! [`GrConfig`] is the floorswept topology read from fuses at init time:
//! how many GPCs are present, how many TPCs and PPCs each one kept, and how
//! many L2 slices back the frame buffer. [`GrParams`] holds the tunables
//! the host sets for the device.

use alloc::vec::Vec;

use magma_core::{Error, Result};
use magma_hal::poll::{DEFAULT_POLL_TIMEOUT_US, POLL_DELAY_MAX_US, POLL_DELAY_MIN_US};
use magma_hal::PollPolicy;

use crate::hw::Litter;

// =============================================================================
// TOPOLOGY
// =============================================================================

/// Location of one SM
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SmInfo {
    /// GPC index
    pub gpc: u32,
    /// TPC index within the GPC
    pub tpc: u32,
    /// SM index within the TPC
    pub sm: u32,
}

/// Floorswept graphics engine topology
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrConfig {
    /// GPCs the chip can have
    pub max_gpc_count: u32,
    /// TPCs a GPC can have
    pub max_tpc_per_gpc_count: u32,
    /// SMs per TPC
    pub sm_per_tpc: u32,
    /// Populated L2 caches
    pub ltc_count: u32,
    /// Slices per L2 cache
    pub lts_per_ltc: u32,
    /// Bit per FBPA that survived floorsweeping
    pub fbpa_active_mask: u32,
    gpc_tpc_count: Vec<u32>,
    gpc_ppc_count: Vec<u32>,
}

impl GrConfig {
    /// Build a topology from per-GPC TPC and PPC counts
    ///
    /// Fails if the counts exceed what the chip can physically have.
    pub fn new(litter: &Litter, gpc_tpc_count: &[u32], gpc_ppc_count: &[u32]) -> Result<Self> {
        if gpc_tpc_count.is_empty()
            || gpc_tpc_count.len() > litter.num_gpcs as usize
            || gpc_ppc_count.len() != gpc_tpc_count.len()
        {
            log::error!(
                "gr: bad gpc population: {} tpc counts, {} ppc counts, max {} gpcs",
                gpc_tpc_count.len(),
                gpc_ppc_count.len(),
                litter.num_gpcs
            );
            return Err(Error::InvalidParameter);
        }
        if gpc_tpc_count.iter().any(|&n| n > litter.num_tpc_per_gpc)
            || gpc_ppc_count.iter().any(|&n| n > litter.num_pes_per_gpc)
        {
            log::error!("gr: per-gpc unit count above chip maximum");
            return Err(Error::InvalidParameter);
        }

        Ok(Self {
            max_gpc_count: litter.num_gpcs,
            max_tpc_per_gpc_count: litter.num_tpc_per_gpc,
            sm_per_tpc: litter.num_sm_per_tpc,
            ltc_count: litter.num_fbps,
            lts_per_ltc: 2,
            fbpa_active_mask: low_bits(litter.num_fbpas),
            gpc_tpc_count: gpc_tpc_count.to_vec(),
            gpc_ppc_count: gpc_ppc_count.to_vec(),
        })
    }

    /// Override the L2 population
    pub fn with_ltc(mut self, ltc_count: u32, lts_per_ltc: u32) -> Self {
        self.ltc_count = ltc_count;
        self.lts_per_ltc = lts_per_ltc;
        self
    }

    /// Override the active FBPA mask
    pub fn with_fbpa_active_mask(mut self, mask: u32) -> Self {
        self.fbpa_active_mask = mask;
        self
    }

    /// Populated GPCs
    #[inline]
    pub fn gpc_count(&self) -> u32 {
        self.gpc_tpc_count.len() as u32
    }

    /// TPCs of `gpc`, 0 for an absent GPC
    #[inline]
    pub fn gpc_tpc_count(&self, gpc: u32) -> u32 {
        self.gpc_tpc_count.get(gpc as usize).copied().unwrap_or(0)
    }

    /// PPCs of `gpc`, 0 for an absent GPC
    #[inline]
    pub fn gpc_ppc_count(&self, gpc: u32) -> u32 {
        self.gpc_ppc_count.get(gpc as usize).copied().unwrap_or(0)
    }

    /// Populated TPCs across all GPCs
    pub fn tpc_count(&self) -> u32 {
        self.gpc_tpc_count.iter().sum()
    }

    /// Populated SMs across all GPCs
    pub fn sm_count(&self) -> u32 {
        self.tpc_count() * self.sm_per_tpc
    }

    /// Every populated SM, GPC-major
    ///
    /// The position in this list is the SM id used for error state records.
    pub fn sm_info(&self) -> Vec<SmInfo> {
        let mut sms = Vec::with_capacity(self.sm_count() as usize);
        for (gpc, &tpcs) in self.gpc_tpc_count.iter().enumerate() {
            for tpc in 0..tpcs {
                for sm in 0..self.sm_per_tpc {
                    sms.push(SmInfo { gpc: gpc as u32, tpc, sm });
                }
            }
        }
        sms
    }

    /// SM id of a location, if it is populated
    pub fn sm_id(&self, gpc: u32, tpc: u32, sm: u32) -> Option<u32> {
        if tpc >= self.gpc_tpc_count(gpc) || sm >= self.sm_per_tpc {
            return None;
        }
        let before: u32 = self.gpc_tpc_count[..gpc as usize].iter().sum();
        Some((before + tpc) * self.sm_per_tpc + sm)
    }

    /// Upper bound on saved copies of one register
    pub fn potential_offsets(&self) -> u32 {
        self.max_gpc_count * self.max_tpc_per_gpc_count * self.sm_per_tpc
    }

    /// Capacity needed by a priv address table for any input
    pub fn max_priv_addr_table_len(&self, litter: &Litter) -> usize {
        let ltc = self.ltc_count * self.lts_per_ltc;
        self.potential_offsets().max(ltc).max(litter.num_fbpas) as usize
    }
}

const fn low_bits(n: u32) -> u32 {
    if n >= 32 { u32::MAX } else { (1 << n) - 1 }
}

// =============================================================================
// TUNABLES
// =============================================================================

/// FECS busy-wait interval and initial sleep
pub const GR_FECS_POLL_INTERVAL_US: u32 = 5;

/// Host-supplied engine parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrParams {
    /// Deadline of every hardware wait
    pub poll_timeout_us: u64,
    /// MMU debug mode lets an SM lock down with a fault pending
    pub mmu_debug_mode: bool,
    /// Graphics preemption timeouts to program during bootstrap
    pub preempt_ctxsw_timeout: Option<u32>,
    /// FECS watchdog value, `None` leaves the ucode default
    pub ctxsw_watchdog_timeout: Option<u32>,
}

impl GrParams {
    /// Production defaults
    pub const DEFAULT: Self = Self {
        poll_timeout_us: DEFAULT_POLL_TIMEOUT_US,
        mmu_debug_mode: false,
        preempt_ctxsw_timeout: None,
        ctxsw_watchdog_timeout: None,
    };

    /// Poll policy for FECS mailbox waits
    pub const fn fecs_poll_policy(&self) -> PollPolicy {
        PollPolicy::new(GR_FECS_POLL_INTERVAL_US, POLL_DELAY_MAX_US, self.poll_timeout_us)
    }

    /// Poll policy for SM and engine idle waits
    pub const fn poll_policy(&self) -> PollPolicy {
        PollPolicy::new(POLL_DELAY_MIN_US, POLL_DELAY_MAX_US, self.poll_timeout_us)
    }
}

impl Default for GrParams {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::{ChipOps, GM20B, GV100};

    #[test]
    fn test_rejects_oversized_population() {
        assert_eq!(
            GrConfig::new(GM20B.litter(), &[2, 2], &[1, 1]).unwrap_err(),
            Error::InvalidParameter
        );
        assert_eq!(GrConfig::new(GM20B.litter(), &[3], &[1]).unwrap_err(), Error::InvalidParameter);
        assert_eq!(GrConfig::new(GM20B.litter(), &[], &[]).unwrap_err(), Error::InvalidParameter);
        assert_eq!(GrConfig::new(GM20B.litter(), &[2], &[]).unwrap_err(), Error::InvalidParameter);
    }

    #[test]
    fn test_sm_ids_are_gpc_major() {
        let config = GrConfig::new(GV100.litter(), &[2, 1], &[1, 1]).unwrap();
        assert_eq!(config.sm_count(), 6);
        let sms = config.sm_info();
        assert_eq!(sms[3], SmInfo { gpc: 0, tpc: 1, sm: 1 });
        assert_eq!(sms[4], SmInfo { gpc: 1, tpc: 0, sm: 0 });
        for (id, sm) in sms.iter().enumerate() {
            assert_eq!(config.sm_id(sm.gpc, sm.tpc, sm.sm), Some(id as u32));
        }
        assert_eq!(config.sm_id(1, 1, 0), None);
        assert_eq!(config.sm_id(2, 0, 0), None);
    }

    #[test]
    fn test_bounds() {
        let config = GrConfig::new(GV100.litter(), &[7], &[2]).unwrap();
        assert_eq!(config.potential_offsets(), 6 * 7 * 2);
        assert_eq!(config.fbpa_active_mask, 0xffff);
        assert_eq!(config.gpc_tpc_count(5), 0);

        let small = GrConfig::new(GM20B.litter(), &[2], &[1]).unwrap().with_ltc(2, 4);
        assert_eq!(small.max_priv_addr_table_len(GM20B.litter()), 8);
    }

    #[test]
    fn test_poll_policies() {
        let params = GrParams::default();
        assert_eq!(params.fecs_poll_policy().initial_delay_us, GR_FECS_POLL_INTERVAL_US);
        assert_eq!(params.poll_policy().initial_delay_us, POLL_DELAY_MIN_US);
        assert_eq!(params.poll_policy().timeout_us, DEFAULT_POLL_TIMEOUT_US);
    }
}
