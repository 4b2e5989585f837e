//! # SM Lock-Down and Exceptions
//!
//! A streaming multiprocessor is stopped for debugging by asserting the
//! stop trigger in its debugger control register and polling until the
//! hardware reports lock-down:
//!
//! ```text
//!   Running ──stop trigger──► StopTriggered ──► LockedDown
//!                                  │
//!                                  ├──► ErrorClearedEarly  (check_errors, nothing pending)
//!                                  ├──► MmuFaultAbort      (fault pending, no MMU debug mode)
//!                                  └──► TimedOut
//! ```
//!
//! Resuming clears the stop trigger and then pulses the run trigger, as
//! two separate writes.

use alloc::sync::Arc;
use alloc::vec::Vec;

use bitflags::bitflags;
use spin::Mutex;

use magma_core::{Error, Result};
use magma_hal::{Clock, PollPolicy, RegisterIo};

use crate::config::{GrConfig, GrParams, SmInfo};
use crate::hw::regs::sm;
use crate::hw::ChipOps;
use crate::services::{DebuggerHost, Diagnostics, GrServices};

// =============================================================================
// TYPES
// =============================================================================

bitflags! {
    /// SM global exception status
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct GlobalEsr: u32 {
        /// Breakpoint interrupt pending
        const BPT_INT = 1 << 0;
        /// Breakpoint pause pending
        const BPT_PAUSE = 1 << 1;
        /// More than one warp reported an error
        const MULTIPLE_WARP_ERRORS = 1 << 2;
        /// Single step finished
        const SINGLE_STEP_COMPLETE = 1 << 6;
    }
}

/// Raw exception state handed to chip hooks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmException {
    /// Faulting SM
    pub location: SmInfo,
    /// Global exception status
    pub global_esr: GlobalEsr,
    /// Warp exception status
    pub warp_esr: u32,
    /// Whether the SMs are in debugger mode
    pub sm_debugger_attached: bool,
}

/// Verdict of a chip pre-processing hook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SmPreProcess {
    /// Stop handling after the hook
    pub early_exit: bool,
    /// Handle the exception as if no debugger were attached
    pub ignore_debugger: bool,
}

/// Result of one exception-handling pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmExceptionState {
    /// Global exception status read at entry
    pub global_esr: GlobalEsr,
    /// Warp exception status read at entry
    pub warp_esr: u32,
    /// Global bits that did not require a lock-down
    pub no_lock_down_mask: GlobalEsr,
    /// Whether the SM was locked down
    pub locked_down: bool,
    /// Whether waiting debugger clients should be woken
    pub post_event: bool,
}

/// Machine-check style error report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmErrorReport {
    /// Faulting SM
    pub location: SmInfo,
    /// Warp exception status
    pub warp_esr: u32,
    /// Faulting program counter
    pub warp_esr_pc: u64,
}

/// Last error seen on one SM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SmErrorState {
    /// Global exception status
    pub hww_global_esr: u32,
    /// Warp exception status
    pub hww_warp_esr: u32,
    /// Faulting program counter
    pub hww_warp_esr_pc: u64,
}

/// Breakpoint events for debugger clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BptEvent {
    /// A warp hit a breakpoint
    Int,
    /// A warp paused on a breakpoint
    Pause,
}

/// Warp masks of one SM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WarpState {
    /// Warps with valid state
    pub valid_warps: u64,
    /// Warps paused on a breakpoint
    pub paused_warps: u64,
    /// Warps in the trap handler
    pub trapped_warps: u64,
}

// =============================================================================
// CONTROLLER
// =============================================================================

/// SM debugger and exception control of one GPU
pub struct SmController {
    regs: Arc<dyn RegisterIo>,
    clock: Arc<dyn Clock>,
    debugger: Arc<dyn DebuggerHost>,
    diag: Arc<dyn Diagnostics>,
    chip: &'static dyn ChipOps,
    config: GrConfig,
    policy: PollPolicy,
    mmu_debug_mode: bool,
    error_states: Mutex<Vec<SmErrorState>>,
}

impl SmController {
    /// Create the controller for a floorswept configuration
    pub fn new(chip: &'static dyn ChipOps, config: GrConfig, params: &GrParams, services: &GrServices) -> Self {
        let sm_count = config.sm_count() as usize;
        Self {
            regs: services.regs.clone(),
            clock: services.clock.clone(),
            debugger: services.debugger.clone(),
            diag: services.diag.clone(),
            chip,
            config,
            policy: params.poll_policy(),
            mmu_debug_mode: params.mmu_debug_mode,
            error_states: Mutex::new(alloc::vec![SmErrorState::default(); sm_count]),
        }
    }

    fn sm_offset(&self, gpc: u32, tpc: u32, sm: u32) -> u32 {
        let l = self.chip.litter();
        gpc * l.gpc_stride + tpc * l.tpc_in_gpc_stride + sm * self.chip.sm_regs().sm_stride
    }

    fn tpc_offset(&self, gpc: u32, tpc: u32) -> u32 {
        let l = self.chip.litter();
        gpc * l.gpc_stride + tpc * l.tpc_in_gpc_stride
    }

    fn read64(&self, lo: u32, hi: u32, offset: u32) -> u64 {
        (u64::from(self.regs.read32(hi + offset)) << 32) | u64::from(self.regs.read32(lo + offset))
    }

    // -------------------------------------------------------------------------
    // Status
    // -------------------------------------------------------------------------

    /// Whether the SMs run in debugger mode
    ///
    /// All SMs share one debug mode, so SM0 is representative.
    pub fn sm_debugger_attached(&self) -> bool {
        let control0 = self.regs.read32(self.chip.sm_regs().dbgr_control0);
        control0 & sm::DBGR_CONTROL0_DEBUGGER_MODE_ON != 0
    }

    /// Switch debugger mode on or off for the SMs set in `sms`, by SM id
    ///
    /// Enabling also clears stop-on-any-warp and stop-on-any-SM so one
    /// faulting warp does not halt its neighbours.
    pub fn set_sm_debug_mode(&self, sms: u128, enable: bool) {
        let (mask, value) = if enable {
            (
                sm::DBGR_CONTROL0_DEBUGGER_MODE_ON | sm::DBGR_CONTROL0_STOP_ON_ANY_WARP | sm::DBGR_CONTROL0_STOP_ON_ANY_SM,
                sm::DBGR_CONTROL0_DEBUGGER_MODE_ON,
            )
        } else {
            (sm::DBGR_CONTROL0_DEBUGGER_MODE_ON, 0)
        };

        let reg = self.chip.sm_regs().dbgr_control0;
        for (sm_id, info) in self.config.sm_info().iter().enumerate() {
            if sm_id >= 128 || sms & (1u128 << sm_id) == 0 {
                continue;
            }
            log::debug!("sm{}: debug mode {}", sm_id, if enable { "on" } else { "off" });
            self.regs
                .modify32(reg + self.tpc_offset(info.gpc, info.tpc), mask, value);
        }
    }

    /// Global exception status of one SM
    pub fn hww_global_esr(&self, gpc: u32, tpc: u32, sm: u32) -> GlobalEsr {
        let reg = self.chip.sm_regs().hww_global_esr + self.sm_offset(gpc, tpc, sm);
        GlobalEsr::from_bits_retain(self.regs.read32(reg))
    }

    /// Warp exception status of one SM
    pub fn hww_warp_esr(&self, gpc: u32, tpc: u32, sm: u32) -> u32 {
        self.regs
            .read32(self.chip.sm_regs().hww_warp_esr + self.sm_offset(gpc, tpc, sm))
    }

    /// Program counter of the faulting warp
    pub fn hww_warp_esr_pc(&self, gpc: u32, tpc: u32, sm: u32) -> u64 {
        u64::from(
            self.regs
                .read32(self.chip.sm_regs().hww_warp_esr_pc + self.sm_offset(gpc, tpc, sm)),
        )
    }

    /// Warp masks of one SM
    pub fn warp_state(&self, gpc: u32, tpc: u32, sm: u32) -> WarpState {
        let r = self.chip.sm_regs();
        let offset = self.sm_offset(gpc, tpc, sm);
        WarpState {
            valid_warps: self.read64(r.warp_valid_mask_0, r.warp_valid_mask_1, offset),
            paused_warps: self.read64(r.bpt_pause_mask_0, r.bpt_pause_mask_1, offset),
            trapped_warps: self.read64(r.bpt_trap_mask_0, r.bpt_trap_mask_1, offset),
        }
    }

    // -------------------------------------------------------------------------
    // Lock-down
    // -------------------------------------------------------------------------

    /// Assert the stop trigger of one SM and wait for it to lock down
    pub fn lock_down_sm(&self, gpc: u32, tpc: u32, sm: u32, global_esr_mask: GlobalEsr, check_errors: bool) -> Result<()> {
        log::debug!("GPC{} TPC{} SM{}: assert stop trigger", gpc, tpc, sm);
        let reg = self.chip.sm_regs().dbgr_control0 + self.sm_offset(gpc, tpc, sm);
        self.regs
            .modify32(reg, sm::DBGR_CONTROL0_STOP_TRIGGER_ENABLE, sm::DBGR_CONTROL0_STOP_TRIGGER_ENABLE);
        self.wait_for_sm_lock_down(gpc, tpc, sm, global_esr_mask, check_errors)
    }

    /// Poll one SM until it locks down
    ///
    /// With `check_errors`, an SM whose errors have all cleared counts as
    /// locked down as well.
    pub fn wait_for_sm_lock_down(
        &self,
        gpc: u32,
        tpc: u32,
        sm: u32,
        global_esr_mask: GlobalEsr,
        check_errors: bool,
    ) -> Result<()> {
        let r = self.chip.sm_regs();
        let offset = self.sm_offset(gpc, tpc, sm);
        log::debug!("GPC{} TPC{} SM{}: locking down SM", gpc, tpc, sm);

        let mut poller = self.policy.start(&*self.clock);
        let mut status0;
        loop {
            let global_esr = self.hww_global_esr(gpc, tpc, sm);
            status0 = self.regs.read32(r.dbgr_status0 + offset);
            let warp_esr = self.hww_warp_esr(gpc, tpc, sm);

            let locked_down = status0 & sm::DBGR_STATUS0_LOCKED_DOWN != 0;
            let no_error_pending = check_errors
                && warp_esr & sm::HWW_WARP_ESR_ERROR_MASK == sm::HWW_WARP_ESR_ERROR_NONE
                && global_esr.difference(global_esr_mask).is_empty();

            if locked_down || no_error_pending {
                log::debug!("GPC{} TPC{} SM{}: locked down SM", gpc, tpc, sm);
                return Ok(());
            }

            if !self.mmu_debug_mode && self.debugger.mmu_fault_pending() {
                log::error!("GPC{} TPC{}: mmu fault pending, SM{} will never lock down!", gpc, tpc, sm);
                return Err(Error::MmuFaultAbort);
            }

            if poller.expired() {
                break;
            }
            poller.wait(true);
        }

        let control0 = self.regs.read32(r.dbgr_control0 + offset);
        let warps = self.warp_state(gpc, tpc, sm);
        log::error!("GPC{} TPC{}: timed out while trying to lock down SM{}", gpc, tpc, sm);
        log::error!(
            "STATUS0(0x{:x})=0x{:x} CONTROL0=0x{:x} VALID_MASK=0x{:x} PAUSE_MASK=0x{:x} TRAP_MASK=0x{:x}",
            r.dbgr_status0 + offset,
            status0,
            control0,
            warps.valid_warps,
            warps.paused_warps,
            warps.trapped_warps
        );
        Err(Error::Timeout)
    }

    // -------------------------------------------------------------------------
    // Exceptions
    // -------------------------------------------------------------------------

    /// Handle an SM exception raised by the interrupt handler
    ///
    /// Without a debugger the exception is fatal to the channel and
    /// [`Error::GpuFault`] is returned without touching the SM.
    pub fn handle_sm_exception(&self, gpc: u32, tpc: u32, sm: u32) -> Result<SmExceptionState> {
        let debugger_attached = self.sm_debugger_attached();
        let global_esr = self.hww_global_esr(gpc, tpc, sm);
        let warp_esr = self.hww_warp_esr(gpc, tpc, sm);
        let global_mask = self.chip.no_lock_down_global_esr_mask();

        if !debugger_attached {
            log::error!("sm hww global 0x{:08x} warp 0x{:08x}", global_esr.bits(), warp_esr);
            return Err(Error::GpuFault);
        }
        log::debug!("sm hww global 0x{:08x} warp 0x{:08x}", global_esr.bits(), warp_esr);

        let location = SmInfo { gpc, tpc, sm };
        let unmasked = !global_esr.difference(global_mask).is_empty();
        if unmasked {
            self.diag.report_sm_exception(&SmErrorReport {
                location,
                warp_esr,
                warp_esr_pc: self.hww_warp_esr_pc(gpc, tpc, sm),
            });
        }
        self.record_sm_error_state(gpc, tpc, sm);

        let hook = self
            .chip
            .pre_process_sm_exception(&SmException {
                location,
                global_esr,
                warp_esr,
                sm_debugger_attached: debugger_attached,
            })
            .inspect_err(|_| log::error!("could not pre-process sm error!"))?;

        let mut state = SmExceptionState {
            global_esr,
            warp_esr,
            no_lock_down_mask: global_mask,
            locked_down: false,
            post_event: false,
        };
        if hook.early_exit {
            log::debug!("sm exception: returning early");
            return Ok(state);
        }

        // a lone breakpoint interrupt keeps exceptions flowing
        let disable_sm_exceptions = !(global_esr == GlobalEsr::BPT_INT && warp_esr == 0);
        if !hook.ignore_debugger && disable_sm_exceptions {
            self.tpc_exception_sm_disable(gpc, tpc);
            log::debug!("SM exceptions disabled");
        }

        if !hook.ignore_debugger && (warp_esr != 0 || unmasked) {
            log::debug!("warp sync needed");
            self.lock_down_sm(gpc, tpc, sm, global_mask, true)
                .inspect_err(|_| log::error!("sm did not lock down!"))?;
            state.locked_down = true;
        }

        if hook.ignore_debugger {
            log::debug!("ignore_debugger set, skipping event posting");
        } else {
            state.post_event = true;
        }
        Ok(state)
    }

    /// Snapshot the error registers of one SM
    pub fn record_sm_error_state(&self, gpc: u32, tpc: u32, sm: u32) {
        let Some(sm_id) = self.config.sm_id(gpc, tpc, sm) else {
            log::warn!("GPC{} TPC{} SM{}: not populated, error state dropped", gpc, tpc, sm);
            return;
        };
        let state = SmErrorState {
            hww_global_esr: self.hww_global_esr(gpc, tpc, sm).bits(),
            hww_warp_esr: self.hww_warp_esr(gpc, tpc, sm),
            hww_warp_esr_pc: self.hww_warp_esr_pc(gpc, tpc, sm),
        };
        if let Some(slot) = self.error_states.lock().get_mut(sm_id as usize) {
            *slot = state;
        }
    }

    /// Last recorded error of an SM
    pub fn sm_error_state(&self, sm_id: u32) -> Option<SmErrorState> {
        self.error_states.lock().get(sm_id as usize).copied()
    }

    /// Wake debugger clients for the breakpoint bits in `global_esr`
    pub fn post_bpt_events(&self, global_esr: GlobalEsr) {
        if global_esr.contains(GlobalEsr::BPT_INT) {
            self.debugger.post_bpt_event(BptEvent::Int);
        }
        if global_esr.contains(GlobalEsr::BPT_PAUSE) {
            self.debugger.post_bpt_event(BptEvent::Pause);
        }
    }

    /// Clear the exception status of one SM
    pub fn clear_sm_hww(&self, gpc: u32, tpc: u32, sm: u32, global_esr: GlobalEsr) {
        let r = self.chip.sm_regs();
        let offset = self.sm_offset(gpc, tpc, sm);
        self.regs.write32(r.hww_global_esr + offset, global_esr.bits());
        self.regs.write32(r.hww_warp_esr + offset, 0);
    }

    /// Clear the exception status of every SM
    pub fn clear_sm_errors(&self) {
        for info in self.config.sm_info() {
            let global_esr = self.hww_global_esr(info.gpc, info.tpc, info.sm);
            self.clear_sm_hww(info.gpc, info.tpc, info.sm, global_esr);
        }
    }

    // -------------------------------------------------------------------------
    // Exception forwarding
    // -------------------------------------------------------------------------

    /// Stop forwarding SM exceptions of one TPC
    pub fn tpc_exception_sm_disable(&self, gpc: u32, tpc: u32) {
        let reg = self.chip.sm_regs().tpc_exception_en + self.tpc_offset(gpc, tpc);
        self.regs.modify32(reg, sm::TPC_EXCEPTION_EN_SM, 0);
    }

    /// Forward SM exceptions of every TPC
    pub fn tpc_exception_sm_enable(&self) {
        let r = self.chip.sm_regs();
        let value = self.regs.read32(r.tpc_exception_en) | sm::TPC_EXCEPTION_EN_SM;
        self.regs.write32(r.gpcs_tpcs_tpc_exception_en, value);
    }

    /// SM exception forwarding state, one bit per SM id
    pub fn tpc_enabled_exceptions(&self) -> u128 {
        self.config
            .sm_info()
            .iter()
            .enumerate()
            .fold(0, |mask, (sm_id, info)| {
                let reg = self.chip.sm_regs().tpc_exception_en + self.tpc_offset(info.gpc, info.tpc);
                let enabled = self.regs.read32(reg) & sm::TPC_EXCEPTION_EN_SM != 0;
                mask | (u128::from(enabled) << sm_id)
            })
    }

    // -------------------------------------------------------------------------
    // Suspend / resume
    // -------------------------------------------------------------------------

    /// Stop one SM for the debugger
    pub fn suspend_single_sm(&self, gpc: u32, tpc: u32, sm: u32, global_esr_mask: GlobalEsr, check_errors: bool) -> Result<()> {
        if !self.sm_debugger_attached() {
            log::warn!("SM debugger not attached, skipping suspend!");
            return Err(Error::DebuggerNotAttached);
        }
        log::debug!("suspending gpc:{}, tpc:{}, sm{}", gpc, tpc, sm);
        self.lock_down_sm(gpc, tpc, sm, global_esr_mask, check_errors)
            .inspect_err(|_| log::error!("SuspendSm failed"))
    }

    /// Stop every SM for the debugger
    pub fn suspend_all_sms(&self, global_esr_mask: GlobalEsr, check_errors: bool) -> Result<()> {
        if !self.sm_debugger_attached() {
            log::warn!("SM debugger not attached, skipping suspend!");
            return Err(Error::DebuggerNotAttached);
        }
        log::debug!("suspending all sms");
        self.trigger_suspend();

        for info in self.config.sm_info() {
            self.wait_for_sm_lock_down(info.gpc, info.tpc, info.sm, global_esr_mask, check_errors)
                .inspect_err(|_| log::error!("SuspendAllSms failed"))?;
        }
        Ok(())
    }

    /// Broadcast the stop trigger without waiting
    pub fn trigger_suspend(&self) {
        let r = self.chip.sm_regs();
        let control0 = self.regs.read32(r.dbgr_control0) | sm::DBGR_CONTROL0_STOP_TRIGGER_ENABLE;
        self.regs.write32(r.gpcs_tpcs_dbgr_control0, control0);
    }

    /// Resume one SM
    pub fn resume_single_sm(&self, gpc: u32, tpc: u32, sm: u32) {
        let reg = self.chip.sm_regs().dbgr_control0 + self.sm_offset(gpc, tpc, sm);
        let control0 = self.regs.read32(reg) & !sm::DBGR_CONTROL0_STOP_TRIGGER_ENABLE;
        // the stop trigger must drop before the run trigger is raised
        self.regs.write32(reg, control0);
        self.regs
            .write32(reg, control0 | sm::DBGR_CONTROL0_RUN_TRIGGER_TASK);
    }

    /// Resume every SM
    pub fn resume_all_sms(&self) {
        let reg = self.chip.sm_regs().gpcs_tpcs_dbgr_control0;
        let control0 = self.regs.read32(reg) & !sm::DBGR_CONTROL0_STOP_TRIGGER_ENABLE;
        self.regs.write32(reg, control0);
        self.regs
            .write32(reg, control0 | sm::DBGR_CONTROL0_RUN_TRIGGER_TASK);
    }

    /// Lock down every SM and collect its warp masks, in SM id order
    pub fn wait_for_pause(&self) -> Result<Vec<WarpState>> {
        let global_mask = self.chip.no_lock_down_global_esr_mask();
        let sms = self.config.sm_info();

        for info in &sms {
            self.lock_down_sm(info.gpc, info.tpc, info.sm, global_mask, false)
                .inspect_err(|_| log::error!("sm did not lock down!"))?;
        }
        Ok(sms
            .iter()
            .map(|info| self.warp_state(info.gpc, info.tpc, info.sm))
            .collect())
    }

    /// Release paused warps and resume every SM
    pub fn resume_from_pause(&self) {
        self.regs
            .write32(self.chip.sm_regs().gpcs_tpcs_bpt_pause_mask, 0);
        self.tpc_exception_sm_enable();
        self.resume_all_sms();
    }
}

impl core::fmt::Debug for SmController {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SmController")
            .field("chip", &self.chip.name())
            .field("sm_count", &self.config.sm_count())
            .field("mmu_debug_mode", &self.mmu_debug_mode)
            .finish_non_exhaustive()
    }
}

static_assertions::assert_impl_all!(SmController: Send, Sync);
