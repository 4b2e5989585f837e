//! # FECS Falcon
//!
//! The Front End Context Switch falcon runs the ctxsw ucode. The driver
//! talks to it through a set of mailbox registers and a method interface:
//!
//! ```text
//!  driver                                   FECS ucode
//!    │ mailbox[id]     = data  (id != 0)        │
//!    │ mailbox_clear[0] = clear                 │
//!    │ method_data     = data                   │
//!    │ method_push     = method ───────────────►│
//!    │                                          │ executes
//!    │◄──────────────── mailbox[id] = ok / fail │
//!    │ poll until ok, fail or deadline          │
//! ```
//!
//! One command is in flight at a time: the mailbox transport sits behind a
//! mutex that is held from the first register write to the end of the wait.

mod ctxsw;
mod method;
mod ucode;

pub use ctxsw::{CtxswControl, CtxswGate};
pub use method::{CtxImageSizes, FecsCommand, FecsMethod, MailboxOp, MethodOp};
pub use ucode::{CompareOp, UcodeCond, UcodeStatus};

use alloc::sync::Arc;

use arrayvec::ArrayVec;
use spin::Mutex;

use magma_core::{Aperture, Error, Result};
use magma_hal::{Clock, PollPolicy, RegisterIo};

use crate::hw::regs::fecs;
use crate::services::{Diagnostics, InstBlock};

// =============================================================================
// CURRENT CONTEXT
// =============================================================================

/// Raw value of the FECS current-context register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct CurrentCtx(pub u32);

impl CurrentCtx {
    /// Value FECS holds while `inst` is resident
    pub fn from_inst_block(inst: &InstBlock) -> Self {
        let target = match inst.aperture {
            Aperture::VidMem => fecs::CURRENT_CTX_TARGET_VID_MEM,
            Aperture::SysMemCoherent => fecs::CURRENT_CTX_TARGET_SYS_MEM_COH,
            Aperture::SysMemNonCoherent => fecs::CURRENT_CTX_TARGET_SYS_MEM_NCOH,
        };
        Self(
            (inst.ptr() & fecs::CURRENT_CTX_PTR_MASK)
                | (target << fecs::CURRENT_CTX_TARGET_SHIFT)
                | fecs::CURRENT_CTX_VALID,
        )
    }

    /// Instance block frame number
    #[inline]
    pub const fn ptr(self) -> u32 {
        self.0 & fecs::CURRENT_CTX_PTR_MASK
    }

    /// Whether FECS holds a resident context
    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 & fecs::CURRENT_CTX_VALID != 0
    }
}

// =============================================================================
// MAILBOX TRANSPORT
// =============================================================================

/// Register-level access to the ctxsw mailboxes and method interface
struct MailboxTransport {
    regs: Arc<dyn RegisterIo>,
}

impl MailboxTransport {
    #[inline]
    fn read_mailbox(&self, id: u32) -> u32 {
        self.regs.read32(fecs::ctxsw_mailbox(id))
    }

    #[inline]
    fn write_mailbox(&self, id: u32, value: u32) {
        self.regs.write32(fecs::ctxsw_mailbox(id), value);
    }

    #[inline]
    fn clear_mailbox(&self, id: u32, mask: u32) {
        self.regs.write32(fecs::ctxsw_mailbox_clear(id), mask);
    }

    fn push_method(&self, method: &MethodOp) {
        self.regs.write32(fecs::METHOD_DATA, method.data);
        self.regs
            .write32(fecs::METHOD_PUSH, method.addr & fecs::METHOD_PUSH_ADR_MASK);
    }

    fn snapshot(&self) -> ArrayVec<u32, { fecs::CTXSW_MAILBOX_COUNT }> {
        (0..fecs::CTXSW_MAILBOX_COUNT as u32)
            .map(|i| self.read_mailbox(i))
            .collect()
    }
}

// =============================================================================
// FECS
// =============================================================================

/// FECS command interface of one GPU
pub struct Fecs {
    transport: Mutex<MailboxTransport>,
    regs: Arc<dyn RegisterIo>,
    clock: Arc<dyn Clock>,
    diag: Arc<dyn Diagnostics>,
    policy: PollPolicy,
    supports_preemption: bool,
}

impl Fecs {
    /// Create the interface; `policy` bounds every ucode wait
    pub fn new(
        regs: Arc<dyn RegisterIo>,
        clock: Arc<dyn Clock>,
        diag: Arc<dyn Diagnostics>,
        policy: PollPolicy,
        supports_preemption: bool,
    ) -> Self {
        Self {
            transport: Mutex::new(MailboxTransport { regs: regs.clone() }),
            regs,
            clock,
            diag,
            policy,
            supports_preemption,
        }
    }

    /// Poll mailbox `id` until the success or failure condition holds
    ///
    /// Returns the last mailbox value on success. Failure and timeout dump
    /// the falcon state before returning.
    pub fn wait_ucode(
        &self,
        id: u32,
        cond: UcodeCond,
        ok_value: u32,
        fail_value: u32,
        allow_sleep: bool,
    ) -> Result<u32> {
        let transport = self.transport.lock();
        self.wait_locked(&transport, id, cond, ok_value, fail_value, allow_sleep)
    }

    fn wait_locked(
        &self,
        transport: &MailboxTransport,
        id: u32,
        cond: UcodeCond,
        ok_value: u32,
        fail_value: u32,
        allow_sleep: bool,
    ) -> Result<u32> {
        let mut poller = self.policy.start(&*self.clock);
        loop {
            let reg = transport.read_mailbox(id);
            match cond.check(reg, ok_value, fail_value) {
                UcodeStatus::Ok => return Ok(reg),
                UcodeStatus::Error => {
                    log::error!(
                        "fecs: ucode method failed on mailbox {}: 0x{:08x} (ok {:?} 0x{:x}, fail {:?} 0x{:x})",
                        id,
                        reg,
                        cond.ok,
                        ok_value,
                        cond.fail,
                        fail_value
                    );
                    self.dump_locked(transport);
                    return Err(Error::UcodeError);
                }
                UcodeStatus::Pending => {}
            }

            if poller.expired() {
                log::error!(
                    "fecs: timeout waiting on mailbox {}: 0x{:08x} (ok {:?} 0x{:x}, fail {:?} 0x{:x})",
                    id,
                    reg,
                    cond.ok,
                    ok_value,
                    cond.fail,
                    fail_value
                );
                self.dump_locked(transport);
                return Err(Error::Timeout);
            }
            poller.wait(allow_sleep);
        }
    }

    /// Log every ctxsw mailbox and let the host dump falcon state
    pub fn dump_stats(&self) -> ArrayVec<u32, { fecs::CTXSW_MAILBOX_COUNT }> {
        let transport = self.transport.lock();
        self.dump_locked(&transport)
    }

    fn dump_locked(&self, transport: &MailboxTransport) -> ArrayVec<u32, { fecs::CTXSW_MAILBOX_COUNT }> {
        let mailboxes = transport.snapshot();
        for (i, value) in mailboxes.iter().enumerate() {
            log::error!("fecs: ctxsw_mailbox({:2}) = 0x{:08x}", i, value);
        }
        self.diag.dump_falcon_stats();
        mailboxes
    }

    /// Raw current-context register
    pub fn current_ctx(&self) -> CurrentCtx {
        CurrentCtx(self.regs.read32(fecs::CURRENT_CTX))
    }

    /// Instance block frame of the resident context
    pub fn get_ctx_ptr(&self) -> u32 {
        self.current_ctx().ptr()
    }

    /// Drop the resident context so the next bind reloads it
    pub fn set_current_ctx_invalid(&self) {
        self.regs.write32(fecs::CURRENT_CTX, 0);
    }

    /// Whether the ctxsw ucode handles preemption image discovery
    pub fn supports_preemption(&self) -> bool {
        self.supports_preemption
    }
}

impl core::fmt::Debug for Fecs {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Fecs")
            .field("policy", &self.policy)
            .field("busy", &self.transport.is_locked())
            .finish()
    }
}

static_assertions::assert_impl_all!(Fecs: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeDiag, FakeRegs};
    use magma_hal::ManualClock;

    fn fecs(regs: &Arc<FakeRegs>, clock: &Arc<ManualClock>, diag: &Arc<FakeDiag>) -> Fecs {
        Fecs::new(
            regs.clone(),
            clock.clone(),
            diag.clone(),
            PollPolicy::new(5, 200, 1_000),
            false,
        )
    }

    const EQ_EQ: UcodeCond = UcodeCond {
        ok: CompareOp::Equal,
        fail: CompareOp::Equal,
    };

    #[test]
    fn test_wait_returns_first_success() {
        let regs = Arc::new(FakeRegs::new());
        let clock = Arc::new(ManualClock::new());
        let diag = Arc::new(FakeDiag::default());
        regs.script(fecs::ctxsw_mailbox(0), &[0, 0, 0x10]);

        let fecs = fecs(&regs, &clock, &diag);
        assert_eq!(fecs.wait_ucode(0, EQ_EQ, 0x10, 0x20, true), Ok(0x10));
        assert_eq!(regs.read_count(fecs::ctxsw_mailbox(0)), 3);
        assert_eq!(clock.sleep_count(), 2);
        assert_eq!(diag.falcon_dumps(), 0);
    }

    #[test]
    fn test_wait_reports_ucode_error_after_third_read() {
        let regs = Arc::new(FakeRegs::new());
        let clock = Arc::new(ManualClock::new());
        let diag = Arc::new(FakeDiag::default());
        regs.script(fecs::ctxsw_mailbox(0), &[0x00, 0x00, 0x20]);

        let fecs = fecs(&regs, &clock, &diag);
        assert_eq!(fecs.wait_ucode(0, EQ_EQ, 0x10, 0x20, true), Err(Error::UcodeError));
        // three polls, then the 16-mailbox dump
        assert_eq!(regs.read_count(fecs::ctxsw_mailbox(0)), 4);
        assert_eq!(diag.falcon_dumps(), 1);
    }

    #[test]
    fn test_wait_times_out_and_dumps() {
        let regs = Arc::new(FakeRegs::new());
        let clock = Arc::new(ManualClock::new());
        let diag = Arc::new(FakeDiag::default());

        let fecs = fecs(&regs, &clock, &diag);
        let skip = UcodeCond {
            ok: CompareOp::Skip,
            fail: CompareOp::Skip,
        };
        assert_eq!(fecs.wait_ucode(2, skip, 0, 0, true), Err(Error::Timeout));
        assert!(clock.now_us() >= 1_000);
        assert_eq!(diag.falcon_dumps(), 1);
    }

    #[test]
    fn test_busy_wait_never_sleeps() {
        let regs = Arc::new(FakeRegs::new());
        let clock = Arc::new(ManualClock::new());
        let diag = Arc::new(FakeDiag::default());

        let fecs = fecs(&regs, &clock, &diag);
        assert_eq!(fecs.wait_ucode(1, EQ_EQ, 1, 2, false), Err(Error::Timeout));
        assert_eq!(clock.sleep_count(), 0);
        assert_eq!(clock.delay_count(), 200);
    }

    #[test]
    fn test_current_ctx_helpers() {
        let regs = Arc::new(FakeRegs::new());
        let clock = Arc::new(ManualClock::new());
        let diag = Arc::new(FakeDiag::default());
        regs.set(fecs::CURRENT_CTX, 0x8000_1234);

        let fecs = fecs(&regs, &clock, &diag);
        assert!(fecs.current_ctx().is_valid());
        assert_eq!(fecs.get_ctx_ptr(), 0x1234);
        fecs.set_current_ctx_invalid();
        assert!(!fecs.current_ctx().is_valid());
    }

    #[test]
    fn test_current_ctx_target_encoding() {
        let inst = InstBlock {
            addr: magma_core::PhysAddr::new(0x4000),
            aperture: Aperture::SysMemNonCoherent,
        };
        assert_eq!(CurrentCtx::from_inst_block(&inst).0, 0x8000_0000 | (3 << 28) | 0x4);
    }

    #[test]
    fn test_dump_stats_reads_every_mailbox() {
        let regs = Arc::new(FakeRegs::new());
        let clock = Arc::new(ManualClock::new());
        let diag = Arc::new(FakeDiag::default());
        regs.set(fecs::ctxsw_mailbox(7), 0x77);

        let fecs = fecs(&regs, &clock, &diag);
        let dump = fecs.dump_stats();
        assert_eq!(dump.len(), 16);
        assert_eq!(dump[7], 0x77);
        assert_eq!(diag.falcon_dumps(), 1);
    }
}
