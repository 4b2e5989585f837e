//! FECS method submission and the ctxsw method catalogue.

use magma_core::{Error, Result};

use super::ucode::{CompareOp, UcodeCond};
use super::{CurrentCtx, Fecs};
use crate::hw::regs::{fecs, method};
use crate::services::InstBlock;

// =============================================================================
// COMMAND
// =============================================================================

/// Method half of a FECS command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodOp {
    /// Method push address
    pub addr: u32,
    /// Method data
    pub data: u32,
}

/// Mailbox half of a FECS command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxOp {
    /// Mailbox the ucode answers in; 4 is a write-only issue slot
    pub id: u32,
    /// Value written to the mailbox before the push (id != 0)
    pub data: u32,
    /// Bits cleared before the push
    pub clear: u32,
    /// Expected value on success
    pub ok: u32,
    /// Expected value on failure
    pub fail: u32,
}

/// One FECS transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FecsCommand {
    /// Method to push
    pub method: MethodOp,
    /// Mailbox handshake
    pub mailbox: MailboxOp,
    /// Completion conditions
    pub cond: UcodeCond,
}

/// Mailbox id used for command issue only
const MAILBOX_ISSUE_ONLY: u32 = 4;

// =============================================================================
// METHOD CATALOGUE
// =============================================================================

/// Methods of the ctxsw ucode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FecsMethod {
    /// Stop context switching
    StopCtxsw,
    /// Start context switching
    StartCtxsw,
    /// Halt the pipeline
    HaltPipeline,
    /// Bind an instance block
    BindPointer,
    /// Wait for idle and save the golden image
    WfiGoldenSave,
    /// Size of a graphics context image
    DiscoverImageSize,
    /// Size of the zcull context
    DiscoverZcullImageSize,
    /// Size of the perfmon context
    DiscoverPmImageSize,
    /// Size of the register list
    DiscoverReglistImageSize,
    /// Size of the preemption context
    DiscoverPreemptionImageSize,
    /// Bind the register list instance
    SetReglistBindInstance,
    /// Register list virtual address
    SetReglistVirtualAddress,
    /// Ctxsw watchdog
    SetWatchdogTimeout,
}

impl FecsMethod {
    /// Method push address
    pub const fn push_addr(self) -> u32 {
        match self {
            Self::StopCtxsw => method::STOP_CTXSW,
            Self::StartCtxsw => method::START_CTXSW,
            Self::HaltPipeline => method::HALT_PIPELINE,
            Self::BindPointer => method::BIND_POINTER,
            Self::WfiGoldenSave => method::WFI_GOLDEN_SAVE,
            Self::DiscoverImageSize => method::DISCOVER_IMAGE_SIZE,
            Self::DiscoverZcullImageSize => method::DISCOVER_ZCULL_IMAGE_SIZE,
            Self::DiscoverPmImageSize => method::DISCOVER_PM_IMAGE_SIZE,
            Self::DiscoverReglistImageSize => method::DISCOVER_REGLIST_IMAGE_SIZE,
            Self::DiscoverPreemptionImageSize => method::DISCOVER_PREEMPTION_IMAGE_SIZE,
            Self::SetReglistBindInstance => method::SET_REGLIST_BIND_INSTANCE,
            Self::SetReglistVirtualAddress => method::SET_REGLIST_VIRTUAL_ADDRESS,
            Self::SetWatchdogTimeout => method::SET_WATCHDOG_TIMEOUT,
        }
    }

    /// Whether the method answers with a value the caller wants
    pub const fn returns_value(self) -> bool {
        matches!(
            self,
            Self::DiscoverImageSize
                | Self::DiscoverZcullImageSize
                | Self::DiscoverPmImageSize
                | Self::DiscoverReglistImageSize
                | Self::DiscoverPreemptionImageSize
        )
    }

    /// Whether the wait may sleep
    ///
    /// Stop and start are issued with power gating held off and are short;
    /// they busy-wait.
    pub const fn allows_sleep(self) -> bool {
        !matches!(self, Self::StopCtxsw | Self::StartCtxsw | Self::HaltPipeline)
    }

    /// Canonical command for this method
    pub const fn command(self, data: u32) -> FecsCommand {
        let addr = self.push_addr();
        match self {
            Self::StopCtxsw | Self::StartCtxsw | Self::HaltPipeline => FecsCommand {
                method: MethodOp { addr, data: !0 },
                mailbox: MailboxOp {
                    id: 1,
                    data: !0,
                    clear: !0,
                    ok: fecs::MAILBOX_VALUE_PASS,
                    fail: fecs::MAILBOX_VALUE_FAIL,
                },
                cond: UcodeCond {
                    ok: CompareOp::Equal,
                    fail: CompareOp::Equal,
                },
            },
            Self::BindPointer => FecsCommand {
                method: MethodOp { addr, data },
                mailbox: MailboxOp {
                    id: 0,
                    data: 0,
                    clear: 0x30,
                    ok: 0x10,
                    fail: 0x20,
                },
                cond: UcodeCond {
                    ok: CompareOp::And,
                    fail: CompareOp::And,
                },
            },
            Self::WfiGoldenSave => FecsCommand {
                method: MethodOp { addr, data },
                mailbox: MailboxOp {
                    id: 0,
                    data: 0,
                    clear: 0x3,
                    ok: 0x1,
                    fail: 0x2,
                },
                cond: UcodeCond {
                    ok: CompareOp::And,
                    fail: CompareOp::And,
                },
            },
            Self::DiscoverImageSize
            | Self::DiscoverZcullImageSize
            | Self::DiscoverPmImageSize
            | Self::DiscoverReglistImageSize
            | Self::DiscoverPreemptionImageSize
            | Self::SetWatchdogTimeout => FecsCommand {
                method: MethodOp { addr, data },
                mailbox: MailboxOp {
                    id: 0,
                    data: 0,
                    clear: !0,
                    ok: 0,
                    fail: 0,
                },
                cond: UcodeCond {
                    ok: CompareOp::NotEqual,
                    fail: CompareOp::Skip,
                },
            },
            Self::SetReglistBindInstance | Self::SetReglistVirtualAddress => FecsCommand {
                method: MethodOp { addr, data: 1 },
                mailbox: MailboxOp {
                    id: MAILBOX_ISSUE_ONLY,
                    data,
                    clear: !0,
                    ok: 1,
                    fail: 0,
                },
                cond: UcodeCond {
                    ok: CompareOp::Equal,
                    fail: CompareOp::Skip,
                },
            },
        }
    }
}

/// Context image sizes reported by the ucode, in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CtxImageSizes {
    /// Graphics context (and golden image) size
    pub golden_image_size: u32,
    /// Zcull context size
    pub zcull_image_size: u32,
    /// Perfmon context size
    pub pm_image_size: u32,
    /// Preemption context size, 0 without preemption support
    pub preempt_image_size: u32,
}

// =============================================================================
// SUBMISSION
// =============================================================================

impl Fecs {
    /// Issue a command and wait for the ucode to answer
    ///
    /// Returns the last value read from the answer mailbox.
    pub fn submit(&self, cmd: &FecsCommand, sleep_during_wait: bool) -> Result<u32> {
        let transport = self.transport.lock();

        if cmd.mailbox.id != 0 {
            transport.write_mailbox(cmd.mailbox.id, cmd.mailbox.data);
        }
        transport.clear_mailbox(0, cmd.mailbox.clear);
        transport.push_method(&cmd.method);

        // id 4 only issues; completion is reported in mailbox 0
        let wait_id = if cmd.mailbox.id == MAILBOX_ISSUE_ONLY { 0 } else { cmd.mailbox.id };
        self.wait_locked(
            &transport,
            wait_id,
            cmd.cond,
            cmd.mailbox.ok,
            cmd.mailbox.fail,
            sleep_during_wait,
        )
        .inspect_err(|_| {
            log::error!(
                "fecs method: data=0x{:08x} push adr=0x{:08x}",
                cmd.method.data,
                cmd.method.addr
            );
        })
    }

    /// Issue a command on its own mailbox without sleeping
    pub fn submit_sideband(&self, cmd: &FecsCommand) -> Result<u32> {
        let transport = self.transport.lock();

        transport.clear_mailbox(cmd.mailbox.id, cmd.mailbox.clear);
        transport.push_method(&cmd.method);

        self.wait_locked(
            &transport,
            cmd.mailbox.id,
            cmd.cond,
            cmd.mailbox.ok,
            cmd.mailbox.fail,
            false,
        )
        .inspect_err(|_| {
            log::error!(
                "fecs sideband method: data=0x{:08x} push adr=0x{:08x}",
                cmd.method.data,
                cmd.method.addr
            );
        })
    }

    /// Run a catalogue method
    ///
    /// Discovery methods return the mailbox value, others return `None`.
    pub fn ctrl_ctxsw(&self, method: FecsMethod, data: u32) -> Result<Option<u32>> {
        log::debug!("fecs: {:?} data=0x{:08x}", method, data);
        let value = self.submit(&method.command(data), method.allows_sleep())?;
        Ok(method.returns_value().then_some(value))
    }

    fn discover(&self, method: FecsMethod) -> Result<u32> {
        self.ctrl_ctxsw(method, 0)?.ok_or(Error::ProtocolMisuse)
    }

    /// Query every context image size the ucode knows
    pub fn discover_ctx_image_sizes(&self) -> Result<CtxImageSizes> {
        let golden_image_size = self.discover(FecsMethod::DiscoverImageSize)?;
        if golden_image_size == 0 {
            log::error!("fecs: ucode reported an empty context image");
            return Err(Error::UcodeError);
        }

        let sizes = CtxImageSizes {
            golden_image_size,
            zcull_image_size: self.discover(FecsMethod::DiscoverZcullImageSize)?,
            pm_image_size: self.discover(FecsMethod::DiscoverPmImageSize)?,
            preempt_image_size: if self.supports_preemption() {
                self.discover(FecsMethod::DiscoverPreemptionImageSize)?
            } else {
                0
            },
        };
        log::info!(
            "fecs: ctx image {} B, zcull {} B, pm {} B, preempt {} B",
            sizes.golden_image_size,
            sizes.zcull_image_size,
            sizes.pm_image_size,
            sizes.preempt_image_size
        );
        Ok(sizes)
    }

    /// Make `inst` the resident context
    pub fn bind_channel(&self, inst: &InstBlock) -> Result<()> {
        let ctx = CurrentCtx::from_inst_block(inst);
        self.ctrl_ctxsw(FecsMethod::BindPointer, ctx.0).map(drop)
    }

    /// Save the resident context as the golden image
    pub fn save_golden_image(&self, inst: &InstBlock) -> Result<()> {
        let ctx = CurrentCtx::from_inst_block(inst);
        self.ctrl_ctxsw(FecsMethod::WfiGoldenSave, ctx.0).map(drop)
    }

    /// Program the ctxsw watchdog
    pub fn set_watchdog_timeout(&self, timeout: u32) -> Result<()> {
        self.ctrl_ctxsw(FecsMethod::SetWatchdogTimeout, timeout).map(drop)
    }

    /// Halt the graphics pipeline
    pub fn halt_pipeline(&self) -> Result<()> {
        self.ctrl_ctxsw(FecsMethod::HaltPipeline, 0).map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeDiag, FakeRegs, RegOp};
    use alloc::sync::Arc;
    use magma_core::PhysAddr;
    use magma_hal::{ManualClock, PollPolicy};
    use std::vec;

    fn setup(preemption: bool) -> (Arc<FakeRegs>, Arc<FakeDiag>, Fecs) {
        let regs = Arc::new(FakeRegs::new());
        let diag = Arc::new(FakeDiag::default());
        let fecs = Fecs::new(
            regs.clone(),
            Arc::new(ManualClock::new()),
            diag.clone(),
            PollPolicy::new(5, 200, 10_000),
            preemption,
        );
        (regs, diag, fecs)
    }

    #[test]
    fn test_submit_write_order() {
        let (regs, _, fecs) = setup(false);
        regs.reply_to_method(method::STOP_CTXSW, 1, fecs::MAILBOX_VALUE_PASS);

        fecs.ctrl_ctxsw(FecsMethod::StopCtxsw, 0).unwrap();
        assert_eq!(
            regs.writes(),
            vec![
                RegOp::Write(fecs::ctxsw_mailbox(1), !0),
                RegOp::Write(fecs::ctxsw_mailbox_clear(0), !0),
                RegOp::Write(fecs::METHOD_DATA, !0),
                RegOp::Write(fecs::METHOD_PUSH, method::STOP_CTXSW),
            ]
        );
    }

    #[test]
    fn test_mailbox_four_waits_on_mailbox_zero() {
        let (regs, _, fecs) = setup(false);
        regs.reply_to_method(method::SET_REGLIST_BIND_INSTANCE, 0, 1);

        let cmd = FecsMethod::SetReglistBindInstance.command(0xabcd);
        assert_eq!(fecs.submit(&cmd, true), Ok(1));
        assert_eq!(regs.get(fecs::ctxsw_mailbox(4)), 0xabcd);
        assert_eq!(regs.read_count(fecs::ctxsw_mailbox(4)), 0);
    }

    #[test]
    fn test_sideband_clears_own_mailbox() {
        let (regs, _, fecs) = setup(false);
        regs.reply_to_method(method::HALT_PIPELINE, 1, fecs::MAILBOX_VALUE_PASS);

        let cmd = FecsMethod::HaltPipeline.command(0);
        fecs.submit_sideband(&cmd).unwrap();
        let writes = regs.writes();
        assert_eq!(writes[0], RegOp::Write(fecs::ctxsw_mailbox_clear(1), !0));
        assert!(!writes.contains(&RegOp::Write(fecs::ctxsw_mailbox(1), !0)));
    }

    #[test]
    fn test_failed_method_propagates_ucode_error() {
        let (regs, diag, fecs) = setup(false);
        regs.reply_to_method(method::BIND_POINTER, 0, 0x20);

        let inst = InstBlock::vidmem(PhysAddr::new(0x10_0000));
        assert_eq!(fecs.bind_channel(&inst), Err(Error::UcodeError));
        assert_eq!(diag.falcon_dumps(), 1);
        assert_eq!(regs.last_push(), Some((method::BIND_POINTER, inst.current_ctx().0)));
    }

    #[test]
    fn test_discover_sizes() {
        let (regs, _, fecs) = setup(true);
        regs.reply_to_method(method::DISCOVER_IMAGE_SIZE, 0, 0x2_0000);
        regs.reply_to_method(method::DISCOVER_ZCULL_IMAGE_SIZE, 0, 0x1000);
        regs.reply_to_method(method::DISCOVER_PM_IMAGE_SIZE, 0, 0x4000);
        regs.reply_to_method(method::DISCOVER_PREEMPTION_IMAGE_SIZE, 0, 0x8000);

        let sizes = fecs.discover_ctx_image_sizes().unwrap();
        assert_eq!(
            sizes,
            CtxImageSizes {
                golden_image_size: 0x2_0000,
                zcull_image_size: 0x1000,
                pm_image_size: 0x4000,
                preempt_image_size: 0x8000,
            }
        );
    }

    #[test]
    fn test_discover_skips_preemption_without_support() {
        let (regs, _, fecs) = setup(false);
        regs.reply_to_method(method::DISCOVER_IMAGE_SIZE, 0, 0x100);
        regs.reply_to_method(method::DISCOVER_ZCULL_IMAGE_SIZE, 0, 0x10);
        regs.reply_to_method(method::DISCOVER_PM_IMAGE_SIZE, 0, 0x10);

        assert_eq!(fecs.discover_ctx_image_sizes().unwrap().preempt_image_size, 0);
        assert!(!regs.pushed(method::DISCOVER_PREEMPTION_IMAGE_SIZE));
    }

    #[test]
    fn test_catalogue_parameters() {
        let bind = FecsMethod::BindPointer.command(0x1234);
        assert_eq!(bind.method, MethodOp { addr: 0x03, data: 0x1234 });
        assert_eq!((bind.mailbox.clear, bind.mailbox.ok, bind.mailbox.fail), (0x30, 0x10, 0x20));

        let save = FecsMethod::WfiGoldenSave.command(0);
        assert_eq!((save.mailbox.clear, save.mailbox.ok, save.mailbox.fail), (0x3, 0x1, 0x2));

        assert!(FecsMethod::DiscoverPmImageSize.returns_value());
        assert!(!FecsMethod::SetWatchdogTimeout.returns_value());
        assert!(!FecsMethod::StartCtxsw.allows_sleep());
        assert_eq!(FecsMethod::StartCtxsw.push_addr(), 0x39);
    }
}
