//! Register offsets and field encodings of the PGRAPH blocks the engine
//! core touches directly.
//!
//! Offsets are BAR0 byte offsets and identical for every supported
//! generation unless a chip overrides them through [`super::SmRegs`].

/// FECS falcon: ctxsw mailboxes, method interface, current context
pub mod fecs {
    /// Number of ctxsw mailbox registers
    pub const CTXSW_MAILBOX_COUNT: usize = 16;

    /// Ctxsw mailbox `i`
    #[inline]
    pub const fn ctxsw_mailbox(i: u32) -> u32 {
        0x0040_9800 + i * 4
    }

    /// Write-one-to-clear companion of mailbox `i`
    #[inline]
    pub const fn ctxsw_mailbox_clear(i: u32) -> u32 {
        0x0040_9840 + i * 4
    }

    /// Method data
    pub const METHOD_DATA: u32 = 0x0040_9500;
    /// Method push, writing the method address starts the method
    pub const METHOD_PUSH: u32 = 0x0040_9504;
    /// Address field of METHOD_PUSH
    pub const METHOD_PUSH_ADR_MASK: u32 = 0x0000_0fff;

    /// Currently resident context
    pub const CURRENT_CTX: u32 = 0x0040_9b00;
    /// Instance block pointer field (4 KiB frame number)
    pub const CURRENT_CTX_PTR_MASK: u32 = 0x0fff_ffff;
    /// Aperture target field
    pub const CURRENT_CTX_TARGET_SHIFT: u32 = 28;
    /// Valid bit
    pub const CURRENT_CTX_VALID: u32 = 1 << 31;
    /// Target encodings
    pub const CURRENT_CTX_TARGET_VID_MEM: u32 = 0;
    /// Coherent system memory target
    pub const CURRENT_CTX_TARGET_SYS_MEM_COH: u32 = 2;
    /// Non-coherent system memory target
    pub const CURRENT_CTX_TARGET_SYS_MEM_NCOH: u32 = 3;

    /// Ctxsw reset control
    pub const CTXSW_RESET_CTL: u32 = 0x0040_9614;
    /// Assert context reset in SYS, GPC and BE, leave halt/engine reset off
    pub const CTXSW_RESET_CTL_CONTEXT_RESET_ENABLED: u32 = 0x0000_0000;
    /// Deassert context reset everywhere
    pub const CTXSW_RESET_CTL_CONTEXT_RESET_DISABLED: u32 = 0x0000_0700;

    /// Mailbox value ucode writes on success
    pub const MAILBOX_VALUE_PASS: u32 = 0x1;
    /// Mailbox value ucode writes on failure
    pub const MAILBOX_VALUE_FAIL: u32 = 0x2;
}

/// Method push addresses understood by the FECS ctxsw ucode
pub mod method {
    /// Bind an instance block as the current context
    pub const BIND_POINTER: u32 = 0x03;
    /// Halt the graphics pipeline
    pub const HALT_PIPELINE: u32 = 0x04;
    /// Wait for idle, then save the golden context image
    pub const WFI_GOLDEN_SAVE: u32 = 0x09;
    /// Query the size of a graphics context image
    pub const DISCOVER_IMAGE_SIZE: u32 = 0x10;
    /// Query the zcull context size
    pub const DISCOVER_ZCULL_IMAGE_SIZE: u32 = 0x16;
    /// Query the preemption context size
    pub const DISCOVER_PREEMPTION_IMAGE_SIZE: u32 = 0x1a;
    /// Program the ctxsw watchdog
    pub const SET_WATCHDOG_TIMEOUT: u32 = 0x21;
    /// Query the perfmon context size
    pub const DISCOVER_PM_IMAGE_SIZE: u32 = 0x25;
    /// Query the register list size
    pub const DISCOVER_REGLIST_IMAGE_SIZE: u32 = 0x30;
    /// Bind the register list instance
    pub const SET_REGLIST_BIND_INSTANCE: u32 = 0x31;
    /// Set the register list virtual address
    pub const SET_REGLIST_VIRTUAL_ADDRESS: u32 = 0x32;
    /// Stop context switching
    pub const STOP_CTXSW: u32 = 0x38;
    /// Start context switching
    pub const START_CTXSW: u32 = 0x39;
}

/// Front end power mode and go-idle timeout
pub mod fe {
    /// FE power mode control
    pub const PWR_MODE: u32 = 0x0040_4170;
    /// Request bit, self clears when the mode change is done
    pub const PWR_MODE_REQ_SEND: u32 = 1 << 4;
    /// Force the FE powered on
    pub const PWR_MODE_MODE_FORCE_ON: u32 = 0x2;
    /// Hardware managed power
    pub const PWR_MODE_MODE_AUTO: u32 = 0x0;
    /// Busy-wait between power mode polls
    pub const PWR_MODE_POLL_DELAY_US: u32 = 10;
    /// Power mode change deadline
    pub const PWR_MODE_TIMEOUT_US: u64 = 2_000;

    /// FE go idle timeout
    pub const GO_IDLE_TIMEOUT: u32 = 0x0040_4154;
    /// Production timeout count
    pub const GO_IDLE_TIMEOUT_COUNT_PROD: u32 = 0x0000_0800;
    /// Timeout disabled
    pub const GO_IDLE_TIMEOUT_COUNT_DISABLED: u32 = 0x0;
}

/// Pipe bundle interface used to replay bundle init tables
pub mod pipe {
    /// Bundle address, writing it commits the bundle
    pub const BUNDLE_ADDRESS: u32 = 0x0040_0200;
    /// Bundle data
    pub const BUNDLE_DATA: u32 = 0x0040_0204;
    /// Upper 32 bits of 64-bit bundle data
    pub const BUNDLE_DATA_HI: u32 = 0x0040_020c;
    /// Bundle config
    pub const BUNDLE_CONFIG: u32 = 0x0040_0208;
    /// Override pipe mode while bundles are replayed
    pub const BUNDLE_CONFIG_OVERRIDE_PIPE_MODE_ENABLED: u32 = 1 << 31;
    /// Address value field of BUNDLE_ADDRESS
    pub const BUNDLE_ADDRESS_VALUE_MASK: u32 = 0x0000_ffff;
    /// Bundle that needs a full engine idle after it
    pub const GO_IDLE_BUNDLE: u32 = 0x0000_e100;
}

/// MME shadow RAM used to replay method init tables
pub mod mme {
    /// Shadow RAM index
    pub const SHADOW_RAW_INDEX: u32 = 0x0040_4488;
    /// Shadow RAM data
    pub const SHADOW_RAW_DATA: u32 = 0x0040_448c;
    /// Commit the data word at the written index
    pub const SHADOW_RAW_INDEX_WRITE_TRIGGER: u32 = 1 << 31;
}

/// SM debugger fields, shared by every generation
pub mod sm {
    /// dbgr_control0: debugger mode on
    pub const DBGR_CONTROL0_DEBUGGER_MODE_ON: u32 = 1 << 0;
    /// dbgr_control0: stop on any warp
    pub const DBGR_CONTROL0_STOP_ON_ANY_WARP: u32 = 1 << 1;
    /// dbgr_control0: stop on any SM
    pub const DBGR_CONTROL0_STOP_ON_ANY_SM: u32 = 1 << 2;
    /// dbgr_control0: run trigger
    pub const DBGR_CONTROL0_RUN_TRIGGER_TASK: u32 = 1 << 30;
    /// dbgr_control0: stop trigger
    pub const DBGR_CONTROL0_STOP_TRIGGER_ENABLE: u32 = 1 << 31;

    /// dbgr_status0: SM reached lock-down
    pub const DBGR_STATUS0_LOCKED_DOWN: u32 = 1 << 4;

    /// hww_warp_esr: error field
    pub const HWW_WARP_ESR_ERROR_MASK: u32 = 0x0000_ffff;
    /// hww_warp_esr: no error
    pub const HWW_WARP_ESR_ERROR_NONE: u32 = 0;

    /// tpc_exception_en: SM exception forwarding
    pub const TPC_EXCEPTION_EN_SM: u32 = 1 << 1;
}
