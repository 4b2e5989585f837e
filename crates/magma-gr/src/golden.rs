//! # Golden Context Image
//!
//! Every new graphics context starts as a copy of the golden image: the
//! context FECS saves after the engine has been brought into its canonical
//! state once. The bootstrap runs on the first channel that needs a
//! context; later callers wait for it and reuse the result.
//!
//! ```text
//!  FE power on ─► context reset ─► FE power auto ─► bind channel
//!        ─► sw ctx load ─► [preemption] ─► go-idle off
//!        ─► commit buffers/timeslice/fs ─► sw bundles ─► go-idle restore
//!        ─► sw methods ─► zcull ─► golden save ─► read image
//! ```
//!
//! A failed bootstrap leaves the image uninitialized. Hardware state is
//! not rolled back.

use alloc::vec;
use alloc::vec::Vec;

use spin::{Mutex, Once};

use magma_core::{Error, Result};
use magma_hal::{Clock, PollPolicy, RegisterIo};

use crate::config::GrParams;
use crate::falcon::Fecs;
use crate::hw::regs::{fe, fecs, mme, pipe};
use crate::netlist::Netlist;
use crate::services::{GrInitOps, InstBlock};

/// Delay after each context reset control write
const CTXSW_RESET_DELAY_US: u32 = 10;

// =============================================================================
// BOOTSTRAP SEQUENCE
// =============================================================================

/// Collaborators of one bootstrap run
#[derive(Clone, Copy)]
pub struct GoldenBootstrap<'a> {
    /// BAR0 register access
    pub regs: &'a dyn RegisterIo,
    /// Time source
    pub clock: &'a dyn Clock,
    /// FECS command interface
    pub fecs: &'a Fecs,
    /// Engine setup owned by other layers
    pub init: &'a dyn GrInitOps,
    /// Register tables to replay
    pub netlist: &'a Netlist,
    /// Device tunables
    pub params: &'a GrParams,
    /// Golden image size reported by FECS
    pub image_size: u32,
}

impl GoldenBootstrap<'_> {
    /// Run the full sequence on `inst` and return the saved image
    pub fn run(&self, inst: &InstBlock) -> Result<Vec<u8>> {
        if self.image_size == 0 {
            log::error!("gr: golden image size unknown");
            return Err(Error::NotInitialized);
        }

        self.fe_pwr_mode(fe::PWR_MODE_MODE_FORCE_ON)?;
        self.reset_context();
        self.fe_pwr_mode(fe::PWR_MODE_MODE_AUTO)?;

        self.fecs.bind_channel(inst)?;
        self.init.wait_idle()?;

        for entry in &self.netlist.sw_ctx_load {
            self.regs.write32(entry.addr, entry.value);
        }
        if let Some(timeout) = self.params.preempt_ctxsw_timeout {
            self.init.init_preemption_state(timeout)?;
        }
        self.init.wait_idle()?;

        self.regs
            .write32(fe::GO_IDLE_TIMEOUT, fe::GO_IDLE_TIMEOUT_COUNT_DISABLED);
        let bundles = self.commit_and_load_bundles();
        // go-idle is restored whatever happened above
        self.regs
            .write32(fe::GO_IDLE_TIMEOUT, fe::GO_IDLE_TIMEOUT_COUNT_PROD);
        bundles?;

        self.load_sw_methods();
        self.init.init_zcull()?;

        self.fecs.save_golden_image(inst)?;
        let mut image = vec![0u8; self.image_size as usize];
        self.init.read_context_image(&mut image)?;
        self.fecs.set_current_ctx_invalid();
        Ok(image)
    }

    fn fe_pwr_mode(&self, mode: u32) -> Result<()> {
        self.regs.write32(fe::PWR_MODE, fe::PWR_MODE_REQ_SEND | mode);

        let policy = PollPolicy::new(
            fe::PWR_MODE_POLL_DELAY_US,
            fe::PWR_MODE_POLL_DELAY_US,
            fe::PWR_MODE_TIMEOUT_US,
        );
        let mut poller = policy.start(self.clock);
        loop {
            if self.regs.read32(fe::PWR_MODE) & fe::PWR_MODE_REQ_SEND == 0 {
                return Ok(());
            }
            if poller.expired() {
                log::error!("gr: timeout setting FE power mode 0x{:x}", mode);
                return Err(Error::Timeout);
            }
            poller.wait(false);
        }
    }

    fn reset_context(&self) {
        self.regs
            .write32(fecs::CTXSW_RESET_CTL, fecs::CTXSW_RESET_CTL_CONTEXT_RESET_ENABLED);
        let _ = self.regs.read32(fecs::CTXSW_RESET_CTL);
        self.clock.delay_us(CTXSW_RESET_DELAY_US);

        self.regs
            .write32(fecs::CTXSW_RESET_CTL, fecs::CTXSW_RESET_CTL_CONTEXT_RESET_DISABLED);
        let _ = self.regs.read32(fecs::CTXSW_RESET_CTL);
        self.clock.delay_us(CTXSW_RESET_DELAY_US);
    }

    fn commit_and_load_bundles(&self) -> Result<()> {
        self.init.commit_global_ctx_buffers()?;
        self.init.commit_global_timeslice()?;
        self.init.init_fs_state()?;
        self.init.wait_idle()?;
        self.load_sw_bundles()
    }

    fn load_sw_bundles(&self) -> Result<()> {
        self.regs
            .write32(pipe::BUNDLE_CONFIG, pipe::BUNDLE_CONFIG_OVERRIDE_PIPE_MODE_ENABLED);
        let replayed = self.replay_bundles();
        self.regs.write32(pipe::BUNDLE_CONFIG, 0);
        replayed?;
        self.init.wait_idle()
    }

    fn replay_bundles(&self) -> Result<()> {
        let mut last_data = None;
        for bundle in &self.netlist.sw_bundle_init {
            if last_data != Some(bundle.value) {
                self.regs.write32(pipe::BUNDLE_DATA, bundle.value);
                last_data = Some(bundle.value);
            }
            self.send_bundle(bundle.addr)?;
        }
        for bundle in &self.netlist.sw_bundle64_init {
            self.regs.write32(pipe::BUNDLE_DATA, bundle.value_lo);
            self.regs.write32(pipe::BUNDLE_DATA_HI, bundle.value_hi);
            self.send_bundle(bundle.addr)?;
        }
        for bundle in &self.netlist.sw_veid_bundle_init {
            self.regs.write32(pipe::BUNDLE_DATA, bundle.value);
            self.send_bundle(bundle.addr)?;
        }
        Ok(())
    }

    fn send_bundle(&self, addr: u32) -> Result<()> {
        self.regs.write32(pipe::BUNDLE_ADDRESS, addr);
        if addr & pipe::BUNDLE_ADDRESS_VALUE_MASK == pipe::GO_IDLE_BUNDLE {
            self.init.wait_idle()?;
        }
        Ok(())
    }

    fn load_sw_methods(&self) {
        let mut last_data = None;
        for method in &self.netlist.sw_method_init {
            if last_data != Some(method.value) {
                self.regs.write32(mme::SHADOW_RAW_DATA, method.value);
                last_data = Some(method.value);
            }
            self.regs
                .write32(mme::SHADOW_RAW_INDEX, method.addr | mme::SHADOW_RAW_INDEX_WRITE_TRIGGER);
        }
    }
}

impl core::fmt::Debug for GoldenBootstrap<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GoldenBootstrap")
            .field("image_size", &self.image_size)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// GOLDEN IMAGE
// =============================================================================

/// Saved golden context, built once per device
#[derive(Debug, Default)]
pub struct GoldenImage {
    bootstrap: Mutex<()>,
    data: Once<Vec<u8>>,
}

impl GoldenImage {
    /// Image not yet built
    pub const fn new() -> Self {
        Self {
            bootstrap: Mutex::new(()),
            data: Once::new(),
        }
    }

    /// Whether the image has been built
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.data.is_completed()
    }

    /// Build the image on first use
    ///
    /// Concurrent callers block until the first one finishes; only one of
    /// them runs the bootstrap.
    pub fn ensure(&self, boot: &GoldenBootstrap<'_>, inst: &InstBlock) -> Result<()> {
        if self.is_ready() {
            return Ok(());
        }

        let _guard = self.bootstrap.lock();
        if self.is_ready() {
            return Ok(());
        }

        log::info!("gr: building golden context image on {:?}", inst.addr);
        let image = boot
            .run(inst)
            .inspect_err(|err| log::error!("gr: golden image bootstrap failed: {:?}", err))?;
        self.data.call_once(|| image);
        log::info!("gr: golden context image ready, {} bytes", self.golden_image_size());
        Ok(())
    }

    /// Saved image bytes, once built
    #[inline]
    pub fn golden_image(&self) -> Option<&[u8]> {
        self.data.get().map(Vec::as_slice)
    }

    /// Saved image size, 0 before the bootstrap
    #[inline]
    pub fn golden_image_size(&self) -> usize {
        self.golden_image().map_or(0, <[u8]>::len)
    }

    /// Drop the image on device teardown
    pub fn deinit(&mut self) {
        self.data = Once::new();
    }
}

static_assertions::assert_impl_all!(GoldenImage: Send, Sync);
