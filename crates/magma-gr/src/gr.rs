//! # Graphics Engine
//!
//! [`Gr`] ties the engine state of one GPU together: the FECS command
//! interface, the ctxsw gate, the golden image, the channel lookup cache,
//! SM debug control and the global context buffers.
//!
//! ```text
//! ┌──────────────────────────────── Gr ────────────────────────────────┐
//! │  Fecs ◄── CtxswGate      GoldenImage      ChannelTlb               │
//! │    │                         │                 │                   │
//! │    └── mailbox/method ───────┘                 └── ChannelTable    │
//! │                                                                    │
//! │  SmController        PrivAddrDecoder ──► OffsetResolver            │
//! │                                              (golden image)        │
//! └────────────────────────────────────────────────────────────────────┘
//! ```

use alloc::vec::Vec;

use spin::Mutex;

use magma_core::{ChannelId, Error, Result, TsgId};

use crate::config::{GrConfig, GrParams};
use crate::ctx_image::{HwpmMap, OffsetResolver};
use crate::falcon::{CtxImageSizes, CtxswGate, CurrentCtx, Fecs};
use crate::global_ctx::GlobalCtxBuffers;
use crate::golden::{GoldenBootstrap, GoldenImage};
use crate::hw::ChipOps;
use crate::netlist::Netlist;
use crate::pri::PrivAddrDecoder;
use crate::services::{BufferAllocator, GrServices, InstBlock};
use crate::sm::{GlobalEsr, SmController, SmExceptionState};
use crate::tlb::ChannelTlb;

/// Graphics engine of one GPU
pub struct Gr {
    chip: &'static dyn ChipOps,
    config: GrConfig,
    netlist: Netlist,
    params: GrParams,
    services: GrServices,
    fecs: Fecs,
    ctxsw: CtxswGate,
    golden: GoldenImage,
    hwpm: HwpmMap,
    tlb: ChannelTlb,
    sm: SmController,
    global_ctx: Mutex<GlobalCtxBuffers>,
    ctx_sizes: Mutex<Option<CtxImageSizes>>,
    dbg_session: Mutex<()>,
}

impl Gr {
    /// Create the engine state; no hardware is touched
    pub fn new(
        chip: &'static dyn ChipOps,
        config: GrConfig,
        netlist: Netlist,
        params: GrParams,
        services: GrServices,
    ) -> Self {
        let fecs = Fecs::new(
            services.regs.clone(),
            services.clock.clone(),
            services.diag.clone(),
            params.fecs_poll_policy(),
            chip.supports_preemption(),
        );
        let sm = SmController::new(chip, config.clone(), &params, &services);
        let global_ctx = GlobalCtxBuffers::for_chip(chip, &config);
        let hwpm = HwpmMap::new(&netlist.pm_regs);

        log::info!(
            "gr: {} with {} gpcs, {} tpcs, {} sms",
            chip.name(),
            config.gpc_count(),
            config.tpc_count(),
            config.sm_count()
        );
        Self {
            chip,
            config,
            netlist,
            params,
            services,
            fecs,
            ctxsw: CtxswGate::new(),
            golden: GoldenImage::new(),
            hwpm,
            tlb: ChannelTlb::new(),
            sm,
            global_ctx: Mutex::new(global_ctx),
            ctx_sizes: Mutex::new(None),
            dbg_session: Mutex::new(()),
        }
    }

    /// Chip operations
    pub fn chip(&self) -> &'static dyn ChipOps {
        self.chip
    }

    /// Floorswept topology
    pub fn config(&self) -> &GrConfig {
        &self.config
    }

    /// Firmware register tables
    pub fn netlist(&self) -> &Netlist {
        &self.netlist
    }

    /// FECS command interface
    pub fn fecs(&self) -> &Fecs {
        &self.fecs
    }

    /// SM debug control
    pub fn sm(&self) -> &SmController {
        &self.sm
    }

    /// Golden context image
    pub fn golden(&self) -> &GoldenImage {
        &self.golden
    }

    // -------------------------------------------------------------------------
    // Setup
    // -------------------------------------------------------------------------

    /// Query context image sizes from FECS, once
    pub fn init_ctx_state(&self) -> Result<CtxImageSizes> {
        let mut cached = self.ctx_sizes.lock();
        if let Some(sizes) = *cached {
            return Ok(sizes);
        }

        let sizes = self.fecs.discover_ctx_image_sizes()?;
        if let Some(timeout) = self.params.ctxsw_watchdog_timeout {
            self.fecs.set_watchdog_timeout(timeout)?;
        }
        log::debug!("gr: ctx image sizes {:?}", sizes);
        *cached = Some(sizes);
        Ok(sizes)
    }

    /// Allocate the global context buffers
    pub fn alloc_global_ctx_buffers(&self, allocator: &dyn BufferAllocator) -> Result<()> {
        self.global_ctx.lock().alloc(allocator)
    }

    /// Run `f` with the global context buffer table
    pub fn with_global_ctx_buffers<R>(&self, f: impl FnOnce(&GlobalCtxBuffers) -> R) -> R {
        f(&self.global_ctx.lock())
    }

    /// Build the golden image on `inst` if no channel did so yet
    pub fn ensure_golden_image(&self, inst: &InstBlock) -> Result<()> {
        if self.golden.is_ready() {
            return Ok(());
        }
        let sizes = self.init_ctx_state()?;
        let boot = GoldenBootstrap {
            regs: &*self.services.regs,
            clock: &*self.services.clock,
            fecs: &self.fecs,
            init: &*self.services.init,
            netlist: &self.netlist,
            params: &self.params,
            image_size: sizes.golden_image_size,
        };
        self.golden.ensure(&boot, inst)
    }

    /// Release device resources on teardown
    pub fn deinit(&mut self, allocator: &dyn BufferAllocator) {
        self.golden.deinit();
        self.global_ctx.lock().free(allocator);
        self.tlb.flush();
        *self.ctx_sizes.lock() = None;
    }

    // -------------------------------------------------------------------------
    // Context switching
    // -------------------------------------------------------------------------

    /// Hold context switching off; nests
    pub fn disable_ctxsw(&self) -> Result<()> {
        self.ctxsw
            .disable(&self.fecs, &*self.services.pg)
    }

    /// Release one [`Gr::disable_ctxsw`]
    pub fn enable_ctxsw(&self) -> Result<()> {
        self.ctxsw
            .enable(&self.fecs, &*self.services.pg)
    }

    /// Channel and TSG owning a FECS context word
    pub fn chid_from_ctx(&self, ctx: CurrentCtx) -> Option<(ChannelId, TsgId)> {
        self.tlb.lookup(ctx, &*self.services.channels)
    }

    /// Whether `chid`, or a channel of its TSG, is resident on the engine
    pub fn is_channel_ctx_resident(&self, chid: ChannelId) -> bool {
        let current = self.fecs.current_ctx();
        if !current.is_valid() {
            return false;
        }
        let Some((curr_chid, curr_tsgid)) = self.chid_from_ctx(current) else {
            return false;
        };
        log::trace!("gr: resident {} tsg {}", curr_chid, curr_tsgid.0);

        let tsgid = self.services.channels.tsg_id(chid);
        curr_chid == chid || (tsgid.is_valid() && tsgid == curr_tsgid)
    }

    // -------------------------------------------------------------------------
    // Context image queries
    // -------------------------------------------------------------------------

    /// Every saved copy of `addr` in a context image, as (offset, unicast addr)
    ///
    /// A broadcast address expands to one entry per populated unit. With
    /// `max_offsets == 1` only the first unit is resolved.
    pub fn get_ctx_buffer_offsets(
        &self,
        addr: u32,
        max_offsets: u32,
        is_quad: bool,
        quad: u32,
    ) -> Result<Vec<(u32, u32)>> {
        let resolver = OffsetResolver::new(self.chip, &self.config, &self.netlist);
        self.collect_offsets(addr, max_offsets, |unicast| {
            let image = self.golden.golden_image().ok_or(Error::NotInitialized)?;
            resolver.find_priv_offset_in_buffer(unicast, is_quad, quad, image)
        })
    }

    /// Every saved copy of `addr` in the PM context image
    pub fn get_pm_ctx_buffer_offsets(&self, addr: u32, max_offsets: u32) -> Result<Vec<(u32, u32)>> {
        self.collect_offsets(addr, max_offsets, |unicast| self.hwpm.find_priv_offset(unicast))
    }

    fn collect_offsets(
        &self,
        addr: u32,
        max_offsets: u32,
        resolve: impl Fn(u32) -> Result<u32>,
    ) -> Result<Vec<(u32, u32)>> {
        log::trace!("gr: offsets of 0x{:08x}", addr);
        let potential = self.config.potential_offsets();
        if max_offsets > potential {
            log::debug!("gr: max_offsets {} above bound {}", max_offsets, potential);
            return Err(Error::InvalidParameter);
        }
        if !self.golden.is_ready() {
            return Err(Error::NotInitialized);
        }

        let table = PrivAddrDecoder::new(self.chip, &self.config).build_table(addr)?;
        if table.len() > max_offsets as usize && max_offsets > 1 {
            log::debug!("gr: {} priv addrs do not fit {} offsets", table.len(), max_offsets);
            return Err(Error::ResourceExhausted);
        }
        let count = if max_offsets == 1 { 1 } else { table.len() };

        let mut offsets = Vec::with_capacity(count);
        for &unicast in table.iter().take(count) {
            let offset = resolve(unicast).inspect_err(|_| log::debug!("gr: no saved copy of 0x{:08x}", unicast))?;
            offsets.push((offset, unicast));
        }

        if offsets.is_empty() {
            return Err(Error::NotFound);
        }
        Ok(offsets)
    }

    // -------------------------------------------------------------------------
    // Debugger sessions
    // -------------------------------------------------------------------------

    /// Stop the SMs for a debugger session's channels
    ///
    /// With ctxsw held off, a channel whose context is on the engine gets its
    /// SMs locked down and every other channel has its TSG disabled. Returns
    /// the resident channel, if any.
    pub fn suspend_contexts(&self, channels: &[ChannelId]) -> Result<Option<ChannelId>> {
        self.for_session_channels(channels, |chid, resident| {
            if resident {
                if let Err(err) = self.sm.suspend_all_sms(GlobalEsr::empty(), false) {
                    log::warn!("gr: {} sms not suspended: {:?}", chid, err);
                }
            } else {
                self.services.channels.disable_tsg(chid);
            }
        })
    }

    /// Undo [`Gr::suspend_contexts`]
    pub fn resume_contexts(&self, channels: &[ChannelId]) -> Result<Option<ChannelId>> {
        self.for_session_channels(channels, |chid, resident| {
            if resident {
                self.sm.resume_all_sms();
            } else {
                self.services.channels.enable_tsg(chid);
            }
        })
    }

    fn for_session_channels(
        &self,
        channels: &[ChannelId],
        mut f: impl FnMut(ChannelId, bool),
    ) -> Result<Option<ChannelId>> {
        let _session = self.dbg_session.lock();

        self.disable_ctxsw()
            .inspect_err(|_| log::error!("gr: unable to stop ctxsw"))?;

        let mut resident_chid = None;
        for &chid in channels {
            let resident = self.is_channel_ctx_resident(chid);
            f(chid, resident);
            if resident {
                resident_chid = Some(chid);
            }
        }

        self.enable_ctxsw()
            .inspect_err(|_| log::error!("gr: unable to restart ctxsw!"))?;
        Ok(resident_chid)
    }

    // -------------------------------------------------------------------------
    // SM exceptions
    // -------------------------------------------------------------------------

    /// Handle an SM exception and wake debugger clients when asked to
    pub fn handle_sm_exception(&self, gpc: u32, tpc: u32, sm: u32) -> Result<SmExceptionState> {
        let state = self.sm.handle_sm_exception(gpc, tpc, sm)?;
        if state.post_event {
            self.sm.post_bpt_events(state.global_esr);
        }
        Ok(state)
    }
}

impl core::fmt::Debug for Gr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Gr")
            .field("chip", &self.chip.name())
            .field("config", &self.config)
            .field("fecs", &self.fecs)
            .field("ctxsw", &self.ctxsw)
            .field("golden_ready", &self.golden.is_ready())
            .finish_non_exhaustive()
    }
}

static_assertions::assert_impl_all!(Gr: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::regs::{fe, fecs, method, sm};
    use crate::hw::GM20B;
    use crate::netlist::AivEntry;
    use crate::sm::BptEvent;
    use crate::testing::{CtxImageBuilder, FakeAllocator, FakeChannels, FakeServices};
    use std::vec;

    fn netlist() -> Netlist {
        let l = GM20B.litter();
        let mut netlist = Netlist::default();
        netlist.ctxsw_regs.tpc = [
            AivEntry { addr: l.tpc_addr(0x044, 0, 0), index: 0, value: 0 },
            AivEntry { addr: l.tpc_addr(0x048, 0, 0), index: 4, value: 0 },
        ]
        .into();
        netlist.pm_regs = [
            AivEntry { addr: l.tpc_addr(0x048, 0, 1), index: 0x14, value: 0 },
            AivEntry { addr: l.tpc_addr(0x048, 0, 0), index: 0x10, value: 0 },
        ]
        .into();
        netlist
    }

    fn gr(fake: &FakeServices) -> Gr {
        let config = GrConfig::new(GM20B.litter(), &[2], &[1]).unwrap();
        Gr::new(&GM20B, config, netlist(), GrParams::DEFAULT, fake.services())
    }

    fn script_bootstrap(fake: &FakeServices) {
        let mut image = CtxImageBuilder::new().sys_segment(0x1).gpc(0x2, 2, 1, 0x1).build();
        image.resize(0x400, 0);
        fake.init.set_image(image);

        let regs = &fake.regs;
        regs.auto_clear(fe::PWR_MODE, fe::PWR_MODE_REQ_SEND);
        regs.reply_to_method(method::DISCOVER_IMAGE_SIZE, 0, 0x400);
        regs.reply_to_method(method::DISCOVER_ZCULL_IMAGE_SIZE, 0, 0x100);
        regs.reply_to_method(method::DISCOVER_PM_IMAGE_SIZE, 0, 0x100);
        regs.reply_to_method(method::BIND_POINTER, 0, 0x10);
        regs.reply_to_method(method::WFI_GOLDEN_SAVE, 0, 0x1);
    }

    #[test]
    fn test_ctxsw_gate_through_fecs() {
        let fake = FakeServices::new();
        script_ctxsw(&fake);
        let gr = gr(&fake);

        gr.disable_ctxsw().unwrap();
        gr.disable_ctxsw().unwrap();
        gr.enable_ctxsw().unwrap();
        assert!(!fake.regs.pushed(method::START_CTXSW));
        gr.enable_ctxsw().unwrap();
        assert!(fake.regs.pushed(method::START_CTXSW));
        assert_eq!((fake.pg.disables(), fake.pg.enables()), (1, 1));
    }

    #[test]
    fn test_golden_image_then_offsets() {
        let fake = FakeServices::new();
        script_bootstrap(&fake);
        let gr = gr(&fake);
        let l = GM20B.litter();
        let broadcast = l.gpc_shared_base + l.tpc_in_gpc_shared_base + 0x048;

        assert_eq!(gr.get_ctx_buffer_offsets(broadcast, 2, false, 0), Err(Error::NotInitialized));

        gr.ensure_golden_image(&FakeChannels::inst_block_of(0)).unwrap();
        assert_eq!(gr.golden().golden_image_size(), 0x400);
        assert_eq!(gr.init_ctx_state().unwrap().golden_image_size, 0x400);

        assert_eq!(
            gr.get_ctx_buffer_offsets(broadcast, 2, false, 0),
            Ok(vec![
                (0x200 + 8, l.tpc_addr(0x048, 0, 0)),
                (0x200 + 12, l.tpc_addr(0x048, 0, 1)),
            ])
        );
        assert_eq!(
            gr.get_ctx_buffer_offsets(broadcast, 1, false, 0),
            Ok(vec![(0x200 + 8, l.tpc_addr(0x048, 0, 0))])
        );
        assert_eq!(gr.get_ctx_buffer_offsets(broadcast, 3, false, 0), Err(Error::InvalidParameter));
        assert_eq!(gr.get_ctx_buffer_offsets(l.tpc_addr(0x04c, 0, 0), 2, false, 0), Err(Error::NotFound));
    }

    #[test]
    fn test_channel_residency() {
        let fake = FakeServices::new();
        let gr = gr(&fake);
        let inst = FakeChannels::inst_block_of(3);

        assert!(!gr.is_channel_ctx_resident(ChannelId(3)));
        fake.regs.set(fecs::CURRENT_CTX, inst.current_ctx().0);
        assert!(gr.is_channel_ctx_resident(ChannelId(3)));
        assert!(!gr.is_channel_ctx_resident(ChannelId(2)));
        assert_eq!(gr.chid_from_ctx(inst.current_ctx()), Some((ChannelId(3), TsgId(3))));
    }

    #[test]
    fn test_sm_exception_posts_events() {
        let fake = FakeServices::new();
        let gr = gr(&fake);
        let r = GM20B.sm_regs();
        fake.regs.set(r.dbgr_control0, sm::DBGR_CONTROL0_DEBUGGER_MODE_ON);
        fake.regs.set(r.hww_global_esr, (GlobalEsr::BPT_INT | GlobalEsr::BPT_PAUSE).bits());

        let state = gr.handle_sm_exception(0, 0, 0).unwrap();
        assert!(state.post_event);
        assert_eq!(fake.debugger.events(), vec![BptEvent::Int, BptEvent::Pause]);
    }

    #[test]
    fn test_deinit_releases_buffers() {
        let fake = FakeServices::new();
        let mut gr = gr(&fake);
        let allocator = FakeAllocator::default();

        gr.alloc_global_ctx_buffers(&allocator).unwrap();
        assert!(gr.with_global_ctx_buffers(GlobalCtxBuffers::is_allocated));
        gr.deinit(&allocator);
        assert_eq!(allocator.live(), 0);
        assert!(!gr.golden().is_ready());
    }

    #[test]
    fn test_pm_offsets_need_golden_image() {
        let fake = FakeServices::new();
        script_bootstrap(&fake);
        let gr = gr(&fake);
        let l = GM20B.litter();
        let broadcast = l.gpc_shared_base + l.tpc_in_gpc_shared_base + 0x048;

        assert_eq!(gr.get_pm_ctx_buffer_offsets(broadcast, 2), Err(Error::NotInitialized));
        gr.ensure_golden_image(&FakeChannels::inst_block_of(0)).unwrap();

        assert_eq!(
            gr.get_pm_ctx_buffer_offsets(broadcast, 2),
            Ok(vec![(0x10, l.tpc_addr(0x048, 0, 0)), (0x14, l.tpc_addr(0x048, 0, 1))])
        );
        assert_eq!(gr.get_pm_ctx_buffer_offsets(l.tpc_addr(0x044, 0, 0), 1), Err(Error::NotFound));
        assert_eq!(gr.get_pm_ctx_buffer_offsets(broadcast, 3), Err(Error::InvalidParameter));
    }

    fn script_ctxsw(fake: &FakeServices) {
        fake.regs
            .reply_to_method(method::STOP_CTXSW, 1, fecs::MAILBOX_VALUE_PASS);
        fake.regs
            .reply_to_method(method::START_CTXSW, 1, fecs::MAILBOX_VALUE_PASS);
    }

    #[test]
    fn test_suspend_and_resume_contexts() {
        let fake = FakeServices::new();
        script_ctxsw(&fake);
        let gr = gr(&fake);
        let r = GM20B.sm_regs();
        let tpc1 = GM20B.litter().tpc_in_gpc_stride;
        fake.regs.set(r.dbgr_control0, sm::DBGR_CONTROL0_DEBUGGER_MODE_ON);
        fake.regs.set(r.dbgr_status0, sm::DBGR_STATUS0_LOCKED_DOWN);
        fake.regs.set(r.dbgr_status0 + tpc1, sm::DBGR_STATUS0_LOCKED_DOWN);
        fake.regs
            .set(fecs::CURRENT_CTX, FakeChannels::inst_block_of(3).current_ctx().0);
        let session = [ChannelId(2), ChannelId(3)];

        assert_eq!(gr.suspend_contexts(&session), Ok(Some(ChannelId(3))));
        assert_eq!(fake.channels.tsg_ops(), vec![(ChannelId(2), false)]);
        let control0 = fake.regs.get(r.gpcs_tpcs_dbgr_control0);
        assert_ne!(control0 & sm::DBGR_CONTROL0_STOP_TRIGGER_ENABLE, 0);

        assert_eq!(gr.resume_contexts(&session), Ok(Some(ChannelId(3))));
        assert_eq!(fake.channels.tsg_ops(), vec![(ChannelId(2), false), (ChannelId(2), true)]);
        let control0 = fake.regs.get(r.gpcs_tpcs_dbgr_control0);
        assert_eq!(control0 & sm::DBGR_CONTROL0_STOP_TRIGGER_ENABLE, 0);
        assert_ne!(control0 & sm::DBGR_CONTROL0_RUN_TRIGGER_TASK, 0);

        assert_eq!((fake.pg.disables(), fake.pg.enables()), (2, 2));
        assert_eq!(gr.ctxsw.disable_count(), 0);
    }

    #[test]
    fn test_suspend_contexts_without_ctxsw_stop() {
        let fake = FakeServices::new();
        fake.pg.fail_disable(true);
        let gr = gr(&fake);

        assert!(gr.suspend_contexts(&[ChannelId(1)]).is_err());
        assert!(fake.channels.tsg_ops().is_empty());
        assert!(!fake.regs.pushed(method::STOP_CTXSW));
    }
}
