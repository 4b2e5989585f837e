//! Fakes for unit tests: a scripted register file, host collaborators and
//! a context image builder.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::vec;
use std::vec::Vec;

use magma_core::{ByteSize, ChannelId, Error, PhysAddr, Result, TsgId};
use magma_hal::{ManualClock, RegisterIo};

use crate::global_ctx::GlobalCtxBufferKind;
use crate::hw::regs::fecs;
use crate::hw::CtxswProgLayout;
use crate::services::{
    BufferAllocator, BufferHandle, ChannelTable, DebuggerHost, Diagnostics, GrInitOps, GrServices, InstBlock,
    PowerGating,
};
use crate::sm::{BptEvent, SmErrorReport};

// =============================================================================
// REGISTERS
// =============================================================================

/// Journaled register access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegOp {
    /// Read of an offset
    Read(u32),
    /// Write of an offset and value
    Write(u32, u32),
}

#[derive(Default)]
struct RegState {
    values: HashMap<u32, u32>,
    scripts: HashMap<u32, VecDeque<u32>>,
    reads: HashMap<u32, usize>,
    journal: Vec<RegOp>,
    replies: Vec<(u32, u32, u32)>,
    auto_clear: HashMap<u32, u32>,
}

/// Register file backed by a map
///
/// Scripted reads are returned first, then the stored value. A write to a
/// FECS mailbox clear register clears bits of that mailbox, and a method
/// push can trigger a canned ucode reply.
#[derive(Default)]
pub struct FakeRegs {
    state: Mutex<RegState>,
}

impl FakeRegs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, offset: u32, value: u32) {
        self.state.lock().unwrap().values.insert(offset, value);
    }

    pub fn get(&self, offset: u32) -> u32 {
        self.state.lock().unwrap().values.get(&offset).copied().unwrap_or(0)
    }

    pub fn script(&self, offset: u32, values: &[u32]) {
        self.state
            .lock()
            .unwrap()
            .scripts
            .entry(offset)
            .or_default()
            .extend(values.iter().copied());
    }

    pub fn read_count(&self, offset: u32) -> usize {
        self.state.lock().unwrap().reads.get(&offset).copied().unwrap_or(0)
    }

    pub fn writes(&self) -> Vec<RegOp> {
        self.state
            .lock()
            .unwrap()
            .journal
            .iter()
            .filter(|op| matches!(op, RegOp::Write(..)))
            .copied()
            .collect()
    }

    /// Answer a push of `method` by storing `value` in mailbox `mailbox`
    pub fn reply_to_method(&self, method: u32, mailbox: u32, value: u32) {
        self.state.lock().unwrap().replies.push((method, mailbox, value));
    }

    /// Clear `mask` in `offset` as soon as it is written
    pub fn auto_clear(&self, offset: u32, mask: u32) {
        self.state.lock().unwrap().auto_clear.insert(offset, mask);
    }

    /// Last pushed method and the method data that went with it
    pub fn last_push(&self) -> Option<(u32, u32)> {
        let state = self.state.lock().unwrap();
        let mut data = 0;
        let mut last = None;
        for op in &state.journal {
            match *op {
                RegOp::Write(fecs::METHOD_DATA, value) => data = value,
                RegOp::Write(fecs::METHOD_PUSH, method) => last = Some((method, data)),
                _ => {}
            }
        }
        last
    }

    pub fn pushed(&self, method: u32) -> bool {
        self.state
            .lock()
            .unwrap()
            .journal
            .contains(&RegOp::Write(fecs::METHOD_PUSH, method))
    }
}

fn mailbox_clear_index(offset: u32) -> Option<u32> {
    (0..fecs::CTXSW_MAILBOX_COUNT as u32).find(|&i| fecs::ctxsw_mailbox_clear(i) == offset)
}

impl RegisterIo for FakeRegs {
    fn read32(&self, offset: u32) -> u32 {
        let mut state = self.state.lock().unwrap();
        state.journal.push(RegOp::Read(offset));
        *state.reads.entry(offset).or_default() += 1;
        if let Some(value) = state.scripts.get_mut(&offset).and_then(VecDeque::pop_front) {
            return value;
        }
        state.values.get(&offset).copied().unwrap_or(0)
    }

    fn write32(&self, offset: u32, value: u32) {
        let mut state = self.state.lock().unwrap();
        state.journal.push(RegOp::Write(offset, value));

        if let Some(id) = mailbox_clear_index(offset) {
            *state.values.entry(fecs::ctxsw_mailbox(id)).or_default() &= !value;
            return;
        }

        let cleared = state.auto_clear.get(&offset).copied().unwrap_or(0);
        state.values.insert(offset, value & !cleared);

        if offset == fecs::METHOD_PUSH {
            let replies: Vec<_> = state
                .replies
                .iter()
                .filter(|(method, _, _)| *method == value)
                .map(|&(_, mailbox, reply)| (mailbox, reply))
                .collect();
            for (mailbox, reply) in replies {
                state.values.insert(fecs::ctxsw_mailbox(mailbox), reply);
            }
        }
    }
}

// =============================================================================
// COLLABORATORS
// =============================================================================

#[derive(Default)]
pub struct FakeDiag {
    dumps: AtomicUsize,
    reports: Mutex<Vec<SmErrorReport>>,
}

impl FakeDiag {
    pub fn falcon_dumps(&self) -> usize {
        self.dumps.load(Ordering::SeqCst)
    }

    pub fn sm_reports(&self) -> Vec<SmErrorReport> {
        self.reports.lock().unwrap().clone()
    }
}

impl Diagnostics for FakeDiag {
    fn dump_falcon_stats(&self) {
        self.dumps.fetch_add(1, Ordering::SeqCst);
    }

    fn report_sm_exception(&self, report: &SmErrorReport) {
        self.reports.lock().unwrap().push(*report);
    }
}

#[derive(Default)]
pub struct FakePg {
    disables: AtomicUsize,
    enables: AtomicUsize,
    fail_disable: AtomicBool,
}

impl FakePg {
    pub fn disables(&self) -> usize {
        self.disables.load(Ordering::SeqCst)
    }

    pub fn enables(&self) -> usize {
        self.enables.load(Ordering::SeqCst)
    }

    pub fn fail_disable(&self, fail: bool) {
        self.fail_disable.store(fail, Ordering::SeqCst);
    }
}

impl PowerGating for FakePg {
    fn elpg_disable(&self) -> Result<()> {
        if self.fail_disable.load(Ordering::SeqCst) {
            return Err(Error::Timeout);
        }
        self.disables.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn elpg_enable(&self) -> Result<()> {
        self.enables.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Channel `n` owns the instance block at `0x10_0000 + n * 0x1000`, TSG `n`
#[derive(Default)]
pub struct FakeChannels {
    live: Mutex<Vec<bool>>,
    inst_block_calls: AtomicUsize,
    tsg_ops: Mutex<Vec<(ChannelId, bool)>>,
}

impl FakeChannels {
    pub fn with_channels(count: u32) -> Self {
        Self {
            live: Mutex::new(vec![true; count as usize]),
            inst_block_calls: AtomicUsize::new(0),
            tsg_ops: Mutex::new(Vec::new()),
        }
    }

    pub fn inst_block_of(chid: u32) -> InstBlock {
        InstBlock::vidmem(PhysAddr::new(0x10_0000 + u64::from(chid) * 0x1000))
    }

    pub fn free(&self, chid: ChannelId) {
        self.live.lock().unwrap()[chid.0 as usize] = false;
    }

    pub fn inst_block_calls(&self) -> usize {
        self.inst_block_calls.load(Ordering::SeqCst)
    }

    /// TSG enable (`true`) and disable (`false`) calls, in order
    pub fn tsg_ops(&self) -> Vec<(ChannelId, bool)> {
        self.tsg_ops.lock().unwrap().clone()
    }
}

impl ChannelTable for FakeChannels {
    fn num_channels(&self) -> u32 {
        self.live.lock().unwrap().len() as u32
    }

    fn inst_block(&self, chid: ChannelId) -> Option<InstBlock> {
        self.inst_block_calls.fetch_add(1, Ordering::SeqCst);
        let live = self.live.lock().unwrap();
        live.get(chid.0 as usize)
            .copied()
            .unwrap_or(false)
            .then(|| Self::inst_block_of(chid.0))
    }

    fn tsg_id(&self, chid: ChannelId) -> TsgId {
        TsgId(chid.0)
    }

    fn disable_tsg(&self, chid: ChannelId) {
        self.tsg_ops.lock().unwrap().push((chid, false));
    }

    fn enable_tsg(&self, chid: ChannelId) {
        self.tsg_ops.lock().unwrap().push((chid, true));
    }
}

#[derive(Default)]
pub struct FakeDebugger {
    mmu_fault_pending: AtomicBool,
    events: Mutex<Vec<BptEvent>>,
}

impl FakeDebugger {
    pub fn set_mmu_fault_pending(&self, pending: bool) {
        self.mmu_fault_pending.store(pending, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<BptEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl DebuggerHost for FakeDebugger {
    fn mmu_fault_pending(&self) -> bool {
        self.mmu_fault_pending.load(Ordering::SeqCst)
    }

    fn post_bpt_event(&self, event: BptEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Bootstrap step seen by [`FakeInitOps`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitCall {
    WaitIdle,
    CommitGlobalCtxBuffers,
    CommitGlobalTimeslice,
    InitFsState,
    InitPreemptionState(u32),
    InitZcull,
    ReadContextImage,
}

pub struct FakeInitOps {
    fill: u8,
    image: Mutex<Vec<u8>>,
    calls: Mutex<Vec<InitCall>>,
    fail_wait_idle_at: AtomicUsize,
}

impl FakeInitOps {
    /// Context image reads return `fill` in every byte
    pub fn new(fill: u8) -> Self {
        Self {
            fill,
            image: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            fail_wait_idle_at: AtomicUsize::new(0),
        }
    }

    /// Context image reads start with `image`, the rest is filled
    pub fn set_image(&self, image: Vec<u8>) {
        *self.image.lock().unwrap() = image;
    }

    pub fn calls(&self) -> Vec<InitCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Fail the `n`th wait for idle, counting from 1
    pub fn fail_wait_idle_at(&self, n: usize) {
        self.fail_wait_idle_at.store(n, Ordering::SeqCst);
    }

    pub fn read_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|&&c| c == InitCall::ReadContextImage)
            .count()
    }

    fn record(&self, call: InitCall) -> usize {
        let mut calls = self.calls.lock().unwrap();
        calls.push(call);
        calls.iter().filter(|&&c| c == call).count()
    }
}

impl GrInitOps for FakeInitOps {
    fn wait_idle(&self) -> Result<()> {
        let n = self.record(InitCall::WaitIdle);
        if n == self.fail_wait_idle_at.load(Ordering::SeqCst) {
            return Err(Error::Timeout);
        }
        Ok(())
    }

    fn commit_global_ctx_buffers(&self) -> Result<()> {
        self.record(InitCall::CommitGlobalCtxBuffers);
        Ok(())
    }

    fn commit_global_timeslice(&self) -> Result<()> {
        self.record(InitCall::CommitGlobalTimeslice);
        Ok(())
    }

    fn init_fs_state(&self) -> Result<()> {
        self.record(InitCall::InitFsState);
        Ok(())
    }

    fn init_preemption_state(&self, timeout: u32) -> Result<()> {
        self.record(InitCall::InitPreemptionState(timeout));
        Ok(())
    }

    fn init_zcull(&self) -> Result<()> {
        self.record(InitCall::InitZcull);
        Ok(())
    }

    fn read_context_image(&self, out: &mut [u8]) -> Result<()> {
        self.record(InitCall::ReadContextImage);
        out.fill(self.fill);
        let image = self.image.lock().unwrap();
        let n = image.len().min(out.len());
        out[..n].copy_from_slice(&image[..n]);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeAllocator {
    live: Mutex<Vec<BufferHandle>>,
    allocs: AtomicUsize,
    fail_after: AtomicUsize,
}

impl FakeAllocator {
    pub fn live(&self) -> usize {
        self.live.lock().unwrap().len()
    }

    /// Fail every allocation after the first `n`
    pub fn fail_after(&self, n: usize) {
        self.fail_after.store(n, Ordering::SeqCst);
    }
}

impl BufferAllocator for FakeAllocator {
    fn alloc(&self, kind: GlobalCtxBufferKind, size: ByteSize) -> Result<BufferHandle> {
        let n = self.allocs.fetch_add(1, Ordering::SeqCst);
        let limit = self.fail_after.load(Ordering::SeqCst);
        if limit != 0 && n >= limit {
            return Err(Error::OutOfMemory);
        }
        let handle = BufferHandle {
            kind,
            addr: PhysAddr::new(0x1_0000_0000 + n as u64 * 0x100_0000),
            size,
        };
        self.live.lock().unwrap().push(handle);
        Ok(handle)
    }

    fn free(&self, handle: BufferHandle) {
        self.live.lock().unwrap().retain(|h| *h != handle);
    }
}

/// Every fake, plus the service bundle built from them
pub struct FakeServices {
    pub regs: Arc<FakeRegs>,
    pub clock: Arc<ManualClock>,
    pub pg: Arc<FakePg>,
    pub channels: Arc<FakeChannels>,
    pub diag: Arc<FakeDiag>,
    pub debugger: Arc<FakeDebugger>,
    pub init: Arc<FakeInitOps>,
}

impl FakeServices {
    pub fn new() -> Self {
        Self {
            regs: Arc::new(FakeRegs::new()),
            clock: Arc::new(ManualClock::new()),
            pg: Arc::new(FakePg::default()),
            channels: Arc::new(FakeChannels::with_channels(8)),
            diag: Arc::new(FakeDiag::default()),
            debugger: Arc::new(FakeDebugger::default()),
            init: Arc::new(FakeInitOps::new(0)),
        }
    }

    pub fn services(&self) -> GrServices {
        GrServices {
            regs: self.regs.clone(),
            clock: self.clock.clone(),
            pg: self.pg.clone(),
            channels: self.channels.clone(),
            diag: self.diag.clone(),
            debugger: self.debugger.clone(),
            init: self.init.clone(),
        }
    }
}

// =============================================================================
// CONTEXT IMAGES
// =============================================================================

/// Builds context images with valid headers and zeroed register data
pub struct CtxImageBuilder {
    layout: CtxswProgLayout,
    sys_segment: u32,
    gpcs: Vec<(u32, u32, u32, u32)>,
    extended: (u32, u32),
}

impl CtxImageBuilder {
    pub fn new() -> Self {
        Self {
            layout: CtxswProgLayout::DEFAULT,
            sys_segment: 0,
            gpcs: Vec::new(),
            extended: (0, 0),
        }
    }

    /// FECS register segment, in 256 byte units
    pub fn sys_segment(mut self, segment: u32) -> Self {
        self.sys_segment = segment;
        self
    }

    /// Append a GPC header
    pub fn gpc(mut self, priv_segment: u32, num_tpcs: u32, num_ppcs: u32, ppc_mask: u32) -> Self {
        self.gpcs.push((priv_segment, num_tpcs, num_ppcs, ppc_mask));
        self
    }

    /// Extended buffer offset (256 byte units) and size
    pub fn extended(mut self, offset: u32, size: u32) -> Self {
        self.extended = (offset, size);
        self
    }

    pub fn build(self) -> Vec<u8> {
        let l = &self.layout;
        let len = l.fecs_header_size + (self.gpcs.len() as u32 + 1) * l.gpccs_header_size;
        let mut image = vec![0u8; len as usize];
        let mut put = |offset: u32, value: u32| {
            let at = offset as usize;
            image[at..at + 4].copy_from_slice(&value.to_le_bytes());
        };

        put(l.magic_offset, l.main_image_magic);
        put(l.main_num_gpcs_offset, self.gpcs.len() as u32);
        put(l.main_extended_buffer_ctl_offset, self.extended.0 | (self.extended.1 << 16));

        let fecs = l.fecs_header_size;
        put(fecs + l.magic_offset, l.local_image_magic);
        put(fecs + l.local_priv_register_ctl_offset, self.sys_segment);

        for (i, &(segment, tpcs, ppcs, mask)) in self.gpcs.iter().enumerate() {
            let base = l.fecs_header_size + (i as u32 + 1) * l.gpccs_header_size;
            put(base + l.magic_offset, l.local_image_magic);
            put(base + l.local_priv_register_ctl_offset, segment);
            put(base + l.local_ppc_info_offset, ppcs | (mask << 16));
            put(base + l.local_num_tpcs_offset, tpcs);
        }
        image
    }
}
