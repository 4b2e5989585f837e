//! Channel lookup cache keyed by the FECS current-context word.
//!
//! Interrupt handlers only know the context FECS reports; mapping it back
//! to a channel means scanning every channel's instance block. The last few
//! hits are cached here.
//!
//! Entries are not invalidated when a channel is freed. A hit is checked
//! against the channel table and resolves to `None` once its channel is gone.

use spin::Mutex;

use magma_core::{ChannelId, TsgId};

use crate::falcon::CurrentCtx;
use crate::services::ChannelTable;

/// Cached translations
pub const CHANNEL_TLB_SIZE: usize = 4;

static_assertions::const_assert!(CHANNEL_TLB_SIZE.is_power_of_two());

#[derive(Debug, Clone, Copy)]
struct TlbEntry {
    curr_ctx: u32,
    chid: ChannelId,
    tsgid: TsgId,
}

#[derive(Debug)]
struct TlbState {
    entries: [Option<TlbEntry>; CHANNEL_TLB_SIZE],
    flush_index: usize,
}

/// Current-context to channel translation cache
#[derive(Debug)]
pub struct ChannelTlb {
    state: Mutex<TlbState>,
}

impl Default for ChannelTlb {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelTlb {
    /// Empty cache
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(TlbState {
                entries: [None; CHANNEL_TLB_SIZE],
                flush_index: 0,
            }),
        }
    }

    /// Resolve a current-context word to its channel and TSG
    ///
    /// The valid bit of `ctx` is ignored. Misses are not cached. A hit whose
    /// channel has been freed returns `None` and leaves the entry in place.
    pub fn lookup(&self, ctx: CurrentCtx, channels: &dyn ChannelTable) -> Option<(ChannelId, TsgId)> {
        let mut state = self.state.lock();

        if let Some(hit) = state.entries.iter().flatten().find(|e| e.curr_ctx == ctx.0).copied() {
            if channels.inst_block(hit.chid).is_none() {
                log::trace!("gr: tlb hit ctx 0x{:08x} on freed {}", ctx.0, hit.chid);
                return None;
            }
            return Some((hit.chid, hit.tsgid));
        }

        let chid = (0..channels.num_channels()).map(ChannelId).find(|&chid| {
            channels
                .inst_block(chid)
                .is_some_and(|inst| inst.ptr() == ctx.ptr())
        })?;
        let tsgid = channels.tsg_id(chid);
        let entry = TlbEntry {
            curr_ctx: ctx.0,
            chid,
            tsgid,
        };

        if let Some(slot) = state.entries.iter_mut().find(|e| e.is_none()) {
            *slot = Some(entry);
        } else {
            let index = state.flush_index;
            state.entries[index] = Some(entry);
            state.flush_index = (index + 1) & (CHANNEL_TLB_SIZE - 1);
        }
        log::trace!("gr: tlb fill ctx 0x{:08x} -> {} tsg {}", ctx.0, chid, tsgid.0);
        Some((chid, tsgid))
    }

    /// Drop every cached translation
    pub fn flush(&self) {
        let mut state = self.state.lock();
        state.entries = [None; CHANNEL_TLB_SIZE];
        state.flush_index = 0;
    }
}

static_assertions::assert_impl_all!(ChannelTlb: Send, Sync);
