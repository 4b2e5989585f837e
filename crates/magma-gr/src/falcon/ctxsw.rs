//! Reference-counted context switch gate.
//!
//! Several users may need ctxsw held off at once (register access through
//! the context image, SM debugging, golden image capture). Only the first
//! disable stops the ucode and only the last enable restarts it.

use spin::Mutex;

use magma_core::Result;

use super::{Fecs, FecsMethod};
use crate::services::PowerGating;

/// Ucode-side start/stop of context switching
pub trait CtxswControl: Send + Sync {
    /// Stop context switching
    fn stop_ctxsw(&self) -> Result<()>;

    /// Resume context switching
    fn start_ctxsw(&self) -> Result<()>;
}

impl CtxswControl for Fecs {
    fn stop_ctxsw(&self) -> Result<()> {
        self.ctrl_ctxsw(FecsMethod::StopCtxsw, 0).map(drop)
    }

    fn start_ctxsw(&self) -> Result<()> {
        self.ctrl_ctxsw(FecsMethod::StartCtxsw, 0).map(drop)
    }
}

/// Counted ctxsw disable
#[derive(Debug, Default)]
pub struct CtxswGate {
    disable_count: Mutex<u32>,
}

impl CtxswGate {
    /// Gate with context switching enabled
    pub const fn new() -> Self {
        Self {
            disable_count: Mutex::new(0),
        }
    }

    /// Current nesting depth
    pub fn disable_count(&self) -> u32 {
        *self.disable_count.lock()
    }

    /// Hold context switching off
    ///
    /// On the first disable power gating is turned off and the ucode is
    /// stopped. If either step fails the count is restored.
    pub fn disable(&self, ctxsw: &dyn CtxswControl, pg: &dyn PowerGating) -> Result<()> {
        let mut count = self.disable_count.lock();
        *count += 1;
        if *count != 1 {
            log::trace!("ctxsw: already disabled, depth {}", *count);
            return Ok(());
        }

        let stopped = pg.elpg_disable().and_then(|()| ctxsw.stop_ctxsw());
        if let Err(err) = stopped {
            log::error!("ctxsw: stop failed: {:?}", err);
            *count -= 1;
            return Err(err);
        }
        log::debug!("ctxsw: disabled");
        Ok(())
    }

    /// Release one disable
    ///
    /// An unbalanced enable is tolerated and only logged.
    pub fn enable(&self, ctxsw: &dyn CtxswControl, pg: &dyn PowerGating) -> Result<()> {
        let mut count = self.disable_count.lock();
        if *count == 0 {
            log::warn!("ctxsw: enable without matching disable");
            return Ok(());
        }

        *count -= 1;
        if *count != 0 {
            log::trace!("ctxsw: still disabled, depth {}", *count);
            return Ok(());
        }

        if let Err(err) = ctxsw.start_ctxsw() {
            log::error!("ctxsw: start failed: {:?}", err);
            return Err(err);
        }
        if let Err(err) = pg.elpg_enable() {
            log::warn!("ctxsw: elpg enable failed: {:?}", err);
        }
        log::debug!("ctxsw: enabled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePg;
    use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use magma_core::Error;

    #[derive(Default)]
    struct FakeCtxsw {
        stops: AtomicU32,
        starts: AtomicU32,
        fail_stop: AtomicBool,
        fail_start: AtomicBool,
    }

    impl CtxswControl for FakeCtxsw {
        fn stop_ctxsw(&self) -> Result<()> {
            if self.fail_stop.load(Ordering::Relaxed) {
                return Err(Error::Timeout);
            }
            self.stops.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        fn start_ctxsw(&self) -> Result<()> {
            if self.fail_start.load(Ordering::Relaxed) {
                return Err(Error::UcodeError);
            }
            self.starts.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    #[test]
    fn test_nested_disable_stops_once() {
        let gate = CtxswGate::new();
        let ctxsw = FakeCtxsw::default();
        let pg = FakePg::default();

        gate.disable(&ctxsw, &pg).unwrap();
        gate.disable(&ctxsw, &pg).unwrap();
        assert_eq!(gate.disable_count(), 2);
        assert_eq!(ctxsw.stops.load(Ordering::Relaxed), 1);
        assert_eq!(pg.disables(), 1);

        gate.enable(&ctxsw, &pg).unwrap();
        assert_eq!(ctxsw.starts.load(Ordering::Relaxed), 0);
        gate.enable(&ctxsw, &pg).unwrap();
        assert_eq!(ctxsw.starts.load(Ordering::Relaxed), 1);
        assert_eq!(pg.enables(), 1);
        assert_eq!(gate.disable_count(), 0);
    }

    #[test]
    fn test_failed_stop_rolls_back() {
        let gate = CtxswGate::new();
        let ctxsw = FakeCtxsw::default();
        ctxsw.fail_stop.store(true, Ordering::Relaxed);
        let pg = FakePg::default();

        assert_eq!(gate.disable(&ctxsw, &pg), Err(Error::Timeout));
        assert_eq!(gate.disable_count(), 0);
    }

    #[test]
    fn test_unbalanced_enable_is_noop() {
        let gate = CtxswGate::new();
        let ctxsw = FakeCtxsw::default();
        let pg = FakePg::default();

        assert_eq!(gate.enable(&ctxsw, &pg), Ok(()));
        assert_eq!(gate.disable_count(), 0);
        assert_eq!(ctxsw.starts.load(Ordering::Relaxed), 0);
        assert_eq!(pg.enables(), 0);
    }

    #[test]
    fn test_elpg_failure_on_disable_rolls_back() {
        let gate = CtxswGate::new();
        let ctxsw = FakeCtxsw::default();
        let pg = FakePg::default();
        pg.fail_disable(true);

        assert!(gate.disable(&ctxsw, &pg).is_err());
        assert_eq!(gate.disable_count(), 0);
        assert_eq!(ctxsw.stops.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_concurrent_pairs_balance() {
        const THREADS: usize = 8;
        let gate = CtxswGate::new();
        let ctxsw = FakeCtxsw::default();
        let pg = FakePg::default();
        let all_disabled = std::sync::Barrier::new(THREADS);

        std::thread::scope(|s| {
            for _ in 0..THREADS {
                s.spawn(|| {
                    gate.disable(&ctxsw, &pg).unwrap();
                    all_disabled.wait();
                    gate.enable(&ctxsw, &pg).unwrap();
                });
            }
        });

        assert_eq!(ctxsw.stops.load(Ordering::Relaxed), 1);
        assert_eq!(ctxsw.starts.load(Ordering::Relaxed), 1);
        assert_eq!((pg.disables(), pg.enables()), (1, 1));
        assert_eq!(gate.disable_count(), 0);
    }

    #[test]
    fn test_failed_start_propagates_and_releases() {
        let gate = CtxswGate::new();
        let ctxsw = FakeCtxsw::default();
        let pg = FakePg::default();

        gate.disable(&ctxsw, &pg).unwrap();
        ctxsw.fail_start.store(true, Ordering::Relaxed);
        assert_eq!(gate.enable(&ctxsw, &pg), Err(Error::UcodeError));
        assert_eq!(gate.disable_count(), 0);
        assert_eq!(pg.enables(), 0);

        // the next disable stops the ucode again
        ctxsw.fail_start.store(false, Ordering::Relaxed);
        gate.disable(&ctxsw, &pg).unwrap();
        assert_eq!(ctxsw.stops.load(Ordering::Relaxed), 2);
    }
}
