//! Epoch ticker backing execution deadlines.
//!
//! Every store gets an epoch deadline of `ceil(timeout / EPOCH_TICK) + 1`
//! ticks; a background thread advances the engine epoch once per tick, so a
//! guest that never yields traps with `Trap::Interrupt` once its budget is
//! spent.
//!
//! The ticker runs at an arbitrary phase relative to the store, so the first
//! tick may land almost immediately. The extra tick makes the timeout a lower
//! bound: a run is interrupted after at least `timeout` and at most
//! `timeout + EPOCH_TICK`, plus scheduling jitter.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use wasmtime::Engine;

/// Interval between epoch increments.
pub(crate) const EPOCH_TICK: Duration = Duration::from_millis(10);

/// Number of ticks a store may run before its deadline expires, including
/// one tick for the unknown phase of the ticker.
pub(crate) fn deadline_ticks(timeout_ms: u64) -> u64 {
    let tick_ms = EPOCH_TICK.as_millis() as u64;
    timeout_ms.div_ceil(tick_ms).max(1) + 1
}

/// Background thread incrementing one engine's epoch until dropped.
pub(crate) struct EpochTicker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl EpochTicker {
    pub(crate) fn start(engine: Engine) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_bg = Arc::clone(&stop);

        let handle = std::thread::Builder::new()
            .name("duet-epoch-ticker".to_string())
            .spawn(move || {
                while !stop_bg.load(Ordering::Acquire) {
                    std::thread::park_timeout(EPOCH_TICK);
                    engine.increment_epoch();
                }
            })?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }
}

impl Drop for EpochTicker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                tracing::warn!("epoch ticker thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_ticks_round_up() {
        assert_eq!(deadline_ticks(0), 2);
        assert_eq!(deadline_ticks(1), 2);
        assert_eq!(deadline_ticks(10), 2);
        assert_eq!(deadline_ticks(11), 3);
        assert_eq!(deadline_ticks(1_000), 101);
    }

    #[test]
    fn test_deadline_never_shorter_than_timeout() {
        // Even if the first tick lands right away, the remaining ticks still
        // cover the whole timeout.
        for timeout_ms in [1, 5, 9, 10, 25, 50, 999] {
            let guaranteed = (deadline_ticks(timeout_ms) - 1) * EPOCH_TICK.as_millis() as u64;
            assert!(guaranteed >= timeout_ms, "timeout {timeout_ms} ms");
        }
    }

    #[test]
    fn test_ticker_stops_on_drop() {
        let mut config = wasmtime::Config::new();
        config.epoch_interruption(true);
        let engine = Engine::new(&config).expect("engine");
        let ticker = EpochTicker::start(engine).expect("ticker");
        std::thread::sleep(EPOCH_TICK * 3);
        drop(ticker);
    }
}
