// SPDX-License-Identifier: AGPL-3.0-only

//! Periodic background workers.
//!
//! Each periodic task gets one named thread. A tick never overlaps the
//! previous one on the same thread; ticks missed while a slow tick ran are
//! dropped rather than replayed. Threads sleep with `park_timeout` so that
//! [`Workers::shutdown`] can wake them immediately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::EngineError;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Spawn a named thread calling `tick` every `interval` until `stop` is set
/// or `tick` returns `false`.
///
/// # Errors
/// Returns [`EngineError::InitializationFailure`] if the thread cannot be
/// spawned.
pub fn spawn_periodic<F>(
    name: &str,
    interval: Duration,
    stop: Arc<AtomicBool>,
    mut tick: F,
) -> Result<JoinHandle<()>, EngineError>
where
    F: FnMut() -> bool + Send + 'static,
{
    let interval = interval.max(MIN_INTERVAL);
    let task = name.to_owned();
    thread::Builder::new()
        .name(name.into())
        .spawn(move || {
            let mut next = Instant::now();
            while !stop.load(Ordering::Acquire) {
                let now = Instant::now();
                if now < next {
                    thread::park_timeout(next - now);
                    continue;
                }
                if !tick() {
                    break;
                }
                next += interval;
                let after = Instant::now();
                if next <= after {
                    let behind = (after - next).as_nanos() / interval.as_nanos() + 1;
                    let behind = u32::try_from(behind).unwrap_or(u32::MAX);
                    next += interval.saturating_mul(behind);
                    debug!(task = %task, skipped = behind, "tick overran interval");
                }
            }
            debug!(task = %task, "periodic worker exiting");
        })
        .map_err(|e| EngineError::InitializationFailure(format!("spawn {name}: {e}")))
}

/// Handles of the running periodic workers.
#[derive(Debug, Default)]
pub struct Workers {
    handles: Vec<JoinHandle<()>>,
}

impl Workers {
    pub fn push(&mut self, handle: JoinHandle<()>) {
        self.handles.push(handle);
    }

    /// Wake every worker so it observes its stop flag.
    pub fn wake(&self) {
        for h in &self.handles {
            h.thread().unpark();
        }
    }

    /// Wake and join every worker. The stop flag must already be set.
    pub fn shutdown(self) {
        self.wake();
        for h in self.handles {
            let name = h.thread().name().unwrap_or("worker").to_owned();
            if h.join().is_err() {
                warn!(worker = %name, "worker panicked");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn ticks_until_stopped() {
        let stop = Arc::new(AtomicBool::new(false));
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let mut workers = Workers::default();
        workers.push(
            spawn_periodic("test-tick", Duration::from_millis(5), Arc::clone(&stop), move || {
                c.fetch_add(1, Ordering::Relaxed);
                true
            })
            .unwrap(),
        );
        thread::sleep(Duration::from_millis(60));
        stop.store(true, Ordering::Release);
        workers.shutdown();
        let n = count.load(Ordering::Relaxed);
        assert!(n >= 2, "only {n} ticks");
        thread::sleep(Duration::from_millis(20));
        assert_eq!(count.load(Ordering::Relaxed), n);
    }

    #[test]
    fn slow_ticks_are_not_replayed() {
        let stop = Arc::new(AtomicBool::new(false));
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let handle = spawn_periodic("test-slow", Duration::from_millis(2), Arc::clone(&stop), move || {
            c.fetch_add(1, Ordering::Relaxed);
            thread::sleep(Duration::from_millis(30));
            true
        })
        .unwrap();
        thread::sleep(Duration::from_millis(100));
        stop.store(true, Ordering::Release);
        handle.thread().unpark();
        handle.join().unwrap();
        // 100 ms of 30 ms ticks: at most four ran, never fifty
        assert!(count.load(Ordering::Relaxed) <= 5);
    }

    #[test]
    fn returning_false_ends_worker() {
        let stop = Arc::new(AtomicBool::new(false));
        let handle =
            spawn_periodic("test-once", Duration::from_millis(1), stop, || false).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn shutdown_wakes_long_sleepers() {
        let stop = Arc::new(AtomicBool::new(false));
        let mut workers = Workers::default();
        workers.push(
            spawn_periodic("test-long", Duration::from_secs(60), Arc::clone(&stop), || true)
                .unwrap(),
        );
        thread::sleep(Duration::from_millis(10));
        let start = Instant::now();
        stop.store(true, Ordering::Release);
        workers.shutdown();
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
