// SPDX-License-Identifier: AGPL-3.0-only

//! Parallel windowed proof-of-work search.
//!
//! One rayon task per candidate point; each checks `window` consecutive
//! nonces from its point, wrapping at 2^32. Workers poll a shared `found`
//! flag and the engine stop flag before every check, so all of them stop
//! within one digest of the first success. The first worker to win the
//! compare-and-swap on `found` records its nonce; which one wins a tie is
//! not specified.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use rayon::ThreadPool;
use tracing::{debug, info};

use crate::config::SearchConfig;
use crate::error::EngineError;
use crate::header::{BlockHeader, PowHasher};
use crate::metrics::MetricsRegistry;

/// Result of one search with its cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchOutcome {
    pub nonce: Option<u32>,
    pub hashes: u64,
    pub elapsed: Duration,
    /// The engine stop flag ended the search early.
    pub cancelled: bool,
}

/// Searches candidate windows on a dedicated worker pool.
pub struct ParallelSearchExecutor {
    pool: ThreadPool,
    stop: Arc<AtomicBool>,
    metrics: Arc<MetricsRegistry>,
}

impl ParallelSearchExecutor {
    /// Build the worker pool. `stop` is the engine's cancellation flag.
    ///
    /// # Errors
    /// Returns [`EngineError::InitializationFailure`] if the pool cannot be
    /// created.
    pub fn new(
        config: &SearchConfig,
        stop: Arc<AtomicBool>,
        metrics: Arc<MetricsRegistry>,
    ) -> Result<Self, EngineError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .thread_name(|i| format!("pow-search-{i}"))
            .build()
            .map_err(|e| EngineError::InitializationFailure(format!("search pool: {e}")))?;
        debug!(threads = pool.current_num_threads(), "search pool ready");
        Ok(Self {
            pool,
            stop,
            metrics,
        })
    }

    #[must_use]
    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// First nonce found in any window that meets `difficulty`.
    pub fn search(
        &self,
        header: &BlockHeader,
        difficulty: u32,
        candidates: &[u32],
        window_size: u32,
    ) -> Option<u32> {
        self.run(header, difficulty, candidates, window_size).nonce
    }

    /// [`search`](Self::search) with hash count and timing.
    pub fn run(
        &self,
        header: &BlockHeader,
        difficulty: u32,
        candidates: &[u32],
        window_size: u32,
    ) -> SearchOutcome {
        let start = Instant::now();
        let hasher = PowHasher::new(header);
        let found = AtomicBool::new(false);
        let winner = AtomicU32::new(0);
        let hashes = AtomicU64::new(0);
        let stop = &*self.stop;

        self.pool.install(|| {
            candidates.par_iter().with_max_len(1).for_each(|&point| {
                let mut checked = 0_u64;
                for offset in 0..window_size {
                    if found.load(Ordering::Relaxed) || stop.load(Ordering::Relaxed) {
                        break;
                    }
                    let nonce = point.wrapping_add(offset);
                    checked += 1;
                    if hasher.meets(nonce, difficulty) {
                        if found
                            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                            .is_ok()
                        {
                            winner.store(nonce, Ordering::Release);
                        }
                        break;
                    }
                }
                hashes.fetch_add(checked, Ordering::Relaxed);
            });
        });

        let hashes = hashes.into_inner();
        self.metrics.add_hashes(hashes);
        let nonce = found.into_inner().then(|| winner.into_inner());
        let outcome = SearchOutcome {
            nonce,
            hashes,
            elapsed: start.elapsed(),
            cancelled: nonce.is_none() && stop.load(Ordering::Relaxed),
        };
        match outcome.nonce {
            Some(n) => info!(
                nonce = n,
                hashes,
                ms = outcome.elapsed.as_millis(),
                "search found nonce"
            ),
            None => debug!(hashes, cancelled = outcome.cancelled, "search exhausted"),
        }
        outcome
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::header::validate_nonce_candidate;

    fn header() -> BlockHeader {
        let z = "0".repeat(64);
        BlockHeader::parse(&format!("1|{z}|{z}|1700000000|1d00ffff|0")).unwrap()
    }

    fn executor(threads: usize) -> (ParallelSearchExecutor, Arc<AtomicBool>, Arc<MetricsRegistry>) {
        let stop = Arc::new(AtomicBool::new(false));
        let metrics = Arc::new(MetricsRegistry::new());
        let ex = ParallelSearchExecutor::new(
            &SearchConfig { threads },
            Arc::clone(&stop),
            Arc::clone(&metrics),
        )
        .unwrap();
        (ex, stop, metrics)
    }

    fn first_solution(h: &BlockHeader, difficulty: u32) -> u32 {
        (0..u32::MAX)
            .find(|&n| validate_nonce_candidate(h, difficulty, n))
            .unwrap()
    }

    #[test]
    fn finds_nonce_inside_window() {
        let h = header();
        let target = first_solution(&h, 6);
        let (ex, _, metrics) = executor(4);
        let start = target.saturating_sub(10);
        let found = ex.search(&h, 6, &[start, 3_000_000_000], 64).unwrap();
        assert!(validate_nonce_candidate(&h, 6, found));
        assert!(metrics.hashes_computed() > 0);
    }

    #[test]
    fn empty_windows_find_nothing() {
        let (ex, _, _) = executor(2);
        let out = ex.run(&header(), 1, &[], 1024);
        assert_eq!(out.nonce, None);
        assert_eq!(out.hashes, 0);
        let out = ex.run(&header(), 1, &[5, 6], 0);
        assert_eq!(out.nonce, None);
    }

    #[test]
    fn zero_difficulty_accepts_first_nonce() {
        let (ex, _, _) = executor(1);
        assert_eq!(ex.search(&header(), 0, &[42], 8), Some(42));
    }

    #[test]
    fn impossible_difficulty_exhausts_windows() {
        let (ex, _, _) = executor(2);
        let out = ex.run(&header(), 257, &[0, 1000], 16);
        assert_eq!(out.nonce, None);
        assert_eq!(out.hashes, 32);
        assert!(!out.cancelled);
    }

    #[test]
    fn stop_flag_cancels() {
        let (ex, stop, _) = executor(2);
        stop.store(true, Ordering::Relaxed);
        let out = ex.run(&header(), 257, &[0, 1 << 20], 1 << 20);
        assert_eq!(out.hashes, 0);
        assert!(out.cancelled);
    }

    #[test]
    fn windows_wrap_at_top_of_nonce_space() {
        let (ex, _, _) = executor(1);
        let out = ex.run(&header(), 257, &[u32::MAX - 1], 4);
        assert_eq!(out.hashes, 4);
    }
}
