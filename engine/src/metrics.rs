// SPDX-License-Identifier: AGPL-3.0-only

//! Lock-free counters for hash rate, per-source success, and accuracy.
//!
//! Every counter is an atomic; [`MetricsRegistry::snapshot`] reads them into
//! a plain serializable [`MetricsSnapshot`] with the derived rates filled in.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::predictor::PredictorId;

/// Successful predictions are reported per this many hashes.
const EFFICIENCY_PER_HASHES: f64 = 1e6;

#[derive(Debug, Default)]
struct SourceCounters {
    selected: AtomicU64,
    succeeded: AtomicU64,
    produced: AtomicU64,
    failed: AtomicU64,
}

impl SourceCounters {
    fn success_rate(&self) -> f64 {
        ratio(
            self.succeeded.load(Ordering::Relaxed),
            self.selected.load(Ordering::Relaxed),
        )
    }
}

/// Thread-safe metrics shared by the coordinator, search, and runtime.
#[derive(Debug)]
pub struct MetricsRegistry {
    started: Instant,
    total_attempts: AtomicU64,
    successful_predictions: AtomicU64,
    biological_predictions: AtomicU64,
    fused_predictions: AtomicU64,
    hashes_computed: AtomicU64,
    solutions_found: AtomicU64,
    knowledge_transfers: AtomicU64,
    cycles_skipped: AtomicU64,
    sources: [SourceCounters; 3],
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            total_attempts: AtomicU64::new(0),
            successful_predictions: AtomicU64::new(0),
            biological_predictions: AtomicU64::new(0),
            fused_predictions: AtomicU64::new(0),
            hashes_computed: AtomicU64::new(0),
            solutions_found: AtomicU64::new(0),
            knowledge_transfers: AtomicU64::new(0),
            cycles_skipped: AtomicU64::new(0),
            sources: Default::default(),
        }
    }

    fn source(&self, id: PredictorId) -> &SourceCounters {
        &self.sources[id.index()]
    }

    /// A fused prediction was produced; `bio_contributed` when the signal
    /// backend returned a real prediction rather than a placeholder.
    pub fn record_fused(&self, bio_contributed: bool) {
        self.fused_predictions.fetch_add(1, Ordering::Relaxed);
        if bio_contributed {
            self.biological_predictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// A predictor produced a real prediction (`ok`) or failed/timed out.
    pub fn record_source_result(&self, id: PredictorId, ok: bool) {
        let c = self.source(id);
        if ok {
            c.produced.fetch_add(1, Ordering::Relaxed);
        } else {
            c.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// A fused prediction was validated. `credited` is the source whose
    /// outcome this counts toward, if a single one was responsible.
    pub fn record_validation(&self, credited: Option<PredictorId>, success: bool) {
        self.total_attempts.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_predictions.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(id) = credited {
            let c = self.source(id);
            c.selected.fetch_add(1, Ordering::Relaxed);
            if success {
                c.succeeded.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn add_hashes(&self, n: u64) {
        self.hashes_computed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_solution(&self) {
        self.solutions_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transfer(&self) {
        self.knowledge_transfers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped_cycle(&self) {
        self.cycles_skipped.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn hashes_computed(&self) -> u64 {
        self.hashes_computed.load(Ordering::Relaxed)
    }

    /// Point-in-time copy with derived rates.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let uptime = self.started.elapsed().as_secs_f64();
        let total = self.total_attempts.load(Ordering::Relaxed);
        let successes = self.successful_predictions.load(Ordering::Relaxed);
        let hashes = self.hashes_computed.load(Ordering::Relaxed);
        let per_source = |id: PredictorId| {
            let c = self.source(id);
            SourceSnapshot {
                produced: c.produced.load(Ordering::Relaxed),
                failed: c.failed.load(Ordering::Relaxed),
                selected: c.selected.load(Ordering::Relaxed),
                succeeded: c.succeeded.load(Ordering::Relaxed),
                success_rate: c.success_rate(),
            }
        };
        MetricsSnapshot {
            uptime_secs: uptime,
            total_attempts: total,
            successful_predictions: successes,
            biological_predictions: self.biological_predictions.load(Ordering::Relaxed),
            fused_predictions: self.fused_predictions.load(Ordering::Relaxed),
            accuracy: ratio(successes, total),
            sha: per_source(PredictorId::Sha),
            network: per_source(PredictorId::Network),
            bio: per_source(PredictorId::Bio),
            hashes_computed: hashes,
            solutions_found: self.solutions_found.load(Ordering::Relaxed),
            knowledge_transfers: self.knowledge_transfers.load(Ordering::Relaxed),
            cycles_skipped: self.cycles_skipped.load(Ordering::Relaxed),
            hybrid_hash_rate: if uptime > 0.0 {
                hashes as f64 / uptime
            } else {
                0.0
            },
            energy_efficiency: if hashes == 0 {
                0.0
            } else {
                successes as f64 * EFFICIENCY_PER_HASHES / hashes as f64
            },
        }
    }
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Counters for one predictor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SourceSnapshot {
    pub produced: u64,
    pub failed: u64,
    pub selected: u64,
    pub succeeded: u64,
    pub success_rate: f64,
}

/// Serializable metrics view for the control surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: f64,
    pub total_attempts: u64,
    pub successful_predictions: u64,
    pub biological_predictions: u64,
    pub fused_predictions: u64,
    /// `successful_predictions / total_attempts`.
    pub accuracy: f64,
    pub sha: SourceSnapshot,
    pub network: SourceSnapshot,
    pub bio: SourceSnapshot,
    pub hashes_computed: u64,
    pub solutions_found: u64,
    pub knowledge_transfers: u64,
    pub cycles_skipped: u64,
    /// Hashes per second since the registry was created.
    pub hybrid_hash_rate: f64,
    /// Successful predictions per million hashes.
    pub energy_efficiency: f64,
}
