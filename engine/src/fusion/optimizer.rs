// SPDX-License-Identifier: AGPL-3.0-only

//! Weight re-estimation from validated outcomes.
//!
//! Efficiency of a source is `successes / attempts` over the validated
//! records it was credited with, within the most recent `window` validated
//! records. New weights blend toward the normalized efficiencies by an
//! exponential moving average and are renormalized.

use crate::config::OptimizerConfig;
use crate::predictor::PredictorId;
use crate::tolerances::NEUTRAL_EFFICIENCY;

use super::{FusedPrediction, Weights};

/// Per-source efficiency over the latest `window` validated records.
///
/// Fewer than `min_records` validated records, or a source never credited,
/// gives [`NEUTRAL_EFFICIENCY`].
pub fn source_efficiencies<'a, I>(records: I, window: usize, min_records: usize) -> [f64; 3]
where
    I: DoubleEndedIterator<Item = &'a FusedPrediction>,
{
    let mut attempts = [0_u32; 3];
    let mut successes = [0_u32; 3];
    let mut seen = 0;
    for r in records.rev().filter(|r| r.validated).take(window) {
        seen += 1;
        if let Some(id) = r.credited_source() {
            attempts[id.index()] += 1;
            if r.was_successful == Some(true) {
                successes[id.index()] += 1;
            }
        }
    }
    if seen < min_records {
        return [NEUTRAL_EFFICIENCY; 3];
    }
    PredictorId::ALL.map(|id| {
        let i = id.index();
        if attempts[i] == 0 {
            NEUTRAL_EFFICIENCY
        } else {
            f64::from(successes[i]) / f64::from(attempts[i])
        }
    })
}

/// Exponential-moving-average weight updater.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveWeightOptimizer {
    config: OptimizerConfig,
}

impl AdaptiveWeightOptimizer {
    #[must_use]
    pub const fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// New weights from `current` and the prediction history.
    ///
    /// The result is always non-negative and sums to one.
    #[must_use]
    pub fn recompute<'a, I>(&self, current: Weights, history: I) -> Weights
    where
        I: DoubleEndedIterator<Item = &'a FusedPrediction>,
    {
        let eff = source_efficiencies(history, self.config.window, self.config.min_records);
        let target = Weights::from_array(eff).normalized().to_array();
        let current = current.normalized().to_array();
        let rate = self.config.adaptation_rate.clamp(0.0, 1.0);
        let blended = [0, 1, 2].map(|i| (1.0 - rate).mul_add(current[i], rate * target[i]));
        Weights::from_array(blended).normalized()
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use super::*;
    use crate::fusion::SelectedMethod;
    use crate::header::BlockHeader;
    use crate::predictor::Prediction;

    fn record(selected: PredictorId, success: Option<bool>) -> FusedPrediction {
        let z = "0".repeat(64);
        FusedPrediction {
            header: BlockHeader {
                version: 1,
                prev_hash: z.clone(),
                merkle_root: z,
                timestamp: 0,
                bits: 0x1d00_ffff,
                nonce: 0,
            },
            difficulty: 1,
            predictions: PredictorId::ALL.map(|id| Prediction::placeholder(id, Duration::ZERO)),
            fused_value: 0,
            fused_confidence: 0.0,
            selected_method: SelectedMethod::Source(selected),
            timestamp: SystemTime::UNIX_EPOCH,
            validated: success.is_some(),
            was_successful: success,
            actual_success_source: None,
        }
    }

    fn optimizer() -> AdaptiveWeightOptimizer {
        AdaptiveWeightOptimizer::new(OptimizerConfig::default())
    }

    #[test]
    fn too_few_records_is_neutral() {
        let h: Vec<_> = (0..5).map(|_| record(PredictorId::Sha, Some(true))).collect();
        assert_eq!(source_efficiencies(h.iter(), 100, 10), [NEUTRAL_EFFICIENCY; 3]);
    }

    #[test]
    fn efficiency_counts_only_selected_source() {
        let mut h: Vec<_> = (0..8).map(|_| record(PredictorId::Sha, Some(true))).collect();
        h.extend((0..4).map(|_| record(PredictorId::Network, Some(false))));
        h.push(record(PredictorId::Bio, None));
        let eff = source_efficiencies(h.iter(), 100, 10);
        assert!((eff[0] - 1.0).abs() < f64::EPSILON);
        assert!(eff[1].abs() < f64::EPSILON);
        assert!((eff[2] - NEUTRAL_EFFICIENCY).abs() < f64::EPSILON);
    }

    #[test]
    fn window_keeps_most_recent() {
        let mut h: Vec<_> = (0..50).map(|_| record(PredictorId::Sha, Some(false))).collect();
        h.extend((0..20).map(|_| record(PredictorId::Sha, Some(true))));
        let eff = source_efficiencies(h.iter(), 20, 10);
        assert!((eff[0] - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn recompute_preserves_weight_invariant() {
        let opt = optimizer();
        let mut h: Vec<_> = (0..30).map(|_| record(PredictorId::Bio, Some(true))).collect();
        h.extend((0..30).map(|_| record(PredictorId::Sha, Some(false))));
        let mut w = Weights::default();
        for _ in 0..200 {
            w = opt.recompute(w, h.iter());
            assert!(w.is_normalized(), "{w:?}");
        }
        assert!(w.bio > w.network && w.network > w.sha);
    }

    #[test]
    fn recompute_repairs_denormalized_input() {
        let w = optimizer().recompute(
            Weights {
                sha: 5.0,
                network: -1.0,
                bio: f64::NAN,
            },
            std::iter::empty(),
        );
        assert!(w.is_normalized());
    }

    #[test]
    fn neutral_history_moves_toward_uniform() {
        let w = optimizer().recompute(Weights::default(), std::iter::empty());
        assert!(w.sha < 0.4);
        assert!(w.network > 0.3);
    }
}
