// SPDX-License-Identifier: AGPL-3.0-only

//! Fusion coordinator: concurrent dispatch, policy blending, validation.
//!
//! Each dispatch runs the three predictors on their own named threads and
//! joins them over one channel with a single deadline. A predictor that
//! errors, or is still running when the deadline passes, is represented by
//! a zero-value, zero-confidence placeholder; the dispatch only fails when
//! all three are placeholders. Late threads are left to finish on their own
//! and their results are dropped.
//!
//! Weights and the prediction history sit behind separate locks, and
//! neither is held while a predictor runs.

/// Cross-system pattern transfer on validated success.
pub mod cross;
/// Adaptive weight optimizer.
pub mod optimizer;

pub use cross::CrossSystemLearner;
pub use optimizer::AdaptiveWeightOptimizer;

use std::collections::VecDeque;
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{FusionConfig, OptimizerConfig};
use crate::error::EngineError;
use crate::header::BlockHeader;
use crate::metrics::MetricsRegistry;
use crate::predictor::{Prediction, Predictor, PredictorId};
use crate::tolerances::{
    INITIAL_WEIGHT_BIO, INITIAL_WEIGHT_NETWORK, INITIAL_WEIGHT_SHA, WEIGHT_EPSILON,
    WEIGHT_SUM_TOLERANCE,
};

/// How per-source predictions are blended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FusionPolicy {
    /// Configured weights.
    WeightedAverage,
    /// Confidences normalized to sum to one.
    ConfidenceBased,
    /// `weight × confidence × recent success rate`, renormalized.
    #[default]
    Adaptive,
}

/// Mixing weights; non-negative and summing to one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Weights {
    pub sha: f64,
    pub network: f64,
    pub bio: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            sha: INITIAL_WEIGHT_SHA,
            network: INITIAL_WEIGHT_NETWORK,
            bio: INITIAL_WEIGHT_BIO,
        }
    }
}

impl Weights {
    #[must_use]
    pub const fn from_array(w: [f64; 3]) -> Self {
        Self {
            sha: w[0],
            network: w[1],
            bio: w[2],
        }
    }

    #[must_use]
    pub const fn to_array(self) -> [f64; 3] {
        [self.sha, self.network, self.bio]
    }

    #[must_use]
    pub const fn get(self, id: PredictorId) -> f64 {
        self.to_array()[id.index()]
    }

    /// Clamp negatives and non-finite values to zero and rescale to sum to
    /// one; all-zero weights become uniform.
    #[must_use]
    pub fn normalized(self) -> Self {
        let clean = self
            .to_array()
            .map(|v| if v.is_finite() && v > 0.0 { v } else { 0.0 });
        let sum: f64 = clean.iter().sum();
        if sum <= WEIGHT_EPSILON {
            return Self::from_array([1.0 / 3.0; 3]);
        }
        Self::from_array(clean.map(|v| v / sum))
    }

    /// Whether the invariant holds within tolerance.
    #[must_use]
    pub fn is_normalized(self) -> bool {
        let w = self.to_array();
        w.iter().all(|v| *v >= 0.0) && (w.iter().sum::<f64>() - 1.0).abs() <= WEIGHT_SUM_TOLERANCE
    }
}

/// What the fused prediction recommends trying first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SelectedMethod {
    Source(PredictorId),
    Fusion,
}

/// Outcome of one dispatch. Mutated once, by validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedPrediction {
    pub header: BlockHeader,
    pub difficulty: u32,
    /// Indexed by [`PredictorId::index`]; placeholders for failed sources.
    pub predictions: [Prediction; 3],
    pub fused_value: u32,
    pub fused_confidence: f64,
    pub selected_method: SelectedMethod,
    pub timestamp: SystemTime,
    pub validated: bool,
    pub was_successful: Option<bool>,
    pub actual_success_source: Option<PredictorId>,
}

impl FusedPrediction {
    /// Value of the selected source, or the fused value.
    #[must_use]
    pub fn selected_value(&self) -> u32 {
        match self.selected_method {
            SelectedMethod::Source(id) => self.predictions[id.index()].value,
            SelectedMethod::Fusion => self.fused_value,
        }
    }

    #[must_use]
    pub fn prediction(&self, id: PredictorId) -> &Prediction {
        &self.predictions[id.index()]
    }

    /// Source an outcome is credited to: the reported winner, else the
    /// selected single source.
    #[must_use]
    pub fn credited_source(&self) -> Option<PredictorId> {
        self.actual_success_source.or(match self.selected_method {
            SelectedMethod::Source(id) => Some(id),
            SelectedMethod::Fusion => None,
        })
    }
}

/// Blend `predictions` under `policy`.
///
/// `rates` are recent per-source success rates. Returns the fused value,
/// fused confidence and the effective weights used.
#[must_use]
pub fn fuse(
    predictions: &[Prediction; 3],
    weights: Weights,
    rates: [f64; 3],
    policy: FusionPolicy,
) -> (u32, f64, [f64; 3]) {
    let conf = predictions.map(|p| p.confidence);
    let effective = match policy {
        FusionPolicy::WeightedAverage => weights.normalized().to_array(),
        FusionPolicy::ConfidenceBased => confidence_weights(conf),
        FusionPolicy::Adaptive => {
            let w = weights.to_array();
            let raw = [0, 1, 2].map(|i| w[i] * conf[i] * rates[i]);
            let total: f64 = raw.iter().sum();
            if total <= WEIGHT_EPSILON {
                confidence_weights(conf)
            } else {
                raw.map(|v| v / total)
            }
        }
    };
    let value: f64 = predictions
        .iter()
        .zip(effective)
        .map(|(p, w)| f64::from(p.value) * w)
        .sum();
    let confidence: f64 = conf.iter().zip(effective).map(|(c, w)| c * w).sum();
    (
        value.round().clamp(0.0, f64::from(u32::MAX)) as u32,
        confidence.clamp(0.0, 1.0),
        effective,
    )
}

fn confidence_weights(conf: [f64; 3]) -> [f64; 3] {
    let total: f64 = conf.iter().sum();
    if total <= WEIGHT_EPSILON {
        [1.0 / 3.0; 3]
    } else {
        conf.map(|c| c / total)
    }
}

/// Source with the highest `confidence × rate`, or [`SelectedMethod::Fusion`]
/// when that source's confidence is below `min_confidence`.
#[must_use]
pub fn select_method(
    predictions: &[Prediction; 3],
    rates: [f64; 3],
    min_confidence: f64,
) -> SelectedMethod {
    let best = PredictorId::ALL
        .into_iter()
        .map(|id| (id, predictions[id.index()].confidence * rates[id.index()]))
        .fold(None, |best: Option<(PredictorId, f64)>, (id, score)| match best {
            Some((_, s)) if s >= score => best,
            _ => Some((id, score)),
        });
    match best {
        Some((id, _)) if predictions[id.index()].confidence >= min_confidence => {
            SelectedMethod::Source(id)
        }
        _ => SelectedMethod::Fusion,
    }
}

/// Dispatches predictors, fuses their outputs, and keeps the history the
/// optimizer and learner read.
pub struct FusionCoordinator {
    predictors: [Arc<dyn Predictor>; 3],
    config: FusionConfig,
    optimizer_config: OptimizerConfig,
    weights: Mutex<Weights>,
    history: Mutex<VecDeque<FusedPrediction>>,
    metrics: Arc<MetricsRegistry>,
    learner: Option<CrossSystemLearner>,
}

impl FusionCoordinator {
    /// Predictors are indexed by their [`Predictor::id`]; each id must
    /// appear exactly once.
    ///
    /// # Errors
    /// Returns [`EngineError::InitializationFailure`] if an id is missing
    /// or repeated.
    pub fn new(
        predictors: Vec<Arc<dyn Predictor>>,
        config: FusionConfig,
        optimizer_config: OptimizerConfig,
        metrics: Arc<MetricsRegistry>,
    ) -> Result<Self, EngineError> {
        let mut slots: [Option<Arc<dyn Predictor>>; 3] = [None, None, None];
        for p in predictors {
            let slot = &mut slots[p.id().index()];
            if slot.is_some() {
                return Err(EngineError::InitializationFailure(format!(
                    "predictor {} registered twice",
                    p.id()
                )));
            }
            *slot = Some(p);
        }
        let [Some(sha), Some(network), Some(bio)] = slots else {
            return Err(EngineError::InitializationFailure(
                "fusion needs sha, network and bio predictors".into(),
            ));
        };
        let weights = config.initial_weights.normalized();
        Ok(Self {
            predictors: [sha, network, bio],
            weights: Mutex::new(weights),
            history: Mutex::new(VecDeque::with_capacity(config.history_capacity.min(1024))),
            config,
            optimizer_config,
            metrics,
            learner: None,
        })
    }

    /// Attach the learner triggered by successful validations.
    #[must_use]
    pub fn with_learner(mut self, learner: CrossSystemLearner) -> Self {
        self.learner = Some(learner);
        self
    }

    #[must_use]
    pub const fn config(&self) -> &FusionConfig {
        &self.config
    }

    #[must_use]
    pub fn weights(&self) -> Weights {
        *self.weights.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the weights and return what was installed.
    ///
    /// Weights that already satisfy the invariant are stored bit for bit;
    /// anything else is renormalized first.
    pub fn set_weights(&self, weights: Weights) -> Weights {
        let installed = if weights.is_normalized() {
            weights
        } else {
            weights.normalized()
        };
        *self.weights.lock().unwrap_or_else(PoisonError::into_inner) = installed;
        installed
    }

    /// Copy of the prediction history, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<FusedPrediction> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Recent success rate per source, from the validated history.
    #[must_use]
    pub fn recent_success_rates(&self) -> [f64; 3] {
        let history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        optimizer::source_efficiencies(
            history.iter(),
            self.optimizer_config.window,
            self.optimizer_config.min_records,
        )
    }

    fn dispatch(&self, header: &BlockHeader, difficulty: u32) -> [Option<Prediction>; 3] {
        let deadline = self.config.deadline();
        let start = Instant::now();
        let (tx, rx) = mpsc::channel();
        for predictor in &self.predictors {
            let predictor = Arc::clone(predictor);
            let tx = tx.clone();
            let header = header.clone();
            let id = predictor.id();
            let spawned = std::thread::Builder::new()
                .name(format!("predict-{id}"))
                .spawn(move || {
                    let result = predictor.predict(&header, difficulty);
                    // receiver gone means the deadline passed
                    let _ = tx.send((id, result));
                });
            if let Err(e) = spawned {
                warn!(source = %id, error = %e, "predictor thread failed to start");
            }
        }
        drop(tx);

        let mut slots: [Option<Prediction>; 3] = [None; 3];
        let mut pending = 3;
        while pending > 0 {
            let Some(remaining) = deadline.checked_sub(start.elapsed()) else {
                break;
            };
            match rx.recv_timeout(remaining) {
                Ok((id, Ok(prediction))) => {
                    slots[id.index()] = Some(prediction);
                    pending -= 1;
                }
                Ok((id, Err(e))) => {
                    debug!(source = %id, error = %e, "predictor unavailable");
                    pending -= 1;
                }
                Err(mpsc::RecvTimeoutError::Timeout | mpsc::RecvTimeoutError::Disconnected) => {
                    break;
                }
            }
        }
        if pending > 0 {
            let late: Vec<PredictorId> = PredictorId::ALL
                .into_iter()
                .filter(|id| slots[id.index()].is_none())
                .collect();
            warn!(
                ?late,
                error = %EngineError::TimeoutExceeded(deadline),
                "dispatch proceeding without late predictors"
            );
        }
        slots
    }

    /// Dispatch all predictors concurrently and fuse what arrives by the
    /// deadline.
    ///
    /// # Errors
    /// Returns [`EngineError::AllPredictorsUnavailable`] when every source
    /// failed or timed out.
    pub fn predict_fused(
        &self,
        header: &BlockHeader,
        difficulty: u32,
    ) -> Result<FusedPrediction, EngineError> {
        let start = Instant::now();
        let slots = self.dispatch(header, difficulty);
        let elapsed = start.elapsed();
        for id in PredictorId::ALL {
            self.metrics
                .record_source_result(id, slots[id.index()].is_some());
        }
        if slots.iter().all(Option::is_none) {
            warn!("all predictors unavailable");
            return Err(EngineError::AllPredictorsUnavailable);
        }
        self.metrics
            .record_fused(slots[PredictorId::Bio.index()].is_some());

        let predictions =
            PredictorId::ALL.map(|id| slots[id.index()].unwrap_or(Prediction::placeholder(id, elapsed)));
        let rates = self.recent_success_rates();
        let weights = self.weights();
        let (fused_value, fused_confidence, _) =
            fuse(&predictions, weights, rates, self.config.policy);
        let selected_method = select_method(&predictions, rates, self.config.min_confidence);

        let fused = FusedPrediction {
            header: header.clone(),
            difficulty,
            predictions,
            fused_value,
            fused_confidence,
            selected_method,
            timestamp: SystemTime::now(),
            validated: false,
            was_successful: None,
            actual_success_source: None,
        };
        debug!(
            value = fused.fused_value,
            confidence = fused.fused_confidence,
            method = ?fused.selected_method,
            "fused prediction"
        );

        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        if history.len() >= self.config.history_capacity {
            history.pop_front();
        }
        history.push_back(fused.clone());
        Ok(fused)
    }

    /// Record the outcome of `prediction`.
    ///
    /// Finds the history record with the same timestamp and fused value,
    /// marks it validated, updates metrics and, on success, runs the
    /// cross-system learner. Returns `false` if the record is no longer in
    /// history or was already validated.
    pub fn validate(
        &self,
        prediction: &FusedPrediction,
        was_successful: bool,
        actual_success_source: Option<PredictorId>,
    ) -> bool {
        let record = {
            let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(record) = history.iter_mut().find(|r| {
                !r.validated
                    && r.timestamp == prediction.timestamp
                    && r.fused_value == prediction.fused_value
            }) else {
                debug!(value = prediction.fused_value, "validation target not in history");
                return false;
            };
            record.validated = true;
            record.was_successful = Some(was_successful);
            record.actual_success_source = actual_success_source;
            record.clone()
        };

        self.metrics
            .record_validation(record.credited_source(), was_successful);
        if was_successful {
            info!(source = ?record.credited_source(), "prediction validated as success");
            if let Some(learner) = &self.learner {
                if learner.transfer(&record) {
                    self.metrics.record_transfer();
                }
            }
        }
        true
    }

    /// Run `optimizer` over the history and install the new weights.
    pub fn optimize(&self, optimizer: &AdaptiveWeightOptimizer) -> Weights {
        let current = self.weights();
        let updated = {
            let history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
            optimizer.recompute(current, history.iter())
        };
        self.set_weights(updated)
    }

    /// Deadline applied to each dispatch.
    #[must_use]
    pub const fn deadline(&self) -> Duration {
        self.config.deadline()
    }
}

#[cfg(test)]
mod tests;
