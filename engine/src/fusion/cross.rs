// SPDX-License-Identifier: AGPL-3.0-only

//! Pattern transfer between the two learning-capable sources.
//!
//! A validated win by the signal backend becomes a supervised sample for
//! the adaptive network. A validated win by the adaptive network is replayed
//! into the backend as reinforcement of the stimulus that preceded it.
//! Deterministic wins transfer nothing.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::entropy::{extract_features, EntropyCandidateGenerator};
use crate::learning::{TrainingHistory, TrainingSample};
use crate::predictor::{AdaptivePredictor, PredictorId};
use crate::tolerances::SOLUTION_VALIDATION_SCORE;

use super::FusedPrediction;

/// Feeds validated wins of one learning source into the other.
#[derive(Clone)]
pub struct CrossSystemLearner {
    adaptive: Arc<AdaptivePredictor>,
    generator: Arc<EntropyCandidateGenerator>,
    training: Arc<Mutex<TrainingHistory>>,
}

impl CrossSystemLearner {
    /// `training` is the engine's training history; bio wins are appended
    /// to it for later retro-learning.
    #[must_use]
    pub const fn new(
        adaptive: Arc<AdaptivePredictor>,
        generator: Arc<EntropyCandidateGenerator>,
        training: Arc<Mutex<TrainingHistory>>,
    ) -> Self {
        Self {
            adaptive,
            generator,
            training,
        }
    }

    /// Transfer the winning pattern of a successful `record`.
    ///
    /// Returns whether a transfer happened.
    pub fn transfer(&self, record: &FusedPrediction) -> bool {
        if record.was_successful != Some(true) {
            return false;
        }
        let Some(winner) = record.credited_source() else {
            return false;
        };
        let won = record.prediction(winner);
        match winner {
            PredictorId::Bio => {
                let features = extract_features(&record.header, record.difficulty);
                let sample = TrainingSample::for_value(
                    features.expanded,
                    won.value,
                    SOLUTION_VALIDATION_SCORE,
                    true,
                );
                let improved = self.adaptive.update(&sample);
                self.training
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(sample);
                debug!(value = won.value, improved, "bio pattern transferred to network");
                true
            }
            PredictorId::Network => {
                let pattern = self
                    .generator
                    .stimulus_for(&record.header, record.difficulty);
                let backend = self.generator.backend().current();
                backend.reinforce_pattern(&pattern, won.value, won.confidence.clamp(0.0, 1.0));
                debug!(value = won.value, backend = %backend.mode(), "network pattern reinforced");
                true
            }
            PredictorId::Sha => false,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::{Duration, SystemTime};

    use cortexmine_forge::simulated::{SimulatedConfig, SimulatedNetwork};
    use cortexmine_forge::{BackendHandle, SignalBackend};

    use super::*;
    use crate::config::{EntropyConfig, LearningConfig};
    use crate::fusion::SelectedMethod;
    use crate::header::BlockHeader;
    use crate::learning::LearningStateMachine;
    use crate::predictor::Prediction;

    fn learner() -> (CrossSystemLearner, Arc<Mutex<TrainingHistory>>) {
        let sim = SimulatedNetwork::new(SimulatedConfig {
            latency_ms: 0,
            ..SimulatedConfig::default()
        });
        sim.initialize().unwrap();
        let generator = Arc::new(EntropyCandidateGenerator::new(
            BackendHandle::new(Arc::new(sim)),
            EntropyConfig::default(),
        ));
        let adaptive = Arc::new(
            AdaptivePredictor::new(
                LearningConfig::default(),
                Arc::new(LearningStateMachine::new()),
            )
            .unwrap(),
        );
        let training = Arc::new(Mutex::new(TrainingHistory::new(16)));
        (
            CrossSystemLearner::new(adaptive, generator, Arc::clone(&training)),
            training,
        )
    }

    fn record(winner: PredictorId, success: bool) -> FusedPrediction {
        let z = "0".repeat(64);
        let header = BlockHeader::parse(&format!("1|{z}|{z}|1700000000|1d00ffff|0")).unwrap();
        FusedPrediction {
            header,
            difficulty: 1,
            predictions: PredictorId::ALL
                .map(|id| Prediction::new(0xDEAD_BEEF, 0.8, Duration::ZERO, id)),
            fused_value: 0xDEAD_BEEF,
            fused_confidence: 0.8,
            selected_method: SelectedMethod::Fusion,
            timestamp: SystemTime::now(),
            validated: true,
            was_successful: Some(success),
            actual_success_source: Some(winner),
        }
    }

    #[test]
    fn bio_win_becomes_validated_sample() {
        let (l, training) = learner();
        assert!(l.transfer(&record(PredictorId::Bio, true)));
        let t = training.lock().unwrap();
        assert_eq!(t.validated().len(), 1);
        assert_eq!(t.snapshot()[0].expected_value, 0xDEAD_BEEF);
    }

    #[test]
    fn network_win_reinforces_backend() {
        let (l, training) = learner();
        assert!(l.transfer(&record(PredictorId::Network, true)));
        assert!(training.lock().unwrap().is_empty());
    }

    #[test]
    fn deterministic_and_failed_outcomes_transfer_nothing() {
        let (l, _) = learner();
        assert!(!l.transfer(&record(PredictorId::Sha, true)));
        assert!(!l.transfer(&record(PredictorId::Bio, false)));
        let mut fused_only = record(PredictorId::Bio, true);
        fused_only.actual_success_source = None;
        assert!(!l.transfer(&fused_only));
    }
}
