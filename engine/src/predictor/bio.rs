// SPDX-License-Identifier: AGPL-3.0-only

//! Signal-backend predictor.
//!
//! Stimulates the bound backend with the header's features and reads the
//! nonce off the resulting entropy seed. Confidence combines how strongly
//! the backend answered with how clean the answer was.

use std::sync::Arc;
use std::time::Instant;

use super::{Prediction, Predictor, PredictorId};
use crate::entropy::EntropyCandidateGenerator;
use crate::error::EngineError;
use crate::header::BlockHeader;
use crate::learning::LearningStateMachine;

/// The [`Predictor`] backed by the active signal backend.
pub struct BioPredictor {
    generator: Arc<EntropyCandidateGenerator>,
    learning: Arc<LearningStateMachine>,
}

impl BioPredictor {
    #[must_use]
    pub const fn new(
        generator: Arc<EntropyCandidateGenerator>,
        learning: Arc<LearningStateMachine>,
    ) -> Self {
        Self {
            generator,
            learning,
        }
    }
}

impl Predictor for BioPredictor {
    fn id(&self) -> PredictorId {
        PredictorId::Bio
    }

    fn predict(&self, header: &BlockHeader, difficulty: u32) -> Result<Prediction, EngineError> {
        if !self.learning.current().allows_learned_predictions() {
            return Err(EngineError::LearningDivergence(
                "bio predictor disabled until learning is reset".into(),
            ));
        }
        let start = Instant::now();
        let reading = self.generator.read_signal(header, difficulty)?;
        let value = (reading.seed.primary_seed & 0xFFFF_FFFF) as u32;
        let confidence = reading.seed.confidence * reading.response.signal_quality;
        Ok(Prediction::new(
            value,
            confidence,
            start.elapsed(),
            PredictorId::Bio,
        ))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use cortexmine_forge::simulated::{SimulatedConfig, SimulatedNetwork};
    use cortexmine_forge::{BackendHandle, SignalBackend};

    use super::*;
    use crate::config::EntropyConfig;

    fn header() -> BlockHeader {
        let z = "0".repeat(64);
        BlockHeader::parse(&format!("1|{z}|{z}|1700000000|1d00ffff|0")).unwrap()
    }

    fn bio(ready: bool) -> (BioPredictor, Arc<LearningStateMachine>) {
        let sim = SimulatedNetwork::new(SimulatedConfig {
            latency_ms: 0,
            ..SimulatedConfig::default()
        });
        if ready {
            sim.initialize().unwrap();
        }
        let generator = Arc::new(EntropyCandidateGenerator::new(
            BackendHandle::new(Arc::new(sim)),
            EntropyConfig::default(),
        ));
        let learning = Arc::new(LearningStateMachine::new());
        (BioPredictor::new(generator, Arc::clone(&learning)), learning)
    }

    #[test]
    fn ready_backend_predicts_deterministically() {
        let (p, _) = bio(true);
        let a = p.predict(&header(), 1).unwrap();
        let b = p.predict(&header(), 1).unwrap();
        assert_eq!(a.value, b.value);
        assert_eq!(a.source, PredictorId::Bio);
        assert!((0.0..=1.0).contains(&a.confidence));
    }

    #[test]
    fn unready_backend_is_unavailable() {
        let (p, _) = bio(false);
        assert!(matches!(
            p.predict(&header(), 1),
            Err(EngineError::BackendUnavailable(_))
        ));
    }

    #[test]
    fn error_state_disables_bio() {
        let (p, learning) = bio(true);
        learning.fail();
        assert!(matches!(
            p.predict(&header(), 1),
            Err(EngineError::LearningDivergence(_))
        ));
    }
}
