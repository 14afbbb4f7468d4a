// SPDX-License-Identifier: AGPL-3.0-only

//! Nonce predictors.
//!
//! Three independent sources guess a nonce with a confidence:
//!
//! | Source | Type | State |
//! |--------|------|-------|
//! | [`PredictorId::Sha`] | [`DeterministicPredictor`] | none |
//! | [`PredictorId::Network`] | [`AdaptivePredictor`] | trained weights |
//! | [`PredictorId::Bio`] | [`BioPredictor`] | bound signal backend |
//!
//! The fusion coordinator only sees the [`Predictor`] trait.

/// Trainable network predictor and its weight export.
pub mod adaptive;
/// Signal-backend predictor.
pub mod bio;
/// Digest-only predictor.
pub mod deterministic;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::header::BlockHeader;

pub use adaptive::{AdaptiveNetwork, AdaptivePredictor, ExportedModel, TrainingReport};
pub use bio::BioPredictor;
pub use deterministic::DeterministicPredictor;

/// Identity of a prediction source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PredictorId {
    Sha,
    Network,
    Bio,
}

impl PredictorId {
    pub const ALL: [Self; 3] = [Self::Sha, Self::Network, Self::Bio];

    /// Position in per-source arrays.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Sha => 0,
            Self::Network => 1,
            Self::Bio => 2,
        }
    }
}

impl fmt::Display for PredictorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sha => write!(f, "sha"),
            Self::Network => write!(f, "network"),
            Self::Bio => write!(f, "bio"),
        }
    }
}

/// One source's guess. Immutable once produced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub value: u32,
    /// In `[0, 1]`.
    pub confidence: f64,
    pub latency: Duration,
    pub source: PredictorId,
}

impl Prediction {
    /// Build a prediction, clamping `confidence` into `[0, 1]` (NaN becomes 0).
    #[must_use]
    pub fn new(value: u32, confidence: f64, latency: Duration, source: PredictorId) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            value,
            confidence,
            latency,
            source,
        }
    }

    /// Zero-value, zero-confidence stand-in for a failed or late source.
    #[must_use]
    pub const fn placeholder(source: PredictorId, latency: Duration) -> Self {
        Self {
            value: 0,
            confidence: 0.0,
            latency,
            source,
        }
    }
}

/// A nonce prediction source.
///
/// Implementations must be callable from any thread; the coordinator runs
/// each on its own worker and abandons it at the deadline.
pub trait Predictor: Send + Sync {
    fn id(&self) -> PredictorId;

    /// Guess a nonce for `header` at `difficulty` leading zero bits.
    ///
    /// # Errors
    /// Source-specific; the coordinator turns any error into a placeholder.
    fn predict(&self, header: &BlockHeader, difficulty: u32) -> Result<Prediction, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_is_clamped() {
        let p = Prediction::new(1, 1.7, Duration::ZERO, PredictorId::Sha);
        assert!((p.confidence - 1.0).abs() < f64::EPSILON);
        let p = Prediction::new(1, f64::NAN, Duration::ZERO, PredictorId::Sha);
        assert!(p.confidence.abs() < f64::EPSILON);
    }

    #[test]
    fn indices_are_distinct() {
        let idx: Vec<usize> = PredictorId::ALL.iter().map(|p| p.index()).collect();
        assert_eq!(idx, vec![0, 1, 2]);
    }
}
