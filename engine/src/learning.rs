// SPDX-License-Identifier: AGPL-3.0-only

//! Learning lifecycle shared by the learning-capable predictors, plus the
//! training-sample ring they learn from.
//!
//! ```text
//! Uninitialized ─► InitialLearning ─┬─► ActiveMining ◄─┬─► Optimizing
//!                                   │        ▲  │      │
//!                                   ▼        │  ▼      │
//!                                 Error ─► RetroLearning
//! ```
//!
//! Any state may fall to `Error`; `reset` always returns to `Uninitialized`.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::EngineError;

/// Lifecycle of the learning-capable predictors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LearningState {
    #[default]
    Uninitialized,
    InitialLearning,
    ActiveMining,
    RetroLearning,
    Optimizing,
    Error,
}

impl LearningState {
    /// Whether `self -> to` is an allowed edge.
    #[must_use]
    pub const fn can_transition(self, to: Self) -> bool {
        use LearningState::{
            ActiveMining, Error, InitialLearning, Optimizing, RetroLearning, Uninitialized,
        };
        matches!(
            (self, to),
            (Uninitialized, InitialLearning)
                | (InitialLearning | RetroLearning | Optimizing, ActiveMining)
                | (ActiveMining | Error, RetroLearning)
                | (ActiveMining, Optimizing)
                | (_, Error)
        )
    }

    /// Whether learning-capable predictors may serve predictions.
    #[must_use]
    pub const fn allows_learned_predictions(self) -> bool {
        !matches!(self, Self::Error)
    }
}

/// Single authoritative learning state, guarded by its own lock.
#[derive(Debug, Default)]
pub struct LearningStateMachine {
    state: Mutex<LearningState>,
}

impl LearningStateMachine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn current(&self) -> LearningState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to `to`.
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidTransition`] for an edge not in the
    /// lifecycle graph; the state is left unchanged.
    pub fn transition(&self, to: LearningState) -> Result<LearningState, EngineError> {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let from = *guard;
        if !from.can_transition(to) {
            return Err(EngineError::InvalidTransition { from, to });
        }
        *guard = to;
        if to == LearningState::Error {
            warn!(?from, "learning entered error state");
        } else {
            info!(?from, ?to, "learning state transition");
        }
        Ok(from)
    }

    /// Move to `to` only if currently in `from`. Returns whether it moved.
    pub fn transition_from(&self, from: LearningState, to: LearningState) -> bool {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *guard != from || !from.can_transition(to) {
            return false;
        }
        *guard = to;
        info!(?from, ?to, "learning state transition");
        true
    }

    /// Force `Error` from any state.
    pub fn fail(&self) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = LearningState::Error;
        warn!("learning entered error state");
    }

    /// Return to `Uninitialized`.
    pub fn reset(&self) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = LearningState::Uninitialized;
        info!("learning state reset");
    }

    /// Overwrite with an imported state, bypassing the edge check.
    pub(crate) fn restore(&self, state: LearningState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }
}

/// One supervised example for the adaptive network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSample {
    pub input_features: Vec<f64>,
    /// One target per nonce bit, most significant first, each 0 or 1.
    pub target_output: Vec<f64>,
    pub expected_value: u32,
    /// In `[0, 1]`.
    pub validation_score: f64,
    pub is_validated: bool,
}

impl TrainingSample {
    /// Sample whose target is the bit pattern of `value`.
    #[must_use]
    pub fn for_value(
        input_features: Vec<f64>,
        value: u32,
        validation_score: f64,
        is_validated: bool,
    ) -> Self {
        Self {
            input_features,
            target_output: value_to_bits(value),
            expected_value: value,
            validation_score: validation_score.clamp(0.0, 1.0),
            is_validated,
        }
    }
}

/// `value` as 32 targets in {0, 1}, most significant bit first.
#[must_use]
pub fn value_to_bits(value: u32) -> Vec<f64> {
    (0..32)
        .map(|i| f64::from((value >> (31 - i)) & 1))
        .collect()
}

/// Bounded ring of training samples; oldest evicted first.
#[derive(Debug, Clone)]
pub struct TrainingHistory {
    samples: VecDeque<TrainingSample>,
    capacity: usize,
}

impl TrainingHistory {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, sample: TrainingSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// All samples, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<TrainingSample> {
        self.samples.iter().cloned().collect()
    }

    /// Validated samples only, oldest first.
    #[must_use]
    pub fn validated(&self) -> Vec<TrainingSample> {
        self.samples
            .iter()
            .filter(|s| s.is_validated)
            .cloned()
            .collect()
    }
}

/// Seeded synthetic samples for an untrained model.
///
/// Features are uniform in `[-1, 1]`; bit `31 - i` of the target is set when
/// feature `i` is positive. None are marked validated.
#[must_use]
pub fn bootstrap_samples(count: usize, feature_dim: usize, seed: u64) -> Vec<TrainingSample> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let features: Vec<f64> = (0..feature_dim)
                .map(|_| rng.gen_range(-1.0..=1.0))
                .collect();
            let value = features
                .iter()
                .take(32)
                .enumerate()
                .filter(|(_, f)| **f > 0.0)
                .fold(0_u32, |v, (i, _)| v | (1 << (31 - i)));
            TrainingSample::for_value(features, value, 0.5, false)
        })
        .collect()
}
