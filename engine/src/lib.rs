// SPDX-License-Identifier: AGPL-3.0-only

#![deny(clippy::expect_used, clippy::unwrap_used)]

//! cortexmine engine: fused nonce prediction and parallel proof-of-work search.
//!
//! Three predictors guess a nonce for each header: a deterministic digest,
//! an adaptive network, and the response of a signal backend (a
//! hardware-attached electrode array or its simulated stand-in). Their
//! guesses are fused, checked, and on a miss the backend's response seeds
//! a set of candidate windows that are searched in parallel. Validated
//! outcomes feed back into the fusion weights and into both learning
//! sources.
//!
//! ## Architecture
//!
//! ```text
//!   header ──► ┌───────────── FusionCoordinator ──────────────┐
//!              │ deterministic │ adaptive │ bio (forge backend)│
//!              └──────────────┬────────────────────────────────┘
//!                             │ FusedPrediction
//!          AdaptiveWeightOptimizer ◄── validate ──► CrossSystemLearner
//!                             │ miss
//!              EntropyCandidateGenerator ──► ParallelSearchExecutor
//! ```
//!
//! ## Modules
//!   - `header`: wire format, proof-of-work digest, nonce validation
//!   - `predictor`: the [`Predictor`](predictor::Predictor) trait and its three sources
//!   - `entropy`: feature extraction, stimulus synthesis, candidate windows
//!   - `fusion`: concurrent dispatch, fusion policies, weights, transfer
//!   - `search`: rayon windowed search with first-success cancellation
//!   - `learning`: lifecycle state machine and training samples
//!   - `metrics`: lock-free counters and snapshots
//!   - `runtime`: [`MiningEngine`](runtime::MiningEngine) and its periodic cycles
//!   - `config`, `tolerances`, `error`: settings, defaults, typed errors

pub mod config;
pub mod entropy;
pub mod error;
pub mod fusion;
pub mod header;
pub mod learning;
pub mod metrics;
pub mod predictor;
pub mod runtime;
pub mod search;
pub mod tolerances;

pub use config::EngineConfig;
pub use error::EngineError;
pub use fusion::{FusedPrediction, FusionCoordinator, FusionPolicy, Weights};
pub use header::{validate_nonce_candidate, BlockHeader};
pub use learning::LearningState;
pub use metrics::MetricsSnapshot;
pub use predictor::{Prediction, Predictor, PredictorId};
pub use runtime::{CycleOutcome, MiningConfig, MiningEngine};
pub use search::ParallelSearchExecutor;
