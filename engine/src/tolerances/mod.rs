// SPDX-License-Identifier: AGPL-3.0-only

//! Centralized defaults and thresholds for the engine.
//!
//! Every threshold the engine compares against is named here. Configuration
//! defaults in [`crate::config`] are built from these constants, so a value
//! changes in exactly one place.
//!
//! | Category | Module | Example |
//! |----------|--------|---------|
//! | Fusion and optimizer | [`fusion`] | 5000 ms dispatch deadline |
//! | Training | [`learning`] | 0.7 initial success rate |
//! | Stimulus and candidates | [`entropy`] | 1000 candidate points |

/// Stimulus synthesis, seed derivation, and candidate partitioning.
pub mod entropy;
/// Fusion dispatch, weight optimizer, search, and periodic schedule.
pub mod fusion;
/// Adaptive network topology, gradient descent, and success criteria.
pub mod learning;

pub use entropy::{
    CANDIDATE_COUNT, CAPTURE_WAIT_MS, DIVERSE_SEEDS, FREQUENCY_SPAN_HZ, GOLDEN_RATIO_STEP,
    LCG_INCREMENT, LCG_MULTIPLIER, MAX_VOLTAGE, MIN_FREQUENCY_HZ, NONCE_SPACE,
    SIGNAL_CONFIDENCE_SCALE, STIMULUS_DURATION_MS,
};
pub use fusion::{
    FUSION_DEADLINE_MS, FUSION_HISTORY_CAPACITY, FUSION_MIN_CONFIDENCE, INITIAL_WEIGHT_BIO,
    INITIAL_WEIGHT_NETWORK, INITIAL_WEIGHT_SHA, LEARNING_INTERVAL_MS, METRICS_INTERVAL_MS,
    MINING_INTERVAL_MS, NEUTRAL_EFFICIENCY, OPTIMIZER_ADAPTATION_RATE, OPTIMIZER_MIN_RECORDS,
    OPTIMIZER_WINDOW, SEARCH_THREADS, SEARCH_WINDOW_SIZE, SOLUTION_HISTORY_CAPACITY,
    WEIGHT_EPSILON, WEIGHT_SUM_TOLERANCE,
};
pub use learning::{
    ADAPTATION_THRESHOLD, BOOTSTRAP_SAMPLES, DIVERGENCE_MIN_DELTA, DIVERGENCE_PATIENCE,
    FEATURE_DIM, HIDDEN_LAYERS, INITIAL_SUCCESS_RATE, LEARNING_RATE, LEARNING_SEED, MAX_EPOCHS,
    NONCE_BITS, RETRO_EPOCHS, RETRO_RATE_SCALE, RETRO_SUCCESS_RATE, SAMPLE_BIT_ACCURACY,
    SOLUTION_VALIDATION_SCORE, TRAINING_HISTORY_CAPACITY,
};
