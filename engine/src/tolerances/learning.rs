// SPDX-License-Identifier: AGPL-3.0-only

//! Adaptive-network training thresholds and the learning schedule.

// ═══════════════════════════════════════════════════════════════════
// Topology and initialization
// ═══════════════════════════════════════════════════════════════════

/// Width of the expanded feature vector, one value per electrode.
pub const FEATURE_DIM: usize = 60;

/// Output bits of the adaptive network (one per nonce bit).
pub const NONCE_BITS: usize = 32;

/// Default hidden-layer widths between [`FEATURE_DIM`] and [`NONCE_BITS`].
pub const HIDDEN_LAYERS: [usize; 2] = [64, 48];

/// Seed for weight initialization, epoch shuffling, and bootstrap samples.
pub const LEARNING_SEED: u64 = 42;

// ═══════════════════════════════════════════════════════════════════
// Gradient descent
// ═══════════════════════════════════════════════════════════════════

/// Step size for supervised updates.
pub const LEARNING_RATE: f64 = 0.05;

/// Retro-learning runs at this fraction of [`LEARNING_RATE`].
pub const RETRO_RATE_SCALE: f64 = 0.25;

/// Epoch cap for initial training.
pub const MAX_EPOCHS: usize = 200;

/// Epoch cap for one retro-learning pass.
pub const RETRO_EPOCHS: usize = 20;

/// Mean squared epoch error at which initial training stops early.
pub const ADAPTATION_THRESHOLD: f64 = 0.01;

/// Epochs without improvement before training is declared divergent.
pub const DIVERGENCE_PATIENCE: usize = 25;

/// Smallest epoch-error decrease counted as improvement.
pub const DIVERGENCE_MIN_DELTA: f64 = 1e-6;

// ═══════════════════════════════════════════════════════════════════
// Success criteria
// ═══════════════════════════════════════════════════════════════════

/// Per-sample bit accuracy at or above which a sample counts as learned.
pub const SAMPLE_BIT_ACCURACY: f64 = 0.9;

/// Success rate initial training must reach to enter active mining.
pub const INITIAL_SUCCESS_RATE: f64 = 0.7;

/// Success rate retro-learning must reach to leave the error state.
pub const RETRO_SUCCESS_RATE: f64 = 0.5;

// ═══════════════════════════════════════════════════════════════════
// Training data
// ═══════════════════════════════════════════════════════════════════

/// Training samples retained in the ring buffer.
pub const TRAINING_HISTORY_CAPACITY: usize = 10_000;

/// Synthetic samples generated when an untrained engine starts.
pub const BOOTSTRAP_SAMPLES: usize = 64;

/// Validation score given to samples from a found solution.
pub const SOLUTION_VALIDATION_SCORE: f64 = 1.0;
