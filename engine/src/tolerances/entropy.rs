// SPDX-License-Identifier: AGPL-3.0-only

//! Stimulus synthesis and candidate-generation constants.

/// Peak stimulus amplitude in volts.
pub const MAX_VOLTAGE: f64 = 1.0;

/// Stimulus duration in milliseconds.
pub const STIMULUS_DURATION_MS: i32 = 50;

/// Upper bound on waiting for a backend response, in milliseconds.
pub const CAPTURE_WAIT_MS: u64 = 200;

/// Lowest stimulus drive frequency in Hz.
pub const MIN_FREQUENCY_HZ: f64 = 5.0;

/// Drive frequency span added on top of [`MIN_FREQUENCY_HZ`] for a unit feature.
pub const FREQUENCY_SPAN_HZ: f64 = 45.0;

/// Mean absolute response that maps to full seed confidence.
pub const SIGNAL_CONFIDENCE_SCALE: f64 = 100.0;

/// Diverse seeds derived from one primary seed.
pub const DIVERSE_SEEDS: usize = 10;

/// Candidate points per generated set.
pub const CANDIDATE_COUNT: usize = 1000;

/// Multiplier of the MMIX linear-congruential generator.
pub const LCG_MULTIPLIER: u64 = 6_364_136_223_846_793_005;

/// Increment of the MMIX linear-congruential generator.
pub const LCG_INCREMENT: u64 = 1_442_695_040_888_963_407;

/// `2^32 / φ`, rounded: golden-ratio step through the nonce space.
pub const GOLDEN_RATIO_STEP: u32 = 0x9E37_79B9;

/// Size of the 32-bit nonce space.
pub const NONCE_SPACE: f64 = 4_294_967_296.0;
