// SPDX-License-Identifier: AGPL-3.0-only

//! Fusion, weight-optimizer, search, and scheduling thresholds.

// ═══════════════════════════════════════════════════════════════════
// Numerical guards
// ═══════════════════════════════════════════════════════════════════

/// Total weight or confidence at or below this is treated as zero.
///
/// Confidences are products of three factors in `[0, 1]`; anything under
/// 1e-12 carries no usable ordering information.
pub const WEIGHT_EPSILON: f64 = 1e-12;

/// Allowed drift of `sha + network + bio` from 1.0 before renormalizing.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-9;

// ═══════════════════════════════════════════════════════════════════
// Fusion coordinator
// ═══════════════════════════════════════════════════════════════════

/// Overall deadline for one fused dispatch, in milliseconds.
///
/// Predictors still running at the deadline contribute a zero-value,
/// zero-confidence placeholder.
pub const FUSION_DEADLINE_MS: u64 = 5000;

/// Below this confidence the best single source is not trusted and the
/// blended value is used.
pub const FUSION_MIN_CONFIDENCE: f64 = 0.3;

/// Fused predictions retained for validation, optimization, and learning.
pub const FUSION_HISTORY_CAPACITY: usize = 1000;

/// Initial mixing weight of the deterministic (digest) predictor.
pub const INITIAL_WEIGHT_SHA: f64 = 0.4;

/// Initial mixing weight of the adaptive network predictor.
pub const INITIAL_WEIGHT_NETWORK: f64 = 0.3;

/// Initial mixing weight of the signal-backend predictor.
pub const INITIAL_WEIGHT_BIO: f64 = 0.3;

// ═══════════════════════════════════════════════════════════════════
// Adaptive weight optimizer
// ═══════════════════════════════════════════════════════════════════

/// EMA blend rate of freshly measured efficiencies into current weights.
pub const OPTIMIZER_ADAPTATION_RATE: f64 = 0.05;

/// Most recent validated records the optimizer looks at.
pub const OPTIMIZER_WINDOW: usize = 100;

/// Fewer validated records than this yields the neutral efficiency.
pub const OPTIMIZER_MIN_RECORDS: usize = 10;

/// Efficiency assumed for a source with no evidence either way.
pub const NEUTRAL_EFFICIENCY: f64 = 0.5;

// ═══════════════════════════════════════════════════════════════════
// Parallel search
// ═══════════════════════════════════════════════════════════════════

/// Default nonces checked sequentially from each candidate point (2^22).
///
/// 1000 windows of 2^22 cover ~97.7% of the 32-bit nonce space.
pub const SEARCH_WINDOW_SIZE: u32 = 4_194_304;

/// Worker threads for the search pool; 0 means one per logical CPU.
pub const SEARCH_THREADS: usize = 0;

// ═══════════════════════════════════════════════════════════════════
// Periodic schedule
// ═══════════════════════════════════════════════════════════════════

/// Mining cycle period in milliseconds.
pub const MINING_INTERVAL_MS: u64 = 100;

/// Learning cycle period in milliseconds.
pub const LEARNING_INTERVAL_MS: u64 = 5000;

/// Metrics and weight-optimization cycle period in milliseconds.
pub const METRICS_INTERVAL_MS: u64 = 1000;

/// Solutions kept for the control surface.
pub const SOLUTION_HISTORY_CAPACITY: usize = 100;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_weights_sum_to_one() {
        let sum = INITIAL_WEIGHT_SHA + INITIAL_WEIGHT_NETWORK + INITIAL_WEIGHT_BIO;
        assert!((sum - 1.0).abs() < WEIGHT_SUM_TOLERANCE);
    }

    #[test]
    fn default_windows_cover_most_of_nonce_space() {
        let coverage = 1000.0 * f64::from(SEARCH_WINDOW_SIZE) / 4_294_967_296.0;
        assert!((coverage - 0.976_562_5).abs() < 1e-9);
    }
}
