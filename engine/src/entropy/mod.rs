// SPDX-License-Identifier: AGPL-3.0-only

//! Signal-driven candidate generation.
//!
//! ```text
//! header ─► features ─► stimulus ─► backend ─► response ─► entropy seed ─► candidate set
//! ```
//!
//! The seed mixes the response with the features through SHA-256, so the
//! same header and response always give the same candidates. A backend that
//! is not ready, or a response marked invalid, never feeds the seed: the
//! generator then drops the BioGuided strategy and splits the set between
//! the remaining two.

/// Seed expansion into candidate windows.
pub mod candidates;
/// Header feature extraction.
pub mod features;

pub use candidates::{
    generate_candidates, generate_candidates_degraded, CandidateSet, Strategy, StrategyGroup,
};
pub use features::{extract_features, shannon_entropy, BaseFeatures, HeaderFeatures};

use cortexmine_forge::{BackendHandle, BioResponse, StimulusPattern};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::EntropyConfig;
use crate::error::EngineError;
use crate::header::BlockHeader;
use crate::tolerances::{FREQUENCY_SPAN_HZ, MIN_FREQUENCY_HZ, SIGNAL_CONFIDENCE_SCALE};

/// Seed material derived from one response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntropySeed {
    pub primary_seed: u64,
    pub diverse_seeds: Vec<u64>,
    /// `min(1, mean|signal| / 100)`.
    pub confidence: f64,
    /// RMS of the response.
    pub response_strength: f64,
    /// Response the seed was mixed from; BioGuided points cluster on its peaks.
    pub signals: Vec<f64>,
}

/// Map features linearly onto `[-max_voltage, +max_voltage]`.
///
/// The smallest feature maps to `-max_voltage` and the largest to
/// `+max_voltage`; constant features give zero amplitude. Drive frequency
/// grows with the magnitude of the mapped value, from 5 to 50 Hz.
#[must_use]
pub fn features_to_stimulus(
    features: &[f64],
    max_voltage: f64,
    duration_ms: i32,
) -> StimulusPattern {
    let (lo, hi) = features
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let span = hi - lo;
    let unit: Vec<f64> = features
        .iter()
        .map(|&v| {
            if span > f64::EPSILON {
                2.0 * (v - lo) / span - 1.0
            } else {
                0.0
            }
        })
        .collect();
    StimulusPattern {
        amplitudes: unit.iter().map(|u| u * max_voltage).collect(),
        frequencies: unit
            .iter()
            .map(|u| u.abs().mul_add(FREQUENCY_SPAN_HZ, MIN_FREQUENCY_HZ))
            .collect(),
        duration_ms,
    }
}

fn digest_word(values: &[f64]) -> u64 {
    let mut h = Sha256::new();
    for v in values {
        h.update(v.to_le_bytes());
    }
    let d = h.finalize();
    u64::from_le_bytes([d[0], d[1], d[2], d[3], d[4], d[5], d[6], d[7]])
}

/// Mix a response and the features it answered into an [`EntropySeed`].
///
/// `primary_seed` is the XOR of one SHA-256 word of each vector, so
/// swapping the two arguments gives the same seed. `diverse` further seeds
/// follow by linear-congruential expansion of the primary.
#[must_use]
pub fn generate_entropy_seed(signals: &[f64], features: &[f64], diverse: usize) -> EntropySeed {
    let primary_seed = digest_word(signals) ^ digest_word(features);
    let diverse_seeds = std::iter::successors(Some(primary_seed), |s| {
        Some(candidates::lcg_next(*s))
    })
    .skip(1)
    .take(diverse)
    .collect();
    let (confidence, response_strength) = if signals.is_empty() {
        (0.0, 0.0)
    } else {
        let n = signals.len() as f64;
        let mean_abs = signals.iter().map(|s| s.abs()).sum::<f64>() / n;
        let rms = (signals.iter().map(|s| s * s).sum::<f64>() / n).sqrt();
        ((mean_abs / SIGNAL_CONFIDENCE_SCALE).min(1.0), rms)
    };
    EntropySeed {
        primary_seed,
        diverse_seeds,
        confidence,
        response_strength,
        signals: signals.to_vec(),
    }
}

/// One stimulus/response exchange for a header.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalReading {
    pub features: HeaderFeatures,
    pub pattern: StimulusPattern,
    pub response: BioResponse,
    pub seed: EntropySeed,
}

/// Candidates for one header, with how they were obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedCandidates {
    pub features: HeaderFeatures,
    /// `None` when no valid response fed the seed.
    pub reading: Option<SignalReading>,
    pub set: CandidateSet,
}

/// Drives the bound backend and expands its response into candidates.
#[derive(Debug, Clone)]
pub struct EntropyCandidateGenerator {
    backend: BackendHandle,
    config: EntropyConfig,
}

impl EntropyCandidateGenerator {
    #[must_use]
    pub const fn new(backend: BackendHandle, config: EntropyConfig) -> Self {
        Self { backend, config }
    }

    #[must_use]
    pub const fn backend(&self) -> &BackendHandle {
        &self.backend
    }

    #[must_use]
    pub const fn config(&self) -> &EntropyConfig {
        &self.config
    }

    /// Stimulus for the features of `header`.
    #[must_use]
    pub fn stimulus_for(&self, header: &BlockHeader, difficulty: u32) -> StimulusPattern {
        let features = extract_features(header, difficulty);
        features_to_stimulus(
            &features.expanded,
            self.config.max_voltage,
            self.config.stimulus_duration_ms,
        )
    }

    /// Stimulate the bound backend with `header`'s features.
    ///
    /// # Errors
    /// Returns [`EngineError::BackendUnavailable`] if the backend is not
    /// ready or returns an invalid response.
    pub fn read_signal(
        &self,
        header: &BlockHeader,
        difficulty: u32,
    ) -> Result<SignalReading, EngineError> {
        let features = extract_features(header, difficulty);
        self.read_features(features)
    }

    fn read_features(&self, features: HeaderFeatures) -> Result<SignalReading, EngineError> {
        let backend = self.backend.current();
        if !backend.is_ready() {
            return Err(EngineError::BackendUnavailable(backend.diagnostic_info()));
        }
        let pattern = features_to_stimulus(
            &features.expanded,
            self.config.max_voltage,
            self.config.stimulus_duration_ms,
        );
        let response = backend.stimulate_and_capture(&pattern, self.config.capture_wait());
        if !response.is_valid {
            return Err(EngineError::BackendUnavailable(format!(
                "{} backend returned no valid response",
                backend.mode()
            )));
        }
        let seed = generate_entropy_seed(
            &response.signals,
            &features.expanded,
            self.config.diverse_seeds,
        );
        Ok(SignalReading {
            features,
            pattern,
            response,
            seed,
        })
    }

    /// Candidate set for `header`, degraded to two strategies when the
    /// backend cannot supply a valid response.
    #[must_use]
    pub fn generate(&self, header: &BlockHeader, difficulty: u32) -> GeneratedCandidates {
        let features = extract_features(header, difficulty);
        let (count, window) = (self.config.candidate_count, self.config.window_size);
        match self.read_features(features.clone()) {
            Ok(reading) => {
                let set = generate_candidates(&reading.seed, count, window);
                GeneratedCandidates {
                    features,
                    reading: Some(reading),
                    set,
                }
            }
            Err(e) => {
                debug!(error = %e, "bio-guided candidates unavailable, degrading");
                let seed = generate_entropy_seed(&[], &features.expanded, self.config.diverse_seeds);
                let set = generate_candidates_degraded(&seed, count, window);
                GeneratedCandidates {
                    features,
                    reading: None,
                    set,
                }
            }
        }
    }
}
