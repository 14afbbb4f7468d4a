// SPDX-License-Identifier: AGPL-3.0-only

//! Stimulus and response data model shared by every backend.

use serde::{Deserialize, Serialize};

use crate::error::ForgeError;

/// A multi-channel stimulus: one amplitude and one frequency per electrode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StimulusPattern {
    /// Per-channel amplitude in volts, within `[-max_voltage, +max_voltage]`.
    pub amplitudes: Vec<f64>,
    /// Per-channel drive frequency in Hz.
    pub frequencies: Vec<f64>,
    /// Stimulus duration in milliseconds.
    pub duration_ms: i32,
}

impl StimulusPattern {
    /// Number of stimulated channels.
    #[must_use]
    pub fn channels(&self) -> usize {
        self.amplitudes.len()
    }

    /// Check the structural contract every backend relies on.
    ///
    /// # Errors
    /// Returns [`ForgeError::MalformedPattern`] when the vectors are empty,
    /// have different lengths, contain non-finite values, or the duration is
    /// not positive.
    pub fn check(&self) -> Result<(), ForgeError> {
        if self.amplitudes.is_empty() {
            return Err(ForgeError::MalformedPattern("no channels".into()));
        }
        if self.amplitudes.len() != self.frequencies.len() {
            return Err(ForgeError::MalformedPattern(format!(
                "{} amplitudes vs {} frequencies",
                self.amplitudes.len(),
                self.frequencies.len()
            )));
        }
        if self.duration_ms <= 0 {
            return Err(ForgeError::MalformedPattern(format!(
                "duration {} ms",
                self.duration_ms
            )));
        }
        if self
            .amplitudes
            .iter()
            .chain(self.frequencies.iter())
            .any(|v| !v.is_finite())
        {
            return Err(ForgeError::MalformedPattern("non-finite value".into()));
        }
        Ok(())
    }

    /// Copy of this pattern with every amplitude multiplied by `gain`.
    #[must_use]
    pub fn scaled(&self, gain: f64) -> Self {
        Self {
            amplitudes: self.amplitudes.iter().map(|a| a * gain).collect(),
            frequencies: self.frequencies.clone(),
            duration_ms: self.duration_ms,
        }
    }
}

/// A captured response. Invalid responses carry zero-filled signals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BioResponse {
    /// Per-channel response magnitude.
    pub signals: Vec<f64>,
    /// RMS of `signals`.
    pub response_strength: f64,
    /// Fraction of channels that responded without saturating, in `[0, 1]`.
    pub signal_quality: f64,
    /// Time from capture start to response, in microseconds.
    pub response_time_us: i64,
    /// `false` on timeout, disconnection, or when nothing was stimulated.
    pub is_valid: bool,
}

impl BioResponse {
    /// Zero-filled invalid response of the given width.
    #[must_use]
    pub fn invalid(channels: usize, response_time_us: i64) -> Self {
        Self {
            signals: vec![0.0; channels],
            response_strength: 0.0,
            signal_quality: 0.0,
            response_time_us,
            is_valid: false,
        }
    }

    /// Build a valid response, deriving strength and quality from the signals.
    ///
    /// `saturation` is the magnitude at or above which a channel counts as
    /// saturated and no longer contributes to quality.
    #[must_use]
    pub fn from_signals(signals: Vec<f64>, saturation: f64, response_time_us: i64) -> Self {
        if signals.is_empty() {
            return Self::invalid(0, response_time_us);
        }
        let n = signals.len() as f64;
        let response_strength = (signals.iter().map(|s| s * s).sum::<f64>() / n).sqrt();
        let responsive = signals
            .iter()
            .filter(|s| s.abs() > f64::EPSILON && s.abs() < saturation)
            .count();
        Self {
            signal_quality: (responsive as f64 / n).clamp(0.0, 1.0),
            response_strength,
            signals,
            response_time_us,
            is_valid: true,
        }
    }
}
