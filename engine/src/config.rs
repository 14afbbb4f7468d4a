// SPDX-License-Identifier: AGPL-3.0-only

//! Engine configuration.
//!
//! Every section deserializes with `#[serde(default)]`, so a JSON file only
//! needs the keys it changes. Defaults come from [`crate::tolerances`].
//!
//! ```json
//! { "fusion": { "policy": "ConfidenceBased" }, "schedule": { "mining_interval_ms": 50 } }
//! ```

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

use cortexmine_forge::simulated::SimulatedConfig;
use cortexmine_forge::BackendMode;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::fusion::{FusionPolicy, Weights};
use crate::tolerances;

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub fusion: FusionConfig,
    pub optimizer: OptimizerConfig,
    pub learning: LearningConfig,
    pub entropy: EntropyConfig,
    pub search: SearchConfig,
    pub schedule: ScheduleConfig,
    pub backend: BackendConfig,
}

/// Fusion coordinator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Overall dispatch deadline.
    pub deadline_ms: u64,
    pub policy: FusionPolicy,
    /// Below this the best single source is not selected.
    pub min_confidence: f64,
    pub history_capacity: usize,
    pub initial_weights: Weights,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            deadline_ms: tolerances::FUSION_DEADLINE_MS,
            policy: FusionPolicy::default(),
            min_confidence: tolerances::FUSION_MIN_CONFIDENCE,
            history_capacity: tolerances::FUSION_HISTORY_CAPACITY,
            initial_weights: Weights::default(),
        }
    }
}

impl FusionConfig {
    #[must_use]
    pub const fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

/// Adaptive weight optimizer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub adaptation_rate: f64,
    pub window: usize,
    pub min_records: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            adaptation_rate: tolerances::OPTIMIZER_ADAPTATION_RATE,
            window: tolerances::OPTIMIZER_WINDOW,
            min_records: tolerances::OPTIMIZER_MIN_RECORDS,
        }
    }
}

/// Adaptive network and training settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    /// Layer widths, input first. Input must be the feature width and the
    /// output at least 32 wide.
    pub topology: Vec<usize>,
    pub learning_rate: f64,
    pub retro_rate_scale: f64,
    pub max_epochs: usize,
    pub retro_epochs: usize,
    pub adaptation_threshold: f64,
    pub divergence_patience: usize,
    pub divergence_min_delta: f64,
    pub sample_bit_accuracy: f64,
    pub initial_success_rate: f64,
    pub retro_success_rate: f64,
    pub history_capacity: usize,
    pub bootstrap_samples: usize,
    pub seed: u64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        let mut topology = vec![tolerances::FEATURE_DIM];
        topology.extend_from_slice(&tolerances::HIDDEN_LAYERS);
        topology.push(tolerances::NONCE_BITS);
        Self {
            topology,
            learning_rate: tolerances::LEARNING_RATE,
            retro_rate_scale: tolerances::RETRO_RATE_SCALE,
            max_epochs: tolerances::MAX_EPOCHS,
            retro_epochs: tolerances::RETRO_EPOCHS,
            adaptation_threshold: tolerances::ADAPTATION_THRESHOLD,
            divergence_patience: tolerances::DIVERGENCE_PATIENCE,
            divergence_min_delta: tolerances::DIVERGENCE_MIN_DELTA,
            sample_bit_accuracy: tolerances::SAMPLE_BIT_ACCURACY,
            initial_success_rate: tolerances::INITIAL_SUCCESS_RATE,
            retro_success_rate: tolerances::RETRO_SUCCESS_RATE,
            history_capacity: tolerances::TRAINING_HISTORY_CAPACITY,
            bootstrap_samples: tolerances::BOOTSTRAP_SAMPLES,
            seed: tolerances::LEARNING_SEED,
        }
    }
}

impl LearningConfig {
    /// # Errors
    /// Returns [`EngineError::Config`] for an unusable topology or
    /// out-of-range rates.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.topology.len() < 2 {
            return Err(config_err("learning.topology needs at least two layers"));
        }
        if self.topology.contains(&0) {
            return Err(config_err("learning.topology has a zero-width layer"));
        }
        if self.topology[0] != tolerances::FEATURE_DIM {
            return Err(config_err(format!(
                "learning.topology input must be {}, got {}",
                tolerances::FEATURE_DIM,
                self.topology[0]
            )));
        }
        if self.topology.last().copied().unwrap_or(0) < tolerances::NONCE_BITS {
            return Err(config_err(format!(
                "learning.topology output must be at least {}",
                tolerances::NONCE_BITS
            )));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(config_err("learning.learning_rate must be positive"));
        }
        if !(self.retro_rate_scale > 0.0 && self.retro_rate_scale <= 1.0) {
            return Err(config_err("learning.retro_rate_scale must be in (0, 1]"));
        }
        for (name, v) in [
            ("sample_bit_accuracy", self.sample_bit_accuracy),
            ("initial_success_rate", self.initial_success_rate),
            ("retro_success_rate", self.retro_success_rate),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(config_err(format!("learning.{name} must be in [0, 1]")));
            }
        }
        if self.max_epochs == 0 || self.divergence_patience == 0 {
            return Err(config_err(
                "learning.max_epochs and divergence_patience must be positive",
            ));
        }
        Ok(())
    }
}

/// Stimulus synthesis and candidate generation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntropyConfig {
    pub max_voltage: f64,
    pub stimulus_duration_ms: i32,
    /// Upper bound on waiting for a backend response.
    pub capture_wait_ms: u64,
    pub diverse_seeds: usize,
    pub candidate_count: usize,
    pub window_size: u32,
}

impl Default for EntropyConfig {
    fn default() -> Self {
        Self {
            max_voltage: tolerances::MAX_VOLTAGE,
            stimulus_duration_ms: tolerances::STIMULUS_DURATION_MS,
            capture_wait_ms: tolerances::CAPTURE_WAIT_MS,
            diverse_seeds: tolerances::DIVERSE_SEEDS,
            candidate_count: tolerances::CANDIDATE_COUNT,
            window_size: tolerances::SEARCH_WINDOW_SIZE,
        }
    }
}

impl EntropyConfig {
    #[must_use]
    pub const fn capture_wait(&self) -> Duration {
        Duration::from_millis(self.capture_wait_ms)
    }
}

/// Parallel search settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Worker threads; 0 means one per logical CPU.
    pub threads: usize,
}

/// Periodic task intervals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub mining_interval_ms: u64,
    pub learning_interval_ms: u64,
    pub metrics_interval_ms: u64,
    pub solution_capacity: usize,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            mining_interval_ms: tolerances::MINING_INTERVAL_MS,
            learning_interval_ms: tolerances::LEARNING_INTERVAL_MS,
            metrics_interval_ms: tolerances::METRICS_INTERVAL_MS,
            solution_capacity: tolerances::SOLUTION_HISTORY_CAPACITY,
        }
    }
}

/// Signal backend settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub mode: BackendMode,
    /// Amplifier clipping level of a hardware array.
    pub saturation: f64,
    pub simulated: SimulatedConfig,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            mode: BackendMode::SimulatedNetwork,
            saturation: 100.0,
            simulated: SimulatedConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file.
    ///
    /// # Errors
    /// Returns [`EngineError::Config`] if the file cannot be read, is not
    /// valid JSON for this schema, or fails [`validate`](Self::validate).
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| config_err(format!("cannot open {}: {e}", path.display())))?;
        let config: Self = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| config_err(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse from a JSON string.
    ///
    /// # Errors
    /// Same as [`from_json_file`](Self::from_json_file), minus I/O.
    pub fn from_json_str(json: &str) -> Result<Self, EngineError> {
        let config: Self = serde_json::from_str(json).map_err(|e| config_err(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    /// Returns [`EngineError::Config`] naming the first offending key.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.fusion.deadline_ms == 0 {
            return Err(config_err("fusion.deadline_ms must be positive"));
        }
        if !(0.0..=1.0).contains(&self.fusion.min_confidence) {
            return Err(config_err("fusion.min_confidence must be in [0, 1]"));
        }
        if self.fusion.history_capacity == 0 {
            return Err(config_err("fusion.history_capacity must be positive"));
        }
        let w = &self.fusion.initial_weights;
        if [w.sha, w.network, w.bio]
            .iter()
            .any(|v| !v.is_finite() || *v < 0.0)
        {
            return Err(config_err("fusion.initial_weights must be non-negative"));
        }
        if !(self.optimizer.adaptation_rate > 0.0 && self.optimizer.adaptation_rate <= 1.0) {
            return Err(config_err("optimizer.adaptation_rate must be in (0, 1]"));
        }
        if self.optimizer.window == 0 {
            return Err(config_err("optimizer.window must be positive"));
        }
        self.learning.validate()?;
        if !(self.entropy.max_voltage > 0.0 && self.entropy.max_voltage.is_finite()) {
            return Err(config_err("entropy.max_voltage must be positive"));
        }
        if self.entropy.stimulus_duration_ms <= 0 {
            return Err(config_err("entropy.stimulus_duration_ms must be positive"));
        }
        if self.entropy.candidate_count == 0 {
            return Err(config_err("entropy.candidate_count must be positive"));
        }
        if self.entropy.window_size == 0 {
            return Err(config_err("entropy.window_size must be positive"));
        }
        if self.entropy.diverse_seeds == 0 {
            return Err(config_err("entropy.diverse_seeds must be positive"));
        }
        let s = &self.schedule;
        if s.mining_interval_ms == 0 || s.learning_interval_ms == 0 || s.metrics_interval_ms == 0
        {
            return Err(config_err("schedule intervals must be positive"));
        }
        if self.backend.saturation.is_nan() || self.backend.saturation <= 0.0 {
            return Err(config_err("backend.saturation must be positive"));
        }
        let sim = &self.backend.simulated;
        if sim.channels == 0 || sim.reservoir_size == 0 {
            return Err(config_err(
                "backend.simulated channels and reservoir_size must be positive",
            ));
        }
        if !(sim.step_ms.is_finite() && sim.step_ms > 0.0) {
            return Err(config_err("backend.simulated.step_ms must be positive"));
        }
        if !(sim.leak_rate.is_finite() && sim.leak_rate > 0.0 && sim.leak_rate <= 1.0) {
            return Err(config_err("backend.simulated.leak_rate must be in (0, 1]"));
        }
        if !(sim.spectral_radius.is_finite() && sim.spectral_radius >= 0.0) {
            return Err(config_err("backend.simulated.spectral_radius must be non-negative"));
        }
        if !(0.0..=1.0).contains(&sim.connectivity) {
            return Err(config_err("backend.simulated.connectivity must be in [0, 1]"));
        }
        if !(sim.response_gain.is_finite() && sim.response_gain > 0.0) {
            return Err(config_err("backend.simulated.response_gain must be positive"));
        }
        if !sim.reinforcement_rate.is_finite() {
            return Err(config_err("backend.simulated.reinforcement_rate must be finite"));
        }
        Ok(())
    }
}

fn config_err(msg: impl Into<String>) -> EngineError {
    EngineError::Config(msg.into())
}
