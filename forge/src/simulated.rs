// SPDX-License-Identifier: AGPL-3.0-only

//! Simulated neural network backend.
//!
//! A leaky-integrator reservoir stands in for a living culture: each stimulus
//! channel drives the reservoir with a sinusoid at its own amplitude and
//! frequency, and a fixed random readout maps the final reservoir state onto
//! the electrode channels.
//!
//! ```text
//! stimulus (A_j, f_j) → W_in → leaky tanh reservoir (W_res) → W_read → signals
//! ```
//!
//! Reinforcement nudges `W_in` towards the bit pattern of the rewarded value,
//! so repeated rewards bias later responses.

use std::f64::consts::PI;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::{BackendMode, SignalBackend};
use crate::error::ForgeError;
use crate::signal::{BioResponse, StimulusPattern};

/// Upper bound on integration steps for one stimulus.
const MAX_STEPS: usize = 10_000;

/// Parameters of the simulated network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedConfig {
    /// Electrode channels (stimulus inputs and response outputs).
    pub channels: usize,
    /// Hidden reservoir neurons.
    pub reservoir_size: usize,
    /// Fraction of non-zero recurrent weights.
    pub connectivity: f64,
    /// Target spectral radius of the recurrent matrix.
    pub spectral_radius: f64,
    /// Leak rate of the state update.
    pub leak_rate: f64,
    /// Response scale; signals lie in `(-response_gain, response_gain)`.
    pub response_gain: f64,
    /// Simulated acquisition latency in milliseconds.
    pub latency_ms: u64,
    /// Integration step in milliseconds.
    pub step_ms: f64,
    /// Input weight learning rate for reinforcement.
    pub reinforcement_rate: f64,
    /// Seed for reproducible weights.
    pub seed: u64,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            channels: 60,
            reservoir_size: 64,
            connectivity: 0.2,
            spectral_radius: 0.9,
            leak_rate: 0.3,
            response_gain: 100.0,
            latency_ms: 2,
            step_ms: 10.0,
            reinforcement_rate: 0.01,
            seed: 42,
        }
    }
}

struct NetworkState {
    ready: bool,
    w_in: Vec<Vec<f64>>,
    w_res: Vec<Vec<f64>>,
    w_read: Vec<Vec<f64>>,
    state: Vec<f64>,
    pending: Option<StimulusPattern>,
    reinforcements: u64,
    reward_sum: f64,
}

/// In-process simulated network implementing [`SignalBackend`].
pub struct SimulatedNetwork {
    config: SimulatedConfig,
    inner: Mutex<NetworkState>,
}

impl SimulatedNetwork {
    /// Build the network with weights drawn from `config.seed`.
    #[must_use]
    pub fn new(config: SimulatedConfig) -> Self {
        let rs = config.reservoir_size.max(1);
        let ch = config.channels.max(1);
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);

        let w_in: Vec<Vec<f64>> = (0..rs)
            .map(|_| (0..ch).map(|_| rng.gen_range(-0.5..0.5)).collect())
            .collect();

        let mut w_res: Vec<Vec<f64>> = (0..rs)
            .map(|_| {
                (0..rs)
                    .map(|_| {
                        if rng.gen::<f64>() < config.connectivity {
                            standard_normal(&mut rng)
                        } else {
                            0.0
                        }
                    })
                    .collect()
            })
            .collect();
        let sr = spectral_radius_estimate(&w_res);
        if sr > 1e-12 {
            let scale = config.spectral_radius / sr;
            for v in w_res.iter_mut().flat_map(|row| row.iter_mut()) {
                *v *= scale;
            }
        }

        let read_scale = 1.0 / (rs as f64).sqrt();
        let w_read: Vec<Vec<f64>> = (0..ch)
            .map(|_| {
                (0..rs)
                    .map(|_| standard_normal(&mut rng) * read_scale * 2.0)
                    .collect()
            })
            .collect();

        Self {
            inner: Mutex::new(NetworkState {
                ready: false,
                w_in,
                w_res,
                w_read,
                state: vec![0.0; rs],
                pending: None,
                reinforcements: 0,
                reward_sum: 0.0,
            }),
            config,
        }
    }

    /// Parameters this network was built with.
    #[must_use]
    pub const fn config(&self) -> &SimulatedConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run(&self, net: &mut NetworkState, pattern: &StimulusPattern) -> Vec<f64> {
        let alpha = self.config.leak_rate;
        let step_s = self.config.step_ms / 1000.0;
        let steps = integration_steps(pattern.duration_ms, self.config.step_ms);
        let driven = pattern.channels().min(self.config.channels.max(1));

        net.state.fill(0.0);
        let mut input = vec![0.0; driven];
        let mut pre = vec![0.0; net.state.len()];
        for t in 0..steps {
            let time = t as f64 * step_s;
            for (j, u) in input.iter_mut().enumerate() {
                *u = pattern.amplitudes[j] * (2.0 * PI * pattern.frequencies[j]).mul_add(time, 0.5 * PI).sin();
            }
            for (i, pre_i) in pre.iter_mut().enumerate() {
                let drive: f64 = net.w_in[i].iter().zip(&input).map(|(w, u)| w * u).sum();
                let recur: f64 = net.w_res[i].iter().zip(&net.state).map(|(w, s)| w * s).sum();
                *pre_i = drive + recur;
            }
            for (s, p) in net.state.iter_mut().zip(&pre) {
                *s = (1.0 - alpha).mul_add(*s, alpha * p.tanh());
            }
        }

        let gain = self.config.response_gain;
        net.w_read
            .iter()
            .map(|row| {
                let v: f64 = row.iter().zip(&net.state).map(|(w, s)| w * s).sum();
                gain * v.tanh()
            })
            .collect()
    }
}

impl SignalBackend for SimulatedNetwork {
    fn mode(&self) -> BackendMode {
        BackendMode::SimulatedNetwork
    }

    fn channels(&self) -> usize {
        self.config.channels.max(1)
    }

    fn initialize(&self) -> Result<(), ForgeError> {
        let mut net = self.lock();
        net.ready = true;
        net.pending = None;
        debug!(
            neurons = self.config.reservoir_size,
            channels = self.config.channels,
            "simulated network initialized"
        );
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.lock().ready
    }

    fn apply_stimulus(&self, pattern: &StimulusPattern) -> Result<(), ForgeError> {
        let mut net = self.lock();
        if !net.ready {
            return Err(ForgeError::NotReady);
        }
        pattern.check()?;
        net.pending = Some(pattern.clone());
        Ok(())
    }

    fn capture_response(&self, wait: Duration) -> BioResponse {
        let start = Instant::now();
        let latency = Duration::from_millis(self.config.latency_ms);
        let channels = self.channels();

        let signals = {
            let mut net = self.lock();
            let Some(pattern) = net.pending.take().filter(|_| net.ready) else {
                return BioResponse::invalid(channels, 0);
            };
            if latency > wait {
                None
            } else {
                Some(self.run(&mut net, &pattern))
            }
        };

        let Some(signals) = signals else {
            thread::sleep(wait);
            debug!(wait_ms = wait.as_millis() as u64, "simulated capture timed out");
            return BioResponse::invalid(channels, start.elapsed().as_micros() as i64);
        };

        if let Some(remaining) = latency.checked_sub(start.elapsed()) {
            thread::sleep(remaining);
        }
        let saturation = 0.99 * self.config.response_gain;
        BioResponse::from_signals(signals, saturation, start.elapsed().as_micros() as i64)
    }

    fn reinforce_pattern(&self, pattern: &StimulusPattern, value: u32, reward: f64) {
        let reward = if reward.is_finite() { reward.clamp(0.0, 1.0) } else { 0.0 };
        let mut net = self.lock();
        if !net.ready || pattern.check().is_err() {
            return;
        }
        let max_amp = pattern
            .amplitudes
            .iter()
            .fold(0.0_f64, |m, a| m.max(a.abs()))
            .max(1e-12);
        let step = self.config.reinforcement_rate * reward;
        for (i, row) in net.w_in.iter_mut().enumerate() {
            let sign = if (value >> (i % 32)) & 1 == 1 { 1.0 } else { -1.0 };
            for (w, a) in row.iter_mut().zip(&pattern.amplitudes) {
                *w += step * sign * (a / max_amp);
            }
        }
        net.reinforcements += 1;
        net.reward_sum += reward;
    }

    fn reset(&self) {
        let mut net = self.lock();
        net.pending = None;
        net.state.fill(0.0);
    }

    fn diagnostic_info(&self) -> String {
        let net = self.lock();
        let mean_reward = if net.reinforcements == 0 {
            0.0
        } else {
            net.reward_sum / net.reinforcements as f64
        };
        format!(
            "simulated network: {} neurons, {} channels, ready={}, reinforcements={}, mean reward={:.3}",
            self.config.reservoir_size, self.config.channels, net.ready, net.reinforcements, mean_reward
        )
    }
}

/// Steps needed to cover `duration_ms`, clamped to `1..=MAX_STEPS`.
///
/// A non-positive or non-finite step integrates once.
fn integration_steps(duration_ms: i32, step_ms: f64) -> usize {
    if !(step_ms.is_finite() && step_ms > 0.0) {
        return 1;
    }
    let steps = (f64::from(duration_ms.max(0)) / step_ms).ceil();
    if steps >= MAX_STEPS as f64 {
        MAX_STEPS
    } else {
        (steps as usize).max(1)
    }
}

fn standard_normal(rng: &mut ChaCha8Rng) -> f64 {
    let u1 = rng.gen::<f64>().max(1e-300);
    let u2 = rng.gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

/// Dominant eigenvalue magnitude by power iteration.
fn spectral_radius_estimate(w: &[Vec<f64>]) -> f64 {
    let n = w.len();
    if n == 0 {
        return 0.0;
    }
    let mut v = vec![1.0 / (n as f64).sqrt(); n];
    let mut lambda = 0.0;
    for _ in 0..100 {
        let w_v: Vec<f64> = w
            .iter()
            .map(|row| row.iter().zip(&v).map(|(a, b)| a * b).sum())
            .collect();
        let norm = w_v.iter().map(|x| x * x).sum::<f64>().sqrt();
        if norm < 1e-12 {
            return 0.0;
        }
        lambda = norm;
        for (vi, wi) in v.iter_mut().zip(&w_v) {
            *vi = wi / norm;
        }
    }
    lambda
}
