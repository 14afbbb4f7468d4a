// SPDX-License-Identifier: AGPL-3.0-only

//! Trainable nonce predictor.
//!
//! A fully connected network maps the 60-dimensional header feature vector
//! to one sigmoid output per nonce bit:
//!
//! ```text
//! header → features (60) → tanh hidden layers → sigmoid outputs (32) → nonce bits
//! ```
//!
//! Output `i` above 0.5 sets bit `31 - i` of the predicted nonce. Confidence
//! is how far the outputs sit from the undecided 0.5, on average.
//!
//! Training is plain per-sample gradient descent with a cross-entropy
//! output gradient. Epoch error is the mean squared bit error.

/// Serializable weight export.
pub mod export;

#[cfg(test)]
mod tests;

pub use export::{ExportedLayer, ExportedModel};

use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{Prediction, Predictor, PredictorId};
use crate::config::LearningConfig;
use crate::entropy::extract_features;
use crate::error::EngineError;
use crate::header::BlockHeader;
use crate::learning::{LearningState, LearningStateMachine, TrainingSample};
use crate::tolerances::NONCE_BITS;

#[derive(Debug, Clone, PartialEq)]
struct Layer {
    /// `outputs × inputs`.
    weights: Vec<Vec<f64>>,
    biases: Vec<f64>,
}

impl Layer {
    fn inputs(&self) -> usize {
        self.weights.first().map_or(0, Vec::len)
    }

    fn affine(&self, input: &[f64]) -> Vec<f64> {
        self.weights
            .iter()
            .zip(&self.biases)
            .map(|(row, b)| row.iter().zip(input).fold(*b, |acc, (w, x)| w.mul_add(*x, acc)))
            .collect()
    }
}

/// Error before and after one supervised step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutcome {
    pub before: f64,
    pub after: f64,
}

impl StepOutcome {
    #[must_use]
    pub fn improved(&self) -> bool {
        self.after < self.before
    }
}

/// Feed-forward network with tanh hidden layers and sigmoid outputs.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveNetwork {
    topology: Vec<usize>,
    layers: Vec<Layer>,
}

impl AdaptiveNetwork {
    /// Xavier-uniform initialization from `seed`.
    ///
    /// `topology` lists layer widths, input first; it must have at least two
    /// entries (checked by [`LearningConfig::validate`]).
    #[must_use]
    pub fn new(topology: &[usize], seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let layers = topology
            .windows(2)
            .map(|w| {
                let (fan_in, fan_out) = (w[0], w[1]);
                let limit = (6.0 / (fan_in + fan_out).max(1) as f64).sqrt();
                Layer {
                    weights: (0..fan_out)
                        .map(|_| (0..fan_in).map(|_| rng.gen_range(-limit..=limit)).collect())
                        .collect(),
                    biases: vec![0.0; fan_out],
                }
            })
            .collect();
        Self {
            topology: topology.to_vec(),
            layers,
        }
    }

    #[must_use]
    pub fn topology(&self) -> &[usize] {
        &self.topology
    }

    /// Input zero-padded or truncated to the input width.
    fn fit_input(&self, input: &[f64]) -> Vec<f64> {
        let width = self.topology.first().copied().unwrap_or(0);
        let mut v: Vec<f64> = input.iter().copied().take(width).collect();
        v.resize(width, 0.0);
        v
    }

    /// Activations of every layer, input first.
    fn activations(&self, input: &[f64]) -> Vec<Vec<f64>> {
        let mut acts = Vec::with_capacity(self.layers.len() + 1);
        acts.push(self.fit_input(input));
        let last = self.layers.len().saturating_sub(1);
        for (l, layer) in self.layers.iter().enumerate() {
            let z = layer.affine(&acts[l]);
            let a = if l == last {
                z.into_iter().map(sigmoid).collect()
            } else {
                z.into_iter().map(f64::tanh).collect()
            };
            acts.push(a);
        }
        acts
    }

    /// Pure inference.
    #[must_use]
    pub fn forward(&self, input: &[f64]) -> Vec<f64> {
        self.activations(input).pop().unwrap_or_default()
    }

    /// One forward, backward, and weight update on `sample`.
    pub fn train_step(&mut self, sample: &TrainingSample, learning_rate: f64) -> StepOutcome {
        let acts = self.activations(&sample.input_features);
        let output = acts.last().map_or(&[][..], Vec::as_slice);
        let before = bit_error(output, &sample.target_output);

        // Cross-entropy gradient at the sigmoid outputs; unsupervised
        // outputs beyond the target width get no gradient.
        let mut delta: Vec<f64> = output
            .iter()
            .enumerate()
            .map(|(i, o)| sample.target_output.get(i).map_or(0.0, |t| o - t))
            .collect();

        for l in (0..self.layers.len()).rev() {
            let below = &acts[l];
            let next_delta = (l > 0).then(|| {
                let layer = &self.layers[l];
                (0..layer.inputs())
                    .map(|j| {
                        let back: f64 = layer
                            .weights
                            .iter()
                            .zip(&delta)
                            .map(|(row, d)| row[j] * d)
                            .sum();
                        back * below[j].mul_add(-below[j], 1.0)
                    })
                    .collect::<Vec<f64>>()
            });
            let layer = &mut self.layers[l];
            for ((row, b), d) in layer.weights.iter_mut().zip(&mut layer.biases).zip(&delta) {
                let step = learning_rate * d;
                for (w, x) in row.iter_mut().zip(below) {
                    *w -= step * x;
                }
                *b -= step;
            }
            if let Some(nd) = next_delta {
                delta = nd;
            }
        }

        let after = bit_error(&self.forward(&sample.input_features), &sample.target_output);
        StepOutcome { before, after }
    }

    /// Whether the network reproduces `sample` to `threshold` bit accuracy.
    #[must_use]
    pub fn learned(&self, sample: &TrainingSample, threshold: f64) -> bool {
        bit_accuracy(&self.forward(&sample.input_features), &sample.target_output) >= threshold
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Mean squared error over the supervised outputs.
#[must_use]
pub fn bit_error(output: &[f64], target: &[f64]) -> f64 {
    let n = output.len().min(target.len());
    if n == 0 {
        return 0.0;
    }
    output
        .iter()
        .zip(target)
        .map(|(o, t)| (o - t) * (o - t))
        .sum::<f64>()
        / n as f64
}

/// Fraction of supervised outputs on the correct side of 0.5.
#[must_use]
pub fn bit_accuracy(output: &[f64], target: &[f64]) -> f64 {
    let n = output.len().min(target.len());
    if n == 0 {
        return 0.0;
    }
    let correct = output
        .iter()
        .zip(target)
        .filter(|(o, t)| (**o > 0.5) == (**t > 0.5))
        .count();
    correct as f64 / n as f64
}

/// Nonce from the first 32 outputs (most significant bit first) and the
/// normalized mean distance of those outputs from 0.5.
#[must_use]
pub fn decode_outputs(output: &[f64]) -> (u32, f64) {
    let bits = &output[..output.len().min(NONCE_BITS)];
    if bits.is_empty() {
        return (0, 0.0);
    }
    let value = bits
        .iter()
        .enumerate()
        .filter(|(_, o)| **o > 0.5)
        .fold(0_u32, |v, (i, _)| v | (1 << (31 - i)));
    let confidence = bits.iter().map(|o| (o - 0.5).abs()).sum::<f64>() / bits.len() as f64 * 2.0;
    (value, confidence.clamp(0.0, 1.0))
}

/// Summary of one training run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub samples: usize,
    pub epochs: usize,
    pub final_error: f64,
    /// Fraction of samples reproduced to the configured bit accuracy.
    pub success_rate: f64,
    pub succeeded: bool,
}

impl TrainingReport {
    const fn skipped() -> Self {
        Self {
            samples: 0,
            epochs: 0,
            final_error: 0.0,
            success_rate: 0.0,
            succeeded: false,
        }
    }
}

/// The [`Predictor`] backed by an [`AdaptiveNetwork`].
///
/// The network sits behind its own lock. Training runs on a copy and swaps
/// it in at the end, so inference is never blocked for a whole run. Single
/// updates that land while a run holds its copy are queued and replayed onto
/// the trained copy before the swap.
pub struct AdaptivePredictor {
    network: RwLock<AdaptiveNetwork>,
    config: RwLock<LearningConfig>,
    learning: Arc<LearningStateMachine>,
    /// `Some` while a training run is in progress.
    replay: Mutex<Option<Vec<TrainingSample>>>,
}

impl AdaptivePredictor {
    /// Allocate a network for `config.topology`.
    ///
    /// # Errors
    /// Returns [`EngineError::InitializationFailure`] when the configuration
    /// does not validate.
    pub fn new(
        config: LearningConfig,
        learning: Arc<LearningStateMachine>,
    ) -> Result<Self, EngineError> {
        config
            .validate()
            .map_err(|e| EngineError::InitializationFailure(format!("adaptive predictor: {e}")))?;
        let network = AdaptiveNetwork::new(&config.topology, config.seed);
        info!(topology = ?config.topology, "adaptive predictor initialized");
        Ok(Self {
            network: RwLock::new(network),
            config: RwLock::new(config),
            learning,
            replay: Mutex::new(None),
        })
    }

    fn config(&self) -> LearningConfig {
        self.config.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Copy the network for a training run and start queueing updates.
    fn begin_run(&self) -> AdaptiveNetwork {
        let mut replay = self.replay.lock().unwrap_or_else(PoisonError::into_inner);
        *replay = Some(Vec::new());
        self.network.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Close a run. `Some(trained)` gets the queued updates replayed and is
    /// installed; `None` keeps the live network, which already has them.
    fn end_run(&self, trained: Option<AdaptiveNetwork>) {
        let mut replay = self.replay.lock().unwrap_or_else(PoisonError::into_inner);
        let queued = replay.take().unwrap_or_default();
        let Some(mut network) = trained else {
            return;
        };
        let lr = self.config().learning_rate;
        for sample in &queued {
            network.train_step(sample, lr);
        }
        if !queued.is_empty() {
            debug!(replayed = queued.len(), "updates replayed onto trained network");
        }
        self.install(network);
    }

    fn install(&self, network: AdaptiveNetwork) {
        *self.network.write().unwrap_or_else(PoisonError::into_inner) = network;
    }

    /// Apply new learning parameters. A topology change reallocates the
    /// network and resets the learning state.
    ///
    /// # Errors
    /// Returns [`EngineError::Config`] if `config` does not validate.
    pub fn reconfigure(&self, config: LearningConfig) -> Result<(), EngineError> {
        config.validate()?;
        let mut current = self.config.write().unwrap_or_else(PoisonError::into_inner);
        if current.topology != config.topology {
            self.install(AdaptiveNetwork::new(&config.topology, config.seed));
            self.learning.reset();
            info!(topology = ?config.topology, "adaptive network reallocated");
        }
        *current = config;
        Ok(())
    }

    #[must_use]
    pub fn topology(&self) -> Vec<usize> {
        self.config().topology
    }

    #[must_use]
    pub fn learning_state(&self) -> LearningState {
        self.learning.current()
    }

    /// Pure inference on a feature vector.
    #[must_use]
    pub fn forward(&self, features: &[f64]) -> Vec<f64> {
        self.network
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .forward(features)
    }

    /// One supervised step at the configured rate. Returns whether the
    /// sample's error went down.
    pub fn update(&self, sample: &TrainingSample) -> bool {
        let lr = self.config().learning_rate;
        let mut replay = self.replay.lock().unwrap_or_else(PoisonError::into_inner);
        let improved = self
            .network
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .train_step(sample, lr)
            .improved();
        if let Some(queue) = replay.as_mut() {
            queue.push(sample.clone());
        }
        improved
    }

    /// Train an untrained model.
    ///
    /// Moves `Uninitialized → InitialLearning`, then to `ActiveMining` when
    /// the success rate reaches the configured threshold, otherwise `Error`.
    ///
    /// # Errors
    /// - [`EngineError::InitializationFailure`] for an empty sample set
    /// - [`EngineError::InvalidTransition`] unless currently `Uninitialized`
    /// - [`EngineError::LearningDivergence`] when epoch error stops falling
    ///   for `divergence_patience` epochs (state moves to `Error`)
    pub fn train_initial(
        &self,
        samples: &[TrainingSample],
        max_epochs: usize,
    ) -> Result<TrainingReport, EngineError> {
        if samples.is_empty() {
            return Err(EngineError::InitializationFailure(
                "no training samples".into(),
            ));
        }
        self.learning.transition(LearningState::InitialLearning)?;
        let cfg = self.config();
        let mut network = self.begin_run();
        let mut rng = ChaCha8Rng::seed_from_u64(cfg.seed);
        let mut order: Vec<usize> = (0..samples.len()).collect();
        let mut best = f64::INFINITY;
        let mut stale = 0;
        let mut epochs = 0;
        let mut epoch_error = f64::INFINITY;

        for epoch in 0..max_epochs {
            order.shuffle(&mut rng);
            epoch_error = order
                .iter()
                .map(|&i| network.train_step(&samples[i], cfg.learning_rate).before)
                .sum::<f64>()
                / samples.len() as f64;
            epochs = epoch + 1;
            debug!(epoch, error = epoch_error, "initial training epoch");

            if epoch_error < cfg.adaptation_threshold {
                break;
            }
            if epoch_error < best - cfg.divergence_min_delta {
                best = epoch_error;
                stale = 0;
            } else {
                stale += 1;
                if stale >= cfg.divergence_patience {
                    self.end_run(None);
                    self.learning.fail();
                    warn!(epochs, error = epoch_error, "initial training diverged");
                    return Err(EngineError::LearningDivergence(format!(
                        "no improvement for {stale} epochs (epoch {epochs}, error {epoch_error:.6})"
                    )));
                }
            }
        }

        let report = finish(
            &network,
            samples,
            (epochs, epoch_error),
            cfg.sample_bit_accuracy,
            cfg.initial_success_rate,
        );
        self.end_run(Some(network));
        self.settle(report, "initial training");
        Ok(report)
    }

    /// Re-train on the validated samples of `history` at the reduced rate.
    ///
    /// No validated samples is a no-op that leaves the state alone.
    /// Otherwise moves `ActiveMining | Error → RetroLearning`, then to
    /// `ActiveMining` at the retro success threshold, else `Error`.
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidTransition`] from any other state.
    pub fn retro_learn(&self, history: &[TrainingSample]) -> Result<TrainingReport, EngineError> {
        let validated: Vec<&TrainingSample> = history.iter().filter(|s| s.is_validated).collect();
        if validated.is_empty() {
            return Ok(TrainingReport::skipped());
        }
        self.learning.transition(LearningState::RetroLearning)?;
        let cfg = self.config();
        let lr = cfg.learning_rate * cfg.retro_rate_scale;
        let mut network = self.begin_run();
        let mut rng = ChaCha8Rng::seed_from_u64(cfg.seed ^ history.len() as u64);
        let mut order: Vec<usize> = (0..validated.len()).collect();
        let mut epoch_error = f64::INFINITY;
        let mut epochs = 0;

        for epoch in 0..cfg.retro_epochs.max(1) {
            order.shuffle(&mut rng);
            epoch_error = order
                .iter()
                .map(|&i| network.train_step(validated[i], lr).before)
                .sum::<f64>()
                / validated.len() as f64;
            epochs = epoch + 1;
            if epoch_error < cfg.adaptation_threshold {
                break;
            }
        }

        let owned: Vec<TrainingSample> = validated.into_iter().cloned().collect();
        let report = finish(
            &network,
            &owned,
            (epochs, epoch_error),
            cfg.sample_bit_accuracy,
            cfg.retro_success_rate,
        );
        self.end_run(Some(network));
        self.settle(report, "retro learning");
        Ok(report)
    }

    fn settle(&self, report: TrainingReport, phase: &str) {
        if report.succeeded {
            if let Err(e) = self.learning.transition(LearningState::ActiveMining) {
                warn!(error = %e, phase, "could not enter active mining");
            }
            info!(
                phase,
                success_rate = report.success_rate,
                epochs = report.epochs,
                "training succeeded"
            );
        } else {
            self.learning.fail();
            warn!(
                phase,
                success_rate = report.success_rate,
                epochs = report.epochs,
                "training below success threshold"
            );
        }
    }

    /// Current weights as a serializable model.
    #[must_use]
    pub fn export_model(&self) -> ExportedModel {
        self.network.read().unwrap_or_else(PoisonError::into_inner).export()
    }

    /// Replace the weights with `model`.
    ///
    /// # Errors
    /// Returns [`EngineError::StateImport`] if the model's topology differs
    /// from the configured one or its shapes are inconsistent; the current
    /// weights are kept.
    pub fn import_model(&self, model: &ExportedModel) -> Result<(), EngineError> {
        let topology = self.topology();
        if model.topology != topology {
            return Err(EngineError::StateImport(format!(
                "topology {:?} does not match configured {:?}",
                model.topology, topology
            )));
        }
        let network = AdaptiveNetwork::from_exported(model)?;
        self.install(network);
        Ok(())
    }
}

fn finish(
    network: &AdaptiveNetwork,
    samples: &[TrainingSample],
    (epochs, final_error): (usize, f64),
    bit_threshold: f64,
    success_threshold: f64,
) -> TrainingReport {
    let learned = samples.iter().filter(|s| network.learned(s, bit_threshold)).count();
    let success_rate = learned as f64 / samples.len().max(1) as f64;
    TrainingReport {
        samples: samples.len(),
        epochs,
        final_error,
        success_rate,
        succeeded: success_rate >= success_threshold,
    }
}

impl Predictor for AdaptivePredictor {
    fn id(&self) -> PredictorId {
        PredictorId::Network
    }

    fn predict(&self, header: &BlockHeader, difficulty: u32) -> Result<Prediction, EngineError> {
        if !self.learning.current().allows_learned_predictions() {
            return Err(EngineError::LearningDivergence(
                "adaptive predictor disabled until learning is reset".into(),
            ));
        }
        let start = Instant::now();
        let features = extract_features(header, difficulty);
        let (value, confidence) = decode_outputs(&self.forward(&features.expanded));
        Ok(Prediction::new(
            value,
            confidence,
            start.elapsed(),
            PredictorId::Network,
        ))
    }
}
