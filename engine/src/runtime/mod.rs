// SPDX-License-Identifier: AGPL-3.0-only

//! Mining engine: component wiring, periodic cycles, and the control surface.
//!
//! ```text
//!              ┌──────────── mining cycle ────────────┐
//!   work ──► FusionCoordinator ──► direct hit? ──► solution
//!              │                       │ no
//!              │              EntropyCandidateGenerator
//!              │                       │ windows
//!              │              ParallelSearchExecutor ──► solution
//!              ▼
//!        validate ──► CrossSystemLearner
//!
//!   learning cycle : bootstrap / initial training / retro-learning
//!   metrics cycle  : AdaptiveWeightOptimizer
//! ```
//!
//! State is split across independent locks: the current work and solutions
//! (mining), the learning state machine and network, and the training
//! history (prediction data). Fusion weights and fusion history live inside
//! the coordinator. No lock is held across a dispatch, a search, or a
//! training run.

/// Periodic worker threads.
pub mod workers;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, SystemTime};

use cortexmine_forge::probe::probe_devices;
use cortexmine_forge::select::{select_backend, Reason};
use cortexmine_forge::{BackendHandle, BackendMode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{EngineConfig, LearningConfig};
use crate::entropy::{EntropyCandidateGenerator, Strategy};
use crate::error::EngineError;
use crate::fusion::{
    AdaptiveWeightOptimizer, CrossSystemLearner, FusedPrediction, FusionCoordinator,
    SelectedMethod, Weights,
};
use crate::header::{validate_nonce_candidate, BlockHeader};
use crate::learning::{
    bootstrap_samples, LearningState, LearningStateMachine, TrainingHistory, TrainingSample,
};
use crate::metrics::{MetricsRegistry, MetricsSnapshot};
use crate::predictor::{
    AdaptivePredictor, BioPredictor, DeterministicPredictor, ExportedModel, Predictor, PredictorId,
};
use crate::search::ParallelSearchExecutor;
use crate::tolerances::{FEATURE_DIM, SOLUTION_VALIDATION_SCORE};
use workers::{spawn_periodic, Workers};

/// Work submitted by the control surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiningConfig {
    pub header: BlockHeader,
    /// Required leading zero bits of the digest.
    pub difficulty: u32,
}

impl MiningConfig {
    /// Parse `wire` into work.
    ///
    /// # Errors
    /// Returns [`EngineError::MalformedHeader`] for a bad header.
    pub fn from_wire(wire: &str, difficulty: u32) -> Result<Self, EngineError> {
        Ok(Self {
            header: BlockHeader::parse(wire)?,
            difficulty,
        })
    }
}

/// Result of one invocation of a periodic cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The cycle ran to completion.
    Completed,
    /// The same cycle was already running; nothing was queued.
    Skipped,
    /// Nothing to do (no work submitted).
    Idle,
}

/// How a solution was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolutionOrigin {
    /// A predictor's value met the target directly.
    Prediction(PredictorId),
    /// The fused value met the target directly.
    Fused,
    /// Found by windowed search from a candidate of this strategy.
    Search(Strategy),
}

/// A nonce that met the target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Solution {
    pub header: BlockHeader,
    pub difficulty: u32,
    pub nonce: u32,
    /// Hex of the proof-of-work digest for `nonce`.
    pub digest: String,
    pub origin: SolutionOrigin,
    pub found_at: SystemTime,
}

/// Serializable engine state for a persistence collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineState {
    pub model: ExportedModel,
    pub weights: Weights,
    pub learning_state: LearningState,
}

/// Point-in-time view of the whole engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticReport {
    pub running: bool,
    pub learning_state: LearningState,
    pub backend_mode: BackendMode,
    pub backend: String,
    pub weights: Weights,
    pub topology: Vec<usize>,
    pub work: Option<MiningConfig>,
    pub training_samples: usize,
    pub fusion_history: usize,
    pub search_threads: usize,
    pub recent_solutions: Vec<Solution>,
    pub metrics: MetricsSnapshot,
}

#[derive(Debug, Default)]
struct MiningState {
    work: Option<MiningConfig>,
    solutions: VecDeque<Solution>,
}

/// Non-reentrancy flag for one periodic cycle.
#[derive(Debug, Default)]
struct CycleGuard(AtomicBool);

impl CycleGuard {
    fn try_enter(&self) -> Option<CycleToken<'_>> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CycleToken(&self.0))
    }
}

struct CycleToken<'a>(&'a AtomicBool);

impl Drop for CycleToken<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Owns every component and exposes the synchronous control surface.
///
/// Periodic workers hold only weak references, so dropping the last
/// `Arc<MiningEngine>` stops them.
pub struct MiningEngine {
    config: Mutex<EngineConfig>,
    metrics: Arc<MetricsRegistry>,
    backend: BackendHandle,
    learning: Arc<LearningStateMachine>,
    adaptive: Arc<AdaptivePredictor>,
    generator: Arc<EntropyCandidateGenerator>,
    fusion: FusionCoordinator,
    optimizer: AdaptiveWeightOptimizer,
    search: ParallelSearchExecutor,
    training: Arc<Mutex<TrainingHistory>>,
    mining: Mutex<MiningState>,
    stop: Arc<AtomicBool>,
    workers: Mutex<Option<Workers>>,
    mining_guard: CycleGuard,
    learning_guard: CycleGuard,
    metrics_guard: CycleGuard,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MiningEngine {
    /// Validate `config`, bind a backend, and wire the components.
    ///
    /// # Errors
    /// - [`EngineError::Config`] if `config` does not validate
    /// - [`EngineError::InitializationFailure`] if the adaptive predictor
    ///   or the search pool cannot start
    /// - [`EngineError::Forge`] if no backend at all can start
    pub fn new(config: EngineConfig) -> Result<Arc<Self>, EngineError> {
        config.validate()?;
        let devices = match config.backend.mode {
            BackendMode::HardwareBacked => probe_devices(),
            BackendMode::SimulatedNetwork => Vec::new(),
        };
        let selection = select_backend(
            config.backend.mode,
            &devices,
            &config.backend.simulated,
            config.backend.saturation,
        )?;
        let backend = BackendHandle::new(selection.backend);

        let metrics = Arc::new(MetricsRegistry::new());
        let learning = Arc::new(LearningStateMachine::new());
        let adaptive = Arc::new(AdaptivePredictor::new(
            config.learning.clone(),
            Arc::clone(&learning),
        )?);
        let generator = Arc::new(EntropyCandidateGenerator::new(
            backend.clone(),
            config.entropy.clone(),
        ));
        let training = Arc::new(Mutex::new(TrainingHistory::new(
            config.learning.history_capacity,
        )));
        let predictors: Vec<Arc<dyn Predictor>> = vec![
            Arc::new(DeterministicPredictor),
            Arc::clone(&adaptive) as Arc<dyn Predictor>,
            Arc::new(BioPredictor::new(Arc::clone(&generator), Arc::clone(&learning))),
        ];
        let learner = CrossSystemLearner::new(
            Arc::clone(&adaptive),
            Arc::clone(&generator),
            Arc::clone(&training),
        );
        let fusion = FusionCoordinator::new(
            predictors,
            config.fusion.clone(),
            config.optimizer.clone(),
            Arc::clone(&metrics),
        )?
        .with_learner(learner);
        let stop = Arc::new(AtomicBool::new(false));
        let search =
            ParallelSearchExecutor::new(&config.search, Arc::clone(&stop), Arc::clone(&metrics))?;

        info!(
            backend = %backend.mode(),
            reason = ?selection.reason,
            threads = search.threads(),
            "mining engine ready"
        );
        Ok(Arc::new(Self {
            optimizer: AdaptiveWeightOptimizer::new(config.optimizer.clone()),
            config: Mutex::new(config),
            metrics,
            backend,
            learning,
            adaptive,
            generator,
            fusion,
            search,
            training,
            mining: Mutex::new(MiningState::default()),
            stop,
            workers: Mutex::new(None),
            mining_guard: CycleGuard::default(),
            learning_guard: CycleGuard::default(),
            metrics_guard: CycleGuard::default(),
        }))
    }

    #[must_use]
    pub fn config(&self) -> EngineConfig {
        lock(&self.config).clone()
    }

    #[must_use]
    pub fn learning_state(&self) -> LearningState {
        self.learning.current()
    }

    #[must_use]
    pub const fn backend(&self) -> &BackendHandle {
        &self.backend
    }

    #[must_use]
    pub const fn fusion(&self) -> &FusionCoordinator {
        &self.fusion
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        lock(&self.workers).is_some()
    }

    /// Current work, if any.
    #[must_use]
    pub fn work(&self) -> Option<MiningConfig> {
        lock(&self.mining).work.clone()
    }

    /// Replace the current work without touching the workers.
    ///
    /// With no workers running this also clears a stop left by
    /// [`stop_mining`](Self::stop_mining), so direct cycles search again.
    pub fn set_work(&self, work: MiningConfig) {
        info!(difficulty = work.difficulty, header = %work.header, "work submitted");
        if lock(&self.workers).is_none() {
            self.stop.store(false, Ordering::Release);
        }
        lock(&self.mining).work = Some(work);
    }

    /// Solutions found so far, oldest first.
    #[must_use]
    pub fn solutions(&self) -> Vec<Solution> {
        lock(&self.mining).solutions.iter().cloned().collect()
    }

    #[must_use]
    pub fn training_len(&self) -> usize {
        lock(&self.training).len()
    }

    // ── control surface ───────────────────────────────────────────────

    /// Bind a backend for `mode`, falling back to the simulated network when
    /// hardware is unavailable. Returns why the bound backend was chosen.
    ///
    /// # Errors
    /// Returns [`EngineError::Forge`] if not even the fallback starts; the
    /// previous backend stays bound.
    pub fn set_backend_mode(&self, mode: BackendMode) -> Result<Reason, EngineError> {
        let (sim, saturation) = {
            let config = lock(&self.config);
            (config.backend.simulated.clone(), config.backend.saturation)
        };
        let devices = match mode {
            BackendMode::HardwareBacked => probe_devices(),
            BackendMode::SimulatedNetwork => Vec::new(),
        };
        let selection = select_backend(mode, &devices, &sim, saturation)?;
        let previous = self.backend.swap(selection.backend);
        previous.reset();
        lock(&self.config).backend.mode = mode;
        Ok(selection.reason)
    }

    /// Apply new learning parameters.
    ///
    /// # Errors
    /// Returns [`EngineError::Config`] if `params` does not validate.
    pub fn configure_learning(&self, params: LearningConfig) -> Result<(), EngineError> {
        self.adaptive.reconfigure(params.clone())?;
        lock(&self.config).learning = params;
        Ok(())
    }

    /// Submit `work` and start the three periodic workers.
    ///
    /// # Errors
    /// - [`EngineError::AlreadyRunning`] if workers are running
    /// - [`EngineError::InitializationFailure`] if a worker cannot spawn
    pub fn start_mining(self: &Arc<Self>, work: MiningConfig) -> Result<(), EngineError> {
        let mut slot = lock(&self.workers);
        if slot.is_some() {
            return Err(EngineError::AlreadyRunning);
        }
        info!(difficulty = work.difficulty, header = %work.header, "work submitted");
        lock(&self.mining).work = Some(work);
        self.stop.store(false, Ordering::Release);

        let schedule = lock(&self.config).schedule.clone();
        let mut workers = Workers::default();
        let tasks: [(&str, u64, fn(&Self)); 3] = [
            ("mining-cycle", schedule.mining_interval_ms, |e| {
                if let Err(err) = e.run_mining_cycle() {
                    warn!(error = %err, "mining cycle failed");
                }
            }),
            ("learning-cycle", schedule.learning_interval_ms, |e| {
                e.run_learning_cycle();
            }),
            ("metrics-cycle", schedule.metrics_interval_ms, |e| {
                e.run_metrics_cycle();
            }),
        ];
        for (name, interval_ms, cycle) in tasks {
            let engine: Weak<Self> = Arc::downgrade(self);
            let spawned = spawn_periodic(
                name,
                Duration::from_millis(interval_ms),
                Arc::clone(&self.stop),
                move || match engine.upgrade() {
                    Some(e) => {
                        cycle(&e);
                        true
                    }
                    None => false,
                },
            );
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    self.stop.store(true, Ordering::Release);
                    workers.shutdown();
                    return Err(e);
                }
            }
        }
        *slot = Some(workers);
        info!("mining started");
        Ok(())
    }

    /// Stop the workers and any in-flight search, and clear the work.
    ///
    /// # Errors
    /// Returns [`EngineError::NotRunning`] if mining was not started.
    pub fn stop_mining(&self) -> Result<(), EngineError> {
        let workers = lock(&self.workers).take().ok_or(EngineError::NotRunning)?;
        self.stop.store(true, Ordering::Release);
        workers.shutdown();
        lock(&self.mining).work = None;
        info!("mining stopped");
        Ok(())
    }

    #[must_use]
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    #[must_use]
    pub fn diagnostic_report(&self) -> DiagnosticReport {
        let backend = self.backend.current();
        let (work, recent_solutions) = {
            let mining = lock(&self.mining);
            (
                mining.work.clone(),
                mining.solutions.iter().rev().take(10).cloned().collect(),
            )
        };
        DiagnosticReport {
            running: self.is_running(),
            learning_state: self.learning.current(),
            backend_mode: backend.mode(),
            backend: backend.diagnostic_info(),
            weights: self.fusion.weights(),
            topology: self.adaptive.topology(),
            work,
            training_samples: self.training_len(),
            fusion_history: self.fusion.history().len(),
            search_threads: self.search.threads(),
            recent_solutions,
            metrics: self.metrics.snapshot(),
        }
    }

    /// Model weights, fusion weights and learning state as a JSON blob.
    ///
    /// # Errors
    /// Returns [`EngineError::StateExport`] if encoding fails.
    pub fn export_state(&self) -> Result<Vec<u8>, EngineError> {
        let state = EngineState {
            model: self.adaptive.export_model(),
            weights: self.fusion.weights(),
            learning_state: self.learning.current(),
        };
        serde_json::to_vec(&state).map_err(|e| EngineError::StateExport(e.to_string()))
    }

    /// Restore a blob from [`export_state`](Self::export_state).
    ///
    /// Returns `false`, leaving the engine unchanged, if the blob does not
    /// parse or its topology differs from the configured one.
    pub fn import_state(&self, blob: &[u8]) -> bool {
        let state: EngineState = match serde_json::from_slice(blob) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "state blob rejected");
                return false;
            }
        };
        if let Err(e) = self.adaptive.import_model(&state.model) {
            warn!(error = %e, "state blob rejected");
            return false;
        }
        self.fusion.set_weights(state.weights);
        self.learning.restore(state.learning_state);
        info!(state = ?state.learning_state, "engine state imported");
        true
    }

    /// Leave `Error` (or any state) for `Uninitialized`; the next learning
    /// cycle retrains from bootstrap and stored samples.
    pub fn reset_learning(&self) {
        self.learning.reset();
    }

    // ── periodic cycles ───────────────────────────────────────────────

    /// One mining attempt on the current work.
    ///
    /// Tries the fused prediction's values directly, then searches the
    /// candidate windows. A solution rolls the work forward by one second
    /// of header timestamp.
    ///
    /// # Errors
    /// Returns [`EngineError::AllPredictorsUnavailable`] when no predictor
    /// produced a value.
    pub fn run_mining_cycle(&self) -> Result<CycleOutcome, EngineError> {
        let Some(_token) = self.mining_guard.try_enter() else {
            self.metrics.record_skipped_cycle();
            return Ok(CycleOutcome::Skipped);
        };
        let Some(work) = self.work() else {
            return Ok(CycleOutcome::Idle);
        };
        let (header, difficulty) = (&work.header, work.difficulty);

        let fused = self.fusion.predict_fused(header, difficulty)?;
        if let Some((nonce, origin, credited)) = direct_hit(&fused) {
            self.fusion.validate(&fused, true, credited);
            self.record_solution(&work, nonce, origin);
            return Ok(CycleOutcome::Completed);
        }

        let candidates = self.generator.generate(header, difficulty);
        let outcome = self.search.run(
            header,
            difficulty,
            &candidates.set.points,
            candidates.set.window_size,
        );
        match outcome.nonce {
            Some(nonce) => {
                let strategy = candidates
                    .set
                    .strategy_containing(nonce)
                    .unwrap_or(Strategy::Uniform);
                let bio_guided = strategy == Strategy::BioGuided;
                self.fusion
                    .validate(&fused, bio_guided, bio_guided.then_some(PredictorId::Bio));
                lock(&self.training).push(TrainingSample::for_value(
                    candidates.features.expanded,
                    nonce,
                    SOLUTION_VALIDATION_SCORE,
                    true,
                ));
                self.record_solution(&work, nonce, SolutionOrigin::Search(strategy));
            }
            None if outcome.cancelled => {
                debug!("search cancelled, prediction left unvalidated");
            }
            None => {
                self.fusion.validate(&fused, false, None);
            }
        }
        Ok(CycleOutcome::Completed)
    }

    fn record_solution(&self, work: &MiningConfig, nonce: u32, origin: SolutionOrigin) {
        self.metrics.record_solution();
        let digest = hex::encode(work.header.pow_digest(nonce));
        let capacity = lock(&self.config).schedule.solution_capacity.max(1);
        let mut mining = lock(&self.mining);
        info!(nonce, %digest, ?origin, difficulty = work.difficulty, "solution found");
        if mining.solutions.len() >= capacity {
            mining.solutions.pop_front();
        }
        mining.solutions.push_back(Solution {
            header: work.header.clone(),
            difficulty: work.difficulty,
            nonce,
            digest,
            origin,
            found_at: SystemTime::now(),
        });
        // roll forward only if the work was not replaced meanwhile
        if let Some(current) = mining.work.as_mut() {
            if current == work {
                current.header.timestamp = current.header.timestamp.wrapping_add(1);
                current.header.nonce = 0;
            }
        }
    }

    /// One step of the learning lifecycle.
    ///
    /// `Uninitialized` trains from bootstrap plus stored validated samples;
    /// `ActiveMining` retro-learns on validated samples when there are any;
    /// `Error` waits for [`reset_learning`](Self::reset_learning).
    pub fn run_learning_cycle(&self) -> CycleOutcome {
        let Some(_token) = self.learning_guard.try_enter() else {
            self.metrics.record_skipped_cycle();
            return CycleOutcome::Skipped;
        };
        let config = lock(&self.config).learning.clone();
        match self.learning.current() {
            LearningState::Uninitialized => {
                let mut samples =
                    bootstrap_samples(config.bootstrap_samples, FEATURE_DIM, config.seed);
                samples.extend(lock(&self.training).validated());
                match self.adaptive.train_initial(&samples, config.max_epochs) {
                    Ok(report) => info!(
                        succeeded = report.succeeded,
                        success_rate = report.success_rate,
                        epochs = report.epochs,
                        "initial training finished"
                    ),
                    Err(e) => warn!(error = %e, "initial training failed"),
                }
                CycleOutcome::Completed
            }
            LearningState::ActiveMining => {
                let validated = lock(&self.training).validated();
                if validated.is_empty() {
                    return CycleOutcome::Idle;
                }
                match self.adaptive.retro_learn(&validated) {
                    Ok(report) => debug!(
                        samples = report.samples,
                        success_rate = report.success_rate,
                        "retro-learning finished"
                    ),
                    Err(e) => warn!(error = %e, "retro-learning failed"),
                }
                CycleOutcome::Completed
            }
            LearningState::Error => {
                debug!("learning disabled until reset");
                CycleOutcome::Idle
            }
            LearningState::InitialLearning
            | LearningState::RetroLearning
            | LearningState::Optimizing => CycleOutcome::Idle,
        }
    }

    /// Recompute fusion weights from the validated history.
    pub fn run_metrics_cycle(&self) -> CycleOutcome {
        let Some(_token) = self.metrics_guard.try_enter() else {
            self.metrics.record_skipped_cycle();
            return CycleOutcome::Skipped;
        };
        let optimizing = self
            .learning
            .transition_from(LearningState::ActiveMining, LearningState::Optimizing);
        let weights = self.fusion.optimize(&self.optimizer);
        if optimizing {
            self.learning
                .transition_from(LearningState::Optimizing, LearningState::ActiveMining);
        }
        let snap = self.metrics.snapshot();
        debug!(
            sha = weights.sha,
            network = weights.network,
            bio = weights.bio,
            accuracy = snap.accuracy,
            hash_rate = snap.hybrid_hash_rate,
            "weights recomputed"
        );
        CycleOutcome::Completed
    }
}

impl Drop for MiningEngine {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(workers) = self
            .workers
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            workers.wake();
        }
    }
}

/// First predicted value that already meets the target: the selected one,
/// then each live source, then the fused value.
fn direct_hit(fused: &FusedPrediction) -> Option<(u32, SolutionOrigin, Option<PredictorId>)> {
    let (header, difficulty) = (&fused.header, fused.difficulty);
    let selected = match fused.selected_method {
        SelectedMethod::Source(id) => Some(id),
        SelectedMethod::Fusion => None,
    };
    let sources = selected
        .into_iter()
        .chain(PredictorId::ALL.into_iter().filter(move |id| Some(*id) != selected));
    for id in sources {
        let p = fused.prediction(id);
        if p.confidence > 0.0 && validate_nonce_candidate(header, difficulty, p.value) {
            return Some((p.value, SolutionOrigin::Prediction(id), Some(id)));
        }
    }
    validate_nonce_candidate(header, difficulty, fused.fused_value)
        .then_some((fused.fused_value, SolutionOrigin::Fused, None))
}
