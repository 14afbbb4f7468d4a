// SPDX-License-Identifier: AGPL-3.0-only
#![allow(clippy::unwrap_used)]

//! Integration tests: fusion dispatch through the public API.
//!
//! A predictor that never returns must not hold a dispatch past its
//! deadline, malformed headers are rejected before any prediction, and
//! every produced confidence stays in `[0, 1]`.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cortexmine_engine::config::{FusionConfig, OptimizerConfig};
use cortexmine_engine::metrics::MetricsRegistry;
use cortexmine_engine::predictor::DeterministicPredictor;
use cortexmine_engine::{
    BlockHeader, EngineError, FusionCoordinator, Prediction, Predictor, PredictorId,
};

/// Blocks forever on a channel nobody sends on.
struct NeverCompletes {
    id: PredictorId,
    gate: Mutex<mpsc::Receiver<()>>,
    _keep: mpsc::Sender<()>,
}

impl NeverCompletes {
    fn new(id: PredictorId) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            id,
            gate: Mutex::new(rx),
            _keep: tx,
        }
    }
}

impl Predictor for NeverCompletes {
    fn id(&self) -> PredictorId {
        self.id
    }
    fn predict(&self, _: &BlockHeader, _: u32) -> Result<Prediction, EngineError> {
        let _ = self.gate.lock().unwrap().recv();
        Err(EngineError::TimeoutExceeded(Duration::MAX))
    }
}

fn header() -> BlockHeader {
    let z = "0".repeat(64);
    BlockHeader::parse(&format!("1|{z}|{z}|1700000000|1d00ffff|0")).unwrap()
}

fn coordinator(deadline_ms: u64, predictors: Vec<Arc<dyn Predictor>>) -> FusionCoordinator {
    FusionCoordinator::new(
        predictors,
        FusionConfig {
            deadline_ms,
            ..FusionConfig::default()
        },
        OptimizerConfig::default(),
        Arc::new(MetricsRegistry::new()),
    )
    .unwrap()
}

#[test]
fn never_completing_predictor_respects_deadline() {
    let c = coordinator(
        300,
        vec![
            Arc::new(DeterministicPredictor),
            Arc::new(NeverCompletes::new(PredictorId::Network)),
            Arc::new(NeverCompletes::new(PredictorId::Bio)),
        ],
    );
    let start = Instant::now();
    let fused = c.predict_fused(&header(), 1).unwrap();
    let elapsed = start.elapsed();
    assert!(
        elapsed >= Duration::from_millis(250) && elapsed <= Duration::from_millis(350),
        "dispatch took {elapsed:?}"
    );
    let sha = fused.prediction(PredictorId::Sha);
    assert!(sha.confidence > 0.0);
    for id in [PredictorId::Network, PredictorId::Bio] {
        let p = fused.prediction(id);
        assert_eq!(p.value, 0);
        assert!(p.confidence.abs() < f64::EPSILON);
    }
}

#[test]
fn all_predictors_hung_is_a_hard_failure() {
    let c = coordinator(
        100,
        PredictorId::ALL
            .into_iter()
            .map(|id| Arc::new(NeverCompletes::new(id)) as Arc<dyn Predictor>)
            .collect(),
    );
    let start = Instant::now();
    assert!(matches!(
        c.predict_fused(&header(), 1),
        Err(EngineError::AllPredictorsUnavailable)
    ));
    assert!(start.elapsed() < Duration::from_millis(200));
}

#[test]
fn malformed_header_is_typed_error() {
    for wire in ["", "1|00|00", "1|00|00|1700000000|1d00ffff", "x|00|00|1|1d00ffff|0"] {
        assert!(
            matches!(BlockHeader::parse(wire), Err(EngineError::MalformedHeader(_))),
            "{wire:?} accepted"
        );
    }
}

#[test]
fn deterministic_predictor_is_repeatable_and_bounded() {
    let h = header();
    let a = DeterministicPredictor.predict(&h, 1).unwrap();
    let b = DeterministicPredictor.predict(&h, 1).unwrap();
    assert_eq!(a.value, b.value);
    assert!((a.confidence - b.confidence).abs() < f64::EPSILON);
    assert!((0.0..=1.0).contains(&a.confidence));
}
