// SPDX-License-Identifier: AGPL-3.0-only

#![allow(clippy::unwrap_used)]

use std::thread;

use super::*;

struct Fixed {
    id: PredictorId,
    value: u32,
    confidence: f64,
}

impl Predictor for Fixed {
    fn id(&self) -> PredictorId {
        self.id
    }
    fn predict(&self, _: &BlockHeader, _: u32) -> Result<Prediction, EngineError> {
        Ok(Prediction::new(
            self.value,
            self.confidence,
            Duration::ZERO,
            self.id,
        ))
    }
}

struct Failing(PredictorId);

impl Predictor for Failing {
    fn id(&self) -> PredictorId {
        self.0
    }
    fn predict(&self, _: &BlockHeader, _: u32) -> Result<Prediction, EngineError> {
        Err(EngineError::BackendUnavailable("test".into()))
    }
}

struct Slow(PredictorId, Duration);

impl Predictor for Slow {
    fn id(&self) -> PredictorId {
        self.0
    }
    fn predict(&self, _: &BlockHeader, _: u32) -> Result<Prediction, EngineError> {
        thread::sleep(self.1);
        Ok(Prediction::new(7, 1.0, self.1, self.0))
    }
}

fn fixed(id: PredictorId, value: u32, confidence: f64) -> Arc<dyn Predictor> {
    Arc::new(Fixed {
        id,
        value,
        confidence,
    })
}

fn header() -> BlockHeader {
    let z = "0".repeat(64);
    BlockHeader::parse(&format!("1|{z}|{z}|1700000000|1d00ffff|0")).unwrap()
}

fn coordinator(predictors: Vec<Arc<dyn Predictor>>, config: FusionConfig) -> FusionCoordinator {
    FusionCoordinator::new(
        predictors,
        config,
        OptimizerConfig::default(),
        Arc::new(MetricsRegistry::new()),
    )
    .unwrap()
}

fn all_fixed() -> Vec<Arc<dyn Predictor>> {
    vec![
        fixed(PredictorId::Sha, 100, 0.9),
        fixed(PredictorId::Network, 200, 0.5),
        fixed(PredictorId::Bio, 300, 0.4),
    ]
}

fn preds(values: [u32; 3], conf: [f64; 3]) -> [Prediction; 3] {
    PredictorId::ALL.map(|id| {
        let i = id.index();
        Prediction::new(values[i], conf[i], Duration::ZERO, id)
    })
}

#[test]
fn weighted_average_uses_configured_weights() {
    let p = preds([100, 200, 300], [1.0, 0.0, 0.0]);
    let (v, _, w) = fuse(
        &p,
        Weights::from_array([0.5, 0.5, 0.0]),
        [0.5; 3],
        FusionPolicy::WeightedAverage,
    );
    assert_eq!(v, 150);
    assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-12);
}

#[test]
fn confidence_based_degenerates_to_average() {
    let p = preds([0, 300, 600], [0.0; 3]);
    let (v, c, _) = fuse(&p, Weights::default(), [0.5; 3], FusionPolicy::ConfidenceBased);
    assert_eq!(v, 300);
    assert!(c.abs() < f64::EPSILON);
}

#[test]
fn adaptive_falls_back_when_rates_vanish() {
    let p = preds([100, 200, 300], [0.2, 0.2, 0.6]);
    let adaptive = fuse(&p, Weights::default(), [0.0; 3], FusionPolicy::Adaptive);
    let by_conf = fuse(&p, Weights::default(), [0.0; 3], FusionPolicy::ConfidenceBased);
    assert_eq!(adaptive, by_conf);
}

#[test]
fn adaptive_multiplies_weight_confidence_rate() {
    let p = preds([0, 1000, 0], [1.0, 1.0, 1.0]);
    let (v, _, w) = fuse(
        &p,
        Weights::from_array([0.5, 0.5, 0.0]),
        [0.0, 1.0, 1.0],
        FusionPolicy::Adaptive,
    );
    assert_eq!(v, 1000);
    assert!((w[1] - 1.0).abs() < 1e-12);
}

#[test]
fn selection_prefers_confident_successful_source() {
    let p = preds([1, 2, 3], [0.9, 0.8, 0.1]);
    assert_eq!(
        select_method(&p, [0.1, 0.9, 0.5], 0.3),
        SelectedMethod::Source(PredictorId::Network)
    );
    let weak = preds([1, 2, 3], [0.2, 0.1, 0.1]);
    assert_eq!(select_method(&weak, [0.5; 3], 0.3), SelectedMethod::Fusion);
}

#[test]
fn weights_normalize() {
    let w = Weights::from_array([2.0, 2.0, -4.0]).normalized();
    assert!(w.is_normalized());
    assert!(w.bio.abs() < f64::EPSILON);
    assert!(Weights::from_array([0.0; 3]).normalized().is_normalized());
}

#[test]
fn duplicate_or_missing_predictor_is_rejected() {
    let dup = vec![
        fixed(PredictorId::Sha, 1, 1.0),
        fixed(PredictorId::Sha, 2, 1.0),
        fixed(PredictorId::Bio, 3, 1.0),
    ];
    assert!(matches!(
        FusionCoordinator::new(
            dup,
            FusionConfig::default(),
            OptimizerConfig::default(),
            Arc::new(MetricsRegistry::new())
        ),
        Err(EngineError::InitializationFailure(_))
    ));
    let missing = vec![fixed(PredictorId::Sha, 1, 1.0)];
    assert!(FusionCoordinator::new(
        missing,
        FusionConfig::default(),
        OptimizerConfig::default(),
        Arc::new(MetricsRegistry::new())
    )
    .is_err());
}

#[test]
fn fused_prediction_is_recorded() {
    let c = coordinator(all_fixed(), FusionConfig::default());
    let f = c.predict_fused(&header(), 1).unwrap();
    assert!((0.0..=1.0).contains(&f.fused_confidence));
    assert_eq!(f.selected_method, SelectedMethod::Source(PredictorId::Sha));
    assert_eq!(f.selected_value(), 100);
    assert!(!f.validated);
    assert_eq!(c.history().len(), 1);
}

#[test]
fn failed_source_becomes_placeholder() {
    let c = coordinator(
        vec![
            fixed(PredictorId::Sha, 100, 0.9),
            Arc::new(Failing(PredictorId::Network)),
            fixed(PredictorId::Bio, 300, 0.4),
        ],
        FusionConfig::default(),
    );
    let f = c.predict_fused(&header(), 1).unwrap();
    let net = f.prediction(PredictorId::Network);
    assert_eq!(net.value, 0);
    assert!(net.confidence.abs() < f64::EPSILON);
}

#[test]
fn all_failing_is_hard_error() {
    let c = coordinator(
        PredictorId::ALL
            .into_iter()
            .map(|id| Arc::new(Failing(id)) as Arc<dyn Predictor>)
            .collect(),
        FusionConfig::default(),
    );
    assert!(matches!(
        c.predict_fused(&header(), 1),
        Err(EngineError::AllPredictorsUnavailable)
    ));
    assert!(c.history().is_empty());
}

#[test]
fn slow_source_does_not_hold_dispatch() {
    let config = FusionConfig {
        deadline_ms: 100,
        ..FusionConfig::default()
    };
    let c = coordinator(
        vec![
            fixed(PredictorId::Sha, 100, 0.9),
            fixed(PredictorId::Network, 200, 0.5),
            Arc::new(Slow(PredictorId::Bio, Duration::from_secs(2))),
        ],
        config,
    );
    let start = Instant::now();
    let f = c.predict_fused(&header(), 1).unwrap();
    assert!(start.elapsed() < Duration::from_millis(150));
    assert!(f.prediction(PredictorId::Bio).confidence.abs() < f64::EPSILON);
}

#[test]
fn history_is_bounded() {
    let config = FusionConfig {
        history_capacity: 3,
        ..FusionConfig::default()
    };
    let c = coordinator(all_fixed(), config);
    for _ in 0..5 {
        c.predict_fused(&header(), 1).unwrap();
    }
    assert_eq!(c.history().len(), 3);
}

#[test]
fn validation_happens_once() {
    let metrics = Arc::new(MetricsRegistry::new());
    let c = FusionCoordinator::new(
        all_fixed(),
        FusionConfig::default(),
        OptimizerConfig::default(),
        Arc::clone(&metrics),
    )
    .unwrap();
    let f = c.predict_fused(&header(), 1).unwrap();
    assert!(c.validate(&f, true, None));
    assert!(!c.validate(&f, true, None));
    let record = &c.history()[0];
    assert!(record.validated);
    assert_eq!(record.was_successful, Some(true));
    let snap = metrics.snapshot();
    assert_eq!(snap.total_attempts, 1);
    assert_eq!(snap.sha.succeeded, 1);
}

#[test]
fn optimize_keeps_weights_normalized() {
    let c = coordinator(all_fixed(), FusionConfig::default());
    for i in 0..20 {
        let f = c.predict_fused(&header(), 1).unwrap();
        c.validate(&f, i % 2 == 0, None);
    }
    let opt = AdaptiveWeightOptimizer::new(OptimizerConfig::default());
    let w = c.optimize(&opt);
    assert!(w.is_normalized());
    assert_eq!(c.weights(), w);
}

#[test]
fn set_weights_keeps_normalized_input_exact() {
    let c = coordinator(all_fixed(), FusionConfig::default());
    let skewed = Weights::from_array([0.1, 0.2, 0.7]);
    assert_eq!(c.set_weights(skewed), skewed);
    assert_eq!(c.weights(), skewed);

    let installed = c.set_weights(Weights::from_array([2.0, 1.0, 1.0]));
    assert!(installed.is_normalized());
    assert_eq!(c.weights(), installed);
    assert!((installed.sha - 0.5).abs() < 1e-12);
}
