// SPDX-License-Identifier: AGPL-3.0-only

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use super::{bit_accuracy, decode_outputs, AdaptiveNetwork, AdaptivePredictor, ExportedModel};
use crate::config::LearningConfig;
use crate::error::EngineError;
use crate::header::BlockHeader;
use crate::learning::{bootstrap_samples, LearningState, LearningStateMachine, TrainingSample};
use crate::predictor::Predictor;

fn small_config() -> LearningConfig {
    LearningConfig {
        topology: vec![60, 48, 32],
        learning_rate: 0.1,
        max_epochs: 150,
        ..LearningConfig::default()
    }
}

fn predictor(config: LearningConfig) -> (AdaptivePredictor, Arc<LearningStateMachine>) {
    let learning = Arc::new(LearningStateMachine::new());
    let p = AdaptivePredictor::new(config, Arc::clone(&learning)).unwrap();
    (p, learning)
}

fn header() -> BlockHeader {
    let z = "0".repeat(64);
    BlockHeader::parse(&format!("1|{z}|{z}|1700000000|1d00ffff|0")).unwrap()
}

#[test]
fn same_seed_same_network() {
    let a = AdaptiveNetwork::new(&[60, 16, 32], 7);
    let b = AdaptiveNetwork::new(&[60, 16, 32], 7);
    let c = AdaptiveNetwork::new(&[60, 16, 32], 8);
    assert_eq!(a, b);
    assert_ne!(a, c);
}

#[test]
fn forward_output_width_and_range() {
    let net = AdaptiveNetwork::new(&[60, 16, 32], 1);
    let out = net.forward(&[0.3; 60]);
    assert_eq!(out.len(), 32);
    assert!(out.iter().all(|o| (0.0..=1.0).contains(o)));
}

#[test]
fn short_input_is_padded() {
    let net = AdaptiveNetwork::new(&[60, 16, 32], 1);
    let mut padded = vec![0.5; 10];
    padded.resize(60, 0.0);
    assert_eq!(net.forward(&[0.5; 10]), net.forward(&padded));
}

#[test]
fn decode_sets_msb_first() {
    let mut out = vec![0.0; 32];
    out[0] = 1.0;
    out[31] = 1.0;
    let (value, confidence) = decode_outputs(&out);
    assert_eq!(value, 0x8000_0001);
    assert!((confidence - 1.0).abs() < 1e-12);

    let (_, undecided) = decode_outputs(&[0.5; 32]);
    assert!(undecided.abs() < 1e-12);
}

#[test]
fn repeated_updates_reduce_error() {
    let (p, _) = predictor(small_config());
    let sample = TrainingSample::for_value(vec![0.4; 60], 0xDEAD_BEEF, 1.0, true);
    let improved = (0..20).filter(|_| p.update(&sample)).count();
    assert!(improved >= 15, "improved on {improved}/20 steps");
    let out = p.forward(&sample.input_features);
    assert!(bit_accuracy(&out, &sample.target_output) > 0.9);
}

#[test]
fn initial_training_reaches_active_mining() {
    let (p, learning) = predictor(small_config());
    let samples = bootstrap_samples(24, 60, 3);
    let report = p.train_initial(&samples, 150).unwrap();
    assert!(report.succeeded, "{report:?}");
    assert!(report.success_rate >= 0.7);
    assert_eq!(learning.current(), LearningState::ActiveMining);
}

#[test]
fn contradictory_samples_diverge() {
    let config = LearningConfig {
        divergence_patience: 3,
        divergence_min_delta: 1e-3,
        ..small_config()
    };
    let (p, learning) = predictor(config);
    let samples = vec![
        TrainingSample::for_value(vec![0.2; 60], 0, 1.0, false),
        TrainingSample::for_value(vec![0.2; 60], u32::MAX, 1.0, false),
    ];
    let err = p.train_initial(&samples, 500).unwrap_err();
    assert!(matches!(err, EngineError::LearningDivergence(_)));
    assert_eq!(learning.current(), LearningState::Error);
    assert!(p.replay.lock().unwrap().is_none());
}

#[test]
fn update_during_run_survives_install() {
    let config = small_config();
    let lr = config.learning_rate;
    let (p, _) = predictor(config);
    let sample = TrainingSample::for_value(vec![0.4; 60], 0xDEAD_BEEF, 1.0, true);

    let mut trained = p.begin_run();
    trained.train_step(&TrainingSample::for_value(vec![0.1; 60], 7, 1.0, true), lr);
    let mut expected = trained.clone();
    expected.train_step(&sample, lr);

    // lands on the live network while the run holds its copy
    p.update(&sample);
    p.end_run(Some(trained));

    assert_eq!(p.export_model(), expected.export());
    assert!(p.replay.lock().unwrap().is_none());
}

#[test]
fn updates_outside_a_run_are_not_queued() {
    let (p, _) = predictor(small_config());
    let sample = TrainingSample::for_value(vec![0.4; 60], 1, 1.0, true);
    p.update(&sample);
    assert!(p.replay.lock().unwrap().is_none());
    let before = p.export_model();
    let snapshot = p.begin_run();
    p.end_run(Some(snapshot));
    assert_eq!(p.export_model(), before);
}

#[test]
fn error_state_gates_predictions() {
    let (p, learning) = predictor(small_config());
    assert!(p.predict(&header(), 1).is_ok());
    learning.fail();
    assert!(matches!(
        p.predict(&header(), 1),
        Err(EngineError::LearningDivergence(_))
    ));
    learning.reset();
    let pred = p.predict(&header(), 1).unwrap();
    assert!((0.0..=1.0).contains(&pred.confidence));
}

#[test]
fn train_initial_requires_uninitialized() {
    let (p, learning) = predictor(small_config());
    learning.transition(LearningState::InitialLearning).unwrap();
    let err = p.train_initial(&bootstrap_samples(4, 60, 1), 5).unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));
}

#[test]
fn empty_training_set_is_rejected() {
    let (p, learning) = predictor(small_config());
    assert!(matches!(
        p.train_initial(&[], 10),
        Err(EngineError::InitializationFailure(_))
    ));
    assert_eq!(learning.current(), LearningState::Uninitialized);
}

#[test]
fn retro_without_validated_samples_is_noop() {
    let (p, learning) = predictor(small_config());
    learning.fail();
    let report = p
        .retro_learn(&[TrainingSample::for_value(vec![0.1; 60], 5, 1.0, false)])
        .unwrap();
    assert_eq!(report.samples, 0);
    assert_eq!(learning.current(), LearningState::Error);
}

#[test]
fn retro_learning_recovers_from_error() {
    let (p, learning) = predictor(LearningConfig {
        retro_epochs: 60,
        retro_rate_scale: 1.0,
        ..small_config()
    });
    learning.fail();
    let history: Vec<TrainingSample> = (0..4)
        .map(|i| {
            TrainingSample::for_value(vec![f64::from(i) * 0.2 - 0.3; 60], 0xF0F0_0F0F ^ i, 1.0, true)
        })
        .collect();
    let report = p.retro_learn(&history).unwrap();
    assert_eq!(report.samples, 4);
    assert_eq!(
        learning.current(),
        if report.succeeded {
            LearningState::ActiveMining
        } else {
            LearningState::Error
        }
    );
}

#[test]
fn export_import_roundtrip_preserves_outputs() {
    let (src, _) = predictor(small_config());
    src.update(&TrainingSample::for_value(vec![0.7; 60], 12345, 1.0, true));
    let json = serde_json::to_string(&src.export_model()).unwrap();
    let model: ExportedModel = serde_json::from_str(&json).unwrap();

    let (dst, _) = predictor(LearningConfig {
        seed: 99,
        ..small_config()
    });
    dst.import_model(&model).unwrap();
    let (a, b) = (dst.forward(&[0.7; 60]), src.forward(&[0.7; 60]));
    assert!(a.iter().zip(&b).all(|(x, y)| (x - y).abs() < 1e-9));
}

#[test]
fn import_rejects_other_topology() {
    let (p, _) = predictor(small_config());
    let other = AdaptiveNetwork::new(&[60, 8, 32], 1).export();
    let before = p.forward(&[0.1; 60]);
    assert!(matches!(
        p.import_model(&other),
        Err(EngineError::StateImport(_))
    ));
    assert_eq!(p.forward(&[0.1; 60]), before);
}

#[test]
fn import_rejects_truncated_layer() {
    let mut model = AdaptiveNetwork::new(&[60, 8, 32], 1).export();
    model.layers[1].weights.pop();
    assert!(AdaptiveNetwork::from_exported(&model).is_err());
}

#[test]
fn reconfigure_with_new_topology_resets_learning() {
    let (p, learning) = predictor(small_config());
    learning.fail();
    p.reconfigure(LearningConfig {
        topology: vec![60, 12, 32],
        ..small_config()
    })
    .unwrap();
    assert_eq!(p.topology(), vec![60, 12, 32]);
    assert_eq!(learning.current(), LearningState::Uninitialized);
}
