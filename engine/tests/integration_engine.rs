// SPDX-License-Identifier: AGPL-3.0-only
#![allow(clippy::unwrap_used)]

//! Integration tests: the engine control surface end to end.

use std::thread;
use std::time::Duration;

use cortexmine_engine::{
    validate_nonce_candidate, CycleOutcome, EngineConfig, LearningState, MiningConfig,
    MiningEngine,
};

fn config() -> EngineConfig {
    EngineConfig::from_json_str(
        r#"{
            "learning": {
                "topology": [60, 48, 32],
                "learning_rate": 0.1,
                "max_epochs": 40,
                "bootstrap_samples": 16
            },
            "entropy": { "candidate_count": 60, "window_size": 512, "capture_wait_ms": 20 },
            "search": { "threads": 2 },
            "schedule": {
                "mining_interval_ms": 10,
                "learning_interval_ms": 50,
                "metrics_interval_ms": 20
            },
            "backend": { "mode": "SimulatedNetwork", "simulated": { "latency_ms": 0 } }
        }"#,
    )
    .unwrap()
}

fn work(difficulty: u32) -> MiningConfig {
    let z = "0".repeat(64);
    MiningConfig::from_wire(&format!("1|{z}|{z}|1700000000|1d00ffff|0"), difficulty).unwrap()
}

#[test]
fn background_mining_finds_easy_solutions() {
    let engine = MiningEngine::new(config()).unwrap();
    engine.start_mining(work(4)).unwrap();
    thread::sleep(Duration::from_millis(400));
    engine.stop_mining().unwrap();

    let solutions = engine.solutions();
    assert!(!solutions.is_empty());
    for s in &solutions {
        assert!(validate_nonce_candidate(&s.header, s.difficulty, s.nonce));
        assert_eq!(s.digest.len(), 64);
        assert!(s.digest.starts_with('0'));
    }
    let snap = engine.metrics_snapshot();
    assert_eq!(snap.solutions_found as usize, solutions.len());
    assert!(snap.fused_predictions > 0);
    let report = engine.diagnostic_report();
    assert!(report.weights.is_normalized());
    assert!(!report.running);
    assert_ne!(report.learning_state, LearningState::Uninitialized);
}

#[test]
fn manual_cycles_without_workers() {
    let engine = MiningEngine::new(config()).unwrap();
    engine.set_work(work(2));
    assert_eq!(engine.run_mining_cycle().unwrap(), CycleOutcome::Completed);
    assert_eq!(engine.run_learning_cycle(), CycleOutcome::Completed);
    assert_eq!(engine.run_metrics_cycle(), CycleOutcome::Completed);
    assert!(engine.fusion().weights().is_normalized());
}

#[test]
fn exported_state_restores_into_fresh_engine() {
    let trained = MiningEngine::new(config()).unwrap();
    trained.run_learning_cycle();
    let blob = trained.export_state().unwrap();

    let fresh = MiningEngine::new(config()).unwrap();
    assert!(fresh.import_state(&blob));
    assert_eq!(fresh.learning_state(), trained.learning_state());
    assert!(!fresh.import_state(&blob[..blob.len() / 2]));
}

#[test]
fn dropped_engine_stops_workers() {
    let engine = MiningEngine::new(config()).unwrap();
    engine.start_mining(work(30)).unwrap();
    thread::sleep(Duration::from_millis(50));
    drop(engine);
    // workers exit on their next wake; nothing to join, nothing may panic
    thread::sleep(Duration::from_millis(50));
}
