// SPDX-License-Identifier: AGPL-3.0-only

//! cortexmine: run the mining engine on one header for a bounded time.
//!
//! ```text
//! cortexmine [--config=engine.json] [--header=<wire>] [--difficulty=N]
//!            [--seconds=N] [--state-in=PATH] [--state-out=PATH]
//! ```
//!
//! Logs go to stderr (`RUST_LOG`, default `info`). On exit the metrics
//! snapshot and diagnostic report are printed to stdout as JSON.

use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use cortexmine_engine::{EngineConfig, EngineError, MiningConfig, MiningEngine};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_HEADER: &str = "1|0000000000000000000000000000000000000000000000000000000000000000|\
                              0000000000000000000000000000000000000000000000000000000000000000|\
                              1700000000|1d00ffff|0";

struct Args {
    config: Option<PathBuf>,
    header: String,
    difficulty: u32,
    seconds: u64,
    state_in: Option<PathBuf>,
    state_out: Option<PathBuf>,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args {
        config: None,
        header: DEFAULT_HEADER.to_string(),
        difficulty: 16,
        seconds: 10,
        state_in: None,
        state_out: None,
    };
    for arg in std::env::args().skip(1) {
        if let Some(val) = arg.strip_prefix("--config=") {
            args.config = Some(val.into());
        } else if let Some(val) = arg.strip_prefix("--header=") {
            args.header = val.to_string();
        } else if let Some(val) = arg.strip_prefix("--difficulty=") {
            args.difficulty = val.parse().map_err(|e| format!("--difficulty: {e}"))?;
        } else if let Some(val) = arg.strip_prefix("--seconds=") {
            args.seconds = val.parse().map_err(|e| format!("--seconds: {e}"))?;
        } else if let Some(val) = arg.strip_prefix("--state-in=") {
            args.state_in = Some(val.into());
        } else if let Some(val) = arg.strip_prefix("--state-out=") {
            args.state_out = Some(val.into());
        } else {
            return Err(format!("unknown argument {arg}"));
        }
    }
    Ok(args)
}

fn run(args: &Args) -> Result<(), EngineError> {
    let config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    let engine = MiningEngine::new(config)?;

    if let Some(path) = &args.state_in {
        match std::fs::read(path) {
            Ok(blob) if engine.import_state(&blob) => info!(path = %path.display(), "state restored"),
            Ok(_) => warn!(path = %path.display(), "state not restored, starting fresh"),
            Err(e) => warn!(path = %path.display(), error = %e, "cannot read state"),
        }
    }

    engine.start_mining(MiningConfig::from_wire(&args.header, args.difficulty)?)?;
    thread::sleep(Duration::from_secs(args.seconds));
    engine.stop_mining()?;

    if let Some(path) = &args.state_out {
        let blob = engine.export_state()?;
        if let Err(e) = std::fs::write(path, blob) {
            warn!(path = %path.display(), error = %e, "cannot write state");
        }
    }

    let output = serde_json::json!({
        "metrics": engine.metrics_snapshot(),
        "report": engine.diagnostic_report(),
    });
    match serde_json::to_string_pretty(&output) {
        Ok(text) => println!("{text}"),
        Err(e) => error!(error = %e, "cannot encode report"),
    }
    Ok(())
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = match parse_args() {
        Ok(a) => a,
        Err(msg) => {
            eprintln!("cortexmine: {msg}");
            return ExitCode::from(2);
        }
    };
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "cortexmine failed");
            ExitCode::FAILURE
        }
    }
}
