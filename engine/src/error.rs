// SPDX-License-Identifier: AGPL-3.0-only

//! Typed errors for prediction, learning, and engine control.
//!
//! Expected conditions (a slow predictor, a missing backend) are recovered
//! locally and never reach the caller as errors; only a malformed header or
//! the loss of every predictor does.

use std::time::Duration;

use cortexmine_forge::ForgeError;
use thiserror::Error;

use crate::learning::LearningState;

/// Errors arising from header parsing, prediction, learning, or the runtime.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A predictor or backend could not start.
    #[error("initialization failed: {0}")]
    InitializationFailure(String),

    /// The signal backend is not ready.
    #[error("signal backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A predictor or capture exceeded its deadline.
    #[error("deadline of {0:?} exceeded")]
    TimeoutExceeded(Duration),

    /// The header does not follow the `version|prev|merkle|time|bits|nonce` wire format.
    #[error("malformed header: {0}")]
    MalformedHeader(String),

    /// Training error stopped decreasing; learning-capable predictors are disabled.
    #[error("learning diverged: {0}")]
    LearningDivergence(String),

    /// Every predictor failed or timed out.
    #[error("all predictors unavailable")]
    AllPredictorsUnavailable,

    /// The learning state machine refused a transition.
    #[error("invalid learning transition {from:?} -> {to:?}")]
    InvalidTransition { from: LearningState, to: LearningState },

    /// An exported state blob could not be imported.
    #[error("state import failed: {0}")]
    StateImport(String),

    /// Engine state could not be encoded.
    #[error("state export failed: {0}")]
    StateExport(String),

    /// Configuration could not be loaded or failed validation.
    #[error("configuration error: {0}")]
    Config(String),

    /// `start_mining` was called while mining.
    #[error("engine already running")]
    AlreadyRunning,

    /// A control call needs an active mining session.
    #[error("engine not running")]
    NotRunning,

    /// Signal-source failure.
    #[error(transparent)]
    Forge(#[from] ForgeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_malformed_header() {
        let err = EngineError::MalformedHeader("expected 6 fields, found 3".into());
        assert_eq!(
            err.to_string(),
            "malformed header: expected 6 fields, found 3"
        );
    }

    #[test]
    fn display_divergence() {
        let err = EngineError::LearningDivergence("no improvement for 12 epochs".into());
        assert_eq!(
            err.to_string(),
            "learning diverged: no improvement for 12 epochs"
        );
    }

    #[test]
    fn forge_errors_convert() {
        let err: EngineError = ForgeError::NotReady.into();
        assert_eq!(err.to_string(), "signal backend not ready");
    }

    #[test]
    fn error_trait_works() {
        let err = EngineError::AllPredictorsUnavailable;
        let dyn_err: &dyn std::error::Error = &err;
        assert_eq!(dyn_err.to_string(), "all predictors unavailable");
    }
}
