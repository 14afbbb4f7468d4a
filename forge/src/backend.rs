// SPDX-License-Identifier: AGPL-3.0-only

//! Signal backend abstraction: the capability interface every source implements.
//!
//! A backend turns a [`StimulusPattern`] into a [`BioResponse`]. Callers ask
//! "are you ready, stimulate this, what came back?" and never which concrete
//! source answered. Two implementations exist: the hardware-backed
//! [`HardwareBackend`](crate::hardware::HardwareBackend) and the
//! [`SimulatedNetwork`](crate::simulated::SimulatedNetwork).

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ForgeError;
use crate::signal::{BioResponse, StimulusPattern};

/// Which family of signal source is bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendMode {
    /// A physical electrode array reached through a device node.
    HardwareBacked,
    /// An in-process simulated neural network.
    SimulatedNetwork,
}

impl fmt::Display for BackendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HardwareBacked => write!(f, "hardware"),
            Self::SimulatedNetwork => write!(f, "simulated"),
        }
    }
}

/// Capability contract for a stimulus/response source.
///
/// All methods take `&self`; implementations keep their mutable state behind
/// their own lock so one backend can be shared between the candidate
/// generator and the control surface.
pub trait SignalBackend: Send + Sync {
    /// Family of this backend.
    fn mode(&self) -> BackendMode;

    /// Number of response channels this backend reports.
    fn channels(&self) -> usize;

    /// Bring the source up.
    ///
    /// # Errors
    /// Returns [`ForgeError::DeviceNotFound`] or [`ForgeError::Io`] when the
    /// source cannot be started.
    fn initialize(&self) -> Result<(), ForgeError>;

    /// Whether the source accepts stimuli.
    fn is_ready(&self) -> bool;

    /// Queue a stimulus for the next capture.
    ///
    /// # Errors
    /// Returns [`ForgeError::NotReady`] before initialization and
    /// [`ForgeError::MalformedPattern`] for structurally invalid patterns.
    fn apply_stimulus(&self, pattern: &StimulusPattern) -> Result<(), ForgeError>;

    /// Wait at most `wait` for the response to the queued stimulus.
    ///
    /// Never fails: on timeout or disconnection the response is marked
    /// invalid and its signals are zero-filled.
    fn capture_response(&self, wait: Duration) -> BioResponse;

    /// Apply `pattern` and capture its response in one call.
    fn stimulate_and_capture(&self, pattern: &StimulusPattern, wait: Duration) -> BioResponse {
        match self.apply_stimulus(pattern) {
            Ok(()) => self.capture_response(wait),
            Err(e) => {
                debug!(backend = %self.mode(), error = %e, "stimulus rejected");
                BioResponse::invalid(self.channels(), 0)
            }
        }
    }

    /// Strengthen the association between `pattern` and `value`.
    ///
    /// `reward` is clamped to `[0, 1]`. Sources that cannot learn treat this
    /// as a no-op; it must never fail.
    fn reinforce_pattern(&self, pattern: &StimulusPattern, value: u32, reward: f64);

    /// Drop any queued stimulus and transient state.
    fn reset(&self);

    /// Human-readable status line for diagnostics.
    fn diagnostic_info(&self) -> String;
}

/// Shared, swappable reference to the active backend.
///
/// Clones share the same slot: a swap through one clone is seen by all.
#[derive(Clone)]
pub struct BackendHandle {
    slot: Arc<RwLock<Arc<dyn SignalBackend>>>,
}

impl BackendHandle {
    /// Wrap an initial backend.
    #[must_use]
    pub fn new(backend: Arc<dyn SignalBackend>) -> Self {
        Self {
            slot: Arc::new(RwLock::new(backend)),
        }
    }

    /// The backend bound right now. Holding the returned `Arc` keeps it alive
    /// across a concurrent swap.
    #[must_use]
    pub fn current(&self) -> Arc<dyn SignalBackend> {
        Arc::clone(&self.slot.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Bind `backend`, returning the previously bound one.
    pub fn swap(&self, backend: Arc<dyn SignalBackend>) -> Arc<dyn SignalBackend> {
        let mut guard = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        info!(from = %guard.mode(), to = %backend.mode(), "signal backend swapped");
        std::mem::replace(&mut *guard, backend)
    }

    /// Mode of the bound backend.
    #[must_use]
    pub fn mode(&self) -> BackendMode {
        self.current().mode()
    }
}

impl fmt::Debug for BackendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendHandle")
            .field("mode", &self.mode())
            .finish()
    }
}
