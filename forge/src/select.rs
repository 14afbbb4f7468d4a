// SPDX-License-Identifier: AGPL-3.0-only

//! Backend selection: bind the requested mode, fall back when it cannot start.
//!
//! Selection is preference-based: callers ask for hardware, and get the
//! simulated network when no array is attached or the array refuses to open.
//! The simulated network always starts.

use std::sync::Arc;

use tracing::{info, warn};

use crate::backend::{BackendMode, SignalBackend};
use crate::error::ForgeError;
use crate::hardware::{DeviceNode, HardwareBackend};
use crate::probe::DeviceInfo;
use crate::simulated::{SimulatedConfig, SimulatedNetwork};

/// Which backend was bound and why.
pub struct Selection {
    pub backend: Arc<dyn SignalBackend>,
    pub reason: Reason,
}

/// Why a particular backend was bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reason {
    /// The requested mode started.
    Preferred,
    /// Hardware was requested but no device was probed.
    NoDevice,
    /// Hardware was requested but failed to open (wraps the error message).
    InitFailed(String),
}

/// Build and initialize a backend for `mode`.
///
/// Hardware uses the first probed device; `saturation` is its amplifier
/// clipping level. Any hardware failure falls back to a simulated network
/// built from `sim`.
///
/// # Errors
/// Returns an error only if the simulated fallback itself fails to start.
pub fn select_backend(
    mode: BackendMode,
    devices: &[DeviceInfo],
    sim: &SimulatedConfig,
    saturation: f64,
) -> Result<Selection, ForgeError> {
    let reason = match (mode, devices.first()) {
        (BackendMode::SimulatedNetwork, _) => Reason::Preferred,
        (BackendMode::HardwareBacked, None) => Reason::NoDevice,
        (BackendMode::HardwareBacked, Some(info)) => {
            let hw = HardwareBackend::new(Box::new(DeviceNode::from_info(info)), saturation);
            match hw.initialize() {
                Ok(()) => {
                    info!(device = %info.node.display(), channels = info.channels, "hardware backend bound");
                    return Ok(Selection {
                        backend: Arc::new(hw),
                        reason: Reason::Preferred,
                    });
                }
                Err(e) => Reason::InitFailed(e.to_string()),
            }
        }
    };

    if reason != Reason::Preferred {
        warn!(?reason, "hardware backend unavailable, using simulated network");
    }
    let sim = SimulatedNetwork::new(sim.clone());
    sim.initialize()?;
    Ok(Selection {
        backend: Arc::new(sim),
        reason,
    })
}
