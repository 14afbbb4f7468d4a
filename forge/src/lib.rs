// SPDX-License-Identifier: AGPL-3.0-only

#![deny(clippy::expect_used, clippy::unwrap_used)]

//! cortexmine Forge: signal-source discovery and stimulus/response backends.
//!
//! Forge owns everything that touches a signal source: the stimulus and
//! response data model, the [`SignalBackend`](backend::SignalBackend)
//! capability trait, and its two interchangeable implementations. The
//! engine never knows which one is bound; it only holds a
//! [`BackendHandle`](backend::BackendHandle).
//!
//! # Architecture
//!
//! ```text
//!    ┌─────────────────────────────┐
//!    │  probe (/dev/mea* nodes)    │  device node discovery
//!    └──────────┬──────────────────┘
//!               │ Vec<DeviceInfo>
//!    ┌──────────▼──────────────────┐
//!    │       select                │  mode preference + fallback
//!    └──────────┬──────────────────┘
//!               │ Arc<dyn SignalBackend>
//!    ┌──────────▼──────────────────┐
//!    │  hardware  |  simulated     │  stimulus → response
//!    └─────────────────────────────┘
//! ```

pub mod backend;
pub mod error;
pub mod hardware;
pub mod probe;
pub mod select;
pub mod signal;
pub mod simulated;

pub use backend::{BackendHandle, BackendMode, SignalBackend};
pub use error::ForgeError;
pub use signal::{BioResponse, StimulusPattern};
