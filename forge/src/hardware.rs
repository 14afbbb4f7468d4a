// SPDX-License-Identifier: AGPL-3.0-only

//! Hardware-backed signal backend for multi-electrode arrays.
//!
//! The driver itself lives outside this crate; it is reached through the
//! narrow [`SignalDevice`] trait. [`DeviceNode`] is the stock implementation
//! over a character device that accepts stimulus frames and streams response
//! frames:
//!
//! ```text
//! Host                                   MEA device node
//! ────                                   ───────────────
//! write [duration i32][A_j f32, f_j f32]×C  ──►  stimulate
//! reader thread  ◄──  [s_k f32]×C                 response frame
//! recv_timeout(wait) → BioResponse
//! ```
//!
//! Disconnection surfaces as an invalid response and flips the backend to
//! not-ready; it never panics or blocks past the caller's wait.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::backend::{BackendMode, SignalBackend};
use crate::error::ForgeError;
use crate::probe::DeviceInfo;
use crate::signal::{BioResponse, StimulusPattern};

/// Driver-level access to a physical array.
pub trait SignalDevice: Send {
    /// Open the device and start streaming.
    ///
    /// # Errors
    /// Returns [`ForgeError::Io`] or [`ForgeError::DeviceNotFound`].
    fn open(&mut self) -> Result<(), ForgeError>;

    /// Number of electrode channels.
    fn channels(&self) -> usize;

    /// Send one stimulus frame.
    ///
    /// # Errors
    /// Returns [`ForgeError::Io`] when the write fails.
    fn write_pattern(&mut self, pattern: &StimulusPattern) -> Result<(), ForgeError>;

    /// Wait at most `timeout` for the next response frame. `Ok(None)` is a timeout.
    ///
    /// # Errors
    /// Returns [`ForgeError::NotReady`] when the stream has ended.
    fn read_frame(&mut self, timeout: Duration) -> Result<Option<Vec<f64>>, ForgeError>;

    /// Stop streaming and release the device.
    fn close(&mut self);

    /// Short identification string.
    fn describe(&self) -> String;
}

/// Character-device implementation of [`SignalDevice`].
pub struct DeviceNode {
    path: PathBuf,
    channels: usize,
    writer: Option<File>,
    frames: Option<mpsc::Receiver<Vec<f64>>>,
}

impl DeviceNode {
    /// Describe a device node without opening it.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, channels: usize) -> Self {
        Self {
            path: path.into(),
            channels: channels.max(1),
            writer: None,
            frames: None,
        }
    }

    /// Device node for a probed device.
    #[must_use]
    pub fn from_info(info: &DeviceInfo) -> Self {
        Self::new(info.node.clone(), info.channels)
    }

    /// Path of the device node.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SignalDevice for DeviceNode {
    fn open(&mut self) -> Result<(), ForgeError> {
        if !self.path.exists() {
            return Err(ForgeError::DeviceNotFound);
        }
        let file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        let mut reader = file.try_clone()?;
        let (tx, rx) = mpsc::channel::<Vec<f64>>();
        let channels = self.channels;

        std::thread::Builder::new()
            .name("mea-reader".into())
            .spawn(move || {
                let mut buf = vec![0u8; channels * 4];
                while reader.read_exact(&mut buf).is_ok() {
                    let frame: Vec<f64> = buf
                        .chunks_exact(4)
                        .map(|b| f64::from(f32::from_le_bytes([b[0], b[1], b[2], b[3]])))
                        .collect();
                    if tx.send(frame).is_err() {
                        break;
                    }
                }
            })?;

        self.writer = Some(file);
        self.frames = Some(rx);
        Ok(())
    }

    fn channels(&self) -> usize {
        self.channels
    }

    fn write_pattern(&mut self, pattern: &StimulusPattern) -> Result<(), ForgeError> {
        if let Some(rx) = &self.frames {
            while rx.try_recv().is_ok() {}
        }
        let writer = self.writer.as_mut().ok_or(ForgeError::NotReady)?;
        let mut frame = Vec::with_capacity(4 + pattern.channels() * 8);
        frame.extend_from_slice(&pattern.duration_ms.to_le_bytes());
        for (a, f) in pattern.amplitudes.iter().zip(&pattern.frequencies) {
            frame.extend_from_slice(&(*a as f32).to_le_bytes());
            frame.extend_from_slice(&(*f as f32).to_le_bytes());
        }
        writer.write_all(&frame)?;
        writer.flush()?;
        Ok(())
    }

    fn read_frame(&mut self, timeout: Duration) -> Result<Option<Vec<f64>>, ForgeError> {
        let rx = self.frames.as_ref().ok_or(ForgeError::NotReady)?;
        match rx.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(ForgeError::NotReady),
        }
    }

    fn close(&mut self) {
        self.writer = None;
        self.frames = None;
    }

    fn describe(&self) -> String {
        format!("{} ({} ch)", self.path.display(), self.channels)
    }
}

/// [`SignalBackend`] over a physical array.
pub struct HardwareBackend {
    device: Mutex<Box<dyn SignalDevice>>,
    channels: usize,
    ready: AtomicBool,
    armed: AtomicBool,
    saturation: f64,
}

impl HardwareBackend {
    /// Wrap a driver. `saturation` is the amplifier clipping level of a channel.
    #[must_use]
    pub fn new(device: Box<dyn SignalDevice>, saturation: f64) -> Self {
        let channels = device.channels();
        Self {
            device: Mutex::new(device),
            channels,
            ready: AtomicBool::new(false),
            armed: AtomicBool::new(false),
            saturation,
        }
    }

    fn device(&self) -> MutexGuard<'_, Box<dyn SignalDevice>> {
        self.device.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SignalBackend for HardwareBackend {
    fn mode(&self) -> BackendMode {
        BackendMode::HardwareBacked
    }

    fn channels(&self) -> usize {
        self.channels
    }

    fn initialize(&self) -> Result<(), ForgeError> {
        let mut device = self.device();
        device.open()?;
        self.ready.store(true, Ordering::Release);
        debug!(device = %device.describe(), "hardware backend initialized");
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn apply_stimulus(&self, pattern: &StimulusPattern) -> Result<(), ForgeError> {
        if !self.is_ready() {
            return Err(ForgeError::NotReady);
        }
        pattern.check()?;
        self.device().write_pattern(pattern)?;
        self.armed.store(true, Ordering::Release);
        Ok(())
    }

    fn capture_response(&self, wait: Duration) -> BioResponse {
        let start = Instant::now();
        if !self.is_ready() || !self.armed.swap(false, Ordering::AcqRel) {
            return BioResponse::invalid(self.channels, 0);
        }
        let result = self.device().read_frame(wait);
        let elapsed_us = start.elapsed().as_micros() as i64;
        match result {
            Ok(Some(mut frame)) => {
                frame.resize(self.channels, 0.0);
                BioResponse::from_signals(frame, self.saturation, elapsed_us)
            }
            Ok(None) => {
                debug!(wait_ms = wait.as_millis() as u64, "hardware capture timed out");
                BioResponse::invalid(self.channels, elapsed_us)
            }
            Err(e) => {
                warn!(error = %e, "hardware device disconnected");
                self.ready.store(false, Ordering::Release);
                BioResponse::invalid(self.channels, elapsed_us)
            }
        }
    }

    fn reinforce_pattern(&self, pattern: &StimulusPattern, value: u32, reward: f64) {
        let reward = if reward.is_finite() { reward.clamp(0.0, 1.0) } else { 0.0 };
        if !self.is_ready() || reward <= 0.0 || pattern.check().is_err() {
            return;
        }
        // Rewarded patterns are replayed at reward-scaled amplitude as a training burst.
        let burst = pattern.scaled(reward);
        let mut device = self.device();
        if let Err(e) = device.write_pattern(&burst) {
            debug!(error = %e, value, "reinforcement burst dropped");
            return;
        }
        let settle = Duration::from_millis(u64::from(pattern.duration_ms.unsigned_abs()));
        if let Err(e) = device.read_frame(settle) {
            warn!(error = %e, value, "hardware device disconnected during reinforcement");
            self.ready.store(false, Ordering::Release);
        }
    }

    fn reset(&self) {
        self.armed.store(false, Ordering::Release);
    }

    fn diagnostic_info(&self) -> String {
        format!(
            "hardware array: {}, ready={}",
            self.device().describe(),
            self.is_ready()
        )
    }
}

impl Drop for HardwareBackend {
    fn drop(&mut self) {
        self.device().close();
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Arc;

    /// Scripted driver: replays queued frames, `None` entries simulate timeouts.
    struct ScriptedDevice {
        frames: Arc<Mutex<VecDeque<Option<Vec<f64>>>>>,
        written: Arc<Mutex<Vec<StimulusPattern>>>,
        disconnected: bool,
    }

    impl SignalDevice for ScriptedDevice {
        fn open(&mut self) -> Result<(), ForgeError> {
            Ok(())
        }
        fn channels(&self) -> usize {
            4
        }
        fn write_pattern(&mut self, pattern: &StimulusPattern) -> Result<(), ForgeError> {
            self.written.lock().expect("lock").push(pattern.clone());
            Ok(())
        }
        fn read_frame(&mut self, _timeout: Duration) -> Result<Option<Vec<f64>>, ForgeError> {
            if self.disconnected {
                return Err(ForgeError::NotReady);
            }
            Ok(self.frames.lock().expect("lock").pop_front().flatten())
        }
        fn close(&mut self) {}
        fn describe(&self) -> String {
            "scripted".into()
        }
    }

    fn backend(
        frames: Vec<Option<Vec<f64>>>,
        disconnected: bool,
    ) -> (HardwareBackend, Arc<Mutex<Vec<StimulusPattern>>>) {
        let written = Arc::new(Mutex::new(Vec::new()));
        let device = ScriptedDevice {
            frames: Arc::new(Mutex::new(frames.into())),
            written: Arc::clone(&written),
            disconnected,
        };
        (HardwareBackend::new(Box::new(device), 100.0), written)
    }

    fn pattern() -> StimulusPattern {
        StimulusPattern {
            amplitudes: vec![1.0, -1.0, 0.5, 0.0],
            frequencies: vec![10.0; 4],
            duration_ms: 20,
        }
    }

    #[test]
    fn captures_scripted_frame() {
        let (hw, _) = backend(vec![Some(vec![1.0, 2.0, 3.0, 4.0])], false);
        hw.initialize().expect("scripted open");
        let r = hw.stimulate_and_capture(&pattern(), Duration::from_millis(10));
        assert!(r.is_valid);
        assert_eq!(r.signals, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn timeout_yields_invalid_zero_response() {
        let (hw, _) = backend(vec![None], false);
        hw.initialize().expect("scripted open");
        let r = hw.stimulate_and_capture(&pattern(), Duration::from_millis(10));
        assert!(!r.is_valid);
        assert_eq!(r.signals, vec![0.0; 4]);
        assert!(hw.is_ready());
    }

    #[test]
    fn disconnection_marks_not_ready() {
        let (hw, _) = backend(vec![], true);
        hw.initialize().expect("scripted open");
        let r = hw.stimulate_and_capture(&pattern(), Duration::from_millis(10));
        assert!(!r.is_valid);
        assert!(!hw.is_ready());
    }

    #[test]
    fn reinforcement_replays_scaled_burst() {
        let (hw, written) = backend(vec![], false);
        hw.initialize().expect("scripted open");
        hw.reinforce_pattern(&pattern(), 42, 0.5);
        let sent = written.lock().expect("lock");
        assert_eq!(sent.len(), 1);
        assert!((sent[0].amplitudes[0] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn disconnect_during_reinforcement_marks_not_ready() {
        let (hw, written) = backend(vec![], true);
        hw.initialize().expect("scripted open");
        hw.reinforce_pattern(&pattern(), 42, 1.0);
        assert_eq!(written.lock().expect("lock").len(), 1);
        assert!(!hw.is_ready());
    }

    #[test]
    fn missing_node_is_not_found() {
        let mut node = DeviceNode::new("/nonexistent/mea9", 60);
        assert!(matches!(node.open(), Err(ForgeError::DeviceNotFound)));
    }
}
