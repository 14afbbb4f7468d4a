// SPDX-License-Identifier: AGPL-3.0-only

//! Typed errors for signal-source discovery and stimulation.

use thiserror::Error;

/// Errors arising from device discovery, backend start-up, or stimulation.
#[derive(Debug, Error)]
pub enum ForgeError {
    /// No device node was found for the hardware-backed backend.
    #[error("no signal device found")]
    DeviceNotFound,

    /// The backend has not been initialized, or its device went away.
    #[error("signal backend not ready")]
    NotReady,

    /// Stimulus vectors have mismatched lengths, are empty, or the duration is not positive.
    #[error("malformed stimulus pattern: {0}")]
    MalformedPattern(String),

    /// Device I/O failed (wraps the underlying error).
    #[error("device I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_device_not_found() {
        assert_eq!(ForgeError::DeviceNotFound.to_string(), "no signal device found");
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        let err: ForgeError = io.into();
        assert!(err.to_string().contains("gone"));
    }
}
