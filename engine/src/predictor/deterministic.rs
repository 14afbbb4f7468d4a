// SPDX-License-Identifier: AGPL-3.0-only

//! Digest-only predictor: no shared state, no learning.

use std::time::Instant;

use sha2::{Digest, Sha256};

use super::{Prediction, Predictor, PredictorId};
use crate::entropy::shannon_entropy;
use crate::error::EngineError;
use crate::header::BlockHeader;

/// Predicts from the double SHA-256 of the header wire string.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeterministicPredictor;

impl DeterministicPredictor {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Value and confidence for raw bytes.
    ///
    /// Value is the first four digest bytes big-endian; confidence is the
    /// Shannon entropy of the digest bytes normalized by its maximum for 32
    /// symbols. Empty input gives `(0, 0.0)`.
    #[must_use]
    pub fn digest_prediction(bytes: &[u8]) -> (u32, f64) {
        if bytes.is_empty() {
            return (0, 0.0);
        }
        let digest: [u8; 32] = Sha256::digest(Sha256::digest(bytes)).into();
        let value = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
        let max_entropy = (digest.len().min(256) as f64).log2();
        (value, shannon_entropy(&digest) / max_entropy)
    }
}

impl Predictor for DeterministicPredictor {
    fn id(&self) -> PredictorId {
        PredictorId::Sha
    }

    fn predict(&self, header: &BlockHeader, _difficulty: u32) -> Result<Prediction, EngineError> {
        let start = Instant::now();
        let (value, confidence) = Self::digest_prediction(header.to_wire().as_bytes());
        Ok(Prediction::new(
            value,
            confidence,
            start.elapsed(),
            PredictorId::Sha,
        ))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn header() -> BlockHeader {
        let z = "0".repeat(64);
        BlockHeader::parse(&format!("1|{z}|{z}|1700000000|1d00ffff|0")).unwrap()
    }

    #[test]
    fn identical_headers_give_identical_predictions() {
        let p = DeterministicPredictor::new();
        let a = p.predict(&header(), 1).unwrap();
        let b = p.predict(&header(), 1).unwrap();
        assert_eq!(a.value, b.value);
        assert!((a.confidence - b.confidence).abs() < f64::EPSILON);
    }

    #[test]
    fn confidence_in_unit_interval() {
        let p = DeterministicPredictor::new();
        for ts in 0..16 {
            let mut h = header();
            h.timestamp = ts;
            let pred = p.predict(&h, 1).unwrap();
            assert!((0.0..=1.0).contains(&pred.confidence));
            assert!(pred.confidence > 0.5, "digest bytes are near-uniform");
        }
    }

    #[test]
    fn empty_input_is_zero() {
        assert_eq!(DeterministicPredictor::digest_prediction(&[]), (0, 0.0));
    }

    #[test]
    fn value_is_leading_digest_bytes() {
        let bytes = b"abc";
        let digest: [u8; 32] = Sha256::digest(Sha256::digest(bytes)).into();
        let (value, _) = DeterministicPredictor::digest_prediction(bytes);
        assert_eq!(value.to_be_bytes(), [digest[0], digest[1], digest[2], digest[3]]);
    }
}
