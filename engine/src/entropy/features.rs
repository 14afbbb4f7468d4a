// SPDX-License-Identifier: AGPL-3.0-only

//! Header feature extraction.
//!
//! Nine base scalars are read off the header, normalized to `[0, 1]`, and
//! expanded to 60 values, one per electrode of a standard array:
//!
//! | Block | Width | Term |
//! |-------|-------|------|
//! | linear | 9 | `x` |
//! | square | 9 | `x²` |
//! | sine | 9 | `sin(πx)` |
//! | cosine | 9 | `cos(πx)` |
//! | neighbour | 9 | `x[i]·x[i+1]` |
//! | second neighbour | 9 | `x[i]·x[i+2]` |
//! | harmonic | 6 | `sin(2πx)` for the first six |

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::header::BlockHeader;
use crate::tolerances::FEATURE_DIM;

/// Number of base features.
pub const BASE_FEATURES: usize = 9;

const HARMONICS: usize = FEATURE_DIM - 6 * BASE_FEATURES;

/// Raw per-header scalars, before normalization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaseFeatures {
    pub version: f64,
    pub timestamp: f64,
    /// Requested difficulty in leading zero bits.
    pub difficulty_level: f64,
    /// Shannon entropy of the previous-hash hex digits, in bits.
    pub prev_hash_entropy: f64,
    /// Shannon entropy of the merkle-root hex digits, in bits.
    pub merkle_entropy: f64,
    /// Sum of the previous-hash hex digit values.
    pub prev_hash_checksum: f64,
    /// Sum of the merkle-root hex digit values.
    pub merkle_checksum: f64,
    /// Leading zero bits of the previous hash.
    pub leading_zeros: f64,
    /// Leading zero bits implied by the compact target, over 256.
    pub difficulty_bits_normalized: f64,
}

impl BaseFeatures {
    #[must_use]
    pub const fn to_array(&self) -> [f64; BASE_FEATURES] {
        [
            self.version,
            self.timestamp,
            self.difficulty_level,
            self.prev_hash_entropy,
            self.merkle_entropy,
            self.prev_hash_checksum,
            self.merkle_checksum,
            self.leading_zeros,
            self.difficulty_bits_normalized,
        ]
    }
}

/// Base and expanded features of one header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeaderFeatures {
    pub base: BaseFeatures,
    /// Base features scaled into `[0, 1]`.
    pub normalized: [f64; BASE_FEATURES],
    /// `FEATURE_DIM` values derived from `normalized`.
    pub expanded: Vec<f64>,
}

/// Read the nine base features of `header` and expand them.
#[must_use]
pub fn extract_features(header: &BlockHeader, difficulty: u32) -> HeaderFeatures {
    let prev = header.prev_hash.as_bytes();
    let merkle = header.merkle_root.as_bytes();
    let base = BaseFeatures {
        version: f64::from(header.version),
        timestamp: f64::from(header.timestamp),
        difficulty_level: f64::from(difficulty),
        prev_hash_entropy: shannon_entropy(prev),
        merkle_entropy: shannon_entropy(merkle),
        prev_hash_checksum: f64::from(nibble_sum(prev)),
        merkle_checksum: f64::from(nibble_sum(merkle)),
        leading_zeros: f64::from(hex_leading_zero_bits(prev)),
        difficulty_bits_normalized: f64::from(header.compact_target_bits()) / 256.0,
    };
    let normalized = normalize(&base, prev.len(), merkle.len());
    HeaderFeatures {
        base,
        expanded: expand(&normalized),
        normalized,
    }
}

fn normalize(base: &BaseFeatures, prev_len: usize, merkle_len: usize) -> [f64; BASE_FEATURES] {
    let checksum_max = |len: usize| (15 * len).max(1) as f64;
    [
        (base.version % 1024.0) / 1024.0,
        base.timestamp / f64::from(u32::MAX),
        (base.difficulty_level / 256.0).min(1.0),
        base.prev_hash_entropy / 4.0,
        base.merkle_entropy / 4.0,
        base.prev_hash_checksum / checksum_max(prev_len),
        base.merkle_checksum / checksum_max(merkle_len),
        (base.leading_zeros / 256.0).min(1.0),
        base.difficulty_bits_normalized,
    ]
}

/// Deterministic expansion of normalized base features to `FEATURE_DIM`.
#[must_use]
pub fn expand(x: &[f64; BASE_FEATURES]) -> Vec<f64> {
    let n = BASE_FEATURES;
    let mut out = Vec::with_capacity(FEATURE_DIM);
    out.extend_from_slice(x);
    out.extend(x.iter().map(|v| v * v));
    out.extend(x.iter().map(|v| (PI * v).sin()));
    out.extend(x.iter().map(|v| (PI * v).cos()));
    out.extend((0..n).map(|i| x[i] * x[(i + 1) % n]));
    out.extend((0..n).map(|i| x[i] * x[(i + 2) % n]));
    out.extend(x.iter().take(HARMONICS).map(|v| (2.0 * PI * v).sin()));
    out
}

/// Shannon entropy of the byte distribution of `bytes`, in bits.
#[must_use]
pub fn shannon_entropy(bytes: &[u8]) -> f64 {
    if bytes.is_empty() {
        return 0.0;
    }
    let mut counts = [0_usize; 256];
    for &b in bytes {
        counts[usize::from(b)] += 1;
    }
    let n = bytes.len() as f64;
    counts
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / n;
            -p * p.log2()
        })
        .sum()
}

fn nibble(b: u8) -> u32 {
    char::from(b).to_digit(16).unwrap_or(0)
}

fn nibble_sum(hex: &[u8]) -> u32 {
    hex.iter().map(|&b| nibble(b)).sum()
}

fn hex_leading_zero_bits(hex: &[u8]) -> u32 {
    let mut bits = 0;
    for &b in hex {
        let v = nibble(b);
        if v == 0 {
            bits += 4;
        } else {
            return bits + v.leading_zeros() - 28;
        }
    }
    bits
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn zero_header() -> BlockHeader {
        let z = "0".repeat(64);
        BlockHeader::parse(&format!("1|{z}|{z}|1700000000|1d00ffff|0")).unwrap()
    }

    #[test]
    fn nine_base_features_with_difficulty_level() {
        let f = extract_features(&zero_header(), 1);
        assert_eq!(f.base.to_array().len(), 9);
        assert!((f.base.difficulty_level - 1.0).abs() < f64::EPSILON);
        assert!((f.base.version - 1.0).abs() < f64::EPSILON);
        assert!(f.base.prev_hash_entropy.abs() < f64::EPSILON);
        assert!((f.base.leading_zeros - 256.0).abs() < f64::EPSILON);
        assert!((f.base.difficulty_bits_normalized - 0.125).abs() < 1e-12);
    }

    #[test]
    fn expansion_has_feature_width() {
        let f = extract_features(&zero_header(), 1);
        assert_eq!(f.expanded.len(), FEATURE_DIM);
        assert!(f.expanded.iter().all(|v| v.is_finite() && v.abs() <= 1.0));
    }

    #[test]
    fn extraction_is_deterministic_and_header_sensitive() {
        let h = zero_header();
        assert_eq!(extract_features(&h, 3), extract_features(&h, 3));
        let mut other = h.clone();
        other.merkle_root = "ab".repeat(32);
        assert_ne!(
            extract_features(&h, 3).expanded,
            extract_features(&other, 3).expanded
        );
    }

    #[test]
    fn entropy_of_uniform_symbols() {
        assert!((shannon_entropy(b"0123456789abcdef") - 4.0).abs() < 1e-12);
        assert!(shannon_entropy(b"aaaa").abs() < 1e-12);
        assert!(shannon_entropy(&[]).abs() < f64::EPSILON);
    }

    #[test]
    fn hex_leading_zeros() {
        assert_eq!(hex_leading_zero_bits(b"001f"), 11);
        assert_eq!(hex_leading_zero_bits(b"8"), 0);
        assert_eq!(hex_leading_zero_bits(b"000"), 12);
    }
}
