// SPDX-License-Identifier: AGPL-3.0-only

//! Block header wire format and the proof-of-work digest.
//!
//! A header travels as one `|`-delimited string:
//!
//! ```text
//! <version>|<prevHash>|<merkleRoot>|<timestamp>|<bits>|<nonce>
//! ```
//!
//! `version`, `timestamp` and `nonce` are decimal, `bits` is exactly eight
//! hex digits of compact difficulty, and both hashes are hex. The digest of a
//! candidate is double SHA-256 over the wire string with the candidate nonce
//! in the last field; difficulty is the number of leading zero bits the
//! digest must have.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::EngineError;

const FIELDS: usize = 6;

/// Parsed block header.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u32,
    pub prev_hash: String,
    pub merkle_root: String,
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    /// Parse the wire format.
    ///
    /// # Errors
    /// Returns [`EngineError::MalformedHeader`] for a wrong field count,
    /// non-decimal integers, non-hex hashes, or `bits` that is not exactly
    /// eight hex digits.
    pub fn parse(wire: &str) -> Result<Self, EngineError> {
        let fields: Vec<&str> = wire.trim().split('|').collect();
        if fields.len() != FIELDS {
            return Err(EngineError::MalformedHeader(format!(
                "expected {FIELDS} fields, found {}",
                fields.len()
            )));
        }
        Ok(Self {
            version: decimal("version", fields[0])?,
            prev_hash: hex_field("prevHash", fields[1])?,
            merkle_root: hex_field("merkleRoot", fields[2])?,
            timestamp: decimal("timestamp", fields[3])?,
            bits: compact_bits(fields[4])?,
            nonce: decimal("nonce", fields[5])?,
        })
    }

    /// Wire string with this header's own nonce.
    #[must_use]
    pub fn to_wire(&self) -> String {
        format!("{}{}", self.wire_prefix(), self.nonce)
    }

    /// Copy with `nonce` substituted.
    #[must_use]
    pub fn with_nonce(&self, nonce: u32) -> Self {
        Self {
            nonce,
            ..self.clone()
        }
    }

    /// Everything up to and including the final delimiter.
    fn wire_prefix(&self) -> String {
        format!(
            "{}|{}|{}|{}|{:08x}|",
            self.version, self.prev_hash, self.merkle_root, self.timestamp, self.bits
        )
    }

    /// Leading zero bits implied by the compact `bits` target.
    ///
    /// `0x1d00ffff` (the classic minimum difficulty) gives 32.
    #[must_use]
    pub fn compact_target_bits(&self) -> u32 {
        let exponent = i64::from(self.bits >> 24);
        let mantissa = self.bits & 0x007f_ffff;
        if mantissa == 0 {
            return 256;
        }
        let mantissa_len = i64::from(32 - mantissa.leading_zeros());
        let target_len = (mantissa_len + 8 * (exponent - 3)).clamp(0, 256);
        // clamped to [0, 256] above
        256 - target_len as u32
    }

    /// Proof-of-work digest of this header with `nonce` substituted.
    #[must_use]
    pub fn pow_digest(&self, nonce: u32) -> [u8; 32] {
        PowHasher::new(self).digest(nonce)
    }
}

impl fmt::Display for BlockHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire())
    }
}

fn decimal(name: &str, raw: &str) -> Result<u32, EngineError> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(EngineError::MalformedHeader(format!(
            "{name} is not a decimal integer: {raw:?}"
        )));
    }
    raw.parse()
        .map_err(|e| EngineError::MalformedHeader(format!("{name} out of range: {e}")))
}

fn hex_field(name: &str, raw: &str) -> Result<String, EngineError> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(EngineError::MalformedHeader(format!(
            "{name} is not hex: {raw:?}"
        )));
    }
    Ok(raw.to_ascii_lowercase())
}

fn compact_bits(raw: &str) -> Result<u32, EngineError> {
    if raw.len() != 8 || !raw.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(EngineError::MalformedHeader(format!(
            "bits must be 8 hex digits: {raw:?}"
        )));
    }
    u32::from_str_radix(raw, 16)
        .map_err(|e| EngineError::MalformedHeader(format!("bits: {e}")))
}

/// Digest engine for one header, with the constant prefix pre-absorbed.
///
/// Search workers clone the prefix state per nonce instead of re-hashing the
/// whole wire string.
#[derive(Clone)]
pub struct PowHasher {
    prefix: Sha256,
}

impl PowHasher {
    #[must_use]
    pub fn new(header: &BlockHeader) -> Self {
        let mut prefix = Sha256::new();
        prefix.update(header.wire_prefix().as_bytes());
        Self { prefix }
    }

    /// Double SHA-256 of the wire string ending in `nonce`.
    #[must_use]
    pub fn digest(&self, nonce: u32) -> [u8; 32] {
        let mut h = self.prefix.clone();
        h.update(nonce.to_string().as_bytes());
        Sha256::digest(h.finalize()).into()
    }

    /// Whether `nonce` meets `difficulty` leading zero bits.
    #[must_use]
    pub fn meets(&self, nonce: u32, difficulty: u32) -> bool {
        leading_zero_bits(&self.digest(nonce)) >= difficulty
    }
}

/// Count of leading zero bits in `digest`.
#[must_use]
pub fn leading_zero_bits(digest: &[u8]) -> u32 {
    let mut zeros = 0;
    for &byte in digest {
        if byte == 0 {
            zeros += 8;
        } else {
            return zeros + byte.leading_zeros();
        }
    }
    zeros
}

/// Whether `nonce` solves `header` at `difficulty` leading zero bits.
#[must_use]
pub fn validate_nonce_candidate(header: &BlockHeader, difficulty: u32, nonce: u32) -> bool {
    leading_zero_bits(&header.pow_digest(nonce)) >= difficulty
}
