//! # Snapsync Cryptography
//!
//! Threshold BLS signatures and content digests for the snapshot
//! subsystem.
//!
//! ## Threshold scheme
//!
//! Snapshot hash agreement uses a `(t, n)` threshold signature scheme on
//! the BLS12-381 pairing curve:
//!
//! - Signature shares and recovered aggregate signatures are points in
//!   **G1**, carried on the wire as an affine `(x, y)` coordinate pair.
//! - Public key shares and the network's common public key are points in
//!   **G2**, carried as four field-element components.
//! - Any `t` valid shares can be combined into the aggregate signature
//!   via Lagrange interpolation at zero; the aggregate verifies against
//!   the single common public key.
//!
//! The group algebra stays inside this crate: callers see
//! [`Signature`], [`PublicKey`], [`LagrangeCoeffs`] and the
//! [`ThresholdScheme`] operations, never curve points.
//!
//! ## Digests
//!
//! Snapshot content integrity uses SHA-256. [`sha256`] and
//! [`Sha256Accumulator`] are the fold primitives the storage layer builds
//! its running snapshot digest with.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

mod threshold;

pub use threshold::{
    LagrangeCoeffs, PublicKey, SecretKeyShare, Signature, ThresholdScheme,
};

use sha2::{Digest, Sha256};
use thiserror::Error;

/// A 32-byte digest or message hash
pub type Hash = [u8; 32];

/// Result type for cryptographic operations
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Errors raised by the cryptographic primitives
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The `(t, n)` parameters do not describe a valid scheme
    #[error("invalid threshold scheme parameters: t={t}, n={n}")]
    InvalidScheme {
        /// Requested threshold
        t: usize,
        /// Requested participant count
        n: usize,
    },

    /// Bytes did not decode to a valid, canonical curve point
    #[error("invalid curve point: {0}")]
    InvalidPoint(String),

    /// A scalar was not a canonical field element
    #[error("invalid scalar: {0}")]
    InvalidScalar(String),

    /// A hex string failed to decode
    #[error("invalid hex encoding: {0}")]
    Hex(#[from] hex::FromHexError),

    /// Decoded value had the wrong length
    #[error("invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength {
        /// Expected byte length
        expected: usize,
        /// Actual byte length
        actual: usize,
    },

    /// An interpolation index appeared more than once
    #[error("duplicate interpolation index: {0}")]
    DuplicateIndex(u64),

    /// Interpolation indices are 1-based; zero is not a share index
    #[error("interpolation index must be non-zero")]
    ZeroIndex,

    /// Share/coefficient counts do not match the scheme
    #[error("count mismatch: expected {expected}, got {actual}")]
    CountMismatch {
        /// Expected element count
        expected: usize,
        /// Actual element count
        actual: usize,
    },
}

/// Compute the SHA-256 digest of `data`.
#[inline]
pub fn sha256(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Incremental SHA-256 fold used for running snapshot digests.
#[derive(Clone, Default)]
pub struct Sha256Accumulator {
    inner: Sha256,
}

impl Sha256Accumulator {
    /// Create an empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold `data` into the running digest
    pub fn write(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Consume the accumulator and produce the digest
    pub fn finalize(self) -> Hash {
        self.inner.finalize().into()
    }
}

impl std::fmt::Debug for Sha256Accumulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sha256Accumulator").finish_non_exhaustive()
    }
}

/// Encode a 32-byte hash as a `0x`-prefixed hex string.
pub fn hash_to_hex(hash: &Hash) -> String {
    format!("0x{}", hex::encode(hash))
}

/// Parse a 32-byte hash from a hex string (with or without `0x` prefix).
pub fn hash_from_hex(s: &str) -> Result<Hash> {
    let stripped = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(stripped)?;
    if bytes.len() != 32 {
        return Err(CryptoError::InvalidLength {
            expected: 32,
            actual: bytes.len(),
        });
    }
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&bytes);
    Ok(hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_matches_known_vector() {
        // SHA-256 of the empty string
        assert_eq!(
            hash_to_hex(&sha256(b"")),
            "0xe3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn accumulator_equals_one_shot() {
        let mut acc = Sha256Accumulator::new();
        acc.write(b"hello ");
        acc.write(b"world");
        assert_eq!(acc.finalize(), sha256(b"hello world"));
    }

    #[test]
    fn hash_hex_round_trip() {
        let hash = sha256(b"snapshot");
        let encoded = hash_to_hex(&hash);
        assert_eq!(hash_from_hex(&encoded).unwrap(), hash);
        // prefix-less form is accepted too
        assert_eq!(hash_from_hex(&encoded[2..]).unwrap(), hash);
    }

    #[test]
    fn hash_from_hex_rejects_wrong_length() {
        assert!(matches!(
            hash_from_hex("0xabcd"),
            Err(CryptoError::InvalidLength {
                expected: 32,
                actual: 2
            })
        ));
    }
}
