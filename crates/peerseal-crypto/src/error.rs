//! Error types for box operations

use thiserror::Error;

/// Errors from sealing or opening a content box
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BoxError {
    /// Key material has the wrong length
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected key length
        expected: usize,
        /// Actual key length
        actual: usize,
    },

    /// Nonce has the wrong length
    #[error("invalid nonce length: expected {expected}, got {actual}")]
    InvalidNonceLength {
        /// Expected nonce length
        expected: usize,
        /// Actual nonce length
        actual: usize,
    },

    /// HKDF could not expand the content key
    #[error("key derivation failed")]
    KeyDerivation,

    /// AEAD refused to encrypt the payload
    #[error("seal failed: {reason}")]
    SealFailed {
        /// Reason reported by the cipher
        reason: String,
    },

    /// Sealed bytes are too short to contain a nonce and tag
    #[error("sealed payload truncated: {len} bytes, need at least {min}")]
    Truncated {
        /// Length of the sealed input
        len: usize,
        /// Minimum length of a valid sealed payload
        min: usize,
    },

    /// Authentication tag mismatch (tamper, wrong key or wrong header)
    #[error("integrity check failed")]
    IntegrityFailed,
}

impl BoxError {
    /// Returns true if the input was rejected as tampered or mis-keyed.
    ///
    /// Truncation counts as tampering: a well-formed sender never produces it.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, Self::IntegrityFailed | Self::Truncated { .. })
    }
}
