//! Content keys and box nonces.
//!
//! Both are filled by a caller-provided closure instead of pulling from a
//! global RNG. Production passes OS randomness, tests pass a seeded source.

use std::fmt;

use zeroize::Zeroize;

use crate::error::BoxError;

/// Size of the per-message content key material (128 bytes)
pub const CONTENT_KEY_SIZE: usize = 128;

/// Size of the random box nonce carried in front of the ciphertext (32 bytes)
pub const BOX_NONCE_SIZE: usize = 32;

/// Single-use symmetric key material for one envelope.
///
/// Wrapped once per recipient device and used to seal exactly one payload.
/// The bytes are zeroized when the key is dropped.
pub struct ContentKey {
    bytes: [u8; CONTENT_KEY_SIZE],
}

impl ContentKey {
    /// Create a key whose bytes are written by `fill`.
    ///
    /// The buffer is allocated inside the key so the material never lives in
    /// an unzeroized temporary.
    pub fn generate(fill: impl FnOnce(&mut [u8])) -> Self {
        let mut key = Self { bytes: [0u8; CONTENT_KEY_SIZE] };
        fill(&mut key.bytes);
        key
    }

    /// Rebuild a key from unwrapped bytes.
    ///
    /// # Errors
    ///
    /// - `InvalidKeyLength` if `bytes` is not exactly [`CONTENT_KEY_SIZE`]
    pub fn from_slice(bytes: &[u8]) -> Result<Self, BoxError> {
        if bytes.len() != CONTENT_KEY_SIZE {
            return Err(BoxError::InvalidKeyLength {
                expected: CONTENT_KEY_SIZE,
                actual: bytes.len(),
            });
        }

        Ok(Self::generate(|buf| buf.copy_from_slice(bytes)))
    }

    /// Raw key material.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Drop for ContentKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentKey").field("len", &CONTENT_KEY_SIZE).finish_non_exhaustive()
    }
}

/// Random salt for one sealed payload.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct BoxNonce([u8; BOX_NONCE_SIZE]);

impl BoxNonce {
    /// Create a nonce whose bytes are written by `fill`.
    pub fn generate(fill: impl FnOnce(&mut [u8])) -> Self {
        let mut nonce = [0u8; BOX_NONCE_SIZE];
        fill(&mut nonce);
        Self(nonce)
    }

    /// Parse a nonce from the front of a sealed payload.
    ///
    /// # Errors
    ///
    /// - `InvalidNonceLength` if `bytes` is not exactly [`BOX_NONCE_SIZE`]
    pub fn from_slice(bytes: &[u8]) -> Result<Self, BoxError> {
        let nonce: [u8; BOX_NONCE_SIZE] = bytes.try_into().map_err(|_| {
            BoxError::InvalidNonceLength { expected: BOX_NONCE_SIZE, actual: bytes.len() }
        })?;
        Ok(Self(nonce))
    }

    /// Raw nonce bytes.
    pub fn as_bytes(&self) -> &[u8; BOX_NONCE_SIZE] {
        &self.0
    }
}

impl fmt::Debug for BoxNonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BoxNonce({:02x}{:02x}{:02x}{:02x}..)",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}
