//! Authenticated box using HKDF-SHA256 and `XChaCha20-Poly1305`
//!
//! All functions are pure - the nonce must be provided by the caller.
//!
//! Sealed layout:
//!
//! ```text
//! [box nonce: 32][XChaCha20-Poly1305 ciphertext || tag: 16]
//! ```
//!
//! The AEAD key and 24-byte `XNonce` are expanded from the content key with
//! the box nonce as HKDF salt, so one content key never reuses an AEAD nonce.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::{
    error::BoxError,
    key::{BOX_NONCE_SIZE, BoxNonce, ContentKey},
};

/// Label for AEAD key expansion
const BOX_KEY_LABEL: &[u8] = b"peersealBoxV1";

/// Poly1305 tag size (16 bytes)
pub const TAG_SIZE: usize = 16;

/// Bytes added to the plaintext by [`seal`]
pub const SEALED_OVERHEAD: usize = BOX_NONCE_SIZE + TAG_SIZE;

/// AEAD key and nonce expanded from a content key.
struct BoxKeys {
    key: [u8; 32],
    nonce: [u8; 24],
}

impl Drop for BoxKeys {
    fn drop(&mut self) {
        self.key.zeroize();
        self.nonce.zeroize();
    }
}

fn expand(content_key: &ContentKey, nonce: &BoxNonce) -> Result<BoxKeys, BoxError> {
    let hkdf = Hkdf::<Sha256>::new(Some(nonce.as_bytes()), content_key.as_bytes());

    let mut okm = [0u8; 56];
    hkdf.expand(BOX_KEY_LABEL, &mut okm).map_err(|_| BoxError::KeyDerivation)?;

    let mut keys = BoxKeys { key: [0u8; 32], nonce: [0u8; 24] };
    keys.key.copy_from_slice(&okm[..32]);
    keys.nonce.copy_from_slice(&okm[32..]);
    okm.zeroize();

    Ok(keys)
}

/// Seal `plaintext` under `content_key`, binding `header` as associated data.
///
/// Returns `nonce || ciphertext || tag`.
///
/// # Errors
///
/// - `KeyDerivation` or `SealFailed` if the primitive cannot be set up
pub fn seal(
    header: &[u8],
    plaintext: &[u8],
    nonce: &BoxNonce,
    content_key: &ContentKey,
) -> Result<Vec<u8>, BoxError> {
    let keys = expand(content_key, nonce)?;
    let cipher = XChaCha20Poly1305::new((&keys.key).into());

    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&keys.nonce), Payload { msg: plaintext, aad: header })
        .map_err(|e| BoxError::SealFailed { reason: e.to_string() })?;

    let mut sealed = Vec::with_capacity(BOX_NONCE_SIZE + ciphertext.len());
    sealed.extend_from_slice(nonce.as_bytes());
    sealed.extend_from_slice(&ciphertext);

    Ok(sealed)
}

/// Open a payload produced by [`seal`].
///
/// # Errors
///
/// - `Truncated` if `sealed` cannot hold a nonce and tag
/// - `IntegrityFailed` on tamper, wrong key or wrong header
pub fn open(header: &[u8], sealed: &[u8], content_key: &ContentKey) -> Result<Vec<u8>, BoxError> {
    if sealed.len() < SEALED_OVERHEAD {
        return Err(BoxError::Truncated { len: sealed.len(), min: SEALED_OVERHEAD });
    }

    let (nonce_bytes, ciphertext) = sealed.split_at(BOX_NONCE_SIZE);
    let nonce = BoxNonce::from_slice(nonce_bytes)?;

    let keys = expand(content_key, &nonce)?;
    let cipher = XChaCha20Poly1305::new((&keys.key).into());

    cipher
        .decrypt(XNonce::from_slice(&keys.nonce), Payload { msg: ciphertext, aad: header })
        .map_err(|_| BoxError::IntegrityFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key(seed: u8) -> ContentKey {
        ContentKey::generate(|buf| {
            for (i, byte) in buf.iter_mut().enumerate() {
                *byte = seed.wrapping_add(i as u8);
            }
        })
    }

    fn test_nonce(value: u8) -> BoxNonce {
        BoxNonce::generate(|buf| buf.fill(value))
    }

    #[test]
    fn seal_open_roundtrip() {
        let key = test_key(1);
        let header = 9u32.to_be_bytes();

        let sealed = seal(&header, b"Hello, World!", &test_nonce(0xAB), &key).unwrap();
        let opened = open(&header, &sealed, &key).unwrap();

        assert_eq!(opened, b"Hello, World!");
    }

    #[test]
    fn seal_open_empty_plaintext() {
        let key = test_key(2);
        let sealed = seal(b"", b"", &test_nonce(0), &key).unwrap();

        assert_eq!(sealed.len(), SEALED_OVERHEAD);
        assert_eq!(open(b"", &sealed, &key).unwrap(), b"");
    }

    #[test]
    fn sealed_layout_starts_with_nonce() {
        let key = test_key(3);
        let nonce = test_nonce(0x42);
        let sealed = seal(b"hdr", b"payload", &nonce, &key).unwrap();

        assert_eq!(&sealed[..BOX_NONCE_SIZE], nonce.as_bytes());
        assert_eq!(sealed.len(), b"payload".len() + SEALED_OVERHEAD);
    }

    #[test]
    fn different_nonces_produce_different_ciphertexts() {
        let key = test_key(4);
        let a = seal(b"h", b"same", &test_nonce(0x00), &key).unwrap();
        let b = seal(b"h", b"same", &test_nonce(0xFF), &key).unwrap();

        assert_ne!(a[BOX_NONCE_SIZE..], b[BOX_NONCE_SIZE..]);
    }

    #[test]
    fn wrong_key_fails() {
        let sealed = seal(b"h", b"secret", &test_nonce(1), &test_key(5)).unwrap();
        assert_eq!(open(b"h", &sealed, &test_key(6)), Err(BoxError::IntegrityFailed));
    }

    #[test]
    fn wrong_header_fails() {
        let key = test_key(7);
        let sealed = seal(&7u32.to_be_bytes(), b"secret", &test_nonce(1), &key).unwrap();
        assert_eq!(open(&9u32.to_be_bytes(), &sealed, &key), Err(BoxError::IntegrityFailed));
    }

    #[test]
    fn tampered_nonce_fails() {
        let key = test_key(8);
        let mut sealed = seal(b"h", b"secret", &test_nonce(1), &key).unwrap();
        sealed[0] ^= 0x01;
        assert_eq!(open(b"h", &sealed, &key), Err(BoxError::IntegrityFailed));
    }

    #[test]
    fn tampered_tag_fails() {
        let key = test_key(9);
        let mut sealed = seal(b"h", b"secret", &test_nonce(1), &key).unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x80;
        assert_eq!(open(b"h", &sealed, &key), Err(BoxError::IntegrityFailed));
    }

    #[test]
    fn truncated_input_is_rejected() {
        let key = test_key(10);
        let result = open(b"h", &[0u8; SEALED_OVERHEAD - 1], &key);
        assert_eq!(
            result,
            Err(BoxError::Truncated { len: SEALED_OVERHEAD - 1, min: SEALED_OVERHEAD })
        );
    }
}
