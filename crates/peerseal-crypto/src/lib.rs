//! Peerseal Cryptographic Primitives
//!
//! Building blocks for the multi-device envelope. Pure functions with
//! deterministic outputs: callers provide the random bytes, so tests can
//! replay exact ciphertexts.
//!
//! # Key Lifecycle
//!
//! Every encrypted message gets its own content key. The key is wrapped once
//! per recipient device by that device's session, and the payload is sealed
//! once under the content key.
//!
//! ```text
//! Random 128-byte Content Key ──► wrap per device ──► EncryptedBoxKey[]
//!        │
//!        ▼
//! HKDF(key, salt = 32-byte nonce) → AEAD key + XNonce
//!        │
//!        ▼
//! XChaCha20-Poly1305(plaintext, aad = header) → nonce || ciphertext
//! ```
//!
//! # Security
//!
//! - Single use: a content key seals exactly one payload and is zeroized on
//!   drop
//! - Header binding: the 4-byte sender header is authenticated as associated
//!   data, so swapping it breaks the tag
//! - Fail closed: any mismatch in key, nonce, header or ciphertext is reported
//!   as [`BoxError::IntegrityFailed`]

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod content_box;
pub mod error;
pub mod key;

pub use content_box::{SEALED_OVERHEAD, TAG_SIZE, open, seal};
pub use error::BoxError;
pub use key::{BOX_NONCE_SIZE, BoxNonce, CONTENT_KEY_SIZE, ContentKey};
