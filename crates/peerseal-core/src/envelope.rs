//! Multi-recipient envelope and its wire codec.
//!
//! An [`EncryptedBox`] carries one wrapped content key per recipient device
//! plus the sealed payload. The payload is prefixed with a 4-byte big-endian
//! header naming the sender's key group; the header is also the associated
//! data of the seal, so it cannot be swapped without breaking the tag.
//!
//! ```text
//! keys:    [{uid, key_group_id, wrapped_key}, ...]
//! payload: [sender key_group_id: 4 BE][box nonce: 32][ciphertext || tag]
//! ```
//!
//! On the wire the envelope is CBOR (`keys` as an array of records, `payload`
//! as bytes). The layout is a compatibility surface shared with other peers.
//!
//! # Invariants
//!
//! - `payload` is at least [`HEADER_SIZE`] bytes
//! - `keys` holds at most one entry per `(uid, key_group_id)`
//!
//! Both are checked by [`EncryptedBox::from_parts`] and [`EncryptedBox::decode`],
//! so every constructed box satisfies them.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{KeyGroupId, Uid};

/// Size of the sender key group header in front of the ciphertext
pub const HEADER_SIZE: usize = 4;

/// Errors from envelope construction and decoding
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Payload cannot hold the sender header
    #[error("payload too short: {len} bytes, header needs {HEADER_SIZE}")]
    PayloadTooShort {
        /// Actual payload length
        len: usize,
    },

    /// Two key entries address the same device
    #[error("duplicate key entry for uid {uid}, key group {key_group_id}")]
    DuplicateKey {
        /// Recipient user id
        uid: Uid,
        /// Recipient key group id
        key_group_id: KeyGroupId,
    },

    /// CBOR encoding or decoding failed
    #[error("CBOR error: {0}")]
    Cbor(String),
}

/// Encode a key group id as the 4-byte payload header.
pub fn encode_header(key_group_id: KeyGroupId) -> [u8; HEADER_SIZE] {
    key_group_id.to_be_bytes()
}

/// Decode the sender key group id from the front of a payload.
///
/// # Errors
///
/// - `PayloadTooShort` if fewer than [`HEADER_SIZE`] bytes are available
pub fn decode_header(payload: &[u8]) -> Result<KeyGroupId, CodecError> {
    let header: [u8; HEADER_SIZE] = payload
        .get(..HEADER_SIZE)
        .and_then(|h| h.try_into().ok())
        .ok_or(CodecError::PayloadTooShort { len: payload.len() })?;

    Ok(KeyGroupId::from_be_bytes(header))
}

/// One content-key wrapping addressed to one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedBoxKey {
    /// Recipient user id
    pub uid: Uid,

    /// Recipient device key group
    pub key_group_id: KeyGroupId,

    /// Content key wrapped by the session for this device
    #[serde(with = "serde_bytes")]
    pub wrapped_key: Vec<u8>,
}

impl EncryptedBoxKey {
    /// Create a key entry.
    pub fn new(uid: Uid, key_group_id: KeyGroupId, wrapped_key: Vec<u8>) -> Self {
        Self { uid, key_group_id, wrapped_key }
    }
}

/// The envelope that crosses the coordinator boundary.
///
/// Immutable once constructed; use [`EncryptedBox::into_parts`] and
/// [`EncryptedBox::from_parts`] to derive a modified copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncryptedBox {
    keys: Vec<EncryptedBoxKey>,
    #[serde(with = "serde_bytes")]
    payload: Vec<u8>,
}

/// Unvalidated wire form, checked by [`EncryptedBox::from_parts`].
#[derive(Deserialize)]
struct RawEncryptedBox {
    keys: Vec<EncryptedBoxKey>,
    #[serde(with = "serde_bytes")]
    payload: Vec<u8>,
}

impl EncryptedBox {
    /// Build an envelope from key entries and a header-prefixed payload.
    ///
    /// # Errors
    ///
    /// - `PayloadTooShort` if `payload` has no room for the header
    /// - `DuplicateKey` if two entries address the same device
    pub fn from_parts(keys: Vec<EncryptedBoxKey>, payload: Vec<u8>) -> Result<Self, CodecError> {
        decode_header(&payload)?;

        let mut seen = HashSet::with_capacity(keys.len());
        for key in &keys {
            if !seen.insert((key.uid, key.key_group_id)) {
                return Err(CodecError::DuplicateKey {
                    uid: key.uid,
                    key_group_id: key.key_group_id,
                });
            }
        }

        Ok(Self { keys, payload })
    }

    /// Wrapped content keys, one per recipient device.
    pub fn keys(&self) -> &[EncryptedBoxKey] {
        &self.keys
    }

    /// Header-prefixed sealed payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Sender key group id from the payload header.
    pub fn sender_key_group_id(&self) -> KeyGroupId {
        let mut header = [0u8; HEADER_SIZE];
        header.copy_from_slice(self.header());
        KeyGroupId::from_be_bytes(header)
    }

    /// The 4-byte header (associated data of the seal).
    pub fn header(&self) -> &[u8] {
        &self.payload[..HEADER_SIZE]
    }

    /// Sealed bytes after the header.
    pub fn ciphertext(&self) -> &[u8] {
        &self.payload[HEADER_SIZE..]
    }

    /// Key entry addressed to `(uid, key_group_id)`, if any.
    pub fn key_for(&self, uid: Uid, key_group_id: KeyGroupId) -> Option<&EncryptedBoxKey> {
        self.keys.iter().find(|k| k.uid == uid && k.key_group_id == key_group_id)
    }

    /// Split into key entries and payload.
    pub fn into_parts(self) -> (Vec<EncryptedBoxKey>, Vec<u8>) {
        (self.keys, self.payload)
    }

    /// Serialize to CBOR.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(self, &mut bytes).map_err(|e| CodecError::Cbor(e.to_string()))?;
        Ok(bytes)
    }

    /// Deserialize from CBOR, enforcing the envelope invariants.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let raw: RawEncryptedBox =
            ciborium::de::from_reader(bytes).map_err(|e| CodecError::Cbor(e.to_string()))?;
        Self::from_parts(raw.keys, raw.payload)
    }
}

#[cfg(test)]
mod tests {
    use ciborium::Value;

    use super::*;

    fn sample_box() -> EncryptedBox {
        let mut payload = encode_header(9).to_vec();
        payload.extend_from_slice(b"sealed-bytes");
        EncryptedBox::from_parts(
            vec![
                EncryptedBoxKey::new(2, 7, vec![0x07; 48]),
                EncryptedBoxKey::new(2, 9, vec![0x09; 48]),
            ],
            payload,
        )
        .unwrap()
    }

    #[test]
    fn header_is_big_endian() {
        assert_eq!(encode_header(0x0102_0304), [0x01, 0x02, 0x03, 0x04]);
        assert_eq!(decode_header(&[0x01, 0x02, 0x03, 0x04, 0xFF]).unwrap(), 0x0102_0304);
    }

    #[test]
    fn decode_header_rejects_short_payload() {
        assert_eq!(decode_header(&[1, 2, 3]), Err(CodecError::PayloadTooShort { len: 3 }));
    }

    #[test]
    fn accessors_split_payload() {
        let envelope = sample_box();

        assert_eq!(envelope.sender_key_group_id(), 9);
        assert_eq!(envelope.header(), &[0, 0, 0, 9]);
        assert_eq!(envelope.ciphertext(), b"sealed-bytes");
    }

    #[test]
    fn key_for_matches_uid_and_group() {
        let envelope = sample_box();

        assert_eq!(envelope.key_for(2, 7).map(|k| k.wrapped_key[0]), Some(0x07));
        assert!(envelope.key_for(2, 8).is_none());
        assert!(envelope.key_for(3, 7).is_none());
    }

    #[test]
    fn from_parts_rejects_duplicate_devices() {
        let result = EncryptedBox::from_parts(
            vec![EncryptedBoxKey::new(1, 5, vec![1]), EncryptedBoxKey::new(1, 5, vec![2])],
            encode_header(5).to_vec(),
        );

        assert_eq!(result, Err(CodecError::DuplicateKey { uid: 1, key_group_id: 5 }));
    }

    #[test]
    fn from_parts_accepts_same_group_for_different_users() {
        let result = EncryptedBox::from_parts(
            vec![EncryptedBoxKey::new(1, 5, vec![1]), EncryptedBoxKey::new(2, 5, vec![2])],
            encode_header(5).to_vec(),
        );

        assert!(result.is_ok());
    }

    #[test]
    fn cbor_roundtrip_preserves_layout() {
        let envelope = sample_box();
        let decoded = EncryptedBox::decode(&envelope.encode().unwrap()).unwrap();

        assert_eq!(decoded, envelope);
        assert_eq!(decoded.payload()[..HEADER_SIZE], encode_header(9));
    }

    fn field<'a>(map: &'a [(Value, Value)], name: &str) -> &'a Value {
        map.iter().find(|(key, _)| key.as_text() == Some(name)).map(|(_, value)| value).unwrap()
    }

    #[test]
    fn binary_fields_are_cbor_byte_strings() {
        let bytes = sample_box().encode().unwrap();
        let value: Value = ciborium::de::from_reader(bytes.as_slice()).unwrap();
        let envelope = value.as_map().unwrap();

        assert!(field(envelope, "payload").is_bytes());
        for key in field(envelope, "keys").as_array().unwrap() {
            assert!(field(key.as_map().unwrap(), "wrapped_key").is_bytes());
        }

        // bstr(16) major type 2, then the header bytes verbatim
        assert!(bytes.windows(5).any(|w| w == [0x50, 0x00, 0x00, 0x00, 0x09]));
    }

    #[test]
    fn byte_string_encoding_stays_compact() {
        let mut payload = encode_header(9).to_vec();
        payload.extend_from_slice(&[0xAB; 256]);
        let envelope = EncryptedBox::from_parts(Vec::new(), payload).unwrap();

        // One byte per payload byte plus map, field names and length prefixes
        assert!(envelope.encode().unwrap().len() < 260 + 32);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(EncryptedBox::decode(&[0xFF, 0x00, 0x13]), Err(CodecError::Cbor(_))));
    }

    #[test]
    fn decode_enforces_invariants() {
        let raw = EncryptedBox { keys: Vec::new(), payload: vec![1, 2] };
        let bytes = raw.encode().unwrap();

        assert_eq!(EncryptedBox::decode(&bytes), Err(CodecError::PayloadTooShort { len: 2 }));
    }
}
