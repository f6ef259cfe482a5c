//! Identities the coordinator works with.
//!
//! A user owns one key group per device. The coordinator only ever reads
//! `key_group_id`; the public key material is handed unchanged to the session
//! factory that builds the session for that device.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier of a user.
pub type Uid = u32;

/// Identifier of one device's key group, unique within its owning user.
pub type KeyGroupId = u32;

/// One remote device's encryption identity.
///
/// Immutable once observed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyGroup {
    /// Key group identifier (unique per user)
    pub key_group_id: KeyGroupId,

    /// Opaque public key material, consumed by the session engine
    pub public_keys: Vec<u8>,
}

impl KeyGroup {
    /// Create a key group with the given id and public key material.
    pub fn new(key_group_id: KeyGroupId, public_keys: impl Into<Vec<u8>>) -> Self {
        Self { key_group_id, public_keys: public_keys.into() }
    }
}

impl fmt::Debug for KeyGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyGroup")
            .field("key_group_id", &self.key_group_id)
            .field("public_keys_len", &self.public_keys.len())
            .finish()
    }
}

/// Reference to a remote user as accepted by the key-group RPC.
///
/// `access_hash` is the credential the user directory holds for `uid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutPeer {
    /// Remote user id
    pub uid: Uid,
    /// Access credential for `uid`
    pub access_hash: u64,
}

impl OutPeer {
    /// Create a peer reference.
    pub fn new(uid: Uid, access_hash: u64) -> Self {
        Self { uid, access_hash }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_group_debug_hides_key_material() {
        let group = KeyGroup::new(7, vec![0xAA; 64]);
        let rendered = format!("{group:?}");

        assert!(rendered.contains("key_group_id: 7"));
        assert!(rendered.contains("public_keys_len: 64"));
        assert!(!rendered.contains("170"));
    }
}
