//! Encrypt fan-out and decrypt for one peer.
//!
//! Both operations run against an immutable snapshot of the session map, so
//! a released request never observes later coordinator state.
//!
//! # Encrypt
//!
//! ```text
//! content key ──┬──► session[kg_a].wrap ──► slot 0 ─┐
//!               ├──► session[kg_b].wrap ──► slot 1 ─┼──► all Ok ──► seal(header = be32(own kg))
//!               └──► session[kg_c].wrap ──► slot 2 ─┘
//! ```
//!
//! Every wrap is issued before any is awaited. The first failure completes
//! the call; wraps still in flight are detached and their results dropped.
//!
//! # Decrypt
//!
//! Header selects the sender's session, the key entry addressed to this
//! device is unwrapped there, and the recovered content key opens the
//! payload with the header as associated data.

use std::{collections::BTreeMap, sync::Arc};

use peerseal_crypto::{BoxNonce, ContentKey, content_box};
use tokio::task::JoinSet;

use crate::{
    env::Environment,
    envelope::{EncryptedBox, EncryptedBoxKey, encode_header},
    error::PeerError,
    model::{KeyGroupId, Uid},
    session::SessionHandle,
};

/// Encrypt `plaintext` for every session of `peer_uid`.
///
/// # Errors
///
/// - `NoRecipients` if there is no session to wrap for
/// - `WrapFailed` on the first failing session
/// - `SealFailed` if the box primitive rejects the payload
pub(crate) async fn encrypt<E: Environment>(
    env: &E,
    peer_uid: Uid,
    own_key_group_id: KeyGroupId,
    sessions: &BTreeMap<KeyGroupId, SessionHandle>,
    plaintext: &[u8],
) -> Result<EncryptedBox, PeerError> {
    if sessions.is_empty() {
        tracing::warn!("peer {}: refusing to encrypt without recipients", peer_uid);
        return Err(PeerError::NoRecipients { peer_uid });
    }

    let content_key = Arc::new(ContentKey::generate(|buf| env.random_bytes(buf)));
    let keys = wrap_for_all(peer_uid, sessions, &content_key).await?;

    let nonce = BoxNonce::generate(|buf| env.random_bytes(buf));
    let header = encode_header(own_key_group_id);
    let sealed = content_box::seal(&header, plaintext, &nonce, &content_key)
        .map_err(|e| PeerError::SealFailed { reason: e.to_string() })?;
    drop(content_key);

    let mut payload = Vec::with_capacity(header.len() + sealed.len());
    payload.extend_from_slice(&header);
    payload.extend_from_slice(&sealed);

    tracing::debug!(
        "peer {}: encrypted {} bytes for {} devices, payload {}..",
        peer_uid,
        plaintext.len(),
        keys.len(),
        hex::encode(payload.get(..12).unwrap_or(&payload))
    );

    EncryptedBox::from_parts(keys, payload).map_err(PeerError::from)
}

/// Wrap `content_key` with every session concurrently.
///
/// Results land in a slot per session (in key-group order), so the key list
/// is deterministic regardless of completion order.
async fn wrap_for_all(
    peer_uid: Uid,
    sessions: &BTreeMap<KeyGroupId, SessionHandle>,
    content_key: &Arc<ContentKey>,
) -> Result<Vec<EncryptedBoxKey>, PeerError> {
    let mut slots: Vec<Option<EncryptedBoxKey>> = vec![None; sessions.len()];
    let mut tasks = JoinSet::new();

    for (slot, (&key_group_id, session)) in sessions.iter().enumerate() {
        let session = session.clone();
        let content_key = Arc::clone(content_key);
        tasks.spawn(async move { (slot, key_group_id, session.wrap(content_key).await) });
    }

    while let Some(joined) = tasks.join_next().await {
        let Ok((slot, key_group_id, result)) = joined else {
            tasks.detach_all();
            return Err(PeerError::Stopped { peer_uid });
        };

        match result {
            Ok(wrapped_key) => {
                if let Some(entry) = slots.get_mut(slot) {
                    *entry = Some(EncryptedBoxKey::new(peer_uid, key_group_id, wrapped_key));
                }
            },
            Err(e) => {
                tracing::warn!(
                    "peer {}: wrap failed for key group {}: {}",
                    peer_uid,
                    key_group_id,
                    e
                );
                // Outstanding wraps run to completion; nobody reads them
                tasks.detach_all();
                return Err(PeerError::WrapFailed { key_group_id, reason: e.to_string() });
            },
        }
    }

    Ok(slots.into_iter().flatten().collect())
}

/// Decrypt `envelope` as device `(own_uid, own_key_group_id)`.
///
/// The envelope was validated on construction, so the header is always
/// present.
///
/// # Errors
///
/// - `SessionNotFound` if the sender key group has no session
/// - `KeyNotFound` if no entry is addressed to this device
/// - `UnwrapFailed` if the sender session cannot recover a content key
/// - `IntegrityFailed` if the payload does not authenticate
pub(crate) async fn decrypt(
    own_uid: Uid,
    own_key_group_id: KeyGroupId,
    sessions: &BTreeMap<KeyGroupId, SessionHandle>,
    envelope: &EncryptedBox,
) -> Result<Vec<u8>, PeerError> {
    let sender_key_group_id = envelope.sender_key_group_id();

    let Some(session) = sessions.get(&sender_key_group_id) else {
        tracing::warn!("unable to find session for sender key group {}", sender_key_group_id);
        return Err(PeerError::SessionNotFound { key_group_id: sender_key_group_id });
    };

    let entry = envelope
        .key_for(own_uid, own_key_group_id)
        .ok_or(PeerError::KeyNotFound { uid: own_uid, key_group_id: own_key_group_id })?;

    let raw_key = session.unwrap(entry.wrapped_key.clone()).await.map_err(|e| {
        PeerError::UnwrapFailed { key_group_id: sender_key_group_id, reason: e.to_string() }
    })?;
    let content_key = ContentKey::from_slice(&raw_key).map_err(|e| PeerError::UnwrapFailed {
        key_group_id: sender_key_group_id,
        reason: e.to_string(),
    })?;
    drop(raw_key);

    let plaintext = content_box::open(envelope.header(), envelope.ciphertext(), &content_key)
        .map_err(|e| PeerError::IntegrityFailed { reason: e.to_string() })?;

    tracing::debug!(
        "decrypted {} bytes from sender key group {}",
        plaintext.len(),
        sender_key_group_id
    );

    Ok(plaintext)
}
