//! Caller-visible errors of the peer coordinator.
//!
//! Every encrypt or decrypt call resolves to exactly one terminal result;
//! a failure is one of these variants and never exposes partial output.
//! Collaborator and primitive failures are carried as descriptions so the
//! type stays `Clone` and can be delivered to every queued caller.

use thiserror::Error;

use crate::{
    envelope::CodecError,
    model::{KeyGroupId, Uid},
};

/// Errors returned by [`crate::PeerHandle`] and [`crate::PeerDirectory`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeerError {
    /// Loading the peer's public key groups failed
    #[error("failed to load key groups for peer {peer_uid}: {reason}")]
    KeyGroupLoadFailed {
        /// Remote user id
        peer_uid: Uid,
        /// Collaborator failure
        reason: String,
    },

    /// Resolving this device's own key group failed
    #[error("failed to load own key group: {reason}")]
    OwnKeyGroupLoadFailed {
        /// Collaborator failure
        reason: String,
    },

    /// Envelope names a sender key group we hold no session for
    #[error("no session for sender key group {key_group_id}")]
    SessionNotFound {
        /// Sender key group from the envelope header
        key_group_id: KeyGroupId,
    },

    /// Envelope carries no key addressed to this device
    #[error("no key for uid {uid}, key group {key_group_id}")]
    KeyNotFound {
        /// Own user id
        uid: Uid,
        /// Own key group id
        key_group_id: KeyGroupId,
    },

    /// A session failed to wrap the content key
    #[error("wrap failed for key group {key_group_id}: {reason}")]
    WrapFailed {
        /// Key group whose session failed
        key_group_id: KeyGroupId,
        /// Session failure
        reason: String,
    },

    /// The sender's session failed to unwrap our key
    #[error("unwrap failed for key group {key_group_id}: {reason}")]
    UnwrapFailed {
        /// Sender key group
        key_group_id: KeyGroupId,
        /// Session failure
        reason: String,
    },

    /// Payload failed authentication (tamper or key mismatch)
    #[error("integrity check failed: {reason}")]
    IntegrityFailed {
        /// Primitive failure
        reason: String,
    },

    /// Payload could not be sealed
    #[error("seal failed: {reason}")]
    SealFailed {
        /// Primitive failure
        reason: String,
    },

    /// Encrypt was requested with no session to wrap for
    #[error("peer {peer_uid} has no key groups to encrypt for")]
    NoRecipients {
        /// Remote user id
        peer_uid: Uid,
    },

    /// Envelope violates the wire invariants
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(#[from] CodecError),

    /// User directory has no entry for the peer
    #[error("unknown peer {peer_uid}")]
    UnknownPeer {
        /// Remote user id
        peer_uid: Uid,
    },

    /// Coordinator has shut down
    #[error("coordinator for peer {peer_uid} stopped")]
    Stopped {
        /// Remote user id
        peer_uid: Uid,
    },
}

impl PeerError {
    /// Returns true if a fresh attempt may succeed.
    ///
    /// Load failures and session failures depend on collaborators that can
    /// recover. Integrity, addressing and envelope errors are properties of
    /// the input and never change on retry.
    ///
    /// A coordinator keeps its load failure for good; retrying a load error
    /// means going through [`PeerDirectory`](crate::PeerDirectory), which
    /// replaces failed coordinators.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::KeyGroupLoadFailed { .. }
                | Self::OwnKeyGroupLoadFailed { .. }
                | Self::WrapFailed { .. }
                | Self::UnwrapFailed { .. }
        )
    }
}
