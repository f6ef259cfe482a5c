//! Seams to the collaborators the coordinator consumes.
//!
//! The coordinator never talks to the network, the user store or the
//! session cryptography directly. Each concern sits behind a narrow trait so
//! production wires in RPC and ratchet implementations while tests wire in
//! deterministic fakes.
//!
//! All async traits use `async_trait` so they can be held as `Arc<dyn ..>`
//! inside the coordinator.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{KeyGroup, KeyGroupId, OutPeer, Uid};

/// Failure reported by a collaborator.
///
/// Carries a description only: the coordinator maps it into the
/// caller-visible [`crate::PeerError`] for the operation that failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    /// RPC to the key server failed
    #[error("rpc failed: {0}")]
    Rpc(String),

    /// Session engine rejected the request
    #[error("session error: {0}")]
    Session(String),

    /// Collaborator is gone (task ended, channel closed)
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
}

/// Loads a remote user's public key groups.
#[async_trait]
pub trait KeyGroupLoader: Send + Sync {
    /// Fetch every key group currently published by `peer`.
    async fn load_public_key_groups(
        &self,
        peer: OutPeer,
    ) -> Result<Vec<KeyGroup>, CollaboratorError>;
}

/// Resolves this device's own key group.
#[async_trait]
pub trait KeyManager: Send + Sync {
    /// Active key group id of the local device.
    async fn fetch_own_key_group(&self) -> Result<KeyGroupId, CollaboratorError>;
}

/// Cryptographic session with one remote key group.
///
/// Methods take `&mut self`: each engine is owned by a single session task,
/// which serializes access to its ratchet state.
#[async_trait]
pub trait SessionEngine: Send {
    /// Wrap a content key for this session's device.
    async fn wrap(&mut self, content_key: &[u8]) -> Result<Vec<u8>, CollaboratorError>;

    /// Recover a content key wrapped for the local device.
    async fn unwrap(&mut self, wrapped_key: &[u8]) -> Result<Vec<u8>, CollaboratorError>;
}

/// Builds session engines from observed key groups.
pub trait SessionFactory: Send + Sync {
    /// Create the engine for `peer_uid`'s device `key_group`.
    fn create_session(&self, peer_uid: Uid, key_group: &KeyGroup) -> Box<dyn SessionEngine>;
}

/// Local user store: resolves access credentials for known users.
pub trait UserDirectory: Send + Sync {
    /// Peer reference for `uid`, or `None` if the user is unknown.
    fn out_peer(&self, uid: Uid) -> Option<OutPeer>;
}

/// Bundle of the collaborators one coordinator needs.
#[derive(Clone)]
pub struct Collaborators {
    /// Public key-group RPC
    pub loader: Arc<dyn KeyGroupLoader>,
    /// Own key-group resolution
    pub key_manager: Arc<dyn KeyManager>,
    /// Session construction
    pub sessions: Arc<dyn SessionFactory>,
}

impl Collaborators {
    /// Bundle the given collaborators.
    pub fn new(
        loader: Arc<dyn KeyGroupLoader>,
        key_manager: Arc<dyn KeyManager>,
        sessions: Arc<dyn SessionFactory>,
    ) -> Self {
        Self { loader, key_manager, sessions }
    }
}
