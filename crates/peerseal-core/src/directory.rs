//! One coordinator per remote user.
//!
//! The directory is the entry point for callers that address peers by uid.
//! Coordinators are created on first use: the uid is resolved through the
//! [`UserDirectory`] and the new coordinator starts loading key material
//! immediately. Later calls for the same uid reach the same coordinator until
//! it is shut down or its key material failed to load. A failed coordinator
//! is replaced on the next call, so a transient load error is retried with a
//! fresh load.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::Mutex;

use crate::{
    collaborators::{Collaborators, UserDirectory},
    config::CoordinatorConfig,
    env::Environment,
    envelope::EncryptedBox,
    error::PeerError,
    model::Uid,
    peer::{PeerCoordinator, PeerHandle, Phase},
};

/// Registry of peer coordinators for one local user.
pub struct PeerDirectory<E: Environment> {
    env: E,
    config: CoordinatorConfig,
    own_uid: Uid,
    collaborators: Collaborators,
    users: Arc<dyn UserDirectory>,
    peers: Mutex<HashMap<Uid, PeerHandle>>,
}

impl<E: Environment> PeerDirectory<E> {
    /// Directory acting as local user `own_uid`.
    pub fn new(
        env: E,
        config: CoordinatorConfig,
        own_uid: Uid,
        collaborators: Collaborators,
        users: Arc<dyn UserDirectory>,
    ) -> Self {
        Self { env, config, own_uid, collaborators, users, peers: Mutex::new(HashMap::new()) }
    }

    /// Local user id.
    pub fn own_uid(&self) -> Uid {
        self.own_uid
    }

    /// Handle for `peer_uid`, spawning its coordinator if needed.
    ///
    /// A coordinator that has stopped, or that entered [`Phase::Failed`], is
    /// replaced.
    ///
    /// # Errors
    ///
    /// `UnknownPeer` if the user directory cannot resolve `peer_uid`.
    pub async fn peer(&self, peer_uid: Uid) -> Result<PeerHandle, PeerError> {
        let mut peers = self.peers.lock().await;

        if let Some(handle) = peers.get(&peer_uid) {
            match handle.status().await {
                Ok(status) if status.phase != Phase::Failed => return Ok(handle.clone()),
                Ok(status) => {
                    tracing::info!(
                        "peer {}: replacing failed coordinator ({})",
                        peer_uid,
                        status.failure.map(|e| e.to_string()).unwrap_or_default()
                    );
                    handle.shutdown().await;
                },
                Err(_) => tracing::debug!("peer {}: replacing stopped coordinator", peer_uid),
            }
        }

        let Some(out_peer) = self.users.out_peer(peer_uid) else {
            tracing::warn!("peer {}: not in user directory", peer_uid);
            return Err(PeerError::UnknownPeer { peer_uid });
        };

        let handle = PeerCoordinator::new(
            self.env.clone(),
            self.config.clone(),
            self.own_uid,
            out_peer,
            self.collaborators.clone(),
        )
        .spawn();
        peers.insert(peer_uid, handle.clone());

        Ok(handle)
    }

    /// Encrypt `plaintext` for every device of `peer_uid`.
    pub async fn encrypt(
        &self,
        peer_uid: Uid,
        plaintext: impl Into<Vec<u8>>,
    ) -> Result<EncryptedBox, PeerError> {
        self.peer(peer_uid).await?.encrypt(plaintext).await
    }

    /// Decrypt an envelope sent by `peer_uid`.
    pub async fn decrypt(
        &self,
        peer_uid: Uid,
        envelope: EncryptedBox,
    ) -> Result<Vec<u8>, PeerError> {
        self.peer(peer_uid).await?.decrypt(envelope).await
    }

    /// Stop and forget the coordinator for `peer_uid`, if any.
    ///
    /// Returns whether a coordinator existed.
    pub async fn shutdown_peer(&self, peer_uid: Uid) -> bool {
        let handle = self.peers.lock().await.remove(&peer_uid);
        match handle {
            Some(handle) => {
                handle.shutdown().await;
                true
            },
            None => false,
        }
    }

    /// Stop every coordinator.
    pub async fn shutdown_all(&self) {
        let handles: Vec<PeerHandle> = self.peers.lock().await.drain().map(|(_, h)| h).collect();
        tracing::info!("shutting down {} peer coordinators", handles.len());
        for handle in handles {
            handle.shutdown().await;
        }
    }

    /// Number of coordinators currently held.
    pub async fn peer_count(&self) -> usize {
        self.peers.lock().await.len()
    }
}
