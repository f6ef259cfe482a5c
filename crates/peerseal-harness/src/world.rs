//! A small world of users and devices sharing one key server.

use std::sync::Arc;

use peerseal_core::{
    Collaborators, CoordinatorConfig, Environment, KeyGroup, KeyGroupId, OutPeer, PeerCoordinator,
    PeerDirectory, PeerHandle, Uid, UserDirectory,
};

use crate::{
    sim_directory::{SimKeyManager, SimKeyServer},
    sim_env::SimEnv,
    sim_session::{SessionControl, SimSessionFactory},
};

/// Deterministic world: one environment, one key server, many devices.
#[derive(Clone)]
pub struct SimWorld {
    env: SimEnv,
    key_server: SimKeyServer,
}

/// One local device with its own collaborators.
#[derive(Clone)]
pub struct SimDevice {
    /// Owning user
    pub uid: Uid,
    /// This device's key group
    pub key_group_id: KeyGroupId,
    /// Own key-group resolution for this device
    pub key_manager: SimKeyManager,
    /// Fault plan and counters of this device's sessions
    pub sessions: SessionControl,
    env: SimEnv,
    key_server: SimKeyServer,
}

impl SimWorld {
    /// World seeded with `seed`.
    pub fn new(seed: u64) -> Self {
        Self { env: SimEnv::with_seed(seed), key_server: SimKeyServer::new() }
    }

    /// Shared environment.
    pub fn env(&self) -> &SimEnv {
        &self.env
    }

    /// Shared key server.
    pub fn key_server(&self) -> &SimKeyServer {
        &self.key_server
    }

    /// Register `uid` (if needed) and publish a device with `key_group_id`.
    pub fn add_device(&self, uid: Uid, key_group_id: KeyGroupId) -> SimDevice {
        if self.key_server.out_peer(uid).is_none() {
            self.key_server.register_user(uid, self.env.random_u64());
        }
        self.key_server.publish(uid, public_key_group(uid, key_group_id));
        self.device(uid, key_group_id)
    }

    /// Local view of a device without publishing it.
    pub fn device(&self, uid: Uid, key_group_id: KeyGroupId) -> SimDevice {
        SimDevice {
            uid,
            key_group_id,
            key_manager: SimKeyManager::new(key_group_id),
            sessions: SessionControl::default(),
            env: self.env.clone(),
            key_server: self.key_server.clone(),
        }
    }
}

impl SimDevice {
    /// Collaborators wired to the world's key server.
    pub fn collaborators(&self) -> Collaborators {
        let local = (self.uid, self.key_group_id);
        let factory = SimSessionFactory::new(self.env.seed(), local, self.sessions.clone());
        Collaborators::new(
            Arc::new(self.key_server.clone()),
            Arc::new(self.key_manager.clone()),
            Arc::new(factory),
        )
    }

    /// Spawn a coordinator for `peer_uid`.
    ///
    /// An unregistered peer gets an access hash of zero, so its key-group
    /// load fails.
    pub fn coordinator(&self, peer_uid: Uid, config: CoordinatorConfig) -> PeerHandle {
        let peer = self.key_server.out_peer(peer_uid).unwrap_or_else(|| OutPeer::new(peer_uid, 0));
        PeerCoordinator::new(self.env.clone(), config, self.uid, peer, self.collaborators()).spawn()
    }

    /// Spawn a coordinator for `peer_uid` with already-known key groups.
    pub fn coordinator_with(
        &self,
        peer_uid: Uid,
        key_groups: Vec<KeyGroup>,
        config: CoordinatorConfig,
    ) -> PeerHandle {
        let peer = self.key_server.out_peer(peer_uid).unwrap_or_else(|| OutPeer::new(peer_uid, 0));
        PeerCoordinator::new(self.env.clone(), config, self.uid, peer, self.collaborators())
            .with_key_groups(key_groups)
            .spawn()
    }

    /// Directory of coordinators for this device.
    pub fn directory(&self, config: CoordinatorConfig) -> PeerDirectory<SimEnv> {
        PeerDirectory::new(
            self.env.clone(),
            config,
            self.uid,
            self.collaborators(),
            Arc::new(self.key_server.clone()),
        )
    }
}

/// Published key material of a simulated device.
pub fn public_key_group(uid: Uid, key_group_id: KeyGroupId) -> KeyGroup {
    let mut public_keys = uid.to_be_bytes().to_vec();
    public_keys.extend_from_slice(&key_group_id.to_be_bytes());
    KeyGroup::new(key_group_id, public_keys)
}
