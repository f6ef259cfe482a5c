//! In-memory key server, user store and key manager.

#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use peerseal_core::{
    CollaboratorError, KeyGroup, KeyGroupId, KeyGroupLoader, KeyManager, OutPeer, Uid,
    UserDirectory,
};

use crate::gate::Gate;

/// Key server holding every user's published key groups.
///
/// Serves both the key-group RPC ([`KeyGroupLoader`]) and the local user
/// store ([`UserDirectory`]). Loads check the access hash like the real
/// server does.
#[derive(Clone, Default)]
pub struct SimKeyServer {
    inner: Arc<Mutex<ServerInner>>,
}

#[derive(Default)]
struct ServerInner {
    users: HashMap<Uid, UserRecord>,
    failing: HashSet<Uid>,
    gate: Option<Gate>,
    loads: HashMap<Uid, usize>,
}

struct UserRecord {
    access_hash: u64,
    key_groups: Vec<KeyGroup>,
}

impl SimKeyServer {
    /// Empty key server.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `uid` with `access_hash`. Existing key groups are kept.
    pub fn register_user(&self, uid: Uid, access_hash: u64) {
        self.lock()
            .users
            .entry(uid)
            .and_modify(|user| user.access_hash = access_hash)
            .or_insert(UserRecord { access_hash, key_groups: Vec::new() });
    }

    /// Publish a key group for a registered user.
    ///
    /// Returns `false` if `uid` is unknown.
    pub fn publish(&self, uid: Uid, key_group: KeyGroup) -> bool {
        match self.lock().users.get_mut(&uid) {
            Some(user) => {
                user.key_groups.push(key_group);
                true
            },
            None => false,
        }
    }

    /// Fail every key-group load for `uid`.
    pub fn fail_loads(&self, uid: Uid) {
        self.lock().failing.insert(uid);
    }

    /// Stop failing loads for `uid`.
    pub fn restore_loads(&self, uid: Uid) {
        self.lock().failing.remove(&uid);
    }

    /// Hold every load until the returned gate opens.
    pub fn gate_loads(&self) -> Gate {
        let gate = Gate::new();
        self.lock().gate = Some(gate.clone());
        gate
    }

    /// Number of loads requested for `uid`.
    pub fn load_count(&self, uid: Uid) -> usize {
        self.lock().loads.get(&uid).copied().unwrap_or(0)
    }

    #[allow(clippy::expect_used)]
    fn lock(&self) -> MutexGuard<'_, ServerInner> {
        self.inner.lock().expect("key server mutex poisoned")
    }
}

#[async_trait]
impl KeyGroupLoader for SimKeyServer {
    async fn load_public_key_groups(
        &self,
        peer: OutPeer,
    ) -> Result<Vec<KeyGroup>, CollaboratorError> {
        let gate = {
            let mut inner = self.lock();
            *inner.loads.entry(peer.uid).or_default() += 1;
            inner.gate.clone()
        };
        if let Some(gate) = gate {
            gate.wait().await;
        }

        let inner = self.lock();
        if inner.failing.contains(&peer.uid) {
            return Err(CollaboratorError::Rpc(format!("injected load failure for {}", peer.uid)));
        }
        match inner.users.get(&peer.uid) {
            Some(user) if user.access_hash == peer.access_hash => Ok(user.key_groups.clone()),
            Some(_) => Err(CollaboratorError::Rpc(format!("invalid access hash for {}", peer.uid))),
            None => Err(CollaboratorError::Rpc(format!("user {} not found", peer.uid))),
        }
    }
}

impl UserDirectory for SimKeyServer {
    fn out_peer(&self, uid: Uid) -> Option<OutPeer> {
        self.lock().users.get(&uid).map(|user| OutPeer::new(uid, user.access_hash))
    }
}

/// Key manager for one local device.
#[derive(Clone)]
pub struct SimKeyManager {
    key_group_id: KeyGroupId,
    inner: Arc<Mutex<ManagerInner>>,
}

#[derive(Default)]
struct ManagerInner {
    failing: bool,
    gate: Option<Gate>,
    fetches: usize,
}

impl SimKeyManager {
    /// Key manager reporting `key_group_id` as the own key group.
    pub fn new(key_group_id: KeyGroupId) -> Self {
        Self { key_group_id, inner: Arc::new(Mutex::new(ManagerInner::default())) }
    }

    /// Fail every fetch.
    pub fn fail(&self) {
        self.lock().failing = true;
    }

    /// Hold every fetch until the returned gate opens.
    pub fn gate(&self) -> Gate {
        let gate = Gate::new();
        self.lock().gate = Some(gate.clone());
        gate
    }

    /// Number of fetches requested.
    pub fn fetch_count(&self) -> usize {
        self.lock().fetches
    }

    #[allow(clippy::expect_used)]
    fn lock(&self) -> MutexGuard<'_, ManagerInner> {
        self.inner.lock().expect("key manager mutex poisoned")
    }
}

#[async_trait]
impl KeyManager for SimKeyManager {
    async fn fetch_own_key_group(&self) -> Result<KeyGroupId, CollaboratorError> {
        let gate = {
            let mut inner = self.lock();
            inner.fetches += 1;
            inner.gate.clone()
        };
        if let Some(gate) = gate {
            gate.wait().await;
        }

        if self.lock().failing {
            return Err(CollaboratorError::Unavailable("injected key manager failure".to_string()));
        }
        Ok(self.key_group_id)
    }
}
