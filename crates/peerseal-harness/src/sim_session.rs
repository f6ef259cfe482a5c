//! Simulated session engines.
//!
//! Every pair of devices shares a symmetric wrapping key derived from the
//! world seed and the two device ids, so a content key wrapped by Alice's
//! session for Bob's device unwraps in Bob's session for Alice's device.
//! Wrapping reuses the content box from `peerseal-crypto` under that pair
//! key.
//!
//! [`SessionControl`] is shared between a factory and every engine it
//! creates. Tests use it to count calls, fail a key group, or hold a key
//! group's wraps behind a [`Gate`].

#![allow(clippy::disallowed_types, reason = "Synchronous bookkeeping only")]

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use peerseal_core::{CollaboratorError, KeyGroup, KeyGroupId, SessionEngine, SessionFactory, Uid};
use peerseal_crypto::{BoxNonce, ContentKey, content_box};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::gate::Gate;

/// Associated data of every simulated wrap
const WRAP_HEADER: &[u8] = b"sim-wrap";

/// Seed domain for the shared pair key
const DOMAIN_PAIR_KEY: u8 = 0x01;

/// Seed domain for a session's nonce stream
const DOMAIN_NONCE: u8 = 0x02;

/// A device: user id plus key group id.
pub type DeviceId = (Uid, KeyGroupId);

/// Shared fault plan and call counters, keyed by remote key group.
#[derive(Clone, Default)]
pub struct SessionControl {
    inner: Arc<Mutex<ControlInner>>,
}

#[derive(Default)]
struct ControlInner {
    fail_wrap: HashSet<KeyGroupId>,
    fail_unwrap: HashSet<KeyGroupId>,
    gates: HashMap<KeyGroupId, Gate>,
    wraps: HashMap<KeyGroupId, usize>,
    unwraps: HashMap<KeyGroupId, usize>,
    created: HashMap<DeviceId, usize>,
}

impl SessionControl {
    /// Make every wrap for `key_group_id` fail.
    pub fn fail_wrap(&self, key_group_id: KeyGroupId) {
        self.lock().fail_wrap.insert(key_group_id);
    }

    /// Make every unwrap in the session for `key_group_id` fail.
    pub fn fail_unwrap(&self, key_group_id: KeyGroupId) {
        self.lock().fail_unwrap.insert(key_group_id);
    }

    /// Hold wraps for `key_group_id` until the returned gate opens.
    pub fn gate_wrap(&self, key_group_id: KeyGroupId) -> Gate {
        let gate = Gate::new();
        self.lock().gates.insert(key_group_id, gate.clone());
        gate
    }

    /// Remove every fault for `key_group_id`. Counters are kept.
    pub fn clear(&self, key_group_id: KeyGroupId) {
        let mut inner = self.lock();
        inner.fail_wrap.remove(&key_group_id);
        inner.fail_unwrap.remove(&key_group_id);
        if let Some(gate) = inner.gates.remove(&key_group_id) {
            gate.open();
        }
    }

    /// Wraps issued for `key_group_id`, including held and failed ones.
    pub fn wrap_count(&self, key_group_id: KeyGroupId) -> usize {
        self.lock().wraps.get(&key_group_id).copied().unwrap_or(0)
    }

    /// Unwraps issued in the session for `key_group_id`.
    pub fn unwrap_count(&self, key_group_id: KeyGroupId) -> usize {
        self.lock().unwraps.get(&key_group_id).copied().unwrap_or(0)
    }

    /// Sessions created for the remote device.
    pub fn sessions_created(&self, device: DeviceId) -> usize {
        self.lock().created.get(&device).copied().unwrap_or(0)
    }

    fn record_created(&self, device: DeviceId) {
        *self.lock().created.entry(device).or_default() += 1;
    }

    /// Count a wrap and return the gate to wait on, if any.
    fn begin_wrap(&self, key_group_id: KeyGroupId) -> Option<Gate> {
        let mut inner = self.lock();
        *inner.wraps.entry(key_group_id).or_default() += 1;
        inner.gates.get(&key_group_id).cloned()
    }

    fn wrap_fails(&self, key_group_id: KeyGroupId) -> bool {
        self.lock().fail_wrap.contains(&key_group_id)
    }

    fn begin_unwrap(&self, key_group_id: KeyGroupId) -> bool {
        let mut inner = self.lock();
        *inner.unwraps.entry(key_group_id).or_default() += 1;
        inner.fail_unwrap.contains(&key_group_id)
    }

    #[allow(clippy::expect_used)]
    fn lock(&self) -> MutexGuard<'_, ControlInner> {
        self.inner.lock().expect("session control mutex poisoned")
    }
}

/// Builds [`SimSessionEngine`]s for one local device.
pub struct SimSessionFactory {
    root_seed: u64,
    local: DeviceId,
    control: SessionControl,
}

impl SimSessionFactory {
    /// Factory for the local device `local`, keyed by `root_seed`.
    pub fn new(root_seed: u64, local: DeviceId, control: SessionControl) -> Self {
        Self { root_seed, local, control }
    }

    /// Fault plan and counters shared with every engine.
    pub fn control(&self) -> &SessionControl {
        &self.control
    }
}

impl SessionFactory for SimSessionFactory {
    fn create_session(&self, peer_uid: Uid, key_group: &KeyGroup) -> Box<dyn SessionEngine> {
        let remote = (peer_uid, key_group.key_group_id);
        self.control.record_created(remote);
        tracing::debug!("sim session {:?} -> {:?}", self.local, remote);
        Box::new(SimSessionEngine::new(self.root_seed, self.local, remote, self.control.clone()))
    }
}

/// Session between a local and a remote device.
pub struct SimSessionEngine {
    remote: DeviceId,
    pair_key: ContentKey,
    nonces: ChaCha20Rng,
    control: SessionControl,
}

impl SimSessionEngine {
    /// Engine for `local` talking to `remote`.
    pub fn new(root_seed: u64, local: DeviceId, remote: DeviceId, control: SessionControl) -> Self {
        let (low, high) = if local <= remote { (local, remote) } else { (remote, local) };
        let mut key_stream =
            ChaCha20Rng::from_seed(pair_seed(root_seed, low, high, DOMAIN_PAIR_KEY));
        let pair_key = ContentKey::generate(|buf| key_stream.fill_bytes(buf));
        let nonces = ChaCha20Rng::from_seed(pair_seed(root_seed, local, remote, DOMAIN_NONCE));

        Self { remote, pair_key, nonces, control }
    }
}

#[async_trait]
impl SessionEngine for SimSessionEngine {
    async fn wrap(&mut self, content_key: &[u8]) -> Result<Vec<u8>, CollaboratorError> {
        let key_group_id = self.remote.1;
        if let Some(gate) = self.control.begin_wrap(key_group_id) {
            gate.wait().await;
        }
        if self.control.wrap_fails(key_group_id) {
            return Err(CollaboratorError::Session(format!(
                "injected wrap failure for {key_group_id}"
            )));
        }

        let nonce = BoxNonce::generate(|buf| self.nonces.fill_bytes(buf));
        content_box::seal(WRAP_HEADER, content_key, &nonce, &self.pair_key)
            .map_err(|e| CollaboratorError::Session(e.to_string()))
    }

    async fn unwrap(&mut self, wrapped_key: &[u8]) -> Result<Vec<u8>, CollaboratorError> {
        let key_group_id = self.remote.1;
        if self.control.begin_unwrap(key_group_id) {
            return Err(CollaboratorError::Session(format!(
                "injected unwrap failure for {key_group_id}"
            )));
        }

        content_box::open(WRAP_HEADER, wrapped_key, &self.pair_key)
            .map_err(|e| CollaboratorError::Session(e.to_string()))
    }
}

/// 32-byte ChaCha seed: root seed, both devices, domain byte.
fn pair_seed(root_seed: u64, first: DeviceId, second: DeviceId, domain: u8) -> [u8; 32] {
    let mut seed = [0u8; 32];
    seed[..8].copy_from_slice(&root_seed.to_be_bytes());
    seed[8..12].copy_from_slice(&first.0.to_be_bytes());
    seed[12..16].copy_from_slice(&first.1.to_be_bytes());
    seed[16..20].copy_from_slice(&second.0.to_be_bytes());
    seed[20..24].copy_from_slice(&second.1.to_be_bytes());
    seed[24] = domain;
    seed
}
