//! Lifecycle state machine for one peer.
//!
//! Pure logic, no I/O: every input returns the actions the runtime must
//! execute. Generic over the deferred request type `R` and the session handle
//! type `S`, so the gating rules are tested without tasks or channels.
//!
//! ```text
//! Initializing ──► LoadingKeyGroups ──► SpawningSessions ──► LoadingOwnKeyGroup ──► Ready
//!      │                 │                                          │
//!      │                 └──────────────► Failed ◄──────────────────┘
//!      └─ (key groups known at construction) ──► SpawningSessions
//!
//! any state ──shutdown──► Stopped
//! ```
//!
//! # Invariants
//!
//! - `Ready` is entered at most once and never left except for `Stopped`
//! - Sessions are populated once, from the key groups, and never updated
//! - Requests submitted before `Ready` are released in submission order
//! - Completions arriving in a state that did not ask for them are ignored

use std::{
    collections::{BTreeMap, HashSet, VecDeque},
    sync::Arc,
};

use crate::{
    collaborators::CollaboratorError,
    config::InitFailurePolicy,
    error::PeerError,
    model::{KeyGroup, KeyGroupId, Uid},
};

/// Lifecycle phase of a peer coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Created, not yet activated
    Initializing,
    /// Waiting for the peer's public key groups
    LoadingKeyGroups,
    /// Creating one session per key group
    SpawningSessions,
    /// Waiting for this device's own key group id
    LoadingOwnKeyGroup,
    /// Servicing requests
    Ready,
    /// Key material could not be loaded; every request is rejected
    Failed,
    /// Shut down; the coordinator no longer holds sessions. Requests
    /// dispatched before shutdown still complete on the sessions they started
    /// with.
    Stopped,
}

/// Action the runtime must execute on behalf of the state machine.
#[derive(Debug)]
pub enum PeerAction<R> {
    /// Request the peer's public key groups.
    LoadKeyGroups,
    /// Create one session per key group, then report back with
    /// [`PeerState::on_sessions_spawned`].
    SpawnSessions(Vec<KeyGroup>),
    /// Ask the key manager for the own key group id.
    FetchOwnKeyGroup,
    /// Run the request against the current sessions.
    Dispatch(R),
    /// Complete the request with an error.
    Reject(R, PeerError),
}

/// Diagnostic snapshot of a coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerStatus {
    /// Remote user id
    pub peer_uid: Uid,
    /// Current lifecycle phase
    pub phase: Phase,
    /// Number of live sessions
    pub session_count: usize,
    /// Requests waiting for `Ready`
    pub pending_requests: usize,
    /// Own key group, once loaded
    pub own_key_group_id: Option<KeyGroupId>,
    /// Terminal load failure, if any
    pub failure: Option<PeerError>,
}

/// Per-peer encryption state.
pub struct PeerState<R, S> {
    peer_uid: Uid,
    policy: InitFailurePolicy,
    phase: Phase,
    key_groups: Option<Vec<KeyGroup>>,
    sessions: Arc<BTreeMap<KeyGroupId, S>>,
    own_key_group_id: Option<KeyGroupId>,
    failure: Option<PeerError>,
    pending: VecDeque<R>,
}

impl<R, S> PeerState<R, S> {
    /// Create state for `peer_uid`.
    ///
    /// Pass `key_groups` when they are already known to skip the load. They
    /// are deduplicated by id like loaded ones.
    pub fn new(
        peer_uid: Uid,
        policy: InitFailurePolicy,
        key_groups: Option<Vec<KeyGroup>>,
    ) -> Self {
        Self {
            peer_uid,
            policy,
            phase: Phase::Initializing,
            key_groups: key_groups.map(|groups| dedup_key_groups(peer_uid, groups)),
            sessions: Arc::new(BTreeMap::new()),
            own_key_group_id: None,
            failure: None,
            pending: VecDeque::new(),
        }
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Whether requests are dispatched immediately.
    pub fn is_ready(&self) -> bool {
        self.phase == Phase::Ready
    }

    /// Live sessions keyed by key group id.
    pub fn sessions(&self) -> &Arc<BTreeMap<KeyGroupId, S>> {
        &self.sessions
    }

    /// Own key group id, once loaded.
    pub fn own_key_group_id(&self) -> Option<KeyGroupId> {
        self.own_key_group_id
    }

    /// Number of requests waiting for `Ready`.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Snapshot for diagnostics.
    pub fn status(&self) -> PeerStatus {
        PeerStatus {
            peer_uid: self.peer_uid,
            phase: self.phase,
            session_count: self.sessions.len(),
            pending_requests: self.pending.len(),
            own_key_group_id: self.own_key_group_id,
            failure: self.failure.clone(),
        }
    }

    /// Start the lifecycle.
    ///
    /// Only valid from `Initializing`; later calls return no actions.
    pub fn activate(&mut self) -> Vec<PeerAction<R>> {
        if self.phase != Phase::Initializing {
            tracing::debug!("peer {}: activate ignored in {:?}", self.peer_uid, self.phase);
            return Vec::new();
        }

        match self.key_groups.clone() {
            Some(groups) => self.begin_spawning(groups),
            None => {
                tracing::debug!("peer {}: loading public key groups", self.peer_uid);
                self.phase = Phase::LoadingKeyGroups;
                vec![PeerAction::LoadKeyGroups]
            },
        }
    }

    /// Key-group load completed.
    pub fn on_key_groups_loaded(
        &mut self,
        result: Result<Vec<KeyGroup>, CollaboratorError>,
    ) -> Vec<PeerAction<R>> {
        if self.phase != Phase::LoadingKeyGroups {
            tracing::debug!("peer {}: late key group result in {:?}", self.peer_uid, self.phase);
            return Vec::new();
        }

        match result {
            Ok(groups) => {
                let groups = dedup_key_groups(self.peer_uid, groups);
                self.key_groups = Some(groups.clone());
                self.begin_spawning(groups)
            },
            Err(e) => {
                tracing::error!("peer {}: error loading public key groups: {}", self.peer_uid, e);
                self.fail(PeerError::KeyGroupLoadFailed {
                    peer_uid: self.peer_uid,
                    reason: e.to_string(),
                })
            },
        }
    }

    /// Sessions for every key group exist.
    pub fn on_sessions_spawned(&mut self, sessions: BTreeMap<KeyGroupId, S>) -> Vec<PeerAction<R>> {
        if self.phase != Phase::SpawningSessions {
            tracing::debug!("peer {}: sessions spawned in {:?}", self.peer_uid, self.phase);
            return Vec::new();
        }

        tracing::info!("peer {}: {} sessions ready", self.peer_uid, sessions.len());
        self.sessions = Arc::new(sessions);
        self.phase = Phase::LoadingOwnKeyGroup;
        vec![PeerAction::FetchOwnKeyGroup]
    }

    /// Own key-group fetch completed.
    pub fn on_own_key_group_loaded(
        &mut self,
        result: Result<KeyGroupId, CollaboratorError>,
    ) -> Vec<PeerAction<R>> {
        if self.phase != Phase::LoadingOwnKeyGroup {
            tracing::debug!("peer {}: late own key group in {:?}", self.peer_uid, self.phase);
            return Vec::new();
        }

        match result {
            Ok(key_group_id) => {
                tracing::info!(
                    "peer {}: ready with own key group {}, releasing {} queued requests",
                    self.peer_uid,
                    key_group_id,
                    self.pending.len()
                );
                self.own_key_group_id = Some(key_group_id);
                self.phase = Phase::Ready;
                self.pending.drain(..).map(PeerAction::Dispatch).collect()
            },
            Err(e) => {
                tracing::error!("peer {}: error fetching own key group: {}", self.peer_uid, e);
                self.fail(PeerError::OwnKeyGroupLoadFailed { reason: e.to_string() })
            },
        }
    }

    /// Submit a result-bearing request.
    ///
    /// Dispatched when `Ready`, rejected in a terminal state, queued
    /// otherwise.
    pub fn submit(&mut self, request: R) -> Vec<PeerAction<R>> {
        match self.phase {
            Phase::Ready => vec![PeerAction::Dispatch(request)],
            Phase::Failed => {
                let error = self
                    .failure
                    .clone()
                    .unwrap_or(PeerError::Stopped { peer_uid: self.peer_uid });
                vec![PeerAction::Reject(request, error)]
            },
            Phase::Stopped => {
                vec![PeerAction::Reject(request, PeerError::Stopped { peer_uid: self.peer_uid })]
            },
            Phase::Initializing
            | Phase::LoadingKeyGroups
            | Phase::SpawningSessions
            | Phase::LoadingOwnKeyGroup => {
                self.pending.push_back(request);
                Vec::new()
            },
        }
    }

    /// Tear down: release sessions and reject everything still queued.
    ///
    /// Idempotent.
    pub fn shutdown(&mut self) -> Vec<PeerAction<R>> {
        if self.phase == Phase::Stopped {
            return Vec::new();
        }

        tracing::info!("peer {}: shutting down from {:?}", self.peer_uid, self.phase);
        self.phase = Phase::Stopped;
        self.sessions = Arc::new(BTreeMap::new());

        let peer_uid = self.peer_uid;
        self.pending
            .drain(..)
            .map(|request| PeerAction::Reject(request, PeerError::Stopped { peer_uid }))
            .collect()
    }

    fn begin_spawning(&mut self, groups: Vec<KeyGroup>) -> Vec<PeerAction<R>> {
        tracing::info!("peer {}: key groups ready #{}", self.peer_uid, groups.len());
        self.phase = Phase::SpawningSessions;
        vec![PeerAction::SpawnSessions(groups)]
    }

    fn fail(&mut self, error: PeerError) -> Vec<PeerAction<R>> {
        match self.policy {
            InitFailurePolicy::Surface => {
                self.phase = Phase::Failed;
                self.sessions = Arc::new(BTreeMap::new());
                self.failure = Some(error.clone());
                self.pending
                    .drain(..)
                    .map(|request| PeerAction::Reject(request, error.clone()))
                    .collect()
            },
            InitFailurePolicy::Stall => {
                tracing::warn!(
                    "peer {}: stalling after load failure ({}); {} queued requests will not complete",
                    self.peer_uid,
                    error,
                    self.pending.len()
                );
                Vec::new()
            },
        }
    }
}

/// Keep the first key group for each id.
fn dedup_key_groups(peer_uid: Uid, groups: Vec<KeyGroup>) -> Vec<KeyGroup> {
    let mut seen = HashSet::with_capacity(groups.len());
    groups
        .into_iter()
        .filter(|group| {
            let fresh = seen.insert(group.key_group_id);
            if !fresh {
                tracing::warn!(
                    "peer {}: duplicate key group {} ignored",
                    peer_uid,
                    group.key_group_id
                );
            }
            fresh
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestState = PeerState<u32, &'static str>;

    fn groups(ids: &[KeyGroupId]) -> Vec<KeyGroup> {
        ids.iter().map(|&id| KeyGroup::new(id, vec![id as u8; 8])).collect()
    }

    fn sessions_for(ids: &[KeyGroupId]) -> BTreeMap<KeyGroupId, &'static str> {
        ids.iter().map(|&id| (id, "session")).collect()
    }

    fn dispatched(actions: &[PeerAction<u32>]) -> Vec<u32> {
        actions
            .iter()
            .filter_map(|a| match a {
                PeerAction::Dispatch(r) => Some(*r),
                _ => None,
            })
            .collect()
    }

    fn rejected(actions: &[PeerAction<u32>]) -> Vec<(u32, PeerError)> {
        actions
            .iter()
            .filter_map(|a| match a {
                PeerAction::Reject(r, e) => Some((*r, e.clone())),
                _ => None,
            })
            .collect()
    }

    /// Drive a state to `Ready` with key groups `{7, 9}` and own group 9.
    fn ready_state() -> TestState {
        let mut state = TestState::new(2, InitFailurePolicy::Surface, None);
        state.activate();
        state.on_key_groups_loaded(Ok(groups(&[7, 9])));
        state.on_sessions_spawned(sessions_for(&[7, 9]));
        state.on_own_key_group_loaded(Ok(9));
        state
    }

    #[test]
    fn activation_loads_key_groups_when_unknown() {
        let mut state = TestState::new(2, InitFailurePolicy::Surface, None);

        let actions = state.activate();

        assert!(matches!(actions.as_slice(), [PeerAction::LoadKeyGroups]));
        assert_eq!(state.phase(), Phase::LoadingKeyGroups);
    }

    #[test]
    fn activation_skips_load_when_key_groups_known() {
        let mut state = TestState::new(2, InitFailurePolicy::Surface, Some(groups(&[1, 2])));

        let actions = state.activate();

        assert!(matches!(actions.as_slice(), [PeerAction::SpawnSessions(g)] if g.len() == 2));
        assert_eq!(state.phase(), Phase::SpawningSessions);
    }

    #[test]
    fn second_activation_is_ignored() {
        let mut state = TestState::new(2, InitFailurePolicy::Surface, None);
        state.activate();

        assert!(state.activate().is_empty());
        assert_eq!(state.phase(), Phase::LoadingKeyGroups);
    }

    #[test]
    fn full_lifecycle_reaches_ready() {
        let mut state = TestState::new(2, InitFailurePolicy::Surface, None);
        state.activate();

        let actions = state.on_key_groups_loaded(Ok(groups(&[7, 9])));
        assert!(matches!(actions.as_slice(), [PeerAction::SpawnSessions(g)] if g.len() == 2));

        let actions = state.on_sessions_spawned(sessions_for(&[7, 9]));
        assert!(matches!(actions.as_slice(), [PeerAction::FetchOwnKeyGroup]));
        assert_eq!(state.phase(), Phase::LoadingOwnKeyGroup);

        let actions = state.on_own_key_group_loaded(Ok(9));
        assert!(actions.is_empty());
        assert!(state.is_ready());
        assert_eq!(state.own_key_group_id(), Some(9));
        assert_eq!(state.sessions().len(), 2);
    }

    #[test]
    fn requests_before_ready_are_queued_in_order() {
        let mut state = TestState::new(2, InitFailurePolicy::Surface, None);
        state.activate();

        assert!(state.submit(1).is_empty());
        state.on_key_groups_loaded(Ok(groups(&[7])));
        assert!(state.submit(2).is_empty());
        state.on_sessions_spawned(sessions_for(&[7]));
        assert!(state.submit(3).is_empty());
        assert_eq!(state.pending_len(), 3);

        let actions = state.on_own_key_group_loaded(Ok(7));

        assert_eq!(dispatched(&actions), vec![1, 2, 3]);
        assert_eq!(state.pending_len(), 0);
    }

    #[test]
    fn requests_after_ready_dispatch_immediately() {
        let mut state = ready_state();

        assert_eq!(dispatched(&state.submit(42)), vec![42]);
        assert_eq!(state.pending_len(), 0);
    }

    #[test]
    fn key_group_failure_surfaces_to_queued_and_future_requests() {
        let mut state = TestState::new(2, InitFailurePolicy::Surface, None);
        state.activate();
        state.submit(1);
        state.submit(2);

        let actions = state.on_key_groups_loaded(Err(CollaboratorError::Rpc("boom".to_string())));

        let expected =
            PeerError::KeyGroupLoadFailed { peer_uid: 2, reason: "rpc failed: boom".to_string() };
        assert_eq!(rejected(&actions), vec![(1, expected.clone()), (2, expected.clone())]);
        assert_eq!(state.phase(), Phase::Failed);
        assert_eq!(rejected(&state.submit(3)), vec![(3, expected.clone())]);
        assert_eq!(state.status().failure, Some(expected));
    }

    #[test]
    fn own_key_group_failure_surfaces_and_releases_sessions() {
        let mut state = TestState::new(2, InitFailurePolicy::Surface, None);
        state.activate();
        state.on_key_groups_loaded(Ok(groups(&[7])));
        state.on_sessions_spawned(sessions_for(&[7]));
        state.submit(1);

        let actions =
            state.on_own_key_group_loaded(Err(CollaboratorError::Unavailable("km".to_string())));

        assert!(matches!(
            rejected(&actions).as_slice(),
            [(1, PeerError::OwnKeyGroupLoadFailed { .. })]
        ));
        assert_eq!(state.phase(), Phase::Failed);
        assert!(state.sessions().is_empty());
    }

    #[test]
    fn stall_policy_keeps_requests_queued() {
        let mut state = TestState::new(2, InitFailurePolicy::Stall, None);
        state.activate();
        state.submit(1);

        let actions = state.on_key_groups_loaded(Err(CollaboratorError::Rpc("boom".to_string())));

        assert!(actions.is_empty());
        assert_eq!(state.phase(), Phase::LoadingKeyGroups);
        assert!(state.submit(2).is_empty());
        assert_eq!(state.pending_len(), 2);
    }

    #[test]
    fn shutdown_rejects_pending_and_releases_sessions() {
        let mut state = TestState::new(2, InitFailurePolicy::Surface, None);
        state.activate();
        state.on_key_groups_loaded(Ok(groups(&[7])));
        state.on_sessions_spawned(sessions_for(&[7]));
        state.submit(1);

        let actions = state.shutdown();

        assert_eq!(rejected(&actions), vec![(1, PeerError::Stopped { peer_uid: 2 })]);
        assert_eq!(state.phase(), Phase::Stopped);
        assert!(state.sessions().is_empty());
        assert!(state.shutdown().is_empty());
    }

    #[test]
    fn completions_after_shutdown_are_ignored() {
        let mut state = TestState::new(2, InitFailurePolicy::Surface, None);
        state.activate();
        state.shutdown();

        assert!(state.on_key_groups_loaded(Ok(groups(&[7]))).is_empty());
        assert!(state.on_sessions_spawned(sessions_for(&[7])).is_empty());
        assert!(state.on_own_key_group_loaded(Ok(7)).is_empty());
        assert_eq!(state.phase(), Phase::Stopped);
        assert_eq!(rejected(&state.submit(5)), vec![(5, PeerError::Stopped { peer_uid: 2 })]);
    }

    #[test]
    fn ready_is_never_reentered() {
        let mut state = ready_state();

        assert!(state.on_own_key_group_loaded(Ok(1)).is_empty());
        assert!(state.on_key_groups_loaded(Ok(groups(&[1]))).is_empty());
        assert_eq!(state.own_key_group_id(), Some(9));
        assert_eq!(state.sessions().len(), 2);
    }

    #[test]
    fn duplicate_key_groups_are_collapsed() {
        let mut state = TestState::new(2, InitFailurePolicy::Surface, None);
        state.activate();

        let actions = state.on_key_groups_loaded(Ok(groups(&[7, 9, 7])));

        let ids = |g: &[KeyGroup]| g.iter().map(|k| k.key_group_id).collect::<Vec<_>>();
        assert!(matches!(actions.as_slice(), [PeerAction::SpawnSessions(g)] if ids(g) == [7, 9]));
    }

    #[test]
    fn supplied_duplicate_key_groups_keep_the_first() {
        let supplied =
            vec![KeyGroup::new(7, vec![1]), KeyGroup::new(9, vec![9]), KeyGroup::new(7, vec![2])];
        let mut state = TestState::new(2, InitFailurePolicy::Surface, Some(supplied));

        let actions = state.activate();

        let expected = vec![KeyGroup::new(7, vec![1]), KeyGroup::new(9, vec![9])];
        assert!(matches!(actions.as_slice(), [PeerAction::SpawnSessions(g)] if *g == expected));
    }

    #[test]
    fn status_reports_progress() {
        let mut state = TestState::new(2, InitFailurePolicy::Surface, None);
        state.activate();
        state.submit(1);

        let status = state.status();
        assert_eq!(status.peer_uid, 2);
        assert_eq!(status.phase, Phase::LoadingKeyGroups);
        assert_eq!(status.pending_requests, 1);
        assert_eq!(status.session_count, 0);
        assert_eq!(status.own_key_group_id, None);
    }
}
