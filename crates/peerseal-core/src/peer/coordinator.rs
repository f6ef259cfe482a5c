//! Tokio runtime for one peer's [`PeerState`].
//!
//! The coordinator owns the state machine and a single mailbox. Commands are
//! processed one at a time; anything slow (loads, wraps, unwraps) runs in
//! spawned tasks that post their completion back into the mailbox or reply
//! to the caller directly, so the loop never waits on a collaborator.
//!
//! Completion tasks hold only a weak sender to the mailbox. Once every
//! [`PeerHandle`] is gone the loop shuts down, and completions that arrive
//! after that go nowhere.
//!
//! A dispatched request owns an `Arc` snapshot of the session map. Shutdown
//! drops the coordinator's reference and rejects everything not yet
//! dispatched; requests already running finish and reply normally, and each
//! session task exits when its last in-flight request releases the snapshot.

use std::{
    collections::{BTreeMap, VecDeque},
    sync::Arc,
};

use tokio::sync::{mpsc, oneshot};

use super::{
    handle::PeerHandle,
    protocol,
    request::PeerRequest,
    state::{Phase, PeerAction, PeerState, PeerStatus},
};
use crate::{
    collaborators::{CollaboratorError, Collaborators},
    config::CoordinatorConfig,
    env::Environment,
    error::PeerError,
    model::{KeyGroup, KeyGroupId, OutPeer, Uid},
    session::SessionHandle,
};

/// Mailbox message of a coordinator.
///
/// Only `Request` is gated on readiness. Load completions, status queries
/// and shutdown are handled immediately in every phase.
pub(crate) enum Command {
    Request(PeerRequest),
    KeyGroupsLoaded(Result<Vec<KeyGroup>, CollaboratorError>),
    OwnKeyGroupLoaded(Result<KeyGroupId, CollaboratorError>),
    Status(oneshot::Sender<PeerStatus>),
    Shutdown,
}

/// Encryption coordinator for one remote user.
///
/// Build with [`PeerCoordinator::new`], then [`spawn`](Self::spawn) it to
/// get a [`PeerHandle`].
pub struct PeerCoordinator<E: Environment> {
    env: E,
    config: CoordinatorConfig,
    own_uid: Uid,
    peer: OutPeer,
    collaborators: Collaborators,
    key_groups: Option<Vec<KeyGroup>>,
}

impl<E: Environment> PeerCoordinator<E> {
    /// Coordinator for `peer`, acting as local user `own_uid`.
    pub fn new(
        env: E,
        config: CoordinatorConfig,
        own_uid: Uid,
        peer: OutPeer,
        collaborators: Collaborators,
    ) -> Self {
        Self { env, config, own_uid, peer, collaborators, key_groups: None }
    }

    /// Use already-known key groups instead of loading them.
    #[must_use]
    pub fn with_key_groups(mut self, key_groups: Vec<KeyGroup>) -> Self {
        self.key_groups = Some(key_groups);
        self
    }

    /// Start the coordinator task and activate it.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(self) -> PeerHandle {
        let (tx, rx) = mpsc::channel(self.config.mailbox_capacity.max(1));
        let handle = PeerHandle::new(self.peer.uid, tx.clone());
        let loopback = tx.downgrade();
        drop(tx);

        let runtime = Runtime {
            state: PeerState::new(self.peer.uid, self.config.init_failure, self.key_groups),
            env: self.env,
            config: self.config,
            own_uid: self.own_uid,
            peer: self.peer,
            collaborators: self.collaborators,
            loopback,
        };
        tokio::spawn(runtime.run(rx));

        handle
    }
}

struct Runtime<E: Environment> {
    state: PeerState<PeerRequest, SessionHandle>,
    env: E,
    config: CoordinatorConfig,
    own_uid: Uid,
    peer: OutPeer,
    collaborators: Collaborators,
    loopback: mpsc::WeakSender<Command>,
}

impl<E: Environment> Runtime<E> {
    async fn run(mut self, mut mailbox: mpsc::Receiver<Command>) {
        tracing::info!("peer {}: coordinator starting", self.peer.uid);

        let actions = self.state.activate();
        self.execute(actions);

        while let Some(command) = mailbox.recv().await {
            let actions = match command {
                Command::Request(request) => self.state.submit(request),
                Command::KeyGroupsLoaded(result) => self.state.on_key_groups_loaded(result),
                Command::OwnKeyGroupLoaded(result) => self.state.on_own_key_group_loaded(result),
                Command::Status(reply) => {
                    let _ = reply.send(self.state.status());
                    Vec::new()
                },
                Command::Shutdown => self.state.shutdown(),
            };
            self.execute(actions);

            if self.state.phase() == Phase::Stopped {
                break;
            }
        }

        let actions = self.state.shutdown();
        self.execute(actions);

        // Requests that raced with shutdown
        mailbox.close();
        while let Some(command) = mailbox.recv().await {
            if let Command::Request(request) = command {
                request.reject(PeerError::Stopped { peer_uid: self.peer.uid });
            }
        }

        tracing::info!("peer {}: coordinator stopped", self.peer.uid);
    }

    fn execute(&mut self, actions: Vec<PeerAction<PeerRequest>>) {
        let mut queue = VecDeque::from(actions);

        while let Some(action) = queue.pop_front() {
            match action {
                PeerAction::LoadKeyGroups => self.load_key_groups(),
                PeerAction::SpawnSessions(groups) => {
                    let sessions = self.spawn_sessions(&groups);
                    queue.extend(self.state.on_sessions_spawned(sessions));
                },
                PeerAction::FetchOwnKeyGroup => self.fetch_own_key_group(),
                PeerAction::Dispatch(request) => self.dispatch(request),
                PeerAction::Reject(request, error) => request.reject(error),
            }
        }
    }

    fn load_key_groups(&self) {
        let loader = Arc::clone(&self.collaborators.loader);
        let loopback = self.loopback.clone();
        let peer = self.peer;

        tokio::spawn(async move {
            let result = loader.load_public_key_groups(peer).await;
            if let Some(mailbox) = loopback.upgrade() {
                let _ = mailbox.send(Command::KeyGroupsLoaded(result)).await;
            }
        });
    }

    fn fetch_own_key_group(&self) {
        let key_manager = Arc::clone(&self.collaborators.key_manager);
        let loopback = self.loopback.clone();

        tokio::spawn(async move {
            let result = key_manager.fetch_own_key_group().await;
            if let Some(mailbox) = loopback.upgrade() {
                let _ = mailbox.send(Command::OwnKeyGroupLoaded(result)).await;
            }
        });
    }

    fn spawn_sessions(&self, groups: &[KeyGroup]) -> BTreeMap<KeyGroupId, SessionHandle> {
        groups
            .iter()
            .map(|group| {
                let engine = self.collaborators.sessions.create_session(self.peer.uid, group);
                let handle = SessionHandle::spawn(
                    self.peer.uid,
                    group.key_group_id,
                    engine,
                    self.config.session_queue_capacity,
                );
                (group.key_group_id, handle)
            })
            .collect()
    }

    fn dispatch(&self, request: PeerRequest) {
        let Some(own_key_group_id) = self.state.own_key_group_id() else {
            request.reject(PeerError::OwnKeyGroupLoadFailed {
                reason: "own key group not loaded".to_string(),
            });
            return;
        };
        let sessions = Arc::clone(self.state.sessions());
        let peer_uid = self.peer.uid;

        match request {
            PeerRequest::Encrypt { plaintext, reply } => {
                let env = self.env.clone();
                tokio::spawn(async move {
                    let result =
                        protocol::encrypt(&env, peer_uid, own_key_group_id, &sessions, &plaintext)
                            .await;
                    let _ = reply.send(result);
                });
            },
            PeerRequest::Decrypt { envelope, reply } => {
                let own_uid = self.own_uid;
                tokio::spawn(async move {
                    let result =
                        protocol::decrypt(own_uid, own_key_group_id, &sessions, &envelope).await;
                    let _ = reply.send(result);
                });
            },
        }
    }
}
