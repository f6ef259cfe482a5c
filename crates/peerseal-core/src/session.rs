//! Session tasks.
//!
//! Each key group gets its own task owning the [`SessionEngine`]. The task
//! processes wrap/unwrap requests one at a time, so engine state never needs
//! a lock, while sessions of different key groups run concurrently.
//!
//! A [`SessionHandle`] is a cheap clone of the task's request queue. When the
//! last handle is dropped the queue closes and the task ends. Replies to
//! callers that stopped waiting are dropped silently.

use std::sync::Arc;

use peerseal_crypto::ContentKey;
use tokio::sync::{mpsc, oneshot};
use zeroize::Zeroizing;

use crate::{
    collaborators::{CollaboratorError, SessionEngine},
    model::{KeyGroupId, Uid},
};

type Reply<T> = oneshot::Sender<Result<T, CollaboratorError>>;

enum SessionRequest {
    Wrap { content_key: Arc<ContentKey>, reply: Reply<Vec<u8>> },
    Unwrap { wrapped_key: Vec<u8>, reply: Reply<Zeroizing<Vec<u8>>> },
}

/// Handle to a live session bound to one `(uid, key_group_id)`.
#[derive(Clone)]
pub(crate) struct SessionHandle {
    uid: Uid,
    key_group_id: KeyGroupId,
    requests: mpsc::Sender<SessionRequest>,
}

impl SessionHandle {
    /// Start the session task for `engine`.
    ///
    /// Must be called from within a Tokio runtime.
    pub(crate) fn spawn(
        uid: Uid,
        key_group_id: KeyGroupId,
        engine: Box<dyn SessionEngine>,
        queue_capacity: usize,
    ) -> Self {
        let (requests, rx) = mpsc::channel(queue_capacity.max(1));
        tokio::spawn(run_session(uid, key_group_id, engine, rx));
        Self { uid, key_group_id, requests }
    }

    /// Wrap `content_key` for this session's device.
    pub(crate) async fn wrap(
        &self,
        content_key: Arc<ContentKey>,
    ) -> Result<Vec<u8>, CollaboratorError> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(SessionRequest::Wrap { content_key, reply })
            .await
            .map_err(|_| self.closed())?;
        rx.await.map_err(|_| self.closed())?
    }

    /// Recover the content key from `wrapped_key`.
    pub(crate) async fn unwrap(
        &self,
        wrapped_key: Vec<u8>,
    ) -> Result<Zeroizing<Vec<u8>>, CollaboratorError> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(SessionRequest::Unwrap { wrapped_key, reply })
            .await
            .map_err(|_| self.closed())?;
        rx.await.map_err(|_| self.closed())?
    }

    fn closed(&self) -> CollaboratorError {
        CollaboratorError::Unavailable(format!(
            "session {}/{} closed",
            self.uid, self.key_group_id
        ))
    }
}

async fn run_session(
    uid: Uid,
    key_group_id: KeyGroupId,
    mut engine: Box<dyn SessionEngine>,
    mut requests: mpsc::Receiver<SessionRequest>,
) {
    tracing::debug!("session {}/{} started", uid, key_group_id);

    while let Some(request) = requests.recv().await {
        match request {
            SessionRequest::Wrap { content_key, reply } => {
                let result = engine.wrap(content_key.as_bytes()).await;
                if let Ok(wrapped) = &result {
                    tracing::trace!(
                        "session {}/{} wrapped key: {}",
                        uid,
                        key_group_id,
                        hex::encode(wrapped.get(..8).unwrap_or(wrapped))
                    );
                }
                // Caller may have failed fast on another branch
                let _ = reply.send(result);
            },
            SessionRequest::Unwrap { wrapped_key, reply } => {
                let result = engine.unwrap(&wrapped_key).await.map(Zeroizing::new);
                let _ = reply.send(result);
            },
        }
    }

    tracing::debug!("session {}/{} stopped", uid, key_group_id);
}
