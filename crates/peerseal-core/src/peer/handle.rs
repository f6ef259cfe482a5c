//! Caller-facing handle to a running coordinator.

use tokio::sync::{mpsc, oneshot};

use super::{coordinator::Command, request::PeerRequest, state::PeerStatus};
use crate::{envelope::EncryptedBox, error::PeerError, model::Uid};

/// Cloneable handle to one peer coordinator.
///
/// Every operation completes exactly once. If the coordinator has stopped,
/// or stops before answering, the operation fails with
/// [`PeerError::Stopped`]. The coordinator shuts down when the last handle is
/// dropped.
#[derive(Clone)]
pub struct PeerHandle {
    peer_uid: Uid,
    mailbox: mpsc::Sender<Command>,
}

impl PeerHandle {
    pub(crate) fn new(peer_uid: Uid, mailbox: mpsc::Sender<Command>) -> Self {
        Self { peer_uid, mailbox }
    }

    /// Remote user this handle encrypts for.
    pub fn peer_uid(&self) -> Uid {
        self.peer_uid
    }

    /// Encrypt `plaintext` for every known device of the peer.
    ///
    /// Waits until the coordinator is ready.
    pub async fn encrypt(&self, plaintext: impl Into<Vec<u8>>) -> Result<EncryptedBox, PeerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Request(PeerRequest::Encrypt { plaintext: plaintext.into(), reply }))
            .await?;
        rx.await.map_err(|_| self.stopped())?
    }

    /// Decrypt an envelope the peer sent to this device.
    ///
    /// Waits until the coordinator is ready.
    pub async fn decrypt(&self, envelope: EncryptedBox) -> Result<Vec<u8>, PeerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Request(PeerRequest::Decrypt { envelope, reply })).await?;
        rx.await.map_err(|_| self.stopped())?
    }

    /// Diagnostic snapshot. Answered in every phase, never queued.
    pub async fn status(&self) -> Result<PeerStatus, PeerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Status(reply)).await?;
        rx.await.map_err(|_| self.stopped())
    }

    /// Stop the coordinator and release its sessions.
    ///
    /// Queued requests fail with [`PeerError::Stopped`]. Requests already
    /// dispatched to the sessions complete with their real result. Shutting
    /// down a stopped coordinator is a no-op.
    pub async fn shutdown(&self) {
        if self.mailbox.send(Command::Shutdown).await.is_err() {
            tracing::debug!("peer {}: already stopped", self.peer_uid);
        }
    }

    /// Whether the coordinator has stopped accepting commands.
    pub fn is_closed(&self) -> bool {
        self.mailbox.is_closed()
    }

    async fn send(&self, command: Command) -> Result<(), PeerError> {
        self.mailbox.send(command).await.map_err(|_| self.stopped())
    }

    fn stopped(&self) -> PeerError {
        PeerError::Stopped { peer_uid: self.peer_uid }
    }
}

impl std::fmt::Debug for PeerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerHandle")
            .field("peer_uid", &self.peer_uid)
            .field("closed", &self.mailbox.is_closed())
            .finish()
    }
}
