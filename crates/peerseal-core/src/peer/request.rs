//! Deferred operations held by the coordinator until it is ready.

use std::fmt;

use tokio::sync::oneshot;

use crate::{envelope::EncryptedBox, error::PeerError};

/// One-shot result slot of a request. Consumed on send, so a request
/// completes at most once.
pub(crate) type Reply<T> = oneshot::Sender<Result<T, PeerError>>;

/// Result-bearing request to a peer coordinator.
pub(crate) enum PeerRequest {
    /// Encrypt for every device of the peer.
    Encrypt { plaintext: Vec<u8>, reply: Reply<EncryptedBox> },
    /// Decrypt an envelope sent by the peer.
    Decrypt { envelope: EncryptedBox, reply: Reply<Vec<u8>> },
}

impl PeerRequest {
    /// Complete the request with `error`.
    pub(crate) fn reject(self, error: PeerError) {
        tracing::debug!("rejecting {}: {}", self.kind(), error);
        // The caller may have dropped its receiver
        match self {
            Self::Encrypt { reply, .. } => {
                let _ = reply.send(Err(error));
            },
            Self::Decrypt { reply, .. } => {
                let _ = reply.send(Err(error));
            },
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Encrypt { .. } => "encrypt",
            Self::Decrypt { .. } => "decrypt",
        }
    }
}

impl fmt::Debug for PeerRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encrypt { plaintext, .. } => {
                f.debug_struct("Encrypt").field("plaintext_len", &plaintext.len()).finish()
            },
            Self::Decrypt { envelope, .. } => f
                .debug_struct("Decrypt")
                .field("keys", &envelope.keys().len())
                .field("payload_len", &envelope.payload().len())
                .finish(),
        }
    }
}
