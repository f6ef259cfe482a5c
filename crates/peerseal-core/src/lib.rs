//! Peerseal Core
//!
//! End-to-end encryption coordinator for one local user talking to many
//! remote users, each of whom owns several devices (key groups).
//!
//! # Architecture
//!
//! ```text
//! PeerDirectory ──► PeerHandle ──mailbox──► coordinator task (PeerState)
//!                                               │
//!                                               ├──► session task (key group 7)
//!                                               └──► session task (key group 9)
//! ```
//!
//! A coordinator loads the peer's public key groups, creates one session per
//! key group, then resolves the local device's own key group. Requests that
//! arrive before that are queued and released in order. Encryption wraps a
//! fresh content key through every session concurrently and seals the
//! payload once; decryption unwraps the key addressed to this device through
//! the sender's session and opens the payload.
//!
//! # Components
//!
//! - [`PeerState`]: Sans-IO lifecycle and request gating
//! - [`PeerCoordinator`] / [`PeerHandle`]: Tokio runtime and caller API
//! - [`PeerDirectory`]: one coordinator per remote uid
//! - [`EncryptedBox`]: multi-recipient envelope and CBOR codec
//! - [`collaborators`]: key server, key manager and session seams
//! - [`Environment`]: injected randomness

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod collaborators;
pub mod config;
pub mod directory;
pub mod env;
pub mod envelope;
pub mod error;
pub mod model;
pub mod peer;
mod session;
pub mod system_env;

pub use collaborators::{
    CollaboratorError, Collaborators, KeyGroupLoader, KeyManager, SessionEngine, SessionFactory,
    UserDirectory,
};
pub use config::{CoordinatorConfig, InitFailurePolicy};
pub use directory::PeerDirectory;
pub use env::Environment;
pub use envelope::{CodecError, EncryptedBox, EncryptedBoxKey, HEADER_SIZE};
pub use error::PeerError;
pub use model::{KeyGroup, KeyGroupId, OutPeer, Uid};
pub use peer::{PeerAction, PeerCoordinator, PeerHandle, PeerState, PeerStatus, Phase};
pub use system_env::SystemEnv;
