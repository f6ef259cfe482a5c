//! Per-peer encryption coordinator.
//!
//! [`state`] holds the Sans-IO lifecycle, [`PeerCoordinator`] runs it on
//! Tokio, and [`PeerHandle`] is what callers hold.

mod coordinator;
mod handle;
mod protocol;
mod request;
pub mod state;

pub use coordinator::PeerCoordinator;
pub use handle::PeerHandle;
pub use state::{Phase, PeerAction, PeerState, PeerStatus};
