//! Deterministic simulation harness for peerseal.
//!
//! In-memory implementations of every collaborator the coordinator consumes,
//! plus a seeded [`peerseal_core::Environment`]. Everything is reproducible
//! from one seed, and every collaborator can be failed or held mid-call to
//! exercise the coordinator's gating and fan-out paths.
//!
//! # Fault injection
//!
//! - [`SimKeyServer`]: fail or gate key-group loads
//! - [`SimKeyManager`]: fail or gate own key-group fetches
//! - [`SessionControl`]: fail or gate wraps per key group, fail unwraps,
//!   count calls and created sessions

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod gate;
pub mod sim_directory;
pub mod sim_env;
pub mod sim_session;
pub mod world;

pub use gate::Gate;
pub use sim_directory::{SimKeyManager, SimKeyServer};
pub use sim_env::SimEnv;
pub use sim_session::{DeviceId, SessionControl, SimSessionEngine, SimSessionFactory};
pub use world::{SimDevice, SimWorld, public_key_group};
