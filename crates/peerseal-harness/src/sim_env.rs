//! Seeded environment for reproducible content keys and nonces.

#![allow(clippy::disallowed_types, reason = "Locking simple RNG state")]

use std::sync::{Arc, Mutex};

use peerseal_core::Environment;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Deterministic [`Environment`] backed by ChaCha20.
///
/// Clones share one RNG stream, so a coordinator and the test driving it
/// draw from the same sequence. Two environments with the same seed produce
/// identical bytes when queried in the same order.
#[derive(Clone)]
pub struct SimEnv {
    seed: u64,
    rng: Arc<Mutex<ChaCha20Rng>>,
}

impl SimEnv {
    /// Environment seeded with `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self { seed, rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))) }
    }

    /// Seed this environment was created with.
    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl Environment for SimEnv {
    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        let mut rng = self.rng.lock().expect("SimEnv RNG mutex poisoned");
        rng.fill_bytes(buffer);
    }
}

impl std::fmt::Debug for SimEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimEnv").field("seed", &self.seed).finish_non_exhaustive()
    }
}
