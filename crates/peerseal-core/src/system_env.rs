//! Production Environment implementation using the OS RNG.
//!
//! `SystemEnv` is the production implementation of the Environment trait.
//! Output is truly random and not reproducible.

use crate::env::Environment;

/// Production environment using cryptographic OS randomness.
///
/// # Security
///
/// The RNG uses getrandom which provides OS-level cryptographic randomness
/// (e.g., /dev/urandom on Linux, `BCryptGenRandom` on Windows). Suitable for
/// content keys and box nonces.
///
/// # Panics
///
/// Panics if the OS RNG fails. A client without functioning cryptographic
/// randomness cannot produce content keys, and continuing would hand out
/// predictable keys.
#[derive(Clone, Debug, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer)
            .expect("invariant: OS RNG failure is unrecoverable - keys would be predictable");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_env_random_bytes_are_random() {
        let env = SystemEnv::new();

        let mut bytes1 = [0u8; 32];
        let mut bytes2 = [0u8; 32];

        env.random_bytes(&mut bytes1);
        env.random_bytes(&mut bytes2);

        assert_ne!(bytes1, bytes2, "Random bytes should differ");
    }

    #[test]
    fn system_env_random_bytes_fills_buffer() {
        let env = SystemEnv::new();

        let mut bytes = [0u8; 128];
        env.random_bytes(&mut bytes);

        let non_zero_count = bytes.iter().filter(|&&b| b != 0).count();
        assert!(non_zero_count > 64, "Most bytes should be non-zero");
    }

    #[test]
    fn random_u64_uses_random_bytes() {
        let env = SystemEnv::new();
        assert_ne!(env.random_u64(), env.random_u64());
    }
}
