//! Environment abstraction for deterministic testing.
//!
//! Decouples protocol logic from the process-wide RNG. Production uses OS
//! randomness ([`crate::SystemEnv`]); tests inject a seeded source so every
//! content key and nonce is reproducible.

/// Randomness capability injected into each coordinator.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `random_bytes()` uses cryptographically secure entropy in production
/// - Given the same seed, a simulated implementation yields the same sequence
pub trait Environment: Clone + Send + Sync + 'static {
    /// Fills the provided buffer with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64`.
    ///
    /// Convenience for request ids and access hashes.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }
}
