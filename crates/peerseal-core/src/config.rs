//! Coordinator configuration.

/// What a coordinator does when loading its key material fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitFailurePolicy {
    /// Enter a terminal failed state and deliver the load error to every
    /// queued and future request.
    #[default]
    Surface,

    /// Legacy behavior: log the failure and stay non-ready. Queued requests
    /// never complete. Only for peers that depend on the old semantics.
    Stall,
}

/// Per-coordinator limits and policies.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Capacity of the coordinator mailbox
    pub mailbox_capacity: usize,

    /// Capacity of each session task's request queue
    pub session_queue_capacity: usize,

    /// Handling of key-group and own-key-group load failures
    pub init_failure: InitFailurePolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 64,
            session_queue_capacity: 32,
            init_failure: InitFailurePolicy::Surface,
        }
    }
}

impl CoordinatorConfig {
    /// Config with the legacy stall-on-failure policy.
    #[must_use]
    pub fn stalling() -> Self {
        Self { init_failure: InitFailurePolicy::Stall, ..Self::default() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_surfaces_load_failures() {
        let config = CoordinatorConfig::default();

        assert_eq!(config.init_failure, InitFailurePolicy::Surface);
        assert_eq!(config.mailbox_capacity, 64);
        assert_eq!(config.session_queue_capacity, 32);
    }

    #[test]
    fn stalling_only_changes_the_policy() {
        let config = CoordinatorConfig::stalling();

        assert_eq!(config.init_failure, InitFailurePolicy::Stall);
        assert_eq!(config.mailbox_capacity, CoordinatorConfig::default().mailbox_capacity);
    }
}
