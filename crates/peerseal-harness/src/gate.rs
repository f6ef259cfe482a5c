//! Latch for holding simulated collaborators mid-call.

use std::sync::Arc;

use tokio::sync::watch;

/// One-way latch: closed until [`Gate::open`], then open forever.
///
/// Collaborators await a gate to simulate a slow RPC or session, letting a
/// test observe the coordinator while the call is outstanding.
#[derive(Clone, Debug)]
pub struct Gate {
    state: Arc<watch::Sender<bool>>,
}

impl Gate {
    /// A closed gate.
    pub fn new() -> Self {
        let (state, _) = watch::channel(false);
        Self { state: Arc::new(state) }
    }

    /// Release every current and future waiter.
    pub fn open(&self) {
        self.state.send_replace(true);
    }

    /// Whether the gate has been opened.
    pub fn is_open(&self) -> bool {
        *self.state.borrow()
    }

    /// Wait until the gate is open.
    pub async fn wait(&self) {
        let mut rx = self.state.subscribe();
        // Sender lives in self, so the channel cannot close while we wait
        let _ = rx.wait_for(|open| *open).await;
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}
