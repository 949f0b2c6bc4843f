//! Observable, forward-only session lifecycle.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, trace};

use gnbwatch_protocol::SessionState;

/// Shared handle on the current [`SessionState`].
///
/// Cloning is cheap; all clones observe and drive the same state.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    tx: Arc<watch::Sender<SessionState>>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SessionState::Idle);
        Self { tx: Arc::new(tx) }
    }

    /// Moves to `next` if the transition is legal. Returns whether it moved.
    pub fn advance(&self, next: SessionState) -> bool {
        let mut from = SessionState::Idle;
        let moved = self.tx.send_if_modified(|current| {
            from = *current;
            if current.can_advance_to(next) {
                *current = next;
                true
            } else {
                false
            }
        });
        if moved {
            debug!(?from, to = ?next, "session state changed");
        } else {
            trace!(?from, to = ?next, "ignored backward state transition");
        }
        moved
    }

    pub fn state(&self) -> SessionState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    /// Waits until the session is `Connected`, without polling.
    ///
    /// Fails with the state reached instead if the session moved past
    /// `Connected` first (e.g. the connect attempts were exhausted).
    pub async fn wait_connected(&self) -> Result<(), SessionState> {
        let mut rx = self.subscribe();
        let reached = match rx.wait_for(|s| *s >= SessionState::Connected).await {
            Ok(s) => *s,
            Err(_) => self.state(),
        };
        if reached == SessionState::Connected {
            Ok(())
        } else {
            Err(reached)
        }
    }
}
