use serde::{Deserialize, Serialize};

/// Operator session lifecycle.
///
/// States only move forward, except that `Authenticating` may be re-entered
/// while credentials are being rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Idle,
    Authenticating,
    MachineListed,
    MachineSelected,
    Connecting,
    Connected,
    Disconnected,
    Terminated,
}

impl SessionState {
    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// Skipping ahead is allowed (a failed connect goes straight to
    /// `Terminated`), going back is not.
    pub fn can_advance_to(self, next: SessionState) -> bool {
        match (self, next) {
            (SessionState::Authenticating, SessionState::Authenticating) => true,
            (SessionState::Terminated, _) => false,
            (from, to) => to > from,
        }
    }

    /// Whether the broker link has been established at some point and
    /// frames may have been buffered.
    pub fn has_connected(self) -> bool {
        self >= SessionState::Connected
    }
}
