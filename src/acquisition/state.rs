//! Session lifecycle states.

use std::fmt;

/// Lifecycle state of an acquisition session.
///
/// `Created → Opened → Configured → Streaming → Stopping → Closed`, with
/// `Failed` reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SessionState {
    /// Constructed, nothing acquired.
    Created,
    /// Streaming grant held.
    Opened,
    /// Device configured for the acquisition.
    Configured,
    /// Frames are being grabbed.
    Streaming,
    /// Releasing the stream.
    Stopping,
    /// Finished normally (including cancellation).
    Closed,
    /// Finished with an error.
    Failed,
}

impl SessionState {
    /// Whether the session can no longer change state.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }

    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Created, Opened)
            | (Opened, Configured)
            | (Configured, Streaming)
            | (Streaming, Stopping)
            | (Opened | Configured, Stopping)
            | (Stopping, Closed) => true,
            (current, Failed) => !current.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionState::Created => "created",
            SessionState::Opened => "opened",
            SessionState::Configured => "configured",
            SessionState::Streaming => "streaming",
            SessionState::Stopping => "stopping",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::SessionState::*;

    #[test]
    fn forward_path_is_legal() {
        let path = [Created, Opened, Configured, Streaming, Stopping, Closed];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn no_way_back() {
        assert!(!Streaming.can_transition_to(Configured));
        assert!(!Closed.can_transition_to(Opened));
        assert!(!Failed.can_transition_to(Failed));
        assert!(!Closed.can_transition_to(Failed));
        assert!(Created.can_transition_to(Failed));
        assert!(Stopping.can_transition_to(Failed));
    }
}
