//! Peer connection lifecycle as seen by a session.

use serde::{Deserialize, Serialize};

/// State reported by the media transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// What the transport must do after a state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Nothing to do.
    Continue,
    /// The channel is up: start outbound media.
    Activate,
    /// Close the connection, tear down the session and drop it from the registry.
    Teardown,
}

/// Map a state to the transport action. `Disconnected` is transient and
/// left alone; only `Failed` and `Closed` end a session. Never retried.
pub fn transition(state: ConnectionState) -> ConnectionAction {
    match state {
        ConnectionState::Connected => ConnectionAction::Activate,
        ConnectionState::Failed | ConnectionState::Closed => ConnectionAction::Teardown,
        ConnectionState::New | ConnectionState::Connecting | ConnectionState::Disconnected => {
            ConnectionAction::Continue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_failed_and_closed_tear_down() {
        use ConnectionState::*;
        for state in [New, Connecting, Connected, Disconnected] {
            assert_ne!(transition(state), ConnectionAction::Teardown, "{state:?}");
        }
        assert_eq!(transition(Failed), ConnectionAction::Teardown);
        assert_eq!(transition(Closed), ConnectionAction::Teardown);
        assert_eq!(transition(Connected), ConnectionAction::Activate);
    }
}
