//! Subscriber Connection State Machine
//!
//! Pure transition table for a subscriber session. The connection manager
//! feeds triggers in; this module decides the next state and rejects
//! transitions the table does not allow.
//!
//! ```text
//!              Start                HandshakeSucceeded
//! Disconnected ─────► Connecting ───────────────────► Connected
//!      ▲                  │                             │    ▲
//!      │  HandshakeFailed │            TransportDropped │    │ ReconnectSucceeded
//!      ├──────────────────┘                             ▼    │
//!      │            ReconnectExhausted            Reconnecting
//!      └────────────────────────────────────────────────┘
//!
//! Stop: any state ─► Disconnected
//! ```

mod reconnect;

pub use reconnect::{DEFAULT_RECONNECT_DELAYS, ReconnectSchedule};

use serde::Serialize;

/// Connection state of a subscriber session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Not connected. Initial state and the state after `stop`.
    #[default]
    Disconnected,
    /// Initial transport handshake in flight.
    Connecting,
    /// Handshake complete, events are flowing.
    Connected,
    /// Transport dropped unexpectedly, working through the backoff schedule.
    Reconnecting,
}

impl ConnectionState {
    /// Get the state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        }
    }

    /// Compute the next state for `trigger`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` if the trigger is not valid in this state.
    pub const fn on(self, trigger: ConnectionTrigger) -> Result<Self, InvalidTransition> {
        match (self, trigger) {
            (_, ConnectionTrigger::Stop) => Ok(Self::Disconnected),
            (Self::Disconnected, ConnectionTrigger::Start) => Ok(Self::Connecting),
            (Self::Connecting, ConnectionTrigger::HandshakeSucceeded)
            | (Self::Reconnecting, ConnectionTrigger::ReconnectSucceeded) => Ok(Self::Connected),
            (Self::Connecting, ConnectionTrigger::HandshakeFailed)
            | (Self::Reconnecting, ConnectionTrigger::ReconnectExhausted) => {
                Ok(Self::Disconnected)
            }
            (Self::Connected, ConnectionTrigger::TransportDropped) => Ok(Self::Reconnecting),
            (from, trigger) => Err(InvalidTransition { from, trigger }),
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something that happened to a subscriber session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionTrigger {
    /// `start` was called.
    Start,
    /// Initial handshake completed.
    HandshakeSucceeded,
    /// Initial handshake failed.
    HandshakeFailed,
    /// Live transport closed without `stop`.
    TransportDropped,
    /// A backoff attempt completed its handshake.
    ReconnectSucceeded,
    /// Every backoff attempt failed.
    ReconnectExhausted,
    /// `stop` (or dispose) was called.
    Stop,
}

/// A trigger that is not valid in the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition: {trigger:?} while {from}")]
pub struct InvalidTransition {
    /// State the session was in.
    pub from: ConnectionState,
    /// Rejected trigger.
    pub trigger: ConnectionTrigger,
}

/// Notification delivered to state listeners on every transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    /// State before the transition.
    pub previous: ConnectionState,
    /// State after the transition.
    pub current: ConnectionState,
    /// Error behind the transition, if any (handshake failure, drop reason,
    /// exhausted reconnects).
    pub error: Option<String>,
}

impl StateChange {
    /// Whether this notification reports a failure.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::ConnectionState::{Connected, Connecting, Disconnected, Reconnecting};
    use super::ConnectionTrigger::{
        HandshakeFailed, HandshakeSucceeded, ReconnectExhausted, ReconnectSucceeded, Start, Stop,
        TransportDropped,
    };
    use super::*;

    #[test_case(Disconnected, Start, Connecting)]
    #[test_case(Connecting, HandshakeSucceeded, Connected)]
    #[test_case(Connecting, HandshakeFailed, Disconnected)]
    #[test_case(Connected, TransportDropped, Reconnecting)]
    #[test_case(Connected, Stop, Disconnected)]
    #[test_case(Reconnecting, ReconnectSucceeded, Connected)]
    #[test_case(Reconnecting, ReconnectExhausted, Disconnected)]
    #[test_case(Reconnecting, Stop, Disconnected)]
    #[test_case(Connecting, Stop, Disconnected)]
    #[test_case(Disconnected, Stop, Disconnected)]
    fn allowed_transitions(from: ConnectionState, trigger: ConnectionTrigger, to: ConnectionState) {
        assert_eq!(from.on(trigger), Ok(to));
    }

    #[test_case(Disconnected, HandshakeSucceeded)]
    #[test_case(Disconnected, TransportDropped)]
    #[test_case(Connecting, Start)]
    #[test_case(Connected, Start)]
    #[test_case(Connected, ReconnectSucceeded)]
    #[test_case(Reconnecting, HandshakeFailed)]
    #[test_case(Reconnecting, TransportDropped)]
    fn rejected_transitions(from: ConnectionState, trigger: ConnectionTrigger) {
        let err = from.on(trigger).unwrap_err();
        assert_eq!(err.from, from);
        assert_eq!(err.trigger, trigger);
    }

    #[test]
    fn default_state_is_disconnected() {
        assert_eq!(ConnectionState::default(), Disconnected);
    }

    #[test]
    fn state_names() {
        assert_eq!(Disconnected.to_string(), "disconnected");
        assert_eq!(Connecting.as_str(), "connecting");
        assert_eq!(Connected.as_str(), "connected");
        assert_eq!(Reconnecting.as_str(), "reconnecting");
        assert_eq!(serde_json::to_string(&Reconnecting).unwrap(), "\"reconnecting\"");
    }
}
