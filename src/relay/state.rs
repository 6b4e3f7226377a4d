//! Relay state machine
//!
//! ```text
//! Idle -> Connecting -> Negotiating -> Streaming -> Closed
//!             ^                            |
//!             |                            v (stream not found)
//!             +-------- Retrying <---------+
//! ```
//!
//! Any phase can move to `Closed`; nothing leaves `Closed`.

use std::path::PathBuf;

use crate::error::Error;

/// Relay lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayPhase {
    /// Created, not started
    Idle,
    /// Opening the WebSocket
    Connecting,
    /// Sending the codec offer
    Negotiating,
    /// Receiving fragments
    Streaming,
    /// Switching to the fallback stream name
    Retrying,
    /// Connection released, sink closed
    Closed,
}

impl RelayPhase {
    /// Whether moving to `next` is a valid transition
    pub fn can_transition(self, next: RelayPhase) -> bool {
        use RelayPhase::*;

        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Idle, Connecting) => true,
            (Connecting, Negotiating) => true,
            (Negotiating, Streaming) => true,
            (Connecting | Negotiating | Streaming, Retrying) => true,
            (Retrying, Connecting) => true,
            _ => false,
        }
    }

    /// Whether a connection attempt is under way
    pub fn is_active(self) -> bool {
        !matches!(self, RelayPhase::Idle | RelayPhase::Closed)
    }
}

/// Outcome of a relay as seen by consumers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayStatus {
    /// No data and no terminal error yet
    Pending,
    /// The sink holds data; path to open
    Ready(PathBuf),
    /// The relay ended with an error
    Failed(Error),
    /// The relay was stopped by its owner
    Stopped,
}

impl RelayStatus {
    /// Whether the startup outcome is known
    pub fn is_settled(&self) -> bool {
        !matches!(self, RelayStatus::Pending)
    }

    /// Whether the relay has ended
    pub fn is_terminated(&self) -> bool {
        matches!(self, RelayStatus::Failed(_) | RelayStatus::Stopped)
    }
}

/// Notifications published by a relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// First fragment written; sink is readable. Sent once.
    Ready(PathBuf),
    /// A binary fragment was appended to the sink
    Fragment { len: usize },
    /// Server reported an error the stream survives
    Error(String),
    /// The relay ended with an error
    Failed(Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        use RelayPhase::*;

        assert!(Idle.can_transition(Connecting));
        assert!(Connecting.can_transition(Negotiating));
        assert!(Negotiating.can_transition(Streaming));
        assert!(Streaming.can_transition(Closed));
    }

    #[test]
    fn test_fallback_transitions() {
        use RelayPhase::*;

        assert!(Streaming.can_transition(Retrying));
        assert!(Retrying.can_transition(Connecting));
        assert!(!Retrying.can_transition(Streaming));
    }

    #[test]
    fn test_closed_is_final() {
        use RelayPhase::*;

        for next in [Idle, Connecting, Negotiating, Streaming, Retrying, Closed] {
            assert!(!Closed.can_transition(next));
        }
        assert!(Idle.can_transition(Closed));
    }

    #[test]
    fn test_skipping_negotiation_rejected() {
        assert!(!RelayPhase::Connecting.can_transition(RelayPhase::Streaming));
        assert!(!RelayPhase::Idle.can_transition(RelayPhase::Streaming));
    }

    #[test]
    fn test_status_predicates() {
        assert!(!RelayStatus::Pending.is_settled());
        assert!(RelayStatus::Ready(PathBuf::from("/tmp/x")).is_settled());
        assert!(!RelayStatus::Ready(PathBuf::from("/tmp/x")).is_terminated());
        assert!(RelayStatus::Failed(Error::Cancelled).is_terminated());
        assert!(RelayStatus::Stopped.is_terminated());
    }
}
