//! Port Interfaces
//!
//! Contracts between the application services and the infrastructure
//! adapters, following the Hexagonal Architecture pattern.
//!
//! ## Driven Ports (Outbound)
//!
//! - `EventPublisher`: fan-out of a validated event to live subscribers
//! - `MarketTransport` / `TransportSession`: client-side connection to a hub

use async_trait::async_trait;

use crate::domain::market::MarketEvent;

// =============================================================================
// Publishing
// =============================================================================

/// Outcome of a single fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Subscribers registered at publish time.
    pub recipients: usize,
    /// Subscribers whose queue accepted the event.
    pub delivered: usize,
    /// Subscribers whose delivery failed (full or closed queue).
    pub failed: usize,
}

/// Fans one event out to every live subscriber.
///
/// Implementations must not block on any individual subscriber and must
/// never fail the publisher because of one subscriber.
pub trait EventPublisher: Send + Sync {
    /// Publish an event.
    fn publish(&self, event: MarketEvent) -> PublishReport;
}

// =============================================================================
// Client Transport
// =============================================================================

/// Transport failures seen by a subscriber.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Could not open the connection.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The hub did not complete the handshake in time.
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(std::time::Duration),

    /// The hub answered with something other than a handshake.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// No frame arrived within the server timeout.
    #[error("no message from server within {0:?}")]
    ServerTimeout(std::time::Duration),

    /// A single message could not be decoded. The connection is still usable.
    #[error("malformed message: {0}")]
    Decode(String),

    /// The live connection failed.
    #[error("transport error: {0}")]
    Io(String),
}

impl TransportError {
    /// Whether the session survives this error.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Decode(_))
    }
}

/// Opens connections to a hub.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketTransport: Send + Sync {
    /// Open a connection and complete the handshake.
    ///
    /// Must be bounded by the transport's own handshake timeout.
    ///
    /// # Errors
    ///
    /// Returns a `TransportError` if the connection or handshake fails.
    async fn connect(&self) -> Result<Box<dyn TransportSession>, TransportError>;
}

/// One live connection to a hub.
#[async_trait]
pub trait TransportSession: Send {
    /// Identifier the hub assigned to this connection, if any.
    fn connection_id(&self) -> Option<&str>;

    /// Wait for the next event.
    ///
    /// `Ok(None)` means the hub closed the connection.
    ///
    /// # Errors
    ///
    /// Returns a `TransportError`; see [`TransportError::is_recoverable`].
    async fn next_event(&mut self) -> Result<Option<MarketEvent>, TransportError>;

    /// Close the connection. Best effort.
    async fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn only_decode_errors_are_recoverable() {
        assert!(TransportError::Decode("bad".to_string()).is_recoverable());
        assert!(!TransportError::Io("reset".to_string()).is_recoverable());
        assert!(!TransportError::ServerTimeout(Duration::from_secs(30)).is_recoverable());
        assert!(!TransportError::HandshakeTimeout(Duration::from_secs(15)).is_recoverable());
    }

    #[test]
    fn default_report_is_empty() {
        let report = PublishReport::default();
        assert_eq!(report.recipients, 0);
        assert_eq!(report.delivered, 0);
        assert_eq!(report.failed, 0);
    }
}
