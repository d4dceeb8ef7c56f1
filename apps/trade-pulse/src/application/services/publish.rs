//! Publish Service
//!
//! Boundary between an external producer and the hub: validates the event
//! and forwards it. A rejected event never reaches the publisher.

use std::sync::Arc;

use crate::application::ports::{EventPublisher, PublishReport};
use crate::domain::market::MarketEvent;
use crate::infrastructure::metrics;

/// Publish request rejections.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    /// The event failed validation.
    #[error("invalid market event: {0}")]
    Validation(String),
}

/// Validates and forwards market events to an [`EventPublisher`].
#[derive(Clone)]
pub struct PublishService {
    publisher: Arc<dyn EventPublisher>,
}

impl PublishService {
    /// Create a publish service.
    #[must_use]
    pub fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self { publisher }
    }

    /// Validate `event` and hand it to the publisher.
    ///
    /// Returns once fan-out has been dispatched; it does not wait for
    /// subscribers to process the event.
    ///
    /// # Errors
    ///
    /// Returns `PublishError::Validation` if the symbol is blank.
    pub fn publish(&self, event: MarketEvent) -> Result<PublishReport, PublishError> {
        if let Err(e) = validate(&event) {
            metrics::record_publish_rejected();
            tracing::debug!(error = %e, "Rejected market event");
            return Err(e);
        }

        let symbol = event.symbol.clone();
        let report = self.publisher.publish(event);
        tracing::debug!(
            symbol = %symbol,
            recipients = report.recipients,
            failed = report.failed,
            "Market event published"
        );
        Ok(report)
    }
}

impl std::fmt::Debug for PublishService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishService").finish_non_exhaustive()
    }
}

/// Check that an event is acceptable for publishing.
///
/// # Errors
///
/// Returns `PublishError::Validation` if the symbol is blank.
pub fn validate(event: &MarketEvent) -> Result<(), PublishError> {
    if event.has_symbol() {
        Ok(())
    } else {
        Err(PublishError::Validation("symbol is required".to_string()))
    }
}
