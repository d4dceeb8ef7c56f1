//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Publishing**: Events accepted and rejected at the publish endpoint
//! - **Delivery**: Per-subscriber queue outcomes and fan-out latency
//! - **Subscribers**: Live subscriber count on the hub
//! - **Client**: Events received, reconnect attempts, listener failures
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! before `init_metrics` is a no-op.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "trade_pulse_events_published_total",
        "Total market events accepted for fan-out"
    );
    describe_counter!(
        "trade_pulse_publish_rejected_total",
        "Total publish requests rejected by validation"
    );
    describe_counter!(
        "trade_pulse_deliveries_total",
        "Per-subscriber delivery outcomes"
    );
    describe_gauge!(
        "trade_pulse_subscribers",
        "Number of subscribers registered with the hub"
    );
    describe_histogram!(
        "trade_pulse_fanout_seconds",
        "Time to enqueue one event for every subscriber"
    );

    describe_counter!(
        "trade_pulse_client_events_received_total",
        "Total market events received by subscriber connections"
    );
    describe_counter!(
        "trade_pulse_client_reconnects_total",
        "Total subscriber reconnect attempts"
    );
    describe_counter!(
        "trade_pulse_listener_failures_total",
        "Total listener invocations that failed or panicked"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for per-subscriber delivery outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The subscriber's queue accepted the event.
    Delivered,
    /// The subscriber's queue was full; the event was dropped for it.
    QueueFull,
    /// The subscriber's connection had already gone away.
    Closed,
}

impl DeliveryOutcome {
    /// Label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::QueueFull => "queue_full",
            Self::Closed => "closed",
        }
    }
}

/// Record an event accepted for fan-out.
pub fn record_event_published() {
    counter!("trade_pulse_events_published_total").increment(1);
}

/// Record a publish request rejected by validation.
pub fn record_publish_rejected() {
    counter!("trade_pulse_publish_rejected_total").increment(1);
}

/// Record delivery outcomes for one fan-out.
pub fn record_deliveries(outcome: DeliveryOutcome, count: u64) {
    if count == 0 {
        return;
    }
    counter!(
        "trade_pulse_deliveries_total",
        "outcome" => outcome.as_str()
    )
    .increment(count);
}

/// Update the live subscriber count.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscribers(count: usize) {
    gauge!("trade_pulse_subscribers").set(count as f64);
}

/// Record fan-out duration.
pub fn record_fanout_duration(duration: Duration) {
    histogram!("trade_pulse_fanout_seconds").record(duration.as_secs_f64());
}

/// Record an event received by a subscriber connection.
pub fn record_event_received() {
    counter!("trade_pulse_client_events_received_total").increment(1);
}

/// Record a subscriber reconnect attempt.
pub fn record_reconnect_attempt() {
    counter!("trade_pulse_client_reconnects_total").increment(1);
}

/// Record a failed listener invocation.
pub fn record_listener_failure(kind: &'static str) {
    counter!(
        "trade_pulse_listener_failures_total",
        "kind" => kind
    )
    .increment(1);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_outcome_as_str() {
        assert_eq!(DeliveryOutcome::Delivered.as_str(), "delivered");
        assert_eq!(DeliveryOutcome::QueueFull.as_str(), "queue_full");
        assert_eq!(DeliveryOutcome::Closed.as_str(), "closed");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_event_published();
        record_deliveries(DeliveryOutcome::Delivered, 3);
        set_subscribers(2);
        record_listener_failure("market_event");
    }
}
