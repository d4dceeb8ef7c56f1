//! Broadcast Hub
//!
//! Fans each published market event out to every registered subscriber.
//!
//! # Architecture
//!
//! Every subscriber owns a bounded `mpsc` queue. `publish` walks the live
//! set under a read lock and `try_send`s one shared `Arc<MarketEvent>` into
//! each queue, so a slow subscriber never blocks the publisher or its peers.
//! Each connection drains its own queue on its own task, which keeps
//! per-subscriber delivery in publish order.
//!
//! A full queue drops the event for that subscriber only. A closed queue
//! means the connection is gone; its entry is pruned.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use crate::BroadcastSettings;
use crate::application::ports::{EventPublisher, PublishReport};
use crate::domain::market::MarketEvent;
use crate::infrastructure::metrics::{self, DeliveryOutcome};

// =============================================================================
// Subscriber Identity
// =============================================================================

/// Identifier of one registered subscriber connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    /// Generate a fresh identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A new subscriber's identity and the receiving end of its queue.
#[derive(Debug)]
pub struct SubscriberRegistration {
    /// Identifier to pass to [`BroadcastHub::unregister`].
    pub id: SubscriberId,
    /// Events published after registration, in publish order.
    pub events: mpsc::Receiver<Arc<MarketEvent>>,
}

// =============================================================================
// Broadcast Hub
// =============================================================================

/// Configuration for the broadcast hub.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastConfig {
    /// Capacity of each subscriber's queue.
    pub subscriber_queue_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            subscriber_queue_capacity: 1024,
        }
    }
}

impl From<BroadcastSettings> for BroadcastConfig {
    fn from(settings: BroadcastSettings) -> Self {
        Self {
            subscriber_queue_capacity: settings.subscriber_queue_capacity,
        }
    }
}

/// Central hub holding the live subscriber set.
///
/// Instances are created explicitly and shared by `Arc`; there is no
/// process-wide hub.
///
/// # Example
///
/// ```rust
/// use trade_pulse::domain::market::MarketEvent;
/// use trade_pulse::infrastructure::broadcast::{BroadcastConfig, BroadcastHub};
///
/// let hub = BroadcastHub::new(BroadcastConfig::default());
/// let mut subscriber = hub.register();
///
/// let report = hub.publish(MarketEvent::new("AAPL"));
/// assert_eq!(report.delivered, 1);
///
/// let event = subscriber.events.try_recv().unwrap();
/// assert_eq!(event.symbol, "AAPL");
/// ```
pub struct BroadcastHub {
    config: BroadcastConfig,
    subscribers: RwLock<HashMap<SubscriberId, mpsc::Sender<Arc<MarketEvent>>>>,
    events_published: AtomicU64,
    deliveries: AtomicU64,
    dropped: AtomicU64,
}

impl BroadcastHub {
    /// Create a new broadcast hub with the given configuration.
    #[must_use]
    pub fn new(config: BroadcastConfig) -> Self {
        Self {
            config: BroadcastConfig {
                subscriber_queue_capacity: config.subscriber_queue_capacity.max(1),
            },
            subscribers: RwLock::new(HashMap::new()),
            events_published: AtomicU64::new(0),
            deliveries: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Create a new broadcast hub with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(BroadcastConfig::default())
    }

    /// Add a subscriber to the live set.
    ///
    /// The subscriber receives every event published after this call
    /// returns.
    #[must_use]
    pub fn register(&self) -> SubscriberRegistration {
        let id = SubscriberId::new();
        let (tx, events) = mpsc::channel(self.config.subscriber_queue_capacity);

        let count = {
            let mut subscribers = self.subscribers.write();
            subscribers.insert(id, tx);
            subscribers.len()
        };
        metrics::set_subscribers(count);
        tracing::info!(subscriber_id = %id, subscribers = count, "Subscriber registered");

        SubscriberRegistration { id, events }
    }

    /// Remove a subscriber from the live set.
    ///
    /// Dropping the queue's sender ends the subscriber's stream once it has
    /// drained what was already queued. Returns `false` if `id` was not
    /// registered.
    pub fn unregister(&self, id: SubscriberId) -> bool {
        let (removed, count) = {
            let mut subscribers = self.subscribers.write();
            let removed = subscribers.remove(&id).is_some();
            (removed, subscribers.len())
        };

        if removed {
            metrics::set_subscribers(count);
            tracing::info!(subscriber_id = %id, subscribers = count, "Subscriber unregistered");
        }
        removed
    }

    /// Deliver `event` to every subscriber registered at call time.
    ///
    /// Never blocks on a subscriber and never fails because of one.
    pub fn publish(&self, event: MarketEvent) -> PublishReport {
        let start = Instant::now();
        let event = Arc::new(event);
        let mut report = PublishReport::default();
        let mut closed = Vec::new();
        let mut full = 0_u64;

        {
            let subscribers = self.subscribers.read();
            report.recipients = subscribers.len();

            for (id, tx) in subscribers.iter() {
                match tx.try_send(Arc::clone(&event)) {
                    Ok(()) => report.delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        full += 1;
                        tracing::warn!(
                            subscriber_id = %id,
                            symbol = %event.symbol,
                            "Subscriber queue full, dropping event"
                        );
                    }
                    Err(TrySendError::Closed(_)) => {
                        closed.push(*id);
                        tracing::debug!(subscriber_id = %id, "Subscriber queue closed");
                    }
                }
            }
        }
        report.failed = report.recipients - report.delivered;

        for id in &closed {
            self.unregister(*id);
        }

        self.events_published.fetch_add(1, Ordering::Relaxed);
        self.deliveries
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.dropped
            .fetch_add(report.failed as u64, Ordering::Relaxed);

        metrics::record_event_published();
        metrics::record_deliveries(DeliveryOutcome::Delivered, report.delivered as u64);
        metrics::record_deliveries(DeliveryOutcome::QueueFull, full);
        metrics::record_deliveries(DeliveryOutcome::Closed, closed.len() as u64);
        metrics::record_fanout_duration(start.elapsed());

        tracing::debug!(
            symbol = %event.symbol,
            recipients = report.recipients,
            delivered = report.delivered,
            "Fan-out complete"
        );
        report
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Identifiers of the registered subscribers, in no particular order.
    #[must_use]
    pub fn subscriber_ids(&self) -> Vec<SubscriberId> {
        self.subscribers.read().keys().copied().collect()
    }

    /// Get statistics about the hub.
    #[must_use]
    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            subscribers: self.subscriber_count(),
            events_published: self.events_published.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

impl EventPublisher for BroadcastHub {
    fn publish(&self, event: MarketEvent) -> PublishReport {
        Self::publish(self, event)
    }
}

impl fmt::Debug for BroadcastHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastHub")
            .field("config", &self.config)
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}

/// Shared broadcast hub reference.
pub type SharedBroadcastHub = Arc<BroadcastHub>;

/// Statistics about the hub.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    /// Registered subscribers.
    pub subscribers: usize,
    /// Events accepted for fan-out since startup.
    pub events_published: u64,
    /// Successful per-subscriber enqueues since startup.
    pub deliveries: u64,
    /// Per-subscriber deliveries dropped since startup.
    pub dropped: u64,
}

// =============================================================================
// Tests
// =============================================================================
