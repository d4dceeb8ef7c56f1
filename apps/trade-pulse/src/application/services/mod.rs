//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `PublishService`: Validates producer events and hands them to the hub
//! - `SubscriberConnection`: Client session with state machine and reconnects
//! - `ListenerRegistry`: Ordered, failure-isolated callback lists

mod listeners;
mod publish;
mod subscriber;

pub use listeners::{ListenerId, ListenerRegistry};
pub use publish::{PublishError, PublishService, validate};
pub use subscriber::{SubscriberConnection, SubscriberError};
