//! Domain Layer - Core event types and connection rules.
//!
//! Pure types with no I/O: the market event model with its derived
//! analytics, and the subscriber connection state machine.

/// Market event model and derived analytics.
pub mod market;

/// Subscriber connection state machine and reconnect schedule.
pub mod connection;
