//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for publishing and client transports.
pub mod ports;

/// Application services for publishing and subscribing.
pub mod services;
