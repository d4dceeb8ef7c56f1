//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Per-subscriber fan-out hub.
pub mod broadcast;

/// Hub wire frames.
pub mod codec;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Hub WebSocket endpoint and publish endpoint.
pub mod server;

/// Process signal handling.
pub mod shutdown;

/// OpenTelemetry tracing integration.
pub mod telemetry;

/// WebSocket client transport.
pub mod transport;
