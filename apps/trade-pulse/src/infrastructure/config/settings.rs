//! Configuration Settings
//!
//! Configuration types for the hub server and the subscriber client, loaded
//! from environment variables. Unparseable numbers fall back to defaults.
//! A malformed reconnect table, a non-WebSocket hub URL and a zero client
//! timeout are errors.

use std::time::Duration;

use crate::domain::connection::DEFAULT_RECONNECT_DELAYS;

// =============================================================================
// Hub Settings
// =============================================================================

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Port serving the hub WebSocket endpoint and the publish endpoint.
    pub api_port: u16,
    /// Health check HTTP port.
    pub health_port: u16,
    /// Interval between keep-alive pings sent to each subscriber.
    pub keepalive_interval: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            api_port: 5080,
            health_port: 8082,
            keepalive_interval: Duration::from_secs(15),
        }
    }
}

/// Hub fan-out settings.
#[derive(Debug, Clone)]
pub struct BroadcastSettings {
    /// Events buffered per subscriber before further events are dropped
    /// for that subscriber.
    pub subscriber_queue_capacity: usize,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            subscriber_queue_capacity: 1024,
        }
    }
}

/// Complete hub server configuration.
#[derive(Debug, Clone, Default)]
pub struct HubConfig {
    /// Server port settings.
    pub server: ServerSettings,
    /// Fan-out settings.
    pub broadcast: BroadcastSettings,
}

impl HubConfig {
    /// Create configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);
        let defaults = Self::default();

        let server = ServerSettings {
            api_port: env.u16("PULSE_API_PORT", defaults.server.api_port),
            health_port: env.u16("PULSE_HEALTH_PORT", defaults.server.health_port),
            keepalive_interval: env.duration_secs(
                "PULSE_KEEPALIVE_INTERVAL_SECS",
                defaults.server.keepalive_interval,
            ),
        };

        let broadcast = BroadcastSettings {
            subscriber_queue_capacity: env
                .usize(
                    "PULSE_SUBSCRIBER_QUEUE_CAPACITY",
                    defaults.broadcast.subscriber_queue_capacity,
                )
                .max(1),
        };

        Self { server, broadcast }
    }
}

// =============================================================================
// Client Settings
// =============================================================================

/// Client WebSocket timing settings.
#[derive(Debug, Clone)]
pub struct WebSocketSettings {
    /// Upper bound on connect plus handshake.
    pub handshake_timeout: Duration,
    /// Silence from the hub after which the connection counts as dropped.
    pub server_timeout: Duration,
    /// Delay before each reconnect attempt, in order.
    pub reconnect_delays: Vec<Duration>,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(15),
            server_timeout: Duration::from_secs(30),
            reconnect_delays: DEFAULT_RECONNECT_DELAYS.to_vec(),
        }
    }
}

/// Complete subscriber client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Hub endpoint, `ws://` or `wss://`.
    pub hub_url: String,
    /// Timing settings.
    pub websocket: WebSocketSettings,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            hub_url: "ws://127.0.0.1:5080/markethub".to_string(),
            websocket: WebSocketSettings::default(),
        }
    }
}

impl ClientConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub URL is empty or not a WebSocket URL, if
    /// the reconnect table is malformed, or if a timeout is zero.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// See [`ClientConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);
        let defaults = Self::default();

        let hub_url = match lookup("PULSE_HUB_URL") {
            Some(url) if url.trim().is_empty() => {
                return Err(ConfigError::EmptyValue("PULSE_HUB_URL".to_string()));
            }
            Some(url) => url.trim().to_string(),
            None => defaults.hub_url,
        };
        if !(hub_url.starts_with("ws://") || hub_url.starts_with("wss://")) {
            return Err(ConfigError::InvalidValue {
                key: "PULSE_HUB_URL".to_string(),
                value: hub_url,
            });
        }

        let reconnect_delays = match lookup("PULSE_RECONNECT_DELAYS_SECS") {
            Some(raw) => parse_reconnect_delays(&raw).ok_or_else(|| ConfigError::InvalidValue {
                key: "PULSE_RECONNECT_DELAYS_SECS".to_string(),
                value: raw,
            })?,
            None => defaults.websocket.reconnect_delays,
        };

        let websocket = WebSocketSettings {
            handshake_timeout: env.nonzero_duration_secs(
                "PULSE_HANDSHAKE_TIMEOUT_SECS",
                defaults.websocket.handshake_timeout,
            )?,
            server_timeout: env.nonzero_duration_secs(
                "PULSE_SERVER_TIMEOUT_SECS",
                defaults.websocket.server_timeout,
            )?,
            reconnect_delays,
        };

        Ok(Self { hub_url, websocket })
    }
}

/// Parse a comma-separated list of whole seconds, e.g. `0,2,10,30`.
///
/// An empty string is an empty table (no reconnects). Returns `None` if any
/// entry is not a non-negative integer.
#[must_use]
pub fn parse_reconnect_delays(raw: &str) -> Option<Vec<Duration>> {
    if raw.trim().is_empty() {
        return Some(Vec::new());
    }

    raw.split(',')
        .map(|part| part.trim().parse::<u64>().ok().map(Duration::from_secs))
        .collect()
}

// =============================================================================
// Errors
// =============================================================================

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable has a value that cannot be used.
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Rejected value.
        value: String,
    },
}

// =============================================================================
// Parsing Helpers
// =============================================================================

struct Env<'a, F>(&'a F);

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn u16(&self, key: &str, default: u16) -> u16 {
        (self.0)(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn usize(&self, key: &str, default: usize) -> usize {
        (self.0)(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        (self.0)(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    /// Like `duration_secs`, but an explicit zero is an error.
    fn nonzero_duration_secs(
        &self,
        key: &str,
        default: Duration,
    ) -> Result<Duration, ConfigError> {
        let duration = self.duration_secs(key, default);
        if duration.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: key.to_string(),
                value: "0".to_string(),
            });
        }
        Ok(duration)
    }
}
