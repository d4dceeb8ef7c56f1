//! WebSocket Hub Transport
//!
//! Connects to a hub over `ws://` or `wss://` and reads hub frames.
//!
//! # Protocol
//!
//! The hub sends a `welcome` frame once it has registered the connection;
//! receiving it completes the handshake. After that every text frame is a
//! `marketEvent`. The hub pings periodically, so silence longer than the
//! server timeout means the connection is dead.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::ClientConfig;
use crate::application::ports::{MarketTransport, TransportError, TransportSession};
use crate::domain::market::MarketEvent;
use crate::infrastructure::codec::{HubMessage, JsonCodec};

type HubStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the WebSocket transport.
#[derive(Debug, Clone)]
pub struct WebSocketTransportConfig {
    /// Hub endpoint URL.
    pub url: String,
    /// Upper bound on TCP connect, upgrade and welcome frame together.
    pub handshake_timeout: Duration,
    /// Maximum silence from the hub before the session fails.
    pub server_timeout: Duration,
}

impl WebSocketTransportConfig {
    /// Create a configuration with default timeouts.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            handshake_timeout: Duration::from_secs(15),
            server_timeout: Duration::from_secs(30),
        }
    }

    /// Set the handshake timeout.
    #[must_use]
    pub const fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the server timeout.
    #[must_use]
    pub const fn with_server_timeout(mut self, timeout: Duration) -> Self {
        self.server_timeout = timeout;
        self
    }
}

impl From<&ClientConfig> for WebSocketTransportConfig {
    fn from(config: &ClientConfig) -> Self {
        Self::new(config.hub_url.clone())
            .with_handshake_timeout(config.websocket.handshake_timeout)
            .with_server_timeout(config.websocket.server_timeout)
    }
}

// =============================================================================
// Transport
// =============================================================================

/// Opens WebSocket sessions to a hub.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    config: WebSocketTransportConfig,
    codec: JsonCodec,
}

impl WebSocketTransport {
    /// Create a new transport.
    #[must_use]
    pub const fn new(config: WebSocketTransportConfig) -> Self {
        Self {
            config,
            codec: JsonCodec::new(),
        }
    }

    /// Hub endpoint URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.config.url
    }

    async fn handshake(&self) -> Result<WebSocketSession, TransportError> {
        tracing::debug!(url = %self.config.url, "Connecting to hub");

        let (mut stream, _response) = tokio_tungstenite::connect_async(self.config.url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let connection_id = loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => match self.codec.decode(&text) {
                    Ok(HubMessage::Welcome { connection_id }) => break connection_id,
                    Ok(HubMessage::MarketEvent(_)) => {
                        return Err(TransportError::Handshake(
                            "market event received before welcome".to_string(),
                        ));
                    }
                    Err(e) => return Err(TransportError::Handshake(e.to_string())),
                },
                Some(Ok(Message::Ping(data))) => {
                    stream
                        .send(Message::Pong(data))
                        .await
                        .map_err(|e| TransportError::Connect(e.to_string()))?;
                }
                Some(Ok(Message::Close(_))) | None => {
                    return Err(TransportError::Handshake(
                        "connection closed during handshake".to_string(),
                    ));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(TransportError::Connect(e.to_string())),
            }
        };

        Ok(WebSocketSession {
            stream,
            codec: self.codec,
            connection_id,
            server_timeout: self.config.server_timeout,
        })
    }
}

#[async_trait]
impl MarketTransport for WebSocketTransport {
    async fn connect(&self) -> Result<Box<dyn TransportSession>, TransportError> {
        let timeout = self.config.handshake_timeout;
        match tokio::time::timeout(timeout, self.handshake()).await {
            Ok(result) => result.map(|session| Box::new(session) as Box<dyn TransportSession>),
            Err(_) => Err(TransportError::HandshakeTimeout(timeout)),
        }
    }
}

// =============================================================================
// Session
// =============================================================================

/// A live WebSocket session with a hub.
pub struct WebSocketSession {
    stream: HubStream,
    codec: JsonCodec,
    connection_id: String,
    server_timeout: Duration,
}

impl std::fmt::Debug for WebSocketSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketSession")
            .field("connection_id", &self.connection_id)
            .field("server_timeout", &self.server_timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TransportSession for WebSocketSession {
    fn connection_id(&self) -> Option<&str> {
        Some(&self.connection_id)
    }

    async fn next_event(&mut self) -> Result<Option<MarketEvent>, TransportError> {
        loop {
            let Ok(frame) = tokio::time::timeout(self.server_timeout, self.stream.next()).await
            else {
                return Err(TransportError::ServerTimeout(self.server_timeout));
            };

            match frame {
                Some(Ok(Message::Text(text))) => match self.codec.decode(&text) {
                    Ok(HubMessage::MarketEvent(event)) => return Ok(Some(event)),
                    Ok(HubMessage::Welcome { .. }) => {
                        tracing::debug!("Ignoring repeated welcome frame");
                    }
                    Err(e) => return Err(TransportError::Decode(e.to_string())),
                },
                Some(Ok(Message::Ping(data))) => {
                    self.stream
                        .send(Message::Pong(data))
                        .await
                        .map_err(|e| TransportError::Io(e.to_string()))?;
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(frame = ?frame, "Hub sent close frame");
                    return Ok(None);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(TransportError::Io(e.to_string())),
                None => return Ok(None),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::trace!(error = %e, "Close on finished session");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::config::ClientConfig;

    #[test]
    fn config_defaults() {
        let config = WebSocketTransportConfig::new("ws://localhost:5080/markethub");
        assert_eq!(config.handshake_timeout, Duration::from_secs(15));
        assert_eq!(config.server_timeout, Duration::from_secs(30));
    }

    #[test]
    fn config_from_client_config() {
        let mut client = ClientConfig::default();
        client.websocket.handshake_timeout = Duration::from_secs(3);
        client.websocket.server_timeout = Duration::from_secs(7);

        let config = WebSocketTransportConfig::from(&client);
        assert_eq!(config.url, "ws://127.0.0.1:5080/markethub");
        assert_eq!(config.handshake_timeout, Duration::from_secs(3));
        assert_eq!(config.server_timeout, Duration::from_secs(7));
    }

    #[tokio::test]
    async fn refused_connection_is_a_connect_error() {
        // Bind and drop to get a port nothing listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let transport = WebSocketTransport::new(WebSocketTransportConfig::new(format!(
            "ws://127.0.0.1:{port}/markethub"
        )));

        let Err(err) = transport.connect().await else {
            panic!("connect should fail");
        };
        assert!(matches!(err, TransportError::Connect(_)));
    }

    #[tokio::test]
    async fn silent_server_times_out_handshake() {
        // Accepts TCP but never answers the upgrade.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let transport = WebSocketTransport::new(
            WebSocketTransportConfig::new(format!("ws://127.0.0.1:{port}/markethub"))
                .with_handshake_timeout(Duration::from_millis(200)),
        );

        let Err(err) = transport.connect().await else {
            panic!("handshake should time out");
        };
        assert!(matches!(err, TransportError::HandshakeTimeout(_)));
    }
}
