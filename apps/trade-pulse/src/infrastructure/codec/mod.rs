//! Hub Wire Codec
//!
//! JSON text frames exchanged on the `/markethub` WebSocket. Every frame is
//! a tagged envelope:
//!
//! ```json
//! {"type":"welcome","data":{"connectionId":"3f2c..."}}
//! {"type":"marketEvent","data":{"symbol":"AAPL","price":"150.00"}}
//! ```
//!
//! Decimals are written as strings. Numbers are accepted on decode.

use serde::{Deserialize, Serialize};

use crate::domain::market::MarketEvent;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A frame sent from the hub to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum HubMessage {
    /// First frame on every connection; completes the client handshake.
    #[serde(rename_all = "camelCase")]
    Welcome {
        /// Identifier assigned to this connection by the hub.
        connection_id: String,
    },
    /// A published market event.
    MarketEvent(MarketEvent),
}

/// JSON codec for hub frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Encode a frame as JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self, message: &HubMessage) -> Result<String, CodecError> {
        Ok(serde_json::to_string(message)?)
    }

    /// Decode a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a known frame.
    pub fn decode(&self, text: &str) -> Result<HubMessage, CodecError> {
        Ok(serde_json::from_str(text.trim())?)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use rust_decimal::Decimal;

    use super::*;

    #[test]
    fn welcome_wire_format() {
        let codec = JsonCodec::new();
        let text = codec
            .encode(&HubMessage::Welcome {
                connection_id: "abc".to_string(),
            })
            .unwrap();

        assert_eq!(text, r#"{"type":"welcome","data":{"connectionId":"abc"}}"#);
    }

    #[test]
    fn market_event_wire_format() {
        let codec = JsonCodec::new();
        let event = MarketEvent::new("AAPL")
            .with_price(Decimal::from_str("150.00").unwrap())
            .with_previous_price(Decimal::from_str("148.50").unwrap());

        let text = codec.encode(&HubMessage::MarketEvent(event)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();

        assert_eq!(value["type"], "marketEvent");
        assert_eq!(value["data"]["symbol"], "AAPL");
        assert_eq!(value["data"]["price"], "150.00");
        assert_eq!(value["data"]["previousPrice"], "148.50");
        assert!(value["data"].get("change").is_none());
    }

    #[test]
    fn decodes_numeric_prices() {
        let codec = JsonCodec::new();
        let message = codec
            .decode(r#" {"type":"marketEvent","data":{"symbol":"XYZ","price":10,"previousPrice":12.5}} "#)
            .unwrap();

        let HubMessage::MarketEvent(event) = message else {
            panic!("expected market event");
        };
        assert_eq!(event.symbol, "XYZ");
        assert_eq!(event.change(), Some(Decimal::from_str("-2.5").unwrap()));
    }

    #[test]
    fn rejects_unknown_frames() {
        let codec = JsonCodec::new();
        assert!(codec.decode(r#"{"type":"ping"}"#).is_err());
        assert!(codec.decode("not json").is_err());
        assert!(codec.decode(r#"{"type":"marketEvent","data":{}}"#).is_err());
    }
}
