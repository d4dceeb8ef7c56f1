//! Market Event Types
//!
//! The canonical market event distributed by the hub. Every field except
//! the symbol is optional: absence means "not provided in this update",
//! never zero.
//!
//! # Derived Fields
//!
//! `change` and `change_percent` are computed from `price` and
//! `previous_price` on every call. They are not stored and never appear on
//! the wire, so a receiver cannot be handed a stale or forged value.

use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

// =============================================================================
// Trend
// =============================================================================

/// Direction hint attached to a market event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    /// Price moved up.
    Up,
    /// Price moved down.
    Down,
    /// No direction (or not computed).
    #[default]
    Neutral,
}

impl Trend {
    /// Classify a price change.
    #[must_use]
    pub fn from_change(change: Option<Decimal>) -> Self {
        match change {
            Some(c) if c > Decimal::ZERO => Self::Up,
            Some(c) if c < Decimal::ZERO => Self::Down,
            _ => Self::Neutral,
        }
    }

    /// Get the wire name of this trend.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Neutral => "neutral",
        }
    }
}

// =============================================================================
// Market Event
// =============================================================================

/// A single market price update.
///
/// # Wire Format (JSON)
/// ```json
/// {"symbol": "AAPL", "price": "150.00", "previousPrice": "148.50",
///  "timestamp": "2024-03-15T14:30:00Z", "trend": "up"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketEvent {
    /// Ticker symbol.
    pub symbol: String,

    /// Quoted price.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,

    /// Last known price before this update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_price: Option<Decimal>,

    /// Producer timestamp. A value without a UTC offset is read as UTC.
    #[serde(
        default,
        deserialize_with = "deserialize_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,

    /// Traded volume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<Decimal>,

    /// Free-text annotation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Producer-supplied direction hint, carried verbatim.
    #[serde(default)]
    pub trend: Trend,
}

impl MarketEvent {
    /// Create an event carrying only a symbol.
    #[must_use]
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            price: None,
            previous_price: None,
            timestamp: None,
            volume: None,
            description: None,
            trend: Trend::Neutral,
        }
    }

    /// Set the price.
    #[must_use]
    pub const fn with_price(mut self, price: Decimal) -> Self {
        self.price = Some(price);
        self
    }

    /// Set the previous price.
    #[must_use]
    pub const fn with_previous_price(mut self, previous_price: Decimal) -> Self {
        self.previous_price = Some(previous_price);
        self
    }

    /// Set the timestamp.
    #[must_use]
    pub const fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Set the traded volume.
    #[must_use]
    pub const fn with_volume(mut self, volume: Decimal) -> Self {
        self.volume = Some(volume);
        self
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the trend hint.
    #[must_use]
    pub const fn with_trend(mut self, trend: Trend) -> Self {
        self.trend = trend;
        self
    }

    /// Absolute price change: `price - previous_price`.
    ///
    /// `None` if either operand is absent.
    #[must_use]
    pub fn change(&self) -> Option<Decimal> {
        self.price?.checked_sub(self.previous_price?)
    }

    /// Percent price change: `change / previous_price * 100`.
    ///
    /// `None` if `previous_price` is absent or zero, or `change` is `None`.
    #[must_use]
    pub fn change_percent(&self) -> Option<Decimal> {
        let previous = self.previous_price.filter(|p| !p.is_zero())?;
        self.change()?
            .checked_div(previous)?
            .checked_mul(Decimal::ONE_HUNDRED)
    }

    /// Trend implied by `change`, independent of the `trend` hint.
    #[must_use]
    pub fn implied_trend(&self) -> Trend {
        Trend::from_change(self.change())
    }

    /// Whether the symbol is present (non-blank).
    #[must_use]
    pub fn has_symbol(&self) -> bool {
        !self.symbol.trim().is_empty()
    }

    /// Fill in `timestamp` with `received_at` if the producer left it out.
    #[must_use]
    pub fn stamped(mut self, received_at: DateTime<Utc>) -> Self {
        self.timestamp.get_or_insert(received_at);
        self
    }
}

/// Parse an RFC 3339 timestamp, or a bare `2024-03-15T14:30:00` taken as UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(timestamp) = raw.parse::<DateTime<Utc>>() {
        return Some(timestamp);
    }
    raw.parse::<NaiveDateTime>().ok().map(|naive| naive.and_utc())
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    parse_timestamp(&raw)
        .map(Some)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
}

// =============================================================================
// Tests
// =============================================================================
