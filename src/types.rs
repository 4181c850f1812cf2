// =============================================================================
// Shared types used across the Procyon trading engine
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::timeframe::Timeframe;

// ---------------------------------------------------------------------------
// Candles
// ---------------------------------------------------------------------------

/// One OHLCV bar over a fixed time bucket.
///
/// `complete == false` marks an in-progress bucket whose values are still
/// moving; a later bar with the same `time` supersedes it. Within one bucket
/// `high >= max(open, close)` and `low <= min(open, close)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub pair: String,
    /// Bucket open time (final bars) or observation time (partial bars).
    pub time: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub complete: bool,
    /// Named indicator columns attached downstream; empty on the wire.
    #[serde(default)]
    pub metadata: HashMap<String, f64>,
}

impl Candle {
    /// A zero-valued candle for `pair` at `time`. Folds over an empty bucket
    /// produce this shape; callers suppress it via `volume == 0`.
    pub fn empty(pair: impl Into<String>, time: DateTime<Utc>) -> Self {
        Self {
            pair: pair.into(),
            time,
            updated_at: time,
            open: 0.0,
            high: 0.0,
            low: 0.0,
            close: 0.0,
            volume: 0.0,
            complete: false,
            metadata: HashMap::new(),
        }
    }
}

/// Identifies one candle series and its dispatch loop.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct FeedKey {
    pub pair: String,
    pub timeframe: Timeframe,
}

impl FeedKey {
    pub fn new(pair: impl Into<String>, timeframe: Timeframe) -> Self {
        Self {
            pair: pair.into(),
            timeframe,
        }
    }
}

impl std::fmt::Display for FeedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.pair, self.timeframe)
    }
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// Order side, using the venue's wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    /// Buy.
    #[serde(rename = "bid")]
    Bid,
    /// Sell.
    #[serde(rename = "ask")]
    Ask,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bid => write!(f, "bid"),
            Self::Ask => write!(f, "ask"),
        }
    }
}

/// Venue order types. Market buys are expressed as `Price` (spend a quote
/// amount); market sells as `Market` (sell an asset volume).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Limit,
    Price,
    Market,
    Best,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Limit => write!(f, "limit"),
            Self::Price => write!(f, "price"),
            Self::Market => write!(f, "market"),
            Self::Best => write!(f, "best"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Wait,
    Done,
    Cancel,
}

/// An outbound trade intent or an executed order.
///
/// Produced by strategies, carried over the order bus, and filled in by the
/// broker on execution. `exchange_id` keys per-subscriber duplicate
/// suppression on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub exchange_id: String,
    pub pair: String,
    pub side: Side,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub price: f64,
    pub quantity: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Split a venue pair code into (base, quote): `"KRW-BTC"` -> `("BTC", "KRW")`.
pub fn split_pair(pair: &str) -> (&str, &str) {
    match pair.split_once('-') {
        Some((quote, base)) => (base, quote),
        None => (pair, ""),
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_key_display() {
        let key = FeedKey::new("KRW-BTC", Timeframe::M1);
        assert_eq!(key.to_string(), "KRW-BTC_1m");
    }

    #[test]
    fn side_serialises_to_wire_values() {
        assert_eq!(serde_json::to_string(&Side::Bid).unwrap(), "\"bid\"");
        assert_eq!(serde_json::to_string(&Side::Ask).unwrap(), "\"ask\"");
    }

    #[test]
    fn order_type_wire_values() {
        assert_eq!(serde_json::to_string(&OrderType::Price).unwrap(), "\"price\"");
        assert_eq!(
            serde_json::to_string(&OrderType::Market).unwrap(),
            "\"market\""
        );
    }

    #[test]
    fn split_pair_krw_market() {
        assert_eq!(split_pair("KRW-BTC"), ("BTC", "KRW"));
        assert_eq!(split_pair("KRW-DOGE"), ("DOGE", "KRW"));
    }

    #[test]
    fn split_pair_without_separator() {
        assert_eq!(split_pair("BTCUSDT"), ("BTCUSDT", ""));
    }
}
