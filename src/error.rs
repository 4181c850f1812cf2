// =============================================================================
// Error taxonomy
// =============================================================================
//
// Feed errors are broadcast over channels to every aggregator subscriber and
// must therefore be cloneable; sources are flattened to strings at the point
// of capture. Decode failures and late bars are deliberately *not* here:
// they are logged and dropped where they occur and never tear down a feed.

use thiserror::Error;

use crate::types::{OrderType, Side};

/// Stream-level failures delivered on a feed's error channel.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FeedError {
    /// Initial websocket dial failed. Fatal; not retried.
    #[error("websocket dial failed: {0}")]
    Dial(String),

    /// Read failed (or the read deadline expired) and the bounded reconnect
    /// budget is exhausted. Terminal for the whole stream.
    #[error("websocket read failed after {retries} retries: {message}")]
    Read { retries: u32, message: String },

    /// The venue reported an error envelope. The connection stays open.
    #[error("venue protocol error: {name}: {message}")]
    Protocol { name: String, message: String },

    /// A keepalive ping could not be written; treated as a connection
    /// failure.
    #[error("keepalive ping failed: {0}")]
    Keepalive(String),
}

/// Rejections and failures raised at the broker boundary. Surfaced to the
/// order-executed callback chain; the order bus never retries.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BrokerError {
    #[error("insufficient funds: need {needed} {currency}, have {available}")]
    InsufficientFunds {
        currency: String,
        needed: f64,
        available: f64,
    },

    #[error("invalid quantity: {0}")]
    InvalidQuantity(f64),

    #[error("unknown pair: {0}")]
    UnknownPair(String),

    #[error("no reference price for {0}")]
    NoMarkPrice(String),

    #[error("unsupported order: side={side} type={order_type}")]
    UnsupportedOrderType { side: Side, order_type: OrderType },
}

/// An unrecognised timeframe label.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unsupported timeframe: {0}")]
pub struct TimeframeParseError(pub String);
