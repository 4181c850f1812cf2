// =============================================================================
// Broker boundary — position queries and market order placement
// =============================================================================
//
// Strategies and the order-execution consumer see only this trait. The
// shipped implementation is a paper broker with in-memory accounting that
// fills at the last marked price; a live venue broker (signed REST) plugs in
// behind the same trait.
//
// The trait is synchronous on purpose: decision logic runs inline on the
// feed dispatch task, and a blocking broker call stalls exactly that feed —
// the same coupling the live system has.

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::error::BrokerError;
use crate::types::{split_pair, Order, OrderStatus, OrderType, Side};

/// A pair's holdings as seen by the strategy.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PositionSnapshot {
    /// Base asset quantity (e.g. BTC for KRW-BTC).
    pub asset_qty: f64,
    /// Quote currency balance (e.g. KRW).
    pub quote_qty: f64,
    /// Volume-weighted average buy price of the held asset.
    pub avg_buy_price: f64,
}

pub trait Broker: Send + Sync {
    fn position(&self, pair: &str) -> Result<PositionSnapshot, BrokerError>;

    /// Place a market order. For buys `quantity` is the quote amount to
    /// spend; for sells it is the asset volume to liquidate (venue
    /// semantics).
    fn create_order_market(
        &self,
        side: Side,
        pair: &str,
        quantity: f64,
    ) -> Result<Order, BrokerError>;
}

// ---------------------------------------------------------------------------
// Paper broker
// ---------------------------------------------------------------------------

/// Taker fee netted out of market buys.
const TAKER_FEE_RATE: f64 = 0.0005;

struct PaperBook {
    /// currency -> balance (quote currency and each base asset).
    balances: HashMap<String, f64>,
    /// pair -> volume-weighted average buy price.
    avg_buy: HashMap<String, f64>,
    /// pair -> last observed trade price.
    marks: HashMap<String, f64>,
}

/// Simulated broker: synthetic fills against marked prices, uuid order ids.
pub struct PaperBroker {
    quote_currency: String,
    book: Mutex<PaperBook>,
}

impl PaperBroker {
    /// A paper account holding `starting_balance` of `quote_currency`.
    pub fn new(quote_currency: impl Into<String>, starting_balance: f64) -> Self {
        let quote_currency = quote_currency.into();
        let mut balances = HashMap::new();
        balances.insert(quote_currency.clone(), starting_balance);
        Self {
            quote_currency,
            book: Mutex::new(PaperBook {
                balances,
                avg_buy: HashMap::new(),
                marks: HashMap::new(),
            }),
        }
    }

    /// Record the latest trade price for `pair`. Fed from the live bar
    /// stream; market orders fill at this price.
    pub fn set_mark(&self, pair: &str, price: f64) {
        if price > 0.0 {
            self.book.lock().marks.insert(pair.to_string(), price);
        }
    }

    pub fn mark(&self, pair: &str) -> Option<f64> {
        self.book.lock().marks.get(pair).copied()
    }

    fn quote_of(&self, pair: &str) -> Result<(), BrokerError> {
        let (_, quote) = split_pair(pair);
        if quote.is_empty() || quote != self.quote_currency {
            return Err(BrokerError::UnknownPair(pair.to_string()));
        }
        Ok(())
    }
}

impl Broker for PaperBroker {
    fn position(&self, pair: &str) -> Result<PositionSnapshot, BrokerError> {
        self.quote_of(pair)?;
        let (base, quote) = split_pair(pair);
        let book = self.book.lock();
        Ok(PositionSnapshot {
            asset_qty: book.balances.get(base).copied().unwrap_or(0.0),
            quote_qty: book.balances.get(quote).copied().unwrap_or(0.0),
            avg_buy_price: book.avg_buy.get(pair).copied().unwrap_or(0.0),
        })
    }

    fn create_order_market(
        &self,
        side: Side,
        pair: &str,
        quantity: f64,
    ) -> Result<Order, BrokerError> {
        self.quote_of(pair)?;
        if quantity <= 0.0 || !quantity.is_finite() {
            return Err(BrokerError::InvalidQuantity(quantity));
        }

        let (base, quote) = split_pair(pair);
        let mut book = self.book.lock();

        let price = *book
            .marks
            .get(pair)
            .ok_or_else(|| BrokerError::NoMarkPrice(pair.to_string()))?;

        let now = Utc::now();
        let order = match side {
            Side::Bid => {
                // `quantity` is the quote amount to spend; the fee comes out
                // of it before conversion.
                let available = book.balances.get(quote).copied().unwrap_or(0.0);
                if available < quantity {
                    return Err(BrokerError::InsufficientFunds {
                        currency: quote.to_string(),
                        needed: quantity,
                        available,
                    });
                }
                let net_spend = quantity / (1.0 + TAKER_FEE_RATE);
                let filled_qty = net_spend / price;

                let held = book.balances.get(base).copied().unwrap_or(0.0);
                let prior_avg = book.avg_buy.get(pair).copied().unwrap_or(0.0);
                let new_total = held + filled_qty;
                let new_avg = (held * prior_avg + filled_qty * price) / new_total;

                *book.balances.entry(quote.to_string()).or_default() -= quantity;
                *book.balances.entry(base.to_string()).or_default() += filled_qty;
                book.avg_buy.insert(pair.to_string(), new_avg);

                info!(pair, price, spend = quantity, filled_qty, "paper market buy filled");
                Order {
                    exchange_id: Uuid::new_v4().to_string(),
                    pair: pair.to_string(),
                    side,
                    order_type: OrderType::Price,
                    status: OrderStatus::Done,
                    price,
                    quantity: filled_qty,
                    created_at: now,
                    updated_at: now,
                }
            }
            Side::Ask => {
                // `quantity` is the asset volume to sell.
                let held = book.balances.get(base).copied().unwrap_or(0.0);
                if held < quantity {
                    return Err(BrokerError::InsufficientFunds {
                        currency: base.to_string(),
                        needed: quantity,
                        available: held,
                    });
                }
                let proceeds = quantity * price;

                *book.balances.entry(base.to_string()).or_default() -= quantity;
                *book.balances.entry(quote.to_string()).or_default() += proceeds;
                if book.balances.get(base).copied().unwrap_or(0.0) <= f64::EPSILON {
                    book.avg_buy.remove(pair);
                }

                info!(pair, price, sold = quantity, proceeds, "paper market sell filled");
                Order {
                    exchange_id: Uuid::new_v4().to_string(),
                    pair: pair.to_string(),
                    side,
                    order_type: OrderType::Market,
                    status: OrderStatus::Done,
                    price,
                    quantity,
                    created_at: now,
                    updated_at: now,
                }
            }
        };

        Ok(order)
    }
}

impl std::fmt::Debug for PaperBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let book = self.book.lock();
        f.debug_struct("PaperBroker")
            .field("quote_currency", &self.quote_currency)
            .field("balances", &book.balances)
            .finish()
    }
}
