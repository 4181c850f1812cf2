// =============================================================================
// EMA crossover strategy
// =============================================================================
//
// Buys the full quote balance when EMA-8 crosses above SMA-21 and sells the
// full asset position on the cross back under. Intents go onto the order
// bus; execution and dedup happen downstream.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info};
use uuid::Uuid;

use crate::broker::Broker;
use crate::dataframe::Dataframe;
use crate::feed::OrderFeedSubscription;
use crate::indicators;
use crate::strategy::Strategy;
use crate::timeframe::Timeframe;
use crate::types::{Order, OrderStatus, OrderType, Side};

/// Smallest quote balance worth trading (venue minimum order is 5 000 KRW;
/// anything under this is dust).
const MIN_QUOTE_BALANCE: f64 = 10.0;

pub struct CrossEma {
    timeframe: Timeframe,
    order_feed: Arc<OrderFeedSubscription>,
}

impl CrossEma {
    pub fn new(timeframe: Timeframe, order_feed: Arc<OrderFeedSubscription>) -> Self {
        Self {
            timeframe,
            order_feed,
        }
    }

    fn intent(pair: &str, side: Side, order_type: OrderType, quantity: f64) -> Order {
        let now = Utc::now();
        Order {
            // Intents get their own id so the bus can dedup re-published
            // signals; the broker assigns the executed id.
            exchange_id: Uuid::new_v4().to_string(),
            pair: pair.to_string(),
            side,
            order_type,
            status: OrderStatus::Wait,
            // For market buys the venue takes the quote amount in `price`;
            // for sells the asset volume in `quantity`.
            price: if side == Side::Bid { quantity } else { 0.0 },
            quantity: if side == Side::Ask { quantity } else { 0.0 },
            created_at: now,
            updated_at: now,
        }
    }
}

impl Strategy for CrossEma {
    fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    fn warmup_period(&self) -> usize {
        22
    }

    fn indicators(&self, df: &mut Dataframe) {
        let closes = df.close.values();
        df.metadata
            .insert("ema8".into(), indicators::ema(closes, 8).into());
        df.metadata
            .insert("sma21".into(), indicators::sma(closes, 21).into());
    }

    fn on_candle(&self, df: &Dataframe, broker: &dyn Broker) {
        let position = match broker.position(&df.pair) {
            Ok(p) => p,
            Err(e) => {
                error!(pair = %df.pair, error = %e, "position lookup failed");
                return;
            }
        };

        let (Some(fast), Some(slow)) = (df.metadata.get("ema8"), df.metadata.get("sma21"))
        else {
            return;
        };

        if position.quote_qty >= MIN_QUOTE_BALANCE && fast.crossover(slow) {
            info!(pair = %df.pair, spend = position.quote_qty, "bullish cross, buying");
            self.order_feed.publish(Self::intent(
                &df.pair,
                Side::Bid,
                OrderType::Price,
                position.quote_qty,
            ));
            return;
        }

        if position.asset_qty > 0.0 && fast.crossunder(slow) {
            info!(pair = %df.pair, volume = position.asset_qty, "bearish cross, selling");
            self.order_feed.publish(Self::intent(
                &df.pair,
                Side::Ask,
                OrderType::Market,
                position.asset_qty,
            ));
        }
    }
}
