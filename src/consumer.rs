// =============================================================================
// Feed consumers — the glue between feeds, controller, broker, and chart
// =============================================================================

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::broker::{Broker, PaperBroker};
use crate::chart::ChartSink;
use crate::error::{BrokerError, FeedError};
use crate::feed::{BarConsumer, OrderConsumer};
use crate::strategy::StrategyController;
use crate::types::{Candle, Order, OrderType, Side};

// ---------------------------------------------------------------------------
// Bar consumers
// ---------------------------------------------------------------------------

/// Routes closed bars into the strategy controller and the chart store.
pub struct DataFeedConsumer {
    controller: Arc<StrategyController>,
    chart: Arc<dyn ChartSink>,
}

impl DataFeedConsumer {
    pub fn new(controller: Arc<StrategyController>, chart: Arc<dyn ChartSink>) -> Self {
        Self { controller, chart }
    }
}

impl BarConsumer for DataFeedConsumer {
    fn on_bar(&self, candle: Candle) {
        self.chart.on_bar(&candle);
        self.controller.on_candle(candle);
    }

    fn on_feed_error(&self, error: &FeedError) {
        // Stream-level failures require operator action (restart); surface
        // them loudly but keep the accumulated window intact.
        error!(error = %error, "data feed error reached strategy consumer");
    }
}

/// Keeps the paper broker's fill price fresh from every bar, partials
/// included.
pub struct MarkPriceUpdater {
    broker: Arc<PaperBroker>,
}

impl MarkPriceUpdater {
    pub fn new(broker: Arc<PaperBroker>) -> Self {
        Self { broker }
    }
}

impl BarConsumer for MarkPriceUpdater {
    fn on_bar(&self, candle: Candle) {
        self.broker.set_mark(&candle.pair, candle.close);
    }
}

// ---------------------------------------------------------------------------
// Order consumer
// ---------------------------------------------------------------------------

/// Callback invoked after an execution attempt: the executed order on
/// success, the original intent plus the error on failure.
pub type OrderExecutedCallback = Box<dyn Fn(&Order, Option<&BrokerError>) + Send + Sync>;

/// Executes order intents against the broker and fans the outcome out to
/// registered callbacks. Failures are surfaced, never retried.
pub struct OrderFeedConsumerBroker {
    broker: Arc<dyn Broker>,
    callbacks: Mutex<Vec<OrderExecutedCallback>>,
}

impl OrderFeedConsumerBroker {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            broker,
            callbacks: Mutex::new(Vec::new()),
        }
    }

    pub fn add_order_executed_callback(&self, callback: OrderExecutedCallback) {
        self.callbacks.lock().push(callback);
    }

    fn notify(&self, order: &Order, error: Option<&BrokerError>) {
        for callback in self.callbacks.lock().iter() {
            callback(order, error);
        }
    }
}

impl OrderConsumer for OrderFeedConsumerBroker {
    fn on_order(&self, order: Order) {
        info!(
            pair = %order.pair,
            side = %order.side,
            order_type = %order.order_type,
            "order intent received"
        );

        // Market buys carry the quote amount in `price`, market sells the
        // asset volume in `quantity` (venue semantics).
        let result = match (order.side, order.order_type) {
            (Side::Bid, OrderType::Price) => {
                self.broker
                    .create_order_market(Side::Bid, &order.pair, order.price)
            }
            (Side::Ask, OrderType::Market) => {
                self.broker
                    .create_order_market(Side::Ask, &order.pair, order.quantity)
            }
            (side, order_type) => {
                warn!(%side, %order_type, "unsupported order intent");
                Err(BrokerError::UnsupportedOrderType { side, order_type })
            }
        };

        match result {
            Ok(executed) => self.notify(&executed, None),
            Err(e) => {
                error!(pair = %order.pair, error = %e, "order execution failed");
                self.notify(&order, Some(&e));
            }
        }
    }
}
