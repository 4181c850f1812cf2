// =============================================================================
// Engine — composition root for the live trading pipeline
// =============================================================================
//
// Wires venue -> data feed -> {strategy controller, chart, mark updater} and
// strategy -> order bus -> broker consumer -> chart. Flow: new ->
// setup_subscriptions -> start -> (run) -> stop.

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{error, info, warn};

use crate::broker::PaperBroker;
use crate::chart::{self, ChartSink, ChartStore};
use crate::config::Settings;
use crate::consumer::{DataFeedConsumer, MarkPriceUpdater, OrderFeedConsumerBroker};
use crate::feed::{DataFeedSubscription, OrderFeedSubscription};
use crate::strategy::{CrossEma, Strategy, StrategyController};
use crate::timeframe::Timeframe;
use crate::types::Order;
use crate::upbit::{Upbit, UpbitClient};

pub struct Engine {
    settings: Settings,
    timeframe: Timeframe,
    warmup: usize,
    exchange: Arc<Upbit>,
    data_feed: DataFeedSubscription,
    order_feed: Arc<OrderFeedSubscription>,
    controller: Arc<StrategyController>,
    broker: Arc<PaperBroker>,
    chart: Arc<ChartStore>,
}

impl Engine {
    pub fn new(settings: Settings) -> Result<Self> {
        let timeframe = Timeframe::from_str(&settings.timeframe)
            .with_context(|| format!("bad timeframe '{}'", settings.timeframe))?;
        anyhow::ensure!(!settings.pairs.is_empty(), "at least one pair is required");

        let exchange = Arc::new(Upbit::new(
            UpbitClient::new(settings.rest_url.clone()),
            settings.ws_url.clone(),
        ));
        let data_feed = DataFeedSubscription::new(exchange.clone());
        let order_feed = Arc::new(OrderFeedSubscription::new());
        let broker = Arc::new(PaperBroker::new(
            settings.quote_currency.clone(),
            settings.paper_balance,
        ));
        let chart = Arc::new(ChartStore::new());

        let strategy = Arc::new(CrossEma::new(timeframe, order_feed.clone()));
        let warmup = strategy.warmup_period();
        let controller = Arc::new(StrategyController::new(
            settings.pairs[0].clone(),
            strategy,
            broker.clone(),
            chart.clone(),
        ));

        Ok(Self {
            settings,
            timeframe,
            warmup,
            exchange,
            data_feed,
            order_feed,
            controller,
            broker,
            chart,
        })
    }

    /// Register all consumers and preload the warmup history.
    pub async fn setup_subscriptions(&mut self) {
        let pair = self.settings.pairs[0].clone();

        // Decision path sees final bars only; the mark updater wants every
        // partial for fresh fill prices.
        self.data_feed.subscribe(
            &pair,
            self.timeframe,
            Arc::new(DataFeedConsumer::new(
                self.controller.clone(),
                self.chart.clone(),
            )),
            true,
        );
        self.data_feed.subscribe(
            &pair,
            self.timeframe,
            Arc::new(MarkPriceUpdater::new(self.broker.clone())),
            false,
        );

        // Order path: intents -> broker, fills -> chart.
        let order_consumer = OrderFeedConsumerBroker::new(self.broker.clone());
        let chart = self.chart.clone();
        order_consumer.add_order_executed_callback(Box::new(
            move |order: &Order, err| {
                if err.is_none() {
                    chart.on_order(order);
                }
            },
        ));
        self.order_feed.subscribe(&pair, Arc::new(order_consumer));

        // Warmup preload: the trailing `warmup` buckets from REST.
        if self.timeframe.is_raw() {
            info!("raw timeframe, skipping warmup preload");
            return;
        }
        let end = Utc::now();
        let start = end - self.timeframe.duration() * self.warmup as i32;
        info!(%pair, timeframe = %self.timeframe, warmup = self.warmup, "preloading history");

        match self
            .exchange
            .candles_by_period(&pair, self.timeframe, start, end)
            .await
        {
            Ok(candles) => {
                info!(count = candles.len(), "warmup candles loaded");
                self.data_feed.preload(&pair, self.timeframe, candles);
            }
            Err(e) => error!(error = %e, "failed to load warmup candles"),
        }
    }

    /// Start everything: venue stream, chart API, dispatch loops, decision
    /// callback.
    pub async fn start(&mut self) {
        info!("engine starting");

        // Seed paper fill prices before any order can fire.
        for pair in &self.settings.pairs {
            match self.exchange.rest().last_quote(pair).await {
                Ok(price) => self.broker.set_mark(pair, price),
                Err(e) => warn!(%pair, error = %e, "could not seed mark price"),
            }
        }

        if !self.settings.chart_addr.is_empty() {
            let store = self.chart.clone();
            let addr = self.settings.chart_addr.clone();
            tokio::spawn(async move {
                if let Err(e) = chart::server::serve(store, &addr).await {
                    error!(error = %e, "chart API server exited");
                }
            });
        }

        // Dispatch first: starting the feed registers every aggregator, so
        // the websocket handshake that follows lists the full pair set.
        self.data_feed.start(false).await;
        self.order_feed.start();
        self.exchange.start().await;
        self.controller.start();

        info!("engine started");
    }

    /// Ordered shutdown: stop fan-out, then the bus, then the venue stream.
    pub async fn stop(&mut self) {
        info!("engine stopping");
        self.controller.stop();
        self.data_feed.stop().await;
        self.order_feed.stop().await;
        self.exchange.stop().await;
        info!("engine stopped");
    }
}
