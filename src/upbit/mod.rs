// =============================================================================
// Upbit exchange — REST client + websocket stream + candle aggregation
// =============================================================================
//
// A single struct owns the venue connection: subscription registration hands
// out channel pairs, `start` launches the websocket task (after backfilling
// any mid-bucket aggregator over REST), and `stop` tears everything down in
// an order that makes channel closure safe — cancel, join the producer task,
// then drop the sending halves.

pub mod aggregator;
pub mod client;
pub mod stream;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::FeedError;
use crate::feed::data_feed::CandleStreamProvider;
use crate::timeframe::{next_boundary_kst, Timeframe};
use crate::types::{Candle, FeedKey};

pub use client::UpbitClient;
use stream::{new_slot, AggregatorMap};

/// The venue handle: one websocket connection feeding per-(pair, timeframe)
/// aggregators, plus the public REST client for history and quotes.
pub struct Upbit {
    rest: UpbitClient,
    ws_url: String,
    aggregators: AggregatorMap,
    cancel_tx: watch::Sender<bool>,
    ws_task: Mutex<Option<JoinHandle<()>>>,
}

impl Upbit {
    pub fn new(rest: UpbitClient, ws_url: impl Into<String>) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            rest,
            ws_url: ws_url.into(),
            aggregators: Arc::new(Mutex::new(HashMap::new())),
            cancel_tx,
            ws_task: Mutex::new(None),
        }
    }

    /// The REST client, for history preload and quotes.
    pub fn rest(&self) -> &UpbitClient {
        &self.rest
    }

    /// Proxy for warmup preload: every candle in `[start, end]`, ascending.
    pub async fn candles_by_period(
        &self,
        pair: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        self.rest.candles_by_period(pair, timeframe, start, end).await
    }

    /// Launch the websocket (idempotent) after seeding mid-bucket
    /// aggregators from REST.
    pub async fn start(&self) {
        self.backfill_forming_buckets(Utc::now()).await;

        let mut task = self.ws_task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        let aggregators = self.aggregators.clone();
        let cancel_rx = self.cancel_tx.subscribe();
        let ws_url = self.ws_url.clone();
        *task = Some(tokio::spawn(stream::run_stream(
            ws_url,
            aggregators,
            cancel_rx,
        )));
        info!("websocket task launched");
    }

    /// Tear down: signal cancellation, wait for the websocket task to exit,
    /// then drop the aggregator slots. Senders are dropped strictly after
    /// the producer stops, so receivers observe channel closure without any
    /// concurrent send.
    pub async fn stop(&self) {
        let _ = self.cancel_tx.send(true);

        let task = self.ws_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "websocket task join failed");
            }
        }

        self.aggregators.lock().clear();
        info!("upbit stopped");
    }

    /// For every freshly registered aggregator whose wall-clock position is
    /// inside a partially elapsed bucket, pin the bucket to `now` and replay
    /// the elapsed portion from REST as incomplete ticks, so the first live
    /// bar is not missing its opening seconds.
    async fn backfill_forming_buckets(&self, now: DateTime<Utc>) {
        let targets: Vec<(FeedKey, DateTime<Utc>)> = {
            let mut map = self.aggregators.lock();
            map.iter_mut()
                .filter(|(key, slot)| {
                    !key.timeframe.is_raw() && slot.state.is_unanchored()
                })
                .map(|(key, slot)| {
                    slot.state.anchor(now);
                    let bucket_close = next_boundary_kst(now, key.timeframe.duration());
                    (key.clone(), bucket_close - key.timeframe.duration())
                })
                .filter(|(_, bucket_start)| *bucket_start < now)
                .collect()
        };

        for (key, bucket_start) in targets {
            match self
                .rest
                .candles_by_period(&key.pair, key.timeframe, bucket_start, now)
                .await
            {
                Ok(candles) => {
                    let count = candles.len();
                    let mut map = self.aggregators.lock();
                    if let Some(slot) = map.get_mut(&key) {
                        for mut candle in candles {
                            candle.complete = false;
                            slot.state.push(candle);
                        }
                    }
                    info!(feed = %key, count, "forming bucket backfilled");
                }
                Err(e) => warn!(feed = %key, error = %e, "backfill fetch failed (ignored)"),
            }
        }
    }
}

impl CandleStreamProvider for Upbit {
    /// Register (or replace) the aggregator for `(pair, timeframe)` and hand
    /// back its bar/error channels. Called once per feed key by the
    /// data-feed registry before the stream starts.
    fn candles_subscription(
        &self,
        pair: &str,
        timeframe: Timeframe,
    ) -> (mpsc::Receiver<Candle>, mpsc::Receiver<FeedError>) {
        let key = FeedKey::new(pair.to_uppercase(), timeframe);
        let (slot, bar_rx, err_rx) = new_slot(&key);

        let mut map = self.aggregators.lock();
        if map.insert(key.clone(), slot).is_some() {
            warn!(feed = %key, "existing candle subscription replaced");
        }
        info!(feed = %key, "candle subscription registered");
        (bar_rx, err_rx)
    }
}

impl std::fmt::Debug for Upbit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upbit")
            .field("ws_url", &self.ws_url)
            .field("feeds", &self.aggregators.lock().len())
            .finish()
    }
}
