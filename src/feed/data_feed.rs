// =============================================================================
// Data feed registry — binds candle streams to named feeds and fans bars out
// =============================================================================
//
// Lifecycle: new -> subscribe -> preload -> start (connect) -> stop.
//
// One dispatch task per (pair, timeframe) selects between that feed's bar
// channel, its error channel, and the shared cancellation signal. Consumers
// run synchronously on the dispatch task: a slow consumer stalls its own
// feed only, and — because the bar channel is effectively unbuffered —
// eventually backpressures the websocket read loop.
//
// Shutdown is drain-gated: `stop` signals cancellation and then joins every
// dispatch task, so no consumer runs after it returns and the channel ends
// are dropped only once their loops have exited.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::FeedError;
use crate::timeframe::Timeframe;
use crate::types::{Candle, FeedKey};

/// A consumer capability for bar feeds. Errors arrive through their own
/// typed hook rather than as marker candles; implementations that only care
/// about bars keep the default no-op.
pub trait BarConsumer: Send + Sync {
    fn on_bar(&self, candle: Candle);

    fn on_feed_error(&self, error: &FeedError) {
        let _ = error;
    }
}

/// Source of live candle streams. Implemented by the exchange; tests inject
/// channel-backed fakes.
pub trait CandleStreamProvider: Send + Sync {
    fn candles_subscription(
        &self,
        pair: &str,
        timeframe: Timeframe,
    ) -> (mpsc::Receiver<Candle>, mpsc::Receiver<FeedError>);
}

struct DataSubscription {
    close_only: bool,
    consumer: Arc<dyn BarConsumer>,
}

/// Registry of candle feeds and their subscribers.
pub struct DataFeedSubscription {
    provider: Arc<dyn CandleStreamProvider>,
    /// Feed keys in subscription order; dispatch order within a feed follows
    /// subscriber insertion order (deterministic for tests).
    feeds: Vec<FeedKey>,
    channels: HashMap<FeedKey, (mpsc::Receiver<Candle>, mpsc::Receiver<FeedError>)>,
    subscriptions: HashMap<FeedKey, Vec<DataSubscription>>,
    cancel_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl DataFeedSubscription {
    pub fn new(provider: Arc<dyn CandleStreamProvider>) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            provider,
            feeds: Vec::new(),
            channels: HashMap::new(),
            subscriptions: HashMap::new(),
            cancel_tx,
            tasks: Vec::new(),
        }
    }

    /// Register `consumer` for `(pair, timeframe)`. With `close_only` set
    /// the consumer receives final bars only.
    pub fn subscribe(
        &mut self,
        pair: &str,
        timeframe: Timeframe,
        consumer: Arc<dyn BarConsumer>,
        close_only: bool,
    ) {
        let key = FeedKey::new(pair, timeframe);
        if !self.feeds.contains(&key) {
            self.feeds.push(key.clone());
        }
        self.subscriptions
            .entry(key)
            .or_default()
            .push(DataSubscription {
                close_only,
                consumer,
            });
    }

    /// Deliver a historical batch synchronously to the current subscribers
    /// of `(pair, timeframe)`, before live dispatch starts. Historical data
    /// is closed by definition: every bar is forced `complete`.
    pub fn preload(&self, pair: &str, timeframe: Timeframe, mut candles: Vec<Candle>) {
        let key = FeedKey::new(pair, timeframe);
        info!(feed = %key, count = candles.len(), "preloading candles");

        for candle in &mut candles {
            candle.complete = true;
        }

        let Some(subs) = self.subscriptions.get(&key) else {
            return;
        };
        for candle in candles {
            for sub in subs {
                if sub.close_only && !candle.complete {
                    continue;
                }
                sub.consumer.on_bar(candle.clone());
            }
        }
    }

    /// Open the underlying stream for every known feed key and take its
    /// channel pair.
    pub fn connect(&mut self) {
        info!("connecting data feeds");
        for key in &self.feeds {
            if self.channels.contains_key(key) {
                continue;
            }
            let channels = self
                .provider
                .candles_subscription(&key.pair, key.timeframe);
            self.channels.insert(key.clone(), channels);
        }
    }

    /// Connect, then spawn one dispatch task per feed. With `blocking` set
    /// the call waits for every dispatch task to exit (normally only at
    /// shutdown).
    pub async fn start(&mut self, blocking: bool) {
        self.connect();

        for key in self.feeds.clone() {
            let Some((bar_rx, err_rx)) = self.channels.remove(&key) else {
                warn!(feed = %key, "feed has no channels, skipping");
                continue;
            };
            let subscribers: Vec<DataSubscription> = self
                .subscriptions
                .get(&key)
                .map(|subs| {
                    subs.iter()
                        .map(|s| DataSubscription {
                            close_only: s.close_only,
                            consumer: s.consumer.clone(),
                        })
                        .collect()
                })
                .unwrap_or_default();

            let cancel_rx = self.cancel_tx.subscribe();
            self.tasks.push(tokio::spawn(dispatch_loop(
                key,
                bar_rx,
                err_rx,
                subscribers,
                cancel_rx,
            )));
        }

        info!(feeds = self.tasks.len(), "data feed dispatch running");

        if blocking {
            for task in self.tasks.drain(..) {
                let _ = task.await;
            }
        }
    }

    /// Signal cancellation and join every dispatch task.
    pub async fn stop(&mut self) {
        let _ = self.cancel_tx.send(true);
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        info!("data feed stopped");
    }
}

/// Per-feed dispatch: deliver bars (respecting close-only), surface typed
/// errors to every subscriber, exit on cancellation or channel closure.
async fn dispatch_loop(
    key: FeedKey,
    mut bar_rx: mpsc::Receiver<Candle>,
    mut err_rx: mpsc::Receiver<FeedError>,
    subscribers: Vec<DataSubscription>,
    mut cancel_rx: watch::Receiver<bool>,
) {
    let mut errors_open = true;
    loop {
        tokio::select! {
            _ = cancel_rx.changed() => {
                return;
            }

            bar = bar_rx.recv() => {
                let Some(candle) = bar else {
                    // Producer dropped its sender: the stream is gone.
                    return;
                };
                for sub in &subscribers {
                    if sub.close_only && !candle.complete {
                        continue;
                    }
                    sub.consumer.on_bar(candle.clone());
                }
            }

            maybe_err = err_rx.recv(), if errors_open => {
                match maybe_err {
                    Some(err) => {
                        error!(feed = %key, error = %err, "feed error");
                        for sub in &subscribers {
                            sub.consumer.on_feed_error(&err);
                        }
                    }
                    None => errors_open = false,
                }
            }
        }
    }
}
