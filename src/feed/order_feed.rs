// =============================================================================
// Order feed bus — distributes outbound trade intents to subscribers
// =============================================================================
//
// Lifecycle: new -> subscribe -> start -> publish.
//
// Each pair gets a buffered channel so publish latency is decoupled from
// dispatch latency. Delivery to subscribers is sequential and in publish
// order; per-subscriber duplicate suppression keys on the order's exchange
// id. Ordering is preserved at the cost of head-of-line blocking when a
// consumer is slow — an accepted property, not a defect.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::types::Order;

/// Buffered capacity per pair: publishing never blocks the strategy path.
const ORDER_CHANNEL_CAPACITY: usize = 100;

/// A consumer capability for order feeds.
pub trait OrderConsumer: Send + Sync {
    fn on_order(&self, order: Order);
}

struct OrderSubscription {
    consumer: Arc<dyn OrderConsumer>,
    /// Exchange id of the last order delivered to this subscriber. Dedup is
    /// per-subscriber: the same order legitimately reaches each subscriber
    /// once.
    last_delivered_id: Option<String>,
}

struct OrderFeedEntry {
    tx: mpsc::Sender<Order>,
    /// Taken by the drain task at start.
    rx: Option<mpsc::Receiver<Order>>,
    subscribers: Arc<Mutex<Vec<OrderSubscription>>>,
}

/// Per-pair order intent bus.
pub struct OrderFeedSubscription {
    feeds: Mutex<HashMap<String, OrderFeedEntry>>,
    cancel_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl Default for OrderFeedSubscription {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderFeedSubscription {
    pub fn new() -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            feeds: Mutex::new(HashMap::new()),
            cancel_tx,
            tasks: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
        }
    }

    /// Register `consumer` for `pair`, lazily creating the pair's channel.
    pub fn subscribe(&self, pair: &str, consumer: Arc<dyn OrderConsumer>) {
        let mut feeds = self.feeds.lock();
        let entry = feeds.entry(pair.to_string()).or_insert_with(|| {
            let (tx, rx) = mpsc::channel(ORDER_CHANNEL_CAPACITY);
            OrderFeedEntry {
                tx,
                rx: Some(rx),
                subscribers: Arc::new(Mutex::new(Vec::new())),
            }
        });
        entry.subscribers.lock().push(OrderSubscription {
            consumer,
            last_delivered_id: None,
        });
    }

    /// Queue an order for delivery. Non-blocking: dropped with a warning
    /// when the bus is stopped, the pair is unknown, or the buffer is full.
    pub fn publish(&self, order: Order) {
        if self.stopped.load(Ordering::SeqCst) {
            debug!(pair = %order.pair, "publish after stop dropped");
            return;
        }

        let feeds = self.feeds.lock();
        let Some(entry) = feeds.get(&order.pair) else {
            debug!(pair = %order.pair, "publish for pair without subscribers dropped");
            return;
        };

        match entry.tx.try_send(order) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(order)) => {
                warn!(pair = %order.pair, "order channel full, intent dropped");
            }
            Err(mpsc::error::TrySendError::Closed(order)) => {
                debug!(pair = %order.pair, "order channel closed, intent dropped");
            }
        }
    }

    /// Spawn one drain task per known pair.
    pub fn start(&self) {
        let mut feeds = self.feeds.lock();
        let mut tasks = self.tasks.lock();

        for (pair, entry) in feeds.iter_mut() {
            let Some(rx) = entry.rx.take() else {
                continue; // already started
            };
            let subscribers = entry.subscribers.clone();
            let cancel_rx = self.cancel_tx.subscribe();
            tasks.push(tokio::spawn(drain_loop(
                pair.clone(),
                rx,
                subscribers,
                cancel_rx,
            )));
        }

        info!(pairs = tasks.len(), "order feed running");
    }

    /// Signal cancellation and join the drain tasks. Subscribers are never
    /// invoked after this returns.
    pub async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let _ = self.cancel_tx.send(true);

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
        info!("order feed stopped");
    }
}

async fn drain_loop(
    pair: String,
    mut rx: mpsc::Receiver<Order>,
    subscribers: Arc<Mutex<Vec<OrderSubscription>>>,
    mut cancel_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = cancel_rx.changed() => {
                return;
            }
            maybe_order = rx.recv() => {
                let Some(order) = maybe_order else {
                    return;
                };
                deliver_to_subscribers(&pair, &subscribers, order);
            }
        }
    }
}

/// Deliver one order to every subscriber of `pair`, in registration order,
/// skipping subscribers that already received this exchange id.
fn deliver_to_subscribers(
    pair: &str,
    subscribers: &Mutex<Vec<OrderSubscription>>,
    order: Order,
) {
    let mut subs = subscribers.lock();
    for sub in subs.iter_mut() {
        if sub.last_delivered_id.as_deref() == Some(order.exchange_id.as_str()) {
            debug!(pair, exchange_id = %order.exchange_id, "duplicate delivery suppressed");
            continue;
        }
        sub.last_delivered_id = Some(order.exchange_id.clone());
        sub.consumer.on_order(order.clone());
    }
}
