// =============================================================================
// Upbit WebSocket stream — 1-second candles with keepalive and bounded retry
// =============================================================================
//
// One task owns the connection. On every (re)connect it sends the subscribe
// handshake for all currently registered pairs, then loops reading frames
// under a read deadline while a ping is written at a fixed interval. Read
// failures retry the full connect+subscribe sequence up to a bound; the
// exhausted bound (and any dial failure) is broadcast as a terminal error to
// every aggregator's error channel.
//
// The aggregator map is shared with subscription setup and guarded by a
// mutex. The lock is never held across an await: outgoing bars are collected
// under the lock and sent afterwards, so channel backpressure stalls the read
// loop without stalling the lock.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::aggregator::CandleAggregator;
use crate::error::FeedError;
use crate::types::{Candle, FeedKey};

/// Bounded reconnect budget for read failures.
const MAX_WS_RETRIES: u32 = 2;
/// Fixed backoff between reconnect attempts.
const RETRY_BACKOFF: std::time::Duration = std::time::Duration::from_secs(1);
/// Ping write cadence.
const PING_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);
/// The venue drops silent connections after 120 seconds; a read exceeding
/// this deadline is treated as a dead connection.
const READ_DEADLINE: std::time::Duration = std::time::Duration::from_secs(120);

/// Message type selector for the 1-second candle stream.
const CANDLE_1S: &str = "candle.1s";

/// Bar channels carry capacity 1 — the closest analogue of an unbuffered
/// channel. A stalled consumer backpressures the read loop until the read
/// deadline tears the connection down; widening this silently would change
/// those semantics.
const BAR_CHANNEL_CAPACITY: usize = 1;
/// Error channels are small and drained rarely; sends are non-blocking.
const ERR_CHANNEL_CAPACITY: usize = 8;

// ---------------------------------------------------------------------------
// Shared aggregator registry
// ---------------------------------------------------------------------------

/// One registered (pair, timeframe) feed: aggregation state plus the sending
/// halves of its bar/error channels. The receiving halves are handed to the
/// data-feed registry at subscription time.
pub(crate) struct AggregatorSlot {
    pub state: CandleAggregator,
    pub bar_tx: mpsc::Sender<Candle>,
    pub err_tx: mpsc::Sender<FeedError>,
}

/// Registry shared between the read loop and subscription setup.
pub(crate) type AggregatorMap = Arc<Mutex<HashMap<FeedKey, AggregatorSlot>>>;

/// Create a slot and hand back the consumer ends of its channels.
pub(crate) fn new_slot(
    key: &FeedKey,
) -> (AggregatorSlot, mpsc::Receiver<Candle>, mpsc::Receiver<FeedError>) {
    let (bar_tx, bar_rx) = mpsc::channel(BAR_CHANNEL_CAPACITY);
    let (err_tx, err_rx) = mpsc::channel(ERR_CHANNEL_CAPACITY);
    let slot = AggregatorSlot {
        state: CandleAggregator::new(key.pair.clone(), key.timeframe),
        bar_tx,
        err_tx,
    };
    (slot, bar_rx, err_rx)
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Envelope checked before type-specific parsing. The venue reports protocol
/// errors as a top-level `error` object on an otherwise ordinary message.
#[derive(Debug, Deserialize)]
struct WsEnvelope {
    #[serde(default)]
    error: Option<WsErrorBody>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WsErrorBody {
    name: String,
    message: String,
}

/// A `candle.1s` payload.
#[derive(Debug, Deserialize)]
struct WsCandle {
    code: String,
    candle_date_time_kst: String,
    opening_price: f64,
    high_price: f64,
    low_price: f64,
    trade_price: f64,
    candle_acc_trade_volume: f64,
}

// ---------------------------------------------------------------------------
// Connection loop
// ---------------------------------------------------------------------------

/// Run the websocket until cancellation or a terminal failure.
///
/// Dial failures are fatal immediately; read failures (including deadline
/// expiry and stream end) consume the shared retry budget before becoming
/// terminal. Terminal failures are broadcast to every registered aggregator.
pub(crate) async fn run_stream(
    ws_url: String,
    aggregators: AggregatorMap,
    mut cancel: watch::Receiver<bool>,
) {
    let mut retries: u32 = 0;

    'connect: loop {
        if *cancel.borrow() {
            return;
        }

        let (ws, _response) = match connect_async(&ws_url).await {
            Ok(conn) => conn,
            Err(e) => {
                error!(error = %e, "websocket dial failed");
                broadcast_error(&aggregators, FeedError::Dial(e.to_string()));
                return;
            }
        };
        info!(url = %ws_url, "websocket connected");

        let (mut write, mut read) = ws.split();

        let handshake = subscribe_payload(&aggregators);
        if let Err(e) = write.send(Message::Text(handshake)).await {
            error!(error = %e, "subscribe handshake write failed");
            broadcast_error(&aggregators, FeedError::Dial(e.to_string()));
            return;
        }

        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.changed() => {
                    let _ = write.send(Message::Close(None)).await;
                    info!("websocket cancelled, closing");
                    return;
                }

                _ = ping.tick() => {
                    if let Err(e) = write.send(Message::Ping(b"ping".to_vec())).await {
                        // A ping that cannot be written means the connection
                        // is gone; handled like a read failure.
                        warn!(error = %e, "ping write failed");
                        if retries < MAX_WS_RETRIES {
                            retries += 1;
                            warn!(attempt = retries, "reconnecting after ping failure");
                            tokio::time::sleep(RETRY_BACKOFF).await;
                            continue 'connect;
                        }
                        broadcast_error(&aggregators, FeedError::Keepalive(e.to_string()));
                        return;
                    }
                }

                next = tokio::time::timeout(READ_DEADLINE, read.next()) => {
                    let failure = match next {
                        Ok(Some(Ok(Message::Text(text)))) => {
                            handle_message(text.as_bytes(), &aggregators).await;
                            None
                        }
                        Ok(Some(Ok(Message::Binary(bytes)))) => {
                            handle_message(&bytes, &aggregators).await;
                            None
                        }
                        Ok(Some(Ok(Message::Close(frame)))) => {
                            warn!(?frame, "websocket closed by venue");
                            Some("closed by venue".to_string())
                        }
                        // Pongs and pings refresh the deadline simply by
                        // arriving; tungstenite answers pings itself.
                        Ok(Some(Ok(_))) => None,
                        Ok(Some(Err(e))) => Some(e.to_string()),
                        Ok(None) => Some("stream ended".to_string()),
                        Err(_elapsed) => Some("read deadline exceeded".to_string()),
                    };

                    if let Some(message) = failure {
                        error!(%message, "websocket read failure");
                        if retries < MAX_WS_RETRIES {
                            retries += 1;
                            warn!(attempt = retries, "reconnecting");
                            tokio::time::sleep(RETRY_BACKOFF).await;
                            continue 'connect;
                        }
                        broadcast_error(
                            &aggregators,
                            FeedError::Read { retries, message },
                        );
                        return;
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Message handling
// ---------------------------------------------------------------------------

/// Parse one frame and route the tick into every aggregator registered for
/// its pair. Malformed frames are logged and dropped; venue error envelopes
/// are broadcast without touching the connection.
async fn handle_message(raw: &[u8], aggregators: &AggregatorMap) {
    let envelope: WsEnvelope = match serde_json::from_slice(raw) {
        Ok(env) => env,
        Err(e) => {
            warn!(error = %e, "undecodable websocket frame dropped");
            return;
        }
    };

    if let Some(body) = envelope.error {
        error!(name = %body.name, message = %body.message, "venue reported error");
        broadcast_error(
            aggregators,
            FeedError::Protocol {
                name: body.name,
                message: body.message,
            },
        );
        return;
    }

    if envelope.kind.as_deref() != Some(CANDLE_1S) {
        return;
    }

    let raw_candle: WsCandle = match serde_json::from_slice(raw) {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "malformed candle frame dropped");
            return;
        }
    };

    let tick = match candle_from_ws(raw_candle) {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "candle frame with bad timestamp dropped");
            return;
        }
    };

    // One tick may feed several timeframes of the same pair. Aggregate under
    // the lock, send after releasing it.
    let mut outgoing: Vec<(mpsc::Sender<Candle>, Candle)> = Vec::new();
    {
        let mut map = aggregators.lock();
        for (key, slot) in map.iter_mut() {
            if !key.pair.eq_ignore_ascii_case(&tick.pair) {
                continue;
            }
            let outcome = slot.state.push(tick.clone());

            // Zero-volume bars (empty buckets, stale-tick partials) are
            // suppressed here so sparse pairs do not emit ghost bars.
            if let Some(partial) = outcome.partial {
                if partial.volume > 0.0 {
                    outgoing.push((slot.bar_tx.clone(), partial));
                }
            }
            if let Some(finalized) = outcome.finalized {
                if finalized.volume > 0.0 {
                    outgoing.push((slot.bar_tx.clone(), finalized));
                }
            }
        }
    }

    for (tx, bar) in outgoing {
        if tx.send(bar).await.is_err() {
            debug!("bar receiver dropped, discarding");
        }
    }
}

fn candle_from_ws(raw: WsCandle) -> anyhow::Result<Candle> {
    let time = super::client::parse_kst_time(&raw.candle_date_time_kst)?;
    Ok(Candle {
        pair: raw.code,
        time,
        updated_at: time,
        open: raw.opening_price,
        high: raw.high_price,
        low: raw.low_price,
        close: raw.trade_price,
        volume: raw.candle_acc_trade_volume,
        complete: true,
        metadata: Default::default(),
    })
}

/// The ordered subscribe handshake: session ticket, type selector with the
/// currently known pairs, format directive.
fn subscribe_payload(aggregators: &AggregatorMap) -> String {
    let codes: BTreeSet<String> = aggregators
        .lock()
        .keys()
        .map(|key| key.pair.to_uppercase())
        .collect();
    let codes: Vec<String> = codes.into_iter().collect();

    serde_json::json!([
        { "ticket": Uuid::new_v4().to_string() },
        { "type": CANDLE_1S, "codes": codes },
        { "format": "DEFAULT" },
    ])
    .to_string()
}

/// Fan a stream-level error into every aggregator's error channel. One
/// physical connection feeds them all, so a terminal failure is a
/// whole-stream fact. Sends are non-blocking; a full error channel drops.
fn broadcast_error(aggregators: &AggregatorMap, error: FeedError) {
    let txs: Vec<mpsc::Sender<FeedError>> = aggregators
        .lock()
        .values()
        .map(|slot| slot.err_tx.clone())
        .collect();

    for tx in txs {
        let _ = tx.try_send(error.clone());
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeframe::Timeframe;

    fn registry_with(keys: &[FeedKey]) -> (AggregatorMap, Vec<(mpsc::Receiver<Candle>, mpsc::Receiver<FeedError>)>) {
        let map: AggregatorMap = Arc::new(Mutex::new(HashMap::new()));
        let mut receivers = Vec::new();
        for key in keys {
            let (slot, bar_rx, err_rx) = new_slot(key);
            map.lock().insert(key.clone(), slot);
            receivers.push((bar_rx, err_rx));
        }
        (map, receivers)
    }

    fn candle_frame(code: &str, kst_time: &str, close: f64, volume: f64) -> String {
        format!(
            r#"{{"type":"candle.1s","code":"{code}","candle_date_time_utc":"x","candle_date_time_kst":"{kst_time}","opening_price":{close},"high_price":{close},"low_price":{close},"trade_price":{close},"candle_acc_trade_volume":{volume},"timestamp":0,"stream_type":"REALTIME"}}"#
        )
    }

    #[test]
    fn subscribe_payload_lists_all_pairs_once() {
        let (map, _rx) = registry_with(&[
            FeedKey::new("KRW-BTC", Timeframe::M1),
            FeedKey::new("KRW-BTC", Timeframe::M5),
            FeedKey::new("KRW-DOGE", Timeframe::M1),
        ]);
        let payload = subscribe_payload(&map);
        let parsed: serde_json::Value = serde_json::from_str(&payload).unwrap();

        assert!(parsed[0]["ticket"].is_string());
        assert_eq!(parsed[1]["type"], "candle.1s");
        let codes = parsed[1]["codes"].as_array().unwrap();
        assert_eq!(codes.len(), 2);
        assert!(codes.contains(&serde_json::json!("KRW-BTC")));
        assert!(codes.contains(&serde_json::json!("KRW-DOGE")));
        assert_eq!(parsed[2]["format"], "DEFAULT");
    }

    #[tokio::test]
    async fn tick_feeds_every_timeframe_of_its_pair() {
        let (map, mut receivers) = registry_with(&[
            FeedKey::new("KRW-DOGE", Timeframe::S1),
            FeedKey::new("KRW-DOGE", Timeframe::M1),
            FeedKey::new("KRW-BTC", Timeframe::S1),
        ]);

        let frame = candle_frame("KRW-DOGE", "2025-01-12T13:00:05", 100.0, 2.0);
        handle_message(frame.as_bytes(), &map).await;

        // Raw feed passes the tick straight through.
        let bar = receivers[0].0.try_recv().expect("raw bar");
        assert!((bar.close - 100.0).abs() < f64::EPSILON);

        // The 1m feed has a first (partial-empty) fold suppressed, so nothing
        // arrives until the bucket accumulates a prior tick.
        assert!(receivers[1].0.try_recv().is_err());

        // The other pair sees nothing.
        assert!(receivers[2].0.try_recv().is_err());
    }

    #[tokio::test]
    async fn partial_bar_flows_after_second_tick() {
        let (map, mut receivers) =
            registry_with(&[FeedKey::new("KRW-DOGE", Timeframe::M1)]);

        handle_message(
            candle_frame("KRW-DOGE", "2025-01-12T13:00:05", 100.0, 2.0).as_bytes(),
            &map,
        )
        .await;
        handle_message(
            candle_frame("KRW-DOGE", "2025-01-12T13:00:10", 101.0, 3.0).as_bytes(),
            &map,
        )
        .await;

        let partial = receivers[0].0.try_recv().expect("partial bar");
        assert!(!partial.complete);
        assert!((partial.volume - 2.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn error_envelope_broadcasts_to_all_feeds() {
        let (map, mut receivers) = registry_with(&[
            FeedKey::new("KRW-BTC", Timeframe::M1),
            FeedKey::new("KRW-DOGE", Timeframe::M1),
        ]);

        let frame = r#"{"error":{"name":"INVALID_AUTH","message":"bad ticket"}}"#;
        handle_message(frame.as_bytes(), &map).await;

        for (_, err_rx) in receivers.iter_mut() {
            match err_rx.try_recv().expect("broadcast error") {
                FeedError::Protocol { name, .. } => assert_eq!(name, "INVALID_AUTH"),
                other => panic!("unexpected error: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn malformed_frame_is_dropped_silently() {
        let (map, mut receivers) =
            registry_with(&[FeedKey::new("KRW-BTC", Timeframe::S1)]);

        handle_message(b"{not json", &map).await;
        handle_message(br#"{"type":"ticker","code":"KRW-BTC"}"#, &map).await;
        handle_message(
            br#"{"type":"candle.1s","code":"KRW-BTC","candle_date_time_kst":"garbage"}"#,
            &map,
        )
        .await;

        assert!(receivers[0].0.try_recv().is_err());
        assert!(receivers[0].1.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_error_is_non_blocking_when_full() {
        let (map, _receivers) = registry_with(&[FeedKey::new("KRW-BTC", Timeframe::M1)]);
        for _ in 0..ERR_CHANNEL_CAPACITY + 3 {
            broadcast_error(
                &map,
                FeedError::Protocol {
                    name: "X".into(),
                    message: "y".into(),
                },
            );
        }
        // Reaching here without deadlock is the assertion.
    }
}
