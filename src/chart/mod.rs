// =============================================================================
// Chart sink — visualization boundary and in-memory store
// =============================================================================
//
// The engine pushes closed bars, executed orders, and per-close indicator
// values into a sink it constructed and owns; the HTTP layer reads sorted
// copies back out. No global state.

pub mod server;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::types::{Candle, Order};

/// One named indicator reading at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndicatorValue {
    pub name: String,
    pub value: f64,
}

/// Visualization boundary fed by the engine's consumers.
pub trait ChartSink: Send + Sync {
    fn on_bar(&self, candle: &Candle);
    fn on_order(&self, order: &Order);
    fn on_indicators(&self, time: DateTime<Utc>, values: &[IndicatorValue]);
}

/// A timestamped indicator sample as served to the chart front-end.
#[derive(Debug, Clone, Serialize)]
pub struct IndicatorPoint {
    pub time: DateTime<Utc>,
    pub value: f64,
}

#[derive(Default)]
struct ChartData {
    candles: Vec<Candle>,
    orders: Vec<Order>,
    indicators: BTreeMap<String, Vec<IndicatorPoint>>,
}

/// In-memory chart store.
#[derive(Default)]
pub struct ChartStore {
    data: Mutex<ChartData>,
}

impl ChartStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored candles, ascending by time.
    pub fn candles(&self) -> Vec<Candle> {
        let mut out = self.data.lock().candles.clone();
        out.sort_by_key(|c| c.time);
        out
    }

    pub fn orders(&self) -> Vec<Order> {
        self.data.lock().orders.clone()
    }

    /// All indicator series, each ascending by time.
    pub fn indicators(&self) -> BTreeMap<String, Vec<IndicatorPoint>> {
        self.data.lock().indicators.clone()
    }
}

impl ChartSink for ChartStore {
    fn on_bar(&self, candle: &Candle) {
        let mut data = self.data.lock();
        // A re-delivered timestamp (partial -> final upgrade) replaces the
        // stored row instead of duplicating it.
        if let Some(existing) = data
            .candles
            .iter_mut()
            .find(|c| c.time == candle.time && c.pair == candle.pair)
        {
            *existing = candle.clone();
        } else {
            data.candles.push(candle.clone());
        }
    }

    fn on_order(&self, order: &Order) {
        self.data.lock().orders.push(order.clone());
    }

    fn on_indicators(&self, time: DateTime<Utc>, values: &[IndicatorValue]) {
        let mut data = self.data.lock();
        for value in values {
            let series = data.indicators.entry(value.name.clone()).or_default();
            match series.last_mut() {
                Some(last) if last.time == time => last.value = value.value,
                _ => series.push(IndicatorPoint {
                    time,
                    value: value.value,
                }),
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OrderStatus, OrderType, Side};
    use chrono::TimeZone;

    fn candle(secs: i64, close: f64) -> Candle {
        let t = Utc.timestamp_opt(secs, 0).unwrap();
        Candle {
            pair: "KRW-BTC".into(),
            time: t,
            updated_at: t,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
            complete: true,
            metadata: Default::default(),
        }
    }

    #[test]
    fn candles_come_back_sorted() {
        let store = ChartStore::new();
        store.on_bar(&candle(120, 2.0));
        store.on_bar(&candle(60, 1.0));
        let candles = store.candles();
        assert_eq!(candles.len(), 2);
        assert!(candles[0].time < candles[1].time);
    }

    #[test]
    fn same_timestamp_bar_replaces() {
        let store = ChartStore::new();
        store.on_bar(&candle(60, 1.0));
        store.on_bar(&candle(60, 9.0));
        let candles = store.candles();
        assert_eq!(candles.len(), 1);
        assert!((candles[0].close - 9.0).abs() < f64::EPSILON);
    }

    #[test]
    fn indicator_series_grow_and_replace() {
        let store = ChartStore::new();
        let t1 = Utc.timestamp_opt(60, 0).unwrap();
        let t2 = Utc.timestamp_opt(120, 0).unwrap();

        store.on_indicators(
            t1,
            &[IndicatorValue {
                name: "rsi14".into(),
                value: 40.0,
            }],
        );
        store.on_indicators(
            t1,
            &[IndicatorValue {
                name: "rsi14".into(),
                value: 45.0,
            }],
        );
        store.on_indicators(
            t2,
            &[IndicatorValue {
                name: "rsi14".into(),
                value: 50.0,
            }],
        );

        let series = &store.indicators()["rsi14"];
        assert_eq!(series.len(), 2);
        assert!((series[0].value - 45.0).abs() < f64::EPSILON);
        assert!((series[1].value - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn orders_accumulate() {
        let store = ChartStore::new();
        let now = Utc::now();
        store.on_order(&Order {
            exchange_id: "x".into(),
            pair: "KRW-BTC".into(),
            side: Side::Bid,
            order_type: OrderType::Price,
            status: OrderStatus::Done,
            price: 1.0,
            quantity: 1.0,
            created_at: now,
            updated_at: now,
        });
        assert_eq!(store.orders().len(), 1);
    }
}
