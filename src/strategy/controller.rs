// =============================================================================
// Strategy controller — the rolling window between bars and decisions
// =============================================================================
//
// Accumulates accepted bars into an append-only dataframe, upgrades the last
// row in place when a bucket is re-delivered, and — once the warmup window is
// full — computes indicators over a trailing sample, forwards the latest
// values to the chart sink, and (only while started) hands the sample to the
// strategy's decision step.
//
// Bars keep accumulating while stopped: warm up silently, trade only once
// armed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error};

use crate::broker::Broker;
use crate::chart::{ChartSink, IndicatorValue};
use crate::dataframe::Dataframe;
use crate::strategy::Strategy;
use crate::types::Candle;

pub struct StrategyController {
    strategy: Arc<dyn Strategy>,
    dataframe: Mutex<Dataframe>,
    broker: Arc<dyn Broker>,
    chart: Arc<dyn ChartSink>,
    started: AtomicBool,
}

impl StrategyController {
    pub fn new(
        pair: impl Into<String>,
        strategy: Arc<dyn Strategy>,
        broker: Arc<dyn Broker>,
        chart: Arc<dyn ChartSink>,
    ) -> Self {
        Self {
            strategy,
            dataframe: Mutex::new(Dataframe::new(pair)),
            broker,
            chart,
            started: AtomicBool::new(false),
        }
    }

    /// Arm the decision callback.
    pub fn start(&self) {
        self.started.store(true, Ordering::SeqCst);
    }

    /// Disarm the decision callback; accumulation continues.
    pub fn stop(&self) {
        self.started.store(false, Ordering::SeqCst);
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Number of rows accumulated so far.
    pub fn window_len(&self) -> usize {
        self.dataframe.lock().len()
    }

    /// Accept one bar. Late bars — strictly older than the last stored row —
    /// are dropped; an equal timestamp updates the row in place.
    pub fn on_candle(&self, candle: Candle) {
        let warmup = self.strategy.warmup_period();

        let sample = {
            let mut df = self.dataframe.lock();
            if let Some(last) = df.time.last() {
                if candle.time < *last {
                    error!(pair = %candle.pair, time = %candle.time, "late candle dropped");
                    return;
                }
            }
            df.apply(&candle);

            if df.len() < warmup {
                debug!(rows = df.len(), warmup, "warming up");
                return;
            }
            df.sample(warmup)
            // Lock released here: indicator math and broker calls run
            // outside the window lock.
        };

        let mut sample = sample;
        self.strategy.indicators(&mut sample);

        if let Some(&time) = sample.time.last() {
            let mut values: Vec<IndicatorValue> = sample
                .metadata
                .iter()
                .filter_map(|(name, series)| {
                    series.last(0).map(|value| IndicatorValue {
                        name: name.clone(),
                        value,
                    })
                })
                .filter(|iv| iv.value.is_finite())
                .collect();
            values.sort_by(|a, b| a.name.cmp(&b.name));
            if !values.is_empty() {
                self.chart.on_indicators(time, &values);
            }
        }

        if self.is_started() {
            self.strategy.on_candle(&sample, self.broker.as_ref());
        }
    }
}
