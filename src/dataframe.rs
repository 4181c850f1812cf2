// =============================================================================
// Series & Dataframe — the rolling window consumed by strategies
// =============================================================================
//
// A Dataframe is a set of parallel, index-aligned columns. Strategies read
// it through `Series` helpers (`last`, `crossover`, ...) and attach computed
// indicator columns to `metadata`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::types::Candle;

/// A time series of f64 values, newest last.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Series(Vec<f64>);

impl Series {
    pub fn new(values: Vec<f64>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push(&mut self, value: f64) {
        self.0.push(value);
    }

    /// The value `position` steps back from the end; `last(0)` is the most
    /// recent value.
    pub fn last(&self, position: usize) -> Option<f64> {
        if position < self.0.len() {
            Some(self.0[self.0.len() - 1 - position])
        } else {
            None
        }
    }

    pub fn last_mut(&mut self) -> Option<&mut f64> {
        self.0.last_mut()
    }

    /// The trailing `size` values (or the whole series when shorter).
    pub fn last_values(&self, size: usize) -> &[f64] {
        let start = self.0.len().saturating_sub(size);
        &self.0[start..]
    }

    /// True when this series crossed above `reference` on the latest value.
    /// False when either series is too short to decide.
    pub fn crossover(&self, reference: &Series) -> bool {
        match (self.last(0), reference.last(0), self.last(1), reference.last(1)) {
            (Some(a0), Some(b0), Some(a1), Some(b1)) => a0 > b0 && a1 <= b1,
            _ => false,
        }
    }

    /// True when this series crossed below `reference` on the latest value.
    pub fn crossunder(&self, reference: &Series) -> bool {
        match (self.last(0), reference.last(0), self.last(1), reference.last(1)) {
            (Some(a0), Some(b0), Some(a1), Some(b1)) => a0 <= b0 && a1 > b1,
            _ => false,
        }
    }
}

impl From<Vec<f64>> for Series {
    fn from(values: Vec<f64>) -> Self {
        Self(values)
    }
}

/// Parallel OHLCV columns plus named indicator columns, all index-aligned.
/// `time` is non-decreasing; a bar carrying an already-stored timestamp
/// updates its row in place.
#[derive(Debug, Clone, Default)]
pub struct Dataframe {
    pub pair: String,

    pub time: Vec<DateTime<Utc>>,
    pub open: Series,
    pub high: Series,
    pub low: Series,
    pub close: Series,
    pub volume: Series,

    pub last_update: Option<DateTime<Utc>>,

    /// Custom indicator columns keyed by name.
    pub metadata: HashMap<String, Series>,
}

impl Dataframe {
    pub fn new(pair: impl Into<String>) -> Self {
        Self {
            pair: pair.into(),
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Apply a bar: update the last row in place when the timestamp matches
    /// (partial -> final upgrade), append a new row otherwise.
    ///
    /// Metadata keys absent from the bar are left untouched; a key unknown
    /// to the frame is ignored on in-place updates (there is no aligned
    /// column to extend retroactively).
    pub fn apply(&mut self, candle: &Candle) {
        if self.time.last() == Some(&candle.time) {
            *self.open.last_mut().expect("non-empty frame") = candle.open;
            *self.high.last_mut().expect("non-empty frame") = candle.high;
            *self.low.last_mut().expect("non-empty frame") = candle.low;
            *self.close.last_mut().expect("non-empty frame") = candle.close;
            *self.volume.last_mut().expect("non-empty frame") = candle.volume;
            for (key, value) in &candle.metadata {
                if let Some(series) = self.metadata.get_mut(key) {
                    if let Some(slot) = series.last_mut() {
                        *slot = *value;
                    }
                }
            }
        } else {
            self.time.push(candle.time);
            self.open.push(candle.open);
            self.high.push(candle.high);
            self.low.push(candle.low);
            self.close.push(candle.close);
            self.volume.push(candle.volume);
            for (key, value) in &candle.metadata {
                self.metadata.entry(key.clone()).or_default().push(*value);
            }
        }
        self.last_update = Some(candle.updated_at);
    }

    /// A copy of the trailing `positions` rows. Returns the whole frame when
    /// it is not longer than the requested window.
    pub fn sample(&self, positions: usize) -> Dataframe {
        if self.len() <= positions {
            return self.clone();
        }
        let start = self.len() - positions;

        let metadata = self
            .metadata
            .iter()
            .map(|(k, v)| (k.clone(), Series::new(v.last_values(positions).to_vec())))
            .collect();

        Dataframe {
            pair: self.pair.clone(),
            time: self.time[start..].to_vec(),
            open: Series::new(self.open.last_values(positions).to_vec()),
            high: Series::new(self.high.last_values(positions).to_vec()),
            low: Series::new(self.low.last_values(positions).to_vec()),
            close: Series::new(self.close.last_values(positions).to_vec()),
            volume: Series::new(self.volume.last_values(positions).to_vec()),
            last_update: self.last_update,
            metadata,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn candle(secs: i64, close: f64) -> Candle {
        let t = Utc.timestamp_opt(secs, 0).unwrap();
        Candle {
            pair: "KRW-BTC".into(),
            time: t,
            updated_at: t,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 10.0,
            complete: true,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn series_last_and_window() {
        let s = Series::new(vec![1.0, 2.0, 3.0]);
        assert_eq!(s.last(0), Some(3.0));
        assert_eq!(s.last(2), Some(1.0));
        assert_eq!(s.last(3), None);
        assert_eq!(s.last_values(2), &[2.0, 3.0]);
        assert_eq!(s.last_values(10), &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn crossover_and_crossunder() {
        let fast = Series::new(vec![1.0, 3.0]);
        let slow = Series::new(vec![2.0, 2.0]);
        assert!(fast.crossover(&slow));
        assert!(!fast.crossunder(&slow));
        assert!(slow.crossunder(&fast));
    }

    #[test]
    fn crossover_short_series_is_false() {
        let a = Series::new(vec![3.0]);
        let b = Series::new(vec![2.0]);
        assert!(!a.crossover(&b));
    }

    #[test]
    fn apply_appends_new_rows() {
        let mut df = Dataframe::new("KRW-BTC");
        df.apply(&candle(60, 100.0));
        df.apply(&candle(120, 101.0));
        assert_eq!(df.len(), 2);
        assert_eq!(df.close.last(0), Some(101.0));
    }

    #[test]
    fn apply_same_timestamp_updates_in_place() {
        let mut df = Dataframe::new("KRW-BTC");
        df.apply(&candle(60, 100.0));
        df.apply(&candle(60, 105.0));
        assert_eq!(df.len(), 1);
        assert_eq!(df.close.last(0), Some(105.0));
        assert_eq!(df.high.last(0), Some(106.0));
    }

    #[test]
    fn sample_returns_trailing_window() {
        let mut df = Dataframe::new("KRW-BTC");
        for i in 0..10 {
            df.apply(&candle(60 * (i + 1), 100.0 + i as f64));
        }
        let sample = df.sample(3);
        assert_eq!(sample.len(), 3);
        assert_eq!(sample.close.values(), &[107.0, 108.0, 109.0]);
        assert_eq!(sample.time[0], Utc.timestamp_opt(8 * 60, 0).unwrap());
    }

    #[test]
    fn sample_of_short_frame_is_whole_frame() {
        let mut df = Dataframe::new("KRW-BTC");
        df.apply(&candle(60, 100.0));
        let sample = df.sample(5);
        assert_eq!(sample.len(), 1);
    }

    #[test]
    fn metadata_columns_follow_rows() {
        let mut df = Dataframe::new("KRW-BTC");
        let mut c = candle(60, 100.0);
        c.metadata.insert("rsi14".into(), 55.0);
        df.apply(&c);
        assert_eq!(df.metadata["rsi14"].last(0), Some(55.0));

        // In-place update overwrites the metadata slot.
        let mut c2 = candle(60, 101.0);
        c2.metadata.insert("rsi14".into(), 60.0);
        df.apply(&c2);
        assert_eq!(df.metadata["rsi14"].len(), 1);
        assert_eq!(df.metadata["rsi14"].last(0), Some(60.0));
    }
}
