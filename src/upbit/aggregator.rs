// =============================================================================
// Candle Aggregator — 1-second ticks into fixed-interval buckets
// =============================================================================
//
// One aggregator per (pair, timeframe). Raw 1s candles land in an override
// buffer keyed by their own timestamp (the venue may re-send a corrected bar
// for the same second). Buckets are half-open `[start, end)` intervals
// aligned to the venue's local calendar; a tick exactly on a boundary opens
// the next bucket rather than closing the current one.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::timeframe::{next_boundary_kst, Timeframe};
use crate::types::Candle;

/// Result of pushing one raw tick.
///
/// `partial` is the forming bucket's running aggregate (`complete == false`);
/// `finalized` is present when the tick closed a bucket. Either may carry
/// zero volume (no constituent ticks) — callers suppress those instead of
/// forwarding them downstream.
#[derive(Debug, Clone)]
pub struct AggregateOutcome {
    pub partial: Option<Candle>,
    pub finalized: Option<Candle>,
}

/// Per-(pair, timeframe) aggregation state. Owned exclusively by its feed;
/// created on first subscription, dropped on stream shutdown.
#[derive(Debug)]
pub struct CandleAggregator {
    pair: String,
    timeframe: Timeframe,
    /// Raw ticks by second; a later arrival at the same key overrides.
    buffer: BTreeMap<DateTime<Utc>, Candle>,
    /// Boundary at which the forming bucket closes. The forming bucket is
    /// `[bucket_close - duration, bucket_close)`.
    bucket_close: Option<DateTime<Utc>>,
}

impl CandleAggregator {
    pub fn new(pair: impl Into<String>, timeframe: Timeframe) -> Self {
        Self {
            pair: pair.into(),
            timeframe,
            buffer: BTreeMap::new(),
            bucket_close: None,
        }
    }

    /// True until the first tick (or anchor) establishes the forming bucket.
    pub fn is_unanchored(&self) -> bool {
        !self.timeframe.is_raw() && self.bucket_close.is_none()
    }

    /// Anchor the forming bucket from `t` without consuming a tick. Used to
    /// pin the bucket to wall-clock time before historical backfill is
    /// pushed, so stale backfill rows cannot close old buckets.
    pub fn anchor(&mut self, t: DateTime<Utc>) {
        if self.timeframe.is_raw() || self.bucket_close.is_some() {
            return;
        }
        self.bucket_close = Some(next_boundary_kst(t, self.timeframe.duration()));
    }

    /// Consume one raw 1-second candle.
    pub fn push(&mut self, raw: Candle) -> AggregateOutcome {
        // Raw timeframe: pass the tick through unchanged, no buffering.
        if self.timeframe.is_raw() {
            return AggregateOutcome {
                partial: None,
                finalized: Some(raw),
            };
        }

        let duration = self.timeframe.duration();
        let tick_time = raw.time;
        self.buffer.insert(tick_time, raw);

        let bucket_close = *self
            .bucket_close
            .get_or_insert_with(|| next_boundary_kst(tick_time, duration));
        let bucket_start = bucket_close - duration;

        let mut partial = self.fold(bucket_start, tick_time);
        partial.time = tick_time;
        partial.updated_at = tick_time;
        partial.complete = false;

        let mut finalized = None;
        if tick_time >= bucket_close {
            let mut bar = self.fold(bucket_start, bucket_close);
            bar.time = bucket_start;
            bar.updated_at = bucket_start;
            bar.complete = true;
            finalized = Some(bar);

            // Everything before the closed boundary is history now; dropping
            // it keeps the buffer bounded even under late redeliveries.
            self.buffer = self.buffer.split_off(&bucket_close);
            self.bucket_close = Some(bucket_close + duration);
        }

        AggregateOutcome {
            partial: Some(partial),
            finalized,
        }
    }

    /// Fold the buffered ticks in `[start, end)`: open from the first tick,
    /// close from the last, running high/low, summed volume. An empty range
    /// folds to a zero-volume candle.
    fn fold(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Candle {
        if start >= end {
            return Candle::empty(&self.pair, end);
        }

        let mut ticks = self.buffer.range(start..end);
        let first = match ticks.next() {
            Some((_, c)) => c,
            None => return Candle::empty(&self.pair, end),
        };

        let mut out = first.clone();
        out.metadata.clear();
        for (_, tick) in ticks {
            if tick.high > out.high {
                out.high = tick.high;
            }
            if tick.low < out.low {
                out.low = tick.low;
            }
            out.close = tick.close;
            out.volume += tick.volume;
        }
        out
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    /// 2025-01-12 04:00:00 UTC == 13:00:00 KST, a boundary for every
    /// timeframe up to 1h.
    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 12, 4, 0, 0).unwrap()
    }

    fn tick(at: DateTime<Utc>, close: f64, volume: f64) -> Candle {
        Candle {
            pair: "KRW-DOGE".into(),
            time: at,
            updated_at: at,
            open: close,
            high: close,
            low: close,
            close,
            volume,
            complete: true,
            metadata: Default::default(),
        }
    }

    #[test]
    fn raw_timeframe_passes_ticks_through() {
        let mut agg = CandleAggregator::new("KRW-DOGE", Timeframe::S1);
        let t = tick(base(), 100.0, 1.0);
        let out = agg.push(t.clone());
        assert!(out.partial.is_none());
        assert_eq!(out.finalized.unwrap(), t);
    }

    #[test]
    fn minute_of_ticks_tiles_into_one_final_bar() {
        let mut agg = CandleAggregator::new("KRW-DOGE", Timeframe::M1);

        // 60 ticks at :00..:59, close prices 1..=60, one unit of volume each.
        let mut finals = Vec::new();
        for i in 0..60 {
            let out = agg.push(tick(
                base() + chrono::Duration::seconds(i),
                (i + 1) as f64,
                1.0,
            ));
            finals.extend(out.finalized);
        }
        assert!(finals.is_empty(), "no final before the boundary tick");

        // The boundary tick closes the bucket and belongs to the next one.
        let out = agg.push(tick(base() + chrono::Duration::seconds(60), 99.0, 1.0));
        let bar = out.finalized.expect("boundary tick closes the bucket");
        assert_eq!(bar.time, base());
        assert!(bar.complete);
        assert!((bar.open - 1.0).abs() < f64::EPSILON);
        assert!((bar.close - 60.0).abs() < f64::EPSILON);
        assert!((bar.high - 60.0).abs() < f64::EPSILON);
        assert!((bar.low - 1.0).abs() < f64::EPSILON);
        assert!((bar.volume - 60.0).abs() < f64::EPSILON);

        // And no further final until the next boundary.
        let out = agg.push(tick(base() + chrono::Duration::seconds(61), 99.5, 1.0));
        assert!(out.finalized.is_none());
    }

    #[test]
    fn tick_in_first_second_is_counted() {
        // A tick exactly at the bucket start belongs to that bucket.
        let mut agg = CandleAggregator::new("KRW-DOGE", Timeframe::M1);
        agg.push(tick(base(), 10.0, 2.0));
        agg.push(tick(base() + chrono::Duration::seconds(30), 20.0, 3.0));
        let out = agg.push(tick(base() + chrono::Duration::seconds(60), 30.0, 1.0));

        let bar = out.finalized.unwrap();
        assert!((bar.open - 10.0).abs() < f64::EPSILON);
        assert!((bar.volume - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn resent_second_overrides_instead_of_double_counting() {
        let mut agg = CandleAggregator::new("KRW-DOGE", Timeframe::M1);
        let at = base() + chrono::Duration::seconds(10);
        agg.push(tick(at, 10.0, 5.0));
        agg.push(tick(at, 12.0, 7.0)); // corrected bar for the same second

        let out = agg.push(tick(base() + chrono::Duration::seconds(60), 1.0, 1.0));
        let bar = out.finalized.unwrap();
        assert!((bar.volume - 7.0).abs() < f64::EPSILON);
        assert!((bar.close - 12.0).abs() < f64::EPSILON);
    }

    #[test]
    fn partial_covers_bucket_so_far() {
        let mut agg = CandleAggregator::new("KRW-DOGE", Timeframe::M1);
        agg.push(tick(base() + chrono::Duration::seconds(5), 10.0, 1.0));
        let out = agg.push(tick(base() + chrono::Duration::seconds(20), 15.0, 2.0));

        let partial = out.partial.unwrap();
        assert!(!partial.complete);
        // Half-open at the observation time: the triggering tick itself is
        // not yet part of the fold.
        assert!((partial.open - 10.0).abs() < f64::EPSILON);
        assert!((partial.close - 10.0).abs() < f64::EPSILON);
        assert!((partial.volume - 1.0).abs() < f64::EPSILON);
        assert_eq!(partial.time, base() + chrono::Duration::seconds(20));
    }

    #[test]
    fn stale_tick_never_reopens_closed_bucket() {
        let mut agg = CandleAggregator::new("KRW-DOGE", Timeframe::M1);
        agg.push(tick(base() + chrono::Duration::seconds(10), 10.0, 1.0));
        let closed = agg
            .push(tick(base() + chrono::Duration::seconds(60), 20.0, 1.0))
            .finalized
            .unwrap();
        assert!((closed.volume - 1.0).abs() < f64::EPSILON);

        // A tick from the already-finalized range produces no new final and
        // an empty (suppressible) partial.
        let out = agg.push(tick(base() + chrono::Duration::seconds(30), 99.0, 9.0));
        assert!(out.finalized.is_none());
        assert!((out.partial.unwrap().volume - 0.0).abs() < f64::EPSILON);

        // The next bucket is unaffected by the stale tick: [60, 120) holds
        // only the boundary tick that opened it.
        let bar = agg
            .push(tick(base() + chrono::Duration::seconds(120), 21.0, 1.0))
            .finalized
            .unwrap();
        assert!((bar.open - 20.0).abs() < f64::EPSILON);
        assert!((bar.volume - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_bucket_folds_to_zero_volume() {
        let mut agg = CandleAggregator::new("KRW-DOGE", Timeframe::M1);
        agg.push(tick(base() + chrono::Duration::seconds(10), 10.0, 1.0));

        // A tick several buckets ahead closes [0, 60) and advances to the
        // next bucket; the tick after it closes [60, 120), which has no
        // constituent ticks at all.
        let out = agg.push(tick(base() + chrono::Duration::seconds(300), 30.0, 1.0));
        assert!((out.finalized.unwrap().volume - 1.0).abs() < f64::EPSILON);

        let out = agg.push(tick(base() + chrono::Duration::seconds(301), 31.0, 1.0));
        let bar = out.finalized.unwrap();
        assert!((bar.volume - 0.0).abs() < f64::EPSILON, "suppressible bar");
        assert_eq!(bar.time, base() + chrono::Duration::seconds(60));
    }

    #[test]
    fn first_tick_anchors_to_next_boundary() {
        let mut agg = CandleAggregator::new("KRW-DOGE", Timeframe::H1);
        // 13:29:12 KST: forming bucket must be [13:00, 14:00) KST.
        let first = base() + chrono::Duration::seconds(29 * 60 + 12);
        agg.push(tick(first, 10.0, 1.0));

        // 13:59:59 stays in the bucket...
        let out = agg.push(tick(base() + chrono::Duration::seconds(3599), 11.0, 1.0));
        assert!(out.finalized.is_none());

        // ...and 14:00:00 closes it.
        let out = agg.push(tick(base() + chrono::Duration::seconds(3600), 12.0, 1.0));
        let bar = out.finalized.unwrap();
        assert_eq!(bar.time, base());
        assert!((bar.volume - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn anchor_pins_bucket_before_backfill() {
        let mut agg = CandleAggregator::new("KRW-DOGE", Timeframe::M1);
        let now = base() + chrono::Duration::seconds(150); // mid third bucket
        agg.anchor(now);

        // Backfill from earlier buckets must not close anything.
        let out = agg.push(tick(base() + chrono::Duration::seconds(10), 10.0, 1.0));
        assert!(out.finalized.is_none());

        let out = agg.push(tick(base() + chrono::Duration::seconds(180), 11.0, 1.0));
        let bar = out.finalized.unwrap();
        assert_eq!(bar.time, base() + chrono::Duration::seconds(120));
    }

    #[test]
    fn metadata_is_not_carried_from_ticks() {
        let mut agg = CandleAggregator::new("KRW-DOGE", Timeframe::M1);
        let mut t = tick(base() + chrono::Duration::seconds(1), 10.0, 1.0);
        t.metadata.insert("rsi14".into(), 55.0);
        agg.push(t);
        let out = agg.push(tick(base() + chrono::Duration::seconds(60), 20.0, 1.0));
        assert!(out.finalized.unwrap().metadata.is_empty());
    }
}
