// =============================================================================
// Exponential Moving Average (EMA)
// =============================================================================
//
// Formula:
//   multiplier = 2 / (period + 1)
//   EMA_t      = (value_t - EMA_{t-1}) * multiplier + EMA_{t-1}
//
// The first EMA value is seeded with the SMA of the first `period` values.

/// Compute the EMA series for `values` with look-back `period`.
///
/// The output has the same length as the input: indices before `period - 1`
/// are NaN, index `period - 1` carries the SMA seed, and later indices follow
/// the recursive formula. A NaN input poisons the series from that point on.
///
/// `period == 0` or an input shorter than `period` yields an all-NaN series.
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    ema_from(values, period, 0)
}

/// EMA over `values[offset..]`, NaN-padded back to the full input length.
///
/// Used for series whose leading region is itself unfilled (e.g. the MACD
/// signal line): the seed window starts at the first meaningful index rather
/// than averaging NaN padding.
pub(crate) fn ema_from(values: &[f64], period: usize, offset: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if period == 0 || offset >= values.len() || values.len() - offset < period {
        return out;
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let seed_at = offset + period - 1;

    let seed: f64 = values[offset..=seed_at].iter().sum::<f64>() / period as f64;
    out[seed_at] = seed;

    let mut prev = seed;
    for i in seed_at + 1..values.len() {
        prev = (values[i] - prev) * multiplier + prev;
        out[i] = prev;
    }
    out
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ema_empty_input() {
        assert!(ema(&[], 5).is_empty());
    }

    #[test]
    fn ema_period_zero_is_all_nan() {
        let out = ema(&[1.0, 2.0, 3.0], 0);
        assert!(out.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn ema_insufficient_data_is_all_nan() {
        let out = ema(&[1.0, 2.0], 5);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn ema_nan_prefix_then_sma_seed() {
        let values = vec![2.0, 4.0, 6.0, 8.0];
        let out = ema(&values, 3);
        assert!(out[0].is_nan());
        assert!(out[1].is_nan());
        assert!((out[2] - 4.0).abs() < 1e-10); // SMA(2,4,6)
    }

    #[test]
    fn ema_known_values() {
        // 5-period EMA of 1..=10: seed SMA = 3.0, multiplier = 1/3.
        let values: Vec<f64> = (1..=10).map(|x| x as f64).collect();
        let out = ema(&values, 5);
        assert_eq!(out.len(), 10);

        let mult = 2.0 / 6.0;
        let mut expected = 3.0;
        assert!((out[4] - expected).abs() < 1e-10);
        for i in 5..10 {
            expected = (values[i] - expected) * mult + expected;
            assert!((out[i] - expected).abs() < 1e-10, "index {i}");
        }
    }

    #[test]
    fn ema_from_skips_leading_padding() {
        let values = vec![f64::NAN, f64::NAN, 2.0, 4.0, 6.0, 8.0];
        let out = ema_from(&values, 3, 2);
        assert!(out[3].is_nan());
        assert!((out[4] - 4.0).abs() < 1e-10); // SMA over indices 2..=4
        assert!(out[5].is_finite());
    }
}
