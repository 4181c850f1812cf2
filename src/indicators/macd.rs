// =============================================================================
// Moving Average Convergence Divergence (MACD)
// =============================================================================
//
//   macd      = EMA(short) - EMA(long)
//   signal    = EMA(macd, signal_period), seeded where macd first fills
//   histogram = macd - signal

use super::ema::{ema, ema_from};

/// Compute the `(macd, signal, histogram)` series for `values`.
///
/// All three outputs have the same length as the input. The macd line fills
/// at index `long - 1`; the signal line `signal - 1` entries later; the
/// histogram wherever both are filled.
pub fn macd(
    values: &[f64],
    short: usize,
    long: usize,
    signal: usize,
) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let short_ema = ema(values, short);
    let long_ema = ema(values, long);

    let macd_line: Vec<f64> = short_ema
        .iter()
        .zip(&long_ema)
        .map(|(s, l)| s - l)
        .collect();

    // The macd line is NaN before the long EMA fills; seed the signal EMA at
    // the first filled index instead of averaging padding.
    let signal_line = if long == 0 || values.len() < long {
        vec![f64::NAN; values.len()]
    } else {
        ema_from(&macd_line, signal, long - 1)
    };

    let histogram: Vec<f64> = macd_line
        .iter()
        .zip(&signal_line)
        .map(|(m, s)| m - s)
        .collect();

    (macd_line, signal_line, histogram)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macd_lengths_match_input() {
        let values: Vec<f64> = (1..=60).map(|x| x as f64).collect();
        let (m, s, h) = macd(&values, 12, 26, 9);
        assert_eq!(m.len(), 60);
        assert_eq!(s.len(), 60);
        assert_eq!(h.len(), 60);
    }

    #[test]
    fn macd_fill_boundaries() {
        let values: Vec<f64> = (1..=60).map(|x| x as f64).collect();
        let (m, s, h) = macd(&values, 12, 26, 9);

        assert!(m[24].is_nan());
        assert!(m[25].is_finite()); // long - 1
        assert!(s[32].is_nan());
        assert!(s[33].is_finite()); // long - 1 + signal - 1
        assert!(h[32].is_nan());
        assert!(h[33].is_finite());
    }

    #[test]
    fn macd_positive_in_uptrend() {
        // In a steady uptrend the short EMA sits above the long EMA.
        let values: Vec<f64> = (1..=100).map(|x| x as f64).collect();
        let (m, _, _) = macd(&values, 12, 26, 9);
        assert!(*m.last().unwrap() > 0.0);
    }

    #[test]
    fn macd_too_short_input() {
        let values: Vec<f64> = (1..=10).map(|x| x as f64).collect();
        let (m, s, h) = macd(&values, 12, 26, 9);
        assert!(m.iter().all(|v| v.is_nan()));
        assert!(s.iter().all(|v| v.is_nan()));
        assert!(h.iter().all(|v| v.is_nan()));
    }
}
