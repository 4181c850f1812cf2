// =============================================================================
// Relative Strength Index (RSI)
// =============================================================================
//
// Simple-average variant: average gain and loss are plain means over the
// trailing `period` price changes.
//
//   RS  = avg_gain / avg_loss
//   RSI = 100 - 100 / (1 + RS)
//
// When there are no down moves in the window, RSI saturates at 100.

/// Compute the RSI series for `values` with look-back `period`.
///
/// Same length as the input; indices before `period` are NaN (one delta is
/// consumed per value, so the first window fills at index `period`).
pub fn rsi(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if period == 0 || values.len() <= period {
        return out;
    }

    let mut gains = vec![0.0; values.len()];
    let mut losses = vec![0.0; values.len()];
    for i in 1..values.len() {
        let change = values[i] - values[i - 1];
        if change > 0.0 {
            gains[i] = change;
        } else {
            losses[i] = -change;
        }
    }

    for i in period..values.len() {
        let window = (i + 1 - period)..=i;
        let avg_gain: f64 = gains[window.clone()].iter().sum::<f64>() / period as f64;
        let avg_loss: f64 = losses[window].iter().sum::<f64>() / period as f64;

        out[i] = if avg_loss == 0.0 {
            100.0
        } else {
            let rs = avg_gain / avg_loss;
            100.0 - 100.0 / (1.0 + rs)
        };
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
    fn rsi_insufficient_data_is_all_nan() {
        let out = rsi(&[1.0, 2.0, 3.0], 14);
        assert!(out.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn rsi_all_gains_saturates_at_100() {
        let values: Vec<f64> = (1..=20).map(|x| x as f64).collect();
        let out = rsi(&values, 14);
        assert!(out[13].is_nan());
        assert!((out[14] - 100.0).abs() < 1e-10);
        assert!((out[19] - 100.0).abs() < 1e-10);
    }

    #[test]
    fn rsi_all_losses_is_zero() {
        let values: Vec<f64> = (1..=20).rev().map(|x| x as f64).collect();
        let out = rsi(&values, 14);
        assert!((out[14] - 0.0).abs() < 1e-10);
    }

    #[test]
    fn rsi_balanced_moves_near_fifty() {
        // Alternating +1 / -1 changes: equal average gain and loss.
        let mut values = vec![100.0];
        for i in 0..20 {
            let last = *values.last().unwrap();
            values.push(if i % 2 == 0 { last + 1.0 } else { last - 1.0 });
        }
        let out = rsi(&values, 14);
        let last = out.last().unwrap();
        assert!((last - 50.0).abs() < 4.0, "got {last}");
    }
}
