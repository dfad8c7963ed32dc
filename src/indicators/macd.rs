// =============================================================================
// Moving Average Convergence Divergence (MACD)
// =============================================================================
//
//   MACD line   = EMA(fast) - EMA(slow)
//   Signal line = EMA(signal) of the MACD line
//   Histogram   = MACD - Signal
// =============================================================================

use crate::indicators::ema::calculate_ema;

/// Latest MACD reading.
#[derive(Debug, Clone, Copy)]
pub struct MacdResult {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// Compute the most recent MACD value for `closes`.
///
/// Returns `None` when there is not enough history for the slow EMA plus the
/// signal EMA, or when any intermediate value is non-finite.
pub fn calculate_macd(
    closes: &[f64],
    fast: usize,
    slow: usize,
    signal: usize,
) -> Option<MacdResult> {
    if fast == 0 || slow == 0 || signal == 0 || fast >= slow {
        return None;
    }
    if closes.len() < slow + signal {
        return None;
    }

    let ema_fast = calculate_ema(closes, fast);
    let ema_slow = calculate_ema(closes, slow);
    if ema_slow.is_empty() {
        return None;
    }

    // Align the two series on their tails: both end at the latest close.
    let len = ema_slow.len().min(ema_fast.len());
    let fast_tail = &ema_fast[ema_fast.len() - len..];
    let slow_tail = &ema_slow[ema_slow.len() - len..];

    let macd_series: Vec<f64> = fast_tail
        .iter()
        .zip(slow_tail.iter())
        .map(|(f, s)| f - s)
        .collect();

    let signal_series = calculate_ema(&macd_series, signal);
    let signal_val = *signal_series.last()?;
    let macd_val = *macd_series.last()?;
    let histogram = macd_val - signal_val;

    if !macd_val.is_finite() || !signal_val.is_finite() {
        return None;
    }

    Some(MacdResult {
        macd: macd_val,
        signal: signal_val,
        histogram,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macd_rejects_degenerate_input() {
        assert!(calculate_macd(&[], 12, 26, 9).is_none());
        assert!(calculate_macd(&[1.0; 30], 12, 26, 9).is_none());
        assert!(calculate_macd(&[1.0; 60], 26, 12, 9).is_none()); // fast >= slow
        assert!(calculate_macd(&[1.0; 60], 0, 26, 9).is_none());
    }

    #[test]
    fn macd_zero_on_flat_series() {
        let flat = vec![50.0; 80];
        let m = calculate_macd(&flat, 12, 26, 9).unwrap();
        assert!(m.macd.abs() < 1e-9);
        assert!(m.signal.abs() < 1e-9);
        assert!(m.histogram.abs() < 1e-9);
    }

    #[test]
    fn macd_positive_in_uptrend() {
        let rising: Vec<f64> = (1..=120).map(|i| i as f64).collect();
        let m = calculate_macd(&rising, 12, 26, 9).unwrap();
        assert!(m.macd > 0.0, "MACD should be positive in an uptrend");
    }

    #[test]
    fn macd_negative_in_downtrend() {
        let falling: Vec<f64> = (1..=120).rev().map(|i| i as f64).collect();
        let m = calculate_macd(&falling, 12, 26, 9).unwrap();
        assert!(m.macd < 0.0, "MACD should be negative in a downtrend");
    }
}
