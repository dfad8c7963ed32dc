// =============================================================================
// Stochastic Oscillator
// =============================================================================
//
//   %K = (close - lowest_low(k)) / (highest_high(k) - lowest_low(k)) * 100
//   %D = SMA(d) of %K
//
// Readings above 80 are overbought, below 20 oversold.
// =============================================================================

use crate::types::Bar;

/// Latest stochastic reading.
#[derive(Debug, Clone, Copy)]
pub struct StochasticResult {
    pub k: f64,
    pub d: f64,
}

/// Compute the most recent %K / %D pair.
///
/// Returns `None` when there are fewer than `k_period + d_period - 1` bars,
/// either period is zero, or the high-low range of a window is degenerate
/// for every window (flat tape yields %K = 50 by convention).
pub fn calculate_stochastic(bars: &[Bar], k_period: usize, d_period: usize) -> Option<StochasticResult> {
    if k_period == 0 || d_period == 0 {
        return None;
    }
    let needed = k_period + d_period - 1;
    if bars.len() < needed {
        return None;
    }

    // %K for the last `d_period` windows.
    let mut k_values = Vec::with_capacity(d_period);
    for offset in 0..d_period {
        let end = bars.len() - (d_period - 1 - offset);
        let window = &bars[end - k_period..end];

        let highest = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
        let lowest = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);
        let close = window.last()?.close;

        let range = highest - lowest;
        let k = if range <= 0.0 {
            50.0
        } else {
            ((close - lowest) / range) * 100.0
        };
        if !k.is_finite() {
            return None;
        }
        k_values.push(k);
    }

    let k = *k_values.last()?;
    let d = k_values.iter().sum::<f64>() / d_period as f64;

    Some(StochasticResult { k, d })
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Timeframe;
    use chrono::{TimeZone, Utc};

    fn bar(high: f64, low: f64, close: f64) -> Bar {
        Bar {
            symbol: "EURUSD".into(),
            tf: Timeframe::M5,
            open_time: Utc.timestamp_opt(0, 0).unwrap(),
            open: (high + low) / 2.0,
            high,
            low,
            close,
            volume: 100.0,
        }
    }

    #[test]
    fn stochastic_rejects_degenerate_input() {
        assert!(calculate_stochastic(&[], 14, 3).is_none());
        let bars = vec![bar(2.0, 1.0, 1.5); 10];
        assert!(calculate_stochastic(&bars, 14, 3).is_none());
        assert!(calculate_stochastic(&bars, 0, 3).is_none());
    }

    #[test]
    fn close_at_window_high_gives_full_k() {
        let mut bars = vec![bar(105.0, 95.0, 100.0); 16];
        if let Some(last) = bars.last_mut() {
            last.close = 105.0;
        }
        let s = calculate_stochastic(&bars, 14, 3).unwrap();
        assert!((s.k - 100.0).abs() < 1e-9);
    }

    #[test]
    fn close_at_window_low_gives_zero_k() {
        let mut bars = vec![bar(105.0, 95.0, 100.0); 16];
        if let Some(last) = bars.last_mut() {
            last.close = 95.0;
        }
        let s = calculate_stochastic(&bars, 14, 3).unwrap();
        assert!(s.k.abs() < 1e-9);
    }

    #[test]
    fn flat_tape_is_neutral() {
        let bars = vec![bar(100.0, 100.0, 100.0); 20];
        let s = calculate_stochastic(&bars, 14, 3).unwrap();
        assert!((s.k - 50.0).abs() < 1e-9);
        assert!((s.d - 50.0).abs() < 1e-9);
    }
}
