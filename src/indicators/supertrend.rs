// =============================================================================
// Supertrend
// =============================================================================
//
// Supertrend overlays an ATR-scaled band around the median price and flips
// direction when the close crosses the active band:
//
//   basic_upper = (H + L) / 2 + mult * ATR
//   basic_lower = (H + L) / 2 - mult * ATR
//
// The final bands ratchet: the upper band only moves down while price stays
// below it, the lower band only moves up while price stays above it.
// =============================================================================

use crate::types::Bar;

/// Latest supertrend reading.
#[derive(Debug, Clone, Copy)]
pub struct SupertrendResult {
    /// The active band the trend is riding on.
    pub line: f64,
    /// True while the close holds above the lower band.
    pub bullish: bool,
}

/// Compute the most recent supertrend value.
///
/// Returns `None` when there are fewer than `period + 1` bars or the ATR
/// cannot be computed. The rolling ATR uses Wilder's smoothing, matching the
/// standalone ATR indicator.
pub fn calculate_supertrend(bars: &[Bar], period: usize, multiplier: f64) -> Option<SupertrendResult> {
    if period == 0 || bars.len() < period + 1 || multiplier <= 0.0 {
        return None;
    }

    // Rolling ATR series, one value per bar from index `period`.
    let mut true_ranges = Vec::with_capacity(bars.len() - 1);
    for pair in bars.windows(2) {
        let prev_close = pair[0].close;
        let b = &pair[1];
        let tr = (b.high - b.low)
            .max((b.high - prev_close).abs())
            .max((b.low - prev_close).abs());
        true_ranges.push(tr);
    }

    let period_f = period as f64;
    let mut atr = true_ranges[..period].iter().sum::<f64>() / period_f;
    let mut atrs = vec![atr];
    for &tr in &true_ranges[period..] {
        atr = (atr * (period_f - 1.0) + tr) / period_f;
        if !atr.is_finite() {
            return None;
        }
        atrs.push(atr);
    }

    // Walk the ratcheting bands from the first bar that has an ATR.
    let start = period; // bars[start] pairs with atrs[0]
    let first = &bars[start];
    let mid = (first.high + first.low) / 2.0;
    let mut final_upper = mid + multiplier * atrs[0];
    let mut final_lower = mid - multiplier * atrs[0];
    let mut bullish = first.close > final_upper;

    for (i, b) in bars[start + 1..].iter().enumerate() {
        let atr = atrs[i + 1];
        let mid = (b.high + b.low) / 2.0;
        let basic_upper = mid + multiplier * atr;
        let basic_lower = mid - multiplier * atr;
        let prev_close = bars[start + i].close;

        // Ratchet: bands only tighten in the direction of the trend.
        if basic_upper < final_upper || prev_close > final_upper {
            final_upper = basic_upper;
        }
        if basic_lower > final_lower || prev_close < final_lower {
            final_lower = basic_lower;
        }

        bullish = if b.close > final_upper {
            true
        } else if b.close < final_lower {
            false
        } else {
            bullish
        };
    }

    let line = if bullish { final_lower } else { final_upper };
    line.is_finite().then_some(SupertrendResult { line, bullish })
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
            symbol: "BTCUSD".into(),
            tf: Timeframe::M5,
            open_time: Utc.timestamp_opt(0, 0).unwrap(),
            open: (high + low) / 2.0,
            high,
            low,
            close,
            volume: 10.0,
        }
    }

    #[test]
    fn supertrend_rejects_degenerate_input() {
        let bars = vec![bar(101.0, 99.0, 100.0); 5];
        assert!(calculate_supertrend(&bars, 10, 3.0).is_none());
        assert!(calculate_supertrend(&bars, 0, 3.0).is_none());
        assert!(calculate_supertrend(&bars, 3, 0.0).is_none());
    }

    #[test]
    fn supertrend_bullish_in_steady_rally() {
        let bars: Vec<Bar> = (0..60)
            .map(|i| {
                let base = 100.0 + i as f64 * 3.0;
                bar(base + 1.0, base - 1.0, base + 0.8)
            })
            .collect();
        let st = calculate_supertrend(&bars, 10, 3.0).unwrap();
        assert!(st.bullish);
        assert!(st.line < bars.last().unwrap().close);
    }

    #[test]
    fn supertrend_bearish_in_steady_selloff() {
        let bars: Vec<Bar> = (0..60)
            .map(|i| {
                let base = 300.0 - i as f64 * 3.0;
                bar(base + 1.0, base - 1.0, base - 0.8)
            })
            .collect();
        let st = calculate_supertrend(&bars, 10, 3.0).unwrap();
        assert!(!st.bullish);
        assert!(st.line > bars.last().unwrap().close);
    }
}
