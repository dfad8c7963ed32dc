// =============================================================================
// Average True Range (ATR) — Wilder's smoothing
// =============================================================================
//
// True Range per bar:
//   TR = max(H - L, |H - prevClose|, |L - prevClose|)
//
// ATR seeds with the SMA of the first `period` TR values and then applies
//   ATR_t = (ATR_{t-1} * (period - 1) + TR_t) / period
// =============================================================================

use crate::types::Bar;

/// Compute the most recent ATR value from `bars` (oldest first).
///
/// Returns `None` when the period is zero, there are fewer than `period + 1`
/// bars, or any intermediate value is non-finite.
pub fn calculate_atr(bars: &[Bar], period: usize) -> Option<f64> {
    if period == 0 || bars.len() < period + 1 {
        return None;
    }

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
    if !atr.is_finite() {
        return None;
    }

    for &tr in &true_ranges[period..] {
        atr = (atr * (period_f - 1.0) + tr) / period_f;
        if !atr.is_finite() {
            return None;
        }
    }

    Some(atr)
}

/// ATR as a percentage of the latest close. Comparable across instruments
/// with different price scales.
pub fn calculate_atr_pct(bars: &[Bar], period: usize) -> Option<f64> {
    let atr = calculate_atr(bars, period)?;
    let close = bars.last()?.close;
    if close == 0.0 {
        return None;
    }
    Some(atr / close * 100.0)
}
