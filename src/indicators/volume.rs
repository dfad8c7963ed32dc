// =============================================================================
// Volume statistics
// =============================================================================
//
// Rolling volume features consumed by the regime classifier, the momentum
// strategy, and the liquidity-trap filter.
// =============================================================================

use crate::types::Bar;

/// Ratio of the latest bar's volume to the mean of the preceding `lookback`
/// bars. 1.0 means average participation; > 1.5 reads as a spike.
pub fn volume_ratio(bars: &[Bar], lookback: usize) -> Option<f64> {
    if lookback == 0 || bars.len() < lookback + 1 {
        return None;
    }

    let last = bars.last()?.volume;
    let window = &bars[bars.len() - 1 - lookback..bars.len() - 1];
    let mean = window.iter().map(|b| b.volume).sum::<f64>() / lookback as f64;
    if mean <= 0.0 {
        return None;
    }

    let ratio = last / mean;
    ratio.is_finite().then_some(ratio)
}

/// Mean volume over the last `lookback` bars.
pub fn mean_volume(bars: &[Bar], lookback: usize) -> Option<f64> {
    if lookback == 0 || bars.len() < lookback {
        return None;
    }
    let window = &bars[bars.len() - lookback..];
    let mean = window.iter().map(|b| b.volume).sum::<f64>() / lookback as f64;
    mean.is_finite().then_some(mean)
}

/// True when the latest bar prints above-average volume against a falling
/// price, or vice versa — the volume/price divergence used by the
/// liquidity-trap filter.
pub fn volume_price_divergence(bars: &[Bar], lookback: usize, spike_ratio: f64) -> Option<bool> {
    let ratio = volume_ratio(bars, lookback)?;
    let last = bars.last()?;
    if bars.len() < 2 {
        return Some(false);
    }
    let prev = &bars[bars.len() - 2];
    let price_up = last.close > prev.close;
    let body = (last.close - last.open).abs();
    let range = (last.high - last.low).max(f64::EPSILON);
    // Spike volume on a small-bodied bar is absorption, not continuation.
    let small_body = body / range < 0.35;
    Some(ratio >= spike_ratio && (small_body || !price_up == (last.close >= last.open)))
}
