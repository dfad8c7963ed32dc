// =============================================================================
// Volume-Weighted Average Price (VWAP)
// =============================================================================
//
//   VWAP = Σ(typical_price * volume) / Σ(volume)
//   typical_price = (H + L + C) / 3
//
// Computed over the supplied window; callers pass the session slice they
// care about.
// =============================================================================

use crate::types::Bar;

/// Compute VWAP over `bars`. Returns `None` on an empty slice or when the
/// total volume is zero (VWAP is undefined without traded volume).
pub fn calculate_vwap(bars: &[Bar]) -> Option<f64> {
    if bars.is_empty() {
        return None;
    }

    let mut pv_sum = 0.0;
    let mut vol_sum = 0.0;
    for b in bars {
        let typical = (b.high + b.low + b.close) / 3.0;
        pv_sum += typical * b.volume;
        vol_sum += b.volume;
    }

    if vol_sum <= 0.0 {
        return None;
    }

    let vwap = pv_sum / vol_sum;
    vwap.is_finite().then_some(vwap)
}
