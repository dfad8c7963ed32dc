// =============================================================================
// Average Directional Index (ADX)
// =============================================================================
//
// ADX quantifies trend strength regardless of direction:
//
//   1. +DM / -DM and True Range per bar.
//   2. Wilder's smoothing of all three over `period`.
//   3. +DI = smoothed(+DM)/smoothed(TR)*100, -DI likewise.
//   4. DX  = |+DI - -DI| / (+DI + -DI) * 100
//   5. ADX = Wilder's smoothed average of DX.
//
// ADX > 25 reads as trending; ADX < 20 as ranging chop.
// =============================================================================

use crate::types::Bar;

/// Directional reading: ADX plus the two directional index lines.
#[derive(Debug, Clone, Copy)]
pub struct AdxResult {
    pub adx: f64,
    pub plus_di: f64,
    pub minus_di: f64,
}

/// Compute the most recent ADX from `bars` (oldest first).
///
/// Needs at least `2 * period + 1` bars: `period` transitions for the initial
/// smoothing and another `period` DX values to seed the ADX average.
pub fn calculate_adx(bars: &[Bar], period: usize) -> Option<AdxResult> {
    if period == 0 || bars.len() < 2 * period + 1 {
        return None;
    }

    let period_f = period as f64;
    let transitions = bars.len() - 1;

    let mut plus_dm = Vec::with_capacity(transitions);
    let mut minus_dm = Vec::with_capacity(transitions);
    let mut tr_vals = Vec::with_capacity(transitions);

    for pair in bars.windows(2) {
        let prev = &pair[0];
        let cur = &pair[1];

        let tr = (cur.high - cur.low)
            .max((cur.high - prev.close).abs())
            .max((cur.low - prev.close).abs());

        let up_move = cur.high - prev.high;
        let down_move = prev.low - cur.low;

        plus_dm.push(if up_move > down_move && up_move > 0.0 {
            up_move
        } else {
            0.0
        });
        minus_dm.push(if down_move > up_move && down_move > 0.0 {
            down_move
        } else {
            0.0
        });
        tr_vals.push(tr);
    }

    let mut smooth_plus: f64 = plus_dm[..period].iter().sum();
    let mut smooth_minus: f64 = minus_dm[..period].iter().sum();
    let mut smooth_tr: f64 = tr_vals[..period].iter().sum();

    let mut dx_values = Vec::with_capacity(transitions - period + 1);
    dx_values.push(dx_from(smooth_plus, smooth_minus, smooth_tr)?);

    for i in period..transitions {
        smooth_plus = smooth_plus - smooth_plus / period_f + plus_dm[i];
        smooth_minus = smooth_minus - smooth_minus / period_f + minus_dm[i];
        smooth_tr = smooth_tr - smooth_tr / period_f + tr_vals[i];
        dx_values.push(dx_from(smooth_plus, smooth_minus, smooth_tr)?);
    }

    if dx_values.len() < period {
        return None;
    }

    let mut adx = dx_values[..period].iter().sum::<f64>() / period_f;
    for &dx in &dx_values[period..] {
        adx = (adx * (period_f - 1.0) + dx) / period_f;
        if !adx.is_finite() {
            return None;
        }
    }

    if smooth_tr == 0.0 {
        return None;
    }
    let plus_di = smooth_plus / smooth_tr * 100.0;
    let minus_di = smooth_minus / smooth_tr * 100.0;

    adx.is_finite().then_some(AdxResult {
        adx,
        plus_di,
        minus_di,
    })
}

fn dx_from(smooth_plus: f64, smooth_minus: f64, smooth_tr: f64) -> Option<f64> {
    if smooth_tr == 0.0 {
        return None;
    }
    let plus_di = smooth_plus / smooth_tr * 100.0;
    let minus_di = smooth_minus / smooth_tr * 100.0;
    let di_sum = plus_di + minus_di;
    if di_sum == 0.0 {
        return Some(0.0);
    }
    let dx = (plus_di - minus_di).abs() / di_sum * 100.0;
    dx.is_finite().then_some(dx)
}
