// =============================================================================
// Mean Reversion — band-escape snap-back
// =============================================================================
//
// Fades a close beyond the Bollinger bands once the bar itself shows
// rejection (a close back off the extreme). Distinct from scalping: this
// strategy wants a genuine escape and rejection wick, not a quiet-tape edge
// touch, and it targets the middle band with a VWAP sanity check.
//
// Calibration: base 0.54 plus up to 0.24 for escape depth in band widths.
//
// Tagged recovery-safe.
// =============================================================================

use crate::indicators::{IndicatorFrame, IndicatorId};
use crate::strategies::{make_signal, Strategy, StrategyContext, StrategyTag};
use crate::types::{Bar, Side, Signal, SignalRationale};

pub struct MeanReversion;

impl Strategy for MeanReversion {
    fn id(&self) -> &'static str {
        "mean_reversion"
    }

    fn tags(&self) -> &'static [StrategyTag] {
        &[StrategyTag::RecoverySafe]
    }

    fn requirements(&self, params: &crate::config::StrategyParams) -> Vec<IndicatorId> {
        vec![
            IndicatorId::bollinger(params.bb_period, params.bb_std),
            IndicatorId::Vwap(params.bb_period),
            IndicatorId::Atr(params.atr_period),
        ]
    }

    fn signal(&self, bar: &Bar, frame: &IndicatorFrame, ctx: &StrategyContext) -> Option<Signal> {
        let p = ctx.params;
        let (upper, middle, lower, _) = frame.bands(IndicatorId::bollinger(p.bb_period, p.bb_std))?;
        let vwap = frame.scalar(IndicatorId::Vwap(p.bb_period))?;
        let atr = frame.scalar(IndicatorId::Atr(p.atr_period))?;
        if atr <= 0.0 {
            return None;
        }

        let band_span = upper - lower;
        if band_span <= 0.0 {
            return None;
        }

        // Escape below with rejection: low well under the band, close back up
        // toward it, and the mean (VWAP) above us to revert to.
        let long_setup = bar.low < lower && bar.close > bar.low && bar.close < middle && vwap > bar.close;
        let short_setup = bar.high > upper && bar.close < bar.high && bar.close > middle && vwap < bar.close;

        let (side, rationale, depth) = if long_setup {
            (Side::Long, SignalRationale::Oversold, (lower - bar.low) / band_span)
        } else if short_setup {
            (Side::Short, SignalRationale::Overbought, (bar.high - upper) / band_span)
        } else {
            return None;
        };

        let confidence = 0.54 + 0.24 * depth.clamp(0.0, 1.0);

        let (stop, target) = match side {
            Side::Long => (bar.low - atr * 0.5, middle),
            Side::Short => (bar.high + atr * 0.5, middle),
        };

        Some(make_signal(self.id(), bar, side, confidence, stop, target, rationale))
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrategyParams;
    use crate::strategies::testutil::{bars_from, eval};

    /// Quiet tape then a deep flush below the band with a rejection close.
    fn flush_fixture() -> Vec<Bar> {
        let mut bars = bars_from(80, |i| 1.0 + (i as f64 * 0.7).sin() * 0.001);
        let last = bars.last_mut().unwrap();
        last.open = 0.9995;
        last.low = 0.990; // deep flush
        last.close = 0.9965; // rejection close, still under the middle
        last.high = last.open;
        bars
    }

    #[test]
    fn flush_with_rejection_goes_long() {
        let params = StrategyParams::default();
        let sig = eval(&MeanReversion, &params, &flush_fixture()).expect("flush should fire");
        assert_eq!(sig.side, Side::Long);
        assert_eq!(sig.rationale, SignalRationale::Oversold);
        assert!(sig.target_hint > sig.stop_hint);
        assert!((0.54..=0.79).contains(&sig.confidence));
    }

    #[test]
    fn close_at_the_low_is_not_rejection() {
        let params = StrategyParams::default();
        let mut bars = flush_fixture();
        let last = bars.last_mut().unwrap();
        last.close = last.low; // no rejection wick
        assert!(eval(&MeanReversion, &params, &bars).is_none());
    }

    #[test]
    fn mid_band_tape_returns_none() {
        let params = StrategyParams::default();
        let bars = bars_from(80, |i| 1.0 + (i as f64 * 0.7).sin() * 0.001);
        assert!(eval(&MeanReversion, &params, &bars).is_none());
    }
}
