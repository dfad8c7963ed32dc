// =============================================================================
// Trend Following — pullback entries in an established trend
// =============================================================================
//
// Joins an established trend on a pullback: price on the right side of the
// trend EMA, ADX confirming strength, supertrend agreeing, and the latest
// bar dipping against the trend before closing back with it. Calibration:
// base 0.58, plus up to 0.22 for ADX above the minimum.
//
// Tagged recovery-safe: the pullback structure carries a defined invalidation
// (the supertrend line), so it stays admissible deep into drawdown.
// =============================================================================

use crate::indicators::{IndicatorFrame, IndicatorId};
use crate::strategies::{atr_hints, make_signal, Strategy, StrategyContext, StrategyTag};
use crate::types::{Bar, Side, Signal, SignalRationale};

pub struct TrendFollowing;

impl Strategy for TrendFollowing {
    fn id(&self) -> &'static str {
        "trend_following"
    }

    fn tags(&self) -> &'static [StrategyTag] {
        &[StrategyTag::RecoverySafe]
    }

    fn requirements(&self, params: &crate::config::StrategyParams) -> Vec<IndicatorId> {
        vec![
            IndicatorId::Ema(params.trend_ema),
            IndicatorId::Adx(14),
            IndicatorId::supertrend(10, 3.0),
            IndicatorId::Atr(params.atr_period),
        ]
    }

    fn signal(&self, bar: &Bar, frame: &IndicatorFrame, ctx: &StrategyContext) -> Option<Signal> {
        let p = ctx.params;
        let trend_ema = frame.scalar(IndicatorId::Ema(p.trend_ema))?;
        let adx = frame.scalar(IndicatorId::Adx(14))?;
        let (st_line, st_bullish) = frame.supertrend(IndicatorId::supertrend(10, 3.0))?;
        let atr = frame.scalar(IndicatorId::Atr(p.atr_period))?;
        if atr <= 0.0 || adx < p.trend_adx_min {
            return None;
        }

        let prev = ctx.bars.get(ctx.bars.len().checked_sub(2)?)?;

        // Long setup: uptrend context and a dip that recovered.
        let long_setup = st_bullish
            && bar.close > trend_ema
            && prev.low < bar.low.min(prev.close) // the dip
            && bar.close > bar.open; // recovery bar
        // Short setup mirrors it.
        let short_setup = !st_bullish
            && bar.close < trend_ema
            && prev.high > bar.high.max(prev.close)
            && bar.close < bar.open;

        let side = if long_setup {
            Side::Long
        } else if short_setup {
            Side::Short
        } else {
            return None;
        };

        let adx_score = ((adx - p.trend_adx_min) / 25.0).clamp(0.0, 1.0);
        let confidence = 0.58 + 0.22 * adx_score;

        // The supertrend line is the natural invalidation; fall back to the
        // ATR stop when the line sits further away.
        let (atr_stop, target) = atr_hints(side, bar.close, atr, p);
        let stop = match side {
            Side::Long => atr_stop.max(st_line),
            Side::Short => atr_stop.min(st_line),
        };

        Some(make_signal(
            self.id(),
            bar,
            side,
            confidence,
            stop,
            target,
            SignalRationale::TrendPullback,
        ))
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

    /// Strong staircase uptrend with a one-bar dip-and-recover at the end.
    fn pullback_fixture() -> Vec<Bar> {
        let mut bars = bars_from(120, |i| 1.0 + i as f64 * 0.004);
        let n = bars.len();
        // Dip bar.
        bars[n - 2].low = bars[n - 2].close - 0.01;
        bars[n - 2].close -= 0.006;
        // Recovery bar closes back up.
        bars[n - 1].open = bars[n - 2].close;
        bars[n - 1].close = bars[n - 2].close + 0.008;
        bars[n - 1].high = bars[n - 1].close + 0.001;
        bars[n - 1].low = bars[n - 1].open - 0.001;
        bars
    }

    #[test]
    fn pullback_in_uptrend_goes_long() {
        let params = StrategyParams::default();
        let sig = eval(&TrendFollowing, &params, &pullback_fixture()).expect("pullback should fire");
        assert_eq!(sig.side, Side::Long);
        assert_eq!(sig.rationale, SignalRationale::TrendPullback);
        assert!(sig.confidence >= 0.58);
        assert!(sig.stop_hint < sig.target_hint);
    }

    #[test]
    fn flat_tape_has_no_trend_to_follow() {
        let params = StrategyParams::default();
        let bars = bars_from(120, |i| 1.0 + (i as f64 * 0.5).sin() * 0.001);
        assert!(eval(&TrendFollowing, &params, &bars).is_none());
    }

    #[test]
    fn tagged_recovery_safe() {
        assert!(TrendFollowing.tags().contains(&StrategyTag::RecoverySafe));
    }
}
