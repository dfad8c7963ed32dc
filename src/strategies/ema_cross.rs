// =============================================================================
// EMA Cross — fast/slow exponential crossover
// =============================================================================
//
// Fires when the fast EMA crosses the slow EMA on the latest bar. Confidence
// calibration: base 0.55 at a bare cross, plus up to 0.25 for separation
// (|fast - slow| measured in ATRs) and up to 0.20 for close alignment with
// the cross direction. Anchors: bare cross 0.55, one-ATR separation with
// aligned close ~0.80.
// =============================================================================

use crate::indicators::ema::calculate_ema;
use crate::indicators::{IndicatorFrame, IndicatorId};
use crate::strategies::{atr_hints, make_signal, Strategy, StrategyContext};
use crate::types::{Bar, Side, Signal, SignalRationale};

pub struct EmaCross;

impl Strategy for EmaCross {
    fn id(&self) -> &'static str {
        "ema_cross"
    }

    fn requirements(&self, params: &crate::config::StrategyParams) -> Vec<IndicatorId> {
        vec![
            IndicatorId::Ema(params.ema_fast),
            IndicatorId::Ema(params.ema_slow),
            IndicatorId::Atr(params.atr_period),
        ]
    }

    fn signal(&self, bar: &Bar, frame: &IndicatorFrame, ctx: &StrategyContext) -> Option<Signal> {
        let atr = frame.scalar(IndicatorId::Atr(ctx.params.atr_period))?;

        // Cross detection needs the previous EMA pair as well as the current
        // one, so compute the short series over the context bars.
        let closes: Vec<f64> = ctx.bars.iter().map(|b| b.close).collect();
        let fast = calculate_ema(&closes, ctx.params.ema_fast);
        let slow = calculate_ema(&closes, ctx.params.ema_slow);
        if fast.len() < 2 || slow.len() < 2 {
            return None;
        }

        let (f_now, f_prev) = (fast[fast.len() - 1], fast[fast.len() - 2]);
        let (s_now, s_prev) = (slow[slow.len() - 1], slow[slow.len() - 2]);

        let crossed_up = f_prev <= s_prev && f_now > s_now;
        let crossed_down = f_prev >= s_prev && f_now < s_now;

        let (side, rationale) = if crossed_up {
            (Side::Long, SignalRationale::CrossAbove)
        } else if crossed_down {
            (Side::Short, SignalRationale::CrossBelow)
        } else {
            return None;
        };

        if atr <= 0.0 {
            return None;
        }

        let separation = ((f_now - s_now).abs() / atr).min(1.0);
        let aligned = match side {
            Side::Long => bar.close > f_now,
            Side::Short => bar.close < f_now,
        };
        let confidence = 0.55 + 0.25 * separation + if aligned { 0.20 * separation.max(0.3) } else { 0.0 };

        let (stop, target) = atr_hints(side, bar.close, atr, ctx.params);
        Some(make_signal(self.id(), bar, side, confidence, stop, target, rationale))
    }
}
