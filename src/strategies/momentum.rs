// =============================================================================
// Momentum Breakout — range break on participation
// =============================================================================
//
// Fires when the latest close escapes the N-bar high/low with a volume
// spike confirming participation. Calibration: base 0.55 at a bare break,
// plus up to 0.20 for break distance (in ATRs) and up to 0.15 for volume
// ratio above the spike threshold.
//
// Tagged aggressive-only: breakout entries are the first thing the risk
// evaluator turns off when drawdown deepens.
// =============================================================================

use crate::indicators::{IndicatorFrame, IndicatorId};
use crate::strategies::{atr_hints, make_signal, Strategy, StrategyContext, StrategyTag};
use crate::types::{Bar, Side, Signal, SignalRationale};

pub struct MomentumBreakout;

impl Strategy for MomentumBreakout {
    fn id(&self) -> &'static str {
        "momentum_breakout"
    }

    fn tags(&self) -> &'static [StrategyTag] {
        &[StrategyTag::AggressiveOnly]
    }

    fn requirements(&self, params: &crate::config::StrategyParams) -> Vec<IndicatorId> {
        vec![
            IndicatorId::Atr(params.atr_period),
            IndicatorId::VolumeRatio(params.breakout_lookback),
        ]
    }

    fn signal(&self, bar: &Bar, frame: &IndicatorFrame, ctx: &StrategyContext) -> Option<Signal> {
        let atr = frame.scalar(IndicatorId::Atr(ctx.params.atr_period))?;
        let vol_ratio = frame.scalar(IndicatorId::VolumeRatio(ctx.params.breakout_lookback))?;
        if atr <= 0.0 {
            return None;
        }

        let lookback = ctx.params.breakout_lookback;
        if ctx.bars.len() < lookback + 1 {
            return None;
        }
        // The reference window excludes the breakout bar itself.
        let window = &ctx.bars[ctx.bars.len() - 1 - lookback..ctx.bars.len() - 1];
        let range_high = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
        let range_low = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);

        let (side, rationale, distance) = if bar.close > range_high {
            (Side::Long, SignalRationale::BreakoutHigh, bar.close - range_high)
        } else if bar.close < range_low {
            (Side::Short, SignalRationale::BreakoutLow, range_low - bar.close)
        } else {
            return None;
        };

        // No participation, no trade.
        if vol_ratio < ctx.params.volume_spike_ratio {
            return None;
        }

        let distance_score = (distance / atr).min(1.0);
        let volume_score =
            ((vol_ratio - ctx.params.volume_spike_ratio) / ctx.params.volume_spike_ratio).min(1.0);
        let confidence = 0.55 + 0.20 * distance_score + 0.15 * volume_score;

        let (stop, target) = atr_hints(side, bar.close, atr, ctx.params);
        Some(make_signal(self.id(), bar, side, confidence, stop, target, rationale))
    }
}
