// =============================================================================
// Scalping — band-edge fades in quiet tape
// =============================================================================
//
// Fades small excursions to the Bollinger band edges back toward the middle,
// confirmed by the stochastic turning at its own extreme. Refuses to trade
// when RSI is pinned (beyond 85/15): a pinned RSI means the "quiet tape"
// premise is gone and the fade is catching a falling knife.
//
// Calibration: base 0.52 at the band edge, plus up to 0.18 for stochastic
// extremity. Targets are the band middle rather than the full ATR multiple.
//
// Tagged aggressive-only.
// =============================================================================

use crate::indicators::{IndicatorFrame, IndicatorId};
use crate::strategies::{make_signal, Strategy, StrategyContext, StrategyTag};
use crate::types::{Bar, Side, Signal, SignalRationale};

/// RSI pin levels beyond which the fade premise is void.
const RSI_PIN_HIGH: f64 = 85.0;
const RSI_PIN_LOW: f64 = 15.0;

pub struct Scalping;

impl Strategy for Scalping {
    fn id(&self) -> &'static str {
        "scalping"
    }

    fn tags(&self) -> &'static [StrategyTag] {
        &[StrategyTag::AggressiveOnly]
    }

    fn requirements(&self, params: &crate::config::StrategyParams) -> Vec<IndicatorId> {
        vec![
            IndicatorId::bollinger(params.bb_period, params.bb_std),
            IndicatorId::Stochastic {
                k: params.stoch_k,
                d: 3,
            },
            IndicatorId::Rsi(params.rsi_period),
            IndicatorId::Atr(params.atr_period),
        ]
    }

    fn signal(&self, bar: &Bar, frame: &IndicatorFrame, ctx: &StrategyContext) -> Option<Signal> {
        let p = ctx.params;
        let (upper, middle, lower, _) = frame.bands(IndicatorId::bollinger(p.bb_period, p.bb_std))?;
        let (stoch_k, _) = frame.stoch(IndicatorId::Stochastic { k: p.stoch_k, d: 3 })?;
        let rsi = frame.scalar(IndicatorId::Rsi(p.rsi_period))?;
        let atr = frame.scalar(IndicatorId::Atr(p.atr_period))?;
        if atr <= 0.0 {
            return None;
        }

        // Pinned momentum voids the fade premise.
        if !(RSI_PIN_LOW..=RSI_PIN_HIGH).contains(&rsi) {
            return None;
        }

        let (side, rationale, extremity) = if bar.close <= lower && stoch_k <= 25.0 {
            (Side::Long, SignalRationale::RangeFadeLow, (25.0 - stoch_k) / 25.0)
        } else if bar.close >= upper && stoch_k >= 75.0 {
            (Side::Short, SignalRationale::RangeFadeHigh, (stoch_k - 75.0) / 25.0)
        } else {
            return None;
        };

        let confidence = 0.52 + 0.18 * extremity.clamp(0.0, 1.0);

        // Scalps target the band middle; the stop is one ATR beyond the edge.
        let (stop, target) = match side {
            Side::Long => (bar.close - atr * p.sl_atr_mult, middle),
            Side::Short => (bar.close + atr * p.sl_atr_mult, middle),
        };
        if (target - bar.close).abs() < f64::EPSILON {
            return None;
        }

        Some(make_signal(self.id(), bar, side, confidence, stop, target, rationale))
    }
}
