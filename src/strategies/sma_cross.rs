// =============================================================================
// SMA Cross — fast/slow simple-average crossover
// =============================================================================
//
// The slower sibling of the EMA cross: same trigger geometry, simple
// averages, longer default periods. Calibration: base 0.50 at a bare cross
// plus up to 0.30 for separation in ATRs — the SMA cross lags more, so it
// never reaches the EMA cross's top anchor.
// =============================================================================

use crate::indicators::sma::calculate_sma;
use crate::indicators::{IndicatorFrame, IndicatorId};
use crate::strategies::{atr_hints, make_signal, Strategy, StrategyContext};
use crate::types::{Bar, Side, Signal, SignalRationale};

pub struct SmaCross;

impl Strategy for SmaCross {
    fn id(&self) -> &'static str {
        "sma_cross"
    }

    fn requirements(&self, params: &crate::config::StrategyParams) -> Vec<IndicatorId> {
        vec![
            IndicatorId::Sma(params.sma_fast),
            IndicatorId::Sma(params.sma_slow),
            IndicatorId::Atr(params.atr_period),
        ]
    }

    fn signal(&self, bar: &Bar, frame: &IndicatorFrame, ctx: &StrategyContext) -> Option<Signal> {
        let atr = frame.scalar(IndicatorId::Atr(ctx.params.atr_period))?;
        if atr <= 0.0 {
            return None;
        }

        let closes: Vec<f64> = ctx.bars.iter().map(|b| b.close).collect();
        let fast = calculate_sma(&closes, ctx.params.sma_fast);
        let slow = calculate_sma(&closes, ctx.params.sma_slow);
        if fast.len() < 2 || slow.len() < 2 {
            return None;
        }

        let (f_now, f_prev) = (fast[fast.len() - 1], fast[fast.len() - 2]);
        let (s_now, s_prev) = (slow[slow.len() - 1], slow[slow.len() - 2]);

        let (side, rationale) = if f_prev <= s_prev && f_now > s_now {
            (Side::Long, SignalRationale::CrossAbove)
        } else if f_prev >= s_prev && f_now < s_now {
            (Side::Short, SignalRationale::CrossBelow)
        } else {
            return None;
        };

        let separation = ((f_now - s_now).abs() / atr).min(1.0);
        let confidence = 0.50 + 0.30 * separation;

        let (stop, target) = atr_hints(side, bar.close, atr, ctx.params);
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

    #[test]
    fn quiet_drift_produces_nothing() {
        let params = StrategyParams::default();
        let bars = bars_from(120, |i| 1.0 + i as f64 * 0.0001);
        assert!(eval(&SmaCross, &params, &bars).is_none());
    }

    #[test]
    fn trend_flip_eventually_crosses() {
        let params = StrategyParams::default();
        let bars = bars_from(160, |i| {
            if i < 120 {
                2.0 - i as f64 * 0.004
            } else {
                1.52 + (i - 120) as f64 * 0.015
            }
        });
        let crossed = (100..=160).rev().any(|end| {
            eval(&SmaCross, &params, &bars[..end])
                .map(|s| s.side == Side::Long)
                .unwrap_or(false)
        });
        assert!(crossed, "expected a long SMA cross after the flip");
    }

    #[test]
    fn confidence_stays_below_ema_anchor() {
        let params = StrategyParams::default();
        let bars = bars_from(160, |i| {
            if i < 120 {
                2.0 - i as f64 * 0.004
            } else {
                1.52 + (i - 120) as f64 * 0.015
            }
        });
        for end in (100..=160).rev() {
            if let Some(sig) = eval(&SmaCross, &params, &bars[..end]) {
                assert!(sig.confidence <= 0.80);
                return;
            }
        }
        panic!("no cross found in fixture");
    }
}
