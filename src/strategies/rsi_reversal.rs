// =============================================================================
// RSI Reversal — exhaustion fades at momentum extremes
// =============================================================================
//
// Fades RSI beyond the configured bands. Calibration anchors: confidence
// 0.50 exactly at the threshold, rising linearly with extremity to 0.77 at a
// pinned RSI (0 or 100):
//
//   conf = 0.50 + 0.27 * (rsi - overbought) / (100 - overbought)   (short)
//   conf = 0.50 + 0.27 * (oversold - rsi) / oversold               (long)
// =============================================================================

use crate::indicators::{IndicatorFrame, IndicatorId};
use crate::strategies::{atr_hints, make_signal, Strategy, StrategyContext};
use crate::types::{Bar, Side, Signal, SignalRationale};

pub struct RsiReversal;

impl Strategy for RsiReversal {
    fn id(&self) -> &'static str {
        "rsi_reversal"
    }

    fn requirements(&self, params: &crate::config::StrategyParams) -> Vec<IndicatorId> {
        vec![
            IndicatorId::Rsi(params.rsi_period),
            IndicatorId::Atr(params.atr_period),
        ]
    }

    fn signal(&self, bar: &Bar, frame: &IndicatorFrame, ctx: &StrategyContext) -> Option<Signal> {
        let p = ctx.params;
        let rsi = frame.scalar(IndicatorId::Rsi(p.rsi_period))?;
        let atr = frame.scalar(IndicatorId::Atr(p.atr_period))?;
        if atr <= 0.0 {
            return None;
        }

        let (side, rationale, extremity) = if rsi <= p.rsi_oversold {
            let span = p.rsi_oversold.max(f64::EPSILON);
            (
                Side::Long,
                SignalRationale::Oversold,
                (p.rsi_oversold - rsi) / span,
            )
        } else if rsi >= p.rsi_overbought {
            let span = (100.0 - p.rsi_overbought).max(f64::EPSILON);
            (
                Side::Short,
                SignalRationale::Overbought,
                (rsi - p.rsi_overbought) / span,
            )
        } else {
            return None;
        };

        let confidence = 0.50 + 0.27 * extremity.clamp(0.0, 1.0);

        let (stop, target) = atr_hints(side, bar.close, atr, p);
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
    fn relentless_rally_fades_short() {
        let params = StrategyParams::default();
        // One-way rise pins RSI at 100.
        let bars = bars_from(60, |i| 1.0 + i as f64 * 0.002);
        let sig = eval(&RsiReversal, &params, &bars).expect("pinned RSI should fire");
        assert_eq!(sig.side, Side::Short);
        assert_eq!(sig.rationale, SignalRationale::Overbought);
        // Pinned RSI hits the top calibration anchor.
        assert!((sig.confidence - 0.77).abs() < 0.02);
    }

    #[test]
    fn relentless_selloff_fades_long() {
        let params = StrategyParams::default();
        let bars = bars_from(60, |i| 2.0 - i as f64 * 0.002);
        let sig = eval(&RsiReversal, &params, &bars).expect("pinned RSI should fire");
        assert_eq!(sig.side, Side::Long);
        assert_eq!(sig.rationale, SignalRationale::Oversold);
    }

    #[test]
    fn neutral_rsi_returns_none() {
        let params = StrategyParams::default();
        let bars = bars_from(60, |i| 1.0 + (i as f64 * 0.5).sin() * 0.001);
        assert!(eval(&RsiReversal, &params, &bars).is_none());
    }

    #[test]
    fn confidence_grows_with_extremity() {
        let params = StrategyParams::default();
        // A mild overshoot vs a pinned one.
        let mild = {
            let mut bars = bars_from(60, |i| 1.0 + (i as f64 * 0.5).sin() * 0.002);
            // Finish with several up bars to push RSI just over 70.
            for (k, bar) in bars.iter_mut().rev().take(8).enumerate() {
                bar.close += 0.004 * (8 - k) as f64;
            }
            bars
        };
        let pinned = bars_from(60, |i| 1.0 + i as f64 * 0.002);

        let mild_conf = eval(&RsiReversal, &params, &mild).map(|s| s.confidence);
        let pinned_conf = eval(&RsiReversal, &params, &pinned)
            .map(|s| s.confidence)
            .unwrap();
        if let Some(mild_conf) = mild_conf {
            assert!(pinned_conf > mild_conf);
        }
    }
}
