// =============================================================================
// Strategy Set — seven pluggable signal generators
// =============================================================================
//
// Each strategy is a pure function of `(bar, indicator frame, context)`:
// identical inputs always produce the identical `Option<Signal>` (up to the
// generated signal id). All learned state lives outside the strategies, in
// the selector's performance ledger.
//
// Registration is explicit at startup: `registry()` returns the ordered set
// the selector scores. New strategies plug in by implementing `Strategy` and
// joining the registry — call sites never change.
// =============================================================================

use uuid::Uuid;

use crate::config::StrategyParams;
use crate::indicators::{IndicatorFrame, IndicatorId};
use crate::types::{Bar, Side, Signal, SignalRationale};

pub mod ema_cross;
pub mod mean_reversion;
pub mod momentum;
pub mod rsi_reversal;
pub mod scalping;
pub mod sma_cross;
pub mod trend_follow;

// ---------------------------------------------------------------------------
// Tags
// ---------------------------------------------------------------------------

/// Behavioural tags the risk evaluator keys on during drawdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyTag {
    /// Rejected once the drawdown ladder reaches Warning.
    AggressiveOnly,
    /// The only strategies admitted in the Danger state.
    RecoverySafe,
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Read-only inputs a strategy may consult beyond the frame. Bars are the
/// same window the frame was computed on, oldest first.
pub struct StrategyContext<'a> {
    pub params: &'a StrategyParams,
    pub bars: &'a [Bar],
}

// ---------------------------------------------------------------------------
// The strategy contract
// ---------------------------------------------------------------------------

pub trait Strategy: Send + Sync {
    fn id(&self) -> &'static str;

    fn tags(&self) -> &'static [StrategyTag] {
        &[]
    }

    /// Indicator requirements this strategy contributes to the cycle's
    /// requirement set. The resolver deduplicates across strategies.
    fn requirements(&self, params: &StrategyParams) -> Vec<IndicatorId>;

    /// Evaluate the latest bar. `None` means no edge here — the selector
    /// falls through to the next-ranked strategy.
    fn signal(&self, bar: &Bar, frame: &IndicatorFrame, ctx: &StrategyContext) -> Option<Signal>;
}

/// The full strategy set in registration order.
pub fn registry() -> Vec<Box<dyn Strategy>> {
    vec![
        Box::new(ema_cross::EmaCross),
        Box::new(sma_cross::SmaCross),
        Box::new(momentum::MomentumBreakout),
        Box::new(scalping::Scalping),
        Box::new(trend_follow::TrendFollowing),
        Box::new(mean_reversion::MeanReversion),
        Box::new(rsi_reversal::RsiReversal),
    ]
}

// ---------------------------------------------------------------------------
// Shared construction helpers
// ---------------------------------------------------------------------------

/// Stop and target hints from the configured ATR-multiple policy.
pub(crate) fn atr_hints(side: Side, price: f64, atr: f64, params: &StrategyParams) -> (f64, f64) {
    let stop = price - side.sign() * atr * params.sl_atr_mult;
    let target = price + side.sign() * atr * params.tp_atr_mult;
    (stop, target)
}

/// Assemble a signal with a fresh id and clamped confidence.
#[allow(clippy::too_many_arguments)]
pub(crate) fn make_signal(
    strategy_id: &'static str,
    bar: &Bar,
    side: Side,
    confidence: f64,
    stop_hint: f64,
    target_hint: f64,
    rationale: SignalRationale,
) -> Signal {
    Signal {
        id: Uuid::new_v4().to_string(),
        symbol: bar.symbol.clone(),
        side,
        confidence: confidence.clamp(0.0, 1.0),
        stop_hint,
        target_hint,
        strategy_id: strategy_id.to_string(),
        origin_bar_time: bar.open_time,
        rationale,
    }
}

// =============================================================================
// Shared test fixtures
// =============================================================================
#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use crate::types::Timeframe;
    use chrono::{Duration, TimeZone, Utc};
    use std::collections::HashSet;

    /// Bars from a closure of index -> close; high/low hug the close.
    pub fn bars_from(n: usize, close_at: impl Fn(usize) -> f64) -> Vec<Bar> {
        let t0 = Utc.with_ymd_and_hms(2025, 6, 2, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                let close = close_at(i);
                let open = if i == 0 { close } else { close_at(i - 1) };
                Bar {
                    symbol: "EURUSD".into(),
                    tf: Timeframe::M5,
                    open_time: t0 + Duration::minutes(5 * i as i64),
                    open,
                    high: close.max(open) + 0.0005,
                    low: close.min(open) - 0.0005,
                    close,
                    volume: 100.0,
                }
            })
            .collect()
    }

    /// Compute a frame holding exactly the requirements of `strategy`.
    pub fn frame_for(strategy: &dyn Strategy, params: &StrategyParams, bars: &[Bar]) -> IndicatorFrame {
        let req: HashSet<IndicatorId> = strategy.requirements(params).into_iter().collect();
        IndicatorFrame::compute("EURUSD", Timeframe::M5, bars, &req).unwrap()
    }

    pub fn eval(strategy: &dyn Strategy, params: &StrategyParams, bars: &[Bar]) -> Option<Signal> {
        let frame = frame_for(strategy, params, bars);
        let ctx = StrategyContext { params, bars };
        strategy.signal(bars.last().unwrap(), &frame, &ctx)
    }
}
