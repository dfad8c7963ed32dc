// =============================================================================
// Confluence Exit — weighted aggregation of reversal detectors
// =============================================================================
//
// Six detectors, each a binary opinion weighted into a score in [0, 1]:
//
//   trend flip        0.25   fast EMA on the wrong side of slow
//   RSI divergence    0.20   RSI overextended and rolling over
//   MACD cross        0.15   MACD line through its signal, against us
//   Bollinger touch   0.15   price at the adverse band
//   price giveback    0.15   >= 50% of max favourable excursion surrendered
//   volume against    0.10   volume spike on a bar against the position
//
// The weights and the decision thresholds come from configuration; the score
// itself is a pure function of the inputs.
// =============================================================================

use crate::config::{ConfluenceConfig, StrategyParams};
use crate::indicators::rsi::calculate_rsi;
use crate::indicators::{IndicatorFrame, IndicatorId};
use crate::types::{Bar, Position, Side};

use super::ExitDecision;

/// Per-detector breakdown, kept for the event log.
#[derive(Debug, Clone, Default)]
pub struct ConfluenceBreakdown {
    pub trend_flip: bool,
    pub rsi_divergence: bool,
    pub macd_cross: bool,
    pub bollinger_touch: bool,
    pub giveback: bool,
    pub volume_against: bool,
    pub score: f64,
}

/// Indicator requirements the confluence scorer contributes.
pub fn requirements(params: &StrategyParams) -> Vec<IndicatorId> {
    vec![
        IndicatorId::Ema(params.ema_fast),
        IndicatorId::Ema(params.ema_slow),
        IndicatorId::Rsi(params.rsi_period),
        IndicatorId::Macd {
            fast: 12,
            slow: 26,
            signal: 9,
        },
        IndicatorId::bollinger(params.bb_period, params.bb_std),
        IndicatorId::VolumeRatio(20),
        IndicatorId::Atr(params.atr_period),
    ]
}

/// Score the reversal evidence against `position`.
pub fn score(
    position: &Position,
    frame: &IndicatorFrame,
    bars: &[Bar],
    cfg: &ConfluenceConfig,
    params: &StrategyParams,
) -> ConfluenceBreakdown {
    let w = &cfg.weights;
    let mut b = ConfluenceBreakdown::default();
    let against_long = position.side == Side::Long;

    // ── Trend flip ──────────────────────────────────────────────────────
    if let (Some(fast), Some(slow)) = (
        frame.scalar(IndicatorId::Ema(params.ema_fast)),
        frame.scalar(IndicatorId::Ema(params.ema_slow)),
    ) {
        b.trend_flip = if against_long { fast < slow } else { fast > slow };
    }

    // ── RSI divergence (overextended and rolling over) ──────────────────
    {
        let closes: Vec<f64> = bars.iter().map(|bar| bar.close).collect();
        let series = calculate_rsi(&closes, params.rsi_period);
        if series.len() >= 2 {
            let now = series[series.len() - 1];
            let prev = series[series.len() - 2];
            b.rsi_divergence = if against_long {
                now > 70.0 && now < prev
            } else {
                now < 30.0 && now > prev
            };
        }
    }

    // ── MACD cross ──────────────────────────────────────────────────────
    if let Some((macd, signal, _)) = frame.macd(IndicatorId::Macd {
        fast: 12,
        slow: 26,
        signal: 9,
    }) {
        b.macd_cross = if against_long { macd < signal } else { macd > signal };
    }

    // ── Bollinger touch ─────────────────────────────────────────────────
    if let Some((upper, _, lower, _)) = frame.bands(IndicatorId::bollinger(params.bb_period, params.bb_std)) {
        let price = position.current_price;
        b.bollinger_touch = if against_long { price >= upper } else { price <= lower };
    }

    // ── Price-action giveback ───────────────────────────────────────────
    if position.mfe > 0.0 && position.entry_price > 0.0 {
        let favourable_now =
            (position.side.sign() * (position.current_price - position.entry_price)).max(0.0);
        let surrendered = (position.mfe - favourable_now) / position.mfe;
        b.giveback = surrendered >= 0.5;
    }

    // ── Volume distribution against the position ────────────────────────
    if let (Some(ratio), Some(last)) = (frame.scalar(IndicatorId::VolumeRatio(20)), bars.last()) {
        let bar_against = if against_long {
            last.close < last.open
        } else {
            last.close > last.open
        };
        b.volume_against = ratio >= 1.5 && bar_against;
    }

    let weight_if = |hit: bool, weight: f64| if hit { weight } else { 0.0 };
    b.score = (weight_if(b.trend_flip, w.trend_flip)
        + weight_if(b.rsi_divergence, w.rsi_divergence)
        + weight_if(b.macd_cross, w.macd_cross)
        + weight_if(b.bollinger_touch, w.bollinger_touch)
        + weight_if(b.giveback, w.giveback)
        + weight_if(b.volume_against, w.volume))
    .clamp(0.0, 1.0);
    b
}

/// Map a score onto the exit decision per the configured thresholds.
pub fn decide(score: f64, cfg: &ConfluenceConfig) -> ExitDecision {
    let t = &cfg.thresholds;
    if score >= t.emergency {
        ExitDecision::Emergency
    } else if score >= t.close {
        ExitDecision::Close
    } else if score >= t.scale_out {
        ExitDecision::ScaleOut { fraction: 0.5 }
    } else {
        ExitDecision::Hold
    }
}
