// =============================================================================
// Strategy Selector — regime × performance scored selection with fallback
// =============================================================================
//
// Scores every registered strategy as
//
//   score = w_regime * affinity(strategy, regime)
//         + w_perf   * perf(strategy)
//         + w_recent * recency(strategy)
//
// then invokes them in score order: the top strategy first, and on an empty
// hand up to `max_fallbacks` more. Ties break on registration order, so the
// whole selection is deterministic given identical inputs.
//
// Performance state is a rolling window of the last N trade outcomes per
// strategy (default 50): wins, losses, profit factor, mean R-multiple.
// =============================================================================

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::debug;

use crate::config::SelectorConfig;
use crate::indicators::{IndicatorFrame, IndicatorId};
use crate::regime::Regime;
use crate::strategies::{Strategy, StrategyContext, StrategyTag};
use crate::types::{Bar, Signal};

// ---------------------------------------------------------------------------
// Performance ledger
// ---------------------------------------------------------------------------

/// One closed trade attributed to a strategy, in R-multiples.
#[derive(Debug, Clone, Copy)]
pub struct TradeOutcome {
    pub r_multiple: f64,
}

#[derive(Debug, Default)]
struct PerfWindow {
    outcomes: VecDeque<TradeOutcome>,
}

impl PerfWindow {
    fn push(&mut self, outcome: TradeOutcome, cap: usize) {
        self.outcomes.push_back(outcome);
        while self.outcomes.len() > cap {
            self.outcomes.pop_front();
        }
    }

    fn wins(&self) -> usize {
        self.outcomes.iter().filter(|o| o.r_multiple > 0.0).count()
    }

    fn losses(&self) -> usize {
        self.outcomes.len() - self.wins()
    }

    fn profit_factor(&self) -> f64 {
        let gross_win: f64 = self
            .outcomes
            .iter()
            .map(|o| o.r_multiple)
            .filter(|r| *r > 0.0)
            .sum();
        let gross_loss: f64 = self
            .outcomes
            .iter()
            .map(|o| o.r_multiple)
            .filter(|r| *r < 0.0)
            .map(f64::abs)
            .sum();
        if gross_loss > 0.0 {
            gross_win / gross_loss
        } else if gross_win > 0.0 {
            f64::INFINITY
        } else {
            0.0
        }
    }

    fn mean_r(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.0;
        }
        self.outcomes.iter().map(|o| o.r_multiple).sum::<f64>() / self.outcomes.len() as f64
    }

    /// Normalised overall performance in [0, 1]; 0.5 with no history.
    fn perf_score(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.5;
        }
        let win_rate = self.wins() as f64 / self.outcomes.len() as f64;
        let r_component = (self.mean_r() / 2.0 + 0.5).clamp(0.0, 1.0);
        0.5 * win_rate + 0.5 * r_component
    }

    /// Exponentially weighted recent form in [0, 1]; 0.5 with no history.
    fn recency_score(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.5;
        }
        let mut weight = 1.0;
        let mut total_weight = 0.0;
        let mut score = 0.0;
        for outcome in self.outcomes.iter().rev().take(10) {
            score += weight * if outcome.r_multiple > 0.0 { 1.0 } else { 0.0 };
            total_weight += weight;
            weight *= 0.85;
        }
        score / total_weight
    }
}

// ---------------------------------------------------------------------------
// Regime affinity
// ---------------------------------------------------------------------------

/// Static affinity of each strategy for each regime, in [0, 1].
fn affinity(strategy_id: &str, regime: Regime) -> f64 {
    use Regime::*;
    match strategy_id {
        "ema_cross" => match regime {
            TrendingUpStrong | TrendingDownStrong => 0.90,
            TrendingUpWeak | TrendingDownWeak => 0.70,
            VolatileBreakout => 0.55,
            RangingWide => 0.35,
            RangingTight | VolatileConsolidation => 0.25,
            Reversal => 0.20,
            Unknown => 0.40,
        },
        "sma_cross" => match regime {
            TrendingUpStrong | TrendingDownStrong => 0.80,
            TrendingUpWeak | TrendingDownWeak => 0.65,
            VolatileBreakout => 0.40,
            RangingWide | RangingTight => 0.30,
            VolatileConsolidation => 0.25,
            Reversal => 0.20,
            Unknown => 0.35,
        },
        "momentum_breakout" => match regime {
            VolatileBreakout => 0.90,
            TrendingUpStrong | TrendingDownStrong => 0.70,
            RangingTight => 0.55, // compression precedes the break
            TrendingUpWeak | TrendingDownWeak => 0.45,
            VolatileConsolidation => 0.35,
            RangingWide => 0.25,
            Reversal => 0.15,
            Unknown => 0.30,
        },
        "scalping" => match regime {
            RangingTight => 0.90,
            RangingWide => 0.70,
            VolatileConsolidation => 0.40,
            TrendingUpWeak | TrendingDownWeak => 0.30,
            Reversal => 0.25,
            TrendingUpStrong | TrendingDownStrong | VolatileBreakout => 0.15,
            Unknown => 0.30,
        },
        "trend_following" => match regime {
            TrendingUpStrong | TrendingDownStrong => 0.95,
            TrendingUpWeak | TrendingDownWeak => 0.75,
            VolatileBreakout => 0.50,
            Unknown => 0.35,
            RangingWide | VolatileConsolidation => 0.25,
            RangingTight => 0.20,
            Reversal => 0.15,
        },
        "mean_reversion" => match regime {
            RangingWide => 0.85,
            VolatileConsolidation => 0.60,
            Reversal => 0.60,
            RangingTight => 0.55,
            TrendingUpWeak | TrendingDownWeak => 0.30,
            Unknown => 0.35,
            TrendingUpStrong | TrendingDownStrong | VolatileBreakout => 0.15,
        },
        "rsi_reversal" => match regime {
            Reversal => 0.90,
            RangingWide => 0.60,
            VolatileConsolidation => 0.50,
            RangingTight => 0.45,
            VolatileBreakout => 0.40,
            TrendingUpWeak | TrendingDownWeak => 0.30,
            Unknown => 0.35,
            TrendingUpStrong | TrendingDownStrong => 0.25,
        },
        _ => 0.30,
    }
}

// ---------------------------------------------------------------------------
// Selector
// ---------------------------------------------------------------------------

/// Result of one selection pass, including provenance for the event log.
#[derive(Debug)]
pub struct Selection {
    pub signal: Option<Signal>,
    /// Strategy ids invoked, in order, including the one that produced the
    /// signal (if any).
    pub tried: Vec<String>,
}

pub struct StrategySelector {
    strategies: Vec<Box<dyn Strategy>>,
    perf: HashMap<String, PerfWindow>,
    cfg: SelectorConfig,
}

impl StrategySelector {
    pub fn new(strategies: Vec<Box<dyn Strategy>>, cfg: SelectorConfig) -> Self {
        Self {
            strategies,
            perf: HashMap::new(),
            cfg,
        }
    }

    /// Union of indicator requirements across the whole set. Shared
    /// requirements collapse here before the frame is computed.
    pub fn requirements(&self, params: &crate::config::StrategyParams) -> HashSet<IndicatorId> {
        self.strategies
            .iter()
            .flat_map(|s| s.requirements(params))
            .collect()
    }

    /// Record the outcome of a closed trade against its strategy.
    pub fn record_outcome(&mut self, strategy_id: &str, r_multiple: f64) {
        self.perf
            .entry(strategy_id.to_string())
            .or_default()
            .push(TradeOutcome { r_multiple }, self.cfg.perf_window);
    }

    /// Current rolling stats for telemetry: (wins, losses, profit_factor,
    /// mean_r) per strategy.
    pub fn perf_stats(&self, strategy_id: &str) -> Option<(usize, usize, f64, f64)> {
        let w = self.perf.get(strategy_id)?;
        Some((w.wins(), w.losses(), w.profit_factor(), w.mean_r()))
    }

    /// Tags of a strategy by id, for the risk evaluator's drawdown gate.
    pub fn tags_of(&self, strategy_id: &str) -> &'static [StrategyTag] {
        self.strategies
            .iter()
            .find(|s| s.id() == strategy_id)
            .map(|s| s.tags())
            .unwrap_or(&[])
    }

    /// Score the whole set under `regime`, highest first. Ties break on
    /// registration order.
    pub fn ranked(&self, regime: Regime) -> Vec<(usize, f64)> {
        let mut scored: Vec<(usize, f64)> = self
            .strategies
            .iter()
            .enumerate()
            .map(|(idx, s)| {
                let window = self.perf.get(s.id());
                let perf = window.map(|w| w.perf_score()).unwrap_or(0.5);
                let recent = window.map(|w| w.recency_score()).unwrap_or(0.5);
                let score = self.cfg.w_regime * affinity(s.id(), regime)
                    + self.cfg.w_perf * perf
                    + self.cfg.w_recent * recent;
                (idx, score)
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));
        scored
    }

    /// Invoke the ranked set until a signal appears or the fallback budget is
    /// spent.
    pub fn select(
        &self,
        regime: Regime,
        bar: &Bar,
        frame: &IndicatorFrame,
        ctx: &StrategyContext,
    ) -> Selection {
        let ranked = self.ranked(regime);
        let budget = 1 + self.cfg.max_fallbacks;
        let mut tried = Vec::new();

        for &(idx, score) in ranked.iter().take(budget) {
            let strategy = &self.strategies[idx];
            tried.push(strategy.id().to_string());

            if let Some(signal) = strategy.signal(bar, frame, ctx) {
                debug!(
                    strategy = strategy.id(),
                    score = format!("{:.3}", score),
                    regime = %regime,
                    attempt = tried.len(),
                    "selector produced signal"
                );
                return Selection {
                    signal: Some(signal),
                    tried,
                };
            }
        }

        debug!(regime = %regime, tried = ?tried, "selector found no signal");
        Selection {
            signal: None,
            tried,
        }
    }
}
