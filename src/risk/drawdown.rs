// =============================================================================
// Risk Ledger — drawdown state, streaks, and trade-frequency counters
// =============================================================================
//
// Process-wide risk state, owned exclusively by the trading loop. Mutated by
// equity observations and trade outcomes; never reset except by explicit
// operator action. `peak_equity` is monotone non-decreasing for the life of
// the ledger — that is the anchor every drawdown number hangs off.
//
// The drawdown ladder maps `current_dd_pct` onto categorical severities. An
// equity sitting exactly on a threshold takes the higher-severity state.
// =============================================================================

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::DrawdownThresholds;

// =============================================================================
// Drawdown state
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrawdownState {
    Normal,
    Caution,
    Warning,
    Danger,
    Critical,
}

impl DrawdownState {
    /// Position-size multiplier applied by the risk evaluator.
    pub fn size_multiplier(self) -> f64 {
        match self {
            Self::Normal => 1.0,
            Self::Caution => 0.75,
            Self::Warning => 0.5,
            Self::Danger => 0.25,
            Self::Critical => 0.0,
        }
    }

    pub fn gauge_value(self) -> f64 {
        match self {
            Self::Normal => 0.0,
            Self::Caution => 1.0,
            Self::Warning => 2.0,
            Self::Danger => 3.0,
            Self::Critical => 4.0,
        }
    }
}

impl std::fmt::Display for DrawdownState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Normal => "normal",
            Self::Caution => "caution",
            Self::Warning => "warning",
            Self::Danger => "danger",
            Self::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

// =============================================================================
// Ledger
// =============================================================================

#[derive(Debug)]
pub struct RiskLedger {
    thresholds: DrawdownThresholds,
    peak_equity: f64,
    current_dd_pct: f64,
    state: DrawdownState,
    consecutive_wins: u32,
    consecutive_losses: u32,
    /// Open timestamps of trades in the trailing hour.
    trade_times: VecDeque<DateTime<Utc>>,
    last_trade_time: Option<DateTime<Utc>>,
    /// Recent win/loss record for phase momentum (capped).
    recent_results: VecDeque<bool>,
}

impl RiskLedger {
    const RECENT_CAP: usize = 20;

    pub fn new(thresholds: DrawdownThresholds) -> Self {
        Self {
            thresholds,
            peak_equity: 0.0,
            current_dd_pct: 0.0,
            state: DrawdownState::Normal,
            consecutive_wins: 0,
            consecutive_losses: 0,
            trade_times: VecDeque::new(),
            last_trade_time: None,
            recent_results: VecDeque::new(),
        }
    }

    /// Restore the monotone anchor from persisted state on startup.
    pub fn restore_peak_equity(&mut self, peak: f64) {
        if peak > self.peak_equity {
            self.peak_equity = peak;
        }
    }

    /// Observe the cycle's equity. Returns `Some((old, new))` when the
    /// drawdown state changes.
    pub fn observe_equity(&mut self, equity: f64) -> Option<(DrawdownState, DrawdownState)> {
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
        self.current_dd_pct = if self.peak_equity > 0.0 {
            ((self.peak_equity - equity) / self.peak_equity).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let new_state = self.classify(self.current_dd_pct);
        if new_state != self.state {
            let old = self.state;
            self.state = new_state;
            if new_state > old {
                warn!(
                    from = %old,
                    to = %new_state,
                    dd_pct = format!("{:.1}%", self.current_dd_pct * 100.0),
                    peak = self.peak_equity,
                    equity,
                    "drawdown state escalated"
                );
            } else {
                info!(from = %old, to = %new_state, "drawdown state recovered");
            }
            return Some((old, new_state));
        }
        None
    }

    /// Exactly on a threshold means the higher-severity state.
    fn classify(&self, dd: f64) -> DrawdownState {
        let t = &self.thresholds;
        if dd >= t.critical {
            DrawdownState::Critical
        } else if dd >= t.danger {
            DrawdownState::Danger
        } else if dd >= t.warning {
            DrawdownState::Warning
        } else if dd >= t.caution {
            DrawdownState::Caution
        } else {
            DrawdownState::Normal
        }
    }

    /// Record a new entry for frequency accounting.
    pub fn record_trade_open(&mut self, now: DateTime<Utc>) {
        self.trade_times.push_back(now);
        self.last_trade_time = Some(now);
        self.prune(now);
    }

    /// Record a closed trade's outcome.
    pub fn record_trade_result(&mut self, pnl: f64) {
        let won = pnl > 0.0;
        if won {
            self.consecutive_wins += 1;
            self.consecutive_losses = 0;
        } else {
            self.consecutive_losses += 1;
            self.consecutive_wins = 0;
        }
        self.recent_results.push_back(won);
        while self.recent_results.len() > Self::RECENT_CAP {
            self.recent_results.pop_front();
        }
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::hours(1);
        while matches!(self.trade_times.front(), Some(t) if *t < cutoff) {
            self.trade_times.pop_front();
        }
    }

    pub fn trades_last_hour(&mut self, now: DateTime<Utc>) -> u32 {
        self.prune(now);
        self.trade_times.len() as u32
    }

    pub fn seconds_since_last_trade(&self, now: DateTime<Utc>) -> Option<i64> {
        self.last_trade_time.map(|t| (now - t).num_seconds())
    }

    /// Win rate over the recent result window; 0.5 with no history.
    pub fn recent_win_rate(&self) -> f64 {
        if self.recent_results.is_empty() {
            return 0.5;
        }
        self.recent_results.iter().filter(|w| **w).count() as f64 / self.recent_results.len() as f64
    }

    pub fn state(&self) -> DrawdownState {
        self.state
    }

    pub fn peak_equity(&self) -> f64 {
        self.peak_equity
    }

    pub fn current_dd_pct(&self) -> f64 {
        self.current_dd_pct
    }

    pub fn consecutive_wins(&self) -> u32 {
        self.consecutive_wins
    }

    pub fn consecutive_losses(&self) -> u32 {
        self.consecutive_losses
    }

    /// Explicit operator reset — the only path that forgets the peak.
    pub fn operator_reset(&mut self, equity: f64) {
        warn!(equity, "risk ledger reset by operator action");
        self.peak_equity = equity;
        self.current_dd_pct = 0.0;
        self.state = DrawdownState::Normal;
        self.consecutive_wins = 0;
        self.consecutive_losses = 0;
        self.trade_times.clear();
        self.recent_results.clear();
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> RiskLedger {
        RiskLedger::new(DrawdownThresholds::default())
    }

    #[test]
    fn peak_equity_is_monotone() {
        let mut l = ledger();
        l.observe_equity(1000.0);
        l.observe_equity(1200.0);
        l.observe_equity(800.0);
        assert!((l.peak_equity() - 1200.0).abs() < 1e-9);
        l.observe_equity(1100.0);
        assert!((l.peak_equity() - 1200.0).abs() < 1e-9);
    }

    #[test]
    fn equity_ladder_descends_through_states() {
        // Defaults: caution 0.15, warning 0.30, danger 0.45, critical 0.60.
        let mut l = ledger();
        l.observe_equity(1000.0);
        assert_eq!(l.state(), DrawdownState::Normal);

        assert!(l.observe_equity(850.0).is_some()); // dd 15%
        assert_eq!(l.state(), DrawdownState::Caution);

        assert!(l.observe_equity(700.0).is_some()); // dd 30%
        assert_eq!(l.state(), DrawdownState::Warning);

        assert!(l.observe_equity(550.0).is_some()); // dd 45%
        assert_eq!(l.state(), DrawdownState::Danger);

        assert!(l.observe_equity(350.0).is_some()); // dd 65%
        assert_eq!(l.state(), DrawdownState::Critical);
    }

    #[test]
    fn threshold_edge_takes_higher_severity() {
        let mut l = ledger();
        l.observe_equity(1000.0);
        l.observe_equity(850.0); // dd exactly 15%
        assert_eq!(l.state(), DrawdownState::Caution);
        l.observe_equity(700.0); // dd exactly 30%
        assert_eq!(l.state(), DrawdownState::Warning);
    }

    #[test]
    fn dd_pct_stays_in_unit_interval() {
        let mut l = ledger();
        l.observe_equity(1000.0);
        l.observe_equity(0.0);
        assert!((0.0..=1.0).contains(&l.current_dd_pct()));
    }

    #[test]
    fn streak_accounting() {
        let mut l = ledger();
        l.record_trade_result(10.0);
        l.record_trade_result(5.0);
        assert_eq!(l.consecutive_wins(), 2);
        l.record_trade_result(-3.0);
        assert_eq!(l.consecutive_wins(), 0);
        assert_eq!(l.consecutive_losses(), 1);
    }

    #[test]
    fn hourly_window_prunes() {
        let mut l = ledger();
        let t0 = Utc::now();
        l.record_trade_open(t0 - Duration::minutes(90));
        l.record_trade_open(t0 - Duration::minutes(30));
        l.record_trade_open(t0);
        assert_eq!(l.trades_last_hour(t0), 2);
    }

    #[test]
    fn size_multiplier_ladder() {
        assert_eq!(DrawdownState::Normal.size_multiplier(), 1.0);
        assert_eq!(DrawdownState::Caution.size_multiplier(), 0.75);
        assert_eq!(DrawdownState::Warning.size_multiplier(), 0.5);
        assert_eq!(DrawdownState::Danger.size_multiplier(), 0.25);
        assert_eq!(DrawdownState::Critical.size_multiplier(), 0.0);
    }

    #[test]
    fn restore_never_lowers_the_peak() {
        let mut l = ledger();
        l.observe_equity(1000.0);
        l.restore_peak_equity(800.0);
        assert!((l.peak_equity() - 1000.0).abs() < 1e-9);
        l.restore_peak_equity(1500.0);
        assert!((l.peak_equity() - 1500.0).abs() < 1e-9);
    }

    #[test]
    fn only_operator_reset_forgets_the_peak() {
        let mut l = ledger();
        l.observe_equity(1000.0);
        l.observe_equity(500.0);
        assert_eq!(l.state(), DrawdownState::Critical);
        l.operator_reset(500.0);
        assert_eq!(l.state(), DrawdownState::Normal);
        assert!((l.peak_equity() - 500.0).abs() < 1e-9);
    }
}
