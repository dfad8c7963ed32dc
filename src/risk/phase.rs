// =============================================================================
// Adaptive Account Manager — phase classification with hysteresis
// =============================================================================
//
// Assigns the account to one of six lifecycle phases by argmax over a scoring
// function combining balance fit, drawdown state, and recent momentum. The
// selected phase dictates the limit record (max lot, risk percentage,
// position caps, cadence) the risk evaluator consumes.
//
// Transitions are hysteretic: the challenger must outscore the incumbent by
// `HYSTERESIS_MARGIN` points for `DEBOUNCE_CYCLES` consecutive evaluations.
// One good cycle never flips the phase.
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::risk::drawdown::DrawdownState;

// =============================================================================
// Phase
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountPhase {
    Micro,
    Seed,
    Growth,
    Established,
    Mature,
    Recovery,
}

impl AccountPhase {
    pub const ALL: [AccountPhase; 6] = [
        Self::Micro,
        Self::Seed,
        Self::Growth,
        Self::Established,
        Self::Mature,
        Self::Recovery,
    ];

    /// Balance band the phase is designed for.
    fn balance_range(self) -> (f64, f64) {
        match self {
            Self::Micro => (0.0, 100.0),
            Self::Seed => (100.0, 400.0),
            Self::Growth => (400.0, 2_000.0),
            Self::Established => (2_000.0, 10_000.0),
            Self::Mature => (10_000.0, f64::INFINITY),
            // Recovery is drawdown-driven, not balance-driven; it competes on
            // the dd_score alone.
            Self::Recovery => (0.0, f64::INFINITY),
        }
    }

    fn rank(self) -> i32 {
        match self {
            Self::Micro => 0,
            Self::Seed => 1,
            Self::Growth => 2,
            Self::Established => 3,
            Self::Mature => 4,
            Self::Recovery => 0,
        }
    }

    /// Stable numeric id for the telemetry gauge.
    pub fn gauge_value(self) -> f64 {
        match self {
            Self::Micro => 0.0,
            Self::Seed => 1.0,
            Self::Growth => 2.0,
            Self::Established => 3.0,
            Self::Mature => 4.0,
            Self::Recovery => 5.0,
        }
    }
}

impl std::fmt::Display for AccountPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Micro => "micro",
            Self::Seed => "seed",
            Self::Growth => "growth",
            Self::Established => "established",
            Self::Mature => "mature",
            Self::Recovery => "recovery",
        };
        write!(f, "{s}")
    }
}

// =============================================================================
// Scoring
// =============================================================================

const HYSTERESIS_MARGIN: f64 = 5.0;
const DEBOUNCE_CYCLES: u32 = 3;

fn balance_score(phase: AccountPhase, balance: f64) -> f64 {
    if phase == AccountPhase::Recovery {
        // Recovery never wins on balance; it wins on drawdown.
        return 0.0;
    }
    let (lo, hi) = phase.balance_range();
    if (lo..hi).contains(&balance) {
        return 50.0;
    }
    // Score decays with distance in band ranks.
    let actual_rank = AccountPhase::ALL
        .iter()
        .filter(|p| !matches!(p, AccountPhase::Recovery))
        .find(|p| {
            let (lo, hi) = p.balance_range();
            (lo..hi).contains(&balance)
        })
        .map(|p| p.rank())
        .unwrap_or(0);
    let distance = (phase.rank() - actual_rank).abs() as f64;
    (50.0 - 25.0 * distance).max(0.0)
}

fn dd_score(phase: AccountPhase, dd_state: DrawdownState) -> f64 {
    let severe = matches!(
        dd_state,
        DrawdownState::Warning | DrawdownState::Danger | DrawdownState::Critical
    );
    match phase {
        AccountPhase::Recovery => {
            if severe {
                65.0
            } else if dd_state == DrawdownState::Caution {
                20.0
            } else {
                0.0
            }
        }
        _ => {
            if severe {
                -15.0
            } else {
                0.0
            }
        }
    }
}

fn momentum_score(phase: AccountPhase, recent_win_rate: f64) -> f64 {
    let wr = recent_win_rate.clamp(0.0, 1.0);
    match phase {
        // Losing streaks make the defensive phase more attractive.
        AccountPhase::Recovery => 20.0 * (1.0 - wr),
        _ => 20.0 * wr,
    }
}

fn phase_fit(phase: AccountPhase, balance: f64, dd_state: DrawdownState, win_rate: f64) -> f64 {
    balance_score(phase, balance) + dd_score(phase, dd_state) + momentum_score(phase, win_rate)
}

// =============================================================================
// Manager
// =============================================================================

pub struct AccountManager {
    current: AccountPhase,
    /// Challenger phase and how many consecutive cycles it has over-scored
    /// the incumbent by the margin.
    challenger: Option<(AccountPhase, u32)>,
    /// Operator-forced phase: scoring is bypassed entirely.
    forced: Option<AccountPhase>,
}

impl AccountManager {
    pub fn new(initial: Option<AccountPhase>, balance: f64) -> Self {
        let start = initial.unwrap_or_else(|| {
            AccountPhase::ALL
                .into_iter()
                .filter(|p| !matches!(p, AccountPhase::Recovery))
                .max_by(|a, b| {
                    phase_fit(*a, balance, DrawdownState::Normal, 0.5)
                        .partial_cmp(&phase_fit(*b, balance, DrawdownState::Normal, 0.5))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .unwrap_or(AccountPhase::Micro)
        });
        Self {
            current: start,
            challenger: None,
            forced: initial,
        }
    }

    /// Resume from a persisted phase: start there, but keep scoring free to
    /// move on (unlike an operator-forced phase).
    pub fn resume(phase: AccountPhase) -> Self {
        Self {
            current: phase,
            challenger: None,
            forced: None,
        }
    }

    pub fn current(&self) -> AccountPhase {
        self.current
    }

    /// Re-evaluate the phase. Returns `Some((old, new))` on a transition.
    pub fn evaluate(
        &mut self,
        balance: f64,
        dd_state: DrawdownState,
        recent_win_rate: f64,
    ) -> Option<(AccountPhase, AccountPhase)> {
        if self.forced.is_some() {
            return None;
        }

        let incumbent_score = phase_fit(self.current, balance, dd_state, recent_win_rate);
        let (best, best_score) = AccountPhase::ALL
            .into_iter()
            .map(|p| (p, phase_fit(p, balance, dd_state, recent_win_rate)))
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .expect("phase set is non-empty");

        if best == self.current || best_score < incumbent_score + HYSTERESIS_MARGIN {
            self.challenger = None;
            return None;
        }

        let streak = match self.challenger {
            Some((phase, n)) if phase == best => n + 1,
            _ => 1,
        };

        if streak < DEBOUNCE_CYCLES {
            self.challenger = Some((best, streak));
            return None;
        }

        let old = self.current;
        self.current = best;
        self.challenger = None;
        info!(
            from = %old,
            to = %best,
            balance,
            dd_state = %dd_state,
            win_rate = format!("{:.2}", recent_win_rate),
            "account phase transition"
        );
        Some((old, best))
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balance_bands_select_expected_phase() {
        for (balance, expected) in [
            (50.0, AccountPhase::Micro),
            (250.0, AccountPhase::Seed),
            (400.0, AccountPhase::Growth),
            (5_000.0, AccountPhase::Established),
            (50_000.0, AccountPhase::Mature),
        ] {
            let mgr = AccountManager::new(None, balance);
            assert_eq!(mgr.current(), expected, "balance {balance}");
        }
    }

    #[test]
    fn transition_requires_margin_and_debounce() {
        let mut mgr = AccountManager::new(None, 250.0);
        assert_eq!(mgr.current(), AccountPhase::Seed);

        // Balance jumps into the Growth band; the first two evaluations only
        // arm the challenger.
        assert!(mgr.evaluate(800.0, DrawdownState::Normal, 0.6).is_none());
        assert!(mgr.evaluate(800.0, DrawdownState::Normal, 0.6).is_none());
        let change = mgr.evaluate(800.0, DrawdownState::Normal, 0.6);
        assert_eq!(change, Some((AccountPhase::Seed, AccountPhase::Growth)));
        assert_eq!(mgr.current(), AccountPhase::Growth);
    }

    #[test]
    fn flapping_balance_never_transitions() {
        let mut mgr = AccountManager::new(None, 390.0);
        // Alternate across the Seed/Growth edge: the challenger streak keeps
        // resetting, so the phase holds.
        for i in 0..12 {
            let balance = if i % 2 == 0 { 390.0 } else { 410.0 };
            assert!(mgr.evaluate(balance, DrawdownState::Normal, 0.5).is_none());
        }
    }

    #[test]
    fn deep_drawdown_promotes_recovery() {
        let mut mgr = AccountManager::new(None, 800.0);
        for _ in 0..DEBOUNCE_CYCLES {
            mgr.evaluate(500.0, DrawdownState::Danger, 0.2);
        }
        assert_eq!(mgr.current(), AccountPhase::Recovery);
    }

    #[test]
    fn resumed_phase_is_not_forced() {
        let mut mgr = AccountManager::resume(AccountPhase::Seed);
        assert_eq!(mgr.current(), AccountPhase::Seed);
        // A resumed manager still transitions once the scores demand it.
        for _ in 0..DEBOUNCE_CYCLES {
            mgr.evaluate(800.0, DrawdownState::Normal, 0.6);
        }
        assert_eq!(mgr.current(), AccountPhase::Growth);
    }

    #[test]
    fn forced_phase_never_moves() {
        let mut mgr = AccountManager::new(Some(AccountPhase::Micro), 50_000.0);
        for _ in 0..10 {
            assert!(mgr.evaluate(50_000.0, DrawdownState::Normal, 0.9).is_none());
        }
        assert_eq!(mgr.current(), AccountPhase::Micro);
    }

    #[test]
    fn recovery_relinquishes_after_healing() {
        let mut mgr = AccountManager::new(None, 800.0);
        for _ in 0..DEBOUNCE_CYCLES {
            mgr.evaluate(500.0, DrawdownState::Danger, 0.2);
        }
        assert_eq!(mgr.current(), AccountPhase::Recovery);
        // Drawdown healed, wins returning: back to a balance-fit phase.
        for _ in 0..DEBOUNCE_CYCLES {
            mgr.evaluate(900.0, DrawdownState::Normal, 0.7);
        }
        assert_eq!(mgr.current(), AccountPhase::Growth);
    }
}
