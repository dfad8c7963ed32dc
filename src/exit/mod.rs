// =============================================================================
// Exit Coordinator — prioritized exit ladder over open positions
// =============================================================================
//
// Fourteen rules, each with a strict unique priority. Per position the
// coordinator walks the ladder top-down; the first rule returning a terminal
// decision (ScaleOut / Close / Emergency) wins. A rule may instead attach a
// stop move and let the walk continue — that is how the breakeven rule
// protects a position without pre-empting the rules below it.
//
// The coordinator and every rule are pure with respect to the cycle context;
// the single stateful rule (profit scaling) owns its tier memory and is told
// when positions close.
// =============================================================================

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::{ExitConfig, ProfitScalingConfig, StrategyParams};
use crate::indicators::IndicatorFrame;
use crate::types::{AccountSnapshot, Bar, Position, Side, Tick};

pub mod confluence;
pub mod rules;
pub mod scaler;

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

/// Terminal decision for a position this cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExitDecision {
    Hold,
    /// Close this fraction of the remaining volume; fraction ∈ (0, 1).
    ScaleOut { fraction: f64 },
    Close,
    Emergency,
}

impl ExitDecision {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Hold)
    }
}

impl std::fmt::Display for ExitDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hold => write!(f, "hold"),
            Self::ScaleOut { fraction } => write!(f, "scale_out({fraction:.2})"),
            Self::Close => write!(f, "close"),
            Self::Emergency => write!(f, "emergency"),
        }
    }
}

/// What a single rule returns when it has something to say.
#[derive(Debug, Clone)]
pub struct RuleSignal {
    pub decision: ExitDecision,
    /// Optional stop move; with `ExitDecision::Hold` this is a pure
    /// modification (breakeven), otherwise it accompanies the close.
    pub stop_move: Option<f64>,
    pub reason: &'static str,
    /// Confluence score in [0, 1]; rules without a scored opinion report 0.
    pub confluence: f64,
}

/// The coordinator's verdict for one position.
#[derive(Debug, Clone)]
pub struct Verdict {
    pub ticket: u64,
    pub decision: ExitDecision,
    pub reason: &'static str,
    /// Rule that produced the terminal decision (or "none" for Hold).
    pub rule: &'static str,
    pub priority: u8,
    pub confluence: f64,
    /// Stop moves collected on the way down the ladder.
    pub stop_moves: Vec<f64>,
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Read-only cycle state the rules evaluate against.
pub struct ExitContext<'a> {
    pub account: &'a AccountSnapshot,
    pub symbol_is_crypto: bool,
    pub tick: &'a Tick,
    pub frame: &'a IndicatorFrame,
    pub bars: &'a [Bar],
    pub exit_cfg: &'a ExitConfig,
    pub scaling_cfg: &'a ProfitScalingConfig,
    pub params: &'a StrategyParams,
    /// Monotone peak equity from the risk ledger.
    pub peak_equity: f64,
    /// Survival activation threshold (fraction of peak).
    pub survival_threshold: f64,
    /// This cycle's candidate signal, for the reversal rule.
    pub opposite_signal: Option<(Side, f64)>,
    pub now: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Rule contract
// ---------------------------------------------------------------------------

pub trait ExitRule: Send + Sync {
    fn name(&self) -> &'static str;
    /// Strict, unique ladder priority; higher runs first.
    fn priority(&self) -> u8;
    fn evaluate(&mut self, position: &Position, ctx: &ExitContext) -> Option<RuleSignal>;
    /// Housekeeping hook for stateful rules.
    fn on_position_closed(&mut self, _ticket: u64) {}
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

pub struct ExitCoordinator {
    rules: Vec<Box<dyn ExitRule>>,
}

impl ExitCoordinator {
    /// Build the standard ladder. Panics at startup (not at runtime) if two
    /// rules share a priority — the ladder's determinism depends on it.
    pub fn new() -> Self {
        let mut rules = rules::standard_ladder();
        rules.sort_by(|a, b| b.priority().cmp(&a.priority()));

        for pair in rules.windows(2) {
            assert!(
                pair[0].priority() != pair[1].priority(),
                "exit rules {} and {} share priority {}",
                pair[0].name(),
                pair[1].name(),
                pair[0].priority(),
            );
        }

        Self { rules }
    }

    /// Walk the ladder for one position.
    pub fn evaluate(&mut self, position: &Position, ctx: &ExitContext) -> Verdict {
        let mut stop_moves = Vec::new();

        for rule in &mut self.rules {
            let Some(signal) = rule.evaluate(position, ctx) else {
                continue;
            };

            if signal.decision.is_terminal() {
                debug!(
                    ticket = position.ticket,
                    rule = rule.name(),
                    priority = rule.priority(),
                    decision = %signal.decision,
                    reason = signal.reason,
                    confluence = format!("{:.2}", signal.confluence),
                    "exit verdict"
                );
                if let Some(sl) = signal.stop_move {
                    stop_moves.push(sl);
                }
                return Verdict {
                    ticket: position.ticket,
                    decision: signal.decision,
                    reason: signal.reason,
                    rule: rule.name(),
                    priority: rule.priority(),
                    confluence: signal.confluence,
                    stop_moves,
                };
            }

            // Hold with a stop move: apply and keep walking.
            if let Some(sl) = signal.stop_move {
                stop_moves.push(sl);
            }
        }

        Verdict {
            ticket: position.ticket,
            decision: ExitDecision::Hold,
            reason: "no_rule_fired",
            rule: "none",
            priority: 0,
            confluence: 0.0,
            stop_moves,
        }
    }

    /// Tell stateful rules a position is gone.
    pub fn on_position_closed(&mut self, ticket: u64) {
        for rule in &mut self.rules {
            rule.on_position_closed(ticket);
        }
    }

    pub fn rule_names(&self) -> Vec<(&'static str, u8)> {
        self.rules.iter().map(|r| (r.name(), r.priority())).collect()
    }
}

impl Default for ExitCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
