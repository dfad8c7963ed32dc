// =============================================================================
// Profit Scaler — tiered partial closes with an emergency lock
// =============================================================================
//
// Per-position tier state: each position climbs the configured profit ladder
// and banks a fraction at every rung. Accounts under the micro threshold use
// a tighter ladder. Independent of tier state, unrealized profit worth
// `emergency_lock_pct` of the whole balance closes the position outright.
// =============================================================================

use std::collections::HashMap;

use tracing::info;

use crate::config::{ProfitScalingConfig, ProfitTier};
use crate::types::Position;

/// What the scaler wants done with a position.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalerAction {
    /// Close this fraction of the remaining volume (tier index for logging).
    ScaleOut { fraction: f64, tier: usize },
    /// Unrealized profit is a meaningful slice of the account — bank it all.
    EmergencyLock,
}

pub struct ProfitScaler {
    /// Next tier index to arm, per ticket.
    tiers_hit: HashMap<u64, usize>,
}

impl ProfitScaler {
    pub fn new() -> Self {
        Self {
            tiers_hit: HashMap::new(),
        }
    }

    fn ladder<'a>(cfg: &'a ProfitScalingConfig, balance: f64) -> &'a [ProfitTier] {
        if balance < cfg.micro_account_threshold {
            &cfg.micro_tiers
        } else {
            &cfg.tiers
        }
    }

    /// Evaluate one position. Advances tier state only when a tier fires.
    pub fn evaluate(
        &mut self,
        position: &Position,
        balance: f64,
        cfg: &ProfitScalingConfig,
    ) -> Option<ScalerAction> {
        // Emergency profit lock first: tier state is irrelevant.
        if balance > 0.0 && position.pnl >= cfg.emergency_lock_pct * balance {
            info!(
                ticket = position.ticket,
                pnl = position.pnl,
                balance,
                "emergency profit lock"
            );
            return Some(ScalerAction::EmergencyLock);
        }

        let ladder = Self::ladder(cfg, balance);
        let next = *self.tiers_hit.get(&position.ticket).unwrap_or(&0);
        let tier = ladder.get(next)?;

        let profit_pct = position.profit_frac() * 100.0;
        if profit_pct < tier.trigger_pct {
            return None;
        }

        self.tiers_hit.insert(position.ticket, next + 1);
        info!(
            ticket = position.ticket,
            tier = next,
            trigger_pct = tier.trigger_pct,
            close_fraction = tier.close_fraction,
            "profit tier reached"
        );
        Some(ScalerAction::ScaleOut {
            fraction: tier.close_fraction,
            tier: next,
        })
    }

    /// Drop tier state for a closed position.
    pub fn forget(&mut self, ticket: u64) {
        self.tiers_hit.remove(&ticket);
    }
}

impl Default for ProfitScaler {
    fn default() -> Self {
        Self::new()
    }
}
