// =============================================================================
// Position Tracker — broker-truth projection of open positions
// =============================================================================
//
// The tracker is an in-memory projection keyed by broker ticket, owned
// exclusively by the trading loop. Each cycle it reconciles against the
// adapter, which is the source of truth:
//
//   - broker-only tickets are inserted, filtered through the adoption policy
//   - local-only tickets are marked closed (`reconciled_missing`)
//   - shared tickets take the broker's symbol, price, volume, pnl, sl, tp
//
// A position whose reported symbol is the UNKNOWN sentinel is never stored:
// it is parked for a targeted re-query so no price-dependent consumer can
// ever see it. MAE/MFE are the only locally-owned fields.
// =============================================================================

use std::collections::{HashMap, HashSet};

use tracing::{info, warn};

use crate::config::{AdoptionConfig, AdoptionPolicy};
use crate::types::{Position, UNKNOWN_SYMBOL};

/// Result of one reconciliation pass, consumed by the event log.
#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    /// Tickets newly adopted from the broker.
    pub adopted: Vec<u64>,
    /// External tickets the adoption policy declined (left unmanaged).
    pub declined: Vec<u64>,
    /// Local positions that vanished at the broker, now closed.
    pub closed_missing: Vec<Position>,
    /// Tickets whose UNKNOWN symbol was replaced by a canonical code.
    pub fixed_symbols: Vec<u64>,
    /// Tickets parked pending a targeted re-query.
    pub needs_requery: Vec<u64>,
    /// Shared tickets refreshed from broker truth.
    pub refreshed: usize,
}

pub struct PositionTracker {
    positions: HashMap<u64, Position>,
    /// Tickets absorbed from outside the engine.
    adopted: HashSet<u64>,
    /// Tickets seen at the broker with an unresolved symbol.
    pending_requery: HashSet<u64>,
}

impl PositionTracker {
    pub fn new() -> Self {
        Self {
            positions: HashMap::new(),
            adopted: HashSet::new(),
            pending_requery: HashSet::new(),
        }
    }

    // ── Queries ─────────────────────────────────────────────────────────

    pub fn get(&self, ticket: u64) -> Option<&Position> {
        self.positions.get(&ticket)
    }

    pub fn open_positions(&self) -> Vec<Position> {
        let mut list: Vec<Position> = self.positions.values().cloned().collect();
        list.sort_by_key(|p| p.ticket);
        list
    }

    pub fn open_count(&self) -> u32 {
        self.positions.len() as u32
    }

    pub fn open_count_for(&self, symbol: &str) -> u32 {
        self.positions
            .values()
            .filter(|p| p.symbol == symbol)
            .count() as u32
    }

    pub fn is_adopted(&self, ticket: u64) -> bool {
        self.adopted.contains(&ticket)
    }

    /// Tickets waiting on a targeted symbol re-query.
    pub fn requery_tickets(&self) -> Vec<u64> {
        let mut t: Vec<u64> = self.pending_requery.iter().copied().collect();
        t.sort_unstable();
        t
    }

    // ── Mutations ───────────────────────────────────────────────────────

    /// Record a position the engine itself opened. Refuses the UNKNOWN
    /// sentinel and parks the ticket for re-query instead.
    pub fn record_fill(&mut self, position: Position) -> bool {
        if position.symbol == UNKNOWN_SYMBOL {
            warn!(ticket = position.ticket, "fill reported with UNKNOWN symbol — parked for re-query");
            self.pending_requery.insert(position.ticket);
            return false;
        }
        self.positions.insert(position.ticket, position);
        true
    }

    /// Store the result of a targeted re-query. Returns false when the
    /// symbol is still unresolved.
    pub fn resolve_requery(&mut self, position: Position) -> bool {
        if position.symbol == UNKNOWN_SYMBOL {
            return false;
        }
        self.pending_requery.remove(&position.ticket);
        self.positions.insert(position.ticket, position);
        true
    }

    /// Mirror a partial close acknowledged by the adapter.
    pub fn reduce_volume(&mut self, ticket: u64, fraction: f64) -> Option<f64> {
        let pos = self.positions.get_mut(&ticket)?;
        let closed = pos.volume * fraction.clamp(0.0, 1.0);
        pos.volume -= closed;
        if pos.volume <= 1e-9 {
            self.positions.remove(&ticket);
        }
        Some(closed)
    }

    /// Mirror a full close acknowledged by the adapter.
    pub fn mark_closed(&mut self, ticket: u64) -> Option<Position> {
        self.adopted.remove(&ticket);
        self.positions.remove(&ticket)
    }

    /// Mirror a stop move acknowledged by the adapter.
    pub fn set_stop(&mut self, ticket: u64, sl: f64) {
        if let Some(pos) = self.positions.get_mut(&ticket) {
            pos.sl = Some(sl);
        }
    }

    // ── Reconciliation ──────────────────────────────────────────────────

    /// Reconcile against the broker's position list. Idempotent: running it
    /// twice over the same input leaves the same state and reports no new
    /// changes the second time.
    pub fn reconcile(&mut self, broker: &[Position], adoption: &AdoptionConfig) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();
        let broker_tickets: HashSet<u64> = broker.iter().map(|p| p.ticket).collect();

        // Local positions the broker no longer reports are closed.
        let gone: Vec<u64> = self
            .positions
            .keys()
            .filter(|t| !broker_tickets.contains(t))
            .copied()
            .collect();
        for ticket in gone {
            if let Some(pos) = self.positions.remove(&ticket) {
                info!(ticket, symbol = %pos.symbol, "position missing at broker — closing locally");
                self.adopted.remove(&ticket);
                outcome.closed_missing.push(pos);
            }
        }
        // A parked ticket that disappeared is no longer our problem.
        self.pending_requery.retain(|t| broker_tickets.contains(t));

        for remote in broker {
            // Unresolved symbol: never store, park for targeted re-query.
            if remote.symbol == UNKNOWN_SYMBOL {
                if self.pending_requery.insert(remote.ticket) {
                    warn!(ticket = remote.ticket, "broker reports UNKNOWN symbol — re-query scheduled");
                }
                outcome.needs_requery.push(remote.ticket);
                continue;
            }

            match self.positions.get_mut(&remote.ticket) {
                Some(local) => {
                    // Broker truth overwrites; MAE/MFE stay local.
                    let was_unknown = local.symbol == UNKNOWN_SYMBOL;
                    local.symbol = remote.symbol.clone();
                    local.side = remote.side;
                    local.volume = remote.volume;
                    local.entry_price = remote.entry_price;
                    local.current_price = remote.current_price;
                    local.sl = remote.sl;
                    local.tp = remote.tp;
                    local.pnl = remote.pnl;

                    let excursion = remote.side.sign() * (remote.current_price - remote.entry_price);
                    local.mfe = local.mfe.max(excursion.max(0.0));
                    local.mae = local.mae.max((-excursion).max(0.0));

                    if was_unknown {
                        outcome.fixed_symbols.push(remote.ticket);
                    }
                    outcome.refreshed += 1;
                }
                None => {
                    // Resolved a previously parked ticket?
                    if self.pending_requery.remove(&remote.ticket) {
                        outcome.fixed_symbols.push(remote.ticket);
                        self.positions.insert(remote.ticket, remote.clone());
                        continue;
                    }

                    if self.should_adopt(remote, adoption) {
                        info!(
                            ticket = remote.ticket,
                            symbol = %remote.symbol,
                            tag = ?remote.tag,
                            policy = ?adoption.policy,
                            "adopting external position"
                        );
                        self.adopted.insert(remote.ticket);
                        self.positions.insert(remote.ticket, remote.clone());
                        outcome.adopted.push(remote.ticket);
                    } else {
                        outcome.declined.push(remote.ticket);
                    }
                }
            }
        }

        outcome
    }

    fn should_adopt(&self, position: &Position, adoption: &AdoptionConfig) -> bool {
        match adoption.policy {
            AdoptionPolicy::AcceptAll => true,
            AdoptionPolicy::RejectAll => false,
            AdoptionPolicy::AcceptTaggedPrefix => position
                .tag
                .as_deref()
                .map(|t| t.starts_with(&adoption.tag_prefix))
                .unwrap_or(false),
        }
    }
}

impl Default for PositionTracker {
    fn default() -> Self {
        Self::new()
    }
}
