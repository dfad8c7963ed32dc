// =============================================================================
// Shared Application State — read side of the engine
// =============================================================================
//
// The trading loop owns every mutable piece of core state (tracker, risk
// ledger, bar cache). What lives here is the read side: the configuration
// cell, the telemetry registry, the event ring, and the immutable snapshot
// the loop publishes at the end of each cycle for API readers.
//
// Thread safety: atomics for version tracking, `parking_lot::RwLock` for the
// snapshot and config cells.
// =============================================================================

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::config::EngineConfig;
use crate::events::MemoryEventLog;
use crate::telemetry::Telemetry;
use crate::types::{AccountMode, AccountSnapshot, Position, TradingMode};

/// Immutable end-of-cycle snapshot for external readers. Published whole,
/// never mutated in place.
#[derive(Debug, Clone, Serialize, Default)]
pub struct CycleSnapshot {
    pub cycle_id: u64,
    pub server_time: Option<DateTime<Utc>>,
    pub phase: String,
    pub drawdown_state: String,
    pub current_dd_pct: f64,
    pub peak_equity: f64,
    pub degraded: bool,
    pub account: Option<AccountSnapshot>,
    pub positions: Vec<Position>,
    /// Regime label per symbol.
    pub regimes: BTreeMap<String, String>,
    pub cycle_duration_ms: u64,
    pub consecutive_wins: u32,
    pub consecutive_losses: u32,
}

pub struct AppState {
    /// Monotonically increasing version; bumps on every snapshot publication
    /// and operator action.
    pub state_version: AtomicU64,
    pub config: RwLock<EngineConfig>,
    pub events: Arc<MemoryEventLog>,
    pub telemetry: Telemetry,
    snapshot: RwLock<Arc<CycleSnapshot>>,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(config: EngineConfig, telemetry: Telemetry, events: Arc<MemoryEventLog>) -> Self {
        Self {
            state_version: AtomicU64::new(1),
            config: RwLock::new(config),
            events,
            telemetry,
            snapshot: RwLock::new(Arc::new(CycleSnapshot::default())),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    /// Publish the end-of-cycle snapshot. The old Arc stays valid for any
    /// reader still holding it.
    pub fn publish_snapshot(&self, snapshot: CycleSnapshot) {
        *self.snapshot.write() = Arc::new(snapshot);
        self.increment_version();
    }

    pub fn snapshot(&self) -> Arc<CycleSnapshot> {
        self.snapshot.read().clone()
    }

    pub fn trading_mode(&self) -> TradingMode {
        self.config.read().trading_mode
    }

    pub fn account_mode(&self) -> AccountMode {
        self.config.read().account_mode
    }

    /// Operator control: pause, resume, or kill. Returns the new mode.
    pub fn set_trading_mode(&self, mode: TradingMode) -> TradingMode {
        self.config.write().trading_mode = mode;
        self.increment_version();
        mode
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
