// =============================================================================
// Trading Loop — the supervisor
// =============================================================================
//
// One task owns every mutable piece of core state and runs the fixed-order
// cycle:
//
//    1. adapter snapshot (account, positions, bars, ticks)
//    2. reconcile positions, resolve UNKNOWN symbols, replay pending
//       emergency closes
//    3. indicators + regime per symbol
//    4. risk-state update (drawdown, phase transition)
//    5. exits across open positions      ← always strictly before
//    6. strategy selection               ← entries
//    7. cognition enhancement
//    8. risk admission + sizing
//    9. execution
//   10. persist events, publish the snapshot, emit telemetry
//
// Repeated transient adapter faults put the loop into degraded mode: entries
// are suppressed, exits keep running off cached state, and recovery emits the
// matching transition event. Nothing below the supervisor may take the loop
// down.
// =============================================================================

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::adapter::{await_within_timeout, AdapterError, AdapterResult, MarketAdapter};
use crate::app_state::{AppState, CycleSnapshot};
use crate::cognition::CognitionOverlay;
use crate::config::EngineConfig;
use crate::events::{Event, EventKind, EventSink, RecoveredState};
use crate::execution::ExecutionEngine;
use crate::exit::{ExitContext, ExitCoordinator, ExitDecision, Verdict};
use crate::lifecycle::{self, AppliedChange, LifecycleCommand};
use crate::market_data::{BarCache, SeriesKey};
use crate::regime::{Regime, RegimeClassifier};
use crate::risk::drawdown::RiskLedger;
use crate::risk::phase::AccountManager;
use crate::risk::{Admission, AdmissionInputs, RiskEvaluator};
use crate::selector::StrategySelector;
use crate::strategies::{registry, StrategyContext};
use crate::tracker::PositionTracker;
use crate::types::{
    AccountSnapshot, OrderOutcome, Position, Side, Symbol, Tick, Timeframe, TradingMode,
};

/// Consecutive faulted cycles before degraded mode engages.
const DEGRADED_AFTER_FAULTS: u32 = 2;
/// Bars fetched per series per cycle.
const BAR_FETCH_COUNT: usize = 200;
/// Cycle overruns tolerated before the poll interval doubles.
const OVERRUNS_BEFORE_BACKOFF: u32 = 3;
/// Upper bound on the back-pressure multiplier.
const MAX_INTERVAL_MULTIPLIER: u32 = 8;

/// Entry/exit bookkeeping for trades the engine itself opened.
#[derive(Debug, Clone)]
struct TradeMeta {
    strategy_id: String,
    signal_id: String,
    entry: f64,
    stop: f64,
}

pub struct TradingEngine {
    adapter: Arc<dyn MarketAdapter>,
    app: Arc<AppState>,
    sink: Arc<dyn EventSink>,

    // Mutable core state, owned exclusively by this task.
    tracker: PositionTracker,
    ledger: RiskLedger,
    bars: BarCache,
    classifiers: HashMap<String, RegimeClassifier>,
    selector: StrategySelector,
    cognition: CognitionOverlay,
    evaluator: RiskEvaluator,
    execution: ExecutionEngine,
    exits: ExitCoordinator,
    account_mgr: Option<AccountManager>,

    /// Phase recovered from the event log, consumed on first evaluation.
    recovered_phase: Option<crate::risk::phase::AccountPhase>,

    symbols: HashMap<String, Symbol>,
    last_account: Option<AccountSnapshot>,
    last_ticks: HashMap<String, Tick>,
    last_regimes: BTreeMap<String, Regime>,
    /// Previous cycle's candidate signal per symbol, for the reversal rule.
    last_candidates: HashMap<String, (Side, f64)>,
    trade_meta: HashMap<u64, TradeMeta>,
    /// Emergency closes that failed transiently, replayed next cycle.
    pending_emergencies: Vec<u64>,

    cycle_id: u64,
    faulted_cycles: u32,
    degraded: bool,
    overruns: u32,
    interval_multiplier: u32,
    last_cycle_duration_ms: u64,
}

impl TradingEngine {
    pub fn new(
        adapter: Arc<dyn MarketAdapter>,
        app: Arc<AppState>,
        sink: Arc<dyn EventSink>,
        recovered: RecoveredState,
    ) -> Self {
        let cfg = app.config.read().clone();
        let mut ledger = RiskLedger::new(cfg.risk.drawdown_thresholds.clone());
        if let Some(peak) = recovered.peak_equity {
            ledger.restore_peak_equity(peak);
            info!(peak, "risk ledger peak restored from event log");
        }

        Self {
            adapter,
            app,
            sink,
            tracker: PositionTracker::new(),
            ledger,
            bars: BarCache::new(BAR_FETCH_COUNT * 2),
            classifiers: HashMap::new(),
            selector: StrategySelector::new(registry(), cfg.selector.clone()),
            cognition: CognitionOverlay::new(cfg.cognition.clone()),
            evaluator: RiskEvaluator::new(cfg.risk.clone()),
            execution: ExecutionEngine::new(cfg.adoption.tag_prefix.as_str()),
            exits: ExitCoordinator::new(),
            account_mgr: None,
            recovered_phase: recovered.last_phase,
            symbols: HashMap::new(),
            last_account: None,
            last_ticks: HashMap::new(),
            last_regimes: BTreeMap::new(),
            last_candidates: HashMap::new(),
            trade_meta: HashMap::new(),
            pending_emergencies: Vec::new(),
            cycle_id: recovered.last_cycle_id,
            faulted_cycles: 0,
            degraded: false,
            overruns: 0,
            interval_multiplier: 1,
            last_cycle_duration_ms: 0,
        }
    }

    // =========================================================================
    // Run loop
    // =========================================================================

    /// Run until `shutdown` flips true. Cycle pacing follows the active
    /// phase; sustained overruns double the interval until caught up.
    pub async fn run(mut self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!("trading loop starting");
        loop {
            if *shutdown.borrow() {
                break;
            }

            let started = std::time::Instant::now();
            self.cycle().await;
            let elapsed = started.elapsed();

            let base_secs = {
                let cfg = self.app.config.read();
                let phase = self
                    .account_mgr
                    .as_ref()
                    .map(|m| m.current())
                    .unwrap_or(crate::risk::phase::AccountPhase::Growth);
                cfg.loop_cfg.poll_interval_for(phase)
            };
            let target = Duration::from_secs(base_secs * self.interval_multiplier as u64);

            if elapsed >= target {
                // Behind schedule: start the next cycle immediately, and back
                // off the cadence if this keeps happening.
                self.overruns += 1;
                if self.overruns >= OVERRUNS_BEFORE_BACKOFF
                    && self.interval_multiplier < MAX_INTERVAL_MULTIPLIER
                {
                    self.interval_multiplier *= 2;
                    self.overruns = 0;
                    warn!(
                        multiplier = self.interval_multiplier,
                        "sustained cycle overruns — doubling poll interval"
                    );
                }
                continue;
            }

            // Caught up: relax any back-pressure.
            self.overruns = 0;
            if self.interval_multiplier > 1 {
                self.interval_multiplier /= 2;
                info!(multiplier = self.interval_multiplier, "cycle cadence recovering");
            }

            tokio::select! {
                _ = tokio::time::sleep(target - elapsed) => {}
                _ = shutdown.changed() => {}
            }
        }
        info!("trading loop stopped");
    }

    // =========================================================================
    // One cycle
    // =========================================================================

    /// Execute one full cycle. Never panics; every failure path is an event.
    pub async fn cycle(&mut self) {
        self.cycle_id += 1;
        let cycle_start = std::time::Instant::now();
        let mut cycle_faulted = false;

        let cfg = self.app.config.read().clone();

        // ── 1a. Account snapshot ────────────────────────────────────────
        match self.fetch_account(&cfg).await {
            Ok(account) => {
                self.last_account = Some(account);
            }
            Err(err) => {
                cycle_faulted = true;
                warn!(cycle = self.cycle_id, error = %err, "account snapshot failed");
                if self.last_account.is_none() {
                    // Nothing cached: nothing this cycle can safely do.
                    self.emit(
                        EventKind::CycleAborted,
                        format!("cycle-{}", self.cycle_id),
                        "engine",
                        serde_json::json!({ "reason": err.to_string() }),
                    );
                    self.note_cycle_fault();
                    self.finish_cycle(cycle_start);
                    return;
                }
            }
        }
        let account = self.last_account.clone().expect("account cached");

        // ── 1b/2. Positions + reconciliation ────────────────────────────
        match self.fetch_positions(&cfg).await {
            Ok(broker_positions) => {
                self.reconcile(&cfg, &broker_positions).await;
            }
            Err(err) => {
                cycle_faulted = true;
                warn!(cycle = self.cycle_id, error = %err, "position fetch failed — using cached tracker");
            }
        }

        // Replay emergency closes that could not be dispatched last cycle.
        self.replay_pending_emergencies().await;

        // ── 1c. Symbol metadata, bars, ticks ────────────────────────────
        let tf = self.active_timeframe(&cfg);
        for code in cfg.symbols.clone() {
            if let Err(err) = self.refresh_market_data(&cfg, &code, tf).await {
                if err.is_transient() {
                    cycle_faulted = true;
                }
                debug!(symbol = %code, error = %err, "market data refresh failed");
            }
        }

        // ── 3/4. Indicators, regime, risk state, phase ──────────────────
        let frames = self.compute_frames(&cfg, tf);
        self.update_risk_state(&account);
        self.update_phase(&cfg, &account);

        // ── 5. Exits strictly before entries ────────────────────────────
        self.run_exits(&cfg, tf, &account, &frames).await;

        // ── 6–9. Entries ────────────────────────────────────────────────
        let entries_allowed = !self.degraded
            && !cycle_faulted
            && self.app.trading_mode() == TradingMode::Live
            && account.trade_allowed;
        if entries_allowed {
            self.run_entries(&cfg, tf, &frames, cycle_start).await;
        } else {
            self.last_candidates.clear();
            debug!(
                cycle = self.cycle_id,
                degraded = self.degraded,
                mode = %self.app.trading_mode(),
                "entries suppressed"
            );
        }

        // ── 10. Persist + publish ───────────────────────────────────────
        self.sink.snapshot_positions(&self.tracker.open_positions());

        if cycle_faulted {
            self.note_cycle_fault();
        } else {
            self.note_cycle_clean();
        }
        self.finish_cycle(cycle_start);
    }

    // =========================================================================
    // Cycle pieces
    // =========================================================================

    async fn fetch_account(&self, cfg: &EngineConfig) -> AdapterResult<AccountSnapshot> {
        let adapter = self.adapter.clone();
        with_retries(cfg, move || {
            let adapter = adapter.clone();
            async move { adapter.account_info().await }
        })
        .await
    }

    async fn fetch_positions(&self, cfg: &EngineConfig) -> AdapterResult<Vec<Position>> {
        let adapter = self.adapter.clone();
        with_retries(cfg, move || {
            let adapter = adapter.clone();
            async move { adapter.positions().await }
        })
        .await
    }

    async fn reconcile(&mut self, cfg: &EngineConfig, broker: &[Position]) {
        let outcome = self.tracker.reconcile(broker, &cfg.adoption);

        for ticket in &outcome.adopted {
            self.emit(
                EventKind::PositionAdopted,
                format!("ticket-{ticket}"),
                "tracker",
                serde_json::json!({ "ticket": ticket, "policy": format!("{:?}", cfg.adoption.policy) }),
            );
        }
        for position in &outcome.closed_missing {
            self.on_position_fully_closed(position, position.current_price, "reconciled_missing");
            self.emit(
                EventKind::PositionClosed,
                format!("ticket-{}", position.ticket),
                &position.symbol,
                serde_json::json!({ "ticket": position.ticket, "reason": "reconciled_missing" }),
            );
        }

        // Targeted re-query before any price-dependent consumer runs.
        for ticket in self.tracker.requery_tickets() {
            let adapter = self.adapter.clone();
            let lookup = with_retries(cfg, move || {
                let adapter = adapter.clone();
                async move { adapter.position_by_ticket(ticket).await }
            });
            match lookup.await {
                Ok(position) => {
                    let fixed = self.tracker.resolve_requery(position.clone());
                    if fixed {
                        self.emit(
                            EventKind::PositionReconciled,
                            format!("ticket-{ticket}"),
                            &position.symbol,
                            serde_json::json!({ "ticket": ticket, "fixed_symbol": true }),
                        );
                    } else {
                        self.emit(
                            EventKind::InvariantViolation,
                            format!("ticket-{ticket}"),
                            "tracker",
                            serde_json::json!({
                                "ticket": ticket,
                                "detail": "symbol still UNKNOWN after targeted re-query",
                            }),
                        );
                    }
                }
                Err(err) => {
                    warn!(ticket, error = %err, "targeted re-query failed");
                }
            }
        }

        if outcome.refreshed > 0 || !outcome.fixed_symbols.is_empty() {
            debug!(
                cycle = self.cycle_id,
                refreshed = outcome.refreshed,
                fixed = outcome.fixed_symbols.len(),
                adopted = outcome.adopted.len(),
                "reconciliation complete"
            );
        }
    }

    async fn refresh_market_data(
        &mut self,
        cfg: &EngineConfig,
        code: &str,
        tf: Timeframe,
    ) -> AdapterResult<()> {
        // Symbol metadata is immutable; fetch once.
        if !self.symbols.contains_key(code) {
            let adapter = self.adapter.clone();
            let owned = code.to_string();
            let symbol = with_retries(cfg, move || {
                let adapter = adapter.clone();
                let code = owned.clone();
                async move { adapter.symbol_info(&code).await }
            })
            .await?;
            self.symbols.insert(code.to_string(), symbol);
        }

        let adapter = self.adapter.clone();
        let owned = code.to_string();
        let bars = with_retries(cfg, move || {
            let adapter = adapter.clone();
            let code = owned.clone();
            async move { adapter.copy_rates(&code, tf, BAR_FETCH_COUNT).await }
        })
        .await?;
        self.bars.ingest(
            SeriesKey {
                symbol: code.to_string(),
                tf,
            },
            &bars,
        );

        let adapter = self.adapter.clone();
        let owned = code.to_string();
        let tick = with_retries(cfg, move || {
            let adapter = adapter.clone();
            let code = owned.clone();
            async move { adapter.tick(&code).await }
        })
        .await?;
        self.last_ticks.insert(code.to_string(), tick);
        Ok(())
    }

    fn active_timeframe(&self, cfg: &EngineConfig) -> Timeframe {
        let phase = self
            .account_mgr
            .as_ref()
            .map(|m| m.current())
            .unwrap_or(crate::risk::phase::AccountPhase::Growth);
        cfg.phases
            .get(phase)
            .preferred_tfs
            .first()
            .copied()
            .unwrap_or(Timeframe::M5)
    }

    /// Compute one frame per symbol over the union of all requirements.
    fn compute_frames(
        &mut self,
        cfg: &EngineConfig,
        tf: Timeframe,
    ) -> HashMap<String, crate::indicators::IndicatorFrame> {
        let params = &cfg.strategy_params;
        let mut requirements = self.selector.requirements(params);
        requirements.extend(RegimeClassifier::requirements(
            params.ema_slow,
            params.bb_period,
            params.bb_std,
        ));
        requirements.extend(crate::exit::confluence::requirements(params));

        let mut frames = HashMap::new();
        for code in &cfg.symbols {
            let key = SeriesKey {
                symbol: code.clone(),
                tf,
            };
            let bars = self.bars.recent(&key, BAR_FETCH_COUNT);
            let frame =
                match crate::indicators::IndicatorFrame::compute(code, tf, &bars, &requirements) {
                    Ok(frame) => frame,
                    Err(err) => {
                        debug!(symbol = %code, error = %err, "no frame this cycle");
                        continue;
                    }
                };

            let feed_gap = self.bars.has_feed_gap(&key);
            let classifier = self.classifiers.entry(code.clone()).or_default();
            let regime = RegimeClassifier::inputs_from_frame(
                &frame,
                &bars,
                params.ema_slow,
                params.bb_period,
                params.bb_std,
                feed_gap,
            )
            .map(|inputs| classifier.classify(&inputs))
            .unwrap_or(Regime::Unknown);
            self.last_regimes.insert(code.clone(), regime);

            frames.insert(code.clone(), frame);
        }
        frames
    }

    fn update_risk_state(&mut self, account: &AccountSnapshot) {
        if let Some((from, to)) = self.ledger.observe_equity(account.equity) {
            self.emit(
                EventKind::DrawdownStateChanged,
                format!("dd-{}", self.cycle_id),
                "account",
                serde_json::json!({
                    "from": from,
                    "to": to,
                    "peak_equity": self.ledger.peak_equity(),
                    "current_dd_pct": self.ledger.current_dd_pct(),
                }),
            );
        }
    }

    fn update_phase(&mut self, cfg: &EngineConfig, account: &AccountSnapshot) {
        let dd_state = self.ledger.state();
        let win_rate = self.ledger.recent_win_rate();
        let recovered_phase = self.recovered_phase.take();
        let transition = self
            .account_mgr
            .get_or_insert_with(|| match (cfg.account.initial_phase, recovered_phase) {
                (Some(forced), _) => AccountManager::new(Some(forced), account.balance),
                (None, Some(resumed)) => AccountManager::resume(resumed),
                (None, None) => AccountManager::new(None, account.balance),
            })
            .evaluate(account.balance, dd_state, win_rate);

        if let Some((from, to)) = transition {
            self.emit(
                EventKind::PhaseChanged,
                format!("phase-{}", self.cycle_id),
                "account",
                serde_json::json!({ "from": from, "to": to }),
            );
        }
    }

    // ── Exits ───────────────────────────────────────────────────────────

    async fn run_exits(
        &mut self,
        cfg: &EngineConfig,
        tf: Timeframe,
        account: &AccountSnapshot,
        frames: &HashMap<String, crate::indicators::IndicatorFrame>,
    ) {
        let open = self.tracker.open_positions();
        for position in open {
            let Some(frame) = frames.get(&position.symbol) else {
                debug!(ticket = position.ticket, symbol = %position.symbol, "no frame — exit evaluation skipped");
                continue;
            };
            let Some(tick) = self.last_ticks.get(&position.symbol).copied() else {
                continue;
            };
            let key = SeriesKey {
                symbol: position.symbol.clone(),
                tf,
            };
            let bars = self.bars.recent(&key, BAR_FETCH_COUNT);
            let is_crypto = self
                .symbols
                .get(&position.symbol)
                .map(|s| s.is_crypto)
                .unwrap_or(false);

            let verdict = {
                let ctx = ExitContext {
                    account,
                    symbol_is_crypto: is_crypto,
                    tick: &tick,
                    frame,
                    bars: &bars,
                    exit_cfg: &cfg.exit,
                    scaling_cfg: &cfg.profit_scaling,
                    params: &cfg.strategy_params,
                    peak_equity: self.ledger.peak_equity(),
                    survival_threshold: cfg.risk.survival_threshold,
                    opposite_signal: self.last_candidates.get(&position.symbol).copied(),
                    now: Utc::now(),
                };
                self.exits.evaluate(&position, &ctx)
            };

            self.dispatch_verdict(cfg, &position, verdict).await;
        }
    }

    async fn dispatch_verdict(&mut self, cfg: &EngineConfig, position: &Position, verdict: Verdict) {
        // Stop moves collected on the way down (breakeven) are applied even
        // when the final decision is Hold.
        for new_sl in &verdict.stop_moves {
            let cmd = LifecycleCommand::MoveStop {
                ticket: position.ticket,
                new_sl: *new_sl,
            };
            if let Err(err) = self.apply_lifecycle(cfg, cmd).await {
                warn!(ticket = position.ticket, error = %err, "stop move failed");
            }
        }

        if !verdict.decision.is_terminal() {
            return;
        }

        self.emit(
            EventKind::ExitTriggered,
            format!("ticket-{}", position.ticket),
            &position.symbol,
            serde_json::json!({
                "ticket": position.ticket,
                "decision": verdict.decision.to_string(),
                "rule": verdict.rule,
                "reason": verdict.reason,
                "priority": verdict.priority,
                "confluence": verdict.confluence,
            }),
        );

        let fraction = match verdict.decision {
            ExitDecision::ScaleOut { fraction } => fraction,
            ExitDecision::Close | ExitDecision::Emergency => 1.0,
            ExitDecision::Hold => return,
        };

        let cmd = LifecycleCommand::CloseVolume {
            ticket: position.ticket,
            fraction,
        };
        match self.apply_lifecycle(cfg, cmd).await {
            Ok(AppliedChange::Closed {
                position: before,
                fully_closed,
                ..
            }) => {
                if fully_closed {
                    self.on_position_fully_closed(&before, before.current_price, verdict.reason);
                    self.emit(
                        EventKind::PositionClosed,
                        format!("ticket-{}", before.ticket),
                        &before.symbol,
                        serde_json::json!({
                            "ticket": before.ticket,
                            "reason": verdict.reason,
                            "rule": verdict.rule,
                        }),
                    );
                }
            }
            Ok(_) => {}
            Err(err) => {
                warn!(
                    ticket = position.ticket,
                    decision = %verdict.decision,
                    error = %err,
                    "exit dispatch failed"
                );
                // Emergencies must not be lost: replay at next cycle start.
                if verdict.decision == ExitDecision::Emergency && err.is_transient() {
                    self.pending_emergencies.push(position.ticket);
                }
            }
        }
    }

    async fn replay_pending_emergencies(&mut self) {
        if self.pending_emergencies.is_empty() {
            return;
        }
        let cfg = self.app.config.read().clone();
        let pending = std::mem::take(&mut self.pending_emergencies);
        for ticket in pending {
            if self.tracker.get(ticket).is_none() {
                continue; // already gone per broker truth
            }
            info!(ticket, "replaying emergency close from previous cycle");
            let cmd = LifecycleCommand::CloseVolume {
                ticket,
                fraction: 1.0,
            };
            match self.apply_lifecycle(&cfg, cmd).await {
                Ok(AppliedChange::Closed { position, .. }) => {
                    self.on_position_fully_closed(&position, position.current_price, "emergency_replay");
                    self.emit(
                        EventKind::PositionClosed,
                        format!("ticket-{ticket}"),
                        &position.symbol,
                        serde_json::json!({ "ticket": ticket, "reason": "emergency_replay" }),
                    );
                }
                Ok(_) => {}
                Err(err) if err.is_transient() => {
                    self.pending_emergencies.push(ticket);
                }
                Err(err) => {
                    error!(ticket, error = %err, "emergency replay failed permanently");
                }
            }
        }
    }

    async fn apply_lifecycle(
        &mut self,
        cfg: &EngineConfig,
        cmd: LifecycleCommand,
    ) -> Result<AppliedChange, AdapterError> {
        let timeout = Duration::from_secs(cfg.loop_cfg.op_timeout_seconds);
        await_within_timeout(
            lifecycle::apply(&*self.adapter, &mut self.tracker, cmd),
            timeout,
        )
        .await
    }

    /// Outcome accounting shared by exit closes and reconciled-missing.
    fn on_position_fully_closed(&mut self, position: &Position, close_price: f64, reason: &str) {
        self.ledger.record_trade_result(position.pnl);
        self.exits.on_position_closed(position.ticket);

        if let Some(meta) = self.trade_meta.remove(&position.ticket) {
            let stop_distance = (meta.entry - meta.stop).abs();
            if stop_distance > 0.0 {
                let r_multiple =
                    position.side.sign() * (close_price - meta.entry) / stop_distance;
                self.selector.record_outcome(&meta.strategy_id, r_multiple);
                debug!(
                    ticket = position.ticket,
                    strategy = %meta.strategy_id,
                    signal_id = %meta.signal_id,
                    r_multiple = format!("{:.2}", r_multiple),
                    reason,
                    "trade outcome recorded"
                );
            }
        }
    }

    // ── Entries ─────────────────────────────────────────────────────────

    async fn run_entries(
        &mut self,
        cfg: &EngineConfig,
        tf: Timeframe,
        frames: &HashMap<String, crate::indicators::IndicatorFrame>,
        cycle_start: std::time::Instant,
    ) {
        self.last_candidates.clear();
        let account = self.last_account.clone().expect("entries need an account");
        let phase = self
            .account_mgr
            .as_ref()
            .expect("entries need a phase")
            .current();
        let survival = self.evaluator.survival_active(&self.ledger);
        // Survival mode enforces the Recovery limit record.
        let effective_phase = if survival {
            crate::risk::phase::AccountPhase::Recovery
        } else {
            phase
        };
        let phase_cfg = cfg.phases.get(effective_phase).clone();

        for code in cfg.symbols.clone() {
            let Some(frame) = frames.get(&code) else {
                continue;
            };
            let Some(regime) = self.last_regimes.get(&code).copied() else {
                continue;
            };
            let Some(tick) = self.last_ticks.get(&code).copied() else {
                continue;
            };
            let Some(symbol) = self.symbols.get(&code).cloned() else {
                continue;
            };
            let key = SeriesKey {
                symbol: code.clone(),
                tf,
            };
            let bars = self.bars.recent(&key, BAR_FETCH_COUNT);
            let Some(last_bar) = bars.last().cloned() else {
                continue;
            };

            // ── 6. Selection with fallback ──────────────────────────────
            let selection = {
                let ctx = StrategyContext {
                    params: &cfg.strategy_params,
                    bars: &bars,
                };
                self.selector.select(regime, &last_bar, frame, &ctx)
            };
            let Some(signal) = selection.signal else {
                continue;
            };

            self.app
                .telemetry
                .signals_generated_total
                .with_label_values(&[&signal.strategy_id])
                .inc();
            self.emit(
                EventKind::SignalGenerated,
                &signal.id,
                &code,
                serde_json::json!({
                    "strategy": signal.strategy_id,
                    "side": signal.side.to_string(),
                    "confidence": signal.confidence,
                    "rationale": signal.rationale.to_string(),
                    "regime": regime.to_string(),
                    "tried": selection.tried,
                }),
            );

            // ── 7. Cognition ────────────────────────────────────────────
            let now = Utc::now();
            let enhanced = self.cognition.enhance(&signal, regime, now);
            self.emit(
                EventKind::SignalEnhanced,
                &signal.id,
                &code,
                serde_json::json!({
                    "confidence": enhanced.confidence,
                    "size_multiplier": enhanced.size_multiplier,
                    "warnings": enhanced.warnings,
                    "blocked": enhanced.blocked,
                }),
            );
            self.last_candidates
                .insert(code.clone(), (signal.side, enhanced.confidence));

            if enhanced.blocked {
                self.emit(
                    EventKind::SignalBlocked,
                    &signal.id,
                    &code,
                    serde_json::json!({ "reason": "critical_event" }),
                );
                continue;
            }

            // ── 8. Admission + sizing ───────────────────────────────────
            let tags = self.selector.tags_of(&signal.strategy_id);
            let admission = {
                let inputs = AdmissionInputs {
                    enhanced: &enhanced,
                    account: &account,
                    symbol: &symbol,
                    tick: &tick,
                    phase: effective_phase,
                    phase_cfg: &phase_cfg,
                    open_for_symbol: self.tracker.open_count_for(&code),
                    open_global: self.tracker.open_count(),
                    strategy_tags: tags,
                    bars: &bars,
                    now,
                };
                self.evaluator.evaluate(&mut self.ledger, &inputs)
            };

            let approved = match admission {
                Admission::Admit(approved) => approved,
                Admission::Reject(reason) => {
                    self.app
                        .telemetry
                        .orders_rejected_total
                        .with_label_values(&[reason.code()])
                        .inc();
                    let kind = if reason.is_invariant_violation() {
                        EventKind::InvariantViolation
                    } else {
                        EventKind::SignalBlocked
                    };
                    self.emit(
                        kind,
                        &signal.id,
                        &code,
                        serde_json::json!({ "reason": reason.code(), "detail": reason.to_string() }),
                    );
                    continue;
                }
            };

            // ── 9. Execution ────────────────────────────────────────────
            let adapter = self.adapter.clone();
            let events = self.sink.clone();
            let outcome = self
                .execution
                .submit(
                    &*adapter,
                    &*events,
                    &self.app.telemetry,
                    self.cycle_id,
                    &regime.to_string(),
                    &enhanced,
                    &approved,
                    Duration::from_secs(cfg.loop_cfg.op_timeout_seconds),
                    cfg.loop_cfg.max_retries,
                )
                .await;

            match outcome {
                Ok(OrderOutcome::Filled { ticket, fill_price }) => {
                    self.app
                        .telemetry
                        .signal_to_fill_seconds
                        .observe(cycle_start.elapsed().as_secs_f64());
                    self.ledger.record_trade_open(now);
                    self.trade_meta.insert(
                        ticket,
                        TradeMeta {
                            strategy_id: signal.strategy_id.clone(),
                            signal_id: signal.id.clone(),
                            entry: fill_price,
                            stop: signal.stop_hint,
                        },
                    );

                    // Canonical position from the source of truth.
                    let adapter = self.adapter.clone();
                    let lookup = with_retries(cfg, move || {
                        let adapter = adapter.clone();
                        async move { adapter.position_by_ticket(ticket).await }
                    });
                    let position = match lookup.await {
                        Ok(position) => position,
                        Err(err) => {
                            warn!(ticket, error = %err, "post-fill lookup failed — synthesizing");
                            Position {
                                ticket,
                                symbol: code.clone(),
                                side: signal.side,
                                volume: approved.volume,
                                entry_price: fill_price,
                                current_price: fill_price,
                                sl: Some(signal.stop_hint),
                                tp: Some(signal.target_hint),
                                open_time: now,
                                tag: None,
                                pnl: 0.0,
                                mae: 0.0,
                                mfe: 0.0,
                            }
                        }
                    };
                    self.tracker.record_fill(position);
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(signal_id = %signal.id, error = %err, "submission failed");
                }
            }
        }
    }

    // ── Degraded mode ───────────────────────────────────────────────────

    fn note_cycle_fault(&mut self) {
        self.faulted_cycles += 1;
        if self.faulted_cycles >= DEGRADED_AFTER_FAULTS && !self.degraded {
            self.degraded = true;
            self.emit(
                EventKind::DegradedModeEntered,
                format!("degraded-{}", self.cycle_id),
                "engine",
                serde_json::json!({ "faulted_cycles": self.faulted_cycles }),
            );
            warn!("degraded mode entered — exits only");
        }
    }

    fn note_cycle_clean(&mut self) {
        self.faulted_cycles = 0;
        if self.degraded {
            self.degraded = false;
            self.emit(
                EventKind::DegradedModeExited,
                format!("degraded-{}", self.cycle_id),
                "engine",
                serde_json::json!({}),
            );
            info!("degraded mode exited");
        }
    }

    // ── Bookkeeping ─────────────────────────────────────────────────────

    fn emit(
        &self,
        kind: EventKind,
        correlation_id: impl Into<String>,
        subject: impl Into<String>,
        payload: serde_json::Value,
    ) {
        self.sink
            .append_event(&Event::new(self.cycle_id, kind, correlation_id, subject, payload));
    }

    fn finish_cycle(&mut self, cycle_start: std::time::Instant) {
        self.last_cycle_duration_ms = cycle_start.elapsed().as_millis() as u64;

        let telemetry = &self.app.telemetry;
        telemetry
            .cycle_duration_seconds
            .observe(cycle_start.elapsed().as_secs_f64());
        telemetry.open_positions.set(self.tracker.open_count() as f64);
        telemetry.current_dd_pct.set(self.ledger.current_dd_pct());
        telemetry.drawdown_state.set(self.ledger.state().gauge_value());
        if let Some(account) = &self.last_account {
            telemetry.equity.set(account.equity);
        }
        if let Some(mgr) = &self.account_mgr {
            telemetry.account_phase.set(mgr.current().gauge_value());
        }

        let snapshot = CycleSnapshot {
            cycle_id: self.cycle_id,
            server_time: self.last_account.as_ref().map(|a| a.server_time),
            phase: self
                .account_mgr
                .as_ref()
                .map(|m| m.current().to_string())
                .unwrap_or_else(|| "unassigned".to_string()),
            drawdown_state: self.ledger.state().to_string(),
            current_dd_pct: self.ledger.current_dd_pct(),
            peak_equity: self.ledger.peak_equity(),
            degraded: self.degraded,
            account: self.last_account.clone(),
            positions: self.tracker.open_positions(),
            regimes: self
                .last_regimes
                .iter()
                .map(|(k, v)| (k.clone(), v.to_string()))
                .collect(),
            cycle_duration_ms: self.last_cycle_duration_ms,
            consecutive_wins: self.ledger.consecutive_wins(),
            consecutive_losses: self.ledger.consecutive_losses(),
        };
        self.app.publish_snapshot(snapshot);
    }

    // Test-facing accessors.
    #[cfg(test)]
    pub(crate) fn tracker(&self) -> &PositionTracker {
        &self.tracker
    }
    #[cfg(test)]
    pub(crate) fn ledger(&self) -> &RiskLedger {
        &self.ledger
    }
    #[cfg(test)]
    pub(crate) fn is_degraded(&self) -> bool {
        self.degraded
    }
}

/// Retry a transient-fallible adapter operation within the cycle budget,
/// with exponential backoff between attempts.
async fn with_retries<T, F, Fut>(cfg: &EngineConfig, mut op: F) -> AdapterResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = AdapterResult<T>>,
{
    let timeout = Duration::from_secs(cfg.loop_cfg.op_timeout_seconds);
    let mut attempt = 0u32;
    loop {
        match await_within_timeout(op(), timeout).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < cfg.loop_cfg.max_retries => {
                attempt += 1;
                let backoff = Duration::from_millis(50 * 2u64.pow(attempt));
                debug!(attempt, error = %err, "transient adapter fault — backing off");
                tokio::time::sleep(backoff).await;
            }
            Err(err) => return Err(err),
        }
    }
}

// =============================================================================
// Scenario tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::sim::{SimAdapter, SimOp};
    use crate::config::CriticalEventWindow;
    use crate::events::MemoryEventLog;
    use crate::telemetry::Telemetry;
    use crate::types::Bar;
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn eurusd() -> Symbol {
        Symbol {
            code: "EURUSD".into(),
            pip_size: 0.0001,
            lot_min: 0.01,
            lot_step: 0.01,
            lot_max: 10.0,
            contract_size: 100_000.0,
            quote_ccy: "USD".into(),
            is_crypto: false,
        }
    }

    fn btcusd() -> Symbol {
        Symbol {
            code: "BTCUSD".into(),
            pip_size: 1.0,
            lot_min: 0.01,
            lot_step: 0.01,
            lot_max: 10.0,
            contract_size: 1.0,
            quote_ccy: "USD".into(),
            is_crypto: true,
        }
    }

    /// Relentless staircase rally: deterministic RSI pin, strong trend.
    fn rally_bars(code: &str, n: usize, base: f64, step: f64) -> Vec<Bar> {
        let t0 = Utc.with_ymd_and_hms(2025, 6, 2, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                let close = base + step * i as f64;
                let open = if i == 0 { close } else { base + step * (i - 1) as f64 };
                Bar {
                    symbol: code.into(),
                    tf: Timeframe::M5,
                    open_time: t0 + ChronoDuration::minutes(5 * i as i64),
                    open,
                    high: close.max(open) + step * 0.2,
                    low: close.min(open) - step * 0.2,
                    close,
                    volume: 100.0,
                }
            })
            .collect()
    }

    struct Harness {
        sim: Arc<SimAdapter>,
        app: Arc<AppState>,
        events: Arc<MemoryEventLog>,
        engine: TradingEngine,
    }

    fn harness(balance: f64, symbols: Vec<&str>) -> Harness {
        let mut cfg = EngineConfig::default();
        cfg.trading_mode = TradingMode::Live;
        cfg.symbols = symbols.iter().map(|s| s.to_string()).collect();

        let sim = Arc::new(SimAdapter::new(balance));
        let events = Arc::new(MemoryEventLog::new(1024));
        let app = Arc::new(AppState::new(
            cfg,
            Telemetry::new().unwrap(),
            events.clone(),
        ));
        let engine = TradingEngine::new(
            sim.clone(),
            app.clone(),
            events.clone(),
            RecoveredState::default(),
        );
        Harness {
            sim,
            app,
            events,
            engine,
        }
    }

    /// S1 — happy-path entry: a strong rally produces an admitted signal,
    /// an order chain, and a tracked position sized per the phase formula.
    #[tokio::test]
    async fn s1_happy_path_entry() {
        let mut h = harness(400.0, vec!["EURUSD"]);
        h.sim.add_symbol(eurusd());
        h.sim.set_spread("EURUSD", 0.0006); // 6 points vs growth cap 50
        h.sim
            .set_bars("EURUSD", Timeframe::M5, rally_bars("EURUSD", 120, 1.05, 0.002));

        h.engine.cycle().await;

        assert_eq!(
            h.events.count_by_kind(EventKind::SignalGenerated),
            1,
            "expected one signal"
        );
        assert_eq!(h.events.count_by_kind(EventKind::OrderSubmitted), 1);
        assert_eq!(h.events.count_by_kind(EventKind::OrderFilled), 1);
        assert_eq!(h.engine.tracker().open_count(), 1);
        assert_eq!(h.sim.open_position_count(), 1);

        // Submission chain shares the signal's correlation id and strategy
        // provenance matches the last tried entry.
        let generated = h.events.recent(1024);
        let sig = generated
            .iter()
            .find(|e| e.kind == EventKind::SignalGenerated)
            .unwrap();
        let submitted = generated
            .iter()
            .find(|e| e.kind == EventKind::OrderSubmitted)
            .unwrap();
        assert_eq!(sig.correlation_id, submitted.correlation_id);
        assert_eq!(
            sig.payload["tried"].as_array().unwrap().last().unwrap(),
            &sig.payload["strategy"]
        );

        // Phase snapshot reflects Growth at a 400 balance.
        assert_eq!(h.app.snapshot().phase, "growth");
    }

    /// S2 — fallback provenance: the top-ranked strategy declines the bar,
    /// the selector falls through, and the submitted order is attributed to
    /// the fallback that actually fired — never to the primary.
    #[tokio::test]
    async fn s2_fallback_provenance_records_the_actual_strategy() {
        let mut h = harness(400.0, vec!["EURUSD"]);
        h.sim.add_symbol(eurusd());
        h.sim.set_spread("EURUSD", 0.0006);

        // Staircase rally capped by a flat bar: the trend strategies find no
        // recovery bar, cross, or breakout to act on, while RSI stays pinned
        // for the reversal fade.
        let mut bars = rally_bars("EURUSD", 120, 1.05, 0.002);
        let top = bars.last().unwrap().clone();
        let mut flat = top.clone();
        flat.open_time = top.open_time + ChronoDuration::minutes(5);
        flat.open = top.close;
        flat.close = top.close;
        flat.high = top.close + 0.0002;
        flat.low = top.close - 0.0002;
        bars.push(flat);
        h.sim.set_bars("EURUSD", Timeframe::M5, bars);

        h.engine.cycle().await;

        let log = h.events.recent(1024);
        let sig = log
            .iter()
            .find(|e| e.kind == EventKind::SignalGenerated)
            .expect("expected a fallback signal");
        let tried: Vec<String> = sig.payload["tried"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap_or("").to_string())
            .collect();
        assert_eq!(sig.payload["strategy"], "rsi_reversal");
        assert_eq!(tried.first().map(String::as_str), Some("trend_following"));
        assert_eq!(tried.last().map(String::as_str), Some("rsi_reversal"));
        assert!(tried.len() > 1, "a fallback needs more than one attempt");

        // Submission provenance carries the fallback; the declined primary
        // never appears on a submission event.
        let submitted: Vec<_> = log
            .iter()
            .filter(|e| e.kind == EventKind::OrderSubmitted)
            .collect();
        assert!(!submitted.is_empty());
        for event in &submitted {
            assert_eq!(event.payload["strategy"], "rsi_reversal");
            assert_eq!(event.payload["side"], "SHORT");
        }
        assert_eq!(h.events.count_by_kind(EventKind::OrderFilled), 1);
    }

    /// S3 — cognition block: a declared critical event suppresses the order;
    /// once the window passes the same tape trades.
    #[tokio::test]
    async fn s3_critical_event_blocks_then_clears() {
        let mut h = harness(400.0, vec!["EURUSD"]);
        h.sim.add_symbol(eurusd());
        h.sim.set_spread("EURUSD", 0.0006);
        h.sim
            .set_bars("EURUSD", Timeframe::M5, rally_bars("EURUSD", 120, 1.05, 0.002));
        h.app.config.write().cognition.critical_events.push(CriticalEventWindow {
            name: "nfp".into(),
            at: Utc::now(),
            window_minutes: 30,
        });
        // The engine reads cognition config at construction; rebuild.
        h.engine = TradingEngine::new(
            h.sim.clone(),
            h.app.clone(),
            h.events.clone(),
            RecoveredState::default(),
        );

        h.engine.cycle().await;
        let blocked = h.events.recent(1024);
        let block = blocked
            .iter()
            .find(|e| e.kind == EventKind::SignalBlocked)
            .expect("expected a signal_blocked event");
        assert_eq!(block.payload["reason"], "critical_event");
        assert_eq!(h.events.count_by_kind(EventKind::OrderSubmitted), 0);

        // Window passed: clear events and rebuild the overlay.
        h.app.config.write().cognition.critical_events.clear();
        h.engine = TradingEngine::new(
            h.sim.clone(),
            h.app.clone(),
            h.events.clone(),
            RecoveredState::default(),
        );
        h.engine.cycle().await;
        assert!(h.events.count_by_kind(EventKind::OrderFilled) >= 1);
    }

    /// S4 — drawdown ladder: 1000 → 850 → 700 → 550 walks
    /// Normal → Caution → Warning → Danger with transition events.
    #[tokio::test]
    async fn s4_drawdown_ladder() {
        let mut h = harness(1_000.0, vec!["EURUSD"]);
        // Paused: the ladder is about equity, not entries.
        h.app.set_trading_mode(TradingMode::Paused);
        h.sim.add_symbol(eurusd());
        h.sim
            .set_bars("EURUSD", Timeframe::M5, rally_bars("EURUSD", 60, 1.05, 0.0005));

        for equity in [1_000.0, 850.0, 700.0, 550.0] {
            h.sim.set_balance(equity);
            h.engine.cycle().await;
        }

        let transitions: Vec<String> = h
            .events
            .recent(1024)
            .iter()
            .filter(|e| e.kind == EventKind::DrawdownStateChanged)
            .map(|e| e.payload["to"].as_str().unwrap_or("").to_string())
            .collect();
        assert_eq!(transitions, vec!["caution", "warning", "danger"]);
        assert!((h.engine.ledger().peak_equity() - 1_000.0).abs() < 1e-9);
        assert!((h.engine.ledger().current_dd_pct() - 0.45).abs() < 1e-9);
    }

    /// S5 — UNKNOWN symbol self-heal: a position reported with the sentinel
    /// is re-queried and stored under its canonical code.
    #[tokio::test]
    async fn s5_unknown_symbol_self_heals() {
        let mut h = harness(1_000.0, vec!["EURUSD"]);
        h.sim.add_symbol(eurusd());
        h.sim
            .set_bars("EURUSD", Timeframe::M5, rally_bars("EURUSD", 60, 1.05, 0.0005));
        let ticket = h
            .sim
            .place_external_position("EURUSD", Side::Long, 0.05, 1.05, Some("mrd-ext"));
        h.sim.corrupt_position_symbol(ticket, crate::types::UNKNOWN_SYMBOL);

        h.engine.cycle().await;

        let fixed = h
            .events
            .recent(1024)
            .iter()
            .any(|e| e.kind == EventKind::PositionReconciled && e.payload["fixed_symbol"] == true);
        assert!(fixed, "expected position_reconciled{{fixed_symbol}}");
        let local = h.engine.tracker().get(ticket).expect("tracked after heal");
        assert_eq!(local.symbol, "EURUSD");
    }

    /// S6 — weekend crypto no-op: an aged BTC position is never closed by
    /// the time-based rule.
    #[tokio::test]
    async fn s6_crypto_weekend_noop() {
        let mut h = harness(400.0, vec!["BTCUSD"]);
        h.sim.add_symbol(btcusd());
        h.sim.set_spread("BTCUSD", 10.0);
        h.sim
            .set_bars("BTCUSD", Timeframe::M5, rally_bars("BTCUSD", 80, 40_000.0, 1.0));
        let ticket = h
            .sim
            .place_external_position("BTCUSD", Side::Long, 0.10, 40_000.0, Some("mrd-b"));
        // Age it far past the 48h limit; for crypto that must not matter.
        h.sim
            .set_position_open_time(ticket, Utc::now() - ChronoDuration::days(4));

        h.engine.cycle().await;
        h.engine.cycle().await;

        let closes: Vec<_> = h
            .events
            .recent(2048)
            .iter()
            .filter(|e| {
                e.kind == EventKind::PositionClosed
                    && e.payload["ticket"].as_u64() == Some(ticket)
            })
            .cloned()
            .collect();
        assert!(closes.is_empty(), "crypto position must not be closed: {closes:?}");
        assert!(h.engine.tracker().get(ticket).is_some());
    }

    /// S7 — confluence scale-out then close: reversal evidence against a
    /// long accumulates over three cycles into Hold, ScaleOut(0.5), Close,
    /// and the closed volume adds back up to the original position.
    #[tokio::test]
    async fn s7_confluence_scale_out_then_close() {
        let mut h = harness(400.0, vec!["EURUSD"]);
        // Exits only: entries would just add noise to the volume accounting.
        h.app.set_trading_mode(TradingMode::Paused);
        h.sim.add_symbol(eurusd());
        h.sim.set_spread("EURUSD", 0.0006);

        // Re-weight the detectors so the give-back / volume / trend-flip
        // trio carries the score, and park every higher-priority rule out of
        // reach so the confluence rung is the one deciding.
        {
            let mut cfg = h.app.config.write();
            cfg.exit.confluence.weights = crate::config::ConfluenceWeights {
                trend_flip: 0.30,
                rsi_divergence: 0.04,
                macd_cross: 0.04,
                bollinger_touch: 0.07,
                giveback: 0.40,
                volume: 0.15,
            };
            cfg.exit.trailing_activation_pct = 90.0;
            cfg.exit.hard_target_pct = 50.0;
            cfg.profit_scaling.emergency_lock_pct = 1.0;
            cfg.profit_scaling.tiers = vec![
                crate::config::ProfitTier {
                    trigger_pct: 50.0,
                    close_fraction: 0.5,
                },
                crate::config::ProfitTier {
                    trigger_pct: 60.0,
                    close_fraction: 1.0,
                },
            ];
        }

        // A long rally to 1.258; the position rode it up from 1.20.
        let bars = rally_bars("EURUSD", 100, 1.06, 0.002);
        let top = bars.last().unwrap().clone();
        h.sim.set_bars("EURUSD", Timeframe::M5, bars);
        let ticket = h
            .sim
            .place_external_position("EURUSD", Side::Long, 0.01, 1.20, Some("mrd-s7"));

        let sim = h.sim.clone();
        let mut t = top.open_time;
        let mut prev = top.close;
        let mut push = move |close: f64, volume: f64| {
            t += ChronoDuration::minutes(5);
            sim.push_bar(Bar {
                symbol: "EURUSD".into(),
                tf: Timeframe::M5,
                open_time: t,
                open: prev,
                high: prev.max(close) + 0.0005,
                low: prev.min(close) - 0.0005,
                close,
                volume,
            });
            prev = close;
        };

        let exit_decisions = |h: &Harness| -> Vec<(String, String)> {
            h.events
                .recent(4096)
                .iter()
                .filter(|e| {
                    e.kind == EventKind::ExitTriggered
                        && e.payload["ticket"].as_u64() == Some(ticket)
                })
                .map(|e| {
                    (
                        e.payload["rule"].as_str().unwrap_or("").to_string(),
                        e.payload["decision"].as_str().unwrap_or("").to_string(),
                    )
                })
                .collect()
        };

        // Cycle 1 — marked to market at the peak: full excursion intact,
        // no detector fires, the position holds.
        push(top.close, 100.0);
        h.engine.cycle().await;
        assert!(exit_decisions(&h).is_empty(), "peak cycle must hold");
        let original = h.engine.tracker().get(ticket).unwrap().volume;
        assert!((original - 0.01).abs() < 1e-9);

        // Cycle 2 — one sharp break surrenders over half the excursion on
        // spike volume: scale out half.
        push(1.2270, 320.0);
        h.engine.cycle().await;
        assert_eq!(
            exit_decisions(&h),
            vec![("confluence".to_string(), "scale_out(0.50)".to_string())]
        );
        let broker_remaining = h.sim.position(ticket).unwrap().volume;
        assert!((broker_remaining - 0.005).abs() < 1e-9);
        assert!((h.engine.tracker().get(ticket).unwrap().volume - 0.005).abs() < 1e-9);

        // Cycle 3 — a sustained slide flips the trend: close the rest.
        let mut close = 1.2270;
        for k in 0..25 {
            close -= 0.004;
            let volume = if k == 24 { 320.0 } else { 100.0 };
            push(close, volume);
        }
        h.engine.cycle().await;
        let decisions = exit_decisions(&h);
        assert_eq!(decisions.len(), 2);
        assert_eq!(decisions[1], ("confluence".to_string(), "close".to_string()));

        // Cumulative closed volume (per broker truth) equals the original.
        assert!(h.engine.tracker().get(ticket).is_none());
        assert!(h.sim.position(ticket).is_none());
        let closed_cycle2 = original - broker_remaining;
        let closed_cycle3 = broker_remaining;
        assert!(((closed_cycle2 + closed_cycle3) - original).abs() < 1e-12);
    }

    /// S8 — adapter timeouts: two faulted cycles enter degraded mode and
    /// suppress entries while exits keep working; a clean cycle exits it.
    #[tokio::test]
    async fn s8_degraded_mode_roundtrip() {
        let mut h = harness(400.0, vec!["EURUSD"]);
        h.sim.add_symbol(eurusd());
        h.sim.set_spread("EURUSD", 0.0006);
        h.sim
            .set_bars("EURUSD", Timeframe::M5, rally_bars("EURUSD", 120, 1.05, 0.002));

        // Prime: one clean cycle caches the account (and trades).
        h.engine.cycle().await;
        let baseline_orders = h.events.count_by_kind(EventKind::OrderSubmitted);

        // Each faulted cycle consumes 1 + max_retries attempts.
        let attempts = 1 + h.app.config.read().loop_cfg.max_retries;
        for _ in 0..(2 * attempts) {
            h.sim
                .inject_fault(SimOp::AccountInfo, AdapterError::Timeout(10));
        }

        h.engine.cycle().await;
        assert!(!h.engine.is_degraded(), "one faulted cycle is not degraded yet");
        h.engine.cycle().await;
        assert!(h.engine.is_degraded(), "two faulted cycles must degrade");
        assert_eq!(h.events.count_by_kind(EventKind::DegradedModeEntered), 1);
        assert_eq!(
            h.events.count_by_kind(EventKind::OrderSubmitted),
            baseline_orders,
            "entries must be suppressed while degraded"
        );

        // Clean cycle: recovery.
        h.engine.cycle().await;
        assert!(!h.engine.is_degraded());
        assert_eq!(h.events.count_by_kind(EventKind::DegradedModeExited), 1);
    }

    /// Adoption policy reject_all leaves external positions unmanaged.
    #[tokio::test]
    async fn reject_all_policy_ignores_externals() {
        let mut h = harness(1_000.0, vec!["EURUSD"]);
        h.app.set_trading_mode(TradingMode::Paused);
        h.app.config.write().adoption.policy = crate::config::AdoptionPolicy::RejectAll;
        h.sim.add_symbol(eurusd());
        h.sim
            .set_bars("EURUSD", Timeframe::M5, rally_bars("EURUSD", 60, 1.05, 0.0005));
        h.sim
            .place_external_position("EURUSD", Side::Long, 0.05, 1.05, None);

        h.engine.cycle().await;
        assert_eq!(h.engine.tracker().open_count(), 0);
        assert_eq!(h.events.count_by_kind(EventKind::PositionAdopted), 0);
    }

    /// Cycle with no reachable adapter and no cache aborts cleanly.
    #[tokio::test]
    async fn first_cycle_abort_emits_event() {
        let mut h = harness(400.0, vec!["EURUSD"]);
        let attempts = 1 + h.app.config.read().loop_cfg.max_retries;
        for _ in 0..attempts {
            h.sim
                .inject_fault(SimOp::AccountInfo, AdapterError::Connection("down".into()));
        }
        h.engine.cycle().await;
        assert_eq!(h.events.count_by_kind(EventKind::CycleAborted), 1);
        assert_eq!(h.engine.tracker().open_count(), 0);
    }

    /// Exits are dispatched strictly before entries inside one cycle: the
    /// event log shows the exit before the submission.
    #[tokio::test]
    async fn exits_dispatch_before_entries() {
        let mut h = harness(400.0, vec!["EURUSD"]);
        h.sim.add_symbol(eurusd());
        h.sim.set_spread("EURUSD", 0.0006);
        let bars = rally_bars("EURUSD", 120, 1.05, 0.002);
        let last = bars.last().unwrap().clone();
        h.sim.set_bars("EURUSD", Timeframe::M5, bars);

        // A deeply-underwater external position; marking it to market puts
        // it beyond its stop, so the exit ladder must close it this cycle.
        let ticket = h
            .sim
            .place_external_position("EURUSD", Side::Long, 0.01, 1.40, Some("mrd-old"));
        {
            let mut marker = last.clone();
            marker.open_time = last.open_time + ChronoDuration::minutes(5);
            h.sim.push_bar(marker);
        }
        let _ = h
            .sim
            .position_modify(ticket, Some(1.35), None)
            .await;

        h.engine.cycle().await;

        let log = h.events.recent(1024);
        let exit_idx = log
            .iter()
            .position(|e| e.kind == EventKind::ExitTriggered)
            .expect("expected an exit this cycle");
        let entry_idx = log
            .iter()
            .position(|e| e.kind == EventKind::OrderSubmitted)
            .expect("expected an entry this cycle");
        assert!(
            exit_idx < entry_idx,
            "exit at {exit_idx} must precede entry at {entry_idx}"
        );
        assert!(h.engine.tracker().get(ticket).is_none());
    }

    /// Paused mode manages exits but never enters.
    #[tokio::test]
    async fn paused_mode_suppresses_entries() {
        let mut h = harness(400.0, vec!["EURUSD"]);
        h.app.set_trading_mode(TradingMode::Paused);
        h.sim.add_symbol(eurusd());
        h.sim.set_spread("EURUSD", 0.0006);
        h.sim
            .set_bars("EURUSD", Timeframe::M5, rally_bars("EURUSD", 120, 1.05, 0.002));

        h.engine.cycle().await;
        assert_eq!(h.events.count_by_kind(EventKind::OrderSubmitted), 0);
        assert_eq!(h.engine.tracker().open_count(), 0);
    }
}
