// =============================================================================
// Simulated Broker — deterministic in-memory MarketAdapter
// =============================================================================
//
// The engine's safe startup mode and the backbone of the scenario tests.
// Bars are scripted, fills are synthetic at the current quote, and faults can
// be injected per operation to exercise the degraded-mode machinery.
//
// Duplicate `client_tag` submissions return the originally recorded fill, the
// same contract a real terminal gateway honours.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info};

use async_trait::async_trait;

use crate::adapter::{AdapterError, AdapterResult, MarketAdapter};
use crate::types::{
    AccountSnapshot, Bar, OrderOutcome, OrderRequest, Position, Side, Symbol, Tick, Timeframe,
};

/// Which adapter operation a scripted fault applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimOp {
    AccountInfo,
    SymbolInfo,
    CopyRates,
    Tick,
    Positions,
    OrderSend,
    PositionClose,
    PositionModify,
}

struct Inner {
    balance: f64,
    currency: String,
    trade_allowed: bool,
    symbols: HashMap<String, Symbol>,
    /// Scripted bars per (symbol, timeframe), oldest first.
    bars: HashMap<(String, Timeframe), Vec<Bar>>,
    /// Absolute spread per symbol in price units.
    spreads: HashMap<String, f64>,
    positions: HashMap<u64, Position>,
    next_ticket: u64,
    /// client_tag -> recorded fill, for duplicate-submission replay.
    fills_by_tag: HashMap<String, (u64, f64)>,
    /// Scripted faults consumed one per call.
    faults: HashMap<SimOp, VecDeque<AdapterError>>,
}

impl Inner {
    fn contract_of(&self, code: &str) -> f64 {
        self.symbols
            .get(code)
            .map(|s| s.contract_size)
            .unwrap_or(1.0)
    }
}

/// Deterministic in-memory broker.
pub struct SimAdapter {
    inner: Mutex<Inner>,
}

impl SimAdapter {
    pub fn new(balance: f64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                balance,
                currency: "USD".to_string(),
                trade_allowed: true,
                symbols: HashMap::new(),
                bars: HashMap::new(),
                spreads: HashMap::new(),
                positions: HashMap::new(),
                next_ticket: 1000,
                fills_by_tag: HashMap::new(),
                faults: HashMap::new(),
            }),
        }
    }

    // ── Scripting interface ─────────────────────────────────────────────

    pub fn add_symbol(&self, symbol: Symbol) {
        let mut s = self.inner.lock();
        s.spreads.entry(symbol.code.clone()).or_insert(symbol.pip_size * 2.0);
        s.symbols.insert(symbol.code.clone(), symbol);
    }

    pub fn set_bars(&self, code: &str, tf: Timeframe, bars: Vec<Bar>) {
        self.inner.lock().bars.insert((code.to_string(), tf), bars);
    }

    pub fn push_bar(&self, bar: Bar) {
        let mut s = self.inner.lock();
        let key = (bar.symbol.clone(), bar.tf);
        let close = bar.close;
        let symbol = bar.symbol.clone();
        s.bars.entry(key).or_default().push(bar);
        // Mark open positions to the new price.
        let contract = s.contract_of(&symbol);
        for pos in s.positions.values_mut().filter(|p| p.symbol == symbol) {
            pos.current_price = close;
            pos.pnl = pos.side.sign() * (close - pos.entry_price) * pos.volume * contract;
        }
    }

    pub fn set_spread(&self, code: &str, spread: f64) {
        self.inner.lock().spreads.insert(code.to_string(), spread);
    }

    pub fn set_balance(&self, balance: f64) {
        self.inner.lock().balance = balance;
    }

    pub fn set_trade_allowed(&self, allowed: bool) {
        self.inner.lock().trade_allowed = allowed;
    }

    /// Queue a fault for the next call(s) of `op`.
    pub fn inject_fault(&self, op: SimOp, err: AdapterError) {
        self.inner.lock().faults.entry(op).or_default().push_back(err);
    }

    /// Create a position at the broker that the engine did not open, for
    /// adoption and reconciliation tests. Returns the ticket.
    pub fn place_external_position(
        &self,
        code: &str,
        side: Side,
        volume: f64,
        entry_price: f64,
        tag: Option<&str>,
    ) -> u64 {
        let mut s = self.inner.lock();
        let ticket = s.next_ticket;
        s.next_ticket += 1;
        s.positions.insert(
            ticket,
            Position {
                ticket,
                symbol: code.to_string(),
                side,
                volume,
                entry_price,
                current_price: entry_price,
                sl: None,
                tp: None,
                open_time: Utc::now(),
                tag: tag.map(str::to_string),
                pnl: 0.0,
                mae: 0.0,
                mfe: 0.0,
            },
        );
        ticket
    }

    /// Overwrite the reported symbol of a live position (models a terminal
    /// that has not resolved instrument metadata yet).
    pub fn corrupt_position_symbol(&self, ticket: u64, code: &str) {
        if let Some(p) = self.inner.lock().positions.get_mut(&ticket) {
            p.symbol = code.to_string();
        }
    }

    /// Backdate a position's open time, for age-based exit tests.
    pub fn set_position_open_time(&self, ticket: u64, open_time: chrono::DateTime<Utc>) {
        if let Some(p) = self.inner.lock().positions.get_mut(&ticket) {
            p.open_time = open_time;
        }
    }

    pub fn open_position_count(&self) -> usize {
        self.inner.lock().positions.len()
    }

    pub fn position(&self, ticket: u64) -> Option<Position> {
        self.inner.lock().positions.get(&ticket).cloned()
    }

    // ── Internals ───────────────────────────────────────────────────────

    fn take_fault(&self, op: SimOp) -> Option<AdapterError> {
        self.inner.lock().faults.get_mut(&op)?.pop_front()
    }

    fn last_close(s: &Inner, code: &str) -> Option<f64> {
        s.bars
            .iter()
            .filter(|((sym, _), bars)| sym == code && !bars.is_empty())
            .map(|(_, bars)| bars.last().expect("non-empty").close)
            .next()
    }
}

#[async_trait]
impl MarketAdapter for SimAdapter {
    async fn account_info(&self) -> AdapterResult<AccountSnapshot> {
        if let Some(err) = self.take_fault(SimOp::AccountInfo) {
            return Err(err);
        }
        let s = self.inner.lock();
        let floating: f64 = s.positions.values().map(|p| p.pnl).sum();
        let equity = s.balance + floating;
        let margin_used: f64 = s
            .positions
            .values()
            .map(|p| p.entry_price * p.volume * s.contract_of(&p.symbol) * 0.01)
            .sum();
        Ok(AccountSnapshot {
            balance: s.balance,
            equity,
            margin_used,
            margin_free: (equity - margin_used).max(0.0),
            margin_level: (margin_used > 0.0).then(|| equity / margin_used * 100.0),
            currency: s.currency.clone(),
            trade_allowed: s.trade_allowed,
            server_time: Utc::now(),
        })
    }

    async fn symbol_info(&self, code: &str) -> AdapterResult<Symbol> {
        if let Some(err) = self.take_fault(SimOp::SymbolInfo) {
            return Err(err);
        }
        self.inner
            .lock()
            .symbols
            .get(code)
            .cloned()
            .ok_or_else(|| AdapterError::UnknownSymbol(code.to_string()))
    }

    async fn copy_rates(&self, code: &str, tf: Timeframe, count: usize) -> AdapterResult<Vec<Bar>> {
        if let Some(err) = self.take_fault(SimOp::CopyRates) {
            return Err(err);
        }
        let s = self.inner.lock();
        if !s.symbols.contains_key(code) {
            return Err(AdapterError::UnknownSymbol(code.to_string()));
        }
        let bars = s
            .bars
            .get(&(code.to_string(), tf))
            .cloned()
            .unwrap_or_default();
        let skip = bars.len().saturating_sub(count);
        Ok(bars[skip..].to_vec())
    }

    async fn tick(&self, code: &str) -> AdapterResult<Tick> {
        if let Some(err) = self.take_fault(SimOp::Tick) {
            return Err(err);
        }
        let s = self.inner.lock();
        let mid = Self::last_close(&s, code)
            .ok_or_else(|| AdapterError::UnknownSymbol(code.to_string()))?;
        let spread = s.spreads.get(code).copied().unwrap_or(0.0);
        Ok(Tick {
            bid: mid - spread / 2.0,
            ask: mid + spread / 2.0,
            last: mid,
            time: Utc::now(),
        })
    }

    async fn positions(&self) -> AdapterResult<Vec<Position>> {
        if let Some(err) = self.take_fault(SimOp::Positions) {
            return Err(err);
        }
        let mut list: Vec<Position> = self.inner.lock().positions.values().cloned().collect();
        list.sort_by_key(|p| p.ticket);
        Ok(list)
    }

    async fn position_by_ticket(&self, ticket: u64) -> AdapterResult<Position> {
        let mut guard = self.inner.lock();
        let s = &mut *guard;
        // Targeted re-query resolves any unresolved symbol metadata.
        if let Some(p) = s.positions.get_mut(&ticket) {
            if p.symbol == crate::types::UNKNOWN_SYMBOL {
                if let Some(code) = s.symbols.keys().next().cloned() {
                    p.symbol = code;
                }
            }
        }
        s.positions
            .get(&ticket)
            .cloned()
            .ok_or(AdapterError::UnknownTicket(ticket))
    }

    async fn order_send(&self, request: &OrderRequest) -> AdapterResult<OrderOutcome> {
        if let Some(err) = self.take_fault(SimOp::OrderSend) {
            return Err(err);
        }
        let mut s = self.inner.lock();

        // Idempotency: a replayed tag maps to the original fill.
        if let Some(&(ticket, fill_price)) = s.fills_by_tag.get(&request.client_tag) {
            debug!(tag = %request.client_tag, ticket, "duplicate client tag — replaying fill");
            return Ok(OrderOutcome::Filled { ticket, fill_price });
        }

        if !s.symbols.contains_key(&request.symbol) {
            return Err(AdapterError::UnknownSymbol(request.symbol.clone()));
        }
        if request.volume <= 0.0 {
            return Ok(OrderOutcome::Rejected {
                code: "INVALID_VOLUME".to_string(),
                message: format!("volume {} not positive", request.volume),
            });
        }

        let mid = Self::last_close(&s, &request.symbol)
            .ok_or_else(|| AdapterError::InvalidResponse("no quote for symbol".to_string()))?;
        let spread = s.spreads.get(&request.symbol).copied().unwrap_or(0.0);
        let fill_price = match request.side {
            Side::Long => mid + spread / 2.0,
            Side::Short => mid - spread / 2.0,
        };

        let ticket = s.next_ticket;
        s.next_ticket += 1;
        s.positions.insert(
            ticket,
            Position {
                ticket,
                symbol: request.symbol.clone(),
                side: request.side,
                volume: request.volume,
                entry_price: fill_price,
                current_price: fill_price,
                sl: Some(request.sl),
                tp: Some(request.tp),
                open_time: Utc::now(),
                tag: Some(request.client_tag.clone()),
                pnl: 0.0,
                mae: 0.0,
                mfe: 0.0,
            },
        );
        s.fills_by_tag
            .insert(request.client_tag.clone(), (ticket, fill_price));

        info!(
            symbol = %request.symbol,
            side = %request.side,
            volume = request.volume,
            ticket,
            fill_price,
            "sim fill"
        );
        Ok(OrderOutcome::Filled { ticket, fill_price })
    }

    async fn position_close(&self, ticket: u64, volume_fraction: f64) -> AdapterResult<()> {
        if let Some(err) = self.take_fault(SimOp::PositionClose) {
            return Err(err);
        }
        if !(0.0..=1.0).contains(&volume_fraction) || volume_fraction == 0.0 {
            return Err(AdapterError::Rejected {
                code: "INVALID_FRACTION".to_string(),
                message: format!("close fraction {volume_fraction} outside (0, 1]"),
            });
        }
        let mut s = self.inner.lock();
        let contract = s
            .positions
            .get(&ticket)
            .map(|p| s.contract_of(&p.symbol))
            .unwrap_or(1.0);
        let pos = s
            .positions
            .get_mut(&ticket)
            .ok_or(AdapterError::UnknownTicket(ticket))?;

        let closed_volume = pos.volume * volume_fraction;
        let realized =
            pos.side.sign() * (pos.current_price - pos.entry_price) * closed_volume * contract;
        pos.volume -= closed_volume;
        pos.pnl = pos.side.sign() * (pos.current_price - pos.entry_price) * pos.volume * contract;
        let fully_closed = pos.volume <= 1e-9;

        if fully_closed {
            s.positions.remove(&ticket);
        }
        s.balance += realized;

        info!(ticket, volume_fraction, realized, fully_closed, "sim close");
        Ok(())
    }

    async fn position_modify(
        &self,
        ticket: u64,
        sl: Option<f64>,
        tp: Option<f64>,
    ) -> AdapterResult<()> {
        if let Some(err) = self.take_fault(SimOp::PositionModify) {
            return Err(err);
        }
        let mut s = self.inner.lock();
        let pos = s
            .positions
            .get_mut(&ticket)
            .ok_or(AdapterError::UnknownTicket(ticket))?;
        if sl.is_some() {
            pos.sl = sl;
        }
        if tp.is_some() {
            pos.tp = tp;
        }
        Ok(())
    }
}
