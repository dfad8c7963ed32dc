// =============================================================================
// Shared types used across the Meridian trading engine
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel symbol code reported by some broker terminals for positions whose
/// instrument metadata has not resolved yet. No price-dependent path may ever
/// consume it; the tracker triggers a targeted re-query instead.
pub const UNKNOWN_SYMBOL: &str = "UNKNOWN";

// ---------------------------------------------------------------------------
// Direction
// ---------------------------------------------------------------------------

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// +1.0 for long, -1.0 for short. Used in PnL and excursion math.
    pub fn sign(self) -> f64 {
        match self {
            Self::Long => 1.0,
            Self::Short => -1.0,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

// ---------------------------------------------------------------------------
// Timeframe
// ---------------------------------------------------------------------------

/// Chart timeframe for bar series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
}

impl Timeframe {
    pub fn seconds(self) -> i64 {
        match self {
            Self::M1 => 60,
            Self::M5 => 300,
            Self::M15 => 900,
            Self::M30 => 1800,
            Self::H1 => 3600,
            Self::H4 => 14_400,
            Self::D1 => 86_400,
        }
    }

    /// Parse the compact "M5" / "H1" form used in config files.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "M1" => Some(Self::M1),
            "M5" => Some(Self::M5),
            "M15" => Some(Self::M15),
            "M30" => Some(Self::M30),
            "H1" => Some(Self::H1),
            "H4" => Some(Self::H4),
            "D1" => Some(Self::D1),
            _ => None,
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::M1 => "M1",
            Self::M5 => "M5",
            Self::M15 => "M15",
            Self::M30 => "M30",
            Self::H1 => "H1",
            Self::H4 => "H4",
            Self::D1 => "D1",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Instrument reference data
// ---------------------------------------------------------------------------

/// Immutable instrument metadata from the adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Symbol {
    pub code: String,
    /// Smallest quoted price increment (point size).
    pub pip_size: f64,
    pub lot_min: f64,
    pub lot_step: f64,
    pub lot_max: f64,
    /// Units per 1.0 lot; a 1-price-unit move on one lot is worth
    /// `contract_size` in quote currency.
    #[serde(default = "default_contract_size")]
    pub contract_size: f64,
    pub quote_ccy: String,
    /// Crypto instruments trade 24/7 and use the crypto spread policy.
    #[serde(default)]
    pub is_crypto: bool,
}

fn default_contract_size() -> f64 {
    1.0
}

impl Symbol {
    /// Round a raw volume down to the instrument's lot step, clamped to
    /// `[lot_min, lot_max]`.
    pub fn round_volume(&self, volume: f64) -> f64 {
        if self.lot_step <= 0.0 {
            return volume.clamp(self.lot_min, self.lot_max);
        }
        let stepped = (volume / self.lot_step).floor() * self.lot_step;
        stepped.clamp(self.lot_min, self.lot_max)
    }
}

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

/// A single OHLCV bar for one symbol and timeframe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub tf: Timeframe,
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Latest quote for a symbol.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Tick {
    pub bid: f64,
    pub ask: f64,
    pub last: f64,
    pub time: DateTime<Utc>,
}

impl Tick {
    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }

    /// Absolute spread in price units.
    pub fn spread(&self) -> f64 {
        (self.ask - self.bid).max(0.0)
    }
}

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

/// Account state snapshot produced by the adapter each cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub balance: f64,
    pub equity: f64,
    pub margin_used: f64,
    pub margin_free: f64,
    /// Equity / margin_used * 100; `None` when no margin is in use.
    pub margin_level: Option<f64>,
    pub currency: String,
    pub trade_allowed: bool,
    pub server_time: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Positions
// ---------------------------------------------------------------------------

/// A live broker position. The adapter is the source of truth for every
/// field except `mae`/`mfe`, which the tracker maintains locally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Broker-assigned ticket.
    pub ticket: u64,
    pub symbol: String,
    pub side: Side,
    /// Remaining open volume in lots.
    pub volume: f64,
    pub entry_price: f64,
    pub current_price: f64,
    pub sl: Option<f64>,
    pub tp: Option<f64>,
    pub open_time: DateTime<Utc>,
    /// Engine client tag when the position was opened by us; external
    /// positions carry the foreign tag (or none).
    pub tag: Option<String>,
    /// Unrealized profit in account currency.
    pub pnl: f64,
    /// Maximum adverse excursion (price units, always >= 0).
    #[serde(default)]
    pub mae: f64,
    /// Maximum favourable excursion (price units, always >= 0).
    #[serde(default)]
    pub mfe: f64,
}

impl Position {
    /// Signed profit as a fraction of entry price (0.01 = +1 %).
    pub fn profit_frac(&self) -> f64 {
        if self.entry_price <= 0.0 {
            return 0.0;
        }
        self.side.sign() * (self.current_price - self.entry_price) / self.entry_price
    }

    /// Age of the position relative to `now`.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.open_time
    }
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

/// Why a strategy fired. Carried through provenance and the event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalRationale {
    CrossAbove,
    CrossBelow,
    BreakoutHigh,
    BreakoutLow,
    RangeFadeHigh,
    RangeFadeLow,
    TrendPullback,
    Oversold,
    Overbought,
}

impl std::fmt::Display for SignalRationale {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::CrossAbove => "cross_above",
            Self::CrossBelow => "cross_below",
            Self::BreakoutHigh => "breakout_high",
            Self::BreakoutLow => "breakout_low",
            Self::RangeFadeHigh => "range_fade_high",
            Self::RangeFadeLow => "range_fade_low",
            Self::TrendPullback => "trend_pullback",
            Self::Oversold => "oversold",
            Self::Overbought => "overbought",
        };
        write!(f, "{s}")
    }
}

/// A raw trade signal emitted by a strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    /// Unique id; doubles as the correlation id for the whole
    /// signal → order → fill event chain.
    pub id: String,
    pub symbol: String,
    pub side: Side,
    /// Strategy-calibrated confidence in [0, 1].
    pub confidence: f64,
    pub stop_hint: f64,
    pub target_hint: f64,
    pub strategy_id: String,
    pub origin_bar_time: DateTime<Utc>,
    pub rationale: SignalRationale,
}

/// A signal after the cognition overlay has run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnhancedSignal {
    pub signal: Signal,
    /// Post-enhancement confidence, clamped to [0, 1].
    pub confidence: f64,
    /// Advisory sizing multiplier in [0.5, 1.5].
    pub size_multiplier: f64,
    pub warnings: Vec<String>,
    /// True only when a declared critical event is active.
    pub blocked: bool,
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    Stop,
}

/// Provenance attached to every order so fills can be traced back to the
/// exact strategy, regime, and bar that produced them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderProvenance {
    pub strategy_id: String,
    pub regime: String,
    pub confidence: f64,
    pub origin_bar_time: DateTime<Utc>,
}

/// An order the execution engine sends to the adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub signal_id: String,
    pub symbol: String,
    pub side: Side,
    /// Volume in lots, already rounded to the instrument's lot step.
    pub volume: f64,
    pub sl: f64,
    pub tp: f64,
    pub order_type: OrderType,
    /// Idempotency key. Stable across retries of the same logical order.
    pub client_tag: String,
    pub provenance: OrderProvenance,
}

/// Outcome of an order submission as seen by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OrderOutcome {
    Filled { ticket: u64, fill_price: f64 },
    Rejected { code: String, message: String },
    Pending,
}

// ---------------------------------------------------------------------------
// Operational modes
// ---------------------------------------------------------------------------

/// Whether the engine is actively trading, paused, or in exit-only mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TradingMode {
    Live,
    #[default]
    Paused,
    /// Kill switch: entries suppressed, exits still dispatched.
    Killed,
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Live => write!(f, "Live"),
            Self::Paused => write!(f, "Paused"),
            Self::Killed => write!(f, "Killed"),
        }
    }
}

/// Whether we are running against the simulated broker or a real terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AccountMode {
    #[default]
    Sim,
    Live,
}

impl std::fmt::Display for AccountMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sim => write!(f, "Sim"),
            Self::Live => write!(f, "Live"),
        }
    }
}
