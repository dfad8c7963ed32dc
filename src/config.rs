// =============================================================================
// Engine Configuration — validated at load, hot-reloadable, atomic save
// =============================================================================
//
// Central configuration hub for the Meridian trading engine. Every tunable
// parameter lives here so nothing is hardcoded in strategy or risk bodies.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry `#[serde(default)]` so that adding new fields never
// breaks loading an older config file. `validate()` runs after every load;
// an out-of-range value is fatal at startup and the engine refuses to boot.
// =============================================================================

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::risk::phase::AccountPhase;
use crate::types::{AccountMode, Timeframe, TradingMode};

// =============================================================================
// Per-phase limits
// =============================================================================

/// Risk and cadence limits for one account phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseConfig {
    pub max_lot: f64,
    /// Fraction of balance risked per trade (0.03 = 3 %).
    pub risk_pct: f64,
    /// Per-symbol concurrent position cap.
    pub max_positions: u32,
    pub max_positions_global: u32,
    pub preferred_tfs: Vec<Timeframe>,
    pub min_confidence: f64,
    pub min_rr: f64,
    pub max_trades_per_hour: u32,
    pub min_interval_seconds: i64,
    pub max_spread_points: f64,
    /// Relative spread cap as a fraction of mid (0.001 = 0.1 %).
    pub max_spread_pct: f64,
    /// Relative spread cap applied to crypto symbols instead.
    pub crypto_max_spread_pct: f64,
}

impl PhaseConfig {
    fn validate(&self, name: &str) -> Result<()> {
        if self.max_lot <= 0.0 {
            bail!("phases.{name}.max_lot must be > 0");
        }
        if !(0.0..=0.2).contains(&self.risk_pct) || self.risk_pct == 0.0 {
            bail!("phases.{name}.risk_pct must be in (0, 0.2]");
        }
        if self.max_positions == 0 || self.max_positions_global == 0 {
            bail!("phases.{name}.max_positions must be >= 1");
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            bail!("phases.{name}.min_confidence must be in [0, 1]");
        }
        if self.min_rr < 0.0 {
            bail!("phases.{name}.min_rr must be >= 0");
        }
        if self.max_spread_points <= 0.0
            || self.max_spread_pct <= 0.0
            || self.crypto_max_spread_pct <= 0.0
        {
            bail!("phases.{name} spread caps must be > 0");
        }
        if self.min_interval_seconds < 0 {
            bail!("phases.{name}.min_interval_seconds must be >= 0");
        }
        Ok(())
    }
}

/// One `PhaseConfig` per account phase. Defaults mirror the ladder the
/// adaptive account manager expects: tight caps for tiny balances, a fixed
/// ~1 % risk for mature accounts, defensive limits in recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseTable {
    #[serde(default = "PhaseTable::default_micro")]
    pub micro: PhaseConfig,
    #[serde(default = "PhaseTable::default_seed")]
    pub seed: PhaseConfig,
    #[serde(default = "PhaseTable::default_growth")]
    pub growth: PhaseConfig,
    #[serde(default = "PhaseTable::default_established")]
    pub established: PhaseConfig,
    #[serde(default = "PhaseTable::default_mature")]
    pub mature: PhaseConfig,
    #[serde(default = "PhaseTable::default_recovery")]
    pub recovery: PhaseConfig,
}

impl PhaseTable {
    pub fn get(&self, phase: AccountPhase) -> &PhaseConfig {
        match phase {
            AccountPhase::Micro => &self.micro,
            AccountPhase::Seed => &self.seed,
            AccountPhase::Growth => &self.growth,
            AccountPhase::Established => &self.established,
            AccountPhase::Mature => &self.mature,
            AccountPhase::Recovery => &self.recovery,
        }
    }

    fn default_micro() -> PhaseConfig {
        PhaseConfig {
            max_lot: 0.02,
            risk_pct: 0.05,
            max_positions: 1,
            max_positions_global: 1,
            preferred_tfs: vec![Timeframe::M1, Timeframe::M5],
            min_confidence: 0.55,
            min_rr: 1.5,
            max_trades_per_hour: 6,
            min_interval_seconds: 120,
            max_spread_points: 30.0,
            max_spread_pct: 0.0015,
            crypto_max_spread_pct: 0.003,
        }
    }

    fn default_seed() -> PhaseConfig {
        PhaseConfig {
            max_lot: 0.05,
            risk_pct: 0.04,
            max_positions: 2,
            max_positions_global: 2,
            preferred_tfs: vec![Timeframe::M5, Timeframe::M15],
            min_confidence: 0.58,
            min_rr: 1.8,
            max_trades_per_hour: 5,
            min_interval_seconds: 180,
            max_spread_points: 40.0,
            max_spread_pct: 0.0012,
            crypto_max_spread_pct: 0.0025,
        }
    }

    fn default_growth() -> PhaseConfig {
        PhaseConfig {
            max_lot: 0.10,
            risk_pct: 0.03,
            max_positions: 2,
            max_positions_global: 3,
            preferred_tfs: vec![Timeframe::M5, Timeframe::M15],
            min_confidence: 0.60,
            min_rr: 2.0,
            max_trades_per_hour: 4,
            min_interval_seconds: 300,
            max_spread_points: 50.0,
            max_spread_pct: 0.0010,
            crypto_max_spread_pct: 0.002,
        }
    }

    fn default_established() -> PhaseConfig {
        PhaseConfig {
            max_lot: 0.50,
            risk_pct: 0.02,
            max_positions: 3,
            max_positions_global: 5,
            preferred_tfs: vec![Timeframe::M15, Timeframe::M30],
            min_confidence: 0.62,
            min_rr: 2.0,
            max_trades_per_hour: 3,
            min_interval_seconds: 600,
            max_spread_points: 50.0,
            max_spread_pct: 0.0008,
            crypto_max_spread_pct: 0.0018,
        }
    }

    fn default_mature() -> PhaseConfig {
        PhaseConfig {
            max_lot: 2.00,
            risk_pct: 0.01,
            max_positions: 4,
            max_positions_global: 8,
            preferred_tfs: vec![Timeframe::M30, Timeframe::H1],
            min_confidence: 0.65,
            min_rr: 2.2,
            max_trades_per_hour: 2,
            min_interval_seconds: 900,
            max_spread_points: 50.0,
            max_spread_pct: 0.0006,
            crypto_max_spread_pct: 0.0015,
        }
    }

    fn default_recovery() -> PhaseConfig {
        PhaseConfig {
            max_lot: 0.02,
            risk_pct: 0.01,
            max_positions: 1,
            max_positions_global: 1,
            preferred_tfs: vec![Timeframe::M15, Timeframe::M30],
            min_confidence: 0.70,
            min_rr: 2.5,
            max_trades_per_hour: 2,
            min_interval_seconds: 900,
            max_spread_points: 25.0,
            max_spread_pct: 0.0008,
            crypto_max_spread_pct: 0.0015,
        }
    }
}

impl Default for PhaseTable {
    fn default() -> Self {
        Self {
            micro: Self::default_micro(),
            seed: Self::default_seed(),
            growth: Self::default_growth(),
            established: Self::default_established(),
            mature: Self::default_mature(),
            recovery: Self::default_recovery(),
        }
    }
}

// =============================================================================
// Account
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Optional forced phase; otherwise the adaptive manager computes it.
    #[serde(default)]
    pub initial_phase: Option<AccountPhase>,
}

// =============================================================================
// Selector
// =============================================================================

fn default_w_regime() -> f64 {
    0.5
}
fn default_w_perf() -> f64 {
    0.3
}
fn default_w_recent() -> f64 {
    0.2
}
fn default_max_fallbacks() -> usize {
    4
}
fn default_perf_window() -> usize {
    50
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorConfig {
    #[serde(default = "default_w_regime")]
    pub w_regime: f64,
    #[serde(default = "default_w_perf")]
    pub w_perf: f64,
    #[serde(default = "default_w_recent")]
    pub w_recent: f64,
    /// Fallback strategies tried when the primary emits nothing.
    #[serde(default = "default_max_fallbacks")]
    pub max_fallbacks: usize,
    /// Rolling per-strategy outcome window.
    #[serde(default = "default_perf_window")]
    pub perf_window: usize,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            w_regime: default_w_regime(),
            w_perf: default_w_perf(),
            w_recent: default_w_recent(),
            max_fallbacks: default_max_fallbacks(),
            perf_window: default_perf_window(),
        }
    }
}

// =============================================================================
// Cognition
// =============================================================================

fn default_confidence_floor() -> f64 {
    0.85
}
fn default_confidence_ceiling() -> f64 {
    0.25
}

/// A declared critical event. The overlay blocks signals whose evaluation
/// time falls within `window_minutes` either side of `at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriticalEventWindow {
    pub name: String,
    pub at: DateTime<Utc>,
    pub window_minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CognitionConfig {
    /// Lower bound of the confidence multiplier.
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f64,
    /// Upper bound of the multiplier is `1 + confidence_ceiling`.
    #[serde(default = "default_confidence_ceiling")]
    pub confidence_ceiling: f64,
    #[serde(default)]
    pub critical_events: Vec<CriticalEventWindow>,
}

impl Default for CognitionConfig {
    fn default() -> Self {
        Self {
            confidence_floor: default_confidence_floor(),
            confidence_ceiling: default_confidence_ceiling(),
            critical_events: Vec::new(),
        }
    }
}

// =============================================================================
// Risk
// =============================================================================

fn default_dd_caution() -> f64 {
    0.15
}
fn default_dd_warning() -> f64 {
    0.30
}
fn default_dd_danger() -> f64 {
    0.45
}
fn default_dd_critical() -> f64 {
    0.60
}
fn default_survival_threshold() -> f64 {
    0.50
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrawdownThresholds {
    #[serde(default = "default_dd_caution")]
    pub caution: f64,
    #[serde(default = "default_dd_warning")]
    pub warning: f64,
    #[serde(default = "default_dd_danger")]
    pub danger: f64,
    #[serde(default = "default_dd_critical")]
    pub critical: f64,
}

impl Default for DrawdownThresholds {
    fn default() -> Self {
        Self {
            caution: default_dd_caution(),
            warning: default_dd_warning(),
            danger: default_dd_danger(),
            critical: default_dd_critical(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(default)]
    pub drawdown_thresholds: DrawdownThresholds,
    /// Drawdown fraction at which survival mode activates.
    #[serde(default = "default_survival_threshold")]
    pub survival_threshold: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            drawdown_thresholds: DrawdownThresholds::default(),
            survival_threshold: default_survival_threshold(),
        }
    }
}

// =============================================================================
// Exit rules
// =============================================================================

fn default_max_age_hours() -> f64 {
    48.0
}
fn default_true() -> bool {
    true
}
fn default_trailing_activation_pct() -> f64 {
    0.8
}
fn default_trail_pct() -> f64 {
    0.4
}
fn default_hard_target_pct() -> f64 {
    3.0
}
fn default_breakeven_activation_pct() -> f64 {
    0.5
}
fn default_adverse_pct_per_min() -> f64 {
    0.5
}
fn default_micro_target_pct() -> f64 {
    1.0
}
fn default_reversal_min_confidence() -> f64 {
    0.70
}
fn default_liquidity_spread_pct() -> f64 {
    0.005
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeBasedExitConfig {
    #[serde(default = "default_max_age_hours")]
    pub max_age_hours: f64,
    /// Must be true: crypto trades 24/7, the weekend-protection close never
    /// applies to crypto symbols.
    #[serde(default = "default_true")]
    pub crypto_skip_weekend: bool,
}

impl Default for TimeBasedExitConfig {
    fn default() -> Self {
        Self {
            max_age_hours: default_max_age_hours(),
            crypto_skip_weekend: true,
        }
    }
}

fn default_conf_scale_out() -> f64 {
    0.55
}
fn default_conf_close() -> f64 {
    0.75
}
fn default_conf_emergency() -> f64 {
    0.90
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfluenceThresholds {
    #[serde(default = "default_conf_scale_out")]
    pub scale_out: f64,
    #[serde(default = "default_conf_close")]
    pub close: f64,
    #[serde(default = "default_conf_emergency")]
    pub emergency: f64,
}

impl Default for ConfluenceThresholds {
    fn default() -> Self {
        Self {
            scale_out: default_conf_scale_out(),
            close: default_conf_close(),
            emergency: default_conf_emergency(),
        }
    }
}

fn default_w_trend_flip() -> f64 {
    0.25
}
fn default_w_rsi_divergence() -> f64 {
    0.20
}
fn default_w_macd_cross() -> f64 {
    0.15
}
fn default_w_bollinger_touch() -> f64 {
    0.15
}
fn default_w_giveback() -> f64 {
    0.15
}
fn default_w_volume() -> f64 {
    0.10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfluenceWeights {
    #[serde(default = "default_w_trend_flip")]
    pub trend_flip: f64,
    #[serde(default = "default_w_rsi_divergence")]
    pub rsi_divergence: f64,
    #[serde(default = "default_w_macd_cross")]
    pub macd_cross: f64,
    #[serde(default = "default_w_bollinger_touch")]
    pub bollinger_touch: f64,
    #[serde(default = "default_w_giveback")]
    pub giveback: f64,
    #[serde(default = "default_w_volume")]
    pub volume: f64,
}

impl ConfluenceWeights {
    pub fn sum(&self) -> f64 {
        self.trend_flip
            + self.rsi_divergence
            + self.macd_cross
            + self.bollinger_touch
            + self.giveback
            + self.volume
    }
}

impl Default for ConfluenceWeights {
    fn default() -> Self {
        Self {
            trend_flip: default_w_trend_flip(),
            rsi_divergence: default_w_rsi_divergence(),
            macd_cross: default_w_macd_cross(),
            bollinger_touch: default_w_bollinger_touch(),
            giveback: default_w_giveback(),
            volume: default_w_volume(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfluenceConfig {
    #[serde(default)]
    pub thresholds: ConfluenceThresholds,
    #[serde(default)]
    pub weights: ConfluenceWeights,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitConfig {
    #[serde(default)]
    pub time_based: TimeBasedExitConfig,
    #[serde(default)]
    pub confluence: ConfluenceConfig,
    /// Profit (pct of entry) at which the trailing stop arms.
    #[serde(default = "default_trailing_activation_pct")]
    pub trailing_activation_pct: f64,
    /// Retrace (pct of entry) from the favourable extreme that closes.
    #[serde(default = "default_trail_pct")]
    pub trail_pct: f64,
    #[serde(default = "default_hard_target_pct")]
    pub hard_target_pct: f64,
    #[serde(default = "default_breakeven_activation_pct")]
    pub breakeven_activation_pct: f64,
    /// Adverse excursion rate (pct of entry per minute) that closes.
    #[serde(default = "default_adverse_pct_per_min")]
    pub adverse_pct_per_min: f64,
    /// Profit (pct of entry) banked immediately on accounts under 100.
    #[serde(default = "default_micro_target_pct")]
    pub micro_target_pct: f64,
    /// Opposite-side selector confidence that forces a close.
    #[serde(default = "default_reversal_min_confidence")]
    pub reversal_min_confidence: f64,
    /// Relative spread beyond which the liquidity exit closes positions.
    #[serde(default = "default_liquidity_spread_pct")]
    pub liquidity_spread_pct: f64,
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self {
            time_based: TimeBasedExitConfig::default(),
            confluence: ConfluenceConfig::default(),
            trailing_activation_pct: default_trailing_activation_pct(),
            trail_pct: default_trail_pct(),
            hard_target_pct: default_hard_target_pct(),
            breakeven_activation_pct: default_breakeven_activation_pct(),
            adverse_pct_per_min: default_adverse_pct_per_min(),
            micro_target_pct: default_micro_target_pct(),
            reversal_min_confidence: default_reversal_min_confidence(),
            liquidity_spread_pct: default_liquidity_spread_pct(),
        }
    }
}

// =============================================================================
// Profit scaling
// =============================================================================

fn default_micro_account_threshold() -> f64 {
    100.0
}
fn default_emergency_lock_pct() -> f64 {
    0.05
}

/// A single scale-out tier: at `trigger_pct` unrealized profit, close
/// `close_fraction` of the remaining volume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfitTier {
    pub trigger_pct: f64,
    pub close_fraction: f64,
}

fn default_tiers() -> Vec<ProfitTier> {
    vec![
        ProfitTier {
            trigger_pct: 1.0,
            close_fraction: 0.33,
        },
        ProfitTier {
            trigger_pct: 2.0,
            close_fraction: 0.50,
        },
        ProfitTier {
            trigger_pct: 3.5,
            close_fraction: 1.0,
        },
    ]
}

fn default_micro_tiers() -> Vec<ProfitTier> {
    vec![
        ProfitTier {
            trigger_pct: 0.5,
            close_fraction: 0.50,
        },
        ProfitTier {
            trigger_pct: 1.0,
            close_fraction: 1.0,
        },
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfitScalingConfig {
    /// Balances under this use the tighter micro tier ladder.
    #[serde(default = "default_micro_account_threshold")]
    pub micro_account_threshold: f64,
    /// Unrealized profit >= this fraction of balance closes everything.
    #[serde(default = "default_emergency_lock_pct")]
    pub emergency_lock_pct: f64,
    #[serde(default = "default_tiers")]
    pub tiers: Vec<ProfitTier>,
    #[serde(default = "default_micro_tiers")]
    pub micro_tiers: Vec<ProfitTier>,
}

impl Default for ProfitScalingConfig {
    fn default() -> Self {
        Self {
            micro_account_threshold: default_micro_account_threshold(),
            emergency_lock_pct: default_emergency_lock_pct(),
            tiers: default_tiers(),
            micro_tiers: default_micro_tiers(),
        }
    }
}

// =============================================================================
// Adoption
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AdoptionPolicy {
    AcceptAll,
    #[default]
    AcceptTaggedPrefix,
    RejectAll,
}

fn default_tag_prefix() -> String {
    "mrd".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdoptionConfig {
    #[serde(default)]
    pub policy: AdoptionPolicy,
    /// Prefix matched by `accept_tagged_prefix`.
    #[serde(default = "default_tag_prefix")]
    pub tag_prefix: String,
}

impl Default for AdoptionConfig {
    fn default() -> Self {
        Self {
            policy: AdoptionPolicy::default(),
            tag_prefix: default_tag_prefix(),
        }
    }
}

// =============================================================================
// Strategy parameters
// =============================================================================

fn default_ema_fast() -> usize {
    9
}
fn default_ema_slow() -> usize {
    21
}
fn default_sma_fast() -> usize {
    10
}
fn default_sma_slow() -> usize {
    50
}
fn default_breakout_lookback() -> usize {
    20
}
fn default_volume_spike_ratio() -> f64 {
    1.5
}
fn default_rsi_period() -> usize {
    14
}
fn default_rsi_oversold() -> f64 {
    30.0
}
fn default_rsi_overbought() -> f64 {
    70.0
}
fn default_trend_ema() -> usize {
    50
}
fn default_trend_adx_min() -> f64 {
    25.0
}
fn default_bb_period() -> usize {
    20
}
fn default_bb_std() -> f64 {
    2.0
}
fn default_stoch_k() -> usize {
    14
}
fn default_atr_period() -> usize {
    14
}
fn default_sl_atr_mult() -> f64 {
    1.5
}
fn default_tp_atr_mult() -> f64 {
    3.6
}

/// Tunable parameters shared by the strategy set. Representative defaults;
/// every value can be overridden per deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyParams {
    #[serde(default = "default_ema_fast")]
    pub ema_fast: usize,
    #[serde(default = "default_ema_slow")]
    pub ema_slow: usize,
    #[serde(default = "default_sma_fast")]
    pub sma_fast: usize,
    #[serde(default = "default_sma_slow")]
    pub sma_slow: usize,
    #[serde(default = "default_breakout_lookback")]
    pub breakout_lookback: usize,
    #[serde(default = "default_volume_spike_ratio")]
    pub volume_spike_ratio: f64,
    #[serde(default = "default_rsi_period")]
    pub rsi_period: usize,
    #[serde(default = "default_rsi_oversold")]
    pub rsi_oversold: f64,
    #[serde(default = "default_rsi_overbought")]
    pub rsi_overbought: f64,
    #[serde(default = "default_trend_ema")]
    pub trend_ema: usize,
    #[serde(default = "default_trend_adx_min")]
    pub trend_adx_min: f64,
    #[serde(default = "default_bb_period")]
    pub bb_period: usize,
    #[serde(default = "default_bb_std")]
    pub bb_std: f64,
    #[serde(default = "default_stoch_k")]
    pub stoch_k: usize,
    #[serde(default = "default_atr_period")]
    pub atr_period: usize,
    /// Stop hint distance in ATR multiples.
    #[serde(default = "default_sl_atr_mult")]
    pub sl_atr_mult: f64,
    /// Target hint distance in ATR multiples.
    #[serde(default = "default_tp_atr_mult")]
    pub tp_atr_mult: f64,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            ema_fast: default_ema_fast(),
            ema_slow: default_ema_slow(),
            sma_fast: default_sma_fast(),
            sma_slow: default_sma_slow(),
            breakout_lookback: default_breakout_lookback(),
            volume_spike_ratio: default_volume_spike_ratio(),
            rsi_period: default_rsi_period(),
            rsi_oversold: default_rsi_oversold(),
            rsi_overbought: default_rsi_overbought(),
            trend_ema: default_trend_ema(),
            trend_adx_min: default_trend_adx_min(),
            bb_period: default_bb_period(),
            bb_std: default_bb_std(),
            stoch_k: default_stoch_k(),
            atr_period: default_atr_period(),
            sl_atr_mult: default_sl_atr_mult(),
            tp_atr_mult: default_tp_atr_mult(),
        }
    }
}

// =============================================================================
// Loop
// =============================================================================

fn default_poll_intervals() -> BTreeMap<String, u64> {
    BTreeMap::from([
        ("micro".to_string(), 10),
        ("seed".to_string(), 15),
        ("growth".to_string(), 20),
        ("established".to_string(), 30),
        ("mature".to_string(), 60),
        ("recovery".to_string(), 20),
    ])
}
fn default_op_timeout_seconds() -> u64 {
    5
}
fn default_max_retries() -> u32 {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Cycle cadence per phase, seconds. Must lie in [10, 60].
    #[serde(default = "default_poll_intervals")]
    pub poll_interval_seconds_by_phase: BTreeMap<String, u64>,
    /// Per adapter operation timeout.
    #[serde(default = "default_op_timeout_seconds")]
    pub op_timeout_seconds: u64,
    /// Retries per adapter operation within the cycle budget.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl LoopConfig {
    pub fn poll_interval_for(&self, phase: AccountPhase) -> u64 {
        let key = match phase {
            AccountPhase::Micro => "micro",
            AccountPhase::Seed => "seed",
            AccountPhase::Growth => "growth",
            AccountPhase::Established => "established",
            AccountPhase::Mature => "mature",
            AccountPhase::Recovery => "recovery",
        };
        self.poll_interval_seconds_by_phase
            .get(key)
            .copied()
            .unwrap_or(30)
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds_by_phase: default_poll_intervals(),
            op_timeout_seconds: default_op_timeout_seconds(),
            max_retries: default_max_retries(),
        }
    }
}

// =============================================================================
// EngineConfig
// =============================================================================

fn default_symbols() -> Vec<String> {
    vec!["EURUSD".to_string(), "GBPUSD".to_string(), "BTCUSD".to_string()]
}

/// Top-level configuration for the Meridian engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub trading_mode: TradingMode,
    #[serde(default)]
    pub account_mode: AccountMode,
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    #[serde(default)]
    pub account: AccountConfig,
    #[serde(default)]
    pub phases: PhaseTable,
    #[serde(default)]
    pub selector: SelectorConfig,
    #[serde(default)]
    pub cognition: CognitionConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub exit: ExitConfig,
    #[serde(default)]
    pub profit_scaling: ProfitScalingConfig,
    #[serde(default)]
    pub adoption: AdoptionConfig,
    #[serde(default)]
    pub strategy_params: StrategyParams,
    #[serde(default, rename = "loop")]
    pub loop_cfg: LoopConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            trading_mode: TradingMode::Paused,
            account_mode: AccountMode::Sim,
            symbols: default_symbols(),
            account: AccountConfig::default(),
            phases: PhaseTable::default(),
            selector: SelectorConfig::default(),
            cognition: CognitionConfig::default(),
            risk: RiskConfig::default(),
            exit: ExitConfig::default(),
            profit_scaling: ProfitScalingConfig::default(),
            adoption: AdoptionConfig::default(),
            strategy_params: StrategyParams::default(),
            loop_cfg: LoopConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file and validate it. Any out-of-range
    /// value is fatal: the engine refuses to start on an invalid config.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse engine config from {}", path.display()))?;

        config.validate()?;

        info!(
            path = %path.display(),
            symbols = ?config.symbols,
            trading_mode = %config.trading_mode,
            "engine config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration using an atomic write (tmp + rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise engine config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "engine config saved (atomic)");
        Ok(())
    }

    /// Reject any configuration a healthy deployment could not run with.
    pub fn validate(&self) -> Result<()> {
        if self.symbols.is_empty() {
            bail!("symbols must not be empty");
        }
        if self.symbols.iter().any(|s| s == crate::types::UNKNOWN_SYMBOL) {
            bail!("symbols may not contain the UNKNOWN sentinel");
        }

        for (name, cfg) in [
            ("micro", &self.phases.micro),
            ("seed", &self.phases.seed),
            ("growth", &self.phases.growth),
            ("established", &self.phases.established),
            ("mature", &self.phases.mature),
            ("recovery", &self.phases.recovery),
        ] {
            cfg.validate(name)?;
        }

        let sel = &self.selector;
        if sel.w_regime < 0.0 || sel.w_perf < 0.0 || sel.w_recent < 0.0 {
            bail!("selector weights must be >= 0");
        }
        if sel.w_regime + sel.w_perf + sel.w_recent <= 0.0 {
            bail!("selector weights must not all be zero");
        }
        if sel.perf_window == 0 {
            bail!("selector.perf_window must be >= 1");
        }

        let cog = &self.cognition;
        if !(0.0..=1.0).contains(&cog.confidence_floor) {
            bail!("cognition.confidence_floor must be in [0, 1]");
        }
        if !(0.0..=1.0).contains(&cog.confidence_ceiling) {
            bail!("cognition.confidence_ceiling must be in [0, 1]");
        }
        for ev in &cog.critical_events {
            if ev.window_minutes <= 0 {
                bail!("cognition critical event '{}' has non-positive window", ev.name);
            }
        }

        let dd = &self.risk.drawdown_thresholds;
        let ladder = [dd.caution, dd.warning, dd.danger, dd.critical];
        if ladder.iter().any(|v| !(0.0..=1.0).contains(v)) {
            bail!("risk.drawdown_thresholds must be in [0, 1]");
        }
        if !(dd.caution < dd.warning && dd.warning < dd.danger && dd.danger < dd.critical) {
            bail!("risk.drawdown_thresholds must be strictly increasing");
        }
        if !(0.0..=1.0).contains(&self.risk.survival_threshold) || self.risk.survival_threshold == 0.0 {
            bail!("risk.survival_threshold must be in (0, 1]");
        }

        let ex = &self.exit;
        if !ex.time_based.crypto_skip_weekend {
            bail!("exit.time_based.crypto_skip_weekend must be true (crypto trades 24/7)");
        }
        if ex.time_based.max_age_hours <= 0.0 {
            bail!("exit.time_based.max_age_hours must be > 0");
        }
        let th = &ex.confluence.thresholds;
        if !(th.scale_out < th.close && th.close < th.emergency) {
            bail!("exit.confluence.thresholds must be strictly increasing");
        }
        if th.scale_out <= 0.0 || th.emergency > 1.0 {
            bail!("exit.confluence.thresholds must lie in (0, 1]");
        }
        let wsum = ex.confluence.weights.sum();
        if (wsum - 1.0).abs() > 0.01 {
            bail!("exit.confluence.weights must sum to 1.0 (got {wsum:.3})");
        }

        let ps = &self.profit_scaling;
        if ps.emergency_lock_pct <= 0.0 || ps.emergency_lock_pct > 1.0 {
            bail!("profit_scaling.emergency_lock_pct must be in (0, 1]");
        }
        for (label, tiers) in [("tiers", &ps.tiers), ("micro_tiers", &ps.micro_tiers)] {
            if tiers.is_empty() {
                bail!("profit_scaling.{label} must not be empty");
            }
            let mut prev = 0.0;
            for t in tiers.iter() {
                if t.trigger_pct <= prev {
                    bail!("profit_scaling.{label} trigger_pct must be strictly increasing");
                }
                if !(0.0..=1.0).contains(&t.close_fraction) || t.close_fraction == 0.0 {
                    bail!("profit_scaling.{label} close_fraction must be in (0, 1]");
                }
                prev = t.trigger_pct;
            }
        }

        for (phase, secs) in &self.loop_cfg.poll_interval_seconds_by_phase {
            if !(10..=60).contains(secs) {
                bail!("loop.poll_interval_seconds_by_phase.{phase} must be in [10, 60]");
            }
        }
        if self.loop_cfg.op_timeout_seconds == 0 {
            bail!("loop.op_timeout_seconds must be >= 1");
        }

        Ok(())
    }
}
