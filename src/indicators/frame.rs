// =============================================================================
// Indicator Frame — requirement-resolving indicator computation
// =============================================================================
//
// Strategies, the regime classifier, and the exit rules all declare which
// indicators they need for a cycle. The resolver collects those requirements
// into a set — identical requests (two RSI-14 consumers, say) collapse into
// one computation — and produces a single `IndicatorFrame` keyed by
// `(symbol, timeframe, open time of the last bar)`.
//
// An indicator whose declared minimum history exceeds the available bars gets
// a NaN slot. Values are never fabricated; consumers skip NaN bars.
// =============================================================================

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::indicators::{adx, atr, bollinger, ema, macd, rsi, sma, stochastic, supertrend, volume, vwap};
use crate::types::{Bar, Timeframe};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum IndicatorError {
    #[error("insufficient history: need at least {needed} bars, have {have}")]
    InsufficientHistory { needed: usize, have: usize },

    #[error("unknown indicator: {0}")]
    UnknownIndicator(String),
}

// ---------------------------------------------------------------------------
// Indicator identifiers
// ---------------------------------------------------------------------------

/// An indicator request with its parameters. Fractional parameters are stored
/// in hundredths so the id stays hashable and exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndicatorId {
    Ema(usize),
    Sma(usize),
    Rsi(usize),
    Macd {
        fast: usize,
        slow: usize,
        signal: usize,
    },
    Bollinger {
        period: usize,
        std_x100: u32,
    },
    Stochastic {
        k: usize,
        d: usize,
    },
    Adx(usize),
    Atr(usize),
    Supertrend {
        period: usize,
        mult_x100: u32,
    },
    /// VWAP over the last `window` bars.
    Vwap(usize),
    /// Latest-bar volume over the mean of the preceding `lookback` bars.
    VolumeRatio(usize),
}

impl IndicatorId {
    pub fn bollinger(period: usize, num_std: f64) -> Self {
        Self::Bollinger {
            period,
            std_x100: (num_std * 100.0).round() as u32,
        }
    }

    pub fn supertrend(period: usize, multiplier: f64) -> Self {
        Self::Supertrend {
            period,
            mult_x100: (multiplier * 100.0).round() as u32,
        }
    }

    /// Minimum bar count the indicator needs to produce a value.
    pub fn min_history(&self) -> usize {
        match *self {
            Self::Ema(p) | Self::Sma(p) => p,
            Self::Rsi(p) => p + 1,
            Self::Macd { slow, signal, .. } => slow + signal,
            Self::Bollinger { period, .. } => period,
            Self::Stochastic { k, d } => k + d.saturating_sub(1),
            Self::Adx(p) => 2 * p + 1,
            Self::Atr(p) => p + 1,
            Self::Supertrend { period, .. } => period + 1,
            Self::Vwap(_) => 1,
            Self::VolumeRatio(l) => l + 1,
        }
    }

    /// Parse the compact string form used in config files and event payloads,
    /// e.g. `"rsi_14"`, `"macd_12_26_9"`, `"bb_20_200"` (std dev hundredths).
    pub fn parse(s: &str) -> Result<Self, IndicatorError> {
        let parts: Vec<&str> = s.split('_').collect();
        let unknown = || IndicatorError::UnknownIndicator(s.to_string());
        let num = |p: &str| p.parse::<usize>().map_err(|_| unknown());
        let num32 = |p: &str| p.parse::<u32>().map_err(|_| unknown());

        match parts.as_slice() {
            ["ema", p] => Ok(Self::Ema(num(p)?)),
            ["sma", p] => Ok(Self::Sma(num(p)?)),
            ["rsi", p] => Ok(Self::Rsi(num(p)?)),
            ["macd", f, sl, sg] => Ok(Self::Macd {
                fast: num(f)?,
                slow: num(sl)?,
                signal: num(sg)?,
            }),
            ["bb", p, k] => Ok(Self::Bollinger {
                period: num(p)?,
                std_x100: num32(k)?,
            }),
            ["stoch", k, d] => Ok(Self::Stochastic {
                k: num(k)?,
                d: num(d)?,
            }),
            ["adx", p] => Ok(Self::Adx(num(p)?)),
            ["atr", p] => Ok(Self::Atr(num(p)?)),
            ["st", p, m] => Ok(Self::Supertrend {
                period: num(p)?,
                mult_x100: num32(m)?,
            }),
            ["vwap", w] => Ok(Self::Vwap(num(w)?)),
            ["volr", l] => Ok(Self::VolumeRatio(num(l)?)),
            _ => Err(unknown()),
        }
    }
}

impl std::fmt::Display for IndicatorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::Ema(p) => write!(f, "ema_{p}"),
            Self::Sma(p) => write!(f, "sma_{p}"),
            Self::Rsi(p) => write!(f, "rsi_{p}"),
            Self::Macd { fast, slow, signal } => write!(f, "macd_{fast}_{slow}_{signal}"),
            Self::Bollinger { period, std_x100 } => write!(f, "bb_{period}_{std_x100}"),
            Self::Stochastic { k, d } => write!(f, "stoch_{k}_{d}"),
            Self::Adx(p) => write!(f, "adx_{p}"),
            Self::Atr(p) => write!(f, "atr_{p}"),
            Self::Supertrend { period, mult_x100 } => write!(f, "st_{period}_{mult_x100}"),
            Self::Vwap(w) => write!(f, "vwap_{w}"),
            Self::VolumeRatio(l) => write!(f, "volr_{l}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// A computed indicator slot. NaN fields mean insufficient history.
#[derive(Debug, Clone, Copy)]
pub enum IndicatorValue {
    Scalar(f64),
    Bands {
        upper: f64,
        middle: f64,
        lower: f64,
        width: f64,
    },
    Macd {
        macd: f64,
        signal: f64,
        histogram: f64,
    },
    Stoch {
        k: f64,
        d: f64,
    },
    Supertrend {
        line: f64,
        bullish: bool,
    },
}

impl IndicatorValue {
    /// NaN placeholder of the right shape for `id`.
    fn nan_for(id: &IndicatorId) -> Self {
        match id {
            IndicatorId::Macd { .. } => Self::Macd {
                macd: f64::NAN,
                signal: f64::NAN,
                histogram: f64::NAN,
            },
            IndicatorId::Bollinger { .. } => Self::Bands {
                upper: f64::NAN,
                middle: f64::NAN,
                lower: f64::NAN,
                width: f64::NAN,
            },
            IndicatorId::Stochastic { .. } => Self::Stoch {
                k: f64::NAN,
                d: f64::NAN,
            },
            IndicatorId::Supertrend { .. } => Self::Supertrend {
                line: f64::NAN,
                bullish: false,
            },
            _ => Self::Scalar(f64::NAN),
        }
    }

    /// True when this slot carries no usable value.
    pub fn is_nan(&self) -> bool {
        match *self {
            Self::Scalar(v) => v.is_nan(),
            Self::Bands { middle, .. } => middle.is_nan(),
            Self::Macd { macd, .. } => macd.is_nan(),
            Self::Stoch { k, .. } => k.is_nan(),
            Self::Supertrend { line, .. } => line.is_nan(),
        }
    }
}

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// All requested indicators for one `(symbol, timeframe, bar)` evaluation.
#[derive(Debug, Clone)]
pub struct IndicatorFrame {
    pub symbol: String,
    pub tf: Timeframe,
    /// Open time of the last bar the frame was computed on.
    pub bar_time: DateTime<Utc>,
    values: HashMap<IndicatorId, IndicatorValue>,
}

impl IndicatorFrame {
    /// Compute every indicator in `requested` over `bars` (oldest first).
    ///
    /// Identical ids share one pass by construction of the set. Per-indicator
    /// insufficient history yields a NaN slot; an entirely empty bar series
    /// is an `InsufficientHistory` failure because not even a frame key can
    /// be formed.
    pub fn compute(
        symbol: &str,
        tf: Timeframe,
        bars: &[Bar],
        requested: &HashSet<IndicatorId>,
    ) -> Result<Self, IndicatorError> {
        let last = bars
            .last()
            .ok_or(IndicatorError::InsufficientHistory { needed: 1, have: 0 })?;

        // Closes are shared by every close-based indicator; extract once.
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();

        let mut values = HashMap::with_capacity(requested.len());
        for id in requested {
            let value = if bars.len() < id.min_history() {
                IndicatorValue::nan_for(id)
            } else {
                Self::compute_one(id, bars, &closes)
            };
            values.insert(*id, value);
        }

        Ok(Self {
            symbol: symbol.to_string(),
            tf,
            bar_time: last.open_time,
            values,
        })
    }

    fn compute_one(id: &IndicatorId, bars: &[Bar], closes: &[f64]) -> IndicatorValue {
        match *id {
            IndicatorId::Ema(p) => {
                IndicatorValue::Scalar(ema::current_ema(closes, p).unwrap_or(f64::NAN))
            }
            IndicatorId::Sma(p) => {
                IndicatorValue::Scalar(sma::current_sma(closes, p).unwrap_or(f64::NAN))
            }
            IndicatorId::Rsi(p) => {
                IndicatorValue::Scalar(rsi::current_rsi(closes, p).unwrap_or(f64::NAN))
            }
            IndicatorId::Macd { fast, slow, signal } => {
                match macd::calculate_macd(closes, fast, slow, signal) {
                    Some(m) => IndicatorValue::Macd {
                        macd: m.macd,
                        signal: m.signal,
                        histogram: m.histogram,
                    },
                    None => IndicatorValue::nan_for(id),
                }
            }
            IndicatorId::Bollinger { period, std_x100 } => {
                match bollinger::calculate_bollinger(closes, period, std_x100 as f64 / 100.0) {
                    Some(bb) => IndicatorValue::Bands {
                        upper: bb.upper,
                        middle: bb.middle,
                        lower: bb.lower,
                        width: bb.width,
                    },
                    None => IndicatorValue::nan_for(id),
                }
            }
            IndicatorId::Stochastic { k, d } => {
                match stochastic::calculate_stochastic(bars, k, d) {
                    Some(s) => IndicatorValue::Stoch { k: s.k, d: s.d },
                    None => IndicatorValue::nan_for(id),
                }
            }
            IndicatorId::Adx(p) => IndicatorValue::Scalar(
                adx::calculate_adx(bars, p).map(|r| r.adx).unwrap_or(f64::NAN),
            ),
            IndicatorId::Atr(p) => {
                IndicatorValue::Scalar(atr::calculate_atr(bars, p).unwrap_or(f64::NAN))
            }
            IndicatorId::Supertrend { period, mult_x100 } => {
                match supertrend::calculate_supertrend(bars, period, mult_x100 as f64 / 100.0) {
                    Some(st) => IndicatorValue::Supertrend {
                        line: st.line,
                        bullish: st.bullish,
                    },
                    None => IndicatorValue::nan_for(id),
                }
            }
            IndicatorId::Vwap(window) => {
                let slice = if bars.len() > window {
                    &bars[bars.len() - window..]
                } else {
                    bars
                };
                IndicatorValue::Scalar(vwap::calculate_vwap(slice).unwrap_or(f64::NAN))
            }
            IndicatorId::VolumeRatio(lookback) => {
                IndicatorValue::Scalar(volume::volume_ratio(bars, lookback).unwrap_or(f64::NAN))
            }
        }
    }

    pub fn get(&self, id: IndicatorId) -> Option<&IndicatorValue> {
        self.values.get(&id)
    }

    /// Scalar slot access. Returns `None` for a missing id or a NaN slot, so
    /// strategies naturally skip bars without enough history.
    pub fn scalar(&self, id: IndicatorId) -> Option<f64> {
        match self.values.get(&id)? {
            IndicatorValue::Scalar(v) if v.is_finite() => Some(*v),
            _ => None,
        }
    }

    pub fn bands(&self, id: IndicatorId) -> Option<(f64, f64, f64, f64)> {
        match self.values.get(&id)? {
            IndicatorValue::Bands {
                upper,
                middle,
                lower,
                width,
            } if middle.is_finite() => Some((*upper, *middle, *lower, *width)),
            _ => None,
        }
    }

    pub fn macd(&self, id: IndicatorId) -> Option<(f64, f64, f64)> {
        match self.values.get(&id)? {
            IndicatorValue::Macd {
                macd,
                signal,
                histogram,
            } if macd.is_finite() => Some((*macd, *signal, *histogram)),
            _ => None,
        }
    }

    pub fn stoch(&self, id: IndicatorId) -> Option<(f64, f64)> {
        match self.values.get(&id)? {
            IndicatorValue::Stoch { k, d } if k.is_finite() => Some((*k, *d)),
            _ => None,
        }
    }

    pub fn supertrend(&self, id: IndicatorId) -> Option<(f64, bool)> {
        match self.values.get(&id)? {
            IndicatorValue::Supertrend { line, bullish } if line.is_finite() => {
                Some((*line, *bullish))
            }
            _ => None,
        }
    }

    /// Number of resolved slots (one per distinct requirement).
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
