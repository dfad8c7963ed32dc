// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free implementations of the indicators used by the
// strategy set, the regime classifier, and the exit rules. Every public
// function returns `Option<T>` or an empty series so callers are forced to
// handle insufficient-data and numerical-edge-case scenarios.
//
// `frame` holds the requirement resolver: per cycle it computes each
// requested indicator exactly once and exposes the results as an
// `IndicatorFrame` keyed by `(symbol, timeframe, last bar open time)`.

pub mod adx;
pub mod atr;
pub mod bollinger;
pub mod ema;
pub mod frame;
pub mod macd;
pub mod rsi;
pub mod sma;
pub mod stochastic;
pub mod supertrend;
pub mod volume;
pub mod vwap;

pub use frame::{IndicatorError, IndicatorFrame, IndicatorId, IndicatorValue};
