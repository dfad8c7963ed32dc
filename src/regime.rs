// =============================================================================
// Market Regime Classifier
// =============================================================================
//
// Derives a single categorical regime per (symbol, timeframe, bar) from the
// indicator frame: ADX band, EMA slope, Bollinger band width, position in the
// band range, recent returns, and the volume ratio.
//
// Classification hierarchy (evaluated top-to-bottom; first match wins, which
// makes tie-breaking deterministic):
//
//   1. trending_{up,down}_strong — ADX >= 30 with a clear EMA slope
//   2. volatile_breakout         — band width blown out on spike volume
//   3. volatile_consolidation    — band width blown out, volume ordinary
//   4. trending_{up,down}_weak   — ADX in [20, 30) with a clear slope
//   5. ranging_tight             — compressed bands, no trend strength
//   6. ranging_wide              — no trend strength, ordinary bands
//   7. reversal                  — recent return snaps hard against the slope
//   8. unknown                   — nothing matched, or the feed had a gap
//
// A feed gap always classifies as `unknown`: a hole in the bar series makes
// every input above suspect.
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::indicators::{IndicatorFrame, IndicatorId};
use crate::types::Bar;

// =============================================================================
// Regime
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    TrendingUpStrong,
    TrendingUpWeak,
    TrendingDownStrong,
    TrendingDownWeak,
    RangingTight,
    RangingWide,
    VolatileBreakout,
    VolatileConsolidation,
    Reversal,
    Unknown,
}

impl Regime {
    pub fn is_trending(self) -> bool {
        matches!(
            self,
            Self::TrendingUpStrong
                | Self::TrendingUpWeak
                | Self::TrendingDownStrong
                | Self::TrendingDownWeak
        )
    }

    pub fn is_ranging(self) -> bool {
        matches!(self, Self::RangingTight | Self::RangingWide)
    }
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::TrendingUpStrong => "trending_up_strong",
            Self::TrendingUpWeak => "trending_up_weak",
            Self::TrendingDownStrong => "trending_down_strong",
            Self::TrendingDownWeak => "trending_down_weak",
            Self::RangingTight => "ranging_tight",
            Self::RangingWide => "ranging_wide",
            Self::VolatileBreakout => "volatile_breakout",
            Self::VolatileConsolidation => "volatile_consolidation",
            Self::Reversal => "reversal",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

// =============================================================================
// Classifier inputs
// =============================================================================

/// Raw inputs to one classification pass, extracted from the frame.
#[derive(Debug, Clone, Copy)]
pub struct RegimeInputs {
    pub adx: f64,
    /// Normalised EMA slope (per-bar fractional change of the EMA level).
    pub ema_slope: f64,
    /// Bollinger band width as a percentage of the middle band.
    pub bb_width: f64,
    /// Price position inside the bands: 0 at the lower band, 1 at the upper.
    pub range_position: f64,
    /// Return over the last bar as a fraction.
    pub recent_return: f64,
    /// Latest-bar volume over the trailing mean.
    pub volume_ratio: f64,
    pub feed_gap: bool,
}

// =============================================================================
// Thresholds
// =============================================================================

/// Band edges for the classification chain. Fixed constants rather than
/// config: the regime labels are a shared vocabulary between the selector and
/// the exit rules, and moving the edges silently re-labels history.
const ADX_STRONG: f64 = 30.0;
const ADX_WEAK: f64 = 20.0;
const SLOPE_MIN: f64 = 0.0004;
const BBW_VOLATILE: f64 = 5.0;
const BBW_TIGHT: f64 = 1.5;
const VOLUME_SPIKE: f64 = 1.5;
const REVERSAL_RETURN: f64 = 0.004;

// =============================================================================
// Classifier
// =============================================================================

/// Stateless classification plus a little memory for regime age, which feeds
/// telemetry only — the classification itself is a pure function of inputs.
pub struct RegimeClassifier {
    last: Option<(Regime, chrono::DateTime<chrono::Utc>)>,
}

impl RegimeClassifier {
    pub fn new() -> Self {
        Self { last: None }
    }

    /// Indicator requirements the classifier contributes to the cycle's
    /// requirement set.
    pub fn requirements(slow_ema: usize, bb_period: usize, bb_std: f64) -> Vec<IndicatorId> {
        vec![
            IndicatorId::Adx(14),
            IndicatorId::Ema(slow_ema),
            IndicatorId::bollinger(bb_period, bb_std),
            IndicatorId::VolumeRatio(20),
        ]
    }

    /// Build classification inputs from a frame and its bar window.
    pub fn inputs_from_frame(
        frame: &IndicatorFrame,
        bars: &[Bar],
        slow_ema: usize,
        bb_period: usize,
        bb_std: f64,
        feed_gap: bool,
    ) -> Option<RegimeInputs> {
        let adx = frame.scalar(IndicatorId::Adx(14))?;
        let (upper, _, lower, width) = frame.bands(IndicatorId::bollinger(bb_period, bb_std))?;
        let volume_ratio = frame.scalar(IndicatorId::VolumeRatio(20)).unwrap_or(1.0);

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let ema_slope = crate::indicators::ema::ema_slope(&closes, slow_ema, 5).unwrap_or(0.0);

        let last = bars.last()?;
        let prev = bars.get(bars.len().checked_sub(2)?)?;
        let recent_return = if prev.close != 0.0 {
            (last.close - prev.close) / prev.close
        } else {
            0.0
        };

        let span = upper - lower;
        let range_position = if span > 0.0 {
            ((last.close - lower) / span).clamp(-0.5, 1.5)
        } else {
            0.5
        };

        Some(RegimeInputs {
            adx,
            ema_slope,
            bb_width: width,
            range_position,
            recent_return,
            volume_ratio,
            feed_gap,
        })
    }

    /// Classify and remember the result for age tracking.
    pub fn classify(&mut self, inputs: &RegimeInputs) -> Regime {
        let regime = classify(inputs);

        let now = chrono::Utc::now();
        match self.last {
            Some((prev, _)) if prev == regime => {}
            _ => self.last = Some((regime, now)),
        }

        debug!(
            regime = %regime,
            adx = format!("{:.1}", inputs.adx),
            slope = format!("{:.5}", inputs.ema_slope),
            bbw = format!("{:.2}", inputs.bb_width),
            vol_ratio = format!("{:.2}", inputs.volume_ratio),
            "regime classified"
        );
        regime
    }

    /// Seconds the current regime has been active.
    pub fn regime_age_secs(&self) -> f64 {
        self.last
            .map(|(_, since)| (chrono::Utc::now() - since).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0)
    }

    pub fn current(&self) -> Option<Regime> {
        self.last.map(|(r, _)| r)
    }
}

impl Default for RegimeClassifier {
    fn default() -> Self {
        Self::new()
    }
}

/// The pure classification chain. Deterministic: identical inputs always
/// produce the identical regime.
pub fn classify(i: &RegimeInputs) -> Regime {
    if i.feed_gap {
        return Regime::Unknown;
    }
    if !i.adx.is_finite() || !i.bb_width.is_finite() {
        return Regime::Unknown;
    }

    // 1. Strong trend beats everything else.
    if i.adx >= ADX_STRONG && i.ema_slope.abs() >= SLOPE_MIN {
        return if i.ema_slope > 0.0 {
            Regime::TrendingUpStrong
        } else {
            Regime::TrendingDownStrong
        };
    }

    // 2/3. Volatility expansion.
    if i.bb_width >= BBW_VOLATILE {
        return if i.volume_ratio >= VOLUME_SPIKE {
            Regime::VolatileBreakout
        } else {
            Regime::VolatileConsolidation
        };
    }

    // 4. Weak trend.
    if i.adx >= ADX_WEAK && i.ema_slope.abs() >= SLOPE_MIN {
        return if i.ema_slope > 0.0 {
            Regime::TrendingUpWeak
        } else {
            Regime::TrendingDownWeak
        };
    }

    // 5/6. No trend strength: ranging.
    if i.adx < ADX_WEAK {
        return if i.bb_width <= BBW_TIGHT {
            Regime::RangingTight
        } else {
            Regime::RangingWide
        };
    }

    // 7. Residual trend strength but no slope worth calling a trend: the
    // last bar snapping hard against the EMA direction from a band extreme
    // reads as a reversal.
    let against_slope = i.recent_return * i.ema_slope < 0.0;
    let at_extreme = !(0.1..=0.9).contains(&i.range_position);
    if against_slope && at_extreme && i.recent_return.abs() >= REVERSAL_RETURN {
        return Regime::Reversal;
    }

    Regime::Unknown
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn base_inputs() -> RegimeInputs {
        RegimeInputs {
            adx: 15.0,
            ema_slope: 0.0,
            bb_width: 2.0,
            range_position: 0.5,
            recent_return: 0.0,
            volume_ratio: 1.0,
            feed_gap: false,
        }
    }

    #[test]
    fn strong_trend_up_and_down() {
        let mut i = base_inputs();
        i.adx = 35.0;
        i.ema_slope = 0.001;
        assert_eq!(classify(&i), Regime::TrendingUpStrong);
        i.ema_slope = -0.001;
        assert_eq!(classify(&i), Regime::TrendingDownStrong);
    }

    #[test]
    fn strong_trend_outranks_volatility() {
        let mut i = base_inputs();
        i.adx = 40.0;
        i.ema_slope = 0.002;
        i.bb_width = 8.0;
        i.volume_ratio = 3.0;
        assert_eq!(classify(&i), Regime::TrendingUpStrong);
    }

    #[test]
    fn volatile_split_on_volume() {
        let mut i = base_inputs();
        i.bb_width = 6.0;
        i.volume_ratio = 2.0;
        assert_eq!(classify(&i), Regime::VolatileBreakout);
        i.volume_ratio = 0.9;
        assert_eq!(classify(&i), Regime::VolatileConsolidation);
    }

    #[test]
    fn weak_trend_band() {
        let mut i = base_inputs();
        i.adx = 24.0;
        i.ema_slope = 0.001;
        assert_eq!(classify(&i), Regime::TrendingUpWeak);
        i.ema_slope = -0.001;
        assert_eq!(classify(&i), Regime::TrendingDownWeak);
    }

    #[test]
    fn ranging_split_on_band_width() {
        let mut i = base_inputs();
        i.adx = 12.0;
        i.bb_width = 1.0;
        assert_eq!(classify(&i), Regime::RangingTight);
        i.bb_width = 3.0;
        assert_eq!(classify(&i), Regime::RangingWide);
    }

    #[test]
    fn reversal_needs_extreme_and_snap() {
        let mut i = base_inputs();
        // Enough ADX to clear the ranging band, a drift too shallow to call
        // a weak trend, and a hard snap against it from a band extreme.
        i.adx = 22.0;
        i.ema_slope = 0.0002;
        i.recent_return = -0.006;
        i.range_position = 0.95;
        assert_eq!(classify(&i), Regime::Reversal);

        // Mid-band snap is not a reversal.
        i.range_position = 0.5;
        assert_eq!(classify(&i), Regime::Unknown);
    }

    #[test]
    fn ranging_outranks_reversal() {
        // The same snap on a weak-ADX tape is still chop: ranging sits above
        // reversal in the tie-break order.
        let mut i = base_inputs();
        i.adx = 15.0;
        i.ema_slope = 0.0006;
        i.recent_return = -0.006;
        i.range_position = 0.95;
        assert_eq!(classify(&i), Regime::RangingWide);
    }

    #[test]
    fn feed_gap_forces_unknown() {
        let mut i = base_inputs();
        i.adx = 40.0;
        i.ema_slope = 0.002;
        i.feed_gap = true;
        assert_eq!(classify(&i), Regime::Unknown);
    }

    #[test]
    fn nan_inputs_force_unknown() {
        let mut i = base_inputs();
        i.adx = f64::NAN;
        assert_eq!(classify(&i), Regime::Unknown);
    }

    #[test]
    fn classification_is_deterministic() {
        let mut i = base_inputs();
        i.adx = 27.0;
        i.ema_slope = 0.0007;
        let first = classify(&i);
        for _ in 0..100 {
            assert_eq!(classify(&i), first);
        }
    }

    #[test]
    fn classifier_tracks_age_metadata() {
        let mut c = RegimeClassifier::new();
        let mut i = base_inputs();
        i.adx = 35.0;
        i.ema_slope = 0.002;
        let r1 = c.classify(&i);
        let r2 = c.classify(&i);
        assert_eq!(r1, r2);
        assert_eq!(c.current(), Some(Regime::TrendingUpStrong));
        assert!(c.regime_age_secs() >= 0.0);
    }
}
