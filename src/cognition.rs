// =============================================================================
// Cognition Overlay — advisory confidence shaping
// =============================================================================
//
// Online scorers only: the overlay inspects a signal against the current
// regime and emits a bounded confidence multiplier, an advisory sizing
// multiplier, and warnings. By policy it cannot veto a signal — the single
// exception is a declared critical event (a configured macro-event window),
// which sets `blocked = true` and nothing else does.
//
// Bounds: multiplier ∈ [confidence_floor, 1 + confidence_ceiling]
// (defaults [0.85, 1.25]); size multiplier ∈ [0.5, 1.5]. Enhancement is
// deterministic and non-compounding: enhancing the same signal twice under
// unchanged inputs yields the identical result.
// =============================================================================

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::config::CognitionConfig;
use crate::regime::Regime;
use crate::types::{EnhancedSignal, Signal, SignalRationale};

pub struct CognitionOverlay {
    cfg: CognitionConfig,
}

impl CognitionOverlay {
    pub fn new(cfg: CognitionConfig) -> Self {
        Self { cfg }
    }

    /// Name of the critical event active at `now`, if any.
    pub fn active_critical_event(&self, now: DateTime<Utc>) -> Option<&str> {
        self.cfg.critical_events.iter().find_map(|ev| {
            let half = Duration::minutes(ev.window_minutes);
            (now >= ev.at - half && now <= ev.at + half).then_some(ev.name.as_str())
        })
    }

    /// Enhance a signal. Pure in its arguments; the overlay holds no mutable
    /// state.
    pub fn enhance(&self, signal: &Signal, regime: Regime, now: DateTime<Utc>) -> EnhancedSignal {
        let mut warnings = Vec::new();
        let mut delta = 0.0;

        // Regime agreement: a trend-built signal in a trending tape earns a
        // boost; a counter-regime signal bleeds confidence.
        let alignment = regime_alignment(signal.rationale, regime);
        delta += alignment;
        if alignment < 0.0 {
            warnings.push(format!(
                "rationale {} runs against regime {}",
                signal.rationale, regime
            ));
        }

        // Thin raw confidence is advisory-dampened rather than rejected.
        if signal.confidence < 0.45 {
            delta -= 0.05;
            warnings.push(format!(
                "raw confidence {:.2} below advisory floor",
                signal.confidence
            ));
        }

        // Unknown regime: no context to endorse the trade.
        if regime == Regime::Unknown {
            delta -= 0.05;
            warnings.push("regime unknown — no contextual endorsement".to_string());
        }

        let floor = self.cfg.confidence_floor;
        let ceiling = 1.0 + self.cfg.confidence_ceiling;
        let multiplier = (1.0 + delta).clamp(floor, ceiling);

        let confidence = (signal.confidence * multiplier).clamp(0.0, 1.0);
        let size_multiplier = (1.0 + 2.0 * (multiplier - 1.0)).clamp(0.5, 1.5);

        let blocked = match self.active_critical_event(now) {
            Some(name) => {
                warnings.push(format!("critical event active: {name}"));
                true
            }
            None => false,
        };

        debug!(
            signal_id = %signal.id,
            raw = format!("{:.3}", signal.confidence),
            multiplier = format!("{:.3}", multiplier),
            enhanced = format!("{:.3}", confidence),
            blocked,
            "cognition enhancement"
        );

        EnhancedSignal {
            signal: signal.clone(),
            confidence,
            size_multiplier,
            warnings,
            blocked,
        }
    }
}

/// How well a signal's trigger geometry fits the tape it fired in.
fn regime_alignment(rationale: SignalRationale, regime: Regime) -> f64 {
    use Regime::*;
    use SignalRationale::*;
    match (rationale, regime) {
        // Trend triggers in a trending tape.
        (CrossAbove | CrossBelow | TrendPullback, TrendingUpStrong | TrendingDownStrong) => 0.10,
        (CrossAbove | CrossBelow | TrendPullback, TrendingUpWeak | TrendingDownWeak) => 0.05,
        // Breakouts want expansion.
        (BreakoutHigh | BreakoutLow, VolatileBreakout) => 0.12,
        (BreakoutHigh | BreakoutLow, TrendingUpStrong | TrendingDownStrong) => 0.08,
        // Fades want chop or exhaustion.
        (RangeFadeHigh | RangeFadeLow, RangingTight | RangingWide) => 0.10,
        (Oversold | Overbought, Reversal) => 0.12,
        (Oversold | Overbought, RangingWide) => 0.05,
        // Counter-regime combinations bleed.
        (RangeFadeHigh | RangeFadeLow, TrendingUpStrong | TrendingDownStrong) => -0.10,
        (Oversold | Overbought, TrendingUpStrong | TrendingDownStrong) => -0.08,
        (CrossAbove | CrossBelow | TrendPullback, RangingTight) => -0.08,
        (BreakoutHigh | BreakoutLow, RangingWide) => -0.05,
        _ => 0.0,
    }
}
