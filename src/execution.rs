// =============================================================================
// Execution Engine — at-most-once order submission with provenance
// =============================================================================
//
// Every admitted signal becomes exactly one order. The idempotency key
// (`client_tag`) is minted once per signal and persisted to the event log
// *before* the first submission; a transport retry reuses the same tag, and a
// duplicate-tag response from the adapter resolves to the originally
// recorded fill. The signal id is the correlation id for the whole
// `order_submitted → order_filled | order_rejected` chain.
// =============================================================================

use std::collections::HashMap;
use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use crate::adapter::{await_within_timeout, AdapterError, MarketAdapter};
use crate::events::{Event, EventKind, EventSink};
use crate::risk::Approved;
use crate::telemetry::Telemetry;
use crate::types::{EnhancedSignal, OrderOutcome, OrderProvenance, OrderRequest, OrderType};

pub struct ExecutionEngine {
    tag_prefix: String,
    /// signal id -> client tag, minted once and stable across retries.
    tags_by_signal: HashMap<String, String>,
    /// client tag -> recorded fill.
    fills_by_tag: HashMap<String, (u64, f64)>,
}

impl ExecutionEngine {
    pub fn new(tag_prefix: impl Into<String>) -> Self {
        Self {
            tag_prefix: tag_prefix.into(),
            tags_by_signal: HashMap::new(),
            fills_by_tag: HashMap::new(),
        }
    }

    /// The client tag for a signal, minted on first use.
    fn tag_for(&mut self, signal_id: &str) -> String {
        self.tags_by_signal
            .entry(signal_id.to_string())
            .or_insert_with(|| format!("{}-{}", self.tag_prefix, Uuid::new_v4()))
            .clone()
    }

    /// Submit an admitted signal. Transient adapter faults are retried with
    /// the same tag up to `max_retries`; a permanent fault or exhausted
    /// budget surfaces as the error for the loop to dispose of.
    #[allow(clippy::too_many_arguments)]
    pub async fn submit(
        &mut self,
        adapter: &dyn MarketAdapter,
        events: &dyn EventSink,
        telemetry: &Telemetry,
        cycle_id: u64,
        regime: &str,
        enhanced: &EnhancedSignal,
        approved: &Approved,
        op_timeout: Duration,
        max_retries: u32,
    ) -> Result<OrderOutcome, AdapterError> {
        let signal = &enhanced.signal;
        let client_tag = self.tag_for(&signal.id);

        // A fill already recorded for this tag means a retry of a completed
        // submission: resolve locally, no second order.
        if let Some(&(ticket, fill_price)) = self.fills_by_tag.get(&client_tag) {
            return Ok(OrderOutcome::Filled { ticket, fill_price });
        }

        let request = OrderRequest {
            signal_id: signal.id.clone(),
            symbol: signal.symbol.clone(),
            side: signal.side,
            volume: approved.volume,
            sl: signal.stop_hint,
            tp: signal.target_hint,
            order_type: OrderType::Market,
            client_tag: client_tag.clone(),
            provenance: OrderProvenance {
                strategy_id: signal.strategy_id.clone(),
                regime: regime.to_string(),
                confidence: enhanced.confidence,
                origin_bar_time: signal.origin_bar_time,
            },
        };

        let mut attempt = 0u32;
        loop {
            // Tag persisted before the wire is touched.
            events.append_event(&Event::new(
                cycle_id,
                EventKind::OrderSubmitted,
                &signal.id,
                &signal.symbol,
                serde_json::json!({
                    "client_tag": client_tag,
                    "side": signal.side.to_string(),
                    "volume": approved.volume,
                    "sl": signal.stop_hint,
                    "tp": signal.target_hint,
                    "strategy": signal.strategy_id,
                    "regime": regime,
                    "retry": attempt > 0,
                }),
            ));
            telemetry
                .orders_submitted_total
                .with_label_values(&[&signal.symbol])
                .inc();

            let started = std::time::Instant::now();
            let result = await_within_timeout(adapter.order_send(&request), op_timeout).await;
            telemetry
                .order_latency_seconds
                .observe(started.elapsed().as_secs_f64());

            match result {
                Ok(OrderOutcome::Filled { ticket, fill_price }) => {
                    self.fills_by_tag
                        .insert(client_tag.clone(), (ticket, fill_price));
                    events.append_event(&Event::new(
                        cycle_id,
                        EventKind::OrderFilled,
                        &signal.id,
                        &signal.symbol,
                        serde_json::json!({
                            "client_tag": client_tag,
                            "ticket": ticket,
                            "fill_price": fill_price,
                        }),
                    ));
                    telemetry
                        .orders_filled_total
                        .with_label_values(&[&signal.symbol])
                        .inc();
                    info!(
                        signal_id = %signal.id,
                        ticket,
                        fill_price,
                        volume = approved.volume,
                        "order filled"
                    );
                    return Ok(OrderOutcome::Filled { ticket, fill_price });
                }
                Ok(OrderOutcome::Rejected { code, message }) => {
                    events.append_event(&Event::new(
                        cycle_id,
                        EventKind::OrderRejected,
                        &signal.id,
                        &signal.symbol,
                        serde_json::json!({
                            "client_tag": client_tag,
                            "code": code,
                            "message": message,
                        }),
                    ));
                    telemetry
                        .orders_rejected_total
                        .with_label_values(&["broker"])
                        .inc();
                    warn!(signal_id = %signal.id, code = %code, message = %message, "order rejected");
                    return Ok(OrderOutcome::Rejected { code, message });
                }
                Ok(OrderOutcome::Pending) => {
                    // The gateway queued it; the fill arrives through
                    // reconciliation. Treated as terminal here.
                    return Ok(OrderOutcome::Pending);
                }
                Err(err) if err.is_transient() && attempt < max_retries => {
                    attempt += 1;
                    warn!(
                        signal_id = %signal.id,
                        attempt,
                        error = %err,
                        "transient submit failure — retrying with same tag"
                    );
                }
                Err(err) => {
                    events.append_event(&Event::new(
                        cycle_id,
                        EventKind::OrderRejected,
                        &signal.id,
                        &signal.symbol,
                        serde_json::json!({
                            "client_tag": client_tag,
                            "code": "adapter_error",
                            "message": err.to_string(),
                        }),
                    ));
                    telemetry
                        .orders_rejected_total
                        .with_label_values(&["adapter_error"])
                        .inc();
                    return Err(err);
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::sim::{SimAdapter, SimOp};
    use crate::events::MemoryEventLog;
    use crate::types::{Bar, Side, Signal, SignalRationale, Symbol, Timeframe};
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};

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

    fn seeded_sim() -> SimAdapter {
        let sim = SimAdapter::new(1_000.0);
        sim.add_symbol(eurusd());
        let t0 = Utc.with_ymd_and_hms(2025, 6, 2, 0, 0, 0).unwrap();
        let bars: Vec<Bar> = (0..5)
            .map(|i| Bar {
                symbol: "EURUSD".into(),
                tf: Timeframe::M5,
                open_time: t0 + ChronoDuration::minutes(5 * i),
                open: 1.10,
                high: 1.101,
                low: 1.099,
                close: 1.10,
                volume: 10.0,
            })
            .collect();
        sim.set_bars("EURUSD", Timeframe::M5, bars);
        sim
    }

    fn enhanced(id: &str) -> EnhancedSignal {
        EnhancedSignal {
            signal: Signal {
                id: id.into(),
                symbol: "EURUSD".into(),
                side: Side::Long,
                confidence: 0.79,
                stop_hint: 1.095,
                target_hint: 1.112,
                strategy_id: "ema_cross".into(),
                origin_bar_time: Utc::now(),
                rationale: SignalRationale::CrossAbove,
            },
            confidence: 0.79,
            size_multiplier: 1.0,
            warnings: vec![],
            blocked: false,
        }
    }

    fn approved() -> Approved {
        Approved {
            volume: 0.02,
            entry_price: 1.1001,
            risk_value: 10.0,
            dd_multiplier: 1.0,
            survival_active: false,
        }
    }

    #[tokio::test]
    async fn fill_emits_submitted_then_filled_chain() {
        let sim = seeded_sim();
        let events = MemoryEventLog::new(64);
        let telemetry = Telemetry::new().unwrap();
        let mut exec = ExecutionEngine::new("mrd");

        let outcome = exec
            .submit(
                &sim,
                &events,
                &telemetry,
                7,
                "trending_up_strong",
                &enhanced("sig-1"),
                &approved(),
                Duration::from_secs(5),
                2,
            )
            .await
            .unwrap();

        assert!(matches!(outcome, OrderOutcome::Filled { .. }));
        let chain = events.chain("sig-1");
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].kind, EventKind::OrderSubmitted);
        assert_eq!(chain[1].kind, EventKind::OrderFilled);
        // Same tag on both records.
        assert_eq!(chain[0].payload["client_tag"], chain[1].payload["client_tag"]);
    }

    #[tokio::test]
    async fn transient_fault_retries_with_same_tag_single_position() {
        let sim = seeded_sim();
        sim.inject_fault(SimOp::OrderSend, AdapterError::Timeout(10));
        let events = MemoryEventLog::new(64);
        let telemetry = Telemetry::new().unwrap();
        let mut exec = ExecutionEngine::new("mrd");

        let outcome = exec
            .submit(
                &sim,
                &events,
                &telemetry,
                1,
                "trending_up_strong",
                &enhanced("sig-2"),
                &approved(),
                Duration::from_secs(5),
                2,
            )
            .await
            .unwrap();

        assert!(matches!(outcome, OrderOutcome::Filled { .. }));
        assert_eq!(sim.open_position_count(), 1);

        let chain = events.chain("sig-2");
        let submitted: Vec<_> = chain
            .iter()
            .filter(|e| e.kind == EventKind::OrderSubmitted)
            .collect();
        assert_eq!(submitted.len(), 2);
        assert_eq!(submitted[0].payload["retry"], false);
        assert_eq!(submitted[1].payload["retry"], true);
        assert_eq!(
            submitted[0].payload["client_tag"],
            submitted[1].payload["client_tag"]
        );
    }

    #[tokio::test]
    async fn resubmitting_a_filled_signal_replays_the_fill() {
        let sim = seeded_sim();
        let events = MemoryEventLog::new(64);
        let telemetry = Telemetry::new().unwrap();
        let mut exec = ExecutionEngine::new("mrd");

        let first = exec
            .submit(
                &sim,
                &events,
                &telemetry,
                1,
                "trending_up_strong",
                &enhanced("sig-3"),
                &approved(),
                Duration::from_secs(5),
                2,
            )
            .await
            .unwrap();
        let second = exec
            .submit(
                &sim,
                &events,
                &telemetry,
                2,
                "trending_up_strong",
                &enhanced("sig-3"),
                &approved(),
                Duration::from_secs(5),
                2,
            )
            .await
            .unwrap();

        let (t1, t2) = match (first, second) {
            (
                OrderOutcome::Filled { ticket: t1, .. },
                OrderOutcome::Filled { ticket: t2, .. },
            ) => (t1, t2),
            other => panic!("expected two fills, got {other:?}"),
        };
        assert_eq!(t1, t2);
        assert_eq!(sim.open_position_count(), 1);
        // No second submitted event: the replay resolved locally.
        let submitted = events
            .chain("sig-3")
            .iter()
            .filter(|e| e.kind == EventKind::OrderSubmitted)
            .count();
        assert_eq!(submitted, 1);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_the_error() {
        let sim = seeded_sim();
        for _ in 0..3 {
            sim.inject_fault(SimOp::OrderSend, AdapterError::Connection("reset".into()));
        }
        let events = MemoryEventLog::new(64);
        let telemetry = Telemetry::new().unwrap();
        let mut exec = ExecutionEngine::new("mrd");

        let err = exec
            .submit(
                &sim,
                &events,
                &telemetry,
                1,
                "unknown",
                &enhanced("sig-4"),
                &approved(),
                Duration::from_secs(5),
                2,
            )
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(events.count_by_kind(EventKind::OrderRejected), 1);
        assert_eq!(sim.open_position_count(), 0);
    }

    #[tokio::test]
    async fn broker_rejection_is_an_outcome_not_an_error() {
        let sim = seeded_sim();
        let events = MemoryEventLog::new(64);
        let telemetry = Telemetry::new().unwrap();
        let mut exec = ExecutionEngine::new("mrd");

        let mut bad = approved();
        bad.volume = 0.0;
        let outcome = exec
            .submit(
                &sim,
                &events,
                &telemetry,
                1,
                "unknown",
                &enhanced("sig-5"),
                &bad,
                Duration::from_secs(5),
                2,
            )
            .await
            .unwrap();
        assert!(matches!(outcome, OrderOutcome::Rejected { .. }));
        assert_eq!(events.count_by_kind(EventKind::OrderRejected), 1);
    }
}
