// =============================================================================
// Telemetry — prometheus counters, gauges, and histograms
// =============================================================================
//
// All metrics use the `meridian_` prefix and are read-only from outside the
// loop. The engine emits once per cycle and once per state transition;
// dropping a sample is never a failure.
// =============================================================================

use prometheus::{
    core::{AtomicF64, GenericGauge},
    CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Telemetry {
    registry: Registry,

    /// Signals produced, labelled by originating strategy.
    pub signals_generated_total: CounterVec,
    pub orders_submitted_total: CounterVec,
    pub orders_filled_total: CounterVec,
    /// Rejections labelled by reason code.
    pub orders_rejected_total: CounterVec,

    pub cycle_duration_seconds: Histogram,
    pub order_latency_seconds: Histogram,
    pub signal_to_fill_seconds: Histogram,

    pub open_positions: GenericGauge<AtomicF64>,
    pub equity: GenericGauge<AtomicF64>,
    pub current_dd_pct: GenericGauge<AtomicF64>,
    /// Numeric phase id (micro=0 … recovery=5).
    pub account_phase: GenericGauge<AtomicF64>,
    /// Numeric drawdown state (normal=0 … critical=4).
    pub drawdown_state: GenericGauge<AtomicF64>,
}

impl Telemetry {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let signals_generated_total = CounterVec::new(
            Opts::new(
                "meridian_signals_generated_total",
                "Signals produced by strategy",
            ),
            &["strategy"],
        )?;
        registry.register(Box::new(signals_generated_total.clone()))?;

        let orders_submitted_total = CounterVec::new(
            Opts::new("meridian_orders_submitted_total", "Orders submitted"),
            &["symbol"],
        )?;
        registry.register(Box::new(orders_submitted_total.clone()))?;

        let orders_filled_total = CounterVec::new(
            Opts::new("meridian_orders_filled_total", "Orders filled"),
            &["symbol"],
        )?;
        registry.register(Box::new(orders_filled_total.clone()))?;

        let orders_rejected_total = CounterVec::new(
            Opts::new(
                "meridian_orders_rejected_total",
                "Orders rejected by reason",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(orders_rejected_total.clone()))?;

        let cycle_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "meridian_cycle_duration_seconds",
                "Wall time of one trading cycle",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        )?;
        registry.register(Box::new(cycle_duration_seconds.clone()))?;

        let order_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "meridian_order_latency_seconds",
                "Adapter round-trip for order submission",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        )?;
        registry.register(Box::new(order_latency_seconds.clone()))?;

        let signal_to_fill_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "meridian_signal_to_fill_seconds",
                "Latency from signal creation to fill",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        )?;
        registry.register(Box::new(signal_to_fill_seconds.clone()))?;

        let open_positions = Gauge::with_opts(Opts::new(
            "meridian_open_positions",
            "Open positions tracked",
        ))?;
        registry.register(Box::new(open_positions.clone()))?;

        let equity = Gauge::with_opts(Opts::new("meridian_equity", "Account equity"))?;
        registry.register(Box::new(equity.clone()))?;

        let current_dd_pct = Gauge::with_opts(Opts::new(
            "meridian_current_dd_pct",
            "Drawdown from peak equity (fraction)",
        ))?;
        registry.register(Box::new(current_dd_pct.clone()))?;

        let account_phase = Gauge::with_opts(Opts::new(
            "meridian_account_phase",
            "Account phase (micro=0, seed=1, growth=2, established=3, mature=4, recovery=5)",
        ))?;
        registry.register(Box::new(account_phase.clone()))?;

        let drawdown_state = Gauge::with_opts(Opts::new(
            "meridian_drawdown_state",
            "Drawdown state (normal=0 .. critical=4)",
        ))?;
        registry.register(Box::new(drawdown_state.clone()))?;

        Ok(Self {
            registry,
            signals_generated_total,
            orders_submitted_total,
            orders_filled_total,
            orders_rejected_total,
            cycle_duration_seconds,
            order_latency_seconds,
            signal_to_fill_seconds,
            open_positions,
            equity,
            current_dd_pct,
            account_phase,
            drawdown_state,
        })
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn gather(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if encoder.encode(&self.registry.gather(), &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
