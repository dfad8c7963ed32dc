// =============================================================================
// Meridian Trading Engine — Main Entry Point
// =============================================================================
//
// The engine starts in Sim + Paused mode for safety. An operator must
// explicitly resume trading through the ops API, and flipping to the live
// bridge adapter is a config decision, never a default.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod adapter;
mod api;
mod app_state;
mod cognition;
mod config;
mod engine;
mod events;
mod execution;
mod exit;
mod indicators;
mod lifecycle;
mod market_data;
mod regime;
mod risk;
mod selector;
mod strategies;
mod telemetry;
mod tracker;
mod types;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{Duration as ChronoDuration, Utc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::adapter::{bridge::BridgeAdapter, sim::SimAdapter, MarketAdapter};
use crate::app_state::AppState;
use crate::config::EngineConfig;
use crate::engine::TradingEngine;
use crate::events::{recover_from_log, EventSink, FanoutSink, JsonlEventStore, MemoryEventLog};
use crate::telemetry::Telemetry;
use crate::types::{AccountMode, Bar, Symbol, Timeframe, TradingMode};

const CONFIG_PATH: &str = "meridian.json";
const EVENT_LOG_PATH: &str = "meridian-events.jsonl";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Meridian Trading Engine — Starting Up            ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    // A present-but-invalid config is fatal; a missing one falls back to
    // defaults with a warning.
    let mut config = if Path::new(CONFIG_PATH).exists() {
        EngineConfig::load(CONFIG_PATH).context("refusing to start on invalid configuration")?
    } else {
        warn!(path = CONFIG_PATH, "no config file — using defaults");
        EngineConfig::default()
    };

    // SAFETY: always boot paused, whatever the file says.
    config.trading_mode = TradingMode::Paused;

    // Symbol override from the environment.
    if let Ok(syms) = std::env::var("MERIDIAN_SYMBOLS") {
        let parsed: Vec<String> = syms
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        if !parsed.is_empty() {
            config.symbols = parsed;
        }
    }
    config.validate().context("refusing to start on invalid configuration")?;

    info!(symbols = ?config.symbols, "configured instruments");
    info!(
        trading_mode = %config.trading_mode,
        account_mode = %config.account_mode,
        "engine starting in SAFE mode (Sim + Paused)"
    );

    // ── 2. Telemetry, event log, startup recovery ────────────────────────
    let telemetry = Telemetry::new().context("telemetry registry")?;
    let memory_log = Arc::new(MemoryEventLog::new(1024));
    let jsonl = Arc::new(
        JsonlEventStore::open(EVENT_LOG_PATH).context("opening event log for append")?,
    );
    let fanout_sinks: Vec<Arc<dyn EventSink>> = vec![memory_log.clone(), jsonl.clone()];
    let sink: Arc<dyn EventSink> = Arc::new(FanoutSink::new(fanout_sinks));

    let recovered = recover_from_log(Path::new(EVENT_LOG_PATH));
    if recovered.peak_equity.is_some() || recovered.last_phase.is_some() {
        info!(
            peak_equity = ?recovered.peak_equity,
            last_phase = ?recovered.last_phase,
            last_cycle = recovered.last_cycle_id,
            "state recovered from event log"
        );
    }

    // ── 3. Adapter ───────────────────────────────────────────────────────
    let account_mode = config.account_mode;
    let symbols = config.symbols.clone();
    let adapter: Arc<dyn MarketAdapter> = match account_mode {
        AccountMode::Sim => Arc::new(seeded_sim(&symbols)),
        AccountMode::Live => {
            let base_url = std::env::var("MERIDIAN_BRIDGE_URL")
                .context("MERIDIAN_BRIDGE_URL required for live mode")?;
            let api_key = std::env::var("MERIDIAN_API_KEY").unwrap_or_default();
            let api_secret = std::env::var("MERIDIAN_API_SECRET").unwrap_or_default();
            let timeout = Duration::from_secs(config.loop_cfg.op_timeout_seconds);
            Arc::new(BridgeAdapter::new(base_url, api_key, api_secret, timeout))
        }
    };

    // ── 4. Shared state + ops API ────────────────────────────────────────
    let app = Arc::new(AppState::new(config, telemetry, memory_log));

    let api_state = app.clone();
    let bind_addr =
        std::env::var("MERIDIAN_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:4100".into());
    tokio::spawn(async move {
        let router = api::rest::router(api_state);
        match tokio::net::TcpListener::bind(&bind_addr).await {
            Ok(listener) => {
                info!(addr = %bind_addr, "ops API listening");
                if let Err(e) = axum::serve(listener, router).await {
                    error!(error = %e, "ops API server failed");
                }
            }
            Err(e) => error!(addr = %bind_addr, error = %e, "ops API bind failed"),
        }
    });

    // ── 5. Trading loop ──────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let engine = TradingEngine::new(adapter, app.clone(), sink, recovered);
    let loop_handle = tokio::spawn(engine.run(shutdown_rx));

    info!("all subsystems running — press Ctrl+C to stop");

    // ── 6. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received — stopping gracefully");
    let _ = shutdown_tx.send(true);
    let _ = loop_handle.await;

    if let Err(e) = app.config.read().save(CONFIG_PATH) {
        error!(error = %e, "failed to save config on shutdown");
    }

    info!("Meridian shut down complete");
    Ok(())
}

/// Demo-mode broker: configured symbols with sensible reference data and a
/// deterministic seed tape, so a fresh checkout cycles end-to-end without
/// credentials.
fn seeded_sim(symbols: &[String]) -> SimAdapter {
    let balance = std::env::var("MERIDIAN_SIM_BALANCE")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(1_000.0);
    let sim = SimAdapter::new(balance);

    for code in symbols {
        let is_crypto = code.contains("BTC") || code.contains("ETH");
        let (base_price, pip_size, contract_size) = if is_crypto {
            (40_000.0, 1.0, 1.0)
        } else {
            (1.1000, 0.0001, 100_000.0)
        };
        sim.add_symbol(Symbol {
            code: code.clone(),
            pip_size,
            lot_min: 0.01,
            lot_step: 0.01,
            lot_max: 100.0,
            contract_size,
            quote_ccy: "USD".into(),
            is_crypto,
        });
        sim.set_spread(code, pip_size * 6.0);

        // Deterministic sine-drift tape, enough history for every indicator.
        let start = Utc::now() - ChronoDuration::minutes(5 * 300);
        let bars: Vec<Bar> = (0..300)
            .map(|i| {
                let wave = (i as f64 * 0.21).sin() * base_price * 0.004;
                let drift = i as f64 * base_price * 0.00002;
                let close = base_price + wave + drift;
                let open = if i == 0 {
                    close
                } else {
                    base_price
                        + ((i - 1) as f64 * 0.21).sin() * base_price * 0.004
                        + (i - 1) as f64 * base_price * 0.00002
                };
                Bar {
                    symbol: code.clone(),
                    tf: Timeframe::M5,
                    open_time: start + ChronoDuration::minutes(5 * i as i64),
                    open,
                    high: close.max(open) + base_price * 0.0005,
                    low: close.min(open) - base_price * 0.0005,
                    close,
                    volume: 100.0 + (i as f64 * 0.63).sin().abs() * 40.0,
                }
            })
            .collect();
        sim.set_bars(code, Timeframe::M5, bars);
    }

    sim
}
