// =============================================================================
// Ops API — read-only state plus operator controls
// =============================================================================
//
// All endpoints live under `/api/v1/`, plus the Prometheus scrape target at
// `/metrics`. Readers only ever see the immutable end-of-cycle snapshot; the
// control endpoints flip the trading mode through the shared config cell.
//
// CORS is configured permissively for development; tighten allowed origins
// in production.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use crate::app_state::AppState;
use crate::types::TradingMode;

/// Build the full router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/state", get(full_state))
        .route("/api/v1/positions", get(positions))
        .route("/api/v1/events", get(events))
        .route("/api/v1/control/pause", post(control_pause))
        .route("/api/v1/control/resume", post(control_resume))
        .route("/api/v1/control/kill", post(control_kill))
        .route("/metrics", get(metrics))
        .layer(cors)
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    state_version: u64,
    uptime_seconds: u64,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        state_version: state.current_state_version(),
        uptime_seconds: state.uptime_seconds(),
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}

#[derive(Serialize)]
struct StateResponse {
    state_version: u64,
    trading_mode: String,
    account_mode: String,
    snapshot: serde_json::Value,
}

async fn full_state(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.snapshot();
    Json(StateResponse {
        state_version: state.current_state_version(),
        trading_mode: state.trading_mode().to_string(),
        account_mode: state.account_mode().to_string(),
        snapshot: serde_json::to_value(snapshot.as_ref()).unwrap_or_default(),
    })
}

async fn positions(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.snapshot().positions.clone())
}

async fn events(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.events.recent(100))
}

#[derive(Serialize)]
struct ControlResponse {
    trading_mode: String,
}

async fn control_pause(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mode = state.set_trading_mode(TradingMode::Paused);
    warn!("operator paused trading");
    Json(ControlResponse {
        trading_mode: mode.to_string(),
    })
}

async fn control_resume(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mode = state.set_trading_mode(TradingMode::Live);
    warn!("operator resumed trading");
    Json(ControlResponse {
        trading_mode: mode.to_string(),
    })
}

async fn control_kill(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mode = state.set_trading_mode(TradingMode::Killed);
    warn!("operator activated kill switch — exit-only mode");
    Json(ControlResponse {
        trading_mode: mode.to_string(),
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.telemetry.gather()
}
