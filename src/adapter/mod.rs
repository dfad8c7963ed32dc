// =============================================================================
// Market Adapter — the engine's only window onto the broker terminal
// =============================================================================
//
// The core never interprets transport- or broker-specific return codes. Every
// implementation maps its own failure modes into the `AdapterError` taxonomy
// below; the trading loop only distinguishes transient faults (retry within
// the cycle budget) from permanent ones (fail the current operation).
// =============================================================================

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{
    AccountSnapshot, Bar, OrderOutcome, OrderRequest, Position, Symbol, Tick, Timeframe,
};

pub mod bridge;
pub mod sim;

// ---------------------------------------------------------------------------
// Error taxonomy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error)]
pub enum AdapterError {
    #[error("operation timed out after {0} ms")]
    Timeout(u64),

    #[error("connection failure: {0}")]
    Connection(String),

    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("unknown ticket: {0}")]
    UnknownTicket(u64),

    #[error("rejected by broker [{code}]: {message}")]
    Rejected { code: String, message: String },

    #[error("malformed terminal response: {0}")]
    InvalidResponse(String),
}

impl AdapterError {
    /// Transient faults are retried within the cycle budget; everything else
    /// fails the requesting operation immediately.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Connection(_))
    }
}

pub type AdapterResult<T> = Result<T, AdapterError>;

/// Blocking facade over adapter futures: the supervisor awaits every adapter
/// operation through this, so a hung transport surfaces as a typed timeout
/// instead of wedging the cycle.
pub async fn await_within_timeout<T>(
    fut: impl std::future::Future<Output = AdapterResult<T>>,
    timeout: std::time::Duration,
) -> AdapterResult<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(AdapterError::Timeout(timeout.as_millis() as u64)),
    }
}

// ---------------------------------------------------------------------------
// The adapter contract
// ---------------------------------------------------------------------------

#[async_trait]
pub trait MarketAdapter: Send + Sync {
    async fn account_info(&self) -> AdapterResult<AccountSnapshot>;

    async fn symbol_info(&self, code: &str) -> AdapterResult<Symbol>;

    /// The most recent `count` closed bars, ordered ascending by open time.
    async fn copy_rates(&self, code: &str, tf: Timeframe, count: usize) -> AdapterResult<Vec<Bar>>;

    async fn tick(&self, code: &str) -> AdapterResult<Tick>;

    async fn positions(&self) -> AdapterResult<Vec<Position>>;

    async fn position_by_ticket(&self, ticket: u64) -> AdapterResult<Position>;

    /// Submit an order. Implementations must treat a duplicate `client_tag`
    /// as a replay of the original submission and return the recorded fill.
    async fn order_send(&self, request: &OrderRequest) -> AdapterResult<OrderOutcome>;

    /// Close `volume_fraction` (in (0, 1]) of the position.
    async fn position_close(&self, ticket: u64, volume_fraction: f64) -> AdapterResult<()>;

    async fn position_modify(
        &self,
        ticket: u64,
        sl: Option<f64>,
        tp: Option<f64>,
    ) -> AdapterResult<()>;
}
