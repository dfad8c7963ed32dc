// =============================================================================
// Terminal Bridge Adapter — HMAC-SHA256 signed REST gateway client
// =============================================================================
//
// Talks to a broker terminal bridge over HTTP. Transport specifics stay here:
// request signing, timeouts, JSON decoding, and the mapping from gateway
// error bodies into the engine's AdapterError taxonomy. The core never sees
// a raw gateway code.
//
// SECURITY: the secret key is used only for signing and is never logged.
// =============================================================================

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument};

use async_trait::async_trait;

use crate::adapter::{AdapterError, AdapterResult, MarketAdapter};
use crate::types::{
    AccountSnapshot, Bar, OrderOutcome, OrderRequest, Position, Side, Symbol, Tick, Timeframe,
};

type HmacSha256 = Hmac<Sha256>;

/// Bridge REST client.
#[derive(Clone)]
pub struct BridgeAdapter {
    base_url: String,
    secret: String,
    client: reqwest::Client,
    timeout_ms: u64,
}

impl BridgeAdapter {
    /// Create a new bridge client.
    ///
    /// * `base_url` — gateway root, e.g. `http://127.0.0.1:6542`.
    /// * `api_key`  — sent as the `X-MRD-APIKEY` header on every request.
    /// * `secret`   — HMAC signing key.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        secret: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let api_key = api_key.into();

        let mut default_headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&api_key) {
            default_headers.insert("X-MRD-APIKEY", val);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(timeout)
            .build()
            .expect("failed to build reqwest client");

        Self {
            base_url: base_url.into(),
            secret: secret.into(),
            client,
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// HMAC-SHA256 hex signature of `payload`.
    fn sign(&self, payload: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as u64
    }

    /// Append timestamp and signature to a query string.
    fn signed_query(&self, params: &str) -> String {
        let ts = Self::timestamp_ms();
        let base = if params.is_empty() {
            format!("ts={ts}")
        } else {
            format!("{params}&ts={ts}")
        };
        let sig = self.sign(&base);
        format!("{base}&sig={sig}")
    }

    fn map_transport_error(&self, err: reqwest::Error) -> AdapterError {
        if err.is_timeout() {
            AdapterError::Timeout(self.timeout_ms)
        } else if err.is_connect() {
            AdapterError::Connection(err.to_string())
        } else {
            AdapterError::InvalidResponse(err.to_string())
        }
    }

    /// Decode an error body into the taxonomy. The gateway reports
    /// `{ "code": "...", "message": "..." }` on non-2xx responses.
    fn map_gateway_error(status: reqwest::StatusCode, body: &serde_json::Value) -> AdapterError {
        let code = body["code"].as_str().unwrap_or("").to_string();
        let message = body["message"]
            .as_str()
            .unwrap_or("no message")
            .to_string();
        match code.as_str() {
            "UNKNOWN_SYMBOL" => AdapterError::UnknownSymbol(message),
            "UNKNOWN_TICKET" => {
                AdapterError::UnknownTicket(body["ticket"].as_u64().unwrap_or(0))
            }
            _ if status.is_server_error() => AdapterError::Connection(format!("{status}: {message}")),
            _ => AdapterError::Rejected { code, message },
        }
    }

    async fn get_json(&self, path: &str, params: &str) -> AdapterResult<serde_json::Value> {
        let qs = self.signed_query(params);
        let url = format!("{}{}?{}", self.base_url, path, qs);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| AdapterError::InvalidResponse(e.to_string()))?;

        if !status.is_success() {
            return Err(Self::map_gateway_error(status, &body));
        }
        Ok(body)
    }

    async fn post_json(
        &self,
        path: &str,
        payload: &serde_json::Value,
    ) -> AdapterResult<serde_json::Value> {
        let body_str = payload.to_string();
        let sig = self.sign(&body_str);
        let url = format!("{}{}", self.base_url, path);

        let resp = self
            .client
            .post(&url)
            .header("X-MRD-SIGNATURE", sig)
            .json(payload)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| AdapterError::InvalidResponse(e.to_string()))?;

        if !status.is_success() {
            return Err(Self::map_gateway_error(status, &body));
        }
        Ok(body)
    }

    // ── JSON decoding helpers ───────────────────────────────────────────

    fn f64_field(v: &serde_json::Value, key: &str) -> AdapterResult<f64> {
        v[key]
            .as_f64()
            .or_else(|| v[key].as_str().and_then(|s| s.parse().ok()))
            .ok_or_else(|| AdapterError::InvalidResponse(format!("missing numeric field {key}")))
    }

    fn time_field(v: &serde_json::Value, key: &str) -> AdapterResult<DateTime<Utc>> {
        let s = v[key]
            .as_str()
            .ok_or_else(|| AdapterError::InvalidResponse(format!("missing time field {key}")))?;
        s.parse::<DateTime<Utc>>()
            .map_err(|e| AdapterError::InvalidResponse(format!("bad timestamp {key}: {e}")))
    }

    fn side_field(v: &serde_json::Value, key: &str) -> AdapterResult<Side> {
        match v[key].as_str() {
            Some("LONG") | Some("BUY") => Ok(Side::Long),
            Some("SHORT") | Some("SELL") => Ok(Side::Short),
            other => Err(AdapterError::InvalidResponse(format!(
                "bad side field {key}: {other:?}"
            ))),
        }
    }

    fn decode_position(v: &serde_json::Value) -> AdapterResult<Position> {
        Ok(Position {
            ticket: v["ticket"]
                .as_u64()
                .ok_or_else(|| AdapterError::InvalidResponse("missing ticket".to_string()))?,
            symbol: v["symbol"].as_str().unwrap_or("UNKNOWN").to_string(),
            side: Self::side_field(v, "side")?,
            volume: Self::f64_field(v, "volume")?,
            entry_price: Self::f64_field(v, "entry_price")?,
            current_price: Self::f64_field(v, "current_price")?,
            sl: v["sl"].as_f64().filter(|x| *x > 0.0),
            tp: v["tp"].as_f64().filter(|x| *x > 0.0),
            open_time: Self::time_field(v, "open_time")?,
            tag: v["tag"].as_str().map(str::to_string),
            pnl: Self::f64_field(v, "pnl").unwrap_or(0.0),
            mae: 0.0,
            mfe: 0.0,
        })
    }
}

#[async_trait]
impl MarketAdapter for BridgeAdapter {
    #[instrument(skip(self), name = "bridge::account_info")]
    async fn account_info(&self) -> AdapterResult<AccountSnapshot> {
        let v = self.get_json("/api/v1/account", "").await?;
        Ok(AccountSnapshot {
            balance: Self::f64_field(&v, "balance")?,
            equity: Self::f64_field(&v, "equity")?,
            margin_used: Self::f64_field(&v, "margin_used").unwrap_or(0.0),
            margin_free: Self::f64_field(&v, "margin_free").unwrap_or(0.0),
            margin_level: v["margin_level"].as_f64(),
            currency: v["currency"].as_str().unwrap_or("USD").to_string(),
            trade_allowed: v["trade_allowed"].as_bool().unwrap_or(false),
            server_time: Self::time_field(&v, "server_time").unwrap_or_else(|_| Utc::now()),
        })
    }

    #[instrument(skip(self), name = "bridge::symbol_info")]
    async fn symbol_info(&self, code: &str) -> AdapterResult<Symbol> {
        let v = self
            .get_json(&format!("/api/v1/symbols/{code}"), "")
            .await?;
        Ok(Symbol {
            code: v["code"].as_str().unwrap_or(code).to_string(),
            pip_size: Self::f64_field(&v, "pip_size")?,
            lot_min: Self::f64_field(&v, "lot_min")?,
            lot_step: Self::f64_field(&v, "lot_step")?,
            lot_max: Self::f64_field(&v, "lot_max")?,
            contract_size: Self::f64_field(&v, "contract_size").unwrap_or(1.0),
            quote_ccy: v["quote_ccy"].as_str().unwrap_or("USD").to_string(),
            is_crypto: v["is_crypto"].as_bool().unwrap_or(false),
        })
    }

    #[instrument(skip(self), name = "bridge::copy_rates")]
    async fn copy_rates(&self, code: &str, tf: Timeframe, count: usize) -> AdapterResult<Vec<Bar>> {
        let params = format!("symbol={code}&tf={tf}&count={count}");
        let v = self.get_json("/api/v1/rates", &params).await?;
        let arr = v["bars"]
            .as_array()
            .ok_or_else(|| AdapterError::InvalidResponse("missing bars array".to_string()))?;

        let mut bars = Vec::with_capacity(arr.len());
        for item in arr {
            bars.push(Bar {
                symbol: code.to_string(),
                tf,
                open_time: Self::time_field(item, "t")?,
                open: Self::f64_field(item, "o")?,
                high: Self::f64_field(item, "h")?,
                low: Self::f64_field(item, "l")?,
                close: Self::f64_field(item, "c")?,
                volume: Self::f64_field(item, "v").unwrap_or(0.0),
            });
        }
        debug!(symbol = code, %tf, count = bars.len(), "rates fetched");
        Ok(bars)
    }

    #[instrument(skip(self), name = "bridge::tick")]
    async fn tick(&self, code: &str) -> AdapterResult<Tick> {
        let v = self
            .get_json("/api/v1/tick", &format!("symbol={code}"))
            .await?;
        Ok(Tick {
            bid: Self::f64_field(&v, "bid")?,
            ask: Self::f64_field(&v, "ask")?,
            last: Self::f64_field(&v, "last").unwrap_or(0.0),
            time: Self::time_field(&v, "time").unwrap_or_else(|_| Utc::now()),
        })
    }

    #[instrument(skip(self), name = "bridge::positions")]
    async fn positions(&self) -> AdapterResult<Vec<Position>> {
        let v = self.get_json("/api/v1/positions", "").await?;
        let arr = v["positions"]
            .as_array()
            .ok_or_else(|| AdapterError::InvalidResponse("missing positions array".to_string()))?;
        arr.iter().map(Self::decode_position).collect()
    }

    #[instrument(skip(self), name = "bridge::position_by_ticket")]
    async fn position_by_ticket(&self, ticket: u64) -> AdapterResult<Position> {
        let v = self
            .get_json(&format!("/api/v1/positions/{ticket}"), "")
            .await?;
        Self::decode_position(&v)
    }

    #[instrument(skip(self, request), name = "bridge::order_send", fields(symbol = %request.symbol))]
    async fn order_send(&self, request: &OrderRequest) -> AdapterResult<OrderOutcome> {
        let payload = serde_json::json!({
            "symbol": request.symbol,
            "side": request.side.to_string(),
            "volume": request.volume,
            "sl": request.sl,
            "tp": request.tp,
            "type": format!("{:?}", request.order_type).to_uppercase(),
            "client_tag": request.client_tag,
        });
        let v = self.post_json("/api/v1/orders", &payload).await?;

        match v["status"].as_str() {
            Some("FILLED") | Some("DUPLICATE") => Ok(OrderOutcome::Filled {
                ticket: v["ticket"].as_u64().ok_or_else(|| {
                    AdapterError::InvalidResponse("fill without ticket".to_string())
                })?,
                fill_price: Self::f64_field(&v, "fill_price")?,
            }),
            Some("REJECTED") => Ok(OrderOutcome::Rejected {
                code: v["code"].as_str().unwrap_or("").to_string(),
                message: v["message"].as_str().unwrap_or("").to_string(),
            }),
            Some("PENDING") => Ok(OrderOutcome::Pending),
            other => Err(AdapterError::InvalidResponse(format!(
                "unknown order status {other:?}"
            ))),
        }
    }

    #[instrument(skip(self), name = "bridge::position_close")]
    async fn position_close(&self, ticket: u64, volume_fraction: f64) -> AdapterResult<()> {
        let payload = serde_json::json!({ "fraction": volume_fraction });
        self.post_json(&format!("/api/v1/positions/{ticket}/close"), &payload)
            .await?;
        Ok(())
    }

    #[instrument(skip(self), name = "bridge::position_modify")]
    async fn position_modify(
        &self,
        ticket: u64,
        sl: Option<f64>,
        tp: Option<f64>,
    ) -> AdapterResult<()> {
        let payload = serde_json::json!({ "sl": sl, "tp": tp });
        self.post_json(&format!("/api/v1/positions/{ticket}/modify"), &payload)
            .await?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_stable_and_hex() {
        let bridge = BridgeAdapter::new(
            "http://localhost:6542",
            "key",
            "secret",
            Duration::from_secs(5),
        );
        let a = bridge.sign("symbol=EURUSD&ts=1");
        let b = bridge.sign("symbol=EURUSD&ts=1");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn gateway_error_mapping() {
        let body = serde_json::json!({ "code": "UNKNOWN_SYMBOL", "message": "XAUUSD" });
        let err = BridgeAdapter::map_gateway_error(reqwest::StatusCode::NOT_FOUND, &body);
        assert!(matches!(err, AdapterError::UnknownSymbol(_)));

        let body = serde_json::json!({ "code": "NO_MONEY", "message": "margin" });
        let err = BridgeAdapter::map_gateway_error(reqwest::StatusCode::BAD_REQUEST, &body);
        assert!(matches!(err, AdapterError::Rejected { .. }));

        let body = serde_json::json!({ "code": "", "message": "boom" });
        let err =
            BridgeAdapter::map_gateway_error(reqwest::StatusCode::INTERNAL_SERVER_ERROR, &body);
        assert!(err.is_transient());
    }

    #[test]
    fn position_decoding_flags_missing_fields() {
        let v = serde_json::json!({
            "ticket": 7, "symbol": "EURUSD", "side": "LONG",
            "volume": 0.1, "entry_price": 1.1, "current_price": 1.2,
            "open_time": "2025-06-02T00:00:00Z", "pnl": 1.0
        });
        let p = BridgeAdapter::decode_position(&v).unwrap();
        assert_eq!(p.ticket, 7);
        assert_eq!(p.side, Side::Long);
        assert!(p.sl.is_none());

        let bad = serde_json::json!({ "ticket": 7 });
        assert!(BridgeAdapter::decode_position(&bad).is_err());
    }
}
