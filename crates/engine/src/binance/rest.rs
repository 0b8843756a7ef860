use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};
use url::form_urlencoded;

use common::{
    Config, Error, ErrorKind, ExchangeClient, ExchangeOrderStatus, OrderAck, OrderError,
    OrderIntent, OrderType, Result, SymbolRules,
};

const RECV_WINDOW_MS: u64 = 5_000;

/// REST API client for Binance Spot (testnet by default).
pub struct BinanceClient {
    api_key: String,
    secret: String,
    base_url: String,
    http: Client,
    /// Shared order-rate budget for every run using this client.
    min_order_interval: Duration,
    last_order_at: Mutex<Option<Instant>>,
}

impl BinanceClient {
    pub fn new(
        api_key: impl Into<String>,
        secret: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            api_key: api_key.into(),
            secret: secret.into(),
            base_url: base_url.into(),
            http,
            min_order_interval: Duration::ZERO,
            last_order_at: Mutex::new(None),
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        Ok(Self::new(
            &cfg.binance_api_key,
            &cfg.binance_secret,
            &cfg.base_url,
            cfg.request_timeout,
        )?
        .with_min_order_interval(cfg.order_min_interval))
    }

    pub fn with_min_order_interval(mut self, interval: Duration) -> Self {
        self.min_order_interval = interval;
        self
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    fn sign(&self, query: &str) -> String {
        type HmacSha256 = Hmac<Sha256>;
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Wait until the order-rate budget allows another request.
    async fn throttle(&self) {
        if self.min_order_interval.is_zero() {
            return;
        }
        let mut last = self.last_order_at.lock().await;
        if let Some(prev) = *last {
            let ready_at = prev + self.min_order_interval;
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn signed_post(&self, path: &str, params: &str) -> Result<String, OrderError> {
        let ts = Self::timestamp_ms();
        let query = format!("{params}&recvWindow={RECV_WINDOW_MS}&timestamp={ts}");
        let signature = self.sign(&query);
        let body = format!("{query}&signature={signature}");
        let url = format!("{}{path}", self.base_url);

        let resp = self
            .http
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        let text = resp.text().await.map_err(transport_error)?;

        if !status.is_success() {
            return Err(classify_error(status, &text));
        }
        Ok(text)
    }

    async fn public_get(&self, path: &str, query: &str) -> Result<String> {
        let url = format!("{}{path}?{query}", self.base_url);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;

        if !status.is_success() {
            return Err(Error::Exchange(format!("HTTP {status}: {body}")));
        }
        Ok(body)
    }
}

#[async_trait]
impl ExchangeClient for BinanceClient {
    async fn submit_order(&self, order: &OrderIntent) -> Result<OrderAck, OrderError> {
        let params = order_params(order)?;

        self.throttle().await;
        debug!(symbol = %order.symbol, side = %order.side, client_id = %order.client_id, "Submitting order to Binance");
        let body = self.signed_post("/api/v3/order", &params).await?;

        let resp: OrderResponse = serde_json::from_str(&body).map_err(|e| {
            // The order went through; only the response is unreadable.
            warn!(error = %e, body = %body, "Unparseable order response");
            OrderError::network(format!("unreadable order response: {e}"))
        })?;

        Ok(resp.into_ack())
    }

    async fn symbol_rules(&self, symbol: &str) -> Result<SymbolRules> {
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("symbol", symbol)
            .finish();
        let body = self.public_get("/api/v3/exchangeInfo", &query).await?;
        parse_symbol_rules(symbol, &body)
    }

    async fn current_price(&self, symbol: &str) -> Result<Decimal> {
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("symbol", symbol)
            .finish();
        let body = self.public_get("/api/v3/ticker/price", &query).await?;
        let ticker: PriceTicker = serde_json::from_str(&body)?;
        Ok(ticker.price)
    }
}

fn order_params(order: &OrderIntent) -> Result<String, OrderError> {
    let quantity = order.quantity.normalize().to_string();
    let mut params = form_urlencoded::Serializer::new(String::new());
    params
        .append_pair("symbol", &order.symbol)
        .append_pair("side", &order.side.to_string())
        .append_pair("type", &order.order_type.to_string())
        .append_pair("quantity", &quantity)
        .append_pair("newClientOrderId", &order.client_id)
        .append_pair("newOrderRespType", "FULL");

    if order.order_type == OrderType::Limit {
        let price = order
            .price
            .ok_or_else(|| OrderError::rejected("limit order without a price"))?;
        params
            .append_pair("price", &price.normalize().to_string())
            .append_pair("timeInForce", "GTC");
    }
    Ok(params.finish())
}

fn transport_error(e: reqwest::Error) -> OrderError {
    if e.is_timeout() {
        OrderError::network(format!("request timed out: {e}"))
    } else {
        OrderError::network(e.to_string())
    }
}

/// Map a failed Binance response onto the order error taxonomy.
pub fn classify_error(status: StatusCode, body: &str) -> OrderError {
    let api: Option<ApiError> = serde_json::from_str(body).ok();
    let (code, msg) = match &api {
        Some(e) => (e.code, e.msg.clone()),
        None => (0, body.to_string()),
    };
    let message = format!("HTTP {}: {msg} (code {code})", status.as_u16());

    let kind = if status == StatusCode::TOO_MANY_REQUESTS
        || status.as_u16() == 418
        || matches!(code, -1003 | -1015)
    {
        ErrorKind::RateLimited
    } else if status == StatusCode::UNAUTHORIZED || matches!(code, -1002 | -1022 | -2014 | -2015)
    {
        ErrorKind::AuthError
    } else if code == -2010 && msg.to_lowercase().contains("insufficient balance") {
        ErrorKind::InsufficientFunds
    } else if status.is_server_error() {
        // Binance: 5xx means the execution status is unknown
        ErrorKind::NetworkError
    } else {
        ErrorKind::ExchangeRejected
    };

    OrderError::new(kind, message)
}

fn parse_symbol_rules(symbol: &str, body: &str) -> Result<SymbolRules> {
    let info: ExchangeInfo = serde_json::from_str(body)?;
    let entry = info
        .symbols
        .into_iter()
        .find(|s| s.symbol.eq_ignore_ascii_case(symbol))
        .ok_or_else(|| Error::Exchange(format!("Symbol {symbol} not found")))?;

    let mut rules = SymbolRules {
        symbol: entry.symbol,
        step_size: Decimal::ZERO,
        min_qty: Decimal::ZERO,
        tick_size: Decimal::ZERO,
    };
    for filter in entry.filters {
        match filter {
            SymbolFilter::LotSize { step_size, min_qty } => {
                rules.step_size = step_size;
                rules.min_qty = min_qty;
            }
            SymbolFilter::PriceFilter { tick_size } => rules.tick_size = tick_size,
            SymbolFilter::Other => {}
        }
    }
    if rules.step_size.is_zero() {
        return Err(Error::Exchange(format!("Symbol {symbol} has no LOT_SIZE filter")));
    }
    Ok(rules)
}

// ─── Response types ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ApiError {
    code: i64,
    msg: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    symbol: String,
    order_id: u64,
    client_order_id: String,
    #[serde(default)]
    transact_time: Option<i64>,
    status: ExchangeOrderStatus,
    executed_qty: Decimal,
    #[serde(default)]
    cummulative_quote_qty: Option<Decimal>,
    #[serde(default)]
    fills: Vec<FillDetail>,
}

impl OrderResponse {
    fn into_ack(self) -> OrderAck {
        let average_price = if self.executed_qty.is_zero() {
            None
        } else if let Some(quote) = self.cummulative_quote_qty {
            Some((quote / self.executed_qty).normalize())
        } else {
            weighted_fill_price(&self.fills)
        };

        let transacted_at = self
            .transact_time
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_else(Utc::now);

        OrderAck {
            exchange_order_id: self.order_id.to_string(),
            client_id: self.client_order_id,
            symbol: self.symbol,
            status: self.status,
            executed_quantity: self.executed_qty,
            average_price,
            transacted_at,
        }
    }
}

fn weighted_fill_price(fills: &[FillDetail]) -> Option<Decimal> {
    let qty: Decimal = fills.iter().map(|f| f.qty).sum();
    if qty.is_zero() {
        return None;
    }
    let notional: Decimal = fills.iter().map(|f| f.price * f.qty).sum();
    Some((notional / qty).normalize())
}

#[derive(Deserialize)]
struct FillDetail {
    price: Decimal,
    qty: Decimal,
}

#[derive(Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Deserialize)]
struct SymbolInfo {
    symbol: String,
    filters: Vec<SymbolFilter>,
}

#[derive(Deserialize)]
#[serde(tag = "filterType")]
enum SymbolFilter {
    #[serde(rename = "LOT_SIZE", rename_all = "camelCase")]
    LotSize { step_size: Decimal, min_qty: Decimal },
    #[serde(rename = "PRICE_FILTER", rename_all = "camelCase")]
    PriceFilter { tick_size: Decimal },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct PriceTicker {
    price: Decimal,
}
