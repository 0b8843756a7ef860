use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Error, ErrorKind, OrderError};

/// Largest number of decimal places a quantity may carry.
pub const MAX_QUANTITY_PRECISION: u32 = 18;

/// Side of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

impl std::str::FromStr for OrderSide {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "BUY" => Ok(OrderSide::Buy),
            "SELL" => Ok(OrderSide::Sell),
            other => Err(Error::Other(format!(
                "side must be BUY or SELL, got '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    #[default]
    Market,
    Limit,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit => write!(f, "LIMIT"),
        }
    }
}

impl std::str::FromStr for OrderType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "MARKET" => Ok(OrderType::Market),
            "LIMIT" => Ok(OrderType::Limit),
            other => Err(Error::Other(format!(
                "order type must be MARKET or LIMIT, got '{other}'"
            ))),
        }
    }
}

/// A single order to be sent to the exchange. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderIntent {
    /// Sent as `newClientOrderId` so fills can be matched back to a slice.
    pub client_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    /// Only set for limit orders.
    pub price: Option<Decimal>,
}

impl OrderIntent {
    pub fn market(symbol: impl Into<String>, side: OrderSide, quantity: Decimal) -> Self {
        Self {
            client_id: new_client_id(),
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
        }
    }

    pub fn limit(
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
    ) -> Self {
        Self {
            client_id: new_client_id(),
            symbol: symbol.into(),
            side,
            order_type: OrderType::Limit,
            quantity,
            price: Some(price),
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn notional(&self, price: Decimal) -> Decimal {
        self.quantity * self.price.unwrap_or(price)
    }
}

fn new_client_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Order status as reported by the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExchangeOrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
    PendingNew,
    PendingCancel,
    /// Expired by self-trade prevention.
    ExpiredInMatch,
}

impl std::fmt::Display for ExchangeOrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExchangeOrderStatus::New => "NEW",
            ExchangeOrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            ExchangeOrderStatus::Filled => "FILLED",
            ExchangeOrderStatus::Canceled => "CANCELED",
            ExchangeOrderStatus::Rejected => "REJECTED",
            ExchangeOrderStatus::Expired => "EXPIRED",
            ExchangeOrderStatus::PendingNew => "PENDING_NEW",
            ExchangeOrderStatus::PendingCancel => "PENDING_CANCEL",
            ExchangeOrderStatus::ExpiredInMatch => "EXPIRED_IN_MATCH",
        };
        write!(f, "{s}")
    }
}

/// Acknowledgement of an accepted order returned by the exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAck {
    pub exchange_order_id: String,
    pub client_id: String,
    pub symbol: String,
    pub status: ExchangeOrderStatus,
    pub executed_quantity: Decimal,
    /// Volume-weighted fill price; `None` when nothing executed.
    pub average_price: Option<Decimal>,
    pub transacted_at: DateTime<Utc>,
}

/// Trading filters for a symbol (Binance `LOT_SIZE` and `PRICE_FILTER`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolRules {
    pub symbol: String,
    pub step_size: Decimal,
    pub min_qty: Decimal,
    pub tick_size: Decimal,
}

impl SymbolRules {
    /// Round a quantity down to a whole number of lot steps.
    pub fn adjust_quantity(&self, quantity: Decimal) -> Decimal {
        floor_to_step(quantity, self.step_size)
    }

    /// Round a price down to a whole number of ticks.
    pub fn adjust_price(&self, price: Decimal) -> Decimal {
        floor_to_step(price, self.tick_size)
    }

    /// Decimal places implied by the lot step (`0.00100000` -> 3).
    pub fn quantity_precision(&self) -> u32 {
        if self.step_size.is_zero() {
            return MAX_QUANTITY_PRECISION;
        }
        self.step_size.normalize().scale()
    }
}

fn floor_to_step(value: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return value;
    }
    ((value / step).floor() * step).normalize()
}

/// What a TWAP run is asked to execute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwapPlan {
    pub symbol: String,
    pub side: OrderSide,
    pub total_quantity: Decimal,
    pub slice_count: u32,
    pub total_duration: Duration,
    pub order_type: OrderType,
    pub limit_price: Option<Decimal>,
    /// Decimal places the symbol accepts for quantities.
    pub quantity_precision: u32,
}

/// Lifecycle of a single TWAP run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Cancelled | RunState::Failed
        )
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Idle => write!(f, "idle"),
            RunState::Running => write!(f, "running"),
            RunState::Completed => write!(f, "completed"),
            RunState::Cancelled => write!(f, "cancelled"),
            RunState::Failed => write!(f, "failed"),
        }
    }
}

/// Status of one TWAP slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SliceStatus {
    #[default]
    Pending,
    Submitted,
    Filled,
    /// Limit order acknowledged and resting on the book.
    Accepted,
    Rejected,
    Error,
    Cancelled,
}

impl SliceStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SliceStatus::Pending | SliceStatus::Submitted)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SliceStatus::Filled | SliceStatus::Accepted)
    }
}

impl std::fmt::Display for SliceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SliceStatus::Pending => "PENDING",
            SliceStatus::Submitted => "SUBMITTED",
            SliceStatus::Filled => "FILLED",
            SliceStatus::Accepted => "ACCEPTED",
            SliceStatus::Rejected => "REJECTED",
            SliceStatus::Error => "ERROR",
            SliceStatus::Cancelled => "CANCELLED",
        };
        write!(f, "{s}")
    }
}

/// Failure recorded against a slice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<OrderError> for SliceError {
    fn from(e: OrderError) -> Self {
        Self {
            kind: e.kind,
            message: e.message,
        }
    }
}

impl std::fmt::Display for SliceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Outcome of one child order of a TWAP run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceResult {
    pub index: usize,
    pub intent: OrderIntent,
    pub status: SliceStatus,
    pub exchange_order_id: Option<String>,
    pub error: Option<SliceError>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub filled_quantity: Decimal,
    pub average_price: Option<Decimal>,
}

impl SliceResult {
    pub fn pending(index: usize, intent: OrderIntent) -> Self {
        Self {
            index,
            intent,
            status: SliceStatus::Pending,
            exchange_order_id: None,
            error: None,
            submitted_at: None,
            filled_quantity: Decimal::ZERO,
            average_price: None,
        }
    }
}

/// Read model of a run, republished by the execution loop after every change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub run_id: String,
    pub plan: TwapPlan,
    pub state: RunState,
    /// Index of the next slice to submit.
    pub cursor: usize,
    pub slices: Vec<SliceResult>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunSnapshot {
    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary {
            run_id: self.run_id.clone(),
            state: self.state,
            filled_count: 0,
            accepted_count: 0,
            rejected_count: 0,
            error_count: 0,
            cancelled_count: 0,
            total_filled_quantity: Decimal::ZERO,
        };
        for slice in &self.slices {
            match slice.status {
                SliceStatus::Filled => summary.filled_count += 1,
                SliceStatus::Accepted => summary.accepted_count += 1,
                SliceStatus::Rejected => summary.rejected_count += 1,
                SliceStatus::Error => summary.error_count += 1,
                SliceStatus::Cancelled => summary.cancelled_count += 1,
                SliceStatus::Pending | SliceStatus::Submitted => {}
            }
            summary.total_filled_quantity += slice.filled_quantity;
        }
        summary
    }
}

/// Final tally of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub state: RunState,
    pub filled_count: usize,
    pub accepted_count: usize,
    pub rejected_count: usize,
    pub error_count: usize,
    pub cancelled_count: usize,
    pub total_filled_quantity: Decimal,
}

/// Progress notification emitted by a running TWAP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    RunStateChanged {
        run_id: String,
        from: RunState,
        to: RunState,
        timestamp: DateTime<Utc>,
    },
    SliceUpdated {
        run_id: String,
        slice_index: usize,
        from: SliceStatus,
        to: SliceStatus,
        error: Option<SliceError>,
        timestamp: DateTime<Utc>,
    },
}

impl ProgressEvent {
    pub fn run_id(&self) -> &str {
        match self {
            ProgressEvent::RunStateChanged { run_id, .. }
            | ProgressEvent::SliceUpdated { run_id, .. } => run_id,
        }
    }
}

/// Whether orders go to the exchange or to the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    Live,
    #[default]
    Paper,
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradingMode::Live => write!(f, "live"),
            TradingMode::Paper => write!(f, "paper"),
        }
    }
}

impl std::str::FromStr for TradingMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "paper" => Ok(TradingMode::Paper),
            "live" => Ok(TradingMode::Live),
            other => Err(Error::Config(format!(
                "TRADING_MODE must be 'paper' or 'live', got: '{other}'"
            ))),
        }
    }
}
