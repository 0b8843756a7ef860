use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::{OrderAck, OrderError, OrderIntent, Result, SymbolRules};

/// Abstraction over the exchange connection.
///
/// `BinanceClient` implements this for the live testnet.
/// `PaperClient` implements this for simulation.
///
/// The TWAP engine only ever calls `submit_order`; rate limiting and
/// authentication are the implementation's concern.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Submit an order and return the exchange acknowledgement.
    async fn submit_order(&self, order: &OrderIntent) -> Result<OrderAck, OrderError>;

    /// Lot size and tick size filters for a symbol.
    async fn symbol_rules(&self, symbol: &str) -> Result<SymbolRules>;

    /// Get the latest price for a symbol.
    async fn current_price(&self, symbol: &str) -> Result<Decimal>;
}
