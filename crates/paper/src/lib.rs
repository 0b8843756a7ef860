use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use common::{
    Error, ErrorKind, ExchangeClient, ExchangeOrderStatus, OrderAck, OrderError, OrderIntent,
    OrderSide, OrderType, Result, SymbolRules,
};

const QUOTE_ASSET: &str = "USDT";

/// Simulated exchange client for paper trading.
///
/// Market orders fill at the latest known price with configurable slippage.
/// Limit orders fill only when marketable; otherwise they rest and are
/// acknowledged as `NEW`. No real orders are ever sent to Binance.
///
/// With a market-data source attached, prices and symbol filters come from
/// that source (typically the public Binance endpoints); otherwise they come
/// from `update_price` and `with_rules`.
pub struct PaperClient {
    /// Free balance per asset; the quote asset is USDT.
    balances: Mutex<HashMap<String, Decimal>>,
    /// Latest known price per symbol, updated via `update_price`.
    prices: RwLock<HashMap<String, Decimal>>,
    rules: HashMap<String, SymbolRules>,
    /// Slippage in basis points applied to all fills.
    slippage_bps: Decimal,
    next_order_id: AtomicU64,
    market_data: Option<Arc<dyn ExchangeClient>>,
}

impl PaperClient {
    pub fn new(initial_balance_usdt: Decimal, slippage_bps: Decimal) -> Self {
        info!(
            balance = %initial_balance_usdt,
            slippage_bps = %slippage_bps,
            "PaperClient initialized"
        );
        let mut balances = HashMap::new();
        balances.insert(QUOTE_ASSET.to_string(), initial_balance_usdt);
        Self {
            balances: Mutex::new(balances),
            prices: RwLock::new(HashMap::new()),
            rules: HashMap::new(),
            slippage_bps,
            next_order_id: AtomicU64::new(1),
            market_data: None,
        }
    }

    /// Register exchange filters for a symbol. Unregistered symbols use
    /// BTCUSDT-like defaults.
    pub fn with_rules(mut self, rules: SymbolRules) -> Self {
        self.rules.insert(rules.symbol.clone(), rules);
        self
    }

    /// Read prices and symbol filters from another client. Orders are
    /// never forwarded to it.
    pub fn with_market_data(mut self, source: Arc<dyn ExchangeClient>) -> Self {
        self.market_data = Some(source);
        self
    }

    /// Start with a holding of a base asset so sells can be simulated.
    pub fn with_holding(mut self, asset: &str, quantity: Decimal) -> Self {
        self.balances
            .get_mut()
            .insert(asset.to_uppercase(), quantity);
        self
    }

    /// Update the latest price for a symbol.
    pub async fn update_price(&self, symbol: &str, price: Decimal) {
        self.prices.write().await.insert(symbol.to_string(), price);
    }

    pub async fn balance(&self, asset: &str) -> Decimal {
        self.balances
            .lock()
            .await
            .get(asset)
            .copied()
            .unwrap_or_default()
    }

    async fn mark_price(&self, symbol: &str) -> Result<Decimal, OrderError> {
        if let Some(source) = &self.market_data {
            let price = source
                .current_price(symbol)
                .await
                .map_err(|e| OrderError::network(format!("price lookup failed: {e}")))?;
            self.update_price(symbol, price).await;
            return Ok(price);
        }
        self.prices
            .read()
            .await
            .get(symbol)
            .copied()
            .ok_or_else(|| {
                OrderError::rejected(format!("PaperClient has no price for symbol '{symbol}'"))
            })
    }

    fn default_rules(symbol: &str) -> SymbolRules {
        SymbolRules {
            symbol: symbol.to_string(),
            step_size: Decimal::new(1, 5),
            min_qty: Decimal::new(1, 5),
            tick_size: Decimal::new(1, 2),
        }
    }

    fn slipped(&self, mid: Decimal, side: OrderSide) -> Decimal {
        let factor = self.slippage_bps / Decimal::from(10_000);
        match side {
            OrderSide::Buy => mid * (Decimal::ONE + factor),
            OrderSide::Sell => mid * (Decimal::ONE - factor),
        }
    }

    /// Move balances for a fill. Fails without touching anything when the
    /// paying side cannot cover it.
    async fn settle(&self, order: &OrderIntent, price: Decimal) -> Result<(), OrderError> {
        let base = base_asset(&order.symbol);
        let quantity = order.quantity;
        let notional = order.notional(price);
        let mut balances = self.balances.lock().await;

        let (pay_asset, pay, receive_asset, receive) = match order.side {
            OrderSide::Buy => (QUOTE_ASSET, notional, base, quantity),
            OrderSide::Sell => (base, quantity, QUOTE_ASSET, notional),
        };

        let available = balances.get(pay_asset).copied().unwrap_or_default();
        if available < pay {
            return Err(OrderError::new(
                ErrorKind::InsufficientFunds,
                format!(
                    "Account has insufficient balance for requested action: need {} {pay_asset}, have {}",
                    pay.normalize(),
                    available.normalize()
                ),
            ));
        }

        balances.insert(pay_asset.to_string(), available - pay);
        *balances.entry(receive_asset.to_string()).or_default() += receive;
        Ok(())
    }
}

#[async_trait]
impl ExchangeClient for PaperClient {
    async fn submit_order(&self, order: &OrderIntent) -> Result<OrderAck, OrderError> {
        let mid = self.mark_price(&order.symbol).await?;

        if order.quantity <= Decimal::ZERO {
            return Err(OrderError::rejected("quantity must be positive"));
        }

        let market_price = self.slipped(mid, order.side);
        let fill_price = match (order.order_type, order.price) {
            (OrderType::Market, _) => Some(market_price),
            (OrderType::Limit, Some(limit)) => {
                let marketable = match order.side {
                    OrderSide::Buy => market_price <= limit,
                    OrderSide::Sell => market_price >= limit,
                };
                marketable.then_some(limit)
            }
            (OrderType::Limit, None) => {
                return Err(OrderError::rejected("limit order without a price"));
            }
        };

        let exchange_order_id = self.next_order_id.fetch_add(1, Ordering::Relaxed).to_string();

        let (status, executed_quantity, average_price) = match fill_price {
            Some(price) => {
                if let Err(e) = self.settle(order, price).await {
                    warn!(symbol = %order.symbol, error = %e, "Paper order refused");
                    return Err(e);
                }
                (ExchangeOrderStatus::Filled, order.quantity, Some(price.normalize()))
            }
            None => (ExchangeOrderStatus::New, Decimal::ZERO, None),
        };

        debug!(
            symbol = %order.symbol,
            side = %order.side,
            mid = %mid,
            status = %status,
            fill = ?average_price,
            qty = %order.quantity,
            "Paper order simulated"
        );

        Ok(OrderAck {
            exchange_order_id,
            client_id: order.client_id.clone(),
            symbol: order.symbol.clone(),
            status,
            executed_quantity,
            average_price,
            transacted_at: Utc::now(),
        })
    }

    async fn symbol_rules(&self, symbol: &str) -> Result<SymbolRules> {
        if let Some(source) = &self.market_data {
            return source.symbol_rules(symbol).await;
        }
        Ok(self
            .rules
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| Self::default_rules(symbol)))
    }

    async fn current_price(&self, symbol: &str) -> Result<Decimal> {
        if let Some(source) = &self.market_data {
            return source.current_price(symbol).await;
        }
        self.prices
            .read()
            .await
            .get(symbol)
            .copied()
            .ok_or_else(|| Error::Exchange(format!("No price available for {symbol}")))
    }
}

fn base_asset(symbol: &str) -> &str {
    symbol.strip_suffix(QUOTE_ASSET).unwrap_or(symbol)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn paper_buy_fill_applies_positive_slippage() {
        let client = PaperClient::new(dec!(10000), dec!(10)); // 10 bps
        client.update_price("BTCUSDT", dec!(1000)).await;

        let order = OrderIntent::market("BTCUSDT", OrderSide::Buy, dec!(0.01));
        let ack = client.submit_order(&order).await.unwrap();

        assert_eq!(ack.status, ExchangeOrderStatus::Filled);
        assert_eq!(ack.average_price, Some(dec!(1001)));
        assert_eq!(ack.client_id, order.client_id);
        assert_eq!(client.balance("USDT").await, dec!(9989.99));
        assert_eq!(client.balance("BTC").await, dec!(0.01));
    }

    #[tokio::test]
    async fn paper_sell_fill_applies_negative_slippage() {
        let client = PaperClient::new(dec!(10000), dec!(10)).with_holding("btc", dec!(1));
        client.update_price("BTCUSDT", dec!(1000)).await;

        let order = OrderIntent::market("BTCUSDT", OrderSide::Sell, dec!(0.5));
        let ack = client.submit_order(&order).await.unwrap();

        assert_eq!(ack.average_price, Some(dec!(999)));
        assert_eq!(client.balance("BTC").await, dec!(0.5));
        assert_eq!(client.balance("USDT").await, dec!(10499.5));
    }

    #[tokio::test]
    async fn sell_without_holdings_is_insufficient_funds() {
        let client = PaperClient::new(dec!(10000), dec!(0));
        client.update_price("ETHUSDT", dec!(500)).await;

        let order = OrderIntent::market("ETHUSDT", OrderSide::Sell, dec!(1));
        let err = client.submit_order(&order).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InsufficientFunds);
        assert_eq!(client.balance("USDT").await, dec!(10000));
    }

    #[tokio::test]
    async fn non_marketable_limit_rests() {
        let client = PaperClient::new(dec!(10000), dec!(0));
        client.update_price("BTCUSDT", dec!(25000)).await;

        let order = OrderIntent::limit("BTCUSDT", OrderSide::Buy, dec!(0.01), dec!(24000));
        let ack = client.submit_order(&order).await.unwrap();
        assert_eq!(ack.status, ExchangeOrderStatus::New);
        assert_eq!(ack.executed_quantity, Decimal::ZERO);
        assert_eq!(ack.average_price, None);
        assert_eq!(client.balance("USDT").await, dec!(10000));
    }

    #[tokio::test]
    async fn marketable_limit_fills_at_limit_price() {
        let client = PaperClient::new(dec!(10000), dec!(0));
        client.update_price("BTCUSDT", dec!(25000)).await;

        let order = OrderIntent::limit("BTCUSDT", OrderSide::Buy, dec!(0.1), dec!(26000));
        let ack = client.submit_order(&order).await.unwrap();
        assert_eq!(ack.status, ExchangeOrderStatus::Filled);
        assert_eq!(ack.average_price, Some(dec!(26000)));
        assert_eq!(client.balance("USDT").await, dec!(7400));
    }

    #[tokio::test]
    async fn unknown_symbol_is_rejected() {
        let client = PaperClient::new(dec!(10000), dec!(0));
        let order = OrderIntent::market("DOGEUSDT", OrderSide::Buy, dec!(1));
        let err = client.submit_order(&order).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ExchangeRejected);
    }

    #[tokio::test]
    async fn order_ids_are_sequential() {
        let client = PaperClient::new(dec!(10000), dec!(0));
        client.update_price("BTCUSDT", dec!(100)).await;
        let a = client
            .submit_order(&OrderIntent::market("BTCUSDT", OrderSide::Buy, dec!(1)))
            .await
            .unwrap();
        let b = client
            .submit_order(&OrderIntent::market("BTCUSDT", OrderSide::Buy, dec!(1)))
            .await
            .unwrap();
        assert_eq!(a.exchange_order_id, "1");
        assert_eq!(b.exchange_order_id, "2");
    }

    #[tokio::test]
    async fn market_data_source_supplies_prices_and_rules() {
        let source = Arc::new(
            PaperClient::new(dec!(0), dec!(0)).with_rules(SymbolRules {
                symbol: "ETHUSDT".into(),
                step_size: dec!(0.001),
                min_qty: dec!(0.001),
                tick_size: dec!(0.1),
            }),
        );
        source.update_price("ETHUSDT", dec!(2000)).await;

        let client = PaperClient::new(dec!(10000), dec!(0)).with_market_data(source.clone());
        assert_eq!(client.symbol_rules("ETHUSDT").await.unwrap().tick_size, dec!(0.1));

        let ack = client
            .submit_order(&OrderIntent::market("ETHUSDT", OrderSide::Buy, dec!(1)))
            .await
            .unwrap();
        assert_eq!(ack.average_price, Some(dec!(2000)));

        source.update_price("ETHUSDT", dec!(2100)).await;
        assert_eq!(client.current_price("ETHUSDT").await.unwrap(), dec!(2100));
        // The source account is never touched
        assert_eq!(source.balance("ETH").await, Decimal::ZERO);
    }

    #[tokio::test]
    async fn registered_rules_override_defaults() {
        let client = PaperClient::new(dec!(0), dec!(0)).with_rules(SymbolRules {
            symbol: "ETHUSDT".into(),
            step_size: dec!(0.0001),
            min_qty: dec!(0.0001),
            tick_size: dec!(0.01),
        });
        assert_eq!(client.symbol_rules("ETHUSDT").await.unwrap().step_size, dec!(0.0001));
        assert_eq!(client.symbol_rules("BTCUSDT").await.unwrap().step_size, dec!(0.00001));
    }
}
