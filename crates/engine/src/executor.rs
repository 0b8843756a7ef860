use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tracing::{error, info, warn};

use common::{
    Error, ExchangeClient, OrderAck, OrderIntent, OrderSide, OrderType, Result, SymbolRules,
    TwapPlan,
};

/// A TWAP request as typed by the operator, before exchange filters apply.
#[derive(Debug, Clone)]
pub struct TwapRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub slices: u32,
    pub duration: Duration,
}

/// Places single Market/Limit orders and turns TWAP requests into plans.
///
/// Quantities are rounded down to the symbol's lot step and prices down to
/// its tick before anything reaches the exchange. Every order and its
/// outcome is logged; that log is the audit trail.
#[derive(Clone)]
pub struct OrderExecutor {
    client: Arc<dyn ExchangeClient>,
}

impl OrderExecutor {
    pub fn new(client: Arc<dyn ExchangeClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> Arc<dyn ExchangeClient> {
        self.client.clone()
    }

    pub async fn place_market(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<OrderAck> {
        let symbol = symbol.trim().to_uppercase();
        let rules = self.client.symbol_rules(&symbol).await?;
        let quantity = checked_quantity(&rules, quantity)?;
        self.submit(OrderIntent::market(symbol, side, quantity)).await
    }

    pub async fn place_limit(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<OrderAck> {
        let symbol = symbol.trim().to_uppercase();
        let rules = self.client.symbol_rules(&symbol).await?;
        let quantity = checked_quantity(&rules, quantity)?;
        let price = checked_price(&rules, price)?;
        self.submit(OrderIntent::limit(symbol, side, quantity, price))
            .await
    }

    /// Build a `TwapPlan` from a request using the symbol's exchange filters.
    pub async fn prepare_twap(&self, request: TwapRequest) -> Result<TwapPlan> {
        let symbol = request.symbol.trim().to_uppercase();
        let rules = self.client.symbol_rules(&symbol).await?;

        let total_quantity = checked_quantity(&rules, request.quantity)?;
        if total_quantity != request.quantity {
            warn!(
                requested = %request.quantity,
                adjusted = %total_quantity,
                step = %rules.step_size,
                "TWAP quantity rounded down to lot step"
            );
        }

        let limit_price = match request.order_type {
            OrderType::Limit => {
                let price = request
                    .price
                    .ok_or_else(|| Error::InvalidPlan("limit orders need a price".into()))?;
                Some(checked_price(&rules, price)?)
            }
            OrderType::Market => None,
        };

        Ok(TwapPlan {
            symbol,
            side: request.side,
            total_quantity,
            slice_count: request.slices,
            total_duration: request.duration,
            order_type: request.order_type,
            limit_price,
            quantity_precision: rules.quantity_precision(),
        })
    }

    async fn submit(&self, intent: OrderIntent) -> Result<OrderAck> {
        info!(
            symbol = %intent.symbol,
            side = %intent.side,
            kind = %intent.order_type,
            qty = %intent.quantity,
            price = ?intent.price,
            client_id = %intent.client_id,
            "Placing order"
        );

        match self.client.submit_order(&intent).await {
            Ok(ack) => {
                info!(
                    symbol = %ack.symbol,
                    order_id = %ack.exchange_order_id,
                    status = %ack.status,
                    executed = %ack.executed_quantity,
                    avg_price = ?ack.average_price,
                    "Order acknowledged"
                );
                Ok(ack)
            }
            Err(e) => {
                error!(symbol = %intent.symbol, error = %e, "Order submission failed");
                Err(e.into())
            }
        }
    }
}

fn checked_quantity(rules: &SymbolRules, quantity: Decimal) -> Result<Decimal> {
    if quantity <= Decimal::ZERO {
        return Err(Error::InvalidPlan(format!(
            "quantity must be positive, got {quantity}"
        )));
    }
    let adjusted = rules.adjust_quantity(quantity);
    if adjusted.is_zero() || adjusted < rules.min_qty {
        return Err(Error::InvalidPlan(format!(
            "quantity {quantity} is below the minimum of {} for {}",
            rules.min_qty.normalize(),
            rules.symbol
        )));
    }
    Ok(adjusted)
}

fn checked_price(rules: &SymbolRules, price: Decimal) -> Result<Decimal> {
    let adjusted = rules.adjust_price(price);
    if adjusted <= Decimal::ZERO {
        return Err(Error::InvalidPlan(format!(
            "price {price} rounds to zero at tick {}",
            rules.tick_size.normalize()
        )));
    }
    Ok(adjusted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{ErrorKind, ExchangeOrderStatus};
    use paper::PaperClient;
    use rust_decimal_macros::dec;

    async fn executor() -> OrderExecutor {
        let client = PaperClient::new(dec!(10000), dec!(0)).with_rules(SymbolRules {
            symbol: "BTCUSDT".into(),
            step_size: dec!(0.00100000),
            min_qty: dec!(0.00100000),
            tick_size: dec!(0.01000000),
        });
        client.update_price("BTCUSDT", dec!(25000)).await;
        OrderExecutor::new(Arc::new(client))
    }

    #[tokio::test]
    async fn market_quantity_is_rounded_to_step() {
        let ack = executor()
            .await
            .place_market("btcusdt", OrderSide::Buy, dec!(0.0039))
            .await
            .unwrap();
        assert_eq!(ack.symbol, "BTCUSDT");
        assert_eq!(ack.status, ExchangeOrderStatus::Filled);
        assert_eq!(ack.executed_quantity, dec!(0.003));
    }

    #[tokio::test]
    async fn quantity_below_min_is_refused() {
        let result = executor()
            .await
            .place_market("BTCUSDT", OrderSide::Buy, dec!(0.0004))
            .await;
        assert!(matches!(result, Err(Error::InvalidPlan(_))));
    }

    #[tokio::test]
    async fn resting_limit_is_price_rounded() {
        let ack = executor()
            .await
            .place_limit("BTCUSDT", OrderSide::Buy, dec!(0.002), dec!(24000.129))
            .await
            .unwrap();
        assert_eq!(ack.status, ExchangeOrderStatus::New);
        assert_eq!(ack.executed_quantity, Decimal::ZERO);
    }

    #[tokio::test]
    async fn exchange_failures_surface_as_order_errors() {
        // 10 BTC at 25k is far beyond a 10k balance
        let result = executor()
            .await
            .place_market("BTCUSDT", OrderSide::Buy, dec!(10))
            .await;
        assert!(matches!(
            result,
            Err(Error::Order(e)) if e.kind == ErrorKind::InsufficientFunds
        ));
    }

    #[tokio::test]
    async fn twap_plan_uses_symbol_filters() {
        let plan = executor()
            .await
            .prepare_twap(TwapRequest {
                symbol: "btcusdt".into(),
                side: OrderSide::Sell,
                order_type: OrderType::Limit,
                quantity: dec!(0.0105),
                price: Some(dec!(26000.555)),
                slices: 5,
                duration: Duration::from_secs(50),
            })
            .await
            .unwrap();

        assert_eq!(plan.symbol, "BTCUSDT");
        assert_eq!(plan.total_quantity, dec!(0.010));
        assert_eq!(plan.quantity_precision, 3);
        assert_eq!(plan.limit_price, Some(dec!(26000.55)));
        assert_eq!(plan.slice_count, 5);
    }

    #[tokio::test]
    async fn twap_limit_without_price_is_invalid() {
        let result = executor()
            .await
            .prepare_twap(TwapRequest {
                symbol: "BTCUSDT".into(),
                side: OrderSide::Buy,
                order_type: OrderType::Limit,
                quantity: dec!(0.01),
                price: None,
                slices: 2,
                duration: Duration::from_secs(10),
            })
            .await;
        assert!(matches!(result, Err(Error::InvalidPlan(_))));
    }
}
