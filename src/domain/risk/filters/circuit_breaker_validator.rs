use async_trait::async_trait;
use tracing::warn;

use crate::domain::risk::filters::validator_trait::{
    RejectCode, RiskValidator, ValidationContext, ValidationResult,
};

/// Gates entries on the shared circuit breaker state.
///
/// When the breaker is `TRIPPED` or in `QUIET_PERIOD`, only orders that
/// strictly reduce `abs(position)` pass. A limit order gets no exemption:
/// the worst-case full fill must still reduce the position.
pub struct CircuitBreakerValidator;

#[async_trait]
impl RiskValidator for CircuitBreakerValidator {
    fn name(&self) -> &str {
        "CircuitBreakerValidator"
    }

    async fn validate(&self, ctx: &ValidationContext<'_>) -> ValidationResult {
        if ctx.breaker_state.allows_entries() {
            return ValidationResult::Approve;
        }

        if ctx.is_reducing() {
            return ValidationResult::Approve;
        }

        warn!(
            "CircuitBreakerValidator: Blocking {} {} x{} (breaker {})",
            ctx.order.side, ctx.order.symbol, ctx.order.qty, ctx.breaker_state
        );
        ValidationResult::reject(
            RejectCode::CircuitBreaker,
            format!(
                "Circuit breaker is {}; only reducing orders are allowed",
                ctx.breaker_state
            ),
        )
    }

    fn priority(&self) -> u8 {
        5
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::circuit::BreakerState;
    use crate::domain::risk::limits::RiskLimits;
    use crate::domain::trading::types::{Order, OrderSide, OrderType, Position, TimeInForce};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn order(side: OrderSide, qty: Decimal) -> Order {
        Order::new(
            "id".to_string(),
            "s1".to_string(),
            "AAPL".to_string(),
            side,
            qty,
            OrderType::Market,
            None,
            TimeInForce::Day,
        )
    }

    fn ctx_with<'a>(
        order: &'a Order,
        positions: &'a HashMap<String, Position>,
        prices: &'a HashMap<String, Decimal>,
        limits: &'a RiskLimits,
        state: BreakerState,
    ) -> ValidationContext<'a> {
        ValidationContext {
            order,
            positions,
            prices,
            portfolio_value: dec!(100000),
            existing_exposure: Decimal::ZERO,
            planned_exposure: Decimal::ZERO,
            drawdown_today: Decimal::ZERO,
            breaker_state: state,
            limits,
        }
    }

    #[tokio::test]
    async fn test_entry_blocked_when_tripped() {
        let order = order(OrderSide::Buy, dec!(10));
        let positions = HashMap::new();
        let prices = HashMap::new();
        let limits = RiskLimits::default();
        let ctx = ctx_with(&order, &positions, &prices, &limits, BreakerState::Tripped);

        let result = CircuitBreakerValidator.validate(&ctx).await;
        assert!(result.is_rejected());
    }

    #[tokio::test]
    async fn test_reducing_order_passes_when_tripped() {
        let order = order(OrderSide::Sell, dec!(5));
        let mut positions = HashMap::new();
        let mut long = Position::flat("AAPL");
        long.qty = dec!(10);
        positions.insert("AAPL".to_string(), long);
        let prices = HashMap::new();
        let limits = RiskLimits::default();
        let ctx = ctx_with(&order, &positions, &prices, &limits, BreakerState::Tripped);

        let result = CircuitBreakerValidator.validate(&ctx).await;
        assert!(result.is_approved());
    }

    #[tokio::test]
    async fn test_oversized_sell_is_not_reducing() {
        // Selling 15 against a long 10 would flip the book — blocked.
        let order = order(OrderSide::Sell, dec!(15));
        let mut positions = HashMap::new();
        let mut long = Position::flat("AAPL");
        long.qty = dec!(10);
        positions.insert("AAPL".to_string(), long);
        let prices = HashMap::new();
        let limits = RiskLimits::default();
        let ctx = ctx_with(&order, &positions, &prices, &limits, BreakerState::Tripped);

        let result = CircuitBreakerValidator.validate(&ctx).await;
        assert!(result.is_rejected());
    }
}
