use async_trait::async_trait;

use crate::domain::errors::RiskRejectionKind;
use crate::domain::risk::filters::validator_trait::{
    RejectCode, RiskValidator, ValidationContext, ValidationResult,
};

/// Enforces the per-symbol share cap: `abs(current_pos + signed_qty)` must
/// stay within `max_pos_per_symbol`.
pub struct PositionCapValidator;

#[async_trait]
impl RiskValidator for PositionCapValidator {
    fn name(&self) -> &str {
        "PositionCapValidator"
    }

    async fn validate(&self, ctx: &ValidationContext<'_>) -> ValidationResult {
        let current = ctx.current_position_qty();
        let resulting = (current + ctx.order.side.sign() * ctx.order.qty).abs();

        if resulting > ctx.limits.max_pos_per_symbol {
            return ValidationResult::reject(
                RejectCode::Risk(RiskRejectionKind::PerSymbolCap),
                format!(
                    "Resulting position {} for {} exceeds per-symbol cap {}",
                    resulting, ctx.order.symbol, ctx.limits.max_pos_per_symbol
                ),
            );
        }
        ValidationResult::Approve
    }

    fn priority(&self) -> u8 {
        20
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

    #[tokio::test]
    async fn test_cap_counts_existing_position() {
        let order = Order::new(
            "id".to_string(),
            "s1".to_string(),
            "AAPL".to_string(),
            OrderSide::Buy,
            dec!(60),
            OrderType::Market,
            None,
            TimeInForce::Day,
        );
        let mut positions = HashMap::new();
        let mut long = Position::flat("AAPL");
        long.qty = dec!(50);
        positions.insert("AAPL".to_string(), long);
        let prices = HashMap::new();
        let limits = RiskLimits {
            max_pos_per_symbol: dec!(100),
            ..Default::default()
        };
        let ctx = ValidationContext {
            order: &order,
            positions: &positions,
            prices: &prices,
            portfolio_value: dec!(100000),
            existing_exposure: Decimal::ZERO,
            planned_exposure: Decimal::ZERO,
            drawdown_today: Decimal::ZERO,
            breaker_state: BreakerState::Open,
            limits: &limits,
        };

        // 50 + 60 = 110 > 100
        let result = PositionCapValidator.validate(&ctx).await;
        assert!(result.is_rejected());
    }
}
