use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::domain::circuit::BreakerState;
use crate::domain::errors::RiskRejectionKind;
use crate::domain::risk::limits::RiskLimits;
use crate::domain::trading::types::{Order, Position};

/// Why an order was rejected by the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectCode {
    CircuitBreaker,
    Risk(RiskRejectionKind),
}

/// Result of one risk check.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationResult {
    Approve,
    Reject { code: RejectCode, reason: String },
}

impl ValidationResult {
    pub fn reject(code: RejectCode, reason: impl Into<String>) -> Self {
        ValidationResult::Reject {
            code,
            reason: reason.into(),
        }
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, ValidationResult::Approve)
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, ValidationResult::Reject { .. })
    }

    pub fn rejection_reason(&self) -> Option<&str> {
        match self {
            ValidationResult::Reject { reason, .. } => Some(reason),
            ValidationResult::Approve => None,
        }
    }
}

/// Context shared by every validator while one candidate order is checked.
///
/// Carries everything a check needs so validators stay free of service
/// handles.
#[derive(Debug)]
pub struct ValidationContext<'a> {
    /// The candidate order being validated.
    pub order: &'a Order,
    /// Current positions keyed by symbol.
    pub positions: &'a HashMap<String, Position>,
    /// Reference prices keyed by symbol.
    pub prices: &'a HashMap<String, Decimal>,
    /// Live portfolio value.
    pub portfolio_value: Decimal,
    /// Gross notional of existing positions.
    pub existing_exposure: Decimal,
    /// Gross notional already accepted into the current plan.
    pub planned_exposure: Decimal,
    /// Signed portfolio return today (-0.02 = down 2%).
    pub drawdown_today: Decimal,
    /// Circuit breaker state at plan time.
    pub breaker_state: BreakerState,
    pub limits: &'a RiskLimits,
}

impl<'a> ValidationContext<'a> {
    pub fn current_position_qty(&self) -> Decimal {
        self.positions
            .get(&self.order.symbol)
            .map(|p| p.qty)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn reference_price(&self) -> Decimal {
        self.prices
            .get(&self.order.symbol)
            .copied()
            .or(self.order.limit_price)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn order_notional(&self) -> Decimal {
        (self.order.qty * self.reference_price()).abs()
    }

    /// Whether the candidate strictly reduces the current absolute position.
    pub fn is_reducing(&self) -> bool {
        self.order.is_reducing_against(self.current_position_qty())
    }
}

/// One pre-trade check. Validators run in priority order inside the
/// pipeline; the first rejection wins.
#[async_trait]
pub trait RiskValidator: Send + Sync {
    /// Unique name for logging.
    fn name(&self) -> &str;

    async fn validate(&self, ctx: &ValidationContext<'_>) -> ValidationResult;

    /// Lower runs earlier.
    fn priority(&self) -> u8 {
        100
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::trading::types::{OrderSide, OrderType, TimeInForce};
    use rust_decimal_macros::dec;

    #[test]
    fn test_context_reference_price_falls_back_to_limit() {
        let order = Order::new(
            "id".to_string(),
            "s1".to_string(),
            "AAPL".to_string(),
            OrderSide::Buy,
            dec!(10),
            OrderType::Limit,
            Some(dec!(99)),
            TimeInForce::Day,
        );
        let positions = HashMap::new();
        let prices = HashMap::new();
        let limits = RiskLimits::default();
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
        assert_eq!(ctx.reference_price(), dec!(99));
        assert_eq!(ctx.order_notional(), dec!(990));
    }
}
