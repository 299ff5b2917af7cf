use tracing::{debug, warn};

use crate::domain::risk::filters::{
    BlacklistValidator, CircuitBreakerValidator, DailyLossValidator, NotionalValidator,
    PositionCapValidator, RiskValidator, ValidationContext, ValidationResult,
};

/// Runs the pre-trade validators in priority order with a fail-fast policy:
/// the first rejection stops the pipeline for that order.
pub struct RiskValidationPipeline {
    validators: Vec<Box<dyn RiskValidator>>,
}

impl RiskValidationPipeline {
    pub fn new(validators: Vec<Box<dyn RiskValidator>>) -> Self {
        let mut sorted = validators;
        sorted.sort_by_key(|v| v.priority());
        Self { validators: sorted }
    }

    /// The standard check chain: breaker gate, blacklist, per-symbol cap,
    /// gross notional, daily loss.
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(CircuitBreakerValidator),
            Box::new(BlacklistValidator),
            Box::new(PositionCapValidator),
            Box::new(NotionalValidator),
            Box::new(DailyLossValidator),
        ])
    }

    pub async fn validate(&self, ctx: &ValidationContext<'_>) -> ValidationResult {
        for validator in &self.validators {
            match validator.validate(ctx).await {
                ValidationResult::Reject { code, reason } => {
                    warn!(
                        "RiskPipeline: {} rejected {} {} x{}: {}",
                        validator.name(),
                        ctx.order.side,
                        ctx.order.symbol,
                        ctx.order.qty,
                        reason
                    );
                    return ValidationResult::Reject { code, reason };
                }
                ValidationResult::Approve => {
                    debug!("RiskPipeline: {} passed", validator.name());
                }
            }
        }
        ValidationResult::Approve
    }

    pub fn validator_names(&self) -> Vec<&str> {
        self.validators.iter().map(|v| v.name()).collect()
    }
}
