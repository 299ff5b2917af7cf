use async_trait::async_trait;

use crate::domain::errors::RiskRejectionKind;
use crate::domain::risk::filters::validator_trait::{
    RejectCode, RiskValidator, ValidationContext, ValidationResult,
};

/// Rejects orders for symbols on the configured blacklist.
pub struct BlacklistValidator;

#[async_trait]
impl RiskValidator for BlacklistValidator {
    fn name(&self) -> &str {
        "BlacklistValidator"
    }

    async fn validate(&self, ctx: &ValidationContext<'_>) -> ValidationResult {
        if ctx.limits.is_blacklisted(&ctx.order.symbol) {
            return ValidationResult::reject(
                RejectCode::Risk(RiskRejectionKind::Blacklist),
                format!("Symbol {} is blacklisted", ctx.order.symbol),
            );
        }
        ValidationResult::Approve
    }

    fn priority(&self) -> u8 {
        10
    }
}
