use async_trait::async_trait;

use crate::domain::errors::RiskRejectionKind;
use crate::domain::risk::filters::validator_trait::{
    RejectCode, RiskValidator, ValidationContext, ValidationResult,
};

/// Enforces the gross notional ceiling: existing exposure plus the notional
/// already accepted into this plan plus this order must stay within
/// `max_total_notional`.
pub struct NotionalValidator;

#[async_trait]
impl RiskValidator for NotionalValidator {
    fn name(&self) -> &str {
        "NotionalValidator"
    }

    async fn validate(&self, ctx: &ValidationContext<'_>) -> ValidationResult {
        let projected = ctx.existing_exposure + ctx.planned_exposure + ctx.order_notional();
        if projected > ctx.limits.max_total_notional {
            return ValidationResult::reject(
                RejectCode::Risk(RiskRejectionKind::TotalNotional),
                format!(
                    "Projected gross notional {} exceeds cap {}",
                    projected, ctx.limits.max_total_notional
                ),
            );
        }
        ValidationResult::Approve
    }

    fn priority(&self) -> u8 {
        30
    }
}
