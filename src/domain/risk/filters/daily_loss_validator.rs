use async_trait::async_trait;
use rust_decimal_macros::dec;

use crate::domain::errors::RiskRejectionKind;
use crate::domain::risk::filters::validator_trait::{
    RejectCode, RiskValidator, ValidationContext, ValidationResult,
};

/// Blocks the plan once today's drawdown breaches the daily loss limit.
pub struct DailyLossValidator;

#[async_trait]
impl RiskValidator for DailyLossValidator {
    fn name(&self) -> &str {
        "DailyLossValidator"
    }

    async fn validate(&self, ctx: &ValidationContext<'_>) -> ValidationResult {
        if ctx.drawdown_today < -ctx.limits.daily_loss_limit {
            return ValidationResult::reject(
                RejectCode::Risk(RiskRejectionKind::DailyLoss),
                format!(
                    "Daily drawdown {}% breaches limit {}%",
                    ctx.drawdown_today * dec!(100),
                    ctx.limits.daily_loss_limit * dec!(100)
                ),
            );
        }
        ValidationResult::Approve
    }

    fn priority(&self) -> u8 {
        40
    }
}
