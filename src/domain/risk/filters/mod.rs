pub mod blacklist_validator;
pub mod circuit_breaker_validator;
pub mod daily_loss_validator;
pub mod notional_validator;
pub mod position_cap_validator;
pub mod validator_trait;

pub use blacklist_validator::BlacklistValidator;
pub use circuit_breaker_validator::CircuitBreakerValidator;
pub use daily_loss_validator::DailyLossValidator;
pub use notional_validator::NotionalValidator;
pub use position_cap_validator::PositionCapValidator;
pub use validator_trait::{RejectCode, RiskValidator, ValidationContext, ValidationResult};
