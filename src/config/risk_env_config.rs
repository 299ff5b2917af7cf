use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;

fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Invalid {}: {}", key, e)),
        Err(_) => Ok(default),
    }
}

/// Circuit breaker thresholds and destructive-action policy.
#[derive(Debug, Clone)]
pub struct RiskEnvConfig {
    /// Auto-trip at or below this drawdown (0.05 = -5%).
    pub cb_max_drawdown: Decimal,
    /// Auto-trip when market data is older than this many seconds.
    pub cb_max_data_age_secs: u64,
    /// Auto-trip at this many broker errors inside the error window.
    pub cb_broker_error_threshold: i64,
    /// QUIET_PERIOD cool-down before entries resume.
    pub cb_cooldown_secs: u64,
    /// Minimum reason length for destructive operations.
    pub min_reason_len: usize,
    /// Destructive action limit per window per user.
    pub rate_limit_max: i64,
    pub rate_limit_window_secs: u64,
    /// Coordination-store outage policy for the limiter; production keeps
    /// the fail-closed default.
    pub rate_limit_fail_open: bool,
    pub step_up_secret: String,
    pub step_up_max_age_secs: i64,
}

impl RiskEnvConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            cb_max_drawdown: env_parse("CB_MAX_DRAWDOWN", Decimal::new(5, 2))
                .context("Failed to parse CB_MAX_DRAWDOWN")?,
            cb_max_data_age_secs: env_parse("CB_MAX_DATA_AGE_SECS", 1800)?,
            cb_broker_error_threshold: env_parse("CB_BROKER_ERROR_THRESHOLD", 10)?,
            cb_cooldown_secs: env_parse("CB_COOLDOWN_SECS", 600)?,
            min_reason_len: env_parse("DESTRUCTIVE_MIN_REASON_LEN", 10)?,
            rate_limit_max: env_parse("RATE_LIMIT_MAX", 1)?,
            rate_limit_window_secs: env_parse("RATE_LIMIT_WINDOW_SECS", 300)?,
            rate_limit_fail_open: env_parse("RATE_LIMIT_FAIL_OPEN", false)?,
            step_up_secret: env::var("STEP_UP_SECRET")
                .unwrap_or_else(|_| "dev-step-up-secret".to_string()),
            step_up_max_age_secs: env_parse("STEP_UP_MAX_AGE_SECS", 300)?,
        })
    }
}
