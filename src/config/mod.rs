//! Configuration, loaded from environment variables with CLI overrides on
//! top (flag > environment > default).

mod broker_config;
mod control_config;
mod risk_env_config;
mod store_config;

pub use broker_config::BrokerEnvConfig;
pub use control_config::ControlEnvConfig;
pub use risk_env_config::RiskEnvConfig;
pub use store_config::StoreEnvConfig;

use anyhow::{Context, Result};
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    /// `true` (the default) never contacts a real broker: the in-process
    /// mock serves the broker contract.
    pub dry_run: bool,
    pub http_bind: String,
    pub broker: BrokerEnvConfig,
    pub stores: StoreEnvConfig,
    pub risk: RiskEnvConfig,
    pub control: ControlEnvConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let dry_run = match env::var("DRY_RUN") {
            Ok(raw) => raw
                .parse::<bool>()
                .with_context(|| format!("Invalid DRY_RUN: {}", raw))?,
            Err(_) => true,
        };
        Ok(Self {
            dry_run,
            http_bind: env::var("HTTP_BIND").unwrap_or_else(|_| "127.0.0.1:8080".to_string()),
            broker: BrokerEnvConfig::from_env(),
            stores: StoreEnvConfig::from_env(),
            risk: RiskEnvConfig::from_env().context("Failed to load risk config")?,
            control: ControlEnvConfig::from_env().context("Failed to load control config")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_safe() {
        let config = Config::from_env().expect("Should parse with defaults");
        // Dry-run is the default: no broker traffic without explicit opt-out
        assert!(config.dry_run);
        assert!(!config.risk.rate_limit_fail_open);
        assert!(config.control.min_universe >= 1);
    }
}
