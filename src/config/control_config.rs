use anyhow::{Context, Result};
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

/// Cadences, pipeline universe, and split-deployment service URLs.
#[derive(Debug, Clone)]
pub struct ControlEnvConfig {
    pub strategy_id: String,
    pub universe: Vec<String>,
    pub min_universe: usize,
    pub top_n: usize,
    pub model_reload_interval_secs: u64,
    pub reconcile_interval_secs: u64,
    pub sweep_interval_secs: u64,
    pub stale_order_ttl_secs: u64,
    pub broker_deadline_secs: u64,
    pub broker_submit_max_attempts: u32,
    pub fill_deadline_secs: u64,
    /// Set these to reach remote services over HTTP; unset keeps everything
    /// in-process.
    pub signal_url: Option<String>,
    pub risk_url: Option<String>,
    pub execution_url: Option<String>,
}

impl ControlEnvConfig {
    pub fn from_env() -> Result<Self> {
        let universe = env::var("UNIVERSE")
            .unwrap_or_else(|_| "AAPL,MSFT,GOOGL".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        Ok(Self {
            strategy_id: env::var("STRATEGY_ID").unwrap_or_else(|_| "default".to_string()),
            universe,
            min_universe: env_parse("MIN_SIGNAL_UNIVERSE", 2)
                .context("Failed to parse MIN_SIGNAL_UNIVERSE")?,
            top_n: env_parse("TOP_N", 1)?,
            model_reload_interval_secs: env_parse("MODEL_RELOAD_INTERVAL_SECS", 300)?,
            reconcile_interval_secs: env_parse("RECONCILE_INTERVAL_SECS", 180)?,
            sweep_interval_secs: env_parse("SWEEP_INTERVAL_SECS", 300)?,
            stale_order_ttl_secs: env_parse("STALE_ORDER_TTL_SECS", 900)?,
            broker_deadline_secs: env_parse("BROKER_DEADLINE_SECS", 10)?,
            broker_submit_max_attempts: env_parse("BROKER_SUBMIT_MAX_ATTEMPTS", 5)?,
            fill_deadline_secs: env_parse("FILL_DEADLINE_SECS", 120)?,
            signal_url: env::var("SIGNAL_SERVICE_URL").ok(),
            risk_url: env::var("RISK_SERVICE_URL").ok(),
            execution_url: env::var("EXECUTION_SERVICE_URL").ok(),
        })
    }
}
