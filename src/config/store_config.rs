use std::env;

/// Durable and coordination store endpoints. A `memory://` coordination URL
/// selects the in-process store (tests, dry-runs).
#[derive(Debug, Clone)]
pub struct StoreEnvConfig {
    pub database_url: String,
    pub coordination_url: String,
}

impl StoreEnvConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://data/tradeplane.db".to_string()),
            coordination_url: env::var("COORDINATION_URL")
                .unwrap_or_else(|_| "memory://".to_string()),
        }
    }
}
