use std::env;

/// Broker endpoint and credentials. The vendor only needs to honor the
/// client-order-id contract; no specific broker is assumed.
#[derive(Debug, Clone)]
pub struct BrokerEnvConfig {
    pub base_url: String,
    pub api_token: String,
    pub webhook_secret: String,
}

impl BrokerEnvConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: env::var("BROKER_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:9100".to_string()),
            api_token: env::var("BROKER_API_TOKEN").unwrap_or_default(),
            webhook_secret: env::var("BROKER_WEBHOOK_SECRET")
                .unwrap_or_else(|_| "dev-webhook-secret".to_string()),
        }
    }
}
