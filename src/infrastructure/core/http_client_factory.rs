use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use std::time::Duration;

pub struct HttpClientFactory;

impl HttpClientFactory {
    /// Client with transient-retry middleware, for idempotent reads and
    /// cancels.
    pub fn create_client() -> ClientWithMiddleware {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);

        ClientBuilder::new(Self::base_client())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build()
    }

    /// Client without middleware retries. Order submission owns its own
    /// retry policy (same-id timeout retry, bounded backoff), so stacking a
    /// second retry layer underneath it would multiply broker calls.
    pub fn create_submit_client() -> ClientWithMiddleware {
        ClientBuilder::new(Self::base_client()).build()
    }

    fn base_client() -> Client {
        Client::builder()
            .pool_max_idle_per_host(5)
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new())
    }
}
