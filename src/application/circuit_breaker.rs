use crate::domain::circuit::{BreakerRecord, BreakerState, TripReason};
use crate::domain::ports::CoordinationStore;
use crate::infrastructure::observability::Metrics;
use anyhow::Result;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const BREAKER_KEY: &str = "cb:state";
const CAS_ATTEMPTS: usize = 5;

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Quiet-period cool-down before entries resume.
    pub cooldown: Duration,
    /// Auto-trip when today's drawdown is at or below `-max_drawdown`.
    pub max_drawdown: Decimal,
    /// Auto-trip when market data is older than this.
    pub max_data_age: Duration,
    /// Auto-trip when this many broker errors land inside the error window.
    pub broker_error_threshold: i64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(600),
            max_drawdown: Decimal::new(5, 2),
            max_data_age: Duration::from_secs(30 * 60),
            broker_error_threshold: 10,
        }
    }
}

/// Inputs for the all-clear evaluation guarding `TRIPPED -> QUIET_PERIOD`.
#[derive(Debug, Clone, Copy)]
pub struct AllClear {
    pub drawdown_recovered: bool,
    pub data_fresh: bool,
    pub broker_healthy: bool,
}

impl AllClear {
    pub fn holds(&self) -> bool {
        self.drawdown_recovered && self.data_fresh && self.broker_healthy
    }
}

/// Client for the process-wide circuit breaker record in the coordination
/// store.
///
/// Reads are lock-free (one GET, eventual within a polling interval).
/// Transitions are serialized by compare-and-set on the raw JSON value, so
/// concurrent trips lose safely and concurrent resets leave one winner.
#[derive(Clone)]
pub struct CircuitBreakerClient {
    store: Arc<dyn CoordinationStore>,
    config: BreakerConfig,
    metrics: Metrics,
}

impl CircuitBreakerClient {
    pub fn new(store: Arc<dyn CoordinationStore>, config: BreakerConfig, metrics: Metrics) -> Self {
        Self {
            store,
            config,
            metrics,
        }
    }

    async fn read_raw(&self) -> Result<Option<String>> {
        match self.store.get(BREAKER_KEY).await {
            Ok(raw) => {
                // Any succeeding worker clears the staleness sentinel.
                self.metrics.coordination_read_failed.set(0.0);
                Ok(raw)
            }
            Err(e) => {
                self.metrics.coordination_read_failed.set(1.0);
                error!("CircuitBreaker: Failed to read state from coordination store: {}", e);
                Err(e)
            }
        }
    }

    /// Current breaker record. A missing key reads as the open default.
    pub async fn current(&self) -> Result<BreakerRecord> {
        let record = match self.read_raw().await? {
            Some(raw) => serde_json::from_str(&raw)?,
            None => BreakerRecord::open(),
        };
        self.publish_gauges(&record);
        Ok(record)
    }

    /// State for gating decisions. An unreadable store fails closed: callers
    /// see `TRIPPED` and block entries until the store recovers.
    pub async fn state_or_tripped(&self) -> BreakerState {
        match self.current().await {
            Ok(record) => record.state,
            Err(_) => BreakerState::Tripped,
        }
    }

    fn publish_gauges(&self, record: &BreakerRecord) {
        self.metrics.set_breaker_state(record.state);
        self.metrics
            .circuit_breaker_trips_today
            .set(record.trip_count_today as f64);
    }

    async fn swap(
        &self,
        old_raw: Option<&str>,
        next: &BreakerRecord,
    ) -> Result<bool> {
        let new_raw = serde_json::to_string(next)?;
        self.store
            .compare_and_set(BREAKER_KEY, old_raw, &new_raw)
            .await
    }

    /// Trip the breaker. Safe under contention: if another worker trips
    /// first, that record stands and this call reports it.
    pub async fn trip(
        &self,
        reason: TripReason,
        details: impl Into<String>,
        actor: &str,
    ) -> Result<BreakerRecord> {
        let details = details.into();
        for _ in 0..CAS_ATTEMPTS {
            let raw = self.read_raw().await?;
            let current: BreakerRecord = match raw.as_deref() {
                Some(json) => serde_json::from_str(json)?,
                None => BreakerRecord::open(),
            };
            if current.state == BreakerState::Tripped {
                info!(
                    "CircuitBreaker: Already tripped ({})",
                    current.trip_details.as_deref().unwrap_or("-")
                );
                self.publish_gauges(&current);
                return Ok(current);
            }
            let next = current.trip(reason, details.clone());
            if self.swap(raw.as_deref(), &next).await? {
                warn!(
                    "CircuitBreaker: OPEN -> TRIPPED by {} (reason: {}, details: {})",
                    actor, reason, details
                );
                self.publish_gauges(&next);
                return Ok(next);
            }
            // Lost the race; re-read and retry.
        }
        anyhow::bail!("Circuit breaker trip lost {} consecutive CAS races", CAS_ATTEMPTS)
    }

    /// `TRIPPED -> QUIET_PERIOD`. Requires a manual approval (the caller has
    /// already verified step-up evidence) and all-clear conditions.
    pub async fn approve_reset(&self, actor: &str, all_clear: AllClear) -> Result<BreakerRecord> {
        if !all_clear.holds() {
            anyhow::bail!(
                "All-clear conditions not met (drawdown_recovered={}, data_fresh={}, broker_healthy={})",
                all_clear.drawdown_recovered,
                all_clear.data_fresh,
                all_clear.broker_healthy
            );
        }
        let raw = self.read_raw().await?;
        let current: BreakerRecord = match raw.as_deref() {
            Some(json) => serde_json::from_str(json)?,
            None => BreakerRecord::open(),
        };
        if current.state != BreakerState::Tripped {
            anyhow::bail!("Reset requires TRIPPED state, breaker is {}", current.state);
        }
        let next = current.into_quiet_period(actor);
        if self.swap(raw.as_deref(), &next).await? {
            info!("CircuitBreaker: TRIPPED -> QUIET_PERIOD approved by {}", actor);
            self.publish_gauges(&next);
            Ok(next)
        } else {
            // One winner per reset; the loser sees the race and backs off.
            anyhow::bail!("Concurrent breaker transition won the reset race")
        }
    }

    /// Advance `QUIET_PERIOD -> OPEN` once the cool-down has elapsed and the
    /// all-clear still holds. Called from the breaker tick loop.
    pub async fn tick(&self, all_clear: AllClear) -> Result<Option<BreakerRecord>> {
        let raw = self.read_raw().await?;
        let current: BreakerRecord = match raw.as_deref() {
            Some(json) => serde_json::from_str(json)?,
            None => return Ok(None),
        };
        if current.state != BreakerState::QuietPeriod {
            return Ok(None);
        }
        let Some(reset_at) = current.reset_at else {
            return Ok(None);
        };
        let elapsed = Utc::now().signed_duration_since(reset_at);
        if elapsed.num_seconds() < self.config.cooldown.as_secs() as i64 {
            return Ok(None);
        }
        if !all_clear.holds() {
            // Conditions degraded during the cool-down; fall back to TRIPPED.
            let next = current.trip(
                TripReason::Manual,
                "all-clear lost during quiet period",
            );
            if self.swap(raw.as_deref(), &next).await? {
                warn!("CircuitBreaker: QUIET_PERIOD -> TRIPPED (all-clear lost)");
                self.publish_gauges(&next);
                return Ok(Some(next));
            }
            return Ok(None);
        }
        let next = current.reopen();
        if self.swap(raw.as_deref(), &next).await? {
            info!(
                "CircuitBreaker: QUIET_PERIOD -> OPEN after {}s cool-down",
                self.config.cooldown.as_secs()
            );
            self.publish_gauges(&next);
            Ok(Some(next))
        } else {
            Ok(None)
        }
    }

    /// Evaluate auto-trip conditions against live observations; trips with
    /// the matching reason when one is breached.
    pub async fn check_auto_trip(
        &self,
        drawdown_today: Decimal,
        data_age: Option<Duration>,
        broker_errors_in_window: i64,
    ) -> Result<Option<BreakerRecord>> {
        if self.state_or_tripped().await == BreakerState::Tripped {
            return Ok(None);
        }
        if drawdown_today <= -self.config.max_drawdown {
            let record = self
                .trip(
                    TripReason::Drawdown,
                    format!("portfolio drawdown {} breached threshold", drawdown_today),
                    "monitor",
                )
                .await?;
            return Ok(Some(record));
        }
        if let Some(age) = data_age {
            if age > self.config.max_data_age {
                let record = self
                    .trip(
                        TripReason::DataStaleness,
                        format!("market data {}s old", age.as_secs()),
                        "monitor",
                    )
                    .await?;
                return Ok(Some(record));
            }
        }
        if broker_errors_in_window >= self.config.broker_error_threshold {
            let record = self
                .trip(
                    TripReason::BrokerErrors,
                    format!("{} broker errors in window", broker_errors_in_window),
                    "monitor",
                )
                .await?;
            return Ok(Some(record));
        }
        Ok(None)
    }

    /// Record one broker error into the shared error window counter.
    pub async fn record_broker_error(&self) -> Result<i64> {
        self.store
            .incr_with_ttl("cb:broker_errors", Duration::from_secs(300))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::coordination::InMemoryCoordinationStore;
    use rust_decimal_macros::dec;

    fn client() -> (CircuitBreakerClient, Arc<InMemoryCoordinationStore>) {
        let store = Arc::new(InMemoryCoordinationStore::new());
        let client = CircuitBreakerClient::new(
            store.clone(),
            BreakerConfig {
                cooldown: Duration::from_secs(0),
                ..Default::default()
            },
            Metrics::default(),
        );
        (client, store)
    }

    fn all_clear() -> AllClear {
        AllClear {
            drawdown_recovered: true,
            data_fresh: true,
            broker_healthy: true,
        }
    }

    #[tokio::test]
    async fn test_default_state_is_open() {
        let (client, _) = client();
        let record = client.current().await.unwrap();
        assert_eq!(record.state, BreakerState::Open);
    }

    #[tokio::test]
    async fn test_trip_and_full_reset_cycle() {
        let (client, _) = client();
        let tripped = client
            .trip(TripReason::Drawdown, "dd -6%", "test")
            .await
            .unwrap();
        assert_eq!(tripped.state, BreakerState::Tripped);
        assert_eq!(tripped.trip_count_today, 1);

        let quiet = client.approve_reset("ops", all_clear()).await.unwrap();
        assert_eq!(quiet.state, BreakerState::QuietPeriod);

        // Zero cool-down in tests: tick reopens immediately
        let reopened = client.tick(all_clear()).await.unwrap().unwrap();
        assert_eq!(reopened.state, BreakerState::Open);
        assert_eq!(reopened.trip_count_today, 1);
    }

    #[tokio::test]
    async fn test_double_trip_keeps_first_record() {
        let (client, _) = client();
        client
            .trip(TripReason::Manual, "first", "a")
            .await
            .unwrap();
        let second = client
            .trip(TripReason::Manual, "second", "b")
            .await
            .unwrap();
        assert_eq!(second.trip_details.as_deref(), Some("first"));
        assert_eq!(second.trip_count_today, 1);
    }

    #[tokio::test]
    async fn test_reset_requires_all_clear() {
        let (client, _) = client();
        client.trip(TripReason::Manual, "x", "a").await.unwrap();
        let not_clear = AllClear {
            drawdown_recovered: true,
            data_fresh: false,
            broker_healthy: true,
        };
        assert!(client.approve_reset("ops", not_clear).await.is_err());
    }

    #[tokio::test]
    async fn test_unreadable_store_fails_closed() {
        let (client, store) = client();
        store.set_failing(true);
        assert_eq!(client.state_or_tripped().await, BreakerState::Tripped);
        store.set_failing(false);
        assert_eq!(client.state_or_tripped().await, BreakerState::Open);
    }

    #[tokio::test]
    async fn test_auto_trip_on_drawdown() {
        let (client, _) = client();
        let record = client
            .check_auto_trip(dec!(-0.06), None, 0)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.trip_reason, Some(TripReason::Drawdown));
    }

    #[tokio::test]
    async fn test_auto_trip_on_stale_data() {
        let (client, _) = client();
        let record = client
            .check_auto_trip(dec!(0), Some(Duration::from_secs(31 * 60)), 0)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.trip_reason, Some(TripReason::DataStaleness));
    }

    #[tokio::test]
    async fn test_no_auto_trip_when_healthy() {
        let (client, _) = client();
        let record = client
            .check_auto_trip(dec!(-0.01), Some(Duration::from_secs(60)), 1)
            .await
            .unwrap();
        assert!(record.is_none());
    }
}
