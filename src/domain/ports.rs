use crate::domain::errors::ControlPlaneError;
use crate::domain::risk::plan::{OrderIntent, OrderPlan};
use crate::domain::signals::SignalSet;
use crate::domain::trading::types::{Fill, Order, OrderSide, OrderStatus, Position};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::time::Duration;

// ===== Broker =====

/// Broker acknowledgement for a submitted order. `duplicate` is set when the
/// broker reported the client order id as already known (its duplicate
/// indicator), which callers treat as success.
#[derive(Debug, Clone)]
pub struct BrokerAck {
    pub broker_order_id: String,
    pub status: OrderStatus,
    pub duplicate: bool,
}

/// Broker-side view of an order, as returned by open-order and order-query
/// endpoints.
#[derive(Debug, Clone)]
pub struct BrokerOrder {
    pub broker_order_id: String,
    pub client_order_id: Option<String>,
    pub symbol: String,
    pub side: OrderSide,
    pub qty: Decimal,
    pub filled_qty: Decimal,
    pub avg_fill_price: Option<Decimal>,
    pub status: OrderStatus,
    pub submitted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct BrokerPosition {
    pub symbol: String,
    pub qty: Decimal,
    pub avg_entry_price: Decimal,
}

#[derive(Debug, Clone)]
pub struct BrokerAccount {
    pub portfolio_value: Decimal,
    pub buying_power: Decimal,
    pub market_open: bool,
}

/// Broker webhook payload. Fill events carry the immutable fill record;
/// lifecycle events carry only the ids.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BrokerWebhookEvent {
    pub event_type: WebhookEventType,
    pub broker_order_id: String,
    #[serde(default)]
    pub client_order_id: Option<String>,
    #[serde(default)]
    pub fill: Option<WebhookFill>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventType {
    Accepted,
    Fill,
    PartialFill,
    Canceled,
    Rejected,
    Expired,
}

impl WebhookEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookEventType::Accepted => "accepted",
            WebhookEventType::Fill => "fill",
            WebhookEventType::PartialFill => "partial_fill",
            WebhookEventType::Canceled => "canceled",
            WebhookEventType::Rejected => "rejected",
            WebhookEventType::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct WebhookFill {
    pub fill_id: String,
    pub qty: Decimal,
    pub price: Decimal,
    pub fill_time: DateTime<Utc>,
}

/// Outbound broker contract. The vendor must accept a client-supplied unique
/// order id and report duplicates of it as such; everything else is plain
/// REST.
#[async_trait]
pub trait BrokerService: Send + Sync {
    async fn submit_order(&self, order: &Order) -> Result<BrokerAck, ControlPlaneError>;
    async fn cancel_order(&self, broker_order_id: &str) -> Result<(), ControlPlaneError>;
    async fn get_order(
        &self,
        broker_order_id: &str,
    ) -> Result<Option<BrokerOrder>, ControlPlaneError>;
    async fn open_orders(&self) -> Result<Vec<BrokerOrder>, ControlPlaneError>;
    async fn positions(&self) -> Result<Vec<BrokerPosition>, ControlPlaneError>;
    async fn account(&self) -> Result<BrokerAccount, ControlPlaneError>;
}

// ===== Feature source =====

/// Per-symbol feature vectors for one as-of date. Ingestion and adjustment
/// live outside the control plane; only the read contract matters here.
#[async_trait]
pub trait FeatureSource: Send + Sync {
    async fn features(
        &self,
        symbols: &[String],
        as_of: NaiveDate,
    ) -> Result<HashMap<String, HashMap<String, f64>>>;

    /// Timestamp of the freshest row available, used by the data-staleness
    /// breaker condition.
    async fn latest_timestamp(&self) -> Result<Option<DateTime<Utc>>>;
}

/// Last known reference prices, used to translate target weights into
/// quantities.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn last_prices(&self, symbols: &[String]) -> Result<HashMap<String, Decimal>>;
}

// ===== Inter-service ports =====
//
// Each cooperating service is reachable through a port with two adapters:
// an in-process one (serve-all mode, tests) and an HTTP client one (split
// deployment). The orchestrator and the gateway only see the traits.

#[async_trait]
pub trait SignalPort: Send + Sync {
    async fn health(&self) -> Result<bool>;
    async fn generate(
        &self,
        symbols: &[String],
        as_of: NaiveDate,
        top_n: Option<usize>,
    ) -> Result<SignalSet, ControlPlaneError>;
}

#[async_trait]
pub trait RiskPort: Send + Sync {
    async fn plan(
        &self,
        strategy_id: &str,
        as_of: NaiveDate,
        weights: &[(String, Decimal)],
    ) -> Result<OrderPlan, ControlPlaneError>;

    /// Single-order pre-check used by the execution gateway before each
    /// broker call.
    async fn pre_check(&self, order: &Order) -> Result<(), ControlPlaneError>;
}

/// Receipt for an idempotent submission. `duplicate` marks responses served
/// from the existing order row without a broker call.
#[derive(Debug, Clone)]
pub struct SubmitReceipt {
    pub order: Order,
    pub duplicate: bool,
}

#[async_trait]
pub trait ExecutionPort: Send + Sync {
    async fn health(&self) -> Result<bool>;
    async fn submit(&self, intent: &OrderIntent) -> Result<SubmitReceipt, ControlPlaneError>;
    async fn positions(&self) -> Result<Vec<Position>>;
    async fn orders_for_date(&self, date: NaiveDate) -> Result<Vec<Order>>;
    async fn fills_for_date(&self, date: NaiveDate) -> Result<Vec<Fill>>;
}

#[derive(Debug, Clone)]
pub struct ReconcileStatus {
    pub gate_set: bool,
    pub last_outcome: Option<String>,
    pub last_run_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait ReconcilerPort: Send + Sync {
    async fn status(&self) -> Result<ReconcileStatus>;
}

// ===== Coordination store =====

/// Process-wide shared state substrate: breaker record, reconciled gates,
/// rate-limit windows, hot counters. Keys are plain strings, values are
/// JSON or scalar strings.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
    /// Atomically replace `key` only if its current value matches `expected`
    /// (`None` = key absent). Returns whether the swap happened.
    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
    ) -> Result<bool>;
    /// Atomic counter increment; the key expires `ttl` after its first
    /// increment, which backs the rate-limit windows.
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64>;
    async fn delete(&self, key: &str) -> Result<()>;
    /// Fire-and-forget notification fan-out (model reload pings).
    async fn publish(&self, channel: &str, message: &str) -> Result<()>;
}
