//! Repository traits over the durable store.
//!
//! The execution gateway owns all order/position/fill writes; other services
//! read. SQLite implementations live in `infrastructure::persistence`.

use crate::domain::audit::AuditEvent;
use crate::domain::model::ModelMetadata;
use crate::domain::risk::RiskLimits;
use crate::domain::run::RunRecord;
use crate::domain::trading::types::{Fill, Order, OrderStatus, Position};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

/// Result of the upsert-if-absent insert that serializes submissions per
/// client order id: only the inserter proceeds to the broker.
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    Inserted,
    Existing(Order),
}

/// Result of applying one fill event atomically.
#[derive(Debug, Clone)]
pub struct FillApplied {
    pub order: Order,
    pub position: Position,
    /// False when the fill id was already recorded — the whole event was a
    /// replay and nothing changed.
    pub applied: bool,
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// `INSERT .. ON CONFLICT DO NOTHING`; reads the existing row back when
    /// the id is already present.
    async fn insert_if_absent(&self, order: &Order) -> Result<InsertOutcome>;

    async fn get(&self, client_order_id: &str) -> Result<Option<Order>>;
    async fn get_by_broker_id(&self, broker_order_id: &str) -> Result<Option<Order>>;

    /// Record broker acceptance: status + broker order id + submitted_at.
    async fn mark_submitted(
        &self,
        client_order_id: &str,
        broker_order_id: &str,
        status: OrderStatus,
    ) -> Result<()>;

    /// Transition to a new status. Illegal transitions (per the lifecycle
    /// DAG) are ignored and return `false`; terminal rows are frozen.
    async fn transition(&self, client_order_id: &str, status: OrderStatus) -> Result<bool>;

    /// Apply a fill: append the fill row, bump `filled_qty`/`avg_fill_price`,
    /// advance the order status (partially_filled or filled, computed from
    /// the fresh row inside the transaction), and update the symbol position
    /// — all one transaction. Replayed fill ids are no-ops.
    async fn apply_fill(&self, fill: &Fill) -> Result<FillApplied>;

    async fn open_orders(&self) -> Result<Vec<Order>>;
    async fn open_orders_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<Order>>;
    async fn orders_for_date(&self, date: NaiveDate) -> Result<Vec<Order>>;
    async fn fills_for_date(&self, date: NaiveDate) -> Result<Vec<Fill>>;

    /// Insert a shadow order discovered at the broker during reconciliation.
    async fn insert_shadow(&self, order: &Order) -> Result<()>;
}

#[async_trait]
pub trait PositionRepository: Send + Sync {
    async fn get(&self, symbol: &str) -> Result<Option<Position>>;
    async fn all(&self) -> Result<Vec<Position>>;
    /// Reconciler heal path: overwrite a position to broker truth.
    async fn upsert(&self, position: &Position) -> Result<()>;
    async fn delete(&self, symbol: &str) -> Result<()>;
}

#[async_trait]
pub trait ModelRegistryRepository: Send + Sync {
    async fn active_for_strategy(&self, strategy_id: &str) -> Result<Option<ModelMetadata>>;
    /// Single transaction: deactivate the currently active row (if any) and
    /// activate `(strategy_id, version)`.
    async fn activate(&self, strategy_id: &str, version: &str) -> Result<()>;
    async fn insert(&self, metadata: &ModelMetadata) -> Result<()>;
}

#[async_trait]
pub trait RunRepository: Send + Sync {
    /// Upsert keyed on run id; returns the stored row, which is the existing
    /// one when the run was already started.
    async fn insert_if_absent(&self, run: &RunRecord) -> Result<RunRecord>;
    async fn get(&self, run_id: &str) -> Result<Option<RunRecord>>;
    async fn update(&self, run: &RunRecord) -> Result<()>;
}

#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn append(&self, event: &AuditEvent) -> Result<()>;
    async fn recent(&self, limit: u32) -> Result<Vec<AuditEvent>>;
}

/// Reconciliation snapshots: inputs, diffs, actions, outcome of each pass.
#[async_trait]
pub trait ReconcileSnapshotRepository: Send + Sync {
    async fn append(&self, snapshot: &serde_json::Value, outcome: &str) -> Result<()>;
    async fn latest(&self) -> Result<Option<(DateTime<Utc>, serde_json::Value, String)>>;
}

#[async_trait]
pub trait RiskLimitsRepository: Send + Sync {
    /// Effective limits for a strategy: per-strategy row merged over the
    /// global row, defaults otherwise.
    async fn effective_for_strategy(&self, strategy_id: &str) -> Result<RiskLimits>;
    async fn upsert(&self, scope: &str, limits: &RiskLimits) -> Result<()>;
}
