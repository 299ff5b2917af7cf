use crate::domain::audit::AuditEvent;
use crate::domain::ports::{BrokerService, CoordinationStore, ReconcileStatus};
use crate::domain::repositories::{
    AuditRepository, OrderRepository, PositionRepository, ReconcileSnapshotRepository,
};
use crate::domain::trading::types::{Order, OrderStatus, Position, TimeInForce};
use crate::infrastructure::observability::Metrics;
use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub interval: Duration,
    /// Rows younger than this are left alone; they may simply be in flight.
    pub grace_period: Duration,
    /// Non-terminal orders older than this get a cancel attempt.
    pub stale_order_age: Duration,
    /// Position drift below this quantity is ignored.
    pub position_threshold: Decimal,
    /// Services whose reconciled gate this instance controls.
    pub services: Vec<String>,
    /// Boot retries before giving up and paging.
    pub boot_attempts: u32,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(180),
            grace_period: Duration::from_secs(60),
            stale_order_age: Duration::from_secs(15 * 60),
            position_threshold: Decimal::new(1, 4),
            services: vec![
                "signals".to_string(),
                "risk".to_string(),
                "execution".to_string(),
            ],
            boot_attempts: 5,
        }
    }
}

/// Summary of one reconcile pass, persisted as a snapshot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub orders_closed: u32,
    pub shadows_ingested: u32,
    pub stale_cancel_attempts: u32,
    pub positions_healed: u32,
    pub gate_set: bool,
}

/// Diffs durable-store state against broker truth and heals.
///
/// Never mutates a position without explicit diff evidence; a failed pass
/// leaves every gate unset so services refuse write traffic.
pub struct Reconciler {
    orders: Arc<dyn OrderRepository>,
    positions: Arc<dyn PositionRepository>,
    broker: Arc<dyn BrokerService>,
    snapshots: Arc<dyn ReconcileSnapshotRepository>,
    audit: Arc<dyn AuditRepository>,
    store: Arc<dyn CoordinationStore>,
    config: ReconcilerConfig,
    metrics: Metrics,
}

impl Reconciler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        positions: Arc<dyn PositionRepository>,
        broker: Arc<dyn BrokerService>,
        snapshots: Arc<dyn ReconcileSnapshotRepository>,
        audit: Arc<dyn AuditRepository>,
        store: Arc<dyn CoordinationStore>,
        config: ReconcilerConfig,
        metrics: Metrics,
    ) -> Self {
        Self {
            orders,
            positions,
            broker,
            snapshots,
            audit,
            store,
            config,
            metrics,
        }
    }

    fn gate_key(service: &str) -> String {
        format!("reconciled:{}", service)
    }

    /// Whether the reconciled gate is set for a service. Services must not
    /// accept write traffic while their gate is unset.
    pub async fn gate_is_set(store: &dyn CoordinationStore, service: &str) -> bool {
        matches!(store.get(&Self::gate_key(service)).await, Ok(Some(v)) if v == "1")
    }

    async fn set_gates(&self) -> Result<()> {
        // Gates expire on their own if the reconciler stops running.
        let ttl = self.config.interval * 3;
        for service in &self.config.services {
            self.store
                .set_with_ttl(&Self::gate_key(service), "1", ttl)
                .await
                .with_context(|| format!("Failed to set reconciled gate for {}", service))?;
            self.metrics.set_reconciled_gate(service, true);
        }
        Ok(())
    }

    async fn clear_gates(&self) {
        for service in &self.config.services {
            if let Err(e) = self.store.delete(&Self::gate_key(service)).await {
                error!("Reconciler: Failed to clear gate for {}: {}", service, e);
            }
            self.metrics.set_reconciled_gate(service, false);
        }
    }

    async fn write_audit(&self, action: &str, outcome: &str, details: serde_json::Value) {
        let event = AuditEvent::new("reconcile", "reconciler", action, outcome, details);
        if let Err(e) = self.audit.append(&event).await {
            error!("Reconciler: Failed to write audit event: {}", e);
        }
    }

    /// One reconcile pass. Idempotent: re-running against an already-healed
    /// store produces an empty diff.
    pub async fn reconcile_once(&self) -> Result<ReconcileReport> {
        let started = Utc::now();
        info!("Reconciler: Pass started");

        let broker_orders = self
            .broker
            .open_orders()
            .await
            .map_err(|e| anyhow::anyhow!("broker open orders: {}", e))?;
        let broker_positions = self
            .broker
            .positions()
            .await
            .map_err(|e| anyhow::anyhow!("broker positions: {}", e))?;
        let ds_open = self.orders.open_orders().await?;

        let mut report = ReconcileReport::default();
        let broker_by_id: HashMap<&str, _> = broker_orders
            .iter()
            .map(|o| (o.broker_order_id.as_str(), o))
            .collect();
        let grace_cutoff = started
            - chrono::Duration::from_std(self.config.grace_period)
                .unwrap_or_else(|_| chrono::Duration::seconds(60));

        // --- DS non-terminal orders missing at the broker ---
        for order in &ds_open {
            if order.updated_at > grace_cutoff {
                continue;
            }
            let Some(broker_id) = &order.broker_order_id else {
                // Claimed row that never reached the broker and aged out.
                self.orders
                    .transition(&order.client_order_id, OrderStatus::Canceled)
                    .await?;
                self.write_audit(
                    "reconcile_missing",
                    "canceled",
                    serde_json::json!({ "client_order_id": order.client_order_id }),
                )
                .await;
                report.orders_closed += 1;
                continue;
            };
            if broker_by_id.contains_key(broker_id.as_str()) {
                continue;
            }
            // Not in the broker's open set: adopt its terminal status, or
            // cancel if the broker no longer knows it.
            match self.broker.get_order(broker_id).await {
                Ok(Some(remote)) if remote.status.is_terminal() => {
                    self.orders
                        .transition(&order.client_order_id, remote.status)
                        .await?;
                    self.write_audit(
                        "reconcile_missing",
                        "adopted_terminal_status",
                        serde_json::json!({
                            "client_order_id": order.client_order_id,
                            "status": remote.status.to_string(),
                        }),
                    )
                    .await;
                    report.orders_closed += 1;
                }
                Ok(Some(_)) => {
                    // Broker still tracks it as live; leave it alone.
                }
                Ok(None) => {
                    self.orders
                        .transition(&order.client_order_id, OrderStatus::Canceled)
                        .await?;
                    self.write_audit(
                        "reconcile_missing",
                        "canceled",
                        serde_json::json!({ "client_order_id": order.client_order_id }),
                    )
                    .await;
                    report.orders_closed += 1;
                }
                Err(e) => {
                    warn!(
                        "Reconciler: Broker lookup failed for {}: {}",
                        broker_id, e
                    );
                }
            }
        }

        // --- Broker open orders unknown to the DS: ingest shadows ---
        for remote in &broker_orders {
            let known = self
                .orders
                .get_by_broker_id(&remote.broker_order_id)
                .await?
                .is_some()
                || match &remote.client_order_id {
                    Some(client_id) => self.orders.get(client_id).await?.is_some(),
                    None => false,
                };
            if known {
                continue;
            }
            warn!(
                "Reconciler: Broker order {} unknown to durable store; ingesting shadow",
                remote.broker_order_id
            );
            let mut shadow = Order::new(
                remote
                    .client_order_id
                    .clone()
                    .unwrap_or_else(|| format!("shadow-{}", remote.broker_order_id)),
                "reconciled_ingest".to_string(),
                remote.symbol.clone(),
                remote.side,
                remote.qty,
                crate::domain::trading::types::OrderType::Market,
                None,
                TimeInForce::Day,
            );
            shadow.broker_order_id = Some(remote.broker_order_id.clone());
            shadow.status = remote.status;
            shadow.filled_qty = remote.filled_qty;
            shadow.avg_fill_price = remote.avg_fill_price;
            shadow.submitted_at = remote.submitted_at;
            self.orders.insert_shadow(&shadow).await?;
            self.write_audit(
                "reconciled_ingest",
                "shadow_inserted",
                serde_json::json!({
                    "broker_order_id": remote.broker_order_id,
                    "symbol": remote.symbol,
                }),
            )
            .await;
            report.shadows_ingested += 1;
        }

        // --- Aged non-terminal orders: attempt cancel ---
        let stale_cutoff = started
            - chrono::Duration::from_std(self.config.stale_order_age)
                .unwrap_or_else(|_| chrono::Duration::minutes(15));
        for order in &ds_open {
            if order.created_at > stale_cutoff {
                continue;
            }
            if let Some(broker_id) = &order.broker_order_id {
                if let Err(e) = self.broker.cancel_order(broker_id).await {
                    warn!(
                        "Reconciler: Stale cancel attempt failed for {}: {}",
                        order.client_order_id, e
                    );
                }
                self.write_audit(
                    "anomaly",
                    "stale_order_cancel",
                    serde_json::json!({ "client_order_id": order.client_order_id }),
                )
                .await;
                report.stale_cancel_attempts += 1;
            }
        }

        // --- Position drift: heal DS to broker truth ---
        let ds_positions: HashMap<String, Position> = self
            .positions
            .all()
            .await?
            .into_iter()
            .map(|p| (p.symbol.clone(), p))
            .collect();
        let mut broker_symbols: HashMap<String, Decimal> = HashMap::new();
        for remote in &broker_positions {
            broker_symbols.insert(remote.symbol.clone(), remote.qty);
            let ds_qty = ds_positions
                .get(&remote.symbol)
                .map(|p| p.qty)
                .unwrap_or(Decimal::ZERO);
            if (remote.qty - ds_qty).abs() > self.config.position_threshold {
                warn!(
                    "Reconciler: Position drift for {}: DS {} vs broker {}; healing",
                    remote.symbol, ds_qty, remote.qty
                );
                let healed = Position {
                    symbol: remote.symbol.clone(),
                    qty: remote.qty,
                    avg_entry_price: remote.avg_entry_price,
                    updated_at: Utc::now(),
                };
                self.positions.upsert(&healed).await?;
                self.write_audit(
                    "reconcile_heal",
                    "position_healed",
                    serde_json::json!({
                        "symbol": remote.symbol,
                        "ds_qty": ds_qty.to_string(),
                        "broker_qty": remote.qty.to_string(),
                    }),
                )
                .await;
                report.positions_healed += 1;
            }
        }
        // DS positions the broker no longer reports shrink to flat.
        for (symbol, position) in &ds_positions {
            if broker_symbols.contains_key(symbol) || position.qty.abs() <= self.config.position_threshold
            {
                continue;
            }
            warn!(
                "Reconciler: DS holds {} x{} but broker reports flat; healing to zero",
                symbol, position.qty
            );
            let healed = Position::flat(symbol);
            self.positions.upsert(&healed).await?;
            self.write_audit(
                "reconcile_heal",
                "position_flattened",
                serde_json::json!({ "symbol": symbol, "ds_qty": position.qty.to_string() }),
            )
            .await;
            report.positions_healed += 1;
        }

        // --- Gate + snapshot ---
        self.set_gates().await?;
        report.gate_set = true;

        let snapshot = serde_json::json!({
            "started_at": started.to_rfc3339(),
            "broker_open_orders": broker_orders.len(),
            "broker_positions": broker_positions.len(),
            "ds_open_orders": ds_open.len(),
            "report": serde_json::to_value(&report)?,
        });
        self.snapshots.append(&snapshot, "ok").await?;
        self.metrics
            .reconcile_runs_total
            .with_label_values(&["ok"])
            .inc();

        info!(
            "Reconciler: Pass complete (closed {}, shadows {}, stale {}, healed {})",
            report.orders_closed,
            report.shadows_ingested,
            report.stale_cancel_attempts,
            report.positions_healed
        );
        Ok(report)
    }

    /// Boot-time reconcile with backoff. The gates stay unset until a pass
    /// succeeds, so no service accepts writes against unverified state.
    pub async fn reconcile_on_boot(&self) -> Result<ReconcileReport> {
        let mut delay = Duration::from_secs(1);
        for attempt in 1..=self.config.boot_attempts {
            match self.reconcile_once().await {
                Ok(report) => return Ok(report),
                Err(e) => {
                    self.metrics
                        .reconcile_runs_total
                        .with_label_values(&["failed"])
                        .inc();
                    error!(
                        "Reconciler: Boot pass {}/{} failed: {}",
                        attempt, self.config.boot_attempts, e
                    );
                    self.clear_gates().await;
                    if attempt < self.config.boot_attempts {
                        tokio::time::sleep(delay).await;
                        delay = (delay * 2).min(Duration::from_secs(60));
                    }
                }
            }
        }
        let snapshot = serde_json::json!({ "boot_attempts": self.config.boot_attempts });
        let _ = self.snapshots.append(&snapshot, "boot_failed").await;
        anyhow::bail!(
            "Boot reconciliation failed after {} attempts; gates remain unset",
            self.config.boot_attempts
        )
    }

    /// Interval loop. A failed pass clears the gates and the next success
    /// restores them.
    pub async fn run(self: Arc<Self>) {
        info!(
            "Reconciler: Interval loop started ({:?})",
            self.config.interval
        );
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = self.reconcile_once().await {
                self.metrics
                    .reconcile_runs_total
                    .with_label_values(&["failed"])
                    .inc();
                error!("Reconciler: Pass failed: {}", e);
                self.clear_gates().await;
            }
        }
    }

    pub async fn status(&self) -> Result<ReconcileStatus> {
        let gate_set = Self::gate_is_set(self.store.as_ref(), "execution").await;
        let latest = self.snapshots.latest().await?;
        Ok(ReconcileStatus {
            gate_set,
            last_outcome: latest.as_ref().map(|(_, _, outcome)| outcome.clone()),
            last_run_at: latest.map(|(at, _, _)| at),
        })
    }
}
