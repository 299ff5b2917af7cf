pub mod destructive;
pub mod sweeper;
pub mod webhook;

use crate::application::circuit_breaker::CircuitBreakerClient;
use crate::domain::audit::AuditEvent;
use crate::domain::auth::StepUpVerifier;
use crate::domain::errors::ControlPlaneError;
use crate::domain::ports::{BrokerService, CoordinationStore, RiskPort, SubmitReceipt};
use crate::domain::repositories::{
    AuditRepository, InsertOutcome, OrderRepository, PositionRepository,
};
use crate::domain::risk::plan::OrderIntent;
use crate::domain::trading::types::{Order, OrderStatus, OrderType};
use crate::infrastructure::observability::Metrics;
use rand::Rng;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Deadline on each individual broker submit call.
    pub broker_deadline: Duration,
    /// Cap on broker submit attempts for retriable failures.
    pub broker_max_attempts: u32,
    /// Non-terminal orders older than this get swept.
    pub stale_order_ttl: Duration,
    pub sweep_interval: Duration,
    /// Minimum reason length for destructive operations.
    pub min_reason_len: usize,
    /// Destructive-action rate limit: at most `rate_limit_max` per window.
    pub rate_limit_window: Duration,
    pub rate_limit_max: i64,
    /// When the coordination store is down, `true` lets destructive actions
    /// through; production keeps the fail-closed default.
    pub rate_limit_fail_open: bool,
    /// Shared secret for webhook signature verification.
    pub webhook_secret: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            broker_deadline: Duration::from_secs(10),
            broker_max_attempts: 5,
            stale_order_ttl: Duration::from_secs(15 * 60),
            sweep_interval: Duration::from_secs(5 * 60),
            min_reason_len: 10,
            rate_limit_window: Duration::from_secs(5 * 60),
            rate_limit_max: 1,
            rate_limit_fail_open: false,
            webhook_secret: String::new(),
        }
    }
}

/// Idempotent order gateway.
///
/// Submission is keyed on the deterministic client order id: the order row
/// is claimed with an insert-if-absent, a coordination-store lock keeps a
/// single broker call in flight per id, and broker-side duplicate indicators
/// are treated as success.
pub struct ExecutionGateway {
    pub(crate) orders: Arc<dyn OrderRepository>,
    pub(crate) positions: Arc<dyn PositionRepository>,
    pub(crate) broker: Arc<dyn BrokerService>,
    pub(crate) risk: Arc<dyn RiskPort>,
    pub(crate) breaker: CircuitBreakerClient,
    pub(crate) audit: Arc<dyn AuditRepository>,
    pub(crate) store: Arc<dyn CoordinationStore>,
    pub(crate) step_up: StepUpVerifier,
    pub(crate) config: GatewayConfig,
    pub(crate) metrics: Metrics,
}

impl ExecutionGateway {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        positions: Arc<dyn PositionRepository>,
        broker: Arc<dyn BrokerService>,
        risk: Arc<dyn RiskPort>,
        breaker: CircuitBreakerClient,
        audit: Arc<dyn AuditRepository>,
        store: Arc<dyn CoordinationStore>,
        step_up: StepUpVerifier,
        config: GatewayConfig,
        metrics: Metrics,
    ) -> Self {
        Self {
            orders,
            positions,
            broker,
            risk,
            breaker,
            audit,
            store,
            step_up,
            config,
            metrics,
        }
    }

    fn validate_intent(intent: &OrderIntent) -> Result<(), ControlPlaneError> {
        if intent.symbol.trim().is_empty() {
            return Err(ControlPlaneError::validation("symbol must not be empty"));
        }
        if intent.qty <= Decimal::ZERO {
            return Err(ControlPlaneError::validation("qty must be positive"));
        }
        if intent.order_type == OrderType::Limit && intent.limit_price.is_none() {
            return Err(ControlPlaneError::validation(
                "limit orders require a limit price",
            ));
        }
        Ok(())
    }

    async fn current_position_qty(&self, symbol: &str) -> Decimal {
        match self.positions.get(symbol).await {
            Ok(Some(p)) => p.qty,
            _ => Decimal::ZERO,
        }
    }

    /// Submit an order intent. Safe to retry: identical intents map onto the
    /// same client order id and at most one broker order.
    pub async fn submit(&self, intent: &OrderIntent) -> Result<SubmitReceipt, ControlPlaneError> {
        Self::validate_intent(intent)?;
        let order = intent.to_order();

        // Breaker gate before any side effect; reducing orders are exempt.
        let breaker_state = self.breaker.state_or_tripped().await;
        if !breaker_state.allows_entries() {
            let position_qty = self.current_position_qty(&order.symbol).await;
            if !order.is_reducing_against(position_qty) {
                self.metrics
                    .orders_total
                    .with_label_values(&[&order.side.to_string(), "breaker_blocked"])
                    .inc();
                return Err(ControlPlaneError::CircuitBreakerTripped {
                    reason: format!("breaker is {}; entry blocked", breaker_state),
                });
            }
        }

        self.risk.pre_check(&order).await?;

        // Claim the row; only one writer wins the insert.
        let claimed = self
            .orders
            .insert_if_absent(&order)
            .await
            .map_err(|e| ControlPlaneError::storage_transient(e.to_string()))?;

        let order = match claimed {
            InsertOutcome::Inserted => order,
            InsertOutcome::Existing(existing) => {
                if existing.is_terminal() || existing.broker_order_id.is_some() {
                    info!(
                        "ExecutionGateway: Duplicate submit for {} answered from store (status {})",
                        existing.client_order_id, existing.status
                    );
                    self.metrics
                        .duplicate_submits_total
                        .with_label_values(&["store"])
                        .inc();
                    return Ok(SubmitReceipt {
                        order: existing,
                        duplicate: true,
                    });
                }
                // Row exists but never reached the broker (earlier crash or
                // in-flight worker). The submit lock below decides who calls.
                existing
            }
        };

        let lock_key = format!("submit:{}", order.client_order_id);
        let holders = self
            .store
            .incr_with_ttl(&lock_key, Duration::from_secs(30))
            .await
            .map_err(|e| ControlPlaneError::storage_transient(e.to_string()))?;
        if holders > 1 {
            info!(
                "ExecutionGateway: Submit for {} already in flight; returning stored row",
                order.client_order_id
            );
            self.metrics
                .duplicate_submits_total
                .with_label_values(&["in_flight"])
                .inc();
            return Ok(SubmitReceipt {
                order,
                duplicate: true,
            });
        }

        let result = self.call_broker(&order).await;
        let _ = self.store.delete(&lock_key).await;
        result
    }

    /// Broker call with the submit retry policy: one same-id retry on a
    /// deadline, bounded exponential backoff on retriable errors, no retry
    /// on permanent ones.
    async fn call_broker(&self, order: &Order) -> Result<SubmitReceipt, ControlPlaneError> {
        let mut timeout_retried = false;
        let mut attempt: u32 = 0;
        let ack = loop {
            attempt += 1;
            let call = self.broker.submit_order(order);
            match tokio::time::timeout(self.config.broker_deadline, call).await {
                Err(_elapsed) => {
                    if timeout_retried {
                        let _ = self.breaker.record_broker_error().await;
                        return Err(ControlPlaneError::broker_retriable(format!(
                            "submit for {} timed out twice",
                            order.client_order_id
                        )));
                    }
                    timeout_retried = true;
                    self.metrics
                        .broker_retries_total
                        .with_label_values(&["timeout"])
                        .inc();
                    warn!(
                        "ExecutionGateway: Broker submit timed out for {}; retrying once with the same id",
                        order.client_order_id
                    );
                }
                Ok(Ok(ack)) => break ack,
                Ok(Err(e)) if e.is_retriable() && attempt < self.config.broker_max_attempts => {
                    let _ = self.breaker.record_broker_error().await;
                    self.metrics
                        .broker_retries_total
                        .with_label_values(&["retriable"])
                        .inc();
                    let backoff = backoff_with_jitter(attempt);
                    warn!(
                        "ExecutionGateway: Broker submit attempt {} failed for {} ({}); backing off {:?}",
                        attempt, order.client_order_id, e, backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
                Ok(Err(e)) => {
                    let _ = self.breaker.record_broker_error().await;
                    if e.is_retriable() {
                        error!(
                            "ExecutionGateway: Broker submit exhausted {} attempts for {}",
                            attempt, order.client_order_id
                        );
                        return Err(e);
                    }
                    // Permanent broker rejection: record it on the row, keep
                    // the row, surface the rejected order.
                    let reason = e.to_string();
                    self.orders
                        .transition(&order.client_order_id, OrderStatus::Rejected)
                        .await
                        .map_err(|e| ControlPlaneError::storage_transient(e.to_string()))?;
                    self.write_audit(
                        "order",
                        "submit",
                        "rejected",
                        serde_json::json!({
                            "client_order_id": order.client_order_id,
                            "symbol": order.symbol,
                            "reason": reason,
                        }),
                    )
                    .await;
                    self.metrics
                        .orders_total
                        .with_label_values(&[&order.side.to_string(), "rejected"])
                        .inc();
                    let stored = self
                        .orders
                        .get(&order.client_order_id)
                        .await
                        .map_err(|e| ControlPlaneError::storage_transient(e.to_string()))?
                        .unwrap_or_else(|| order.clone());
                    return Ok(SubmitReceipt {
                        order: stored,
                        duplicate: false,
                    });
                }
            }
        };

        if ack.duplicate {
            info!(
                "ExecutionGateway: Broker reported duplicate id {}; treating as success",
                order.client_order_id
            );
            self.metrics
                .duplicate_submits_total
                .with_label_values(&["broker"])
                .inc();
        }

        self.orders
            .mark_submitted(&order.client_order_id, &ack.broker_order_id, ack.status)
            .await
            .map_err(|e| ControlPlaneError::storage_transient(e.to_string()))?;

        self.write_audit(
            "order",
            "submit",
            "accepted",
            serde_json::json!({
                "client_order_id": order.client_order_id,
                "broker_order_id": ack.broker_order_id,
                "symbol": order.symbol,
                "side": order.side.to_string(),
                "qty": order.qty.to_string(),
                "duplicate": ack.duplicate,
            }),
        )
        .await;
        self.metrics
            .orders_total
            .with_label_values(&[&order.side.to_string(), "submitted"])
            .inc();

        let stored = self
            .orders
            .get(&order.client_order_id)
            .await
            .map_err(|e| ControlPlaneError::storage_transient(e.to_string()))?
            .unwrap_or_else(|| order.clone());

        Ok(SubmitReceipt {
            order: stored,
            duplicate: ack.duplicate,
        })
    }

    /// Cancel one order by client order id. Broker-side the cancel is
    /// idempotent via the broker order id; terminal rows are a no-op.
    pub async fn cancel(&self, client_order_id: &str) -> Result<Order, ControlPlaneError> {
        let Some(order) = self
            .orders
            .get(client_order_id)
            .await
            .map_err(|e| ControlPlaneError::storage_transient(e.to_string()))?
        else {
            return Err(ControlPlaneError::validation(format!(
                "unknown order {}",
                client_order_id
            )));
        };
        if order.is_terminal() {
            return Ok(order);
        }
        match &order.broker_order_id {
            Some(broker_id) => {
                self.broker.cancel_order(broker_id).await?;
                // The terminal transition lands via webhook or reconcile.
            }
            None => {
                // Never reached the broker; cancel locally.
                self.orders
                    .transition(client_order_id, OrderStatus::Canceled)
                    .await
                    .map_err(|e| ControlPlaneError::storage_transient(e.to_string()))?;
            }
        }
        self.write_audit(
            "order",
            "cancel",
            "requested",
            serde_json::json!({ "client_order_id": client_order_id }),
        )
        .await;
        let stored = self
            .orders
            .get(client_order_id)
            .await
            .map_err(|e| ControlPlaneError::storage_transient(e.to_string()))?
            .unwrap_or(order);
        Ok(stored)
    }

    pub(crate) async fn write_audit(
        &self,
        event_type: &str,
        action: &str,
        outcome: &str,
        details: serde_json::Value,
    ) {
        let event = AuditEvent::new(event_type, "execution-gateway", action, outcome, details);
        if let Err(e) = self.audit.append(&event).await {
            error!("ExecutionGateway: Failed to write audit event: {}", e);
        }
    }
}

fn backoff_with_jitter(attempt: u32) -> Duration {
    let base_ms = 200u64.saturating_mul(1u64 << attempt.min(6));
    let jitter = rand::rng().random_range(0..base_ms / 2 + 1);
    Duration::from_millis(base_ms + jitter)
}
