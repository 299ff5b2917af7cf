use super::ExecutionGateway;
use crate::domain::trading::types::OrderStatus;
use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};

impl ExecutionGateway {
    /// One sweep pass: cancel non-terminal orders older than the stale TTL
    /// and record each as an anomaly. Cancels are idempotent by broker order
    /// id, so overlapping passes are harmless.
    pub async fn sweep_stale_orders(&self) -> Result<u32> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.stale_order_ttl)
                .unwrap_or_else(|_| chrono::Duration::minutes(15));
        let stale = self.orders.open_orders_older_than(cutoff).await?;
        let mut swept = 0u32;

        for order in stale {
            warn!(
                "ExecutionGateway: Stale order {} ({} {} x{}) older than {:?}; cancelling",
                order.client_order_id,
                order.side,
                order.symbol,
                order.qty,
                self.config.stale_order_ttl
            );
            let outcome = match &order.broker_order_id {
                Some(broker_id) => match self.broker.cancel_order(broker_id).await {
                    Ok(()) => "cancel_requested",
                    Err(e) => {
                        error!(
                            "ExecutionGateway: Stale cancel failed for {}: {}",
                            order.client_order_id, e
                        );
                        "cancel_failed"
                    }
                },
                None => {
                    // Never reached the broker; close the row locally.
                    self.orders
                        .transition(&order.client_order_id, OrderStatus::Canceled)
                        .await?;
                    "canceled_locally"
                }
            };
            self.metrics
                .stale_orders_swept_total
                .with_label_values(&[order.symbol.as_str()])
                .inc();
            self.write_audit(
                "anomaly",
                "stale_order_sweep",
                outcome,
                serde_json::json!({
                    "client_order_id": order.client_order_id,
                    "symbol": order.symbol,
                    "age_cutoff": cutoff.to_rfc3339(),
                }),
            )
            .await;
            swept += 1;
        }

        if swept > 0 {
            info!("ExecutionGateway: Sweeper handled {} stale orders", swept);
        }
        Ok(swept)
    }

    /// Background sweep loop at the configured cadence.
    pub async fn run_sweeper(self: Arc<Self>) {
        info!(
            "ExecutionGateway: Stale-order sweeper started (interval {:?}, TTL {:?})",
            self.config.sweep_interval, self.config.stale_order_ttl
        );
        let mut interval = tokio::time::interval(self.config.sweep_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = self.sweep_stale_orders().await {
                error!("ExecutionGateway: Sweep pass failed: {}", e);
            }
        }
    }
}
