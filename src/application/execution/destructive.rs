use super::ExecutionGateway;
use crate::domain::auth::{Permission, role_has};
use crate::domain::circuit::TripReason;
use crate::domain::errors::ControlPlaneError;
use crate::domain::risk::plan::OrderIntent;
use crate::domain::trading::types::{Order, OrderSide, OrderType, TimeInForce};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{error, warn};

/// Caller evidence required by every destructive endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct DestructiveRequest {
    pub reason: String,
    pub actor: String,
    pub role: String,
    pub step_up_ts: i64,
    pub step_up_token: String,
    #[serde(default)]
    pub ip_address: Option<String>,
}

impl ExecutionGateway {
    /// Common gate for destructive operations: reason length, role
    /// permission, step-up evidence, rate limit.
    async fn authorize_destructive(
        &self,
        action: &str,
        req: &DestructiveRequest,
    ) -> Result<(), ControlPlaneError> {
        if req.reason.trim().len() < self.config.min_reason_len {
            return Err(ControlPlaneError::validation(format!(
                "reason must be at least {} characters",
                self.config.min_reason_len
            )));
        }
        if !role_has(&req.role, Permission::Destructive) {
            self.write_audit(
                "auth",
                action,
                "denied_role",
                serde_json::json!({ "actor": req.actor, "role": req.role }),
            )
            .await;
            return Err(ControlPlaneError::auth(format!(
                "role '{}' may not perform {}",
                req.role, action
            )));
        }
        if !self.step_up.verify(&req.actor, req.step_up_ts, &req.step_up_token) {
            self.write_audit(
                "auth",
                action,
                "denied_step_up",
                serde_json::json!({ "actor": req.actor }),
            )
            .await;
            return Err(ControlPlaneError::auth(
                "step-up authentication evidence missing or stale",
            ));
        }

        let window_key = format!("rl:{}:{}", action, req.actor);
        match self
            .store
            .incr_with_ttl(&window_key, self.config.rate_limit_window)
            .await
        {
            Ok(count) if count > self.config.rate_limit_max => {
                return Err(ControlPlaneError::RateLimited {
                    detail: format!(
                        "{} allowed {} time(s) per {:?}",
                        action, self.config.rate_limit_max, self.config.rate_limit_window
                    ),
                });
            }
            Ok(_) => {}
            Err(e) => {
                if self.config.rate_limit_fail_open {
                    warn!(
                        "ExecutionGateway: Rate limiter unavailable ({}); allowing {} by fail-open policy",
                        e, action
                    );
                } else {
                    error!(
                        "ExecutionGateway: Rate limiter unavailable ({}); denying {}",
                        e, action
                    );
                    return Err(ControlPlaneError::RateLimited {
                        detail: "rate limiter unavailable; denying by policy".to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Cancel every non-terminal order. Requires full destructive evidence.
    pub async fn cancel_all(&self, req: &DestructiveRequest) -> Result<u32, ControlPlaneError> {
        self.authorize_destructive("cancel_all", req).await?;
        self.write_audit(
            "destructive",
            "cancel_all",
            "requested",
            serde_json::json!({ "actor": req.actor, "reason": req.reason, "ip": req.ip_address }),
        )
        .await;

        let count = self.cancel_all_inner().await?;

        self.write_audit(
            "destructive",
            "cancel_all",
            "completed",
            serde_json::json!({ "actor": req.actor, "cancelled": count }),
        )
        .await;
        Ok(count)
    }

    async fn cancel_all_inner(&self) -> Result<u32, ControlPlaneError> {
        let open = self
            .orders
            .open_orders()
            .await
            .map_err(|e| ControlPlaneError::storage_transient(e.to_string()))?;
        let mut cancelled = 0u32;
        for order in open {
            match self.cancel(&order.client_order_id).await {
                Ok(_) => cancelled += 1,
                Err(e) => error!(
                    "ExecutionGateway: Cancel-all failed for {}: {}",
                    order.client_order_id, e
                ),
            }
        }
        Ok(cancelled)
    }

    /// Flatten every position with reducing market orders, after cancelling
    /// open orders. Submissions go through the normal idempotent path, which
    /// admits reducing orders even under a tripped breaker.
    pub async fn flatten_all(
        &self,
        req: &DestructiveRequest,
    ) -> Result<Vec<Order>, ControlPlaneError> {
        self.authorize_destructive("flatten_all", req).await?;
        self.write_audit(
            "destructive",
            "flatten_all",
            "requested",
            serde_json::json!({ "actor": req.actor, "reason": req.reason, "ip": req.ip_address }),
        )
        .await;

        eprintln!("DEBUG: before cancel_all_inner");
        let cancelled = self.cancel_all_inner().await?;
        eprintln!("DEBUG: before flatten_all_inner");
        let submitted = self.flatten_all_inner().await?;
        eprintln!("DEBUG: after flatten_all_inner");

        self.write_audit(
            "destructive",
            "flatten_all",
            "completed",
            serde_json::json!({
                "actor": req.actor,
                "orders_cancelled": cancelled,
                "flatten_orders": submitted.len(),
            }),
        )
        .await;
        Ok(submitted)
    }

    async fn flatten_all_inner(&self) -> Result<Vec<Order>, ControlPlaneError> {
        let positions = self
            .positions
            .all()
            .await
            .map_err(|e| ControlPlaneError::storage_transient(e.to_string()))?;
        let today = Utc::now().date_naive();
        let mut submitted = Vec::new();
        for position in positions.iter().filter(|p| !p.is_flat()) {
            let side = if position.qty > Decimal::ZERO {
                OrderSide::Sell
            } else {
                OrderSide::Buy
            };
            let intent = OrderIntent {
                strategy_id: "flatten".to_string(),
                symbol: position.symbol.clone(),
                side,
                qty: position.qty.abs(),
                order_type: OrderType::Market,
                limit_price: None,
                time_in_force: TimeInForce::Day,
                as_of_date: today,
            };
            eprintln!("DEBUG: submitting flatten for {}", position.symbol);
            match self.submit(&intent).await {
                Ok(receipt) => submitted.push(receipt.order),
                Err(e) => error!(
                    "ExecutionGateway: Flatten submit failed for {}: {}",
                    position.symbol, e
                ),
            }
            eprintln!("DEBUG: submitted flatten for {}", position.symbol);
        }
        Ok(submitted)
    }

    /// Manual kill switch: force the breaker to TRIPPED, cancel every open
    /// order, and flatten every position.
    pub async fn kill_switch(
        &self,
        req: &DestructiveRequest,
    ) -> Result<(u32, Vec<Order>), ControlPlaneError> {
        self.authorize_destructive("kill_switch", req).await?;
        self.write_audit(
            "destructive",
            "kill_switch",
            "requested",
            serde_json::json!({ "actor": req.actor, "reason": req.reason, "ip": req.ip_address }),
        )
        .await;

        self.breaker
            .trip(
                TripReason::Manual,
                format!("kill switch: {}", req.reason),
                &req.actor,
            )
            .await
            .map_err(|e| ControlPlaneError::storage_transient(e.to_string()))?;

        let cancelled = self.cancel_all_inner().await?;
        let flattened = self.flatten_all_inner().await?;

        self.write_audit(
            "destructive",
            "kill_switch",
            "completed",
            serde_json::json!({
                "actor": req.actor,
                "orders_cancelled": cancelled,
                "flatten_orders": flattened.len(),
            }),
        )
        .await;
        Ok((cancelled, flattened))
    }
}
