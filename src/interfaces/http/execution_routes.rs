use super::dto::{SubmitOrderResponse, WebhookAckResponse};
use super::error::ApiError;
use crate::application::bootstrap::AppContext;
use crate::application::execution::destructive::DestructiveRequest;
use crate::application::execution::webhook::verify_webhook_signature;
use crate::application::reconciler::Reconciler;
use crate::domain::audit::AuditEvent;
use crate::domain::auth::{Permission, role_has};
use crate::domain::circuit::TripReason;
use crate::domain::errors::ControlPlaneError;
use crate::domain::ports::BrokerWebhookEvent;
use crate::domain::risk::plan::OrderIntent;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Json, Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

pub fn router() -> Router<Arc<AppContext>> {
    Router::new()
        .route("/api/v1/orders", post(submit_order).get(list_orders))
        .route("/api/v1/orders/:id/cancel", post(cancel_order))
        .route("/api/v1/orders/cancel-all", post(cancel_all))
        .route("/api/v1/positions", get(list_positions))
        .route("/api/v1/positions/flatten-all", post(flatten_all))
        .route("/api/v1/fills", get(list_fills))
        .route("/api/v1/kill-switch", post(kill_switch))
        .route("/api/v1/breaker", get(breaker_state))
        .route("/api/v1/breaker/trip", post(breaker_trip))
        .route("/api/v1/breaker/reset", post(breaker_reset))
        .route("/webhooks/broker", post(broker_webhook))
}

/// Role claim for order mutations. Inter-service callers that present no
/// claim act as `operator`; the console forwards the signed-in user's role,
/// so a viewer session cannot push orders through this surface.
fn actor_role(headers: &HeaderMap) -> &str {
    headers
        .get("x-actor-role")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("operator")
}

/// Idempotent submission. Write traffic is refused while the reconciled
/// gate is unset; the kill switch and flatten paths stay reachable.
async fn submit_order(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Json(intent): Json<OrderIntent>,
) -> Result<impl IntoResponse, ApiError> {
    let role = actor_role(&headers);
    if !role_has(role, Permission::SubmitOrders) {
        return Err(ApiError(ControlPlaneError::auth(format!(
            "role '{}' may not submit orders",
            role
        ))));
    }
    if !Reconciler::gate_is_set(ctx.store.as_ref(), "execution").await {
        return Err(ApiError(ControlPlaneError::ReconcilerNotReady {
            service: "execution".to_string(),
        }));
    }
    let receipt = ctx.gateway.submit(&intent).await?;
    Ok(Json(SubmitOrderResponse {
        order: receipt.order,
        duplicate_ok: receipt.duplicate,
    }))
}

async fn cancel_order(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let order = ctx.gateway.cancel(&id).await?;
    Ok(Json(order))
}

async fn list_orders(
    State(ctx): State<Arc<AppContext>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, ApiError> {
    let orders = match params.get("date") {
        Some(raw) => {
            let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
                ApiError(ControlPlaneError::validation(format!("invalid date: {}", raw)))
            })?;
            ctx.gateway.orders.orders_for_date(date).await?
        }
        None => ctx.gateway.orders.open_orders().await?,
    };
    Ok(Json(orders))
}

async fn list_fills(
    State(ctx): State<Arc<AppContext>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(raw) = params.get("date") else {
        return Err(ApiError(ControlPlaneError::validation(
            "date query parameter is required",
        )));
    };
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
        ApiError(ControlPlaneError::validation(format!("invalid date: {}", raw)))
    })?;
    let fills = ctx.gateway.orders.fills_for_date(date).await?;
    Ok(Json(fills))
}

async fn list_positions(
    State(ctx): State<Arc<AppContext>>,
) -> Result<impl IntoResponse, ApiError> {
    let positions = ctx.gateway.positions.all().await?;
    Ok(Json(positions))
}

async fn cancel_all(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<DestructiveRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let cancelled = ctx.gateway.cancel_all(&request).await?;
    Ok(Json(serde_json::json!({ "cancelled": cancelled })))
}

async fn flatten_all(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<DestructiveRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let orders = ctx.gateway.flatten_all(&request).await?;
    Ok(Json(orders))
}

async fn kill_switch(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<DestructiveRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (cancelled, flattened) = ctx.gateway.kill_switch(&request).await?;
    Ok(Json(serde_json::json!({
        "cancelled": cancelled,
        "flatten_orders": flattened.len(),
    })))
}

// ===== Circuit breaker =====

#[derive(Debug, Deserialize)]
struct BreakerActionRequest {
    reason: String,
    actor: String,
    role: String,
    step_up_ts: i64,
    step_up_token: String,
}

async fn breaker_state(
    State(ctx): State<Arc<AppContext>>,
) -> Result<impl IntoResponse, ApiError> {
    let record = ctx.breaker.current().await?;
    Ok(Json(record))
}

fn check_breaker_auth(
    ctx: &AppContext,
    request: &BreakerActionRequest,
) -> Result<(), ApiError> {
    if !role_has(&request.role, Permission::BreakerControl) {
        return Err(ApiError(ControlPlaneError::auth(format!(
            "role '{}' may not control the breaker",
            request.role
        ))));
    }
    if !ctx
        .gateway
        .step_up
        .verify(&request.actor, request.step_up_ts, &request.step_up_token)
    {
        return Err(ApiError(ControlPlaneError::auth(
            "step-up authentication evidence missing or stale",
        )));
    }
    Ok(())
}

async fn breaker_trip(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<BreakerActionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    check_breaker_auth(&ctx, &request)?;
    let record = ctx
        .breaker
        .trip(TripReason::Manual, request.reason.clone(), &request.actor)
        .await?;
    let event = AuditEvent::new(
        "breaker",
        request.actor.clone(),
        "trip",
        "ok",
        serde_json::json!({ "reason": request.reason }),
    );
    ctx.audit.append(&event).await?;
    Ok(Json(record))
}

async fn breaker_reset(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<BreakerActionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    check_breaker_auth(&ctx, &request)?;
    let all_clear = ctx.evaluate_all_clear().await;
    let record = ctx.breaker.approve_reset(&request.actor, all_clear).await?;
    let event = AuditEvent::new(
        "breaker",
        request.actor.clone(),
        "reset_approved",
        "ok",
        serde_json::json!({ "reason": request.reason }),
    );
    ctx.audit.append(&event).await?;
    Ok(Json(record))
}

// ===== Webhook ingestion =====

async fn broker_webhook(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let signature = headers
        .get("x-webhook-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !verify_webhook_signature(&ctx.gateway.config.webhook_secret, &body, signature) {
        warn!("Webhook rejected: bad signature");
        return Err(ApiError(ControlPlaneError::auth(
            "webhook signature verification failed",
        )));
    }
    let event: BrokerWebhookEvent = serde_json::from_slice(&body).map_err(|e| {
        ApiError(ControlPlaneError::validation(format!(
            "invalid webhook payload: {}",
            e
        )))
    })?;
    let disposition = ctx.gateway.ingest_webhook(&event).await?;
    Ok(Json(WebhookAckResponse {
        disposition: serde_json::to_string(&disposition)
            .unwrap_or_default()
            .trim_matches('"')
            .to_string(),
    }))
}
