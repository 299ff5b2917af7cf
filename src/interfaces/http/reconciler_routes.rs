use super::dto::ReconcileStatusResponse;
use super::error::ApiError;
use crate::application::bootstrap::AppContext;
use axum::Router;
use axum::extract::{Json, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use std::sync::Arc;

pub fn router() -> Router<Arc<AppContext>> {
    Router::new()
        .route("/api/v1/reconciliation/status", get(status))
        .route("/api/v1/reconciliation/run", post(run_now))
}

async fn status(State(ctx): State<Arc<AppContext>>) -> Result<impl IntoResponse, ApiError> {
    let status = ctx.reconciler.status().await?;
    Ok(Json(ReconcileStatusResponse {
        gate_set: status.gate_set,
        last_outcome: status.last_outcome,
        last_run_at: status.last_run_at.map(|t| t.to_rfc3339()),
    }))
}

async fn run_now(State(ctx): State<Arc<AppContext>>) -> Result<impl IntoResponse, ApiError> {
    let report = ctx.reconciler.reconcile_once().await?;
    Ok(Json(serde_json::json!(report)))
}
