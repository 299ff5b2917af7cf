use super::dto::{RiskPlanRequest, RiskPlanResponse};
use super::error::ApiError;
use crate::application::bootstrap::AppContext;
use crate::domain::trading::types::Order;
use axum::extract::{Json, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::Router;
use rust_decimal::Decimal;
use std::sync::Arc;

pub fn router() -> Router<Arc<AppContext>> {
    Router::new()
        .route("/api/v1/risk/plan", post(plan))
        .route("/api/v1/risk/pre-check", post(pre_check))
}

async fn plan(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<RiskPlanRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let weights: Vec<(String, Decimal)> = request
        .target_weights
        .into_iter()
        .map(|w| (w.symbol, w.weight))
        .collect();
    let plan = ctx
        .risk
        .plan(&request.strategy_id, request.as_of_date, &weights)
        .await?;
    Ok(Json(RiskPlanResponse { plan }))
}

async fn pre_check(
    State(ctx): State<Arc<AppContext>>,
    Json(order): Json<Order>,
) -> Result<impl IntoResponse, ApiError> {
    ctx.risk.pre_check(&order).await?;
    Ok(StatusCode::NO_CONTENT)
}
