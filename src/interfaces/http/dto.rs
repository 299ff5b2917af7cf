//! Wire schemas shared by the axum handlers and the HTTP port clients.

use crate::domain::risk::plan::{OrderPlan, PlanRejection};
use crate::domain::trading::types::Order;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub model_loaded: Option<bool>,
    pub server_time: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateSignalsRequest {
    pub symbols: Vec<String>,
    pub as_of_date: NaiveDate,
    #[serde(default)]
    pub strategy_id: Option<String>,
    #[serde(default)]
    pub top_n: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelInfoResponse {
    pub strategy_id: String,
    pub loaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub performance_metrics: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loaded_at: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TargetWeightDto {
    pub symbol: String,
    pub weight: Decimal,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RiskPlanRequest {
    pub strategy_id: String,
    pub as_of_date: NaiveDate,
    pub target_weights: Vec<TargetWeightDto>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RiskPlanResponse {
    pub plan: OrderPlan,
}

impl RiskPlanResponse {
    pub fn rejections(&self) -> &[PlanRejection] {
        &self.plan.rejections
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitOrderResponse {
    pub order: Order,
    /// Set when the submission was answered without a new broker order.
    pub duplicate_ok: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookAckResponse {
    pub disposition: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReconcileStatusResponse {
    pub gate_set: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_outcome: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartRunRequest {
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub trigger: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}
