use super::dto::StartRunRequest;
use super::error::ApiError;
use crate::application::bootstrap::AppContext;
use crate::domain::errors::ControlPlaneError;
use axum::Router;
use axum::extract::{Json, Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use std::sync::Arc;

pub fn router() -> Router<Arc<AppContext>> {
    Router::new()
        .route("/api/v1/orchestration/runs", post(start_run))
        .route("/api/v1/orchestration/runs/:run_id", get(get_run))
}

/// Start (or resume) the paper run for a date. Identical requests converge
/// on the same run id, so double-POSTs are harmless.
async fn start_run(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<StartRunRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let date = request
        .date
        .unwrap_or_else(|| chrono::Utc::now().date_naive());
    let trigger = request.trigger.unwrap_or_else(|| "api".to_string());
    let record = ctx.orchestrator.run_paper(date, &trigger).await?;
    Ok(Json(record))
}

async fn get_run(
    State(ctx): State<Arc<AppContext>>,
    Path(run_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    match ctx.orchestrator.get_run(&run_id).await? {
        Some(record) => Ok(Json(record)),
        None => Err(ApiError(ControlPlaneError::validation(format!(
            "unknown run {}",
            run_id
        )))),
    }
}
