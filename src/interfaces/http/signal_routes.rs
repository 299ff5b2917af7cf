use super::dto::{GenerateSignalsRequest, HealthResponse, ModelInfoResponse};
use super::error::ApiError;
use crate::application::bootstrap::AppContext;
use crate::domain::ports::CoordinationStore;
use axum::extract::{Json, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

pub fn router() -> Router<Arc<AppContext>> {
    Router::new()
        .route("/api/v1/signals/generate", post(generate))
        .route("/api/v1/model/info", get(model_info))
        .route("/api/v1/model/reload", post(model_reload))
}

pub async fn health(State(ctx): State<Arc<AppContext>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        model_loaded: Some(ctx.signal.loaded_model().is_some()),
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}

async fn generate(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<GenerateSignalsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let set = ctx
        .signal
        .generate(&request.symbols, request.as_of_date, request.top_n)
        .await?;
    Ok(Json(set))
}

async fn model_info(State(ctx): State<Arc<AppContext>>) -> impl IntoResponse {
    let strategy_id = ctx.signal.strategy_id().to_string();
    match ctx.signal.loaded_model() {
        Some(model) => Json(ModelInfoResponse {
            strategy_id,
            loaded: true,
            version: Some(model.metadata.version.clone()),
            performance_metrics: Some(model.metadata.performance_metrics.clone()),
            loaded_at: Some(model.loaded_at.to_rfc3339()),
        }),
        None => Json(ModelInfoResponse {
            strategy_id,
            loaded: false,
            version: None,
            performance_metrics: None,
            loaded_at: None,
        }),
    }
}

/// Force a registry poll. A registry read failure answers 503: the service
/// fails closed rather than serving a model of unknown vintage.
async fn model_reload(State(ctx): State<Arc<AppContext>>) -> impl IntoResponse {
    match ctx.signal.poll_registry().await {
        Ok(outcome) => {
            if outcome.reloaded {
                // Notify interested peers that the active model moved.
                let _ = ctx
                    .store
                    .publish(
                        "model.reload",
                        outcome.current_version.as_deref().unwrap_or(""),
                    )
                    .await;
            }
            (StatusCode::OK, Json(serde_json::json!(outcome))).into_response()
        }
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "error": "storage_error",
                "message": e.to_string(),
            })),
        )
            .into_response(),
    }
}
