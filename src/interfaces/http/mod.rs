pub mod dto;
pub mod error;
pub mod execution_routes;
pub mod orchestrator_routes;
pub mod reconciler_routes;
pub mod risk_routes;
pub mod signal_routes;

use crate::application::bootstrap::AppContext;
use axum::Router;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Assemble the full control-plane router: all service surfaces mounted on
/// one process. Split deployments mount a subset by pointing the port URLs
/// at their peers.
pub fn router(ctx: Arc<AppContext>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(signal_routes::health))
        .route("/metrics", get(metrics))
        .merge(signal_routes::router())
        .merge(risk_routes::router())
        .merge(execution_routes::router())
        .merge(reconciler_routes::router())
        .merge(orchestrator_routes::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

async fn metrics(State(ctx): State<Arc<AppContext>>) -> impl IntoResponse {
    ctx.metrics.render()
}
