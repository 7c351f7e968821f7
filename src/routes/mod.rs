pub mod generate;
pub mod health;
pub mod metrics;
pub mod providers;

use axum::{
    Router,
    routing::{get, post},
};

use crate::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health::health))
        .route("/api/generate", post(generate::generate))
        .route("/api/providers", get(providers::list_providers))
        .route("/api/metrics", get(metrics::get_metrics))
        .with_state(state)
}
