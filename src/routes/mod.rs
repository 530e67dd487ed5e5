use axum::{routing::get, routing::post, Router};

use crate::app_state::AppState;

pub mod health;
pub mod metrics;
pub mod moderate;

/// API routes shared by the server binary and router tests.
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/moderate", post(moderate::submit_comment))
        .route("/api/v1/moderate/{job_id}", get(moderate::get_job_status))
        .with_state(state)
}
