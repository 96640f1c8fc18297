//! Health check endpoint.
//!
//! Returns 200 OK if the user directory is reachable,
//! 503 Service Unavailable otherwise.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tracing::warn;

use crate::state::AppState;

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    users: Option<usize>,
}

/// Health check handler.
async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    match state.users_healthy().await {
        Ok(users) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy",
                users: Some(users),
            }),
        ),
        Err(e) => {
            warn!(error = %e, "user directory health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unhealthy",
                    users: None,
                }),
            )
        }
    }
}

/// Create the health check router.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
