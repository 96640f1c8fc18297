//! Operator routes for rate limits and account lockouts.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::AppError;
use crate::gate::{CurrentUser, GatePolicy, gated};
use crate::middleware::RateClass;
use crate::models::ModuleKey;
use crate::routes::helpers::{JsonBody, ok};
use crate::state::AppState;

#[derive(Debug, Serialize)]
struct RateLimitEntry {
    class: &'static str,
    max: u32,
    window_secs: u64,
}

#[derive(Debug, Deserialize)]
struct ResetRateLimitRequest {
    class: String,
    identity: String,
}

#[derive(Debug, Deserialize)]
struct ClearLockoutRequest {
    email: String,
}

#[derive(Debug, Serialize)]
struct Cleared {
    cleared: bool,
}

/// GET /api/admin/rate-limits
async fn list_rate_limits(State(state): State<AppState>) -> Response {
    let limits: Vec<_> = RateClass::ALL
        .into_iter()
        .map(|class| {
            let (max, window) = state.rate_limiter().limit_for(class);
            RateLimitEntry {
                class: class.as_str(),
                max,
                window_secs: window.as_secs(),
            }
        })
        .collect();
    ok(limits).into_response()
}

/// POST /api/admin/rate-limits/reset
async fn reset_rate_limit(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    JsonBody(request): JsonBody<ResetRateLimitRequest>,
) -> Result<Response, AppError> {
    let class = RateClass::ALL
        .into_iter()
        .find(|c| c.as_str() == request.class)
        .ok_or_else(|| AppError::invalid("class", format!("unknown rate class '{}'", request.class)))?;

    let identity = request.identity.trim();
    if identity.is_empty() {
        return Err(AppError::invalid("identity", "Identity is required"));
    }

    state
        .rate_limiter()
        .reset(class, identity)
        .await
        .map_err(AppError::Upstream)?;

    info!(user_id = %user.id, class = class.as_str(), identity = %identity, "rate limit reset");
    Ok(ok(Cleared { cleared: true }).into_response())
}

/// POST /api/admin/lockouts/clear
async fn clear_lockout(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    JsonBody(request): JsonBody<ClearLockoutRequest>,
) -> Result<Response, AppError> {
    let email = request.email.trim();
    if email.is_empty() {
        return Err(AppError::invalid("email", "Email is required"));
    }

    let was_locked = state.lockout().is_locked(email);
    state.lockout().clear_all(email);

    info!(user_id = %user.id, email = %email, was_locked, "lockout cleared");
    Ok(ok(Cleared { cleared: was_locked }).into_response())
}

/// Create the admin router.
pub fn router(state: &AppState) -> Router<AppState> {
    let settings = gated(
        Router::new()
            .route("/api/admin/rate-limits", get(list_rate_limits))
            .route("/api/admin/rate-limits/reset", post(reset_rate_limit)),
        state,
        GatePolicy::module(ModuleKey::Settings),
    );

    let users = gated(
        Router::new().route("/api/admin/lockouts/clear", post(clear_lockout)),
        state,
        GatePolicy::module(ModuleKey::Users),
    );

    Router::new().merge(settings).merge(users)
}
