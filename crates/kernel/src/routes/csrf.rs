//! CSRF token endpoint.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use axum_extra::extract::cookie::CookieJar;
use serde::Serialize;
use tracing::debug;

use crate::csrf::{CSRF_COOKIE, csrf_cookie, generate_token, is_well_formed};
use crate::gate::{GatePolicy, gated};
use crate::middleware::RateClass;
use crate::state::AppState;

#[derive(Debug, Serialize)]
struct CsrfResponse {
    success: bool,
    token: String,
}

/// GET /api/csrf
///
/// Returns the token already held in the cookie, or mints and sets a new one.
async fn csrf_token(State(state): State<AppState>, jar: CookieJar) -> (CookieJar, Json<CsrfResponse>) {
    let existing = jar
        .get(CSRF_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|token| is_well_formed(token));

    let (jar, token) = match existing {
        Some(token) => (jar, token),
        None => {
            let token = generate_token();
            debug!("minted csrf token");
            (jar.add(csrf_cookie(token.clone(), state.secure_cookies())), token)
        }
    };

    (
        jar,
        Json(CsrfResponse {
            success: true,
            token,
        }),
    )
}

/// Create the CSRF router.
pub fn router(state: &AppState) -> Router<AppState> {
    gated(
        Router::new().route("/api/csrf", get(csrf_token)),
        state,
        GatePolicy::public().rate(RateClass::ReadOnly),
    )
}
