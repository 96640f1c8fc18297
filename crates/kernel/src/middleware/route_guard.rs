//! Edge route guard.
//!
//! Page requests without a usable session cookie are redirected to the login
//! page. Only the cookie is checked (signature and expiry); whether the user
//! still exists and is active is decided by the API gate.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::cookie::CookieJar;
use tracing::debug;

use crate::session::{SESSION_COOKIE, clear_session_cookie};
use crate::state::AppState;

/// Login page path.
pub const LOGIN_PATH: &str = "/login";

/// Path prefixes that never require a session.
const PUBLIC_PREFIXES: &[&str] = &[
    LOGIN_PATH,
    "/api",
    "/_next",
    "/static",
    "/assets",
    "/favicon.ico",
    "/health",
];

/// File extensions served as public static assets.
const ASSET_EXTENSIONS: &[&str] = &[
    "css", "js", "map", "png", "jpg", "jpeg", "gif", "svg", "ico", "webp", "woff", "woff2",
    "ttf", "txt", "xml", "webmanifest",
];

/// Whether `path` is reachable without a session.
///
/// Prefixes match whole segments, so `/apiary` is protected while `/api` and
/// `/api/csrf` are public.
pub fn is_public_path(path: &str) -> bool {
    let prefixed = PUBLIC_PREFIXES.iter().any(|prefix| {
        path.strip_prefix(prefix)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    });
    if prefixed {
        return true;
    }

    path.rsplit('/')
        .next()
        .and_then(|segment| segment.rsplit_once('.'))
        .is_some_and(|(stem, ext)| {
            !stem.is_empty() && ASSET_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
        })
}

/// Login URL that returns to `target` (path plus query) afterwards.
pub fn login_redirect(target: &str) -> String {
    let path = target.split('?').next().unwrap_or(target);
    if target.is_empty() || path == LOGIN_PATH {
        return LOGIN_PATH.to_string();
    }
    format!("{LOGIN_PATH}?redirect={}", urlencoding::encode(target))
}

/// Route guard middleware.
pub async fn guard_routes(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let path = request.uri().path();
    if is_public_path(path) {
        return next.run(request).await;
    }

    if state
        .codec()
        .current_session(request.headers(), state.now())
        .is_some()
    {
        return next.run(request).await;
    }

    let target = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or(path);
    let location = login_redirect(target);
    debug!(path = %path, location = %location, "no session, redirecting to login");

    // A cookie that failed to parse or has expired is cleared on the way out.
    let jar = CookieJar::from_headers(request.headers());
    let redirect = Redirect::to(&location);
    if jar.get(SESSION_COOKIE).is_some() {
        let jar = jar.add(clear_session_cookie(state.secure_cookies()));
        (jar, redirect).into_response()
    } else {
        redirect.into_response()
    }
}
