//! CSRF token generation and verification.
//!
//! Double-submit scheme: the token lives in a script-readable `csrf-token`
//! cookie and mutating requests echo it in the `x-csrf-token` header.

use axum::http::{HeaderMap, Method};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use rand::RngCore;
use subtle::ConstantTimeEq;

use crate::error::{AppError, AppResult};

/// Cookie holding the token.
pub const CSRF_COOKIE: &str = "csrf-token";

/// Header carrying the submitted token.
pub const CSRF_HEADER: &str = "x-csrf-token";

/// Token cookie lifetime.
pub const CSRF_TOKEN_MAX_AGE_HOURS: i64 = 24;

/// Random bytes per token (hex encoded to 64 chars).
const TOKEN_BYTES: usize = 32;

/// Generate a new token.
pub fn generate_token() -> String {
    let mut random_bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut random_bytes);
    hex::encode(random_bytes)
}

/// Whether `token` has the shape of a minted token (64 hex chars).
pub fn is_well_formed(token: &str) -> bool {
    token.len() == TOKEN_BYTES * 2 && token.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Compare a submitted token against the expected one in constant time.
pub fn validate_token(submitted: &str, expected: &str) -> bool {
    if submitted.is_empty() || expected.is_empty() {
        return false;
    }
    if submitted.len() != expected.len() {
        return false;
    }
    submitted.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Whether `method` must carry a token.
pub fn requires_token(method: &Method) -> bool {
    [Method::POST, Method::PUT, Method::PATCH, Method::DELETE].contains(method)
}

/// The token stored in the request's `csrf-token` cookie.
pub fn cookie_token(headers: &HeaderMap) -> Option<String> {
    CookieJar::from_headers(headers)
        .get(CSRF_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}

/// The token the client submitted: header first, then the cookie when
/// `cookie_fallback` is enabled.
pub fn submitted_token(headers: &HeaderMap, cookie_fallback: bool) -> Option<String> {
    let header = headers
        .get(CSRF_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    match header {
        Some(token) => Some(token.to_string()),
        None if cookie_fallback => cookie_token(headers),
        None => None,
    }
}

/// Verify the token of a request. Safe methods always pass.
pub fn verify_request(method: &Method, headers: &HeaderMap, cookie_fallback: bool) -> AppResult<()> {
    if !requires_token(method) {
        return Ok(());
    }

    let Some(expected) = cookie_token(headers) else {
        return Err(AppError::CsrfRejected);
    };
    let Some(submitted) = submitted_token(headers, cookie_fallback) else {
        return Err(AppError::CsrfRejected);
    };

    if validate_token(&submitted, &expected) {
        Ok(())
    } else {
        Err(AppError::CsrfRejected)
    }
}

/// `csrf-token` cookie. Not HttpOnly so client script can echo it.
pub fn csrf_cookie(token: String, secure: bool) -> Cookie<'static> {
    Cookie::build((CSRF_COOKIE, token))
        .http_only(false)
        .secure(secure)
        .same_site(SameSite::Strict)
        .path("/")
        .max_age(time::Duration::hours(CSRF_TOKEN_MAX_AGE_HOURS))
        .build()
}

/// An empty, immediately expiring `csrf-token` cookie.
pub fn clear_csrf_cookie(secure: bool) -> Cookie<'static> {
    Cookie::build((CSRF_COOKIE, ""))
        .http_only(false)
        .secure(secure)
        .same_site(SameSite::Strict)
        .path("/")
        .max_age(time::Duration::ZERO)
        .build()
}
