//! Authentication routes (login, session, user, logout, access checks).

use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_extra::extract::cookie::CookieJar;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::csrf::clear_csrf_cookie;
use crate::error::{AppError, ErrorEnvelope, FieldError};
use crate::gate::{CurrentUser, GatePolicy, gated};
use crate::middleware::RateClass;
use crate::models::module::UnknownModule;
use crate::models::{AuthUser, ModuleKey};
use crate::permissions::{Access, accessible_modules, resolve_access};
use crate::routes::helpers::{ApiResponse, JsonBody, ok};
use crate::session::{Session, clear_session_cookie, session_cookie};
use crate::state::AppState;

/// Message for every credential failure, so accounts cannot be enumerated.
const INVALID_CREDENTIALS: &str = "Invalid email or password";

/// Login request body.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

impl LoginRequest {
    fn validate(&self) -> Result<(), AppError> {
        let mut fields = Vec::new();
        let email = self.email.trim();
        if email.is_empty() {
            fields.push(FieldError::new("email", "Email is required"));
        } else if !email.contains('@') {
            fields.push(FieldError::new("email", "Email must be a valid address"));
        }
        if self.password.is_empty() {
            fields.push(FieldError::new("password", "Password is required"));
        }

        if fields.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(fields))
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginData {
    user: AuthUser,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionData {
    user_id: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct AccessData {
    module: ModuleKey,
    granted: bool,
    via: Access,
}

#[derive(Debug, Serialize)]
struct ModulesData {
    modules: Vec<ModuleKey>,
}

#[derive(Debug, Serialize)]
struct LogoutResponse {
    success: bool,
}

/// Typed login error for explicit status code mapping.
#[derive(Debug)]
enum LoginError {
    /// Account temporarily locked due to too many failed attempts (429).
    Locked { retry_after: u64 },
    /// Wrong email or password, or an inactive account (401).
    InvalidCredentials,
    /// Validation, directory or internal failure.
    Failed(AppError),
}

impl From<AppError> for LoginError {
    fn from(e: AppError) -> Self {
        LoginError::Failed(e)
    }
}

impl IntoResponse for LoginError {
    fn into_response(self) -> Response {
        match self {
            LoginError::Locked { retry_after } => {
                let message = format!(
                    "Account temporarily locked. Try again in {} minutes.",
                    retry_after / 60 + 1
                );
                let mut response =
                    (StatusCode::TOO_MANY_REQUESTS, Json(ErrorEnvelope::new(message))).into_response();
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
                response
            }
            LoginError::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                Json(ErrorEnvelope::new(INVALID_CREDENTIALS)),
            )
                .into_response(),
            LoginError::Failed(e) => e.into_response(),
        }
    }
}

/// Perform login and return the authenticated user on success.
async fn do_login(state: &AppState, request: &LoginRequest) -> Result<AuthUser, LoginError> {
    request.validate()?;
    let email = request.email.trim();
    let lockout = state.lockout();

    if let Some(retry_after) = lockout.lockout_remaining(email) {
        warn!(email = %email, "login attempt on locked account");
        return Err(LoginError::Locked { retry_after });
    }

    let record = state
        .users()
        .find_by_email(email)
        .await
        .map_err(AppError::Upstream)?;

    let verified = match record {
        Some(record) if record.is_active => {
            let password = request.password.clone();
            tokio::task::spawn_blocking(move || {
                let valid = record.verify_password(&password);
                (record, valid)
            })
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("password verification failed: {e}")))?
        }
        _ => {
            // Unknown and inactive accounts count as failures too.
            lockout.record_failed_attempt(email);
            return Err(LoginError::InvalidCredentials);
        }
    };

    let (record, valid) = verified;
    if !valid {
        let (locked, remaining) = lockout.record_failed_attempt(email);
        if locked {
            let retry_after = lockout.lockout_remaining(email).unwrap_or(1);
            return Err(LoginError::Locked { retry_after });
        }
        info!(email = %email, attempts_remaining = remaining, "failed login");
        return Err(LoginError::InvalidCredentials);
    }

    lockout.clear_attempts(email);
    Ok(record.to_auth_user())
}

/// JSON login handler.
///
/// POST /api/auth/login
async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    JsonBody(request): JsonBody<LoginRequest>,
) -> Result<(CookieJar, Response), LoginError> {
    let user = do_login(&state, &request).await?;

    let session = Session::starting_at(user.id.clone(), state.now());
    let value = state.codec().serialize(&session).map_err(AppError::Internal)?;
    let jar = jar.add(session_cookie(value, state.secure_cookies()));

    info!(user_id = %user.id, "user logged in");

    let body = ok(LoginData {
        user,
        expires_at: session.expire,
    });
    Ok((jar, body.into_response()))
}

/// GET /api/auth/session
///
/// Reports the current session, or clears the cookie and answers 401.
async fn session(State(state): State<AppState>, headers: HeaderMap, jar: CookieJar) -> Response {
    match state.codec().current_session(&headers, state.now()) {
        Some(session) => ok(SessionData {
            user_id: session.user_id,
            expires_at: session.expire,
        })
        .into_response(),
        None => (
            jar.add(clear_session_cookie(state.secure_cookies())),
            AppError::Unauthenticated,
        )
            .into_response(),
    }
}

/// GET /api/auth/user
async fn current_user(CurrentUser(user): CurrentUser) -> Json<ApiResponse<AuthUser>> {
    ok(user)
}

/// GET /api/auth/access/{module}
async fn module_access(
    CurrentUser(user): CurrentUser,
    Path(module): Path<String>,
) -> Result<Response, AppError> {
    let module: ModuleKey = module
        .parse()
        .map_err(|e: UnknownModule| AppError::invalid("module", e.to_string()))?;

    match resolve_access(&user, module) {
        Access::Denied => {
            warn!(reason = "forbidden", user_id = %user.id, module = %module, "module access denied");
            Err(AppError::Forbidden)
        }
        via => Ok(ok(AccessData {
            module,
            granted: true,
            via,
        })
        .into_response()),
    }
}

/// GET /api/auth/modules
async fn modules(CurrentUser(user): CurrentUser) -> Response {
    ok(ModulesData {
        modules: accessible_modules(&user),
    })
    .into_response()
}

/// POST /api/auth/logout
///
/// Always reports success. Both cookies are cleared whether or not a session
/// was present.
async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> (CookieJar, Json<LogoutResponse>) {
    if let Some(session) = state.codec().current_session(&headers, state.now()) {
        info!(user_id = %session.user_id, "user logged out");
    }

    let secure = state.secure_cookies();
    let jar = jar
        .add(clear_session_cookie(secure))
        .add(clear_csrf_cookie(secure));

    (jar, Json(LogoutResponse { success: true }))
}

/// Create the auth router.
pub fn router(state: &AppState) -> Router<AppState> {
    let login_routes = gated(
        Router::new().route("/api/auth/login", post(login)),
        state,
        GatePolicy::public().rate(RateClass::Login),
    );

    let public_routes = gated(
        Router::new().route("/api/auth/session", get(session)),
        state,
        GatePolicy::public().rate(RateClass::ReadOnly),
    );

    let logout_routes = gated(
        Router::new().route("/api/auth/logout", post(logout)),
        state,
        GatePolicy::public().skip_rate().skip_csrf(),
    );

    let user_routes = gated(
        Router::new()
            .route("/api/auth/user", get(current_user))
            .route("/api/auth/modules", get(modules))
            .route("/api/auth/access/{module}", get(module_access)),
        state,
        GatePolicy::authenticated(),
    );

    Router::new()
        .merge(login_routes)
        .merge(public_routes)
        .merge(logout_routes)
        .merge(user_routes)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn request(email: &str, password: &str) -> LoginRequest {
        LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        }
    }

    #[test]
    fn validation_reports_each_field() {
        let Err(AppError::Validation(fields)) = request("", "").validate() else {
            panic!("expected validation error");
        };
        let names: Vec<_> = fields.iter().map(|f| f.field.as_str()).collect();
        assert_eq!(names, vec!["email", "password"]);
    }

    #[test]
    fn email_needs_at_sign() {
        assert!(request("not-an-email", "pw").validate().is_err());
        assert!(request("ayse@kafkasder.org", "pw").validate().is_ok());
    }

    #[test]
    fn locked_maps_to_429_with_retry_after() {
        let response = LoginError::Locked { retry_after: 120 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "120");
    }

    #[test]
    fn invalid_credentials_maps_to_401() {
        let response = LoginError::InvalidCredentials.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
