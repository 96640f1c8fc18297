//! Request handler wrapper.
//!
//! A [`GatePolicy`] names what a group of routes needs. [`gated`] wraps the
//! routes in [`enforce`], which runs the stages strictly in order and stops at
//! the first failure:
//!
//! 1. rate limit (the only side effect before the handler), unless skipped
//! 2. authentication and module access
//! 3. CSRF for mutating verbs
//! 4. the handler
//! 5. error details, outside production only

use std::any::Any;
use std::net::SocketAddr;

use axum::Router;
use axum::extract::{ConnectInfo, FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{debug, warn};

use crate::csrf;
use crate::config::Environment;
use crate::error::{AppError, attach_details};
use crate::middleware::rate_limit::{
    RateClass, apply_rate_headers, categorize, client_identity, rate_limit_response,
};
use crate::models::{AuthUser, ModuleKey};
use crate::state::AppState;

/// Who may call a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRequirement {
    Public,
    Authenticated,
    Module(ModuleKey),
}

/// Which rate-limit bucket a route draws on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateMode {
    /// Classify each request by method and path.
    Classify,
    Fixed(RateClass),
    /// Never limited. Logout uses this so a spent budget cannot strand a session.
    Skip,
}

/// Whether mutating requests must carry a CSRF token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsrfMode {
    Mutations,
    Skip,
}

/// What the gate enforces for a group of routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatePolicy {
    pub rate: RateMode,
    pub auth: AuthRequirement,
    pub csrf: CsrfMode,
}

impl GatePolicy {
    pub fn public() -> Self {
        Self {
            rate: RateMode::Classify,
            auth: AuthRequirement::Public,
            csrf: CsrfMode::Mutations,
        }
    }

    pub fn authenticated() -> Self {
        Self {
            auth: AuthRequirement::Authenticated,
            ..Self::public()
        }
    }

    pub fn module(module: ModuleKey) -> Self {
        Self {
            auth: AuthRequirement::Module(module),
            ..Self::public()
        }
    }

    pub fn rate(mut self, class: RateClass) -> Self {
        self.rate = RateMode::Fixed(class);
        self
    }

    pub fn skip_rate(mut self) -> Self {
        self.rate = RateMode::Skip;
        self
    }

    pub fn skip_csrf(mut self) -> Self {
        self.csrf = CsrfMode::Skip;
        self
    }
}

/// The authenticated caller, inserted into request extensions by the gate.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user: AuthUser,
}

/// Wrap every route of `router` in the gate.
///
/// Uses `route_layer`, so unmatched paths still fall through to the router's
/// fallback instead of being rate limited or rejected.
pub fn gated(router: Router<AppState>, state: &AppState, policy: GatePolicy) -> Router<AppState> {
    router.route_layer(axum::middleware::from_fn_with_state(
        (state.clone(), policy),
        enforce,
    ))
}

/// Gate middleware.
pub async fn enforce(
    State((state, policy)): State<(AppState, GatePolicy)>,
    mut request: Request,
    next: Next,
) -> Response {
    let environment = state.environment();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    // 1. Rate limit
    let class = match policy.rate {
        RateMode::Classify => Some(categorize(&method, &path)),
        RateMode::Fixed(class) => Some(class),
        RateMode::Skip => None,
    };

    let decision = match class {
        Some(class) => {
            let addr = request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| *addr);
            let identity = client_identity(addr, request.headers());

            match state.rate_limiter().check(class, &identity).await {
                Ok(decision) => Some(decision),
                Err(retry_after) => {
                    warn!(
                        reason = "rate_limited",
                        class = class.as_str(),
                        identity = %identity,
                        %method,
                        path = %path,
                        retry_after,
                        "request rejected"
                    );
                    return rate_limit_response(retry_after);
                }
            }
        }
        None => None,
    };

    // 2. Authentication and module access
    let authenticated = match policy.auth {
        AuthRequirement::Public => Ok(None),
        AuthRequirement::Authenticated => state
            .auth()
            .require_authenticated_user(request.headers())
            .await
            .map(|user| Some(AuthContext { user })),
        AuthRequirement::Module(module) => state
            .auth()
            .require_module_access(request.headers(), module)
            .await
            .map(|user| Some(AuthContext { user })),
    };

    let context = match authenticated {
        Ok(context) => context,
        Err(e) => {
            log_rejection(&e, &method, &path);
            return attach_details(rejection(e), environment);
        }
    };

    // 3. CSRF
    if policy.csrf == CsrfMode::Mutations
        && let Err(e) = csrf::verify_request(
            &method,
            request.headers(),
            state.config().csrf_cookie_fallback,
        )
    {
        log_rejection(&e, &method, &path);
        return attach_details(rejection(e), environment);
    }

    if let Some(context) = context {
        request.extensions_mut().insert(context);
    }

    // 4. Handler
    let mut response = next.run(request).await;

    // 5. Error mapping
    if let Some(decision) = &decision {
        apply_rate_headers(response.headers_mut(), decision);
    }
    attach_details(response, environment)
}

fn rejection(error: AppError) -> Response {
    error.into_response()
}

fn log_rejection(error: &AppError, method: &axum::http::Method, path: &str) {
    match error {
        AppError::Unauthenticated => {
            debug!(reason = error.kind(), %method, path = %path, "request rejected");
        }
        _ => {
            warn!(reason = error.kind(), %method, path = %path, "request rejected");
        }
    }
}

/// Extractor for the user the gate authenticated.
///
/// Rejects with 401 on routes whose policy does not authenticate.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub AuthUser);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .map(|context| CurrentUser(context.user.clone()))
            .ok_or(AppError::Unauthenticated)
    }
}

/// Panic handler for `CatchPanicLayer` that adds details outside production.
pub fn panic_handler(
    environment: Environment,
) -> impl Fn(Box<dyn Any + Send + 'static>) -> Response + Clone + Send + Sync + 'static {
    move |panic: Box<dyn Any + Send + 'static>| {
        attach_details(panic_response(panic), environment)
    }
}

/// Map a handler panic to the generic 500 envelope.
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "unknown panic".to_string()
    };

    AppError::Internal(anyhow::anyhow!("handler panicked: {message}")).into_response()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn builders_compose() {
        let policy = GatePolicy::module(ModuleKey::Settings)
            .rate(RateClass::Login)
            .skip_csrf();
        assert_eq!(policy.auth, AuthRequirement::Module(ModuleKey::Settings));
        assert_eq!(policy.rate, RateMode::Fixed(RateClass::Login));
        assert_eq!(policy.csrf, CsrfMode::Skip);

        let policy = GatePolicy::public().skip_rate().skip_csrf();
        assert_eq!(policy.rate, RateMode::Skip);

        let policy = GatePolicy::authenticated();
        assert_eq!(policy.rate, RateMode::Classify);
        assert_eq!(policy.csrf, CsrfMode::Mutations);
    }

    #[test]
    fn panics_become_500() {
        let response = panic_response(Box::new("boom"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn panic_details_follow_environment() {
        let handler = panic_handler(Environment::Development);
        let body = body_json(handler(Box::new("boom".to_string()) as Box<dyn Any + Send>)).await;
        assert_eq!(body["success"], false);
        assert!(body["details"].as_str().unwrap().contains("boom"));

        let handler = panic_handler(Environment::Production);
        let body = body_json(handler(Box::new("boom") as Box<dyn Any + Send>)).await;
        assert!(body.get("details").is_none());
    }

    #[tokio::test]
    async fn current_user_requires_context() {
        let (mut parts, _) = axum::http::Request::new(()).into_parts();
        let err = CurrentUser::from_request_parts(&mut parts, &())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthenticated));
    }
}
