//! HTTP route handlers.

pub mod admin;
pub mod auth;
pub mod csrf;
pub mod health;
pub mod helpers;
pub mod static_files;

use axum::Router;
use axum::http::{HeaderName, HeaderValue, Method, header};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::config::Config;
use crate::csrf::CSRF_HEADER;
use crate::gate::panic_handler;
use crate::middleware::guard_routes;
use crate::state::AppState;

/// Build the full application router.
pub fn app(state: AppState) -> Router {
    let cors = build_cors_layer(state.config());
    let on_panic = panic_handler(state.environment());

    Router::new()
        .merge(csrf::router(&state))
        .merge(auth::router(&state))
        .merge(admin::router(&state))
        .merge(health::router())
        .fallback(static_files::serve_ui)
        // Middleware layers (last added = first executed in request flow):
        // TraceLayer → CORS → catch_panic → route_guard → routes (gate per route group)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            guard_routes,
        ))
        .layer(CatchPanicLayer::custom(on_panic))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn build_cors_layer(config: &Config) -> CorsLayer {
    let methods = [
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::PATCH,
        Method::DELETE,
        Method::OPTIONS,
    ];

    if config.cors_allowed_origins.len() == 1 && config.cors_allowed_origins[0] == "*" {
        CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods(methods)
            .allow_headers(tower_http::cors::Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_allowed_origins
            .iter()
            .filter_map(|o| match o.parse::<HeaderValue>() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!(origin = %o, "ignoring unparseable CORS origin");
                    None
                }
            })
            .collect();

        // Credentialed CORS cannot use a wildcard header list.
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(methods)
            .allow_headers([
                header::CONTENT_TYPE,
                header::ACCEPT,
                HeaderName::from_static(CSRF_HEADER),
            ])
            .allow_credentials(true)
    }
}
