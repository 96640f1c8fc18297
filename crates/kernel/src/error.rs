//! Application error types.
//!
//! Every error raised inside the request pipeline ends up here. The JSON body
//! is always `{success: false, error, fields?, details?}`. `details` carries
//! the internal message and is only attached outside production, by
//! [`attach_details`] which runs at the gate boundary.

use axum::body::Body;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::config::Environment;

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Application errors.
#[derive(Debug, Error)]
pub enum AppError {
    /// No session, an invalid or expired session, or an unknown/inactive user.
    #[error("authentication required")]
    Unauthenticated,

    /// Valid session, insufficient permission.
    #[error("access denied")]
    Forbidden,

    /// Mutation without a matching anti-forgery token.
    #[error("invalid or missing CSRF token")]
    CsrfRejected,

    #[error("not found")]
    NotFound,

    #[error("too many requests")]
    RateLimited { retry_after: u64 },

    #[error("validation failed")]
    Validation(Vec<FieldError>),

    /// A backing service (user directory, Redis) failed.
    #[error("upstream service failure")]
    Upstream(#[source] anyhow::Error),

    #[error("internal server error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::Forbidden | AppError::CsrfRejected => StatusCode::FORBIDDEN,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Upstream(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine-readable reason, used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Unauthenticated => "unauthenticated",
            AppError::Forbidden => "forbidden",
            AppError::CsrfRejected => "csrf",
            AppError::NotFound => "not_found",
            AppError::RateLimited { .. } => "rate_limited",
            AppError::Validation(_) => "validation",
            AppError::Upstream(_) => "upstream",
            AppError::Internal(_) => "internal",
        }
    }

    /// Build a single-field validation error.
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Validation(vec![FieldError::new(field, message)])
    }

    fn detail(&self) -> Option<String> {
        match self {
            AppError::Upstream(e) | AppError::Internal(e) => Some(format!("{e:#}")),
            _ => None,
        }
    }
}

/// JSON body of every error response.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<FieldError>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorEnvelope {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            fields: None,
            details: None,
        }
    }
}

/// Internal detail of an error, carried in response extensions until the
/// gate decides whether the environment may see it.
#[derive(Debug, Clone)]
pub struct ErrorDetail(pub String);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        match &self {
            AppError::Upstream(e) => tracing::error!(error = %e, "upstream failure"),
            AppError::Internal(e) => tracing::error!(error = %e, "internal server error"),
            _ => tracing::debug!(reason = self.kind(), "request rejected"),
        }

        let mut envelope = ErrorEnvelope::new(self.to_string());
        if let AppError::Validation(fields) = &self {
            envelope.fields = Some(fields.clone());
        }

        let mut response = (status, axum::Json(envelope.clone())).into_response();

        if let AppError::RateLimited { retry_after } = &self {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(*retry_after));
        }

        response.extensions_mut().insert(envelope);
        if let Some(detail) = self.detail() {
            response.extensions_mut().insert(ErrorDetail(detail));
        }

        response
    }
}

/// Re-render an error response with its `details` field outside production.
///
/// Responses without an [`ErrorDetail`] extension pass through untouched.
pub fn attach_details(response: Response, environment: Environment) -> Response {
    if environment.is_production() {
        return response;
    }

    let Some(ErrorDetail(detail)) = response.extensions().get::<ErrorDetail>().cloned() else {
        return response;
    };
    let Some(mut envelope) = response.extensions().get::<ErrorEnvelope>().cloned() else {
        return response;
    };
    envelope.details = Some(detail);

    let body = match serde_json::to_vec(&envelope) {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(error = %e, "failed to serialize error details");
            return response;
        }
    };

    let (mut parts, _) = response.into_parts();
    parts.headers.remove(header::CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(body))
}

/// Result type alias using AppError.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(AppError::Unauthenticated.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::Forbidden.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::CsrfRejected.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            AppError::RateLimited { retry_after: 5 }.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            AppError::invalid("email", "required").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Upstream(anyhow::anyhow!("boom")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn csrf_and_forbidden_are_distinct_reasons() {
        assert_ne!(AppError::CsrfRejected.kind(), AppError::Forbidden.kind());
    }

    #[tokio::test]
    async fn rate_limited_sets_retry_after() {
        let response = AppError::RateLimited { retry_after: 42 }.into_response();
        assert_eq!(response.headers()[header::RETRY_AFTER], "42");
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn details_hidden_in_production() {
        let response = AppError::Internal(anyhow::anyhow!("db exploded")).into_response();
        let response = attach_details(response, Environment::Production);
        let body = body_json(response).await;
        assert_eq!(body["error"], "internal server error");
        assert!(body.get("details").is_none());
    }

    #[tokio::test]
    async fn details_shown_in_development() {
        let response = AppError::Internal(anyhow::anyhow!("db exploded")).into_response();
        let response = attach_details(response, Environment::Development);
        let body = body_json(response).await;
        assert_eq!(body["details"], "db exploded");
    }

    #[tokio::test]
    async fn validation_lists_fields() {
        let response = AppError::invalid("email", "must not be empty").into_response();
        let body = body_json(response).await;
        assert_eq!(body["fields"][0]["field"], "email");
    }
}
