//! UI bundle serving.
//!
//! Non-API paths that no route matched are served from `STATIC_DIR`. Paths
//! without a file extension fall back to `index.html` so client-side routes
//! resolve.

use std::path::Path;

use axum::body::Body;
use axum::extract::State;
use axum::http::{StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use tokio::fs;
use tracing::warn;

use crate::error::AppError;
use crate::state::AppState;

/// Router fallback.
pub async fn serve_ui(State(state): State<AppState>, uri: Uri) -> Response {
    let path = uri.path();

    if path == "/api" || path.starts_with("/api/") {
        return AppError::NotFound.into_response();
    }

    let relative = path.trim_start_matches('/');
    // Security: prevent path traversal
    if relative.split('/').any(|seg| seg == "..") || relative.contains('\0') {
        return not_found();
    }

    let static_dir = &state.config().static_dir;
    let file_path = if relative.is_empty() {
        static_dir.join("index.html")
    } else {
        static_dir.join(relative)
    };

    if let Some(response) = read_file(&file_path).await {
        return response;
    }

    if Path::new(relative).extension().is_none()
        && let Some(response) = read_file(&static_dir.join("index.html")).await
    {
        return response;
    }

    not_found()
}

async fn read_file(file_path: &Path) -> Option<Response> {
    let content = match fs::read(file_path).await {
        Ok(content) => content,
        Err(e) => {
            if !matches!(
                e.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::IsADirectory
            ) {
                warn!(path = %file_path.display(), error = %e, "failed to read static file");
            }
            return None;
        }
    };

    let content_type = mime_from_path(file_path);
    let cache_control = if content_type == "text/html" {
        "no-cache"
    } else {
        "public, max-age=86400" // 1 day cache
    };

    Some(
        (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, content_type),
                (header::CACHE_CONTROL, cache_control),
            ],
            Body::from(content),
        )
            .into_response(),
    )
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not found").into_response()
}

fn mime_from_path(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("js") => "application/javascript",
        Some("css") => "text/css",
        Some("html") => "text/html",
        Some("json") | Some("map") => "application/json",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("webp") => "image/webp",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("ttf") => "font/ttf",
        Some("ico") => "image/x-icon",
        Some("txt") => "text/plain",
        Some("webmanifest") => "application/manifest+json",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_types() {
        assert_eq!(mime_from_path(Path::new("app.js")), "application/javascript");
        assert_eq!(mime_from_path(Path::new("index.html")), "text/html");
        assert_eq!(mime_from_path(Path::new("blob")), "application/octet-stream");
    }
}
