//! Serves censored artifacts when publishing to a local directory (/media/*)

use axum::{
    Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use std::sync::Arc;

use crate::AppState;
use crate::models::MediaType;
use crate::services::error::LogErr;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/media/{*path}", get(serve_media))
}

fn content_type_for(path: &std::path::Path) -> &'static str {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(MediaType::from_name)
        .map(|t| match t {
            MediaType::Png => "image/png",
            MediaType::Bmp => "image/bmp",
            MediaType::Jpg | MediaType::Jpeg | MediaType::Jfif => "image/jpeg",
        })
        .unwrap_or("application/octet-stream")
}

/// GET /media/*path - 404 unless artifacts are stored locally
async fn serve_media(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    // Names like `a..b.png` are fine; only a `..` segment walks upwards
    if path.split(['/', '\\']).any(|segment| segment == "..") || path.contains('\0') {
        return Err(StatusCode::FORBIDDEN);
    }

    let root = state
        .moderator
        .publisher()
        .store()
        .local_root()
        .ok_or(StatusCode::NOT_FOUND)?;

    // canonicalize() resolves symlinks; the result must stay under the root
    let canonical = root
        .join(&path)
        .canonicalize()
        .map_err(|_| StatusCode::NOT_FOUND)?;
    let root_canonical = root
        .canonicalize()
        .log_status("Failed to canonicalize storage path", StatusCode::INTERNAL_SERVER_ERROR)?;
    if !canonical.starts_with(&root_canonical) {
        return Err(StatusCode::FORBIDDEN);
    }

    let bytes = tokio::fs::read(&canonical)
        .await
        .map_err(|_| StatusCode::NOT_FOUND)?;

    // Object names carry a random token, so they never change
    Ok((
        [
            (header::CONTENT_TYPE, content_type_for(&canonical)),
            (header::CACHE_CONTROL, "public, max-age=31536000, immutable"),
        ],
        bytes,
    ))
}
