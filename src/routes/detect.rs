//! Detection endpoints (/detect, /detect-url)

use axum::{
    Json, Router,
    extract::{Multipart, State, multipart::MultipartRejection, rejection::JsonRejection},
    response::Response,
    routing::post,
};
use std::sync::Arc;

use super::{read_sources, read_uploads};
use crate::AppState;
use crate::models::{DetectItem, Prediction, SourceRequest};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/detect", post(detect_files))
        .route("/detect-url", post(detect_sources))
}

/// POST /detect - Exposed-region boxes for each uploaded file
async fn detect_files(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Prediction<DetectItem>>, Response> {
    let uploads = read_uploads(multipart).await?;
    let prediction = state.moderator.detect_batch(uploads).await;
    Ok(Json(Prediction { prediction }))
}

/// POST /detect-url
async fn detect_sources(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Vec<SourceRequest>>, JsonRejection>,
) -> Result<Json<Prediction<DetectItem>>, Response> {
    let sources = read_sources(body)?;
    let prediction = state.moderator.detect_batch(sources).await;
    Ok(Json(Prediction { prediction }))
}
