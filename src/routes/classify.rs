//! Classification endpoints (/classify, /classify-url)

use axum::{
    Json, Router,
    extract::{Multipart, State, multipart::MultipartRejection, rejection::JsonRejection},
    response::Response,
    routing::post,
};
use std::sync::Arc;

use super::{read_sources, read_uploads};
use crate::AppState;
use crate::models::{ClassifyItem, Prediction, SourceRequest};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/classify", post(classify_files))
        .route("/classify-url", post(classify_sources))
}

/// POST /classify - Label each uploaded file nude / sexy / safe
async fn classify_files(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Prediction<ClassifyItem>>, Response> {
    let uploads = read_uploads(multipart).await?;
    let prediction = state.moderator.classify_batch(uploads).await;
    Ok(Json(Prediction { prediction }))
}

/// POST /classify-url - Label each URL or data URI source
async fn classify_sources(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Vec<SourceRequest>>, JsonRejection>,
) -> Result<Json<Prediction<ClassifyItem>>, Response> {
    let sources = read_sources(body)?;
    let prediction = state.moderator.classify_batch(sources).await;
    Ok(Json(Prediction { prediction }))
}
