//! Censorship endpoints (/censor, /censor-url)

use axum::{
    Json, Router,
    extract::{Multipart, State, multipart::MultipartRejection, rejection::JsonRejection},
    response::Response,
    routing::post,
};
use std::sync::Arc;

use super::{read_sources, read_uploads};
use crate::AppState;
use crate::models::{CensorItem, Prediction, SourceRequest};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/censor", post(censor_files))
        .route("/censor-url", post(censor_sources))
}

/// POST /censor - Mask detected regions and publish the censored copies
async fn censor_files(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Prediction<CensorItem>>, Response> {
    let uploads = read_uploads(multipart).await?;
    let prediction = state.moderator.censor_batch(uploads).await;
    Ok(Json(Prediction { prediction }))
}

/// POST /censor-url - Same as /censor for URL and data URI sources
async fn censor_sources(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Vec<SourceRequest>>, JsonRejection>,
) -> Result<Json<Prediction<CensorItem>>, Response> {
    let sources = read_sources(body)?;
    let prediction = state.moderator.censor_batch(sources).await;
    Ok(Json(Prediction { prediction }))
}
