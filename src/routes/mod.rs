pub mod censor;
pub mod classify;
pub mod detect;
pub mod health;
pub mod media;

use axum::{
    Json, Router,
    extract::{Multipart, multipart::MultipartRejection, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::sync::Arc;

use crate::AppState;
use crate::constants::UPLOAD_FIELD_NAME;
use crate::models::{ImageSource, SourceRequest};
use crate::services::error::LogErr;

/// Build all routes for the API
pub fn build_routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(health::routes())
        .merge(classify::routes())
        .merge(detect::routes())
        .merge(censor::routes())
        .merge(media::routes())
}

/// Request-level failure, rendered as `{"detail": "..."}`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: &'static str,
}

impl ApiError {
    const NO_FILES: ApiError = ApiError {
        status: StatusCode::UNPROCESSABLE_ENTITY,
        detail: "No file(s) provided.",
    };
    const NO_SOURCES: ApiError = ApiError {
        status: StatusCode::BAD_REQUEST,
        detail: "No source(s) provided.",
    };
    const BAD_BODY: ApiError = ApiError {
        status: StatusCode::UNPROCESSABLE_ENTITY,
        detail: "Request body must be a JSON list of {\"source\": ...} objects.",
    };
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

/// Collect every `files` field of a multipart body as an upload
pub async fn read_uploads(
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Vec<ImageSource>, Response> {
    let mut multipart = multipart.map_err(|e| {
        log::debug!("[uploads] Not a multipart body: {}", e);
        ApiError::NO_FILES.into_response()
    })?;

    let mut uploads = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .log_status("Multipart field error", StatusCode::BAD_REQUEST)
        .map_err(IntoResponse::into_response)?
    {
        if field.name() != Some(UPLOAD_FIELD_NAME) {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .log_status("Failed to read upload", StatusCode::BAD_REQUEST)
            .map_err(IntoResponse::into_response)?;
        uploads.push(ImageSource::Upload { bytes, filename });
    }

    if uploads.is_empty() {
        return Err(ApiError::NO_FILES.into_response());
    }
    log::info!("[uploads] Received {} file(s)", uploads.len());
    Ok(uploads)
}

/// Parse the JSON source list. An empty list is refused before any work.
pub fn read_sources(
    body: Result<Json<Vec<SourceRequest>>, JsonRejection>,
) -> Result<Vec<ImageSource>, Response> {
    let Json(requests) = body.map_err(|e| {
        log::debug!("[sources] Bad request body: {}", e);
        ApiError::BAD_BODY.into_response()
    })?;

    if requests.is_empty() {
        return Err(ApiError::NO_SOURCES.into_response());
    }
    Ok(requests
        .iter()
        .map(|r| ImageSource::from_source(&r.source))
        .collect())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::inference::{Detector, NoOpDetector};
    use crate::services::moderation::tests::{FixedDetector, moderator, one_box, white_image};
    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request, header};
    use image::ImageFormat;
    use std::path::Path;
    use tower::ServiceExt;

    const BOUNDARY: &str = "nudenyboundary";

    pub fn app(detector: Arc<dyn Detector>, storage_root: &Path) -> Router {
        let state = Arc::new(AppState {
            moderator: moderator(detector, storage_root),
        });
        build_routes().with_state(state)
    }

    pub fn multipart_body(parts: &[(&str, &str, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, filename, data) in parts {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                    name, filename
                )
                .as_bytes(),
            );
            body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    pub fn multipart_request(uri: &str, body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    pub fn json_request(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    pub async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_empty_source_list_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        for uri in ["/classify-url", "/detect-url", "/censor-url"] {
            let (status, body) = send(
                app(Arc::new(NoOpDetector), dir.path()),
                json_request(uri, serde_json::json!([])),
            )
            .await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
            assert_eq!(body, serde_json::json!({"detail": "No source(s) provided."}));
        }
    }

    #[tokio::test]
    async fn test_missing_files_is_unprocessable() {
        let dir = tempfile::tempdir().unwrap();
        for uri in ["/classify", "/detect", "/censor"] {
            let request = Request::builder()
                .method(Method::POST)
                .uri(uri)
                .body(Body::empty())
                .unwrap();
            let (status, body) = send(app(Arc::new(NoOpDetector), dir.path()), request).await;
            assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{}", uri);
            assert_eq!(body["detail"], "No file(s) provided.");
        }
    }

    #[tokio::test]
    async fn test_other_fields_do_not_count_as_files() {
        let dir = tempfile::tempdir().unwrap();
        let body = multipart_body(&[("image", "a.png", b"data")]);
        let (status, _) = send(
            app(Arc::new(NoOpDetector), dir.path()),
            multipart_request("/detect", body),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_missing_json_body_is_unprocessable() {
        let dir = tempfile::tempdir().unwrap();
        let request = Request::builder()
            .method(Method::POST)
            .uri("/detect-url")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(app(Arc::new(NoOpDetector), dir.path()), request).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["detail"].is_string());
    }

    #[tokio::test]
    async fn test_get_is_method_not_allowed() {
        let dir = tempfile::tempdir().unwrap();
        for uri in [
            "/classify",
            "/classify-url",
            "/detect",
            "/detect-url",
            "/censor",
            "/censor-url",
        ] {
            let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
            let (status, _) = send(app(Arc::new(NoOpDetector), dir.path()), request).await;
            assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED, "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_censor_upload_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let png = white_image(ImageFormat::Png);
        let body = multipart_body(&[("files", "beach.png", &png), ("files", "notes.txt", b"hello")]);

        let (status, body) = send(
            app(Arc::new(FixedDetector(one_box())), dir.path()),
            multipart_request("/censor", body),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let items = body["Prediction"].as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["filename"], "beach.png");
        assert!(items[0]["url"].as_str().unwrap().ends_with("-beach.png"));
        assert_eq!(items[0]["exposed_parts"]["female_breast"].as_array().unwrap().len(), 1);
        assert_eq!(items[1]["filename"], "notes.txt");
        assert_eq!(items[1]["url"], "");
    }
}
