//! Pipeline error taxonomy and error handling utilities for route handlers

use axum::http::StatusCode;
use thiserror::Error;

/// Why an input was refused before decoding. Always recovered per item.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("unsupported file signature")]
    InvalidFileType,
    #[error("malformed url")]
    InvalidUrl,
    #[error("url does not point to a supported image")]
    NotAnImage,
    #[error("data uri is not a supported image")]
    InvalidDataUri,
    #[error("data uri payload is not valid base64")]
    InvalidBase64,
    #[error("source is neither a url nor a data uri")]
    UnknownSource,
    #[error("remote fetch failed: {0}")]
    FetchFailed(String),
    #[error("could not determine image type")]
    UnsupportedMediaType,
}

#[derive(Debug, Error)]
pub enum ModerationError {
    /// Recovered locally as an `invalid` / empty item
    #[error("input rejected: {0}")]
    InputRejected(#[from] Rejection),

    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("inference failed: {0}")]
    Inference(String),

    /// Censorship produced masks but the image could not be re-encoded
    #[error("failed to encode censored image: {0}")]
    EncodingFailed(String),

    #[error("failed to publish censored image: {0}")]
    PublishFailed(String),
}

impl ModerationError {
    /// True for outcomes reported as an ordinary invalid item rather than an error
    pub fn is_rejection(&self) -> bool {
        matches!(self, ModerationError::InputRejected(_) | ModerationError::Decode(_))
    }
}

/// Extension trait for logging errors and converting to StatusCode
pub trait LogErr<T> {
    /// Log error with context and return a custom StatusCode
    fn log_status(self, context: &str, status: StatusCode) -> Result<T, StatusCode>;
}

impl<T, E: std::fmt::Display> LogErr<T> for Result<T, E> {
    fn log_status(self, context: &str, status: StatusCode) -> Result<T, StatusCode> {
        self.map_err(|e| {
            log::warn!("{}: {}", context, e);
            status
        })
    }
}
