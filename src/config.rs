//! Service configuration, read once from the environment at startup.
//!
//! ## Environment Variables
//! - `PORT` - port to listen on (default: `3000`)
//! - `MODERATION_BACKEND` - `model` or `noop` (default: `model`)
//! - `DETECTION_MODEL_PATH` - ONNX detection model (default: `models/detection/detector.onnx`)
//! - `DETECTION_LABELS_PATH` - label map, one label per class id (default: `models/detection/labelmap.txt`)
//! - `DETECTION_THRESHOLD` - minimum score, exclusive, in (0, 1) (default: `0.5`)
//! - `DETECTION_OUTPUT_BOXES` / `_CLASSES` / `_SCORES` - output tensor indices (default: `1` / `3` / `0`)
//! - `CLASSIFIER_MODEL_REPO` - Hugging Face repo of the ViT classifier
//! - `STORAGE_BUCKET` - bucket for censored images (default: `nudeny-storage`)
//! - `STORAGE_PUBLIC_HOST` - host used in returned URLs (default: `storage.googleapis.com`)
//! - `LOCAL_STORAGE_PATH` - write artifacts to this directory instead of GCS (optional)
//! - `LOCAL_PUBLIC_BASE` - URL prefix for local artifacts (default: `http://localhost:<PORT>/media`)
//! - `FETCH_TIMEOUT_SECS` - remote image fetch timeout (default: `10`)
//! - `BATCH_CONCURRENCY` - items processed at once per batch (default: `8`)
//! - `MAX_UPLOAD_SIZE` - request body limit in bytes (default: 50 MB)

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::constants::{
    DEFAULT_BATCH_CONCURRENCY, DEFAULT_BUCKET_NAME, DEFAULT_CLASSIFIER_REPO,
    DEFAULT_DETECTION_THRESHOLD, DEFAULT_FETCH_TIMEOUT_SECS, DEFAULT_PUBLIC_HOST, MAX_UPLOAD_SIZE,
};

/// Which inference implementation to load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Real models loaded from disk / Hugging Face
    Model,
    /// Always-safe, never-detect stand-ins
    NoOp,
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "model" => Ok(Backend::Model),
            "noop" => Ok(Backend::NoOp),
            other => Err(format!("unknown moderation backend: {}", other)),
        }
    }
}

/// Output tensor positions of the detection model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectorOutputs {
    pub boxes: usize,
    pub classes: usize,
    pub scores: usize,
}

impl Default for DetectorOutputs {
    fn default() -> Self {
        Self {
            boxes: 1,
            classes: 3,
            scores: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub backend: Backend,
    pub detection_model_path: PathBuf,
    pub detection_labels_path: PathBuf,
    pub detection_threshold: f32,
    pub detector_outputs: DetectorOutputs,
    pub classifier_repo: String,
    pub bucket: String,
    pub public_host: String,
    pub local_storage_path: Option<PathBuf>,
    pub local_public_base: String,
    pub fetch_timeout_secs: u64,
    pub batch_concurrency: usize,
    pub max_upload_size: usize,
}

impl Config {
    pub fn from_env() -> Self {
        let port = env_parse("PORT").unwrap_or(3000);
        let backend = env_parse("MODERATION_BACKEND").unwrap_or(Backend::Model);
        let defaults = DetectorOutputs::default();

        Self {
            port,
            backend,
            detection_model_path: env::var("DETECTION_MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("models/detection/detector.onnx")),
            detection_labels_path: env::var("DETECTION_LABELS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("models/detection/labelmap.txt")),
            detection_threshold: env_parse::<f32>("DETECTION_THRESHOLD")
                .filter(|v| *v > 0.0 && *v < 1.0)
                .unwrap_or(DEFAULT_DETECTION_THRESHOLD),
            detector_outputs: DetectorOutputs {
                boxes: env_parse("DETECTION_OUTPUT_BOXES").unwrap_or(defaults.boxes),
                classes: env_parse("DETECTION_OUTPUT_CLASSES").unwrap_or(defaults.classes),
                scores: env_parse("DETECTION_OUTPUT_SCORES").unwrap_or(defaults.scores),
            },
            classifier_repo: env::var("CLASSIFIER_MODEL_REPO")
                .unwrap_or_else(|_| DEFAULT_CLASSIFIER_REPO.to_string()),
            bucket: env::var("STORAGE_BUCKET").unwrap_or_else(|_| DEFAULT_BUCKET_NAME.to_string()),
            public_host: env::var("STORAGE_PUBLIC_HOST")
                .unwrap_or_else(|_| DEFAULT_PUBLIC_HOST.to_string()),
            local_storage_path: env::var("LOCAL_STORAGE_PATH").ok().map(PathBuf::from),
            local_public_base: env::var("LOCAL_PUBLIC_BASE")
                .unwrap_or_else(|_| format!("http://localhost:{}/media", port)),
            fetch_timeout_secs: env_parse::<u64>("FETCH_TIMEOUT_SECS")
                .filter(|v| *v > 0)
                .unwrap_or(DEFAULT_FETCH_TIMEOUT_SECS),
            batch_concurrency: env_parse::<usize>("BATCH_CONCURRENCY")
                .filter(|v| *v > 0)
                .unwrap_or(DEFAULT_BATCH_CONCURRENCY),
            max_upload_size: env_parse::<usize>("MAX_UPLOAD_SIZE")
                .filter(|v| *v > 0)
                .unwrap_or(MAX_UPLOAD_SIZE),
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.trim().parse().ok())
}
