//! Application constants

/// Scores at or below this are dropped (0-1 scale)
pub const DEFAULT_DETECTION_THRESHOLD: f32 = 0.5;

/// Pixels added on every side of a detection box before masking
pub const MASK_MARGIN: i64 = 20;

/// Default bucket for censored artifacts
pub const DEFAULT_BUCKET_NAME: &str = "nudeny-storage";

/// Host part of public artifact URLs
pub const DEFAULT_PUBLIC_HOST: &str = "storage.googleapis.com";

/// Maximum request body size for uploads (50 MB)
pub const MAX_UPLOAD_SIZE: usize = 50 * 1024 * 1024;

/// Timeout applied to every remote image fetch
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 10;

/// Batch items processed at once
pub const DEFAULT_BATCH_CONCURRENCY: usize = 8;

/// Multipart field name carrying uploaded images
pub const UPLOAD_FIELD_NAME: &str = "files";

/// Hugging Face repo for the nudity classifier
pub const DEFAULT_CLASSIFIER_REPO: &str = "LukeJacob2023/nsfw-image-detector";

/// Per-IP rate limit: one request token regained every N seconds
pub const RATE_LIMIT_REPLENISH_SECS: u64 = 1;

/// Per-IP rate limit: requests allowed in a burst
pub const RATE_LIMIT_BURST: u32 = 30;
