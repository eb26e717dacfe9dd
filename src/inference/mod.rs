use anyhow::Result;
use image::DynamicImage;

use crate::models::{ClassLabel, RawDetection};

/// Pluggable exposed-region detector.
///
/// Implementations own their preprocessing and must serialize access to the
/// underlying model handle if the runtime is not reentrant.
pub trait Detector: Send + Sync {
    /// Run one inference. Boxes are `[top, left, bottom, right]` normalized to 0-1,
    /// scores are probabilities in 0-1.
    fn detect(&self, image: &DynamicImage) -> Result<Vec<RawDetection>>;
}

/// Pluggable whole-image nudity classifier
pub trait Classifier: Send + Sync {
    fn classify(&self, image: &DynamicImage) -> Result<ClassLabel>;
}

/// Resize to `width` x `height` and flatten to interleaved RGB (HWC).
/// Alpha is dropped for every input format.
pub fn to_rgb_input(image: &DynamicImage, width: u32, height: u32) -> Vec<u8> {
    image
        .resize_exact(width, height, image::imageops::FilterType::Triangle)
        .to_rgb8()
        .into_raw()
}

mod classifier;
mod detector;
mod noop;

pub use classifier::VitClassifier;
pub use detector::OnnxDetector;
pub use noop::{NoOpClassifier, NoOpDetector};
