use anyhow::Result;
use image::DynamicImage;

use super::{Classifier, Detector};
use crate::models::{ClassLabel, RawDetection};

/// Detector that never finds anything - for testing or running without weights
pub struct NoOpDetector;

impl Detector for NoOpDetector {
    fn detect(&self, _image: &DynamicImage) -> Result<Vec<RawDetection>> {
        Ok(vec![])
    }
}

/// Classifier that always returns safe
pub struct NoOpClassifier;

impl Classifier for NoOpClassifier {
    fn classify(&self, _image: &DynamicImage) -> Result<ClassLabel> {
        Ok(ClassLabel::Safe)
    }
}
