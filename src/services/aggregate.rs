//! Converts raw detector output into the public per-category report.

use anyhow::{Context, Result};
use std::path::Path;

use crate::models::{Category, DetectionBox, DetectionReport, RawDetection};

/// Maps model class ids to categories. Coupled to one model's label ordering,
/// so it is loaded alongside the weights instead of being hard-coded.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelMap {
    labels: Vec<Option<Category>>,
}

impl LabelMap {
    /// One label per line; line N is class id N. Lines that are not a known
    /// category (background, `???`) keep their position but map to nothing.
    pub fn parse(text: &str) -> Self {
        let labels = text
            .lines()
            .map(|line| line.trim().parse::<Category>().ok())
            .collect();
        Self { labels }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading label map {}", path.display()))?;
        let map = Self::parse(&text);
        if map.labels.iter().all(Option::is_none) {
            anyhow::bail!("label map {} names no known category", path.display());
        }
        Ok(map)
    }

    pub fn category(&self, class_id: usize) -> Option<Category> {
        self.labels.get(class_id).copied().flatten()
    }
}

impl Default for LabelMap {
    /// Class ids in canonical category order
    fn default() -> Self {
        Self {
            labels: Category::ALL.into_iter().map(Some).collect(),
        }
    }
}

/// Build the report for an image of `width` x `height`.
///
/// Only scores in `(threshold, 1.0]` survive. Boxes are clamped into
/// `[1, width] x [1, height]` because the regression head can predict outside
/// the frame. Output order follows the detector; nothing is re-sorted and the
/// scan never stops early.
pub fn aggregate(
    (width, height): (u32, u32),
    raw: &[RawDetection],
    labels: &LabelMap,
    threshold: f32,
) -> DetectionReport {
    let mut report = DetectionReport::empty();
    let (w, h) = (width as f32, height as f32);

    for detection in raw {
        if !(detection.score > threshold && detection.score <= 1.0) {
            continue;
        }

        let Some(category) = labels.category(detection.class_id) else {
            log::debug!("[aggregate] Skipping unmapped class id {}", detection.class_id);
            continue;
        };

        let [top, left, bottom, right] = detection.bbox;
        let top = (top * h).max(1.0) as u32;
        let left = (left * w).max(1.0) as u32;
        let bottom = (bottom * h).min(h).max(0.0) as u32;
        let right = (right * w).min(w).max(0.0) as u32;

        if left >= right || top >= bottom {
            log::debug!(
                "[aggregate] Dropping degenerate box l={} t={} r={} b={}",
                left,
                top,
                right,
                bottom
            );
            continue;
        }

        report.push(
            category,
            DetectionBox {
                confidence_score: detection.score * 100.0,
                top,
                left,
                bottom,
                right,
            },
        );
    }

    report
}
