//! Shared data models used across modules

use bytes::Bytes;
use image::ImageFormat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// An image type the service accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Jpg,
    Jpeg,
    Png,
    Bmp,
    Jfif,
}

impl MediaType {
    /// Parse a declared type name ("png", "JPEG", ...)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "jpg" => Some(MediaType::Jpg),
            "jpeg" => Some(MediaType::Jpeg),
            "png" => Some(MediaType::Png),
            "bmp" => Some(MediaType::Bmp),
            "jfif" => Some(MediaType::Jfif),
            _ => None,
        }
    }

    /// Detect the type from the leading magic bytes. Extensions are never consulted.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        match image::guess_format(bytes).ok()? {
            ImageFormat::Jpeg => Some(MediaType::Jpeg),
            ImageFormat::Png => Some(MediaType::Png),
            ImageFormat::Bmp => Some(MediaType::Bmp),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            MediaType::Jpg => "jpg",
            MediaType::Jpeg => "jpeg",
            MediaType::Png => "png",
            MediaType::Bmp => "bmp",
            MediaType::Jfif => "jfif",
        }
    }

    /// Codec used to decode / re-encode this type
    pub fn image_format(&self) -> ImageFormat {
        match self {
            MediaType::Jpg | MediaType::Jpeg | MediaType::Jfif => ImageFormat::Jpeg,
            MediaType::Png => ImageFormat::Png,
            MediaType::Bmp => ImageFormat::Bmp,
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Input for a single batch item, created per request
#[derive(Debug, Clone)]
pub enum ImageSource {
    Upload { bytes: Bytes, filename: String },
    RemoteUrl(String),
    DataUri(String),
    /// Neither a URL nor a data URI; rejected without any I/O
    Unknown(String),
}

impl ImageSource {
    /// Classify a source string by its prefix
    pub fn from_source(source: &str) -> Self {
        if source.starts_with("http://") || source.starts_with("https://") {
            ImageSource::RemoteUrl(source.to_string())
        } else if source.starts_with("data:") {
            ImageSource::DataUri(source.to_string())
        } else {
            ImageSource::Unknown(source.to_string())
        }
    }
}

/// Raw image payload produced by the source resolver
#[derive(Debug, Clone)]
pub struct ResolvedImage {
    pub bytes: Bytes,
    pub media_type: Option<MediaType>,
}

/// Canonical anatomical categories, in report order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    FemaleBreast,
    FemaleGenitalia,
    MaleGenitalia,
    Buttocks,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::FemaleBreast,
        Category::FemaleGenitalia,
        Category::MaleGenitalia,
        Category::Buttocks,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::FemaleBreast => "female_breast",
            Category::FemaleGenitalia => "female_genitalia",
            Category::MaleGenitalia => "male_genitalia",
            Category::Buttocks => "buttocks",
        }
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s.trim())
            .ok_or_else(|| format!("unknown category: {}", s))
    }
}

/// One model prediction before thresholding; box is `[top, left, bottom, right]` in 0-1
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetection {
    pub bbox: [f32; 4],
    pub class_id: usize,
    pub score: f32,
}

/// A detected region in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DetectionBox {
    /// Score scaled to 0-100
    pub confidence_score: f32,
    pub top: u32,
    pub left: u32,
    pub bottom: u32,
    pub right: u32,
}

/// Boxes grouped by category. All four categories are always present.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct DetectionReport(BTreeMap<Category, Vec<DetectionBox>>);

impl DetectionReport {
    pub fn empty() -> Self {
        Self(Category::ALL.into_iter().map(|c| (c, Vec::new())).collect())
    }

    pub fn push(&mut self, category: Category, detection: DetectionBox) {
        self.0.entry(category).or_default().push(detection);
    }

    pub fn get(&self, category: Category) -> &[DetectionBox] {
        self.0.get(&category).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every box across all categories, in category then insertion order
    pub fn boxes(&self) -> impl Iterator<Item = (Category, &DetectionBox)> {
        self.0
            .iter()
            .flat_map(|(category, boxes)| boxes.iter().map(move |b| (*category, b)))
    }

    pub fn total(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

impl Default for DetectionReport {
    fn default() -> Self {
        Self::empty()
    }
}

/// Classification outcome for one item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ClassLabel {
    #[serde(rename = "nude")]
    Nude,
    #[serde(rename = "sexy")]
    Sexy,
    #[serde(rename = "safe")]
    Safe,
    #[serde(rename = "invalid-file-type")]
    InvalidFileType,
    #[serde(rename = "invalid")]
    Invalid,
}

/// Identifies which input an item result belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKey {
    Filename(String),
    Source(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassifyItem {
    #[serde(flatten)]
    pub key: ItemKey,
    pub class: ClassLabel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectItem {
    #[serde(flatten)]
    pub key: ItemKey,
    pub exposed_parts: DetectionReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CensorItem {
    #[serde(flatten)]
    pub key: ItemKey,
    /// Public URL of the censored image; empty when nothing was censored
    pub url: String,
    pub exposed_parts: DetectionReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Batch response envelope
#[derive(Debug, Serialize)]
pub struct Prediction<T> {
    #[serde(rename = "Prediction")]
    pub prediction: Vec<T>,
}

/// JSON body item for the URL / data URI endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct SourceRequest {
    pub source: String,
}
