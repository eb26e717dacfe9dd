//! Moderation pipeline: resolve -> decode -> infer -> aggregate -> censor -> publish.
//!
//! Used by the classify / detect / censor routes. Models are loaded once into a
//! [`Moderator`] at startup and shared read-only across requests.

use anyhow::Context;
use futures::{StreamExt, stream};
use image::{DynamicImage, ImageReader};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Backend, Config};
use crate::inference::{
    Classifier, Detector, NoOpClassifier, NoOpDetector, OnnxDetector, VitClassifier,
};
use crate::models::{
    CensorItem, ClassLabel, ClassifyItem, DetectItem, DetectionReport, ImageSource, ItemKey,
    MediaType,
};
use crate::services::aggregate::{LabelMap, aggregate};
use crate::services::censor::censor;
use crate::services::error::{ModerationError, Rejection};
use crate::services::source::SourceResolver;
use crate::storage::{ArtifactStore, NamingHint, Publisher};

fn item_key(source: &ImageSource) -> ItemKey {
    match source {
        ImageSource::Upload { filename, .. } => ItemKey::Filename(filename.clone()),
        ImageSource::RemoteUrl(s) | ImageSource::DataUri(s) | ImageSource::Unknown(s) => {
            ItemKey::Source(s.clone())
        }
    }
}

/// Rejections only empty the item; encode, publish and inference failures
/// also carry an `error` next to the item's key
fn censor_item(
    key: ItemKey,
    outcome: Result<(String, DetectionReport), ModerationError>,
) -> CensorItem {
    match outcome {
        Ok((url, exposed_parts)) => CensorItem {
            key,
            url,
            exposed_parts,
            error: None,
        },
        Err(e) => {
            let error = if e.is_rejection() {
                log::debug!("[censor] {:?} rejected: {}", key, e);
                None
            } else {
                log::error!("[censor] {:?} failed: {}", key, e);
                Some(e.to_string())
            };
            CensorItem {
                key,
                url: String::new(),
                exposed_parts: DetectionReport::empty(),
                error,
            }
        }
    }
}

fn join_error(e: tokio::task::JoinError) -> ModerationError {
    ModerationError::Inference(format!("worker task failed: {}", e))
}

pub struct Moderator {
    detector: Arc<dyn Detector>,
    classifier: Arc<dyn Classifier>,
    labels: LabelMap,
    threshold: f32,
    resolver: SourceResolver,
    publisher: Publisher,
    concurrency: usize,
}

impl Moderator {
    pub fn new(
        detector: Arc<dyn Detector>,
        classifier: Arc<dyn Classifier>,
        labels: LabelMap,
        threshold: f32,
        resolver: SourceResolver,
        publisher: Publisher,
        concurrency: usize,
    ) -> Self {
        Self {
            detector,
            classifier,
            labels,
            threshold,
            resolver,
            publisher,
            concurrency: concurrency.max(1),
        }
    }

    /// Load models and connect storage as described by `config`
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let detector: Arc<dyn Detector>;
        let classifier: Arc<dyn Classifier>;
        let labels: LabelMap;
        match config.backend {
            Backend::Model => {
                labels = LabelMap::load(&config.detection_labels_path)?;
                let model_path = config.detection_model_path.clone();
                let outputs = config.detector_outputs;
                let repo = config.classifier_repo.clone();
                let (onnx, vit) = tokio::task::spawn_blocking(move || {
                    anyhow::Ok((
                        OnnxDetector::load(&model_path, outputs)?,
                        VitClassifier::new(&repo)?,
                    ))
                })
                .await??;
                detector = Arc::new(onnx);
                classifier = Arc::new(vit);
            }
            Backend::NoOp => {
                log::warn!("[moderator] Using no-op models; nothing will be detected");
                detector = Arc::new(NoOpDetector);
                classifier = Arc::new(NoOpClassifier);
                labels = LabelMap::default();
            }
        }

        let store = match &config.local_storage_path {
            Some(root) => {
                log::info!("[moderator] Local artifact storage: {:?}", root);
                ArtifactStore::Local {
                    root: root.clone(),
                    public_base: config.local_public_base.clone(),
                }
            }
            None => {
                let client = google_cloud_storage::client::Storage::builder()
                    .build()
                    .await
                    .context("creating GCS client")?;
                log::info!("[moderator] GCS artifact storage: bucket {}", config.bucket);
                ArtifactStore::Gcs {
                    client,
                    bucket: config.bucket.clone(),
                    public_host: config.public_host.clone(),
                }
            }
        };

        let resolver = SourceResolver::new(Duration::from_secs(config.fetch_timeout_secs))?;

        Ok(Self::new(
            detector,
            classifier,
            labels,
            config.detection_threshold,
            resolver,
            Publisher::new(store),
            config.batch_concurrency,
        ))
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    /// Resolve and decode. Anything refused here is an ordinary invalid item.
    async fn load(&self, source: &ImageSource) -> Result<(DynamicImage, MediaType), ModerationError> {
        let resolved = self.resolver.resolve(source).await?;
        let media_type = resolved.media_type.ok_or(Rejection::UnsupportedMediaType)?;
        let bytes = resolved.bytes;

        let image = tokio::task::spawn_blocking(move || -> image::ImageResult<DynamicImage> {
            ImageReader::new(Cursor::new(bytes))
                .with_guessed_format()?
                .decode()
        })
        .await
        .map_err(join_error)??;

        Ok((image, media_type))
    }

    /// One inference call, then aggregation. Hands the image back for rendering.
    async fn run_detection(
        &self,
        image: DynamicImage,
    ) -> Result<(DynamicImage, DetectionReport), ModerationError> {
        let detector = Arc::clone(&self.detector);
        let (image, raw) = tokio::task::spawn_blocking(move || {
            let raw = detector.detect(&image);
            (image, raw)
        })
        .await
        .map_err(join_error)?;
        let raw = raw.map_err(|e| ModerationError::Inference(e.to_string()))?;

        let report = aggregate(
            (image.width(), image.height()),
            &raw,
            &self.labels,
            self.threshold,
        );
        Ok((image, report))
    }

    async fn try_classify(&self, source: &ImageSource) -> Result<ClassLabel, ModerationError> {
        let (image, _) = self.load(source).await?;
        let classifier = Arc::clone(&self.classifier);
        tokio::task::spawn_blocking(move || classifier.classify(&image))
            .await
            .map_err(join_error)?
            .map_err(|e| ModerationError::Inference(e.to_string()))
    }

    async fn try_detect(&self, source: &ImageSource) -> Result<DetectionReport, ModerationError> {
        let (image, _) = self.load(source).await?;
        let (_, report) = self.run_detection(image).await?;
        Ok(report)
    }

    async fn try_censor(
        &self,
        source: &ImageSource,
    ) -> Result<(String, DetectionReport), ModerationError> {
        let (image, media_type) = self.load(source).await?;
        let (image, report) = self.run_detection(image).await?;
        if report.is_empty() {
            return Ok((String::new(), report));
        }

        let format = media_type.image_format();
        let (encoded, report) = tokio::task::spawn_blocking(move || {
            let encoded = censor(&image, &report, format);
            (encoded, report)
        })
        .await
        .map_err(join_error)?;

        let Some(encoded) = encoded? else {
            return Ok((String::new(), report));
        };

        let hint = match source {
            ImageSource::Upload { filename, .. } => NamingHint::Filename(filename.clone()),
            _ => NamingHint::Extension,
        };
        let url = self
            .publisher
            .publish(encoded, media_type.extension(), &hint)
            .await?;

        Ok((url, report))
    }

    pub async fn classify(&self, source: ImageSource) -> ClassifyItem {
        let key = item_key(&source);
        match self.try_classify(&source).await {
            Ok(class) => ClassifyItem {
                key,
                class,
                error: None,
            },
            Err(ModerationError::InputRejected(Rejection::InvalidFileType)) => ClassifyItem {
                key,
                class: ClassLabel::InvalidFileType,
                error: None,
            },
            Err(e) if e.is_rejection() => {
                log::debug!("[classify] {:?} rejected: {}", key, e);
                ClassifyItem {
                    key,
                    class: ClassLabel::Invalid,
                    error: None,
                }
            }
            Err(e) => {
                log::error!("[classify] {:?} failed: {}", key, e);
                ClassifyItem {
                    key,
                    class: ClassLabel::Invalid,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    pub async fn detect(&self, source: ImageSource) -> DetectItem {
        let key = item_key(&source);
        match self.try_detect(&source).await {
            Ok(exposed_parts) => DetectItem {
                key,
                exposed_parts,
                error: None,
            },
            Err(e) => {
                let error = if e.is_rejection() {
                    log::debug!("[detect] {:?} rejected: {}", key, e);
                    None
                } else {
                    log::error!("[detect] {:?} failed: {}", key, e);
                    Some(e.to_string())
                };
                DetectItem {
                    key,
                    exposed_parts: DetectionReport::empty(),
                    error,
                }
            }
        }
    }

    pub async fn censor(&self, source: ImageSource) -> CensorItem {
        let key = item_key(&source);
        censor_item(key, self.try_censor(&source).await)
    }

    // Batches fan out up to `concurrency` items at once; results keep input order.

    pub async fn classify_batch(&self, sources: Vec<ImageSource>) -> Vec<ClassifyItem> {
        stream::iter(sources)
            .map(|s| self.classify(s))
            .buffered(self.concurrency)
            .collect()
            .await
    }

    pub async fn detect_batch(&self, sources: Vec<ImageSource>) -> Vec<DetectItem> {
        let items: Vec<DetectItem> = stream::iter(sources)
            .map(|s| self.detect(s))
            .buffered(self.concurrency)
            .collect()
            .await;
        let boxes: usize = items.iter().map(|i| i.exposed_parts.total()).sum();
        log::info!("[detect] Batch complete: {} items, {} boxes", items.len(), boxes);
        items
    }

    pub async fn censor_batch(&self, sources: Vec<ImageSource>) -> Vec<CensorItem> {
        let items: Vec<CensorItem> = stream::iter(sources)
            .map(|s| self.censor(s))
            .buffered(self.concurrency)
            .collect()
            .await;
        let published = items.iter().filter(|i| !i.url.is_empty()).count();
        log::info!("[censor] Batch complete: {} items, {} published", items.len(), published);
        items
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{Category, RawDetection};
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use bytes::Bytes;
    use image::{GenericImageView, ImageFormat, Rgb, RgbImage};
    use std::path::Path;

    /// Detector returning the same predictions for every image
    pub struct FixedDetector(pub Vec<RawDetection>);

    impl Detector for FixedDetector {
        fn detect(&self, _image: &DynamicImage) -> anyhow::Result<Vec<RawDetection>> {
            Ok(self.0.clone())
        }
    }

    struct FailingDetector;

    impl Detector for FailingDetector {
        fn detect(&self, _image: &DynamicImage) -> anyhow::Result<Vec<RawDetection>> {
            anyhow::bail!("model exploded")
        }
    }

    pub fn moderator(detector: Arc<dyn Detector>, storage_root: &Path) -> Moderator {
        Moderator::new(
            detector,
            Arc::new(NoOpClassifier),
            LabelMap::default(),
            0.5,
            SourceResolver::new(Duration::from_secs(1)).unwrap(),
            Publisher::new(ArtifactStore::Local {
                root: storage_root.to_path_buf(),
                public_base: "http://localhost/media".into(),
            }),
            4,
        )
    }

    pub fn white_image(format: ImageFormat) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(100, 100, Rgb([255, 255, 255])));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, format).unwrap();
        out.into_inner()
    }

    pub fn one_box() -> Vec<RawDetection> {
        vec![RawDetection {
            bbox: [0.1, 0.1, 0.5, 0.5],
            class_id: 0,
            score: 0.9,
        }]
    }

    fn upload(bytes: Vec<u8>, filename: &str) -> ImageSource {
        ImageSource::Upload {
            bytes: Bytes::from(bytes),
            filename: filename.into(),
        }
    }

    #[tokio::test]
    async fn test_malformed_url_classifies_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let m = moderator(Arc::new(NoOpDetector), dir.path());
        let item = m.classify(ImageSource::from_source("not a url")).await;
        assert_eq!(
            serde_json::to_value(&item).unwrap(),
            serde_json::json!({"source": "not a url", "class": "invalid"})
        );
    }

    #[tokio::test]
    async fn test_bad_upload_is_invalid_file_type() {
        let dir = tempfile::tempdir().unwrap();
        let m = moderator(Arc::new(NoOpDetector), dir.path());
        let item = m.classify(upload(b"plain text".to_vec(), "photo.jpg")).await;
        assert_eq!(item.class, ClassLabel::InvalidFileType);
        assert_eq!(item.key, ItemKey::Filename("photo.jpg".into()));
    }

    #[tokio::test]
    async fn test_white_jpeg_data_uri_censors_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let m = moderator(Arc::new(NoOpDetector), dir.path());
        let uri = format!(
            "data:image/jpeg;base64,{}",
            STANDARD.encode(white_image(ImageFormat::Jpeg))
        );

        let item = m.censor(ImageSource::from_source(&uri)).await;
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["url"], "");
        assert_eq!(
            json["exposed_parts"],
            serde_json::json!({
                "female_breast": [],
                "female_genitalia": [],
                "male_genitalia": [],
                "buttocks": []
            })
        );
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_detect_reports_boxes() {
        let dir = tempfile::tempdir().unwrap();
        let m = moderator(Arc::new(FixedDetector(one_box())), dir.path());
        let item = m.detect(upload(white_image(ImageFormat::Png), "a.png")).await;
        let boxes = item.exposed_parts.get(Category::FemaleBreast);
        assert_eq!(boxes.len(), 1);
        assert_eq!((boxes[0].left, boxes[0].top, boxes[0].right, boxes[0].bottom), (10, 10, 50, 50));
        assert!(item.error.is_none());
    }

    #[tokio::test]
    async fn test_censor_upload_publishes_masked_image() {
        let dir = tempfile::tempdir().unwrap();
        let m = moderator(Arc::new(FixedDetector(one_box())), dir.path());
        let item = m.censor(upload(white_image(ImageFormat::Png), "beach.png")).await;

        assert!(item.error.is_none());
        let name = item.url.strip_prefix("http://localhost/media/").unwrap();
        assert!(name.ends_with("-beach.png"));

        let stored = std::fs::read(dir.path().join(name)).unwrap();
        assert_eq!(image::guess_format(&stored).unwrap(), ImageFormat::Png);
        let decoded = image::load_from_memory(&stored).unwrap();
        assert_eq!(decoded.get_pixel(30, 30).0[..3], [0, 0, 0]);
        assert_eq!(decoded.get_pixel(90, 90).0[..3], [255, 255, 255]);
    }

    #[tokio::test]
    async fn test_censor_data_uri_names_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let m = moderator(Arc::new(FixedDetector(one_box())), dir.path());
        let uri = format!(
            "data:image/jfif;base64,{}",
            STANDARD.encode(white_image(ImageFormat::Jpeg))
        );
        let item = m.censor(ImageSource::from_source(&uri)).await;
        assert!(item.url.ends_with(".jpeg"), "{}", item.url);
        assert_eq!(item.exposed_parts.total(), 1);
    }

    #[tokio::test]
    async fn test_publish_failure_is_item_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocked");
        std::fs::write(&blocker, b"x").unwrap();
        let m = moderator(Arc::new(FixedDetector(one_box())), &blocker);

        let item = m.censor(upload(white_image(ImageFormat::Png), "a.png")).await;
        assert_eq!(item.url, "");
        assert!(item.error.unwrap().contains("publish"));
        assert_eq!(item.key, ItemKey::Filename("a.png".into()));
    }

    #[test]
    fn test_encode_failure_keeps_key_and_reports_error() {
        let item = censor_item(
            ItemKey::Filename("beach.png".into()),
            Err(ModerationError::EncodingFailed("unsupported color type".into())),
        );
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["filename"], "beach.png");
        assert_eq!(json["url"], "");
        assert!(json["error"].as_str().unwrap().contains("unsupported color type"));

        // Nothing to censor is a success with no url and no error
        let item = censor_item(
            ItemKey::Filename("beach.png".into()),
            Ok((String::new(), DetectionReport::empty())),
        );
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["url"], "");
        assert!(json.get("error").is_none());

        let item = censor_item(
            ItemKey::Source("https://".into()),
            Err(ModerationError::InputRejected(Rejection::InvalidUrl)),
        );
        assert!(item.error.is_none());
    }

    #[tokio::test]
    async fn test_inference_failure_is_item_error() {
        let dir = tempfile::tempdir().unwrap();
        let m = moderator(Arc::new(FailingDetector), dir.path());
        let item = m.detect(upload(white_image(ImageFormat::Bmp), "a.bmp")).await;
        assert!(item.error.unwrap().contains("model exploded"));
        assert!(item.exposed_parts.is_empty());
    }

    #[tokio::test]
    async fn test_batch_preserves_order_and_isolates_failures() {
        let dir = tempfile::tempdir().unwrap();
        let m = moderator(Arc::new(FixedDetector(one_box())), dir.path());
        let good = format!(
            "data:image/png;base64,{}",
            STANDARD.encode(white_image(ImageFormat::Png))
        );
        let sources = vec![
            ImageSource::from_source("not a url"),
            ImageSource::from_source(&good),
            ImageSource::from_source("data:image/png;base64,@@@"),
            ImageSource::from_source(&good),
        ];

        let items = m.detect_batch(sources).await;
        let totals: Vec<usize> = items.iter().map(|i| i.exposed_parts.total()).collect();
        assert_eq!(totals, vec![0, 1, 0, 1]);
        assert_eq!(items[0].key, ItemKey::Source("not a url".into()));
        assert_eq!(items[2].key, ItemKey::Source("data:image/png;base64,@@@".into()));
        assert!(items.iter().all(|i| i.error.is_none()));
    }
}
