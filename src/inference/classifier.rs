use anyhow::{Result, anyhow};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::vit;
use hf_hub::{Repo, RepoType, api::sync::Api};
use image::DynamicImage;
use std::sync::Mutex;

use super::{Classifier, to_rgb_input};
use crate::models::ClassLabel;

const IMAGE_SIZE: usize = 224;

/// Collapse a model label onto the public classes
fn class_for_label(label: &str) -> ClassLabel {
    match label.trim().to_ascii_lowercase().as_str() {
        "porn" | "hentai" | "nude" | "nudity" | "nsfw" => ClassLabel::Nude,
        "sexy" => ClassLabel::Sexy,
        _ => ClassLabel::Safe,
    }
}

/// `id2label` from a Hugging Face config, ordered by class index
fn labels_from_config(config: &serde_json::Value) -> Result<Vec<String>> {
    let map = config
        .get("id2label")
        .and_then(|v| v.as_object())
        .ok_or_else(|| anyhow!("config has no id2label"))?;

    let mut labels: Vec<(usize, String)> = map
        .iter()
        .map(|(k, v)| {
            let index = k.parse::<usize>().map_err(|_| anyhow!("bad label index {}", k))?;
            let name = v.as_str().ok_or_else(|| anyhow!("label {} is not a string", k))?;
            Ok((index, name.to_string()))
        })
        .collect::<Result<_>>()?;
    labels.sort_by_key(|(i, _)| *i);

    if labels.iter().enumerate().any(|(pos, (i, _))| pos != *i) {
        return Err(anyhow!("id2label indices are not contiguous"));
    }
    Ok(labels.into_iter().map(|(_, name)| name).collect())
}

/// Nudity classifier on a ViT checkpoint from the Hugging Face hub.
/// The winning label is mapped to nude / sexy / safe.
pub struct VitClassifier {
    model: Mutex<vit::Model>,
    device: Device,
    labels: Vec<String>,
}

impl VitClassifier {
    pub fn new(repo_id: &str) -> Result<Self> {
        #[cfg(feature = "metal")]
        let device = Device::new_metal(0).unwrap_or(Device::Cpu);
        #[cfg(not(feature = "metal"))]
        let device = Device::Cpu;

        log::info!("[classifier] Loading {} on {:?}", repo_id, device);

        let api = Api::new()?;
        let repo = api.repo(Repo::new(repo_id.to_string(), RepoType::Model));

        let model_path = repo.get("model.safetensors")?;
        let config_path = repo.get("config.json")?;

        let raw_config = std::fs::read_to_string(config_path)?;
        let labels = labels_from_config(&serde_json::from_str(&raw_config)?)?;
        let config: vit::Config = serde_json::from_str(&raw_config)?;
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[model_path], DType::F32, &device)? };
        let model = vit::Model::new(&config, labels.len(), vb)?;

        log::info!("[classifier] Model loaded with labels {:?}", labels);

        Ok(Self {
            model: Mutex::new(model),
            device,
            labels,
        })
    }

    fn preprocess(&self, image: &DynamicImage) -> Result<Tensor> {
        // mean=0.5, std=0.5 for all channels
        let mean = 0.5;
        let std = 0.5;
        let rgb = to_rgb_input(image, IMAGE_SIZE as u32, IMAGE_SIZE as u32);
        let plane = IMAGE_SIZE * IMAGE_SIZE;

        let mut data = vec![0f32; 3 * plane];
        for i in 0..plane {
            for c in 0..3 {
                // CHW layout
                data[c * plane + i] = (rgb[i * 3 + c] as f32 / 255.0 - mean) / std;
            }
        }

        Ok(Tensor::from_vec(data, (1, 3, IMAGE_SIZE, IMAGE_SIZE), &self.device)?)
    }
}

impl Classifier for VitClassifier {
    fn classify(&self, image: &DynamicImage) -> Result<ClassLabel> {
        let input = self.preprocess(image)?;
        let model = self.model.lock().map_err(|e| anyhow!("Lock error: {}", e))?;
        let logits = model.forward(&input)?;
        drop(model);

        let probs: Vec<f32> = candle_nn::ops::softmax(&logits, 1)?.flatten_all()?.to_vec1()?;
        let (best, prob) = probs
            .iter()
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .ok_or_else(|| anyhow!("classifier returned no scores"))?;
        let label = self
            .labels
            .get(best)
            .ok_or_else(|| anyhow!("class index {} has no label", best))?;

        let class = class_for_label(label);
        log::debug!("[classifier] {} at {:.1}% -> {:?}", label, prob * 100.0, class);
        Ok(class)
    }
}
