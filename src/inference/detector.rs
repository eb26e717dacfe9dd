use anyhow::{Context, Result, anyhow, bail};
use image::DynamicImage;
use std::path::Path;
use std::sync::Mutex;
use tract_onnx::prelude::*;
use tract_onnx::tract_hir::internal::DimLike;

use super::{Detector, to_rgb_input};
use crate::config::DetectorOutputs;
use crate::models::RawDetection;

type OnnxPlan = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

// Float models expect pixels scaled to [-1, 1]
const INPUT_MEAN: f32 = 127.5;
const INPUT_STD: f32 = 127.5;

/// SSD-style detector exported to ONNX: one NHWC RGB input, separate
/// boxes / classes / scores outputs.
pub struct OnnxDetector {
    plan: Mutex<OnnxPlan>,
    input_width: usize,
    input_height: usize,
    float_input: bool,
    outputs: DetectorOutputs,
}

impl OnnxDetector {
    pub fn load(path: &Path, outputs: DetectorOutputs) -> Result<Self> {
        log::info!("[detector] Loading detection model from {}", path.display());

        let model = tract_onnx::onnx()
            .model_for_path(path)
            .with_context(|| format!("reading detection model {}", path.display()))?
            .into_typed()?;

        let fact = model.input_fact(0)?.clone();
        let dims: Vec<usize> = fact
            .shape
            .iter()
            .skip(1)
            .map(|d| d.to_usize())
            .collect::<TractResult<_>>()
            .context("detection model input must have fixed height, width and channels")?;
        let [input_height, input_width, channels] = dims[..] else {
            bail!("expected NHWC input, got shape {:?}", fact.shape);
        };
        if channels != 3 {
            bail!("expected 3 input channels, got {}", channels);
        }

        let float_input = match fact.datum_type {
            DatumType::F32 => true,
            DatumType::U8 => false,
            other => bail!("unsupported detection input type {:?}", other),
        };

        let plan = model.into_optimized()?.into_runnable()?;

        log::info!(
            "[detector] Model ready: {}x{} input, float={}",
            input_width,
            input_height,
            float_input
        );

        Ok(Self {
            plan: Mutex::new(plan),
            input_width,
            input_height,
            float_input,
            outputs,
        })
    }

    fn input_tensor(&self, image: &DynamicImage) -> Result<Tensor> {
        let rgb = to_rgb_input(image, self.input_width as u32, self.input_height as u32);
        let shape = [1, self.input_height, self.input_width, 3];
        let tensor = if self.float_input {
            let data: Vec<f32> = rgb
                .iter()
                .map(|&v| (v as f32 - INPUT_MEAN) / INPUT_STD)
                .collect();
            Tensor::from_shape(&shape, &data)?
        } else {
            Tensor::from_shape(&shape, &rgb)?
        };
        Ok(tensor)
    }
}

fn output_f32<T: std::ops::Deref<Target = Tensor>>(outputs: &[T], index: usize) -> Result<Vec<f32>> {
    let value = outputs
        .get(index)
        .ok_or_else(|| anyhow!("model has no output {}", index))?;
    let values = value.cast_to::<f32>()?;
    Ok(values.as_slice::<f32>()?.to_vec())
}

/// Zip the three flat output tensors into detections
fn collect_detections(boxes: &[f32], classes: &[f32], scores: &[f32]) -> Result<Vec<RawDetection>> {
    let count = scores.len();
    if classes.len() < count || boxes.len() < count * 4 {
        bail!(
            "inconsistent detection outputs: {} scores, {} classes, {} box values",
            count,
            classes.len(),
            boxes.len()
        );
    }

    Ok(scores
        .iter()
        .zip(classes)
        .zip(boxes.chunks_exact(4))
        .map(|((&score, &class), b)| RawDetection {
            bbox: [b[0], b[1], b[2], b[3]],
            class_id: class.max(0.0) as usize,
            score,
        })
        .collect())
}

impl Detector for OnnxDetector {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<RawDetection>> {
        let input = self.input_tensor(image)?;
        let plan = self.plan.lock().map_err(|e| anyhow!("Lock error: {}", e))?;
        let result = plan.run(tvec!(input.into()))?;
        drop(plan);

        let boxes = output_f32(&result, self.outputs.boxes)?;
        let classes = output_f32(&result, self.outputs.classes)?;
        let scores = output_f32(&result, self.outputs.scores)?;

        collect_detections(&boxes, &classes, &scores)
    }
}
