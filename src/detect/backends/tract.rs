#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::engine::ModelLoadError;
use crate::detect::result::{BoundingBox, RawDetection};
use crate::frame::{FrameView, PixelFormat};

/// Candidates below this score are dropped before NMS to keep it cheap.
const PRE_NMS_SCORE: f32 = 0.05;
const NMS_IOU: f32 = 0.45;

/// Tract-based backend for YOLO-style ONNX detectors.
///
/// Expects a single output of shape `[1, 4 + classes, anchors]` with boxes as
/// center/size in model input pixels. Frames are resized to the model input.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>,
    width: u32,
    height: u32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self, ModelLoadError> {
        let model_path = model_path.as_ref();
        if !model_path.exists() {
            return Err(ModelLoadError::Missing {
                path: model_path.to_path_buf(),
            });
        }
        let model = Self::load(model_path, width, height).map_err(|source| {
            ModelLoadError::Unloadable {
                path: model_path.to_path_buf(),
                source,
            }
        })?;
        Ok(Self {
            model,
            width,
            height,
        })
    }

    fn load(
        model_path: &Path,
        width: u32,
        height: u32,
    ) -> Result<SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>> {
        tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")
    }

    fn build_input(&self, frame: &FrameView<'_>) -> Result<Tensor> {
        let rgb: Vec<u8> = match frame.format() {
            PixelFormat::Rgb8 => frame.pixels().to_vec(),
            PixelFormat::Rgba8 => frame
                .pixels()
                .chunks_exact(4)
                .flat_map(|px| [px[0], px[1], px[2]])
                .collect(),
            PixelFormat::Luma8 => return Err(anyhow!("tract backend needs color frames")),
        };
        let image = RgbImage::from_raw(frame.width(), frame.height(), rgb)
            .ok_or_else(|| anyhow!("frame buffer does not match its dimensions"))?;
        let resized = if image.dimensions() == (self.width, self.height) {
            image
        } else {
            image::imageops::resize(&image, self.width, self.height, FilterType::Triangle)
        };

        let width = self.width as usize;
        let pixels = resized.as_raw();
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, width),
            |(_, channel, y, x)| {
                let idx = (y * width + x) * 3 + channel;
                pixels[idx] as f32 / 255.0
            },
        );
        Ok(input.into_tensor())
    }

    fn decode(&self, outputs: TVec<TValue>) -> Result<Vec<RawDetection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("expected a [1, 4 + classes, anchors] output")?;
        let (_, rows, anchors) = view.dim();
        if rows < 5 {
            return Err(anyhow!("output has {} rows, need at least 5", rows));
        }

        let (in_w, in_h) = (self.width as f32, self.height as f32);
        let mut candidates = Vec::new();
        for i in 0..anchors {
            let score = (4..rows)
                .map(|k| view[[0, k, i]])
                .fold(f32::NEG_INFINITY, f32::max);
            if score.is_nan() || score < PRE_NMS_SCORE {
                continue;
            }
            let (cx, cy, w, h) = (view[[0, 0, i]], view[[0, 1, i]], view[[0, 2, i]], view[[0, 3, i]]);
            let top = (cy - h / 2.0) / in_h;
            let bbox = BoundingBox::new(
                (cx - w / 2.0) / in_w,
                1.0 - top - h / in_h,
                w / in_w,
                h / in_h,
            );
            candidates.push(RawDetection::new(bbox, score));
        }
        Ok(non_max_suppression(candidates, NMS_IOU))
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn supports(&self, format: PixelFormat) -> bool {
        matches!(format, PixelFormat::Rgb8 | PixelFormat::Rgba8)
    }

    fn detect(&mut self, frame: FrameView<'_>) -> Result<Vec<RawDetection>> {
        let input = self.build_input(&frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs)
    }
}

/// Greedy NMS; survivors come out in descending confidence.
fn non_max_suppression(mut xs: Vec<RawDetection>, iou_threshold: f32) -> Vec<RawDetection> {
    xs.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<RawDetection> = Vec::with_capacity(xs.len());
    for candidate in xs {
        if kept
            .iter()
            .all(|k| iou(&k.bbox, &candidate.bbox) <= iou_threshold)
        {
            kept.push(candidate);
        }
    }
    kept
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let w = (a.max_x().min(b.max_x()) - a.min_x().max(b.min_x())).max(0.0);
    let h = (a.max_y().min(b.max_y()) - a.min_y().max(b.min_y())).max(0.0);
    let inter = w * h;
    let union = a.width * a.height + b.width * b.height - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nms_drops_overlapping_lower_scores() {
        let a = RawDetection::new(BoundingBox::new(0.1, 0.1, 0.4, 0.4), 0.6);
        let b = RawDetection::new(BoundingBox::new(0.12, 0.1, 0.4, 0.4), 0.9);
        let c = RawDetection::new(BoundingBox::new(0.7, 0.7, 0.2, 0.2), 0.3);
        let kept = non_max_suppression(vec![a, b, c], NMS_IOU);
        let scores: Vec<f32> = kept.iter().map(|d| d.confidence).collect();
        assert_eq!(scores, vec![0.9, 0.3]);
    }

    #[test]
    fn missing_model_is_reported() {
        assert!(matches!(
            TractBackend::new("/nonexistent/doors.onnx", 640, 640),
            Err(ModelLoadError::Missing { .. })
        ));
    }
}
