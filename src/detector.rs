// src/detector.rs

use crate::frame::HalfFrame;
use crate::types::{InferenceConfig, ModelConfig};
use anyhow::{bail, Context, Result};
use ort::{
    execution_providers::CUDAExecutionProvider,
    session::{builder::GraphOptimizationLevel, Session},
};
use std::path::Path;
use tracing::{debug, info};

const NMS_IOU_THRESHOLD: f32 = 0.45;
const LETTERBOX_FILL: u8 = 114;

/// One detected object in a half-frame. Only `label` feeds the window
/// decision; confidence and bbox are kept for diagnostics.
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: [f32; 4], // [x1, y1, x2, y2] in half-frame coordinates
    pub confidence: f32,
    pub label: String,
}

/// Inference seam. The station only assumes "image in, detections out",
/// so tests can substitute a scripted detector.
pub trait Detector: Send {
    fn detect(&mut self, frame: &HalfFrame) -> Result<Vec<Detection>>;
}

pub struct YoloDetector {
    session: Session,
    input_size: usize,
    confidence_threshold: f32,
    class_names: Vec<String>,
}

impl YoloDetector {
    pub fn new(model: &ModelConfig, inference: &InferenceConfig) -> Result<Self> {
        if !Path::new(&model.path).exists() {
            bail!("Model file not found at: {}", model.path);
        }
        info!("Loading detection model: {}", model.path);

        let mut builder = Session::builder()?;
        if inference.use_cuda {
            builder = builder
                .with_execution_providers([CUDAExecutionProvider::default()
                    .with_device_id(0)
                    .build()])?;
            info!("Using device: cuda");
        } else {
            info!("Using device: cpu");
        }

        let session = builder
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(inference.num_threads)?
            .commit_from_file(&model.path)
            .context("Failed to load detection model")?;

        info!(
            "✓ Detector initialized ({} classes, input {}x{})",
            model.class_names.len(),
            model.input_size,
            model.input_size
        );

        Ok(Self {
            session,
            input_size: model.input_size,
            confidence_threshold: model.confidence_threshold,
            class_names: model.class_names.clone(),
        })
    }

    /// Letterbox the half-frame into a square model input.
    /// Returns the CHW tensor plus the scale and padding needed to map
    /// detections back to half-frame coordinates.
    fn preprocess(&self, src: &HalfFrame) -> (Vec<f32>, f32, f32, f32) {
        let target = self.input_size;
        let (src_w, src_h) = (src.width(), src.height());

        let scale = (target as f32 / src_w as f32).min(target as f32 / src_h as f32);
        let scaled_w = (src_w as f32 * scale) as usize;
        let scaled_h = (src_h as f32 * scale) as usize;

        let pad_x = (target - scaled_w) as f32 / 2.0;
        let pad_y = (target - scaled_h) as f32 / 2.0;

        let resized = resize_bilinear(src, scaled_w, scaled_h);

        let mut canvas = vec![LETTERBOX_FILL; target * target * 3];
        for y in 0..scaled_h {
            for x in 0..scaled_w {
                let src_idx = (y * scaled_w + x) * 3;
                let dst_x = x + pad_x as usize;
                let dst_y = y + pad_y as usize;
                let dst_idx = (dst_y * target + dst_x) * 3;
                canvas[dst_idx..dst_idx + 3].copy_from_slice(&resized[src_idx..src_idx + 3]);
            }
        }

        // Normalize [0, 255] -> [0, 1] and convert HWC -> CHW
        let mut input = vec![0.0f32; 3 * target * target];
        for c in 0..3 {
            for h in 0..target {
                for w in 0..target {
                    let hwc_idx = (h * target + w) * 3 + c;
                    let chw_idx = c * target * target + h * target + w;
                    input[chw_idx] = canvas[hwc_idx] as f32 / 255.0;
                }
            }
        }

        (input, scale, pad_x, pad_y)
    }

    fn infer(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        let shape = [1, 3, self.input_size, self.input_size];
        let input_value =
            ort::value::Value::from_array((shape.as_slice(), input.to_vec().into_boxed_slice()))?;

        let outputs = self.session.run(ort::inputs!["images" => input_value])?;
        let output = &outputs[0];
        let (_, data) = output.try_extract_tensor::<f32>()?;

        Ok(data.to_vec())
    }

    fn postprocess(
        &self,
        output: &[f32],
        scale: f32,
        pad_x: f32,
        pad_y: f32,
    ) -> Result<Vec<Detection>> {
        // Output layout: [1, 4 + num_classes, num_preds], attribute-major.
        let num_attrs = 4 + self.class_names.len();
        if output.is_empty() || output.len() % num_attrs != 0 {
            bail!(
                "Unexpected model output length {} for {} attributes",
                output.len(),
                num_attrs
            );
        }
        let num_preds = output.len() / num_attrs;

        let mut detections = Vec::new();
        for i in 0..num_preds {
            let cx = output[i];
            let cy = output[num_preds + i];
            let w = output[num_preds * 2 + i];
            let h = output[num_preds * 3 + i];

            let mut max_conf = 0.0f32;
            let mut best_class = 0;
            for c in 0..self.class_names.len() {
                let conf = output[num_preds * (4 + c) + i];
                if conf > max_conf {
                    max_conf = conf;
                    best_class = c;
                }
            }

            if max_conf < self.confidence_threshold {
                continue;
            }

            // Center format -> corner format, then reverse the letterbox
            let x1 = (cx - w / 2.0 - pad_x) / scale;
            let y1 = (cy - h / 2.0 - pad_y) / scale;
            let x2 = (cx + w / 2.0 - pad_x) / scale;
            let y2 = (cy + h / 2.0 - pad_y) / scale;

            detections.push(Detection {
                bbox: [x1, y1, x2, y2],
                confidence: max_conf,
                label: self.class_names[best_class].clone(),
            });
        }

        Ok(nms(detections, NMS_IOU_THRESHOLD))
    }
}

impl Detector for YoloDetector {
    fn detect(&mut self, frame: &HalfFrame) -> Result<Vec<Detection>> {
        let (input, scale, pad_x, pad_y) = self.preprocess(frame);
        let output = self.infer(&input)?;
        let detections = self.postprocess(&output, scale, pad_x, pad_y)?;
        debug!("Detected {} object(s)", detections.len());
        Ok(detections)
    }
}

fn resize_bilinear(src: &HalfFrame, dst_w: usize, dst_h: usize) -> Vec<u8> {
    let mut dst = vec![0u8; dst_h * dst_w * 3];
    let x_ratio = src.width() as f32 / dst_w as f32;
    let y_ratio = src.height() as f32 / dst_h as f32;

    for dy in 0..dst_h {
        for dx in 0..dst_w {
            let sx = dx as f32 * x_ratio;
            let sy = dy as f32 * y_ratio;
            let sx0 = sx.floor() as usize;
            let sy0 = sy.floor() as usize;
            let sx1 = (sx0 + 1).min(src.width() - 1);
            let sy1 = (sy0 + 1).min(src.height() - 1);
            let fx = sx - sx0 as f32;
            let fy = sy - sy0 as f32;

            let p00 = src.pixel(sx0, sy0);
            let p10 = src.pixel(sx1, sy0);
            let p01 = src.pixel(sx0, sy1);
            let p11 = src.pixel(sx1, sy1);

            for c in 0..3 {
                let val = p00[c] as f32 * (1.0 - fx) * (1.0 - fy)
                    + p10[c] as f32 * fx * (1.0 - fy)
                    + p01[c] as f32 * (1.0 - fx) * fy
                    + p11[c] as f32 * fx * fy;
                dst[(dy * dst_w + dx) * 3 + c] = val.round() as u8;
            }
        }
    }
    dst
}

fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    if detections.is_empty() {
        return detections;
    }

    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    while !detections.is_empty() {
        let current = detections.remove(0);
        detections.retain(|det| calculate_iou(&current.bbox, &det.bbox) < iou_threshold);
        keep.push(current);
    }
    keep
}

fn calculate_iou(box1: &[f32; 4], box2: &[f32; 4]) -> f32 {
    let x1 = box1[0].max(box2[0]);
    let y1 = box1[1].max(box2[1]);
    let x2 = box1[2].min(box2[2]);
    let y2 = box1[3].min(box2[3]);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let area1 = (box1[2] - box1[0]) * (box1[3] - box1[1]);
    let area2 = (box2[2] - box2[0]) * (box2[3] - box2[1]);
    let union = area1 + area2 - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(bbox: [f32; 4], confidence: f32, label: &str) -> Detection {
        Detection {
            bbox,
            confidence,
            label: label.to_string(),
        }
    }

    #[test]
    fn test_iou_of_identical_boxes_is_one() {
        let b = [0.0, 0.0, 10.0, 10.0];
        assert!((calculate_iou(&b, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_of_disjoint_boxes_is_zero() {
        let a = [0.0, 0.0, 10.0, 10.0];
        let b = [20.0, 20.0, 30.0, 30.0];
        assert_eq!(calculate_iou(&a, &b), 0.0);
    }

    #[test]
    fn test_nms_suppresses_overlapping_lower_confidence() {
        let detections = vec![
            det([0.0, 0.0, 10.0, 10.0], 0.9, "phone"),
            det([1.0, 1.0, 11.0, 11.0], 0.6, "phone"),
            det([50.0, 50.0, 60.0, 60.0], 0.7, "laptop"),
        ];

        let kept = nms(detections, 0.45);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].label, "laptop");
    }
}
