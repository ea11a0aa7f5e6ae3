// src/object_detection.rs

use crate::types::{Detection, DetectorConfig, Frame};
use anyhow::{bail, Context, Result};
use ort::{
    execution_providers::CUDAExecutionProvider,
    session::{builder::GraphOptimizationLevel, Session},
};
use tracing::{debug, info};

const INPUT_SIZE: usize = 640;
const NUM_PREDICTIONS: usize = 8400;
const NMS_IOU_THRESHOLD: f32 = 0.45;

/// COCO class names, indexed by class id.
const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich",
    "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote",
    "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator", "book",
    "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

pub fn class_name(class_id: u32) -> &'static str {
    COCO_CLASSES
        .get(class_id as usize)
        .copied()
        .unwrap_or("unknown")
}

/// Per-frame detection: one frame in, one detection list out. The model may
/// batch internally; callers see single-frame semantics.
pub trait Detector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;
}

pub struct YoloDetector {
    session: Session,
    confidence_threshold: f32,
    target_classes: Vec<u32>,
}

struct Letterbox {
    input: Vec<f32>,
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl YoloDetector {
    pub fn new(config: &DetectorConfig) -> Result<Self> {
        info!("Loading detection model: {}", config.model_path);

        let session = Session::builder()?
            .with_execution_providers([CUDAExecutionProvider::default().with_device_id(0).build()])?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(&config.model_path)
            .context("failed to load detection model")?;

        let mut target_classes = vec![config.person_class_id];
        target_classes.extend_from_slice(&config.vehicle_class_ids);

        info!("✓ Detector initialized (classes: {:?})", target_classes);

        Ok(Self {
            session,
            confidence_threshold: config.confidence_threshold,
            target_classes,
        })
    }

    fn infer(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        let shape = [1, 3, INPUT_SIZE, INPUT_SIZE];
        let input_value =
            ort::value::Value::from_array((shape.as_slice(), input.to_vec().into_boxed_slice()))?;

        let outputs = self.session.run(ort::inputs!["images" => input_value])?;
        let (_, data) = outputs[0].try_extract_tensor::<f32>()?;
        Ok(data.to_vec())
    }

    fn parse_output(&self, output: &[f32], lb: &Letterbox) -> Result<Vec<Detection>> {
        // Output layout [1, 4 + classes, 8400]: bbox rows first, then one
        // confidence row per class.
        if output.len() < 5 * NUM_PREDICTIONS {
            bail!("unexpected model output size {}", output.len());
        }
        let num_classes = output.len() / NUM_PREDICTIONS - 4;
        if output.len() != (4 + num_classes) * NUM_PREDICTIONS {
            bail!("unexpected model output size {}", output.len());
        }

        let mut detections = Vec::new();
        for i in 0..NUM_PREDICTIONS {
            let cx = output[i];
            let cy = output[NUM_PREDICTIONS + i];
            let w = output[NUM_PREDICTIONS * 2 + i];
            let h = output[NUM_PREDICTIONS * 3 + i];

            let mut best_conf = 0.0f32;
            let mut best_class = 0u32;
            for c in 0..num_classes {
                let conf = output[NUM_PREDICTIONS * (4 + c) + i];
                if conf > best_conf {
                    best_conf = conf;
                    best_class = c as u32;
                }
            }

            if best_conf < self.confidence_threshold
                || !self.target_classes.contains(&best_class)
            {
                continue;
            }

            // Center format to corners, then undo the letterbox transform.
            let x1 = (cx - w / 2.0 - lb.pad_x) / lb.scale;
            let y1 = (cy - h / 2.0 - lb.pad_y) / lb.scale;
            let x2 = (cx + w / 2.0 - lb.pad_x) / lb.scale;
            let y2 = (cy + h / 2.0 - lb.pad_y) / lb.scale;

            detections.push(Detection {
                bbox: [x1, y1, x2, y2],
                confidence: best_conf,
                class_id: best_class,
                class_name: class_name(best_class).to_string(),
            });
        }

        Ok(nms(detections, NMS_IOU_THRESHOLD))
    }
}

impl Detector for YoloDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let lb = letterbox(&frame.data, frame.width, frame.height);
        let output = self.infer(&lb.input)?;
        let detections = self.parse_output(&output, &lb)?;
        debug!("Detected {} objects", detections.len());
        Ok(detections)
    }
}

/// Scale the RGB frame to fit a 640x640 canvas (aspect preserved, gray
/// padding) and emit a normalized CHW tensor.
fn letterbox(rgb: &[u8], src_w: usize, src_h: usize) -> Letterbox {
    let target = INPUT_SIZE;
    let scale = (target as f32 / src_w as f32).min(target as f32 / src_h as f32);
    let scaled_w = (src_w as f32 * scale) as usize;
    let scaled_h = (src_h as f32 * scale) as usize;
    let pad_x = (target - scaled_w) as f32 / 2.0;
    let pad_y = (target - scaled_h) as f32 / 2.0;

    let mut canvas = vec![114u8; target * target * 3];
    let x_ratio = src_w as f32 / scaled_w as f32;
    let y_ratio = src_h as f32 / scaled_h as f32;

    for dy in 0..scaled_h {
        let sy = ((dy as f32 * y_ratio) as usize).min(src_h - 1);
        for dx in 0..scaled_w {
            let sx = ((dx as f32 * x_ratio) as usize).min(src_w - 1);
            let src_idx = (sy * src_w + sx) * 3;
            let dst_idx = ((dy + pad_y as usize) * target + dx + pad_x as usize) * 3;
            canvas[dst_idx..dst_idx + 3].copy_from_slice(&rgb[src_idx..src_idx + 3]);
        }
    }

    // HWC u8 -> CHW f32 in [0, 1]
    let mut input = vec![0.0f32; 3 * target * target];
    for c in 0..3 {
        for y in 0..target {
            for x in 0..target {
                input[c * target * target + y * target + x] =
                    canvas[(y * target + x) * 3 + c] as f32 / 255.0;
            }
        }
    }

    Letterbox {
        input,
        scale,
        pad_x,
        pad_y,
    }
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let area_a = (a[2] - a[0]) * (a[3] - a[1]);
    let area_b = (b[2] - b[0]) * (b[3] - b[1]);
    let union = area_a + area_b - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    while !detections.is_empty() {
        let current = detections.remove(0);
        detections.retain(|det| iou(&current.bbox, &det.bbox) < iou_threshold);
        keep.push(current);
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(bbox: [f32; 4], confidence: f32) -> Detection {
        Detection {
            bbox,
            confidence,
            class_id: 0,
            class_name: "person".to_string(),
        }
    }

    #[test]
    fn class_table_resolves_known_ids() {
        assert_eq!(class_name(0), "person");
        assert_eq!(class_name(2), "car");
        assert_eq!(class_name(7), "truck");
        assert_eq!(class_name(200), "unknown");
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        assert_eq!(
            iou(&[0.0, 0.0, 10.0, 10.0], &[20.0, 20.0, 30.0, 30.0]),
            0.0
        );
    }

    #[test]
    fn iou_of_half_overlap() {
        let score = iou(&[0.0, 0.0, 100.0, 100.0], &[50.0, 50.0, 150.0, 150.0]);
        assert!((score - 2500.0 / 17500.0).abs() < 1e-4);
    }

    #[test]
    fn nms_suppresses_overlapping_lower_confidence() {
        let dets = vec![
            det([0.0, 0.0, 100.0, 100.0], 0.9),
            det([5.0, 5.0, 105.0, 105.0], 0.6),
            det([300.0, 300.0, 400.0, 400.0], 0.7),
        ];
        let kept = nms(dets, 0.45);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].confidence, 0.7);
    }

    #[test]
    fn letterbox_centers_a_wide_frame() {
        // 1280x720 -> scale 0.5, 640x360 scaled, vertical padding 140.
        let rgb = vec![0u8; 1280 * 720 * 3];
        let lb = letterbox(&rgb, 1280, 720);
        assert!((lb.scale - 0.5).abs() < 1e-6);
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 140.0);
        assert_eq!(lb.input.len(), 3 * INPUT_SIZE * INPUT_SIZE);
        // Padding pixels carry the gray fill.
        assert!((lb.input[0] - 114.0 / 255.0).abs() < 1e-6);
    }
}
