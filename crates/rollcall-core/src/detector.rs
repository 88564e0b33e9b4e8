//! SCRFD face detector via ONNX Runtime.
//!
//! Letterboxes the frame to 640×640, decodes the three anchor-free stride
//! heads (boxes + five landmarks), then runs NMS.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INPUT_SIZE: u32 = 640;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 128.0;
const CONFIDENCE_THRESHOLD: f32 = 0.5;
const NMS_IOU_THRESHOLD: f32 = 0.4;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detector model not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("empty image")]
    EmptyImage,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Scale and padding applied when fitting a frame into the model input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: u32, height: u32) -> Self {
        let scale = (INPUT_SIZE as f32 / width as f32).min(INPUT_SIZE as f32 / height as f32);
        let new_w = (width as f32 * scale).round();
        let new_h = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: ((INPUT_SIZE as f32 - new_w) / 2.0).floor(),
            pad_y: ((INPUT_SIZE as f32 - new_h) / 2.0).floor(),
        }
    }

    /// Map a point from model-input space back to the source frame.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output positions (score, bbox, kps) for one stride.
type HeadIndices = (usize, usize, usize);

pub struct FaceDetector {
    session: Session,
    heads: [HeadIndices; 3],
}

impl FaceDetector {
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();
        if names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD needs 9 outputs (score/bbox/kps per stride), model has {}",
                names.len()
            )));
        }

        let heads = head_indices(&names);
        tracing::info!(path = model_path, outputs = ?names, ?heads, "SCRFD detector loaded");

        Ok(Self { session, heads })
    }

    /// Detect faces, most confident first.
    pub fn detect(&mut self, image: &GrayImage) -> Result<Vec<BoundingBox>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(DetectorError::EmptyImage);
        }

        let (input, letterbox) = preprocess(image);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (pos, &stride) in STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.heads[pos];
            let extract = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data.to_vec())
                    .map_err(|e| {
                        DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}"))
                    })
            };
            let scores = extract(score_idx, "scores")?;
            let boxes = extract(bbox_idx, "boxes")?;
            let kps = extract(kps_idx, "landmarks")?;
            candidates.extend(decode_head(&scores, &boxes, &kps, stride, &letterbox));
        }

        Ok(nms(candidates, NMS_IOU_THRESHOLD))
    }
}

/// Letterbox a frame into an NCHW tensor, grey replicated across channels.
fn preprocess(image: &GrayImage) -> (Array4<f32>, Letterbox) {
    let letterbox = Letterbox::fit(image.width(), image.height());
    let new_w = ((image.width() as f32 * letterbox.scale).round() as u32).max(1);
    let new_h = ((image.height() as f32 * letterbox.scale).round() as u32).max(1);
    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let size = INPUT_SIZE as usize;
    // Padding normalizes to 0.0.
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    let (off_x, off_y) = (letterbox.pad_x as u32, letterbox.pad_y as u32);

    for (x, y, pixel) in resized.enumerate_pixels() {
        let (tx, ty) = ((x + off_x) as usize, (y + off_y) as usize);
        if tx >= size || ty >= size {
            continue;
        }
        let v = (pixel[0] as f32 - PIXEL_MEAN) / PIXEL_STD;
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = v;
        }
    }

    (tensor, letterbox)
}

/// Resolve output positions by tensor name (`score_8`, `bbox_16`, `kps_32`, ...),
/// falling back to the stock export order: scores, then boxes, then landmarks.
fn head_indices(names: &[String]) -> [HeadIndices; 3] {
    let find = |prefix: &str, stride: usize| {
        let wanted = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == wanted)
    };

    let mut heads = [(0, 3, 6), (1, 4, 7), (2, 5, 8)];
    for (slot, &stride) in STRIDES.iter().enumerate() {
        match (find("score", stride), find("bbox", stride), find("kps", stride)) {
            (Some(s), Some(b), Some(k)) => heads[slot] = (s, b, k),
            _ => return [(0, 3, 6), (1, 4, 7), (2, 5, 8)],
        }
    }
    heads
}

/// Decode one stride head into frame-space detections above the confidence threshold.
fn decode_head(
    scores: &[f32],
    boxes: &[f32],
    kps: &[f32],
    stride: usize,
    letterbox: &Letterbox,
) -> Vec<BoundingBox> {
    let grid_w = INPUT_SIZE as usize / stride;
    let grid_h = INPUT_SIZE as usize / stride;
    let s = stride as f32;
    let mut found = Vec::new();

    for idx in 0..grid_w * grid_h * ANCHORS_PER_CELL {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= CONFIDENCE_THRESHOLD {
            continue;
        }
        let Some(d) = boxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };

        let cell = idx / ANCHORS_PER_CELL;
        let ax = (cell % grid_w) as f32 * s;
        let ay = (cell / grid_w) as f32 * s;

        let (x1, y1) = letterbox.unmap(ax - d[0] * s, ay - d[1] * s);
        let (x2, y2) = letterbox.unmap(ax + d[2] * s, ay + d[3] * s);

        let landmarks = kps.get(idx * 10..idx * 10 + 10).map(|k| {
            std::array::from_fn(|i| letterbox.unmap(ax + k[i * 2] * s, ay + k[i * 2 + 1] * s))
        });

        found.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            landmarks,
        });
    }

    found
}

/// Greedy non-maximum suppression; output is sorted by confidence.
fn nms(mut candidates: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<BoundingBox> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = w * h;
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, y: f32, w: f32, h: f32, confidence: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence, landmarks: None }
    }

    #[test]
    fn test_iou_identical() {
        let a = bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_disjoint() {
        let a = bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = bbox(50.0, 50.0, 10.0, 10.0, 1.0);
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn test_iou_half_overlap() {
        let a = bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = bbox(5.0, 0.0, 10.0, 10.0, 1.0);
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_most_confident_of_overlap() {
        let result = nms(
            vec![
                bbox(4.0, 4.0, 100.0, 100.0, 0.7),
                bbox(300.0, 300.0, 40.0, 40.0, 0.6),
                bbox(0.0, 0.0, 100.0, 100.0, 0.9),
            ],
            0.4,
        );
        let confidences: Vec<f32> = result.iter().map(|b| b.confidence).collect();
        assert_eq!(confidences, vec![0.9, 0.6]);
    }

    #[test]
    fn test_head_indices_by_name() {
        let names: Vec<String> = [
            "kps_8", "kps_16", "kps_32", "score_8", "score_16", "score_32", "bbox_8",
            "bbox_16", "bbox_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(head_indices(&names), [(3, 6, 0), (4, 7, 1), (5, 8, 2)]);
    }

    #[test]
    fn test_head_indices_positional_fallback() {
        let names: Vec<String> = (440..449).map(|n| n.to_string()).collect();
        assert_eq!(head_indices(&names), [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }

    #[test]
    fn test_letterbox_round_trip() {
        // 640x480 → scale 1.0, 80px vertical padding.
        let lb = Letterbox::fit(640, 480);
        assert!((lb.scale - 1.0).abs() < 1e-6);
        assert_eq!(lb.pad_y, 80.0);
        let (x, y) = lb.unmap(100.0, 180.0);
        assert!((x - 100.0).abs() < 1e-4);
        assert!((y - 100.0).abs() < 1e-4);
    }

    #[test]
    fn test_decode_head_maps_single_anchor() {
        let stride = 32;
        let cells = (INPUT_SIZE as usize / stride).pow(2) * ANCHORS_PER_CELL;
        let mut scores = vec![0.0; cells];
        let mut boxes = vec![0.0; cells * 4];
        let kps = vec![0.0; cells * 10];
        // Anchor 2 → cell 1 → (32, 0) in input space.
        scores[2] = 0.9;
        boxes[8..12].copy_from_slice(&[1.0, 0.0, 1.0, 2.0]);

        let lb = Letterbox { scale: 1.0, pad_x: 0.0, pad_y: 0.0 };
        let found = decode_head(&scores, &boxes, &kps, stride, &lb);
        assert_eq!(found.len(), 1);
        let f = &found[0];
        assert_eq!((f.x, f.y, f.width, f.height), (0.0, 0.0, 64.0, 64.0));
        assert_eq!(f.landmarks.unwrap()[0], (32.0, 0.0));
    }

    #[test]
    fn test_preprocess_shape_and_padding() {
        let image = GrayImage::from_pixel(320, 160, image::Luma([255]));
        let (tensor, lb) = preprocess(&image);
        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        assert!((lb.scale - 2.0).abs() < 1e-6);
        // Top padding rows stay at the normalized mean.
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        let inside = tensor[[0, 1, 320, 320]];
        assert!((inside - (255.0 - PIXEL_MEAN) / PIXEL_STD).abs() < 1e-3);
    }
}
