//! SCRFD face detector via ONNX Runtime.
//!
//! Letterboxes the frame into the square model input, decodes the three
//! anchor-free stride heads, and suppresses overlaps with NMS.

use crate::types::{FaceBox, Frame};
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_SCORE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} — download from insightface and place in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// One detected face with its five landmarks
/// (left eye, right eye, nose, left mouth, right mouth).
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub score: f32,
    pub landmarks: [(f32, f32); 5],
}

impl Detection {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    /// Pixel box clamped to a `width` × `height` frame.
    pub fn face_box(&self, width: u32, height: u32) -> FaceBox {
        let clamp = |v: f32, max: u32| v.round().clamp(0.0, max.saturating_sub(1) as f32) as u32;
        FaceBox {
            top: clamp(self.y1, height),
            right: clamp(self.x2, width),
            bottom: clamp(self.y2, height),
            left: clamp(self.x1, width),
        }
    }
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
        let size = SCRFD_INPUT_SIZE as f32;
        let scale = (size / width as f32).min(size / height as f32);
        let new_w = (width as f32 * scale).round();
        let new_h = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: ((size - new_w) / 2.0).floor(),
            pad_y: ((size - new_h) / 2.0).floor(),
        }
    }

    /// Model-input coordinates back to frame coordinates.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// (score, bbox, kps) output indices for one stride.
type StrideOutputs = (usize, usize, usize);

pub struct FaceDetector {
    session: Session,
    outputs: [StrideOutputs; 3],
}

impl FaceDetector {
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model needs 9 outputs (score/bbox/kps per stride), got {}",
                names.len()
            )));
        }

        let outputs = output_layout(&names);
        tracing::info!(path = model_path, outputs = ?names, layout = ?outputs, "loaded SCRFD model");

        Ok(Self { session, outputs })
    }

    /// Detect faces, highest score first.
    pub fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
        let (input, letterbox) = preprocess(frame)?;
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (&stride, &(score_idx, bbox_idx, kps_idx)) in SCRFD_STRIDES.iter().zip(&self.outputs) {
            let tensor = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data.to_vec())
                    .map_err(|e| DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };
            let (scores, bboxes, kps) = (
                tensor(score_idx, "scores")?,
                tensor(bbox_idx, "bboxes")?,
                tensor(kps_idx, "kps")?,
            );
            let heads = StrideHeads { scores: &scores, bboxes: &bboxes, kps: &kps };
            candidates.extend(heads.decode(stride, &letterbox));
        }

        Ok(nms(candidates, SCRFD_NMS_THRESHOLD))
    }
}

/// Letterbox a grayscale frame into a normalised 1×3×640×640 tensor.
fn preprocess(frame: &Frame) -> Result<(Array4<f32>, Letterbox), DetectorError> {
    let gray = GrayImage::from_raw(frame.width, frame.height, frame.data.clone())
        .ok_or_else(|| DetectorError::InvalidFrame(format!("{}x{} buffer too short", frame.width, frame.height)))?;

    let letterbox = Letterbox::fit(frame.width, frame.height);
    let new_w = ((frame.width as f32 * letterbox.scale).round() as u32).max(1);
    let new_h = ((frame.height as f32 * letterbox.scale).round() as u32).max(1);
    let resized = imageops::resize(&gray, new_w, new_h, FilterType::Triangle);

    let size = SCRFD_INPUT_SIZE as usize;
    // Padding sits at the mean and normalises to 0.
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    let (ox, oy) = (letterbox.pad_x as usize, letterbox.pad_y as usize);

    for (x, y, pixel) in resized.enumerate_pixels() {
        let (tx, ty) = (ox + x as usize, oy + y as usize);
        if tx >= size || ty >= size {
            continue;
        }
        let v = (pixel.0[0] as f32 - SCRFD_MEAN) / SCRFD_STD;
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = v;
        }
    }

    Ok((tensor, letterbox))
}

/// Map SCRFD outputs to strides by name ("score_8", "bbox_16", "kps_32", ...),
/// falling back to the standard export order when the names are numeric.
fn output_layout(names: &[String]) -> [StrideOutputs; 3] {
    let find = |head: &str, stride: usize| names.iter().position(|n| *n == format!("{head}_{stride}"));

    let named: Option<Vec<StrideOutputs>> = SCRFD_STRIDES
        .iter()
        .map(|&s| Some((find("score", s)?, find("bbox", s)?, find("kps", s)?)))
        .collect();

    match named {
        Some(v) => [v[0], v[1], v[2]],
        None => {
            tracing::debug!(?names, "SCRFD output names not recognised, using positional layout");
            [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
        }
    }
}

struct StrideHeads<'a> {
    scores: &'a [f32],
    bboxes: &'a [f32],
    kps: &'a [f32],
}

impl StrideHeads<'_> {
    fn decode(&self, stride: usize, letterbox: &Letterbox) -> Vec<Detection> {
        let grid_w = SCRFD_INPUT_SIZE as usize / stride;
        let s = stride as f32;

        self.scores
            .iter()
            .enumerate()
            .filter(|&(_, &score)| score > SCRFD_SCORE_THRESHOLD)
            .filter_map(|(idx, &score)| {
                let bbox = self.bboxes.get(idx * 4..idx * 4 + 4)?;
                let kps = self.kps.get(idx * 10..idx * 10 + 10)?;

                let cell = idx / SCRFD_ANCHORS_PER_CELL;
                let ax = (cell % grid_w) as f32 * s;
                let ay = (cell / grid_w) as f32 * s;

                let (x1, y1) = letterbox.unmap(ax - bbox[0] * s, ay - bbox[1] * s);
                let (x2, y2) = letterbox.unmap(ax + bbox[2] * s, ay + bbox[3] * s);
                let landmarks = std::array::from_fn(|i| {
                    letterbox.unmap(ax + kps[i * 2] * s, ay + kps[i * 2 + 1] * s)
                });

                Some(Detection { x1, y1, x2, y2, score, landmarks })
            })
            .collect()
    }
}

/// Greedy non-maximum suppression; output is sorted by descending score.
fn nms(mut candidates: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut kept: Vec<Detection> = Vec::new();
    for det in candidates {
        if kept.iter().all(|k| iou(k, &det) <= iou_threshold) {
            kept.push(det);
        }
    }
    kept
}

fn iou(a: &Detection, b: &Detection) -> f32 {
    let w = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
    let h = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
    let inter = w * h;
    let union = a.area() + b.area() - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x: f32, y: f32, w: f32, h: f32, score: f32) -> Detection {
        Detection { x1: x, y1: y, x2: x + w, y2: y + h, score, landmarks: [(0.0, 0.0); 5] }
    }

    #[test]
    fn test_iou_identical() {
        let a = det(0.0, 0.0, 100.0, 100.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_disjoint() {
        assert_eq!(iou(&det(0.0, 0.0, 10.0, 10.0, 1.0), &det(20.0, 20.0, 10.0, 10.0, 1.0)), 0.0);
    }

    #[test]
    fn test_iou_half_overlap() {
        let a = det(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = det(5.0, 0.0, 10.0, 10.0, 1.0);
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_best_of_overlapping() {
        let kept = nms(
            vec![
                det(5.0, 5.0, 100.0, 100.0, 0.8),
                det(200.0, 200.0, 50.0, 50.0, 0.7),
                det(0.0, 0.0, 100.0, 100.0, 0.9),
            ],
            0.4,
        );
        let scores: Vec<f32> = kept.iter().map(|d| d.score).collect();
        assert_eq!(scores, vec![0.9, 0.7]);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(Vec::new(), 0.4).is_empty());
    }

    #[test]
    fn test_letterbox_unmap_inverts_fit() {
        let lb = Letterbox::fit(320, 240);
        let (x, y) = (100.0f32, 50.0f32);
        let (mx, my) = (x * lb.scale + lb.pad_x, y * lb.scale + lb.pad_y);
        let (rx, ry) = lb.unmap(mx, my);
        assert!((rx - x).abs() < 0.01 && (ry - y).abs() < 0.01);
    }

    #[test]
    fn test_letterbox_pads_short_axis() {
        let lb = Letterbox::fit(640, 320);
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 160.0);
    }

    #[test]
    fn test_output_layout_named_shuffled() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8", "bbox_16", "kps_16", "score_16", "bbox_32", "kps_32",
            "score_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(output_layout(&names), [(2, 0, 1), (5, 3, 4), (8, 6, 7)]);
    }

    #[test]
    fn test_output_layout_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i| format!("{}", 400 + i)).collect();
        assert_eq!(output_layout(&names), [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }

    #[test]
    fn test_decode_single_anchor() {
        let lb = Letterbox { scale: 1.0, pad_x: 0.0, pad_y: 0.0 };
        let grid = (SCRFD_INPUT_SIZE as usize / 32).pow(2) * SCRFD_ANCHORS_PER_CELL;
        let mut scores = vec![0.0f32; grid];
        let mut bboxes = vec![0.0f32; grid * 4];
        let kps = vec![0.0f32; grid * 10];
        // Anchor index 2 → cell 1 → grid (x=1, y=0) → centre (32, 0).
        scores[2] = 0.9;
        bboxes[8..12].copy_from_slice(&[0.5, 0.0, 0.5, 1.0]);

        let heads = StrideHeads { scores: &scores, bboxes: &bboxes, kps: &kps };
        let dets = heads.decode(32, &lb);

        assert_eq!(dets.len(), 1);
        let d = &dets[0];
        assert_eq!((d.x1, d.y1, d.x2, d.y2), (16.0, 0.0, 48.0, 32.0));
        assert_eq!(d.landmarks[0], (32.0, 0.0));
    }

    #[test]
    fn test_face_box_clamps() {
        let d = det(-5.0, 10.4, 50.0, 300.0, 0.9);
        assert_eq!(
            d.face_box(100, 200),
            FaceBox { top: 10, right: 45, bottom: 199, left: 0 }
        );
    }

    #[test]
    fn test_preprocess_rejects_short_buffer() {
        let frame = Frame::new(vec![0; 4], 10, 10, 0);
        assert!(matches!(preprocess(&frame), Err(DetectorError::InvalidFrame(_))));
    }

    #[test]
    fn test_preprocess_pads_with_zero() {
        let frame = Frame::new(vec![255; 64 * 32], 64, 32, 0);
        let (tensor, lb) = preprocess(&frame).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        // Top padding row normalises to 0, image rows carry the bright value.
        assert_eq!(tensor[[0, 0, 0, 320]], 0.0);
        let inside = tensor[[0, 1, lb.pad_y as usize + 10, 320]];
        assert!((inside - (255.0 - SCRFD_MEAN) / SCRFD_STD).abs() < 1e-4);
    }
}
