//! ONNX-backed [`FaceEncoder`]: SCRFD detection plus ArcFace embedding.

use crate::detector::{Detection, FaceDetector};
use crate::matcher::{EncoderError, FaceEncoder};
use crate::recognizer::FaceRecognizer;
use crate::types::{Embedding, FaceBox, Frame};
use std::path::{Path, PathBuf};

/// Cosine similarity at which two ArcFace embeddings are the same person.
pub const ARCFACE_COSINE_THRESHOLD: f32 = 0.40;

/// Euclidean cutoff for unit-length ArcFace embeddings.
///
/// For unit vectors `|a - b| = sqrt(2 - 2 cos)`, so cosine 0.40 is a
/// distance of about 1.10.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 1.10;

pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

/// Default model directory: `$XDG_DATA_HOME/facewatch/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facewatch/models")
}

pub struct OnnxFaceEncoder {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
    threshold: f32,
    /// Detections from the last `locate_faces`, reused by `embed` on the same frame.
    last: Option<(u32, Vec<(FaceBox, Detection)>)>,
}

impl OnnxFaceEncoder {
    /// Load both models from `model_dir`.
    pub fn load(model_dir: &Path, threshold: f32) -> Result<Self, EncoderError> {
        let scrfd = model_dir.join(SCRFD_MODEL_FILE);
        let arcface = model_dir.join(ARCFACE_MODEL_FILE);

        let detector = FaceDetector::load(&scrfd.to_string_lossy())?;
        let recognizer = FaceRecognizer::load(&arcface.to_string_lossy())?;
        tracing::info!(dir = %model_dir.display(), threshold, "face encoder ready");

        Ok(Self {
            detector,
            recognizer,
            threshold,
            last: None,
        })
    }

    fn detections(&mut self, frame: &Frame) -> Result<Vec<(FaceBox, Detection)>, EncoderError> {
        let found = self.detector.detect(frame)?;
        Ok(found
            .into_iter()
            .map(|d| (d.face_box(frame.width, frame.height), d))
            .collect())
    }
}

impl FaceEncoder for OnnxFaceEncoder {
    fn locate_faces(&mut self, frame: &Frame) -> Result<Vec<FaceBox>, EncoderError> {
        let found = self.detections(frame)?;
        let boxes = found.iter().map(|(b, _)| *b).collect();
        self.last = Some((frame.sequence, found));
        Ok(boxes)
    }

    fn embed(&mut self, frame: &Frame, faces: &[FaceBox]) -> Result<Vec<Embedding>, EncoderError> {
        let cached = match self.last.take() {
            Some((seq, found)) if seq == frame.sequence => found,
            _ => self.detections(frame)?,
        };

        faces
            .iter()
            .map(|face| -> Result<Embedding, EncoderError> {
                let (_, det) = cached
                    .iter()
                    .find(|(b, _)| b == face)
                    .ok_or_else(|| EncoderError::Other(format!("no landmarks for face {face:?}")))?;
                Ok(self.recognizer.embed(frame, &det.landmarks)?)
            })
            .collect()
    }

    fn match_threshold(&self) -> f32 {
        self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_models_fail_load() {
        let dir = tempfile::tempdir().unwrap();
        let err = OnnxFaceEncoder::load(dir.path(), DEFAULT_MATCH_THRESHOLD).err().unwrap();
        assert!(matches!(err, EncoderError::Detector(_)));
    }

    #[test]
    fn test_default_threshold_matches_cosine_cutoff() {
        let derived = (2.0 - 2.0 * ARCFACE_COSINE_THRESHOLD).sqrt();
        assert!((DEFAULT_MATCH_THRESHOLD - derived).abs() < 0.01);
    }

    #[test]
    fn test_default_threshold_accepts_unit_vectors_at_cutoff() {
        // Two unit vectors with cosine 0.45: same person.
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![0.45, (1.0f32 - 0.45 * 0.45).sqrt()]);
        assert!(a.euclidean_distance(&b) <= DEFAULT_MATCH_THRESHOLD);
        // Orthogonal: different people.
        let c = Embedding::new(vec![0.0, 1.0]);
        assert!(a.euclidean_distance(&c) > DEFAULT_MATCH_THRESHOLD);
    }

    #[test]
    fn test_default_model_dir_suffix() {
        assert!(default_model_dir().ends_with("facewatch/models"));
    }
}
