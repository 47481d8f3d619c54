//! ArcFace face embedder via ONNX Runtime.
//!
//! Produces L2-normalised 512-d embeddings from 112×112 aligned crops
//! (w600k_r50).

use crate::alignment::{self, ALIGNED_SIZE};
use crate::types::{Embedding, Frame};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// Symmetric normalisation, unlike SCRFD.
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5;
const ARCFACE_EMBEDDING_DIM: usize = 512;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0} — download from insightface and place in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    pub fn load(model_path: &str) -> Result<Self, RecognizerError> {
        if !Path::new(model_path).exists() {
            return Err(RecognizerError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session })
    }

    /// Embed the face whose five landmarks are given, in `frame` coordinates.
    pub fn embed(
        &mut self,
        frame: &Frame,
        landmarks: &[(f32, f32); 5],
    ) -> Result<Embedding, RecognizerError> {
        let aligned = alignment::align_face(frame, landmarks);
        let input = preprocess(&aligned);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Embedding::new(l2_normalize(raw)))
    }
}

fn l2_normalize(raw: &[f32]) -> Vec<f32> {
    let norm = raw.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|v| v / norm).collect()
    } else {
        raw.to_vec()
    }
}

/// Aligned grayscale crop → 1×3×112×112 tensor, gray replicated across channels.
fn preprocess(aligned: &[u8]) -> Array4<f32> {
    Array4::from_shape_fn((1, 3, ALIGNED_SIZE, ALIGNED_SIZE), |(_, _, y, x)| {
        let pixel = aligned.get(y * ALIGNED_SIZE + x).copied().unwrap_or(0) as f32;
        (pixel - ARCFACE_MEAN) / ARCFACE_STD
    })
}
