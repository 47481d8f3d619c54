use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Label assigned to a face that matches no gallery entry.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// A captured grayscale video frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Grayscale pixel data, row-major (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Instant,
    pub sequence: u32,
}

impl Frame {
    /// Wrap raw grayscale pixels captured now.
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Self {
        Self {
            data,
            width,
            height,
            timestamp: Instant::now(),
            sequence,
        }
    }

    /// Average pixel brightness (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&b| b as f32).sum::<f32>() / self.data.len() as f32
    }
}

/// Face location as (top, right, bottom, left) pixel edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceBox {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

impl FaceBox {
    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }

    /// Rescale by `factor`, clamping to a `width` × `height` frame.
    pub fn scaled(&self, factor: f32, width: u32, height: u32) -> FaceBox {
        let scale = |v: u32, max: u32| ((v as f32 * factor).round() as u32).min(max.saturating_sub(1));
        FaceBox {
            top: scale(self.top, height),
            right: scale(self.right, width),
            bottom: scale(self.bottom, height),
            left: scale(self.left, width),
        }
    }
}

/// Face embedding vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Euclidean distance between two embeddings of equal dimension.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One known identity sample.
#[derive(Debug, Clone, PartialEq)]
pub struct GalleryEntry {
    pub embedding: Embedding,
    pub label: String,
}

/// Identity assigned to one detected face.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub face: FaceBox,
    /// Gallery label, or [`UNKNOWN_LABEL`].
    pub label: String,
    /// Similarity score in [0, 100]; always 0 for unknown faces.
    pub confidence: f32,
}

impl MatchResult {
    pub fn is_unknown(&self) -> bool {
        self.label == UNKNOWN_LABEL
    }

    /// Overlay caption, e.g. `alice (87.50%)`.
    pub fn caption(&self) -> String {
        format!("{} ({:.2}%)", self.label, self.confidence)
    }
}
