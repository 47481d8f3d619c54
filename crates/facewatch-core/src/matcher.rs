//! Per-frame identity matching against the gallery.
//!
//! Each face is voted on by every gallery entry within the encoder's match
//! threshold; the label with the most votes wins, and confidence is derived
//! from the closest gallery embedding.

use crate::detector::DetectorError;
use crate::gallery::Gallery;
use crate::recognizer::RecognizerError;
use crate::types::{Embedding, FaceBox, Frame, MatchResult, UNKNOWN_LABEL};
use image::imageops::{self, FilterType};
use image::GrayImage;
use thiserror::Error;

/// Default width frames are shrunk to before detection.
pub const DEFAULT_WORKING_WIDTH: u32 = 500;

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("encoder failed: {0}")]
    Other(String),
}

#[derive(Error, Debug)]
pub enum FrameProcessingError {
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    #[error(transparent)]
    Encoder(#[from] EncoderError),
    #[error("encoder returned {embeddings} embeddings for {faces} faces")]
    EmbeddingCount { faces: usize, embeddings: usize },
    #[error("embedding dimension {actual} does not match gallery dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("encoder returned a non-finite embedding")]
    NonFiniteEmbedding,
}

/// Face detection and embedding capability.
pub trait FaceEncoder: Send {
    /// Locate every face in the frame.
    fn locate_faces(&mut self, frame: &Frame) -> Result<Vec<FaceBox>, EncoderError>;

    /// Compute one embedding per face, in the order given.
    fn embed(&mut self, frame: &Frame, faces: &[FaceBox]) -> Result<Vec<Embedding>, EncoderError>;

    fn distance(&self, a: &Embedding, b: &Embedding) -> f32 {
        a.euclidean_distance(b)
    }

    /// Distances at or below this value count as the same identity.
    fn match_threshold(&self) -> f32;
}

/// Outcome of comparing one probe embedding against the gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub label: String,
    pub confidence: f32,
    /// Distance to the closest gallery embedding, matching or not.
    pub min_distance: f32,
}

/// Map a distance onto a [0, 100] score: 0 → 100, ≥1 → 0.
pub fn confidence_from_distance(distance: f32) -> f32 {
    ((1.0 - distance) * 100.0).clamp(0.0, 100.0)
}

/// Majority vote over matching gallery entries.
///
/// Ties go to the label encountered first in gallery order.
pub fn identify<D>(probe: &Embedding, gallery: &Gallery, threshold: f32, distance: D) -> Identity
where
    D: Fn(&Embedding, &Embedding) -> f32,
{
    let mut tally: Vec<(&str, usize)> = Vec::new();
    let mut min_distance = f32::INFINITY;

    for entry in gallery.entries() {
        let d = distance(probe, &entry.embedding);
        min_distance = min_distance.min(d);
        if d.is_nan() || d > threshold {
            continue;
        }
        match tally.iter().position(|(label, _)| *label == entry.label) {
            Some(i) => tally[i].1 += 1,
            None => tally.push((entry.label.as_str(), 1)),
        }
    }

    // `max_by_key` keeps the last maximum; fold keeps the first.
    let winner = tally
        .iter()
        .fold(None::<&(&str, usize)>, |best, cur| match best {
            Some(b) if b.1 >= cur.1 => Some(b),
            _ => Some(cur),
        });

    match winner {
        Some((label, _)) => Identity {
            label: (*label).to_string(),
            confidence: confidence_from_distance(min_distance),
            min_distance,
        },
        None => Identity {
            label: UNKNOWN_LABEL.to_string(),
            confidence: 0.0,
            min_distance,
        },
    }
}

/// Turns frames into labelled faces.
///
/// Owned by a single recognition loop; remembers the last announced label so
/// a new identity is logged once rather than every frame.
pub struct FrameMatcher {
    working_width: u32,
    last_announced: Option<String>,
}

impl FrameMatcher {
    pub fn new(working_width: u32) -> Self {
        Self {
            working_width: working_width.max(1),
            last_announced: None,
        }
    }

    pub fn working_width(&self) -> u32 {
        self.working_width
    }

    pub fn last_announced(&self) -> Option<&str> {
        self.last_announced.as_deref()
    }

    /// Detect, embed, and identify every face in `frame`.
    ///
    /// Returned boxes are in `frame`'s own coordinates.
    pub fn match_frame(
        &mut self,
        frame: &Frame,
        gallery: &Gallery,
        encoder: &mut dyn FaceEncoder,
    ) -> Result<Vec<MatchResult>, FrameProcessingError> {
        let working = self.shrink(frame)?;
        let scale_back = frame.width as f32 / working.width as f32;

        let faces = encoder.locate_faces(&working)?;
        if faces.is_empty() {
            return Ok(Vec::new());
        }

        let embeddings = encoder.embed(&working, &faces)?;
        if embeddings.len() != faces.len() {
            return Err(FrameProcessingError::EmbeddingCount {
                faces: faces.len(),
                embeddings: embeddings.len(),
            });
        }

        let threshold = encoder.match_threshold();
        let mut results = Vec::with_capacity(faces.len());

        for (face, embedding) in faces.iter().zip(&embeddings) {
            if embedding.dim() != gallery.dim() {
                return Err(FrameProcessingError::DimensionMismatch {
                    expected: gallery.dim(),
                    actual: embedding.dim(),
                });
            }
            if embedding.values.iter().any(|v| !v.is_finite()) {
                return Err(FrameProcessingError::NonFiniteEmbedding);
            }

            let identity = identify(embedding, gallery, threshold, |a, b| encoder.distance(a, b));
            tracing::trace!(
                label = %identity.label,
                min_distance = identity.min_distance,
                "face identified"
            );

            let result = MatchResult {
                face: face.scaled(scale_back, frame.width, frame.height),
                label: identity.label,
                confidence: identity.confidence,
            };
            if !result.is_unknown() {
                self.announce(&result.label);
            }
            results.push(result);
        }

        Ok(results)
    }

    fn announce(&mut self, label: &str) {
        if self.last_announced.as_deref() != Some(label) {
            tracing::info!(label, "identity changed");
            self.last_announced = Some(label.to_string());
        }
    }

    /// Downscale to the working width, keeping aspect ratio. Never upscales.
    fn shrink(&self, frame: &Frame) -> Result<Frame, FrameProcessingError> {
        let expected = frame.width as usize * frame.height as usize;
        if frame.width == 0 || frame.height == 0 || frame.data.len() < expected {
            return Err(FrameProcessingError::InvalidFrame(format!(
                "{}x{} frame with {} bytes",
                frame.width,
                frame.height,
                frame.data.len()
            )));
        }

        if frame.width <= self.working_width {
            return Ok(frame.clone());
        }

        let new_w = self.working_width;
        let new_h = ((frame.height as f32 * new_w as f32 / frame.width as f32).round() as u32).max(1);

        let src = GrayImage::from_raw(frame.width, frame.height, frame.data[..expected].to_vec())
            .ok_or_else(|| FrameProcessingError::InvalidFrame("pixel buffer too short".into()))?;
        let resized = imageops::resize(&src, new_w, new_h, FilterType::Triangle);

        Ok(Frame {
            data: resized.into_raw(),
            width: new_w,
            height: new_h,
            timestamp: frame.timestamp,
            sequence: frame.sequence,
        })
    }
}
