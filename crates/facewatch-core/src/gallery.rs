//! Known-identity gallery, loaded once from a JSON store and read-only afterwards.

use crate::types::{Embedding, GalleryEntry, UNKNOWN_LABEL};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryLoadError {
    #[error("gallery file not found: {0}")]
    NotFound(String),
    #[error("failed to read gallery: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed gallery: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("gallery has {embeddings} embeddings but {labels} labels")]
    LengthMismatch { embeddings: usize, labels: usize },
    #[error("gallery is empty")]
    Empty,
    #[error("embedding {index} has dimension {actual}, expected {expected}")]
    InconsistentDimension {
        index: usize,
        expected: usize,
        actual: usize,
    },
    #[error("embedding {index} is empty or contains non-finite values")]
    InvalidEmbedding { index: usize },
    #[error("entry {index} uses the reserved label {:?}", UNKNOWN_LABEL)]
    ReservedLabel { index: usize },
}

/// On-disk layout: parallel `embeddings` and `labels` arrays.
#[derive(Deserialize)]
struct GalleryFile {
    embeddings: Vec<Vec<f32>>,
    labels: Vec<String>,
}

/// Ordered, immutable set of (embedding, label) pairs.
///
/// Several entries may share a label (one person, several reference shots).
#[derive(Debug, Clone)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
    dim: usize,
}

impl Gallery {
    /// Load and validate a gallery file in full.
    pub fn load(path: &Path) -> Result<Self, GalleryLoadError> {
        if !path.exists() {
            return Err(GalleryLoadError::NotFound(path.display().to_string()));
        }
        let bytes = std::fs::read(path)?;
        let gallery = Self::from_slice(&bytes)?;

        tracing::info!(
            path = %path.display(),
            entries = gallery.len(),
            labels = gallery.label_count(),
            dim = gallery.dim(),
            "loaded gallery"
        );

        Ok(gallery)
    }

    /// Parse a serialized gallery.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, GalleryLoadError> {
        let file: GalleryFile = serde_json::from_slice(bytes)?;
        if file.embeddings.len() != file.labels.len() {
            return Err(GalleryLoadError::LengthMismatch {
                embeddings: file.embeddings.len(),
                labels: file.labels.len(),
            });
        }
        let entries = file
            .embeddings
            .into_iter()
            .zip(file.labels)
            .map(|(values, label)| GalleryEntry {
                embedding: Embedding::new(values),
                label,
            })
            .collect();
        Self::from_entries(entries)
    }

    /// Build a gallery from in-memory entries, applying the same validation as [`load`](Self::load).
    pub fn from_entries(entries: Vec<GalleryEntry>) -> Result<Self, GalleryLoadError> {
        let first = entries.first().ok_or(GalleryLoadError::Empty)?;
        let dim = first.embedding.dim();

        for (index, entry) in entries.iter().enumerate() {
            if entry.label == UNKNOWN_LABEL {
                return Err(GalleryLoadError::ReservedLabel { index });
            }
            let values = &entry.embedding.values;
            if values.is_empty() || values.iter().any(|v| !v.is_finite()) {
                return Err(GalleryLoadError::InvalidEmbedding { index });
            }
            if values.len() != dim {
                return Err(GalleryLoadError::InconsistentDimension {
                    index,
                    expected: dim,
                    actual: values.len(),
                });
            }
        }

        Ok(Self { entries, dim })
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Embedding dimensionality shared by every entry.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of distinct identities.
    pub fn label_count(&self) -> usize {
        self.entries
            .iter()
            .map(|e| e.label.as_str())
            .collect::<HashSet<_>>()
            .len()
    }
}
