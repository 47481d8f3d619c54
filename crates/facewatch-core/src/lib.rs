//! facewatch-core — Live face identification pipeline.
//!
//! Matches faces found in video frames against a fixed gallery of known
//! embeddings, runs the capture/match/report loop on a worker thread, and
//! ships an ONNX Runtime encoder (SCRFD detection, ArcFace embedding).

pub mod alignment;
pub mod controller;
pub mod detector;
pub mod encoder;
pub mod gallery;
pub mod matcher;
pub mod perf;
pub mod pipeline;
pub mod recognizer;
pub mod report;
pub mod types;

pub use controller::{Controller, ControllerError, SessionFactory, StartOutcome};
pub use encoder::{default_model_dir, OnnxFaceEncoder, DEFAULT_MATCH_THRESHOLD};
pub use gallery::{Gallery, GalleryLoadError};
pub use matcher::{EncoderError, FaceEncoder, FrameMatcher, FrameProcessingError};
pub use perf::{FpsCounter, PerfCounter};
pub use pipeline::{
    ExitReason, LoopSettings, RecognitionLoop, Renderer, RunSummary, Session, VideoSource,
    VideoSourceError,
};
pub use report::ConfidenceReport;
pub use types::{Embedding, FaceBox, Frame, GalleryEntry, MatchResult, UNKNOWN_LABEL};
