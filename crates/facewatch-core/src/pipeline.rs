//! The capture → match → render → report loop run by the recognition worker.

use crate::gallery::Gallery;
use crate::matcher::{FaceEncoder, FrameMatcher, DEFAULT_WORKING_WIDTH};
use crate::perf::PerfCounter;
use crate::report::{ConfidenceReport, ConfidenceWindow};
use crate::types::{Frame, MatchResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VideoSourceError {
    #[error("video device not found: {0}")]
    DeviceNotFound(String),
    #[error("video device busy: {0}")]
    DeviceBusy(String),
    #[error("video capture failed: {0}")]
    CaptureFailed(String),
}

/// A started stream of frames.
pub trait VideoSource: Send {
    /// Next frame, or `Ok(None)` when nothing arrived in time.
    fn read(&mut self) -> Result<Option<Frame>, VideoSourceError>;

    /// Release the device.
    fn stop(&mut self);
}

/// Consumer of annotated frames, and the origin of user quit requests.
pub trait Renderer: Send {
    fn render(&mut self, frame: &Frame, matches: &[MatchResult]);

    fn report(&mut self, _report: &ConfidenceReport) {}

    /// Polled once per iteration.
    fn quit_requested(&mut self) -> bool {
        false
    }

    fn close(&mut self);
}

/// Per-run collaborators, acquired before the worker starts.
pub struct Session {
    pub source: Box<dyn VideoSource>,
    pub encoder: Box<dyn FaceEncoder>,
    pub renderer: Box<dyn Renderer>,
    pub counter: Box<dyn PerfCounter>,
}

/// Tunables for one run.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub working_width: u32,
    pub report_interval: Duration,
    /// Frames discarded at start while the camera settles exposure.
    pub warmup_frames: usize,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            working_width: DEFAULT_WORKING_WIDTH,
            report_interval: Duration::from_secs(1),
            warmup_frames: 4,
        }
    }
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Stopped,
    QuitRequested,
    VideoSourceLost,
}

/// Statistics returned by a finished run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub frames: u64,
    pub skipped_frames: u64,
    pub elapsed: Duration,
    pub fps: f64,
    pub exit: ExitReason,
}

pub struct RecognitionLoop {
    session: Session,
    gallery: Arc<Gallery>,
    matcher: FrameMatcher,
    settings: LoopSettings,
}

impl RecognitionLoop {
    pub fn new(session: Session, gallery: Arc<Gallery>, settings: LoopSettings) -> Self {
        Self {
            session,
            matcher: FrameMatcher::new(settings.working_width),
            gallery,
            settings,
        }
    }

    /// Run until `running` is cleared, the renderer asks to quit, or the
    /// source fails. Releases every collaborator exactly once on the way out.
    pub fn run(mut self, running: &AtomicBool) -> RunSummary {
        let Session {
            source,
            encoder,
            renderer,
            counter,
        } = &mut self.session;

        counter.start();
        let mut window = ConfidenceWindow::new(self.settings.report_interval);
        let mut warmup = self.settings.warmup_frames;
        let mut skipped = 0u64;

        tracing::info!(
            gallery = self.gallery.len(),
            working_width = self.matcher.working_width(),
            "recognition loop started"
        );

        let exit = loop {
            if !running.load(Ordering::Acquire) {
                break ExitReason::Stopped;
            }

            match source.read() {
                Ok(Some(frame)) if warmup > 0 => {
                    warmup -= 1;
                    tracing::trace!(seq = frame.sequence, "discarding warmup frame");
                }
                Ok(Some(frame)) => {
                    match self
                        .matcher
                        .match_frame(&frame, &self.gallery, encoder.as_mut())
                    {
                        Ok(matches) => {
                            renderer.render(&frame, &matches);
                            window.record(&matches);
                            counter.update();
                        }
                        Err(e) => {
                            skipped += 1;
                            tracing::warn!(seq = frame.sequence, error = %e, "skipping frame");
                        }
                    }
                }
                Ok(None) => {
                    skipped += 1;
                    tracing::debug!("no frame available");
                }
                Err(e) => {
                    tracing::error!(error = %e, "video source failed");
                    break ExitReason::VideoSourceLost;
                }
            }

            if let Some(report) = window.poll(Instant::now()) {
                tracing::info!(%report, "confidence report");
                renderer.report(&report);
            }

            if renderer.quit_requested() {
                tracing::info!("quit requested by renderer");
                break ExitReason::QuitRequested;
            }
        };

        counter.stop();
        let elapsed = counter.elapsed();
        let fps = counter.fps();
        tracing::info!(
            elapsed_secs = elapsed.as_secs_f64(),
            fps,
            frames = counter.frames(),
            skipped,
            ?exit,
            "recognition loop stopped"
        );

        renderer.close();
        source.stop();

        RunSummary {
            frames: counter.frames(),
            skipped_frames: skipped,
            elapsed,
            fps,
            exit,
        }
    }
}
