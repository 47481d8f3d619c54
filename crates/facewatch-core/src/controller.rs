//! Start/stop lifecycle for the recognition worker.
//!
//! The controller never blocks its caller for the length of a session: the
//! loop runs on a dedicated OS thread and cancellation is a per-run atomic
//! flag the loop polls once per frame.

use crate::gallery::{Gallery, GalleryLoadError};
use crate::matcher::EncoderError;
use crate::pipeline::{LoopSettings, RecognitionLoop, RunSummary, Session, VideoSourceError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("gallery load failed: {0}")]
    Gallery(#[from] GalleryLoadError),
    #[error("video source error: {0}")]
    VideoSource(#[from] VideoSourceError),
    #[error("encoder error: {0}")]
    Encoder(#[from] EncoderError),
    #[error("failed to spawn recognition worker: {0}")]
    Spawn(std::io::Error),
    #[error("recognition worker panicked")]
    WorkerPanicked,
}

/// Supplies the gallery and per-run resources.
pub trait SessionFactory: Send + Sync {
    fn load_gallery(&self) -> Result<Gallery, GalleryLoadError>;

    /// Acquire the video source, encoder, renderer and counter for one run.
    fn open_session(&self) -> Result<Session, ControllerError>;

    fn settings(&self) -> LoopSettings {
        LoopSettings::default()
    }
}

impl<F: SessionFactory + ?Sized> SessionFactory for Box<F> {
    fn load_gallery(&self) -> Result<Gallery, GalleryLoadError> {
        (**self).load_gallery()
    }

    fn open_session(&self) -> Result<Session, ControllerError> {
        (**self).open_session()
    }

    fn settings(&self) -> LoopSettings {
        (**self).settings()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

struct Worker {
    running: Arc<AtomicBool>,
    handle: JoinHandle<RunSummary>,
}

impl Worker {
    fn is_active(&self) -> bool {
        self.running.load(Ordering::Acquire) && !self.handle.is_finished()
    }
}

pub struct Controller<F: SessionFactory> {
    factory: F,
    gallery: Option<Arc<Gallery>>,
    worker: Option<Worker>,
    last_summary: Option<RunSummary>,
}

impl<F: SessionFactory> Controller<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            gallery: None,
            worker: None,
            last_summary: None,
        }
    }

    /// Launch a recognition run and return without waiting for it.
    ///
    /// No-op while a run is active. The gallery is loaded on first use and
    /// reused afterwards. Source and encoder are opened here so failures reach
    /// the caller instead of the worker.
    pub fn start(&mut self) -> Result<StartOutcome, ControllerError> {
        if self.is_running() {
            tracing::debug!("start ignored: recognition already running");
            return Ok(StartOutcome::AlreadyRunning);
        }

        // A stopped run may still be finishing its last frame.
        self.reap();

        let gallery = self.gallery()?;
        let session = self.factory.open_session()?;
        let settings = self.factory.settings();

        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let recognition = RecognitionLoop::new(session, gallery, settings);

        let handle = std::thread::Builder::new()
            .name("facewatch-recognition".into())
            .spawn(move || recognition.run(&flag))
            .map_err(ControllerError::Spawn)?;

        tracing::info!("recognition started");
        self.worker = Some(Worker { running, handle });
        Ok(StartOutcome::Started)
    }

    /// Signal the active run to stop. Returns immediately; idempotent.
    ///
    /// Returns `true` if a running worker was signalled.
    pub fn stop(&mut self) -> bool {
        let Some(worker) = &self.worker else {
            return false;
        };
        let was_running = worker.running.swap(false, Ordering::AcqRel);
        let signalled = was_running && !worker.handle.is_finished();
        if signalled {
            tracing::info!("recognition stop requested");
        }
        signalled
    }

    /// Wait for the current worker to exit and return its summary.
    ///
    /// Blocks until the run ends; call [`stop`](Self::stop) first unless the
    /// run is expected to end on its own.
    pub fn join(&mut self) -> Result<Option<RunSummary>, ControllerError> {
        let Some(worker) = self.worker.take() else {
            return Ok(None);
        };
        let summary = worker
            .handle
            .join()
            .map_err(|_| ControllerError::WorkerPanicked)?;
        self.last_summary = Some(summary.clone());
        Ok(Some(summary))
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(Worker::is_active)
    }

    pub fn loaded_gallery(&self) -> Option<&Gallery> {
        self.gallery.as_deref()
    }

    pub fn last_summary(&self) -> Option<&RunSummary> {
        self.last_summary.as_ref()
    }

    fn gallery(&mut self) -> Result<Arc<Gallery>, ControllerError> {
        if let Some(gallery) = &self.gallery {
            return Ok(Arc::clone(gallery));
        }
        let gallery = Arc::new(self.factory.load_gallery()?);
        self.gallery = Some(Arc::clone(&gallery));
        Ok(gallery)
    }

    fn reap(&mut self) {
        if let Some(worker) = &self.worker {
            worker.running.store(false, Ordering::Release);
        }
        match self.join() {
            Ok(Some(summary)) => tracing::debug!(exit = ?summary.exit, "reaped previous run"),
            Ok(None) => {}
            Err(e) => tracing::error!(error = %e, "previous recognition run failed"),
        }
    }
}

impl<F: SessionFactory> Drop for Controller<F> {
    fn drop(&mut self) {
        self.stop();
    }
}
