use facewatch_core::{Controller, SessionFactory, StartOutcome};
use std::sync::Arc;
use tokio::sync::Mutex;
use zbus::interface;

pub type DynController = Controller<Box<dyn SessionFactory>>;

/// Static facts reported by `Status` alongside the live run state.
#[derive(Debug, Clone, Default)]
pub struct StatusInfo {
    pub gallery_path: String,
    pub device: String,
    pub working_width: u32,
    pub match_threshold: f32,
}

/// D-Bus interface for the face-watch daemon.
///
/// Bus name: org.freedesktop.Facewatch1
/// Object path: /org/freedesktop/Facewatch1
pub struct FacewatchService {
    controller: Arc<Mutex<DynController>>,
    status: StatusInfo,
}

impl FacewatchService {
    pub fn new(controller: DynController, status: StatusInfo) -> Self {
        Self {
            controller: Arc::new(Mutex::new(controller)),
            status,
        }
    }

    /// Run `f` against the controller on the blocking pool.
    ///
    /// Camera open, first model load and reaping a stopping worker all block.
    async fn blocking<T, F>(&self, f: F) -> zbus::fdo::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut DynController) -> T + Send + 'static,
    {
        let controller = Arc::clone(&self.controller);
        tokio::task::spawn_blocking(move || f(&mut controller.blocking_lock()))
            .await
            .map_err(|e| zbus::fdo::Error::Failed(format!("controller task failed: {e}")))
    }

    async fn start_run(&self) -> zbus::fdo::Result<bool> {
        match self.blocking(|c| c.start()).await? {
            Ok(StartOutcome::Started) => Ok(true),
            Ok(StartOutcome::AlreadyRunning) => Ok(false),
            Err(e) => {
                tracing::error!(error = %e, "start failed");
                Err(zbus::fdo::Error::Failed(e.to_string()))
            }
        }
    }

    async fn stop_run(&self) -> bool {
        self.controller.lock().await.stop()
    }

    async fn status_json(&self) -> String {
        let (running, gallery_entries) = {
            let c = self.controller.lock().await;
            (c.is_running(), c.loaded_gallery().map(|g| g.len()))
        };
        serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "running": running,
            "gallery_path": self.status.gallery_path,
            "gallery_entries": gallery_entries,
            "device": self.status.device,
            "working_width": self.status.working_width,
            "match_threshold": self.status.match_threshold,
        })
        .to_string()
    }

    /// Stop any active run and wait for its worker.
    pub async fn shutdown(&self) {
        let joined = self
            .blocking(|c| {
                c.stop();
                c.join()
            })
            .await;
        match joined {
            Ok(Ok(Some(summary))) => tracing::info!(
                frames = summary.frames,
                fps = summary.fps,
                exit = ?summary.exit,
                "recognition run finished"
            ),
            Ok(Ok(None)) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "recognition worker failed"),
            Err(e) => tracing::error!(error = %e, "shutdown failed"),
        }
    }
}

#[interface(name = "org.freedesktop.Facewatch1")]
impl FacewatchService {
    /// Begin live recognition. Returns false if a run is already active.
    async fn start(&self) -> zbus::fdo::Result<bool> {
        tracing::info!("start requested");
        self.start_run().await
    }

    /// Signal the active run to stop. Returns false if nothing was running.
    async fn stop(&self) -> zbus::fdo::Result<bool> {
        tracing::info!("stop requested");
        Ok(self.stop_run().await)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        Ok(self.status_json().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facewatch_core::{
        ControllerError, Embedding, EncoderError, FaceBox, FaceEncoder, FpsCounter, Frame,
        Gallery, GalleryEntry, GalleryLoadError, MatchResult, Renderer, Session, VideoSource,
        VideoSourceError,
    };
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct IdleSource;

    impl VideoSource for IdleSource {
        fn read(&mut self) -> Result<Option<Frame>, VideoSourceError> {
            std::thread::sleep(Duration::from_millis(2));
            Ok(None)
        }

        fn stop(&mut self) {}
    }

    struct NoFaces;

    impl FaceEncoder for NoFaces {
        fn locate_faces(&mut self, _frame: &Frame) -> Result<Vec<FaceBox>, EncoderError> {
            Ok(Vec::new())
        }

        fn embed(&mut self, _frame: &Frame, _faces: &[FaceBox]) -> Result<Vec<Embedding>, EncoderError> {
            Ok(Vec::new())
        }

        fn match_threshold(&self) -> f32 {
            0.6
        }
    }

    struct NullRenderer;

    impl Renderer for NullRenderer {
        fn render(&mut self, _frame: &Frame, _matches: &[MatchResult]) {}
        fn close(&mut self) {}
    }

    #[derive(Default)]
    struct Factory {
        gallery_missing: bool,
        /// Simulated camera-open latency.
        open_delay: Duration,
        /// Set by the test while `open_session` is still sleeping.
        executor_ticked: Arc<AtomicBool>,
        saw_tick_during_open: Arc<AtomicBool>,
    }

    impl SessionFactory for Factory {
        fn load_gallery(&self) -> Result<Gallery, GalleryLoadError> {
            if self.gallery_missing {
                return Err(GalleryLoadError::NotFound("/missing.json".into()));
            }
            Gallery::from_entries(vec![GalleryEntry {
                embedding: Embedding::new(vec![0.0, 0.0]),
                label: "alice".into(),
            }])
        }

        fn open_session(&self) -> Result<Session, ControllerError> {
            std::thread::sleep(self.open_delay);
            self.saw_tick_during_open
                .store(self.executor_ticked.load(Ordering::SeqCst), Ordering::SeqCst);
            Ok(Session {
                source: Box::new(IdleSource),
                encoder: Box::new(NoFaces),
                renderer: Box::new(NullRenderer),
                counter: Box::new(FpsCounter::default()),
            })
        }
    }

    fn service(factory: Factory) -> FacewatchService {
        FacewatchService::new(
            Controller::new(Box::new(factory)),
            StatusInfo {
                gallery_path: "/tmp/gallery.json".into(),
                device: "/dev/video0".into(),
                working_width: 500,
                match_threshold: 1.1,
            },
        )
    }

    async fn status(svc: &FacewatchService) -> serde_json::Value {
        serde_json::from_str(&svc.status_json().await).unwrap()
    }

    #[tokio::test]
    async fn test_start_stop_cycle() {
        let svc = service(Factory::default());
        assert!(svc.start_run().await.unwrap());
        assert!(!svc.start_run().await.unwrap(), "second start is a no-op");

        let s = status(&svc).await;
        assert_eq!(s["running"], true);
        assert_eq!(s["gallery_entries"], 1);
        assert_eq!(s["device"], "/dev/video0");

        assert!(svc.stop_run().await);
        svc.shutdown().await;
        assert_eq!(status(&svc).await["running"], false);
    }

    #[tokio::test]
    async fn test_stop_when_idle() {
        let svc = service(Factory::default());
        assert!(!svc.stop_run().await);
        assert!(status(&svc).await["gallery_entries"].is_null());
    }

    #[tokio::test]
    async fn test_gallery_failure_surfaces_as_dbus_error() {
        let svc = service(Factory {
            gallery_missing: true,
            ..Factory::default()
        });
        match svc.start_run().await {
            Err(zbus::fdo::Error::Failed(msg)) => assert!(msg.contains("gallery")),
            other => panic!("expected Failed, got {other:?}"),
        }
        assert_eq!(status(&svc).await["running"], false);
    }

    #[tokio::test]
    async fn test_slow_start_does_not_block_executor() {
        let factory = Factory {
            open_delay: Duration::from_millis(300),
            ..Factory::default()
        };
        let ticked = Arc::clone(&factory.executor_ticked);
        let saw_tick = Arc::clone(&factory.saw_tick_during_open);
        let svc = service(factory);

        // Single-threaded runtime: the ticker only runs if start yields.
        let (started, ()) = tokio::join!(svc.start_run(), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            ticked.store(true, Ordering::SeqCst);
        });

        assert!(started.unwrap());
        assert!(saw_tick.load(Ordering::SeqCst));
        svc.shutdown().await;
    }
}
