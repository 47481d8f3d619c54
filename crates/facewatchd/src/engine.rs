use crate::config::Config;
use crate::render::SnapshotRenderer;
use facewatch_core::{
    ControllerError, Embedding, EncoderError, FaceBox, FaceEncoder, FpsCounter, Frame, Gallery,
    GalleryLoadError, LoopSettings, OnnxFaceEncoder, Session, SessionFactory, VideoSourceError,
};
use facewatch_hw::Camera;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Encoder shared between the factory and the session currently using it.
///
/// Only one run is active at a time, so the lock is uncontended.
pub struct SharedEncoder<E>(Arc<Mutex<E>>);

impl<E> SharedEncoder<E> {
    fn lock(&self) -> MutexGuard<'_, E> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<E: FaceEncoder> FaceEncoder for SharedEncoder<E> {
    fn locate_faces(&mut self, frame: &Frame) -> Result<Vec<FaceBox>, EncoderError> {
        self.lock().locate_faces(frame)
    }

    fn embed(&mut self, frame: &Frame, faces: &[FaceBox]) -> Result<Vec<Embedding>, EncoderError> {
        self.lock().embed(frame, faces)
    }

    fn distance(&self, a: &Embedding, b: &Embedding) -> f32 {
        self.lock().distance(a, b)
    }

    fn match_threshold(&self) -> f32 {
        self.lock().match_threshold()
    }
}

/// Loads an encoder on first use and hands out shared handles afterwards.
pub struct EncoderCache<E> {
    slot: Mutex<Option<Arc<Mutex<E>>>>,
}

impl<E> Default for EncoderCache<E> {
    fn default() -> Self {
        Self { slot: Mutex::new(None) }
    }
}

impl<E> EncoderCache<E> {
    pub fn get_or_load(
        &self,
        load: impl FnOnce() -> Result<E, EncoderError>,
    ) -> Result<SharedEncoder<E>, EncoderError> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(encoder) = slot.as_ref() {
            return Ok(SharedEncoder(Arc::clone(encoder)));
        }
        let encoder = Arc::new(Mutex::new(load()?));
        *slot = Some(Arc::clone(&encoder));
        Ok(SharedEncoder(encoder))
    }
}

/// Builds recognition sessions from the local camera and ONNX models.
pub struct CameraSessionFactory {
    config: Config,
    encoder: EncoderCache<OnnxFaceEncoder>,
}

impl CameraSessionFactory {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            encoder: EncoderCache::default(),
        }
    }
}

impl SessionFactory for CameraSessionFactory {
    fn load_gallery(&self) -> Result<Gallery, GalleryLoadError> {
        Gallery::load(&self.config.gallery_path)
    }

    /// Open the camera synchronously so the caller sees any failure before
    /// the worker exists. Models are loaded on the first run only.
    fn open_session(&self) -> Result<Session, ControllerError> {
        let cfg = &self.config;

        let encoder = self
            .encoder
            .get_or_load(|| OnnxFaceEncoder::load(&cfg.model_dir, cfg.match_threshold))?;

        let mut camera =
            Camera::open(cfg.camera_index, cfg.frame_rate).map_err(VideoSourceError::from)?;
        camera.set_read_timeout(cfg.read_timeout);
        tracing::info!(
            device = %camera.device_path,
            width = camera.width,
            height = camera.height,
            fourcc = ?camera.fourcc,
            "camera opened"
        );

        Ok(Session {
            source: Box::new(camera),
            encoder: Box::new(encoder),
            renderer: Box::new(SnapshotRenderer::new(
                cfg.snapshot_path.clone(),
                cfg.report_interval,
            )),
            counter: Box::new(FpsCounter::default()),
        })
    }

    fn settings(&self) -> LoopSettings {
        self.config.loop_settings()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct CountingEncoder {
        calls: usize,
    }

    impl FaceEncoder for CountingEncoder {
        fn locate_faces(&mut self, _frame: &Frame) -> Result<Vec<FaceBox>, EncoderError> {
            self.calls += 1;
            Ok(Vec::new())
        }

        fn embed(&mut self, _frame: &Frame, _faces: &[FaceBox]) -> Result<Vec<Embedding>, EncoderError> {
            Ok(Vec::new())
        }

        fn match_threshold(&self) -> f32 {
            0.6
        }
    }

    #[test]
    fn test_encoder_loaded_once_across_sessions() {
        let cache = EncoderCache::default();
        let loads = Cell::new(0);
        let load = || {
            loads.set(loads.get() + 1);
            Ok(CountingEncoder { calls: 0 })
        };

        let mut first = cache.get_or_load(load).unwrap();
        let mut second = cache.get_or_load(load).unwrap();
        assert_eq!(loads.get(), 1);

        let frame = Frame::new(vec![0; 4], 2, 2, 0);
        first.locate_faces(&frame).unwrap();
        second.locate_faces(&frame).unwrap();
        assert_eq!(first.lock().calls, 2, "handles share one encoder");
        assert_eq!(second.match_threshold(), 0.6);
    }

    #[test]
    fn test_failed_load_is_retried() {
        let cache: EncoderCache<CountingEncoder> = EncoderCache::default();
        let err = cache
            .get_or_load(|| Err(EncoderError::Other("models missing".into())))
            .err()
            .unwrap();
        assert!(matches!(err, EncoderError::Other(_)));
        assert!(cache.get_or_load(|| Ok(CountingEncoder { calls: 0 })).is_ok());
    }
}
