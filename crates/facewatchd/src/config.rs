use facewatch_core::LoopSettings;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Camera index; opened as `/dev/video{index}`.
    pub camera_index: u32,
    /// Requested capture rate in frames per second.
    pub frame_rate: u32,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// JSON gallery of known faces.
    pub gallery_path: PathBuf,
    /// Frames wider than this are shrunk before detection.
    pub working_width: u32,
    pub report_interval: Duration,
    /// Euclidean distance at or below which a gallery entry counts as a match.
    pub match_threshold: f32,
    /// Number of warmup frames to discard at startup (camera AGC/AE stabilization).
    pub warmup_frames: usize,
    /// A read that waits longer than this yields no frame instead of blocking.
    pub read_timeout: Duration,
    /// Where the latest annotated frame is written, if anywhere.
    pub snapshot_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from `FACEWATCH_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let model_dir = var("FACEWATCH_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(facewatch_core::default_model_dir);

        let data_dir = var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("facewatch");

        let gallery_path = var("FACEWATCH_GALLERY_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("gallery.json"));

        Self {
            camera_index: env_parse::<u32>(&var, "FACEWATCH_CAMERA_INDEX").unwrap_or(0),
            frame_rate: env_parse::<u32>(&var, "FACEWATCH_FRAME_RATE")
                .filter(|&v| v > 0)
                .unwrap_or(10),
            model_dir,
            gallery_path,
            working_width: env_parse::<u32>(&var, "FACEWATCH_WORKING_WIDTH")
                .filter(|&v| v > 0)
                .unwrap_or(facewatch_core::matcher::DEFAULT_WORKING_WIDTH),
            report_interval: Duration::from_millis(
                env_parse::<u64>(&var, "FACEWATCH_REPORT_INTERVAL_MS")
                    .filter(|&v| v > 0)
                    .unwrap_or(1000),
            ),
            match_threshold: env_parse::<f32>(&var, "FACEWATCH_MATCH_THRESHOLD")
                .filter(|v| v.is_finite() && *v >= 0.0)
                .unwrap_or(facewatch_core::DEFAULT_MATCH_THRESHOLD),
            warmup_frames: env_parse::<usize>(&var, "FACEWATCH_WARMUP_FRAMES").unwrap_or(4),
            read_timeout: Duration::from_millis(
                env_parse::<u64>(&var, "FACEWATCH_READ_TIMEOUT_MS").unwrap_or(2000),
            ),
            snapshot_path: var("FACEWATCH_SNAPSHOT_PATH")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
        }
    }

    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            working_width: self.working_width,
            report_interval: self.report_interval,
            warmup_frames: self.warmup_frames,
        }
    }
}

/// Parse `key` as `T`; missing, malformed and out-of-range values are `None`.
fn env_parse<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    var(key).and_then(|v| v.trim().parse().ok())
}
