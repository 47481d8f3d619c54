//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, FrameError};
use facewatch_core::{Frame, VideoSource, VideoSourceError};
use std::io;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::{CaptureStream, Stream};
use v4l::prelude::*;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::FourCC;

const CAPTURE_WIDTH: u32 = 640;
const CAPTURE_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device busy: {0}")]
    DeviceBusy(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("capture timed out")]
    Timeout,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error(transparent)]
    Frame(#[from] FrameError),
}

impl From<CameraError> for VideoSourceError {
    fn from(err: CameraError) -> Self {
        match err {
            CameraError::DeviceNotFound(path) => VideoSourceError::DeviceNotFound(path),
            CameraError::DeviceBusy(path) => VideoSourceError::DeviceBusy(path),
            other => VideoSourceError::CaptureFailed(other.to_string()),
        }
    }
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel, luma extracted).
    Yuyv,
    /// 8-bit grayscale.
    Grey,
    /// 16-bit little-endian grayscale.
    Y16,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(Self::Yuyv),
            b"GREY" => Some(Self::Grey),
            b"Y16 " | b"Y16\0" => Some(Self::Y16),
            _ => None,
        }
    }
}

/// Device path for a numeric camera index.
pub fn device_path(index: u32) -> String {
    format!("/dev/video{index}")
}

/// An open, streaming V4L2 camera.
pub struct Camera {
    stream: MmapStream<'static>,
    // Held so the device stays open for the stream's lifetime.
    _device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
    stopped: bool,
}

impl Camera {
    /// Open `/dev/video{index}` and request `frame_rate` fps.
    pub fn open(index: u32, frame_rate: u32) -> Result<Self, CameraError> {
        Self::open_path(&device_path(index), frame_rate)
    }

    pub fn open_path(device_path: &str, frame_rate: u32) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.raw_os_error() == Some(16) || e.to_string().contains("busy") {
                CameraError::DeviceBusy(device_path.to_string())
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to query capabilities: {e}")))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }
        tracing::info!(device = device_path, driver = %caps.driver, card = %caps.card, "opened camera");

        let mut fmt = device
            .format()
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("failed to get format: {e}")))?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = CAPTURE_WIDTH;
        fmt.height = CAPTURE_HEIGHT;

        let negotiated = device
            .set_format(&fmt)
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("failed to set format: {e}")))?;
        let pixel_format = PixelFormat::from_fourcc(negotiated.fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {:?} (need YUYV, GREY, or Y16)",
                negotiated.fourcc
            ))
        })?;

        // Not every driver honours frame intervals; capture still works without.
        if let Err(e) = device.set_params(&Parameters::with_fps(frame_rate)) {
            tracing::warn!(frame_rate, error = %e, "could not set frame rate");
        }

        let stream = MmapStream::with_buffers(&device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?negotiated.fourcc,
            frame_rate,
            "camera streaming"
        );

        Ok(Self {
            stream,
            _device: device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc: negotiated.fourcc,
            pixel_format,
            stopped: false,
        })
    }

    /// Fail reads that wait longer than `timeout` with [`CameraError::Timeout`].
    pub fn set_read_timeout(&mut self, timeout: Duration) {
        self.stream.set_timeout(timeout);
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    /// Dequeue the next frame as grayscale.
    pub fn capture_frame(&mut self) -> Result<Frame, CameraError> {
        let (buf, meta) = self.stream.next().map_err(|e| {
            if e.kind() == io::ErrorKind::TimedOut {
                CameraError::Timeout
            } else {
                CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}"))
            }
        })?;

        let gray = match self.pixel_format {
            PixelFormat::Yuyv => frame::yuyv_to_grayscale(buf, self.width, self.height)?,
            PixelFormat::Grey => frame::grey_to_grayscale(buf, self.width, self.height)?,
            PixelFormat::Y16 => frame::y16_to_grayscale(buf, self.width, self.height)?,
        };

        Ok(Frame::new(gray, self.width, self.height, meta.sequence))
    }

    /// List V4L2 devices that support video capture.
    pub fn list_devices() -> Vec<DeviceInfo> {
        (0..16)
            .filter_map(|i| {
                let path = device_path(i);
                if !Path::new(&path).exists() {
                    return None;
                }
                let caps = Device::with_path(&path).ok()?.query_caps().ok()?;
                if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                    return None;
                }
                Some(DeviceInfo {
                    path,
                    name: caps.card,
                    driver: caps.driver,
                    bus: caps.bus,
                })
            })
            .collect()
    }
}

impl VideoSource for Camera {
    fn read(&mut self) -> Result<Option<Frame>, VideoSourceError> {
        if self.stopped {
            return Err(VideoSourceError::CaptureFailed("camera stopped".into()));
        }
        match self.capture_frame() {
            Ok(frame) => Ok(Some(frame)),
            Err(CameraError::Timeout) => {
                tracing::debug!(device = %self.device_path, "frame read timed out");
                Ok(None)
            }
            // A malformed buffer loses one frame, not the device.
            Err(CameraError::Frame(e)) => {
                tracing::warn!(error = %e, "dropping malformed frame");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        if let Err(e) = Stream::stop(&mut self.stream) {
            tracing::warn!(device = %self.device_path, error = %e, "failed to stop stream");
        }
        tracing::info!(device = %self.device_path, "camera released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_format_from_fourcc() {
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"YUYV")), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"GREY")), Some(PixelFormat::Grey));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"Y16 ")), Some(PixelFormat::Y16));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"MJPG")), None);
    }

    #[test]
    fn test_device_path_from_index() {
        assert_eq!(device_path(0), "/dev/video0");
        assert_eq!(device_path(3), "/dev/video3");
    }

    #[test]
    fn test_open_missing_device() {
        let err = Camera::open_path("/dev/video-does-not-exist", 10).err().unwrap();
        assert!(matches!(err, CameraError::DeviceNotFound(_)));
    }

    #[test]
    fn test_camera_error_maps_to_source_error() {
        let err: VideoSourceError = CameraError::DeviceBusy("/dev/video0".into()).into();
        assert!(matches!(err, VideoSourceError::DeviceBusy(_)));
        let err: VideoSourceError = CameraError::StreamingNotSupported.into();
        assert!(matches!(err, VideoSourceError::CaptureFailed(_)));
    }
}
