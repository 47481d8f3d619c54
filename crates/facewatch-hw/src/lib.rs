//! facewatch-hw — V4L2 camera capture for the recognition loop.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
