//! rollcall-hw: V4L2 capture producing grayscale frames, plus the pixel
//! helpers the recognition loop runs on them.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::Frame;
