//! V4L2-backed camera factory for the session engine.

use crate::engine::{CameraFactory, FrameSource};
use rollcall_hw::{Camera, CameraError, Frame};

impl FrameSource for Camera {
    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        self.capture_frame()
    }
}

/// Opens the configured device fresh for every acquisition.
pub struct V4lCameraFactory {
    device: String,
    warmup_frames: usize,
}

impl V4lCameraFactory {
    pub fn new(device: impl Into<String>, warmup_frames: usize) -> Self {
        Self {
            device: device.into(),
            warmup_frames,
        }
    }
}

impl CameraFactory for V4lCameraFactory {
    fn acquire(&self) -> Result<Box<dyn FrameSource>, CameraError> {
        let mut camera = Camera::open(&self.device)?;
        camera.warm_up(self.warmup_frames);
        Ok(Box::new(camera))
    }
}
