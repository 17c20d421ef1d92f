//! Continuous V4L2 capture for the attendance loop.
//!
//! A [`Camera`] owns the device and one mmap stream for its whole lifetime, so
//! consecutive reads come from the same queue. Dropping it stops streaming and
//! frees the device for the next acquirer.

use crate::frame::{self, Frame};
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const PREFERRED_WIDTH: u32 = 640;
const PREFERRED_HEIGHT: u32 = 480;
const QUEUE_DEPTH: u32 = 4;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device busy: {0}")]
    DeviceBusy(String),
    #[error("{0} is not a video capture device")]
    NotCapture(String),
    #[error("format negotiation failed: {0}")]
    Format(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
}

/// A capture-capable node under /dev.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Layout of the buffers the driver hands back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed 4:2:2, luma on even bytes.
    Yuyv,
    Grey,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        if fourcc == FourCC::new(b"YUYV") {
            Some(PixelFormat::Yuyv)
        } else if fourcc == FourCC::new(b"GREY") {
            Some(PixelFormat::Grey)
        } else {
            None
        }
    }
}

pub struct Camera {
    stream: MmapStream<'static>,
    // Kept open alongside the stream; released on drop.
    _device: Device,
    pub path: String,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl Camera {
    /// Open `path`, negotiate a 640x480 YUYV (or GREY) format and start streaming.
    pub fn open(path: &str) -> Result<Self, CameraError> {
        if !Path::new(path).exists() {
            return Err(CameraError::DeviceNotFound(path.to_string()));
        }
        let device = Device::with_path(path).map_err(|e| match e.raw_os_error() {
            Some(16) => CameraError::DeviceBusy(path.to_string()),
            _ => CameraError::DeviceNotFound(format!("{path}: {e}")),
        })?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::CaptureFailed(format!("querying {path}: {e}")))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::NotCapture(path.to_string()));
        }

        let (width, height, format) = negotiate(&device)?;
        let stream = MmapStream::with_buffers(&device, BufType::VideoCapture, QUEUE_DEPTH)
            .map_err(|e| CameraError::CaptureFailed(format!("starting stream on {path}: {e}")))?;

        tracing::info!(device = path, card = %caps.card, width, height, ?format, "camera opened");
        Ok(Self {
            stream,
            _device: device,
            path: path.to_string(),
            width,
            height,
            format,
        })
    }

    /// Dequeue the next buffer as a grayscale frame.
    pub fn capture_frame(&mut self) -> Result<Frame, CameraError> {
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("dequeue on {}: {e}", self.path)))?;
        let sequence = meta.sequence;
        let gray = to_gray(buf, self.width, self.height, self.format)?;
        Ok(Frame::from_gray(gray, self.width, self.height, sequence))
    }

    /// Throw away the first `count` frames while exposure settles.
    pub fn warm_up(&mut self, count: usize) {
        for i in 0..count {
            if let Err(e) = self.capture_frame() {
                tracing::warn!(frame = i, error = %e, "warmup capture failed");
                return;
            }
        }
        if count > 0 {
            tracing::debug!(count, "warmup frames discarded");
        }
    }

    /// Capture devices found under /dev, sorted by path.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let Ok(entries) = std::fs::read_dir("/dev") else {
            return Vec::new();
        };
        let mut paths: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|name| name.starts_with("video"))
            .map(|name| format!("/dev/{name}"))
            .collect();
        paths.sort();

        paths
            .into_iter()
            .filter_map(|path| {
                let caps = Device::with_path(&path).ok()?.query_caps().ok()?;
                caps.capabilities
                    .contains(v4l::capability::Flags::VIDEO_CAPTURE)
                    .then(|| DeviceInfo {
                        path,
                        name: caps.card,
                        driver: caps.driver,
                        bus: caps.bus,
                    })
            })
            .collect()
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        tracing::debug!(device = %self.path, "camera released");
    }
}

fn negotiate(device: &Device) -> Result<(u32, u32, PixelFormat), CameraError> {
    let mut wanted = device
        .format()
        .map_err(|e| CameraError::Format(format!("reading current format: {e}")))?;
    wanted.width = PREFERRED_WIDTH;
    wanted.height = PREFERRED_HEIGHT;
    wanted.fourcc = FourCC::new(b"YUYV");

    let got = device
        .set_format(&wanted)
        .map_err(|e| CameraError::Format(format!("setting format: {e}")))?;
    let format = PixelFormat::from_fourcc(got.fourcc)
        .ok_or_else(|| CameraError::Format(format!("driver chose {:?}, need YUYV or GREY", got.fourcc)))?;
    Ok((got.width, got.height, format))
}

fn to_gray(buf: &[u8], width: u32, height: u32, format: PixelFormat) -> Result<Vec<u8>, CameraError> {
    let pixels = (width * height) as usize;
    match format {
        PixelFormat::Grey => buf
            .get(..pixels)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| CameraError::CaptureFailed(format!("short GREY buffer: {} of {pixels} bytes", buf.len()))),
        PixelFormat::Yuyv => frame::yuyv_to_grayscale(buf, width, height)
            .map_err(|e| CameraError::CaptureFailed(e.to_string())),
    }
}
