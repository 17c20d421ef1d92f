//! The face analysis seam: detection and encoding are provided from outside.

use crate::types::DetectedFace;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("analyzer unavailable: {0}")]
    Unavailable(String),
    #[error("analysis failed: {0}")]
    Failed(String),
    #[error("malformed analyzer response: {0}")]
    Protocol(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Finds faces in an 8-bit grayscale image and encodes each into a descriptor.
///
/// Implementations may keep state between calls (a helper process, a model
/// session), hence `&mut self`.
pub trait FaceAnalyzer {
    fn analyze(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<DetectedFace>, AnalyzerError>;
}
