//! Face analysis through an external helper process.
//!
//! The helper is spawned once and kept alive. Each request writes the image to
//! a scratch PNG and sends one JSON line naming it; the helper answers with one
//! JSON line:
//!
//! ```text
//! -> {"image":"/tmp/rollcall-1234.png"}
//! <- {"faces":[{"top":10,"right":60,"bottom":70,"left":5,"descriptor":[0.1, ...]}]}
//! <- {"error":"model not loaded"}
//! ```

use image::GrayImage;
use rollcall_core::{AnalyzerError, Descriptor, DetectedFace, FaceAnalyzer, FaceBox};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

#[derive(Serialize)]
struct Request<'a> {
    image: &'a Path,
}

#[derive(Deserialize)]
struct Response {
    #[serde(default)]
    faces: Vec<WireFace>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct WireFace {
    top: u32,
    right: u32,
    bottom: u32,
    left: u32,
    descriptor: Vec<f32>,
}

impl From<WireFace> for DetectedFace {
    fn from(w: WireFace) -> Self {
        DetectedFace {
            bbox: FaceBox {
                top: w.top,
                right: w.right,
                bottom: w.bottom,
                left: w.left,
            },
            descriptor: Descriptor::new(w.descriptor),
        }
    }
}

pub struct HelperAnalyzer {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    scratch: PathBuf,
}

impl HelperAnalyzer {
    /// Start the helper. `command` is split on whitespace into program and arguments.
    pub fn spawn(command: &str, scratch_dir: &Path) -> Result<Self, AnalyzerError> {
        let mut parts = command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| AnalyzerError::Unavailable("analyzer command is empty".into()))?;

        let mut child = Command::new(program)
            .args(parts)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| AnalyzerError::Unavailable(format!("failed to start {program}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AnalyzerError::Unavailable("helper stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AnalyzerError::Unavailable("helper stdout not captured".into()))?;

        let scratch = scratch_dir.join(format!("rollcall-{}.png", std::process::id()));
        tracing::info!(command, pid = child.id(), "face analyzer started");

        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            scratch,
        })
    }
}

impl FaceAnalyzer for HelperAnalyzer {
    fn analyze(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<DetectedFace>, AnalyzerError> {
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }
        let image = GrayImage::from_raw(width, height, pixels.to_vec()).ok_or_else(|| {
            AnalyzerError::Failed(format!("{} bytes do not form a {width}x{height} image", pixels.len()))
        })?;
        image
            .save(&self.scratch)
            .map_err(|e| AnalyzerError::Failed(format!("failed to write scratch image: {e}")))?;

        let request = serde_json::to_string(&Request { image: &self.scratch })
            .map_err(|e| AnalyzerError::Protocol(e.to_string()))?;
        writeln!(self.stdin, "{request}")?;
        self.stdin.flush()?;

        let mut line = String::new();
        if self.stdout.read_line(&mut line)? == 0 {
            return Err(AnalyzerError::Unavailable("helper exited".into()));
        }
        parse_response(&line)
    }
}

impl Drop for HelperAnalyzer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        let _ = std::fs::remove_file(&self.scratch);
        tracing::debug!("face analyzer stopped");
    }
}

/// Stand-in when no helper can be started. Only sidecar descriptors load.
pub struct OfflineAnalyzer {
    reason: String,
}

impl OfflineAnalyzer {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

impl FaceAnalyzer for OfflineAnalyzer {
    fn analyze(&mut self, _pixels: &[u8], _width: u32, _height: u32) -> Result<Vec<DetectedFace>, AnalyzerError> {
        Err(AnalyzerError::Unavailable(self.reason.clone()))
    }
}

fn parse_response(line: &str) -> Result<Vec<DetectedFace>, AnalyzerError> {
    let response: Response = serde_json::from_str(line.trim())
        .map_err(|e| AnalyzerError::Protocol(format!("bad helper reply: {e}")))?;
    if let Some(error) = response.error {
        return Err(AnalyzerError::Failed(error));
    }
    Ok(response.faces.into_iter().map(DetectedFace::from).collect())
}
