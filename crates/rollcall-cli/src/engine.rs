//! Recognition engine: the attendance session state machine.
//!
//! One synchronous loop reads a frame and runs detection on every
//! `detect_every`-th frame at reduced resolution. Matched faces are marked in
//! the ledger on first sighting; the last labels are redrawn on every frame.
//! The summary is written on every exit path.

use crate::enroll::{self, EnrollOutcome};
use chrono::{NaiveDate, NaiveDateTime};
use rollcall_core::{
    summarize, EuclideanMatcher, FaceAnalyzer, FaceBox, Gallery, GalleryStore, IdentityKey, Ledger,
    LedgerError, MarkOutcome, Matcher, Report,
};
use rollcall_hw::{CameraError, Frame};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Label shown for faces that match nobody in the gallery.
pub const UNKNOWN_LABEL: &str = "Unknown (Unknown)";

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// Discrete user intents, whatever keys produce them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    Quit,
    Enroll,
    Capture,
}

/// A live stream of frames. Dropping it releases the device.
pub trait FrameSource {
    fn read_frame(&mut self) -> Result<Frame, CameraError>;
}

/// Opens the capture device. At most one source is alive at a time.
pub trait CameraFactory {
    fn acquire(&self) -> Result<Box<dyn FrameSource>, CameraError>;
}

/// Keypresses and text prompts from the operator.
pub trait Controls {
    /// Wait briefly for an event; `None` if nothing arrived.
    fn poll(&mut self) -> Option<ControlEvent>;
    /// Ask for a line of text; `None` if input is closed.
    fn ask(&mut self, prompt: &str) -> Option<String>;
}

/// Displays a frame with labelled face boxes.
pub trait Overlay {
    fn show(&mut self, frame: &Frame, faces: &[LabeledFace]);
}

/// Delivers status messages to the operator.
pub trait Announcer {
    fn say(&self, text: &str);
}

pub trait Clock {
    fn now(&self) -> NaiveDateTime;
}

/// Wall clock in local time.
pub struct LocalClock;

impl Clock for LocalClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

/// External collaborators borrowed for the duration of a session or enrollment.
pub struct SessionIo<'a> {
    pub camera: &'a dyn CameraFactory,
    pub analyzer: &'a mut dyn FaceAnalyzer,
    pub controls: &'a mut dyn Controls,
    pub overlay: &'a mut dyn Overlay,
    pub announcer: &'a dyn Announcer,
    pub clock: &'a dyn Clock,
}

impl SessionIo<'_> {
    pub fn say(&self, text: &str) {
        self.announcer.say(text);
    }
}

/// State carried between sessions. `gallery` is swapped as a whole after
/// every enrollment.
pub struct SessionContext {
    pub store: GalleryStore,
    pub gallery: Gallery,
    pub matcher: EuclideanMatcher,
}

/// Knobs for one attendance session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub records_dir: PathBuf,
    pub detect_every: u32,
    pub detect_scale: u32,
    pub resume_day: bool,
}

/// A face box in display coordinates with its label.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledFace {
    pub bbox: FaceBox,
    pub label: String,
    pub identity: Option<IdentityKey>,
    pub distance: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Running,
    Enrolling,
    Stopped,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    Quit,
    FrameReadFailure,
    CameraUnavailable,
}

impl std::fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            SessionEnd::Quit => "quit",
            SessionEnd::FrameReadFailure => "frame read failure",
            SessionEnd::CameraUnavailable => "camera unavailable",
        })
    }
}

pub struct SessionOutcome {
    pub end: SessionEnd,
    /// Summary of the day the session ended on.
    pub report: Report,
    pub summary_path: Option<PathBuf>,
    /// Summaries of days the session ran past midnight from, oldest first.
    pub earlier_days: Vec<Report>,
    pub frames: u64,
    pub processed: u64,
}

/// Runs detection on the first frame and then every `every`-th frame.
#[derive(Debug)]
pub struct Throttle {
    every: u32,
    count: u64,
}

impl Throttle {
    pub fn new(every: u32) -> Self {
        Self {
            every: every.max(1),
            count: 0,
        }
    }

    /// Advance one frame; true if this frame should be processed.
    pub fn tick(&mut self) -> bool {
        let process = self.count % self.every as u64 == 0;
        self.count += 1;
        process
    }
}

/// Run one attendance session until quit or a fatal camera error.
pub fn run_session(
    ctx: &mut SessionContext,
    io: &mut SessionIo<'_>,
    settings: &SessionSettings,
) -> Result<SessionOutcome, EngineError> {
    let span = tracing::info_span!("session", id = %uuid::Uuid::new_v4());
    let _enter = span.enter();

    let mut ledger = Ledger::open(&settings.records_dir, io.clock.now().date(), settings.resume_day)?;
    io.say("Starting attendance system.");
    tracing::info!(
        gallery = ctx.gallery.len(),
        detect_every = settings.detect_every,
        detect_scale = settings.detect_scale,
        "session started"
    );

    let mut throttle = Throttle::new(settings.detect_every);
    let scale = settings.detect_scale.max(1);
    let mut labels: Vec<LabeledFace> = Vec::new();
    let mut frames = 0u64;
    let mut processed = 0u64;
    let mut state = SessionState::Running;
    let mut end = SessionEnd::Quit;
    let mut earlier_days = Vec::new();

    let mut camera = match io.camera.acquire() {
        Ok(source) => Some(source),
        Err(e) => {
            tracing::error!(error = %e, "camera unavailable");
            io.say(&format!("Camera unavailable: {e}. Exiting attendance system."));
            end = SessionEnd::CameraUnavailable;
            state = SessionState::Stopped;
            None
        }
    };

    while state != SessionState::Stopped {
        match state {
            SessionState::Running => {
                let Some(source) = camera.as_mut() else {
                    end = SessionEnd::CameraUnavailable;
                    break;
                };
                let frame = match source.read_frame() {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::error!(error = %e, "frame read failed");
                        io.say("Failed to grab camera frame. Exiting attendance system.");
                        end = SessionEnd::FrameReadFailure;
                        break;
                    }
                };
                frames += 1;

                if throttle.tick() {
                    labels = if frame.is_dark {
                        tracing::trace!(seq = frame.sequence, "dark frame, skipping detection");
                        Vec::new()
                    } else {
                        processed += 1;
                        recognize(ctx, &mut ledger, io, &frame, scale)
                    };
                    for closed in ledger.take_closed() {
                        let (report, _) = write_summary(ctx, io, &settings.records_dir, closed.day, &closed.seen);
                        earlier_days.push(report);
                    }
                }
                io.overlay.show(&frame, &labels);

                match io.controls.poll() {
                    Some(ControlEvent::Quit) => {
                        io.say("Attendance system stopped. Generating summary report.");
                        state = SessionState::Stopped;
                    }
                    Some(ControlEvent::Enroll) => state = SessionState::Enrolling,
                    _ => {}
                }
            }
            SessionState::Enrolling => {
                // The enrollment sub-session owns the camera while it runs.
                camera = None;
                io.say("Enroll new face mode activated.");
                match enroll::run_enrollment(ctx, io) {
                    Ok(EnrollOutcome::Enrolled(key)) => {
                        tracing::info!(identity = %key, gallery = ctx.gallery.len(), "enrolled during session");
                    }
                    Ok(EnrollOutcome::Cancelled) => tracing::info!("enrollment cancelled"),
                    Err(e) => tracing::warn!(error = %e, "enrollment failed"),
                }
                labels.clear();

                match io.camera.acquire() {
                    Ok(source) => {
                        camera = Some(source);
                        state = SessionState::Running;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "camera unavailable after enrollment");
                        io.say(&format!("Camera unavailable: {e}. Exiting attendance system."));
                        end = SessionEnd::CameraUnavailable;
                        state = SessionState::Stopped;
                    }
                }
            }
            SessionState::Stopped => {}
        }
    }

    drop(camera);
    tracing::info!(?end, frames, processed, marked = ledger.seen().len(), "session ended");

    let (report, summary_path) = write_summary(ctx, io, &settings.records_dir, ledger.day(), ledger.seen());
    io.say("Attendance system session completed.");

    Ok(SessionOutcome {
        end,
        report,
        summary_path,
        earlier_days,
        frames,
        processed,
    })
}

/// Summarize one day and write its file, announcing where it went.
fn write_summary(
    ctx: &SessionContext,
    io: &SessionIo<'_>,
    dir: &Path,
    day: NaiveDate,
    seen: &BTreeSet<IdentityKey>,
) -> (Report, Option<PathBuf>) {
    let report = summarize(day, &ctx.gallery, seen);
    let path = match report.write_to(dir) {
        Ok(path) => {
            io.say(&format!(
                "Attendance summary report generated for {}. Check {} for details.",
                report.day,
                path.display()
            ));
            Some(path)
        }
        Err(e) => {
            tracing::error!(%day, error = %e, "failed to write summary");
            io.say(&format!("Could not write the attendance summary: {e}"));
            None
        }
    };
    (report, path)
}

/// Detect, match and mark every face in one frame. Returns display labels.
fn recognize(
    ctx: &SessionContext,
    ledger: &mut Ledger,
    io: &mut SessionIo<'_>,
    frame: &Frame,
    scale: u32,
) -> Vec<LabeledFace> {
    let small = frame.downscale(scale);
    let faces = match io.analyzer.analyze(&small.data, small.width, small.height) {
        Ok(faces) => faces,
        Err(e) => {
            tracing::warn!(error = %e, seq = frame.sequence, "face analysis failed");
            return Vec::new();
        }
    };

    let mut labels = Vec::with_capacity(faces.len());
    for face in faces {
        let outcome = ctx.matcher.compare(&face.descriptor, ctx.gallery.identities());
        let bbox = face.bbox.scaled(scale);

        let Some(identity) = outcome.index.and_then(|i| ctx.gallery.get(i)) else {
            tracing::debug!(distance = outcome.distance, "unknown face");
            labels.push(LabeledFace {
                bbox,
                label: UNKNOWN_LABEL.to_string(),
                identity: None,
                distance: outcome.distance,
            });
            continue;
        };

        let key = &identity.key;
        match ledger.mark(key, io.clock.now()) {
            Ok(MarkOutcome::Written(record)) => io.say(&format!(
                "Attendance marked for {}, roll {} at {}.",
                key.name,
                key.roll,
                record.time.format(rollcall_core::ledger::TIME_FORMAT)
            )),
            Ok(MarkOutcome::AlreadyMarked) => {}
            Err(e) => {
                tracing::error!(identity = %key, error = %e, "failed to record attendance");
                io.say(&format!("Could not record attendance for {}, roll {}: {e}", key.name, key.roll));
            }
        }

        labels.push(LabeledFace {
            bbox,
            label: key.to_string(),
            identity: Some(key.clone()),
            distance: outcome.distance,
        });
    }
    labels
}
