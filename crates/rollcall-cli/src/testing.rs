//! Scripted collaborators for exercising the session engine without hardware.

use crate::engine::{
    Announcer, CameraFactory, Clock, ControlEvent, Controls, FrameSource, LabeledFace, Overlay, SessionContext,
    SessionSettings,
};
use chrono::{NaiveDate, NaiveDateTime};
use image::GrayImage;
use rollcall_core::{
    AnalyzerError, Descriptor, DetectedFace, EuclideanMatcher, FaceAnalyzer, FaceBox, Gallery, GalleryStore,
};
use rollcall_hw::{CameraError, Frame};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::rc::Rc;
use tempfile::TempDir;

pub const FRAME_WIDTH: u32 = 64;
pub const FRAME_HEIGHT: u32 = 48;

pub struct Fixture {
    pub dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn gallery_dir(&self) -> PathBuf {
        self.dir.path().join("known_faces")
    }

    pub fn records(&self) -> PathBuf {
        self.dir.path().join("attendance_records")
    }

    pub fn settings(&self) -> SessionSettings {
        SessionSettings {
            records_dir: self.records(),
            detect_every: 2,
            detect_scale: 4,
            resume_day: true,
        }
    }

    /// Enroll the given people on disk and return a loaded context.
    pub fn context(&self, people: &[(&str, &str, Vec<f32>)]) -> SessionContext {
        let store = GalleryStore::open(self.gallery_dir()).unwrap();
        let mut analyzer = FixedAnalyzer::new(vec![]);
        let mut gallery = Gallery::empty();
        let face = GrayImage::from_pixel(4, 4, image::Luma([120u8]));
        for (name, roll, values) in people {
            gallery = store
                .enroll(&gallery, name, roll, &face, &Descriptor::new(values.clone()), &mut analyzer)
                .unwrap();
        }
        SessionContext {
            store,
            gallery,
            matcher: EuclideanMatcher::default(),
        }
    }
}

/// A face in the middle-left of a quarter-scale frame.
pub fn face_at(values: Vec<f32>) -> DetectedFace {
    DetectedFace {
        bbox: FaceBox {
            top: 1,
            right: 4,
            bottom: 5,
            left: 2,
        },
        descriptor: Descriptor::new(values),
    }
}

/// Camera that yields uniform frames, optionally failing after a fixed count.
pub struct ScriptedCamera {
    remaining: Rc<Cell<Option<usize>>>,
    open: Rc<Cell<usize>>,
    max_open: Rc<Cell<usize>>,
    acquired: Cell<usize>,
    available: bool,
    brightness: u8,
}

impl ScriptedCamera {
    pub fn endless() -> Self {
        Self {
            remaining: Rc::new(Cell::new(None)),
            open: Rc::new(Cell::new(0)),
            max_open: Rc::new(Cell::new(0)),
            acquired: Cell::new(0),
            available: true,
            brightness: 128,
        }
    }

    pub fn with_frames(count: usize) -> Self {
        let camera = Self::endless();
        camera.remaining.set(Some(count));
        camera
    }

    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::endless()
        }
    }

    pub fn dark(self) -> Self {
        Self { brightness: 0, ..self }
    }

    pub fn acquisitions(&self) -> usize {
        self.acquired.get()
    }

    pub fn open_handles(&self) -> usize {
        self.open.get()
    }

    pub fn max_open_handles(&self) -> usize {
        self.max_open.get()
    }
}

impl CameraFactory for ScriptedCamera {
    fn acquire(&self) -> Result<Box<dyn FrameSource>, CameraError> {
        if !self.available {
            return Err(CameraError::DeviceNotFound("/dev/video9".into()));
        }
        self.acquired.set(self.acquired.get() + 1);
        self.open.set(self.open.get() + 1);
        self.max_open.set(self.max_open.get().max(self.open.get()));
        Ok(Box::new(ScriptedSource {
            remaining: Rc::clone(&self.remaining),
            open: Rc::clone(&self.open),
            brightness: self.brightness,
            sequence: 0,
        }))
    }
}

struct ScriptedSource {
    remaining: Rc<Cell<Option<usize>>>,
    open: Rc<Cell<usize>>,
    brightness: u8,
    sequence: u32,
}

impl FrameSource for ScriptedSource {
    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        if let Some(left) = self.remaining.get() {
            if left == 0 {
                return Err(CameraError::CaptureFailed("stream ended".into()));
            }
            self.remaining.set(Some(left - 1));
        }
        self.sequence += 1;
        let data = vec![self.brightness; (FRAME_WIDTH * FRAME_HEIGHT) as usize];
        Ok(Frame::from_gray(data, FRAME_WIDTH, FRAME_HEIGHT, self.sequence))
    }
}

impl Drop for ScriptedSource {
    fn drop(&mut self) {
        self.open.set(self.open.get() - 1);
    }
}

/// Analyzer that reports the same faces for every image, after any
/// scripted per-call results run out.
pub struct FixedAnalyzer {
    faces: Vec<DetectedFace>,
    script: VecDeque<Vec<DetectedFace>>,
    fail: bool,
    pub calls: usize,
    pub last_dims: Option<(u32, u32)>,
}

impl FixedAnalyzer {
    pub fn new(faces: Vec<DetectedFace>) -> Self {
        Self {
            faces,
            script: VecDeque::new(),
            fail: false,
            calls: 0,
            last_dims: None,
        }
    }

    pub fn scripted(calls: Vec<Vec<DetectedFace>>) -> Self {
        Self {
            script: calls.into(),
            ..Self::new(vec![])
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(vec![])
        }
    }
}

impl FaceAnalyzer for FixedAnalyzer {
    fn analyze(&mut self, _pixels: &[u8], width: u32, height: u32) -> Result<Vec<DetectedFace>, AnalyzerError> {
        self.calls += 1;
        self.last_dims = Some((width, height));
        if self.fail {
            return Err(AnalyzerError::Failed("model crashed".into()));
        }
        Ok(self.script.pop_front().unwrap_or_else(|| self.faces.clone()))
    }
}

/// Replays events and answers; quits once the event script runs out.
pub struct ScriptedControls {
    events: VecDeque<Option<ControlEvent>>,
    answers: VecDeque<String>,
    pub default_event: Option<ControlEvent>,
    pub prompts: Vec<String>,
}

impl ScriptedControls {
    pub fn new(events: Vec<Option<ControlEvent>>, answers: Vec<&str>) -> Self {
        Self {
            events: events.into(),
            answers: answers.into_iter().map(String::from).collect(),
            default_event: Some(ControlEvent::Quit),
            prompts: Vec::new(),
        }
    }
}

impl Controls for ScriptedControls {
    fn poll(&mut self) -> Option<ControlEvent> {
        self.events.pop_front().unwrap_or(self.default_event)
    }

    fn ask(&mut self, prompt: &str) -> Option<String> {
        self.prompts.push(prompt.to_string());
        self.answers.pop_front()
    }
}

#[derive(Default)]
pub struct RecordingOverlay {
    pub shown: usize,
    pub last_labels: Vec<String>,
    pub last_boxes: Vec<FaceBox>,
}

impl Overlay for RecordingOverlay {
    fn show(&mut self, _frame: &Frame, faces: &[LabeledFace]) {
        self.shown += 1;
        self.last_labels = faces.iter().map(|f| f.label.clone()).collect();
        self.last_boxes = faces.iter().map(|f| f.bbox).collect();
    }
}

#[derive(Default)]
pub struct RecordingAnnouncer {
    said: RefCell<Vec<String>>,
}

impl RecordingAnnouncer {
    pub fn messages(&self) -> Vec<String> {
        self.said.borrow().clone()
    }
}

impl Announcer for RecordingAnnouncer {
    fn say(&self, text: &str) {
        self.said.borrow_mut().push(text.to_string());
    }
}

pub struct FixedClock(pub NaiveDateTime);

impl FixedClock {
    /// 2024-03-14 at the given wall time.
    pub fn at(hour: u32, min: u32, sec: u32) -> Self {
        let day = NaiveDate::from_ymd_opt(2024, 3, 14).unwrap();
        Self(day.and_hms_opt(hour, min, sec).unwrap())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

/// Hands out the scripted times in order, then repeats the last one.
pub struct SteppingClock {
    times: RefCell<VecDeque<NaiveDateTime>>,
    last: Cell<NaiveDateTime>,
}

impl SteppingClock {
    pub fn new(times: Vec<NaiveDateTime>) -> Self {
        let last = times[0];
        Self {
            times: RefCell::new(times.into()),
            last: Cell::new(last),
        }
    }
}

impl Clock for SteppingClock {
    fn now(&self) -> NaiveDateTime {
        if let Some(t) = self.times.borrow_mut().pop_front() {
            self.last.set(t);
        }
        self.last.get()
    }
}
