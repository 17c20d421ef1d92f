//! Terminal front end: line-based controls, a text overlay and the announcer.

use crate::engine::{Announcer, ControlEvent, Controls, LabeledFace, Overlay};
use rollcall_hw::Frame;
use std::io::Write;
use std::process::Command;
use std::time::Duration;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::UnboundedReceiver;

/// Map one input line to a control event.
pub fn parse_event(line: &str) -> Option<ControlEvent> {
    match line.trim().to_ascii_lowercase().as_str() {
        "q" | "quit" => Some(ControlEvent::Quit),
        "e" | "enroll" => Some(ControlEvent::Enroll),
        "" | "c" | "capture" => Some(ControlEvent::Capture),
        _ => None,
    }
}

/// Controls fed by lines read from stdin on another thread.
pub struct Console {
    lines: UnboundedReceiver<String>,
    poll_interval: Duration,
}

impl Console {
    pub fn new(lines: UnboundedReceiver<String>, poll_interval: Duration) -> Self {
        Self { lines, poll_interval }
    }
}

impl Controls for Console {
    fn poll(&mut self) -> Option<ControlEvent> {
        match self.lines.try_recv() {
            Ok(line) => {
                let event = parse_event(&line);
                if event.is_none() {
                    tracing::debug!(input = %line, "ignoring unrecognised input");
                }
                event
            }
            Err(TryRecvError::Empty) => {
                std::thread::sleep(self.poll_interval);
                None
            }
            // stdin closed
            Err(TryRecvError::Disconnected) => Some(ControlEvent::Quit),
        }
    }

    fn ask(&mut self, prompt: &str) -> Option<String> {
        print!("{prompt} ");
        let _ = std::io::stdout().flush();
        self.lines.blocking_recv().map(|line| line.trim().to_string())
    }
}

/// Prints the face labels whenever they change.
#[derive(Default)]
pub struct ConsoleOverlay {
    last: Vec<String>,
}

impl Overlay for ConsoleOverlay {
    fn show(&mut self, frame: &Frame, faces: &[LabeledFace]) {
        let labels: Vec<String> = faces.iter().map(|f| f.label.clone()).collect();
        if labels == self.last {
            return;
        }
        if !labels.is_empty() {
            println!("[in view] {}", labels.join(", "));
        }
        tracing::debug!(seq = frame.sequence, faces = labels.len(), "labels changed");
        self.last = labels;
    }
}

/// Prints announcements and optionally speaks them.
pub struct ConsoleAnnouncer {
    speech: Option<Vec<String>>,
}

impl ConsoleAnnouncer {
    pub fn new(speech_command: Option<&str>) -> Self {
        let speech = speech_command
            .map(|c| c.split_whitespace().map(String::from).collect::<Vec<_>>())
            .filter(|parts| !parts.is_empty());
        Self { speech }
    }
}

impl Announcer for ConsoleAnnouncer {
    fn say(&self, text: &str) {
        println!("{text}");
        let Some((program, args)) = self.speech.as_ref().and_then(|p| p.split_first()) else {
            return;
        };
        match Command::new(program).args(args).arg(text).status() {
            Ok(status) if !status.success() => {
                tracing::warn!(program = %program, %status, "speech command failed");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(program = %program, error = %e, "failed to run speech command"),
        }
    }
}
