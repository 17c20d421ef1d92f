//! Interactive main menu and context setup shared by the commands.

use crate::config::Config;
use crate::engine::{self, SessionContext, SessionIo, SessionSettings};
use crate::enroll;
use anyhow::{Context, Result};
use rollcall_core::{EuclideanMatcher, FaceAnalyzer, GalleryStore};

/// Open the gallery directory and load every enrolled identity.
pub fn load_context(config: &Config, analyzer: &mut dyn FaceAnalyzer) -> Result<SessionContext> {
    let store = GalleryStore::open(&config.gallery_dir)
        .with_context(|| format!("failed to open gallery {}", config.gallery_dir.display()))?;
    let gallery = store.load(analyzer).context("failed to load gallery")?;
    Ok(SessionContext {
        store,
        gallery,
        matcher: EuclideanMatcher::new(config.match_threshold),
    })
}

pub fn session_settings(config: &Config) -> SessionSettings {
    SessionSettings {
        records_dir: config.records_dir.clone(),
        detect_every: config.detect_every,
        detect_scale: config.detect_scale,
        resume_day: config.resume_day,
    }
}

/// Loop over the menu until the operator exits or input closes.
pub fn run_menu(ctx: &mut SessionContext, io: &mut SessionIo<'_>, settings: &SessionSettings) -> Result<()> {
    loop {
        io.say("--- Attendance System Menu ---");
        io.say("1. Enroll New Face");
        io.say("2. Start Attendance");
        io.say("3. Exit");

        let Some(choice) = io.controls.ask("Enter your choice:") else {
            tracing::info!("input closed, leaving menu");
            return Ok(());
        };
        match choice.trim() {
            "1" => {
                io.say("You chose to enroll a new face.");
                if let Err(e) = enroll::run_enrollment(ctx, io) {
                    tracing::warn!(error = %e, "enrollment failed");
                }
            }
            "2" => {
                io.say("You chose to start attendance.");
                let outcome = engine::run_session(ctx, io, settings)?;
                tracing::info!(end = %outcome.end, present = outcome.report.present.len(), "session finished");
            }
            "3" => {
                io.say("Exiting program. Goodbye!");
                return Ok(());
            }
            _ => io.say("Invalid choice. Please try again."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ControlEvent;
    use crate::testing::*;

    #[test]
    fn test_invalid_choice_then_exit() {
        let fx = Fixture::new();
        let mut ctx = fx.context(&[]);
        let camera = ScriptedCamera::endless();
        let mut analyzer = FixedAnalyzer::new(vec![]);
        let mut controls = ScriptedControls::new(vec![], vec!["9", "3"]);
        let mut overlay = RecordingOverlay::default();
        let announcer = RecordingAnnouncer::default();
        let clock = FixedClock::at(9, 0, 0);

        {
            let mut io = SessionIo {
                camera: &camera,
                analyzer: &mut analyzer,
                controls: &mut controls,
                overlay: &mut overlay,
                announcer: &announcer,
                clock: &clock,
            };
            run_menu(&mut ctx, &mut io, &fx.settings()).unwrap();
        }

        let said = announcer.messages();
        assert!(said.contains(&"Invalid choice. Please try again.".to_string()));
        assert_eq!(said.last().unwrap(), "Exiting program. Goodbye!");
        assert_eq!(camera.acquisitions(), 0);
    }

    #[test]
    fn test_enroll_then_attendance_from_menu() {
        let fx = Fixture::new();
        let mut ctx = fx.context(&[("Ravi", "11", vec![0.0, 1.0])]);
        let camera = ScriptedCamera::endless();
        let mut analyzer = FixedAnalyzer::new(vec![face_at(vec![0.6, 0.8])]);
        let mut controls = ScriptedControls::new(
            vec![Some(ControlEvent::Capture), None, Some(ControlEvent::Quit)],
            vec!["1", "Zoya", "3", "2", "3"],
        );
        let mut overlay = RecordingOverlay::default();
        let announcer = RecordingAnnouncer::default();
        let clock = FixedClock::at(9, 30, 0);

        {
            let mut io = SessionIo {
                camera: &camera,
                analyzer: &mut analyzer,
                controls: &mut controls,
                overlay: &mut overlay,
                announcer: &announcer,
                clock: &clock,
            };
            run_menu(&mut ctx, &mut io, &fx.settings()).unwrap();
        }

        assert_eq!(ctx.gallery.len(), 2);
        let summary = std::fs::read_to_string(fx.records().join("summary_2024-03-14.txt")).unwrap();
        assert!(summary.contains("Name: Zoya, Roll: 3"));
        assert!(summary.contains("--- ABSENT STUDENTS ---\nName: Ravi, Roll: 11"));
        assert_eq!(camera.open_handles(), 0);
    }

    #[test]
    fn test_closed_input_leaves_menu() {
        let fx = Fixture::new();
        let mut ctx = fx.context(&[]);
        let camera = ScriptedCamera::endless();
        let mut analyzer = FixedAnalyzer::new(vec![]);
        let mut controls = ScriptedControls::new(vec![], vec![]);
        let mut overlay = RecordingOverlay::default();
        let announcer = RecordingAnnouncer::default();
        let clock = FixedClock::at(9, 0, 0);

        let mut io = SessionIo {
            camera: &camera,
            analyzer: &mut analyzer,
            controls: &mut controls,
            overlay: &mut overlay,
            announcer: &announcer,
            clock: &clock,
        };
        assert!(run_menu(&mut ctx, &mut io, &fx.settings()).is_ok());
    }

    #[test]
    fn test_session_settings_follow_config() {
        let config = Config {
            detect_every: 3,
            resume_day: false,
            ..Config::default()
        };
        let settings = session_settings(&config);
        assert_eq!(settings.detect_every, 3);
        assert!(!settings.resume_day);
        assert_eq!(settings.records_dir, config.records_dir);
    }
}
