//! Enrollment sub-session: ask for name and roll, capture one face, persist it.

use crate::engine::{ControlEvent, SessionContext, SessionIo};
use image::GrayImage;
use rollcall_core::{AnalyzerError, GalleryError, IdentityKey};
use rollcall_hw::CameraError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error(transparent)]
    Gallery(#[from] GalleryError),
    #[error("camera: {0}")]
    Camera(#[from] CameraError),
    #[error("analyzer: {0}")]
    Analyzer(#[from] AnalyzerError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrollOutcome {
    Enrolled(IdentityKey),
    Cancelled,
}

/// Prompt for the identity, then capture and persist it.
///
/// A name/roll pair that is already enrolled, or that cannot be stored as a
/// file name, is announced and asked for again.
pub fn run_enrollment(ctx: &mut SessionContext, io: &mut SessionIo<'_>) -> Result<EnrollOutcome, EnrollError> {
    let key = loop {
        let Some(name) = ask_field(io, "Enter your Name:", "Name") else {
            return Ok(EnrollOutcome::Cancelled);
        };
        let Some(roll) = ask_field(io, "Enter your Roll Number:", "Roll number") else {
            return Ok(EnrollOutcome::Cancelled);
        };
        match check_identity(ctx, io, &name, &roll) {
            Ok(key) => break key,
            Err(EnrollError::Gallery(GalleryError::DuplicateIdentity(_) | GalleryError::InvalidField { .. })) => {
                continue
            }
            Err(e) => return Err(e),
        }
    };
    capture_and_store(ctx, io, key)
}

fn ask_field(io: &mut SessionIo<'_>, prompt: &str, label: &str) -> Option<String> {
    match io.controls.ask(prompt) {
        Some(answer) if !answer.trim().is_empty() => Some(answer.trim().to_string()),
        _ => {
            io.say(&format!("{label} cannot be empty. Enrollment cancelled."));
            None
        }
    }
}

/// Capture and persist a face for an already chosen name and roll.
pub fn enroll_identity(
    ctx: &mut SessionContext,
    io: &mut SessionIo<'_>,
    name: &str,
    roll: &str,
) -> Result<EnrollOutcome, EnrollError> {
    let key = check_identity(ctx, io, name, roll)?;
    capture_and_store(ctx, io, key)
}

fn check_identity(
    ctx: &SessionContext,
    io: &SessionIo<'_>,
    name: &str,
    roll: &str,
) -> Result<IdentityKey, EnrollError> {
    match ctx.store.check_new(&ctx.gallery, name, roll) {
        Ok(key) => Ok(key),
        Err(e @ GalleryError::DuplicateIdentity(_)) => {
            io.say("A face with this name and roll already exists. Please use a unique name/roll combination.");
            Err(e.into())
        }
        Err(e @ GalleryError::InvalidField { .. }) => {
            io.say(&format!("Cannot enroll: {e}. Please try again."));
            Err(e.into())
        }
        Err(e) => {
            io.say(&format!("Cannot enroll: {e}."));
            Err(e.into())
        }
    }
}

/// The gallery in `ctx` is replaced only after the image and descriptor are
/// on disk. Every failure is announced before it is returned.
fn capture_and_store(
    ctx: &mut SessionContext,
    io: &mut SessionIo<'_>,
    key: IdentityKey,
) -> Result<EnrollOutcome, EnrollError> {
    let mut source = match io.camera.acquire() {
        Ok(source) => source,
        Err(e) => {
            io.say(&format!("Camera unavailable: {e}. Enrollment cancelled."));
            return Err(e.into());
        }
    };
    io.say("Please look at the camera. Press Enter to capture, or q to cancel.");

    let (face, descriptor) = loop {
        let frame = match source.read_frame() {
            Ok(frame) => frame,
            Err(e) => {
                io.say("Failed to grab camera frame. Enrollment cancelled.");
                return Err(e.into());
            }
        };
        io.overlay.show(&frame, &[]);

        match io.controls.poll() {
            Some(ControlEvent::Capture) => {}
            Some(ControlEvent::Quit) => {
                io.say("Enrollment cancelled.");
                return Ok(EnrollOutcome::Cancelled);
            }
            _ => continue,
        }

        let faces = match io.analyzer.analyze(&frame.data, frame.width, frame.height) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(error = %e, "face analysis failed during enrollment");
                io.say("Face analysis failed. Please try again.");
                continue;
            }
        };
        if faces.len() > 1 {
            tracing::debug!(count = faces.len(), "several faces in view, using the first");
        }
        let Some(detected) = faces.into_iter().next() else {
            io.say("No face detected. Please try again.");
            continue;
        };

        let crop = detected
            .bbox
            .clamped(frame.width, frame.height)
            .and_then(|b| frame.crop(b.left, b.top, b.right, b.bottom))
            .and_then(|(data, w, h)| GrayImage::from_raw(w, h, data));
        match crop {
            Some(face) => break (face, detected.descriptor),
            None => io.say("No face detected. Please try again."),
        }
    };
    drop(source);

    match ctx
        .store
        .enroll(&ctx.gallery, &key.name, &key.roll, &face, &descriptor, &mut *io.analyzer)
    {
        Ok(gallery) => {
            ctx.gallery = gallery;
            io.say(&format!("Face for {}, roll {} saved successfully.", key.name, key.roll));
            io.say(&format!("Loaded {} known faces.", ctx.gallery.len()));
            Ok(EnrollOutcome::Enrolled(key))
        }
        Err(e) => {
            tracing::error!(identity = %key, error = %e, "failed to save enrollment");
            io.say(&format!("Could not save the face for {}: {e}", key.name));
            Err(e.into())
        }
    }
}
