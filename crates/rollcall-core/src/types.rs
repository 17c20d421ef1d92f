use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Roll assigned to identities whose file name carries no roll segment.
pub const UNKNOWN_ROLL: &str = "N/A";

/// Face bounding box in pixel coordinates of the analyzed image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceBox {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

impl FaceBox {
    /// Scale every edge by `factor` (detection runs on a downsampled frame).
    pub fn scaled(&self, factor: u32) -> FaceBox {
        FaceBox {
            top: self.top.saturating_mul(factor),
            right: self.right.saturating_mul(factor),
            bottom: self.bottom.saturating_mul(factor),
            left: self.left.saturating_mul(factor),
        }
    }

    /// Clamp to an image of `width` x `height`. Returns `None` for an empty box.
    pub fn clamped(&self, width: u32, height: u32) -> Option<FaceBox> {
        let left = self.left.min(width);
        let right = self.right.min(width);
        let top = self.top.min(height);
        let bottom = self.bottom.min(height);
        if right <= left || bottom <= top {
            return None;
        }
        Some(FaceBox { top, right, bottom, left })
    }
}

/// Fixed-length face descriptor produced by the external analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub values: Vec<f32>,
}

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Euclidean distance to another descriptor.
    ///
    /// Descriptors of different lengths are not comparable and are infinitely far apart.
    pub fn euclidean_distance(&self, other: &Descriptor) -> f32 {
        if self.values.len() != other.values.len() {
            return f32::INFINITY;
        }
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One face found by the analyzer: where it is and what it looks like.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedFace {
    pub bbox: FaceBox,
    pub descriptor: Descriptor,
}

/// The (name, roll) pair that identifies a person. Ordered by name, then roll.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IdentityKey {
    pub name: String,
    pub roll: String,
}

impl IdentityKey {
    pub fn new(name: impl Into<String>, roll: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            roll: roll.into(),
        }
    }

    /// Decode an identity from a reference image file stem (`Name_Roll`).
    ///
    /// A stem without an underscore keeps the whole stem as the name and gets
    /// the [`UNKNOWN_ROLL`] sentinel. Segments past the second are ignored.
    pub fn from_file_stem(stem: &str) -> Self {
        let mut parts = stem.split('_');
        let name = parts.next().unwrap_or_default();
        match parts.next() {
            Some(roll) => Self::new(name, roll),
            None => Self::new(name, UNKNOWN_ROLL),
        }
    }

    /// File stem used to store this identity's reference image.
    pub fn file_stem(&self) -> String {
        format!("{}_{}", self.name, self.roll)
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.roll)
    }
}

/// An enrolled person with the descriptor derived from their reference image.
#[derive(Debug, Clone)]
pub struct Identity {
    pub key: IdentityKey,
    pub descriptor: Descriptor,
    pub image_path: PathBuf,
}
