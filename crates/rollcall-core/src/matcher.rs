//! Nearest-neighbour descriptor matching with threshold confirmation.

use crate::types::{Descriptor, Identity};

/// Default Euclidean distance at or below which two descriptors are the same person.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// Result of matching a probe descriptor against a gallery.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchOutcome {
    /// Gallery index of the confirmed match, if any.
    pub index: Option<usize>,
    /// Distance to the nearest gallery entry (`+inf` for an empty gallery).
    pub distance: f32,
}

impl MatchOutcome {
    pub fn is_match(&self) -> bool {
        self.index.is_some()
    }
}

/// Strategy for comparing a probe descriptor against a gallery of enrolled faces.
pub trait Matcher {
    fn compare(&self, probe: &Descriptor, gallery: &[Identity]) -> MatchOutcome;
}

/// Euclidean matcher: global nearest neighbour, then a per-pair threshold check.
///
/// Exact distance ties go to the lowest gallery index.
#[derive(Debug, Clone, Copy)]
pub struct EuclideanMatcher {
    pub threshold: f32,
}

impl EuclideanMatcher {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    /// The binary same/different-person decision for one pair.
    pub fn is_same_person(&self, distance: f32) -> bool {
        distance <= self.threshold
    }
}

impl Default for EuclideanMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_MATCH_THRESHOLD)
    }
}

impl Matcher for EuclideanMatcher {
    fn compare(&self, probe: &Descriptor, gallery: &[Identity]) -> MatchOutcome {
        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, identity) in gallery.iter().enumerate() {
            let dist = probe.euclidean_distance(&identity.descriptor);
            // Strict comparison keeps the earliest index on ties and never picks NaN.
            if dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if self.is_same_person(best_dist) => MatchOutcome {
                index: Some(idx),
                distance: best_dist,
            },
            _ => MatchOutcome {
                index: None,
                distance: best_dist,
            },
        }
    }
}
