//! rollcall-core: attendance by face recognition.
//!
//! Holds the enrolled gallery, matches face descriptors against it, keeps the
//! per-day attendance ledger and builds the present/absent summary. Face
//! detection and encoding are supplied through [`FaceAnalyzer`].

pub mod analyzer;
pub mod gallery;
pub mod ledger;
pub mod matcher;
pub mod summary;
pub mod types;

pub use analyzer::{AnalyzerError, FaceAnalyzer};
pub use gallery::{Gallery, GalleryError, GalleryStore};
pub use ledger::{AttendanceRecord, ClosedDay, Ledger, LedgerError, MarkOutcome};
pub use matcher::{EuclideanMatcher, MatchOutcome, Matcher, DEFAULT_MATCH_THRESHOLD};
pub use summary::{summarize, Report};
pub use types::{Descriptor, DetectedFace, FaceBox, Identity, IdentityKey, UNKNOWN_ROLL};
