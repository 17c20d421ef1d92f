//! End-of-session present/absent report.

use crate::gallery::Gallery;
use crate::ledger::DATE_FORMAT;
use crate::types::IdentityKey;
use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Present/absent partition of the gallery for one day, both sorted by (name, roll).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub day: NaiveDate,
    pub present: Vec<IdentityKey>,
    pub absent: Vec<IdentityKey>,
}

/// Partition the gallery using the day's seen-set.
pub fn summarize(day: NaiveDate, gallery: &Gallery, seen: &BTreeSet<IdentityKey>) -> Report {
    let present: Vec<IdentityKey> = seen.iter().cloned().collect();
    let absent: Vec<IdentityKey> = gallery
        .keys()
        .filter(|k| !seen.contains(*k))
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    Report { day, present, absent }
}

impl Report {
    /// Where the summary for this report's day is written.
    pub fn path_in(&self, dir: &Path) -> PathBuf {
        dir.join(format!("summary_{}.txt", self.day.format(DATE_FORMAT)))
    }

    /// Write the text report into `dir`, replacing any earlier one for the day.
    pub fn write_to(&self, dir: &Path) -> std::io::Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = self.path_in(dir);
        fs::write(&path, self.to_string())?;
        tracing::info!(
            path = %path.display(),
            present = self.present.len(),
            absent = self.absent.len(),
            "summary written"
        );
        Ok(path)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- Attendance Summary for {} ---", self.day.format(DATE_FORMAT))?;
        writeln!(f)?;

        writeln!(f, "--- PRESENT STUDENTS ---")?;
        if self.present.is_empty() {
            writeln!(f, "No students were marked present today.")?;
        }
        for key in &self.present {
            writeln!(f, "Name: {}, Roll: {}", key.name, key.roll)?;
        }

        writeln!(f)?;
        writeln!(f, "--- ABSENT STUDENTS ---")?;
        if self.absent.is_empty() {
            writeln!(f, "All known students were present today.")?;
        }
        for key in &self.absent {
            writeln!(f, "Name: {}, Roll: {}", key.name, key.roll)?;
        }
        Ok(())
    }
}
