//! Per-day attendance ledger: first sighting of each identity, one row per day.
//!
//! The in-memory seen-set decides whether a sighting is new. The CSV file
//! `attendance_<date>.csv` is its durable projection and is rewritten whole
//! (temp file + rename) on every new row.

use crate::types::IdentityKey;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use std::borrow::Cow;
use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const LEDGER_HEADER: &str = "Name,Roll,Time";
pub const TIME_FORMAT: &str = "%H:%M:%S";
pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// One row of the daily ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceRecord {
    pub key: IdentityKey,
    pub time: NaiveTime,
}

impl AttendanceRecord {
    fn to_csv_row(&self) -> String {
        format!(
            "{},{},{}",
            csv_field(&self.key.name),
            csv_field(&self.key.roll),
            self.time.format(TIME_FORMAT)
        )
    }
}

/// What a call to [`Ledger::mark`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkOutcome {
    /// First sighting today; the row was written.
    Written(AttendanceRecord),
    /// Already marked today; nothing changed.
    AlreadyMarked,
}

impl MarkOutcome {
    pub fn written(&self) -> bool {
        matches!(self, MarkOutcome::Written(_))
    }
}

/// A day the ledger moved past, with everyone marked on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedDay {
    pub day: NaiveDate,
    pub seen: BTreeSet<IdentityKey>,
}

/// Deduplicating attendance ledger for the current day.
pub struct Ledger {
    dir: PathBuf,
    day: NaiveDate,
    seen: BTreeSet<IdentityKey>,
    resume_day: bool,
    closed: Vec<ClosedDay>,
}

impl Ledger {
    /// Open the ledger for `day`, creating the records directory.
    ///
    /// With `resume_day` the seen-set starts from the rows already in that
    /// day's file, so a restarted session never writes a second row for a
    /// person. Without it the seen-set starts empty.
    pub fn open(dir: impl Into<PathBuf>, day: NaiveDate, resume_day: bool) -> Result<Self, LedgerError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let mut ledger = Self {
            dir,
            day,
            seen: BTreeSet::new(),
            resume_day,
            closed: Vec::new(),
        };
        ledger.seed()?;
        Ok(ledger)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn day(&self) -> NaiveDate {
        self.day
    }

    /// Identities marked present on the current day.
    pub fn seen(&self) -> &BTreeSet<IdentityKey> {
        &self.seen
    }

    pub fn is_marked(&self, key: &IdentityKey) -> bool {
        self.seen.contains(key)
    }

    /// Path of the ledger file for `day`.
    pub fn path_for(&self, day: NaiveDate) -> PathBuf {
        self.dir.join(format!("attendance_{}.csv", day.format(DATE_FORMAT)))
    }

    /// Record a sighting of `key` at `at`.
    ///
    /// A sighting on a later date than the ledger's current day moves the
    /// ledger to that day first; the finished day is kept for
    /// [`Ledger::take_closed`]. If the write fails the seen-set is left
    /// untouched so the next sighting retries.
    pub fn mark(&mut self, key: &IdentityKey, at: NaiveDateTime) -> Result<MarkOutcome, LedgerError> {
        if at.date() != self.day {
            self.roll_over(at.date())?;
        }
        if self.seen.contains(key) {
            return Ok(MarkOutcome::AlreadyMarked);
        }

        let time = at.time().with_nanosecond(0).unwrap_or(at.time());
        let record = AttendanceRecord {
            key: key.clone(),
            time,
        };
        self.append(&record)?;
        self.seen.insert(key.clone());

        tracing::info!(
            identity = %key,
            time = %record.time.format(TIME_FORMAT),
            day = %self.day,
            "attendance marked"
        );
        Ok(MarkOutcome::Written(record))
    }

    /// Days rolled past since the last call, oldest first.
    pub fn take_closed(&mut self) -> Vec<ClosedDay> {
        std::mem::take(&mut self.closed)
    }

    /// Read the rows recorded for `day`. A missing file has no rows.
    pub fn records(&self, day: NaiveDate) -> Result<Vec<AttendanceRecord>, LedgerError> {
        let path = self.path_for(day);
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for (lineno, line) in content.lines().enumerate() {
            if lineno == 0 || line.trim().is_empty() {
                continue;
            }
            match parse_row(line) {
                Some(record) => records.push(record),
                None => {
                    tracing::warn!(path = %path.display(), line = lineno + 1, "skipping malformed ledger row");
                }
            }
        }
        Ok(records)
    }

    fn roll_over(&mut self, day: NaiveDate) -> Result<(), LedgerError> {
        tracing::info!(from = %self.day, to = %day, "ledger day changed");
        let seen = std::mem::take(&mut self.seen);
        self.closed.push(ClosedDay { day: self.day, seen });
        self.day = day;
        self.seed()
    }

    fn seed(&mut self) -> Result<(), LedgerError> {
        if !self.resume_day {
            return Ok(());
        }
        let records = self.records(self.day)?;
        if !records.is_empty() {
            tracing::info!(count = records.len(), day = %self.day, "resuming from existing ledger");
        }
        self.seen.extend(records.into_iter().map(|r| r.key));
        Ok(())
    }

    /// Read the whole table, append one row, and replace the file atomically.
    fn append(&self, record: &AttendanceRecord) -> Result<(), LedgerError> {
        let path = self.path_for(self.day);
        let existing = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };

        let mut table = String::with_capacity(existing.len() + 64);
        if existing.trim().is_empty() {
            table.push_str(LEDGER_HEADER);
            table.push('\n');
        } else {
            table.push_str(&existing);
            if !existing.ends_with('\n') {
                table.push('\n');
            }
        }
        table.push_str(&record.to_csv_row());
        table.push('\n');

        let tmp = path.with_extension("csv.tmp");
        fs::write(&tmp, table)?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }
}

/// Quote a CSV field when it contains a delimiter, quote, or line break.
fn csv_field(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

/// Split one CSV line into fields, honouring double-quoted fields.
fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }
    fields.push(field);
    fields
}

fn parse_row(line: &str) -> Option<AttendanceRecord> {
    let fields = split_csv_line(line.trim_end_matches('\r'));
    let [name, roll, time] = fields.as_slice() else {
        return None;
    };
    let time = NaiveTime::parse_from_str(time, TIME_FORMAT).ok()?;
    Some(AttendanceRecord {
        key: IdentityKey::new(name.as_str(), roll.as_str()),
        time,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 14).unwrap()
    }

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        day().and_hms_opt(h, m, s).unwrap()
    }

    fn rows(ledger: &Ledger) -> Vec<String> {
        fs::read_to_string(ledger.path_for(ledger.day()))
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_first_sighting_wins() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = Ledger::open(dir.path(), day(), true).unwrap();
        let asha = IdentityKey::new("Asha", "10");

        let first = ledger.mark(&asha, at(9, 0, 5)).unwrap();
        let second = ledger.mark(&asha, at(9, 30, 0)).unwrap();

        assert!(first.written());
        assert!(!second.written());
        assert_eq!(second, MarkOutcome::AlreadyMarked);
        assert_eq!(rows(&ledger), vec!["Name,Roll,Time", "Asha,10,09:00:05"]);
    }

    #[test]
    fn test_file_named_by_date_with_header() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = Ledger::open(dir.path(), day(), true).unwrap();
        assert!(!ledger.path_for(day()).exists());

        ledger.mark(&IdentityKey::new("Asha", "10"), at(9, 0, 5)).unwrap();
        ledger.mark(&IdentityKey::new("Ravi", "11"), at(9, 1, 0)).unwrap();

        let path = dir.path().join("attendance_2024-03-14.csv");
        assert_eq!(ledger.path_for(day()), path);
        assert_eq!(
            rows(&ledger),
            vec!["Name,Roll,Time", "Asha,10,09:00:05", "Ravi,11,09:01:00"]
        );
        assert!(!path.with_extension("csv.tmp").exists());
    }

    #[test]
    fn test_subsecond_time_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = Ledger::open(dir.path(), day(), true).unwrap();
        let when = day().and_hms_milli_opt(9, 0, 5, 999).unwrap();

        let outcome = ledger.mark(&IdentityKey::new("Asha", "10"), when).unwrap();
        let MarkOutcome::Written(record) = outcome else {
            panic!("expected a write");
        };
        assert_eq!(record.time, NaiveTime::from_hms_opt(9, 0, 5).unwrap());
    }

    #[test]
    fn test_resume_seeds_seen_set_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let asha = IdentityKey::new("Asha", "10");
        {
            let mut ledger = Ledger::open(dir.path(), day(), true).unwrap();
            ledger.mark(&asha, at(9, 0, 5)).unwrap();
        }

        let mut restarted = Ledger::open(dir.path(), day(), true).unwrap();
        assert!(restarted.is_marked(&asha));
        assert!(!restarted.mark(&asha, at(10, 0, 0)).unwrap().written());
        assert_eq!(rows(&restarted).len(), 2);
    }

    #[test]
    fn test_without_resume_seen_set_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let asha = IdentityKey::new("Asha", "10");
        {
            let mut ledger = Ledger::open(dir.path(), day(), false).unwrap();
            ledger.mark(&asha, at(9, 0, 5)).unwrap();
        }

        let mut restarted = Ledger::open(dir.path(), day(), false).unwrap();
        assert!(restarted.seen().is_empty());
        assert!(restarted.mark(&asha, at(10, 0, 0)).unwrap().written());
        assert_eq!(rows(&restarted).len(), 3);
    }

    #[test]
    fn test_rolls_over_at_midnight() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = Ledger::open(dir.path(), day(), true).unwrap();
        let asha = IdentityKey::new("Asha", "10");

        ledger.mark(&asha, at(23, 59, 59)).unwrap();
        let next = day().succ_opt().unwrap();
        let outcome = ledger.mark(&asha, next.and_hms_opt(0, 0, 1).unwrap()).unwrap();

        assert!(outcome.written());
        assert_eq!(ledger.day(), next);
        assert_eq!(ledger.records(day()).unwrap().len(), 1);
        assert_eq!(ledger.records(next).unwrap().len(), 1);
    }

    #[test]
    fn test_rollover_keeps_finished_day() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = Ledger::open(dir.path(), day(), true).unwrap();
        let asha = IdentityKey::new("Asha", "10");
        let ravi = IdentityKey::new("Ravi", "11");
        let next = day().succ_opt().unwrap();

        ledger.mark(&asha, at(23, 59, 58)).unwrap();
        assert!(ledger.take_closed().is_empty());
        ledger.mark(&ravi, next.and_hms_opt(0, 0, 1).unwrap()).unwrap();

        let closed = ledger.take_closed();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].day, day());
        assert_eq!(closed[0].seen, BTreeSet::from([asha.clone()]));
        assert_eq!(ledger.seen(), &BTreeSet::from([ravi]));
        assert!(ledger.take_closed().is_empty());
    }

    #[test]
    fn test_quoted_fields_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = Ledger::open(dir.path(), day(), true).unwrap();
        let odd = IdentityKey::new("Smith, \"Jo\"", "7");

        ledger.mark(&odd, at(8, 0, 0)).unwrap();

        assert_eq!(rows(&ledger)[1], "\"Smith, \"\"Jo\"\"\",7,08:00:00");
        let records = ledger.records(day()).unwrap();
        assert_eq!(records[0].key, odd);
    }

    #[test]
    fn test_records_skip_malformed_rows() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(dir.path(), day(), false).unwrap();
        fs::write(
            ledger.path_for(day()),
            "Name,Roll,Time\nAsha,10,09:00:05\ngarbage\nRavi,11,not-a-time\n\n",
        )
        .unwrap();

        let records = ledger.records(day()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, IdentityKey::new("Asha", "10"));
    }

    #[test]
    fn test_missing_day_has_no_records() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(dir.path(), day(), true).unwrap();
        assert!(ledger.records(day()).unwrap().is_empty());
    }
}
