//! Append-only attendance ledger with one row per person per day.
//!
//! Backed by a CSV file (`Name,Date,Time`). Every operation opens its own
//! handle and holds an advisory `flock` for its duration, so the
//! scan-then-append in [`Ledger::mark`] is never interleaved with another
//! writer that also goes through this type.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use nix::fcntl::{Flock, FlockArg};
use rollcall_core::Identity;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const HEADER: &str = "Name,Date,Time";
pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M:%S";

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not lock ledger {path}: {errno}")]
    Lock { path: PathBuf, errno: nix::errno::Errno },
}

/// Outcome of [`Attendance::mark`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkResult {
    Recorded,
    AlreadyMarkedToday,
}

/// One ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendanceRecord {
    pub name: Identity,
    pub date: NaiveDate,
    pub time: NaiveTime,
}

/// Anything that can record attendance with daily deduplication.
pub trait Attendance {
    fn mark(&self, identity: &Identity, now: NaiveDateTime) -> Result<MarkResult, LedgerError>;
}

#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    /// Open the ledger at `path`, creating it with only a header row if absent.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let ledger = Self { path: path.into() };
        if let Some(parent) = ledger.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ledger.io(e))?;
        }
        let file = ledger.lock(FlockArg::LockExclusive)?;
        let content = ledger.read_all(&file)?;
        ledger.ensure_header(&file, &content)?;
        Ok(ledger)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All well-formed rows in file order. Malformed rows are logged and skipped.
    pub fn records(&self) -> Result<Vec<AttendanceRecord>, LedgerError> {
        let file = self.lock(FlockArg::LockShared)?;
        let content = self.read_all(&file)?;

        let mut records = Vec::new();
        for (lineno, line) in data_lines(&content) {
            match parse_row(line) {
                Some(record) => records.push(record),
                None => tracing::warn!(
                    path = %self.path.display(),
                    line = lineno,
                    "skipping malformed ledger row"
                ),
            }
        }
        Ok(records)
    }

    /// Rows recorded on `date`.
    pub fn records_on(&self, date: NaiveDate) -> Result<Vec<AttendanceRecord>, LedgerError> {
        Ok(self
            .records()?
            .into_iter()
            .filter(|r| r.date == date)
            .collect())
    }

    fn lock(&self, arg: FlockArg) -> Result<Flock<File>, LedgerError> {
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&self.path)
            .map_err(|e| self.io(e))?;
        Flock::lock(file, arg).map_err(|(_, errno)| LedgerError::Lock {
            path: self.path.clone(),
            errno,
        })
    }

    /// Whole file as text. Invalid UTF-8 is replaced, so the affected rows
    /// fail to parse and are skipped like any other malformed row.
    fn read_all(&self, file: &Flock<File>) -> Result<String, LedgerError> {
        let mut handle: &File = file;
        let mut bytes = Vec::new();
        handle.read_to_end(&mut bytes).map_err(|e| self.io(e))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Write the header into a file that holds nothing but whitespace.
    fn ensure_header(&self, file: &Flock<File>, content: &str) -> Result<bool, LedgerError> {
        if !content.trim().is_empty() {
            return Ok(false);
        }
        if !content.is_empty() {
            file.set_len(0).map_err(|e| self.io(e))?;
        }
        self.append(file, "", HEADER)?;
        tracing::info!(path = %self.path.display(), "created attendance ledger");
        Ok(true)
    }

    /// Append one line, first terminating an unterminated last line.
    fn append(&self, file: &Flock<File>, content: &str, line: &str) -> Result<(), LedgerError> {
        let mut handle: &File = file;
        let sep = if content.is_empty() || content.ends_with('\n') { "" } else { "\n" };
        handle
            .write_all(format!("{sep}{line}\n").as_bytes())
            .map_err(|e| self.io(e))?;
        handle.flush().map_err(|e| self.io(e))
    }

    fn io(&self, source: std::io::Error) -> LedgerError {
        LedgerError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl Attendance for Ledger {
    fn mark(&self, identity: &Identity, now: NaiveDateTime) -> Result<MarkResult, LedgerError> {
        let date = now.format(DATE_FORMAT).to_string();
        let time = now.format(TIME_FORMAT).to_string();

        // Held until the end of this call, across the scan and the append.
        let file = self.lock(FlockArg::LockExclusive)?;
        let mut content = self.read_all(&file)?;
        if self.ensure_header(&file, &content)? {
            content = format!("{HEADER}\n");
        }

        let already = data_lines(&content).any(|(_, line)| {
            let mut fields = line.split(',').map(str::trim);
            fields.next() == Some(identity.as_str()) && fields.next() == Some(date.as_str())
        });
        if already {
            tracing::debug!(%identity, %date, "already marked today");
            return Ok(MarkResult::AlreadyMarkedToday);
        }

        self.append(&file, &content, &format!("{identity},{date},{time}"))?;
        tracing::info!(%identity, %date, %time, "attendance recorded");
        Ok(MarkResult::Recorded)
    }
}

/// Non-blank lines other than a leading header, with 1-based line numbers.
///
/// A file whose first line is not the header has its first row treated as data.
fn data_lines(content: &str) -> impl Iterator<Item = (usize, &str)> {
    content
        .lines()
        .enumerate()
        .filter(|&(i, line)| !(i == 0 && is_header(line)))
        .map(|(i, line)| (i + 1, line))
        .filter(|(_, line)| !line.trim().is_empty())
}

fn is_header(line: &str) -> bool {
    line.split(',').map(str::trim).eq(HEADER.split(','))
}

fn parse_row(line: &str) -> Option<AttendanceRecord> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    let [name, date, time] = fields.as_slice() else {
        return None;
    };
    Some(AttendanceRecord {
        name: Identity::new(name).ok()?,
        date: NaiveDate::parse_from_str(date, DATE_FORMAT).ok()?,
        time: NaiveTime::parse_from_str(time, TIME_FORMAT).ok()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn at(date: &str, time: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn id(name: &str) -> Identity {
        Identity::new(name).unwrap()
    }

    fn rows(ledger: &Ledger) -> Vec<String> {
        std::fs::read_to_string(ledger.path())
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_open_creates_header_only() {
        let dir = tempdir().unwrap();
        let ledger = Ledger::open(dir.path().join("Attendance.csv")).unwrap();
        assert_eq!(rows(&ledger), vec![HEADER]);

        // Reopening never duplicates the header.
        let ledger = Ledger::open(ledger.path().to_path_buf()).unwrap();
        assert_eq!(rows(&ledger), vec![HEADER]);
        assert!(ledger.records().unwrap().is_empty());
    }

    #[test]
    fn test_open_creates_parent_directory() {
        let dir = tempdir().unwrap();
        let ledger = Ledger::open(dir.path().join("data/logs/Attendance.csv")).unwrap();
        assert!(ledger.path().exists());
    }

    #[test]
    fn test_mark_same_day_dedups() {
        let dir = tempdir().unwrap();
        let ledger = Ledger::open(dir.path().join("a.csv")).unwrap();
        let alice = id("alice");

        assert_eq!(ledger.mark(&alice, at("2024-03-01", "09:00:00")).unwrap(), MarkResult::Recorded);
        for t in ["09:00:01", "12:30:00", "23:59:59"] {
            assert_eq!(
                ledger.mark(&alice, at("2024-03-01", t)).unwrap(),
                MarkResult::AlreadyMarkedToday
            );
        }

        assert_eq!(rows(&ledger), vec![HEADER, "alice,2024-03-01,09:00:00"]);
    }

    #[test]
    fn test_mark_across_days() {
        let dir = tempdir().unwrap();
        let ledger = Ledger::open(dir.path().join("a.csv")).unwrap();
        let alice = id("alice");

        assert_eq!(ledger.mark(&alice, at("2024-03-01", "09:00:00")).unwrap(), MarkResult::Recorded);
        assert_eq!(ledger.mark(&alice, at("2024-03-02", "08:15:00")).unwrap(), MarkResult::Recorded);

        let records = ledger.records().unwrap();
        assert_eq!(records.len(), 2);
        assert_ne!(records[0].date, records[1].date);
    }

    #[test]
    fn test_mark_independent_per_identity() {
        let dir = tempdir().unwrap();
        let ledger = Ledger::open(dir.path().join("a.csv")).unwrap();
        let now = at("2024-03-01", "09:00:00");

        assert_eq!(ledger.mark(&id("alice"), now).unwrap(), MarkResult::Recorded);
        assert_eq!(ledger.mark(&id("bob"), now).unwrap(), MarkResult::Recorded);
        assert_eq!(ledger.mark(&id("alice"), now).unwrap(), MarkResult::AlreadyMarkedToday);
        assert_eq!(ledger.records().unwrap().len(), 2);
    }

    #[test]
    fn test_mark_recreates_deleted_file_with_header() {
        let dir = tempdir().unwrap();
        let ledger = Ledger::open(dir.path().join("a.csv")).unwrap();
        std::fs::remove_file(ledger.path()).unwrap();

        ledger.mark(&id("carol"), at("2024-05-05", "10:00:00")).unwrap();
        assert_eq!(rows(&ledger), vec![HEADER, "carol,2024-05-05,10:00:00"]);
    }

    #[test]
    fn test_existing_rows_with_spaces_are_honoured() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.csv");
        std::fs::write(&path, "Name, Date, Time\ndave, 2024-01-10, 08:00:00").unwrap();
        let ledger = Ledger::open(&path).unwrap();

        assert_eq!(
            ledger.mark(&id("dave"), at("2024-01-10", "09:00:00")).unwrap(),
            MarkResult::AlreadyMarkedToday
        );
        // Unterminated last line gets its newline before the append.
        ledger.mark(&id("erin"), at("2024-01-10", "09:00:00")).unwrap();
        assert_eq!(
            rows(&ledger),
            vec!["Name, Date, Time", "dave, 2024-01-10, 08:00:00", "erin,2024-01-10,09:00:00"]
        );
    }

    #[test]
    fn test_records_skip_malformed_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.csv");
        std::fs::write(
            &path,
            "Name,Date,Time\nalice,2024-01-10,08:00:00\ngarbage\n\nbob,not-a-date,08:00:00\nbob,2024-01-11,07:59:00\n",
        )
        .unwrap();
        let ledger = Ledger::open(&path).unwrap();

        let records = ledger.records().unwrap();
        let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["alice", "bob"]);
    }

    #[test]
    fn test_records_on_date() {
        let dir = tempdir().unwrap();
        let ledger = Ledger::open(dir.path().join("a.csv")).unwrap();
        ledger.mark(&id("alice"), at("2024-03-01", "09:00:00")).unwrap();
        ledger.mark(&id("bob"), at("2024-03-02", "09:00:00")).unwrap();
        ledger.mark(&id("alice"), at("2024-03-02", "10:00:00")).unwrap();

        let day = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();
        let on_day = ledger.records_on(day).unwrap();
        assert_eq!(on_day.len(), 2);
        assert_eq!(on_day[0].name.as_str(), "bob");
        assert_eq!(on_day[1].time, NaiveTime::from_hms_opt(10, 0, 0).unwrap());
    }

    #[test]
    fn test_invalid_utf8_rows_are_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.csv");
        let mut bytes = b"Name,Date,Time\nbob,2024-01-10,08:00:00\n".to_vec();
        bytes.extend_from_slice(b"carol,2024-01-1\xff,08:00:00\n");
        std::fs::write(&path, bytes).unwrap();
        let ledger = Ledger::open(&path).unwrap();

        assert_eq!(
            ledger.mark(&id("bob"), at("2024-01-10", "09:00:00")).unwrap(),
            MarkResult::AlreadyMarkedToday
        );
        assert_eq!(
            ledger.mark(&id("alice"), at("2024-01-10", "09:00:00")).unwrap(),
            MarkResult::Recorded
        );
        let names: Vec<String> = ledger.records().unwrap().iter().map(|r| r.name.to_string()).collect();
        assert_eq!(names, vec!["bob", "alice"]);
    }

    #[test]
    fn test_blank_file_gets_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.csv");
        std::fs::write(&path, "\n  \n").unwrap();

        let ledger = Ledger::open(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), format!("{HEADER}\n"));

        ledger.mark(&id("alice"), at("2024-01-10", "08:00:00")).unwrap();
        assert_eq!(rows(&ledger), vec![HEADER, "alice,2024-01-10,08:00:00"]);
    }

    #[test]
    fn test_headerless_first_row_counts() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.csv");
        std::fs::write(&path, "alice,2024-01-10,08:00:00\n").unwrap();
        let ledger = Ledger::open(&path).unwrap();

        assert_eq!(
            ledger.mark(&id("alice"), at("2024-01-10", "17:00:00")).unwrap(),
            MarkResult::AlreadyMarkedToday
        );
        assert_eq!(ledger.records().unwrap().len(), 1);
    }
}
