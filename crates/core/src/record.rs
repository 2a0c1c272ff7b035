//! Persisted work and error records.
//!
//! The runtime record is the single source of truth for what remains to
//! be merged: a human-diffable JSON list of [`RuntimeEntry`], truncated
//! and refilled by discovery, then rewritten in full after every single
//! processed entry so an interrupted run loses at most one unit of work.
//! On restart, processing resumes at the first entry with `diffed =
//! false`.
//!
//! The error record shares the entry shape (plus detail and timestamp)
//! and is only ever appended — it is read by the operator, never replayed
//! as work.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::RecordError;

/// Suffix on the target path marking a whole-file copy (the file consists
/// of nothing but marker content, so no merge is needed).
pub const PURE_COPY_SUFFIX: &str = "::pure-copy";

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// One unit of merge work.
///
/// `contact_point` is relative to the contact-points dir, `match` to the
/// container root. An empty `match` means no counterpart was found
/// upstream — such entries belong in the error record, not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeEntry {
    pub contact_point: String,
    #[serde(rename = "match")]
    pub matched: String,
    pub diffed: bool,
}

impl RuntimeEntry {
    /// An entry that will be merged normally.
    pub fn merge(contact_point: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            contact_point: contact_point.into(),
            matched: target.into(),
            diffed: false,
        }
    }

    /// An entry carried over by whole-file copy.
    pub fn pure_copy(contact_point: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            contact_point: contact_point.into(),
            matched: format!("{}{}", target.into(), PURE_COPY_SUFFIX),
            diffed: false,
        }
    }

    /// `true` when a counterpart target exists.
    pub fn has_match(&self) -> bool {
        !self.matched.is_empty()
    }

    /// `true` when the entry is a whole-file copy.
    pub fn is_pure_copy(&self) -> bool {
        self.matched.ends_with(PURE_COPY_SUFFIX)
    }

    /// The target path relative to the container root, sentinel stripped.
    pub fn target_path(&self) -> &str {
        self.matched
            .strip_suffix(PURE_COPY_SUFFIX)
            .unwrap_or(&self.matched)
    }
}

/// One error-record line: the entry shape plus failure detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub contact_point: String,
    #[serde(rename = "match")]
    pub matched: String,
    pub diffed: bool,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

impl ErrorEntry {
    pub fn new(
        contact_point: impl Into<String>,
        matched: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            contact_point: contact_point.into(),
            matched: matched.into(),
            diffed: false,
            detail: detail.into(),
            timestamp: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Runtime record
// ---------------------------------------------------------------------------

/// The persisted list of merge work.
#[derive(Debug)]
pub struct RuntimeRecord {
    path: PathBuf,
    entries: Vec<RuntimeEntry>,
}

impl RuntimeRecord {
    /// Create an empty record at `path`, truncating any previous one, and
    /// persist it immediately.
    pub fn initialize<P: AsRef<Path>>(path: P) -> Result<Self, RecordError> {
        let record = Self {
            path: path.as_ref().to_path_buf(),
            entries: Vec::new(),
        };
        record.save()?;
        info!(path = %record.path.display(), "runtime record initialized");
        Ok(record)
    }

    /// Load an existing record.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, RecordError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(RecordError::NotInitialized(path.display().to_string()));
        }
        let contents = fs::read_to_string(path)?;
        let entries: Vec<RuntimeEntry> =
            serde_json::from_str(&contents).map_err(|e| RecordError::ParseError {
                path: path.display().to_string(),
                detail: e.to_string(),
            })?;
        debug!(count = entries.len(), "runtime record loaded");
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    /// Rewrite the whole record on disk.
    ///
    /// Written to a sibling temp file and renamed into place, so an
    /// interrupted save never leaves a truncated record behind.
    pub fn save(&self) -> Result<(), RecordError> {
        let json = serde_json::to_string_pretty(&self.entries)
            .expect("runtime entries always serialize");
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json.as_bytes())?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &[RuntimeEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append a unit of work (discovery phase).
    pub fn push(&mut self, entry: RuntimeEntry) {
        self.entries.push(entry);
    }

    /// Index of the first unprocessed entry.
    pub fn first_pending(&self) -> Option<usize> {
        self.entries.iter().position(|e| !e.diffed)
    }

    pub fn pending_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.diffed).count()
    }

    pub fn processed_count(&self) -> usize {
        self.entries.len() - self.pending_count()
    }

    /// Flip an entry to processed. Callers persist with [`save`](Self::save)
    /// before moving on.
    pub fn mark_processed(&mut self, index: usize) {
        self.entries[index].diffed = true;
    }
}

// ---------------------------------------------------------------------------
// Error record
// ---------------------------------------------------------------------------

/// Append-only error log, one JSON object per line.
#[derive(Debug)]
pub struct ErrorRecord {
    path: PathBuf,
}

impl ErrorRecord {
    /// Truncate or create the error record.
    pub fn initialize<P: AsRef<Path>>(path: P) -> Result<Self, RecordError> {
        let path = path.as_ref().to_path_buf();
        fs::write(&path, b"")?;
        info!(path = %path.display(), "error record initialized");
        Ok(Self { path })
    }

    /// Open for appending, creating the file if missing.
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry.
    pub fn append(&self, entry: &ErrorEntry) -> Result<(), RecordError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(entry).expect("error entries always serialize");
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// Read all entries (operator reporting; missing file = no errors).
    pub fn read_all(&self) -> Result<Vec<ErrorEntry>, RecordError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&self.path)?;
        let mut entries = Vec::new();
        for line in contents.lines().filter(|l| !l.trim().is_empty()) {
            let entry =
                serde_json::from_str(line).map_err(|e| RecordError::ParseError {
                    path: self.path.display().to_string(),
                    detail: e.to_string(),
                })?;
            entries.push(entry);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_pure_copy_sentinel() {
        let entry = RuntimeEntry::pure_copy("res/layout/custom.xml", "res/layout/custom.xml");
        assert!(entry.is_pure_copy());
        assert!(entry.has_match());
        assert_eq!(entry.target_path(), "res/layout/custom.xml");

        let entry = RuntimeEntry::merge("src/Main.java", "src/Main.java");
        assert!(!entry.is_pure_copy());
        assert_eq!(entry.target_path(), "src/Main.java");
    }

    #[test]
    fn test_entry_serialized_field_names() {
        let entry = RuntimeEntry::merge("a.txt", "b.txt");
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"contact_point\""));
        assert!(json.contains("\"match\""));
        assert!(json.contains("\"diffed\":false"));
    }

    #[test]
    fn test_record_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runtime_record.json");

        let mut record = RuntimeRecord::initialize(&path).unwrap();
        record.push(RuntimeEntry::merge("a.txt", "a.txt"));
        record.push(RuntimeEntry::pure_copy("b.xml", "b.xml"));
        record.save().unwrap();

        let loaded = RuntimeRecord::load(&path).unwrap();
        assert_eq!(loaded.entries(), record.entries());
    }

    #[test]
    fn test_load_missing_record() {
        let result = RuntimeRecord::load("/nonexistent/runtime_record.json");
        assert!(matches!(result, Err(RecordError::NotInitialized(_))));
    }

    #[test]
    fn test_initialize_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runtime_record.json");

        let mut record = RuntimeRecord::initialize(&path).unwrap();
        record.push(RuntimeEntry::merge("a.txt", "a.txt"));
        record.save().unwrap();

        let record = RuntimeRecord::initialize(&path).unwrap();
        assert!(record.is_empty());
        let loaded = RuntimeRecord::load(&path).unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_first_pending_resumes_after_processed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runtime_record.json");

        let mut record = RuntimeRecord::initialize(&path).unwrap();
        for name in ["a", "b", "c", "d"] {
            record.push(RuntimeEntry::merge(format!("{name}.txt"), format!("{name}.txt")));
        }
        record.mark_processed(0);
        record.mark_processed(1);
        record.save().unwrap();

        let loaded = RuntimeRecord::load(&path).unwrap();
        assert_eq!(loaded.first_pending(), Some(2));
        assert_eq!(loaded.pending_count(), 2);
        assert_eq!(loaded.processed_count(), 2);
    }

    #[test]
    fn test_error_record_append_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("errors.jsonl");

        let errors = ErrorRecord::initialize(&path).unwrap();
        errors
            .append(&ErrorEntry::new("lost.txt", "", "no counterpart found upstream"))
            .unwrap();
        errors
            .append(&ErrorEntry::new("bad.txt", "bad.txt", "end marker on line 3 has no matching start"))
            .unwrap();

        let all = errors.read_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].contact_point, "lost.txt");
        assert!(!all[0].diffed);
        assert!(all[1].detail.contains("line 3"));
    }

    #[test]
    fn test_error_record_missing_file_reads_empty() {
        let errors = ErrorRecord::open("/nonexistent/errors.jsonl");
        assert!(errors.read_all().unwrap().is_empty());
    }
}
