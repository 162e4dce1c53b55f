//! Append-only ledger of archived recordings.
//!
//! The ledger file holds one [`RecordingId`] per line. It is read into a set
//! when the run starts and appended to (with `fsync`) each time a recording
//! has been fully archived. It is the only record of what has already been
//! done: deleting it causes everything to be archived again.
//!
//! The pipeline gives the [`Ledger`] itself to the consumer task, which is
//! the only writer. The producer checks membership through a
//! [`LedgerSnapshot`] taken before the run starts.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{ArchiveError, Result};
use crate::models::RecordingId;

#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    done: HashSet<String>,
    file: File,
}

/// Read-only view of the ledger contents at the time it was taken.
#[derive(Debug, Clone, Default)]
pub struct LedgerSnapshot {
    done: Arc<HashSet<String>>,
}

impl LedgerSnapshot {
    pub fn has(&self, id: &RecordingId) -> bool {
        self.done.contains(id.as_str())
    }

    pub fn len(&self) -> usize {
        self.done.len()
    }

    pub fn is_empty(&self) -> bool {
        self.done.is_empty()
    }
}

impl Ledger {
    /// Open an existing ledger file for read and append.
    ///
    /// The file must already exist (an empty file is a valid, empty ledger).
    /// A final line without a newline is the remains of an interrupted
    /// append; it is cut off before the set is built.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                ArchiveError::Config(format!("cannot open ledger {}: {}", path.display(), e))
            })?;

        let mut contents = Vec::new();
        file.read_to_end(&mut contents).map_err(|e| {
            ArchiveError::Config(format!("reading ledger {}: {}", path.display(), e))
        })?;
        let complete = truncate_torn_tail(&mut file, path, &contents)?;

        let done: HashSet<String> = String::from_utf8_lossy(&contents[..complete])
            .lines()
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();

        tracing::debug!(path = %path.display(), entries = done.len(), "ledger loaded");

        Ok(Self {
            path: path.to_path_buf(),
            done,
            file,
        })
    }

    pub fn has(&self, id: &RecordingId) -> bool {
        self.done.contains(id.as_str())
    }

    /// Durably record `id` as archived.
    ///
    /// The line is written in one call and synced to disk before the
    /// in-memory set is updated, so `has` never runs ahead of the file.
    pub fn add(&mut self, id: &RecordingId) -> Result<()> {
        if id.as_str().contains('\n') || id.as_str().is_empty() {
            return Err(ArchiveError::format(format!(
                "recording id {:?} cannot be stored as a ledger line",
                id.as_str()
            )));
        }
        let mut line = String::with_capacity(id.as_str().len() + 1);
        line.push_str(id.as_str());
        line.push('\n');

        self.file.write_all(line.as_bytes())?;
        self.file.sync_all()?;
        self.done.insert(id.as_str().to_string());
        Ok(())
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            done: Arc::new(self.done.clone()),
        }
    }

    pub fn len(&self) -> usize {
        self.done.len()
    }

    pub fn is_empty(&self) -> bool {
        self.done.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and release the file handle.
    pub fn close(self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

/// Cut an unterminated final line off the file. Returns the length of the
/// newline-terminated prefix that remains.
fn truncate_torn_tail(file: &mut File, path: &Path, contents: &[u8]) -> Result<usize> {
    if contents.is_empty() || contents.ends_with(b"\n") {
        return Ok(contents.len());
    }

    let keep = contents
        .iter()
        .rposition(|&b| b == b'\n')
        .map(|pos| pos + 1)
        .unwrap_or(0);
    tracing::warn!(
        path = %path.display(),
        dropped = %String::from_utf8_lossy(&contents[keep..]),
        "discarding unterminated ledger line"
    );
    file.set_len(keep as u64)?;
    file.sync_all()?;
    Ok(keep)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ledger_file(contents: &str) -> (TempDir, PathBuf) {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("db.txt");
        std::fs::write(&path, contents).unwrap();
        (tmp, path)
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let tmp = TempDir::new().unwrap();
        let err = Ledger::open(&tmp.path().join("absent.txt")).unwrap_err();
        assert!(matches!(err, ArchiveError::Config(_)));
    }

    #[test]
    fn test_loads_existing_entries() {
        let (_tmp, path) = ledger_file("recordings/a Jan.1.2020_1.0\nrecordings/b Feb.2.2020_2.0\n");
        let ledger = Ledger::open(&path).unwrap();
        assert_eq!(ledger.len(), 2);
        assert!(ledger.has(&"recordings/a Jan.1.2020_1.0".into()));
        assert!(!ledger.has(&"recordings/c Mar.3.2020_3.0".into()));
    }

    #[test]
    fn test_add_survives_reopen() {
        let (_tmp, path) = ledger_file("");
        let id = RecordingId::from("recordings/foo Jan.5.2021_08.30");

        let mut ledger = Ledger::open(&path).unwrap();
        assert!(!ledger.has(&id));
        ledger.add(&id).unwrap();
        assert!(ledger.has(&id));
        drop(ledger);

        let reopened = Ledger::open(&path).unwrap();
        assert!(reopened.has(&id));
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "recordings/foo Jan.5.2021_08.30\n"
        );
    }

    #[test]
    fn test_add_appends_never_rewrites() {
        let (_tmp, path) = ledger_file("recordings/old Jan.1.2020_1.0\n");
        let mut ledger = Ledger::open(&path).unwrap();
        ledger.add(&"recordings/new Jan.2.2020_2.0".into()).unwrap();
        ledger.close().unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "recordings/old Jan.1.2020_1.0\nrecordings/new Jan.2.2020_2.0\n"
        );
    }

    #[test]
    fn test_torn_tail_is_discarded() {
        let (_tmp, path) = ledger_file("recordings/a Jan.1.2020_1.0\nrecordings/b Fe");
        let mut ledger = Ledger::open(&path).unwrap();
        assert_eq!(ledger.len(), 1);
        assert!(!ledger.has(&"recordings/b Fe".into()));

        ledger.add(&"recordings/b Feb.2.2020_2.0".into()).unwrap();
        drop(ledger);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "recordings/a Jan.1.2020_1.0\nrecordings/b Feb.2.2020_2.0\n"
        );
    }

    #[test]
    fn test_never_reports_unadded_ids() {
        let (_tmp, path) = ledger_file("");
        let mut ledger = Ledger::open(&path).unwrap();
        assert!(ledger.add(&"bad\nid".into()).is_err());
        assert!(!ledger.has(&"bad\nid".into()));
        assert!(!ledger.has(&"bad".into()));
        assert!(ledger.is_empty());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn test_snapshot_is_frozen() {
        let (_tmp, path) = ledger_file("recordings/a Jan.1.2020_1.0\n");
        let mut ledger = Ledger::open(&path).unwrap();
        let snapshot = ledger.snapshot();
        ledger.add(&"recordings/b Jan.2.2020_1.0".into()).unwrap();
        assert!(snapshot.has(&"recordings/a Jan.1.2020_1.0".into()));
        assert!(!snapshot.has(&"recordings/b Jan.2.2020_1.0".into()));
        assert_eq!(snapshot.len(), 1);
    }
}
