//! Core data types that flow through the archiving pipeline.
//!
//! A [`RecordingId`] is read from the index, checked against the ledger,
//! staged, turned into a [`TranscodeJob`] and finally committed.

use std::fmt;
use std::path::PathBuf;
use tempfile::TempDir;

/// Path-like identifier naming one recording on the device,
/// e.g. `recordings/Movies/Heat Jan.5.2021_20.30`.
///
/// Used verbatim as the ledger key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordingId(String);

impl RecordingId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for RecordingId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One `name|fullPath` line of the device's own `index.txt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub name: String,
    pub full_path: String,
}

/// Destination name derived from a recording identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackName {
    /// Relative directory under the archive root; empty for top-level recordings.
    pub subdirectory: String,
    /// `YYYY-MM-DD_HH:MM_<title>.mp4`
    pub filename: String,
}

/// A staged recording waiting for the transcoder.
///
/// The job owns its staging directory; dropping the job removes whatever
/// is still staged.
#[derive(Debug)]
pub struct TranscodeJob {
    pub recording: RecordingId,
    pub source: PathBuf,
    pub destination: PathBuf,
    pub staging: TempDir,
}

/// Counts reported at the end of a completed run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub discovered: u64,
    pub skipped: u64,
    pub archived: u64,
}
