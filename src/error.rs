//! Error kinds raised by the archiving pipeline.
//!
//! Every failure is fatal for the current run. The variants exist so the
//! operator can tell from the message which step broke and whether a
//! re-run is likely to help.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Missing or unusable configuration, ledger or index source.
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed index line, recording identifier, date token or header buffer.
    #[error("format error: {0}")]
    Format(String),

    /// An external program exited non-zero or could not be started.
    #[error("{program} failed: {detail}")]
    Collaborator { program: String, detail: String },

    /// Unexpected filesystem state or a create/delete failure.
    #[error("filesystem error at {}: {detail}", path.display())]
    Filesystem { path: PathBuf, detail: String },

    /// Ledger append or flush failure.
    #[error("ledger I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ArchiveError {
    pub fn format(msg: impl Into<String>) -> Self {
        ArchiveError::Format(msg.into())
    }

    pub fn filesystem(path: impl Into<PathBuf>, detail: impl ToString) -> Self {
        ArchiveError::Filesystem {
            path: path.into(),
            detail: detail.to_string(),
        }
    }

    pub fn collaborator(program: impl Into<String>, detail: impl Into<String>) -> Self {
        ArchiveError::Collaborator {
            program: program.into(),
            detail: detail.into(),
        }
    }

    /// Only collaborator failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ArchiveError::Collaborator { .. })
    }
}

pub type Result<T> = std::result::Result<T, ArchiveError>;
