//! Backup progress reporting.
//!
//! Reports what `pvr-archive run` is doing, one recording at a time, so an
//! operator watching a long run can see which recording is being staged and
//! how many are left. Progress is emitted on **stderr** so stdout remains
//! parseable for scripts.

use std::io::Write;

/// A single progress event for a backup run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackupProgressEvent {
    /// Already in the ledger.
    Skipped { recording: String },
    /// Retrieval started for the n-th of `total` listed recordings.
    Staging {
        recording: String,
        n: u64,
        total: u64,
    },
    /// Staged and handed to the transcoder queue.
    Queued { recording: String },
    /// Transcoded, cleaned up and committed to the ledger.
    Archived { recording: String, archived: u64 },
}

/// Reports backup progress. Implementations write to stderr (human or JSON).
pub trait BackupProgressReporter: Send + Sync {
    /// Emit a progress event. Called from both pipeline tasks.
    fn report(&self, event: BackupProgressEvent);
}

/// Human-friendly progress on stderr: "backup  staging  3 / 1,204  recordings/...".
pub struct StderrProgress;

impl BackupProgressReporter for StderrProgress {
    fn report(&self, event: BackupProgressEvent) {
        let line = match &event {
            BackupProgressEvent::Skipped { recording } => {
                format!("backup  skipped  {}\n", recording)
            }
            BackupProgressEvent::Staging {
                recording,
                n,
                total,
            } => format!(
                "backup  staging  {} / {}  {}\n",
                format_number(*n),
                format_number(*total),
                recording
            ),
            BackupProgressEvent::Queued { recording } => {
                format!("backup  queued  {}\n", recording)
            }
            BackupProgressEvent::Archived {
                recording,
                archived,
            } => format!(
                "backup  archived  {}  ({} this run)\n",
                recording,
                format_number(*archived)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl BackupProgressReporter for JsonProgress {
    fn report(&self, event: BackupProgressEvent) {
        let obj = event_json(&event);
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

fn event_json(event: &BackupProgressEvent) -> serde_json::Value {
    match event {
        BackupProgressEvent::Skipped { recording } => serde_json::json!({
            "event": "progress",
            "phase": "skipped",
            "recording": recording
        }),
        BackupProgressEvent::Staging {
            recording,
            n,
            total,
        } => serde_json::json!({
            "event": "progress",
            "phase": "staging",
            "recording": recording,
            "n": n,
            "total": total
        }),
        BackupProgressEvent::Queued { recording } => serde_json::json!({
            "event": "progress",
            "phase": "queued",
            "recording": recording
        }),
        BackupProgressEvent::Archived {
            recording,
            archived,
        } => serde_json::json!({
            "event": "progress",
            "phase": "archived",
            "recording": recording,
            "archived": archived
        }),
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl BackupProgressReporter for NoProgress {
    fn report(&self, _event: BackupProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn BackupProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
