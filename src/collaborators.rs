//! External programs the pipeline drives but does not implement.
//!
//! The pipeline talks to two collaborators through traits so that tests can
//! substitute in-process stubs:
//!
//! - a [`Retriever`] copies one recording off the device into a directory,
//! - a [`Transcoder`] converts a staged file into the archive format.
//!
//! The production implementations, [`RetrievalCommand`] and
//! [`TranscodeCommand`], run the configured programs as subprocesses with
//! inherited stdout/stderr. Success is exit status zero. The child is killed
//! if the pipeline drops the future (an aborted run).

use async_trait::async_trait;
use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use crate::config::{RetrievalConfig, TranscodeConfig};
use crate::error::{ArchiveError, Result};
use crate::models::RecordingId;

/// Copies a recording from the device into `out_dir`.
///
/// On success `out_dir` must contain exactly one file: the recording.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Program name used in logs and error messages.
    fn name(&self) -> &str;

    async fn retrieve(&self, id: &RecordingId, out_dir: &Path) -> Result<()>;
}

/// Converts `source` into the archive format at `destination`.
#[async_trait]
pub trait Transcoder: Send + Sync {
    fn name(&self) -> &str;

    async fn transcode(&self, source: &Path, destination: &Path) -> Result<()>;
}

/// `<program> <args...> <recording-id> <output_flag> <dir>`
#[derive(Debug, Clone)]
pub struct RetrievalCommand {
    config: RetrievalConfig,
}

impl RetrievalCommand {
    pub fn new(config: RetrievalConfig) -> Self {
        Self { config }
    }

    pub fn args(&self, id: &RecordingId, out_dir: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = self.config.args.iter().map(OsString::from).collect();
        args.push(id.as_str().into());
        args.push(self.config.output_flag.as_str().into());
        args.push(out_dir.as_os_str().to_owned());
        args
    }
}

#[async_trait]
impl Retriever for RetrievalCommand {
    fn name(&self) -> &str {
        &self.config.program
    }

    async fn retrieve(&self, id: &RecordingId, out_dir: &Path) -> Result<()> {
        sh(&self.config.program, self.args(id, out_dir)).await
    }
}

/// `<program> -i <source> -o <destination> -e <encoder> <extra_args...>`
#[derive(Debug, Clone)]
pub struct TranscodeCommand {
    config: TranscodeConfig,
}

impl TranscodeCommand {
    pub fn new(config: TranscodeConfig) -> Self {
        Self { config }
    }

    pub fn args(&self, source: &Path, destination: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-i".into(),
            source.as_os_str().to_owned(),
            "-o".into(),
            destination.as_os_str().to_owned(),
            "-e".into(),
            self.config.encoder.as_str().into(),
        ];
        args.extend(self.config.extra_args.iter().map(OsString::from));
        args
    }
}

#[async_trait]
impl Transcoder for TranscodeCommand {
    fn name(&self) -> &str {
        &self.config.program
    }

    async fn transcode(&self, source: &Path, destination: &Path) -> Result<()> {
        sh(&self.config.program, self.args(source, destination)).await
    }
}

/// Run `program` to completion, passing its output straight through.
async fn sh(program: &str, args: Vec<OsString>) -> Result<()> {
    tracing::info!(program, args = ?args, "exec");

    let status = Command::new(program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .status()
        .await
        .map_err(|e| ArchiveError::collaborator(program, format!("could not start: {}", e)))?;

    if !status.success() {
        return Err(ArchiveError::collaborator(program, status.to_string()));
    }
    Ok(())
}
