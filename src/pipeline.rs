//! Backup pipeline orchestration.
//!
//! Two tasks connected by a bounded queue:
//!
//! ```text
//!  index ──▶ producer ──[ queue, capacity 1 ]──▶ consumer ──▶ ledger
//!            ledger check                        transcode
//!            retrieve into staging dir           delete staged file
//!            compute destination                 append RecordingId
//! ```
//!
//! The producer stages one recording at a time and blocks on the queue when
//! the consumer is behind, so at most one recording is staged while another
//! waits in the queue. The consumer owns the [`Ledger`]; the producer only
//! sees a [`LedgerSnapshot`]. A recording is committed to the ledger only
//! after it has been transcoded and its staged copy removed.
//!
//! The first error in either task ends the run. Staging directories are
//! owned by the job that uses them and are removed however the run ends.

use anyhow::{anyhow, bail, Context, Result};
use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};

use crate::collaborators::{RetrievalCommand, Retriever, TranscodeCommand, Transcoder};
use crate::config::{Config, PipelineConfig};
use crate::error::ArchiveError;
use crate::index;
use crate::ledger::{Ledger, LedgerSnapshot};
use crate::models::{RecordingId, RunSummary, TranscodeJob};
use crate::naming::normalize;
use crate::progress::{BackupProgressEvent, BackupProgressReporter, NoProgress, ProgressMode};

/// Jobs waiting for the transcoder. Together with the one being staged this
/// bounds local disk use to two recordings.
pub const QUEUE_CAPACITY: usize = 1;

pub struct Pipeline {
    archive_root: PathBuf,
    staging_dir: Option<PathBuf>,
    settings: PipelineConfig,
    retriever: Arc<dyn Retriever>,
    transcoder: Arc<dyn Transcoder>,
    progress: Arc<dyn BackupProgressReporter>,
}

impl Pipeline {
    pub fn new(
        archive_root: impl Into<PathBuf>,
        retriever: Arc<dyn Retriever>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Self {
        Self {
            archive_root: archive_root.into(),
            staging_dir: None,
            settings: PipelineConfig::default(),
            retriever,
            transcoder,
            progress: Arc::new(NoProgress),
        }
    }

    /// Pipeline driving the configured retrieval and transcode programs.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.archive.root,
            Arc::new(RetrievalCommand::new(config.retrieval.clone())),
            Arc::new(TranscodeCommand::new(config.transcode.clone())),
        )
        .with_settings(config.pipeline.clone())
        .with_staging_dir(config.archive.staging_dir.clone())
    }

    pub fn with_settings(mut self, settings: PipelineConfig) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_staging_dir(mut self, staging_dir: Option<PathBuf>) -> Self {
        self.staging_dir = staging_dir;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn BackupProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Archive every listed recording that is not yet in the ledger.
    ///
    /// `limit` caps how many recordings are staged in this run. The ledger
    /// is closed when the run completes; on error it is dropped as-is, every
    /// entry in it already durable.
    pub async fn run(
        &self,
        recordings: Vec<RecordingId>,
        ledger: Ledger,
        limit: Option<usize>,
    ) -> Result<RunSummary> {
        let discovered = recordings.len() as u64;
        let (tx, mut rx) = mpsc::channel(QUEUE_CAPACITY);

        let producer = Producer {
            archive_root: self.archive_root.clone(),
            staging_dir: self.staging_dir.clone(),
            settings: self.settings.clone(),
            retriever: Arc::clone(&self.retriever),
            progress: Arc::clone(&self.progress),
            snapshot: ledger.snapshot(),
            limit,
        };
        let mut handle = tokio::spawn(producer.run(recordings, tx));

        let mut ledger = ledger;
        match self.consume(&mut handle, &mut rx, &mut ledger).await {
            Ok((skipped, archived)) => {
                ledger.close().context("closing ledger")?;
                Ok(RunSummary {
                    discovered,
                    skipped,
                    archived,
                })
            }
            Err(e) => {
                handle.abort();
                Err(e)
            }
        }
    }

    /// Consumer side. Returns (skipped, archived) once the producer has
    /// finished and the queue is drained.
    async fn consume(
        &self,
        producer: &mut JoinHandle<Result<u64>>,
        rx: &mut mpsc::Receiver<TranscodeJob>,
        ledger: &mut Ledger,
    ) -> Result<(u64, u64)> {
        let mut skipped: Option<u64> = None;
        let mut archived = 0u64;

        loop {
            let job = tokio::select! {
                biased;
                joined = &mut *producer, if skipped.is_none() => {
                    skipped = Some(settle(joined)?);
                    continue;
                }
                job = rx.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            let recording = job.recording.clone();
            if skipped.is_some() {
                self.commit(job, ledger).await?;
            } else {
                // a producer failure must end the run even mid-transcode
                let work = self.commit(job, ledger);
                tokio::pin!(work);
                tokio::select! {
                    biased;
                    joined = &mut *producer => {
                        skipped = Some(settle(joined)?);
                        work.await?;
                    }
                    done = &mut work => done?,
                }
            }

            archived += 1;
            self.progress.report(BackupProgressEvent::Archived {
                recording: recording.to_string(),
                archived,
            });
        }

        let skipped = match skipped {
            Some(skipped) => skipped,
            None => settle(producer.await)?,
        };
        Ok((skipped, archived))
    }

    /// Transcode, remove the staged copy, then record the recording as done.
    async fn commit(&self, job: TranscodeJob, ledger: &mut Ledger) -> Result<()> {
        tracing::info!(
            recording = %job.recording,
            source = %job.source.display(),
            destination = %job.destination.display(),
            "transcoding"
        );

        let transcoder = self.transcoder.as_ref();
        let (source, destination) = (job.source.as_path(), job.destination.as_path());
        with_retries(&self.settings, transcoder.name(), move || {
            transcoder.transcode(source, destination)
        })
        .await
        .with_context(|| format!("transcoding {}", job.recording))?;

        std::fs::remove_file(&job.source)
            .map_err(|e| ArchiveError::filesystem(&job.source, e))
            .with_context(|| format!("removing staged copy of {}", job.recording))?;
        let staging_path = job.staging.path().to_path_buf();
        job.staging
            .close()
            .map_err(|e| ArchiveError::filesystem(staging_path, e))
            .with_context(|| format!("removing staging directory of {}", job.recording))?;

        ledger
            .add(&job.recording)
            .with_context(|| format!("committing {} to ledger", job.recording))?;
        tracing::info!(recording = %job.recording, "archived");
        Ok(())
    }
}

fn settle(joined: std::result::Result<Result<u64>, JoinError>) -> Result<u64> {
    match joined {
        Ok(result) => result,
        Err(e) => Err(anyhow!("staging task failed: {}", e)),
    }
}

/// Producer side: everything up to handing a job to the queue.
struct Producer {
    archive_root: PathBuf,
    staging_dir: Option<PathBuf>,
    settings: PipelineConfig,
    retriever: Arc<dyn Retriever>,
    progress: Arc<dyn BackupProgressReporter>,
    snapshot: LedgerSnapshot,
    limit: Option<usize>,
}

impl Producer {
    /// Returns how many recordings were skipped as already archived.
    async fn run(self, recordings: Vec<RecordingId>, tx: mpsc::Sender<TranscodeJob>) -> Result<u64> {
        let total = recordings.len() as u64;
        let mut seen = HashSet::new();
        let mut skipped = 0u64;
        let mut staged = 0usize;

        for (i, id) in recordings.into_iter().enumerate() {
            if self.snapshot.has(&id) || !seen.insert(id.clone()) {
                tracing::info!(recording = %id, "skipping");
                self.progress.report(BackupProgressEvent::Skipped {
                    recording: id.to_string(),
                });
                skipped += 1;
                continue;
            }
            if self.limit.is_some_and(|limit| staged >= limit) {
                tracing::info!(limit = staged, "recording limit reached");
                break;
            }

            self.progress.report(BackupProgressEvent::Staging {
                recording: id.to_string(),
                n: i as u64 + 1,
                total,
            });
            let job = self.stage(&id).await?;
            staged += 1;

            tracing::debug!(recording = %id, "waiting for transcoder");
            if tx.send(job).await.is_err() {
                bail!("transcoder stopped before {} could be queued", id);
            }
            self.progress.report(BackupProgressEvent::Queued {
                recording: id.to_string(),
            });
        }

        Ok(skipped)
    }

    async fn stage(&self, id: &RecordingId) -> Result<TranscodeJob> {
        let name = normalize(id).with_context(|| format!("naming {}", id))?;

        let (staging, source) = with_retries(&self.settings, self.retriever.name(), move || {
            self.stage_once(id)
        })
        .await
        .with_context(|| format!("staging {}", id))?;

        let destination_dir = self.archive_root.join(&name.subdirectory);
        create_destination_dir(&destination_dir)
            .with_context(|| format!("preparing destination for {}", id))?;

        tracing::info!(recording = %id, source = %source.display(), "staged");
        Ok(TranscodeJob {
            recording: id.clone(),
            source,
            destination: destination_dir.join(&name.filename),
            staging,
        })
    }

    /// One retrieval attempt into a fresh private directory.
    async fn stage_once(&self, id: &RecordingId) -> crate::error::Result<(TempDir, PathBuf)> {
        let staging = self.staging_tempdir()?;
        self.retriever.retrieve(id, staging.path()).await?;
        let source = find_single_file(staging.path())?;
        Ok((staging, source))
    }

    fn staging_tempdir(&self) -> crate::error::Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("pvr-archive-");
        match &self.staging_dir {
            Some(dir) => builder
                .tempdir_in(dir)
                .map_err(|e| ArchiveError::filesystem(dir, e)),
            None => builder
                .tempdir()
                .map_err(|e| ArchiveError::filesystem(std::env::temp_dir(), e)),
        }
    }
}

/// The only entry of a staging directory, which must be a regular file.
pub fn find_single_file(dir: &Path) -> crate::error::Result<PathBuf> {
    let mut names = Vec::new();
    let entries = std::fs::read_dir(dir).map_err(|e| ArchiveError::filesystem(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| ArchiveError::filesystem(dir, e))?;
        names.push(entry.file_name());
    }

    if names.len() != 1 {
        return Err(ArchiveError::filesystem(
            dir,
            format!("expected one file, got {:?}", names),
        ));
    }
    let path = dir.join(&names[0]);
    if !path.is_file() {
        return Err(ArchiveError::filesystem(&path, "staged entry is not a regular file"));
    }
    Ok(path)
}

fn create_destination_dir(dir: &Path) -> crate::error::Result<()> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o755);
    }
    builder
        .create(dir)
        .map_err(|e| ArchiveError::filesystem(dir, e))
}

/// Run `op`, retrying collaborator failures up to `settings.max_retries` times.
///
/// Backoff: retry_backoff_ms, doubled per attempt. Other error kinds are
/// returned immediately.
async fn with_retries<T, F, Fut>(
    settings: &PipelineConfig,
    what: &str,
    mut op: F,
) -> crate::error::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = crate::error::Result<T>>,
{
    let mut last_err = None;

    for attempt in 0..=settings.max_retries {
        if attempt > 0 {
            let delay = settings.backoff(attempt);
            tracing::warn!(
                what,
                attempt,
                max_retries = settings.max_retries,
                delay_ms = delay.as_millis() as u64,
                "retrying"
            );
            tokio::time::sleep(delay).await;
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() => {
                tracing::warn!(what, error = %e, "collaborator failed");
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_err.unwrap_or_else(|| ArchiveError::collaborator(what, "failed after retries")))
}

/// `pvr-archive run`
pub async fn run_backup(
    config: &Config,
    dry_run: bool,
    limit: Option<usize>,
    progress: ProgressMode,
) -> Result<()> {
    let ledger = Ledger::open(&config.ledger.path)?;
    let recordings = index::load_index(&config.index.path)?;

    if dry_run {
        print_plan(config, &recordings, &ledger.snapshot(), limit);
        return Ok(());
    }

    let pipeline =
        Pipeline::from_config(config).with_progress(Arc::from(progress.reporter()));
    let summary = pipeline.run(recordings, ledger, limit).await?;

    println!("backup");
    println!("  discovered: {}", summary.discovered);
    println!("  skipped: {}", summary.skipped);
    println!("  archived: {}", summary.archived);
    println!("ok");
    tracing::info!("all done");
    Ok(())
}

fn print_plan(
    config: &Config,
    recordings: &[RecordingId],
    snapshot: &LedgerSnapshot,
    limit: Option<usize>,
) {
    let mut seen = HashSet::new();
    let pending: Vec<&RecordingId> = recordings
        .iter()
        .filter(|id| !snapshot.has(id) && seen.insert(*id))
        .take(limit.unwrap_or(usize::MAX))
        .collect();

    println!("backup (dry-run)");
    println!("  discovered: {}", recordings.len());
    println!("  would archive: {}", pending.len());
    for id in pending {
        match normalize(id) {
            Ok(name) => println!(
                "    {} -> {}",
                id,
                config
                    .archive
                    .root
                    .join(&name.subdirectory)
                    .join(&name.filename)
                    .display()
            ),
            Err(e) => println!("    {} -> INVALID ({})", id, e),
        }
    }
}
