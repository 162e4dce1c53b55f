//! Pipeline tests with in-process collaborators.
//!
//! The retrieval and transcode programs are replaced with stubs implementing
//! the `Retriever` and `Transcoder` traits, so these tests exercise the real
//! producer/consumer coordination, staging, naming and ledger commits.

use async_trait::async_trait;
use pvr_archive::collaborators::{Retriever, Transcoder};
use pvr_archive::config::PipelineConfig;
use pvr_archive::error::{ArchiveError, Result};
use pvr_archive::ledger::Ledger;
use pvr_archive::models::RecordingId;
use pvr_archive::pipeline::Pipeline;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Semaphore;

// ─── Stub collaborators ─────────────────────────────────────────────

/// Writes one fake transport stream per call into the output directory.
#[derive(Default)]
struct StubRetriever {
    calls: AtomicUsize,
    /// Fail this many calls before succeeding.
    transient_failures: AtomicUsize,
    /// Recordings for which two files are produced instead of one.
    ambiguous: Vec<String>,
}

#[async_trait]
impl Retriever for StubRetriever {
    fn name(&self) -> &str {
        "stub-retriever"
    }

    async fn retrieve(&self, id: &RecordingId, out_dir: &Path) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ArchiveError::collaborator("stub-retriever", "exit status: 1"));
        }
        std::fs::write(out_dir.join("recording.ts"), id.as_str()).unwrap();
        if self.ambiguous.iter().any(|a| a == id.as_str()) {
            std::fs::write(out_dir.join("extra.ts"), b"x").unwrap();
        }
        Ok(())
    }
}

/// Copies the source to the destination, optionally waiting on a gate first.
#[derive(Default)]
struct StubTranscoder {
    started: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
    fail: bool,
    seen: Mutex<Vec<(PathBuf, PathBuf)>>,
}

#[async_trait]
impl Transcoder for StubTranscoder {
    fn name(&self) -> &str {
        "stub-transcoder"
    }

    async fn transcode(&self, source: &Path, destination: &Path) -> Result<()> {
        self.started.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        self.seen
            .lock()
            .unwrap()
            .push((source.to_path_buf(), destination.to_path_buf()));
        if self.fail {
            return Err(ArchiveError::collaborator("stub-transcoder", "exit status: 2"));
        }
        std::fs::copy(source, destination).unwrap();
        Ok(())
    }
}

// ─── Fixtures ───────────────────────────────────────────────────────

struct Env {
    _tmp: TempDir,
    archive: PathBuf,
    staging: PathBuf,
    ledger: PathBuf,
}

impl Env {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("archive");
        let staging = tmp.path().join("staging");
        std::fs::create_dir_all(&archive).unwrap();
        std::fs::create_dir_all(&staging).unwrap();
        let ledger = tmp.path().join("db.txt");
        std::fs::write(&ledger, "").unwrap();
        Self {
            _tmp: tmp,
            archive,
            staging,
            ledger,
        }
    }

    fn pipeline(&self, retriever: Arc<StubRetriever>, transcoder: Arc<StubTranscoder>) -> Pipeline {
        Pipeline::new(&self.archive, retriever, transcoder)
            .with_staging_dir(Some(self.staging.clone()))
    }

    fn open_ledger(&self) -> Ledger {
        Ledger::open(&self.ledger).unwrap()
    }

    fn ledger_contents(&self) -> String {
        std::fs::read_to_string(&self.ledger).unwrap()
    }

    fn staging_entries(&self) -> usize {
        std::fs::read_dir(&self.staging).unwrap().count()
    }
}

fn ids(list: &[&str]) -> Vec<RecordingId> {
    list.iter().map(|s| RecordingId::from(*s)).collect()
}

fn root_cause(err: &anyhow::Error) -> Option<&ArchiveError> {
    err.downcast_ref::<ArchiveError>()
}

async fn wait_for(counter: &AtomicUsize, value: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while counter.load(Ordering::SeqCst) < value {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("counter never reached expected value");
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_end_to_end_single_recording() {
    let env = Env::new();
    let retriever = Arc::new(StubRetriever::default());
    let transcoder = Arc::new(StubTranscoder::default());
    let pipeline = env.pipeline(retriever.clone(), transcoder.clone());

    let summary = pipeline
        .run(ids(&["recordings/foo Jan.5.2021_08.30"]), env.open_ledger(), None)
        .await
        .unwrap();

    assert_eq!(summary.discovered, 1);
    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.archived, 1);

    let dest = env.archive.join("2021-01-05_08:30_foo.mp4");
    assert!(dest.exists(), "destination file missing");
    assert_eq!(
        std::fs::read_to_string(&dest).unwrap(),
        "recordings/foo Jan.5.2021_08.30"
    );

    let seen = transcoder.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    let (source, destination) = &seen[0];
    assert_eq!(destination, &dest);
    assert!(!source.exists(), "staged source not removed");
    assert!(!source.parent().unwrap().exists(), "staging dir not removed");
    assert_eq!(env.staging_entries(), 0);

    assert_eq!(env.ledger_contents(), "recordings/foo Jan.5.2021_08.30\n");
}

#[tokio::test]
async fn test_subdirectories_are_created() {
    let env = Env::new();
    let pipeline = env.pipeline(
        Arc::new(StubRetriever::default()),
        Arc::new(StubTranscoder::default()),
    );

    pipeline
        .run(
            ids(&["recordings/Movies/Drama/Heat Jan.5.2021_20.30"]),
            env.open_ledger(),
            None,
        )
        .await
        .unwrap();

    let dest = env
        .archive
        .join("Movies/Drama")
        .join("2021-01-05_20:30_Heat.mp4");
    assert!(dest.exists());

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(env.archive.join("Movies"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o700, 0o700);
    }
}

#[tokio::test]
async fn test_second_run_skips_everything() {
    let env = Env::new();
    let listing = ids(&[
        "recordings/a Jan.1.2021_10.00",
        "recordings/News/b Jan.2.2021_18.30",
    ]);
    let retriever = Arc::new(StubRetriever::default());
    let transcoder = Arc::new(StubTranscoder::default());

    let first = env
        .pipeline(retriever.clone(), transcoder.clone())
        .run(listing.clone(), env.open_ledger(), None)
        .await
        .unwrap();
    assert_eq!(first.archived, 2);

    let second = env
        .pipeline(retriever.clone(), transcoder.clone())
        .run(listing, env.open_ledger(), None)
        .await
        .unwrap();
    assert_eq!(second.discovered, 2);
    assert_eq!(second.skipped, 2);
    assert_eq!(second.archived, 0);
    assert_eq!(retriever.calls.load(Ordering::SeqCst), 2);
    assert_eq!(transcoder.started.load(Ordering::SeqCst), 2);
    assert_eq!(env.ledger_contents().lines().count(), 2);
}

#[tokio::test]
async fn test_duplicate_index_entries_archived_once() {
    let env = Env::new();
    let retriever = Arc::new(StubRetriever::default());
    let summary = env
        .pipeline(retriever.clone(), Arc::new(StubTranscoder::default()))
        .run(
            ids(&[
                "recordings/a Jan.1.2021_10.00",
                "recordings/a Jan.1.2021_10.00",
            ]),
            env.open_ledger(),
            None,
        )
        .await
        .unwrap();

    assert_eq!(summary.archived, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(retriever.calls.load(Ordering::SeqCst), 1);
    assert_eq!(env.ledger_contents(), "recordings/a Jan.1.2021_10.00\n");
}

#[tokio::test]
async fn test_queue_applies_backpressure() {
    let env = Env::new();
    let gate = Arc::new(Semaphore::new(0));
    let retriever = Arc::new(StubRetriever::default());
    let transcoder = Arc::new(StubTranscoder {
        gate: Some(gate.clone()),
        ..StubTranscoder::default()
    });
    let pipeline = env.pipeline(retriever.clone(), transcoder.clone());
    let ledger = env.open_ledger();
    let listing = ids(&[
        "recordings/a Jan.1.2021_10.00",
        "recordings/b Jan.2.2021_10.00",
        "recordings/c Jan.3.2021_10.00",
        "recordings/d Jan.4.2021_10.00",
        "recordings/e Jan.5.2021_10.00",
    ]);

    let run = tokio::spawn(async move { pipeline.run(listing, ledger, None).await });

    // One job in the transcoder, one in the queue, one staged and waiting
    // to be queued. Nothing else may be retrieved.
    wait_for(&transcoder.started, 1).await;
    wait_for(&retriever.calls, 3).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(retriever.calls.load(Ordering::SeqCst), 3);
    assert_eq!(transcoder.started.load(Ordering::SeqCst), 1);
    assert_eq!(env.ledger_contents(), "");

    // Let the first job finish: exactly one more recording gets staged.
    gate.add_permits(1);
    wait_for(&retriever.calls, 4).await;
    wait_for(&transcoder.started, 2).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(retriever.calls.load(Ordering::SeqCst), 4);
    assert_eq!(env.ledger_contents(), "recordings/a Jan.1.2021_10.00\n");

    gate.add_permits(10);
    let summary = run.await.unwrap().unwrap();
    assert_eq!(summary.archived, 5);
    assert_eq!(env.ledger_contents().lines().count(), 5);
    assert_eq!(env.staging_entries(), 0);
}

#[tokio::test]
async fn test_ambiguous_staging_aborts_without_commit() {
    let env = Env::new();
    let gate = Arc::new(Semaphore::new(0));
    let retriever = Arc::new(StubRetriever {
        ambiguous: vec!["recordings/b Jan.2.2021_10.00".to_string()],
        ..StubRetriever::default()
    });
    let transcoder = Arc::new(StubTranscoder {
        gate: Some(gate),
        ..StubTranscoder::default()
    });

    let err = env
        .pipeline(retriever.clone(), transcoder)
        .run(
            ids(&[
                "recordings/a Jan.1.2021_10.00",
                "recordings/b Jan.2.2021_10.00",
                "recordings/c Jan.3.2021_10.00",
            ]),
            env.open_ledger(),
            None,
        )
        .await
        .unwrap_err();

    assert!(matches!(
        root_cause(&err),
        Some(ArchiveError::Filesystem { .. })
    ));
    assert!(format!("{:#}", err).contains("recordings/b Jan.2.2021_10.00"));
    // no further recordings attempted, nothing committed, nothing left staged
    assert_eq!(retriever.calls.load(Ordering::SeqCst), 2);
    assert_eq!(env.ledger_contents(), "");
    assert_eq!(env.staging_entries(), 0);
}

#[tokio::test]
async fn test_transcode_failure_leaves_ledger_untouched() {
    let env = Env::new();
    let transcoder = Arc::new(StubTranscoder {
        fail: true,
        ..StubTranscoder::default()
    });

    let err = env
        .pipeline(Arc::new(StubRetriever::default()), transcoder)
        .run(
            ids(&["recordings/a Jan.1.2021_10.00"]),
            env.open_ledger(),
            None,
        )
        .await
        .unwrap_err();

    assert!(matches!(
        root_cause(&err),
        Some(ArchiveError::Collaborator { .. })
    ));
    assert_eq!(env.ledger_contents(), "");
    assert_eq!(env.staging_entries(), 0);
    assert!(!env.archive.join("2021-01-01_10:00_a.mp4").exists());
}

#[tokio::test]
async fn test_malformed_identifier_fails_before_retrieval() {
    let env = Env::new();
    let retriever = Arc::new(StubRetriever::default());

    let err = env
        .pipeline(retriever.clone(), Arc::new(StubTranscoder::default()))
        .run(ids(&["movies/a Jan.1.2021_10.00"]), env.open_ledger(), None)
        .await
        .unwrap_err();

    assert!(matches!(root_cause(&err), Some(ArchiveError::Format(_))));
    assert_eq!(retriever.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_transient_retrieval_failure_is_retried() {
    let env = Env::new();
    let retriever = Arc::new(StubRetriever {
        transient_failures: AtomicUsize::new(1),
        ..StubRetriever::default()
    });
    let settings = PipelineConfig {
        max_retries: 2,
        retry_backoff_ms: 1,
        ..PipelineConfig::default()
    };

    let summary = env
        .pipeline(retriever.clone(), Arc::new(StubTranscoder::default()))
        .with_settings(settings)
        .run(
            ids(&["recordings/a Jan.1.2021_10.00"]),
            env.open_ledger(),
            None,
        )
        .await
        .unwrap();

    assert_eq!(summary.archived, 1);
    assert_eq!(retriever.calls.load(Ordering::SeqCst), 2);
    assert_eq!(env.staging_entries(), 0);
}

#[tokio::test]
async fn test_no_retries_by_default() {
    let env = Env::new();
    let retriever = Arc::new(StubRetriever {
        transient_failures: AtomicUsize::new(1),
        ..StubRetriever::default()
    });

    let err = env
        .pipeline(retriever.clone(), Arc::new(StubTranscoder::default()))
        .run(
            ids(&["recordings/a Jan.1.2021_10.00"]),
            env.open_ledger(),
            None,
        )
        .await
        .unwrap_err();

    assert!(matches!(
        root_cause(&err),
        Some(ArchiveError::Collaborator { .. })
    ));
    assert_eq!(retriever.calls.load(Ordering::SeqCst), 1);
    assert_eq!(env.staging_entries(), 0);
}

#[tokio::test]
async fn test_limit_caps_recordings_staged() {
    let env = Env::new();
    std::fs::write(&env.ledger, "recordings/a Jan.1.2021_10.00\n").unwrap();
    let retriever = Arc::new(StubRetriever::default());

    let summary = env
        .pipeline(retriever.clone(), Arc::new(StubTranscoder::default()))
        .run(
            ids(&[
                "recordings/a Jan.1.2021_10.00",
                "recordings/b Jan.2.2021_10.00",
                "recordings/c Jan.3.2021_10.00",
            ]),
            env.open_ledger(),
            Some(1),
        )
        .await
        .unwrap();

    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.archived, 1);
    assert_eq!(
        env.ledger_contents(),
        "recordings/a Jan.1.2021_10.00\nrecordings/b Jan.2.2021_10.00\n"
    );
}
