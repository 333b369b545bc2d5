//! # Upload Pipeline
//!
//! Pushes a stored file to the remote output folder on request.
//!
//! ## Send Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          SendFile(id, folder?)                          │
//! │                                                                         │
//! │  Created ──► Resolving ──► Downloading ──► Staging                      │
//! │   │ blank id    │ metadata      │ Store.get     │ copy into work dir    │
//! │   ▼             │ (name or id)  │ none ⇒ client │ empty ⇒ client        │
//! │  argument       │               ▼               ▼                       │
//! │                 │                                                       │
//! │  ┌──────────────┴──── worker task ─────────────────────────────────┐    │
//! │  │                                                                │    │
//! │  │  Uploading{1} ──fail──► Failed{1} ──► Uploading{2} ──► ...     │    │
//! │  │      │                                                         │    │
//! │  │      │ ok                         budget spent ──► Exhausted   │    │
//! │  │      ▼                                                         │    │
//! │  │   Uploaded                                                     │    │
//! │  └────────────────────────────────────────────────────────────────┘    │
//! │                                                                         │
//! │  • 3 attempts, no delay between them (sessions reconnect on their own) │
//! │  • each attempt bounded by a 10 minute timeout; a timed-out transfer   │
//! │    is stopped and drained before the next attempt starts               │
//! │  • the staged copy is removed once the job is terminal                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use ftpbridge_core::{AttemptOutcome, EndpointConfig, ErrorCode, ErrorReport, UploadJob};

use crate::collaborators::Store;
use crate::error::{SyncError, SyncResult};
use crate::settings::BridgeSettings;
use crate::transport::{connect_with_retry, Connector, ReconnectPolicy};

// =============================================================================
// Options and Results
// =============================================================================

/// Upload tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOptions {
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    /// Directory staged copies are written to.
    pub work_dir: PathBuf,
}

impl UploadOptions {
    pub fn from_settings(settings: &BridgeSettings) -> Self {
        Self {
            max_attempts: settings.upload.max_attempts,
            attempt_timeout: settings.attempt_timeout(),
            reconnect: ReconnectPolicy::from_settings(settings),
            work_dir: settings.work_dir(),
        }
    }
}

/// Outcome of a successful send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub file_id: String,
    pub remote_path: String,
    /// Attempts made, the successful one included.
    pub attempts: u32,
    pub bytes: u64,
}

/// Counters shared with status queries.
#[derive(Debug, Default)]
pub struct UploadStats {
    succeeded: AtomicU64,
    failed: AtomicU64,
}

impl UploadStats {
    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Upload Pipeline
// =============================================================================

/// Sends stored files to the endpoint's output folder.
pub struct UploadPipeline {
    endpoint: Arc<EndpointConfig>,
    connector: Arc<dyn Connector>,
    store: Arc<dyn Store>,
    options: UploadOptions,
    stats: Arc<UploadStats>,
}

impl UploadPipeline {
    pub fn new(
        endpoint: Arc<EndpointConfig>,
        connector: Arc<dyn Connector>,
        store: Arc<dyn Store>,
        options: UploadOptions,
    ) -> Self {
        Self {
            endpoint,
            connector,
            store,
            options,
            stats: Arc::new(UploadStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<UploadStats> {
        self.stats.clone()
    }

    /// Uploads `file_id` below the output root, into `folder` when given.
    ///
    /// Returns once the job is terminal. Pre-flight failures (blank id,
    /// unknown or empty file) are not charged against the attempt budget.
    pub async fn send_file(&self, file_id: &str, folder: Option<&str>) -> SyncResult<UploadReceipt> {
        let result = self.send(file_id, folder).await;
        match &result {
            Ok(_) => self.stats.succeeded.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.stats.failed.fetch_add(1, Ordering::Relaxed),
        };
        result
    }

    async fn send(&self, file_id: &str, folder: Option<&str>) -> SyncResult<UploadReceipt> {
        let file_id = file_id.trim();
        if file_id.is_empty() {
            return Err(SyncError::Argument("Empty file id".into()));
        }

        let mut job = UploadJob::with_budget(
            file_id,
            folder.map(str::to_string),
            self.options.max_attempts,
        );

        job.begin_resolving()?;
        let remote_name = self.resolve_name(file_id).await;

        job.begin_downloading(remote_name.as_str())?;
        let staged = self.stage(file_id).await?;
        let bytes = staged.as_file().metadata()?.len();
        if bytes == 0 {
            return Err(SyncError::Client(format!("File [{}] is empty", file_id)));
        }
        job.begin_staging(staged.path())?;

        let remote_path = self
            .endpoint
            .remote_upload_path(job.target_folder(), &remote_name);
        debug!(file_id, remote = %remote_path, bytes, "File staged for upload");

        let worker = AttemptWorker {
            connector: self.connector.clone(),
            reconnect: self.options.reconnect,
            attempt_timeout: self.options.attempt_timeout,
            remote_path,
        };

        // The worker owns the staged copy; it is deleted when the job ends,
        // even if the caller stops waiting.
        let receipt = tokio::spawn(async move {
            let result = worker.run(&mut job, &staged).await;
            drop(staged);
            result
        })
        .await??;

        Ok(UploadReceipt { bytes, ..receipt })
    }

    /// Friendly name from the store metadata, the raw id otherwise.
    async fn resolve_name(&self, file_id: &str) -> String {
        match self.store.metadata(file_id).await {
            Ok(Some(metadata)) => metadata
                .file_name
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| file_id.to_string()),
            Ok(None) => file_id.to_string(),
            Err(e) => {
                info!(file_id, error = %e, "File name lookup failed, using file id");
                file_id.to_string()
            }
        }
    }

    /// Copies the stored content into a fresh file in the work directory.
    async fn stage(&self, file_id: &str) -> SyncResult<NamedTempFile> {
        let mut content = self
            .store
            .get(file_id)
            .await?
            .ok_or_else(|| SyncError::Client(format!("File [{}] not found", file_id)))?;

        tokio::fs::create_dir_all(&self.options.work_dir).await?;
        let staged = tempfile::Builder::new()
            .prefix("upload-")
            .tempfile_in(&self.options.work_dir)?;

        let mut writer = tokio::fs::File::from_std(staged.reopen()?);
        tokio::io::copy(&mut content, &mut writer).await?;
        writer.flush().await?;

        Ok(staged)
    }
}

// =============================================================================
// Attempt Loop
// =============================================================================

#[derive(Clone)]
struct AttemptWorker {
    connector: Arc<dyn Connector>,
    reconnect: ReconnectPolicy,
    attempt_timeout: Duration,
    remote_path: String,
}

impl AttemptWorker {
    async fn run(&self, job: &mut UploadJob, staged: &NamedTempFile) -> SyncResult<UploadReceipt> {
        loop {
            let attempt = job.begin_attempt()?;
            debug!(file_id = job.file_id(), attempt, "Upload attempt starting");

            let result = self.bounded_attempt(staged.path()).await;

            match result {
                Ok(()) => {
                    job.record_success()?;
                    info!(
                        file_id = job.file_id(),
                        remote = %self.remote_path,
                        attempt,
                        "File uploaded"
                    );
                    return Ok(UploadReceipt {
                        file_id: job.file_id().to_string(),
                        remote_path: self.remote_path.clone(),
                        attempts: job.attempts_consumed() + 1,
                        bytes: 0,
                    });
                }
                Err(e) => {
                    let report = ErrorReport::new(ErrorCode::Upload, e.to_string())
                        .with_details(serde_json::json!({
                            "attempt": attempt,
                            "cause": e.to_report(),
                        }));

                    match job.record_failure(report.clone())? {
                        AttemptOutcome::Retry { remaining } => {
                            warn!(
                                file_id = job.file_id(),
                                attempt,
                                remaining,
                                error = %e,
                                "Error when trying to upload file"
                            );
                        }
                        AttemptOutcome::Exhausted => {
                            warn!(
                                file_id = job.file_id(),
                                attempts = job.attempts_consumed(),
                                error = %e,
                                "Upload attempts exhausted"
                            );
                            return Err(SyncError::UploadExhausted {
                                attempts: job.attempts_consumed(),
                                last: job.last_error().cloned().unwrap_or(report),
                            });
                        }
                    }
                }
            }
        }
    }

    /// Runs one attempt on its own task and waits for it to finish, even
    /// past the deadline, so two transfers never write `remote_path` at once.
    async fn bounded_attempt(&self, staged: &Path) -> SyncResult<()> {
        let worker = self.clone();
        let staged = staged.to_path_buf();
        let mut task = tokio::spawn(async move { worker.attempt(&staged).await });

        match tokio::time::timeout(self.attempt_timeout, &mut task).await {
            Ok(joined) => joined?,
            Err(_) => {
                warn!(
                    remote = %self.remote_path,
                    timeout_secs = self.attempt_timeout.as_secs(),
                    "Upload attempt timed out, waiting for the transfer to stop"
                );
                match task.await {
                    Ok(Ok(())) => debug!(remote = %self.remote_path, "Timed-out transfer completed late"),
                    Ok(Err(e)) => debug!(error = %e, "Timed-out transfer stopped"),
                    Err(e) => debug!(error = %e, "Timed-out transfer task failed"),
                }
                Err(SyncError::Timeout(self.attempt_timeout.as_secs()))
            }
        }
    }

    async fn attempt(&self, staged: &Path) -> SyncResult<()> {
        let started = tokio::time::Instant::now();
        let mut session = connect_with_retry(self.connector.as_ref(), &self.reconnect).await?;

        let remaining = self.attempt_timeout.saturating_sub(started.elapsed());
        let result = if remaining.is_zero() {
            Err(SyncError::Timeout(self.attempt_timeout.as_secs()))
        } else {
            session.set_transfer_timeout(remaining);
            session.put(&self.remote_path, staged).await
        };

        if let Err(e) = session.close().await {
            debug!(?e, "Failed to close session cleanly");
        }

        result.map_err(|e| SyncError::TransientUpload(e.to_string()))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryConnector, MemoryRemote, MemoryStore};
    use crate::transport::{Blocking, BlockingSession, RemoteEntry, RemoteSession};
    use async_trait::async_trait;
    use ftpbridge_core::{Protocol, RawEndpointConfig};
    use std::io::Read;
    use std::sync::atomic::AtomicU32;
    use tempfile::TempDir;

    struct Fixture {
        remote: MemoryRemote,
        store: Arc<MemoryStore>,
        pipeline: UploadPipeline,
        work_dir: TempDir,
    }

    fn fixture() -> Fixture {
        fixture_with(None, Duration::from_secs(600))
    }

    fn fixture_with(connector: Option<Arc<dyn Connector>>, attempt_timeout: Duration) -> Fixture {
        let raw = RawEndpointConfig {
            host: "files.example.com".into(),
            username: Some("bridge".into()),
            password: Some("secret".into()),
            input_folder: Some("inbox".into()),
            archive_folder: Some("done".into()),
            output_folder: Some("/outbox/".into()),
            ..Default::default()
        };
        let endpoint = Arc::new(EndpointConfig::resolve(&raw).unwrap());
        let remote = MemoryRemote::new();
        let store = Arc::new(MemoryStore::new());
        let work_dir = tempfile::tempdir().unwrap();

        let options = UploadOptions {
            max_attempts: 3,
            attempt_timeout,
            reconnect: ReconnectPolicy {
                max_reconnects: 1,
                delay: Duration::from_millis(10),
                connect_timeout: Duration::from_secs(5),
            },
            work_dir: work_dir.path().join("ftpbridgeFtpTmp"),
        };

        let pipeline = UploadPipeline::new(
            endpoint,
            connector.unwrap_or_else(|| {
                Arc::new(MemoryConnector::new(remote.clone())) as Arc<dyn Connector>
            }),
            store.clone(),
            options,
        );

        Fixture {
            remote,
            store,
            pipeline,
            work_dir,
        }
    }

    fn staged_files(f: &Fixture) -> usize {
        std::fs::read_dir(f.work_dir.path().join("ftpbridgeFtpTmp"))
            .map(|dir| dir.count())
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn test_upload_uses_friendly_name_and_folder() {
        let f = fixture();
        f.store.insert("file-9", "invoice.pdf", b"%PDF-1.7");

        let receipt = f.pipeline.send_file(" file-9 ", Some("/2024/03/")).await.unwrap();

        assert_eq!(receipt.remote_path, "outbox/2024/03/invoice.pdf");
        assert_eq!(receipt.attempts, 1);
        assert_eq!(receipt.bytes, 8);
        assert_eq!(f.remote.file("outbox/2024/03/invoice.pdf").unwrap(), b"%PDF-1.7");
        assert_eq!(f.remote.closed_sessions(), 1);
        assert_eq!(staged_files(&f), 0);
        assert_eq!(f.pipeline.stats().succeeded(), 1);
    }

    #[tokio::test]
    async fn test_upload_without_folder_goes_to_output_root() {
        let f = fixture();
        f.store.insert("file-1", "a.txt", b"a");

        let receipt = f.pipeline.send_file("file-1", None).await.unwrap();
        assert_eq!(receipt.remote_path, "outbox/a.txt");
    }

    #[tokio::test]
    async fn test_metadata_failure_falls_back_to_id() {
        let f = fixture();
        f.store.insert("file-2", "a.txt", b"a");
        f.store.fail_metadata(true);

        let receipt = f.pipeline.send_file("file-2", None).await.unwrap();
        assert_eq!(receipt.remote_path, "outbox/file-2");
    }

    #[tokio::test]
    async fn test_fails_twice_then_succeeds() {
        let f = fixture();
        f.store.insert("file-1", "a.txt", b"a");
        f.remote.fail_next_puts(2);

        let receipt = f.pipeline.send_file("file-1", None).await.unwrap();

        assert_eq!(f.remote.put_calls(), 3);
        assert_eq!(receipt.attempts, 3);
        assert!(f.remote.exists("outbox/a.txt"));
        assert_eq!(staged_files(&f), 0);
    }

    #[tokio::test]
    async fn test_three_failures_exhaust_the_budget() {
        let f = fixture();
        f.store.insert("file-1", "a.txt", b"a");
        f.remote.fail_next_puts(5);

        let err = f.pipeline.send_file("file-1", None).await.unwrap_err();

        assert_eq!(f.remote.put_calls(), 3);
        match err {
            SyncError::UploadExhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert_eq!(last.code, ErrorCode::Upload);
                assert_eq!(last.details.unwrap()["attempt"], 3);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(staged_files(&f), 0);
        assert_eq!(f.pipeline.stats().failed(), 1);
    }

    #[tokio::test]
    async fn test_missing_file_is_client_error_without_attempts() {
        let f = fixture();

        let err = f.pipeline.send_file("nope", None).await.unwrap_err();

        assert!(matches!(err, SyncError::Client(_)));
        assert_eq!(err.code(), ErrorCode::Client);
        assert_eq!(f.remote.connect_calls(), 0);
        assert_eq!(f.remote.put_calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_file_is_client_error() {
        let f = fixture();
        f.store.insert("file-1", "empty.txt", b"");

        let err = f.pipeline.send_file("file-1", None).await.unwrap_err();

        assert!(matches!(err, SyncError::Client(_)));
        assert_eq!(f.remote.put_calls(), 0);
        assert_eq!(staged_files(&f), 0);
    }

    #[tokio::test]
    async fn test_blank_id_is_argument_error() {
        let f = fixture();

        let err = f.pipeline.send_file("   ", None).await.unwrap_err();

        assert!(matches!(err, SyncError::Argument(_)));
        assert_eq!(f.store.get_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_attempt_times_out_and_retries() {
        let f = fixture();
        f.store.insert("file-1", "a.txt", b"a");
        f.remote.hang_next_puts(1);

        let receipt = f.pipeline.send_file("file-1", None).await.unwrap();

        assert_eq!(receipt.attempts, 2);
        assert_eq!(f.remote.put_calls(), 2);
        assert_eq!(f.remote.closed_sessions(), 2);
    }

    /// Blocking session whose first put stalls on the thread past the deadline.
    #[derive(Default)]
    struct SlowState {
        puts: AtomicU32,
        active: AtomicU32,
        max_active: AtomicU32,
        completed: AtomicU32,
        closes: AtomicU32,
    }

    struct SlowSession {
        state: Arc<SlowState>,
    }

    impl BlockingSession for SlowSession {
        fn list_dir(&mut self, _dir: &str) -> SyncResult<Vec<RemoteEntry>> {
            Ok(Vec::new())
        }

        fn fetch(&mut self, path: &str) -> SyncResult<Vec<u8>> {
            Err(SyncError::Remote(format!("550 {}", path)))
        }

        fn rename(&mut self, _from: &str, _to: &str) -> SyncResult<()> {
            Ok(())
        }

        fn put(&mut self, _remote_path: &str, source: &mut dyn Read) -> SyncResult<u64> {
            let first = self.state.puts.fetch_add(1, Ordering::SeqCst) == 0;
            let active = self.state.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.state.max_active.fetch_max(active, Ordering::SeqCst);

            if first {
                std::thread::sleep(Duration::from_millis(400));
            }
            let mut written = Vec::new();
            let result = source.read_to_end(&mut written);

            self.state.active.fetch_sub(1, Ordering::SeqCst);
            let bytes = result?;
            self.state.completed.fetch_add(1, Ordering::SeqCst);
            Ok(bytes as u64)
        }

        fn mkdir(&mut self, _dir: &str) -> SyncResult<()> {
            Ok(())
        }

        fn close(self) -> SyncResult<()> {
            self.state.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct SlowConnector {
        state: Arc<SlowState>,
    }

    #[async_trait]
    impl Connector for SlowConnector {
        fn protocol(&self) -> Protocol {
            Protocol::Sftp
        }

        async fn connect(&self) -> SyncResult<Box<dyn RemoteSession>> {
            Ok(Box::new(Blocking::new(SlowSession {
                state: self.state.clone(),
            })))
        }
    }

    #[tokio::test]
    async fn test_timed_out_blocking_put_is_stopped_before_retry() {
        let state = Arc::new(SlowState::default());
        let connector: Arc<dyn Connector> = Arc::new(SlowConnector {
            state: state.clone(),
        });
        let f = fixture_with(Some(connector), Duration::from_millis(100));
        f.store.insert("file-1", "a.txt", b"abc");

        let receipt = f.pipeline.send_file("file-1", None).await.unwrap();

        assert_eq!(receipt.attempts, 2);
        assert_eq!(state.puts.load(Ordering::SeqCst), 2);
        // The stalled put hit its deadline instead of finishing behind the retry.
        assert_eq!(state.completed.load(Ordering::SeqCst), 1);
        assert_eq!(state.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(state.active.load(Ordering::SeqCst), 0);
        assert_eq!(state.closes.load(Ordering::SeqCst), 2);
        assert_eq!(staged_files(&f), 0);
    }
}
