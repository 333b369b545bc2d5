//! # Processor
//!
//! One activation of the bridge: an endpoint, its poll loop and its upload
//! pipeline. [`ProcessorHost`] owns the active processor and replaces it
//! wholesale on reconfiguration.
//!
//! ## Activation Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       ProcessorHost::start(settings)                    │
//! │                                                                         │
//! │  build Processor ──── invalid config ───► Err(Config)  (old one kept)  │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  stop old processor (poll loop finishes its cycle)                     │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  connect check ───── unreachable / auth ──► Err(Connection)            │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  spawn poll loop ──► swap in as the active processor                   │
//! │                                                                         │
//! │  stop():   idempotent; in-flight uploads run to their terminal state   │
//! │  send():   on the active processor, outside the host lock              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use ftpbridge_core::{EndpointConfig, Protocol};

use crate::collaborators::Collaborators;
use crate::error::{SyncError, SyncResult};
use crate::poll::{Clock, PollOptions, PollPipeline, PollStats, SystemClock};
use crate::settings::BridgeSettings;
use crate::transport::{connect_with_retry, connector_for, Connector, ReconnectPolicy};
use crate::upload::{UploadOptions, UploadPipeline, UploadReceipt, UploadStats};

/// Builds the connector for an endpoint.
pub type ConnectorFactory =
    Arc<dyn Fn(&EndpointConfig, &BridgeSettings) -> Arc<dyn Connector> + Send + Sync>;

// =============================================================================
// Status
// =============================================================================

/// Health snapshot of the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessorStatus {
    pub active: bool,
    pub protocol: Option<Protocol>,
    pub host: Option<String>,
    /// Seconds since the last claim attempt.
    pub last_sync_age_secs: Option<u64>,
    pub files_ingested: u64,
    pub uploads_succeeded: u64,
    pub uploads_failed: u64,
}

// =============================================================================
// Processor
// =============================================================================

#[derive(Default)]
struct RunState {
    shutdown_tx: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

/// A single, non-restartable activation.
pub struct Processor {
    activation_id: Uuid,
    endpoint: Arc<EndpointConfig>,
    connector: Arc<dyn Connector>,
    reconnect: ReconnectPolicy,
    poll: Mutex<Option<PollPipeline>>,
    upload: UploadPipeline,
    poll_stats: Arc<PollStats>,
    upload_stats: Arc<UploadStats>,
    run: Mutex<RunState>,
    stopped: AtomicBool,
}

impl Processor {
    /// Validates `settings` and wires a processor with the real transport.
    pub fn new(settings: &BridgeSettings, collaborators: Collaborators) -> SyncResult<Self> {
        let factory: ConnectorFactory = Arc::new(connector_for);
        Self::build(settings, collaborators, &factory, Arc::new(SystemClock))
    }

    fn build(
        settings: &BridgeSettings,
        collaborators: Collaborators,
        factory: &ConnectorFactory,
        clock: Arc<dyn Clock>,
    ) -> SyncResult<Self> {
        settings.validate()?;
        let endpoint = Arc::new(settings.resolve_endpoint()?);
        let connector = factory(&endpoint, settings);

        let poll = PollPipeline::new(
            endpoint.clone(),
            connector.clone(),
            collaborators.clone(),
            PollOptions::from_settings(settings),
        )?
        .with_clock(clock);

        let upload = UploadPipeline::new(
            endpoint.clone(),
            connector.clone(),
            collaborators.store.clone(),
            UploadOptions::from_settings(settings),
        );

        let activation_id = Uuid::new_v4();
        debug!(
            %activation_id,
            input_uri = %endpoint.input_uri(&settings.wire_options()),
            "Processor configured"
        );

        Ok(Self {
            activation_id,
            poll_stats: poll.stats(),
            upload_stats: upload.stats(),
            endpoint,
            connector,
            reconnect: ReconnectPolicy::from_settings(settings),
            poll: Mutex::new(Some(poll)),
            upload,
            run: Mutex::new(RunState::default()),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn activation_id(&self) -> Uuid {
        self.activation_id
    }

    pub fn endpoint(&self) -> &EndpointConfig {
        &self.endpoint
    }

    /// Checks the endpoint is reachable, then starts the poll loop.
    ///
    /// A failed connection check (unreachable host, rejected login) is fatal.
    pub async fn start(&self) -> SyncResult<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(SyncError::ShuttingDown);
        }

        let mut run = self.run.lock().await;
        if run.task.is_some() {
            debug!(activation_id = %self.activation_id, "Processor already started");
            return Ok(());
        }

        info!(
            activation_id = %self.activation_id,
            protocol = %self.endpoint.protocol(),
            host = %self.endpoint.host(),
            "Starting processor"
        );

        let session = connect_with_retry(self.connector.as_ref(), &self.reconnect)
            .await
            .map_err(|e| {
                error!(host = %self.endpoint.host(), error = %e, "Endpoint connection check failed");
                e
            })?;
        if let Err(e) = session.close().await {
            debug!(?e, "Failed to close check session cleanly");
        }

        let poll = self
            .poll
            .lock()
            .await
            .take()
            .ok_or(SyncError::ShuttingDown)?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        run.task = Some(tokio::spawn(poll.run(shutdown_rx)));
        run.shutdown_tx = Some(shutdown_tx);

        info!(activation_id = %self.activation_id, "Processor started");
        Ok(())
    }

    /// Stops the poll loop after its current cycle. Safe to call repeatedly.
    pub async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);

        let mut run = self.run.lock().await;
        if let Some(tx) = run.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(task) = run.task.take() {
            info!(activation_id = %self.activation_id, "Stopping processor");
            if let Err(e) = task.await {
                error!(error = %e, "Poll loop ended abnormally");
            }
            info!(activation_id = %self.activation_id, "Processor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst)
    }

    /// Uploads a stored file to the output folder.
    pub async fn send_file(&self, file_id: &str, folder: Option<&str>) -> SyncResult<UploadReceipt> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(SyncError::ShuttingDown);
        }
        self.upload.send_file(file_id, folder).await
    }

    /// Time since the last claim attempt.
    pub fn last_sync_age(&self) -> Option<Duration> {
        self.poll_stats.last_sync_age()
    }

    pub fn status(&self) -> ProcessorStatus {
        ProcessorStatus {
            active: self.is_running(),
            protocol: Some(self.endpoint.protocol()),
            host: Some(self.endpoint.host().to_string()),
            last_sync_age_secs: self.last_sync_age().map(|age| age.as_secs()),
            files_ingested: self.poll_stats.files_ingested(),
            uploads_succeeded: self.upload_stats.succeeded(),
            uploads_failed: self.upload_stats.failed(),
        }
    }
}

// =============================================================================
// Processor Host
// =============================================================================

/// Owns the active processor and swaps it on every start.
pub struct ProcessorHost {
    collaborators: Collaborators,
    connectors: ConnectorFactory,
    clock: Arc<dyn Clock>,
    current: RwLock<Option<Arc<Processor>>>,
}

impl ProcessorHost {
    pub fn new(collaborators: Collaborators) -> Self {
        Self {
            collaborators,
            connectors: Arc::new(connector_for),
            clock: Arc::new(SystemClock),
            current: RwLock::new(None),
        }
    }

    /// Replaces the transport used by processors built from now on.
    pub fn with_connector_factory(mut self, connectors: ConnectorFactory) -> Self {
        self.connectors = connectors;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn build(&self, settings: &BridgeSettings) -> SyncResult<Processor> {
        Processor::build(
            settings,
            self.collaborators.clone(),
            &self.connectors,
            self.clock.clone(),
        )
    }

    /// Activates `settings`, replacing any active processor.
    ///
    /// Invalid settings are rejected before the active processor is touched.
    pub async fn start(&self, settings: &BridgeSettings) -> SyncResult<()> {
        let next = Arc::new(self.build(settings).map_err(|e| {
            error!(error = %e, "Rejected configuration");
            e
        })?);

        let mut current = self.current.write().await;
        if let Some(previous) = current.take() {
            previous.stop().await;
        }

        next.start().await?;
        *current = Some(next);
        Ok(())
    }

    /// Stops the active processor, if any.
    pub async fn stop(&self) {
        let previous = self.current.write().await.take();
        match previous {
            Some(processor) => processor.stop().await,
            None => debug!("Stop requested with no active processor"),
        }
    }

    pub async fn is_active(&self) -> bool {
        self.current.read().await.is_some()
    }

    async fn active(&self) -> SyncResult<Arc<Processor>> {
        self.current
            .read()
            .await
            .clone()
            .ok_or(SyncError::NotStarted)
    }

    /// Sends through the active processor.
    pub async fn send_file(&self, file_id: &str, folder: Option<&str>) -> SyncResult<UploadReceipt> {
        let processor = self.active().await?;
        processor.send_file(file_id, folder).await
    }

    /// Sends through a throwaway processor built from `settings`.
    ///
    /// The active processor, if any, is left untouched.
    pub async fn send_file_with_config(
        &self,
        settings: &BridgeSettings,
        file_id: &str,
        folder: Option<&str>,
    ) -> SyncResult<UploadReceipt> {
        let processor = self.build(settings)?;
        let result = processor.send_file(file_id, folder).await;
        processor.stop().await;
        result
    }

    pub async fn last_sync_age(&self) -> Option<Duration> {
        self.active().await.ok().and_then(|p| p.last_sync_age())
    }

    pub async fn status(&self) -> ProcessorStatus {
        match self.current.read().await.as_ref() {
            Some(processor) => processor.status(),
            None => ProcessorStatus::default(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FixedClock, MemoryConnector, MemoryRemote, MemoryStore, RecordingSink};
    use chrono::NaiveDate;
    use ftpbridge_core::{ConfigError, RawEndpointConfig};
    use tempfile::TempDir;

    struct Fixture {
        remote: MemoryRemote,
        store: Arc<MemoryStore>,
        sink: Arc<RecordingSink>,
        host: ProcessorHost,
        staging: TempDir,
    }

    fn settings(staging: &TempDir) -> BridgeSettings {
        let mut settings = BridgeSettings::default();
        settings.endpoint = RawEndpointConfig {
            host: "files.example.com".into(),
            username: Some("bridge".into()),
            password: Some("secret".into()),
            input_folder: Some("inbox".into()),
            archive_folder: Some("done".into()),
            archive_grouping: Some("daily".into()),
            output_folder: Some("outbox".into()),
            ..Default::default()
        };
        settings.reconnect.max_attempts = 1;
        settings.reconnect.delay_secs = 1;
        settings.upload.staging_dir = Some(staging.path().to_path_buf());
        settings
    }

    fn fixture() -> Fixture {
        let remote = MemoryRemote::new();
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(RecordingSink::new());

        let connector_remote = remote.clone();
        let factory: ConnectorFactory = Arc::new(move |_: &EndpointConfig, _: &BridgeSettings| {
            Arc::new(MemoryConnector::new(connector_remote.clone())) as Arc<dyn Connector>
        });
        let clock = FixedClock(
            NaiveDate::from_ymd_opt(2024, 3, 1)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap(),
        );

        let host = ProcessorHost::new(Collaborators::new(store.clone(), sink.clone()))
            .with_connector_factory(factory)
            .with_clock(Arc::new(clock));

        Fixture {
            remote,
            store,
            sink,
            host,
            staging: tempfile::tempdir().unwrap(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_polls_and_stop_is_idempotent() {
        let f = fixture();
        f.remote.add_file("inbox/report.csv", b"a,b");

        f.host.start(&settings(&f.staging)).await.unwrap();
        assert!(f.host.is_active().await);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(f.sink.events().len(), 1);
        assert!(f.remote.exists("done/2024-03-01/20240301120000-report.csv"));

        let status = f.host.status().await;
        assert!(status.active);
        assert_eq!(status.protocol, Some(Protocol::Ftp));
        assert_eq!(status.files_ingested, 1);
        assert!(status.last_sync_age_secs.is_some());

        f.host.stop().await;
        f.host.stop().await;
        assert!(!f.host.is_active().await);
        assert_eq!(f.host.status().await, ProcessorStatus::default());
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let f = fixture();
        f.host.stop().await;
        assert!(!f.host.is_active().await);
    }

    #[tokio::test]
    async fn test_invalid_config_fails_fast() {
        let f = fixture();
        let mut bad = settings(&f.staging);
        bad.endpoint.archive_folder = Some("/inbox/".into());

        let err = f.host.start(&bad).await.unwrap_err();

        assert!(matches!(
            err,
            SyncError::Config(ConfigError::SameFolders { .. })
        ));
        assert!(err.is_config_error());
        assert_eq!(f.remote.connect_calls(), 0);
        assert!(!f.host.is_active().await);
    }

    #[tokio::test]
    async fn test_invalid_config_keeps_active_processor() {
        let f = fixture();
        f.host.start(&settings(&f.staging)).await.unwrap();

        let mut bad = settings(&f.staging);
        bad.endpoint.host = "  ".into();
        assert!(f.host.start(&bad).await.is_err());

        assert!(f.host.is_active().await);
        f.host.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_endpoint_fails_start() {
        let f = fixture();
        f.remote.fail_next_connects(100);

        let err = f.host.start(&settings(&f.staging)).await.unwrap_err();

        assert!(matches!(err, SyncError::Connection(_)));
        assert_eq!(f.remote.connect_calls(), 2);
        assert!(!f.host.is_active().await);
    }

    #[tokio::test]
    async fn test_restart_swaps_processor() {
        let f = fixture();
        f.host.start(&settings(&f.staging)).await.unwrap();
        let first = f.host.active().await.unwrap().activation_id();

        let mut next = settings(&f.staging);
        next.endpoint.host = "other.example.com".into();
        f.host.start(&next).await.unwrap();

        let active = f.host.active().await.unwrap();
        assert_ne!(active.activation_id(), first);
        assert_eq!(f.host.status().await.host.as_deref(), Some("other.example.com"));
        f.host.stop().await;
    }

    #[tokio::test]
    async fn test_send_requires_active_processor() {
        let f = fixture();
        let err = f.host.send_file("file-1", None).await.unwrap_err();
        assert!(matches!(err, SyncError::NotStarted));
    }

    #[tokio::test]
    async fn test_send_through_active_processor() {
        let f = fixture();
        f.store.insert("file-1", "a.txt", b"a");
        f.host.start(&settings(&f.staging)).await.unwrap();

        let receipt = f.host.send_file("file-1", Some("in/")).await.unwrap();
        assert_eq!(receipt.remote_path, "outbox/in/a.txt");
        assert_eq!(f.host.status().await.uploads_succeeded, 1);
        f.host.stop().await;
    }

    #[tokio::test]
    async fn test_send_with_config_leaves_host_idle() {
        let f = fixture();
        f.store.insert("file-1", "a.txt", b"a");

        let receipt = f
            .host
            .send_file_with_config(&settings(&f.staging), "file-1", None)
            .await
            .unwrap();

        assert_eq!(receipt.remote_path, "outbox/a.txt");
        assert!(!f.host.is_active().await);
    }

    #[tokio::test]
    async fn test_stopped_processor_cannot_restart() {
        let f = fixture();
        let processor = f.host.build(&settings(&f.staging)).unwrap();
        processor.stop().await;

        assert!(matches!(processor.start().await, Err(SyncError::ShuttingDown)));
        assert!(matches!(
            processor.send_file("file-1", None).await,
            Err(SyncError::ShuttingDown)
        ));
    }
}
