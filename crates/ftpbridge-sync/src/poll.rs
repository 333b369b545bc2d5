//! # Poll Pipeline
//!
//! Periodically scans the remote input folder, claims at most one settled
//! file per cycle, archives it and hands it to the application.
//!
//! ## Poll Cycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Poll Cycle States                               │
//! │                                                                         │
//! │  Idle ──tick──► Scanning                                               │
//! │                    │                                                    │
//! │         ┌──────────┴───────────┐                                        │
//! │         ▼                      ▼                                        │
//! │    FileFound              NoFileFound ──► IdleCounting ──► Idle        │
//! │         │                                                               │
//! │         ▼                                                               │
//! │    Fetching ──► Archiving ──► Normalizing ──► Storing ──► Emitting      │
//! │                    │                                        │           │
//! │                    │ failure: abort, file stays in input    ▼           │
//! │                    ▼                                       Idle         │
//! │                  (logged)                                               │
//! │                                                                         │
//! │  READ LOCK ("changed"):                                                │
//! │  • stat, wait check interval (5s), stat again                          │
//! │  • same size and mtime ⇒ claimed                                       │
//! │  • still changing after timeout (30s) ⇒ skipped this cycle             │
//! │                                                                         │
//! │  TIMING:                                                               │
//! │  • Poll interval: 30 seconds between scan starts                       │
//! │  • One cycle in flight at a time; a started cycle always completes    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::NaiveDateTime;
use glob::{MatchOptions, Pattern};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use ftpbridge_core::path::{original_file_name, split_parent, strip_folder};
use ftpbridge_core::{ConfigError, EndpointConfig, FileRecord, IdleCounter, NewFileEvent};

use crate::collaborators::Collaborators;
use crate::error::{SyncError, SyncResult};
use crate::settings::BridgeSettings;
use crate::transport::{connect_with_retry, Connector, ReconnectPolicy, RemoteEntry, RemoteSession};

// =============================================================================
// Clock
// =============================================================================

/// Source of the wall-clock time used for archive names.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Local wall-clock time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

// =============================================================================
// Options and Stats
// =============================================================================

/// Poll loop tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    pub interval: Duration,
    pub read_lock_timeout: Duration,
    pub read_lock_check_interval: Duration,
    pub idle_report_every: u32,
    pub reconnect: ReconnectPolicy,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            read_lock_timeout: Duration::from_secs(30),
            read_lock_check_interval: Duration::from_secs(5),
            idle_report_every: ftpbridge_core::IDLE_REPORT_EVERY,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl PollOptions {
    pub fn from_settings(settings: &BridgeSettings) -> Self {
        Self {
            interval: settings.poll_interval(),
            read_lock_timeout: settings.read_lock_timeout(),
            read_lock_check_interval: settings.read_lock_check_interval(),
            idle_report_every: settings.polling.idle_report_every,
            reconnect: ReconnectPolicy::from_settings(settings),
        }
    }
}

/// Counters shared between the poll task and status queries.
#[derive(Debug, Default)]
pub struct PollStats {
    last_sync: Mutex<Option<Instant>>,
    files_ingested: AtomicU64,
}

impl PollStats {
    fn mark_sync(&self) {
        if let Ok(mut last) = self.last_sync.lock() {
            *last = Some(Instant::now());
        }
    }

    /// Time since the last claim attempt, whatever its outcome.
    pub fn last_sync_age(&self) -> Option<Duration> {
        self.last_sync
            .lock()
            .ok()
            .and_then(|last| last.map(|at| at.elapsed()))
    }

    pub fn files_ingested(&self) -> u64 {
        self.files_ingested.load(Ordering::Relaxed)
    }
}

/// Result of one poll cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// A file was archived, stored and announced.
    Ingested { record: FileRecord, event: NewFileEvent },
    /// Nothing was claimed; `reported` tells whether it was logged at info.
    NoFile { reported: bool },
}

// =============================================================================
// Poll Pipeline
// =============================================================================

/// Scans the input folder of one endpoint.
pub struct PollPipeline {
    endpoint: Arc<EndpointConfig>,
    connector: Arc<dyn Connector>,
    collaborators: Collaborators,
    clock: Arc<dyn Clock>,
    matcher: Option<Pattern>,
    options: PollOptions,
    idle: IdleCounter,
    stats: Arc<PollStats>,
}

impl PollPipeline {
    pub fn new(
        endpoint: Arc<EndpointConfig>,
        connector: Arc<dyn Connector>,
        collaborators: Collaborators,
        options: PollOptions,
    ) -> SyncResult<Self> {
        let matcher = endpoint
            .file_pattern()
            .map(|pattern| {
                Pattern::new(pattern).map_err(|e| ConfigError::InvalidPattern {
                    pattern: pattern.to_string(),
                    reason: e.msg.to_string(),
                })
            })
            .transpose()?;

        Ok(Self {
            endpoint,
            connector,
            collaborators,
            clock: Arc::new(SystemClock),
            matcher,
            options,
            idle: IdleCounter::new(options.idle_report_every),
            stats: Arc::new(PollStats::default()),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn stats(&self) -> Arc<PollStats> {
        self.stats.clone()
    }

    /// Runs cycles on the poll interval until `shutdown` flips to true.
    ///
    /// A cycle that has started always runs to completion.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            input = %self.endpoint.input_folder(),
            interval_secs = self.options.interval.as_secs(),
            "Poll pipeline starting"
        );

        let mut interval = tokio::time::interval(self.options.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }

                _ = interval.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        error!(?e, "Poll cycle failed");
                    }
                }
            }
        }

        info!("Poll pipeline stopped");
    }

    /// Runs one complete cycle on a fresh session.
    pub async fn run_cycle(&mut self) -> SyncResult<CycleOutcome> {
        self.stats.mark_sync();

        let mut session =
            connect_with_retry(self.connector.as_ref(), &self.options.reconnect).await?;
        let result = self.cycle(session.as_mut()).await;

        if let Err(e) = session.close().await {
            debug!(?e, "Failed to close session cleanly");
        }

        let outcome = result?;
        if let CycleOutcome::NoFile { reported } = &outcome {
            if *reported {
                info!(input = %self.endpoint.input_folder(), "No files to process");
            } else {
                debug!("No files to process");
            }
        }
        Ok(outcome)
    }

    async fn cycle(&mut self, session: &mut dyn RemoteSession) -> SyncResult<CycleOutcome> {
        let candidates = self.candidates(session).await?;
        debug!(count = candidates.len(), "Scanned input folder");

        for candidate in candidates {
            if self.acquire_read_lock(session, &candidate).await? {
                return self.ingest(session, candidate).await;
            }
            debug!(file = %candidate.path, "File still changing, skipped this cycle");
        }

        Ok(self.no_file())
    }

    fn no_file(&mut self) -> CycleOutcome {
        CycleOutcome::NoFile {
            reported: self.idle.record_empty(),
        }
    }

    /// Files below the input folder that pass the pattern, in path order.
    async fn candidates(&self, session: &mut dyn RemoteSession) -> SyncResult<Vec<RemoteEntry>> {
        let input = self.endpoint.input_folder();
        let archive = self.endpoint.archive_folder();

        let mut files: Vec<RemoteEntry> = session
            .list(input, self.endpoint.recursive())
            .await?
            .into_iter()
            .filter(|entry| !entry.is_dir)
            .filter(|entry| archive.is_empty() || strip_folder(&entry.path, archive).is_none())
            .filter(|entry| self.matches(strip_folder(&entry.path, input).unwrap_or(&entry.path)))
            .collect();

        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    fn matches(&self, relative: &str) -> bool {
        let options = MatchOptions {
            case_sensitive: false,
            require_literal_separator: true,
            require_literal_leading_dot: false,
        };
        self.matcher
            .as_ref()
            .map_or(true, |pattern| pattern.matches_with(relative, options))
    }

    /// "changed" read lock: the file must keep its size and mtime across a check interval.
    async fn acquire_read_lock(
        &self,
        session: &mut dyn RemoteSession,
        entry: &RemoteEntry,
    ) -> SyncResult<bool> {
        let deadline = Instant::now() + self.options.read_lock_timeout;

        let Some(mut previous) = session.stat(&entry.path).await? else {
            return Ok(false);
        };

        loop {
            tokio::time::sleep(self.options.read_lock_check_interval).await;

            let Some(current) = session.stat(&entry.path).await? else {
                return Ok(false);
            };

            if current.size == previous.size && current.modified == previous.modified {
                return Ok(true);
            }

            if Instant::now() >= deadline {
                return Ok(false);
            }
            previous = current;
        }
    }

    async fn ingest(
        &mut self,
        session: &mut dyn RemoteSession,
        entry: RemoteEntry,
    ) -> SyncResult<CycleOutcome> {
        let endpoint = self.endpoint.clone();
        let template = endpoint.archive_template();
        let target = template.render(self.clock.now(), entry.parent(), entry.name());

        let content = session
            .fetch(&entry.path)
            .await
            .map_err(|e| SyncError::Processing(format!("fetch {}: {}", entry.path, e)))?;

        // Archival marks the file consumed; nothing downstream runs without it.
        session.rename(&entry.path, &target).await.map_err(|e| {
            SyncError::Processing(format!("archive {} -> {}: {}", entry.path, target, e))
        })?;
        info!(file = %entry.path, archived = %target, bytes = content.len(), "File archived");

        if content.is_empty() {
            debug!(file = %entry.path, "Empty body, nothing to store");
            return Ok(self.no_file());
        }

        let (archived_parent, archived_name) = split_parent(&target);
        let original_name = original_file_name(archived_name).to_string();
        let content_type = content_type_for(&original_name);
        let relative_path = if endpoint.recursive() {
            Some(template.relative_parent(archived_parent, endpoint.input_folder()))
                .filter(|path| !path.is_empty())
        } else {
            None
        };

        let normalized = match &self.collaborators.normalizer {
            Some(normalizer) => match normalizer.normalize(&content, &content_type) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(file = %original_name, ?e, "Content normalization failed, storing raw file");
                    None
                }
            },
            None => None,
        };

        let storage_file_id = self
            .collaborators
            .store
            .put(&original_name, content, &content_type)
            .await
            .map_err(|e| SyncError::Processing(format!("store {}: {}", original_name, e)))?;

        let record = FileRecord {
            original_name,
            content_type,
            relative_path,
            storage_file_id,
        };

        self.idle.reset();
        let event = record.to_event(normalized);
        self.collaborators.sink.emit_new_file(&event);
        self.stats.files_ingested.fetch_add(1, Ordering::Relaxed);

        info!(
            file_id = %record.storage_file_id,
            name = %record.original_name,
            path = ?record.relative_path,
            "New file ingested"
        );

        Ok(CycleOutcome::Ingested { record, event })
    }
}

/// MIME type guessed from a file name.
///
/// The name is the only source. FTP listings carry no content type and the
/// transport layer does not report one for SFTP either, so every protocol
/// gets the same extension-based answer; unknown extensions map to
/// `application/octet-stream`.
pub fn content_type_for(name: &str) -> String {
    mime_guess::from_path(name)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

// =============================================================================
// Tests
// =============================================================================
