//! # Transport Layer
//!
//! Remote sessions over FTP, FTPS and SFTP behind one interface, plus the
//! fixed reconnection policy every session is opened with.
//!
//! ## Session Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  connect_with_retry(connector, policy)                                 │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  ┌────────────┐  error   ┌────────────┐  delay   ┌────────────┐        │
//! │  │ Connecting │─────────►│  Backoff   │─────────►│ Connecting │ ...    │
//! │  └─────┬──────┘          └────────────┘          └────────────┘        │
//! │        │ ok                      (1 + max_reconnects attempts)          │
//! │        ▼                                                                │
//! │  ┌────────────┐                                                         │
//! │  │  Session   │  list / stat / fetch / rename / put                    │
//! │  └─────┬──────┘                                                         │
//! │        │ close (end of poll cycle or upload attempt)                   │
//! │        ▼                                                                │
//! │  Disconnected                                                           │
//! │                                                                         │
//! │  RECONNECT POLICY (Constant)                                           │
//! │  ─────────────────────────────                                         │
//! │  Delay: 10s between attempts                                           │
//! │  Attempts: 10 reconnects after the first failure                       │
//! │  Each connect bounded by connect_timeout                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Both protocol libraries are blocking; [`Blocking`] runs each call on the
//! blocking thread pool and hands the session back afterwards. A blocking
//! call cannot be cancelled from the async side, so transfer deadlines are
//! enforced inside the blocking call itself (socket timeouts plus a reader
//! that stops feeding data once the deadline has passed).

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use backoff::backoff::{Backoff, Constant};
use tracing::{debug, info, warn};

use ftpbridge_core::path::{join_segments, split_parent};
use ftpbridge_core::{EndpointConfig, Protocol, TrustPolicy};

use crate::error::{SyncError, SyncResult};
use crate::settings::BridgeSettings;

pub mod ftp;
pub mod sftp;

pub use ftp::FtpConnector;
pub use sftp::SftpConnector;

// =============================================================================
// Remote Entries
// =============================================================================

/// One file or directory on the remote side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Path relative to the session's home directory, without leading `/`.
    pub path: String,
    pub size: u64,
    /// Modification time as a Unix timestamp, when the server reports one.
    pub modified: Option<i64>,
    pub is_dir: bool,
}

impl RemoteEntry {
    pub fn name(&self) -> &str {
        split_parent(&self.path).1
    }

    pub fn parent(&self) -> &str {
        split_parent(&self.path).0
    }
}

/// Directory argument for protocol calls; the home directory is `.`.
pub(crate) fn dir_arg(dir: &str) -> &str {
    if dir.is_empty() {
        "."
    } else {
        dir
    }
}

// =============================================================================
// Session Traits
// =============================================================================

/// An open remote session.
#[async_trait]
pub trait RemoteSession: Send {
    /// Lists a directory; descends into sub-directories when `recursive`.
    async fn list(&mut self, dir: &str, recursive: bool) -> SyncResult<Vec<RemoteEntry>>;

    /// Current size and mtime of a path; `None` when it no longer exists.
    async fn stat(&mut self, path: &str) -> SyncResult<Option<RemoteEntry>>;

    async fn fetch(&mut self, path: &str) -> SyncResult<Vec<u8>>;

    /// Moves a file, creating the destination's parent directories.
    async fn rename(&mut self, from: &str, to: &str) -> SyncResult<()>;

    /// Uploads a local file, creating the destination's parent directories.
    async fn put(&mut self, remote_path: &str, local_path: &Path) -> SyncResult<()>;

    /// Bounds the following transfers. A put still running when `timeout`
    /// elapses fails on its own instead of continuing unobserved.
    fn set_transfer_timeout(&mut self, timeout: Duration);

    async fn close(self: Box<Self>) -> SyncResult<()>;
}

/// Opens sessions to one endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    fn protocol(&self) -> Protocol;

    async fn connect(&self) -> SyncResult<Box<dyn RemoteSession>>;
}

// =============================================================================
// Blocking Sessions
// =============================================================================

/// Synchronous session API implemented by the protocol adapters.
pub trait BlockingSession: Send + 'static {
    /// Lists one directory level.
    fn list_dir(&mut self, dir: &str) -> SyncResult<Vec<RemoteEntry>>;

    fn fetch(&mut self, path: &str) -> SyncResult<Vec<u8>>;

    fn rename(&mut self, from: &str, to: &str) -> SyncResult<()>;

    /// Streams `source` to `remote_path`, returning the bytes written.
    fn put(&mut self, remote_path: &str, source: &mut dyn Read) -> SyncResult<u64>;

    /// Applies a read/write timeout to the underlying connection.
    fn set_io_timeout(&mut self, _timeout: Duration) -> SyncResult<()> {
        Ok(())
    }

    /// Creates one directory; existing directories are not an error.
    fn mkdir(&mut self, dir: &str) -> SyncResult<()>;

    fn close(self) -> SyncResult<()>
    where
        Self: Sized;

    fn list(&mut self, dir: &str, recursive: bool) -> SyncResult<Vec<RemoteEntry>> {
        let mut entries = Vec::new();
        let mut pending = vec![dir.to_string()];

        while let Some(current) = pending.pop() {
            for entry in self.list_dir(&current)? {
                if recursive && entry.is_dir {
                    pending.push(entry.path.clone());
                }
                entries.push(entry);
            }
        }

        Ok(entries)
    }

    fn stat(&mut self, path: &str) -> SyncResult<Option<RemoteEntry>> {
        let (parent, _) = split_parent(path);
        Ok(self
            .list_dir(parent)?
            .into_iter()
            .find(|entry| entry.path == path))
    }

    /// Creates every missing directory on the way to `dir`.
    fn mkdirs(&mut self, dir: &str) -> SyncResult<()> {
        let mut current = String::new();
        for segment in dir.split('/').filter(|s| !s.is_empty()) {
            current = join_segments([current.as_str(), segment]);
            self.mkdir(&current)?;
        }
        Ok(())
    }
}

/// Reader that fails with `TimedOut` once its deadline has passed.
pub(crate) struct DeadlineReader<R> {
    inner: R,
    deadline: Instant,
}

impl<R: Read> DeadlineReader<R> {
    pub(crate) fn new(inner: R, deadline: Instant) -> Self {
        Self { inner, deadline }
    }
}

impl<R: Read> Read for DeadlineReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if Instant::now() >= self.deadline {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "transfer deadline passed",
            ));
        }
        self.inner.read(buf)
    }
}

/// Runs a [`BlockingSession`] on the blocking thread pool.
pub struct Blocking<S> {
    inner: Option<S>,
    transfer_timeout: Option<Duration>,
}

impl<S: BlockingSession> Blocking<S> {
    pub fn new(session: S) -> Self {
        Self {
            inner: Some(session),
            transfer_timeout: None,
        }
    }

    async fn run<T, F>(&mut self, op: F) -> SyncResult<T>
    where
        F: FnOnce(&mut S) -> SyncResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let mut session = self
            .inner
            .take()
            .ok_or_else(|| SyncError::Connection("session is no longer usable".into()))?;

        let (session, result) = tokio::task::spawn_blocking(move || {
            let result = op(&mut session);
            (session, result)
        })
        .await?;

        self.inner = Some(session);
        result
    }
}

#[async_trait]
impl<S: BlockingSession> RemoteSession for Blocking<S> {
    async fn list(&mut self, dir: &str, recursive: bool) -> SyncResult<Vec<RemoteEntry>> {
        let dir = dir.to_string();
        self.run(move |s| s.list(&dir, recursive)).await
    }

    async fn stat(&mut self, path: &str) -> SyncResult<Option<RemoteEntry>> {
        let path = path.to_string();
        self.run(move |s| s.stat(&path)).await
    }

    async fn fetch(&mut self, path: &str) -> SyncResult<Vec<u8>> {
        let path = path.to_string();
        self.run(move |s| s.fetch(&path)).await
    }

    async fn rename(&mut self, from: &str, to: &str) -> SyncResult<()> {
        let (from, to) = (from.to_string(), to.to_string());
        self.run(move |s| {
            s.mkdirs(split_parent(&to).0)?;
            s.rename(&from, &to)
        })
        .await
    }

    async fn put(&mut self, remote_path: &str, local_path: &Path) -> SyncResult<()> {
        let remote_path = remote_path.to_string();
        let local_path: PathBuf = local_path.to_path_buf();
        let timeout = self.transfer_timeout;
        let written = self
            .run(move |s| {
                let file = std::fs::File::open(&local_path)?;
                match timeout {
                    Some(timeout) => {
                        let deadline = Instant::now() + timeout;
                        s.set_io_timeout(timeout)?;
                        s.mkdirs(split_parent(&remote_path).0)?;
                        s.put(&remote_path, &mut DeadlineReader::new(file, deadline))
                    }
                    None => {
                        s.mkdirs(split_parent(&remote_path).0)?;
                        s.put(&remote_path, &mut io::BufReader::new(file))
                    }
                }
            })
            .await?;
        debug!(bytes = written, "Transfer finished");
        Ok(())
    }

    fn set_transfer_timeout(&mut self, timeout: Duration) {
        self.transfer_timeout = Some(timeout);
    }

    async fn close(self: Box<Self>) -> SyncResult<()> {
        match self.inner {
            Some(session) => tokio::task::spawn_blocking(move || session.close()).await?,
            None => Ok(()),
        }
    }
}

// =============================================================================
// Reconnect Policy
// =============================================================================

/// Fixed-delay reconnection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Attempts after the first failed one.
    pub max_reconnects: u32,
    pub delay: Duration,
    pub connect_timeout: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_reconnects: 10,
            delay: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    pub fn from_settings(settings: &BridgeSettings) -> Self {
        Self {
            max_reconnects: settings.reconnect.max_attempts,
            delay: settings.reconnect_delay(),
            connect_timeout: settings.connect_timeout(),
        }
    }
}

/// Opens a session, retrying connection failures under `policy`.
///
/// Errors that are not retryable (configuration problems) fail immediately.
pub async fn connect_with_retry(
    connector: &dyn Connector,
    policy: &ReconnectPolicy,
) -> SyncResult<Box<dyn RemoteSession>> {
    let mut backoff = Constant::new(policy.delay);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        debug!(protocol = %connector.protocol(), attempt, "Connecting");

        let error = match tokio::time::timeout(policy.connect_timeout, connector.connect()).await {
            Ok(Ok(session)) => {
                if attempt > 1 {
                    info!(attempt, "Reconnected");
                }
                return Ok(session);
            }
            Ok(Err(e)) => e,
            Err(_) => SyncError::Timeout(policy.connect_timeout.as_secs()),
        };

        if !error.is_retryable() || attempt > policy.max_reconnects {
            return Err(error);
        }

        warn!(
            ?error,
            attempt,
            max_reconnects = policy.max_reconnects,
            "Connection failed, retrying"
        );

        if let Some(delay) = backoff.next_backoff() {
            tokio::time::sleep(delay).await;
        }
    }
}

// =============================================================================
// Connector Selection
// =============================================================================

/// Builds the connector matching the endpoint's protocol.
pub fn connector_for(endpoint: &EndpointConfig, settings: &BridgeSettings) -> Arc<dyn Connector> {
    let timeout = settings.connect_timeout();
    match endpoint.protocol() {
        Protocol::Ftp | Protocol::Ftps => {
            Arc::new(FtpConnector::new(endpoint.clone()).with_timeout(timeout))
        }
        Protocol::Sftp => Arc::new(
            SftpConnector::new(
                endpoint.clone(),
                TrustPolicy::for_endpoint(endpoint, settings.trust.persist_host_keys),
                settings.trust.known_hosts_path.clone(),
            )
            .with_timeout(timeout),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryConnector, MemoryRemote};

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy {
            max_reconnects: 2,
            delay: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_remote_entry_name_and_parent() {
        let entry = RemoteEntry {
            path: "inbox/sub/a.csv".into(),
            size: 1,
            modified: None,
            is_dir: false,
        };
        assert_eq!(entry.name(), "a.csv");
        assert_eq!(entry.parent(), "inbox/sub");
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_retries_then_succeeds() {
        let remote = MemoryRemote::new();
        remote.fail_next_connects(2);
        let connector = MemoryConnector::new(remote.clone());

        let session = connect_with_retry(&connector, &policy()).await;
        assert!(session.is_ok());
        assert_eq!(remote.connect_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_gives_up_after_policy() {
        let remote = MemoryRemote::new();
        remote.fail_next_connects(10);
        let connector = MemoryConnector::new(remote.clone());

        let result = connect_with_retry(&connector, &policy()).await;
        assert!(matches!(result, Err(SyncError::Connection(_))));
        assert_eq!(remote.connect_calls(), 3);
    }

    #[test]
    fn test_deadline_reader_stops_after_deadline() {
        let mut open = DeadlineReader::new(&b"abc"[..], Instant::now() + Duration::from_secs(60));
        let mut buf = [0u8; 8];
        assert_eq!(open.read(&mut buf).unwrap(), 3);

        let mut expired = DeadlineReader::new(&b"abc"[..], Instant::now());
        let err = expired.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn test_recursive_listing() {
        let remote = MemoryRemote::new();
        remote.add_file("inbox/a.csv", b"a");
        remote.add_file("inbox/sub/b.csv", b"b");
        let connector = MemoryConnector::new(remote.clone());
        let mut session = connector.connect().await.unwrap();

        let flat = session.list("inbox", false).await.unwrap();
        assert!(flat.iter().any(|e| e.path == "inbox/sub" && e.is_dir));
        assert!(!flat.iter().any(|e| e.path == "inbox/sub/b.csv"));

        let deep = session.list("inbox", true).await.unwrap();
        assert!(deep.iter().any(|e| e.path == "inbox/sub/b.csv"));
    }
}
