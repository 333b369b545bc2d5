//! # In-Memory Test Doubles
//!
//! A scriptable remote server, store, event sink and clock used by the
//! pipeline and processor test suites. Compiled for tests and behind the
//! `testing` feature.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;

use ftpbridge_core::path::split_parent;
use ftpbridge_core::{NewFileEvent, Protocol};

use crate::collaborators::{EventSink, Store, StoreStream, StoredFileMetadata};
use crate::error::{SyncError, SyncResult};
use crate::poll::Clock;
use crate::transport::{Connector, RemoteEntry, RemoteSession};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// =============================================================================
// Memory Remote
// =============================================================================

#[derive(Debug, Clone)]
struct MemoryFile {
    content: Vec<u8>,
    modified: i64,
}

#[derive(Debug, Default)]
struct RemoteState {
    files: BTreeMap<String, MemoryFile>,
    dirs: BTreeSet<String>,
    /// Remaining stats that append a byte, per path.
    growing: HashMap<String, u32>,
    fail_connects: u32,
    connect_calls: u32,
    fail_puts: u32,
    hang_puts: u32,
    put_calls: u32,
    fail_renames: bool,
    closed_sessions: u32,
}

/// Shared, scriptable remote file system.
#[derive(Debug, Clone, Default)]
pub struct MemoryRemote {
    state: Arc<Mutex<RemoteState>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&self, path: &str, content: &[u8]) {
        self.add_file_at(path, content, 1_700_000_000);
    }

    pub fn add_file_at(&self, path: &str, content: &[u8], modified: i64) {
        lock(&self.state).files.insert(
            path.to_string(),
            MemoryFile {
                content: content.to_vec(),
                modified,
            },
        );
    }

    pub fn add_dir(&self, path: &str) {
        lock(&self.state).dirs.insert(path.to_string());
    }

    /// The next `stats` stat calls on `path` see the file grow by one byte.
    pub fn grow_on_stat(&self, path: &str, stats: u32) {
        lock(&self.state).growing.insert(path.to_string(), stats);
    }

    pub fn fail_next_connects(&self, count: u32) {
        lock(&self.state).fail_connects = count;
    }

    pub fn fail_next_puts(&self, count: u32) {
        lock(&self.state).fail_puts = count;
    }

    /// The next `count` puts stall until the session's transfer timeout.
    pub fn hang_next_puts(&self, count: u32) {
        lock(&self.state).hang_puts = count;
    }

    pub fn fail_renames(&self, fail: bool) {
        lock(&self.state).fail_renames = fail;
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        lock(&self.state).files.get(path).map(|f| f.content.clone())
    }

    pub fn exists(&self, path: &str) -> bool {
        lock(&self.state).files.contains_key(path)
    }

    pub fn paths(&self) -> Vec<String> {
        lock(&self.state).files.keys().cloned().collect()
    }

    pub fn connect_calls(&self) -> u32 {
        lock(&self.state).connect_calls
    }

    pub fn put_calls(&self) -> u32 {
        lock(&self.state).put_calls
    }

    pub fn closed_sessions(&self) -> u32 {
        lock(&self.state).closed_sessions
    }

    fn all_dirs(state: &RemoteState) -> BTreeSet<String> {
        let mut dirs = state.dirs.clone();
        for path in state.files.keys() {
            let mut parent = split_parent(path).0;
            while !parent.is_empty() {
                dirs.insert(parent.to_string());
                parent = split_parent(parent).0;
            }
        }
        dirs
    }
}

/// Session over a [`MemoryRemote`].
pub struct MemorySession {
    remote: MemoryRemote,
    transfer_timeout: Option<Duration>,
}

fn is_below(path: &str, dir: &str, recursive: bool) -> bool {
    let parent = split_parent(path).0;
    if recursive {
        dir.is_empty() || parent == dir || parent.starts_with(&format!("{}/", dir))
    } else {
        parent == dir
    }
}

#[async_trait]
impl RemoteSession for MemorySession {
    async fn list(&mut self, dir: &str, recursive: bool) -> SyncResult<Vec<RemoteEntry>> {
        let state = lock(&self.remote.state);
        let mut entries: Vec<RemoteEntry> = MemoryRemote::all_dirs(&state)
            .into_iter()
            .filter(|d| is_below(d, dir, recursive))
            .map(|path| RemoteEntry {
                path,
                size: 0,
                modified: None,
                is_dir: true,
            })
            .collect();

        entries.extend(
            state
                .files
                .iter()
                .filter(|(path, _)| is_below(path, dir, recursive))
                .map(|(path, file)| RemoteEntry {
                    path: path.clone(),
                    size: file.content.len() as u64,
                    modified: Some(file.modified),
                    is_dir: false,
                }),
        );

        Ok(entries)
    }

    async fn stat(&mut self, path: &str) -> SyncResult<Option<RemoteEntry>> {
        let mut state = lock(&self.remote.state);
        let grow = match state.growing.get_mut(path) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        };

        Ok(state.files.get_mut(path).map(|file| {
            if grow {
                file.content.push(b'+');
            }
            RemoteEntry {
                path: path.to_string(),
                size: file.content.len() as u64,
                modified: Some(file.modified),
                is_dir: false,
            }
        }))
    }

    async fn fetch(&mut self, path: &str) -> SyncResult<Vec<u8>> {
        lock(&self.remote.state)
            .files
            .get(path)
            .map(|f| f.content.clone())
            .ok_or_else(|| SyncError::Remote(format!("550 {}: no such file", path)))
    }

    async fn rename(&mut self, from: &str, to: &str) -> SyncResult<()> {
        let mut state = lock(&self.remote.state);
        if state.fail_renames {
            return Err(SyncError::Remote(format!("553 cannot rename {}", from)));
        }
        let file = state
            .files
            .remove(from)
            .ok_or_else(|| SyncError::Remote(format!("550 {}: no such file", from)))?;
        state.files.insert(to.to_string(), file);
        Ok(())
    }

    async fn put(&mut self, remote_path: &str, local_path: &Path) -> SyncResult<()> {
        let hang = {
            let mut state = lock(&self.remote.state);
            state.put_calls += 1;
            if state.fail_puts > 0 {
                state.fail_puts -= 1;
                return Err(SyncError::Remote(format!("451 transfer aborted: {}", remote_path)));
            }
            if state.hang_puts > 0 {
                state.hang_puts -= 1;
                true
            } else {
                false
            }
        };
        if hang {
            match self.transfer_timeout {
                Some(timeout) => {
                    tokio::time::sleep(timeout).await;
                    return Err(SyncError::Timeout(timeout.as_secs()));
                }
                None => std::future::pending::<()>().await,
            }
        }

        // Synchronous read keeps paused-clock tests from auto-advancing mid-put.
        let content = std::fs::read(local_path)?;
        lock(&self.remote.state).files.insert(
            remote_path.to_string(),
            MemoryFile {
                content,
                modified: 1_700_000_000,
            },
        );
        Ok(())
    }

    fn set_transfer_timeout(&mut self, timeout: Duration) {
        self.transfer_timeout = Some(timeout);
    }

    async fn close(self: Box<Self>) -> SyncResult<()> {
        lock(&self.remote.state).closed_sessions += 1;
        Ok(())
    }
}

/// Connector handing out [`MemorySession`]s.
pub struct MemoryConnector {
    remote: MemoryRemote,
}

impl MemoryConnector {
    pub fn new(remote: MemoryRemote) -> Self {
        Self { remote }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    fn protocol(&self) -> Protocol {
        Protocol::Ftp
    }

    async fn connect(&self) -> SyncResult<Box<dyn RemoteSession>> {
        let mut state = lock(&self.remote.state);
        state.connect_calls += 1;
        if state.fail_connects > 0 {
            state.fail_connects -= 1;
            return Err(SyncError::Connection("530 login incorrect".into()));
        }
        Ok(Box::new(MemorySession {
            remote: self.remote.clone(),
            transfer_timeout: None,
        }))
    }
}

// =============================================================================
// Memory Store
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub name: String,
    pub content: Vec<u8>,
    pub content_type: String,
}

/// Store keeping everything in a map.
#[derive(Default)]
pub struct MemoryStore {
    files: Mutex<BTreeMap<String, StoredFile>>,
    next_id: AtomicU32,
    fail_puts: AtomicBool,
    fail_metadata: AtomicBool,
    get_calls: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, file_id: &str, name: &str, content: &[u8]) {
        lock(&self.files).insert(
            file_id.to_string(),
            StoredFile {
                name: name.to_string(),
                content: content.to_vec(),
                content_type: "application/octet-stream".to_string(),
            },
        );
    }

    pub fn stored(&self, file_id: &str) -> Option<StoredFile> {
        lock(&self.files).get(file_id).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.files).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_metadata(&self, fail: bool) {
        self.fail_metadata.store(fail, Ordering::SeqCst);
    }

    pub fn get_calls(&self) -> u32 {
        self.get_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn put(&self, name: &str, content: Vec<u8>, content_type: &str) -> SyncResult<String> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(SyncError::Store("store unavailable".into()));
        }
        let id = format!("file-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        lock(&self.files).insert(
            id.clone(),
            StoredFile {
                name: name.to_string(),
                content,
                content_type: content_type.to_string(),
            },
        );
        Ok(id)
    }

    async fn get(&self, file_id: &str) -> SyncResult<Option<StoreStream>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        Ok(lock(&self.files)
            .get(file_id)
            .map(|f| Box::new(Cursor::new(f.content.clone())) as StoreStream))
    }

    async fn metadata(&self, file_id: &str) -> SyncResult<Option<StoredFileMetadata>> {
        if self.fail_metadata.load(Ordering::SeqCst) {
            return Err(SyncError::Store("metadata service unavailable".into()));
        }
        Ok(lock(&self.files).get(file_id).map(|f| StoredFileMetadata {
            file_name: Some(f.name.clone()),
            content_type: Some(f.content_type.clone()),
            size: Some(f.content.len() as u64),
        }))
    }
}

// =============================================================================
// Recording Sink
// =============================================================================

/// Sink that keeps every event.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<NewFileEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<NewFileEvent> {
        lock(&self.events).clone()
    }
}

impl EventSink for RecordingSink {
    fn emit_new_file(&self, event: &NewFileEvent) {
        lock(&self.events).push(event.clone());
    }
}

// =============================================================================
// Fixed Clock
// =============================================================================

/// Clock that always reports the same instant.
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}
