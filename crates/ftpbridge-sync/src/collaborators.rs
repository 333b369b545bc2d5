//! # External Collaborators
//!
//! Interfaces the transfer engine calls out to: application storage, content
//! normalization, and the new-file event sink.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   PollPipeline ──put──► Store ◄──get/metadata── UploadPipeline         │
//! │        │                                                                │
//! │        ├──normalize──► ContentNormalizer (optional)                    │
//! │        │                                                                │
//! │        └──NewFile────► EventSink                                       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::AsyncRead;

use ftpbridge_core::NewFileEvent;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Store
// =============================================================================

/// Readable content handed out by a [`Store`].
pub type StoreStream = Box<dyn AsyncRead + Send + Unpin>;

/// Metadata the store keeps about a file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFileMetadata {
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

/// Application storage, addressed by file identifier.
#[async_trait]
pub trait Store: Send + Sync {
    /// Stores content and returns its new identifier.
    async fn put(&self, name: &str, content: Vec<u8>, content_type: &str) -> SyncResult<String>;

    /// Opens stored content; `None` when the identifier is unknown.
    async fn get(&self, file_id: &str) -> SyncResult<Option<StoreStream>>;

    /// Looks up metadata; `None` when the identifier is unknown.
    async fn metadata(&self, file_id: &str) -> SyncResult<Option<StoredFileMetadata>>;
}

// =============================================================================
// Content Normalizer
// =============================================================================

/// Reshapes raw content into a structured record before it is announced.
pub trait ContentNormalizer: Send + Sync {
    fn normalize(&self, content: &[u8], content_type: &str) -> SyncResult<Value>;
}

/// JSON is parsed, text is wrapped, anything else is described by type and size.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultNormalizer;

impl ContentNormalizer for DefaultNormalizer {
    fn normalize(&self, content: &[u8], content_type: &str) -> SyncResult<Value> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_lowercase();

        if essence == "application/json" || essence.ends_with("+json") {
            return serde_json::from_slice(content)
                .map_err(|e| SyncError::Processing(format!("invalid JSON content: {}", e)));
        }

        if essence.starts_with("text/") {
            return Ok(json!({ "text": String::from_utf8_lossy(content) }));
        }

        Ok(json!({
            "contentType": content_type,
            "size": content.len(),
        }))
    }
}

// =============================================================================
// Event Sink
// =============================================================================

/// Receives one event per ingested file.
pub trait EventSink: Send + Sync {
    fn emit_new_file(&self, event: &NewFileEvent);
}

/// Sink that drops every event.
pub struct NoOpSink;

impl EventSink for NoOpSink {
    fn emit_new_file(&self, _event: &NewFileEvent) {}
}

// =============================================================================
// Collaborator Bundle
// =============================================================================

/// Everything a processor needs from the host application.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn Store>,
    pub normalizer: Option<Arc<dyn ContentNormalizer>>,
    pub sink: Arc<dyn EventSink>,
}

impl Collaborators {
    pub fn new(store: Arc<dyn Store>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            store,
            normalizer: None,
            sink,
        }
    }

    pub fn with_normalizer(mut self, normalizer: Arc<dyn ContentNormalizer>) -> Self {
        self.normalizer = Some(normalizer);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_normalizer_json() {
        let value = DefaultNormalizer
            .normalize(br#"{"total": 12}"#, "application/json; charset=utf-8")
            .unwrap();
        assert_eq!(value["total"], 12);

        assert!(DefaultNormalizer
            .normalize(b"{not json", "application/json")
            .is_err());
    }

    #[test]
    fn test_default_normalizer_text() {
        let value = DefaultNormalizer.normalize(b"a,b\n1,2", "text/csv").unwrap();
        assert_eq!(value["text"], "a,b\n1,2");
    }

    #[test]
    fn test_default_normalizer_binary() {
        let value = DefaultNormalizer
            .normalize(&[0u8; 8], "application/pdf")
            .unwrap();
        assert_eq!(value["contentType"], "application/pdf");
        assert_eq!(value["size"], 8);
    }
}
