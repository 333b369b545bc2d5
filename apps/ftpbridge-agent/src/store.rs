//! # Local File Store
//!
//! Directory-backed [`Store`]: every file is a blob plus a JSON sidecar.
//!
//! ```text
//! <data_dir>/files/
//!   ├── 6f1c…e2.bin     content
//!   └── 6f1c…e2.json    { "fileName", "contentType", "size", "storedAt" }
//! ```

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use ftpbridge_sync::{Store, StoreStream, StoredFileMetadata, SyncError, SyncResult};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Sidecar {
    #[serde(flatten)]
    metadata: StoredFileMetadata,
    stored_at: DateTime<Utc>,
}

pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Opens (and creates) the store directory.
    pub fn open(root: impl Into<PathBuf>) -> SyncResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ids are generated here; anything else cannot name a stored file.
    fn is_valid_id(file_id: &str) -> bool {
        Uuid::parse_str(file_id).is_ok()
    }

    fn blob_path(&self, file_id: &str) -> PathBuf {
        self.root.join(format!("{}.bin", file_id))
    }

    fn sidecar_path(&self, file_id: &str) -> PathBuf {
        self.root.join(format!("{}.json", file_id))
    }
}

#[async_trait]
impl Store for LocalStore {
    async fn put(&self, name: &str, content: Vec<u8>, content_type: &str) -> SyncResult<String> {
        let file_id = Uuid::new_v4().to_string();
        let sidecar = Sidecar {
            metadata: StoredFileMetadata {
                file_name: Some(name.to_string()),
                content_type: Some(content_type.to_string()),
                size: Some(content.len() as u64),
            },
            stored_at: Utc::now(),
        };
        let json = serde_json::to_vec_pretty(&sidecar)
            .map_err(|e| SyncError::Store(format!("metadata for {}: {}", name, e)))?;

        tokio::fs::write(self.blob_path(&file_id), content).await?;
        tokio::fs::write(self.sidecar_path(&file_id), json).await?;

        debug!(file_id = %file_id, name, "Stored file");
        Ok(file_id)
    }

    async fn get(&self, file_id: &str) -> SyncResult<Option<StoreStream>> {
        if !Self::is_valid_id(file_id) {
            return Ok(None);
        }
        match tokio::fs::File::open(self.blob_path(file_id)).await {
            Ok(file) => Ok(Some(Box::new(file))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn metadata(&self, file_id: &str) -> SyncResult<Option<StoredFileMetadata>> {
        if !Self::is_valid_id(file_id) {
            return Ok(None);
        }
        let raw = match tokio::fs::read(self.sidecar_path(file_id)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let sidecar: Sidecar = serde_json::from_slice(&raw)
            .map_err(|e| SyncError::Store(format!("metadata for {}: {}", file_id, e)))?;
        Ok(Some(sidecar.metadata))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_put_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(dir.path().join("files")).unwrap();

        let id = store.put("report.csv", b"a,b".to_vec(), "text/csv").await.unwrap();

        let mut content = Vec::new();
        store
            .get(&id)
            .await
            .unwrap()
            .unwrap()
            .read_to_end(&mut content)
            .await
            .unwrap();
        assert_eq!(content, b"a,b");

        let metadata = store.metadata(&id).await.unwrap().unwrap();
        assert_eq!(metadata.file_name.as_deref(), Some("report.csv"));
        assert_eq!(metadata.content_type.as_deref(), Some("text/csv"));
        assert_eq!(metadata.size, Some(3));
    }

    #[tokio::test]
    async fn test_unknown_and_foreign_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(dir.path()).unwrap();

        assert!(store.get(&Uuid::new_v4().to_string()).await.unwrap().is_none());
        assert!(store.get("../etc/passwd").await.unwrap().is_none());
        assert!(store.metadata("nope").await.unwrap().is_none());
    }
}
