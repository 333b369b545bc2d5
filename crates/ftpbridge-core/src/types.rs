//! # Bridge Types
//!
//! Records and events exchanged between the pipelines and the application.
//!
//! ## Serialization
//! Event payloads use camelCase field names (`fileId`, `filePath`) to match
//! what downstream consumers expect.

use serde::{Deserialize, Serialize};

// =============================================================================
// File Record
// =============================================================================

/// One ingested file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    /// Name before the archive timestamp prefix was applied.
    pub original_name: String,

    /// MIME type reported by the transport or guessed from the extension.
    pub content_type: String,

    /// Parent folder below the input folder; recursive scans only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relative_path: Option<String>,

    /// Identifier assigned by the store.
    pub storage_file_id: String,
}

impl FileRecord {
    /// Builds the event announcing this record.
    pub fn to_event(&self, content: Option<serde_json::Value>) -> NewFileEvent {
        NewFileEvent {
            file_id: self.storage_file_id.clone(),
            file_path: self
                .relative_path
                .clone()
                .filter(|path| !path.is_empty()),
            content,
        }
    }
}

// =============================================================================
// New File Event
// =============================================================================

/// Emitted once per successfully ingested file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFileEvent {
    pub file_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,

    /// Normalized content, when a content normalizer is installed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<serde_json::Value>,
}

// =============================================================================
// Error Report
// =============================================================================

/// Error kind a caller can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCode {
    Argument,
    Client,
    Connection,
    Upload,
    Processing,
    General,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Argument => "argument",
            ErrorCode::Client => "client",
            ErrorCode::Connection => "connection",
            ErrorCode::Upload => "upload",
            ErrorCode::Processing => "processing",
            ErrorCode::General => "general",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured failure surfaced to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorReport {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl std::fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flat_event_has_no_file_path() {
        let record = FileRecord {
            original_name: "report.csv".to_string(),
            content_type: "text/csv".to_string(),
            relative_path: None,
            storage_file_id: "f-1".to_string(),
        };
        let json = serde_json::to_value(record.to_event(None)).unwrap();
        assert_eq!(json, json!({ "fileId": "f-1" }));
    }

    #[test]
    fn test_empty_relative_path_is_omitted() {
        let record = FileRecord {
            original_name: "a.txt".to_string(),
            content_type: "text/plain".to_string(),
            relative_path: Some(String::new()),
            storage_file_id: "f-2".to_string(),
        };
        assert_eq!(record.to_event(None).file_path, None);

        let record = FileRecord {
            relative_path: Some("sub".to_string()),
            ..record
        };
        let json = serde_json::to_value(record.to_event(None)).unwrap();
        assert_eq!(json, json!({ "fileId": "f-2", "filePath": "sub" }));
    }

    #[test]
    fn test_error_report_serialization() {
        let report = ErrorReport::new(ErrorCode::Client, "File not found")
            .with_details(json!({ "fileId": "x" }));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["code"], "client");
        assert_eq!(json["details"]["fileId"], "x");
        assert_eq!(report.to_string(), "[client] File not found");
    }
}
