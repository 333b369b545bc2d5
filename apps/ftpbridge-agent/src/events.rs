//! JSON-lines event log.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use ftpbridge_core::NewFileEvent;
use ftpbridge_sync::EventSink;

/// Appends one `{"event": "newFile", ...}` line per ingested file.
pub struct JsonLinesSink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonLinesSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn append(&self, line: &str) -> std::io::Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{}", line)
    }
}

impl EventSink for JsonLinesSink {
    fn emit_new_file(&self, event: &NewFileEvent) {
        let line = json!({
            "event": "newFile",
            "at": Utc::now().to_rfc3339(),
            "data": event,
        })
        .to_string();

        match self.append(&line) {
            Ok(()) => info!(file_id = %event.file_id, path = ?event.file_path, "NewFile event"),
            Err(e) => warn!(path = ?self.path, error = %e, "Failed to write event"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_append_as_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/events.jsonl");
        let sink = JsonLinesSink::new(&path);

        sink.emit_new_file(&NewFileEvent {
            file_id: "a".into(),
            file_path: None,
            content: None,
        });
        sink.emit_new_file(&NewFileEvent {
            file_id: "b".into(),
            file_path: Some("north".into()),
            content: None,
        });

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "newFile");
        assert_eq!(lines[0]["data"]["fileId"], "a");
        assert!(lines[0]["data"].get("filePath").is_none());
        assert_eq!(lines[1]["data"]["filePath"], "north");
    }
}
