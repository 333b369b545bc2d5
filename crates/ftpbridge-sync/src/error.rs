//! # Sync Error Types
//!
//! Error types for transfer operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Transfer Error Categories                           │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Transport     │  │     Send request        │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  Config         │  │  Connection     │  │  Argument               │ │
//! │  │  SettingsLoad   │  │  Timeout        │  │  Client                 │ │
//! │  │                 │  │  Remote         │  │  TransientUpload        │ │
//! │  │                 │  │                 │  │  UploadExhausted        │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │    Polling      │  │     Local       │  │      Lifecycle          │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  Processing     │  │  Io             │  │  NotStarted             │ │
//! │  │  Store          │  │                 │  │  ShuttingDown           │ │
//! │  │                 │  │                 │  │  Internal               │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  Every variant maps to an ErrorReport { code, message, details }.      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde_json::json;
use thiserror::Error;

use ftpbridge_core::{ConfigError, CoreError, ErrorCode, ErrorReport};

/// Result type alias for transfer operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Error type covering every failure of the transfer engine.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Endpoint configuration rejected at activation.
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Settings file could not be read or parsed.
    #[error("Failed to load settings: {0}")]
    SettingsLoad(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// Session could not be established or was lost.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Operation exceeded its deadline.
    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    /// A remote command failed on an established session.
    #[error("Remote operation failed: {0}")]
    Remote(String),

    // =========================================================================
    // Send Request Errors
    // =========================================================================
    /// Unusable caller argument.
    #[error("{0}")]
    Argument(String),

    /// Missing, empty or unreadable file in a send request.
    #[error("{0}")]
    Client(String),

    /// One upload attempt failed.
    #[error("Upload attempt failed: {0}")]
    TransientUpload(String),

    /// The attempt budget is spent.
    #[error("Upload failed after {attempts} attempts: {}", last.message)]
    UploadExhausted { attempts: u32, last: ErrorReport },

    // =========================================================================
    // Polling Errors
    // =========================================================================
    /// Archival or storage failure while ingesting a file.
    #[error("Processing failed: {0}")]
    Processing(String),

    /// Store collaborator failure.
    #[error("Store error: {0}")]
    Store(String),

    // =========================================================================
    // Local Errors
    // =========================================================================
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // =========================================================================
    // Lifecycle Errors
    // =========================================================================
    /// No processor is active.
    #[error("Processor is not started")]
    NotStarted,

    /// Processor is shutting down.
    #[error("Processor is shutting down")]
    ShuttingDown,

    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<CoreError> for SyncError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Config(config) => SyncError::Config(config),
            CoreError::Argument { message } => SyncError::Argument(message),
            CoreError::Client { message } => SyncError::Client(message),
            other @ CoreError::InvalidTransition { .. } => SyncError::Internal(other.to_string()),
        }
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::SettingsLoad(err.to_string())
    }
}

impl From<ssh2::Error> for SyncError {
    fn from(err: ssh2::Error) -> Self {
        match err.code() {
            ssh2::ErrorCode::Session(_) => SyncError::Connection(err.to_string()),
            ssh2::ErrorCode::SFTP(_) => SyncError::Remote(err.to_string()),
        }
    }
}

impl From<suppaftp::FtpError> for SyncError {
    fn from(err: suppaftp::FtpError) -> Self {
        use suppaftp::FtpError;
        match err {
            FtpError::ConnectionError(io) => SyncError::Connection(io.to_string()),
            tls @ FtpError::SecureError(_) => SyncError::Connection(tls.to_string()),
            other => SyncError::Remote(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(err: tokio::task::JoinError) -> Self {
        SyncError::Internal(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// Returns true if the operation can be retried.
    ///
    /// ## Retryable Errors
    /// - Connection failures (network issues)
    /// - Timeouts
    /// - Failed upload attempts
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Connection(_) | SyncError::Timeout(_) | SyncError::TransientUpload(_)
        )
    }

    /// Returns true if this error prevents activation.
    pub fn is_config_error(&self) -> bool {
        matches!(self, SyncError::Config(_) | SyncError::SettingsLoad(_))
    }

    /// Code a caller can branch on.
    pub fn code(&self) -> ErrorCode {
        match self {
            SyncError::Argument(_) => ErrorCode::Argument,
            SyncError::Client(_) => ErrorCode::Client,
            SyncError::Connection(_) | SyncError::Timeout(_) => ErrorCode::Connection,
            SyncError::TransientUpload(_) | SyncError::UploadExhausted { .. } => ErrorCode::Upload,
            SyncError::Processing(_) | SyncError::Store(_) => ErrorCode::Processing,
            _ => ErrorCode::General,
        }
    }

    /// Structured form of this error.
    pub fn to_report(&self) -> ErrorReport {
        match self {
            SyncError::UploadExhausted { attempts, last } => {
                ErrorReport::new(ErrorCode::Upload, self.to_string()).with_details(json!({
                    "attempts": attempts,
                    "lastError": last,
                }))
            }
            SyncError::Config(config) => ErrorReport::new(self.code(), self.to_string())
                .with_details(json!({ "kind": "config", "reason": config.to_string() })),
            other => ErrorReport::new(other.code(), other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::Connection("refused".into()).is_retryable());
        assert!(SyncError::Timeout(600).is_retryable());
        assert!(SyncError::TransientUpload("550".into()).is_retryable());

        assert!(!SyncError::Client("File not found".into()).is_retryable());
        assert!(!SyncError::Config(ConfigError::MissingHost).is_retryable());
        assert!(!SyncError::Processing("rename".into()).is_retryable());
    }

    #[test]
    fn test_config_errors() {
        assert!(SyncError::Config(ConfigError::MissingHost).is_config_error());
        assert!(SyncError::SettingsLoad("bad toml".into()).is_config_error());
        assert!(!SyncError::NotStarted.is_config_error());
    }

    #[test]
    fn test_report_codes() {
        assert_eq!(SyncError::Argument("Empty file id".into()).code(), ErrorCode::Argument);
        assert_eq!(SyncError::Client("missing".into()).code(), ErrorCode::Client);
        assert_eq!(SyncError::Timeout(1).code(), ErrorCode::Connection);
        assert_eq!(SyncError::Store("down".into()).code(), ErrorCode::Processing);
        assert_eq!(SyncError::NotStarted.code(), ErrorCode::General);
    }

    #[test]
    fn test_exhausted_report_carries_last_error() {
        let last = ErrorReport::new(ErrorCode::Upload, "third failure");
        let err = SyncError::UploadExhausted { attempts: 3, last };
        let report = err.to_report();

        assert_eq!(report.code, ErrorCode::Upload);
        let details = report.details.unwrap();
        assert_eq!(details["attempts"], 3);
        assert_eq!(details["lastError"]["message"], "third failure");
    }

    #[test]
    fn test_core_error_conversion() {
        let err: SyncError = CoreError::client("File not found").into();
        assert!(matches!(err, SyncError::Client(_)));

        let err: SyncError = CoreError::InvalidTransition {
            from: "created".into(),
            to: "uploaded".into(),
        }
        .into();
        assert!(matches!(err, SyncError::Internal(_)));
    }
}
