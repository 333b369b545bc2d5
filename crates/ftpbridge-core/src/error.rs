//! # Error Types
//!
//! Domain-specific error types for ftpbridge-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  ftpbridge-core errors (this file)                                     │
//! │  ├── ConfigError  - Rejected endpoint configuration                    │
//! │  └── CoreError    - Config + invalid upload job transitions            │
//! │                                                                         │
//! │  ftpbridge-sync errors (separate crate)                                │
//! │  └── SyncError    - Sessions, pipelines, store, staging                │
//! │                                                                         │
//! │  Flow: ConfigError → CoreError → SyncError → ErrorReport → caller      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Config Error
// =============================================================================

/// Reasons an endpoint configuration is rejected at activation time.
///
/// None of these are retried: a processor is never partially activated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Input and archive folders normalize to the same value.
    ///
    /// ## When This Occurs
    /// - `"/in/"` and `"in"`
    /// - both folders blank (the remote root)
    #[error("Input and archive folders must be different [{folder}]")]
    SameFolders { folder: String },

    /// Recursive scanning with an archive folder that contains the input folder.
    #[error(
        "When the recursive option is enabled, the archive folder [{archive}] must be outside of the input folder [{input}]"
    )]
    ArchiveInsideInput { input: String, archive: String },

    /// No host configured.
    #[error("host is required")]
    MissingHost,

    /// SFTP has no anonymous login.
    #[error("{protocol} requires a username")]
    MissingUsername { protocol: String },

    /// A file pattern that cannot be compiled into a matcher.
    #[error("Invalid file pattern [{pattern}]: {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

// =============================================================================
// Core Error
// =============================================================================

/// Errors raised by the pure rules in this crate.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Configuration rejected.
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// A caller-supplied argument is unusable (blank file id).
    #[error("{message}")]
    Argument { message: String },

    /// The requested file is missing or empty.
    #[error("{message}")]
    Client { message: String },

    /// An upload job was driven through a transition its state does not allow.
    #[error("Upload job cannot move from {from} to {to}")]
    InvalidTransition { from: String, to: String },
}

impl CoreError {
    /// Creates an argument error.
    pub fn argument(message: impl Into<String>) -> Self {
        CoreError::Argument {
            message: message.into(),
        }
    }

    /// Creates a client error.
    pub fn client(message: impl Into<String>) -> Self {
        CoreError::Client {
            message: message.into(),
        }
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;
