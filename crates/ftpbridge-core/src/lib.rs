//! # ftpbridge-core: Pure Transfer Rules
//!
//! This crate holds every rule of the file bridge that can be expressed
//! without touching the network or the disk.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        ftpbridge Architecture                           │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    apps/ftpbridge-agent                         │   │
//! │  │        run / send / check  ──►  ProcessorHost                   │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    ftpbridge-sync                               │   │
//! │  │   PollPipeline • UploadPipeline • FTP/FTPS/SFTP adapters        │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ ftpbridge-core (THIS CRATE) ★                   │   │
//! │  │                                                                 │   │
//! │  │   ┌──────────┐ ┌──────────┐ ┌──────────┐ ┌──────────────────┐  │   │
//! │  │   │  path    │ │ grouping │ │ endpoint │ │ trust / upload   │  │   │
//! │  │   │  rules   │ │  policy  │ │  config  │ │ job / idle       │  │   │
//! │  │   └──────────┘ └──────────┘ └──────────┘ └──────────────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO SESSIONS • PURE FUNCTIONS                         │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`path`] - Folder normalization and archive destination templates
//! - [`grouping`] - Archive date-bucketing policies
//! - [`protocol`] - Supported transfer protocols and their defaults
//! - [`endpoint`] - Raw configuration resolution into an immutable descriptor
//! - [`trust`] - Prompt responses for secure-shell sessions
//! - [`upload_job`] - Bounded retry state machine for outbound transfers
//! - [`idle`] - Throttle for "no files" reporting
//! - [`types`] - Records and events handed to the application
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use ftpbridge_core::endpoint::{EndpointConfig, RawEndpointConfig};
//! use ftpbridge_core::path::normalize_folder;
//!
//! assert_eq!(normalize_folder("/in/"), "in");
//!
//! let raw = RawEndpointConfig {
//!     host: "files.example.com".into(),
//!     input_folder: Some("inbox".into()),
//!     archive_folder: Some("done".into()),
//!     ..Default::default()
//! };
//! let endpoint = EndpointConfig::resolve(&raw).unwrap();
//! assert_eq!(endpoint.port(), "21");
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod endpoint;
pub mod error;
pub mod grouping;
pub mod idle;
pub mod path;
pub mod protocol;
pub mod trust;
pub mod types;
pub mod upload_job;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use endpoint::{EndpointConfig, EndpointSummary, RawEndpointConfig};
pub use error::{ConfigError, CoreError, CoreResult};
pub use grouping::GroupingPolicy;
pub use idle::IdleCounter;
pub use path::{normalize_folder, ArchiveTemplate};
pub use protocol::Protocol;
pub use trust::{TrustDecision, TrustPolicy};
pub use types::{ErrorCode, ErrorReport, FileRecord, NewFileEvent};
pub use upload_job::{AttemptOutcome, UploadJob, UploadState};

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Number of outbound attempts allotted to one transfer job.
pub const UPLOAD_ATTEMPT_BUDGET: u32 = 3;

/// Consecutive empty poll cycles between two "no files" reports.
pub const IDLE_REPORT_EVERY: u32 = 25;

/// Fixed format of the timestamp prefix applied to archived file names.
///
/// Expressed as a `chrono` format string; equivalent to `yyyyMMddHHmmss`.
pub const ARCHIVE_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";
