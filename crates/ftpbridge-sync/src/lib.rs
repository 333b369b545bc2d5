//! # ftpbridge-sync: Transfer Engine for ftpbridge
//!
//! This crate moves files between a remote FTP, FTPS or SFTP server and the
//! host application's storage.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Transfer Engine Architecture                      │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                 ProcessorHost (activation API)                   │  │
//! │  │                                                                  │  │
//! │  │  start(settings) • stop() • send_file(id, folder) • status()    │  │
//! │  │  Owns one Processor at a time, swapped wholesale on start        │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │  PollPipeline  │  │   Transport    │  │  UploadPipeline        │    │
//! │  │                │  │                │  │                        │    │
//! │  │ scan, settle,  │  │ FTP / FTPS /   │  │ stage from Store,      │    │
//! │  │ archive, store │  │ SFTP sessions  │  │ put with 3 attempts    │    │
//! │  │ emit NewFile   │  │ fixed retry    │  │ 10 min per attempt     │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  COLLABORATORS (supplied by the host application):                     │
//! │  • Store              - put / get / metadata by file id                │
//! │  • ContentNormalizer  - optional structured view of new files          │
//! │  • EventSink          - receives NewFile events                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`processor`] - `Processor` and `ProcessorHost`
//! - [`poll`] - Input folder scanning and archival
//! - [`upload`] - Outbound transfers with bounded retry
//! - [`transport`] - Protocol adapters and reconnection policy
//! - [`collaborators`] - Store, normalizer and event sink interfaces
//! - [`settings`] - TOML and environment configuration
//! - [`error`] - Transfer error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ftpbridge_sync::{BridgeSettings, Collaborators, ProcessorHost};
//!
//! let settings = BridgeSettings::load(None)?;
//! let host = ProcessorHost::new(Collaborators::new(store, sink));
//!
//! host.start(&settings).await?;
//! let receipt = host.send_file("file-42", Some("invoices")).await?;
//! println!("Uploaded to {}", receipt.remote_path);
//! host.stop().await;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod collaborators;
pub mod error;
pub mod poll;
pub mod processor;
pub mod settings;
pub mod transport;
pub mod upload;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use collaborators::{
    Collaborators, ContentNormalizer, DefaultNormalizer, EventSink, NoOpSink, Store, StoreStream,
    StoredFileMetadata,
};
pub use error::{SyncError, SyncResult};
pub use poll::{Clock, CycleOutcome, PollOptions, PollPipeline, SystemClock};
pub use processor::{ConnectorFactory, Processor, ProcessorHost, ProcessorStatus};
pub use settings::BridgeSettings;
pub use transport::{connect_with_retry, connector_for, Connector, ReconnectPolicy, RemoteSession};
pub use upload::{UploadOptions, UploadPipeline, UploadReceipt};
