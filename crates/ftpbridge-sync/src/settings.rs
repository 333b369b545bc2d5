//! # Bridge Settings
//!
//! Configuration management for the transfer engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     FTPBRIDGE_HOST=files.example.com                                   │
//! │     FTPBRIDGE_PROTOCOL=sftp                                            │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/ftpbridge/ftpbridge.toml (Linux)                         │
//! │     ~/Library/Application Support/com.ftpbridge.ftpbridge/... (macOS)  │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     30s polling, 10 reconnects, 3 upload attempts                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [service]
//! name = "invoices"
//!
//! [endpoint]
//! protocol = "sftp"
//! host = "files.example.com"
//! username = "bridge"
//! password = "secret"
//! input_folder = "/inbox/"
//! archive_folder = "/done/"
//! archive_grouping = "daily"
//! file_pattern = "*.csv"
//! recursive = false
//! output_folder = "outbox"
//!
//! [polling]
//! interval_secs = 30
//!
//! [trust]
//! known_hosts_path = "/var/lib/ftpbridge/known_hosts"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use ftpbridge_core::endpoint::WireOptions;
use ftpbridge_core::{ConfigError, EndpointConfig, RawEndpointConfig};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Service Settings
// =============================================================================

/// Identity of this bridge instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSettings {
    /// Application name; also names the local work directory.
    #[serde(default = "default_service_name")]
    pub name: String,
}

fn default_service_name() -> String {
    "ftpbridge".to_string()
}

impl Default for ServiceSettings {
    fn default() -> Self {
        ServiceSettings {
            name: default_service_name(),
        }
    }
}

// =============================================================================
// Polling Settings
// =============================================================================

/// Poll loop cadence and read-lock tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingSettings {
    /// Seconds between scan starts.
    #[serde(default = "default_poll_interval")]
    pub interval_secs: u64,

    /// How long a file may keep changing before it is skipped this cycle.
    #[serde(default = "default_read_lock_timeout")]
    pub read_lock_timeout_secs: u64,

    /// Delay between two size/mtime observations of a candidate file.
    #[serde(default = "default_read_lock_check_interval")]
    pub read_lock_check_interval_secs: u64,

    /// Empty cycles between two "no files" reports.
    #[serde(default = "default_idle_report_every")]
    pub idle_report_every: u32,
}

fn default_poll_interval() -> u64 {
    30
}
fn default_read_lock_timeout() -> u64 {
    30
}
fn default_read_lock_check_interval() -> u64 {
    5
}
fn default_idle_report_every() -> u32 {
    ftpbridge_core::IDLE_REPORT_EVERY
}

impl Default for PollingSettings {
    fn default() -> Self {
        PollingSettings {
            interval_secs: default_poll_interval(),
            read_lock_timeout_secs: default_read_lock_timeout(),
            read_lock_check_interval_secs: default_read_lock_check_interval(),
            idle_report_every: default_idle_report_every(),
        }
    }
}

// =============================================================================
// Reconnect Settings
// =============================================================================

/// Fixed reconnection policy used for every session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectSettings {
    #[serde(default = "default_reconnect_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_reconnect_delay")]
    pub delay_secs: u64,

    /// Deadline of a single connect (TCP + handshake + login).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_reconnect_attempts() -> u32 {
    10
}
fn default_reconnect_delay() -> u64 {
    10
}
fn default_connect_timeout() -> u64 {
    30
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        ReconnectSettings {
            max_attempts: default_reconnect_attempts(),
            delay_secs: default_reconnect_delay(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

// =============================================================================
// Upload Settings
// =============================================================================

/// Outbound transfer budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSettings {
    #[serde(default = "default_upload_attempts")]
    pub max_attempts: u32,

    /// Deadline of one attempt, in seconds.
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_secs: u64,

    /// Root of the local work directory; the OS temp dir when unset.
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,
}

fn default_upload_attempts() -> u32 {
    ftpbridge_core::UPLOAD_ATTEMPT_BUDGET
}
fn default_attempt_timeout() -> u64 {
    600
}

impl Default for UploadSettings {
    fn default() -> Self {
        UploadSettings {
            max_attempts: default_upload_attempts(),
            attempt_timeout_secs: default_attempt_timeout(),
            staging_dir: None,
        }
    }
}

// =============================================================================
// Trust Settings
// =============================================================================

/// Host-key handling for SFTP sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustSettings {
    /// OpenSSH `known_hosts` file consulted and rewritten on accept.
    #[serde(default)]
    pub known_hosts_path: Option<PathBuf>,

    #[serde(default = "default_true")]
    pub persist_host_keys: bool,
}

fn default_true() -> bool {
    true
}

impl Default for TrustSettings {
    fn default() -> Self {
        TrustSettings {
            known_hosts_path: None,
            persist_host_keys: true,
        }
    }
}

// =============================================================================
// Bridge Settings
// =============================================================================

/// Complete bridge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeSettings {
    #[serde(default)]
    pub service: ServiceSettings,

    #[serde(default)]
    pub endpoint: RawEndpointConfig,

    #[serde(default)]
    pub polling: PollingSettings,

    #[serde(default)]
    pub reconnect: ReconnectSettings,

    #[serde(default)]
    pub upload: UploadSettings,

    #[serde(default)]
    pub trust: TrustSettings,
}

impl BridgeSettings {
    /// Loads settings from file and environment.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (ftpbridge.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut settings = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading bridge settings from file");
                settings = Self::from_file(&path)?;
            } else {
                debug!(?path, "Settings file not found, using defaults");
            }
        }

        settings.apply_env_overrides(|key| std::env::var(key).ok());
        settings.validate()?;

        Ok(settings)
    }

    /// Parses a settings file without applying overrides.
    pub fn from_file(path: &Path) -> SyncResult<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| SyncError::SettingsLoad(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> SyncResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Validates tuning values. Endpoint rules are checked by [`Self::resolve_endpoint`].
    pub fn validate(&self) -> SyncResult<()> {
        if self.service.name.trim().is_empty() {
            return Err(SyncError::SettingsLoad(
                "service.name must not be empty".into(),
            ));
        }
        if self.polling.interval_secs == 0 {
            return Err(SyncError::SettingsLoad(
                "polling.interval_secs must be greater than 0".into(),
            ));
        }
        if self.upload.max_attempts == 0 {
            return Err(SyncError::SettingsLoad(
                "upload.max_attempts must be greater than 0".into(),
            ));
        }
        if self.reconnect.max_attempts == 0 {
            return Err(SyncError::SettingsLoad(
                "reconnect.max_attempts must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Resolves the endpoint and checks its file pattern.
    ///
    /// Lenient code fallbacks are logged, never rejected.
    pub fn resolve_endpoint(&self) -> SyncResult<EndpointConfig> {
        for (field, code) in self.endpoint.lenient_fallbacks() {
            warn!(field, code = %code, "Unrecognized code, using default");
        }

        let endpoint = EndpointConfig::resolve(&self.endpoint)?;

        if let Some(pattern) = endpoint.file_pattern() {
            glob::Pattern::new(pattern).map_err(|e| ConfigError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.msg.to_string(),
            })?;
        }

        let summary = endpoint.summary();
        info!(
            protocol = %summary.protocol,
            host = %summary.host,
            port = %summary.port,
            username = summary.username.as_deref().unwrap_or("<anonymous>"),
            password = summary.password,
            file_pattern = summary.file_pattern.as_deref().unwrap_or("<any>"),
            input_folder = %summary.input_folder,
            archive_folder = %summary.archive_folder,
            archive_grouping = %summary.archive_grouping,
            recursive = summary.recursive,
            output_folder = %summary.output_folder,
            archive_template = %summary.archive_template,
            "Endpoint resolved"
        );

        Ok(endpoint)
    }

    /// Applies environment variable overrides read through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("FTPBRIDGE_HOST") {
            debug!(host = %host, "Overriding host from environment");
            self.endpoint.host = host;
        }

        if let Some(port) = lookup("FTPBRIDGE_PORT") {
            debug!(port = %port, "Overriding port from environment");
            self.endpoint.port = Some(port);
        }

        if let Some(username) = lookup("FTPBRIDGE_USERNAME") {
            self.endpoint.username = Some(username);
        }

        if let Some(password) = lookup("FTPBRIDGE_PASSWORD") {
            debug!("Overriding password from environment");
            self.endpoint.password = Some(password);
        }

        if let Some(protocol) = lookup("FTPBRIDGE_PROTOCOL") {
            debug!(protocol = %protocol, "Overriding protocol from environment");
            self.endpoint.protocol = Some(protocol);
        }
    }

    /// Returns the default settings file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "ftpbridge", "ftpbridge")
            .map(|dirs| dirs.config_dir().join("ftpbridge.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.polling.interval_secs)
    }

    pub fn read_lock_timeout(&self) -> Duration {
        Duration::from_secs(self.polling.read_lock_timeout_secs)
    }

    pub fn read_lock_check_interval(&self) -> Duration {
        Duration::from_secs(self.polling.read_lock_check_interval_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect.delay_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.reconnect.connect_timeout_secs)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.upload.attempt_timeout_secs)
    }

    /// `<staging_dir>/<service name>FtpTmp`.
    pub fn work_dir(&self) -> PathBuf {
        let root = self
            .upload
            .staging_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        root.join(format!("{}FtpTmp", self.service.name.trim()))
    }

    /// Tuning rendered into wire descriptors.
    pub fn wire_options(&self) -> WireOptions {
        WireOptions {
            max_reconnect_attempts: self.reconnect.max_attempts,
            reconnect_delay_ms: self.reconnect.delay_secs * 1000,
            read_lock_timeout_ms: self.polling.read_lock_timeout_secs * 1000,
            read_lock_check_interval_ms: self.polling.read_lock_check_interval_secs * 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ftpbridge_core::{GroupingPolicy, Protocol};
    use std::collections::HashMap;

    const SAMPLE: &str = r#"
[service]
name = "invoices"

[endpoint]
protocol = "sftp"
host = "files.example.com"
port = 2222
username = "bridge"
password = "secret"
input_folder = "/inbox/"
archive_folder = "/done/"
archive_grouping = "daily"
file_pattern = "*.csv"

[polling]
interval_secs = 60
"#;

    #[test]
    fn test_default_settings() {
        let settings = BridgeSettings::default();
        assert_eq!(settings.service.name, "ftpbridge");
        assert_eq!(settings.polling.interval_secs, 30);
        assert_eq!(settings.polling.read_lock_timeout_secs, 30);
        assert_eq!(settings.polling.read_lock_check_interval_secs, 5);
        assert_eq!(settings.polling.idle_report_every, 25);
        assert_eq!(settings.reconnect.max_attempts, 10);
        assert_eq!(settings.reconnect.delay_secs, 10);
        assert_eq!(settings.upload.max_attempts, 3);
        assert_eq!(settings.upload.attempt_timeout_secs, 600);
        assert!(settings.trust.persist_host_keys);
    }

    #[test]
    fn test_parse_toml() {
        let settings = BridgeSettings::from_toml_str(SAMPLE).unwrap();
        assert_eq!(settings.service.name, "invoices");
        assert_eq!(settings.polling.interval_secs, 60);
        // Untouched sections keep their defaults.
        assert_eq!(settings.polling.read_lock_timeout_secs, 30);

        let endpoint = settings.resolve_endpoint().unwrap();
        assert_eq!(endpoint.protocol(), Protocol::Sftp);
        assert_eq!(endpoint.port(), "2222");
        assert_eq!(endpoint.input_folder(), "inbox");
        assert_eq!(endpoint.archive_folder(), "done");
        assert_eq!(endpoint.grouping(), GroupingPolicy::Daily);
    }

    #[test]
    fn test_invalid_toml_is_settings_error() {
        let err = BridgeSettings::from_toml_str("[endpoint\nhost=").unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_env_overrides() {
        let mut settings = BridgeSettings::from_toml_str(SAMPLE).unwrap();
        let env: HashMap<&str, &str> = [
            ("FTPBRIDGE_HOST", "other.example.com"),
            ("FTPBRIDGE_PROTOCOL", "ftps"),
            ("FTPBRIDGE_PORT", "990"),
        ]
        .into_iter()
        .collect();

        settings.apply_env_overrides(|key| env.get(key).map(|v| v.to_string()));

        let endpoint = settings.resolve_endpoint().unwrap();
        assert_eq!(endpoint.host(), "other.example.com");
        assert_eq!(endpoint.protocol(), Protocol::Ftps);
        assert_eq!(endpoint.port(), "990");
        assert_eq!(endpoint.username(), Some("bridge"));
    }

    #[test]
    fn test_validation() {
        let mut settings = BridgeSettings::default();
        assert!(settings.validate().is_ok());

        settings.polling.interval_secs = 0;
        assert!(settings.validate().is_err());

        settings.polling.interval_secs = 30;
        settings.upload.max_attempts = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_resolve_endpoint_rejects_same_folders() {
        let mut settings = BridgeSettings::from_toml_str(SAMPLE).unwrap();
        settings.endpoint.archive_folder = Some("inbox".into());
        let err = settings.resolve_endpoint().unwrap_err();
        assert!(matches!(err, SyncError::Config(ConfigError::SameFolders { .. })));
    }

    #[test]
    fn test_resolve_endpoint_rejects_bad_pattern() {
        let mut settings = BridgeSettings::from_toml_str(SAMPLE).unwrap();
        settings.endpoint.file_pattern = Some("[".into());
        let err = settings.resolve_endpoint().unwrap_err();
        assert!(matches!(
            err,
            SyncError::Config(ConfigError::InvalidPattern { .. })
        ));
    }

    /// Collects formatted log output for assertions.
    #[derive(Clone, Default)]
    struct CapturedLogs(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    #[test]
    fn test_resolved_endpoint_is_logged_at_info_without_password() {
        let settings = BridgeSettings::from_toml_str(SAMPLE).unwrap();
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            settings.resolve_endpoint().unwrap();
        });

        let text = logs.text();
        let line = text
            .lines()
            .find(|line| line.contains("Endpoint resolved"))
            .expect("summary line");
        assert!(line.contains("INFO"));
        assert!(line.contains("host=files.example.com"));
        assert!(line.contains("port=2222"));
        assert!(line.contains("protocol=sftp"));
        assert!(line.contains("input_folder=inbox"));
        assert!(line.contains("archive_grouping=daily"));
        assert!(line.contains("recursive=false"));
        assert!(line.contains("password=true"));
        assert!(!text.contains("secret"));
    }

    #[test]
    fn test_sftp_without_username_fails_fast() {
        let mut settings = BridgeSettings::from_toml_str(SAMPLE).unwrap();
        settings.endpoint.username = None;

        let err = settings.resolve_endpoint().unwrap_err();
        assert!(matches!(
            err,
            SyncError::Config(ConfigError::MissingUsername { .. })
        ));
        assert!(err.is_config_error());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_work_dir() {
        let mut settings = BridgeSettings::default();
        settings.service.name = "invoices".into();
        settings.upload.staging_dir = Some(PathBuf::from("/var/tmp"));
        assert_eq!(settings.work_dir(), PathBuf::from("/var/tmp/invoicesFtpTmp"));
    }

    #[test]
    fn test_wire_options() {
        let options = BridgeSettings::default().wire_options();
        assert_eq!(options, WireOptions::default());
    }
}
