//! # Endpoint Configuration
//!
//! Resolution of raw key/value configuration into the immutable descriptor
//! shared by the poll and upload pipelines.
//!
//! ## Resolution Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    RawEndpointConfig → EndpointConfig                   │
//! │                                                                         │
//! │  protocol code ──► Protocol::from_code   (unknown ⇒ FTP)               │
//! │  host          ──► trimmed, required                                   │
//! │  port          ──► trimmed, blank ⇒ protocol default                   │
//! │  username      ──► blank ⇒ anonymous (password dropped)                │
//! │  folders       ──► normalize_folder                                    │
//! │                    ├── input == archive        ⇒ SameFolders           │
//! │                    └── recursive && archive ⊑ input ⇒ ArchiveInside…   │
//! │  grouping code ──► GroupingPolicy::from_code (unknown ⇒ Monthly)       │
//! │                                                                         │
//! │  archive template computed ONCE here                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ConfigError;
use crate::grouping::GroupingPolicy;
use crate::path::{compute_archive_target, join_segments, normalize_folder, ArchiveTemplate};
use crate::protocol::Protocol;

// =============================================================================
// Raw Configuration
// =============================================================================

/// Endpoint configuration exactly as supplied by the operator.
///
/// Every field is optional text; nothing is validated until
/// [`EndpointConfig::resolve`].
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawEndpointConfig {
    pub protocol: Option<String>,
    pub host: String,
    #[serde(deserialize_with = "port_from_text_or_number")]
    pub port: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub file_pattern: Option<String>,
    pub input_folder: Option<String>,
    pub archive_folder: Option<String>,
    pub archive_grouping: Option<String>,
    pub recursive: bool,
    pub output_folder: Option<String>,
}

impl RawEndpointConfig {
    /// Codes that will silently fall back to a default on resolution.
    ///
    /// Returns `(field, code)` pairs so the caller can log them.
    pub fn lenient_fallbacks(&self) -> Vec<(&'static str, String)> {
        let mut fallbacks = Vec::new();

        if let Some(code) = non_blank(self.protocol.as_deref()) {
            if code.parse::<Protocol>().is_err() {
                fallbacks.push(("protocol", code.to_string()));
            }
        }
        if let Some(code) = non_blank(self.archive_grouping.as_deref()) {
            if GroupingPolicy::parse_code(code).is_none() {
                fallbacks.push(("archive_grouping", code.to_string()));
            }
        }

        fallbacks
    }
}

impl std::fmt::Debug for RawEndpointConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawEndpointConfig")
            .field("protocol", &self.protocol)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("file_pattern", &self.file_pattern)
            .field("input_folder", &self.input_folder)
            .field("archive_folder", &self.archive_folder)
            .field("archive_grouping", &self.archive_grouping)
            .field("recursive", &self.recursive)
            .field("output_folder", &self.output_folder)
            .finish()
    }
}

/// Accepts `port = 21` as well as `port = "21"`.
fn port_from_text_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Text(String),
        Number(u64),
    }

    Ok(Option::<Port>::deserialize(deserializer)?.map(|port| match port {
        Port::Text(text) => text,
        Port::Number(number) => number.to_string(),
    }))
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

// =============================================================================
// Wire Options
// =============================================================================

/// Session tuning rendered into wire descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireOptions {
    pub max_reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
    pub read_lock_timeout_ms: u64,
    pub read_lock_check_interval_ms: u64,
}

impl Default for WireOptions {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 10,
            reconnect_delay_ms: 10_000,
            read_lock_timeout_ms: 30_000,
            read_lock_check_interval_ms: 5_000,
        }
    }
}

// =============================================================================
// Endpoint Config
// =============================================================================

/// Validated, immutable endpoint descriptor for one processor activation.
#[derive(Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    protocol: Protocol,
    host: String,
    port: String,
    username: Option<String>,
    password: Option<String>,
    file_pattern: Option<String>,
    input_folder: String,
    archive_folder: String,
    recursive: bool,
    grouping: GroupingPolicy,
    output_folder: String,
    archive_template: ArchiveTemplate,
}

impl EndpointConfig {
    /// Validates raw configuration and builds the descriptor.
    ///
    /// ## Errors
    /// - [`ConfigError::MissingHost`] when the host is blank
    /// - [`ConfigError::MissingUsername`] for SFTP without a username
    /// - [`ConfigError::SameFolders`] when input and archive normalize equal
    /// - [`ConfigError::ArchiveInsideInput`] when recursive and the archive
    ///   folder is a prefix of the input folder
    pub fn resolve(raw: &RawEndpointConfig) -> Result<Self, ConfigError> {
        let protocol = raw
            .protocol
            .as_deref()
            .map(Protocol::from_code)
            .unwrap_or_default();

        let host = raw.host.trim().to_string();
        if host.is_empty() {
            return Err(ConfigError::MissingHost);
        }

        let port = non_blank(raw.port.as_deref())
            .unwrap_or(protocol.default_port())
            .to_string();

        // Anonymous access: no username means no password either.
        let username = non_blank(raw.username.as_deref()).map(str::to_string);
        if username.is_none() && protocol.uses_ssh() {
            return Err(ConfigError::MissingUsername {
                protocol: protocol.to_string(),
            });
        }
        let password = match username {
            Some(_) => raw.password.clone().filter(|p| !p.is_empty()),
            None => None,
        };

        let input_folder = normalize_folder(raw.input_folder.as_deref().unwrap_or(""));
        let archive_folder = normalize_folder(raw.archive_folder.as_deref().unwrap_or(""));

        if input_folder == archive_folder {
            return Err(ConfigError::SameFolders {
                folder: input_folder,
            });
        }

        if raw.recursive && input_folder.starts_with(archive_folder.as_str()) {
            return Err(ConfigError::ArchiveInsideInput {
                input: input_folder,
                archive: archive_folder,
            });
        }

        let grouping = GroupingPolicy::from_code(raw.archive_grouping.as_deref().unwrap_or(""));
        let archive_template = compute_archive_target(&archive_folder, grouping, raw.recursive);

        Ok(Self {
            protocol,
            host,
            port,
            username,
            password,
            file_pattern: non_blank(raw.file_pattern.as_deref()).map(str::to_string),
            input_folder,
            archive_folder,
            recursive: raw.recursive,
            grouping,
            output_folder: normalize_folder(raw.output_folder.as_deref().unwrap_or("")),
            archive_template,
        })
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    /// Numeric port, when the configured port parses.
    pub fn port_number(&self) -> Option<u16> {
        self.port.parse().ok()
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_none()
    }

    pub fn file_pattern(&self) -> Option<&str> {
        self.file_pattern.as_deref()
    }

    pub fn input_folder(&self) -> &str {
        &self.input_folder
    }

    pub fn archive_folder(&self) -> &str {
        &self.archive_folder
    }

    pub fn recursive(&self) -> bool {
        self.recursive
    }

    pub fn grouping(&self) -> GroupingPolicy {
        self.grouping
    }

    pub fn output_folder(&self) -> &str {
        &self.output_folder
    }

    pub fn archive_template(&self) -> &ArchiveTemplate {
        &self.archive_template
    }

    /// `host:port` as used by socket connectors.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// `<scheme>://[user@]host:port`; the password is never included.
    pub fn authority(&self) -> String {
        match &self.username {
            Some(user) => format!(
                "{}://{}@{}:{}",
                self.protocol.code(),
                user,
                self.host,
                self.port
            ),
            None => format!("{}://{}:{}", self.protocol.code(), self.host, self.port),
        }
    }

    /// Wire descriptor of the polled input folder.
    pub fn input_uri(&self, options: &WireOptions) -> String {
        let mut params = vec![
            "passiveMode=true".to_string(),
            "binary=true".to_string(),
            "maxMessagesPerPoll=1".to_string(),
            format!("maximumReconnectAttempts={}", options.max_reconnect_attempts),
            format!("reconnectDelay={}", options.reconnect_delay_ms),
            "readLock=changed".to_string(),
            format!("readLockTimeout={}", options.read_lock_timeout_ms),
            format!("readLockCheckInterval={}", options.read_lock_check_interval_ms),
            format!("preMove={}", self.archive_template.pattern()),
            "sendEmptyMessageWhenIdle=true".to_string(),
            "flatten=false".to_string(),
            format!("recursive={}", self.recursive),
        ];
        if let Some(pattern) = &self.file_pattern {
            params.push(format!("antInclude={}", pattern));
            params.push("antFilterCaseSensitive=false".to_string());
        }

        format!(
            "{}/{}?{}",
            self.authority(),
            self.input_folder,
            params.join("&")
        )
    }

    /// Wire descriptor of an upload destination below the output root.
    pub fn upload_uri(&self, folder: Option<&str>, options: &WireOptions) -> String {
        let target = self.remote_upload_folder(folder);
        format!(
            "{}/{}?passiveMode=true&binary=true&maximumReconnectAttempts={}&reconnectDelay={}",
            self.authority(),
            target,
            options.max_reconnect_attempts,
            options.reconnect_delay_ms
        )
    }

    /// Remote folder an upload lands in: the output root plus the normalized request folder.
    pub fn remote_upload_folder(&self, folder: Option<&str>) -> String {
        let folder = normalize_folder(folder.unwrap_or(""));
        join_segments([self.output_folder.as_str(), folder.as_str()])
    }

    /// Full remote path of an uploaded file.
    pub fn remote_upload_path(&self, folder: Option<&str>, file_name: &str) -> String {
        let target = self.remote_upload_folder(folder);
        join_segments([target.as_str(), file_name])
    }

    /// Redacted parameter summary; carries only the presence of a password.
    pub fn summary(&self) -> EndpointSummary {
        EndpointSummary {
            protocol: self.protocol,
            host: self.host.clone(),
            port: self.port.clone(),
            username: self.username.clone(),
            password: self.password.is_some(),
            file_pattern: self.file_pattern.clone(),
            input_folder: self.input_folder.clone(),
            archive_folder: self.archive_folder.clone(),
            archive_grouping: self.grouping,
            recursive: self.recursive,
            output_folder: self.output_folder.clone(),
            archive_template: self.archive_template.pattern(),
        }
    }
}

impl std::fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("protocol", &self.protocol)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.is_some())
            .field("file_pattern", &self.file_pattern)
            .field("input_folder", &self.input_folder)
            .field("archive_folder", &self.archive_folder)
            .field("recursive", &self.recursive)
            .field("grouping", &self.grouping)
            .field("output_folder", &self.output_folder)
            .finish()
    }
}

/// Loggable view of an [`EndpointConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointSummary {
    pub protocol: Protocol,
    pub host: String,
    pub port: String,
    pub username: Option<String>,
    /// Whether a password is configured.
    pub password: bool,
    pub file_pattern: Option<String>,
    pub input_folder: String,
    pub archive_folder: String,
    pub archive_grouping: GroupingPolicy,
    pub recursive: bool,
    pub output_folder: String,
    pub archive_template: String,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn raw() -> RawEndpointConfig {
        RawEndpointConfig {
            host: "files.example.com".to_string(),
            username: Some("bridge".to_string()),
            password: Some("s3cret".to_string()),
            input_folder: Some("inbox".to_string()),
            archive_folder: Some("done".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_resolve_defaults() {
        let endpoint = EndpointConfig::resolve(&raw()).unwrap();
        assert_eq!(endpoint.protocol(), Protocol::Ftp);
        assert_eq!(endpoint.port(), "21");
        assert_eq!(endpoint.grouping(), GroupingPolicy::Monthly);
        assert_eq!(endpoint.output_folder(), "");
        assert!(!endpoint.recursive());
        assert_eq!(endpoint.file_pattern(), None);
    }

    #[test]
    fn test_sftp_default_port() {
        let mut r = raw();
        r.protocol = Some("SFTP".to_string());
        let endpoint = EndpointConfig::resolve(&r).unwrap();
        assert_eq!(endpoint.protocol(), Protocol::Sftp);
        assert_eq!(endpoint.port(), "22");

        r.port = Some(" 2222 ".to_string());
        let endpoint = EndpointConfig::resolve(&r).unwrap();
        assert_eq!(endpoint.port(), "2222");
        assert_eq!(endpoint.port_number(), Some(2222));
    }

    #[test]
    fn test_unknown_protocol_falls_back_to_ftp() {
        let mut r = raw();
        r.protocol = Some("gopher".to_string());
        r.archive_grouping = Some("hourly".to_string());
        let endpoint = EndpointConfig::resolve(&r).unwrap();
        assert_eq!(endpoint.protocol(), Protocol::Ftp);
        assert_eq!(endpoint.grouping(), GroupingPolicy::Monthly);

        let fallbacks = r.lenient_fallbacks();
        assert_eq!(fallbacks.len(), 2);
        assert_eq!(fallbacks[0].0, "protocol");
        assert_eq!(fallbacks[1].0, "archive_grouping");
    }

    #[test]
    fn test_missing_host_rejected() {
        let mut r = raw();
        r.host = "   ".to_string();
        assert_eq!(EndpointConfig::resolve(&r), Err(ConfigError::MissingHost));
    }

    #[test]
    fn test_sftp_without_username_rejected() {
        let mut r = raw();
        r.protocol = Some("sftp".to_string());
        r.username = Some("  ".to_string());
        assert_eq!(
            EndpointConfig::resolve(&r),
            Err(ConfigError::MissingUsername {
                protocol: "sftp".to_string()
            })
        );

        // FTP and FTPS fall back to anonymous login.
        r.protocol = Some("ftps".to_string());
        assert!(EndpointConfig::resolve(&r).unwrap().username().is_none());
    }

    #[test]
    fn test_same_folders_rejected_after_normalization() {
        let mut r = raw();
        r.input_folder = Some("/in/".to_string());
        r.archive_folder = Some("in".to_string());
        assert!(matches!(
            EndpointConfig::resolve(&r),
            Err(ConfigError::SameFolders { .. })
        ));

        r.input_folder = None;
        r.archive_folder = Some("/".to_string());
        assert!(matches!(
            EndpointConfig::resolve(&r),
            Err(ConfigError::SameFolders { .. })
        ));
    }

    #[test]
    fn test_recursive_archive_prefix_rejected() {
        let mut r = raw();
        r.input_folder = Some("a/b".to_string());
        r.archive_folder = Some("a".to_string());
        r.recursive = true;
        assert!(matches!(
            EndpointConfig::resolve(&r),
            Err(ConfigError::ArchiveInsideInput { .. })
        ));

        // Same layout without recursion is allowed.
        r.recursive = false;
        assert!(EndpointConfig::resolve(&r).is_ok());
    }

    #[test]
    fn test_anonymous_access_drops_password() {
        let mut r = raw();
        r.username = Some("  ".to_string());
        let endpoint = EndpointConfig::resolve(&r).unwrap();
        assert!(endpoint.is_anonymous());
        assert_eq!(endpoint.password(), None);
        assert_eq!(endpoint.authority(), "ftp://files.example.com:21");
    }

    #[test]
    fn test_archive_template_computed_once() {
        let mut r = raw();
        r.archive_grouping = Some("daily".to_string());
        let endpoint = EndpointConfig::resolve(&r).unwrap();
        assert_eq!(
            endpoint.archive_template().pattern(),
            "done/{yyyy-MM-dd}/{yyyyMMddHHmmss}-{name}"
        );
    }

    #[test]
    fn test_input_uri_never_contains_password() {
        let mut r = raw();
        r.file_pattern = Some("*.csv".to_string());
        r.recursive = false;
        let endpoint = EndpointConfig::resolve(&r).unwrap();
        let uri = endpoint.input_uri(&WireOptions::default());

        assert!(uri.starts_with("ftp://bridge@files.example.com:21/inbox?"));
        assert!(uri.contains("readLock=changed"));
        assert!(uri.contains("maxMessagesPerPoll=1"));
        assert!(uri.contains("antInclude=*.csv"));
        assert!(uri.contains("antFilterCaseSensitive=false"));
        assert!(!uri.contains("s3cret"));
    }

    #[test]
    fn test_upload_routing() {
        let mut r = raw();
        r.output_folder = Some("/out/".to_string());
        let endpoint = EndpointConfig::resolve(&r).unwrap();

        assert_eq!(endpoint.remote_upload_folder(None), "out");
        assert_eq!(endpoint.remote_upload_folder(Some("/2024/")), "out/2024");
        assert_eq!(
            endpoint.remote_upload_path(Some("x"), "a.pdf"),
            "out/x/a.pdf"
        );
        assert!(endpoint
            .upload_uri(Some("x"), &WireOptions::default())
            .starts_with("ftp://bridge@files.example.com:21/out/x?"));
    }

    #[test]
    fn test_summary_and_debug_redact_password() {
        let endpoint = EndpointConfig::resolve(&raw()).unwrap();
        let summary = endpoint.summary();
        assert!(summary.password);

        let json = serde_json::to_string(&summary).unwrap();
        assert!(!json.contains("s3cret"));
        assert!(!format!("{:?}", endpoint).contains("s3cret"));
        assert!(!format!("{:?}", raw()).contains("s3cret"));
    }

    #[test]
    fn test_raw_config_from_toml_like_json() {
        let raw: RawEndpointConfig = serde_json::from_str(
            r#"{"host":"h","port":2121,"input_folder":"in","archive_folder":"arc"}"#,
        )
        .unwrap();
        assert_eq!(raw.port.as_deref(), Some("2121"));
        assert!(!raw.recursive);
    }
}
