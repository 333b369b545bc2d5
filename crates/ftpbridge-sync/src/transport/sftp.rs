//! # SFTP Adapter
//!
//! SSH file transfer sessions built on `ssh2`, with every interactive
//! decision delegated to a [`TrustPolicy`].
//!
//! ## Handshake
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  TCP connect ──► SSH handshake ──► host key check ──► auth ──► SFTP    │
//! │                                        │               │               │
//! │                         known_hosts    │               ├─ password     │
//! │                         ┌──────────────┤               └─ keyboard-    │
//! │                         │ Match        │ continue         interactive  │
//! │                         │ NotFound  ┐  │                  (policy)     │
//! │                         │ Mismatch  ┴──┼─► policy.confirm_host_identity│
//! │                         │              │   accept + persist?           │
//! │                         └──────────────┘   rewrite known_hosts         │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use ssh2::{
    CheckResult, KeyboardInteractivePrompt, KnownHostFileKind, Prompt, Session, Sftp,
};
use tracing::{debug, trace, warn};

use ftpbridge_core::path::join_segments;
use ftpbridge_core::{ConfigError, EndpointConfig, Protocol, TrustPolicy};

use super::{dir_arg, Blocking, BlockingSession, Connector, RemoteEntry, RemoteSession};
use crate::error::{SyncError, SyncResult};

/// libssh2 status for a missing remote file.
const SFTP_NO_SUCH_FILE: i32 = 2;

// =============================================================================
// Keyboard-Interactive Prompter
// =============================================================================

/// Answers keyboard-interactive challenges from the trust policy.
struct PolicyPrompter<'a> {
    policy: &'a TrustPolicy,
}

impl KeyboardInteractivePrompt for PolicyPrompter<'_> {
    fn prompt<'b>(
        &mut self,
        username: &str,
        instructions: &str,
        prompts: &[Prompt<'b>],
    ) -> Vec<String> {
        trace!(username, instructions, count = prompts.len(), "Keyboard-interactive challenge");
        let texts: Vec<&str> = prompts.iter().map(|p| p.text.as_ref()).collect();
        self.policy.keyboard_interactive(&texts)
    }
}

// =============================================================================
// Host Keys
// =============================================================================

/// `known_hosts` name of a host; non-default ports use `[host]:port`.
fn known_host_name(host: &str, port: u16) -> String {
    if port == 22 {
        host.to_string()
    } else {
        format!("[{}]:{}", host, port)
    }
}

fn verify_host_key(
    session: &Session,
    host: &str,
    port: u16,
    policy: &TrustPolicy,
    known_hosts_path: Option<&Path>,
) -> SyncResult<()> {
    let (key, key_type) = match session.host_key() {
        Some((key, key_type)) => (key.to_vec(), key_type),
        None => return Err(SyncError::Connection("server presented no host key".into())),
    };

    let mut known_hosts = session.known_hosts()?;
    if let Some(path) = known_hosts_path {
        if path.exists() {
            known_hosts.read_file(path, KnownHostFileKind::OpenSSH)?;
        }
    }

    let message = match known_hosts.check_port(host, port, &key) {
        CheckResult::Match => return Ok(()),
        CheckResult::NotFound => format!("The authenticity of host '{}' can't be established", host),
        CheckResult::Mismatch => format!("The host key for '{}' has changed", host),
        CheckResult::Failure => format!("Host key check for '{}' failed", host),
    };

    let decision = policy.confirm_host_identity(&message);
    warn!(host, port, message = %message, accept = decision.accept, "Host identity prompt");

    if !decision.accept {
        return Err(SyncError::Connection(message));
    }

    if let (true, Some(path)) = (decision.persist, known_hosts_path) {
        let name = known_host_name(host, port);
        for entry in known_hosts.hosts()? {
            if entry.name() == Some(name.as_str()) {
                known_hosts.remove(&entry)?;
            }
        }
        known_hosts.add(&name, &key, "added by ftpbridge", key_type.into())?;
        known_hosts.write_file(path, KnownHostFileKind::OpenSSH)?;
        debug!(host = %name, path = ?path, "Host key persisted");
    }

    Ok(())
}

// =============================================================================
// Session
// =============================================================================

/// An authenticated SSH session with its SFTP channel.
pub struct SftpSession {
    session: Session,
    sftp: Sftp,
}

impl SftpSession {
    fn open(
        endpoint: &EndpointConfig,
        policy: &TrustPolicy,
        known_hosts_path: Option<&Path>,
        timeout: Duration,
    ) -> SyncResult<Self> {
        let username = endpoint
            .username()
            .ok_or_else(|| {
                SyncError::Config(ConfigError::MissingUsername {
                    protocol: endpoint.protocol().to_string(),
                })
            })?;
        let port = endpoint.port_number().ok_or_else(|| {
            SyncError::Connection(format!("invalid port: {}", endpoint.port()))
        })?;

        let addr = endpoint
            .address()
            .to_socket_addrs()
            .map_err(|e| SyncError::Connection(format!("{}: {}", endpoint.address(), e)))?
            .next()
            .ok_or_else(|| SyncError::Connection(format!("{}: no address", endpoint.address())))?;

        let tcp = TcpStream::connect_timeout(&addr, timeout)
            .map_err(|e| SyncError::Connection(format!("{}: {}", endpoint.address(), e)))?;

        let mut session = Session::new()?;
        session.set_tcp_stream(tcp);
        session.set_timeout(timeout.as_millis() as u32);
        session.handshake()?;

        if let Some(banner) = session.banner() {
            trace!(banner = %banner, "Server banner");
        }

        verify_host_key(&session, endpoint.host(), port, policy, known_hosts_path)?;

        if let Some(password) = policy.password() {
            if let Err(e) = session.userauth_password(username, password) {
                debug!(error = %e, "Password auth rejected, trying keyboard-interactive");
            }
        }
        if !session.authenticated() {
            let mut prompter = PolicyPrompter { policy };
            session
                .userauth_keyboard_interactive(username, &mut prompter)
                .map_err(|e| SyncError::Connection(format!("authentication failed: {}", e)))?;
        }
        if !session.authenticated() {
            return Err(SyncError::Connection(format!(
                "authentication failed for {}",
                username
            )));
        }

        let sftp = session.sftp()?;
        debug!(host = %endpoint.host(), "SFTP session ready");

        Ok(Self { session, sftp })
    }
}

fn is_missing(err: &ssh2::Error) -> bool {
    matches!(err.code(), ssh2::ErrorCode::SFTP(SFTP_NO_SUCH_FILE))
}

fn entry_from_stat(path: String, stat: &ssh2::FileStat) -> RemoteEntry {
    RemoteEntry {
        path,
        size: stat.size.unwrap_or(0),
        modified: stat.mtime.map(|m| m as i64),
        is_dir: stat.is_dir(),
    }
}

impl BlockingSession for SftpSession {
    fn list_dir(&mut self, dir: &str) -> SyncResult<Vec<RemoteEntry>> {
        let listing = self.sftp.readdir(Path::new(dir_arg(dir)))?;
        Ok(listing
            .iter()
            .filter_map(|(path, stat)| {
                let name = path.file_name()?.to_str()?;
                if name == "." || name == ".." {
                    return None;
                }
                Some(entry_from_stat(join_segments([dir, name]), stat))
            })
            .collect())
    }

    fn stat(&mut self, path: &str) -> SyncResult<Option<RemoteEntry>> {
        match self.sftp.stat(Path::new(path)) {
            Ok(stat) => Ok(Some(entry_from_stat(path.to_string(), &stat))),
            Err(e) if is_missing(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn fetch(&mut self, path: &str) -> SyncResult<Vec<u8>> {
        let mut file = self.sftp.open(Path::new(path))?;
        let mut content = Vec::new();
        file.read_to_end(&mut content)?;
        Ok(content)
    }

    fn rename(&mut self, from: &str, to: &str) -> SyncResult<()> {
        self.sftp.rename(Path::new(from), Path::new(to), None)?;
        Ok(())
    }

    fn put(&mut self, remote_path: &str, source: &mut dyn Read) -> SyncResult<u64> {
        let mut remote = self.sftp.create(Path::new(remote_path))?;
        let written = std::io::copy(source, &mut remote)?;
        remote.flush()?;
        debug!(remote = %remote_path, bytes = written, "Stored file");
        Ok(written)
    }

    fn set_io_timeout(&mut self, timeout: Duration) -> SyncResult<()> {
        self.session
            .set_timeout(timeout.as_millis().min(u32::MAX as u128) as u32);
        Ok(())
    }

    fn mkdir(&mut self, dir: &str) -> SyncResult<()> {
        if self.sftp.stat(Path::new(dir)).is_ok() {
            return Ok(());
        }
        self.sftp.mkdir(Path::new(dir), 0o755)?;
        Ok(())
    }

    fn close(self) -> SyncResult<()> {
        drop(self.sftp);
        self.session.disconnect(None, "closing", None)?;
        Ok(())
    }
}

// =============================================================================
// Connector
// =============================================================================

/// Opens SFTP sessions for one endpoint.
pub struct SftpConnector {
    endpoint: EndpointConfig,
    policy: TrustPolicy,
    known_hosts_path: Option<PathBuf>,
    timeout: Duration,
}

impl SftpConnector {
    pub fn new(endpoint: EndpointConfig, policy: TrustPolicy, known_hosts_path: Option<PathBuf>) -> Self {
        Self {
            endpoint,
            policy,
            known_hosts_path,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Connector for SftpConnector {
    fn protocol(&self) -> Protocol {
        Protocol::Sftp
    }

    async fn connect(&self) -> SyncResult<Box<dyn RemoteSession>> {
        let endpoint = self.endpoint.clone();
        let policy = self.policy.clone();
        let known_hosts = self.known_hosts_path.clone();
        let timeout = self.timeout;

        let session = tokio::task::spawn_blocking(move || {
            SftpSession::open(&endpoint, &policy, known_hosts.as_deref(), timeout)
        })
        .await??;

        Ok(Box::new(Blocking::new(session)))
    }
}
