//! # FTP / FTPS Adapter
//!
//! Sessions over plain FTP and explicit-TLS FTPS, built on `suppaftp`.
//!
//! Every session logs in (anonymously when no username is configured),
//! switches to passive mode and binary transfers, and is closed with `QUIT`
//! at the end of its poll cycle or upload attempt. FTPS sessions upgrade with
//! `AUTH TLS` and protect the data channel (`PBSZ 0`, `PROT P`).

use std::io::{Cursor, Read};
use std::net::{SocketAddr, ToSocketAddrs};
use std::str::FromStr;
use std::time::{Duration, UNIX_EPOCH};

use async_trait::async_trait;
use suppaftp::native_tls::TlsConnector;
use suppaftp::types::{FileType, Mode};
use suppaftp::{FtpStream, NativeTlsConnector, NativeTlsFtpStream};
use tracing::{debug, trace};

use ftpbridge_core::path::join_segments;
use ftpbridge_core::{EndpointConfig, Protocol};

use super::{dir_arg, Blocking, BlockingSession, Connector, RemoteEntry, RemoteSession};
use crate::error::{SyncError, SyncResult};

/// Credentials used when the endpoint has no username.
const ANONYMOUS_USER: &str = "anonymous";

// =============================================================================
// Session
// =============================================================================

/// A logged-in FTP or FTPS control connection.
pub enum FtpSession {
    Plain(FtpStream),
    Secure(NativeTlsFtpStream),
}

/// Calls the same method on whichever stream flavour is active.
macro_rules! on_stream {
    ($session:expr, $stream:ident => $body:expr) => {
        match $session {
            FtpSession::Plain($stream) => $body,
            FtpSession::Secure($stream) => $body,
        }
    };
}

impl FtpSession {
    fn open(endpoint: &EndpointConfig, timeout: Duration) -> SyncResult<Self> {
        let addr = resolve(endpoint)?;

        let mut session = match endpoint.protocol() {
            Protocol::Ftps => {
                let tls = TlsConnector::new()
                    .map_err(|e| SyncError::Connection(format!("TLS setup failed: {}", e)))?;
                let stream = NativeTlsFtpStream::connect_timeout(addr, timeout)
                    .map_err(connection_error)?
                    .into_secure(NativeTlsConnector::from(tls), endpoint.host())
                    .map_err(connection_error)?;
                FtpSession::Secure(stream)
            }
            _ => FtpSession::Plain(FtpStream::connect_timeout(addr, timeout).map_err(connection_error)?),
        };

        let (user, password) = match endpoint.username() {
            Some(user) => (user, endpoint.password().unwrap_or("")),
            None => (ANONYMOUS_USER, ANONYMOUS_USER),
        };

        on_stream!(&mut session, s => {
            if let Some(welcome) = s.get_welcome_msg() {
                trace!(banner = %welcome.trim(), "Server banner");
            }
            s.login(user, password).map_err(connection_error)?;
            s.set_mode(Mode::Passive);
            s.transfer_type(FileType::Binary).map_err(connection_error)?;
        });

        debug!(host = %endpoint.host(), protocol = %endpoint.protocol(), "FTP session ready");
        Ok(session)
    }
}

fn resolve(endpoint: &EndpointConfig) -> SyncResult<SocketAddr> {
    endpoint
        .address()
        .to_socket_addrs()
        .map_err(|e| SyncError::Connection(format!("{}: {}", endpoint.address(), e)))?
        .next()
        .ok_or_else(|| SyncError::Connection(format!("{}: no address", endpoint.address())))
}

/// Failures while establishing a session are all reconnectable.
fn connection_error(err: suppaftp::FtpError) -> SyncError {
    SyncError::Connection(err.to_string())
}

fn entry_from_line(dir: &str, line: &str) -> Option<RemoteEntry> {
    let file = suppaftp::list::File::from_str(line).ok()?;
    let name = file.name();
    if name == "." || name == ".." {
        return None;
    }

    Some(RemoteEntry {
        path: join_segments([dir, name]),
        size: file.size() as u64,
        modified: file
            .modified()
            .duration_since(UNIX_EPOCH)
            .ok()
            .map(|d| d.as_secs() as i64),
        is_dir: file.is_directory(),
    })
}

impl BlockingSession for FtpSession {
    fn list_dir(&mut self, dir: &str) -> SyncResult<Vec<RemoteEntry>> {
        let lines = on_stream!(self, s => s.list(Some(dir_arg(dir)))?);
        Ok(lines
            .iter()
            .filter_map(|line| entry_from_line(dir, line))
            .collect())
    }

    fn fetch(&mut self, path: &str) -> SyncResult<Vec<u8>> {
        let buffer: Cursor<Vec<u8>> = on_stream!(self, s => s.retr_as_buffer(path)?);
        Ok(buffer.into_inner())
    }

    fn rename(&mut self, from: &str, to: &str) -> SyncResult<()> {
        on_stream!(self, s => s.rename(from, to)?);
        Ok(())
    }

    fn put(&mut self, remote_path: &str, mut source: &mut dyn Read) -> SyncResult<u64> {
        let written = on_stream!(self, s => s.put_file(remote_path, &mut source)?);
        debug!(remote = %remote_path, bytes = written, "Stored file");
        Ok(written)
    }

    /// Control-connection timeout; the data channel is bounded by the
    /// deadline reader feeding it.
    fn set_io_timeout(&mut self, timeout: Duration) -> SyncResult<()> {
        on_stream!(self, s => {
            let stream = s.get_ref();
            stream.set_read_timeout(Some(timeout))?;
            stream.set_write_timeout(Some(timeout))?;
        });
        Ok(())
    }

    fn mkdir(&mut self, dir: &str) -> SyncResult<()> {
        // 550 when the directory exists; a real failure surfaces on the next command.
        if let Err(e) = on_stream!(self, s => s.mkdir(dir)) {
            trace!(dir = %dir, error = %e, "mkdir ignored");
        }
        Ok(())
    }

    fn close(mut self) -> SyncResult<()> {
        on_stream!(&mut self, s => s.quit()?);
        Ok(())
    }
}

// =============================================================================
// Connector
// =============================================================================

/// Opens FTP or FTPS sessions for one endpoint.
pub struct FtpConnector {
    endpoint: EndpointConfig,
    timeout: Duration,
}

impl FtpConnector {
    pub fn new(endpoint: EndpointConfig) -> Self {
        Self {
            endpoint,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Connector for FtpConnector {
    fn protocol(&self) -> Protocol {
        self.endpoint.protocol()
    }

    async fn connect(&self) -> SyncResult<Box<dyn RemoteSession>> {
        let endpoint = self.endpoint.clone();
        let timeout = self.timeout;
        let session = tokio::task::spawn_blocking(move || FtpSession::open(&endpoint, timeout)).await??;
        Ok(Box::new(Blocking::new(session)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_from_unix_listing() {
        let entry = entry_from_line(
            "inbox",
            "-rw-r--r-- 1 ftp ftp 1024 Mar 01 12:00 report.csv",
        )
        .unwrap();
        assert_eq!(entry.path, "inbox/report.csv");
        assert_eq!(entry.size, 1024);
        assert!(!entry.is_dir);
        assert!(entry.modified.is_some());
    }

    #[test]
    fn test_entry_from_directory_listing() {
        let entry = entry_from_line("", "drwxr-xr-x 2 ftp ftp 4096 Mar 01 12:00 sub").unwrap();
        assert_eq!(entry.path, "sub");
        assert!(entry.is_dir);
    }

    #[test]
    fn test_dot_entries_skipped() {
        assert!(entry_from_line("in", "drwxr-xr-x 2 ftp ftp 4096 Mar 01 12:00 .").is_none());
        assert!(entry_from_line("in", "total 8").is_none());
    }
}
