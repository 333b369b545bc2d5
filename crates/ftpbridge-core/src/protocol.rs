//! # Transfer Protocols
//!
//! The three remote protocols a bridge endpoint may speak.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Remote transfer protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Plain FTP.
    #[default]
    Ftp,
    /// FTP upgraded with explicit TLS.
    Ftps,
    /// SSH file transfer.
    Sftp,
}

impl Protocol {
    /// Resolves a configuration code, falling back to [`Protocol::Ftp`].
    ///
    /// Use [`Protocol::from_str`] when an unknown code must be detected.
    pub fn from_code(code: &str) -> Self {
        code.parse().unwrap_or_default()
    }

    /// Configuration code and URI scheme.
    pub fn code(&self) -> &'static str {
        match self {
            Protocol::Ftp => "ftp",
            Protocol::Ftps => "ftps",
            Protocol::Sftp => "sftp",
        }
    }

    /// Port used when none is configured.
    pub fn default_port(&self) -> &'static str {
        match self {
            Protocol::Ftp | Protocol::Ftps => "21",
            Protocol::Sftp => "22",
        }
    }

    /// Returns true for protocols that encrypt the session.
    pub fn is_secure(&self) -> bool {
        matches!(self, Protocol::Ftps | Protocol::Sftp)
    }

    /// Returns true when the session runs over SSH and consults a trust policy.
    pub fn uses_ssh(&self) -> bool {
        matches!(self, Protocol::Sftp)
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ftp" => Ok(Protocol::Ftp),
            "ftps" => Ok(Protocol::Ftps),
            "sftp" => Ok(Protocol::Sftp),
            _ => Err(format!("Unknown protocol: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_from_str() {
        assert_eq!("ftp".parse::<Protocol>().unwrap(), Protocol::Ftp);
        assert_eq!(" FTPS ".parse::<Protocol>().unwrap(), Protocol::Ftps);
        assert_eq!("Sftp".parse::<Protocol>().unwrap(), Protocol::Sftp);
        assert!("scp".parse::<Protocol>().is_err());
    }

    #[test]
    fn test_unknown_code_falls_back_to_ftp() {
        assert_eq!(Protocol::from_code("scp"), Protocol::Ftp);
        assert_eq!(Protocol::from_code(""), Protocol::Ftp);
    }

    #[test]
    fn test_default_ports() {
        assert_eq!(Protocol::Ftp.default_port(), "21");
        assert_eq!(Protocol::Ftps.default_port(), "21");
        assert_eq!(Protocol::Sftp.default_port(), "22");
    }

    #[test]
    fn test_security_flags() {
        assert!(!Protocol::Ftp.is_secure());
        assert!(Protocol::Ftps.is_secure());
        assert!(Protocol::Sftp.uses_ssh());
        assert!(!Protocol::Ftps.uses_ssh());
    }
}
