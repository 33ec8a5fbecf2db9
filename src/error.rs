//! Categorised error type for the crate.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An FTP client error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FtpError {
    pub kind: FtpErrorKind,
    pub message: String,
    /// FTP response code that triggered the error, if any.
    pub code: Option<u16>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FtpErrorKind {
    /// TCP / DNS resolution failure on the control channel.
    ConnectionFailed,
    /// TLS handshake or configuration failure.
    TlsFailed,
    /// Wrong username/password.
    AuthFailed,
    /// Server returned a 4xx/5xx for a command. The control channel
    /// remains usable.
    CommandRejected,
    /// Data channel could not be established (EPSV/PASV or connect failed).
    DataChannelFailed,
    /// SOCKS5 negotiation failure.
    Socks,
    /// A tunneled upload did not arrive complete at the server.
    TransferIncomplete,
    /// Server sent an un-parseable or unexpected response.
    ProtocolError,
    /// An I/O error on the local side.
    IoError,
    /// The peer reset the connection.
    ConnectionReset,
    /// Idle timeout exceeded on the active socket. Fatal; the client must
    /// re-`access`.
    Timeout,
    /// Remote side closed the control connection.
    Disconnected,
    /// Operation submitted against a closed client.
    Closed,
    /// File/directory not found on the server.
    NotFound,
    /// Permission denied on the server.
    PermissionDenied,
    /// Config / parameter validation error.
    InvalidConfig,
    /// Catch-all.
    Unknown,
}

pub type FtpResult<T> = Result<T, FtpError>;

// ── Construction helpers ─────────────────────────────────────────────

impl FtpError {
    pub fn new(kind: FtpErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: u16) -> Self {
        self.code = Some(code);
        self
    }

    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::ConnectionFailed, msg)
    }

    pub fn tls_failed(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::TlsFailed, msg)
    }

    pub fn auth_failed(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::AuthFailed, msg)
    }

    pub fn data_channel(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::DataChannelFailed, msg)
    }

    pub fn socks(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::Socks, msg)
    }

    pub fn transfer_incomplete(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::TransferIncomplete, msg)
    }

    pub fn protocol_error(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::ProtocolError, msg)
    }

    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::IoError, msg)
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::Timeout, msg)
    }

    pub fn disconnected(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::Disconnected, msg)
    }

    pub fn closed() -> Self {
        Self::new(FtpErrorKind::Closed, "Client is closed")
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::InvalidConfig, msg)
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::InvalidConfig, msg)
    }

    /// Whether the control channel survives this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind,
            FtpErrorKind::CommandRejected
                | FtpErrorKind::AuthFailed
                | FtpErrorKind::NotFound
                | FtpErrorKind::PermissionDenied
        )
    }

    /// Classify an FTP reply code into the most appropriate error kind.
    pub fn from_reply(code: u16, text: &str) -> Self {
        let kind = match code {
            421 => FtpErrorKind::Disconnected,
            425 | 426 => FtpErrorKind::DataChannelFailed,
            430 | 530 | 532 => FtpErrorKind::AuthFailed,
            450 | 550 => {
                let lower = text.to_lowercase();
                if lower.contains("permission") || lower.contains("denied") {
                    FtpErrorKind::PermissionDenied
                } else if lower.contains("not found") || lower.contains("no such") {
                    FtpErrorKind::NotFound
                } else {
                    FtpErrorKind::CommandRejected
                }
            }
            400..=599 => FtpErrorKind::CommandRejected,
            _ => FtpErrorKind::Unknown,
        };
        Self {
            kind,
            message: text.to_string(),
            code: Some(code),
        }
    }
}

impl fmt::Display for FtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = self.code {
            write!(f, "[{:?} {}] {}", self.kind, code, self.message)
        } else {
            write!(f, "[{:?}] {}", self.kind, self.message)
        }
    }
}

impl std::error::Error for FtpError {}

impl From<std::io::Error> for FtpError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::TimedOut => Self::timeout(format!("I/O timeout: {}", e)),
            std::io::ErrorKind::ConnectionReset => {
                Self::new(FtpErrorKind::ConnectionReset, e.to_string())
            }
            std::io::ErrorKind::UnexpectedEof => Self::disconnected(e.to_string()),
            _ => Self::io_error(e.to_string()),
        }
    }
}

impl From<native_tls::Error> for FtpError {
    fn from(e: native_tls::Error) -> Self {
        Self::tls_failed(e.to_string())
    }
}
