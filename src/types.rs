//! Shared types for the crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ─── Connection / Session ────────────────────────────────────────────

/// Security mode for the control channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SecurityMode {
    /// Plain-text FTP (port 21).
    None,
    /// Explicit FTPS — starts plain then upgrades via AUTH TLS (port 21).
    Explicit,
    /// Implicit FTPS — TLS from the first byte (port 990).
    Implicit,
}

impl Default for SecurityMode {
    fn default() -> Self {
        Self::None
    }
}

/// Character set used for control-channel text and listing decode.
///
/// Reply codes are always ASCII in the first three bytes, so the parser is
/// charset-agnostic for framing; only the line text is affected.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Charset {
    Utf8,
    Latin1,
}

impl Default for Charset {
    fn default() -> Self {
        Self::Utf8
    }
}

impl Charset {
    pub fn encode(&self, text: &str) -> Vec<u8> {
        match self {
            Charset::Utf8 => text.as_bytes().to_vec(),
            Charset::Latin1 => text
                .chars()
                .map(|c| if (c as u32) < 256 { c as u8 } else { b'?' })
                .collect(),
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            Charset::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Charset::Latin1 => bytes.iter().map(|&b| b as char).collect(),
        }
    }
}

/// TLS settings applied to both the control and data channels.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsOptions {
    /// Accept self-signed / untrusted certificates.
    #[serde(default)]
    pub accept_invalid_certs: bool,
    /// Override the SNI / verification hostname (defaults to `host`).
    #[serde(default)]
    pub sni_host: Option<String>,
}

/// Configuration for a single FTP connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FtpConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_password")]
    pub password: String,
    #[serde(default)]
    pub secure: SecurityMode,
    #[serde(default)]
    pub secure_options: TlsOptions,
    /// Route the control and data channels through a SOCKS5 proxy.
    #[serde(default)]
    pub use_socks_proxy: bool,
    #[serde(default)]
    pub socks_proxy_host: Option<String>,
    #[serde(default = "default_socks_port")]
    pub socks_proxy_port: u16,
    /// Idle timeout in milliseconds for the active socket (0 disables).
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
    /// Log commands and responses at `info` instead of `trace`.
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub encoding: Charset,
}

fn default_host() -> String {
    "localhost".into()
}
fn default_port() -> u16 {
    21
}
fn default_user() -> String {
    "anonymous".into()
}
fn default_password() -> String {
    "guest".into()
}
fn default_socks_port() -> u16 {
    1080
}
fn default_timeout() -> u64 {
    30_000
}

impl Default for FtpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            user: default_user(),
            password: default_password(),
            secure: SecurityMode::None,
            secure_options: TlsOptions::default(),
            use_socks_proxy: false,
            socks_proxy_host: None,
            socks_proxy_port: default_socks_port(),
            timeout_ms: default_timeout(),
            verbose: false,
            encoding: Charset::Utf8,
        }
    }
}

/// Information about an active FTP session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FtpSessionInfo {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub secure: SecurityMode,
    pub current_directory: String,
    pub server_banner: Option<String>,
    pub system_type: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub bytes_uploaded: u64,
    pub bytes_downloaded: u64,
}

// ─── FTP Response ────────────────────────────────────────────────────

/// A single FTP response (may be multi-line).
///
/// `lines` holds every line as received, CR LF stripped, framing intact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FtpResponse {
    pub code: u16,
    pub lines: Vec<String>,
}

impl FtpResponse {
    /// Full raw response text (all lines joined with newlines).
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    /// Response text with the reply-code framing stripped.
    ///
    /// The opening line loses its `NNN-` / `NNN ` prefix, the terminating
    /// line of a multi-line reply loses its `NNN` prefix, and continuation
    /// lines are kept verbatim (leading whitespace preserved).
    pub fn message(&self) -> String {
        let last = self.lines.len().saturating_sub(1);
        self.lines
            .iter()
            .enumerate()
            .map(|(i, line)| {
                if i == 0 {
                    strip_prefix(line, 4)
                } else if i == last {
                    strip_prefix(line, 3)
                } else {
                    line.as_str()
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn is_multiline(&self) -> bool {
        self.lines.len() > 1
    }

    /// Whether the response code indicates success (1xx–3xx).
    pub fn is_success(&self) -> bool {
        self.code < 400
    }

    /// Whether this is a positive-preliminary reply (1xx).
    pub fn is_preliminary(&self) -> bool {
        (100..200).contains(&self.code)
    }

    /// Whether this is a positive-completion reply (2xx).
    pub fn is_completion(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Whether this is a positive-intermediate reply (3xx).
    pub fn is_intermediate(&self) -> bool {
        (300..400).contains(&self.code)
    }
}

fn strip_prefix(line: &str, width: usize) -> &str {
    if line.len() >= width && line.as_bytes()[..3].iter().all(|b| b.is_ascii_digit()) {
        &line[width..]
    } else if line.as_bytes().iter().take(3).all(|b| b.is_ascii_digit()) && line.len() <= 3 {
        ""
    } else {
        line
    }
}

// ─── Server capabilities ─────────────────────────────────────────────

/// Parsed FEAT response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerFeatures {
    pub mlsd: bool,
    pub mlst: bool,
    pub size: bool,
    pub mdtm: bool,
    pub rest_stream: bool,
    pub utf8: bool,
    pub auth_tls: bool,
    pub raw_features: Vec<String>,
}

// ─── Directory listing ───────────────────────────────────────────────

/// Type of a remote filesystem entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FtpEntryKind {
    File,
    Directory,
    Symlink,
    Unknown,
}

/// One entry from a directory listing (parsed from LIST or MLSD output).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FtpEntry {
    pub name: String,
    pub kind: FtpEntryKind,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    pub permissions: Option<String>,
    pub owner: Option<String>,
    pub group: Option<String>,
    pub link_target: Option<String>,
    /// Raw line from the server.
    pub raw: Option<String>,
    /// MLSD fact map (e.g. "type" → "file", "size" → "1234").
    #[serde(default)]
    pub facts: HashMap<String, String>,
}

/// Sorting field for directory listings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FtpSortField {
    Name,
    Size,
    Modified,
    Kind,
}

/// Sort order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FtpSortOrder {
    Asc,
    Desc,
}

/// Options for listing a directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListOptions {
    /// Filter by glob pattern (e.g. "*.txt").
    pub filter: Option<String>,
    pub sort_by: Option<FtpSortField>,
    pub sort_order: Option<FtpSortOrder>,
    /// Show hidden ("dot") files.
    #[serde(default = "default_show_hidden")]
    pub show_hidden: bool,
}

fn default_show_hidden() -> bool {
    true
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            filter: None,
            sort_by: None,
            sort_order: None,
            show_hidden: true,
        }
    }
}

// ─── Transfer progress ───────────────────────────────────────────────

/// What kind of payload a transfer moves.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TransferKind {
    Upload,
    Download,
    List,
}

/// Snapshot handed to a progress callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    /// Remote name of the transfer (path, or the listing target).
    pub name: String,
    pub kind: TransferKind,
    /// Bytes moved by the current transfer.
    pub bytes: u64,
    /// Bytes moved since the handler was installed.
    pub bytes_overall: u64,
}
