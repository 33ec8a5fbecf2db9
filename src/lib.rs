//! # socksftp — async FTP/FTPS client with SOCKS5 tunneling
//!
//! An FTP client (RFC 959) built on tokio, with the extensions real
//! servers expect:
//! - **RFC 4217** — FTPS, explicit (`AUTH TLS`) and implicit
//! - **RFC 2428** — EPSV for IPv6 passive mode
//! - **RFC 3659** — MLSD/MLST, SIZE, MDTM, REST
//! - **RFC 1928** — SOCKS5 CONNECT tunneling for both channels
//!
//! Transfers use passive mode exclusively: a fresh data socket per
//! transfer, with NAT repair for servers that advertise their private
//! address, TLS on the data channel whenever the control channel is
//! secured, and a dual-completion coordinator that reconciles data-channel
//! EOF with the server's final "226 Transfer complete" — including the
//! SOCKS5 upload case where local completion cannot be trusted and an
//! out-of-band size probe decides.
//!
//! Architecture:
//! - `types` — configuration, responses, session and listing types
//! - `error` — categorised error type
//! - `protocol` — incremental multi-line reply parser
//! - `connection` — control-channel transport (TCP / SOCKS / TLS)
//! - `queue` — command serialization (one round trip in flight)
//! - `socks` — SOCKS5 CONNECT tunnel as a drop-in socket
//! - `transfer` — EPSV/PASV negotiation and data sockets
//! - `resolver` — transfer completion reconciliation + size probe
//! - `client` — the `FtpClient` facade
//! - `parser` — LIST/MLSD listing grammars
//! - `directory`, `file_ops` — tree operations and local-file helpers
//!
//! ```no_run
//! use socksftp::{FtpClient, FtpConfig};
//!
//! # async fn example() -> socksftp::FtpResult<()> {
//! let client = FtpClient::access(FtpConfig {
//!     host: "ftp.example.org".into(),
//!     user: "demo".into(),
//!     password: "secret".into(),
//!     ..FtpConfig::default()
//! })
//! .await?;
//!
//! for entry in client.list(None).await? {
//!     println!("{} ({} bytes)", entry.name, entry.size);
//! }
//! client.download_file("remote.bin", "local.bin").await?;
//! client.quit().await?;
//! # Ok(())
//! # }
//! ```

mod connection;
mod queue;
mod resolver;
mod tls;
mod transfer;

pub mod client;
pub mod error;
pub mod parser;
pub mod protocol;
pub mod socks;
pub mod types;

mod directory;
mod file_ops;

pub use client::FtpClient;
pub use error::{FtpError, FtpErrorKind, FtpResult};
pub use socks::SocksTunnel;
pub use types::*;
