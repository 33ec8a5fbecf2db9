//! SOCKS5 tunneling socket (RFC 1928, unauthenticated CONNECT only).
//!
//! `SocksTunnel` negotiates the greeting and CONNECT request against the
//! proxy, then behaves like a plain TCP stream: it implements `AsyncRead`
//! and `AsyncWrite`, so the control channel and the data-channel factory
//! can hand one out wherever a direct socket would go. Negotiation bytes
//! are raw; the consumer's charset applies only to the payload.
//!
//! Negotiation completes inside `connect()`, before the tunnel is handed
//! to callers. Payload writes therefore cannot race the handshake and are
//! forwarded in issue order.

use crate::error::{FtpError, FtpResult};
use std::net::IpAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};

const SOCKS_VERSION: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_NONE_ACCEPTABLE: u8 = 0xFF;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// A TCP connection tunneled through a SOCKS5 proxy.
#[derive(Debug)]
pub struct SocksTunnel {
    stream: TcpStream,
}

impl SocksTunnel {
    /// Open a connection to `target_host:target_port` through the proxy at
    /// `proxy_host:proxy_port`. Returns only once the tunnel is
    /// established; any negotiation failure is terminal.
    pub async fn connect(
        proxy_host: &str,
        proxy_port: u16,
        target_host: &str,
        target_port: u16,
        connect_timeout: Option<Duration>,
    ) -> FtpResult<Self> {
        let negotiate = Self::negotiate(proxy_host, proxy_port, target_host, target_port);
        match connect_timeout {
            Some(dur) => timeout(dur, negotiate).await.map_err(|_| {
                FtpError::timeout(format!(
                    "SOCKS5 negotiation with {}:{} timed out",
                    proxy_host, proxy_port
                ))
            })?,
            None => negotiate.await,
        }
    }

    async fn negotiate(
        proxy_host: &str,
        proxy_port: u16,
        target_host: &str,
        target_port: u16,
    ) -> FtpResult<Self> {
        let addr = format!("{}:{}", proxy_host, proxy_port);
        let mut stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| FtpError::socks(format!("Cannot reach SOCKS5 proxy {}: {}", addr, e)))?;
        stream.set_nodelay(true).ok();

        // Greeting: version 5, one method, no authentication.
        stream
            .write_all(&[SOCKS_VERSION, 1, METHOD_NO_AUTH])
            .await
            .map_err(|e| FtpError::socks(format!("SOCKS5 greeting: {}", e)))?;

        let mut choice = [0u8; 2];
        stream
            .read_exact(&mut choice)
            .await
            .map_err(|e| FtpError::socks(format!("SOCKS5 greeting reply: {}", e)))?;
        if choice[0] != SOCKS_VERSION {
            return Err(FtpError::socks(format!(
                "Proxy speaks SOCKS version {}, expected 5",
                choice[0]
            )));
        }
        match choice[1] {
            METHOD_NO_AUTH => {}
            METHOD_NONE_ACCEPTABLE => {
                return Err(FtpError::socks("Proxy rejected all authentication methods"))
            }
            other => {
                return Err(FtpError::socks(format!(
                    "Proxy requires unsupported authentication method {:#04x}",
                    other
                )))
            }
        }

        // CONNECT request.
        let request = build_connect_request(target_host, target_port)?;
        stream
            .write_all(&request)
            .await
            .map_err(|e| FtpError::socks(format!("SOCKS5 CONNECT: {}", e)))?;

        let mut head = [0u8; 4];
        stream
            .read_exact(&mut head)
            .await
            .map_err(|e| FtpError::socks(format!("SOCKS5 CONNECT reply: {}", e)))?;
        if head[0] != SOCKS_VERSION {
            return Err(FtpError::socks(format!(
                "CONNECT reply has version {}, expected 5",
                head[0]
            )));
        }
        if head[1] != 0x00 {
            return Err(FtpError::socks(format!(
                "CONNECT to {}:{} failed: {}",
                target_host,
                target_port,
                reply_reason(head[1])
            )));
        }
        if head[2] != 0x00 {
            return Err(FtpError::socks(format!(
                "CONNECT reply has non-zero reserved byte {:#04x}",
                head[2]
            )));
        }

        // Bound address, unused but must be drained.
        match head[3] {
            ATYP_IPV4 => {
                let mut addr = [0u8; 4];
                stream
                    .read_exact(&mut addr)
                    .await
                    .map_err(|e| FtpError::socks(format!("SOCKS5 bound address: {}", e)))?;
            }
            ATYP_IPV6 => {
                let mut addr = [0u8; 16];
                stream
                    .read_exact(&mut addr)
                    .await
                    .map_err(|e| FtpError::socks(format!("SOCKS5 bound address: {}", e)))?;
            }
            ATYP_DOMAIN => {
                let mut len = [0u8; 1];
                stream
                    .read_exact(&mut len)
                    .await
                    .map_err(|e| FtpError::socks(format!("SOCKS5 bound address: {}", e)))?;
                let mut name = vec![0u8; len[0] as usize];
                stream
                    .read_exact(&mut name)
                    .await
                    .map_err(|e| FtpError::socks(format!("SOCKS5 bound address: {}", e)))?;
            }
            other => {
                return Err(FtpError::socks(format!(
                    "CONNECT reply has unknown address type {:#04x}",
                    other
                )))
            }
        }
        let mut port = [0u8; 2];
        stream
            .read_exact(&mut port)
            .await
            .map_err(|e| FtpError::socks(format!("SOCKS5 bound port: {}", e)))?;

        log::trace!(
            "SOCKS5 tunnel established via {} to {}:{}",
            addr,
            target_host,
            target_port
        );
        Ok(Self { stream })
    }
}

/// Encode a CONNECT request for the target endpoint.
///
/// IP literals are sent as binary addresses (IPv6 expanded from `::`
/// shorthand by the address type itself); anything else is sent as a
/// domain name for the proxy to resolve.
fn build_connect_request(host: &str, port: u16) -> FtpResult<Vec<u8>> {
    let mut request = vec![SOCKS_VERSION, CMD_CONNECT, 0x00];
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => {
            request.push(ATYP_IPV4);
            request.extend_from_slice(&v4.octets());
        }
        Ok(IpAddr::V6(v6)) => {
            request.push(ATYP_IPV6);
            request.extend_from_slice(&v6.octets());
        }
        Err(_) => {
            if host.is_empty() || host.len() > 255 || !host.is_ascii() {
                return Err(FtpError::socks(format!(
                    "Host '{}' is not representable as a SOCKS5 domain",
                    host
                )));
            }
            request.push(ATYP_DOMAIN);
            request.push(host.len() as u8);
            request.extend_from_slice(host.as_bytes());
        }
    }
    request.extend_from_slice(&port.to_be_bytes());
    Ok(request)
}

/// RFC 1928 §6 reply-code table.
fn reply_reason(code: u8) -> &'static str {
    match code {
        0x01 => "general SOCKS server failure",
        0x02 => "connection not allowed by ruleset",
        0x03 => "network unreachable",
        0x04 => "host unreachable",
        0x05 => "connection refused",
        0x06 => "TTL expired",
        0x07 => "command not supported",
        0x08 => "address type not supported",
        _ => "unassigned reply code",
    }
}

// ─── Stream passthrough ──────────────────────────────────────────────

impl AsyncRead for SocksTunnel {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for SocksTunnel {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}
