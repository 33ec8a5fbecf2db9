//! Passive-mode data-channel negotiation.
//!
//! Every transfer gets a fresh data socket: `EPSV` (RFC 2428) when the
//! control connection is IPv6, `PASV` otherwise. The advertised endpoint
//! is repaired when a NAT-ed server leaks its private address, optionally
//! reached through the SOCKS5 proxy, and wrapped in TLS when the control
//! channel is secured.

use crate::connection::{duration_from_ms, ControlChannel};
use crate::error::{FtpError, FtpResult};
use crate::socks::SocksTunnel;
use crate::tls;
use crate::types::FtpConfig;
use regex::Regex;
use std::net::{IpAddr, Ipv4Addr};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_native_tls::TlsStream;

/// A connected data channel. One per transfer, closed afterwards.
pub(crate) enum DataStream {
    Plain(TcpStream),
    Socks(SocksTunnel),
    Tls(TlsStream<TcpStream>),
    TlsSocks(TlsStream<SocksTunnel>),
}

impl DataStream {
    pub async fn shutdown(&mut self) -> std::io::Result<()> {
        match self {
            DataStream::Plain(s) => s.shutdown().await,
            DataStream::Socks(s) => s.shutdown().await,
            DataStream::Tls(s) => s.shutdown().await,
            DataStream::TlsSocks(s) => s.shutdown().await,
        }
    }
}

impl AsyncRead for DataStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match &mut *self {
            DataStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            DataStream::Socks(s) => Pin::new(s).poll_read(cx, buf),
            DataStream::Tls(s) => Pin::new(s).poll_read(cx, buf),
            DataStream::TlsSocks(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for DataStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match &mut *self {
            DataStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            DataStream::Socks(s) => Pin::new(s).poll_write(cx, buf),
            DataStream::Tls(s) => Pin::new(s).poll_write(cx, buf),
            DataStream::TlsSocks(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match &mut *self {
            DataStream::Plain(s) => Pin::new(s).poll_flush(cx),
            DataStream::Socks(s) => Pin::new(s).poll_flush(cx),
            DataStream::Tls(s) => Pin::new(s).poll_flush(cx),
            DataStream::TlsSocks(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match &mut *self {
            DataStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            DataStream::Socks(s) => Pin::new(s).poll_shutdown(cx),
            DataStream::Tls(s) => Pin::new(s).poll_shutdown(cx),
            DataStream::TlsSocks(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

/// Negotiate passive mode on the control channel and open the data socket.
///
/// The TLS handshake (when the control channel is secured) completes
/// before the stream is returned, so uploads never push payload into an
/// unencrypted socket.
pub(crate) async fn open_data_channel(
    channel: &mut ControlChannel,
    config: &FtpConfig,
) -> FtpResult<DataStream> {
    let (host, port) = if channel.is_ipv6() {
        let response = channel.expect_ok("EPSV").await?;
        // EPSV advertises only a port; connect to the control host.
        (config.host.clone(), parse_epsv_response(&response.text())?)
    } else {
        let response = channel.expect_ok("PASV").await?;
        let (advertised, port) = parse_pasv_response(&response.text())?;
        let target = repair_pasv_host(advertised, channel.remote_ip());
        (target.to_string(), port)
    };

    let connect_timeout = duration_from_ms(config.timeout_ms);
    let stream = if config.use_socks_proxy {
        let proxy_host = config
            .socks_proxy_host
            .as_deref()
            .ok_or_else(|| FtpError::invalid_config("useSocksProxy set without a proxy host"))?;
        let tunnel = SocksTunnel::connect(
            proxy_host,
            config.socks_proxy_port,
            &host,
            port,
            connect_timeout,
        )
        .await?;
        DataStream::Socks(tunnel)
    } else {
        let addr = format!("{}:{}", host, port);
        let connect = TcpStream::connect(&addr);
        let tcp = match connect_timeout {
            Some(dur) => timeout(dur, connect)
                .await
                .map_err(|_| FtpError::data_channel(format!("Data connect to {} timed out", addr)))?,
            None => connect.await,
        }
        .map_err(|e| FtpError::data_channel(format!("Data connect to {}: {}", addr, e)))?;
        tcp.set_nodelay(true).ok();
        DataStream::Plain(tcp)
    };

    if channel.is_secure() {
        let stream = match stream {
            DataStream::Plain(tcp) => DataStream::Tls(
                tls::wrap_stream(tcp, &config.host, &config.secure_options).await?,
            ),
            DataStream::Socks(tunnel) => DataStream::TlsSocks(
                tls::wrap_stream(tunnel, &config.host, &config.secure_options).await?,
            ),
            other => other,
        };
        return Ok(stream);
    }
    Ok(stream)
}

// ─── Reply parsing ───────────────────────────────────────────────────

/// Parse `(h1,h2,h3,h4,p1,p2)` from a 227 reply into host and port.
fn parse_pasv_response(text: &str) -> FtpResult<(Ipv4Addr, u16)> {
    let re = Regex::new(r"\((\d+),(\d+),(\d+),(\d+),(\d+),(\d+)\)").unwrap();
    let caps = re
        .captures(text)
        .ok_or_else(|| FtpError::protocol_error(format!("Cannot parse PASV reply: {}", text)))?;

    let mut numbers = [0u8; 6];
    for (i, slot) in numbers.iter_mut().enumerate() {
        *slot = caps[i + 1]
            .parse::<u8>()
            .map_err(|_| FtpError::protocol_error(format!("PASV octet out of range: {}", text)))?;
    }

    let host = Ipv4Addr::new(numbers[0], numbers[1], numbers[2], numbers[3]);
    let port = (numbers[4] as u16) * 256 + numbers[5] as u16;
    Ok((host, port))
}

/// Parse the port from a 229 reply: `(<d><d><d>port<d>)` where `<d>` is an
/// arbitrary delimiter, usually `|`.
fn parse_epsv_response(text: &str) -> FtpResult<u16> {
    let malformed = || FtpError::protocol_error(format!("Cannot parse EPSV reply: {}", text));

    let open = text.find('(').ok_or_else(malformed)?;
    let close = text[open..].find(')').ok_or_else(malformed)? + open;
    let inner = &text[open + 1..close];
    let delimiter = inner.chars().next().ok_or_else(malformed)?;

    let digits = inner.trim_matches(delimiter);
    if digits.is_empty() || digits.contains(delimiter) {
        return Err(malformed());
    }
    digits.parse::<u16>().map_err(|_| malformed())
}

// ─── NAT repair ──────────────────────────────────────────────────────

/// Replace an RFC1918 private address advertised by PASV with the control
/// channel's remote address, when that remote is itself public. Servers
/// behind NAT routinely leak their internal interface here.
fn repair_pasv_host(advertised: Ipv4Addr, control_remote: Option<IpAddr>) -> IpAddr {
    match control_remote {
        Some(remote) if is_private_ipv4_addr(advertised) && !is_private_remote(remote) => remote,
        _ => IpAddr::V4(advertised),
    }
}

fn is_private_ipv4_addr(ip: Ipv4Addr) -> bool {
    let [a, b, _, _] = ip.octets();
    a == 10 || (a == 172 && (16..=31).contains(&b)) || (a == 192 && b == 168)
}

fn is_private_remote(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_private_ipv4_addr(v4),
        IpAddr::V6(_) => false,
    }
}
