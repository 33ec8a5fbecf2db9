//! The FTP control channel.
//!
//! Owns the long-lived command/response connection — plain TCP, a SOCKS5
//! tunnel, or either of those under TLS — and pairs it with the streaming
//! reply parser. Commands go out in the configured charset, CR LF
//! terminated; replies come back in wire order.
//!
//! Any socket error, malformed reply, or idle timeout marks the channel
//! dead. A dead channel refuses further traffic; the client must
//! re-`access` to get a fresh one.

use crate::error::{FtpError, FtpResult};
use crate::protocol::ReplyParser;
use crate::socks::SocksTunnel;
use crate::tls;
use crate::types::{Charset, FtpConfig, FtpResponse, SecurityMode};
use std::collections::VecDeque;
use std::net::IpAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tokio_native_tls::TlsStream;

const READ_CHUNK: usize = 4096;

/// The transport under the control channel.
pub(crate) enum ControlStream {
    Plain(TcpStream),
    Socks(SocksTunnel),
    Tls(TlsStream<TcpStream>),
    TlsSocks(TlsStream<SocksTunnel>),
}

impl AsyncRead for ControlStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match &mut *self {
            ControlStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            ControlStream::Socks(s) => Pin::new(s).poll_read(cx, buf),
            ControlStream::Tls(s) => Pin::new(s).poll_read(cx, buf),
            ControlStream::TlsSocks(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ControlStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match &mut *self {
            ControlStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            ControlStream::Socks(s) => Pin::new(s).poll_write(cx, buf),
            ControlStream::Tls(s) => Pin::new(s).poll_write(cx, buf),
            ControlStream::TlsSocks(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match &mut *self {
            ControlStream::Plain(s) => Pin::new(s).poll_flush(cx),
            ControlStream::Socks(s) => Pin::new(s).poll_flush(cx),
            ControlStream::Tls(s) => Pin::new(s).poll_flush(cx),
            ControlStream::TlsSocks(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match &mut *self {
            ControlStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            ControlStream::Socks(s) => Pin::new(s).poll_shutdown(cx),
            ControlStream::Tls(s) => Pin::new(s).poll_shutdown(cx),
            ControlStream::TlsSocks(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

/// Line-oriented, encoding-aware duplex over the control connection.
pub(crate) struct ControlChannel {
    stream: ControlStream,
    parser: ReplyParser,
    pending: VecDeque<FtpResponse>,
    encoding: Charset,
    /// Idle timeout for reads while this channel owns the clock.
    timeout: Option<Duration>,
    verbose: bool,
    /// Remote address of the FTP server; unknown through a SOCKS proxy
    /// unless the host was configured as an IP literal.
    remote_ip: Option<IpAddr>,
    ipv6: bool,
    secure: bool,
    dead: bool,
}

impl ControlChannel {
    /// Dial the control connection per config: directly or through the
    /// SOCKS5 proxy, wrapping in TLS immediately for implicit FTPS.
    pub async fn connect(config: &FtpConfig) -> FtpResult<Self> {
        let connect_timeout = duration_from_ms(config.timeout_ms);

        let (stream, remote_ip) = if config.use_socks_proxy {
            let proxy_host = config
                .socks_proxy_host
                .as_deref()
                .ok_or_else(|| FtpError::invalid_config("useSocksProxy set without a proxy host"))?;
            let tunnel = SocksTunnel::connect(
                proxy_host,
                config.socks_proxy_port,
                &config.host,
                config.port,
                connect_timeout,
            )
            .await?;
            // The TCP peer is the proxy; the server address is only known
            // when configured as a literal.
            let remote_ip = config.host.parse::<IpAddr>().ok();
            (ControlStream::Socks(tunnel), remote_ip)
        } else {
            let addr = format!("{}:{}", config.host, config.port);
            let connect = TcpStream::connect(&addr);
            let tcp = match connect_timeout {
                Some(dur) => timeout(dur, connect).await.map_err(|_| {
                    FtpError::timeout(format!("TCP connect to {} timed out", addr))
                })?,
                None => connect.await,
            }
            .map_err(|e| FtpError::connection_failed(format!("TCP connect to {}: {}", addr, e)))?;
            tcp.set_nodelay(true).ok();
            let remote_ip = tcp.peer_addr().ok().map(|a| a.ip());
            (ControlStream::Plain(tcp), remote_ip)
        };

        let ipv6 = matches!(remote_ip, Some(IpAddr::V6(_)))
            || config.host.parse::<IpAddr>().map(|ip| ip.is_ipv6()).unwrap_or(false);

        let mut channel = Self {
            stream,
            parser: ReplyParser::new(config.encoding),
            pending: VecDeque::new(),
            encoding: config.encoding,
            timeout: connect_timeout,
            verbose: config.verbose,
            remote_ip,
            ipv6,
            secure: false,
            dead: false,
        };
        channel.log(format!(
            "Connected to {}:{}{}",
            config.host,
            config.port,
            if config.use_socks_proxy {
                " via SOCKS5"
            } else {
                ""
            }
        ));

        // Implicit FTPS wraps the socket before the greeting.
        if config.secure == SecurityMode::Implicit {
            channel = channel.into_tls(config).await?;
        }
        Ok(channel)
    }

    /// Upgrade the channel to TLS on the same socket. Consumes the plain
    /// channel; used after `AUTH TLS` and for implicit FTPS.
    pub async fn into_tls(self, config: &FtpConfig) -> FtpResult<Self> {
        let ControlChannel {
            stream,
            parser,
            pending,
            encoding,
            timeout,
            verbose,
            remote_ip,
            ipv6,
            dead,
            ..
        } = self;

        let stream = match stream {
            ControlStream::Plain(tcp) => {
                ControlStream::Tls(tls::wrap_stream(tcp, &config.host, &config.secure_options).await?)
            }
            ControlStream::Socks(tunnel) => ControlStream::TlsSocks(
                tls::wrap_stream(tunnel, &config.host, &config.secure_options).await?,
            ),
            ControlStream::Tls(_) | ControlStream::TlsSocks(_) => {
                return Err(FtpError::protocol_error(
                    "Control channel is already encrypted",
                ))
            }
        };

        log::trace!("Control channel upgraded to TLS");
        Ok(ControlChannel {
            stream,
            parser,
            pending,
            encoding,
            timeout,
            verbose,
            remote_ip,
            ipv6,
            secure: true,
            dead,
        })
    }

    // ─── Sending ─────────────────────────────────────────────────

    /// Send a command verbatim, CR LF terminated. Passwords are redacted
    /// from the log line.
    pub async fn send(&mut self, command: &str) -> FtpResult<()> {
        if self.dead {
            return Err(FtpError::disconnected("Control channel is closed"));
        }
        let mut wire = self.encoding.encode(command);
        wire.extend_from_slice(b"\r\n");
        if let Err(e) = self.stream.write_all(&wire).await {
            self.dead = true;
            return Err(FtpError::from(e));
        }
        if let Err(e) = self.stream.flush().await {
            self.dead = true;
            return Err(FtpError::from(e));
        }
        self.log(format!("> {}", redact(command)));
        Ok(())
    }

    // ─── Receiving ───────────────────────────────────────────────

    /// Read the next complete response, applying this channel's own idle
    /// timeout.
    pub async fn read_response(&mut self) -> FtpResult<FtpResponse> {
        let dur = self.timeout;
        self.read_response_with(dur).await
    }

    /// Read the next complete response with an explicit timeout override.
    /// `None` waits indefinitely — used while the data channel owns the
    /// clock during a transfer.
    ///
    /// Cancel-safe: a partially received reply stays buffered in the
    /// parser, so dropping this future between socket reads loses nothing.
    pub async fn read_response_with(
        &mut self,
        idle_timeout: Option<Duration>,
    ) -> FtpResult<FtpResponse> {
        loop {
            if let Some(response) = self.pending.pop_front() {
                self.log(format!("< {}", response.text()));
                return Ok(response);
            }
            if self.dead {
                return Err(FtpError::disconnected("Control channel is closed"));
            }

            let mut chunk = [0u8; READ_CHUNK];
            let outcome = match idle_timeout {
                Some(dur) => timeout(dur, self.stream.read(&mut chunk)).await,
                None => Ok(self.stream.read(&mut chunk).await),
            };
            let n = match outcome {
                Err(_) => {
                    self.dead = true;
                    return Err(FtpError::timeout("Control channel idle timeout"));
                }
                Ok(Err(e)) => {
                    self.dead = true;
                    return Err(FtpError::from(e));
                }
                Ok(Ok(0)) => {
                    self.dead = true;
                    return Err(FtpError::disconnected("Server closed the connection"));
                }
                Ok(Ok(n)) => n,
            };

            match self.parser.feed(&chunk[..n]) {
                Ok(batch) => self.pending.extend(batch),
                Err(e) => {
                    self.dead = true;
                    return Err(e);
                }
            }
        }
    }

    /// Send a command and return its response.
    pub async fn execute(&mut self, command: &str) -> FtpResult<FtpResponse> {
        self.send(command).await?;
        self.read_response().await
    }

    /// Send a command and require a reply of the given first digit.
    pub async fn expect(&mut self, command: &str, first_digit: u16) -> FtpResult<FtpResponse> {
        let response = self.execute(command).await?;
        if response.code / 100 != first_digit {
            return Err(FtpError::from_reply(response.code, &response.text()));
        }
        Ok(response)
    }

    /// Send a command and require a 2xx reply.
    pub async fn expect_ok(&mut self, command: &str) -> FtpResult<FtpResponse> {
        self.expect(command, 2).await
    }

    // ─── State ───────────────────────────────────────────────────

    pub fn remote_ip(&self) -> Option<IpAddr> {
        self.remote_ip
    }

    pub fn is_ipv6(&self) -> bool {
        self.ipv6
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn is_dead(&self) -> bool {
        self.dead
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Close the underlying socket. The channel is unusable afterwards.
    pub async fn close(&mut self) {
        self.dead = true;
        let _ = self.stream.shutdown().await;
        self.log("Control channel closed".to_string());
    }

    fn log(&self, line: String) {
        if self.verbose {
            log::info!("{}", line);
        } else {
            log::trace!("{}", line);
        }
    }
}

pub(crate) fn duration_from_ms(ms: u64) -> Option<Duration> {
    if ms == 0 {
        None
    } else {
        Some(Duration::from_millis(ms))
    }
}

/// Hide password arguments in logged commands.
fn redact(command: &str) -> String {
    if command.len() >= 4 && command[..4].eq_ignore_ascii_case("PASS") {
        "PASS ***".to_string()
    } else {
        command.to_string()
    }
}
