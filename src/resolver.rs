//! Transfer completion reconciliation.
//!
//! A passive-mode transfer finishes twice: the data channel signals clean
//! EOF, and the control channel delivers the terminal 2xx ("226 Transfer
//! complete"). The two arrive in either order. `TransferResolver` folds
//! both, plus any terminal fault, into exactly one outcome.
//!
//! The driver (`run_upload` / `run_download`) pumps payload and reads
//! control replies concurrently. While the data channel is active it owns
//! the idle clock: data I/O is deadline-wrapped and the control read waits
//! untimed, so a long transfer never times out the idle control channel.
//! Ownership moves back to the control channel once the pump finishes.
//!
//! Tunneled uploads get the size-probe treatment: the local pipeline
//! completing only proves the SOCKS proxy accepted the bytes, not that it
//! finished forwarding them, and closing the data socket at that point can
//! truncate the remote file (typically surfacing as ECONNRESET from the
//! proxy). Before closing, a second independent session queries
//! `SIZE remote_path`; a matching length arms `remote_size_alright`, which
//! downgrades a subsequent reset to a clean completion.

use crate::client::{FtpClient, ProgressScope};
use crate::connection::ControlChannel;
use crate::error::{FtpError, FtpErrorKind, FtpResult};
use crate::transfer::DataStream;
use crate::types::{FtpConfig, FtpResponse};
use std::future::Future;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout, Duration};

/// Streaming chunk size for transfers (64 KiB).
const CHUNK: usize = 65_536;

// ─── Resolver state machine ──────────────────────────────────────────

/// Reconciles data-channel and control-channel completion into one
/// one-shot outcome.
pub(crate) struct TransferResolver {
    data_done: bool,
    response: Option<FtpResponse>,
    error: Option<FtpError>,
    remote_size_alright: bool,
    settled: bool,
}

impl TransferResolver {
    pub fn new() -> Self {
        Self {
            data_done: false,
            response: None,
            error: None,
            remote_size_alright: false,
            settled: false,
        }
    }

    /// The transfer began; the data channel owns the idle clock until
    /// `on_data_done`.
    pub fn on_data_start(&mut self) {}

    /// Data channel reported clean completion.
    pub fn on_data_done(&mut self) {
        if self.settled {
            return;
        }
        self.data_done = true;
    }

    /// A terminal 2xx arrived on the control channel.
    pub fn on_control_done(&mut self, response: FtpResponse) {
        if self.settled || self.response.is_some() {
            return;
        }
        self.response = Some(response);
    }

    /// A 3xx arrived mid-transfer; the core cannot answer it.
    pub fn on_unexpected_request(&mut self, response: FtpResponse) {
        let code = response.code;
        self.on_error(
            FtpError::protocol_error(format!(
                "Unexpected intermediate reply during transfer: {}",
                response.text()
            ))
            .with_code(code),
        );
    }

    /// A terminal fault from either channel. The first one wins.
    ///
    /// A connection reset is absorbed when the size probe has already
    /// verified the server-side artifact: the proxy tearing down the
    /// tunnel after a confirmed-complete upload is not a failure.
    pub fn on_error(&mut self, error: FtpError) {
        if self.settled || self.error.is_some() {
            return;
        }
        if error.kind == FtpErrorKind::ConnectionReset && self.remote_size_alright {
            self.data_done = true;
            return;
        }
        self.error = Some(error);
    }

    pub fn set_remote_size_alright(&mut self, alright: bool) {
        self.remote_size_alright = self.remote_size_alright || alright;
    }

    /// Settle once: `Err` as soon as an error is recorded, `Ok(response)`
    /// when both completions are in. Later events are discarded.
    pub fn take_outcome(&mut self) -> Option<FtpResult<FtpResponse>> {
        if self.settled {
            return None;
        }
        if let Some(error) = self.error.take() {
            self.settled = true;
            return Some(Err(error));
        }
        if self.data_done {
            if let Some(response) = self.response.take() {
                self.settled = true;
                return Some(Ok(response));
            }
        }
        None
    }
}

// ─── Drivers ─────────────────────────────────────────────────────────

struct PumpEnd {
    bytes: u64,
    remote_size_alright: bool,
    result: FtpResult<()>,
}

impl PumpEnd {
    fn failed(bytes: u64, error: FtpError) -> Self {
        Self {
            bytes,
            remote_size_alright: false,
            result: Err(error),
        }
    }
}

/// Send `command` and run an upload: pump `source` into the data channel
/// while collecting control replies. Returns the terminal response and the
/// byte count.
pub(crate) async fn run_upload<R>(
    channel: &mut ControlChannel,
    config: &FtpConfig,
    mut data: DataStream,
    source: &mut R,
    command: &str,
    remote_path: &str,
    progress: &mut ProgressScope<'_>,
) -> FtpResult<(FtpResponse, u64)>
where
    R: AsyncRead + Unpin + ?Sized,
{
    channel.send(command).await?;
    let idle = channel.idle_timeout();
    let probe = config
        .use_socks_proxy
        .then_some(ProbeTarget { config, remote_path });

    let mut resolver = TransferResolver::new();
    resolver.on_data_start();
    let outcome = {
        let pump = pump_upload(&mut data, source, idle, probe, progress);
        drive(channel, &mut resolver, pump).await
    };
    settle(channel, outcome).await
}

/// Send `command` and run a download: pump the data channel into `sink`
/// while collecting control replies.
pub(crate) async fn run_download<W>(
    channel: &mut ControlChannel,
    _config: &FtpConfig,
    mut data: DataStream,
    sink: &mut W,
    command: &str,
    progress: &mut ProgressScope<'_>,
) -> FtpResult<(FtpResponse, u64)>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    channel.send(command).await?;
    let idle = channel.idle_timeout();

    let mut resolver = TransferResolver::new();
    resolver.on_data_start();
    let outcome = {
        let pump = pump_download(&mut data, sink, idle, progress);
        drive(channel, &mut resolver, pump).await
    };
    settle(channel, outcome).await
}

/// Feed resolver events from the pump and the control channel, in arrival
/// order, until the resolver settles.
async fn drive<F>(
    channel: &mut ControlChannel,
    resolver: &mut TransferResolver,
    pump: F,
) -> FtpResult<(FtpResponse, u64)>
where
    F: Future<Output = PumpEnd>,
{
    tokio::pin!(pump);
    let mut pump_done = false;
    let mut bytes = 0u64;

    loop {
        if let Some(outcome) = resolver.take_outcome() {
            return outcome.map(|response| (response, bytes));
        }

        // The clock belongs to the data channel until the pump finishes.
        let control_timeout = if pump_done {
            channel.idle_timeout()
        } else {
            None
        };

        tokio::select! {
            end = &mut pump, if !pump_done => {
                pump_done = true;
                bytes = end.bytes;
                resolver.set_remote_size_alright(end.remote_size_alright);
                match end.result {
                    Ok(()) => resolver.on_data_done(),
                    Err(e) => resolver.on_error(e),
                }
            }
            result = channel.read_response_with(control_timeout) => {
                match result {
                    Ok(response) if response.is_preliminary() => {
                        // 150: the server is opening its side; final reply
                        // still pending.
                    }
                    Ok(response) if response.is_completion() => {
                        resolver.on_control_done(response)
                    }
                    Ok(response) if response.is_intermediate() => {
                        resolver.on_unexpected_request(response)
                    }
                    Ok(response) => resolver.on_error(
                        FtpError::from_reply(response.code, &response.text()),
                    ),
                    Err(e) => resolver.on_error(e),
                }
            }
        }
    }
}

/// Tear down the control channel on fatal errors; a plain reply error
/// (4xx/5xx final response) leaves the session usable.
async fn settle(
    channel: &mut ControlChannel,
    outcome: FtpResult<(FtpResponse, u64)>,
) -> FtpResult<(FtpResponse, u64)> {
    if let Err(error) = &outcome {
        if !error.is_recoverable() {
            channel.close().await;
        }
    }
    outcome
}

// ─── Pumps ───────────────────────────────────────────────────────────

struct ProbeTarget<'a> {
    config: &'a FtpConfig,
    remote_path: &'a str,
}

async fn pump_upload<R>(
    data: &mut DataStream,
    source: &mut R,
    idle: Option<Duration>,
    probe: Option<ProbeTarget<'_>>,
    progress: &mut ProgressScope<'_>,
) -> PumpEnd
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut sent = 0u64;
    let mut buf = vec![0u8; CHUNK];

    loop {
        let n = match source.read(&mut buf).await {
            Ok(n) => n,
            Err(e) => return PumpEnd::failed(sent, e.into()),
        };
        if n == 0 {
            break;
        }
        if let Err(e) = io_deadline(idle, data.write_all(&buf[..n]), "data write").await {
            return PumpEnd::failed(sent, e);
        }
        sent += n as u64;
        progress.update(sent);
    }
    if let Err(e) = io_deadline(idle, data.flush(), "data flush").await {
        return PumpEnd::failed(sent, e);
    }

    // End of input. For a tunneled upload, verify the server-side length
    // over an independent session before touching the data socket.
    let mut alright = false;
    if let Some(target) = probe {
        match probe_remote_size(target.config, target.remote_path).await {
            Ok(remote_size) if remote_size == sent => {
                log::trace!(
                    "Size probe confirmed {} bytes at {}",
                    remote_size,
                    target.remote_path
                );
                alright = true;
            }
            Ok(remote_size) => {
                let _ = data.shutdown().await;
                return PumpEnd::failed(
                    sent,
                    FtpError::transfer_incomplete(format!(
                        "Server holds {} of {} bytes for {}",
                        remote_size, sent, target.remote_path
                    )),
                );
            }
            Err(e) => {
                // Probe unavailable: proceed to the normal disposition
                // without the success flag.
                log::warn!("Upload size probe failed: {}", e);
            }
        }
    }

    let result = data.shutdown().await.map_err(FtpError::from);
    PumpEnd {
        bytes: sent,
        remote_size_alright: alright,
        result,
    }
}

async fn pump_download<W>(
    data: &mut DataStream,
    sink: &mut W,
    idle: Option<Duration>,
    progress: &mut ProgressScope<'_>,
) -> PumpEnd
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut received = 0u64;
    let mut buf = vec![0u8; CHUNK];

    loop {
        let n = match io_deadline(idle, data.read(&mut buf), "data read").await {
            Ok(n) => n,
            Err(e) => return PumpEnd::failed(received, e),
        };
        if n == 0 {
            break;
        }
        if let Err(e) = sink.write_all(&buf[..n]).await {
            return PumpEnd::failed(received, e.into());
        }
        received += n as u64;
        progress.update(received);
    }
    if let Err(e) = sink.flush().await {
        return PumpEnd::failed(received, e.into());
    }

    PumpEnd {
        bytes: received,
        remote_size_alright: false,
        result: Ok(()),
    }
}

async fn io_deadline<T>(
    idle: Option<Duration>,
    op: impl Future<Output = std::io::Result<T>>,
    what: &str,
) -> FtpResult<T> {
    match idle {
        Some(dur) => match timeout(dur, op).await {
            Ok(result) => result.map_err(FtpError::from),
            Err(_) => Err(FtpError::timeout(format!(
                "Data channel idle timeout during {}",
                what
            ))),
        },
        None => op.await.map_err(FtpError::from),
    }
}

/// Query `SIZE remote_path` over a fresh independent session with the same
/// credentials. Requires the server to permit concurrent logins.
async fn probe_remote_size(config: &FtpConfig, remote_path: &str) -> FtpResult<u64> {
    let probe = FtpClient::access(config.clone()).await?;
    let size = probe.size(remote_path).await;
    let _ = probe.quit().await;
    size
}
