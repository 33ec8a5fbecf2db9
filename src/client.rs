//! Stateful FTP client — the public face of the crate.
//!
//! `access()` opens the control connection (optionally through SOCKS5),
//! performs the TLS and login sequence, probes server features, and
//! returns a ready client. Every operation is serialized through the
//! task queue: concurrent calls on a shared client wait their turn
//! instead of failing, because FTP forbids overlapping commands on one
//! control connection.
//!
//! Directory-tree helpers live in `directory.rs`, local-filesystem
//! conveniences in `file_ops.rs`.

use crate::connection::ControlChannel;
use crate::error::{FtpError, FtpErrorKind, FtpResult};
use crate::parser;
use crate::queue::TaskQueue;
use crate::resolver;
use crate::transfer;
use crate::types::*;
use chrono::Utc;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};
use uuid::Uuid;

/// Progress callbacks fire at most this often per transfer (plus once at
/// completion).
const PROGRESS_INTERVAL: std::time::Duration = std::time::Duration::from_millis(500);

/// A connected FTP session.
pub struct FtpClient {
    config: FtpConfig,
    queue: TaskQueue,
    features: ServerFeatures,
    info: StdMutex<FtpSessionInfo>,
    progress: StdMutex<ProgressState>,
}

impl FtpClient {
    // ─── Session lifecycle ───────────────────────────────────────

    /// Establish a new FTP session: connect, negotiate TLS, log in, set
    /// binary stream mode, probe FEAT.
    pub async fn access(config: FtpConfig) -> FtpResult<Self> {
        if config.host.is_empty() {
            return Err(FtpError::invalid_config("Host must not be empty"));
        }

        let mut channel = ControlChannel::connect(&config).await?;

        let banner = channel.read_response().await?;
        if !banner.is_completion() {
            return Err(FtpError::from_reply(banner.code, &banner.text()));
        }

        // ── Explicit FTPS: AUTH TLS then handshake on the same socket ──
        if config.secure == SecurityMode::Explicit {
            let response = channel.execute("AUTH TLS").await?;
            if !response.is_completion() {
                return Err(FtpError::tls_failed(format!(
                    "AUTH TLS rejected: {}",
                    response.text()
                )));
            }
            channel = channel.into_tls(&config).await?;
        }

        // ── Authenticate. PASS is skipped when USER alone yields 230 ──
        let user_response = channel.execute(&format!("USER {}", config.user)).await?;
        match user_response.code {
            230 => {}
            331 => {
                let pass_response = channel
                    .execute(&format!("PASS {}", config.password))
                    .await?;
                if !pass_response.is_completion() {
                    return Err(FtpError::auth_failed(format!(
                        "Login failed: {}",
                        pass_response.text()
                    )));
                }
            }
            _ if user_response.is_completion() => {}
            _ => {
                return Err(FtpError::auth_failed(format!(
                    "USER rejected: {}",
                    user_response.text()
                )))
            }
        }

        // ── Binary stream mode ───────────────────────────────────
        channel.expect_ok("TYPE I").await?;
        channel.expect_ok("STRU F").await?;

        // ── Protect the data channel on secured sessions ─────────
        if channel.is_secure() {
            channel.expect_ok("PBSZ 0").await?;
            channel.expect_ok("PROT P").await?;
        }

        let features = probe_features(&mut channel).await;
        if features.utf8 && config.encoding == Charset::Utf8 {
            let _ = channel.execute("OPTS UTF8 ON").await;
        }

        let system_type = match channel.execute("SYST").await {
            Ok(r) if r.is_completion() => Some(r.message().trim().to_string()),
            _ => None,
        };

        let current_directory = match channel.execute("PWD").await {
            Ok(r) if r.is_completion() => {
                parse_path_reply(&r.text()).unwrap_or_else(|_| "/".into())
            }
            _ => "/".into(),
        };

        let info = FtpSessionInfo {
            id: Uuid::new_v4().to_string(),
            host: config.host.clone(),
            port: config.port,
            user: config.user.clone(),
            secure: config.secure,
            current_directory,
            server_banner: Some(banner.message()),
            system_type,
            connected_at: Utc::now(),
            last_activity: Utc::now(),
            bytes_uploaded: 0,
            bytes_downloaded: 0,
        };

        Ok(Self {
            queue: TaskQueue::new(channel),
            config,
            features,
            info: StdMutex::new(info),
            progress: StdMutex::new(ProgressState {
                handler: None,
                bytes_overall: 0,
            }),
        })
    }

    /// Gracefully end the session: QUIT, then drop the connection.
    pub async fn quit(&self) -> FtpResult<()> {
        if let Ok(mut lease) = self.queue.lease().await {
            let _ = lease.channel().execute("QUIT").await;
            lease.channel().close().await;
        }
        let _ = self.queue.close().await;
        Ok(())
    }

    /// Destroy the connection immediately. Pending operations fail with
    /// `Closed`.
    pub async fn close(&self) {
        if let Some(mut channel) = self.queue.close().await {
            channel.close().await;
        }
    }

    // ─── Single round-trips ──────────────────────────────────────

    /// Change the working directory.
    pub async fn cd(&self, path: &str) -> FtpResult<FtpResponse> {
        let mut lease = self.queue.lease().await?;
        let response = lease.channel().expect_ok(&format!("CWD {}", path)).await?;
        // Refresh the cached working directory while we hold the channel.
        if let Ok(r) = lease.channel().execute("PWD").await {
            if r.is_completion() {
                if let Ok(dir) = parse_path_reply(&r.text()) {
                    if let Ok(mut info) = self.info.lock() {
                        info.current_directory = dir;
                    }
                }
            }
        }
        drop(lease);
        self.touch();
        Ok(response)
    }

    /// Report the current working directory (PWD, 257 reply).
    pub async fn pwd(&self) -> FtpResult<String> {
        let response = self.queue.round_trip_ok("PWD").await?;
        let path = parse_path_reply(&response.text())?;
        if let Ok(mut info) = self.info.lock() {
            info.current_directory = path.clone();
        }
        self.touch();
        Ok(path)
    }

    /// Size of a remote file (RFC 3659 SIZE).
    pub async fn size(&self, path: &str) -> FtpResult<u64> {
        let response = self.queue.round_trip_ok(&format!("SIZE {}", path)).await?;
        self.touch();
        let text = response.message();
        text.trim().parse::<u64>().map_err(|_| {
            FtpError::protocol_error(format!("Cannot parse SIZE reply: {}", response.text()))
        })
    }

    /// Modification time of a remote file (RFC 3659 MDTM), as the raw
    /// `YYYYMMDDHHMMSS` timestamp string.
    pub async fn last_mod(&self, path: &str) -> FtpResult<String> {
        let response = self.queue.round_trip_ok(&format!("MDTM {}", path)).await?;
        self.touch();
        Ok(response.message().trim().to_string())
    }

    /// Rename (or move) a file or directory.
    pub async fn rename(&self, from: &str, to: &str) -> FtpResult<()> {
        let mut lease = self.queue.lease().await?;
        let rnfr = lease.channel().execute(&format!("RNFR {}", from)).await?;
        if !rnfr.is_intermediate() && !rnfr.is_completion() {
            return Err(FtpError::from_reply(rnfr.code, &rnfr.text()));
        }
        lease.channel().expect_ok(&format!("RNTO {}", to)).await?;
        drop(lease);
        self.touch();
        Ok(())
    }

    /// Delete a remote file.
    pub async fn remove(&self, path: &str) -> FtpResult<()> {
        self.queue.round_trip_ok(&format!("DELE {}", path)).await?;
        self.touch();
        Ok(())
    }

    /// Execute a SITE command.
    pub async fn site(&self, args: &str) -> FtpResult<FtpResponse> {
        let response = self.queue.round_trip(&format!("SITE {}", args)).await?;
        self.touch();
        Ok(response)
    }

    /// Send a raw command and return its response.
    pub async fn send_command(&self, command: &str) -> FtpResult<FtpResponse> {
        let response = self.queue.round_trip(command).await?;
        self.touch();
        Ok(response)
    }

    /// Keep the control connection alive.
    pub async fn noop(&self) -> FtpResult<()> {
        self.queue.round_trip_ok("NOOP").await?;
        self.touch();
        Ok(())
    }

    // ─── Transfers ───────────────────────────────────────────────

    /// Upload from any async byte source to `remote_path` (STOR).
    pub async fn upload<R>(&self, source: &mut R, remote_path: &str) -> FtpResult<FtpResponse>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        self.store(source, remote_path, "STOR").await
    }

    /// Append from any async byte source to `remote_path` (APPE).
    pub async fn append<R>(&self, source: &mut R, remote_path: &str) -> FtpResult<FtpResponse>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        self.store(source, remote_path, "APPE").await
    }

    async fn store<R>(&self, source: &mut R, remote_path: &str, verb: &str) -> FtpResult<FtpResponse>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut scope = self.progress_scope(remote_path, TransferKind::Upload);
        let command = format!("{} {}", verb, remote_path);

        let mut lease = self.queue.lease().await?;
        let channel = lease.channel();
        let data = transfer::open_data_channel(channel, &self.config).await?;
        let (response, bytes) = resolver::run_upload(
            channel,
            &self.config,
            data,
            source,
            &command,
            remote_path,
            &mut scope,
        )
        .await?;
        drop(lease);

        scope.finish(bytes);
        if let Ok(mut info) = self.info.lock() {
            info.bytes_uploaded += bytes;
            info.last_activity = Utc::now();
        }
        Ok(response)
    }

    /// Download `remote_path` into any async byte sink (RETR), starting
    /// at byte `start_at` (REST) when non-zero.
    pub async fn download<W>(
        &self,
        sink: &mut W,
        remote_path: &str,
        start_at: u64,
    ) -> FtpResult<FtpResponse>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut scope = self.progress_scope(remote_path, TransferKind::Download);
        let command = format!("RETR {}", remote_path);

        let mut lease = self.queue.lease().await?;
        let channel = lease.channel();
        if start_at > 0 {
            let response = channel.execute(&format!("REST {}", start_at)).await?;
            if response.code != 350 {
                return Err(FtpError::from_reply(response.code, &response.text()));
            }
        }
        let data = transfer::open_data_channel(channel, &self.config).await?;
        let (response, bytes) =
            resolver::run_download(channel, &self.config, data, sink, &command, &mut scope).await?;
        drop(lease);

        scope.finish(bytes);
        if let Ok(mut info) = self.info.lock() {
            info.bytes_downloaded += bytes;
            info.last_activity = Utc::now();
        }
        Ok(response)
    }

    // ─── Listing ─────────────────────────────────────────────────

    /// List a directory, preferring MLSD over LIST.
    pub async fn list(&self, path: Option<&str>) -> FtpResult<Vec<FtpEntry>> {
        self.list_with(path, &ListOptions::default()).await
    }

    /// List a directory with client-side filtering and sorting.
    pub async fn list_with(
        &self,
        path: Option<&str>,
        options: &ListOptions,
    ) -> FtpResult<Vec<FtpEntry>> {
        let raw = self.list_raw(path).await?;
        let mut entries = parser::parse_listing(&raw);

        if let Some(ref pattern) = options.filter {
            let pattern = glob::Pattern::new(pattern)
                .map_err(|e| FtpError::invalid_config(format!("Bad listing filter: {}", e)))?;
            entries.retain(|e| pattern.matches(&e.name));
        }
        if !options.show_hidden {
            entries.retain(|e| !e.name.starts_with('.'));
        }
        if let Some(field) = options.sort_by {
            match field {
                FtpSortField::Name => {
                    entries.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
                }
                FtpSortField::Size => entries.sort_by(|a, b| a.size.cmp(&b.size)),
                FtpSortField::Modified => entries.sort_by(|a, b| a.modified.cmp(&b.modified)),
                FtpSortField::Kind => {
                    entries.sort_by(|a, b| format!("{:?}", a.kind).cmp(&format!("{:?}", b.kind)))
                }
            }
        }
        if options.sort_order == Some(FtpSortOrder::Desc) {
            entries.reverse();
        }
        Ok(entries)
    }

    /// Fetch the raw listing body, decoded with the configured charset.
    pub async fn list_raw(&self, path: Option<&str>) -> FtpResult<String> {
        if self.features.mlsd {
            match self.fetch_listing("MLSD", path).await {
                Ok(body) => return Ok(body),
                // Server advertised MLSD but rejected it; fall back.
                Err(e) if e.kind == FtpErrorKind::CommandRejected => {}
                Err(e) => return Err(e),
            }
        }
        self.fetch_listing("LIST", path).await
    }

    async fn fetch_listing(&self, verb: &str, path: Option<&str>) -> FtpResult<String> {
        let command = match path {
            Some(p) => format!("{} {}", verb, p),
            None => verb.to_string(),
        };
        let mut scope = self.progress_scope(path.unwrap_or("."), TransferKind::List);

        let mut lease = self.queue.lease().await?;
        let channel = lease.channel();
        let data = transfer::open_data_channel(channel, &self.config).await?;
        let mut buffer: Vec<u8> = Vec::new();
        let (_, bytes) =
            resolver::run_download(channel, &self.config, data, &mut buffer, &command, &mut scope)
                .await?;
        drop(lease);

        scope.finish(bytes);
        self.touch();
        Ok(self.config.encoding.decode(&buffer))
    }

    // ─── Progress reporting ──────────────────────────────────────

    /// Install a progress handler. Resets the `bytes_overall` counter.
    pub fn track_progress<F>(&self, handler: F)
    where
        F: Fn(Progress) + Send + Sync + 'static,
    {
        if let Ok(mut state) = self.progress.lock() {
            state.handler = Some(Arc::new(handler));
            state.bytes_overall = 0;
        }
    }

    /// Remove the progress handler.
    pub fn stop_progress(&self) {
        if let Ok(mut state) = self.progress.lock() {
            state.handler = None;
        }
    }

    // ─── Introspection ───────────────────────────────────────────

    /// Snapshot of the session state.
    pub fn session(&self) -> FtpSessionInfo {
        self.info
            .lock()
            .map(|info| info.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Features advertised by the server's FEAT reply.
    pub fn features(&self) -> &ServerFeatures {
        &self.features
    }

    /// The configuration this client was opened with.
    pub fn config(&self) -> &FtpConfig {
        &self.config
    }

    pub(crate) fn touch(&self) {
        if let Ok(mut info) = self.info.lock() {
            info.last_activity = Utc::now();
        }
    }

    pub(crate) fn progress_scope(&self, name: &str, kind: TransferKind) -> ProgressScope<'_> {
        ProgressScope {
            state: &self.progress,
            name: name.to_string(),
            kind,
            reported: 0,
            last_emit: None,
        }
    }
}

// ─── FEAT probe ──────────────────────────────────────────────────────

async fn probe_features(channel: &mut ControlChannel) -> ServerFeatures {
    let response = match channel.execute("FEAT").await {
        Ok(r) if r.is_completion() => r,
        _ => return ServerFeatures::default(),
    };

    let raw: Vec<String> = response
        .lines
        .iter()
        .skip(1)
        .filter(|l| !l.starts_with("211"))
        .map(|l| l.trim().to_uppercase())
        .collect();

    let has = |feature: &str| raw.iter().any(|l| l.starts_with(feature));

    ServerFeatures {
        mlsd: has("MLSD"),
        mlst: has("MLST"),
        size: has("SIZE"),
        mdtm: has("MDTM"),
        rest_stream: has("REST STREAM"),
        utf8: has("UTF8"),
        auth_tls: has("AUTH TLS"),
        raw_features: raw,
    }
}

/// Parse the quoted path out of a 257 reply (`257 "/some/dir" created`).
pub(crate) fn parse_path_reply(text: &str) -> FtpResult<String> {
    if let Some(start) = text.find('"') {
        if let Some(end) = text[start + 1..].find('"') {
            return Ok(text[start + 1..start + 1 + end].to_string());
        }
    }
    Err(FtpError::protocol_error(format!(
        "No quoted path in reply: {}",
        text
    )))
}

// ─── Progress plumbing ───────────────────────────────────────────────

pub(crate) struct ProgressState {
    handler: Option<Arc<dyn Fn(Progress) + Send + Sync>>,
    bytes_overall: u64,
}

/// Per-transfer progress reporter; emits at a bounded interval and once
/// at completion.
pub(crate) struct ProgressScope<'a> {
    state: &'a StdMutex<ProgressState>,
    name: String,
    kind: TransferKind,
    reported: u64,
    last_emit: Option<Instant>,
}

impl ProgressScope<'_> {
    pub fn update(&mut self, bytes: u64) {
        self.emit(bytes, false);
    }

    pub fn finish(&mut self, bytes: u64) {
        self.emit(bytes, true);
    }

    fn emit(&mut self, bytes: u64, force: bool) {
        if !force {
            if let Some(last) = self.last_emit {
                if last.elapsed() < PROGRESS_INTERVAL {
                    return;
                }
            }
        }

        let (handler, overall) = match self.state.lock() {
            Ok(mut state) => {
                if state.handler.is_none() {
                    return;
                }
                state.bytes_overall += bytes.saturating_sub(self.reported);
                self.reported = bytes;
                (state.handler.clone(), state.bytes_overall)
            }
            Err(_) => return,
        };

        if let Some(handler) = handler {
            handler(Progress {
                name: self.name.clone(),
                kind: self.kind,
                bytes,
                bytes_overall: overall,
            });
        }
        self.last_emit = Some(Instant::now());
    }
}
