//! Shared test fixtures: a scripted mock FTP server and a minimal SOCKS5
//! proxy, both bound to ephemeral loopback ports.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::{Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout, Duration};

#[derive(Default)]
pub struct ServerOptions {
    /// Advertise these octets in PASV replies instead of 127.0.0.1. The
    /// data listener still binds to loopback, so only clients that repair
    /// the address can connect.
    pub pasv_host: Option<[u8; 4]>,
    /// Answer every SIZE query with this value instead of the stored
    /// file's length.
    pub size_override: Option<u64>,
}

pub struct MockServer {
    pub addr: SocketAddr,
    pub files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    pub commands: Arc<Mutex<Vec<String>>>,
    /// Times a command arrived while the previous one was unanswered.
    pub pipelining_violations: Arc<AtomicUsize>,
    /// Number of control sessions accepted.
    pub sessions: Arc<AtomicUsize>,
}

impl MockServer {
    pub async fn seed(&self, name: &str, content: &[u8]) {
        self.files
            .lock()
            .await
            .insert(name.to_string(), content.to_vec());
    }

    pub async fn stored(&self, name: &str) -> Option<Vec<u8>> {
        self.files.lock().await.get(name).cloned()
    }

    pub async fn command_log(&self) -> Vec<String> {
        self.commands.lock().await.clone()
    }
}

pub async fn spawn_server(options: ServerOptions) -> MockServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let files: Arc<Mutex<HashMap<String, Vec<u8>>>> = Arc::new(Mutex::new(HashMap::new()));
    let commands: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let pipelining_violations = Arc::new(AtomicUsize::new(0));
    let sessions = Arc::new(AtomicUsize::new(0));
    let options = Arc::new(options);

    {
        let files = files.clone();
        let commands = commands.clone();
        let violations = pipelining_violations.clone();
        let sessions = sessions.clone();
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                sessions.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(handle_session(
                    socket,
                    files.clone(),
                    commands.clone(),
                    violations.clone(),
                    options.clone(),
                ));
            }
        });
    }

    MockServer {
        addr,
        files,
        commands,
        pipelining_violations,
        sessions,
    }
}

async fn handle_session(
    socket: TcpStream,
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    commands: Arc<Mutex<Vec<String>>>,
    violations: Arc<AtomicUsize>,
    options: Arc<ServerOptions>,
) {
    let (read_half, mut writer) = socket.into_split();
    let mut reader = BufReader::new(read_half);
    let _ = writer.write_all(b"220 mock server ready\r\n").await;

    let mut pending_data: Option<TcpListener> = None;
    let mut rest_offset: u64 = 0;
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let command = line.trim_end().to_string();
        // A second command buffered before we answered the first means
        // the client pipelined.
        if reader.buffer().contains(&b'\n') {
            violations.fetch_add(1, Ordering::SeqCst);
        }
        commands.lock().await.push(command.clone());

        let (verb, arg) = match command.split_once(' ') {
            Some((v, a)) => (v.to_uppercase(), a.to_string()),
            None => (command.to_uppercase(), String::new()),
        };

        match verb.as_str() {
            "USER" => reply(&mut writer, "331 Password required").await,
            "PASS" => reply(&mut writer, "230 Logged in").await,
            "TYPE" | "STRU" | "OPTS" | "NOOP" | "PBSZ" | "PROT" => {
                reply(&mut writer, "200 OK").await
            }
            "FEAT" => {
                let _ = writer
                    .write_all(b"211-Features:\r\n MLSD\r\n MLST\r\n SIZE\r\n MDTM\r\n UTF8\r\n211 End\r\n")
                    .await;
            }
            "SYST" => reply(&mut writer, "215 UNIX Type: L8").await,
            "PWD" => reply(&mut writer, "257 \"/\" is the current directory").await,
            "CWD" => reply(&mut writer, "250 Directory changed").await,
            "MDTM" => reply(&mut writer, "213 20260101120000").await,
            "REST" => {
                rest_offset = arg.parse().unwrap_or(0);
                reply(&mut writer, &format!("350 Restarting at {}", rest_offset)).await;
            }
            "SIZE" => {
                let size = match options.size_override {
                    Some(n) => Some(n),
                    None => wait_for_stable_size(&files, &arg).await,
                };
                match size {
                    Some(n) => reply(&mut writer, &format!("213 {}", n)).await,
                    None => reply(&mut writer, "550 No such file").await,
                }
            }
            "DELE" => {
                if files.lock().await.remove(&arg).is_some() {
                    reply(&mut writer, "250 Deleted").await;
                } else {
                    reply(&mut writer, "550 No such file").await;
                }
            }
            "RNFR" => reply(&mut writer, "350 Ready for RNTO").await,
            "RNTO" => reply(&mut writer, "250 Renamed").await,
            "MKD" => reply(&mut writer, &format!("257 \"{}\" created", arg)).await,
            "RMD" => reply(&mut writer, "250 Directory removed").await,
            "PASV" => {
                let data_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
                let port = data_listener.local_addr().unwrap().port();
                let host = options.pasv_host.unwrap_or([127, 0, 0, 1]);
                reply(
                    &mut writer,
                    &format!(
                        "227 Entering Passive Mode ({},{},{},{},{},{})",
                        host[0],
                        host[1],
                        host[2],
                        host[3],
                        port / 256,
                        port % 256
                    ),
                )
                .await;
                pending_data = Some(data_listener);
            }
            "STOR" | "APPE" => {
                let Some(listener) = pending_data.take() else {
                    reply(&mut writer, "425 Use PASV first").await;
                    continue;
                };
                reply(&mut writer, "150 Ok to send data").await;
                if let Ok((mut data, _)) = listener.accept().await {
                    let mut total = Vec::new();
                    let mut buf = [0u8; 8192];
                    loop {
                        match data.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => {
                                total.extend_from_slice(&buf[..n]);
                                files.lock().await.insert(arg.clone(), total.clone());
                            }
                        }
                    }
                    files.lock().await.insert(arg.clone(), total);
                }
                reply(&mut writer, "226 Transfer complete").await;
            }
            "RETR" => {
                let Some(listener) = pending_data.take() else {
                    reply(&mut writer, "425 Use PASV first").await;
                    continue;
                };
                let content = files.lock().await.get(&arg).cloned();
                match content {
                    None => {
                        // Close the data connection cleanly, then refuse.
                        if let Ok(Ok((mut data, _))) =
                            timeout(Duration::from_millis(200), listener.accept()).await
                        {
                            let _ = data.shutdown().await;
                        }
                        reply(&mut writer, "550 No such file").await;
                    }
                    Some(bytes) => {
                        reply(&mut writer, "150 Opening data connection").await;
                        let start = (rest_offset as usize).min(bytes.len());
                        rest_offset = 0;
                        if let Ok((mut data, _)) = listener.accept().await {
                            let _ = data.write_all(&bytes[start..]).await;
                            let _ = data.shutdown().await;
                        }
                        reply(&mut writer, "226 Transfer complete").await;
                    }
                }
            }
            "MLSD" => {
                let Some(listener) = pending_data.take() else {
                    reply(&mut writer, "425 Use PASV first").await;
                    continue;
                };
                reply(&mut writer, "150 Here comes the listing").await;
                let listing = {
                    let files = files.lock().await;
                    let mut names: Vec<&String> = files.keys().collect();
                    names.sort();
                    names
                        .iter()
                        .map(|name| {
                            format!(
                                "type=file;size={};modify=20260101120000; {}\r\n",
                                files[*name].len(),
                                name
                            )
                        })
                        .collect::<String>()
                };
                if let Ok((mut data, _)) = listener.accept().await {
                    let _ = data.write_all(listing.as_bytes()).await;
                    let _ = data.shutdown().await;
                }
                reply(&mut writer, "226 Transfer complete").await;
            }
            "QUIT" => {
                reply(&mut writer, "221 Bye").await;
                break;
            }
            _ => reply(&mut writer, "502 Not implemented").await,
        }
    }
}

async fn reply(writer: &mut OwnedWriteHalf, line: &str) {
    let _ = writer.write_all(format!("{}\r\n", line).as_bytes()).await;
}

/// SIZE must not race a still-arriving STOR: report the length only once
/// it has stopped growing.
async fn wait_for_stable_size(
    files: &Arc<Mutex<HashMap<String, Vec<u8>>>>,
    name: &str,
) -> Option<u64> {
    let mut last: Option<u64> = None;
    for _ in 0..100 {
        let current = files.lock().await.get(name).map(|v| v.len() as u64);
        if current.is_some() && current == last {
            return current;
        }
        last = current;
        sleep(Duration::from_millis(20)).await;
    }
    last
}

// ─── SOCKS5 proxy ────────────────────────────────────────────────────

/// Spawn a minimal SOCKS5 CONNECT proxy (no auth) and return its address.
pub async fn spawn_socks_proxy() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((client, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(relay(client));
        }
    });

    addr
}

async fn relay(mut client: TcpStream) {
    let mut greeting = [0u8; 2];
    if client.read_exact(&mut greeting).await.is_err() || greeting[0] != 0x05 {
        return;
    }
    let mut methods = vec![0u8; greeting[1] as usize];
    if client.read_exact(&mut methods).await.is_err() {
        return;
    }
    if client.write_all(&[0x05, 0x00]).await.is_err() {
        return;
    }

    let mut head = [0u8; 4];
    if client.read_exact(&mut head).await.is_err() || head[1] != 0x01 {
        return;
    }
    let target_host = match head[3] {
        0x01 => {
            let mut octets = [0u8; 4];
            if client.read_exact(&mut octets).await.is_err() {
                return;
            }
            format!("{}.{}.{}.{}", octets[0], octets[1], octets[2], octets[3])
        }
        0x03 => {
            let mut len = [0u8; 1];
            if client.read_exact(&mut len).await.is_err() {
                return;
            }
            let mut name = vec![0u8; len[0] as usize];
            if client.read_exact(&mut name).await.is_err() {
                return;
            }
            String::from_utf8_lossy(&name).into_owned()
        }
        0x04 => {
            let mut octets = [0u8; 16];
            if client.read_exact(&mut octets).await.is_err() {
                return;
            }
            Ipv6Addr::from(octets).to_string()
        }
        _ => return,
    };
    let mut port = [0u8; 2];
    if client.read_exact(&mut port).await.is_err() {
        return;
    }
    let target_port = u16::from_be_bytes(port);

    match TcpStream::connect((target_host.as_str(), target_port)).await {
        Ok(mut upstream) => {
            if client
                .write_all(&[0x05, 0x00, 0x00, 0x01, 127, 0, 0, 1, 0, 0])
                .await
                .is_err()
            {
                return;
            }
            let _ = tokio::io::copy_bidirectional(&mut client, &mut upstream).await;
        }
        Err(_) => {
            let _ = client
                .write_all(&[0x05, 0x05, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
                .await;
        }
    }
}
