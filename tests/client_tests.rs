//! Integration tests against the scripted mock FTP server.

mod common;

use common::{spawn_server, ServerOptions};
use socksftp::{FtpClient, FtpConfig, FtpErrorKind};
use std::sync::atomic::Ordering;
use std::sync::Arc;

fn config_for(server: &common::MockServer) -> FtpConfig {
    FtpConfig {
        host: "127.0.0.1".into(),
        port: server.addr.port(),
        user: "alice".into(),
        password: "secret".into(),
        timeout_ms: 5_000,
        ..FtpConfig::default()
    }
}

#[tokio::test]
async fn access_runs_the_login_sequence() {
    let _ = env_logger::builder().is_test(true).try_init();
    let server = spawn_server(ServerOptions::default()).await;

    let client = FtpClient::access(config_for(&server)).await.expect("access");

    let info = client.session();
    assert_eq!(info.host, "127.0.0.1");
    assert_eq!(info.current_directory, "/");
    assert!(info.server_banner.unwrap().contains("mock server"));
    assert_eq!(info.system_type.as_deref(), Some("UNIX Type: L8"));
    assert!(client.features().mlsd);
    assert!(client.features().size);

    client.quit().await.expect("quit");

    let log = server.command_log().await;
    assert_eq!(log[0], "USER alice");
    assert_eq!(log[1], "PASS secret");
    assert!(log.contains(&"TYPE I".to_string()));
    assert!(log.contains(&"STRU F".to_string()));
    assert!(log.contains(&"OPTS UTF8 ON".to_string()));
    let type_pos = log.iter().position(|c| c == "TYPE I").unwrap();
    let stru_pos = log.iter().position(|c| c == "STRU F").unwrap();
    assert!(type_pos < stru_pos);
}

#[tokio::test]
async fn upload_then_download_round_trip() {
    let server = spawn_server(ServerOptions::default()).await;
    let client = FtpClient::access(config_for(&server)).await.expect("access");

    let payload: Vec<u8> = (0..2048u32).map(|i| (i % 251) as u8).collect();
    let response = client
        .upload(&mut payload.as_slice(), "data.bin")
        .await
        .expect("upload");
    assert_eq!(response.code, 226);
    assert_eq!(server.stored("data.bin").await.unwrap(), payload);

    let mut sink: Vec<u8> = Vec::new();
    let response = client
        .download(&mut sink, "data.bin", 0)
        .await
        .expect("download");
    assert_eq!(response.code, 226);
    assert_eq!(sink, payload);

    let info = client.session();
    assert_eq!(info.bytes_uploaded, payload.len() as u64);
    assert_eq!(info.bytes_downloaded, payload.len() as u64);

    client.quit().await.unwrap();
}

#[tokio::test]
async fn download_resumes_from_offset() {
    let server = spawn_server(ServerOptions::default()).await;
    server.seed("remote.bin", b"0123456789").await;

    let client = FtpClient::access(config_for(&server)).await.expect("access");
    let mut sink: Vec<u8> = Vec::new();
    client
        .download(&mut sink, "remote.bin", 6)
        .await
        .expect("download");
    assert_eq!(sink, b"6789");

    let log = server.command_log().await;
    assert!(log.contains(&"REST 6".to_string()));
    client.quit().await.unwrap();
}

#[tokio::test]
async fn list_parses_mlsd_entries() {
    let server = spawn_server(ServerOptions::default()).await;
    server.seed("alpha.txt", b"aaaa").await;
    server.seed("beta.txt", b"bb").await;

    let client = FtpClient::access(config_for(&server)).await.expect("access");
    let entries = client.list(None).await.expect("list");

    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].name, "alpha.txt");
    assert_eq!(entries[0].size, 4);
    assert_eq!(entries[1].name, "beta.txt");
    assert_eq!(entries[1].size, 2);
    client.quit().await.unwrap();
}

#[tokio::test]
async fn pasv_private_address_is_repaired() {
    // The server advertises an RFC1918 address while actually listening
    // on loopback; the transfer only succeeds if the client substitutes
    // the control channel's remote address.
    let server = spawn_server(ServerOptions {
        pasv_host: Some([10, 0, 0, 5]),
        ..ServerOptions::default()
    })
    .await;
    let mut config = config_for(&server);
    config.timeout_ms = 2_000;

    let client = FtpClient::access(config).await.expect("access");
    client
        .upload(&mut &b"through the repaired address"[..], "nat.bin")
        .await
        .expect("upload despite private PASV host");
    assert_eq!(
        server.stored("nat.bin").await.unwrap(),
        b"through the repaired address"
    );
    client.quit().await.unwrap();
}

#[tokio::test]
async fn concurrent_operations_are_serialized() {
    let server = spawn_server(ServerOptions::default()).await;
    let client = Arc::new(FtpClient::access(config_for(&server)).await.expect("access"));

    let mut handles = Vec::new();
    for _ in 0..3 {
        let client = client.clone();
        handles.push(tokio::spawn(async move { client.noop().await }));
    }
    for handle in handles {
        handle.await.unwrap().expect("noop");
    }

    let log = server.command_log().await;
    assert_eq!(log.iter().filter(|c| c.as_str() == "NOOP").count(), 3);
    assert_eq!(server.pipelining_violations.load(Ordering::SeqCst), 0);
    client.quit().await.unwrap();
}

#[tokio::test]
async fn reply_errors_leave_the_session_usable() {
    let server = spawn_server(ServerOptions::default()).await;
    let client = FtpClient::access(config_for(&server)).await.expect("access");

    let mut sink: Vec<u8> = Vec::new();
    let error = client
        .download(&mut sink, "missing.bin", 0)
        .await
        .expect_err("download of a missing file");
    assert_eq!(error.kind, FtpErrorKind::NotFound);
    assert_eq!(error.code, Some(550));

    // 4xx/5xx replies are recoverable; the control channel stays alive.
    client.noop().await.expect("noop after reply error");
    client.quit().await.unwrap();
}

#[tokio::test]
async fn single_round_trip_commands() {
    let server = spawn_server(ServerOptions::default()).await;
    server.seed("file.txt", b"hello").await;
    let client = FtpClient::access(config_for(&server)).await.expect("access");

    assert_eq!(client.pwd().await.unwrap(), "/");
    assert_eq!(client.size("file.txt").await.unwrap(), 5);
    assert_eq!(client.last_mod("file.txt").await.unwrap(), "20260101120000");

    client.cd("/sub").await.expect("cd");
    client.rename("file.txt", "renamed.txt").await.expect("rename");
    client.remove("file.txt").await.expect("remove");

    let log = server.command_log().await;
    assert!(log.contains(&"CWD /sub".to_string()));
    assert!(log.contains(&"RNFR file.txt".to_string()));
    assert!(log.contains(&"RNTO renamed.txt".to_string()));
    assert!(log.contains(&"DELE file.txt".to_string()));
    client.quit().await.unwrap();
}

#[tokio::test]
async fn closed_client_rejects_operations() {
    let server = spawn_server(ServerOptions::default()).await;
    let client = FtpClient::access(config_for(&server)).await.expect("access");

    client.close().await;
    let error = client.noop().await.expect_err("noop on closed client");
    assert_eq!(error.kind, FtpErrorKind::Closed);
}

#[tokio::test]
async fn progress_reports_bytes() {
    let server = spawn_server(ServerOptions::default()).await;
    let client = FtpClient::access(config_for(&server)).await.expect("access");

    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = seen.clone();
    client.track_progress(move |progress| {
        sink.lock().unwrap().push((progress.bytes, progress.bytes_overall));
    });

    let payload = vec![7u8; 1024];
    client
        .upload(&mut payload.as_slice(), "progress.bin")
        .await
        .expect("upload");

    let reports = seen.lock().unwrap().clone();
    let last = reports.last().expect("final progress report");
    assert_eq!(last.0, 1024);
    assert_eq!(last.1, 1024);
    client.quit().await.unwrap();
}
