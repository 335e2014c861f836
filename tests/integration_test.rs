//! Integration tests for WebTop
//!
//! These tests drive the gateway components together over in-memory
//! sessions:
//! - webtop-core: supervisor, file gateway, archive builder, shell bridge, telemetry
//! - webtop-ssh: configuration and error mapping into the core taxonomy

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use webtop_core::archive::ArchiveConfig;
use webtop_core::session::{ExecOutput, PtySize, ShellInput};
use webtop_core::telemetry::spawn_sampler;
use webtop_core::testing::{ready_supervisor, FakeConnector, FakeFs, FakeSession};
use webtop_core::{
    ArchiveBuilder, BridgeState, ClientSession, ConnectionState, ConnectionSupervisor,
    DeleteKind, EntryKind, Error, FileGateway, SupervisorConfig, TelemetrySampler,
};

fn ok(stdout: &str) -> Option<ExecOutput> {
    Some(ExecOutput {
        stdout: stdout.as_bytes().to_vec(),
        stderr: Vec::new(),
        exit_status: Some(0),
    })
}

/// Script a realistic Linux host for the telemetry batch
fn script_host(session: &FakeSession, rx: u64, tx: u64) {
    session.respond("hostname -I", "10.0.0.5 172.17.0.1 \n", "", Some(0));
    session.respond("lscpu", "Architecture: x86_64\nModel name:          AMD EPYC 7543\n", "", Some(0));
    session.respond("nproc", "4\n", "", Some(0));
    session.respond("cat /proc/uptime", "93784.12 180000.00\n", "", Some(0));
    session.respond(
        "cat /proc/meminfo",
        "MemTotal:        8000000 kB\nMemFree:  100 kB\nMemAvailable:    4000000 kB\n",
        "",
        Some(0),
    );
    session.respond(
        "cat /etc/os-release",
        "NAME=\"Ubuntu\"\nPRETTY_NAME=\"Ubuntu 22.04.4 LTS\"\n",
        "",
        Some(0),
    );
    session.respond(
        "ip route get 1.1.1.1",
        "1.1.1.1 via 10.0.0.1 dev eth0 src 10.0.0.5 uid 0\n    cache\n",
        "",
        Some(0),
    );
    let net_dev = format!(
        "Inter-|   Receive                                                |  Transmit\n \
         face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed\n    \
         lo: 100 1 0 0 0 0 0 0 100 1 0 0 0 0 0 0\n  \
         eth0: {} 10 0 0 0 0 0 0 {} 10 0 0 0 0 0 0\n",
        rx, tx
    );
    session.respond("cat /proc/net/dev", &net_dev, "", Some(0));
}

// ============================================================================
// Supervisor + File Gateway
// ============================================================================

#[tokio::test]
async fn test_file_gateway_recovers_after_reconnect() {
    let first_fs = Arc::new(FakeFs::new());
    first_fs.add_dir("/srv");
    let second_fs = Arc::new(FakeFs::new());
    second_fs.add_dir("/srv").add_file("/srv/after.txt", b"x");

    let first = Arc::new(FakeSession::with_fs(first_fs));
    let second = Arc::new(FakeSession::with_fs(second_fs));
    let connector = Arc::new(FakeConnector::new(vec![first.clone(), second]));
    let supervisor = ConnectionSupervisor::new(
        connector.clone(),
        SupervisorConfig::default().with_reconnect_delay(Duration::from_millis(20)),
    );
    supervisor.ensure_connected();
    assert!(supervisor.wait_ready(Duration::from_secs(5)).await);

    let files = FileGateway::new(supervisor.clone());
    assert!(files.list(Some("/srv")).await.unwrap().files.is_empty());

    first.close();
    // Requests in the gap fail fast instead of hanging
    let mut saw_unavailable = false;
    for _ in 0..100 {
        match files.list(Some("/srv")).await {
            Err(Error::SessionUnavailable) => saw_unavailable = true,
            Ok(listing) if !listing.files.is_empty() => break,
            _ => {}
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let listing = files.list(Some("/srv")).await.unwrap();
    assert_eq!(listing.files[0].name, "after.txt");
    assert_eq!(listing.files[0].kind, EntryKind::File);
    assert!(saw_unavailable);
    assert_eq!(connector.attempts(), 2);
    assert_eq!(supervisor.state(), ConnectionState::Ready);

    supervisor.shutdown().await;
    assert_eq!(supervisor.state(), ConnectionState::Disconnected);
    assert!(supervisor.session().is_none());
}

#[tokio::test]
async fn test_file_lifecycle() {
    let fs = Arc::new(FakeFs::new());
    fs.add_dir("/home/admin");
    let session = Arc::new(FakeSession::with_fs(fs.clone()));
    let files = FileGateway::new(ready_supervisor(session).await);

    let dir = files.mkdir("/home/admin/projects/").await.unwrap();
    assert_eq!(dir, "/home/admin/projects");

    let file = files
        .touch("/home/admin/projects/../projects/todo.md", Some("- ship"))
        .await
        .unwrap();
    assert_eq!(file, "/home/admin/projects/todo.md");

    files.write(&file, b"- ship\n- test\n").await.unwrap();
    let (_, text) = files.read_content(&file).await.unwrap();
    assert_eq!(text, "- ship\n- test\n");

    let moved = files.rename(&file, "/home/admin/todo.md").await.unwrap();
    assert!(matches!(
        files.delete(&dir, DeleteKind::Directory).await,
        Ok(ref p) if p == "/home/admin/projects"
    ));
    files.delete(&moved, DeleteKind::File).await.unwrap();
    assert!(!fs.exists("/home/admin/todo.md"));

    let err = files.delete("/", DeleteKind::Directory).await.unwrap_err();
    assert!(matches!(err, Error::InvalidOperation(_)));
}

#[tokio::test]
async fn test_upload_from_local_temp_file() {
    let fs = Arc::new(FakeFs::new());
    fs.add_dir("/uploads");
    let session = Arc::new(FakeSession::with_fs(fs.clone()));
    let files = FileGateway::new(ready_supervisor(session).await);

    let staging = tempfile::tempdir().unwrap();
    let local = staging.path().join("multipart-1");
    std::fs::write(&local, b"payload").unwrap();

    let remote = files
        .upload("/uploads/", "../../etc/report.csv", &local)
        .await
        .unwrap();
    assert_eq!(remote, "/uploads/report.csv");
    assert_eq!(fs.contents("/uploads/report.csv"), Some(b"payload".to_vec()));
    assert!(!local.exists());
}

// ============================================================================
// Archive Builder
// ============================================================================

fn archive_session(fs: Arc<FakeFs>) -> Arc<FakeSession> {
    let session = Arc::new(FakeSession::with_fs(fs.clone()));
    session.on_exec(move |command| {
        if command.starts_with("cd ") {
            let start = command.find("'/tmp/")? + 1;
            let end = start + command[start..].find('\'')?;
            fs.add_file(&command[start..end], b"PK\x03\x04zip-bytes");
            return ok("");
        }
        if command.starts_with("rm -f ") {
            return ok("");
        }
        None
    });
    session
}

#[tokio::test]
async fn test_archive_streams_and_cleans_up() {
    let fs = Arc::new(FakeFs::new());
    fs.add_file("/var/www/site/index.html", b"<html>")
        .add_file("/var/www/site/css/app.css", b"body{}")
        .add_file("/var/www/logs/access.log", b"GET /");
    let session = archive_session(fs.clone());
    let builder = ArchiveBuilder::new(ready_supervisor(session.clone()).await, ArchiveConfig::default());

    let archive = builder
        .build(&[
            "/var/www/site".to_string(),
            "/var/www/logs/access.log".to_string(),
        ])
        .await
        .unwrap();
    assert!(archive.filename.starts_with("webtop_archive_"));
    assert_eq!(archive.size, 13);

    let executed = session.executed();
    assert_eq!(
        executed[0].split(" && ").next(),
        Some("cd '/var/www'")
    );
    assert!(executed[0].ends_with("'site' 'logs/access.log'"));

    let chunks: Vec<_> = archive.stream.collect().await;
    let bytes: Vec<u8> = chunks
        .into_iter()
        .flat_map(|chunk| chunk.unwrap().to_vec())
        .collect();
    assert_eq!(&bytes[..4], b"PK\x03\x04");

    for _ in 0..100 {
        if session.executed_matching("rm -f ") > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(session.executed_matching("rm -f "), 1);
}

#[tokio::test]
async fn test_archive_dropped_mid_stream_cleans_up_once() {
    let fs = Arc::new(FakeFs::new());
    fs.add_file("/data/a.bin", b"1");
    let session = archive_session(fs);
    let builder = ArchiveBuilder::new(ready_supervisor(session.clone()).await, ArchiveConfig::default());

    let archive = builder.build(&["/data/a.bin".to_string()]).await.unwrap();
    assert_eq!(archive.filename, "a.bin.zip");
    drop(archive);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(session.executed_matching("rm -f "), 1);
}

#[tokio::test]
async fn test_archive_rejects_empty_input() {
    let session = Arc::new(FakeSession::with_fs(Arc::new(FakeFs::new())));
    let builder = ArchiveBuilder::new(ready_supervisor(session.clone()).await, ArchiveConfig::default());

    let err = builder
        .build(&["".to_string(), "   ".to_string()])
        .await
        .err()
        .unwrap();
    assert!(matches!(err, Error::NoValidPaths));
    assert!(session.executed().is_empty());
}

// ============================================================================
// Shell Bridge + Telemetry
// ============================================================================

#[tokio::test]
async fn test_terminal_session_with_stats() {
    let session = Arc::new(FakeSession::new());
    script_host(&session, 1_000, 2_000);
    let supervisor = ready_supervisor(session.clone()).await;
    let shared = supervisor.require_session().unwrap();

    let mut client = ClientSession::new();
    let mut output = client.attach(shared.as_ref(), PtySize::default()).await.unwrap();
    assert_eq!(client.state(), BridgeState::Active);
    let mut shell = session.take_shells().pop().unwrap();

    let (tx, mut rx) = mpsc::channel(4);
    let sampler = spawn_sampler(shared.clone(), Duration::from_millis(20), tx, client.cancel_token());

    client
        .handle_client_frame(bytes::Bytes::from_static(b"uptime\r"))
        .await
        .unwrap();
    assert_eq!(
        shell.input.recv().await,
        Some(ShellInput::Data(bytes::Bytes::from_static(b"uptime\r")))
    );
    shell
        .output
        .send(bytes::Bytes::from_static(b" 10:00:00 up 1 day\r\n"))
        .await
        .unwrap();
    assert_eq!(&output.recv().await.unwrap()[..], b" 10:00:00 up 1 day\r\n");

    let first = rx.recv().await.unwrap();
    assert_eq!(first.ip, "10.0.0.5");
    assert_eq!(first.os_name, "Ubuntu 22.04.4 LTS");
    assert_eq!(first.cpu_model, "AMD EPYC 7543");
    assert_eq!(first.cpu_cores, "4");
    assert_eq!(first.uptime, "1d 2h 3m 4s");
    assert_eq!(first.rx_speed, "0 Bytes/s");

    assert!(client.close());
    assert!(!client.close());
    tokio::time::timeout(Duration::from_secs(1), sampler)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_sampler_reports_throughput_between_ticks() {
    let session = Arc::new(FakeSession::new());
    script_host(&session, 1_000, 1_000);
    let mut sampler = TelemetrySampler::new();

    sampler.tick(session.as_ref()).await.unwrap();
    script_host(&session, 1_000 + 1_024 * 1_024, 1_000);
    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = sampler.tick(session.as_ref()).await.unwrap();
    assert!(second.rx_speed.ends_with("/s"));
    assert_ne!(second.rx_speed, "0 Bytes/s");
    assert_eq!(second.tx_speed, "0 Bytes/s");

    session.close();
    assert!(matches!(
        sampler.tick(session.as_ref()).await,
        Err(Error::SessionUnavailable)
    ));
    assert!(sampler.previous().is_none());
}

#[tokio::test]
async fn test_sampler_stops_on_cancel() {
    let session: Arc<FakeSession> = Arc::new(FakeSession::new());
    let (tx, _rx) = mpsc::channel(1);
    let cancel = CancellationToken::new();
    let handle = spawn_sampler(session, Duration::from_secs(60), tx, cancel.clone());
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .unwrap()
        .unwrap();
}

// ============================================================================
// SSH configuration
// ============================================================================

#[test]
fn test_ssh_errors_are_unavailable() {
    let err: Error = webtop_ssh::Error::NoCredentials.into();
    assert!(err.is_unavailable());
    assert_eq!(err.code(), "CONNECTION_FAILED");
}

#[test]
fn test_ssh_config_target() {
    let config = webtop_ssh::SshConfig::new("bastion.internal", "ops");
    assert_eq!(config.target(), "ops@bastion.internal:22");
    assert!(!config.has_credentials());
}
