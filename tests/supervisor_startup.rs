//! Daemon supervision against small shell stand-ins for Direwolf.
#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ax25bbs::supervisor::{ProcessSupervisor, Started, SupervisorError, SupervisorSettings};
use tempfile::TempDir;
use tokio::net::TcpListener;

fn write_script(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("fake-direwolf.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

fn settings(dir: &TempDir, command: PathBuf, port: u16) -> SupervisorSettings {
    let config_path = dir.path().join("direwolf.conf");
    std::fs::write(&config_path, "MYCALL N0CALL\n").unwrap();
    SupervisorSettings {
        command,
        config_path,
        args: Vec::new(),
        host: "127.0.0.1".to_string(),
        port,
        startup_timeout: Duration::from_secs(2),
        stop_grace: Duration::from_secs(1),
        probe_interval: Duration::from_millis(50),
        probe_timeout: Duration::from_millis(200),
        monitor_interval: Duration::from_millis(100),
    }
}

async fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn listening_port_means_external_daemon() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let dir = tempfile::tempdir().unwrap();

    let sup = ProcessSupervisor::new(settings(&dir, PathBuf::from("/nonexistent/direwolf"), port));
    assert_eq!(sup.start().await.unwrap(), Started::External);
    assert!(!sup.is_running().await);
    sup.stop().await;
}

#[tokio::test]
async fn early_exit_reports_code_and_output() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "echo 'Audio device plughw:9,0 not found' >&2\nexit 1");
    let sup = ProcessSupervisor::new(settings(&dir, script, unused_port().await));

    match sup.start().await {
        Err(SupervisorError::ExitedDuringStartup { code, output }) => {
            assert_eq!(code, Some(1));
            assert!(
                output.iter().any(|l| l.contains("plughw:9,0 not found")),
                "{output:?}"
            );
        }
        other => panic!("expected early exit, got {other:?}"),
    }
    assert!(!sup.is_running().await);
}

#[tokio::test]
async fn port_that_never_opens_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "echo starting\nexec sleep 30");
    let sup = ProcessSupervisor::new(settings(&dir, script, unused_port().await));

    let err = sup.start().await.unwrap_err();
    assert!(matches!(err, SupervisorError::StartupTimeout { .. }), "{err:?}");
    assert!(err.output().iter().any(|l| l == "starting"));
}

#[tokio::test]
async fn unexpected_exit_is_notified() {
    let dir = tempfile::tempdir().unwrap();
    let port = unused_port().await;
    let script = write_script(dir.path(), "echo modem ready\nsleep 1\nexit 3");
    let sup = ProcessSupervisor::new(settings(&dir, script, port));
    let mut exits = sup.exit_notifications();

    // Stand in for the daemon's AGWPE listener once the child is running
    let opener = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(listener);
    });

    let started = sup.start().await.unwrap();
    assert!(matches!(started, Started::Spawned { pid: Some(_) }));
    assert!(sup.is_running().await);

    let exit = tokio::time::timeout(Duration::from_secs(5), exits.recv())
        .await
        .expect("no exit notification")
        .unwrap();
    assert_eq!(exit.code, Some(3));
    assert!(exit.output.iter().any(|l| l == "modem ready"));

    sup.stop().await;
    opener.abort();
}

#[tokio::test]
async fn stop_terminates_running_daemon() {
    let dir = tempfile::tempdir().unwrap();
    let port = unused_port().await;
    let script = write_script(dir.path(), "exec sleep 30");
    let sup = ProcessSupervisor::new(settings(&dir, script, port));
    let mut exits = sup.exit_notifications();

    let listener_task = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(listener);
    });

    assert!(matches!(sup.start().await.unwrap(), Started::Spawned { .. }));
    sup.stop().await;
    sup.stop().await;
    assert!(!sup.is_running().await);

    // A requested stop is not reported as a daemon death
    let notified = tokio::time::timeout(Duration::from_millis(300), exits.recv()).await;
    assert!(!matches!(notified, Ok(Some(_))));
    listener_task.abort();
}

#[tokio::test]
async fn missing_config_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let mut s = settings(&dir, PathBuf::from("direwolf"), unused_port().await);
    s.config_path = Path::new("/nonexistent/direwolf.conf").to_path_buf();
    let sup = ProcessSupervisor::new(s);

    let err = sup.start().await.unwrap_err();
    assert!(matches!(err, SupervisorError::ConfigMissing(_)));
}
