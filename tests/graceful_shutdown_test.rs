use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use warden::config::{ExecMode, ProcessSpec};
use warden::process::{InstanceState, Supervisor, SupervisorHandle, SupervisorOptions};

fn shell_spec(name: &str, command: &str) -> ProcessSpec {
    ProcessSpec {
        name: name.to_string(),
        script: PathBuf::from("/bin/sh"),
        args: vec!["-c".to_string(), command.to_string()],
        cwd: None,
        env: HashMap::new(),
        watch: false,
        watch_dir: None,
        instances: 1,
        exec_mode: ExecMode::Fork,
        autorestart: true,
        max_restarts: 10,
        restart_delay_secs: 0,
        stop_signal: "SIGTERM".to_string(),
        stop_timeout_secs: 5,
    }
}

async fn start_supervisor(temp_dir: &TempDir) -> SupervisorHandle {
    Supervisor::start(SupervisorOptions {
        log_dir: temp_dir.path().join("logs"),
        stats_interval_secs: 1,
    })
    .await
    .unwrap()
}

async fn wait_for_stopped(handle: &SupervisorHandle, id: warden::process::InstanceId) {
    for _ in 0..200 {
        if let Some(snapshot) = handle.status(id).await.unwrap() {
            if snapshot.state == InstanceState::Stopped {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("instance {} did not stop in time", id);
}

#[tokio::test]
async fn test_sigterm_stops_cooperative_process() {
    let temp_dir = TempDir::new().unwrap();
    let handle = start_supervisor(&temp_dir).await;

    // Exits cleanly as soon as SIGTERM arrives
    let ids = handle
        .start(shell_spec(
            "cooperative",
            "trap 'exit 0' TERM; while true; do sleep 0.1; done",
        ))
        .await
        .unwrap();

    let start = Instant::now();
    handle.stop(ids[0]).await.unwrap();
    wait_for_stopped(&handle, ids[0]).await;

    // Well under the 5s grace period
    assert!(start.elapsed() < Duration::from_secs(4));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stubborn_process_is_force_killed() {
    let temp_dir = TempDir::new().unwrap();
    let handle = start_supervisor(&temp_dir).await;

    // Ignores SIGTERM; only the SIGKILL fallback can end it
    let mut spec = shell_spec("stubborn", "trap '' TERM; while true; do sleep 0.1; done");
    spec.stop_timeout_secs = 1;

    let ids = handle.start(spec).await.unwrap();

    let start = Instant::now();
    handle.stop(ids[0]).await.unwrap();
    wait_for_stopped(&handle, ids[0]).await;

    let elapsed = start.elapsed();
    // Stopped after the grace period expired but without hanging
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_secs(6));

    let snapshot = handle.status(ids[0]).await.unwrap().unwrap();
    assert_eq!(snapshot.stats.restarts, 0);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_configured_stop_signal_is_used() {
    let temp_dir = TempDir::new().unwrap();
    let handle = start_supervisor(&temp_dir).await;

    // Responds to SIGINT only; SIGTERM would hit the grace period
    let mut spec = shell_spec(
        "int-only",
        "trap 'exit 0' INT; trap '' TERM; while true; do sleep 0.1; done",
    );
    spec.stop_signal = "SIGINT".to_string();

    let ids = handle.start(spec).await.unwrap();

    let start = Instant::now();
    handle.stop(ids[0]).await.unwrap();
    wait_for_stopped(&handle, ids[0]).await;

    assert!(start.elapsed() < Duration::from_secs(4));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_stops_every_group() {
    let temp_dir = TempDir::new().unwrap();
    let handle = start_supervisor(&temp_dir).await;

    let mut web = shell_spec("web", "while true; do sleep 0.1; done");
    web.instances = 2;
    handle.start(web).await.unwrap();

    handle
        .start(shell_spec("worker", "while true; do sleep 0.1; done"))
        .await
        .unwrap();

    let list = handle.list().await.unwrap();
    assert_eq!(list.len(), 3);
    let pids: Vec<u32> = list.iter().map(|s| s.stats.pid).collect();

    let start = Instant::now();
    handle.shutdown().await.unwrap();
    assert!(start.elapsed() < Duration::from_secs(10));

    // All children are gone once shutdown returns
    tokio::time::sleep(Duration::from_millis(200)).await;
    for pid in pids {
        let alive =
            nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok();
        assert!(!alive, "pid {} survived supervisor shutdown", pid);
    }
}

#[tokio::test]
async fn test_shutdown_cancels_pending_restarts() {
    let temp_dir = TempDir::new().unwrap();
    let handle = start_supervisor(&temp_dir).await;

    // Crashes immediately with a long restart delay, so shutdown arrives
    // while the instance waits in Restarting
    let mut spec = shell_spec("pending", "exit 1");
    spec.restart_delay_secs = 30;

    let ids = handle.start(spec).await.unwrap();

    // Wait until the crash has been seen and the backoff timer armed
    for _ in 0..200 {
        if let Some(snapshot) = handle.status(ids[0]).await.unwrap() {
            if snapshot.state == InstanceState::Restarting {
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    // Shutdown must not wait out the 30s backoff
    let start = Instant::now();
    handle.shutdown().await.unwrap();
    assert!(start.elapsed() < Duration::from_secs(10));
}
