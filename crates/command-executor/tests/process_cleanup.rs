//! Tests for two-stage termination

#![cfg(unix)]

use command_executor::{CancellationToken, Command, RunOptions, is_process_alive, run};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[smol_potat::test]
async fn test_process_ignoring_sigint_is_killed_after_grace() {
    // Ignores SIGINT, so only the SIGKILL stage can end it
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg("trap '' INT; echo armed; while true; do sleep 0.1; done");
    let options = RunOptions::default().with_grace_period(Duration::from_millis(500));

    let token = CancellationToken::new();
    let pid = Arc::new(Mutex::new(None));
    let recorded = pid.clone();
    let canceller = token.clone();

    let start = Instant::now();
    let result = run(
        &cmd,
        &options,
        move |line| {
            if line.line == "armed" {
                canceller.cancel();
            }
        },
        move |p| *recorded.lock().unwrap() = Some(p),
        &token,
    )
    .await
    .unwrap();

    assert!(result.cancelled);
    assert!(start.elapsed() >= Duration::from_millis(500));
    assert_eq!(result.status.signal, Some(9));

    let pid = pid.lock().unwrap().unwrap();
    assert!(!is_process_alive(pid), "process should be gone after kill");
}

#[smol_potat::test]
async fn test_process_honouring_sigint_exits_within_grace() {
    let mut cmd = Command::new("sleep");
    cmd.arg("60");
    let options = RunOptions::default().with_grace_period(Duration::from_secs(5));

    let token = CancellationToken::new();
    let canceller = token.clone();

    let start = Instant::now();
    let result = run(&cmd, &options, |_| {}, move |_| canceller.cancel(), &token)
        .await
        .unwrap();

    assert!(result.cancelled);
    assert_eq!(result.status.signal, Some(2));
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[smol_potat::test]
async fn test_cleanup_already_exited_process() {
    let mut cmd = Command::new("echo");
    cmd.arg("quick exit");

    let token = CancellationToken::new();
    let result = run(&cmd, &RunOptions::default(), |_| {}, |_| {}, &token)
        .await
        .unwrap();

    // Cancelling after the fact has nothing left to stop
    token.cancel();
    assert_eq!(result.exit_code(), Some(0));
    assert!(!result.cancelled);
}

#[smol_potat::test]
async fn test_cleanup_with_multiple_processes() {
    let token = CancellationToken::new();
    let pids = Arc::new(Mutex::new(Vec::new()));

    let runs: Vec<_> = (0..3)
        .map(|i| {
            let mut cmd = Command::new("sleep");
            cmd.arg(format!("{}", 60 + i));
            let token = token.clone();
            let pids = pids.clone();
            smol::spawn(async move {
                run(
                    &cmd,
                    &RunOptions::default(),
                    |_| {},
                    move |p| pids.lock().unwrap().push(p),
                    &token,
                )
                .await
            })
        })
        .collect();

    while pids.lock().unwrap().len() < 3 {
        smol::Timer::after(Duration::from_millis(20)).await;
    }
    token.cancel();

    for task in runs {
        assert!(task.await.unwrap().cancelled);
    }
    for pid in pids.lock().unwrap().iter() {
        assert!(!is_process_alive(*pid));
    }
}
