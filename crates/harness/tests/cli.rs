//! End-to-end tests of the `tether` binary

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

const MANIFEST: &str = r#"
name: demo
engine:
  restart_delay_ms: 100
  grace_period_ms: 500
services:
  - name: echo
    executable: /bin/sh
    args: -c "echo ready; exec sleep 60"
    bindings:
      - port: 9000
  - name: cache
    external: true
    bindings:
      - name: redis
        address: localhost:6379
"#;

fn write_manifest(dir: &TempDir, contents: &str) -> Result<PathBuf> {
    let path = dir.path().join("tether.yaml");
    std::fs::write(&path, contents)?;
    Ok(path)
}

fn tether(manifest: &Path, args: &[&str]) -> Result<Output> {
    Ok(Command::new(env!("CARGO_BIN_EXE_tether"))
        .arg("--manifest")
        .arg(manifest)
        .args(args)
        .output()?)
}

#[test]
fn test_validate_prints_service_table() -> Result<()> {
    let dir = TempDir::new()?;
    let manifest = write_manifest(&dir, MANIFEST)?;

    let output = tether(&manifest, &["validate"])?;
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert!(stdout.contains("Manifest valid"));
    assert!(stdout.contains("Services: 2"));
    assert!(stdout.contains("executable"));
    assert!(stdout.contains("CACHE_REDIS_SERVICE"));
    assert!(stdout.contains("process"));
    Ok(())
}

#[test]
fn test_validate_json() -> Result<()> {
    let dir = TempDir::new()?;
    let manifest = write_manifest(&dir, MANIFEST)?;

    let output = tether(&manifest, &["validate", "--format", "json"])?;
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(json["name"], "demo");
    assert_eq!(json["engine"]["restart_delay_ms"], 100);
    assert_eq!(json["services"][1]["name"], "cache");
    Ok(())
}

#[test]
fn test_invalid_manifest_fails() -> Result<()> {
    let dir = TempDir::new()?;
    let manifest = write_manifest(&dir, "services:\n  - name: broken\n    replicas: 0\n")?;

    let output = tether(&manifest, &["validate"])?;
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Invalid application"));
    Ok(())
}

#[test]
fn test_missing_manifest_fails() -> Result<()> {
    let dir = TempDir::new()?;
    let output = tether(&dir.path().join("absent.yaml"), &["validate"])?;
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Failed to load"));
    Ok(())
}

#[test]
fn test_validate_rejects_unknown_entry_point() -> Result<()> {
    let dir = TempDir::new()?;
    let manifest = write_manifest(
        &dir,
        "services:\n  - name: hosted\n    entry_point: missing-entry\n",
    )?;

    let output = tether(&manifest, &["validate"])?;
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!output.status.success());
    assert!(stderr.contains("Invalid application"));
    assert!(stderr.contains("unknown entry point 'missing-entry'"));
    Ok(())
}

#[cfg(unix)]
#[test]
fn test_run_spawns_nothing_when_a_service_is_misconfigured() -> Result<()> {
    let dir = TempDir::new()?;
    let marker = dir.path().join("spawned");
    let manifest = write_manifest(
        &dir,
        &format!(
            r#"
services:
  - name: hosted
    entry_point: missing-entry
  - name: worker
    executable: /bin/sh
    args: -c "touch {}; exec sleep 60"
"#,
            marker.display()
        ),
    )?;

    let output = tether(&manifest, &["run"])?;
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!output.status.success());
    assert!(stderr.contains("unknown entry point 'missing-entry'"));
    assert!(!marker.exists());
    Ok(())
}

#[cfg(unix)]
#[test]
fn test_run_stops_on_interrupt() -> Result<()> {
    use std::io::{BufRead, BufReader};
    use std::process::Stdio;

    let dir = TempDir::new()?;
    let manifest = write_manifest(&dir, MANIFEST)?;

    let mut child = Command::new(env!("CARGO_BIN_EXE_tether"))
        .arg("--manifest")
        .arg(&manifest)
        .args(["run", "--follow"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()?;

    let stdout = child.stdout.take().expect("piped stdout");
    let mut lines = BufReader::new(stdout).lines();
    let mut seen = Vec::new();
    let (mut started, mut ready) = (false, false);
    for line in lines.by_ref() {
        let line = line?;
        started |= line.contains("started");
        ready |= line.contains("echo | ") && line.ends_with("ready");
        seen.push(line);
        if started && ready {
            break;
        }
    }
    assert!(started && ready, "output: {seen:#?}");

    let status = Command::new("kill")
        .args(["-INT", &child.id().to_string()])
        .status()?;
    assert!(status.success());

    let rest: Vec<String> = lines.map_while(|line| line.ok()).collect();
    let exit = child.wait()?;
    assert!(exit.success(), "output: {rest:#?}");
    assert!(rest.iter().any(|l| l.contains("stopped")));
    Ok(())
}
