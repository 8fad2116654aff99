use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

const ENV_KEYS: &[&str] = &[
    "STT_GATE_RATE_LIMITS",
    "STT_GATE_MAX_QUOTA",
    "STT_GATE_RECOVERY_INTERVAL_SECS",
    "STT_GATE_DB_PATH",
    "STT_GATE_API_URL",
    "STT_GATE_API_KEY",
    "STT_GATE_LOG_LEVEL",
    "STT_GATE_LOG_FORMAT",
    "STT_GATE_PORT",
];

/// Command isolated from the caller's environment and config file
fn stt_gate(dir: &Path) -> Command {
    stt_gate_with_config(dir, &dir.join("missing.toml"))
}

fn stt_gate_with_config(dir: &Path, config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("stt-gate").unwrap();
    for key in ENV_KEYS {
        cmd.env_remove(key);
    }
    cmd.current_dir(dir)
        .arg("--config")
        .arg(config)
        .env("STT_GATE_DB_PATH", dir.join("quota.db"));
    cmd
}

#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("stt-gate").unwrap();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(format!(
            "stt-gate {}",
            env!("CARGO_PKG_VERSION")
        )));
}

#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("stt-gate").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("self-healing quota gate"));
}

#[test]
fn test_cli_admit_missing_user() {
    let dir = TempDir::new().unwrap();
    stt_gate(dir.path())
        .arg("admit")
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "required arguments were not provided",
        ));
}

#[test]
fn test_cli_admit_until_denied() {
    let dir = TempDir::new().unwrap();

    stt_gate(dir.path())
        .env("STT_GATE_MAX_QUOTA", "2")
        .args(["admit", "alice"])
        .assert()
        .success()
        .stdout(predicate::str::contains("admitted: 1 remaining"));

    stt_gate(dir.path())
        .env("STT_GATE_MAX_QUOTA", "2")
        .args(["admit", "alice"])
        .assert()
        .success()
        .stdout(predicate::str::contains("admitted: 0 remaining"));

    stt_gate(dir.path())
        .env("STT_GATE_MAX_QUOTA", "2")
        .args(["admit", "alice"])
        .assert()
        .success()
        .stdout(predicate::str::contains("denied: rate limited"));

    stt_gate(dir.path())
        .env("STT_GATE_MAX_QUOTA", "2")
        .args(["status", "alice"])
        .assert()
        .success()
        .stdout(predicate::str::contains("quota 0/2, recovering: true"));
}

#[test]
fn test_cli_status_unknown_user() {
    let dir = TempDir::new().unwrap();
    stt_gate(dir.path())
        .args(["status", "nobody"])
        .assert()
        .success()
        .stdout(predicate::str::contains("unknown user: nobody"));
}

#[test]
fn test_cli_list() {
    let dir = TempDir::new().unwrap();
    stt_gate(dir.path())
        .args(["admit", "bob"])
        .assert()
        .success();

    stt_gate(dir.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("1 users: 0 full, 1 recovering"))
        .stdout(predicate::str::contains("bob"));
}

#[test]
fn test_cli_disabled_always_admits() {
    let dir = TempDir::new().unwrap();
    for _ in 0..3 {
        stt_gate(dir.path())
            .env("STT_GATE_RATE_LIMITS", "off")
            .env("STT_GATE_MAX_QUOTA", "1")
            .args(["admit", "carol"])
            .assert()
            .success()
            .stdout(predicate::str::contains("rate limiting disabled"));
    }
    assert!(!dir.path().join("quota.db").exists());
}

#[test]
fn test_cli_ephemeral_leaves_no_database() {
    let dir = TempDir::new().unwrap();
    stt_gate(dir.path())
        .args(["--ephemeral", "admit", "dave"])
        .assert()
        .success()
        .stdout(predicate::str::contains("admitted: 4 remaining"));
    assert!(!dir.path().join("quota.db").exists());
}

#[test]
fn test_cli_invalid_quota_is_fatal() {
    let dir = TempDir::new().unwrap();
    stt_gate(dir.path())
        .env("STT_GATE_MAX_QUOTA", "many")
        .args(["admit", "erin"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("STT_GATE_MAX_QUOTA"));
}

#[test]
fn test_cli_zero_quota_is_fatal() {
    let dir = TempDir::new().unwrap();
    stt_gate(dir.path())
        .env("STT_GATE_MAX_QUOTA", "0")
        .args(["admit", "erin"])
        .assert()
        .failure();
}

#[test]
fn test_cli_transcribe_oversize_file() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("config.toml");
    std::fs::write(
        &config,
        "[pipeline]\nmax_file_size_bytes = 4\ncache_dir = \"cache\"\n",
    )
    .unwrap();
    let media = dir.path().join("voice.ogg");
    std::fs::write(&media, b"more than four bytes").unwrap();

    stt_gate_with_config(dir.path(), &config)
        .args(["transcribe", "--user", "frank"])
        .arg(&media)
        .assert()
        .failure()
        .stdout(predicate::str::contains("File too large to process."));
}
