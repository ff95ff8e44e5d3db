//! CLI integration tests
//!
//! Tests the wsconnect CLI using assert_cmd.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;
use wsc_core::{FileStore, KeyValueStore};

fn wsconnect() -> Command {
    let mut cmd = Command::cargo_bin("wsconnect")
        .expect("Failed to locate wsconnect binary - ensure it's built before running tests");
    cmd.env_remove("RUST_LOG").env_remove("WSC_SESSION_TOKEN");
    cmd
}

/// Config file isolating all state under `dir`
fn write_config(dir: &Path) -> PathBuf {
    let path = dir.join("config.toml");
    let content = format!(
        "host = \"http://127.0.0.1:1\"\nstate_dir = '{}'\n",
        dir.join("state").display()
    );
    std::fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_cli_help() {
    wsconnect()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("wsconnect"))
        .stdout(predicate::str::contains("SSH connection resolver"));
}

#[test]
fn test_cli_version() {
    wsconnect()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("wsconnect"));
}

#[test]
fn test_cli_resolve_help() {
    wsconnect()
        .args(["resolve", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--instance"))
        .stdout(predicate::str::contains("--debug"));
}

#[test]
fn test_encode_then_decode() {
    let output = wsconnect()
        .args(["encode", "ws-1.ssh.example.dev", "--user", "ws-1", "--port", "2222"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let encoded = String::from_utf8(output).unwrap().trim().to_string();
    assert!(encoded.chars().all(|c| c.is_ascii_hexdigit()));

    wsconnect()
        .args(["decode", &encoded])
        .assert()
        .success()
        .stdout(predicate::str::contains("Host: ws-1.ssh.example.dev"))
        .stdout(predicate::str::contains("User: ws-1"))
        .stdout(predicate::str::contains("Port: 2222"));
}

#[test]
fn test_decode_plain_destination_as_json() {
    wsconnect()
        .args(["decode", "--json", "gitpod@ws-1.example.dev"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"hostname\": \"ws-1.example.dev\""))
        .stdout(predicate::str::contains("\"user\": \"gitpod\""));
}

#[test]
fn test_decode_invalid_fails() {
    wsconnect()
        .args(["decode", "user@host:notaport"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Not a wsconnect authority"));
}

#[test]
fn test_config_init_and_show() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    wsconnect()
        .args(["--config", path.to_str().unwrap(), "config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));

    wsconnect()
        .args(["--config", path.to_str().unwrap(), "config", "init"])
        .assert()
        .success();
    assert!(path.exists());

    wsconnect()
        .args(["--config", path.to_str().unwrap(), "config", "show", "api"])
        .assert()
        .success()
        .stdout(predicate::str::contains("server"));

    wsconnect()
        .args(["--config", path.to_str().unwrap(), "config", "show", "no.such.key"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Key not found"));
}

#[test]
fn test_locks_sweep_removes_expired_lease() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());
    let store = FileStore::in_dir(&dir.path().join("state"));
    store
        .set(
            "lock/example.dev",
            serde_json::json!({
                "ownerValue": "abc",
                "deadline": 0,
                "ownerPid": std::process::id(),
            }),
        )
        .unwrap();

    wsconnect()
        .args(["--config", config.to_str().unwrap(), "locks", "sweep"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed 1 stale lock"));

    assert!(store.get("lock/example.dev").unwrap().is_none());
    assert!(!store.entry_path("lock/example.dev").exists());

    wsconnect()
        .args(["--config", config.to_str().unwrap(), "locks", "sweep"])
        .assert()
        .success()
        .stderr(predicate::str::contains("No stale locks"));
}

#[test]
fn test_resolve_without_session_token_fails() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());

    wsconnect()
        .args([
            "--config",
            config.to_str().unwrap(),
            "resolve",
            "ws-1",
            "--instance",
            "i-1",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("WSC_SESSION_TOKEN"));
}
