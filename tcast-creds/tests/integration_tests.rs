//! Integration tests for the tcast-creds CLI

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// Isolated config and data directories plus a freshly generated key
struct TestEnv {
    _temp_dir: TempDir,
    config_path: PathBuf,
    key: String,
}

impl TestEnv {
    fn new() -> Self {
        Self::with_extra_config("")
    }

    fn with_extra_config(extra: &str) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        let db_path = temp_dir
            .path()
            .join("data")
            .join("accounts.db")
            .to_string_lossy()
            .replace('\\', "\\\\");

        fs::write(
            &config_path,
            format!("[database]\npath = \"{}\"\n{}", db_path, extra),
        )
        .unwrap();

        let output = Command::cargo_bin("tcast-creds")
            .unwrap()
            .arg("keygen")
            .output()
            .unwrap();
        let key = String::from_utf8(output.stdout).unwrap().trim().to_string();

        Self {
            _temp_dir: temp_dir,
            config_path,
            key,
        }
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("tcast-creds").unwrap();
        cmd.env("THREADCAST_CONFIG", &self.config_path);
        cmd.env("THREADCAST_ENCRYPTION_KEY", &self.key);
        cmd.env("THREADCAST_OWNER", "test-user");
        cmd.env_remove("RUST_LOG");
        cmd
    }
}

#[test]
fn test_keygen_prints_age_identity() {
    Command::cargo_bin("tcast-creds")
        .unwrap()
        .arg("keygen")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("AGE-SECRET-KEY-1"));
}

#[test]
fn test_keygen_is_random() {
    let env_a = TestEnv::new();
    let env_b = TestEnv::new();
    assert_ne!(env_a.key, env_b.key);
}

#[test]
fn test_list_without_accounts() {
    let env = TestEnv::new();

    env.cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No accounts linked"));
}

#[test]
fn test_list_with_platform_filter() {
    let env = TestEnv::new();

    env.cmd()
        .args(["list", "--platform", "farcaster"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No accounts linked"));
}

#[test]
fn test_unknown_platform_is_rejected() {
    let env = TestEnv::new();

    env.cmd()
        .args(["list", "--platform", "myspace"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown platform 'myspace'"));
}

#[test]
fn test_select_unknown_account_exit_code() {
    let env = TestEnv::new();

    env.cmd()
        .args(["select", "threads", "no-such-account"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("no-such-account"));
}

#[test]
fn test_disconnect_unknown_account_exit_code() {
    let env = TestEnv::new();

    env.cmd()
        .args(["disconnect", "x", "no-such-account"])
        .assert()
        .code(3);
}

#[test]
fn test_refresh_without_account_exit_code() {
    let env = TestEnv::new();

    env.cmd()
        .args(["refresh", "x"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Connect a X account"));
}

#[test]
fn test_connect_requires_token() {
    let env = TestEnv::new();

    env.cmd()
        .args(["connect", "threads", "--stdin"])
        .write_stdin("   \n")
        .assert()
        .failure()
        .stderr(predicate::str::contains("access token"));

    env.cmd()
        .args(["connect", "threads"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("--stdin or --token"));
}

#[test]
fn test_missing_encryption_key() {
    let env = TestEnv::new();

    env.cmd()
        .env_remove("THREADCAST_ENCRYPTION_KEY")
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("THREADCAST_ENCRYPTION_KEY"));
}

#[test]
fn test_invalid_encryption_key() {
    let env = TestEnv::new();

    env.cmd()
        .env("THREADCAST_ENCRYPTION_KEY", "not-a-key")
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid encryption key"));
}

#[test]
fn test_signer_requires_app_fid() {
    let env = TestEnv::new();

    env.cmd()
        .args(["signer", "status", "4821"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("farcaster.app_fid"));
}

#[test]
fn test_signer_status_without_request() {
    let env = TestEnv::with_extra_config("\n[farcaster]\napp_fid = 9152\n");

    env.cmd()
        .env(
            "THREADCAST_FARCASTER_CUSTODY_KEY",
            "0101010101010101010101010101010101010101010101010101010101010101",
        )
        .args(["signer", "status", "4821"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No signer request for fid 4821"));
}

#[test]
fn test_invalid_config_file() {
    let env = TestEnv::new();
    fs::write(&env.config_path, "[database\npath = ").unwrap();

    env.cmd()
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to parse config"));
}
