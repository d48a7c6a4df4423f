//! CLI integration tests for tcast-post

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// A valid age identity, used only by these tests
const TEST_KEY: &str = "AGE-SECRET-KEY-1QYPQXPQ9QCRSSZG2PVXQ6RS0ZQG3YYC5Z5TPWXQERGD3C8G7RUSQGPQYEE";

/// Helper to create a test environment with config and an empty database path
fn setup_test_env() -> (TempDir, String) {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    let db_path = temp_dir.path().join("data").join("accounts.db");

    fs::write(
        &config_path,
        format!(
            "[database]\npath = \"{}\"\n",
            db_path.to_string_lossy().replace('\\', "\\\\")
        ),
    )
    .unwrap();

    (temp_dir, config_path.to_string_lossy().to_string())
}

fn post_cmd(config_path: &str) -> Command {
    let mut cmd = Command::cargo_bin("tcast-post").unwrap();
    cmd.env("THREADCAST_CONFIG", config_path)
        .env("THREADCAST_ENCRYPTION_KEY", TEST_KEY)
        .env("THREADCAST_OWNER", "test-user")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_help_flag_output() {
    Command::cargo_bin("tcast-post")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Publish thread chains"))
        .stdout(predicate::str::contains("--platform"))
        .stdout(predicate::str::contains("--dry-run"))
        .stdout(predicate::str::contains("--chain"));
}

#[test]
fn test_dry_run_splits_segments() {
    let (_temp, config_path) = setup_test_env();

    post_cmd(&config_path)
        .args(["--dry-run", "first post\n---\nsecond post\n---\n\n"])
        .assert()
        .success()
        .stdout(predicate::str::contains("threads [1/2] first post"))
        .stdout(predicate::str::contains("threads [2/2] second post"))
        .stdout(predicate::str::contains("[3/").not());
}

#[test]
fn test_dry_run_reads_stdin() {
    let (_temp, config_path) = setup_test_env();

    post_cmd(&config_path)
        .args(["--dry-run", "--platform", "x,farcaster"])
        .write_stdin("from stdin")
        .assert()
        .success()
        .stdout(predicate::str::contains("x [1/1] from stdin"))
        .stdout(predicate::str::contains("farcaster [1/1] from stdin"))
        .stdout(predicate::str::contains("threads").not());
}

#[test]
fn test_dry_run_json_output() {
    let (_temp, config_path) = setup_test_env();

    let output = post_cmd(&config_path)
        .args(["--dry-run", "--format", "json", "--platform", "x", "a\n---\nb"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let line = String::from_utf8(output.stdout).unwrap();
    let value: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
    assert_eq!(value["platform"], "x");
    assert_eq!(value["segments"][1]["content"], "b");
}

#[test]
fn test_dry_run_chain_file() {
    let (temp, config_path) = setup_test_env();
    let chain_path = temp.path().join("chain.toml");
    fs::write(
        &chain_path,
        r#"
mode = "unlinked"

[[canonical]]
content = "canonical text"

[active]
threads = true
x = true

[[copies.threads]]
content = "threads copy"

[[copies.x]]
content = "x copy"

[[copies.farcaster]]
content = "farcaster copy"
"#,
    )
    .unwrap();

    post_cmd(&config_path)
        .arg("--dry-run")
        .arg("--chain")
        .arg(&chain_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("threads [1/1] threads copy"))
        .stdout(predicate::str::contains("x [1/1] x copy"))
        .stdout(predicate::str::contains("farcaster").not());
}

#[test]
fn test_empty_content_exit_code() {
    let (_temp, config_path) = setup_test_env();

    post_cmd(&config_path)
        .args(["--dry-run", "  \n---\n  "])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Content cannot be empty"));
}

#[test]
fn test_invalid_platform() {
    let (_temp, config_path) = setup_test_env();

    post_cmd(&config_path)
        .args(["--platform", "mastodon", "hello"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown platform 'mastodon'"));
}

#[test]
fn test_post_without_connected_account_exit_code() {
    let (_temp, config_path) = setup_test_env();

    post_cmd(&config_path)
        .args(["--platform", "threads", "hello"])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("threads: failed"))
        .stderr(predicate::str::contains("Connect a Threads account"));
}

#[test]
fn test_post_json_failure_row() {
    let (_temp, config_path) = setup_test_env();

    let output = post_cmd(&config_path)
        .args(["--format", "json", "--platform", "x", "hello"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));

    let line = String::from_utf8(output.stdout).unwrap();
    let value: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
    assert_eq!(value["platform"], "x");
    assert_eq!(value["success"], false);
}
