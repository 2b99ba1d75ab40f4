//! Integration tests for the fabricd binary.

use assert_cmd::Command;
use predicates::prelude::*;

fn fabricd() -> Command {
    let mut cmd = Command::cargo_bin("fabricd").unwrap();
    for var in ["FABRIC_MEMBERS", "FABRIC_PROFILE", "FABRIC_SECRET", "FABRIC_RUNTIME", "FABRIC_CONFIG"] {
        cmd.env_remove(var);
    }
    cmd
}

#[test]
fn test_help() {
    fabricd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--bootstrap"))
        .stdout(predicate::str::contains("--members"));
}

#[test]
fn test_missing_members_fails() {
    fabricd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("No members to join"));
}

#[test]
fn test_unsupported_profile_fails() {
    fabricd()
        .args(["--bootstrap", "--profile", "metro"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unsupported cluster profile: metro"));
}

#[test]
fn test_missing_config_file_fails() {
    fabricd()
        .args(["--bootstrap", "--config", "/definitely/not/here.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Config file not found"));
}

#[test]
fn test_unreachable_runtime_fails() {
    fabricd()
        .args([
            "--bootstrap",
            "--bind-address",
            "127.0.0.1",
            "--bind-port",
            "0",
            "--runtime",
            "tcp://127.0.0.1:1",
        ])
        .timeout(std::time::Duration::from_secs(30))
        .assert()
        .failure();
}
