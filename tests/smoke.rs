//! Smoke tests -- verify the binary runs and key subcommands exist.

use assert_cmd::Command;

#[test]
fn test_cli_help() {
    Command::cargo_bin("fleetmedic")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains(
            "Incident detection and fleet health scoring",
        ));
}

#[test]
fn test_cli_version() {
    Command::cargo_bin("fleetmedic")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("fleetmedic"));
}

#[test]
fn test_run_subcommand_exists() {
    Command::cargo_bin("fleetmedic")
        .unwrap()
        .args(["run", "--help"])
        .assert()
        .success();
}

#[test]
fn test_report_subcommand_exists() {
    Command::cargo_bin("fleetmedic")
        .unwrap()
        .args(["report", "--help"])
        .assert()
        .success();
}

#[test]
fn test_purge_subcommand_exists() {
    Command::cargo_bin("fleetmedic")
        .unwrap()
        .args(["purge", "--help"])
        .assert()
        .success();
}

#[test]
fn test_latest_fails_cleanly_on_empty_store() {
    let dir = tempfile::TempDir::new().unwrap();
    Command::cargo_bin("fleetmedic")
        .unwrap()
        .args(["--artifacts-root"])
        .arg(dir.path())
        .arg("latest")
        .assert()
        .failure()
        .stderr(predicates::str::contains("no successful runs yet"));
}
