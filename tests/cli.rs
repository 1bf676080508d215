// ABOUTME: Integration tests for the cutover CLI binary.
// ABOUTME: Covers help output, init, status on empty state, and request queueing.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;

fn cutover_cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("cutover"))
}

fn project() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("cutover.yml"), "service: web\n").unwrap();
    dir
}

fn inbox_entries(project: &Path) -> usize {
    match fs::read_dir(project.join(".cutover/inbox")) {
        Ok(entries) => entries.count(),
        Err(_) => 0,
    }
}

#[test]
fn help_shows_commands() {
    cutover_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("init"))
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("trigger"))
        .stdout(predicate::str::contains("approve"))
        .stdout(predicate::str::contains("status"));
}

#[test]
fn init_creates_config_file() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config_path = temp_dir.path().join("cutover.yml");

    cutover_cmd()
        .current_dir(temp_dir.path())
        .args(["init", "--service", "checkout"])
        .assert()
        .success();

    let content = fs::read_to_string(&config_path).unwrap();
    assert!(content.contains("service: checkout"));
    assert!(content.contains("strategy:"));
}

#[test]
fn init_refuses_to_overwrite_existing_config() {
    let temp_dir = project();

    cutover_cmd()
        .current_dir(temp_dir.path())
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn missing_config_is_reported() {
    let temp_dir = tempfile::tempdir().unwrap();

    cutover_cmd()
        .current_dir(temp_dir.path())
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("configuration file not found"));
}

#[test]
fn status_json_on_fresh_state() {
    let temp_dir = project();

    let out = cutover_cmd()
        .current_dir(temp_dir.path())
        .args(["status", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let report: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(report["service"], "web");
    assert_eq!(report["router"]["active"], "web-blue");
    assert_eq!(report["router"]["weight"], 0);
    assert!(report["daemon"].is_null());
    assert!(report["deployment"].is_null());
    assert_eq!(report["runs"].as_array().unwrap().len(), 0);
}

#[test]
fn trigger_queues_a_request_for_the_daemon() {
    let temp_dir = project();

    cutover_cmd()
        .current_dir(temp_dir.path())
        .args(["trigger", "--revision", "3f2a9c1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Queued trigger 3f2a9c1"))
        .stderr(predicate::str::contains("no daemon holds the state lock"));

    assert_eq!(inbox_entries(temp_dir.path()), 1);
}

#[test]
fn explicit_config_path_is_used() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = temp_dir.path().join("staging.yml");
    fs::write(&config, "service: web\nstate_dir: state\n").unwrap();

    cutover_cmd()
        .args(["--quiet", "--config"])
        .arg(&config)
        .arg("trigger")
        .assert()
        .success();

    assert_eq!(
        fs::read_dir(temp_dir.path().join("state/inbox"))
            .unwrap()
            .count(),
        1
    );
}

#[test]
fn approving_an_unknown_run_fails() {
    let temp_dir = project();

    cutover_cmd()
        .current_dir(temp_dir.path())
        .args(["approve", "run-nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no pipeline run run-nope"));

    assert_eq!(inbox_entries(temp_dir.path()), 0);
}

#[test]
fn quiet_and_verbose_conflict() {
    let temp_dir = project();

    cutover_cmd()
        .current_dir(temp_dir.path())
        .args(["--quiet", "--verbose", "status"])
        .assert()
        .failure();
}
