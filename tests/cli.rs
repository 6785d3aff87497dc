//! Command-line behavior that happens before the dashboard takes the terminal.
#![cfg(unix)]

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Runs the binary with every default config location pointed into `home`.
fn portdeck(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("portdeck").expect("portdeck binary should be built");
    cmd.current_dir(home.path())
        .env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path().join(".config"))
        .env("XDG_CACHE_HOME", home.path().join(".cache"))
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn help_describes_the_dashboard() {
    let home = TempDir::new().unwrap();
    portdeck(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("portdeck"))
        .stdout(predicate::str::contains("--config"));
}

#[test]
fn completions_are_generated() {
    let home = TempDir::new().unwrap();
    portdeck(&home)
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("portdeck"));
}

#[test]
fn missing_config_fails_before_the_ui() {
    let home = TempDir::new().unwrap();
    portdeck(&home)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Configuration file not found"))
        .stderr(predicate::str::contains("portdeck.yml"));
}

#[test]
fn missing_explicit_config_is_listed_as_searched() {
    let home = TempDir::new().unwrap();
    let wanted = home.path().join("elsewhere.yml");
    portdeck(&home)
        .arg("--config")
        .arg(&wanted)
        .assert()
        .failure()
        .stderr(predicate::str::contains("elsewhere.yml"));
}

#[test]
fn malformed_config_is_reported_with_its_path() {
    let home = TempDir::new().unwrap();
    let path = home.path().join("portdeck.yml");
    fs::write(&path, "services:\n  ssh:\n    - name: db\n      ports: [\"x:1\"]\n").unwrap();

    portdeck(&home)
        .arg("--keep-ports")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to parse config file"));
}
