//! CLI integration tests
use predicates::prelude::*;

fn cmd() -> assert_cmd::Command {
    assert_cmd::cargo::cargo_bin_cmd!("fanarchive")
}

#[test]
fn test_cli_help() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Browse works, users, and series"));
}

#[test]
fn test_cli_version() {
    cmd().arg("--version").assert().success();
}

#[test]
fn test_cli_requires_subcommand() {
    cmd().assert().failure();
}

#[test]
fn test_cli_work_requires_id() {
    cmd().arg("work").assert().failure().stderr(predicate::str::contains("ID"));
}

#[test]
fn test_cli_work_rejects_non_numeric_id() {
    cmd().args(["work", "not-a-number"]).assert().failure();
}

#[test]
fn test_cli_work_help_lists_flags() {
    cmd()
        .args(["work", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--full"))
        .stdout(predicate::str::contains("--text"));
}

#[test]
fn test_cli_user_help_lists_flags() {
    cmd()
        .args(["user", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--works"));
}

#[test]
fn test_cli_search_help_lists_flags() {
    cmd()
        .args(["search", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--fandom"))
        .stdout(predicate::str::contains("--complete"))
        .stdout(predicate::str::contains("--min-kudos"));
}

#[test]
fn test_cli_search_requires_query() {
    cmd().arg("search").assert().failure().stderr(predicate::str::contains("QUERY"));
}

#[test]
fn test_cli_global_flags_parse() {
    cmd()
        .args(["--max-requests", "12", "--window", "60", "series", "--help"])
        .assert()
        .success();
}
