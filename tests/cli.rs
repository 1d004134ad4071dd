//! Integration tests for the e4s-cl CLI.
//!
//! These tests run the compiled binary against an isolated storage
//! prefix, so they never touch the invoking user's profiles.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Get an e4s-cl command bound to an isolated storage prefix.
fn e4s_cl(prefix: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("e4s-cl").unwrap();
    cmd.env("E4S_CL_USER_PREFIX", prefix.path());
    cmd.env_remove("LAUNCHER_OPTIONS");
    cmd
}

// ============================================================================
// Basic CLI tests
// ============================================================================

#[test]
fn cli_no_args_shows_help() {
    let prefix = TempDir::new().unwrap();
    e4s_cl(&prefix)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}

#[test]
fn cli_help_flag_shows_help() {
    let prefix = TempDir::new().unwrap();
    e4s_cl(&prefix)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Container launcher for MPI applications",
        ));
}

#[test]
fn cli_version_flag_shows_version() {
    let prefix = TempDir::new().unwrap();
    e4s_cl(&prefix)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("e4s-cl"));
}

#[test]
fn cli_usage_error_exits_2() {
    let prefix = TempDir::new().unwrap();
    e4s_cl(&prefix)
        .args(["profile", "unknown-subcommand"])
        .assert()
        .failure()
        .code(2);
}

// ============================================================================
// Profile lifecycle
// ============================================================================

#[test]
fn profile_create_and_list() {
    let prefix = TempDir::new().unwrap();
    e4s_cl(&prefix)
        .args(["profile", "create", "demo", "--backend", "podman", "--image", "ubi9"])
        .assert()
        .success();

    e4s_cl(&prefix)
        .args(["profile", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("demo"))
        .stdout(predicate::str::contains("podman"));
}

#[test]
fn profile_create_duplicate_fails() {
    let prefix = TempDir::new().unwrap();
    e4s_cl(&prefix)
        .args(["profile", "create", "demo"])
        .assert()
        .success();

    e4s_cl(&prefix)
        .args(["profile", "create", "demo"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn profile_select_and_show() {
    let prefix = TempDir::new().unwrap();
    e4s_cl(&prefix)
        .args(["profile", "create", "demo", "--backend", "containerless"])
        .assert()
        .success();
    e4s_cl(&prefix)
        .args(["profile", "select", "demo"])
        .assert()
        .success();

    // Show without a name falls back to the selection
    e4s_cl(&prefix)
        .args(["profile", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("demo"))
        .stdout(predicate::str::contains("containerless"));

    e4s_cl(&prefix)
        .args(["profile", "unselect"])
        .assert()
        .success();
    e4s_cl(&prefix)
        .args(["profile", "show"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No profile selected"));
}

#[test]
fn profile_delete_wildcard_leaves_others() {
    let prefix = TempDir::new().unwrap();
    for name in ["a-1", "a-2", "b-1"] {
        e4s_cl(&prefix)
            .args(["profile", "create", name])
            .assert()
            .success();
    }

    e4s_cl(&prefix)
        .args(["profile", "delete", "a-*"])
        .assert()
        .success();

    e4s_cl(&prefix)
        .args(["profile", "list", "--short"])
        .assert()
        .success()
        .stdout(predicate::str::contains("b-1"))
        .stdout(predicate::str::contains("a-1").not())
        .stdout(predicate::str::contains("a-2").not());
}

#[test]
fn profile_delete_missing_fails() {
    let prefix = TempDir::new().unwrap();
    e4s_cl(&prefix)
        .args(["profile", "delete", "ghost"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn profile_dump_is_json_with_null_scalars() {
    let prefix = TempDir::new().unwrap();
    e4s_cl(&prefix)
        .args(["profile", "create", "demo", "--files", "/etc/hosts,/etc/hostname"])
        .assert()
        .success();

    let output = e4s_cl(&prefix)
        .args(["profile", "dump"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let records: serde_json::Value = serde_json::from_slice(&output).unwrap();
    let records = records.as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["name"], "demo");
    assert!(records[0]["image"].is_null());
    assert_eq!(records[0]["files"].as_array().unwrap().len(), 2);
}

#[test]
fn profile_edit_add_files_twice_warns() {
    let prefix = TempDir::new().unwrap();
    e4s_cl(&prefix)
        .args(["profile", "create", "demo"])
        .assert()
        .success();

    e4s_cl(&prefix)
        .args(["profile", "edit", "demo", "--add-files", "/tmp/x"])
        .assert()
        .success();

    let first = e4s_cl(&prefix)
        .args(["profile", "dump", "demo"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    // The second identical edit warns and leaves the record unchanged
    e4s_cl(&prefix)
        .args(["profile", "edit", "demo", "--add-files", "/tmp/x"])
        .assert()
        .success()
        .stderr(predicate::str::contains("already in profile's files"));

    let second = e4s_cl(&prefix)
        .args(["profile", "dump", "demo"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    assert_eq!(first, second);
}

#[test]
fn profile_edit_normalizes_paths() {
    let prefix = TempDir::new().unwrap();
    e4s_cl(&prefix)
        .args(["profile", "create", "demo"])
        .assert()
        .success();
    e4s_cl(&prefix)
        .args(["profile", "edit", "demo", "--add-files", "/tmp/"])
        .assert()
        .success();

    let output = e4s_cl(&prefix)
        .args(["profile", "dump", "demo"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let records: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(records[0]["files"][0], "/tmp");
}

#[test]
fn profile_copy_duplicates_fields() {
    let prefix = TempDir::new().unwrap();
    e4s_cl(&prefix)
        .args(["profile", "create", "demo", "--backend", "docker", "--image", "fedora"])
        .assert()
        .success();
    e4s_cl(&prefix)
        .args(["profile", "copy", "demo", "clone"])
        .assert()
        .success();

    let output = e4s_cl(&prefix)
        .args(["profile", "dump", "clone"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let records: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(records[0]["backend"], "docker");
    assert_eq!(records[0]["image"], "fedora");
}

#[test]
fn profile_diff_reports_field_changes() {
    let prefix = TempDir::new().unwrap();
    e4s_cl(&prefix)
        .args(["profile", "create", "left", "--backend", "podman"])
        .assert()
        .success();
    e4s_cl(&prefix)
        .args(["profile", "create", "right", "--backend", "docker"])
        .assert()
        .success();

    e4s_cl(&prefix)
        .args(["profile", "diff", "left", "right"])
        .assert()
        .success()
        .stdout(predicate::str::contains("- backend: podman"))
        .stdout(predicate::str::contains("+ backend: docker"));
}

// ============================================================================
// Init
// ============================================================================

#[test]
fn init_creates_selected_profile() {
    let prefix = TempDir::new().unwrap();
    e4s_cl(&prefix)
        .args(["init", "--backend", "containerless"])
        .assert()
        .success();

    e4s_cl(&prefix)
        .args(["profile", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("containerless"));
}

// ============================================================================
// Launch
// ============================================================================

#[test]
fn launch_requires_backend_and_image() {
    let prefix = TempDir::new().unwrap();
    e4s_cl(&prefix)
        .args(["launch", "--", "/bin/true"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("Missing field"));
}

#[test]
fn launch_dry_run_prints_execute_child() {
    let prefix = TempDir::new().unwrap();
    e4s_cl(&prefix)
        .args([
            "launch",
            "--backend",
            "containerless",
            "--image",
            "none",
            "--libraries",
            "/usr/lib/libmpi.so.40",
            "-d",
            "--",
            "/bin/true",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "execute --backend containerless --image none",
        ))
        .stdout(predicate::str::contains("--libraries /usr/lib/libmpi.so.40"))
        .stdout(predicate::str::ends_with("/bin/true\n"));
}

#[test]
fn launch_dry_run_uses_profile_fields() {
    let prefix = TempDir::new().unwrap();
    e4s_cl(&prefix)
        .args([
            "profile", "create", "launchme", "--backend", "containerless", "--image", "none",
        ])
        .assert()
        .success();
    e4s_cl(&prefix)
        .args(["profile", "select", "launchme"])
        .assert()
        .success();

    e4s_cl(&prefix)
        .args(["launch", "-d", "--", "/bin/true"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--backend containerless"));
}

#[test]
fn launch_unknown_from_family_rejected() {
    let prefix = TempDir::new().unwrap();
    e4s_cl(&prefix)
        .args([
            "launch",
            "--backend",
            "containerless",
            "--image",
            "none",
            "--from",
            "nompi",
            "--",
            "/bin/true",
        ])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("unknown MPI family"));
}

// ============================================================================
// Execute (internal)
// ============================================================================

#[test]
fn execute_containerless_runs_program() {
    let prefix = TempDir::new().unwrap();
    e4s_cl(&prefix)
        .args([
            "execute",
            "--backend",
            "containerless",
            "--image",
            "none",
            "--",
            "/bin/true",
        ])
        .assert()
        .success();
}

#[test]
fn execute_propagates_exit_code() {
    let prefix = TempDir::new().unwrap();
    e4s_cl(&prefix)
        .args([
            "execute",
            "--backend",
            "containerless",
            "--image",
            "none",
            "--",
            "/bin/false",
        ])
        .assert()
        .failure()
        .code(1);
}
