//! CLI contract tests for the two binaries.

use assert_cmd::Command;
use predicates::prelude::*;

use chaperone::config;

// ---------------------------------------------------------------------------
// chaperone-proxy
// ---------------------------------------------------------------------------

#[test]
fn proxy_without_arguments_exits_with_the_distinguished_code() {
    let tmp = tempfile::TempDir::new().unwrap();
    Command::cargo_bin("chaperone-proxy")
        .unwrap()
        .env(config::ENV_ENDPOINT, tmp.path().join("absent.sock"))
        .assert()
        .failure()
        .code(config::PROXY_FAILURE_CODE);
}

#[test]
fn proxy_with_unreachable_session_exits_with_the_distinguished_code() {
    let tmp = tempfile::TempDir::new().unwrap();
    Command::cargo_bin("chaperone-proxy")
        .unwrap()
        .env(config::ENV_ENDPOINT, tmp.path().join("absent.sock"))
        .args(["-p", "0", "--exec", "echo", "--", "echo", "hi"])
        .assert()
        .failure()
        .code(config::PROXY_FAILURE_CODE);
}

// ---------------------------------------------------------------------------
// chaperone
// ---------------------------------------------------------------------------

#[test]
fn help_describes_the_tool() {
    Command::cargo_bin("chaperone")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("intercepted"));
}

#[test]
fn command_is_required() {
    Command::cargo_bin("chaperone").unwrap().assert().failure();
}

#[cfg(unix)]
#[test]
fn wrap_only_session_propagates_the_root_exit_code() {
    let tmp = tempfile::TempDir::new().unwrap();
    Command::cargo_bin("chaperone")
        .unwrap()
        .env(config::ENV_ENDPOINT, tmp.path().join("s.sock"))
        .args(["--wrap-only", "--", "sh", "-c", "exit 3"])
        .assert()
        .code(3);
}

#[cfg(unix)]
#[test]
fn wrap_only_session_succeeds_for_a_trivial_command() {
    let tmp = tempfile::TempDir::new().unwrap();
    Command::cargo_bin("chaperone")
        .unwrap()
        .env(config::ENV_ENDPOINT, tmp.path().join("s.sock"))
        .args(["--wrap-only", "--", "echo", "Hello, World!"])
        .assert()
        .success();
}
