//! Smoke tests for the `gitvista` binary's CLI surface, run as a real
//! subprocess the way a user would invoke it.

use regex::Regex;
use std::process::Command;

fn gitvista() -> Command {
    Command::new(env!("CARGO_BIN_EXE_gitvista"))
}

#[test]
fn help_lists_every_subcommand() {
    let output = gitvista().arg("--help").output().expect("run gitvista --help");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);

    let subcommand = Regex::new(r"(?m)^\s*add\b").unwrap();
    assert!(subcommand.is_match(&stdout), "missing `add` in help:\n{stdout}");
    for name in ["list", "status", "remove", "watch", "serve"] {
        assert!(stdout.contains(name), "missing `{name}` in help:\n{stdout}");
    }
}

#[test]
fn version_flag_reports_a_semver_version() {
    let output = gitvista().arg("--version").output().expect("run gitvista --version");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);

    let version = Regex::new(r"^gitvista \d+\.\d+\.\d+").unwrap();
    assert!(version.is_match(stdout.trim()), "unexpected version output: {stdout}");
}

#[test]
fn invalid_url_add_fails_with_nonzero_exit_and_no_panic() {
    let tmp = tempfile::TempDir::new().unwrap();
    let output = gitvista()
        .env("GITVISTA_DATA_DIR", tmp.path())
        .env("GITVISTA_MAX_REPOS", "5")
        .arg("add")
        .arg("--upload-pack=evil")
        .output()
        .expect("run gitvista add");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.to_lowercase().contains("option"),
        "expected an option-injection error, got: {stderr}"
    );
}
