use std::path::Path;
use std::process::Command;

use serde_json::Value;
use tempfile::TempDir;

fn bin(home: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_daybook"));
    cmd.env("DAYBOOK_HOME", home).env_remove("RUST_LOG");
    cmd
}

fn run_json(home: &Path, args: &[&str]) -> Value {
    let output = bin(home).args(args).arg("--json").output().expect("run");
    assert!(
        output.status.success(),
        "daybook {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("json")
}

#[test]
fn a_moment_can_be_edited_once() {
    let home = TempDir::new().expect("home");
    let added = run_json(home.path(), &["moment", "add", "saw a heron", "--mood", "calm"]);
    let id = added["moment"]["id"].as_str().expect("id").to_string();
    assert_eq!(added["moment"]["edited"], Value::Bool(false));

    let edited = run_json(home.path(), &["moment", "edit", &id, "saw two herons"]);
    assert_eq!(edited["moment"]["edited"], Value::Bool(true));
    assert!(edited["moment"]["editedAt"].is_string());

    let again = bin(home.path())
        .args(["moment", "edit", &id, "saw three herons"])
        .output()
        .expect("run");
    assert!(!again.status.success());
    let stderr = String::from_utf8_lossy(&again.stderr);
    assert!(stderr.contains("conflict: A moment can only be edited once."));

    let listed = run_json(home.path(), &["moment", "list"]);
    assert_eq!(listed["moments"][0]["text"], "saw two herons");

    run_json(home.path(), &["moment", "rm", &id]);
    let listed = run_json(home.path(), &["moment", "list"]);
    assert_eq!(listed["moments"], Value::Array(vec![]));
}

#[test]
fn remind_lists_what_it_armed_and_exits() {
    let home = TempDir::new().expect("home");
    // Past reminders and other days are never armed.
    run_json(
        home.path(),
        &["add", "old call", "--date", "2020-01-01", "--remind", "10:00"],
    );
    let output = run_json(home.path(), &["remind", "--for-secs", "0"]);
    assert_eq!(output["armed"], Value::Array(vec![]));
}

#[test]
fn version_reports_the_package_version() {
    let home = TempDir::new().expect("home");
    let output = run_json(home.path(), &["version"]);
    let version = output["version"].as_str().expect("version");
    assert!(version.starts_with(env!("CARGO_PKG_VERSION")));
}
