use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;

fn run(args: &[&str]) -> Value {
    let output = Command::cargo_bin("saga-lock")
        .unwrap()
        .args(args)
        .env_remove("RUST_LOG")
        .env("SAGA_LOG", "info")
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    serde_json::from_slice(&output.stdout).unwrap()
}

fn claimed(report: &Value) -> Vec<String> {
    report["results"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|r| r["item"].as_str().map(str::to_string))
        .collect()
}

#[test]
fn enable_lock_claims_each_item_once() {
    let report = run(&["--enable-lock"]);

    assert_eq!(report["variant"], "locked");
    assert_eq!(claimed(&report), vec!["a", "b", "c"]);
    assert_eq!(report["final_state"], serde_json::json!([]));
    assert_eq!(report["audit"]["duplicates"], serde_json::json!([]));
}

#[test]
fn default_run_is_unlocked_and_races() {
    let report = run(&[]);

    assert_eq!(report["variant"], "unlocked");
    assert_eq!(claimed(&report), vec!["a", "a", "a"]);
    assert_eq!(report["audit"]["duplicates"], serde_json::json!(["a"]));
    assert_eq!(report["final_state"], serde_json::json!(["b", "c"]));
}

#[test]
fn store_changes_are_logged() {
    Command::cargo_bin("saga-lock")
        .unwrap()
        .arg("--enable-lock")
        .env_remove("RUST_LOG")
        .env_remove("LOG_FORMAT")
        .assert()
        .success()
        .stderr(predicate::str::contains("Store changed"))
        .stderr(predicate::str::contains("All workers joined"));
}

#[test]
fn json_logs_on_request() {
    Command::cargo_bin("saga-lock")
        .unwrap()
        .env_remove("RUST_LOG")
        .env("LOG_FORMAT", "json")
        .assert()
        .success()
        .stderr(predicate::str::contains(r#""message":"Race detected""#));
}

#[test]
fn unknown_flag_rejected() {
    Command::cargo_bin("saga-lock")
        .unwrap()
        .arg("--workers")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unexpected argument"));
}
