#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use std::path::PathBuf;
use tempfile::TempDir;

const NOW: &str = "2030-01-01T00:00:00Z";

const FUTURE_TENDER: &str = r#"[
    {"id": "t1", "status": "active.auction",
     "auctionPeriod": {"startDate": "2030-06-01T10:00:00+03:00"}}
]"#;

/// Schedule record matching `FUTURE_TENDER`'s start (10:00+03:00 = 07:00Z).
const PLANNED_T1: &str = r#"[{"id": "t1", "start_time": "2030-06-01T07:00:00Z"}]"#;

fn write_config(dir: &TempDir, timezone: &str) -> PathBuf {
    let path = dir.path().join("bridge.yaml");
    let yaml = format!(
        "feed:\n  api_server: http://127.0.0.1:9\nworker:\n  executable: \"true\"\n  config: worker.yaml\ntimezone: {timezone}\nschedule_db: {}\n",
        dir.path().join("schedule.db").display()
    );
    std::fs::write(&path, yaml).unwrap();
    path
}

fn write_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    path
}

fn bridge(config: Option<&PathBuf>) -> Command {
    let mut cmd = Command::cargo_bin("auction-bridge").unwrap();
    cmd.env_remove("AUCTION_BRIDGE_CONFIG").env_remove("RUST_LOG");
    if let Some(path) = config {
        cmd.env("AUCTION_BRIDGE_CONFIG", path);
    }
    cmd
}

fn stdout_json(cmd: &mut Command) -> serde_json::Value {
    let out = cmd.assert().success().get_output().stdout.clone();
    serde_json::from_slice(&out).unwrap()
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

#[test]
fn config_validate_accepts_minimal_config() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, "Europe/Kiev");
    bridge(Some(&config))
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[error]").not());
}

#[test]
fn config_validate_rejects_unknown_timezone() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, "Mars/Olympus");
    bridge(Some(&config))
        .args(["config", "validate"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("unknown timezone 'Mars/Olympus'"))
        .stderr(predicate::str::contains("config validation found errors"));
}

#[test]
fn missing_config_is_fatal() {
    bridge(None)
        .args(["records", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no config file"));
}

#[test]
fn config_flag_selects_file() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, "UTC");
    bridge(None)
        .arg("--config")
        .arg(&config)
        .args(["--json", "config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"timezone\": \"UTC\""));
}

// ---------------------------------------------------------------------------
// evaluate
// ---------------------------------------------------------------------------

#[test]
fn evaluate_plans_future_tender() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, "Europe/Kiev");
    let tenders = write_file(&dir, "tenders.json", FUTURE_TENDER);
    bridge(Some(&config))
        .arg("evaluate")
        .arg(&tenders)
        .args(["--now", NOW])
        .assert()
        .success()
        .stdout(predicate::str::contains("planning").and(predicate::str::contains("t1")));
}

#[test]
fn evaluate_without_config_uses_records_file() {
    let dir = TempDir::new().unwrap();
    let tenders = write_file(&dir, "tenders.json", FUTURE_TENDER);
    let records = write_file(&dir, "records.json", PLANNED_T1);
    let value = stdout_json(
        bridge(None)
            .arg("--json")
            .arg("evaluate")
            .arg(&tenders)
            .args(["--now", NOW, "--records"])
            .arg(&records),
    );
    assert_eq!(value[0]["decisions"], serde_json::json!([]));
    assert_eq!(
        value[0]["events"][0]["kind"]["reason"],
        "planning_tender_already_planned"
    );
}

#[test]
fn imported_record_prevents_replanning_same_date() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, "Europe/Kiev");
    let tenders = write_file(&dir, "tenders.json", FUTURE_TENDER);
    let records = write_file(&dir, "records.json", PLANNED_T1);

    bridge(Some(&config))
        .args(["records", "import"])
        .arg(&records)
        .assert()
        .success()
        .stdout(predicate::str::contains("Imported 1 record(s)."));

    bridge(Some(&config))
        .args(["records", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("t1"));

    let value = stdout_json(
        bridge(Some(&config))
            .arg("--json")
            .arg("evaluate")
            .arg(&tenders)
            .args(["--now", NOW]),
    );
    assert_eq!(value[0]["decisions"], serde_json::json!([]));
}

#[test]
fn evaluate_replanning_plans_duplicate_documents_once() {
    let dir = TempDir::new().unwrap();
    let doc = r#"{"id": "t1", "status": "active.auction",
                  "auctionPeriod": {"startDate": "2030-06-01T10:00:00+03:00"}}"#;
    let tenders = write_file(&dir, "tenders.json", &format!("[{doc}, {doc}]"));
    let value = stdout_json(
        bridge(None)
            .arg("--json")
            .arg("evaluate")
            .arg(&tenders)
            .args(["--now", NOW, "--replanning"]),
    );
    assert_eq!(value[0]["decisions"].as_array().unwrap().len(), 1);
    assert_eq!(value[1]["decisions"], serde_json::json!([]));
    assert_eq!(
        value[1]["events"][0]["kind"]["reason"],
        "replanning_tender_already_planned"
    );
}

#[test]
fn evaluate_rejects_malformed_document() {
    let dir = TempDir::new().unwrap();
    let tenders = write_file(
        &dir,
        "tenders.json",
        r#"[{"id": "t1", "status": "active.auction", "auctionPeriod": {"startDate": "soon"}}]"#,
    );
    bridge(None)
        .arg("evaluate")
        .arg(&tenders)
        .assert()
        .failure()
        .stderr(predicate::str::starts_with("error:"));
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

#[cfg(unix)]
#[test]
fn run_once_dispatches_worker_for_file_feed() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, "Europe/Kiev");
    let tenders = write_file(
        &dir,
        "tenders.json",
        r#"{"data": [{"id": "t1", "status": "active.auction",
                      "auctionPeriod": {"startDate": "2099-06-01T10:00:00+03:00"}}]}"#,
    );
    let value = stdout_json(
        bridge(Some(&config))
            .args(["--json", "run", "--once", "--from-file"])
            .arg(&tenders),
    );
    assert_eq!(value["documents"], 1);
    assert_eq!(value["dispatched"][0]["action"], "planning");
    assert_eq!(value["dispatched"][0]["tender_id"], "t1");
}

#[test]
fn run_once_skips_past_auction() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, "Europe/Kiev");
    let tenders = write_file(
        &dir,
        "tenders.json",
        r#"[{"id": "t1", "status": "active.auction",
             "auctionPeriod": {"startDate": "2001-06-01T10:00:00+03:00"}}]"#,
    );
    bridge(Some(&config))
        .args(["run", "--once", "--from-file"])
        .arg(&tenders)
        .assert()
        .success()
        .stdout(predicate::str::contains("0 action(s) dispatched, 1 skipped"))
        .stderr(predicate::str::contains("planning_tender_skip"));
}

#[test]
fn run_refuses_invalid_config() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, "Mars/Olympus");
    let tenders = write_file(&dir, "tenders.json", "[]");
    bridge(Some(&config))
        .args(["run", "--once", "--from-file"])
        .arg(&tenders)
        .assert()
        .failure()
        .stderr(predicate::str::contains("config validation found errors"));
}
