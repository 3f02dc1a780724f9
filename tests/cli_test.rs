use assert_cmd::Command;
use predicates::prelude::*;

fn intent_engine() -> Command {
    let mut cmd = Command::cargo_bin("intent-engine").unwrap();
    cmd.env("INTENT_ENGINE_OBSERVABILITY__LOG_LEVEL", "error");
    cmd
}

#[test]
fn test_help_lists_commands() {
    intent_engine()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("transition"))
        .stdout(predicate::str::contains("approve"))
        .stdout(predicate::str::contains("redispatch"))
        .stdout(predicate::str::contains("graph"));
}

#[test]
fn test_graph_prints_wiring_without_dead_ends() {
    intent_engine()
        .arg("graph")
        .assert()
        .success()
        .stdout(predicate::str::contains("COMPETITOR_START"))
        .stdout(predicate::str::contains("competitors.job"))
        .stdout(predicate::str::contains("No dead ends"));
}

#[test]
fn test_graph_json_is_parseable() {
    let output = intent_engine().args(["--json", "graph"]).output().unwrap();
    assert!(output.status.success());

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(value.is_object() || value.is_array());
}

#[test]
fn test_config_prints_defaults() {
    intent_engine()
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("max_connections"))
        .stdout(predicate::str::contains("strict_automation"));
}

#[test]
fn test_unknown_event_is_rejected() {
    intent_engine()
        .args([
            "transition",
            "--org",
            "org-1",
            "--workflow",
            "2f1c6a2e-9a57-4d3b-8f0e-6c1c1b0f7a11",
            "--event",
            "NOT_AN_EVENT",
        ])
        .assert()
        .failure();
}

#[test]
fn test_bad_workflow_id_is_rejected() {
    intent_engine()
        .args(["status", "--org", "org-1", "--workflow", "not-a-uuid"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not a workflow id"));
}

#[cfg(feature = "database")]
#[test]
fn test_created_workflow_is_readable_by_a_later_command() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("engine.db").display());

    let output = intent_engine()
        .env("INTENT_ENGINE_DATABASE__URL", &url)
        .args(["--json", "create", "--org", "org-1"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let created: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let id = created["id"].as_str().unwrap().to_string();

    intent_engine()
        .env("INTENT_ENGINE_DATABASE__URL", &url)
        .args(["status", "--org", "org-1", "--workflow", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("icp_pending"));
}
