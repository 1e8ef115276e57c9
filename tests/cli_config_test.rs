//! Integration tests for configuration layering and the audit log.

mod common;

use common::{TestEnv, json};
use predicates::prelude::*;

fn setting<'a>(config: &'a serde_json::Value, name: &str) -> &'a serde_json::Value {
    config["settings"]
        .as_array()
        .unwrap()
        .iter()
        .find(|row| row["setting"] == name)
        .unwrap()
}

#[test]
fn test_config_reports_sources() {
    let env = TestEnv::new();
    std::fs::write(
        env.config_dir.path().join("config.kdl"),
        "runtime-dir \"/run/fleetseal\"\nsecrets-dir \"system-secrets\"\n",
    )
    .unwrap();
    env.write_config("secrets-dir \"vault\"\n");

    let output = env
        .fseal()
        .args(["config", "--keys-dir", "cli-keys"])
        .env("FLEETSEAL_AUDIT_LOG", "/tmp/fleetseal-audit.jsonl")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let config = json(&output);

    assert_eq!(setting(&config, "secrets-dir")["source"], "project");
    assert_eq!(setting(&config, "runtime-dir")["source"], "system");
    assert_eq!(setting(&config, "runtime-dir")["value"], "/run/fleetseal");
    assert_eq!(setting(&config, "keys-dir")["source"], "cli");
    assert_eq!(
        setting(&config, "audit-log")["source"],
        "env:FLEETSEAL_AUDIT_LOG"
    );
    assert_eq!(setting(&config, "env-prefix")["source"], "default");
}

#[test]
fn test_custom_key_table() {
    let env = TestEnv::new();
    env.write_config(
        "env-prefix \"BOT\"\nkey \"identity\" env=\"BOT_NAME\" description=\"Robot name\"\nkey \"map_url\"\n",
    );

    env.fseal()
        .args(["keys", "-H"])
        .assert()
        .success()
        .stdout(predicate::str::contains("BOT_NAME"))
        .stdout(predicate::str::contains("BOT_MAP_URL"))
        .stdout(predicate::str::contains("Robot name"));

    let output = env
        .fseal()
        .args(["resolve", "rx-7", "--show-values"])
        .env("BOT_NAME", "rx-7")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let report = json(&output);
    assert_eq!(report["values"]["identity"]["value"], "rx-7");
    assert_eq!(report["values"]["map_url"]["value"], "[[map_url]]");
}

#[test]
fn test_invalid_config_is_reported() {
    let env = TestEnv::new();
    env.write_config("secrets-dirr \"x\"\n");

    env.fseal()
        .arg("keys")
        .assert()
        .failure()
        .stderr(predicate::str::starts_with("fseal: error: config:"))
        .stderr(predicate::str::contains("secrets-dirr"));
}

#[test]
fn test_explicit_config_flag() {
    let env = TestEnv::new();
    let path = env.path().join("robots.kdl");
    std::fs::write(&path, "key \"identity\"\n").unwrap();

    let output = env
        .fseal()
        .arg("--config")
        .arg(&path)
        .arg("keys")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    assert_eq!(json(&output)["keys"].as_array().unwrap().len(), 1);

    env.fseal()
        .args(["--config", "missing.kdl", "keys"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("config file not found"));
}

#[test]
fn test_audit_log_records_sources_not_values() {
    let env = TestEnv::new();
    env.write_config("audit-log \"audit.jsonl\"\n");

    env.fseal()
        .args(["resolve", "rx-7", "-k", "identity"])
        .env("ROBOT_IDENTITY", "classified-value")
        .assert()
        .success();
    env.fseal()
        .args(["check", "rx-7", "-k", "identity"])
        .env("ROBOT_IDENTITY", "classified-value")
        .assert()
        .success();

    let log = std::fs::read_to_string(env.path().join("audit.jsonl")).unwrap();
    let lines: Vec<serde_json::Value> = log
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["command"], "resolve");
    assert_eq!(lines[1]["command"], "check");
    assert_eq!(lines[0]["target"], "rx-7");
    assert_eq!(lines[0]["status"], "complete");
    assert_eq!(lines[0]["sources"]["identity"], "environment");
    assert!(!log.contains("classified-value"));
}
