//! Integration tests for `fseal seal`, `fseal rotate` and `fseal inspect`.

mod common;

use common::{TestEnv, json};
use predicates::prelude::*;

#[test]
fn test_seal_from_stdin_and_file() {
    let env = TestEnv::new();
    let (_, recipient) = env.new_key("rx-7.key");

    let output = env
        .fseal()
        .args(["seal", "rx-7", "-r", &recipient])
        .write_stdin("identity = \"rx-7\"\n")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let result = json(&output);
    assert_eq!(result["keys"][0], "identity");
    assert!(env.artifact_path("rx-7").is_file());

    let input = env.path().join("rx-8.toml");
    std::fs::write(&input, "endpoint = \"https://fleet\"\n").unwrap();
    env.fseal()
        .args(["seal", "rx-8", "-r", &recipient, "-i"])
        .arg(&input)
        .assert()
        .success();
    assert!(env.artifact_path("rx-8").is_file());
}

#[test]
fn test_seal_uses_configured_recipients() {
    let env = TestEnv::new();
    let (key_file, recipient) = env.new_key("fleet.key");
    env.write_config(&format!("recipient \"{}\"\n", recipient));

    env.fseal()
        .args(["seal", "rx-7"])
        .write_stdin("credential = \"hunter2\"\n")
        .assert()
        .success();

    env.fseal()
        .args(["resolve", "rx-7", "-k", "credential", "--show-values"])
        .arg("--key-file")
        .arg(&key_file)
        .assert()
        .success()
        .stdout(predicate::str::contains("hunter2"));
}

#[test]
fn test_seal_errors() {
    let env = TestEnv::new();
    let (_, recipient) = env.new_key("rx-7.key");

    env.fseal()
        .args(["seal", "rx-7"])
        .write_stdin("identity = \"x\"\n")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no recipients"));

    env.fseal()
        .args(["seal", "rx-7", "-r", "not-base64!"])
        .write_stdin("identity = \"x\"\n")
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid recipient"));

    env.fseal()
        .args(["seal", "rx-7", "-r", &recipient])
        .write_stdin("identity = [1, 2]\n")
        .assert()
        .failure()
        .stderr(predicate::str::contains("must be a string"));

    env.seal("rx-7", "identity = \"x\"\n", &recipient);
    env.fseal()
        .args(["seal", "rx-7", "-r", &recipient])
        .write_stdin("identity = \"y\"\n")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--force"));
}

#[test]
fn test_rotate_round_trip() {
    let env = TestEnv::new();
    let (old_key, old_recipient) = env.new_key("old.key");
    let (new_key, new_recipient) = env.new_key("new.key");
    env.seal(
        "rx-7",
        "identity = \"rx-7\"\ncredential = \"s3cret\"\n",
        &old_recipient,
    );

    let output = env
        .fseal()
        .args(["rotate", "rx-7", "-r", &new_recipient])
        .arg("--key-file")
        .arg(&old_key)
        .arg("--verify-key")
        .arg(&new_key)
        .assert()
        .success()
        .stderr(predicate::str::is_empty())
        .get_output()
        .stdout
        .clone();
    let result = json(&output);
    assert_eq!(result["verification"], "verified");
    assert_eq!(result["mode"], "replace");
    assert_eq!(result["key_count"], 2);

    env.fseal()
        .args(["resolve", "rx-7", "-k", "credential", "--show-values"])
        .arg("--key-file")
        .arg(&new_key)
        .assert()
        .success()
        .stdout(predicate::str::contains("s3cret"));

    // The old key was revoked.
    env.fseal()
        .args(["resolve", "rx-7", "-k", "credential", "--show-values"])
        .arg("--key-file")
        .arg(&old_key)
        .assert()
        .success()
        .stdout(predicate::str::contains("[[credential]]"));
}

#[test]
fn test_rotate_without_verification_warns() {
    let env = TestEnv::new();
    let (old_key, old_recipient) = env.new_key("old.key");
    let (_, new_recipient) = env.new_key("new.key");
    env.seal("rx-7", "identity = \"rx-7\"\n", &old_recipient);

    env.fseal()
        .args(["rotate", "rx-7", "--union", "-r", &new_recipient])
        .arg("--key-file")
        .arg(&old_key)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"unverified\""))
        .stderr(predicate::str::contains("was not verified"));
}

#[test]
fn test_rotate_failures_leave_artifact_untouched() {
    let env = TestEnv::new();
    let (old_key, old_recipient) = env.new_key("old.key");
    let (_, new_recipient) = env.new_key("new.key");
    let (stranger, _) = env.new_key("stranger.key");
    env.seal("rx-7", "identity = \"rx-7\"\n", &old_recipient);
    let before = std::fs::read(env.artifact_path("rx-7")).unwrap();

    env.fseal()
        .args(["rotate", "rx-7", "-r", &new_recipient])
        .arg("--key-file")
        .arg(&stranger)
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "fseal: error: rotate: cannot decrypt the original artifact",
        ));

    env.fseal()
        .args(["rotate", "rx-7"])
        .arg("--key-file")
        .arg(&old_key)
        .assert()
        .failure()
        .stderr(predicate::str::contains("fseal: error: rotate: no recipients"));

    env.fseal()
        .args(["rotate", "rx-7", "-r", &new_recipient])
        .arg("--key-file")
        .arg(&old_key)
        .arg("--verify-key")
        .arg(&stranger)
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed verification"));

    assert_eq!(std::fs::read(env.artifact_path("rx-7")).unwrap(), before);
}

#[test]
fn test_inspect_shows_header_only() {
    let env = TestEnv::new();
    let (key_file, recipient) = env.new_key("rx-7.key");
    env.seal("rx-7", "identity = \"top-secret\"\n", &recipient);

    let output = env
        .fseal()
        .args(["inspect", "rx-7"])
        .assert()
        .success()
        .stdout(predicate::str::contains("top-secret").not())
        .get_output()
        .stdout
        .clone();
    let info = json(&output);
    assert_eq!(info["tag"], "rx-7");
    assert_eq!(info["tag_matches"], true);
    assert_eq!(info["version"], 1);
    assert_eq!(info["recipients"][0]["public_key"], recipient.as_str());
    assert!(info.get("keys").is_none());

    env.fseal()
        .args(["inspect", "rx-7", "-H"])
        .arg("--key-file")
        .arg(&key_file)
        .assert()
        .success()
        .stdout(predicate::str::contains("keys: identity"))
        .stdout(predicate::str::contains("top-secret").not());
}

#[test]
fn test_seal_syntax_error_does_not_echo_values() {
    let env = TestEnv::new();
    let (_, recipient) = env.new_key("rx-7.key");

    env.fseal()
        .args(["seal", "rx-7", "-r", &recipient])
        .write_stdin("credential = \"hunter2-TOPSECRET\n")
        .assert()
        .failure()
        .stderr(predicate::str::starts_with(
            "fseal: error: input: invalid TOML input",
        ))
        .stderr(predicate::str::contains("line 1"))
        .stderr(predicate::str::contains("hunter2-TOPSECRET").not());
    assert!(!env.artifact_path("rx-7").exists());
}
