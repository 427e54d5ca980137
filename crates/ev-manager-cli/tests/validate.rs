use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;

fn everest_dir_with(manifest_json: &str, interface_json: &str, config_json: &str) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();

    let module_dir = dir.path().join("modules").join("evse_module");
    fs::create_dir_all(&module_dir).unwrap();
    fs::write(module_dir.join("manifest.json"), manifest_json).unwrap();

    let interfaces_dir = dir.path().join("interfaces");
    fs::create_dir_all(&interfaces_dir).unwrap();
    fs::write(interfaces_dir.join("evse.json"), interface_json).unwrap();

    fs::write(dir.path().join("config.json"), config_json).unwrap();
    fs::write(dir.path().join("logging.ini"), "").unwrap();

    dir
}

fn manifest() -> &'static str {
    r#"{
        "metadata": { "authors": ["everest"], "license": "MIT" },
        "implements": { "main": { "interface": "evse" } }
    }"#
}

fn manifest_requiring_phantom() -> &'static str {
    r#"{
        "metadata": { "authors": ["everest"], "license": "MIT" },
        "implements": { "main": { "interface": "evse" } },
        "requires": { "phantom": { "interface": "evse", "min_connections": 1, "max_connections": 1 } }
    }"#
}

fn interface() -> &'static str {
    r#"{"cmds": {}, "vars": {}}"#
}

#[test]
fn validate_accepts_a_well_formed_deployment() {
    let everest_dir = everest_dir_with(manifest(), interface(), r#"{"charger": {"module": "evse_module"}}"#);

    Command::cargo_bin("ev-manager-cli")
        .unwrap()
        .args(["--everest-dir", everest_dir.path().to_str().unwrap(), "--validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Config file valid"));
}

#[test]
fn validate_rejects_a_fulfillment_pointing_at_a_missing_module() {
    let deployment = r#"{
        "charger": {
            "module": "evse_module",
            "connections": { "phantom": [{ "module_id": "ghost", "implementation_id": "main" }] }
        }
    }"#;
    let everest_dir = everest_dir_with(manifest_requiring_phantom(), interface(), deployment);

    Command::cargo_bin("ev-manager-cli")
        .unwrap()
        .args(["--everest-dir", everest_dir.path().to_str().unwrap(), "--validate"])
        .assert()
        .failure();
}

#[test]
fn rejects_a_nonexistent_everest_dir() {
    Command::cargo_bin("ev-manager-cli")
        .unwrap()
        .args(["--everest-dir", "/no/such/directory", "--validate"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}
