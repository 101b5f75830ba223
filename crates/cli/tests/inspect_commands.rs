mod common;

use predicates::prelude::*;
use serde_json::Value;
use tempfile::tempdir;

use common::{write_snapshot, X64_SNAPSHOT};

#[test]
fn list_functions_shows_state_and_name() {
    let dir = tempdir().expect("tempdir");
    let snapshot = write_snapshot(dir.path(), "target.json", X64_SNAPSHOT);

    assert_cmd::cargo::cargo_bin_cmd!("jitlens")
        .arg("list-functions")
        .arg("--snapshot")
        .arg(&snapshot)
        .assert()
        .success()
        .stdout(predicate::str::contains("Functions (3):"))
        .stdout(predicate::str::contains("App.Program.Main()"))
        .stdout(predicate::str::contains("pinvoke"));
}

#[test]
fn list_functions_json() {
    let dir = tempdir().expect("tempdir");
    let snapshot = write_snapshot(dir.path(), "target.json", X64_SNAPSHOT);

    let output = assert_cmd::cargo::cargo_bin_cmd!("jitlens")
        .arg("list-functions")
        .arg("--snapshot")
        .arg(&snapshot)
        .arg("--json")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let rows: Value = serde_json::from_slice(&output).expect("valid JSON");
    let rows = rows.as_array().expect("array");
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0]["native_code"], "0x100000");
    assert_eq!(rows[0]["state"], "jitted");
    assert_eq!(rows[2]["state"], "pinvoke");
}

#[test]
fn stub_templates_for_x64_list_every_kind() {
    assert_cmd::cargo::cargo_bin_cmd!("jitlens")
        .arg("stub-templates")
        .arg("--arch")
        .arg("x64")
        .arg("--runtime-version")
        .arg("8.0.1")
        .assert()
        .success()
        .stdout(predicate::str::contains("stub page 0x4000"))
        .stdout(predicate::str::contains("call_counting"))
        .stdout(predicate::str::contains("stub_precode"))
        .stdout(predicate::str::contains("fixup_precode"));
}

#[test]
fn stub_templates_note_old_runtimes() {
    assert_cmd::cargo::cargo_bin_cmd!("jitlens")
        .arg("stub-templates")
        .arg("--arch")
        .arg("arm64")
        .arg("--runtime-version")
        .arg("6.0.25")
        .assert()
        .success()
        .stdout(predicate::str::contains("predates stub reuse"));
}

#[test]
fn stub_templates_json_is_an_array() {
    let output = assert_cmd::cargo::cargo_bin_cmd!("jitlens")
        .arg("stub-templates")
        .arg("--arch")
        .arg("arm64")
        .arg("--runtime-version")
        .arg("7.0")
        .arg("--json")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let templates: Value = serde_json::from_slice(&output).expect("valid JSON");
    let templates = templates.as_array().expect("array");
    assert_eq!(templates.len(), 3);
    assert_eq!(templates[0]["page_stride"], 4096);
}

#[test]
fn stub_templates_reject_unknown_architecture() {
    assert_cmd::cargo::cargo_bin_cmd!("jitlens")
        .arg("stub-templates")
        .arg("--arch")
        .arg("mips")
        .arg("--runtime-version")
        .arg("8.0")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unsupported architecture: mips"));
}
