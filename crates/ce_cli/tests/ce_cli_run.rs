//! Black-box tests for the `ce` binary.

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;

const TOPSIS_MODEL: &str = r#"{"name":"capability","model_id":"cap-v1","steps":[
    {"code":"s1","name":"topsis","order":1,"operations":[
        {"output":"cap","label":"综合能力","expression":"@TOPSIS:v"}]},
    {"code":"s2","name":"grade","order":2,"operations":[
        {"output":"grade","label":"等级","expression":"@GRADE:cap"}]}]}"#;

const RECORDS: &str = r#"{"kind":"raw","records":[
    {"regionCode":"X","v":2},{"regionCode":"Y","v":8},{"regionCode":"Z","v":5}]}"#;

const BROKEN_MODEL: &str = r#"{"name":"broken","steps":[{"code":"s1","name":"broken","order":1,"operations":[
    {"output":"p","expression":"z / z"},
    {"output":"n","expression":"-3"},
    {"output":"s","expression":"@TOPSIS_SCORE:p,n"}]}]}"#;

fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
    let p = dir.join(name);
    fs::write(&p, body).unwrap();
    p
}

fn ce(model: &Path, records: &Path, out: &Path) -> Command {
    let mut cmd = Command::cargo_bin("ce").unwrap();
    cmd.env_remove("RUST_LOG")
        .arg("--model")
        .arg(model)
        .arg("--records")
        .arg(records)
        .arg("--out")
        .arg(out)
        .arg("--quiet");
    cmd
}

fn read_json(p: &Path) -> Value {
    serde_json::from_slice(&fs::read(p).unwrap()).unwrap()
}

#[test]
fn run_writes_three_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let model = write(dir.path(), "model.json", TOPSIS_MODEL);
    let records = write(dir.path(), "records.json", RECORDS);
    let out = dir.path().join("out");

    ce(&model, &records, &out).assert().success();

    let result = read_json(&out.join("result.json"));
    assert_eq!(result["model"], "capability");
    assert_eq!(result["model_id"], "cap-v1");
    let labels: Vec<&str> = result["columns"].as_array().unwrap().iter().map(|c| c["label"].as_str().unwrap()).collect();
    assert!(labels.contains(&"综合能力"));
    assert!(labels.contains(&"等级"));
    let rows = result["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0]["region_code"], "X");
    assert_eq!(rows[0]["values"]["cap"], 0.0);
    assert_eq!(rows[1]["values"]["cap"], 1.0);

    let validation = read_json(&out.join("validation.json"));
    let steps = validation["steps"].as_array().unwrap();
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0]["code"], "s1");
    assert_eq!(steps[0]["validation"]["valid"], true);

    let record = read_json(&out.join("run_record.json"));
    assert!(record["id"].as_str().unwrap().starts_with("RUN:"));
    assert_eq!(record["summary"]["regions"], 3);
    assert_eq!(record["outputs"]["result.json"].as_str().unwrap().len(), 64);
    assert_eq!(record["outputs"]["validation.json"].as_str().unwrap().len(), 64);
}

#[test]
fn repeated_runs_are_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let model = write(dir.path(), "model.json", TOPSIS_MODEL);
    let records = write(dir.path(), "records.json", RECORDS);
    let a = dir.path().join("a");
    let b = dir.path().join("b");

    ce(&model, &records, &a).assert().success();
    ce(&model, &records, &b).arg("--sequential").assert().success();

    assert_eq!(fs::read(a.join("result.json")).unwrap(), fs::read(b.join("result.json")).unwrap());
    assert_eq!(fs::read(a.join("validation.json")).unwrap(), fs::read(b.join("validation.json")).unwrap());
}

#[test]
fn strict_fails_on_anomalies_unless_repaired() {
    let dir = tempfile::tempdir().unwrap();
    let model = write(dir.path(), "model.json", BROKEN_MODEL);
    let records = write(dir.path(), "records.json", r#"{"kind":"raw","records":[{"regionCode":"R","z":0}]}"#);
    let out = dir.path().join("out");

    // anomalies alone are not fatal
    ce(&model, &records, &out).assert().success();
    ce(&model, &records, &out).arg("--strict").assert().code(3);
    assert!(out.join("result.json").exists());

    ce(&model, &records, &out).args(["--strict", "--repair"]).assert().success();
    let result = read_json(&out.join("result.json"));
    assert_eq!(result["rows"][0]["values"]["s"], 1.0);
    let validation = read_json(&out.join("validation.json"));
    assert_eq!(validation["steps"][0]["repair"]["repaired_regions"], 1);
}

#[test]
fn validate_only_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let model = write(dir.path(), "model.json", TOPSIS_MODEL);
    let records = write(dir.path(), "records.json", RECORDS);
    let out = dir.path().join("out");

    ce(&model, &records, &out).arg("--validate-only").assert().success();
    assert!(!out.exists());
}

#[test]
fn rejected_model_exits_2() {
    let dir = tempfile::tempdir().unwrap();
    let model = write(
        dir.path(),
        "model.json",
        r#"{"name":"bad","steps":[{"code":"s1","name":"x","order":1,"operations":[
            {"output":"y","expression":"@BOGUS:v"}]}]}"#,
    );
    let records = write(dir.path(), "records.json", RECORDS);
    ce(&model, &records, dir.path()).assert().code(2).stderr(predicate::str::contains("Op.MarkerUnknown"));
}

#[test]
fn evaluation_failure_exits_5_with_identity() {
    let dir = tempfile::tempdir().unwrap();
    let model = write(
        dir.path(),
        "model.json",
        r#"{"name":"eval","steps":[{"code":"s1","name":"needs w","order":1,"operations":[
            {"output":"y","expression":"w * 2"}]}]}"#,
    );
    let records = write(dir.path(), "records.json", RECORDS);
    ce(&model, &records, dir.path())
        .assert()
        .code(5)
        .stderr(predicate::str::contains("step s1").and(predicate::str::contains("region X")));
}

#[test]
fn url_and_missing_paths_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let records = write(dir.path(), "records.json", RECORDS);

    ce(Path::new("https://example.org/model.json"), &records, dir.path())
        .assert()
        .code(2)
        .stderr(predicate::str::contains("no scheme"));
    ce(&dir.path().join("missing.json"), &records, dir.path())
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--model"));
}

#[test]
fn malformed_json_exits_2() {
    let dir = tempfile::tempdir().unwrap();
    let model = write(dir.path(), "model.json", "{ not json");
    let records = write(dir.path(), "records.json", RECORDS);
    ce(&model, &records, dir.path()).assert().code(2);
}
