//! Load inputs from disk, check digests are key-order independent, and that
//! canonical artifacts read back as the same JSON.

use std::fs;

use assert_json_diff::assert_json_eq;
use ce_io::canonical_json::write_canonical_file;
use ce_io::loader::load_inputs;
use ce_io::model::StepKindDoc;
use ce_io::records::RecordSet;
use serde_json::json;

const MODEL: &str = r#"{
  "name": "township capability",
  "indicators": ["MGMT", "RISK"],
  "weights": {"MGMT": 0.6},
  "steps": [
    {"code": "s1", "name": "normalize", "order": 1, "operations": [
      {"output": "staff_norm", "label": "管理人员(归一)", "expression": "@NORMALIZE:managementStaff"}
    ]}
  ]
}"#;

const MODEL_REORDERED: &str = r#"{
  "steps": [
    {"operations": [
      {"expression": "@NORMALIZE:managementStaff", "label": "管理人员(归一)", "output": "staff_norm"}
    ], "order": 1, "name": "normalize", "code": "s1"}
  ],
  "weights": {"MGMT": 0.6},
  "indicators": ["MGMT", "RISK"],
  "name": "township capability"
}"#;

const RECORDS: &str = r#"{"kind":"survey","records":[
  {"regionCode":"R1","township":"青山镇","managementStaff":3,"riskAssessment":"低"},
  {"regionCode":"R2","township":"白水镇","managementStaff":4,"riskAssessment":"否"}
]}"#;

#[test]
fn loads_and_digests_inputs() {
    let dir = tempfile::tempdir().unwrap();
    let m1 = dir.path().join("m1.json");
    let m2 = dir.path().join("m2.json");
    let r = dir.path().join("records.json");
    let w = dir.path().join("weights.json");
    fs::write(&m1, MODEL).unwrap();
    fs::write(&m2, MODEL_REORDERED).unwrap();
    fs::write(&r, RECORDS).unwrap();
    fs::write(&w, r#"{"weights":{"MGMT":0.7,"RISK":0.3}}"#).unwrap();

    let a = load_inputs(&m1, &r, Some(&w)).unwrap();
    let b = load_inputs(&m2, &r, None).unwrap();

    assert_eq!(a.model.steps[0].kind, StepKindDoc::Value);
    assert!(matches!(a.records, RecordSet::Survey(ref v) if v.len() == 2));
    assert_eq!(a.digests.model_sha256, b.digests.model_sha256);
    assert_eq!(a.digests.model_sha256.len(), 64);
    assert!(a.digests.weights_sha256.is_some());
    assert!(b.digests.weights_sha256.is_none());
}

#[test]
fn canonical_artifact_reads_back() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("result.json");
    let value = json!({
        "regions": [{"regionCode": "R1", "score": 0.6}, {"regionCode": "R2", "score": 0.8}],
        "columns": {"score": "综合得分"}
    });
    write_canonical_file(&out, &value).unwrap();
    let back: serde_json::Value = serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
    assert_json_eq!(back, value);
}
