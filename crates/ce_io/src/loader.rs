//! Loader: read local JSON inputs (model → records → optional weights),
//! parse them into wire types, and compute canonical input digests.
//! No network I/O; URL-like paths are rejected before touching the disk.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::model::ModelDoc;
use crate::records::RecordSet;
use crate::{looks_like_url_strict, try_sha256_canonical, IoError};

/// Upper bound on any single input file.
pub const MAX_INPUT_BYTES: u64 = 64 * 1024 * 1024;

// ----------------------------- Wire-facing types -----------------------------

/// Weights file: `{"weights": {code: w}}`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WeightsDoc {
    pub weights: BTreeMap<String, f64>,
}

/// SHA-256 (lowercase hex) of each input's canonical JSON.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputDigests {
    pub model_sha256: String,
    pub records_sha256: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weights_sha256: Option<String>,
}

/// Everything the pipeline needs, parsed and digested.
#[derive(Clone, Debug)]
pub struct LoadedInputs {
    pub model: ModelDoc,
    pub records: RecordSet,
    pub weights: Option<WeightsDoc>,
    pub digests: InputDigests,
}

// ----------------------------- Orchestration -----------------------------

pub fn load_inputs(
    model_path: &Path,
    records_path: &Path,
    weights_path: Option<&Path>,
) -> Result<LoadedInputs, IoError> {
    let model = load_model(model_path)?;
    let records = load_records(records_path)?;
    let weights = weights_path.map(load_weights).transpose()?;

    let digests = InputDigests {
        model_sha256: try_sha256_canonical(&model)?,
        records_sha256: try_sha256_canonical(&records)?,
        weights_sha256: weights.as_ref().map(try_sha256_canonical).transpose()?,
    };

    Ok(LoadedInputs { model, records, weights, digests })
}

// ----------------------------- Targeted loaders -----------------------------

pub fn load_model(path: &Path) -> Result<ModelDoc, IoError> {
    read_typed(path)
}

pub fn load_records(path: &Path) -> Result<RecordSet, IoError> {
    let set: RecordSet = read_typed(path)?;
    for r in set.records() {
        if r.region_code().trim().is_empty() {
            return Err(IoError::Invalid(format!("{}: record with empty regionCode", path.display())));
        }
    }
    Ok(set)
}

pub fn load_weights(path: &Path) -> Result<WeightsDoc, IoError> {
    read_typed(path)
}

// ----------------------------- Helpers -----------------------------

fn read_typed<T: DeserializeOwned>(path: &Path) -> Result<T, IoError> {
    let text = read_text_with_limits(path)?;
    serde_json::from_str(&text).map_err(|e| IoError::Json {
        pointer: format!("{}:{}:{}", path.display(), e.line(), e.column()),
        msg: e.to_string(),
    })
}

/// Read a local UTF-8 file, rejecting URLs and anything over `MAX_INPUT_BYTES`.
pub fn read_text_with_limits(path: &Path) -> Result<String, IoError> {
    let shown = path.to_string_lossy();
    if looks_like_url_strict(&shown) {
        return Err(IoError::Invalid(format!("only local paths are accepted: {shown}")));
    }
    let f = File::open(path).map_err(|e| IoError::Path(format!("{shown}: {e}")))?;
    let len = f.metadata()?.len();
    if len > MAX_INPUT_BYTES {
        return Err(IoError::Invalid(format!("{shown}: {len} bytes exceeds limit {MAX_INPUT_BYTES}")));
    }
    let mut s = String::with_capacity(len as usize);
    f.take(MAX_INPUT_BYTES + 1).read_to_string(&mut s)?;
    // UTF-8 BOM from spreadsheet exports
    Ok(s.strip_prefix('\u{feff}').map(str::to_string).unwrap_or(s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
        let p = dir.join(name);
        let mut f = File::create(&p).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        p
    }

    #[test]
    fn rejects_urls() {
        let err = read_text_with_limits(Path::new("https://example.org/model.json")).unwrap_err();
        assert!(matches!(err, IoError::Invalid(_)));
    }

    #[test]
    fn strips_bom_and_reports_json_location() {
        let dir = tempfile::tempdir().unwrap();
        let ok = write(dir.path(), "w.json", "\u{feff}{\"weights\":{\"A\":0.5}}");
        assert_eq!(load_weights(&ok).unwrap().weights["A"], 0.5);

        let bad = write(dir.path(), "bad.json", "{\"weights\":");
        match load_weights(&bad).unwrap_err() {
            IoError::Json { pointer, .. } => assert!(pointer.contains("bad.json")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn empty_region_code_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let p = write(dir.path(), "r.json", r#"{"kind":"raw","records":[{"regionCode":"  ","x":1}]}"#);
        assert!(matches!(load_records(&p), Err(IoError::Invalid(_))));
    }
}
