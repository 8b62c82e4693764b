//! crates/ce_pipeline/src/build_result.rs
//! Final result table: one row per region, one labelled column per output.

use std::collections::BTreeMap;

use ce_core::Value;
use indexmap::IndexMap;
use serde::Serialize;

use crate::aggregate::PARENT_NAME_VAR;

/// Region name fields, checked in order.
const NAME_FIELDS: &[&str] = &[PARENT_NAME_VAR, "communityName", "townshipName", "township"];

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Column {
    pub key: String,
    pub label: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResultRow {
    pub region_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region_name: Option<String>,
    pub values: BTreeMap<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResultTable {
    pub columns: Vec<Column>,
    pub rows: Vec<ResultRow>,
}

/// Table over `outputs` (region → output values, in region order).
///
/// Column order follows `labels` (output, label) and then any remaining keys
/// alphabetically. Keys starting with `_` are internal and never become
/// columns. A column appears only when some region has a value for it.
pub fn result_table(
    outputs: &IndexMap<String, BTreeMap<String, Value>>,
    labels: &[(String, String)],
    names: &IndexMap<String, String>,
) -> ResultTable {
    let visible = |k: &str| !k.starts_with('_');
    let present = |k: &str| outputs.values().any(|m| m.contains_key(k));

    let mut columns: Vec<Column> = labels
        .iter()
        .filter(|(k, _)| visible(k.as_str()) && present(k.as_str()))
        .map(|(k, l)| Column { key: k.clone(), label: l.clone() })
        .collect();
    let mut extra: Vec<&String> = outputs
        .values()
        .flat_map(|m| m.keys())
        .filter(|k| visible(k.as_str()) && !columns.iter().any(|c| &c.key == *k))
        .collect();
    extra.sort();
    extra.dedup();
    columns.extend(extra.into_iter().map(|k| Column { key: k.clone(), label: k.clone() }));

    let rows = outputs
        .iter()
        .map(|(code, m)| ResultRow {
            region_code: code.clone(),
            region_name: names.get(code).cloned(),
            values: m.iter().filter(|(k, _)| visible(k.as_str())).map(|(k, v)| (k.clone(), v.clone())).collect(),
        })
        .collect();

    ResultTable { columns, rows }
}

/// Display name from a context's name fields, if any.
pub fn region_name(ctx: &ce_core::RegionContext) -> Option<String> {
    NAME_FIELDS.iter().find_map(|f| ctx.get_text(f).filter(|s| !s.trim().is_empty()).map(str::to_string))
}
