//! crates/ce_io/src/model.rs
//! Model file wire types.
//!
//! Shape only; semantic checks (duplicate order, marker syntax, identifier
//! rules, weight domain) happen when the pipeline compiles a plan, so every
//! problem in a model is reported together with a stable issue code.

use std::collections::BTreeMap;

use ce_core::EngineConfig;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelDoc {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    pub steps: Vec<StepDoc>,
    /// Indicator code → weight in [0,1], exposed as `weight_<code>`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub weights: BTreeMap<String, f64>,
    /// Indicator codes whose `weight_<code>` variable always exists (0.0 when unweighted).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indicators: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<EngineConfig>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKindDoc {
    #[default]
    Value,
    Aggregation,
}

/// Optional input derivation applied to children before an aggregation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeriveDoc {
    /// Per-capita township indicators from community capacity fields.
    CommunityTownship,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepDoc {
    pub code: String,
    pub name: String,
    /// Execution order; steps run ascending.
    pub order: i64,
    #[serde(default)]
    pub kind: StepKindDoc,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derive: Option<DeriveDoc>,
    pub operations: Vec<OperationDoc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OperationDoc {
    pub output: String,
    /// Human-readable column label; defaults to the output name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Formula source or `@MARKER:params`.
    pub expression: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_model_parses_with_defaults() {
        let m: ModelDoc = serde_json::from_str(
            r#"{
                "name": "capability",
                "steps": [
                    { "code": "s1", "name": "norm", "order": 1,
                      "operations": [ { "output": "n", "expression": "@NORMALIZE:x" } ] }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(m.steps[0].kind, StepKindDoc::Value);
        assert!(m.weights.is_empty());
        assert!(m.engine.is_none());
        assert_eq!(m.steps[0].operations[0].label, None);
    }

    #[test]
    fn aggregation_step_and_engine_override() {
        let m: ModelDoc = serde_json::from_str(
            r#"{
                "name": "t",
                "engine": { "parallel": false },
                "steps": [
                    { "code": "agg", "name": "roll-up", "order": 1, "kind": "aggregation",
                      "group_by": "townshipName", "derive": "community_township",
                      "operations": [ { "output": "PLAN", "expression": "PLAN_CONSTRUCTION" } ] }
                ]
            }"#,
        )
        .unwrap();
        let s = &m.steps[0];
        assert_eq!(s.kind, StepKindDoc::Aggregation);
        assert_eq!(s.derive, Some(DeriveDoc::CommunityTownship));
        assert_eq!(m.engine.map(|e| e.parallel), Some(false));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let r: Result<ModelDoc, _> =
            serde_json::from_str(r#"{"name":"t","steps":[],"colour":"red"}"#);
        assert!(r.is_err());
    }
}
