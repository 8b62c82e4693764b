//! crates/ce_pipeline/src/aggregate.rs
//! Roll child regions up into synthetic parents.
//!
//! Children are grouped by the `group_by` field. Each aggregation operation
//! is evaluated on every child of a group and the parent receives the mean
//! over the children that produced a number. Parents replace the children
//! for all later steps and keep first-appearance order.

use ce_algo::expr::{eval, ExprError};
use ce_algo::ops::Operation;
use ce_core::rounding::round_to;
use ce_core::{CrossRegionDataset, EngineConfig, RegionCode, RegionContext, Value};
use indexmap::IndexMap;

use crate::context_build::{derive_township_inputs, CURRENT_REGION_VAR, WEIGHT_PREFIX};
use crate::evaluate::OpError;
use crate::plan::{AggregationSpec, Derive, OperationPlan, StepPlan};

pub const PARENT_NAME_VAR: &str = "_parentName";
pub const FIRST_CHILD_VAR: &str = "_firstChildCode";

/// Text key a child is grouped under; `None` when absent or blank.
fn group_key(ctx: &RegionContext, field: &str) -> Option<String> {
    let key = match ctx.get(field)? {
        Value::Text(s) => s.trim().to_string(),
        Value::Number(n) if n.is_finite() => n.to_string(),
        Value::Number(_) => return None,
    };
    (!key.is_empty()).then_some(key)
}

/// The child's value for `op`; `None` counts as null and is left out of the mean.
fn child_value(op: &OperationPlan, child: &RegionContext) -> Result<Option<f64>, ExprError> {
    let Operation::Expression(expr) = &op.op else {
        // rejected when the plan was compiled
        return Ok(None);
    };
    match eval(expr, child) {
        Ok(v) => Ok(v.as_number()),
        Err(ExprError::UnknownVariable(name)) => {
            tracing::trace!(region = %child.region(), var = %name, "child lacks aggregation input");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Mean over non-null child values, `0.0` when every child is null.
pub fn mean_of_present(values: &[Option<f64>]) -> f64 {
    let present: Vec<f64> = values.iter().flatten().copied().collect();
    if present.is_empty() {
        0.0
    } else {
        present.iter().sum::<f64>() / present.len() as f64
    }
}

fn prepared_child(ctx: &RegionContext, spec: &AggregationSpec, scale: u32) -> RegionContext {
    let mut child = ctx.clone();
    match spec.derive {
        Some(Derive::CommunityTownship) => {
            for (name, value) in derive_township_inputs(ctx, scale) {
                child.insert(name, value);
            }
        }
        None => {}
    }
    child
}

/// Parents for `dataset`, one per distinct `group_by` key.
pub fn aggregate(
    step: &StepPlan,
    spec: &AggregationSpec,
    dataset: &CrossRegionDataset,
    cfg: &EngineConfig,
) -> Result<CrossRegionDataset, OpError> {
    let scale = cfg.rounding_scale;
    let mut groups: IndexMap<String, Vec<RegionContext>> = IndexMap::new();
    let mut skipped = 0usize;
    for ctx in dataset.contexts() {
        match group_key(ctx, &spec.group_by) {
            Some(key) => groups.entry(key).or_default().push(prepared_child(ctx, spec, scale)),
            None => {
                skipped += 1;
                tracing::warn!(region = %ctx.region(), field = %spec.group_by, "no parent key; child skipped");
            }
        }
    }

    let mut parents = CrossRegionDataset::new();
    for (key, children) in &groups {
        let Some(first) = children.first() else { continue };
        let code = RegionCode::parent(&spec.parent_prefix, key).map_err(|e| OpError {
            operation: step.code.to_string(),
            region: first.region().to_string(),
            source: e.into(),
        })?;

        let mut parent = RegionContext::new(code.clone());
        parent.insert(spec.group_by.clone(), key.as_str());
        parent.insert(CURRENT_REGION_VAR, code.as_str());
        for (name, value) in first.iter().filter(|(n, _)| n.starts_with(WEIGHT_PREFIX)) {
            parent.insert(name, value.clone());
        }

        parent.begin_step();
        parent.write_output(PARENT_NAME_VAR, Value::from(key.as_str())).map_err(|e| OpError {
            operation: PARENT_NAME_VAR.to_string(),
            region: code.to_string(),
            source: e.into(),
        })?;
        parent
            .write_output(FIRST_CHILD_VAR, Value::from(first.region().as_str()))
            .map_err(|e| OpError { operation: FIRST_CHILD_VAR.to_string(), region: code.to_string(), source: e.into() })?;

        for op in &step.value_ops {
            let mut values = Vec::with_capacity(children.len());
            for child in children {
                values.push(child_value(op, child).map_err(|e| OpError::new(&op.output, child, e))?);
            }
            let mean = round_to(mean_of_present(&values), scale);
            tracing::debug!(parent = %code, output = %op.output, children = children.len(),
                present = values.iter().flatten().count(), mean, "aggregated");
            parent.write_output(op.output.as_str(), Value::Number(mean)).map_err(|e| OpError {
                operation: op.output.to_string(),
                region: code.to_string(),
                source: e.into(),
            })?;
        }
        parents.insert(parent);
    }

    tracing::info!(children = dataset.len(), parents = parents.len(), skipped, "aggregation complete");
    Ok(parents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::StepKind;
    use proptest::prelude::*;

    fn spec() -> AggregationSpec {
        AggregationSpec { group_by: "town".into(), parent_prefix: "TOWNSHIP_".into(), derive: None }
    }

    fn step(ops: &[(&str, &str)]) -> StepPlan {
        StepPlan {
            code: "agg".parse().unwrap(),
            name: "roll-up".into(),
            order: 1,
            kind: StepKind::Aggregation(spec()),
            value_ops: ops
                .iter()
                .map(|(o, src)| OperationPlan {
                    output: o.parse().unwrap(),
                    label: o.to_string(),
                    op: Operation::parse(src).unwrap(),
                })
                .collect(),
            rank_ops: vec![],
        }
    }

    fn child(code: &str, town: Option<&str>, vals: &[(&str, f64)]) -> RegionContext {
        let mut c = RegionContext::new(code.parse::<RegionCode>().unwrap());
        if let Some(t) = town {
            c.insert("town", t);
        }
        c.insert("weight_A", 0.5);
        for (k, v) in vals {
            c.insert(*k, *v);
        }
        c
    }

    #[test]
    fn parents_take_means_over_present_children() {
        let ds: CrossRegionDataset = [
            child("C1", Some("青山镇"), &[("x", 1.0), ("y", 10.0)]),
            child("C2", Some("白水镇"), &[("x", 5.0)]),
            child("C3", Some("青山镇"), &[("x", 2.0)]),
            child("C4", None, &[("x", 100.0)]),
        ]
        .into_iter()
        .collect();
        let out = aggregate(&step(&[("X", "x"), ("Y", "y * 2")]), &spec(), &ds, &EngineConfig::default()).unwrap();

        let codes: Vec<&str> = out.codes().map(|c| c.as_str()).collect();
        assert_eq!(codes, vec!["TOWNSHIP_青山镇", "TOWNSHIP_白水镇"]);

        let q = out.get(&"TOWNSHIP_青山镇".parse().unwrap()).unwrap();
        assert_eq!(q.get_number("X"), Some(1.5));
        // only C1 has y
        assert_eq!(q.get_number("Y"), Some(20.0));
        assert_eq!(q.get_text(PARENT_NAME_VAR), Some("青山镇"));
        assert_eq!(q.get_text(FIRST_CHILD_VAR), Some("C1"));
        assert_eq!(q.get_text("town"), Some("青山镇"));
        assert_eq!(q.get_number("weight_A"), Some(0.5));

        let b = out.get(&"TOWNSHIP_白水镇".parse().unwrap()).unwrap();
        assert_eq!(b.get_number("Y"), Some(0.0));
    }

    #[test]
    fn type_errors_abort_with_child_identity() {
        let mut c = child("C1", Some("t"), &[]);
        c.insert("label", "abc");
        let ds: CrossRegionDataset = [c].into_iter().collect();
        let err = aggregate(&step(&[("X", "label * 2")]), &spec(), &ds, &EngineConfig::default()).unwrap_err();
        assert_eq!(err.region, "C1");
        assert_eq!(err.operation, "X");
    }

    proptest! {
        #[test]
        fn mean_matches_present_values(vals in proptest::collection::vec(proptest::option::of(-1e6f64..1e6), 0..20)) {
            let present: Vec<f64> = vals.iter().flatten().copied().collect();
            let m = mean_of_present(&vals);
            if present.is_empty() {
                prop_assert_eq!(m, 0.0);
            } else {
                let lo = present.iter().copied().fold(f64::INFINITY, f64::min);
                let hi = present.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                prop_assert!(m >= lo - 1e-6 && m <= hi + 1e-6);
                let expected = present.iter().sum::<f64>() / present.len() as f64;
                prop_assert!((m - expected).abs() < 1e-9);
            }
        }
    }
}
