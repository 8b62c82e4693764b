//! crates/ce_pipeline/src/plan.rs
//! Compile a model document into an executable plan.
//!
//! Every structural and syntactic problem is collected into one `PlanReport`
//! (stable codes, stably sorted) before any region is touched. A report with
//! at least one `Severity::Error` rejects the model.

use std::collections::{BTreeMap, BTreeSet};

use ce_algo::ops::{OpParseError, Operation};
use ce_core::{EngineConfig, OutputName, StepCode};
use ce_io::loader::WeightsDoc;
use ce_io::model::{DeriveDoc, ModelDoc, StepDoc, StepKindDoc};
use serde::Serialize;

/// Parent code prefix used when an aggregation step does not name one.
pub const DEFAULT_PARENT_PREFIX: &str = "TOWNSHIP_";

// ------------------------------- Plan types -------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Derive {
    CommunityTownship,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AggregationSpec {
    pub group_by: String,
    pub parent_prefix: String,
    pub derive: Option<Derive>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum StepKind {
    Value,
    Aggregation(AggregationSpec),
}

#[derive(Clone, Debug, PartialEq)]
pub struct OperationPlan {
    pub output: OutputName,
    /// Column label; the output name when none was configured.
    pub label: String,
    pub op: Operation,
}

impl OperationPlan {
    /// Every variable this operation writes, in write order.
    pub fn written_names(&self) -> Vec<OutputName> {
        match self.op {
            Operation::Topsis { .. } => vec![
                self.output.with_suffix("_positive"),
                self.output.with_suffix("_negative"),
                self.output.clone(),
            ],
            _ => vec![self.output.clone()],
        }
    }

    /// `(name, label)` for every written variable.
    pub fn columns(&self) -> Vec<(String, String)> {
        match self.op {
            Operation::Topsis { .. } => vec![
                (format!("{}_positive", self.output), format!("{}(正理想距离)", self.label)),
                (format!("{}_negative", self.output), format!("{}(负理想距离)", self.label)),
                (self.output.to_string(), self.label.clone()),
            ],
            _ => vec![(self.output.to_string(), self.label.clone())],
        }
    }
}

/// Positive distance, negative distance and composite written by one TOPSIS result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TopsisTriple {
    pub positive: String,
    pub negative: String,
    pub score: String,
}

/// Every TOPSIS-derived field a step writes: full triples, plus distances
/// written by `@TOPSIS_POSITIVE` / `@TOPSIS_NEGATIVE` that no composite in
/// the same step consumes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TopsisFields {
    pub triples: Vec<TopsisTriple>,
    pub distances: Vec<String>,
}

impl TopsisFields {
    pub fn is_empty(&self) -> bool {
        self.triples.is_empty() && self.distances.is_empty()
    }
}

impl From<Vec<TopsisTriple>> for TopsisFields {
    fn from(triples: Vec<TopsisTriple>) -> Self {
        TopsisFields { triples, distances: Vec::new() }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct StepPlan {
    pub code: StepCode,
    pub name: String,
    pub order: i64,
    pub kind: StepKind,
    /// Everything except GRADE, in configured order.
    pub value_ops: Vec<OperationPlan>,
    /// GRADE operations; run after the VALUE barrier.
    pub rank_ops: Vec<OperationPlan>,
}

impl StepPlan {
    pub fn operations(&self) -> impl Iterator<Item = &OperationPlan> {
        self.value_ops.iter().chain(self.rank_ops.iter())
    }

    pub fn output_names(&self) -> Vec<OutputName> {
        self.operations().flat_map(OperationPlan::written_names).collect()
    }

    /// TOPSIS results this step produces, for the result validator.
    pub fn topsis_triples(&self) -> Vec<TopsisTriple> {
        self.value_ops
            .iter()
            .filter_map(|o| match &o.op {
                Operation::Topsis { .. } => Some(TopsisTriple {
                    positive: format!("{}_positive", o.output),
                    negative: format!("{}_negative", o.output),
                    score: o.output.to_string(),
                }),
                Operation::TopsisScore { positive, negative } => Some(TopsisTriple {
                    positive: positive.clone(),
                    negative: negative.clone(),
                    score: o.output.to_string(),
                }),
                _ => None,
            })
            .collect()
    }

    /// Triples plus standalone distance outputs, for the result validator.
    pub fn topsis_fields(&self) -> TopsisFields {
        let triples = self.topsis_triples();
        let distances = self
            .value_ops
            .iter()
            .filter(|o| matches!(o.op, Operation::TopsisPositive { .. } | Operation::TopsisNegative { .. }))
            .map(|o| o.output.to_string())
            .filter(|name| !triples.iter().any(|t| &t.positive == name || &t.negative == name))
            .collect();
        TopsisFields { triples, distances }
    }

    pub fn kind_label(&self) -> &'static str {
        match self.kind {
            StepKind::Value => "value",
            StepKind::Aggregation(_) => "aggregation",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ModelPlan {
    pub name: String,
    pub model_id: Option<String>,
    /// Ascending by `order`.
    pub steps: Vec<StepPlan>,
    /// Model weights merged with the weights file (file entries win).
    pub weights: BTreeMap<String, f64>,
    pub indicators: Vec<String>,
    pub engine: EngineConfig,
}

impl ModelPlan {
    /// `(output, label)` over all steps in execution order. A name written by
    /// several steps keeps its first position and its latest label.
    pub fn columns(&self) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = Vec::new();
        for (name, label) in self.steps.iter().flat_map(|s| s.operations()).flat_map(OperationPlan::columns) {
            match out.iter_mut().find(|(n, _)| *n == name) {
                Some(slot) => slot.1 = label,
                None => out.push((name, label)),
            }
        }
        out
    }
}

// ------------------------------- Issues -------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

/// Where in the model a problem was found.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(tag = "at", content = "id", rename_all = "snake_case")]
pub enum EntityRef {
    Model,
    Engine,
    Weight(String),
    Step(String),
    Operation(String, String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub code: &'static str,
    pub message: String,
    #[serde(rename = "where")]
    pub where_: EntityRef,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PlanReport {
    pub pass: bool,
    pub issues: Vec<ValidationIssue>,
}

impl PlanReport {
    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }
}

/// Rejected model: the full report, errors first after stable sorting.
#[derive(Clone, Debug, PartialEq)]
pub struct PlanError(pub PlanReport);

impl core::fmt::Display for PlanError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let errors: Vec<&ValidationIssue> = self.0.errors().collect();
        write!(f, "model rejected with {} error(s)", errors.len())?;
        for i in errors {
            write!(f, "; {} at {:?}: {}", i.code, i.where_, i.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for PlanError {}

fn issue(severity: Severity, code: &'static str, message: String, where_: EntityRef) -> ValidationIssue {
    ValidationIssue { severity, code, message, where_ }
}

// ------------------------------- Compilation -------------------------------

/// Compile `doc`, overlaying `weights` on the model's own weights.
///
/// Warnings are logged; only errors reject the plan.
pub fn compile(doc: &ModelDoc, weights: Option<&WeightsDoc>) -> Result<ModelPlan, PlanError> {
    let mut issues = Vec::new();

    if doc.steps.is_empty() {
        issues.push(issue(Severity::Error, "Model.NoSteps", "model has no steps".into(), EntityRef::Model));
    }

    let engine = doc.engine.unwrap_or_default();
    if let Err(e) = engine.validate() {
        issues.push(issue(Severity::Error, "Engine.OutOfRange", e.to_string(), EntityRef::Engine));
    }

    let mut merged = doc.weights.clone();
    if let Some(w) = weights {
        merged.extend(w.weights.iter().map(|(k, v)| (k.clone(), *v)));
    }
    issues.extend(check_weights(&merged));

    let mut seen_orders = BTreeMap::<i64, &str>::new();
    let mut steps = Vec::with_capacity(doc.steps.len());
    for s in &doc.steps {
        if let Some(prev) = seen_orders.insert(s.order, &s.code) {
            issues.push(issue(
                Severity::Error,
                "Step.OrderDuplicate",
                format!("order {} already used by step {prev}", s.order),
                EntityRef::Step(s.code.clone()),
            ));
        }
        if let Some(step) = compile_step(s, &mut issues) {
            steps.push(step);
        }
    }
    steps.sort_by_key(|s| s.order);

    sort_issues_stably(&mut issues);
    for i in issues.iter().filter(|i| i.severity == Severity::Warning) {
        tracing::warn!(code = i.code, at = ?i.where_, "{}", i.message);
    }
    let pass = !issues.iter().any(|i| i.severity == Severity::Error);
    if !pass {
        return Err(PlanError(PlanReport { pass, issues }));
    }

    tracing::debug!(model = %doc.name, steps = steps.len(), weights = merged.len(), "plan compiled");
    Ok(ModelPlan {
        name: doc.name.clone(),
        model_id: doc.model_id.clone(),
        steps,
        weights: merged,
        indicators: doc.indicators.clone(),
        engine,
    })
}

fn check_weights(weights: &BTreeMap<String, f64>) -> Vec<ValidationIssue> {
    weights
        .iter()
        .filter(|(_, w)| !(0.0..=1.0).contains(*w))
        .map(|(code, w)| {
            issue(
                Severity::Error,
                "Weight.OutOfRange",
                format!("weight {w} outside [0,1]"),
                EntityRef::Weight(code.clone()),
            )
        })
        .collect()
}

fn compile_step(s: &StepDoc, issues: &mut Vec<ValidationIssue>) -> Option<StepPlan> {
    let at_step = || EntityRef::Step(s.code.clone());
    let code: Option<StepCode> = match s.code.parse() {
        Ok(c) => Some(c),
        Err(e) => {
            issues.push(issue(Severity::Error, "Step.CodeInvalid", e.to_string(), at_step()));
            None
        }
    };

    let kind = match s.kind {
        StepKindDoc::Value => {
            if s.group_by.is_some() || s.parent_prefix.is_some() || s.derive.is_some() {
                issues.push(issue(
                    Severity::Warning,
                    "Step.AggregationFieldsIgnored",
                    "group_by/parent_prefix/derive only apply to aggregation steps".into(),
                    at_step(),
                ));
            }
            StepKind::Value
        }
        StepKindDoc::Aggregation => {
            let group_by = s.group_by.as_deref().map(str::trim).unwrap_or_default();
            if group_by.is_empty() {
                issues.push(issue(
                    Severity::Error,
                    "Agg.GroupByMissing",
                    "aggregation step needs a group_by field".into(),
                    at_step(),
                ));
            }
            StepKind::Aggregation(AggregationSpec {
                group_by: group_by.to_string(),
                parent_prefix: s.parent_prefix.clone().unwrap_or_else(|| DEFAULT_PARENT_PREFIX.to_string()),
                derive: s.derive.map(|d| match d {
                    DeriveDoc::CommunityTownship => Derive::CommunityTownship,
                }),
            })
        }
    };

    if s.operations.is_empty() {
        issues.push(issue(Severity::Warning, "Step.NoOperations", "step has no operations".into(), at_step()));
    }

    let mut value_ops = Vec::new();
    let mut rank_ops = Vec::new();
    let mut written = BTreeSet::<String>::new();
    for o in &s.operations {
        let at_op = || EntityRef::Operation(s.code.clone(), o.output.clone());
        let out_name = o.output.trim();
        if out_name.is_empty() {
            issues.push(issue(Severity::Error, "Op.OutputEmpty", "operation has no output name".into(), at_op()));
            continue;
        }
        let output: OutputName = match out_name.parse() {
            Ok(n) => n,
            Err(e) => {
                issues.push(issue(Severity::Error, "Op.OutputInvalid", e.to_string(), at_op()));
                continue;
            }
        };
        let op = match Operation::parse(&o.expression) {
            Ok(op) => op,
            Err(e) => {
                issues.push(issue(Severity::Error, parse_error_code(&e), e.to_string(), at_op()));
                continue;
            }
        };
        if let StepKind::Aggregation(_) = kind {
            match op {
                Operation::Expression(_) => {}
                Operation::Grade { .. } => {
                    issues.push(issue(
                        Severity::Error,
                        "Agg.GradeNotAllowed",
                        "GRADE cannot run inside an aggregation step".into(),
                        at_op(),
                    ));
                    continue;
                }
                _ => {
                    issues.push(issue(
                        Severity::Error,
                        "Agg.MarkerNotAllowed",
                        format!("@{} cannot run inside an aggregation step", op.kind_label()),
                        at_op(),
                    ));
                    continue;
                }
            }
        }

        let plan = OperationPlan {
            label: o.label.clone().filter(|l| !l.trim().is_empty()).unwrap_or_else(|| output.to_string()),
            output,
            op,
        };
        for name in plan.written_names() {
            if !written.insert(name.to_string()) {
                issues.push(issue(
                    Severity::Error,
                    "Op.OutputDuplicate",
                    format!("{name} is written twice in this step"),
                    at_op(),
                ));
            }
        }
        if plan.op.is_rank() {
            rank_ops.push(plan);
        } else {
            value_ops.push(plan);
        }
    }

    Some(StepPlan { code: code?, name: s.name.clone(), order: s.order, kind, value_ops, rank_ops })
}

fn parse_error_code(e: &OpParseError) -> &'static str {
    match e {
        OpParseError::UnknownMarker(_) => "Op.MarkerUnknown",
        OpParseError::MissingOperand(_)
        | OpParseError::BadOperand { .. }
        | OpParseError::DuplicateOperand { .. }
        | OpParseError::WrongOperandCount { .. } => "Op.OperandInvalid",
        OpParseError::Expression(_) => "Op.ExprSyntax",
    }
}

// ------------------------------------------------------------------------------------------------
// Utilities
// ------------------------------------------------------------------------------------------------

/// Errors before warnings, then by code, location and message.
pub fn sort_issues_stably(issues: &mut [ValidationIssue]) {
    issues.sort_by(|a, b| {
        a.severity
            .cmp(&b.severity)
            .then_with(|| a.code.cmp(b.code))
            .then_with(|| a.where_.cmp(&b.where_))
            .then_with(|| a.message.cmp(&b.message))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(json: &str) -> ModelDoc {
        serde_json::from_str(json).unwrap()
    }

    fn codes(err: PlanError) -> Vec<&'static str> {
        err.0.issues.iter().map(|i| i.code).collect()
    }

    #[test]
    fn splits_value_and_rank_ops_and_sorts_steps() {
        let plan = compile(
            &doc(r#"{"name":"m","steps":[
                {"code":"s2","name":"grade","order":2,"operations":[
                    {"output":"g","expression":"@GRADE:cap"},
                    {"output":"cap","label":"综合能力","expression":"@TOPSIS:a,b"}]},
                {"code":"s1","name":"norm","order":1,"operations":[
                    {"output":"a","expression":"@NORMALIZE:x"},
                    {"output":"b","expression":"y * 2"}]}
            ]}"#),
            None,
        )
        .unwrap();
        assert_eq!(plan.steps[0].code.as_str(), "s1");
        let s2 = &plan.steps[1];
        assert_eq!(s2.value_ops.len(), 1);
        assert_eq!(s2.rank_ops.len(), 1);
        assert_eq!(
            s2.topsis_triples(),
            vec![TopsisTriple { positive: "cap_positive".into(), negative: "cap_negative".into(), score: "cap".into() }]
        );
        assert!(s2.topsis_fields().distances.is_empty());
        let cols = plan.columns();
        assert_eq!(cols[0], ("a".to_string(), "a".to_string()));
        assert!(cols.contains(&("cap".to_string(), "综合能力".to_string())));
        assert!(cols.contains(&("cap_positive".to_string(), "综合能力(正理想距离)".to_string())));
    }

    #[test]
    fn standalone_distances_are_validated_fields() {
        let plan = compile(
            &doc(r#"{"name":"m","steps":[
                {"code":"s1","name":"d","order":1,"operations":[
                    {"output":"dp","expression":"@TOPSIS_POSITIVE:a,b"},
                    {"output":"dn","expression":"@TOPSIS_NEGATIVE:a,b"}]},
                {"code":"s2","name":"all","order":2,"operations":[
                    {"output":"p2","expression":"@TOPSIS_POSITIVE:a"},
                    {"output":"n2","expression":"@TOPSIS_NEGATIVE:a"},
                    {"output":"s","expression":"@TOPSIS_SCORE:p2,n2"}]}
            ]}"#),
            None,
        )
        .unwrap();
        let f1 = plan.steps[0].topsis_fields();
        assert!(f1.triples.is_empty());
        assert_eq!(f1.distances, vec!["dp".to_string(), "dn".to_string()]);
        assert!(!f1.is_empty());

        // consumed by the composite in the same step
        let f2 = plan.steps[1].topsis_fields();
        assert_eq!(f2.triples.len(), 1);
        assert!(f2.distances.is_empty());
    }

    #[test]
    fn collects_every_problem_with_stable_codes() {
        let err = compile(
            &doc(r#"{"name":"m","weights":{"A":1.5},"steps":[
                {"code":"s1","name":"a","order":1,"operations":[
                    {"output":"","expression":"1"},
                    {"output":"x","expression":"@FOO:y"},
                    {"output":"y","expression":"1 +"},
                    {"output":"z","expression":"@NORMALIZE"},
                    {"output":"w","expression":"1"},
                    {"output":"w","expression":"2"}]},
                {"code":"s2","name":"b","order":1,"operations":[]}
            ]}"#),
            None,
        )
        .unwrap_err();
        let c = codes(err);
        for expected in [
            "Op.OutputEmpty",
            "Op.MarkerUnknown",
            "Op.ExprSyntax",
            "Op.OperandInvalid",
            "Op.OutputDuplicate",
            "Step.OrderDuplicate",
            "Weight.OutOfRange",
            "Step.NoOperations",
        ] {
            assert!(c.contains(&expected), "missing {expected} in {c:?}");
        }
        // errors sort ahead of warnings
        assert_eq!(*c.last().unwrap(), "Step.NoOperations");
    }

    #[test]
    fn topsis_suffixes_collide_with_plain_outputs() {
        let err = compile(
            &doc(r#"{"name":"m","steps":[{"code":"s","name":"s","order":1,"operations":[
                {"output":"cap_positive","expression":"1"},
                {"output":"cap","expression":"@TOPSIS:a"}]}]}"#),
            None,
        )
        .unwrap_err();
        assert_eq!(codes(err), vec!["Op.OutputDuplicate"]);
    }

    #[test]
    fn aggregation_rules() {
        let err = compile(
            &doc(r#"{"name":"m","steps":[{"code":"agg","name":"roll","order":1,"kind":"aggregation",
                "operations":[{"output":"g","expression":"@GRADE:x"},{"output":"n","expression":"@NORMALIZE:x"}]}]}"#),
            None,
        )
        .unwrap_err();
        let c = codes(err);
        assert!(c.contains(&"Agg.GroupByMissing"));
        assert!(c.contains(&"Agg.GradeNotAllowed"));
        assert!(c.contains(&"Agg.MarkerNotAllowed"));

        let plan = compile(
            &doc(r#"{"name":"m","steps":[{"code":"agg","name":"roll","order":1,"kind":"aggregation",
                "group_by":"townshipName","derive":"community_township",
                "operations":[{"output":"PLAN","expression":"PLAN_CONSTRUCTION"}]}]}"#),
            None,
        )
        .unwrap();
        match &plan.steps[0].kind {
            StepKind::Aggregation(a) => {
                assert_eq!(a.parent_prefix, DEFAULT_PARENT_PREFIX);
                assert_eq!(a.derive, Some(Derive::CommunityTownship));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn weights_file_overrides_model_weights() {
        let d = doc(r#"{"name":"m","weights":{"A":0.2,"B":0.3},"steps":[
            {"code":"s","name":"s","order":1,"operations":[{"output":"o","expression":"1"}]}]}"#);
        let file = WeightsDoc { weights: [("A".to_string(), 0.9)].into_iter().collect() };
        let plan = compile(&d, Some(&file)).unwrap();
        assert_eq!(plan.weights["A"], 0.9);
        assert_eq!(plan.weights["B"], 0.3);

        let bad = WeightsDoc { weights: [("B".to_string(), f64::NAN)].into_iter().collect() };
        assert!(compile(&d, Some(&bad)).is_err());
    }

    #[test]
    fn engine_override_is_validated() {
        let err = compile(
            &doc(r#"{"name":"m","engine":{"topsis":{"baseline_ratio":1.5}},"steps":[
                {"code":"s","name":"s","order":1,"operations":[{"output":"o","expression":"1"}]}]}"#),
            None,
        )
        .unwrap_err();
        assert_eq!(codes(err), vec!["Engine.OutOfRange"]);
    }
}
