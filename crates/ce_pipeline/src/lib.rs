//! ce_pipeline: model execution (build contexts → compile plan → steps → validate/repair → result table).
//! This crate stays I/O-free; JSON and hashing live in `ce_io`, scoring math in `ce_algo`.
//!
//! Each step runs a VALUE phase over every region, a barrier, then a RANK
//! phase. Aggregation steps replace the region set with synthetic parents.
//! TOPSIS-bearing steps are validated (and optionally repaired) at the
//! barrier, so the RANK phase grades repaired values.

#![forbid(unsafe_code)]

use core::fmt;
use std::collections::{BTreeMap, BTreeSet};

use ce_core::{CancelToken, CoreError, CrossRegionDataset, EngineConfig, Value};
use ce_io::loader::{InputDigests, LoadedInputs};
use ce_io::IoError;
use indexmap::IndexMap;
use serde::Serialize;
use tracing::{error, info, info_span, warn};

pub mod aggregate;
pub mod build_result;
pub mod context_build;
pub mod diagnose;
pub mod evaluate;
pub mod plan;
pub mod step;
pub mod validate;

pub use context_build::RegionInputs;
pub use evaluate::{OpError, OpFailure};
pub use plan::{compile, ModelPlan, PlanError, PlanReport, StepKind, StepPlan, TopsisFields};
pub use validate::{repair_results, validate_results, RepairResult, ValidationResult};

use crate::build_result::{region_name, result_table, ResultTable};
use crate::diagnose::{diagnose, TopsisDiagnosis};
use crate::step::{Phase, RunState};

/// Single error surface for model execution.
#[derive(Debug)]
pub enum PipelineError {
    /// Model rejected before any region was processed.
    Plan(PlanError),
    Io(IoError),
    /// Records could not be turned into contexts.
    Input(CoreError),
    NoRegions,
    /// An operation failed; the run is aborted.
    Step { step: String, name: String, operation: String, region: String, source: OpFailure },
    Internal(String),
    Cancelled { before_step: String },
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Plan(e) => write!(f, "{e}"),
            PipelineError::Io(e) => write!(f, "{e}"),
            PipelineError::Input(e) => write!(f, "input: {e}"),
            PipelineError::NoRegions => write!(f, "input has no regions"),
            PipelineError::Step { step, name, operation, region, source } => {
                write!(f, "step {step} ({name}), operation {operation}, region {region}: {source}")
            }
            PipelineError::Internal(m) => write!(f, "internal: {m}"),
            PipelineError::Cancelled { before_step } => write!(f, "cancelled before step {before_step}"),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Plan(e) => Some(e),
            PipelineError::Io(e) => Some(e),
            PipelineError::Input(e) => Some(e),
            PipelineError::Step { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<IoError> for PipelineError {
    fn from(e: IoError) -> Self {
        PipelineError::Io(e)
    }
}

impl From<PlanError> for PipelineError {
    fn from(e: PlanError) -> Self {
        PipelineError::Plan(e)
    }
}

impl From<step::IllegalTransition> for PipelineError {
    fn from(e: step::IllegalTransition) -> Self {
        PipelineError::Internal(e.to_string())
    }
}

impl PipelineError {
    fn at_step(step: &StepPlan, e: OpError) -> Self {
        PipelineError::Step {
            step: step.code.to_string(),
            name: step.name.clone(),
            operation: e.operation,
            region: e.region,
            source: e.source,
        }
    }
}

// ---------------------------- Options / outcome types ----------------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExecutionOptions {
    /// Repair anomalous TOPSIS values after each TOPSIS-bearing step.
    pub repair: bool,
    /// Overrides `EngineConfig.parallel` when set.
    pub parallel: Option<bool>,
}

/// Region code → output name → value, in region order.
pub type OutputMap = IndexMap<String, BTreeMap<String, Value>>;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StepOutcome {
    pub code: String,
    pub name: String,
    pub order: i64,
    pub kind: &'static str,
    pub regions: usize,
    /// Values this step wrote, after any repair.
    pub outputs: OutputMap,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repair: Option<RepairResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<TopsisDiagnosis>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ModelRun {
    pub model: String,
    pub steps: Vec<StepOutcome>,
    /// Every step output on the final region set.
    pub outputs: OutputMap,
    /// Final contexts (raw fields included).
    pub dataset: CrossRegionDataset,
}

impl ModelRun {
    /// Numeric `field` per final region.
    pub fn scores(&self, field: &str) -> BTreeMap<String, f64> {
        self.outputs
            .iter()
            .filter_map(|(r, m)| m.get(field).and_then(Value::as_number).map(|v| (r.clone(), v)))
            .collect()
    }

    /// Text `field` per final region (grade labels).
    pub fn labels(&self, field: &str) -> BTreeMap<String, String> {
        self.outputs
            .iter()
            .filter_map(|(r, m)| m.get(field).and_then(Value::as_text).map(|v| (r.clone(), v.to_string())))
            .collect()
    }

    /// Validation results of every TOPSIS-bearing step, in step order.
    pub fn validations(&self) -> impl Iterator<Item = &ValidationResult> {
        self.steps.iter().filter_map(|s| s.validation.as_ref())
    }

    /// Errors still present after the run (post-repair when repair ran).
    pub fn remaining_errors(&self) -> usize {
        self.steps
            .iter()
            .map(|s| match (&s.repair, &s.validation) {
                (Some(r), _) => r.remaining.error_count(),
                (None, Some(v)) => v.error_count(),
                (None, None) => 0,
            })
            .sum()
    }

    pub fn result_table(&self, plan: &ModelPlan) -> ResultTable {
        let names: IndexMap<String, String> = self
            .dataset
            .contexts()
            .filter_map(|c| region_name(c).map(|n| (c.region().to_string(), n)))
            .collect();
        result_table(&self.outputs, &plan.columns(), &names)
    }
}

// -------------------------------------- Public API --------------------------------------

/// Compile the loaded model and build region contexts from the loaded records.
pub fn prepare(loaded: &LoadedInputs) -> Result<(ModelPlan, RegionInputs), PipelineError> {
    let plan = compile(&loaded.model, loaded.weights.as_ref())?;
    let inputs = RegionInputs::from_records(&loaded.records, &plan).map_err(PipelineError::Input)?;
    Ok((plan, inputs))
}

fn collect_outputs(dataset: &CrossRegionDataset, names: &BTreeSet<String>) -> OutputMap {
    dataset
        .contexts()
        .map(|ctx| {
            let values = names.iter().filter_map(|n| ctx.get(n).map(|v| (n.clone(), v.clone()))).collect();
            (ctx.region().to_string(), values)
        })
        .collect()
}

/// Validate the step's TOPSIS outputs and, when asked, repair them in place.
fn check_topsis(
    step: &StepPlan,
    fields: &TopsisFields,
    dataset: &mut CrossRegionDataset,
    options: &ExecutionOptions,
    cfg: &EngineConfig,
) -> (Option<ValidationResult>, Option<RepairResult>) {
    if fields.is_empty() {
        return (None, None);
    }
    let v = validate_results(step.code.as_str(), dataset, fields, &cfg.validation);
    for (region, i) in v.issues() {
        warn!(region, code = i.code, field = %i.field, "{}", i.message);
    }
    let r = options.repair.then(|| {
        let r = repair_results(step.code.as_str(), dataset, fields, &cfg.validation, cfg.rounding_scale);
        info!(actions = r.actions.len(), regions = r.repaired_regions, remaining = r.remaining.error_count(), "repair applied");
        r
    });
    (Some(v), r)
}

/// Execute `plan` over `inputs`.
///
/// Steps run in order. Cancellation is checked before each step; an
/// operation failure aborts the run with step, operation and region identity.
pub fn run_model(
    plan: &ModelPlan,
    inputs: RegionInputs,
    options: &ExecutionOptions,
    cancel: &CancelToken,
) -> Result<ModelRun, PipelineError> {
    let _run = info_span!("run_model", model = %plan.name).entered();
    if inputs.is_empty() {
        return Err(PipelineError::NoRegions);
    }
    let cfg = &plan.engine;
    let parallel = options.parallel.unwrap_or(cfg.parallel);
    let n = plan.steps.len();
    info!(regions = inputs.len(), steps = n, parallel, repair = options.repair, "run start");

    let mut dataset = inputs.into_dataset();
    let mut state = RunState::Init;
    let mut written = BTreeSet::<String>::new();
    let mut outcomes = Vec::with_capacity(n);

    for (index, step) in plan.steps.iter().enumerate() {
        if cancel.is_cancelled() {
            warn!(step = %step.code, "run cancelled");
            return Err(PipelineError::Cancelled { before_step: step.code.to_string() });
        }
        let _step = info_span!("step", code = %step.code, order = step.order).entered();

        state = state.transition(RunState::Step { index, phase: Phase::Value }, n)?;
        let mut step_names: BTreeSet<String> = step.output_names().into_iter().map(String::from).collect();
        let fields = step.topsis_fields();
        let mut checked = (None, None);
        match &step.kind {
            StepKind::Value => {
                step::run_value_phase(step, &mut dataset, cfg, parallel)
                    .map_err(|e| PipelineError::at_step(step, e))
                    .inspect_err(|e| error!("{e}"))?;
                // repaired values must be in place before GRADE reads them
                checked = check_topsis(step, &fields, &mut dataset, options, cfg);
                state = state.transition(RunState::Step { index, phase: Phase::Rank }, n)?;
                step::run_rank_phase(step, &mut dataset, cfg)
                    .map_err(|e| PipelineError::at_step(step, e))
                    .inspect_err(|e| error!("{e}"))?;
            }
            StepKind::Aggregation(spec) => {
                dataset = aggregate::aggregate(step, spec, &dataset, cfg)
                    .map_err(|e| PipelineError::at_step(step, e))
                    .inspect_err(|e| error!("{e}"))?;
                if dataset.is_empty() {
                    warn!(group_by = %spec.group_by, "aggregation produced no parents");
                }
                // parents start fresh; earlier outputs belonged to the children
                written.clear();
                step_names.insert(aggregate::PARENT_NAME_VAR.to_string());
                step_names.insert(aggregate::FIRST_CHILD_VAR.to_string());
                state = state.transition(RunState::Step { index, phase: Phase::Rank }, n)?;
            }
        }

        let (validation, repair) = checked;

        let diagnostics = step
            .value_ops
            .iter()
            .filter_map(|o| match &o.op {
                ce_algo::ops::Operation::Topsis { indicators } => {
                    let t = fields.triples.iter().find(|t| t.score == o.output.as_str())?;
                    Some(diagnose(&dataset, indicators, t, cfg))
                }
                _ => None,
            })
            .collect();

        let outputs = collect_outputs(&dataset, &step_names);
        info!(regions = dataset.len(), outputs = step_names.len(), "step done");
        written.extend(step_names);
        outcomes.push(StepOutcome {
            code: step.code.to_string(),
            name: step.name.clone(),
            order: step.order,
            kind: step.kind_label(),
            regions: dataset.len(),
            outputs,
            validation,
            repair,
            diagnostics,
        });
    }
    state.transition(RunState::Done, n)?;

    let outputs = collect_outputs(&dataset, &written);
    info!(regions = dataset.len(), "run done");
    Ok(ModelRun { model: plan.name.clone(), steps: outcomes, outputs, dataset })
}

// ---------------------------- Run record ----------------------------

#[derive(Debug, Clone, Serialize)]
pub struct EngineMeta {
    pub name: String,
    pub version: String,
}

impl Default for EngineMeta {
    fn default() -> Self {
        Self { name: "ce_engine".into(), version: env!("CARGO_PKG_VERSION").into() }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub regions: usize,
    pub steps: usize,
    pub validated_steps: usize,
    pub repair_actions: usize,
    pub remaining_errors: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunRecordDoc {
    /// `RUN:<hex16>` over the input digests.
    pub id: String,
    pub engine: EngineMeta,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    pub inputs: InputDigests,
    pub repair: bool,
    pub parallel: bool,
    /// Artifact file name → SHA-256 of its canonical bytes.
    pub outputs: BTreeMap<String, String>,
    pub summary: RunSummary,
}

/// Run record tying inputs, options and produced artifacts together.
pub fn build_run_record(
    plan: &ModelPlan,
    run: &ModelRun,
    digests: &InputDigests,
    options: &ExecutionOptions,
    artifact_digests: BTreeMap<String, String>,
) -> RunRecordDoc {
    let mut parts: Vec<&str> = vec![digests.model_sha256.as_str(), digests.records_sha256.as_str()];
    if let Some(w) = &digests.weights_sha256 {
        parts.push(w);
    }
    RunRecordDoc {
        id: ce_io::hasher::run_id_from_digests(&parts),
        engine: EngineMeta::default(),
        model: plan.name.clone(),
        model_id: plan.model_id.clone(),
        inputs: digests.clone(),
        repair: options.repair,
        parallel: options.parallel.unwrap_or(plan.engine.parallel),
        outputs: artifact_digests,
        summary: RunSummary {
            regions: run.dataset.len(),
            steps: run.steps.len(),
            validated_steps: run.validations().count(),
            repair_actions: run.steps.iter().filter_map(|s| s.repair.as_ref()).map(|r| r.actions.len()).sum(),
            remaining_errors: run.remaining_errors(),
        },
    }
}
