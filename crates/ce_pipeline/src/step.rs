//! crates/ce_pipeline/src/step.rs
//! Step execution: run state machine plus the VALUE and RANK phases.
//!
//! VALUE: every region evaluates its value operations against the dataset as
//! it stood at step start. A region's own reads also see what it wrote
//! earlier in the step, through a borrowed [`RegionView`]. Nothing is written
//! until every region is done, so regions are independent and may fan out
//! across threads. Results are merged back in region order.
//!
//! RANK: after the VALUE barrier, GRADE operations read the merged dataset.

use core::fmt;

use ce_core::{CoreError, CrossRegionDataset, EngineConfig, OutputName, RegionContext, Value};

use crate::evaluate::{evaluate_op, OpError, RegionView};
use crate::plan::StepPlan;

// ------------------------------- Run state -------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Value,
    Rank,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Init,
    Step { index: usize, phase: Phase },
    Done,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IllegalTransition {
    pub from: RunState,
    pub to: RunState,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "illegal run transition {:?} -> {:?}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

impl RunState {
    /// Legal successors for a plan of `steps` steps.
    pub fn can_transition(self, to: RunState, steps: usize) -> bool {
        use Phase::*;
        use RunState::*;
        match (self, to) {
            (Init, Step { index: 0, phase: Value }) => steps > 0,
            (Init, Done) => steps == 0,
            (Step { index: a, phase: Value }, Step { index: b, phase: Rank }) => a == b,
            (Step { index: a, phase: Rank }, Step { index: b, phase: Value }) => b == a + 1 && b < steps,
            (Step { index, phase: Rank }, Done) => index + 1 == steps,
            _ => false,
        }
    }

    pub fn transition(self, to: RunState, steps: usize) -> Result<RunState, IllegalTransition> {
        if self.can_transition(to, steps) {
            Ok(to)
        } else {
            Err(IllegalTransition { from: self, to })
        }
    }
}

// ------------------------------- Phases -------------------------------

type RegionOutputs = Vec<(OutputName, Value)>;

fn value_outputs(
    step: &StepPlan,
    ctx: &RegionContext,
    snapshot: &CrossRegionDataset,
    cfg: &EngineConfig,
) -> Result<RegionOutputs, OpError> {
    let mut out: RegionOutputs = Vec::new();
    for op in &step.value_ops {
        let view = RegionView::new(ctx, &out);
        let values = evaluate_op(op, &view, snapshot, cfg).map_err(|e| OpError::new(&op.output, ctx, e))?;
        for (name, value) in values {
            tracing::trace!(region = %ctx.region(), output = %name, value = %value, "op");
            if out.iter().any(|(n, _)| *n == name) {
                let dup = CoreError::DuplicateWrite { region: ctx.region().to_string(), name: name.to_string() };
                return Err(OpError::new(&op.output, ctx, dup));
            }
            out.push((name, value));
        }
    }
    Ok(out)
}

fn collect_in_order(
    snapshot: &CrossRegionDataset,
    f: impl Fn(&RegionContext) -> Result<RegionOutputs, OpError> + Sync + Send,
    parallel: bool,
) -> Result<Vec<RegionOutputs>, OpError> {
    let contexts: Vec<&RegionContext> = snapshot.contexts().collect();

    #[cfg(feature = "parallel")]
    let results: Vec<Result<RegionOutputs, OpError>> = if parallel {
        use rayon::prelude::*;
        contexts.par_iter().map(|c| f(c)).collect()
    } else {
        contexts.iter().map(|c| f(c)).collect()
    };
    #[cfg(not(feature = "parallel"))]
    let results: Vec<Result<RegionOutputs, OpError>> = {
        let _ = parallel;
        contexts.iter().map(|c| f(c)).collect()
    };

    // first failure in region order, independent of scheduling
    results.into_iter().collect()
}

fn merge(
    dataset: &mut CrossRegionDataset,
    step: &StepPlan,
    outputs: Vec<RegionOutputs>,
    start_step: bool,
) -> Result<(), OpError> {
    let codes: Vec<_> = dataset.codes().cloned().collect();
    for (code, values) in codes.iter().zip(outputs) {
        let Some(ctx) = dataset.get_mut(code) else { continue };
        if start_step {
            ctx.begin_step();
        }
        for (name, value) in values {
            let op = step.operations().find(|o| o.written_names().contains(&name)).map(|o| &o.output).unwrap_or(&name);
            ctx.write_output(name.as_str(), value).map_err(|e| OpError::new(op, ctx, e))?;
        }
    }
    Ok(())
}

/// VALUE phase over every region; outputs are written into `dataset`.
pub fn run_value_phase(
    step: &StepPlan,
    dataset: &mut CrossRegionDataset,
    cfg: &EngineConfig,
    parallel: bool,
) -> Result<(), OpError> {
    let snapshot: &CrossRegionDataset = dataset;
    let outputs = collect_in_order(snapshot, |ctx| value_outputs(step, ctx, snapshot, cfg), parallel)?;
    merge(dataset, step, outputs, true)
}

/// RANK phase: GRADE operations over the post-barrier dataset.
pub fn run_rank_phase(step: &StepPlan, dataset: &mut CrossRegionDataset, cfg: &EngineConfig) -> Result<(), OpError> {
    if step.rank_ops.is_empty() {
        return Ok(());
    }
    let barrier: &CrossRegionDataset = dataset;
    let outputs = collect_in_order(
        barrier,
        |ctx| {
            let mut out = Vec::new();
            for op in &step.rank_ops {
                let values =
                    evaluate_op(op, &RegionView::of(ctx), barrier, cfg).map_err(|e| OpError::new(&op.output, ctx, e))?;
                out.extend(values);
            }
            Ok(out)
        },
        false,
    )?;
    merge(dataset, step, outputs, false)
}
