//! crates/ce_pipeline/src/evaluate.rs
//! Run one planned operation against one region.
//!
//! Cross-region operations read `dataset`; everything else reads only the
//! region's own context. Numeric results are rounded to the engine scale
//! here, once, right after computation.

use core::fmt;

use ce_algo::expr::{eval, ExprError, VarSource};
use ce_algo::grade::grade_region;
use ce_algo::normalize::normalize;
use ce_algo::ops::Operation;
use ce_algo::topsis::{closeness, region_distances};
use ce_core::rounding::round_to;
use ce_core::{CoreError, CrossRegionDataset, EngineConfig, OutputName, RegionCode, RegionContext, Value};

use crate::plan::OperationPlan;

/// Why an operation could not produce a value.
#[derive(Clone, Debug, PartialEq)]
pub enum OpFailure {
    Eval(ExprError),
    Write(CoreError),
}

impl fmt::Display for OpFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpFailure::Eval(e) => write!(f, "{e}"),
            OpFailure::Write(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for OpFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OpFailure::Eval(e) => Some(e),
            OpFailure::Write(e) => Some(e),
        }
    }
}

impl From<ExprError> for OpFailure {
    fn from(e: ExprError) -> Self {
        OpFailure::Eval(e)
    }
}

impl From<CoreError> for OpFailure {
    fn from(e: CoreError) -> Self {
        OpFailure::Write(e)
    }
}

/// A failed operation with the region it failed on.
#[derive(Clone, Debug, PartialEq)]
pub struct OpError {
    pub operation: String,
    pub region: String,
    pub source: OpFailure,
}

impl OpError {
    pub fn new(operation: &OutputName, ctx: &RegionContext, source: impl Into<OpFailure>) -> Self {
        Self { operation: operation.to_string(), region: ctx.region().to_string(), source: source.into() }
    }
}

/// One region as an operation sees it: outputs already written this step,
/// over the step-start context. Borrows both.
#[derive(Clone, Copy, Debug)]
pub struct RegionView<'a> {
    base: &'a RegionContext,
    written: &'a [(OutputName, Value)],
}

impl<'a> RegionView<'a> {
    pub fn new(base: &'a RegionContext, written: &'a [(OutputName, Value)]) -> Self {
        Self { base, written }
    }

    /// No writes yet.
    pub fn of(base: &'a RegionContext) -> Self {
        Self { base, written: &[] }
    }

    pub fn region(&self) -> &RegionCode {
        self.base.region()
    }
}

impl VarSource for RegionView<'_> {
    fn var(&self, name: &str) -> Option<&Value> {
        match self.written.iter().rev().find(|(n, _)| n.as_str() == name) {
            Some((_, v)) => Some(v),
            None => self.base.get(name),
        }
    }
}

fn number(x: f64, scale: u32) -> Value {
    Value::Number(round_to(x, scale))
}

fn required(ctx: &RegionView<'_>, name: &str) -> Result<f64, ExprError> {
    ctx.number(name).ok_or_else(|| ExprError::UnknownVariable(name.to_string()))
}

/// Values `op` writes for `ctx`, in write order.
pub fn evaluate_op(
    op: &OperationPlan,
    ctx: &RegionView<'_>,
    dataset: &CrossRegionDataset,
    cfg: &EngineConfig,
) -> Result<Vec<(OutputName, Value)>, ExprError> {
    let scale = cfg.rounding_scale;
    let single = |v: Value| Ok(vec![(op.output.clone(), v)]);

    match &op.op {
        Operation::Expression(expr) => match eval(expr, ctx)? {
            Value::Number(n) => single(number(n, scale)),
            text => single(text),
        },
        Operation::Normalize { indicator } => single(number(normalize(dataset, ctx, indicator), scale)),
        Operation::TopsisPositive { indicators } => {
            let d = region_distances(dataset, ctx, indicators.as_slice(), &cfg.topsis);
            single(number(d.positive, scale))
        }
        Operation::TopsisNegative { indicators } => {
            let d = region_distances(dataset, ctx, indicators.as_slice(), &cfg.topsis);
            single(number(d.negative, scale))
        }
        Operation::Topsis { indicators } => {
            let d = region_distances(dataset, ctx, indicators.as_slice(), &cfg.topsis);
            let names = op.written_names();
            let values = [d.positive, d.negative, d.composite()];
            Ok(names.into_iter().zip(values).map(|(n, v)| (n, number(v, scale))).collect())
        }
        Operation::TopsisScore { positive, negative } => {
            let (p, n) = (required(ctx, positive)?, required(ctx, negative)?);
            single(number(closeness(p, n), scale))
        }
        Operation::Grade { field } => {
            let g = grade_region(dataset, ctx.base, field, &cfg.grading);
            single(Value::from(g.label()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ce_core::RegionCode;

    fn op(output: &str, src: &str) -> OperationPlan {
        OperationPlan { output: output.parse().unwrap(), label: output.into(), op: Operation::parse(src).unwrap() }
    }

    fn region(code: &str, vals: &[(&str, f64)]) -> RegionContext {
        let mut ctx = RegionContext::new(code.parse::<RegionCode>().unwrap());
        for (k, v) in vals {
            ctx.insert(*k, *v);
        }
        ctx
    }

    #[test]
    fn expressions_are_rounded_and_text_passes_through() {
        let ctx = region("R1", &[("a", 1.0), ("b", 3.0)]);
        let ds: CrossRegionDataset = [ctx.clone()].into_iter().collect();
        let cfg = EngineConfig::default();
        let out = evaluate_op(&op("q", "a / b"), &RegionView::of(&ctx), &ds, &cfg).unwrap();
        assert_eq!(out, vec![("q".parse().unwrap(), Value::Number(0.33333333))]);
        let out = evaluate_op(&op("t", "a > 0 ? \"高\" : \"低\""), &RegionView::of(&ctx), &ds, &cfg).unwrap();
        assert_eq!(out[0].1, Value::from("高"));
    }

    #[test]
    fn topsis_writes_three_outputs() {
        let x = region("X", &[("v", 2.0)]);
        let y = region("Y", &[("v", 8.0)]);
        let ds: CrossRegionDataset = [x.clone(), y].into_iter().collect();
        let out = evaluate_op(&op("cap", "@TOPSIS:v"), &RegionView::of(&x), &ds, &EngineConfig::default()).unwrap();
        let names: Vec<&str> = out.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["cap_positive", "cap_negative", "cap"]);
        let vals: Vec<f64> = out.iter().filter_map(|(_, v)| v.as_number()).collect();
        assert_eq!(vals, vec![6.0, 0.0, 0.0]);
    }

    #[test]
    fn topsis_score_needs_both_fields() {
        let ctx = region("R", &[("p", 1.0)]);
        let ds: CrossRegionDataset = [ctx.clone()].into_iter().collect();
        let err = evaluate_op(&op("s", "@TOPSIS_SCORE:p,n"), &RegionView::of(&ctx), &ds, &EngineConfig::default()).unwrap_err();
        assert_eq!(err, ExprError::UnknownVariable("n".into()));
    }

    #[test]
    fn view_prefers_this_steps_writes() {
        let ctx = region("R", &[("p", 1.0), ("n", 9.0)]);
        let ds: CrossRegionDataset = [ctx.clone()].into_iter().collect();
        let written: Vec<(OutputName, Value)> = vec![("n".parse().unwrap(), Value::Number(3.0))];
        let view = RegionView::new(&ctx, &written);
        assert_eq!(view.number("n"), Some(3.0));
        assert_eq!(view.number("p"), Some(1.0));
        let out = evaluate_op(&op("s", "@TOPSIS_SCORE:p,n"), &view, &ds, &EngineConfig::default()).unwrap();
        assert_eq!(out[0].1, Value::Number(0.75));
    }

    #[test]
    fn non_finite_results_are_kept() {
        let ctx = region("R", &[("a", 1.0), ("z", 0.0)]);
        let ds: CrossRegionDataset = [ctx.clone()].into_iter().collect();
        let out = evaluate_op(&op("q", "a / z"), &RegionView::of(&ctx), &ds, &EngineConfig::default()).unwrap();
        assert_eq!(out[0].1.as_number(), Some(f64::INFINITY));
    }
}
