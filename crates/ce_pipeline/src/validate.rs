//! crates/ce_pipeline/src/validate.rs
//! Sanity checks and repair for TOPSIS outputs.
//!
//! Each TOPSIS result is a triple of fields on a region: distance to the
//! positive ideal, distance to the negative ideal, and the composite score.
//! Distances written on their own (no composite in the same step) are
//! checked with the distance rules only.
//! Validation is read-only; `repair_results` is the only place that rewrites
//! values, and it never drops a region.

use std::collections::BTreeMap;

use ce_algo::stats;
use ce_algo::topsis::closeness;
use ce_core::config::ValidationConfig;
use ce_core::rounding::round_to;
use ce_core::{CrossRegionDataset, RegionContext, Value};
use serde::Serialize;

use crate::plan::{Severity, TopsisFields, TopsisTriple};

// ------------------------------- Report types -------------------------------

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResultIssue {
    pub severity: Severity,
    pub code: &'static str,
    pub field: String,
    /// Observed value; `None` when missing (non-finite serializes as null too).
    pub value: Option<f64>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RegionValidationResult {
    pub region: String,
    /// No `Severity::Error` issue.
    pub valid: bool,
    pub issues: Vec<ResultIssue>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SeriesStats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub sum: f64,
    pub range: f64,
    /// Population standard deviation.
    pub std_dev: f64,
}

impl SeriesStats {
    /// Statistics over the finite values in `values`.
    pub fn of(values: &[f64]) -> SeriesStats {
        let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if finite.is_empty() {
            return SeriesStats::default();
        }
        let min = finite.iter().copied().fold(f64::INFINITY, f64::min);
        let max = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        SeriesStats {
            count: finite.len(),
            min,
            max,
            avg: stats::mean(&finite),
            sum: stats::sum(&finite),
            range: max - min,
            std_dev: stats::population_stdev(&finite).unwrap_or(0.0),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ValidationStatistics {
    pub total_regions: usize,
    pub valid_regions: usize,
    pub invalid_regions: usize,
    pub warning_count: usize,
    pub error_count: usize,
    /// Field name → statistics over its finite values.
    pub series: BTreeMap<String, SeriesStats>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ValidationResult {
    pub step: String,
    pub valid: bool,
    pub triples: Vec<TopsisTriple>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub distances: Vec<String>,
    pub regions: Vec<RegionValidationResult>,
    pub statistics: ValidationStatistics,
    pub suggestions: Vec<String>,
}

impl ValidationResult {
    pub fn issues(&self) -> impl Iterator<Item = (&str, &ResultIssue)> {
        self.regions.iter().flat_map(|r| r.issues.iter().map(move |i| (r.region.as_str(), i)))
    }

    pub fn error_count(&self) -> usize {
        self.statistics.error_count
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RepairAction {
    pub region: String,
    pub field: String,
    pub from: Option<f64>,
    pub to: f64,
    pub reason: &'static str,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RepairResult {
    pub actions: Vec<RepairAction>,
    pub repaired_regions: usize,
    /// Validation of the repaired values.
    pub remaining: ValidationResult,
}

// ------------------------------- Checks -------------------------------

fn err(code: &'static str, field: &str, value: Option<f64>, message: String, suggested: f64) -> ResultIssue {
    ResultIssue { severity: Severity::Error, code, field: field.to_string(), value, message, suggested: Some(suggested) }
}

fn warn(code: &'static str, field: &str, value: Option<f64>, message: String) -> ResultIssue {
    ResultIssue { severity: Severity::Warning, code, field: field.to_string(), value, message, suggested: None }
}

fn read(ctx: &RegionContext, field: &str) -> Option<f64> {
    ctx.get(field).and_then(Value::as_number)
}

fn check_distance(field: &str, v: Option<f64>) -> Option<ResultIssue> {
    match v {
        None => Some(err("Distance.Missing", field, None, format!("{field} is missing"), 0.0)),
        Some(d) if d.is_nan() => Some(err("Distance.NaN", field, v, format!("{field} is NaN"), 0.0)),
        Some(d) if d.is_infinite() => Some(err("Distance.Infinite", field, v, format!("{field} is infinite"), 1.0)),
        Some(d) if d < 0.0 => Some(err("Distance.Negative", field, v, format!("{field} is negative ({d})"), d.abs())),
        Some(_) => None,
    }
}

fn check_score(field: &str, v: Option<f64>, cfg: &ValidationConfig) -> Option<ResultIssue> {
    let fallback = cfg.default_score;
    match v {
        None => Some(err("Score.Missing", field, None, format!("{field} is missing"), fallback)),
        Some(s) if s.is_nan() => Some(err("Score.NaN", field, v, format!("{field} is NaN"), fallback)),
        Some(s) if s.is_infinite() => Some(err("Score.Infinite", field, v, format!("{field} is infinite"), fallback)),
        Some(s) if s < 0.0 => Some(err("Score.BelowZero", field, v, format!("{field} {s} is below 0"), 0.0)),
        Some(s) if s > 1.0 => Some(err("Score.AboveOne", field, v, format!("{field} {s} is above 1"), 1.0)),
        Some(_) => None,
    }
}

fn check_triple(ctx: &RegionContext, t: &TopsisTriple, cfg: &ValidationConfig) -> Vec<ResultIssue> {
    let (p, n, s) = (read(ctx, &t.positive), read(ctx, &t.negative), read(ctx, &t.score));
    let mut out: Vec<ResultIssue> = [check_distance(&t.positive, p), check_distance(&t.negative, n), check_score(&t.score, s, cfg)]
        .into_iter()
        .flatten()
        .collect();
    if !out.is_empty() {
        return out;
    }

    // all three are finite and in domain from here
    let (p, n, s) = (p.unwrap_or(0.0), n.unwrap_or(0.0), s.unwrap_or(0.0));
    if p == 0.0 && n == 0.0 {
        out.push(warn(
            "Distance.BothZero",
            &t.score,
            Some(s),
            "both distances are zero; the region matches both ideals".into(),
        ));
    } else {
        let (lo, hi) = (p.min(n), p.max(n));
        if lo > 0.0 && hi / lo > cfg.max_distance_ratio {
            out.push(warn(
                "Distance.RatioExtreme",
                &t.score,
                Some(s),
                format!("distance ratio {:.1} exceeds {}", hi / lo, cfg.max_distance_ratio),
            ));
        }
        let expected = n / (n + p);
        if (s - expected).abs() > cfg.consistency_tolerance {
            out.push(ResultIssue {
                suggested: Some(expected),
                ..warn(
                    "Score.Inconsistent",
                    &t.score,
                    Some(s),
                    format!("score {s} differs from neg/(neg+pos) = {expected:.8}"),
                )
            });
        }
    }
    out
}

fn suggestions(stats: &ValidationStatistics, triples: &[TopsisTriple], cfg: &ValidationConfig) -> Vec<String> {
    let mut out = Vec::new();
    if stats.total_regions > 0 {
        let share = stats.valid_regions as f64 / stats.total_regions as f64;
        if share < cfg.min_valid_share {
            out.push(format!(
                "only {} of {} regions passed validation; check the input indicators for gaps and outliers",
                stats.valid_regions, stats.total_regions
            ));
        }
    }
    if stats.error_count > 0 {
        out.push(format!("{} anomalous value(s) can be replaced by running with repair enabled", stats.error_count));
    }
    for t in triples {
        if let Some(s) = stats.series.get(&t.score) {
            if s.count >= 2 && s.range < cfg.min_score_spread {
                out.push(format!(
                    "{} spans only {:.6}; the indicators barely discriminate between regions",
                    t.score, s.range
                ));
            }
        }
    }
    out
}

fn check_region(ctx: &RegionContext, fields: &TopsisFields, cfg: &ValidationConfig) -> Vec<ResultIssue> {
    let mut issues: Vec<ResultIssue> = fields.triples.iter().flat_map(|t| check_triple(ctx, t, cfg)).collect();
    issues.extend(fields.distances.iter().filter_map(|d| check_distance(d, read(ctx, d))));
    issues
}

/// Validate every region's TOPSIS triples and standalone distances.
pub fn validate_results(
    step: &str,
    dataset: &CrossRegionDataset,
    fields: &TopsisFields,
    cfg: &ValidationConfig,
) -> ValidationResult {
    let triples = fields.triples.as_slice();
    let mut regions = Vec::with_capacity(dataset.len());
    let mut statistics = ValidationStatistics { total_regions: dataset.len(), ..Default::default() };

    for ctx in dataset.contexts() {
        let issues = check_region(ctx, fields, cfg);
        let errors = issues.iter().filter(|i| i.severity == Severity::Error).count();
        statistics.error_count += errors;
        statistics.warning_count += issues.len() - errors;
        if errors == 0 {
            statistics.valid_regions += 1;
        } else {
            statistics.invalid_regions += 1;
        }
        regions.push(RegionValidationResult { region: ctx.region().to_string(), valid: errors == 0, issues });
    }

    let series_fields = triples.iter().flat_map(|t| [&t.positive, &t.negative, &t.score]).chain(&fields.distances);
    for field in series_fields {
        statistics.series.insert(field.clone(), SeriesStats::of(&dataset.column(field)));
    }

    let suggestions = suggestions(&statistics, triples, cfg);
    ValidationResult {
        step: step.to_string(),
        valid: statistics.invalid_regions == 0,
        triples: triples.to_vec(),
        distances: fields.distances.clone(),
        regions,
        statistics,
        suggestions,
    }
}

// ------------------------------- Repair -------------------------------

fn repaired_distance(v: Option<f64>) -> (f64, Option<&'static str>) {
    match v {
        None => (0.0, Some("missing distance")),
        Some(d) if d.is_nan() => (0.0, Some("NaN distance")),
        Some(d) if d.is_infinite() => (1.0, Some("infinite distance")),
        Some(d) if d < 0.0 => (d.abs(), Some("negative distance")),
        Some(d) => (d, None),
    }
}

/// Composite from repaired distances; `default_score` when both are negligible.
pub fn recompute_score(positive: f64, negative: f64, cfg: &ValidationConfig) -> f64 {
    if positive + negative < cfg.min_distance_sum {
        cfg.default_score
    } else {
        closeness(positive, negative)
    }
}

fn same(a: Option<f64>, b: f64) -> bool {
    a.is_some_and(|a| a == b || (a.is_nan() && b.is_nan()))
}

/// Rewrite anomalous TOPSIS values in place and re-validate.
///
/// A triple is touched only when it has an issue: distances are fixed first,
/// then the composite is recomputed from them. Standalone distances get the
/// distance fix alone.
pub fn repair_results(
    step: &str,
    dataset: &mut CrossRegionDataset,
    fields: &TopsisFields,
    cfg: &ValidationConfig,
    scale: u32,
) -> RepairResult {
    let mut actions = Vec::new();
    let mut repaired_regions = 0usize;

    for ctx in dataset.contexts_mut() {
        let mut touched = false;
        for field in &fields.distances {
            let from = read(ctx, field);
            let (to, Some(reason)) = repaired_distance(from) else { continue };
            ctx.insert(field.clone(), to);
            actions.push(RepairAction { region: ctx.region().to_string(), field: field.clone(), from, to, reason });
            touched = true;
        }
        for t in &fields.triples {
            if check_triple(ctx, t, cfg).is_empty() {
                continue;
            }
            let region = ctx.region().to_string();
            let (p_old, n_old, s_old) = (read(ctx, &t.positive), read(ctx, &t.negative), read(ctx, &t.score));
            let (p, p_reason) = repaired_distance(p_old);
            let (n, n_reason) = repaired_distance(n_old);
            let s = round_to(recompute_score(p, n, cfg), scale);

            for (field, from, to, reason) in [
                (&t.positive, p_old, p, p_reason),
                (&t.negative, n_old, n, n_reason),
                (&t.score, s_old, s, Some("recomputed from repaired distances")),
            ] {
                if same(from, to) {
                    continue;
                }
                let Some(reason) = reason else { continue };
                ctx.insert(field.clone(), to);
                actions.push(RepairAction { region: region.clone(), field: field.clone(), from, to, reason });
                touched = true;
            }
        }
        if touched {
            repaired_regions += 1;
        }
    }

    for a in &actions {
        tracing::debug!(region = %a.region, field = %a.field, from = ?a.from, to = a.to, reason = a.reason, "repaired");
    }
    let remaining = validate_results(step, dataset, fields, cfg);
    RepairResult { actions, repaired_regions, remaining }
}
