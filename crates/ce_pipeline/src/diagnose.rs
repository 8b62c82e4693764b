//! crates/ce_pipeline/src/diagnose.rs
//! Diagnostic report for one TOPSIS evaluation: what went in, which ideals
//! came out, how the distances are spread, and what to look at next.

use std::collections::BTreeMap;

use ce_algo::topsis::IdealSolution;
use ce_core::{CrossRegionDataset, EngineConfig};
use serde::Serialize;

use crate::plan::TopsisTriple;
use crate::validate::SeriesStats;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct IndicatorSummary {
    pub name: String,
    pub present: usize,
    pub missing: usize,
    pub stats: SeriesStats,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TopsisDiagnosis {
    pub output: String,
    pub regions: usize,
    pub single_region: bool,
    pub indicators: Vec<IndicatorSummary>,
    pub ideal: BTreeMap<String, f64>,
    pub anti_ideal: BTreeMap<String, f64>,
    pub positive: SeriesStats,
    pub negative: SeriesStats,
    pub score: SeriesStats,
    pub recommendations: Vec<String>,
}

/// Diagnose the TOPSIS result `triple` computed over `indicators`.
pub fn diagnose(
    dataset: &CrossRegionDataset,
    indicators: &[String],
    triple: &TopsisTriple,
    cfg: &EngineConfig,
) -> TopsisDiagnosis {
    let regions = dataset.len();
    let single_region = regions == 1 && cfg.topsis.single_region_handling;

    let summaries: Vec<IndicatorSummary> = indicators
        .iter()
        .map(|name| {
            let values = dataset.column(name);
            IndicatorSummary {
                name: name.clone(),
                present: values.len(),
                missing: regions - values.len(),
                stats: SeriesStats::of(&values),
            }
        })
        .collect();

    // the multi-region ideal; a lone region's synthetic ideal is per-region
    let ideal = if single_region { IdealSolution::default() } else { IdealSolution::from_dataset(dataset, indicators) };

    let positive = SeriesStats::of(&dataset.column(&triple.positive));
    let negative = SeriesStats::of(&dataset.column(&triple.negative));
    let score = SeriesStats::of(&dataset.column(&triple.score));

    let mut recommendations = Vec::new();
    if single_region {
        recommendations.push(format!(
            "single region: distances are measured against its own values scaled by 1±{}; scores are not comparable across runs with more regions",
            cfg.topsis.baseline_ratio
        ));
    }
    for s in &summaries {
        if s.present == 0 {
            recommendations.push(format!("indicator {} is absent in every region; remove it or fix the input", s.name));
        } else if s.missing > 0 {
            recommendations.push(format!("indicator {} is missing in {} region(s); those regions are scored on fewer dimensions", s.name, s.missing));
        }
        if s.present >= 2 && s.stats.range == 0.0 {
            recommendations.push(format!("indicator {} is identical in every region and does not affect the ranking", s.name));
        }
    }
    if regions >= 2 && score.count >= 2 && score.range < cfg.validation.min_score_spread {
        recommendations.push(format!("composite scores span only {:.6}; consider weighting or more discriminating indicators", score.range));
    }
    if score.count < regions {
        recommendations.push(format!("{} region(s) have no finite composite score; run with repair or check the inputs", regions - score.count));
    }

    TopsisDiagnosis {
        output: triple.score.clone(),
        regions,
        single_region,
        indicators: summaries,
        ideal: ideal.positive,
        anti_ideal: ideal.negative,
        positive,
        negative,
        score,
        recommendations,
    }
}
