//! crates/ce_algo/src/normalize.rs
//! Euclidean unit-vector normalization of one indicator across regions.

use ce_core::CrossRegionDataset;

use crate::expr::VarSource;

/// `sqrt(Σ v²)` over every region that has a numeric value for `indicator`.
pub fn unit_vector_denominator(ds: &CrossRegionDataset, indicator: &str) -> f64 {
    ds.values_of(indicator).map(|(_, v)| v * v).sum::<f64>().sqrt()
}

/// `current / sqrt(Σ v²)`.
///
/// Returns `0.0` when the current region lacks the indicator or when the
/// denominator is zero (every region at zero, or no region has it).
pub fn normalize(ds: &CrossRegionDataset, current: &(impl VarSource + ?Sized), indicator: &str) -> f64 {
    let Some(v) = current.number(indicator) else {
        return 0.0;
    };
    let denom = unit_vector_denominator(ds, indicator);
    if denom == 0.0 {
        tracing::debug!(indicator, "zero denominator; normalized value is 0");
        return 0.0;
    }
    v / denom
}
