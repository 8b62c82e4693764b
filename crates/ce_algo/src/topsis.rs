//! crates/ce_algo/src/topsis.rs
//! Ideal solutions, Euclidean distances and relative closeness.
//!
//! With two or more regions the positive ideal is the per-indicator maximum
//! and the negative ideal the minimum. A lone region has no peers, so it is
//! compared against synthetic vectors scaled by `1 ± baseline_ratio`.
//! Indicators missing on either side are skipped, never zero-filled.

use std::collections::BTreeMap;

use ce_core::config::TopsisConfig;
use ce_core::CrossRegionDataset;

use crate::expr::VarSource;

/// Per-indicator positive (best) and negative (worst) reference values.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IdealSolution {
    pub positive: BTreeMap<String, f64>,
    pub negative: BTreeMap<String, f64>,
}

impl IdealSolution {
    /// Max / min over every region carrying each indicator. Indicators no
    /// region carries are absent from both maps.
    pub fn from_dataset<S: AsRef<str>>(ds: &CrossRegionDataset, indicators: &[S]) -> Self {
        let mut out = IdealSolution::default();
        for ind in indicators {
            let ind = ind.as_ref();
            let mut hi = f64::NEG_INFINITY;
            let mut lo = f64::INFINITY;
            let mut seen = false;
            for (_, v) in ds.values_of(ind) {
                hi = hi.max(v);
                lo = lo.min(v);
                seen = true;
            }
            if seen {
                out.positive.insert(ind.to_string(), hi);
                out.negative.insert(ind.to_string(), lo);
            } else {
                tracing::warn!(indicator = ind, "no region carries indicator; skipped");
            }
        }
        out
    }

    /// `v*(1+r)` / `v*(1-r)` around the region's own values.
    pub fn synthetic<S: AsRef<str>>(ctx: &(impl VarSource + ?Sized), indicators: &[S], ratio: f64) -> Self {
        let mut out = IdealSolution::default();
        for ind in indicators {
            let ind = ind.as_ref();
            if let Some(v) = ctx.number(ind) {
                out.positive.insert(ind.to_string(), v * (1.0 + ratio));
                out.negative.insert(ind.to_string(), v * (1.0 - ratio));
            }
        }
        out
    }
}

/// `sqrt(Σ (ideal − value)²)` over indicators present in both `ideal` and `ctx`.
pub fn euclidean_distance<S: AsRef<str>>(
    ideal: &BTreeMap<String, f64>,
    ctx: &(impl VarSource + ?Sized),
    indicators: &[S],
) -> f64 {
    indicators
        .iter()
        .filter_map(|ind| {
            let ind = ind.as_ref();
            Some((ideal.get(ind)?, ctx.number(ind)?))
        })
        .map(|(s, v)| (s - v) * (s - v))
        .sum::<f64>()
        .sqrt()
}

/// Relative closeness `neg / (neg + pos)`; `0.5` when both are zero.
pub fn closeness(positive: f64, negative: f64) -> f64 {
    if positive == 0.0 && negative == 0.0 {
        return 0.5;
    }
    negative / (negative + positive)
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Distances {
    pub positive: f64,
    pub negative: f64,
}

impl Distances {
    pub fn composite(&self) -> f64 {
        closeness(self.positive, self.negative)
    }
}

/// Ideal solution for `indicators` as seen from `ctx`.
pub fn ideal_for<S: AsRef<str>>(
    ds: &CrossRegionDataset,
    ctx: &(impl VarSource + ?Sized),
    indicators: &[S],
    cfg: &TopsisConfig,
) -> IdealSolution {
    if ds.len() == 1 && cfg.single_region_handling {
        tracing::debug!(ratio = cfg.baseline_ratio, "single-region ideal");
        IdealSolution::synthetic(ctx, indicators, cfg.baseline_ratio)
    } else {
        IdealSolution::from_dataset(ds, indicators)
    }
}

/// Both distances of `ctx` against the ideal built from `ds`.
pub fn region_distances<S: AsRef<str>>(
    ds: &CrossRegionDataset,
    ctx: &(impl VarSource + ?Sized),
    indicators: &[S],
    cfg: &TopsisConfig,
) -> Distances {
    let ideal = ideal_for(ds, ctx, indicators, cfg);
    Distances {
        positive: euclidean_distance(&ideal.positive, ctx, indicators),
        negative: euclidean_distance(&ideal.negative, ctx, indicators),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ce_core::{RegionCode, RegionContext};
    use proptest::prelude::*;

    fn region(code: &str, vals: &[(&str, f64)]) -> RegionContext {
        let mut ctx = RegionContext::new(code.parse::<RegionCode>().unwrap());
        for (k, v) in vals {
            ctx.insert(*k, *v);
        }
        ctx
    }

    #[test]
    fn two_regions_one_indicator() {
        let ds: CrossRegionDataset =
            [region("X", &[("I", 2.0)]), region("Y", &[("I", 8.0)])].into_iter().collect();
        let cfg = TopsisConfig::default();
        let x = region_distances(&ds, ds.get(&"X".parse().unwrap()).unwrap(), &["I"], &cfg);
        let y = region_distances(&ds, ds.get(&"Y".parse().unwrap()).unwrap(), &["I"], &cfg);
        assert_eq!(x, Distances { positive: 6.0, negative: 0.0 });
        assert_eq!(x.composite(), 0.0);
        assert_eq!(y, Distances { positive: 0.0, negative: 6.0 });
        assert_eq!(y.composite(), 1.0);
    }

    #[test]
    fn missing_indicators_are_skipped() {
        let ds: CrossRegionDataset = [
            region("A", &[("p", 1.0), ("q", 4.0)]),
            region("B", &[("p", 3.0)]),
            region("C", &[("p", 2.0), ("q", 0.0)]),
        ]
        .into_iter()
        .collect();
        let ideal = IdealSolution::from_dataset(&ds, &["p", "q", "r"]);
        assert_eq!(ideal.positive.get("q"), Some(&4.0));
        assert!(!ideal.positive.contains_key("r"));
        let b = ds.get(&"B".parse().unwrap()).unwrap();
        // only p contributes for B
        let d = region_distances(&ds, b, &["p", "q", "r"], &TopsisConfig::default());
        assert_eq!(d, Distances { positive: 0.0, negative: 2.0 });
    }

    #[test]
    fn single_region_uses_synthetic_vectors() {
        let ds: CrossRegionDataset = [region("S", &[("a", 10.0), ("b", 5.0)])].into_iter().collect();
        let ctx = ds.get(&"S".parse().unwrap()).unwrap();
        let cfg = TopsisConfig::default();
        let ideal = ideal_for(&ds, ctx, &["a", "b"], &cfg);
        assert!((ideal.positive["a"] - 12.0).abs() < 1e-12);
        assert!((ideal.negative["a"] - 8.0).abs() < 1e-12);
        let d = region_distances(&ds, ctx, &["a", "b"], &cfg);
        assert!((d.positive - d.negative).abs() < 1e-12);
        assert!((d.composite() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn single_region_handling_can_be_disabled() {
        let ds: CrossRegionDataset = [region("S", &[("a", 10.0)])].into_iter().collect();
        let ctx = ds.get(&"S".parse().unwrap()).unwrap();
        let cfg = TopsisConfig { single_region_handling: false, ..TopsisConfig::default() };
        let d = region_distances(&ds, ctx, &["a"], &cfg);
        assert_eq!(d, Distances { positive: 0.0, negative: 0.0 });
        assert_eq!(d.composite(), 0.5);
    }

    proptest! {
        #[test]
        fn closeness_is_bounded_and_consistent(pos in 0.0f64..1e6, neg in 0.0f64..1e6) {
            let c = closeness(pos, neg);
            prop_assert!((0.0..=1.0).contains(&c));
            if pos + neg > 0.0 {
                prop_assert!((c - neg / (neg + pos)).abs() < 1e-3);
            } else {
                prop_assert_eq!(c, 0.5);
            }
        }

        #[test]
        fn single_region_scaling(v in -1e4f64..1e4) {
            let ds: CrossRegionDataset = [region("S", &[("a", v)])].into_iter().collect();
            let ctx = ds.get(&"S".parse().unwrap()).unwrap();
            let ideal = IdealSolution::synthetic(ctx, &["a"], 0.2);
            prop_assert!((ideal.positive["a"] - v * 1.2).abs() <= 1e-9 * v.abs().max(1.0));
            prop_assert!((ideal.negative["a"] - v * 0.8).abs() <= 1e-9 * v.abs().max(1.0));
        }
    }
}
