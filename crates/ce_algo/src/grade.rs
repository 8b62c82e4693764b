//! crates/ce_algo/src/grade.rs
//! Qualitative tiers from a score's position in its cross-region distribution.
//!
//! Banding uses the mean `μ` and sample standard deviation `σ` of every
//! region's value. The number of tiers depends on how `μ` compares to `σ`:
//! a tightly clustered, low-mean population gets fewer lower tiers. With
//! fewer than two samples absolute thresholds apply instead.

use core::fmt;
use core::str::FromStr;

use ce_core::config::{FallbackThresholds, GradingConfig};
use ce_core::{CrossRegionDataset, RegionContext};

use crate::stats;

/// Ordered from best to worst.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Grade {
    Strong,
    FairlyStrong,
    Medium,
    FairlyWeak,
    Weak,
}

impl Grade {
    pub const ALL: [Grade; 5] =
        [Grade::Strong, Grade::FairlyStrong, Grade::Medium, Grade::FairlyWeak, Grade::Weak];

    pub fn label(self) -> &'static str {
        match self {
            Grade::Strong => "强",
            Grade::FairlyStrong => "较强",
            Grade::Medium => "中等",
            Grade::FairlyWeak => "较弱",
            Grade::Weak => "弱",
        }
    }

    /// 4 for `Strong` down to 0 for `Weak`; higher is better.
    pub fn rank(self) -> u8 {
        match self {
            Grade::Strong => 4,
            Grade::FairlyStrong => 3,
            Grade::Medium => 2,
            Grade::FairlyWeak => 1,
            Grade::Weak => 0,
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Grade {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Grade::ALL
            .into_iter()
            .find(|g| g.label() == s.trim())
            .ok_or_else(|| format!("unknown grade label: {s}"))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Regime {
    /// `μ ≤ narrow·σ`: 强 / 较强 / 中等.
    ThreeTier,
    /// `μ ≤ wide·σ`: adds 较弱.
    FourTier,
    /// Full five tiers.
    FiveTier,
}

pub fn select_regime(mean: f64, stdev: f64, cfg: &GradingConfig) -> Regime {
    if mean <= cfg.narrow_band * stdev {
        Regime::ThreeTier
    } else if mean <= cfg.wide_band * stdev {
        Regime::FourTier
    } else {
        Regime::FiveTier
    }
}

/// Band `value` against `μ ± narrow·σ` and `μ ± wide·σ`.
///
/// Negative values are clamped to zero. NaN is not clamped and fails every
/// comparison, landing in the regime's lowest tier.
pub fn classify(value: f64, mean: f64, stdev: f64, cfg: &GradingConfig) -> Grade {
    let v = if value < 0.0 { 0.0 } else { value };
    let (narrow, wide) = (cfg.narrow_band * stdev, cfg.wide_band * stdev);

    if v >= mean + wide {
        return Grade::Strong;
    }
    if v >= mean + narrow {
        return Grade::FairlyStrong;
    }
    match select_regime(mean, stdev, cfg) {
        Regime::ThreeTier => Grade::Medium,
        Regime::FourTier if v >= mean - narrow => Grade::Medium,
        Regime::FourTier => Grade::FairlyWeak,
        Regime::FiveTier if v >= mean - narrow => Grade::Medium,
        Regime::FiveTier if v >= mean - wide => Grade::FairlyWeak,
        Regime::FiveTier => Grade::Weak,
    }
}

/// Fixed thresholds for populations too small for a standard deviation.
pub fn classify_absolute(value: f64, t: &FallbackThresholds) -> Grade {
    if value.is_nan() {
        return Grade::Medium;
    }
    if value >= t.strong {
        Grade::Strong
    } else if value >= t.fairly_strong {
        Grade::FairlyStrong
    } else if value >= t.medium {
        Grade::Medium
    } else if value >= t.fairly_weak {
        Grade::FairlyWeak
    } else {
        Grade::Weak
    }
}

/// Grade `ctx`'s `field` against every region in `ds`.
///
/// μ and σ come from the finite values only, so one broken score does not
/// shift every other region's band.
pub fn grade_region(
    ds: &CrossRegionDataset,
    ctx: &RegionContext,
    field: &str,
    cfg: &GradingConfig,
) -> Grade {
    let values = ds.column(field);
    if values.is_empty() {
        tracing::warn!(field, "no region carries grade field; defaulting to 中等");
        return Grade::Medium;
    }
    let Some(current) = ctx.get_number(field) else {
        tracing::warn!(region = %ctx.region(), field, "region lacks grade field; defaulting to 中等");
        return Grade::Medium;
    };

    let finite: Vec<f64> = values.into_iter().filter(|v| v.is_finite()).collect();
    if finite.len() < ds.len() {
        tracing::warn!(field, skipped = ds.len() - finite.len(), "non-finite or missing values left out of grade statistics");
    }

    match stats::sample_stdev(&finite) {
        Some(stdev) => classify(current, stats::mean(&finite), stdev, cfg),
        None => {
            let g = classify_absolute(current, &cfg.fallback);
            tracing::info!(region = %ctx.region(), field, score = current, grade = g.label(), "single-sample grading");
            g
        }
    }
}
