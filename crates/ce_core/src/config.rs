//! crates/ce_core/src/config.rs
//! Engine configuration with safe defaults and domain validation.
//!
//! Every field has a default, so a model file may omit the whole `engine`
//! block or any part of it. The business constants of the scoring rules
//! (single-region baseline ratio, fallback grading thresholds) live here as
//! defaults rather than being hard-coded in the algorithms.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::errors::CoreError;
use crate::rounding::DEFAULT_SCALE;

// ------------ Sections ------------

/// Ideal-solution distance settings.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default, deny_unknown_fields))]
pub struct TopsisConfig {
    /// Single-region synthetic vectors are `v*(1+r)` / `v*(1-r)`.
    pub baseline_ratio: f64,
    /// When false, a lone region is treated like any other dataset
    /// (both distances collapse to 0 and the composite becomes neutral).
    pub single_region_handling: bool,
}

impl Default for TopsisConfig {
    fn default() -> Self {
        Self { baseline_ratio: 0.2, single_region_handling: true }
    }
}

/// Absolute thresholds used when fewer than two samples exist.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default, deny_unknown_fields))]
pub struct FallbackThresholds {
    pub strong: f64,
    pub fairly_strong: f64,
    pub medium: f64,
    pub fairly_weak: f64,
}

impl Default for FallbackThresholds {
    fn default() -> Self {
        Self { strong: 0.8, fairly_strong: 0.6, medium: 0.4, fairly_weak: 0.2 }
    }
}

/// Mean/stdev banding settings.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default, deny_unknown_fields))]
pub struct GradingConfig {
    pub fallback: FallbackThresholds,
    /// Inner band half-width in σ units (μ ± 0.5σ).
    pub narrow_band: f64,
    /// Outer band half-width in σ units (μ ± 1.5σ).
    pub wide_band: f64,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self { fallback: FallbackThresholds::default(), narrow_band: 0.5, wide_band: 1.5 }
    }
}

/// Result validator / repairer settings.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default, deny_unknown_fields))]
pub struct ValidationConfig {
    /// Allowed |score − neg/(neg+pos)| before a score is flagged inconsistent.
    pub consistency_tolerance: f64,
    /// Below this distance sum the recomputed score falls back to `default_score`.
    pub min_distance_sum: f64,
    pub default_score: f64,
    /// max(pos,neg)/min(pos,neg) above this is reported as a warning.
    pub max_distance_ratio: f64,
    /// Score range below this is reported as low discrimination.
    pub min_score_spread: f64,
    /// Share of valid regions below this triggers a data-quality suggestion.
    pub min_valid_share: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            consistency_tolerance: 0.001,
            min_distance_sum: 1e-10,
            default_score: 0.5,
            max_distance_ratio: 1000.0,
            min_score_spread: 0.01,
            min_valid_share: 0.8,
        }
    }
}

// ------------ EngineConfig ------------

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default, deny_unknown_fields))]
pub struct EngineConfig {
    /// Decimal digits kept on every numeric output.
    pub rounding_scale: u32,
    /// Fan the VALUE phase out across regions (requires the pipeline's `parallel` feature).
    pub parallel: bool,
    pub topsis: TopsisConfig,
    pub grading: GradingConfig,
    pub validation: ValidationConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rounding_scale: DEFAULT_SCALE,
            parallel: true,
            topsis: TopsisConfig::default(),
            grading: GradingConfig::default(),
            validation: ValidationConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Domain checks. Called once when a model plan is compiled.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.rounding_scale > 15 {
            return Err(CoreError::DomainOutOfRange("rounding_scale (0..=15)"));
        }

        let r = self.topsis.baseline_ratio;
        if !(r.is_finite() && (0.0..1.0).contains(&r)) {
            return Err(CoreError::DomainOutOfRange("topsis.baseline_ratio [0,1)"));
        }

        let g = &self.grading;
        if !(g.narrow_band.is_finite() && g.wide_band.is_finite())
            || g.narrow_band <= 0.0
            || g.wide_band <= g.narrow_band
        {
            return Err(CoreError::DomainOutOfRange("grading bands (0 < narrow < wide)"));
        }
        let f = &g.fallback;
        let descending = [f.strong, f.fairly_strong, f.medium, f.fairly_weak]
            .windows(2)
            .all(|w| w[0].is_finite() && w[1].is_finite() && w[0] > w[1]);
        if !descending {
            return Err(CoreError::DomainOutOfRange("grading.fallback must be strictly descending"));
        }

        let v = &self.validation;
        if !(v.consistency_tolerance > 0.0 && v.min_distance_sum > 0.0) {
            return Err(CoreError::DomainOutOfRange("validation tolerances must be > 0"));
        }
        if !(0.0..=1.0).contains(&v.default_score) {
            return Err(CoreError::DomainOutOfRange("validation.default_score [0,1]"));
        }
        if !(0.0..=1.0).contains(&v.min_valid_share) {
            return Err(CoreError::DomainOutOfRange("validation.min_valid_share [0,1]"));
        }
        if v.max_distance_ratio <= 1.0 || v.min_score_spread < 0.0 {
            return Err(CoreError::DomainOutOfRange("validation ratio/spread"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let c = EngineConfig::default();
        assert!(c.validate().is_ok());
        assert_eq!(c.topsis.baseline_ratio, 0.2);
        assert_eq!(c.grading.fallback.strong, 0.8);
        assert_eq!(c.validation.consistency_tolerance, 0.001);
        assert_eq!(c.rounding_scale, 8);
    }

    #[test]
    fn rejects_bad_domains() {
        let mut c = EngineConfig::default();
        c.topsis.baseline_ratio = 1.0;
        assert!(c.validate().is_err());

        let mut c = EngineConfig::default();
        c.grading.fallback.medium = 0.9;
        assert!(c.validate().is_err());

        let mut c = EngineConfig::default();
        c.grading.wide_band = 0.4;
        assert!(c.validate().is_err());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn partial_json_fills_defaults() {
        let c: EngineConfig =
            serde_json::from_str(r#"{"topsis":{"baseline_ratio":0.1},"parallel":false}"#).unwrap();
        assert_eq!(c.topsis.baseline_ratio, 0.1);
        assert!(c.topsis.single_region_handling);
        assert!(!c.parallel);
        assert_eq!(c.grading, GradingConfig::default());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn unknown_fields_are_rejected() {
        let r: Result<EngineConfig, _> = serde_json::from_str(r#"{"topsis":{"ratio":0.1}}"#);
        assert!(r.is_err());
    }
}
