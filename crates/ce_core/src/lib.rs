//! ce_core: core types shared by every engine crate.
//!
//! This crate is **I/O-free**. It defines the stable types used across the
//! engine (`ce_algo`, `ce_io`, `ce_pipeline`, `ce_cli`):
//!
//! - Identifiers: `RegionCode`, `StepCode`, `OutputName`
//! - Context values: `Value` (number or text) with truthy-token coercion
//! - Per-region variable store (`RegionContext`) and the cross-region view
//!   (`CrossRegionDataset`)
//! - Engine configuration with documented defaults (`EngineConfig`)
//! - Fixed-scale rounding helpers
//! - Cooperative cancellation (`CancelToken`)
//!
//! Serialization derives are gated behind the `serde` feature.

#![forbid(unsafe_code)]

pub mod cancel;
pub mod config;
pub mod context;
pub mod ids;
pub mod value;

pub mod errors {
    use core::fmt;

    /// Minimal error set for core-domain validation.
    #[derive(Clone, Debug, Eq, PartialEq)]
    pub enum CoreError {
        InvalidRegionCode(String),
        InvalidStepCode(String),
        InvalidOutputName(String),
        /// An output was written twice within one step.
        DuplicateWrite { region: String, name: String },
        DomainOutOfRange(&'static str),
    }

    impl fmt::Display for CoreError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                CoreError::InvalidRegionCode(s) => write!(f, "invalid region code: {s:?}"),
                CoreError::InvalidStepCode(s) => write!(f, "invalid step code: {s:?}"),
                CoreError::InvalidOutputName(s) => write!(f, "invalid output name: {s:?}"),
                CoreError::DuplicateWrite { region, name } => {
                    write!(f, "output {name} written twice in one step for region {region}")
                }
                CoreError::DomainOutOfRange(k) => write!(f, "domain out of range: {k}"),
            }
        }
    }

    impl std::error::Error for CoreError {}
}

pub mod rounding {
    //! Fixed-scale decimal rounding for f64 results.
    //!
    //! Every numeric result the engine writes goes through `round_to`, so
    //! downstream comparisons (max/min, banding) see stable values.

    /// Default number of decimal digits kept on engine outputs.
    pub const DEFAULT_SCALE: u32 = 8;

    /// Round `x` to `scale` decimal digits, half away from zero.
    ///
    /// Non-finite values pass through untouched so the validator can see them.
    /// Magnitudes too large to scale without losing integer precision are
    /// returned as-is.
    #[inline]
    pub fn round_to(x: f64, scale: u32) -> f64 {
        if !x.is_finite() {
            return x;
        }
        let factor = 10f64.powi(scale as i32);
        let scaled = x * factor;
        if !scaled.is_finite() || scaled.abs() >= 4_503_599_627_370_496.0 {
            return x;
        }
        let r = scaled.round() / factor;
        // keep -0.0 out of artifacts
        if r == 0.0 { 0.0 } else { r }
    }

    /// `round_to(x, 8)`.
    #[inline]
    pub fn round8(x: f64) -> f64 {
        round_to(x, DEFAULT_SCALE)
    }

}

pub use cancel::CancelToken;
pub use config::EngineConfig;
pub use context::{CrossRegionDataset, RegionContext};
pub use errors::CoreError;
pub use ids::{OutputName, RegionCode, StepCode};
pub use value::Value;
