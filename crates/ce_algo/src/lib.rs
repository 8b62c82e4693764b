// crates/ce_algo/src/lib.rs
//! Pure scoring algorithms. No I/O; all inputs arrive as `ce_core` contexts.
//!
//! - `expr`: the small formula language used by generic operations
//! - `ops`: typed operation kinds parsed once from their configured source
//! - `normalize`: Euclidean unit-vector normalization across regions
//! - `topsis`: ideal solutions, distances and relative closeness
//! - `grade`: mean/stdev banding into qualitative tiers
#![forbid(unsafe_code)]

pub mod expr;
pub mod grade;
pub mod normalize;
pub mod ops;
pub mod topsis;

pub mod stats {
    //! Descriptive statistics shared by the formula functions, grading and
    //! result validation.

    pub fn sum(values: &[f64]) -> f64 {
        values.iter().sum()
    }

    pub fn sum_sq(values: &[f64]) -> f64 {
        values.iter().map(|v| v * v).sum()
    }

    /// Arithmetic mean; `0.0` for an empty slice.
    pub fn mean(values: &[f64]) -> f64 {
        if values.is_empty() {
            0.0
        } else {
            sum(values) / values.len() as f64
        }
    }

    /// Sample standard deviation (n−1). `None` when n < 2.
    pub fn sample_stdev(values: &[f64]) -> Option<f64> {
        let n = values.len();
        if n < 2 {
            return None;
        }
        let m = mean(values);
        let ss: f64 = values.iter().map(|v| (v - m) * (v - m)).sum();
        Some((ss / (n - 1) as f64).sqrt())
    }

    /// Population standard deviation (n). `None` when empty.
    pub fn population_stdev(values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        let m = mean(values);
        let ss: f64 = values.iter().map(|v| (v - m) * (v - m)).sum();
        Some((ss / values.len() as f64).sqrt())
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn sample_vs_population() {
            let v = [0.1, 0.2, 0.3];
            assert!((mean(&v) - 0.2).abs() < 1e-12);
            assert!((sample_stdev(&v).unwrap() - 0.1).abs() < 1e-12);
            assert!(sample_stdev(&[1.0]).is_none());
            assert!(population_stdev(&[]).is_none());
            assert_eq!(mean(&[]), 0.0);
        }
    }
}

pub use expr::{Expr, ExprError, VarSource};
pub use grade::{Grade, Regime};
pub use ops::{Operation, OpParseError};
pub use topsis::{closeness, Distances, IdealSolution};
