//! crates/ce_io/src/lib.rs
//! I/O crate for the engine.
//!
//! - Wire types for the three inputs: model (`model`), records (`records`),
//!   weights (`loader::WeightsDoc`).
//! - Local-file loading with size limits and input digests (`loader`).
//! - Canonical JSON and SHA-256 for written artifacts (`canonical_json`, `hasher`).
//!
//! The engine itself never touches the filesystem; this crate is the only
//! place that does.

#![forbid(unsafe_code)]

use thiserror::Error;

/// Unified error for ce_io.
#[derive(Debug, Error)]
pub enum IoError {
    /// Filesystem / path errors (open, read, create_dir_all, rename).
    #[error("io/path error: {0}")]
    Path(String),

    /// JSON parse / shape errors, with a JSON Pointer-ish location when known.
    #[error("json error at {pointer}: {msg}")]
    Json { pointer: String, msg: String },

    /// Hashing unavailable or failed.
    #[error("hash error: {0}")]
    Hash(String),

    /// Input violates a documented limit or invariant.
    #[error("invalid: {0}")]
    Invalid(String),
}

pub type IoResult<T> = Result<T, IoError>;

// ----- From conversions -----

impl From<std::io::Error> for IoError {
    fn from(e: std::io::Error) -> Self {
        IoError::Path(e.to_string())
    }
}

impl From<serde_json::Error> for IoError {
    fn from(e: serde_json::Error) -> Self {
        // serde_json reports line/column, not a pointer
        IoError::Json { pointer: format!("line {} col {}", e.line(), e.column()), msg: e.to_string() }
    }
}

pub mod canonical_json;
#[cfg(feature = "hash")]
pub mod hasher;
pub mod loader;
pub mod model;
pub mod records;

/// Canonical SHA-256 of `value`, or an error when hashing is compiled out.
pub fn try_sha256_canonical<T: serde::Serialize>(value: &T) -> IoResult<String> {
    #[cfg(feature = "hash")]
    {
        hasher::sha256_canonical(value)
    }
    #[cfg(not(feature = "hash"))]
    {
        let _ = value;
        Err(IoError::Hash("hash feature disabled".into()))
    }
}

/// True if `s` looks like a URL (any `<scheme>://`, including `file://`).
#[inline]
pub fn looks_like_url_strict(s: &str) -> bool {
    s.trim().contains("://")
}

pub mod prelude {
    pub use crate::canonical_json::{to_canonical_bytes, write_canonical_file};
    #[cfg(feature = "hash")]
    pub use crate::hasher::{sha256_canonical, sha256_hex};
    pub use crate::loader::{load_inputs, LoadedInputs};
    pub use crate::model::{ModelDoc, OperationDoc, StepDoc, StepKindDoc};
    pub use crate::records::{IndicatorRecord, RecordSet};
    pub use crate::{looks_like_url_strict, try_sha256_canonical, IoError, IoResult};
}
