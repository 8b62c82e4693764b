//! crates/ce_io/src/hasher.rs
//!
//! SHA-256 digests for inputs and artifacts.
//! - `sha256_canonical(..)` for JSON values/structs (goes through canonical_json),
//!   so key order in the source file never changes the digest.
//! - `sha256_hex(..)` / `sha256_file(..)` for raw bytes.
//! - Hex digests are lowercase.

#![forbid(unsafe_code)]

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::canonical_json::to_canonical_bytes;
use crate::IoError;

/// SHA-256 over raw bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// SHA-256 over the canonical JSON bytes of any serializable value.
pub fn sha256_canonical<T: Serialize>(value: &T) -> Result<String, IoError> {
    let bytes = to_canonical_bytes(value)?;
    Ok(sha256_hex(&bytes))
}

/// SHA-256 over a file's raw bytes, streamed.
pub fn sha256_file(path: &Path) -> Result<String, IoError> {
    let mut r = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = r.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// `RUN:<hex16>` built from the input digests in the given order.
pub fn run_id_from_digests(digests: &[&str]) -> String {
    let joined = digests.join(":");
    let hex = sha256_hex(joined.as_bytes());
    format!("RUN:{}", &hex[..16])
}
