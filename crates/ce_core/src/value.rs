//! crates/ce_core/src/value.rs
//! Context values: every variable is either a number (always `f64`) or text.
//!
//! Boolean and categorical indicators are carried as canonical text tokens
//! (`是` / `否`) and coerce to `1.0` / `0.0` wherever a number is expected.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Canonical truthy token written for booleans and yes-like categories.
pub const YES: &str = "是";
/// Canonical falsy token.
pub const NO: &str = "否";

const TRUTHY: &[&str] = &["是", "有", "true", "yes", "y", "1"];
const FALSY: &[&str] = &["否", "无", "false", "no", "n", "0", ""];

/// Classify a text token as truthy / falsy; `None` for anything else.
pub fn truthy_token(s: &str) -> Option<bool> {
    let t = s.trim().to_lowercase();
    if TRUTHY.contains(&t.as_str()) {
        Some(true)
    } else if FALSY.contains(&t.as_str()) {
        Some(false)
    } else {
        None
    }
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum Value {
    Number(f64),
    Text(String),
}

impl Value {
    /// Numeric view.
    ///
    /// Text coerces when it parses as a number or is a truthy/falsy token;
    /// other text has no numeric view.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Text(s) => {
                if let Ok(n) = s.trim().parse::<f64>() {
                    return Some(n);
                }
                truthy_token(s).map(|b| if b { 1.0 } else { 0.0 })
            }
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            Value::Number(_) => None,
        }
    }

    /// Condition semantics: non-zero numbers and truthy tokens are true.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Text(s) => truthy_token(s).unwrap_or(!s.is_empty()),
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Number(_))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Number(v as f64)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Text(if v { YES } else { NO }.to_string())
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{n}"),
            Value::Text(s) => f.write_str(s),
        }
    }
}
