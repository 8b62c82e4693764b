//! crates/ce_core/src/ids.rs
//! Region, step and output identifiers. Strict shapes, no I/O.
//!
//! - `StepCode`: ASCII token `^[A-Za-z0-9_.:-]{1,64}$`
//! - `RegionCode`: 1..=128 chars, no whitespace or control chars (township
//!   names used in synthetic parent codes may be non-ASCII)
//! - `OutputName`: an identifier the expression language can reference
//!   (Unicode alphanumerics and `_`, not starting with a digit)

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::errors::CoreError;

const TOKEN_MAX_LEN: usize = 64;
const REGION_MAX_CHARS: usize = 128;

/// Token for StepCode: ^[A-Za-z0-9_.:-]{1,64}$ (ASCII only)
#[inline]
pub fn is_valid_token(s: &str) -> bool {
    let len = s.len();
    if len == 0 || len > TOKEN_MAX_LEN {
        return false;
    }
    s.bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b':' | b'-'))
}

#[inline]
pub fn is_valid_region_code(s: &str) -> bool {
    let n = s.chars().count();
    (1..=REGION_MAX_CHARS).contains(&n) && !s.chars().any(|c| c.is_whitespace() || c.is_control())
}

/// Identifier usable as a variable in expressions.
#[inline]
pub fn is_valid_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}

macro_rules! simple_string_newtype {
    ($(#[$m:meta])* $name:ident, $check:path, $err:path) => {
        $(#[$m])*
        #[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
        #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
        #[cfg_attr(feature = "serde", serde(try_from = "String", into = "String"))]
        pub struct $name(String);

        impl $name {
            #[inline] pub fn as_str(&self) -> &str { &self.0 }
        }

        impl fmt::Display for $name {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
        }

        impl FromStr for $name {
            type Err = CoreError;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                if $check(s) { Ok(Self(s.to_owned())) } else { Err($err(s.to_owned())) }
            }
        }

        impl TryFrom<String> for $name {
            type Error = CoreError;
            fn try_from(s: String) -> Result<Self, Self::Error> {
                if $check(&s) { Ok(Self(s)) } else { Err($err(s)) }
            }
        }

        impl TryFrom<&str> for $name {
            type Error = CoreError;
            #[inline]
            fn try_from(value: &str) -> Result<Self, Self::Error> { value.parse() }
        }

        impl From<$name> for String {
            #[inline]
            fn from(v: $name) -> String { v.0 }
        }

        impl AsRef<str> for $name {
            #[inline]
            fn as_ref(&self) -> &str { &self.0 }
        }
    };
}

simple_string_newtype!(
    /// Administrative region identifier (raw region code or synthetic parent code).
    RegionCode, is_valid_region_code, CoreError::InvalidRegionCode
);
simple_string_newtype!(
    /// Step code as configured on the model.
    StepCode, is_valid_token, CoreError::InvalidStepCode
);
simple_string_newtype!(
    /// Name of a variable written by an operation.
    OutputName, is_valid_identifier, CoreError::InvalidOutputName
);

impl RegionCode {
    /// Synthetic parent code for an aggregation group, e.g. `TOWNSHIP_<name>`.
    ///
    /// Whitespace inside the group name is replaced by `_` so the result stays
    /// a valid code.
    pub fn parent(prefix: &str, group: &str) -> Result<Self, CoreError> {
        let cleaned: String = group
            .trim()
            .chars()
            .map(|c| if c.is_whitespace() { '_' } else { c })
            .collect();
        format!("{prefix}{cleaned}").parse()
    }
}

impl OutputName {
    /// Derived name `<self><suffix>` (used for `_positive` / `_negative`).
    pub fn with_suffix(&self, suffix: &str) -> OutputName {
        // suffixes are literal identifier tails
        OutputName(format!("{}{}", self.0, suffix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_tokens() {
        assert!("STEP_1".parse::<StepCode>().is_ok());
        assert!("a.b:c-d".parse::<StepCode>().is_ok());
        assert!("".parse::<StepCode>().is_err());
        assert!("has space".parse::<StepCode>().is_err());
        assert!("x".repeat(65).parse::<StepCode>().is_err());
    }

    #[test]
    fn region_codes_allow_non_ascii_parents() {
        let p = RegionCode::parent("TOWNSHIP_", "瑞峰镇").unwrap();
        assert_eq!(p.as_str(), "TOWNSHIP_瑞峰镇");
        let spaced = RegionCode::parent("TOWNSHIP_", " a b ").unwrap();
        assert_eq!(spaced.as_str(), "TOWNSHIP_a_b");
        assert!("511425108".parse::<RegionCode>().is_ok());
        assert!("bad code".parse::<RegionCode>().is_err());
    }

    #[test]
    fn output_names_are_identifiers() {
        assert!("score_1".parse::<OutputName>().is_ok());
        assert!("综合能力".parse::<OutputName>().is_ok());
        assert!("_hidden".parse::<OutputName>().is_ok());
        assert!("1abc".parse::<OutputName>().is_err());
        assert!("a-b".parse::<OutputName>().is_err());
        let n: OutputName = "cap".parse().unwrap();
        assert_eq!(n.with_suffix("_positive").as_str(), "cap_positive");
    }
}
