//! crates/ce_algo/src/ops.rs
//! Typed operation kinds.
//!
//! Wire sources are either a formula (`a + b`) or a marker of the form
//! `@MARKER:params`. They are parsed once, when a model plan is compiled,
//! and dispatched by `match` afterwards.

use core::fmt;

use ce_core::ids::is_valid_identifier;

use crate::expr::{self, Expr, ExprError};

#[derive(Clone, Debug, PartialEq)]
pub enum Operation {
    /// Generic formula evaluated against the region's own context.
    Expression(Expr),
    /// Unit-vector projection of one indicator across regions.
    Normalize { indicator: String },
    /// Distance to the positive ideal over the listed indicators.
    TopsisPositive { indicators: Vec<String> },
    /// Distance to the negative ideal over the listed indicators.
    TopsisNegative { indicators: Vec<String> },
    /// Both distances plus the composite, written as three outputs.
    Topsis { indicators: Vec<String> },
    /// Composite from two distance fields already present on the region.
    TopsisScore { positive: String, negative: String },
    /// Mean/stdev banding of `field` across regions.
    Grade { field: String },
}

#[derive(Clone, Debug, PartialEq)]
pub enum OpParseError {
    UnknownMarker(String),
    MissingOperand(&'static str),
    BadOperand { marker: &'static str, operand: String },
    DuplicateOperand { marker: &'static str, operand: String },
    WrongOperandCount { marker: &'static str, expected: usize, found: usize },
    Expression(ExprError),
}

impl fmt::Display for OpParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpParseError::UnknownMarker(m) => write!(f, "unknown marker @{m}"),
            OpParseError::MissingOperand(m) => write!(f, "@{m} requires an operand"),
            OpParseError::BadOperand { marker, operand } => {
                write!(f, "@{marker}: invalid operand {operand:?}")
            }
            OpParseError::DuplicateOperand { marker, operand } => {
                write!(f, "@{marker}: operand {operand} listed twice")
            }
            OpParseError::WrongOperandCount { marker, expected, found } => {
                write!(f, "@{marker}: expected {expected} operands, found {found}")
            }
            OpParseError::Expression(e) => write!(f, "expression: {e}"),
        }
    }
}

impl std::error::Error for OpParseError {}

impl From<ExprError> for OpParseError {
    fn from(e: ExprError) -> Self {
        OpParseError::Expression(e)
    }
}

impl Operation {
    pub fn parse(src: &str) -> Result<Operation, OpParseError> {
        let src = src.trim();
        let Some(marker) = src.strip_prefix('@') else {
            return Ok(Operation::Expression(expr::parse(src)?));
        };

        let (name, params) = match marker.split_once(':') {
            Some((n, p)) => (n.trim(), p.trim()),
            None => (marker.trim(), ""),
        };

        match name.to_ascii_uppercase().as_str() {
            "NORMALIZE" => {
                let [indicator] = fixed::<1>("NORMALIZE", params)?;
                Ok(Operation::Normalize { indicator })
            }
            "TOPSIS_POSITIVE" => Ok(Operation::TopsisPositive {
                indicators: list("TOPSIS_POSITIVE", params)?,
            }),
            "TOPSIS_NEGATIVE" => Ok(Operation::TopsisNegative {
                indicators: list("TOPSIS_NEGATIVE", params)?,
            }),
            "TOPSIS" => Ok(Operation::Topsis { indicators: list("TOPSIS", params)? }),
            "TOPSIS_SCORE" => {
                let [positive, negative] = fixed::<2>("TOPSIS_SCORE", params)?;
                Ok(Operation::TopsisScore { positive, negative })
            }
            "GRADE" => {
                let [field] = fixed::<1>("GRADE", params)?;
                Ok(Operation::Grade { field })
            }
            _ => Err(OpParseError::UnknownMarker(name.to_string())),
        }
    }

    /// GRADE runs after every other operation of its step has finished.
    pub fn is_rank(&self) -> bool {
        matches!(self, Operation::Grade { .. })
    }

    /// Reads other regions' values.
    pub fn is_cross_region(&self) -> bool {
        matches!(
            self,
            Operation::Normalize { .. }
                | Operation::TopsisPositive { .. }
                | Operation::TopsisNegative { .. }
                | Operation::Topsis { .. }
                | Operation::Grade { .. }
        )
    }

    pub fn kind_label(&self) -> &'static str {
        match self {
            Operation::Expression(_) => "expression",
            Operation::Normalize { .. } => "NORMALIZE",
            Operation::TopsisPositive { .. } => "TOPSIS_POSITIVE",
            Operation::TopsisNegative { .. } => "TOPSIS_NEGATIVE",
            Operation::Topsis { .. } => "TOPSIS",
            Operation::TopsisScore { .. } => "TOPSIS_SCORE",
            Operation::Grade { .. } => "GRADE",
        }
    }

    /// Variables this operation reads from the current region.
    pub fn inputs(&self) -> Vec<&str> {
        match self {
            Operation::Expression(e) => e.variables(),
            Operation::Normalize { indicator } => vec![indicator.as_str()],
            Operation::TopsisPositive { indicators }
            | Operation::TopsisNegative { indicators }
            | Operation::Topsis { indicators } => indicators.iter().map(String::as_str).collect(),
            Operation::TopsisScore { positive, negative } => vec![positive.as_str(), negative.as_str()],
            Operation::Grade { field } => vec![field.as_str()],
        }
    }
}

// ----- operand lists -----

fn list(marker: &'static str, params: &str) -> Result<Vec<String>, OpParseError> {
    if params.is_empty() {
        return Err(OpParseError::MissingOperand(marker));
    }
    let mut out: Vec<String> = Vec::new();
    for raw in params.split(',') {
        let operand = raw.trim();
        if !is_valid_identifier(operand) {
            return Err(OpParseError::BadOperand { marker, operand: operand.to_string() });
        }
        if out.iter().any(|o| o == operand) {
            return Err(OpParseError::DuplicateOperand { marker, operand: operand.to_string() });
        }
        out.push(operand.to_string());
    }
    Ok(out)
}

fn fixed<const N: usize>(marker: &'static str, params: &str) -> Result<[String; N], OpParseError> {
    let items = list(marker, params)?;
    let found = items.len();
    items
        .try_into()
        .map_err(|_| OpParseError::WrongOperandCount { marker, expected: N, found })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_markers() {
        assert_eq!(
            Operation::parse("@NORMALIZE:teamSize").unwrap(),
            Operation::Normalize { indicator: "teamSize".into() }
        );
        assert_eq!(
            Operation::parse(" @TOPSIS_POSITIVE: a, b ,c ").unwrap(),
            Operation::TopsisPositive { indicators: vec!["a".into(), "b".into(), "c".into()] }
        );
        assert_eq!(
            Operation::parse("@topsis_score:p,n").unwrap(),
            Operation::TopsisScore { positive: "p".into(), negative: "n".into() }
        );
        let g = Operation::parse("@GRADE:score").unwrap();
        assert!(g.is_rank());
        assert!(g.is_cross_region());
        assert_eq!(g.kind_label(), "GRADE");
    }

    #[test]
    fn expressions_are_parsed_once() {
        let op = Operation::parse("a / (b + 1)").unwrap();
        assert!(matches!(op, Operation::Expression(_)));
        assert!(!op.is_rank());
        assert!(!op.is_cross_region());
        assert_eq!(op.inputs(), vec!["a", "b"]);
    }

    #[test]
    fn rejects_malformed_markers() {
        assert_eq!(
            Operation::parse("@RANK:x"),
            Err(OpParseError::UnknownMarker("RANK".into()))
        );
        assert_eq!(Operation::parse("@NORMALIZE"), Err(OpParseError::MissingOperand("NORMALIZE")));
        assert!(matches!(
            Operation::parse("@NORMALIZE:a,b"),
            Err(OpParseError::WrongOperandCount { expected: 1, found: 2, .. })
        ));
        assert!(matches!(
            Operation::parse("@TOPSIS:a,,b"),
            Err(OpParseError::BadOperand { .. })
        ));
        assert!(matches!(
            Operation::parse("@TOPSIS:a,b,a"),
            Err(OpParseError::DuplicateOperand { .. })
        ));
        assert!(matches!(Operation::parse("a +"), Err(OpParseError::Expression(_))));
    }
}
