//! crates/ce_algo/src/expr/mod.rs
//! Formula language for generic operations.
//!
//! Grammar (lowest → highest precedence):
//!
//! ```text
//! expr    := or ( '?' expr ':' expr )?
//! or      := and ( '||' and )*
//! and     := eq ( '&&' eq )*
//! eq      := cmp ( ('==' | '!=') cmp )*
//! cmp     := add ( ('<' | '<=' | '>' | '>=') add )*
//! add     := mul ( ('+' | '-') mul )*
//! mul     := unary ( ('*' | '/') unary )*
//! unary   := ('-' | '!') unary | primary
//! primary := number | string | true | false | ident | ident '(' args ')' | '(' expr ')'
//! ```
//!
//! Functions: SUM, AVERAGE, STDEV, SUMSQ, IF, SQRT, POW, ABS, MAX, MIN
//! (case-insensitive). Sources are parsed once into an [`Expr`] and evaluated
//! many times against a [`VarSource`].

use core::fmt;

use ce_core::{RegionContext, Value};

mod eval;
mod lexer;
mod parser;

pub use eval::eval;
pub use parser::parse;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
}

impl BinOp {
    pub(crate) fn precedence(self) -> u8 {
        match self {
            BinOp::Or => 1,
            BinOp::And => 2,
            BinOp::Eq | BinOp::Ne => 3,
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => 4,
            BinOp::Add | BinOp::Sub => 5,
            BinOp::Mul | BinOp::Div => 6,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Or => "||",
            BinOp::And => "&&",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Func {
    Sum,
    Average,
    Stdev,
    SumSq,
    If,
    Sqrt,
    Pow,
    Abs,
    Max,
    Min,
}

impl Func {
    pub fn from_name(name: &str) -> Option<Func> {
        Some(match name.to_ascii_uppercase().as_str() {
            "SUM" => Func::Sum,
            "AVERAGE" => Func::Average,
            "STDEV" => Func::Stdev,
            "SUMSQ" => Func::SumSq,
            "IF" => Func::If,
            "SQRT" => Func::Sqrt,
            "POW" => Func::Pow,
            "ABS" => Func::Abs,
            "MAX" => Func::Max,
            "MIN" => Func::Min,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Func::Sum => "SUM",
            Func::Average => "AVERAGE",
            Func::Stdev => "STDEV",
            Func::SumSq => "SUMSQ",
            Func::If => "IF",
            Func::Sqrt => "SQRT",
            Func::Pow => "POW",
            Func::Abs => "ABS",
            Func::Max => "MAX",
            Func::Min => "MIN",
        }
    }

    /// Accepted argument counts as (min, max); `None` max means variadic.
    pub(crate) fn arity(self) -> (usize, Option<usize>) {
        match self {
            Func::Sum | Func::Average | Func::Stdev | Func::SumSq => (0, None),
            Func::If => (3, Some(3)),
            Func::Sqrt | Func::Abs => (1, Some(1)),
            Func::Pow => (2, Some(2)),
            Func::Max | Func::Min => (1, None),
        }
    }
}

/// Parsed formula.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Num(f64),
    Str(String),
    Bool(bool),
    Var(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    Call(Func, Vec<Expr>),
}

impl Expr {
    /// The variable name when the whole expression is a bare variable.
    pub fn as_var(&self) -> Option<&str> {
        match self {
            Expr::Var(v) => Some(v),
            _ => None,
        }
    }

    /// All variable names referenced, in first-seen order, deduplicated.
    pub fn variables(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        self.collect_vars(&mut out);
        out
    }

    fn collect_vars<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Var(v) => {
                if !out.contains(&v.as_str()) {
                    out.push(v);
                }
            }
            Expr::Unary(_, e) => e.collect_vars(out),
            Expr::Binary(_, a, b) => {
                a.collect_vars(out);
                b.collect_vars(out);
            }
            Expr::Ternary(c, a, b) => {
                c.collect_vars(out);
                a.collect_vars(out);
                b.collect_vars(out);
            }
            Expr::Call(_, args) => args.iter().for_each(|a| a.collect_vars(out)),
            Expr::Num(_) | Expr::Str(_) | Expr::Bool(_) => {}
        }
    }
}

/// Variable lookup seam for evaluation and per-region reads.
pub trait VarSource {
    fn var(&self, name: &str) -> Option<&Value>;

    /// Numeric view of `name`; `None` when absent or not coercible.
    fn number(&self, name: &str) -> Option<f64> {
        self.var(name).and_then(Value::as_number)
    }
}

impl VarSource for RegionContext {
    fn var(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

impl VarSource for std::collections::BTreeMap<String, Value> {
    fn var(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

/// Parse or evaluation failure. Positions are byte offsets into the source.
#[derive(Clone, Debug, PartialEq)]
pub enum ExprError {
    Empty,
    UnexpectedChar { pos: usize, ch: char },
    UnterminatedString { pos: usize },
    BadNumber { pos: usize, text: String },
    UnexpectedToken { pos: usize, found: String, expected: &'static str },
    UnexpectedEnd { expected: &'static str },
    UnknownFunction { pos: usize, name: String },
    Arity { func: &'static str, found: usize },
    /// Nesting (parentheses, unary chains, operator chains) past the parser's limit.
    TooDeep { limit: usize },
    UnknownVariable(String),
    TypeMismatch { op: &'static str, found: String },
}

impl fmt::Display for ExprError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ExprError::*;
        match self {
            Empty => write!(f, "empty expression"),
            UnexpectedChar { pos, ch } => write!(f, "unexpected character {ch:?} at {pos}"),
            UnterminatedString { pos } => write!(f, "unterminated string starting at {pos}"),
            BadNumber { pos, text } => write!(f, "malformed number {text:?} at {pos}"),
            UnexpectedToken { pos, found, expected } => {
                write!(f, "expected {expected} at {pos}, found {found}")
            }
            UnexpectedEnd { expected } => write!(f, "expected {expected}, found end of input"),
            UnknownFunction { pos, name } => write!(f, "unknown function {name} at {pos}"),
            Arity { func, found } => write!(f, "wrong number of arguments to {func}: {found}"),
            TooDeep { limit } => write!(f, "expression nested deeper than {limit} levels"),
            UnknownVariable(v) => write!(f, "unknown variable {v}"),
            TypeMismatch { op, found } => write!(f, "operator {op} cannot take {found}"),
        }
    }
}

impl std::error::Error for ExprError {}

/// Parse then evaluate (test and one-off convenience).
pub fn eval_str(src: &str, vars: &dyn VarSource) -> Result<Value, ExprError> {
    let e = parse(src)?;
    eval(&e, vars)
}
