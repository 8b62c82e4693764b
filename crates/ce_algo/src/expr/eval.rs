//! crates/ce_algo/src/expr/eval.rs
//! Tree-walking evaluator.
//!
//! Coercions:
//! - arithmetic and ordering want numbers; text is accepted when it has a
//!   numeric view (`"3.5"`, `是`, `否`), otherwise the operation fails
//! - `==`/`!=` compare as strings when both sides are text, else as numbers
//! - logical operators and conditions use truthiness and short-circuit
//! - comparison and logic results are `1.0` / `0.0`

use ce_core::Value;

use super::{BinOp, Expr, ExprError, Func, UnaryOp, VarSource};
use crate::stats;

pub fn eval(expr: &Expr, vars: &(impl VarSource + ?Sized)) -> Result<Value, ExprError> {
    match expr {
        Expr::Num(n) => Ok(Value::Number(*n)),
        Expr::Str(s) => Ok(Value::Text(s.clone())),
        Expr::Bool(b) => Ok(bool_num(*b)),
        Expr::Var(name) => vars
            .var(name)
            .cloned()
            .ok_or_else(|| ExprError::UnknownVariable(name.clone())),
        Expr::Unary(UnaryOp::Neg, e) => {
            let v = eval(e, vars)?;
            Ok(Value::Number(-num(&v, "-")?))
        }
        Expr::Unary(UnaryOp::Not, e) => Ok(bool_num(!eval(e, vars)?.is_truthy())),
        Expr::Binary(op, a, b) => binary(*op, a, b, vars),
        Expr::Ternary(c, a, b) => {
            if eval(c, vars)?.is_truthy() {
                eval(a, vars)
            } else {
                eval(b, vars)
            }
        }
        Expr::Call(func, args) => call(*func, args, vars),
    }
}

fn binary(op: BinOp, a: &Expr, b: &Expr, vars: &(impl VarSource + ?Sized)) -> Result<Value, ExprError> {
    match op {
        BinOp::And => {
            let l = eval(a, vars)?.is_truthy();
            return Ok(bool_num(l && eval(b, vars)?.is_truthy()));
        }
        BinOp::Or => {
            let l = eval(a, vars)?.is_truthy();
            return Ok(bool_num(l || eval(b, vars)?.is_truthy()));
        }
        _ => {}
    }

    let l = eval(a, vars)?;
    let r = eval(b, vars)?;
    let sym = op.symbol();

    if matches!(op, BinOp::Eq | BinOp::Ne) {
        let equal = match (&l, &r) {
            (Value::Text(x), Value::Text(y)) => x == y,
            _ => match (l.as_number(), r.as_number()) {
                (Some(x), Some(y)) => x == y,
                // a text with no numeric view never equals a number
                _ => false,
            },
        };
        return Ok(bool_num(if op == BinOp::Eq { equal } else { !equal }));
    }

    let x = num(&l, sym)?;
    let y = num(&r, sym)?;
    Ok(match op {
        BinOp::Lt => bool_num(x < y),
        BinOp::Le => bool_num(x <= y),
        BinOp::Gt => bool_num(x > y),
        BinOp::Ge => bool_num(x >= y),
        BinOp::Add => Value::Number(x + y),
        BinOp::Sub => Value::Number(x - y),
        BinOp::Mul => Value::Number(x * y),
        BinOp::Div => Value::Number(x / y),
        BinOp::And | BinOp::Or | BinOp::Eq | BinOp::Ne => unreachable!("handled above"),
    })
}

fn call(func: Func, args: &[Expr], vars: &(impl VarSource + ?Sized)) -> Result<Value, ExprError> {
    if func == Func::If {
        // arity is checked at parse time
        let branch = if eval(&args[0], vars)?.is_truthy() { &args[1] } else { &args[2] };
        return eval(branch, vars);
    }

    let values = args.iter().map(|a| eval(a, vars)).collect::<Result<Vec<_>, _>>()?;
    let name = func.name();

    let out = match func {
        // statistical functions skip values with no numeric view
        Func::Sum | Func::Average | Func::Stdev | Func::SumSq => {
            let xs: Vec<f64> = values.iter().filter_map(Value::as_number).collect();
            match func {
                Func::Sum => stats::sum(&xs),
                Func::Average => stats::mean(&xs),
                Func::Stdev => stats::sample_stdev(&xs).unwrap_or(0.0),
                _ => stats::sum_sq(&xs),
            }
        }
        Func::Sqrt => num(&values[0], name)?.sqrt(),
        Func::Abs => num(&values[0], name)?.abs(),
        Func::Pow => num(&values[0], name)?.powf(num(&values[1], name)?),
        Func::Max | Func::Min => {
            let mut acc = num(&values[0], name)?;
            for v in &values[1..] {
                let x = num(v, name)?;
                acc = if func == Func::Max { acc.max(x) } else { acc.min(x) };
            }
            acc
        }
        Func::If => unreachable!("handled above"),
    };
    Ok(Value::Number(out))
}

fn num(v: &Value, op: &'static str) -> Result<f64, ExprError> {
    v.as_number().ok_or_else(|| ExprError::TypeMismatch { op, found: format!("{v:?}") })
}

fn bool_num(b: bool) -> Value {
    Value::Number(if b { 1.0 } else { 0.0 })
}
