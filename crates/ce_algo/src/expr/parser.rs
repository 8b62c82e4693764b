//! crates/ce_algo/src/expr/parser.rs
//! Precedence-climbing parser over the token stream.

use super::lexer::{tokenize, Spanned, Tok};
use super::{BinOp, Expr, ExprError, Func, UnaryOp};

/// Bound on parse recursion plus operator-chain length, which also bounds
/// the depth of the tree evaluation walks.
pub const MAX_DEPTH: usize = 256;

/// Parse a formula source into an [`Expr`]. Function arity is checked here so
/// evaluation never sees a malformed call.
pub fn parse(src: &str) -> Result<Expr, ExprError> {
    let toks = tokenize(src)?;
    if toks.is_empty() {
        return Err(ExprError::Empty);
    }
    let mut p = Parser { toks, at: 0, depth: 0 };
    let e = p.ternary()?;
    match p.peek() {
        None => Ok(e),
        Some((pos, t)) => Err(ExprError::UnexpectedToken {
            pos: *pos,
            found: t.describe(),
            expected: "end of expression",
        }),
    }
}

struct Parser {
    toks: Vec<Spanned>,
    at: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Spanned> {
        self.toks.get(self.at)
    }

    fn bump(&mut self) -> Option<Spanned> {
        let t = self.toks.get(self.at).cloned();
        if t.is_some() {
            self.at += 1;
        }
        t
    }

    fn eat(&mut self, want: &Tok) -> bool {
        if matches!(self.peek(), Some((_, t)) if t == want) {
            self.at += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, want: Tok, expected: &'static str) -> Result<(), ExprError> {
        match self.bump() {
            Some((_, t)) if t == want => Ok(()),
            Some((pos, t)) => Err(ExprError::UnexpectedToken { pos, found: t.describe(), expected }),
            None => Err(ExprError::UnexpectedEnd { expected }),
        }
    }

    /// One level deeper. Callers undo it on success; an error ends the parse.
    fn nest(&mut self) -> Result<(), ExprError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ExprError::TooDeep { limit: MAX_DEPTH });
        }
        Ok(())
    }

    fn ternary(&mut self) -> Result<Expr, ExprError> {
        self.nest()?;
        let cond = self.binary(1)?;
        let e = if self.eat(&Tok::Question) {
            let then = self.ternary()?;
            self.expect(Tok::Colon, "':'")?;
            let otherwise = self.ternary()?;
            Expr::Ternary(Box::new(cond), Box::new(then), Box::new(otherwise))
        } else {
            cond
        };
        self.depth -= 1;
        Ok(e)
    }

    /// Left-associative binary operators at or above `min_prec`.
    fn binary(&mut self, min_prec: u8) -> Result<Expr, ExprError> {
        let mut lhs = self.unary()?;
        // each link of a chain deepens the left spine by one
        let mut links = 0;
        while let Some(op) = self.peek().and_then(|(_, t)| bin_op(t)) {
            let prec = op.precedence();
            if prec < min_prec {
                break;
            }
            self.nest()?;
            links += 1;
            self.at += 1;
            let rhs = self.binary(prec + 1)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        self.depth -= links;
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ExprError> {
        let op = if self.eat(&Tok::Minus) {
            Some(UnaryOp::Neg)
        } else if self.eat(&Tok::Bang) {
            Some(UnaryOp::Not)
        } else if self.eat(&Tok::Plus) {
            None
        } else {
            return self.primary();
        };
        self.nest()?;
        let inner = self.unary()?;
        self.depth -= 1;
        Ok(match op {
            Some(op) => Expr::Unary(op, Box::new(inner)),
            None => inner,
        })
    }

    fn primary(&mut self) -> Result<Expr, ExprError> {
        const WHAT: &str = "a value";
        let (pos, tok) = self.bump().ok_or(ExprError::UnexpectedEnd { expected: WHAT })?;
        match tok {
            Tok::Num(n) => Ok(Expr::Num(n)),
            Tok::Str(s) => Ok(Expr::Str(s)),
            Tok::LParen => {
                let e = self.ternary()?;
                self.expect(Tok::RParen, "')'")?;
                Ok(e)
            }
            Tok::Ident(name) => {
                if self.eat(&Tok::LParen) {
                    let func = Func::from_name(&name)
                        .ok_or(ExprError::UnknownFunction { pos, name: name.clone() })?;
                    let args = self.args()?;
                    check_arity(func, args.len())?;
                    return Ok(Expr::Call(func, args));
                }
                match name.as_str() {
                    "true" | "TRUE" => Ok(Expr::Bool(true)),
                    "false" | "FALSE" => Ok(Expr::Bool(false)),
                    _ => Ok(Expr::Var(name)),
                }
            }
            other => Err(ExprError::UnexpectedToken { pos, found: other.describe(), expected: WHAT }),
        }
    }

    fn args(&mut self) -> Result<Vec<Expr>, ExprError> {
        let mut args = Vec::new();
        if self.eat(&Tok::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.ternary()?);
            if self.eat(&Tok::Comma) {
                continue;
            }
            self.expect(Tok::RParen, "',' or ')'")?;
            return Ok(args);
        }
    }
}

fn bin_op(t: &Tok) -> Option<BinOp> {
    Some(match t {
        Tok::OrOr => BinOp::Or,
        Tok::AndAnd => BinOp::And,
        Tok::EqEq => BinOp::Eq,
        Tok::NotEq => BinOp::Ne,
        Tok::Lt => BinOp::Lt,
        Tok::Le => BinOp::Le,
        Tok::Gt => BinOp::Gt,
        Tok::Ge => BinOp::Ge,
        Tok::Plus => BinOp::Add,
        Tok::Minus => BinOp::Sub,
        Tok::Star => BinOp::Mul,
        Tok::Slash => BinOp::Div,
        _ => return None,
    })
}

fn check_arity(func: Func, found: usize) -> Result<(), ExprError> {
    let (min, max) = func.arity();
    if found < min || max.is_some_and(|m| found > m) {
        return Err(ExprError::Arity { func: func.name(), found });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(s: &str) -> Box<Expr> {
        Box::new(Expr::Var(s.into()))
    }

    #[test]
    fn precedence_and_associativity() {
        let e = parse("a - b - c * d").unwrap();
        let expected = Expr::Binary(
            BinOp::Sub,
            Box::new(Expr::Binary(BinOp::Sub, var("a"), var("b"))),
            Box::new(Expr::Binary(BinOp::Mul, var("c"), var("d"))),
        );
        assert_eq!(e, expected);
    }

    #[test]
    fn ternary_is_right_associative() {
        let e = parse("a ? b : c ? d : e").unwrap();
        match e {
            Expr::Ternary(_, _, otherwise) => assert!(matches!(*otherwise, Expr::Ternary(..))),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn comparison_binds_tighter_than_logic() {
        let e = parse("x > 1 && y == 'a'").unwrap();
        assert!(matches!(e, Expr::Binary(BinOp::And, _, _)));
    }

    #[test]
    fn function_names_are_case_insensitive() {
        assert!(matches!(parse("sqrt(4)").unwrap(), Expr::Call(Func::Sqrt, _)));
        assert!(matches!(parse("Average(a, b)").unwrap(), Expr::Call(Func::Average, _)));
    }

    #[test]
    fn arity_and_unknowns_are_rejected() {
        assert!(matches!(parse("POW(2)"), Err(ExprError::Arity { func: "POW", found: 1 })));
        assert!(matches!(parse("IF(a, b)"), Err(ExprError::Arity { .. })));
        assert!(matches!(parse("FOO(1)"), Err(ExprError::UnknownFunction { .. })));
        assert!(matches!(parse("(a + b"), Err(ExprError::UnexpectedEnd { .. })));
        assert!(matches!(parse("a b"), Err(ExprError::UnexpectedToken { .. })));
        assert_eq!(parse("   "), Err(ExprError::Empty));
    }

    #[test]
    fn runaway_nesting_is_an_error() {
        let parens = format!("{}x{}", "(".repeat(10_000), ")".repeat(10_000));
        assert_eq!(parse(&parens), Err(ExprError::TooDeep { limit: MAX_DEPTH }));
        assert_eq!(parse(&"-".repeat(10_000)), Err(ExprError::TooDeep { limit: MAX_DEPTH }));
        let chain = vec!["a"; 10_000].join(" + ");
        assert_eq!(parse(&chain), Err(ExprError::TooDeep { limit: MAX_DEPTH }));

        // moderate nesting still parses
        let ok = format!("{}x{}", "(".repeat(100), ")".repeat(100));
        assert_eq!(parse(&ok).unwrap().as_var(), Some("x"));
        assert!(parse(&vec!["a"; 200].join(" + ")).is_ok());
    }

    #[test]
    fn collects_variables_once() {
        let e = parse("a + b * a / SUM(c, b)").unwrap();
        assert_eq!(e.variables(), vec!["a", "b", "c"]);
        assert_eq!(parse("score").unwrap().as_var(), Some("score"));
    }
}
