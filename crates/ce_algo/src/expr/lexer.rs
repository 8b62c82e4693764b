//! crates/ce_algo/src/expr/lexer.rs
//! Tokenizer. Identifiers may contain any alphabetic character (including CJK)
//! plus digits and `_`, so field names like `人口` work unquoted.

use super::ExprError;

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Tok {
    Num(f64),
    Str(String),
    Ident(String),
    LParen,
    RParen,
    Comma,
    Question,
    Colon,
    Plus,
    Minus,
    Star,
    Slash,
    Bang,
    AndAnd,
    OrOr,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Tok {
    pub(crate) fn describe(&self) -> String {
        match self {
            Tok::Num(n) => format!("number {n}"),
            Tok::Str(s) => format!("string {s:?}"),
            Tok::Ident(s) => format!("identifier {s}"),
            Tok::LParen => "'('".into(),
            Tok::RParen => "')'".into(),
            Tok::Comma => "','".into(),
            Tok::Question => "'?'".into(),
            Tok::Colon => "':'".into(),
            Tok::Plus => "'+'".into(),
            Tok::Minus => "'-'".into(),
            Tok::Star => "'*'".into(),
            Tok::Slash => "'/'".into(),
            Tok::Bang => "'!'".into(),
            Tok::AndAnd => "'&&'".into(),
            Tok::OrOr => "'||'".into(),
            Tok::EqEq => "'=='".into(),
            Tok::NotEq => "'!='".into(),
            Tok::Lt => "'<'".into(),
            Tok::Le => "'<='".into(),
            Tok::Gt => "'>'".into(),
            Tok::Ge => "'>='".into(),
        }
    }
}

/// Token plus its byte offset in the source.
pub(crate) type Spanned = (usize, Tok);

pub(crate) fn tokenize(src: &str) -> Result<Vec<Spanned>, ExprError> {
    let mut out = Vec::new();
    let mut it = src.char_indices().peekable();

    while let Some(&(pos, ch)) = it.peek() {
        if ch.is_whitespace() {
            it.next();
            continue;
        }

        if ch.is_ascii_digit() || (ch == '.' && next_is_digit(src, pos)) {
            let mut end = pos;
            let mut seen_exp = false;
            while let Some(&(i, c)) = it.peek() {
                let accept = c.is_ascii_digit()
                    || c == '.'
                    || (!seen_exp && (c == 'e' || c == 'E'))
                    || ((c == '+' || c == '-') && matches!(src[..i].chars().last(), Some('e' | 'E')));
                if !accept {
                    break;
                }
                if c == 'e' || c == 'E' {
                    seen_exp = true;
                }
                end = i + c.len_utf8();
                it.next();
            }
            let text = &src[pos..end];
            let n: f64 = text
                .parse()
                .map_err(|_| ExprError::BadNumber { pos, text: text.to_string() })?;
            out.push((pos, Tok::Num(n)));
            continue;
        }

        if ch.is_alphabetic() || ch == '_' {
            let mut end = pos;
            while let Some(&(i, c)) = it.peek() {
                if c.is_alphanumeric() || c == '_' {
                    end = i + c.len_utf8();
                    it.next();
                } else {
                    break;
                }
            }
            out.push((pos, Tok::Ident(src[pos..end].to_string())));
            continue;
        }

        if ch == '"' || ch == '\'' {
            let quote = ch;
            it.next();
            let mut s = String::new();
            let mut closed = false;
            while let Some((_, c)) = it.next() {
                if c == quote {
                    closed = true;
                    break;
                }
                if c == '\\' {
                    match it.next() {
                        Some((_, 'n')) => s.push('\n'),
                        Some((_, 't')) => s.push('\t'),
                        Some((_, other)) => s.push(other),
                        None => break,
                    }
                } else {
                    s.push(c);
                }
            }
            if !closed {
                return Err(ExprError::UnterminatedString { pos });
            }
            out.push((pos, Tok::Str(s)));
            continue;
        }

        it.next();
        let two = |it: &mut core::iter::Peekable<core::str::CharIndices<'_>>, want: char| {
            if matches!(it.peek(), Some(&(_, c)) if c == want) {
                it.next();
                true
            } else {
                false
            }
        };
        let tok = match ch {
            '(' => Tok::LParen,
            ')' => Tok::RParen,
            ',' => Tok::Comma,
            '?' => Tok::Question,
            ':' => Tok::Colon,
            '+' => Tok::Plus,
            '-' => Tok::Minus,
            '*' => Tok::Star,
            '/' => Tok::Slash,
            '!' if two(&mut it, '=') => Tok::NotEq,
            '!' => Tok::Bang,
            '=' if two(&mut it, '=') => Tok::EqEq,
            '<' if two(&mut it, '=') => Tok::Le,
            '<' => Tok::Lt,
            '>' if two(&mut it, '=') => Tok::Ge,
            '>' => Tok::Gt,
            '&' if two(&mut it, '&') => Tok::AndAnd,
            '|' if two(&mut it, '|') => Tok::OrOr,
            _ => return Err(ExprError::UnexpectedChar { pos, ch }),
        };
        out.push((pos, tok));
    }

    Ok(out)
}

fn next_is_digit(src: &str, pos: usize) -> bool {
    src[pos + 1..].chars().next().is_some_and(|c| c.is_ascii_digit())
}
