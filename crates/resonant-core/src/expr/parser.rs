#![forbid(unsafe_code)]

//! Lexer and precedence-climbing parser for view expressions.

use super::{BinaryOp, Expr, UnaryOp};
use crate::error::ExprError;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Punct(&'static str),
}

/// Longest operators first so `===` wins over `==`.
const PUNCTUATION: &[&str] = &[
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "(", ")", "[", "]", ".", "?", ":", "!",
    "-", "+", "*", "/", "%", "<", ">", ",",
];

fn lex(source: &str) -> Result<Vec<(usize, Token)>, ExprError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let c = bytes[pos];
        if c.is_ascii_whitespace() {
            pos += 1;
            continue;
        }
        let start = pos;

        if c.is_ascii_digit() || (c == b'.' && bytes.get(pos + 1).is_some_and(u8::is_ascii_digit)) {
            while pos < bytes.len() && (bytes[pos].is_ascii_digit() || bytes[pos] == b'.') {
                pos += 1;
            }
            let text = &source[start..pos];
            let n = text
                .parse::<f64>()
                .map_err(|_| ExprError::parse(start, format!("bad number literal {text:?}")))?;
            tokens.push((start, Token::Number(n)));
            continue;
        }

        if c == b'\'' || c == b'"' {
            let quote = c;
            pos += 1;
            let mut out = String::new();
            loop {
                let Some(&b) = bytes.get(pos) else {
                    return Err(ExprError::parse(start, "unterminated string"));
                };
                if b == quote {
                    pos += 1;
                    break;
                }
                if b == b'\\' {
                    let Some(escaped) = source.get(pos + 1..).and_then(|s| s.chars().next())
                    else {
                        return Err(ExprError::parse(pos, "dangling escape"));
                    };
                    out.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        other => other,
                    });
                    pos += 1 + escaped.len_utf8();
                    continue;
                }
                // Copy one whole UTF-8 scalar.
                let ch = source
                    .get(pos..)
                    .and_then(|s| s.chars().next())
                    .ok_or_else(|| ExprError::parse(pos, "invalid character"))?;
                out.push(ch);
                pos += ch.len_utf8();
            }
            tokens.push((start, Token::Str(out)));
            continue;
        }

        if c.is_ascii_alphabetic() || c == b'_' || c == b'$' {
            while pos < bytes.len()
                && (bytes[pos].is_ascii_alphanumeric() || bytes[pos] == b'_' || bytes[pos] == b'$')
            {
                pos += 1;
            }
            tokens.push((start, Token::Ident(source[start..pos].to_owned())));
            continue;
        }

        let rest = &source[pos..];
        match PUNCTUATION.iter().find(|p| rest.starts_with(**p)) {
            Some(p) => {
                tokens.push((start, Token::Punct(p)));
                pos += p.len();
            }
            None => {
                return Err(ExprError::parse(
                    start,
                    format!("unexpected character {:?}", rest.chars().next().unwrap_or('?')),
                ));
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    end: usize,
}

/// Parse a complete expression.
pub fn parse(source: &str) -> Result<Expr, ExprError> {
    let tokens = lex(source)?;
    if tokens.is_empty() {
        return Err(ExprError::parse(0, "empty expression"));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: source.len(),
    };
    let expr = parser.conditional()?;
    match parser.tokens.get(parser.pos) {
        None => Ok(expr),
        Some((at, tok)) => Err(ExprError::parse(*at, format!("unexpected {tok:?}"))),
    }
}

impl Parser {
    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |(at, _)| *at)
    }

    fn peek_punct(&self) -> Option<&'static str> {
        match self.tokens.get(self.pos) {
            Some((_, Token::Punct(p))) => Some(p),
            _ => None,
        }
    }

    fn eat(&mut self, punct: &str) -> bool {
        if self.peek_punct() == Some(punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, punct: &str) -> Result<(), ExprError> {
        if self.eat(punct) {
            Ok(())
        } else {
            Err(ExprError::parse(self.offset(), format!("expected `{punct}`")))
        }
    }

    fn conditional(&mut self) -> Result<Expr, ExprError> {
        let cond = self.binary(0)?;
        if !self.eat("?") {
            return Ok(cond);
        }
        let then = self.conditional()?;
        self.expect(":")?;
        let otherwise = self.conditional()?;
        Ok(Expr::Conditional(
            Box::new(cond),
            Box::new(then),
            Box::new(otherwise),
        ))
    }

    fn binary(&mut self, min_prec: u8) -> Result<Expr, ExprError> {
        let mut lhs = self.unary()?;
        while let Some(op) = self.peek_punct().and_then(BinaryOp::from_punct) {
            let prec = op.precedence();
            if prec < min_prec {
                break;
            }
            self.pos += 1;
            let rhs = self.binary(prec + 1)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ExprError> {
        if self.eat("!") {
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(self.unary()?)));
        }
        if self.eat("-") {
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.unary()?)));
        }
        if self.eat("+") {
            return Ok(Expr::Unary(UnaryOp::Plus, Box::new(self.unary()?)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, ExprError> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(".") {
                match self.tokens.get(self.pos).cloned() {
                    Some((_, Token::Ident(name))) => {
                        self.pos += 1;
                        expr = Expr::Member(Box::new(expr), name);
                    }
                    _ => {
                        return Err(ExprError::parse(self.offset(), "expected property name"));
                    }
                }
            } else if self.eat("[") {
                let index = self.conditional()?;
                self.expect("]")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, ExprError> {
        let at = self.offset();
        let Some((_, token)) = self.tokens.get(self.pos).cloned() else {
            return Err(ExprError::parse(at, "unexpected end of expression"));
        };
        self.pos += 1;
        match token {
            Token::Number(n) => Ok(Expr::Literal(crate::value::number_to_json(n))),
            Token::Str(s) => Ok(Expr::Literal(serde_json::Value::String(s))),
            Token::Ident(name) => Ok(match name.as_str() {
                "true" => Expr::Literal(serde_json::Value::Bool(true)),
                "false" => Expr::Literal(serde_json::Value::Bool(false)),
                "null" | "undefined" => Expr::Literal(serde_json::Value::Null),
                _ => Expr::Ident(name),
            }),
            Token::Punct("(") => {
                let inner = self.conditional()?;
                self.expect(")")?;
                Ok(inner)
            }
            Token::Punct(p) => Err(ExprError::parse(at, format!("unexpected `{p}`"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_binds_multiplication_tighter() {
        let expr = parse("1 + 2 * 3").unwrap();
        match expr {
            Expr::Binary(BinaryOp::Add, _, rhs) => {
                assert!(matches!(*rhs, Expr::Binary(BinaryOp::Mul, _, _)));
            }
            other => panic!("unexpected tree {other:?}"),
        }
    }

    #[test]
    fn strict_equality_is_one_token() {
        let expr = parse("a === 'x'").unwrap();
        assert!(matches!(expr, Expr::Binary(BinaryOp::StrictEq, _, _)));
    }

    #[test]
    fn member_and_index_chain() {
        let expr = parse("item.tags[0].name").unwrap();
        assert!(matches!(expr, Expr::Member(_, ref name) if name == "name"));
    }

    #[test]
    fn ternary_is_right_associative() {
        let expr = parse("a ? 'x' : b ? 'y' : 'z'").unwrap();
        match expr {
            Expr::Conditional(_, _, otherwise) => {
                assert!(matches!(*otherwise, Expr::Conditional(..)));
            }
            other => panic!("unexpected tree {other:?}"),
        }
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse("").is_err());
        assert!(parse("a +").is_err());
        assert!(parse("a b").is_err());
        assert!(parse("'open").is_err());
        assert!(parse("a = 1").is_err());
        assert!(parse("f()").is_err());
    }

    #[test]
    fn string_escapes() {
        let expr = parse(r"'it\'s'").unwrap();
        assert_eq!(expr, Expr::Literal(serde_json::json!("it's")));
    }

    #[test]
    fn escaped_multibyte_characters_stay_whole() {
        let expr = parse("'\\é' == x").unwrap();
        match expr {
            Expr::Binary(BinaryOp::LooseEq, lhs, _) => {
                assert_eq!(*lhs, Expr::Literal(serde_json::json!("é")));
            }
            other => panic!("unexpected tree {other:?}"),
        }
        assert_eq!(parse("'a\\€b'").unwrap(), Expr::Literal(serde_json::json!("a€b")));
        assert!(parse("'\\").is_err());
    }
}
