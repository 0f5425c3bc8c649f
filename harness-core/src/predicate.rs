//! Guard expressions of candidate programs.
//!
//! Guards are written in a small C-like language over named integer inputs:
//!
//! ```text
//! (a < b) && (b < a)
//! a - d > 100
//! !(x == 0) || y * 2 >= -7
//! ```
//!
//! Evaluation uses 64-bit arithmetic with checked operations. Generated C
//! declares inputs as `long long`, so both sides agree on every input the
//! 32-bit slots can produce.

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Values of the named inputs a predicate may reference.
pub type Env = BTreeMap<String, i64>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

impl BinOp {
    fn precedence(self) -> u8 {
        match self {
            BinOp::Or => 1,
            BinOp::And => 2,
            BinOp::Eq | BinOp::Ne => 3,
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => 4,
            BinOp::Add | BinOp::Sub => 5,
            BinOp::Mul => 6,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }

    fn operand_kind(self) -> Kind {
        match self {
            BinOp::And | BinOp::Or => Kind::Bool,
            _ => Kind::Int,
        }
    }

    fn result_kind(self) -> Kind {
        match self {
            BinOp::Add | BinOp::Sub | BinOp::Mul => Kind::Int,
            _ => Kind::Bool,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Kind {
    Int,
    Bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expr {
    Int(i64),
    Var(String),
    Neg(Box<Expr>),
    Not(Box<Expr>),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

impl Expr {
    fn kind(&self) -> Result<Kind> {
        match self {
            Expr::Int(_) | Expr::Var(_) => Ok(Kind::Int),
            Expr::Neg(inner) => {
                expect_kind(inner, Kind::Int, "-")?;
                Ok(Kind::Int)
            }
            Expr::Not(inner) => {
                expect_kind(inner, Kind::Bool, "!")?;
                Ok(Kind::Bool)
            }
            Expr::Binary { op, lhs, rhs } => {
                expect_kind(lhs, op.operand_kind(), op.symbol())?;
                expect_kind(rhs, op.operand_kind(), op.symbol())?;
                Ok(op.result_kind())
            }
        }
    }

    fn eval_int(&self, env: &Env) -> Result<i64> {
        match self {
            Expr::Int(value) => Ok(*value),
            Expr::Var(name) => env
                .get(name)
                .copied()
                .ok_or_else(|| anyhow!("input `{name}` has no value")),
            Expr::Neg(inner) => inner
                .eval_int(env)?
                .checked_neg()
                .ok_or_else(|| anyhow!("negation overflows")),
            Expr::Binary { op, lhs, rhs } => {
                let (l, r) = (lhs.eval_int(env)?, rhs.eval_int(env)?);
                let value = match op {
                    BinOp::Add => l.checked_add(r),
                    BinOp::Sub => l.checked_sub(r),
                    BinOp::Mul => l.checked_mul(r),
                    _ => bail!("`{}` is not an integer operator", op.symbol()),
                };
                value.ok_or_else(|| anyhow!("`{l} {} {r}` overflows", op.symbol()))
            }
            Expr::Not(_) => bail!("`!` does not produce an integer"),
        }
    }

    fn eval_bool(&self, env: &Env) -> Result<bool> {
        match self {
            Expr::Not(inner) => Ok(!inner.eval_bool(env)?),
            Expr::Binary { op, lhs, rhs } => match op {
                BinOp::And => Ok(lhs.eval_bool(env)? && rhs.eval_bool(env)?),
                BinOp::Or => Ok(lhs.eval_bool(env)? || rhs.eval_bool(env)?),
                BinOp::Lt => Ok(lhs.eval_int(env)? < rhs.eval_int(env)?),
                BinOp::Le => Ok(lhs.eval_int(env)? <= rhs.eval_int(env)?),
                BinOp::Gt => Ok(lhs.eval_int(env)? > rhs.eval_int(env)?),
                BinOp::Ge => Ok(lhs.eval_int(env)? >= rhs.eval_int(env)?),
                BinOp::Eq => Ok(lhs.eval_int(env)? == rhs.eval_int(env)?),
                BinOp::Ne => Ok(lhs.eval_int(env)? != rhs.eval_int(env)?),
                _ => bail!("`{}` is not a boolean operator", op.symbol()),
            },
            _ => bail!("integer expression used as a condition"),
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            Expr::Binary { op, .. } => op.precedence(),
            Expr::Neg(_) | Expr::Not(_) => 7,
            Expr::Int(_) | Expr::Var(_) => 8,
        }
    }

    fn render(&self, out: &mut String) {
        match self {
            Expr::Int(value) => {
                out.push_str(&value.to_string());
                if i32::try_from(*value).is_err() {
                    out.push_str("LL");
                }
            }
            Expr::Var(name) => out.push_str(name),
            Expr::Neg(inner) => {
                out.push('-');
                let mut operand = String::new();
                render_child(inner, 7, &mut operand);
                // `--x` would read as a pre-decrement in C.
                if operand.starts_with('-') {
                    out.push('(');
                    out.push_str(&operand);
                    out.push(')');
                } else {
                    out.push_str(&operand);
                }
            }
            Expr::Not(inner) => {
                out.push('!');
                render_child(inner, 7, out);
            }
            Expr::Binary { op, lhs, rhs } => {
                let prec = op.precedence();
                render_child(lhs, prec, out);
                out.push(' ');
                out.push_str(op.symbol());
                out.push(' ');
                render_child(rhs, prec + 1, out);
            }
        }
    }

    fn collect_vars<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            Expr::Int(_) => {}
            Expr::Var(name) => {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            }
            Expr::Neg(inner) | Expr::Not(inner) => inner.collect_vars(names),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_vars(names);
                rhs.collect_vars(names);
            }
        }
    }
}

fn expect_kind(expr: &Expr, kind: Kind, op: &str) -> Result<()> {
    let actual = expr.kind()?;
    if actual != kind {
        bail!(
            "operand of `{op}` must be {}",
            if kind == Kind::Int { "an integer" } else { "a condition" }
        );
    }
    Ok(())
}

fn render_child(expr: &Expr, min_prec: u8, out: &mut String) {
    if expr.precedence() < min_prec {
        out.push('(');
        expr.render(out);
        out.push(')');
    } else {
        expr.render(out);
    }
}

/// A parsed, type-checked guard.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Predicate {
    source: String,
    expr: Expr,
}

impl Predicate {
    pub fn parse(source: &str) -> Result<Self> {
        let tokens = tokenize(source).with_context(|| format!("tokenize `{source}`"))?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser
            .parse_expr(1)
            .with_context(|| format!("parse `{source}`"))?;
        if let Some(token) = parser.peek() {
            bail!("unexpected `{token}` in `{source}`");
        }
        if expr.kind().with_context(|| format!("type-check `{source}`"))? != Kind::Bool {
            bail!("`{source}` is an integer expression, not a condition");
        }
        Ok(Self {
            source: source.trim().to_string(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    pub fn evaluate(&self, env: &Env) -> Result<bool> {
        self.expr
            .eval_bool(env)
            .with_context(|| format!("evaluate `{}`", self.source))
    }

    /// Input names in order of first use.
    pub fn inputs(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.expr.collect_vars(&mut names);
        names
    }

    /// C rendering with only the parentheses precedence requires.
    pub fn render_c(&self) -> String {
        let mut out = String::new();
        self.expr.render(&mut out);
        out
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl TryFrom<String> for Predicate {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        Predicate::parse(&value)
    }
}

impl From<Predicate> for String {
    fn from(value: Predicate) -> Self {
        value.source
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Token {
    Int(i64),
    Ident(String),
    Op(BinOp),
    Minus,
    Bang,
    LParen,
    RParen,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Int(value) => write!(f, "{value}"),
            Token::Ident(name) => f.write_str(name),
            Token::Op(op) => f.write_str(op.symbol()),
            Token::Minus => f.write_str("-"),
            Token::Bang => f.write_str("!"),
            Token::LParen => f.write_str("("),
            Token::RParen => f.write_str(")"),
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut idx = 0usize;

    while idx < chars.len() {
        let c = chars[idx];
        let next = chars.get(idx + 1).copied();
        if c.is_whitespace() {
            idx += 1;
            continue;
        }
        if c.is_ascii_digit() {
            let start = idx;
            while idx < chars.len() && (chars[idx].is_ascii_alphanumeric()) {
                idx += 1;
            }
            let literal: String = chars[start..idx].iter().collect();
            let value = match literal.strip_prefix("0x").or_else(|| literal.strip_prefix("0X")) {
                Some(hex) => i64::from_str_radix(hex, 16),
                None => literal.parse::<i64>(),
            }
            .with_context(|| format!("invalid integer literal `{literal}`"))?;
            tokens.push(Token::Int(value));
            continue;
        }
        if c.is_ascii_alphabetic() || c == '_' {
            let start = idx;
            while idx < chars.len() && (chars[idx].is_ascii_alphanumeric() || chars[idx] == '_') {
                idx += 1;
            }
            tokens.push(Token::Ident(chars[start..idx].iter().collect()));
            continue;
        }
        let (token, width) = match (c, next) {
            ('&', Some('&')) => (Token::Op(BinOp::And), 2),
            ('|', Some('|')) => (Token::Op(BinOp::Or), 2),
            ('<', Some('=')) => (Token::Op(BinOp::Le), 2),
            ('>', Some('=')) => (Token::Op(BinOp::Ge), 2),
            ('=', Some('=')) => (Token::Op(BinOp::Eq), 2),
            ('!', Some('=')) => (Token::Op(BinOp::Ne), 2),
            ('<', _) => (Token::Op(BinOp::Lt), 1),
            ('>', _) => (Token::Op(BinOp::Gt), 1),
            ('+', _) => (Token::Op(BinOp::Add), 1),
            ('*', _) => (Token::Op(BinOp::Mul), 1),
            ('-', _) => (Token::Minus, 1),
            ('!', _) => (Token::Bang, 1),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            _ => bail!("unexpected character `{c}` at offset {idx}"),
        };
        tokens.push(token);
        idx += width;
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn peek_binop(&self) -> Option<BinOp> {
        match self.peek()? {
            Token::Op(op) => Some(*op),
            Token::Minus => Some(BinOp::Sub),
            _ => None,
        }
    }

    fn parse_expr(&mut self, min_prec: u8) -> Result<Expr> {
        let mut lhs = self.parse_unary()?;
        while let Some(op) = self.peek_binop() {
            let prec = op.precedence();
            if prec < min_prec {
                break;
            }
            self.advance();
            let rhs = self.parse_expr(prec + 1)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        match self.peek() {
            Some(Token::Minus) => {
                self.advance();
                Ok(match self.parse_unary()? {
                    Expr::Int(value) => Expr::Int(-value),
                    other => Expr::Neg(Box::new(other)),
                })
            }
            Some(Token::Bang) => {
                self.advance();
                Ok(Expr::Not(Box::new(self.parse_unary()?)))
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.advance() {
            Some(Token::Int(value)) => Ok(Expr::Int(value)),
            Some(Token::Ident(name)) => Ok(Expr::Var(name)),
            Some(Token::LParen) => {
                let inner = self.parse_expr(1)?;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    Some(other) => bail!("expected `)`, found `{other}`"),
                    None => bail!("expected `)`, found end of input"),
                }
            }
            Some(other) => bail!("unexpected `{other}`"),
            None => bail!("unexpected end of input"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, i64)]) -> Env {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), *value))
            .collect()
    }

    #[test]
    fn evaluates_simple_comparisons() {
        let p = Predicate::parse("a >= b").unwrap();
        assert!(p.evaluate(&env(&[("a", 5), ("b", 3)])).unwrap());
        assert!(!p.evaluate(&env(&[("a", 1), ("b", 9)])).unwrap());
        assert_eq!(p.inputs(), vec!["a", "b"]);
    }

    #[test]
    fn contradiction_is_false_everywhere_sampled() {
        let p = Predicate::parse("(a < b) && (b < a)").unwrap();
        for a in [-3i64, 0, 7, i32::MAX as i64] {
            for b in [-3i64, 0, 7, i32::MIN as i64] {
                assert!(!p.evaluate(&env(&[("a", a), ("b", b)])).unwrap());
            }
        }
    }

    #[test]
    fn arithmetic_binds_tighter_than_comparison() {
        let p = Predicate::parse("a - d > 100").unwrap();
        assert!(p.evaluate(&env(&[("a", 300), ("d", 100)])).unwrap());
        assert!(!p.evaluate(&env(&[("a", 150), ("d", 100)])).unwrap());
        assert_eq!(p.render_c(), "a - d > 100");
    }

    #[test]
    fn subtraction_is_left_associative() {
        let p = Predicate::parse("a - b - c == 0").unwrap();
        assert!(p.evaluate(&env(&[("a", 6), ("b", 4), ("c", 2)])).unwrap());
        let q = Predicate::parse("a - (b - c) == 4").unwrap();
        assert!(q.evaluate(&env(&[("a", 6), ("b", 4), ("c", 2)])).unwrap());
        assert_eq!(q.render_c(), "a - (b - c) == 4");
    }

    #[test]
    fn rendering_keeps_needed_parentheses() {
        let p = Predicate::parse("!(x == 0) || y * 2 >= -7").unwrap();
        assert_eq!(p.render_c(), "!(x == 0) || y * 2 >= -7");
        let q = Predicate::parse("(a < b) && (b < a)").unwrap();
        assert_eq!(q.render_c(), "a < b && b < a");
        let wide = Predicate::parse("a > 4294967296").unwrap();
        assert_eq!(wide.render_c(), "a > 4294967296LL");
    }

    #[test]
    fn hex_literals_and_negation() {
        let p = Predicate::parse("-x == 0x10").unwrap();
        assert!(p.evaluate(&env(&[("x", -16)])).unwrap());
    }

    #[test]
    fn double_negation_renders_without_decrement() {
        let p = Predicate::parse("-(-x) == 5").unwrap();
        assert!(p.evaluate(&env(&[("x", 5)])).unwrap());
        assert_eq!(p.render_c(), "-(-x) == 5");
        let q = Predicate::parse("- - -x < 0").unwrap();
        assert_eq!(q.render_c(), "-(-(-x)) < 0");
        let reparsed = Predicate::parse(&p.render_c()).unwrap();
        assert_eq!(reparsed.expr(), p.expr());
    }

    #[test]
    fn rejects_integer_conditions_and_bad_syntax() {
        assert!(Predicate::parse("a + b").is_err());
        assert!(Predicate::parse("a < b < c").is_err());
        assert!(Predicate::parse("(a < b").is_err());
        assert!(Predicate::parse("a $ b").is_err());
        assert!(Predicate::parse("a && b").is_err());
    }

    #[test]
    fn missing_inputs_and_overflow_are_errors() {
        let p = Predicate::parse("a > b").unwrap();
        assert!(p.evaluate(&env(&[("a", 1)])).is_err());
        let q = Predicate::parse("a * a * a > 0").unwrap();
        assert!(q.evaluate(&env(&[("a", i64::MAX / 2)])).is_err());
    }

    #[test]
    fn serde_round_trips_through_source_text() {
        let p: Predicate = serde_json::from_str("\"a > b\"").unwrap();
        assert_eq!(serde_json::to_string(&p).unwrap(), "\"a > b\"");
        assert!(serde_json::from_str::<Predicate>("\"a >\"").is_err());
    }
}
