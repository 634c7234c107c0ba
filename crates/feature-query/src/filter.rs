//! Property filter grammar and in-memory evaluation.
//!
//! ```text
//! filter  := expr ( "and" expr )*
//! expr    := name op literal
//! op      := eq | lt | gt | like | in
//! literal := number | 'string' | true | false | null | "(" literal ("," literal)* ")"
//! ```
//!
//! Keywords are case-insensitive. `null` is only valid with `eq`, lists only
//! with `in`, and `like` takes a string pattern using `%` and `_` wildcards.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    Eq,
    Lt,
    Gt,
    Like,
    In,
}

impl FilterOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Lt => "lt",
            FilterOp::Gt => "gt",
            FilterOp::Like => "like",
            FilterOp::In => "in",
        }
    }

    fn from_keyword(word: &str) -> Option<Self> {
        match word.to_ascii_lowercase().as_str() {
            "eq" => Some(FilterOp::Eq),
            "lt" => Some(FilterOp::Lt),
            "gt" => Some(FilterOp::Gt),
            "like" => Some(FilterOp::Like),
            "in" => Some(FilterOp::In),
            _ => None,
        }
    }

    /// All operators.
    pub fn all() -> [FilterOp; 5] {
        [FilterOp::Eq, FilterOp::Lt, FilterOp::Gt, FilterOp::Like, FilterOp::In]
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A filter literal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<Literal>),
}

impl Literal {
    /// Interpret a bare query parameter value (`?name=value`).
    ///
    /// Numbers and booleans are recognised, everything else is a string.
    pub fn from_bare(value: &str) -> Self {
        let trimmed = value.trim();
        if let Ok(n) = trimmed.parse::<f64>() {
            if n.is_finite() {
                return Literal::Number(n);
            }
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "true" => Literal::Bool(true),
            "false" => Literal::Bool(false),
            _ => Literal::String(value.to_string()),
        }
    }

    /// JSON form, used when pushing a literal down to a backend.
    pub fn to_json(&self) -> Value {
        match self {
            Literal::Null => Value::Null,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Literal::String(s) => Value::String(s.clone()),
            Literal::List(items) => Value::Array(items.iter().map(Literal::to_json).collect()),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => f.write_str("null"),
            Literal::Bool(b) => write!(f, "{}", b),
            Literal::Number(n) => write!(f, "{}", n),
            Literal::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Literal::List(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str(")")
            }
        }
    }
}

/// One `name op literal` clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyFilter {
    pub name: String,
    pub op: FilterOp,
    pub value: Literal,
}

impl PropertyFilter {
    pub fn new(name: impl Into<String>, op: FilterOp, value: Literal) -> Self {
        Self {
            name: name.into(),
            op,
            value,
        }
    }

    pub fn eq(name: impl Into<String>, value: Literal) -> Self {
        Self::new(name, FilterOp::Eq, value)
    }

    /// Evaluate against a property value; `None` means the property is absent.
    pub fn matches(&self, property: Option<&Value>) -> bool {
        let property = property.unwrap_or(&Value::Null);
        match (&self.op, &self.value) {
            (FilterOp::Eq, literal) => literal_eq(literal, property),
            (FilterOp::Lt, literal) => {
                compare_literal(property, literal).map_or(false, |o| o == Ordering::Less)
            }
            (FilterOp::Gt, literal) => {
                compare_literal(property, literal).map_or(false, |o| o == Ordering::Greater)
            }
            (FilterOp::Like, Literal::String(pattern)) => match property {
                Value::String(text) => like_matches(pattern, text),
                _ => false,
            },
            (FilterOp::Like, _) => false,
            (FilterOp::In, Literal::List(items)) => items.iter().any(|l| literal_eq(l, property)),
            (FilterOp::In, literal) => literal_eq(literal, property),
        }
    }
}

impl fmt::Display for PropertyFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.name, self.op, self.value)
    }
}

fn literal_eq(literal: &Literal, value: &Value) -> bool {
    match (literal, value) {
        (Literal::Null, Value::Null) => true,
        (Literal::Bool(a), Value::Bool(b)) => a == b,
        (Literal::Number(a), Value::Number(b)) => b.as_f64().map_or(false, |b| *a == b),
        (Literal::String(a), Value::String(b)) => a == b,
        _ => false,
    }
}

/// Order a property value against a literal; `None` when incomparable.
fn compare_literal(value: &Value, literal: &Literal) -> Option<Ordering> {
    match (value, literal) {
        (Value::Number(a), Literal::Number(b)) => a.as_f64()?.partial_cmp(b),
        (Value::String(a), Literal::String(b)) => Some(a.as_str().cmp(b.as_str())),
        (Value::Bool(a), Literal::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// SQL-style `LIKE`: `%` matches any run of characters, `_` exactly one.
pub fn like_matches(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '_' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '%' {
            backtrack = Some((p, t));
            p += 1;
        } else if let Some((bp, bt)) = backtrack {
            p = bp + 1;
            t = bt + 1;
            backtrack = Some((bp, bt + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|c| *c == '%')
}

/// Errors from parsing a filter expression.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FilterParseError {
    #[error("unexpected end of filter expression")]
    UnexpectedEnd,

    #[error("unexpected token '{0}'")]
    UnexpectedToken(String),

    #[error("unknown operator '{0}', expected eq, lt, gt, like or in")]
    UnknownOperator(String),

    #[error("invalid number '{0}'")]
    InvalidNumber(String),

    #[error("unterminated string literal")]
    UnterminatedString,

    #[error("operator '{op}' does not accept {literal}")]
    InvalidOperand { op: FilterOp, literal: String },
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Number(String),
    Str(String),
    LParen,
    RParen,
    Comma,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Word(w) | Token::Number(w) => f.write_str(w),
            Token::Str(s) => write!(f, "'{}'", s),
            Token::LParen => f.write_str("("),
            Token::RParen => f.write_str(")"),
            Token::Comma => f.write_str(","),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, FilterParseError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '\'' => {
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(FilterParseError::UnterminatedString),
                        // '' is an escaped quote
                        Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                            s.push('\'');
                            i += 2;
                        }
                        Some('\'') => {
                            i += 1;
                            break;
                        }
                        Some(ch) => {
                            s.push(*ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(s));
            }
            c if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => {
                let start = i;
                i += 1;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric()
                        || chars[i] == '.'
                        || ((chars[i] == '-' || chars[i] == '+')
                            && matches!(chars[i - 1], 'e' | 'E')))
                {
                    i += 1;
                }
                tokens.push(Token::Number(chars[start..i].iter().collect()));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '.' | '-' | ':'))
                {
                    i += 1;
                }
                tokens.push(Token::Word(chars[start..i].iter().collect()));
            }
            other => return Err(FilterParseError::UnexpectedToken(other.to_string())),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn next(&mut self) -> Result<Token, FilterParseError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or(FilterParseError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(token)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn scalar(&mut self) -> Result<Literal, FilterParseError> {
        match self.next()? {
            Token::Number(raw) => raw
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .map(Literal::Number)
                .ok_or(FilterParseError::InvalidNumber(raw)),
            Token::Str(s) => Ok(Literal::String(s)),
            Token::Word(w) => match w.to_ascii_lowercase().as_str() {
                "true" => Ok(Literal::Bool(true)),
                "false" => Ok(Literal::Bool(false)),
                "null" => Ok(Literal::Null),
                _ => Err(FilterParseError::UnexpectedToken(w)),
            },
            other => Err(FilterParseError::UnexpectedToken(other.to_string())),
        }
    }

    fn list(&mut self) -> Result<Literal, FilterParseError> {
        match self.next()? {
            Token::LParen => {}
            other => return Err(FilterParseError::UnexpectedToken(other.to_string())),
        }
        let mut items = vec![self.scalar()?];
        loop {
            match self.next()? {
                Token::Comma => items.push(self.scalar()?),
                Token::RParen => break,
                other => return Err(FilterParseError::UnexpectedToken(other.to_string())),
            }
        }
        Ok(Literal::List(items))
    }

    fn clause(&mut self) -> Result<PropertyFilter, FilterParseError> {
        let name = match self.next()? {
            Token::Word(w) => w,
            other => return Err(FilterParseError::UnexpectedToken(other.to_string())),
        };
        let op = match self.next()? {
            Token::Word(w) => FilterOp::from_keyword(&w).ok_or(FilterParseError::UnknownOperator(w))?,
            other => return Err(FilterParseError::UnknownOperator(other.to_string())),
        };

        let value = if op == FilterOp::In {
            self.list()?
        } else {
            self.scalar()?
        };

        let valid = match (op, &value) {
            (FilterOp::Eq, _) => true,
            (FilterOp::Like, Literal::String(_)) => true,
            (FilterOp::Lt | FilterOp::Gt, Literal::Number(_) | Literal::String(_)) => true,
            (FilterOp::In, Literal::List(items)) => {
                !items.iter().any(|l| matches!(l, Literal::Null))
            }
            _ => false,
        };
        if !valid {
            return Err(FilterParseError::InvalidOperand {
                op,
                literal: value.to_string(),
            });
        }

        Ok(PropertyFilter { name, op, value })
    }
}

/// Parse a filter expression into its conjunction of clauses.
pub fn parse_filter(input: &str) -> Result<Vec<PropertyFilter>, FilterParseError> {
    let mut parser = Parser {
        tokens: tokenize(input)?,
        pos: 0,
    };
    if parser.tokens.is_empty() {
        return Err(FilterParseError::UnexpectedEnd);
    }

    let mut clauses = vec![parser.clause()?];
    while let Some(token) = parser.peek() {
        match token {
            Token::Word(w) if w.eq_ignore_ascii_case("and") => {
                parser.pos += 1;
                clauses.push(parser.clause()?);
            }
            other => return Err(FilterParseError::UnexpectedToken(other.to_string())),
        }
    }
    Ok(clauses)
}
