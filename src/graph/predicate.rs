//! Closed predicate grammar for conditional tasks.
//!
//! A predicate only ever compares named context fields against literals:
//!
//! ```text
//! expr       := or
//! or         := and ( "||" and )*
//! and        := unary ( "&&" unary )*
//! unary      := "!" unary | "(" expr ")" | comparison
//! comparison := field op literal
//! op         := "==" | "!=" | "<" | "<=" | ">" | ">="
//! literal    := number | string | true | false | null
//! ```
//!
//! `field` is a dotted path into the workflow context (`order.total`).

use crate::error::PredicateError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CompareOp {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    #[default]
    Ge,
}

impl CompareOp {
    fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }

    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Ne => ordering != Ordering::Equal,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Ge => ordering != Ordering::Less,
        }
    }

    /// Compares two JSON values. Numbers and strings are ordered, booleans and
    /// nulls only support equality. Any other pairing is false.
    pub fn apply(self, left: &Value, right: &Value) -> bool {
        let ordering = match (left, right) {
            (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => None,
            },
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) if matches!(self, CompareOp::Eq | CompareOp::Ne) => {
                Some(a.cmp(b))
            }
            (Value::Null, Value::Null) if matches!(self, CompareOp::Eq | CompareOp::Ne) => {
                Some(Ordering::Equal)
            }
            _ => None,
        };
        ordering.is_some_and(|o| self.accepts(o))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Compare {
        field: String,
        op: CompareOp,
        value: Value,
    },
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn compare(field: &str, op: CompareOp, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            field: field.to_string(),
            op,
            value: value.into(),
        }
    }

    pub fn parse(source: &str) -> Result<Self, PredicateError> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(PredicateError::Empty);
        }
        let mut parser = Parser { tokens, pos: 0, depth: 0 };
        let predicate = parser.parse_or()?;
        if let Some(tok) = parser.peek() {
            return Err(PredicateError::Unexpected {
                expected: "end of predicate".to_string(),
                found: tok.to_string(),
            });
        }
        Ok(predicate)
    }

    pub fn evaluate(&self, context: &Map<String, Value>) -> bool {
        match self {
            Predicate::Compare { field, op, value } => {
                lookup(context, field).is_some_and(|actual| op.apply(actual, value))
            }
            Predicate::All(items) => items.iter().all(|p| p.evaluate(context)),
            Predicate::Any(items) => items.iter().any(|p| p.evaluate(context)),
            Predicate::Not(inner) => !inner.evaluate(context),
        }
    }
}

impl FromStr for Predicate {
    type Err = PredicateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Predicate::parse(s)
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Compare { field, op, value } => write!(f, "{} {} {}", field, op.symbol(), value),
            Predicate::All(items) => join(f, items, " && "),
            Predicate::Any(items) => join(f, items, " || "),
            Predicate::Not(inner) => write!(f, "!({})", inner),
        }
    }
}

fn join(f: &mut fmt::Formatter<'_>, items: &[Predicate], sep: &str) -> fmt::Result {
    write!(f, "(")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, "{}", sep)?;
        }
        write!(f, "{}", item)?;
    }
    write!(f, ")")
}

/// Resolves a dotted path against the context, descending into objects.
pub fn lookup<'a>(context: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = context.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

// --- Tokenizer ---

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Literal(Value),
    Op(CompareOp),
    And,
    Or,
    Not,
    LParen,
    RParen,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(s) => write!(f, "field `{}`", s),
            Token::Literal(v) => write!(f, "literal {}", v),
            Token::Op(op) => write!(f, "`{}`", op.symbol()),
            Token::And => write!(f, "`&&`"),
            Token::Or => write!(f, "`||`"),
            Token::Not => write!(f, "`!`"),
            Token::LParen => write!(f, "`(`"),
            Token::RParen => write!(f, "`)`"),
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>, PredicateError> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (offset, ch) = chars[i];
        let next = chars.get(i + 1).map(|(_, c)| *c);

        match ch {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '&' if next == Some('&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if next == Some('|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '=' if next == Some('=') => {
                tokens.push(Token::Op(CompareOp::Eq));
                i += 2;
            }
            '!' if next == Some('=') => {
                tokens.push(Token::Op(CompareOp::Ne));
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '<' | '>' => {
                let inclusive = next == Some('=');
                let op = match (ch, inclusive) {
                    ('<', false) => CompareOp::Lt,
                    ('<', true) => CompareOp::Le,
                    ('>', false) => CompareOp::Gt,
                    _ => CompareOp::Ge,
                };
                tokens.push(Token::Op(op));
                i += if inclusive { 2 } else { 1 };
            }
            '"' | '\'' => {
                let quote = ch;
                let mut text = String::new();
                let mut j = i + 1;
                let mut closed = false;
                while j < chars.len() {
                    let c = chars[j].1;
                    if c == '\\' && j + 1 < chars.len() {
                        text.push(chars[j + 1].1);
                        j += 2;
                        continue;
                    }
                    if c == quote {
                        closed = true;
                        break;
                    }
                    text.push(c);
                    j += 1;
                }
                if !closed {
                    return Err(PredicateError::UnterminatedString(offset));
                }
                tokens.push(Token::Literal(Value::String(text)));
                i = j + 1;
            }
            c if c.is_ascii_digit() || (c == '-' && next.is_some_and(|n| n.is_ascii_digit())) => {
                let mut j = i + 1;
                while j < chars.len() {
                    let c = chars[j].1;
                    let exponent_sign = matches!(c, '+' | '-') && matches!(chars[j - 1].1, 'e' | 'E');
                    if !(c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E') || exponent_sign) {
                        break;
                    }
                    j += 1;
                }
                let end = chars.get(j).map(|(o, _)| *o).unwrap_or(source.len());
                let text = &source[offset..end];
                let number: Value = serde_json::from_str(text)
                    .ok()
                    .filter(Value::is_number)
                    .ok_or_else(|| PredicateError::InvalidNumber(text.to_string()))?;
                tokens.push(Token::Literal(number));
                i = j;
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut j = i + 1;
                while j < chars.len() && (chars[j].1.is_alphanumeric() || matches!(chars[j].1, '_' | '.')) {
                    j += 1;
                }
                let end = chars.get(j).map(|(o, _)| *o).unwrap_or(source.len());
                let word = &source[offset..end];
                let token = match word {
                    "true" => Token::Literal(Value::Bool(true)),
                    "false" => Token::Literal(Value::Bool(false)),
                    "null" => Token::Literal(Value::Null),
                    _ => Token::Ident(word.to_string()),
                };
                tokens.push(token);
                i = j;
            }
            other => return Err(PredicateError::UnexpectedChar { ch: other, offset }),
        }
    }

    Ok(tokens)
}

// --- Parser ---

/// Nesting allowed for `!` and parentheses before parsing gives up.
pub const MAX_DEPTH: usize = 64;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn unexpected(expected: &str, found: Option<Token>) -> PredicateError {
        PredicateError::Unexpected {
            expected: expected.to_string(),
            found: found.map(|t| t.to_string()).unwrap_or_else(|| "end of predicate".to_string()),
        }
    }

    fn parse_or(&mut self) -> Result<Predicate, PredicateError> {
        let mut items = vec![self.parse_and()?];
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            items.push(self.parse_and()?);
        }
        Ok(if items.len() == 1 { items.remove(0) } else { Predicate::Any(items) })
    }

    fn parse_and(&mut self) -> Result<Predicate, PredicateError> {
        let mut items = vec![self.parse_unary()?];
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            items.push(self.parse_unary()?);
        }
        Ok(if items.len() == 1 { items.remove(0) } else { Predicate::All(items) })
    }

    fn descend(&mut self) -> Result<(), PredicateError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(PredicateError::TooDeep(MAX_DEPTH));
        }
        Ok(())
    }

    fn parse_unary(&mut self) -> Result<Predicate, PredicateError> {
        match self.advance() {
            Some(Token::Not) => {
                self.descend()?;
                let inner = self.parse_unary()?;
                self.depth -= 1;
                Ok(Predicate::Not(Box::new(inner)))
            }
            Some(Token::LParen) => {
                self.descend()?;
                let inner = self.parse_or()?;
                self.depth -= 1;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    other => Err(Self::unexpected("`)`", other)),
                }
            }
            Some(Token::Ident(field)) => {
                let op = match self.advance() {
                    Some(Token::Op(op)) => op,
                    other => return Err(Self::unexpected("comparison operator", other)),
                };
                match self.advance() {
                    Some(Token::Literal(value)) => Ok(Predicate::Compare { field, op, value }),
                    other => Err(Self::unexpected("literal", other)),
                }
            }
            other => Err(Self::unexpected("field name, `!` or `(`", other)),
        }
    }
}
