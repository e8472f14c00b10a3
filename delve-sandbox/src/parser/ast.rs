//! Forms produced by the reader

use crate::lexer::Span;
use delve_core::SandboxError;
use std::fmt;

/// One read form with the span it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Form {
    pub kind: FormKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FormKind {
    Nil,
    Bool(bool),
    Number(f64),
    Str(String),
    /// Keyword name without the leading colon
    Keyword(String),
    Symbol(String),
    /// `( ... )`
    List(Vec<Form>),
    /// `[ ... ]`
    Vector(Vec<Form>),
    /// `{ k v ... }` in source order
    Map(Vec<(Form, Form)>),
    /// `'x`
    Quote(Box<Form>),
}

impl Form {
    pub fn new(kind: FormKind, span: Span) -> Self {
        Self { kind, span }
    }

    pub fn as_symbol(&self) -> Option<&str> {
        match &self.kind {
            FormKind::Symbol(s) => Some(s),
            _ => None,
        }
    }

    /// Short description used in error messages.
    pub fn describe(&self) -> &'static str {
        match &self.kind {
            FormKind::Nil => "nil",
            FormKind::Bool(_) => "boolean",
            FormKind::Number(_) => "number",
            FormKind::Str(_) => "string",
            FormKind::Keyword(_) => "keyword",
            FormKind::Symbol(_) => "symbol",
            FormKind::List(_) => "list",
            FormKind::Vector(_) => "vector",
            FormKind::Map(_) => "map",
            FormKind::Quote(_) => "quoted form",
        }
    }
}

impl fmt::Display for Form {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            FormKind::Nil => write!(f, "nil"),
            FormKind::Bool(b) => write!(f, "{}", b),
            FormKind::Number(n) => write!(f, "{}", n),
            FormKind::Str(s) => write!(f, "{:?}", s),
            FormKind::Keyword(k) => write!(f, ":{}", k),
            FormKind::Symbol(s) => write!(f, "{}", s),
            FormKind::List(items) => write_seq(f, "(", ")", items),
            FormKind::Vector(items) => write_seq(f, "[", "]", items),
            FormKind::Map(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{} {}", k, v)?;
                }
                write!(f, "}}")
            }
            FormKind::Quote(inner) => write!(f, "'{}", inner),
        }
    }
}

fn write_seq(f: &mut fmt::Formatter<'_>, open: &str, close: &str, items: &[Form]) -> fmt::Result {
    write!(f, "{}", open)?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, " ")?;
        }
        write!(f, "{}", item)?;
    }
    write!(f, "{}", close)
}

/// Reader error with a source location.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Parse error at line {}, column {}: {}",
            self.line, self.column, self.message
        )
    }
}

impl std::error::Error for ParseError {}

impl From<ParseError> for SandboxError {
    fn from(err: ParseError) -> Self {
        SandboxError::Syntax {
            line: err.line,
            column: err.column,
            message: err.message,
        }
    }
}
