//! Lexer token types

use std::fmt;

/// Token kinds for sandbox code.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Delimiters
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Quote,
    /// `#(` opening an anonymous function
    HashParen,

    // Literals
    String(String),
    Number(f64),
    /// `:name`, without the colon
    Keyword(String),
    Symbol(String),

    // Special
    Eof,
    Error(String),
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LParen => write!(f, "'('"),
            Self::RParen => write!(f, "')'"),
            Self::LBracket => write!(f, "'['"),
            Self::RBracket => write!(f, "']'"),
            Self::LBrace => write!(f, "'{{'"),
            Self::RBrace => write!(f, "'}}'"),
            Self::Quote => write!(f, "quote"),
            Self::HashParen => write!(f, "'#('"),
            Self::String(s) => write!(f, "string {:?}", s),
            Self::Number(n) => write!(f, "number {}", n),
            Self::Keyword(k) => write!(f, "keyword :{}", k),
            Self::Symbol(s) => write!(f, "symbol {}", s),
            Self::Eof => write!(f, "end of input"),
            Self::Error(msg) => write!(f, "{}", msg),
        }
    }
}

/// Source location span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub column: usize,
}

impl Default for Span {
    fn default() -> Self {
        Self {
            start: 0,
            end: 0,
            line: 1,
            column: 1,
        }
    }
}

/// A token with its kind and source location.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}
