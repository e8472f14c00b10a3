//! Lexer implementation

use super::token::*;
use std::iter::Peekable;
use std::str::CharIndices;

/// Lexer for sandbox code.
///
/// Commas are whitespace and `;` starts a line comment, as in Clojure.
pub struct Lexer<'a> {
    source: &'a str,
    chars: Peekable<CharIndices<'a>>,
    line: usize,
    column: usize,
    pos: usize,
}

impl<'a> Lexer<'a> {
    /// Create a new lexer for the given source.
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
            line: 1,
            column: 1,
            pos: 0,
        }
    }

    /// Tokenize the entire source into a vector of tokens.
    pub fn tokenize(&mut self) -> Vec<Token> {
        let mut tokens = Vec::new();

        loop {
            let token = self.next_token();
            let is_eof = token.kind == TokenKind::Eof;
            tokens.push(token);
            if is_eof {
                break;
            }
        }

        tokens
    }

    fn next_token(&mut self) -> Token {
        self.skip_whitespace_and_comments();

        let start_pos = self.pos;
        let start_line = self.line;
        let start_col = self.column;

        let kind = match self.peek_char() {
            None => TokenKind::Eof,
            Some(c) => match c {
                '(' => self.single(TokenKind::LParen),
                ')' => self.single(TokenKind::RParen),
                '[' => self.single(TokenKind::LBracket),
                ']' => self.single(TokenKind::RBracket),
                '{' => self.single(TokenKind::LBrace),
                '}' => self.single(TokenKind::RBrace),
                '\'' => self.single(TokenKind::Quote),
                '"' => self.scan_string(),
                '#' if self.peek_next_char() == Some('(') => {
                    self.advance();
                    self.single(TokenKind::HashParen)
                }
                // regex literals read as plain pattern strings
                '#' if self.peek_next_char() == Some('"') => {
                    self.advance();
                    self.scan_string()
                }
                ':' => self.scan_keyword(),
                '-' | '+' if self.peek_next_char().is_some_and(|n| n.is_ascii_digit()) => {
                    self.scan_number()
                }
                c if c.is_ascii_digit() => self.scan_number(),
                c if is_symbol_start(c) => self.scan_symbol(),
                c => {
                    self.advance();
                    TokenKind::Error(format!("Unexpected character: {}", c))
                }
            },
        };

        Token {
            kind,
            span: Span {
                start: start_pos,
                end: self.pos,
                line: start_line,
                column: start_col,
            },
        }
    }

    fn single(&mut self, kind: TokenKind) -> TokenKind {
        self.advance();
        kind
    }

    fn scan_symbol(&mut self) -> TokenKind {
        let start = self.pos;
        while let Some(c) = self.peek_char() {
            if is_symbol_char(c) {
                self.advance();
            } else {
                break;
            }
        }
        TokenKind::Symbol(self.source[start..self.pos].to_string())
    }

    fn scan_keyword(&mut self) -> TokenKind {
        self.advance(); // consume ':'
        let start = self.pos;
        while let Some(c) = self.peek_char() {
            if is_symbol_char(c) {
                self.advance();
            } else {
                break;
            }
        }
        let name = &self.source[start..self.pos];
        if name.is_empty() {
            TokenKind::Error("Keyword without a name".to_string())
        } else {
            TokenKind::Keyword(name.to_string())
        }
    }

    /// Scan a string literal with escape sequences.
    fn scan_string(&mut self) -> TokenKind {
        self.advance(); // consume opening quote
        let mut value = String::new();

        loop {
            match self.peek_char() {
                None => return TokenKind::Error("Unterminated string".to_string()),
                Some('"') => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    match self.peek_char() {
                        Some('n') => {
                            self.advance();
                            value.push('\n');
                        }
                        Some('t') => {
                            self.advance();
                            value.push('\t');
                        }
                        Some('r') => {
                            self.advance();
                            value.push('\r');
                        }
                        Some('\\') => {
                            self.advance();
                            value.push('\\');
                        }
                        Some('"') => {
                            self.advance();
                            value.push('"');
                        }
                        // Unknown escapes are kept verbatim so regex strings like "\d" survive.
                        _ => value.push('\\'),
                    }
                }
                Some('\n') => {
                    self.advance();
                    self.line += 1;
                    self.column = 1;
                    value.push('\n');
                }
                Some(c) => {
                    self.advance();
                    value.push(c);
                }
            }
        }

        TokenKind::String(value)
    }

    /// Scan an integer or decimal literal with optional sign and exponent.
    fn scan_number(&mut self) -> TokenKind {
        let start = self.pos;
        if matches!(self.peek_char(), Some('-') | Some('+')) {
            self.advance();
        }
        while let Some(c) = self.peek_char() {
            if c.is_ascii_digit() || c == '.' {
                self.advance();
            } else if (c == 'e' || c == 'E')
                && self
                    .peek_next_char()
                    .is_some_and(|n| n.is_ascii_digit() || n == '-' || n == '+')
            {
                self.advance();
                if matches!(self.peek_char(), Some('-') | Some('+')) {
                    self.advance();
                }
            } else {
                break;
            }
        }

        // `12abc` is not a number followed by a symbol.
        if self.peek_char().is_some_and(is_symbol_char) {
            while self.peek_char().is_some_and(is_symbol_char) {
                self.advance();
            }
            return TokenKind::Error(format!("Invalid number: {}", &self.source[start..self.pos]));
        }

        let text = &self.source[start..self.pos];
        match text.parse::<f64>() {
            Ok(n) => TokenKind::Number(n),
            Err(_) => TokenKind::Error(format!("Invalid number: {}", text)),
        }
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.peek_char() {
                Some(' ') | Some('\t') | Some('\r') | Some(',') => {
                    self.advance();
                }
                Some('\n') => {
                    self.advance();
                    self.line += 1;
                    self.column = 1;
                }
                Some(';') => {
                    while let Some(c) = self.peek_char() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, c)| *c)
    }

    fn peek_next_char(&self) -> Option<char> {
        let mut iter = self.source[self.pos..].chars();
        iter.next();
        iter.next()
    }

    fn advance(&mut self) -> Option<char> {
        if let Some((i, c)) = self.chars.next() {
            self.pos = i + c.len_utf8();
            self.column += 1;
            Some(c)
        } else {
            None
        }
    }
}

fn is_symbol_start(c: char) -> bool {
    c.is_alphabetic() || "*+!-_?<>=/.&%$".contains(c)
}

fn is_symbol_char(c: char) -> bool {
    c.is_alphanumeric() || "*+!-_?<>=/.&%$'#:".contains(c)
}
