//! Parser implementation

use super::ast::*;
use crate::lexer::*;

/// Deepest literal nesting the reader accepts.
pub const MAX_READ_DEPTH: usize = 256;

/// Reads a token stream into top-level forms.
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    /// Create a new parser from a vector of tokens.
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    /// Parse every top-level form.
    pub fn parse(&mut self) -> Result<Vec<Form>, ParseError> {
        if let Some(token) = self
            .tokens
            .iter()
            .find(|t| matches!(t.kind, TokenKind::Error(_)))
        {
            let message = match &token.kind {
                TokenKind::Error(msg) => msg.clone(),
                _ => "Lexer error".to_string(),
            };
            return Err(ParseError {
                message,
                line: token.span.line,
                column: token.span.column,
            });
        }

        let mut forms = Vec::new();
        while !self.is_at_end() {
            forms.push(self.parse_form()?);
        }
        Ok(forms)
    }

    fn parse_form(&mut self) -> Result<Form, ParseError> {
        if self.depth >= MAX_READ_DEPTH {
            return Err(self.error("Forms nested too deeply"));
        }
        self.depth += 1;
        let form = self.parse_form_inner();
        self.depth -= 1;
        form
    }

    fn parse_form_inner(&mut self) -> Result<Form, ParseError> {
        let token = self.current().clone();
        match token.kind {
            TokenKind::LParen => {
                self.advance();
                let items = self.parse_until(TokenKind::RParen, "list")?;
                Ok(Form::new(FormKind::List(items), token.span))
            }
            TokenKind::HashParen => {
                self.advance();
                let items = self.parse_until(TokenKind::RParen, "anonymous function")?;
                Ok(anonymous_fn(items, token.span))
            }
            TokenKind::LBracket => {
                self.advance();
                let items = self.parse_until(TokenKind::RBracket, "vector")?;
                Ok(Form::new(FormKind::Vector(items), token.span))
            }
            TokenKind::LBrace => {
                self.advance();
                let items = self.parse_until(TokenKind::RBrace, "map")?;
                if items.len() % 2 != 0 {
                    return Err(ParseError {
                        message: "Map literal must contain an even number of forms".to_string(),
                        line: token.span.line,
                        column: token.span.column,
                    });
                }
                let mut entries = Vec::with_capacity(items.len() / 2);
                let mut iter = items.into_iter();
                while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
                    entries.push((k, v));
                }
                Ok(Form::new(FormKind::Map(entries), token.span))
            }
            TokenKind::Quote => {
                self.advance();
                if self.is_at_end() {
                    return Err(self.error("Expected a form after quote"));
                }
                let inner = self.parse_form()?;
                Ok(Form::new(FormKind::Quote(Box::new(inner)), token.span))
            }
            TokenKind::String(s) => {
                self.advance();
                Ok(Form::new(FormKind::Str(s), token.span))
            }
            TokenKind::Number(n) => {
                self.advance();
                Ok(Form::new(FormKind::Number(n), token.span))
            }
            TokenKind::Keyword(k) => {
                self.advance();
                Ok(Form::new(FormKind::Keyword(k), token.span))
            }
            TokenKind::Symbol(s) => {
                self.advance();
                let kind = match s.as_str() {
                    "nil" => FormKind::Nil,
                    "true" => FormKind::Bool(true),
                    "false" => FormKind::Bool(false),
                    _ => FormKind::Symbol(s),
                };
                Ok(Form::new(kind, token.span))
            }
            TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace => {
                Err(self.error(&format!("Unmatched delimiter {}", self.current().kind)))
            }
            TokenKind::Eof => Err(self.error("Unexpected end of input")),
            TokenKind::Error(msg) => Err(self.error(&msg)),
        }
    }

    fn parse_until(&mut self, close: TokenKind, what: &str) -> Result<Vec<Form>, ParseError> {
        let open = self.tokens[self.pos.saturating_sub(1)].span;
        let mut items = Vec::new();
        loop {
            if self.check(&close) {
                self.advance();
                return Ok(items);
            }
            if self.is_at_end() {
                return Err(ParseError {
                    message: format!("Unclosed {} (expected {})", what, close),
                    line: open.line,
                    column: open.column,
                });
            }
            items.push(self.parse_form()?);
        }
    }

    fn current(&self) -> &Token {
        // tokenize() always ends with Eof
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) {
        if !self.is_at_end() {
            self.pos += 1;
        }
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.current().kind == kind
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.tokens.len() || self.current().kind == TokenKind::Eof
    }

    fn error(&self, message: &str) -> ParseError {
        let span = self.current().span;
        ParseError {
            message: message.to_string(),
            line: span.line,
            column: span.column,
        }
    }
}

/// Expand `#(f % %2)` into `(fn [%1 %2] (f %1 %2))`.
fn anonymous_fn(body: Vec<Form>, span: Span) -> Form {
    fn scan(form: &Form, max: &mut usize, rest: &mut bool) {
        match &form.kind {
            FormKind::Symbol(s) if s == "%" => *max = (*max).max(1),
            FormKind::Symbol(s) if s == "%&" => *rest = true,
            FormKind::Symbol(s) => {
                if let Some(n) = s.strip_prefix('%').and_then(|n| n.parse::<usize>().ok()) {
                    *max = (*max).max(n);
                }
            }
            FormKind::List(items) | FormKind::Vector(items) => {
                items.iter().for_each(|f| scan(f, max, rest))
            }
            FormKind::Map(entries) => entries.iter().for_each(|(k, v)| {
                scan(k, max, rest);
                scan(v, max, rest);
            }),
            _ => {}
        }
    }

    fn rename(form: Form) -> Form {
        let kind = match form.kind {
            FormKind::Symbol(s) if s == "%" => FormKind::Symbol("%1".to_string()),
            FormKind::List(items) => FormKind::List(items.into_iter().map(rename).collect()),
            FormKind::Vector(items) => FormKind::Vector(items.into_iter().map(rename).collect()),
            FormKind::Map(entries) => FormKind::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (rename(k), rename(v)))
                    .collect(),
            ),
            other => other,
        };
        Form::new(kind, form.span)
    }

    let mut max = 0;
    let mut rest = false;
    body.iter().for_each(|f| scan(f, &mut max, &mut rest));

    let symbol = |name: String| Form::new(FormKind::Symbol(name), span);
    let mut params: Vec<Form> = (1..=max).map(|i| symbol(format!("%{}", i))).collect();
    if rest {
        params.push(symbol("&".to_string()));
        params.push(symbol("%&".to_string()));
    }
    let call = Form::new(FormKind::List(body.into_iter().map(rename).collect()), span);
    Form::new(
        FormKind::List(vec![
            symbol("fn".to_string()),
            Form::new(FormKind::Vector(params), span),
            call,
        ]),
        span,
    )
}

/// Tokenize and parse `source` in one step.
pub fn read(source: &str) -> Result<Vec<Form>, ParseError> {
    let tokens = Lexer::new(source).tokenize();
    Parser::new(tokens).parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_nested() {
        let forms = read("(def hits (search-pages \"rent\" 3)) [1 :a {:k \"v\"}]").unwrap();
        assert_eq!(forms.len(), 2);
        match &forms[0].kind {
            FormKind::List(items) => {
                assert_eq!(items[0].as_symbol(), Some("def"));
                assert!(matches!(items[2].kind, FormKind::List(_)));
            }
            other => panic!("expected list, got {:?}", other),
        }
        match &forms[1].kind {
            FormKind::Vector(items) => {
                assert_eq!(items.len(), 3);
                assert!(matches!(&items[2].kind, FormKind::Map(e) if e.len() == 1));
            }
            other => panic!("expected vector, got {:?}", other),
        }
    }

    #[test]
    fn test_literals() {
        let forms = read("nil true false 'x").unwrap();
        assert_eq!(forms[0].kind, FormKind::Nil);
        assert_eq!(forms[1].kind, FormKind::Bool(true));
        assert_eq!(forms[2].kind, FormKind::Bool(false));
        assert!(matches!(forms[3].kind, FormKind::Quote(_)));
    }

    #[test]
    fn test_unclosed_list_reports_open_position() {
        let err = read("(+ 1\n  (* 2 3)").unwrap_err();
        assert!(err.message.contains("Unclosed list"));
        assert_eq!(err.line, 1);
        assert_eq!(err.column, 1);
    }

    #[test]
    fn test_unmatched_close() {
        let err = read("(+ 1 2))").unwrap_err();
        assert!(err.message.contains("Unmatched"));
    }

    #[test]
    fn test_odd_map() {
        assert!(read("{:a}").is_err());
    }

    #[test]
    fn test_lexer_error_surfaces() {
        let err = read("(str \"open").unwrap_err();
        assert!(err.message.contains("Unterminated"));
    }

    #[test]
    fn test_display_roundtrips_shape() {
        let forms = read("(fn [x] (get x :title))").unwrap();
        assert_eq!(forms[0].to_string(), "(fn [x] (get x :title))");
    }

    #[test]
    fn test_anonymous_fn_expands() {
        let forms = read("#(get % :title)").unwrap();
        assert_eq!(forms[0].to_string(), "(fn [%1] (get %1 :title))");
        let forms = read("#(+ %1 %2)").unwrap();
        assert_eq!(forms[0].to_string(), "(fn [%1 %2] (+ %1 %2))");
    }

    #[test]
    fn test_nesting_limit() {
        let deep = "(".repeat(MAX_READ_DEPTH + 1);
        let err = read(&deep).unwrap_err();
        assert!(err.message.contains("nested too deeply"));
    }

    #[test]
    fn test_empty_source() {
        assert!(read("  ; nothing\n").unwrap().is_empty());
    }
}
