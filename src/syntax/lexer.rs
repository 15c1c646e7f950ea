//! Lexer for cadenza source text.
//!
//! Converts source text into a stream of [`Token`]s. Newlines are plain
//! whitespace; every token records the line and column it starts at.

use std::sync::Arc;

use super::token::{Token, TokenKind};
use crate::diagnostic::{Diagnostic, SourceLocation};

pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
    file: Option<Arc<str>>,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
            file: None,
        }
    }

    /// Tag every location this lexer reports with a file name.
    pub fn with_file(mut self, file: Option<Arc<str>>) -> Self {
        self.file = file;
        self
    }

    pub fn tokenize(&mut self) -> Result<Vec<Token>, Diagnostic> {
        let mut tokens = Vec::new();

        loop {
            self.skip_trivia()?;

            if self.is_at_end() {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    line: self.line,
                    col: self.col,
                });
                break;
            }

            let line = self.line;
            let col = self.col;
            let ch = self.peek();

            let kind = match ch {
                '{' => self.single(TokenKind::LBrace),
                '}' => self.single(TokenKind::RBrace),
                '(' => self.single(TokenKind::LParen),
                ')' => self.single(TokenKind::RParen),
                '[' => self.single(TokenKind::LBracket),
                ']' => self.single(TokenKind::RBracket),
                ';' => self.single(TokenKind::Semicolon),
                ',' => self.single(TokenKind::Comma),
                '?' => self.single(TokenKind::Question),
                '~' => self.single(TokenKind::Tilde),
                ':' => {
                    if self.peek_next() == Some(':') {
                        self.double(TokenKind::ColonColon)
                    } else {
                        self.single(TokenKind::Colon)
                    }
                }
                '.' if self.peek_next().is_some_and(|c| c.is_ascii_digit()) => {
                    self.lex_number()?
                }
                '.' => self.single(TokenKind::Dot),
                '+' => match self.peek_next() {
                    Some('+') => self.double(TokenKind::PlusPlus),
                    Some('=') => self.double(TokenKind::PlusAssign),
                    _ => self.single(TokenKind::Plus),
                },
                '-' => match self.peek_next() {
                    Some('-') => self.double(TokenKind::MinusMinus),
                    Some('=') => self.double(TokenKind::MinusAssign),
                    Some('>') => self.double(TokenKind::RightArrow),
                    _ => self.single(TokenKind::Minus),
                },
                '*' => self.with_assign(TokenKind::Star, TokenKind::StarAssign),
                '/' => self.with_assign(TokenKind::Slash, TokenKind::SlashAssign),
                '%' => self.with_assign(TokenKind::Percent, TokenKind::PercentAssign),
                '^' => self.with_assign(TokenKind::Caret, TokenKind::CaretAssign),
                '!' => self.with_assign(TokenKind::Bang, TokenKind::NotEq),
                '=' => self.with_assign(TokenKind::Assign, TokenKind::EqEq),
                '&' => match self.peek_next() {
                    Some('&') => self.double(TokenKind::AndAnd),
                    Some('=') => self.double(TokenKind::AmpAssign),
                    _ => self.single(TokenKind::Amp),
                },
                '|' => match self.peek_next() {
                    Some('|') => self.double(TokenKind::OrOr),
                    Some('=') => self.double(TokenKind::PipeAssign),
                    _ => self.single(TokenKind::Pipe),
                },
                '<' => match self.peek_next() {
                    Some('<') => self.double(TokenKind::Shl),
                    Some('=') => self.double(TokenKind::LtEq),
                    Some('-') => self.double(TokenKind::LeftArrow),
                    _ => self.single(TokenKind::Lt),
                },
                '>' => match self.peek_next() {
                    Some('>') => self.double(TokenKind::Shr),
                    Some('=') => self.double(TokenKind::GtEq),
                    _ => self.single(TokenKind::Gt),
                },
                '"' => self.lex_string()?,
                '0'..='9' => self.lex_number()?,
                c if c.is_ascii_alphabetic() || c == '_' => self.lex_ident_or_keyword(),
                _ => {
                    return Err(self.error(format!("Unexpected character '{ch}'"), line, col));
                }
            };

            tokens.push(Token { kind, line, col });
        }

        Ok(tokens)
    }

    fn peek(&self) -> char {
        self.chars[self.pos]
    }

    fn peek_next(&self) -> Option<char> {
        self.chars.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> char {
        let ch = self.chars[self.pos];
        self.pos += 1;
        if ch == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        ch
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn error(&self, message: String, line: usize, col: usize) -> Diagnostic {
        Diagnostic::syntax(
            message,
            SourceLocation::new(line, col).in_file(self.file.clone()),
        )
    }

    fn skip_trivia(&mut self) -> Result<(), Diagnostic> {
        while !self.is_at_end() {
            let ch = self.peek();
            if ch.is_whitespace() {
                self.advance();
            } else if ch == '/' && self.peek_next() == Some('/') {
                while !self.is_at_end() && self.peek() != '\n' {
                    self.advance();
                }
            } else if ch == '/' && self.peek_next() == Some('*') {
                let line = self.line;
                let col = self.col;
                self.advance();
                self.advance();
                loop {
                    if self.is_at_end() {
                        return Err(self.error("Unterminated comment".to_string(), line, col));
                    }
                    if self.peek() == '*' && self.peek_next() == Some('/') {
                        self.advance();
                        self.advance();
                        break;
                    }
                    self.advance();
                }
            } else {
                break;
            }
        }
        Ok(())
    }

    fn single(&mut self, kind: TokenKind) -> TokenKind {
        self.advance();
        kind
    }

    fn double(&mut self, kind: TokenKind) -> TokenKind {
        self.advance();
        self.advance();
        kind
    }

    fn with_assign(&mut self, plain: TokenKind, assign: TokenKind) -> TokenKind {
        if self.peek_next() == Some('=') {
            self.double(assign)
        } else {
            self.single(plain)
        }
    }

    fn lex_string(&mut self) -> Result<TokenKind, Diagnostic> {
        let line = self.line;
        let col = self.col;
        self.advance(); // opening quote
        let mut s = String::new();
        loop {
            if self.is_at_end() || self.peek() == '\n' {
                return Err(self.error("Unterminated string literal".to_string(), line, col));
            }
            match self.advance() {
                '"' => break,
                '\\' => {
                    if self.is_at_end() {
                        return Err(
                            self.error("Unterminated string literal".to_string(), line, col)
                        );
                    }
                    let escaped = match self.advance() {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        '0' => '\0',
                        '"' => '"',
                        '\\' => '\\',
                        other => {
                            return Err(self.error(
                                format!("Unknown escape sequence '\\{other}'"),
                                self.line,
                                self.col - 1,
                            ));
                        }
                    };
                    s.push(escaped);
                }
                c => s.push(c),
            }
        }
        Ok(TokenKind::Str(s))
    }

    fn lex_number(&mut self) -> Result<TokenKind, Diagnostic> {
        let line = self.line;
        let col = self.col;

        if self.peek() == '0' && matches!(self.peek_next(), Some('x') | Some('X')) {
            self.advance();
            self.advance();
            let mut digits = String::new();
            while !self.is_at_end() && (self.peek().is_ascii_hexdigit() || self.peek() == '_') {
                let c = self.advance();
                if c != '_' {
                    digits.push(c);
                }
            }
            let value = i64::from_str_radix(&digits, 16)
                .map_err(|_| self.error("Invalid hexadecimal literal".to_string(), line, col))?;
            let wide = self.lex_int_suffix();
            return Ok(TokenKind::Int { value, wide });
        }

        let mut text = String::new();
        let mut is_float = false;

        while !self.is_at_end() && (self.peek().is_ascii_digit() || self.peek() == '_') {
            let c = self.advance();
            if c != '_' {
                text.push(c);
            }
        }

        if !self.is_at_end()
            && self.peek() == '.'
            && self.peek_next().map_or(true, |c| !c.is_ascii_alphabetic() || c == 'e' || c == 'f')
        {
            is_float = true;
            text.push(self.advance());
            while !self.is_at_end() && self.peek().is_ascii_digit() {
                text.push(self.advance());
            }
        }

        if !self.is_at_end() && matches!(self.peek(), 'e' | 'E') {
            let exponent_follows = match self.peek_next() {
                Some(c) if c.is_ascii_digit() => true,
                Some('+') | Some('-') => self
                    .chars
                    .get(self.pos + 2)
                    .is_some_and(|c| c.is_ascii_digit()),
                _ => false,
            };
            if exponent_follows {
                is_float = true;
                text.push(self.advance());
                if matches!(self.peek(), '+' | '-') {
                    text.push(self.advance());
                }
                while !self.is_at_end() && self.peek().is_ascii_digit() {
                    text.push(self.advance());
                }
            }
        }

        if !self.is_at_end() && matches!(self.peek(), 'f' | 'F') {
            self.advance();
            let single = if self.peek_suffix("64") {
                false
            } else {
                self.peek_suffix("32");
                true
            };
            let value: f64 = text
                .parse()
                .map_err(|_| self.error(format!("Invalid number '{text}'"), line, col))?;
            return Ok(TokenKind::Float { value, single });
        }

        if is_float {
            let value: f64 = text
                .parse()
                .map_err(|_| self.error(format!("Invalid number '{text}'"), line, col))?;
            return Ok(TokenKind::Float {
                value,
                single: false,
            });
        }

        let wide = self.lex_int_suffix();
        let value: i64 = text
            .parse()
            .map_err(|_| self.error(format!("Integer literal is too large: {text}"), line, col))?;
        if !wide && value > i64::from(u32::MAX) {
            return Err(self.error(
                format!("Integer literal is too large to be represented as int32: {text}"),
                line,
                col,
            ));
        }
        Ok(TokenKind::Int { value, wide })
    }

    /// Consume an `L`, `i64` or `i32` suffix. Returns true for a 64-bit suffix.
    fn lex_int_suffix(&mut self) -> bool {
        if self.is_at_end() {
            return false;
        }
        match self.peek() {
            'L' => {
                self.advance();
                true
            }
            'i' => {
                if self.chars.get(self.pos + 1) == Some(&'6') && self.chars.get(self.pos + 2) == Some(&'4') {
                    self.advance();
                    self.advance();
                    self.advance();
                    true
                } else if self.chars.get(self.pos + 1) == Some(&'3')
                    && self.chars.get(self.pos + 2) == Some(&'2')
                {
                    self.advance();
                    self.advance();
                    self.advance();
                    false
                } else {
                    false
                }
            }
            _ => false,
        }
    }

    fn peek_suffix(&mut self, suffix: &str) -> bool {
        let matches = suffix
            .chars()
            .enumerate()
            .all(|(i, c)| self.chars.get(self.pos + i) == Some(&c));
        if matches {
            for _ in 0..suffix.len() {
                self.advance();
            }
        }
        matches
    }

    fn lex_ident_or_keyword(&mut self) -> TokenKind {
        let mut word = String::new();
        while !self.is_at_end() && (self.peek().is_ascii_alphanumeric() || self.peek() == '_') {
            word.push(self.advance());
        }
        TokenKind::keyword(&word).unwrap_or(TokenKind::Ident(word))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn lex_empty() {
        assert_eq!(kinds(""), vec![TokenKind::Eof]);
    }

    #[test]
    fn lex_keywords_and_aliases() {
        assert_eq!(
            kinds("processor int float bool"),
            vec![
                TokenKind::Processor,
                TokenKind::Int32,
                TokenKind::Float32,
                TokenKind::Bool,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn lex_numeric_literals() {
        assert_eq!(
            kinds("42 7L 1.5 2.0f 3f 1e3 0x1F .5"),
            vec![
                TokenKind::Int {
                    value: 42,
                    wide: false
                },
                TokenKind::Int {
                    value: 7,
                    wide: true
                },
                TokenKind::Float {
                    value: 1.5,
                    single: false
                },
                TokenKind::Float {
                    value: 2.0,
                    single: true
                },
                TokenKind::Float {
                    value: 3.0,
                    single: true
                },
                TokenKind::Float {
                    value: 1000.0,
                    single: false
                },
                TokenKind::Int {
                    value: 31,
                    wide: false
                },
                TokenKind::Float {
                    value: 0.5,
                    single: false
                },
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn lex_arrows_and_compound_operators() {
        assert_eq!(
            kinds("out <- x; a -> b; i += 1; ++i; a::b"),
            vec![
                TokenKind::Ident("out".into()),
                TokenKind::LeftArrow,
                TokenKind::Ident("x".into()),
                TokenKind::Semicolon,
                TokenKind::Ident("a".into()),
                TokenKind::RightArrow,
                TokenKind::Ident("b".into()),
                TokenKind::Semicolon,
                TokenKind::Ident("i".into()),
                TokenKind::PlusAssign,
                TokenKind::Int {
                    value: 1,
                    wide: false
                },
                TokenKind::Semicolon,
                TokenKind::PlusPlus,
                TokenKind::Ident("i".into()),
                TokenKind::Semicolon,
                TokenKind::Ident("a".into()),
                TokenKind::ColonColon,
                TokenKind::Ident("b".into()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn lex_comments_are_skipped() {
        assert_eq!(
            kinds("// line\n/* block\n comment */ let"),
            vec![TokenKind::Let, TokenKind::Eof]
        );
    }

    #[test]
    fn lex_string_escapes() {
        assert_eq!(
            kinds(r#""a\n\"b\"""#),
            vec![TokenKind::Str("a\n\"b\"".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn lex_tracks_positions() {
        let tokens = Lexer::new("let\n  x").tokenize().unwrap();
        assert_eq!((tokens[0].line, tokens[0].col), (1, 1));
        assert_eq!((tokens[1].line, tokens[1].col), (2, 3));
    }

    #[test]
    fn lex_error_unexpected_character() {
        let err = Lexer::new("let x = 1 @ 2;").tokenize().unwrap_err();
        assert_eq!(err.full_description(), "1:11: error: Unexpected character '@'");
    }

    #[test]
    fn lex_error_unterminated_string() {
        let err = Lexer::new("\n  \"abc").tokenize().unwrap_err();
        assert_eq!(
            err.full_description(),
            "2:3: error: Unterminated string literal"
        );
    }

    #[test]
    fn lex_member_access_on_integer_is_not_float() {
        assert_eq!(
            kinds("a[1].size"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::LBracket,
                TokenKind::Int {
                    value: 1,
                    wide: false
                },
                TokenKind::RBracket,
                TokenKind::Dot,
                TokenKind::Ident("size".into()),
                TokenKind::Eof
            ]
        );
    }
}
