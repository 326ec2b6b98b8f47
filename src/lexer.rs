use crate::error::{byte_offset_to_line, Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: std::ops::Range<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Identifier(String),
    Int(i64),
    Float(f64),
    Str(String),
    Boolean(bool),
    Null,
    // Keywords
    Let,
    Fn,
    When,
    If,
    Else,
    Not,
    // Pipe-language literals
    PipeValue,
    SecondaryOutput,
    // Punctuation and operators
    Newline,
    Comma,
    Colon,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Dot,
    DotDot,
    Assign,
    Eq,
    NotEq,
    LessThan,
    LessThanEq,
    GreaterThan,
    GreaterThanEq,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    Ampersand,
    Pipe,
    PipeArrow,
    MapArrow,
    FilterArrow,
    Eof,
}

pub struct Lexer<'a> {
    chars: std::str::Chars<'a>,
    source: &'a str,
    current_index: usize,
    next_index: usize,
    peeked: Option<char>,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars(),
            source: input,
            current_index: 0,
            next_index: 0,
            peeked: None,
        }
    }

    fn error_at(&self, message: String, byte_offset: usize) -> Error {
        Error::Lex {
            message,
            line: byte_offset_to_line(self.source, byte_offset),
        }
    }

    pub fn lex(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();

        while let Some(ch) = self.peek_char() {
            if ch == '\n' {
                let start = self.current_index;
                self.advance_char();
                tokens.push(Token {
                    kind: TokenKind::Newline,
                    span: start..self.current_index,
                });
                continue;
            }

            if ch.is_whitespace() {
                self.consume_whitespace();
                continue;
            }

            let start = self.current_index;
            let token = match ch {
                'a'..='z' | 'A'..='Z' | '_' => self.read_identifier(start),
                '0'..='9' => self.read_number(start)?,
                '"' => self.read_string(start)?,
                '🍕' => self.single(TokenKind::PipeValue, start),
                '💩' => self.single(TokenKind::SecondaryOutput, start),
                ',' => self.single(TokenKind::Comma, start),
                ':' => self.single(TokenKind::Colon, start),
                '(' => self.single(TokenKind::LParen, start),
                ')' => self.single(TokenKind::RParen, start),
                '{' => self.single(TokenKind::LBrace, start),
                '}' => self.single(TokenKind::RBrace, start),
                '[' => self.single(TokenKind::LBracket, start),
                ']' => self.single(TokenKind::RBracket, start),
                '%' => self.single(TokenKind::Percent, start),
                '*' => self.single(TokenKind::Star, start),
                '&' => self.single(TokenKind::Ampersand, start),
                '-' => self.single(TokenKind::Minus, start),
                '.' => {
                    self.advance_char();
                    if matches!(self.peek_char(), Some('.')) {
                        self.advance_char();
                        Token {
                            kind: TokenKind::DotDot,
                            span: start..self.current_index,
                        }
                    } else {
                        Token {
                            kind: TokenKind::Dot,
                            span: start..self.current_index,
                        }
                    }
                }
                '+' => self.one_or_two('>', TokenKind::MapArrow, TokenKind::Plus, start),
                '|' => self.one_or_two('>', TokenKind::PipeArrow, TokenKind::Pipe, start),
                '=' => self.one_or_two('=', TokenKind::Eq, TokenKind::Assign, start),
                '!' => self.one_or_two('=', TokenKind::NotEq, TokenKind::Bang, start),
                '<' => self.one_or_two('=', TokenKind::LessThanEq, TokenKind::LessThan, start),
                '>' => self.one_or_two('=', TokenKind::GreaterThanEq, TokenKind::GreaterThan, start),
                '?' => {
                    self.advance_char();
                    if matches!(self.peek_char(), Some('>')) {
                        self.advance_char();
                        Token {
                            kind: TokenKind::FilterArrow,
                            span: start..self.current_index,
                        }
                    } else {
                        return Err(
                            self.error_at("unexpected character '?'".to_string(), start)
                        );
                    }
                }
                '/' => {
                    self.advance_char();
                    if matches!(self.peek_char(), Some('/')) {
                        self.advance_char();
                        self.consume_comment();
                        continue;
                    }
                    Token {
                        kind: TokenKind::Slash,
                        span: start..self.current_index,
                    }
                }
                _ => {
                    return Err(
                        self.error_at(format!("unexpected character '{}'", ch), start)
                    )
                }
            };

            tokens.push(token);
        }

        tokens.push(Token {
            kind: TokenKind::Eof,
            span: self.current_index..self.current_index,
        });

        Ok(tokens)
    }

    fn single(&mut self, kind: TokenKind, start: usize) -> Token {
        self.advance_char();
        Token {
            kind,
            span: start..self.current_index,
        }
    }

    fn one_or_two(
        &mut self,
        second: char,
        two_kind: TokenKind,
        one_kind: TokenKind,
        start: usize,
    ) -> Token {
        self.advance_char();
        let kind = if self.peek_char() == Some(second) {
            self.advance_char();
            two_kind
        } else {
            one_kind
        };
        Token {
            kind,
            span: start..self.current_index,
        }
    }

    fn consume_whitespace(&mut self) {
        while let Some(ch) = self.peek_char() {
            if ch.is_whitespace() && ch != '\n' {
                self.advance_char();
            } else {
                break;
            }
        }
    }

    fn consume_comment(&mut self) {
        while let Some(ch) = self.peek_char() {
            if ch == '\n' {
                break;
            }
            self.advance_char();
        }
    }

    fn read_identifier(&mut self, start: usize) -> Token {
        let mut ident = String::new();

        while let Some(ch) = self.peek_char() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                ident.push(ch);
                self.advance_char();
            } else {
                break;
            }
        }

        // A trailing ? or ! belongs to the name (predicate-style builtins).
        if let Some(ch) = self.peek_char() {
            if (ch == '?' && self.peek_after() != Some('>')) || ch == '!' {
                self.advance_char();
                ident.push(ch);
            }
        }

        let kind = match ident.as_str() {
            "let" => TokenKind::Let,
            "fn" => TokenKind::Fn,
            "when" => TokenKind::When,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "not" => TokenKind::Not,
            "true" => TokenKind::Boolean(true),
            "false" => TokenKind::Boolean(false),
            "null" => TokenKind::Null,
            _ => TokenKind::Identifier(ident),
        };

        Token {
            kind,
            span: start..self.current_index,
        }
    }

    fn read_number(&mut self, start: usize) -> Result<Token> {
        let mut number = String::new();

        while let Some(ch) = self.peek_char() {
            if ch.is_ascii_digit() {
                number.push(ch);
                self.advance_char();
            } else {
                break;
            }
        }

        // `1.5` is a float; `1..3` leaves the range operator alone.
        if self.peek_char() == Some('.') && matches!(self.peek_after(), Some('0'..='9')) {
            number.push('.');
            self.advance_char();
            while let Some(ch) = self.peek_char() {
                if ch.is_ascii_digit() {
                    number.push(ch);
                    self.advance_char();
                } else {
                    break;
                }
            }
            let value = number.parse::<f64>().map_err(|err| {
                self.error_at(format!("invalid float literal '{}': {}", number, err), start)
            })?;
            return Ok(Token {
                kind: TokenKind::Float(value),
                span: start..self.current_index,
            });
        }

        let value = number.parse::<i64>().map_err(|err| {
            self.error_at(format!("invalid number literal '{}': {}", number, err), start)
        })?;

        Ok(Token {
            kind: TokenKind::Int(value),
            span: start..self.current_index,
        })
    }

    fn read_string(&mut self, start: usize) -> Result<Token> {
        self.advance_char(); // opening quote
        let mut content = String::new();

        while let Some(ch) = self.peek_char() {
            match ch {
                '"' => {
                    self.advance_char();
                    return Ok(Token {
                        kind: TokenKind::Str(content),
                        span: start..self.current_index,
                    });
                }
                '\\' => {
                    self.advance_char();
                    let escaped = match self.peek_char() {
                        Some('"') => '"',
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some('r') => '\r',
                        Some('\\') => '\\',
                        Some(other) => {
                            return Err(self.error_at(
                                format!("unsupported escape sequence '\\{}'", other),
                                self.current_index,
                            ))
                        }
                        None => {
                            return Err(self.error_at(
                                "unterminated escape sequence in string".to_string(),
                                self.current_index,
                            ))
                        }
                    };
                    content.push(escaped);
                    self.advance_char();
                }
                _ => {
                    content.push(ch);
                    self.advance_char();
                }
            }
        }

        Err(self.error_at("unterminated string literal".to_string(), start))
    }

    fn peek_char(&mut self) -> Option<char> {
        if let Some(ch) = self.peeked {
            Some(ch)
        } else {
            self.peeked = self.chars.next();
            if let Some(ch) = self.peeked {
                self.next_index = self.current_index + ch.len_utf8();
            }
            self.peeked
        }
    }

    /// One character past the peeked one, without consuming anything.
    fn peek_after(&mut self) -> Option<char> {
        self.peek_char()?;
        self.chars.clone().next()
    }

    fn advance_char(&mut self) -> Option<char> {
        let ch = self.peek_char();
        if let Some(actual) = ch {
            self.current_index = self.next_index;
            self.peeked = None;
            Some(actual)
        } else {
            None
        }
    }
}
