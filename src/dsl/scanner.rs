//! Scanner for the motet DSL.
//!
//! Converts source text into a stream of [`Token`]s ending with EOF. Newlines
//! are significant (they separate sequence steps) and are emitted as tokens.
//! String literals have no escape sequences; an embedded newline or a missing
//! closing quote aborts the scan.

use super::error::SyntaxError;
use super::token::{Literal, Token, TokenKind};

pub struct Scanner {
    chars: Vec<char>,
    start: usize,
    current: usize,
    line: usize,
    column: usize,
    tokens: Vec<Token>,
}

impl Scanner {
    /// Scan a whole source buffer into tokens, including the trailing EOF.
    pub fn scan(source: &str) -> Result<Vec<Token>, SyntaxError> {
        let mut scanner = Scanner {
            chars: source.chars().collect(),
            start: 0,
            current: 0,
            line: 0,
            column: 0,
            tokens: Vec::new(),
        };
        scanner.run()?;
        Ok(scanner.tokens)
    }

    fn run(&mut self) -> Result<(), SyntaxError> {
        while !self.at_end() {
            self.start = self.current;
            self.scan_token()?;
        }
        self.tokens.push(Token::eof(self.line));
        Ok(())
    }

    fn scan_token(&mut self) -> Result<(), SyntaxError> {
        let c = self.advance();

        match c {
            '"' => self.string()?,
            '(' => self.push(TokenKind::LeftParen),
            ')' => self.push(TokenKind::RightParen),
            '{' => self.push(TokenKind::LeftBrace),
            '}' => self.push(TokenKind::RightBrace),
            '[' => self.push(TokenKind::LeftBracket),
            ']' => self.push(TokenKind::RightBracket),
            ',' => self.push(TokenKind::Comma),
            '.' => self.push(TokenKind::Dot),
            '+' => self.push(TokenKind::Plus),
            '-' => self.push(TokenKind::Minus),
            '*' => self.push(TokenKind::Star),
            '/' => self.push(TokenKind::Slash),
            '%' => self.push(TokenKind::Percent),
            '?' => self.push(TokenKind::Question),
            '$' => self.push(TokenKind::Dollar),
            '@' => self.push(TokenKind::At),
            ';' => self.push(TokenKind::Semicolon),
            ':' => self.push(TokenKind::Colon),
            '#' => self.push(TokenKind::Hash),
            '|' => {
                let kind = if self.matches('|') {
                    TokenKind::DoublePipe
                } else {
                    TokenKind::Pipe
                };
                self.push(kind);
            }
            '&' => {
                let kind = if self.matches('&') {
                    TokenKind::DoubleAmpersand
                } else {
                    TokenKind::Ampersand
                };
                self.push(kind);
            }
            '!' => {
                let kind = if self.matches('=') {
                    TokenKind::BangEqual
                } else {
                    TokenKind::Bang
                };
                self.push(kind);
            }
            '=' => {
                let kind = if self.matches('=') {
                    TokenKind::EqualEqual
                } else {
                    TokenKind::Equal
                };
                self.push(kind);
            }
            '<' => {
                let kind = if self.matches('=') {
                    TokenKind::LessEqual
                } else if self.matches('<') {
                    TokenKind::LeftLeft
                } else {
                    TokenKind::Less
                };
                self.push(kind);
            }
            '>' => {
                let kind = if self.matches('=') {
                    TokenKind::GreaterEqual
                } else if self.matches('>') {
                    TokenKind::RightRight
                } else {
                    TokenKind::Greater
                };
                self.push(kind);
            }
            '\n' => {
                self.push(TokenKind::Newline);
                self.line += 1;
                self.column = 0;
            }
            ' ' | '\t' | '\r' | '\u{a0}' => {}
            c if c.is_ascii_digit() => self.number(),
            c if is_alpha(c) => self.identifier(),
            c => {
                return Err(SyntaxError::scan(
                    format!("unexpected character '{c}'"),
                    self.line,
                    self.column.saturating_sub(1),
                ));
            }
        }

        Ok(())
    }

    fn advance(&mut self) -> char {
        let c = self.chars[self.current];
        self.current += 1;
        self.column += 1;
        c
    }

    fn matches(&mut self, expected: char) -> bool {
        if self.at_end() || self.chars[self.current] != expected {
            return false;
        }
        self.current += 1;
        self.column += 1;
        true
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.current).copied()
    }

    fn peek_next(&self) -> Option<char> {
        self.chars.get(self.current + 1).copied()
    }

    fn at_end(&self) -> bool {
        self.current >= self.chars.len()
    }

    fn lexeme(&self) -> String {
        self.chars[self.start..self.current].iter().collect()
    }

    fn push(&mut self, kind: TokenKind) {
        self.push_literal(kind, None);
    }

    fn push_literal(&mut self, kind: TokenKind, literal: Option<Literal>) {
        let lexeme = self.lexeme();
        let column = self.column - lexeme.chars().count();
        self.tokens.push(Token {
            kind,
            lexeme,
            literal,
            line: self.line,
            column,
        });
    }

    fn number(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }
        if self.peek() == Some('.') && self.peek_next().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
        }

        let value: f64 = self.lexeme().parse().unwrap_or(f64::NAN);
        self.push_literal(TokenKind::Number, Some(Literal::Number(value)));
    }

    fn identifier(&mut self) {
        while self.peek().is_some_and(is_alphanumeric) {
            self.advance();
        }

        match self.lexeme().as_str() {
            "true" => self.push_literal(TokenKind::True, Some(Literal::Bool(true))),
            "false" => self.push_literal(TokenKind::False, Some(Literal::Bool(false))),
            _ => self.push(TokenKind::Identifier),
        }
    }

    fn string(&mut self) -> Result<(), SyntaxError> {
        let start_line = self.line;
        let start_column = self.column - 1;

        loop {
            match self.peek() {
                Some('"') => break,
                Some('\n') | None => {
                    return Err(SyntaxError::scan(
                        "unterminated string",
                        start_line,
                        start_column,
                    ));
                }
                Some(_) => {
                    self.advance();
                }
            }
        }
        self.advance(); // closing quote

        let value: String = self.chars[self.start + 1..self.current - 1].iter().collect();
        let lexeme = self.lexeme();
        self.tokens.push(Token {
            kind: TokenKind::Str,
            lexeme,
            literal: Some(Literal::Str(value)),
            line: start_line,
            column: start_column,
        });
        Ok(())
    }
}

fn is_alpha(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_alphanumeric(c: char) -> bool {
    is_alpha(c) || c.is_ascii_digit()
}
