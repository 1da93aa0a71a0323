//! SQL tokenizer.
//!
//! Produces the token stream consumed by the parser: words, quoted strings
//! (backslash escapes, matching close quote), backtick-quoted identifiers,
//! numbers, and operators including the multi-character `<=` `>=` `!=` `<>`
//! `==`. Whitespace and line comments (`--`, `#`) are dropped; semicolons
//! come through as ordinary operator tokens so multi-statement input can be
//! split downstream.

use std::iter::Peekable;
use std::str::Chars;

use crate::error::{Result, SqlError};
use crate::token::{Token, TokenKind};

/// Tokenizes `input` in one pass.
pub fn tokenize(input: &str) -> Result<Vec<Token>> {
    Lexer::new(input).run()
}

struct Lexer<'a> {
    iter: Peekable<Chars<'a>>,
    line: u32,
    column: u32,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            iter: input.chars().peekable(),
            line: 1,
            column: 1,
        }
    }

    fn run(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        while let Some(&ch) = self.iter.peek() {
            let (line, column) = (self.line, self.column);
            match ch {
                ' ' | '\t' | '\r' | '\n' => {
                    self.bump();
                }
                '#' => self.skip_line_comment(),
                '-' if self.starts_comment() => self.skip_line_comment(),
                '\'' | '"' => {
                    let quote = ch;
                    self.bump();
                    let text = self.scan_string(quote, line, column)?;
                    let mut tok = Token::new(TokenKind::Str, text, line, column);
                    tok.quote = Some(quote);
                    tokens.push(tok);
                }
                '`' => {
                    self.bump();
                    let text = self.scan_until('`');
                    if self.bump() != Some('`') {
                        return Err(SqlError::Lex {
                            message: "unterminated backtick identifier".into(),
                            line,
                            column,
                        });
                    }
                    tokens.push(Token::new(TokenKind::Ident, text, line, column));
                }
                c if c.is_ascii_alphabetic() || c == '_' => {
                    let word = self.scan_while(|c| c.is_ascii_alphanumeric() || c == '_');
                    tokens.push(Token::new(TokenKind::Word, word, line, column));
                }
                c if c.is_ascii_digit() => {
                    let num = self.scan_number();
                    tokens.push(Token::new(TokenKind::Number, num, line, column));
                }
                _ => {
                    let op = self.scan_operator();
                    tokens.push(Token::new(TokenKind::Op, op, line, column));
                }
            }
        }
        Ok(tokens)
    }

    /// Consumes one char, tracking line/column.
    fn bump(&mut self) -> Option<char> {
        let ch = self.iter.next()?;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    /// Whether the current `-` begins a `--` comment.
    fn starts_comment(&mut self) -> bool {
        let mut clone = self.iter.clone();
        clone.next();
        clone.peek() == Some(&'-')
    }

    fn skip_line_comment(&mut self) {
        while let Some(&c) = self.iter.peek() {
            if c == '\n' {
                break;
            }
            self.bump();
        }
    }

    fn scan_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let mut out = String::new();
        while let Some(&c) = self.iter.peek() {
            if !pred(c) {
                break;
            }
            out.push(c);
            self.bump();
        }
        out
    }

    fn scan_until(&mut self, stop: char) -> String {
        self.scan_while(|c| c != stop)
    }

    /// Scans a string body after the open quote, handling `\`-escapes. The
    /// close quote must match the open one.
    fn scan_string(&mut self, quote: char, line: u32, column: u32) -> Result<String> {
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some('0') => out.push('\0'),
                    Some(c) => out.push(c),
                    None => {
                        return Err(SqlError::Lex {
                            message: "unterminated string literal".into(),
                            line,
                            column,
                        });
                    }
                },
                Some(c) if c == quote => return Ok(out),
                Some(c) => out.push(c),
                None => {
                    return Err(SqlError::Lex {
                        message: "unterminated string literal".into(),
                        line,
                        column,
                    });
                }
            }
        }
    }

    fn scan_number(&mut self) -> String {
        let mut num = self.scan_while(|c| c.is_ascii_digit());
        // One fractional part; a second '.' belongs to the next token.
        if self.iter.peek() == Some(&'.') {
            let mut clone = self.iter.clone();
            clone.next();
            if clone.peek().is_some_and(char::is_ascii_digit) {
                num.push('.');
                self.bump();
                num.push_str(&self.scan_while(|c| c.is_ascii_digit()));
            }
        }
        num
    }

    /// Scans one operator, greedily matching the two-character forms.
    fn scan_operator(&mut self) -> String {
        let first = self.bump().expect("caller peeked");
        let two = |second: char| format!("{first}{second}");
        match (first, self.iter.peek().copied()) {
            ('<', Some('=')) | ('>', Some('=')) | ('!', Some('=')) | ('=', Some('=')) => {
                let second = self.bump().expect("peeked");
                two(second)
            }
            ('<', Some('>')) => {
                self.bump();
                "<>".to_string()
            }
            _ => first.to_string(),
        }
    }
}
