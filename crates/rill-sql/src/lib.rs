//! SQL front end for rill: lexer, statement AST and parser.
//!
//! The entry points are [`parse_statement`] for one statement and
//! [`split_statements`] for breaking a script into statements on top-level
//! semicolons (quote- and comment-aware).

pub mod ast;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod token;

pub use error::{Result, SqlError};
pub use lexer::tokenize;
pub use parser::parse_statement;

/// Splits a script into individual statements on top-level semicolons.
///
/// Semicolons inside string literals, backticked identifiers and line
/// comments do not split. The semicolons themselves are not included and
/// blank pieces are dropped.
pub fn split_statements(sql: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut chars = sql.chars().peekable();
    let mut in_quote: Option<char> = None;
    let mut in_comment = false;

    while let Some(ch) = chars.next() {
        if in_comment {
            current.push(ch);
            if ch == '\n' {
                in_comment = false;
            }
            continue;
        }
        match in_quote {
            Some(quote) => {
                current.push(ch);
                if ch == '\\' && quote != '`' {
                    if let Some(escaped) = chars.next() {
                        current.push(escaped);
                    }
                } else if ch == quote {
                    in_quote = None;
                }
            }
            None => match ch {
                '\'' | '"' | '`' => {
                    in_quote = Some(ch);
                    current.push(ch);
                }
                '-' if chars.peek() == Some(&'-') => {
                    in_comment = true;
                    current.push(ch);
                }
                '#' => {
                    in_comment = true;
                    current.push(ch);
                }
                ';' => {
                    pieces.push(std::mem::take(&mut current));
                    continue;
                }
                _ => current.push(ch),
            },
        }
    }
    pieces.push(current);

    pieces
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}
