//! Tokens produced by the lexer.

use std::fmt;

/// What kind of lexeme a [`Token`] is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// A bare word: keyword or unquoted identifier.
    Word,
    /// A backtick-quoted identifier; `text` holds the contents, delimiters
    /// stripped.
    Ident,
    /// A string literal; `text` holds the unescaped contents and `quote` the
    /// delimiter it was written with.
    Str,
    /// A numeric literal.
    Number,
    /// An operator or punctuation character, including `;` and the
    /// multi-character operators `<=` `>=` `!=` `<>` `==`.
    Op,
}

/// One lexeme with its 1-based source position.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    /// Delimiter of a string literal (`'` or `"`), `None` otherwise.
    pub quote: Option<char>,
    pub line: u32,
    pub column: u32,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            kind,
            text: text.into(),
            quote: None,
            line,
            column,
        }
    }

    /// Case-insensitive keyword test. Only bare words match keywords;
    /// a backticked `` `select` `` is always an identifier.
    pub fn is_kw(&self, kw: &str) -> bool {
        self.kind == TokenKind::Word && self.text.eq_ignore_ascii_case(kw)
    }

    /// Exact operator/punctuation test.
    pub fn is_op(&self, op: &str) -> bool {
        self.kind == TokenKind::Op && self.text == op
    }

    /// Whether this token can serve as an identifier: a backticked name, or
    /// a bare word that is not reserved.
    pub fn as_identifier(&self) -> Option<&str> {
        match self.kind {
            TokenKind::Ident => Some(&self.text),
            TokenKind::Word if !is_reserved(&self.text) => Some(&self.text),
            _ => None,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Words that cannot be used as bare identifiers or aliases.
const RESERVED: &[&str] = &[
    "ALL", "ALTER", "AND", "AS", "ASC", "BEGIN", "BETWEEN", "BY", "CASE", "COMMIT", "CREATE",
    "CROSS", "DATABASE", "DELETE", "DESC", "DESCRIBE", "DISTINCT", "DROP", "ELSE", "END", "EXCEPT",
    "EXISTS", "EXPLAIN", "FROM", "FULL", "GROUP", "HAVING", "IN", "INDEX", "INNER", "INSERT",
    "INTERSECT", "INTO", "IS", "JOIN", "KEY", "LEFT", "LIKE", "LIMIT", "NOT", "NULL", "OFFSET",
    "ON", "OR", "ORDER", "OUTER", "PRIMARY", "REFERENCES", "REGEXP", "RELEASE", "RIGHT", "RLIKE",
    "ROLLBACK", "SAVEPOINT", "SELECT", "SET", "SHOW", "TABLE", "THEN", "TRUNCATE", "UNION",
    "UNIQUE", "UPDATE", "USE", "USING", "VALUES", "WHEN", "WHERE",
];

/// Whether a bare word is reserved.
pub fn is_reserved(word: &str) -> bool {
    let upper = word.to_ascii_uppercase();
    RESERVED.binary_search(&upper.as_str()).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_list_is_sorted() {
        // binary_search requires it.
        let mut sorted = RESERVED.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, RESERVED);
    }

    #[test]
    fn keyword_matching_is_case_insensitive() {
        let tok = Token::new(TokenKind::Word, "select", 1, 1);
        assert!(tok.is_kw("SELECT"));
        assert!(!tok.is_kw("INSERT"));
    }

    #[test]
    fn backticked_word_is_never_a_keyword() {
        let tok = Token::new(TokenKind::Ident, "select", 1, 1);
        assert!(!tok.is_kw("SELECT"));
        assert_eq!(tok.as_identifier(), Some("select"));
    }

    #[test]
    fn reserved_word_is_not_an_identifier() {
        let tok = Token::new(TokenKind::Word, "order", 1, 1);
        assert_eq!(tok.as_identifier(), None);
        let tok = Token::new(TokenKind::Word, "amount", 1, 1);
        assert_eq!(tok.as_identifier(), Some("amount"));
    }
}
