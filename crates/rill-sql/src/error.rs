//! Lexer and parser error types.

/// Errors produced while turning SQL text into a statement tree.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SqlError {
    /// The lexer could not tokenize the input.
    #[error("{message} at line {line}, column {column}")]
    Lex {
        message: String,
        /// 1-based line.
        line: u32,
        /// 1-based column.
        column: u32,
    },

    /// The parser hit an unexpected or missing token.
    #[error("{message} near {token:?} at line {line}, column {column}")]
    Syntax {
        message: String,
        /// Text of the offending token ("end of input" at EOF).
        token: String,
        line: u32,
        column: u32,
    },
}

impl SqlError {
    /// The 1-based position of the error.
    pub fn position(&self) -> (u32, u32) {
        match self {
            SqlError::Lex { line, column, .. } | SqlError::Syntax { line, column, .. } => {
                (*line, *column)
            }
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SqlError>;
