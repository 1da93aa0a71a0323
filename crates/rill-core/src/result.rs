//! Statement results as seen by callers.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Error categories surfaced to the outside world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    Syntax,
    SchemaMissing,
    ColumnMissing,
    NotNullViolation,
    UniqueViolation,
    FkViolation,
    LockConflict,
    Timeout,
    TypeMismatch,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Syntax => "Syntax",
            ErrorCode::SchemaMissing => "SchemaMissing",
            ErrorCode::ColumnMissing => "ColumnMissing",
            ErrorCode::NotNullViolation => "NotNullViolation",
            ErrorCode::UniqueViolation => "UniqueViolation",
            ErrorCode::FkViolation => "FKViolation",
            ErrorCode::LockConflict => "LockConflict",
            ErrorCode::Timeout => "Timeout",
            ErrorCode::TypeMismatch => "TypeMismatch",
            ErrorCode::Internal => "Internal",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified statement failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryError {
    pub code: ErrorCode,
    pub message: String,
    /// 1-based line in the original SQL text, when known.
    pub line: Option<u32>,
    /// 1-based column in the original SQL text, when known.
    pub column: Option<u32>,
}

impl QueryError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            line: None,
            column: None,
        }
    }

    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.line = Some(line);
        self.column = Some(column);
        self
    }
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)?;
        if let (Some(line), Some(column)) = (self.line, self.column) {
            write!(f, " (line {line}, column {column})")?;
        }
        Ok(())
    }
}

/// Result of executing one statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub success: bool,
    /// Output column names, in projection order. Empty for DML/DDL.
    pub columns: Vec<String>,
    /// Result rows, each parallel to `columns`.
    pub rows: Vec<Vec<Value>>,
    /// Rows inserted/updated/deleted by DML.
    pub affected: u64,
    /// Last auto-increment value assigned by an INSERT, if any.
    pub insert_id: Option<u64>,
    /// Wall-clock execution time in milliseconds.
    pub execution_time_ms: f64,
    pub error: Option<QueryError>,
}

impl QueryResult {
    /// A successful statement with no result set.
    pub fn ok() -> Self {
        Self {
            success: true,
            columns: Vec::new(),
            rows: Vec::new(),
            affected: 0,
            insert_id: None,
            execution_time_ms: 0.0,
            error: None,
        }
    }

    /// A successful SELECT-style result.
    pub fn with_rows(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns,
            rows,
            ..Self::ok()
        }
    }

    /// A successful DML result.
    pub fn with_affected(affected: u64) -> Self {
        Self {
            affected,
            ..Self::ok()
        }
    }

    /// A failed statement.
    pub fn failure(error: QueryError) -> Self {
        Self {
            success: false,
            error: Some(error),
            ..Self::ok()
        }
    }

    /// Stamps the measured execution time, returning `self` for chaining.
    pub fn timed(mut self, elapsed: Duration) -> Self {
        self.execution_time_ms = elapsed.as_secs_f64() * 1000.0;
        self
    }

    /// The error code, when failed.
    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error.as_ref().map(|e| e.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn ok_result_is_empty() {
        let r = QueryResult::ok();
        assert!(r.success);
        assert_eq!(r.affected, 0);
        assert!(r.rows.is_empty());
        assert!(r.error.is_none());
    }

    #[test]
    fn failure_carries_code_and_position() {
        let r = QueryResult::failure(
            QueryError::new(ErrorCode::Syntax, "unexpected token `FORM`").at(1, 8),
        );
        assert!(!r.success);
        assert_eq!(r.error_code(), Some(ErrorCode::Syntax));
        let err = r.error.unwrap();
        assert_eq!(err.line, Some(1));
        assert_eq!(err.column, Some(8));
    }

    #[test]
    fn display_includes_position() {
        let err = QueryError::new(ErrorCode::Syntax, "boom").at(2, 5);
        assert_eq!(err.to_string(), "Syntax: boom (line 2, column 5)");
    }
}
