//! Engine errors and their classification.
//!
//! The engine is the single place where lower-level failures are mapped onto
//! the caller-facing [`ErrorCode`] categories of a [`QueryResult`].

use std::time::Duration;

use rill_core::result::{ErrorCode, QueryError};
use rill_index::IndexError;
use rill_sql::SqlError;
use rill_storage::StorageError;

/// Anything that can make a statement fail.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Sql(#[from] SqlError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("column not found: {0}")]
    ColumnMissing(String),

    #[error("column {0} cannot be null")]
    NotNullViolation(String),

    #[error("unique constraint violated on {0}")]
    UniqueViolation(String),

    #[error("foreign key violation: {0}")]
    FkViolation(String),

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("table {0} is locked by another transaction")]
    LockConflict(String),

    #[error("statement exceeded the {0:?} timeout")]
    Timeout(Duration),

    #[error("savepoint not found: {0}")]
    UnknownSavepoint(String),

    #[error("no active transaction")]
    NoActiveTransaction,

    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the engine crate.
pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// The category reported to the caller.
    pub fn code(&self) -> ErrorCode {
        match self {
            EngineError::Sql(_) => ErrorCode::Syntax,
            EngineError::Storage(e) => match e {
                StorageError::TableNotFound(_)
                | StorageError::TableExists(_)
                | StorageError::DatabaseNotFound(_)
                | StorageError::DatabaseExists(_)
                | StorageError::Schema(_) => ErrorCode::SchemaMissing,
                _ => ErrorCode::Internal,
            },
            EngineError::Index(e) => match e {
                IndexError::UniqueViolation { .. } => ErrorCode::UniqueViolation,
                IndexError::DuplicateIndex { .. } | IndexError::UnknownIndex { .. } => {
                    ErrorCode::SchemaMissing
                }
            },
            EngineError::ColumnMissing(_) => ErrorCode::ColumnMissing,
            EngineError::NotNullViolation(_) => ErrorCode::NotNullViolation,
            EngineError::UniqueViolation(_) => ErrorCode::UniqueViolation,
            EngineError::FkViolation(_) => ErrorCode::FkViolation,
            EngineError::TypeMismatch(_) => ErrorCode::TypeMismatch,
            EngineError::LockConflict(_) => ErrorCode::LockConflict,
            EngineError::Timeout(_) => ErrorCode::Timeout,
            EngineError::UnknownSavepoint(_) | EngineError::NoActiveTransaction => {
                ErrorCode::Internal
            }
            EngineError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Converts into the wire-level error, carrying the parser position when
    /// one exists.
    pub fn to_query_error(&self) -> QueryError {
        let mut err = QueryError::new(self.code(), self.to_string());
        if let EngineError::Sql(sql) = self {
            let (line, column) = sql.position();
            err = err.at(line, column);
        }
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sql_errors_classify_as_syntax_with_position() {
        let err = EngineError::Sql(SqlError::Syntax {
            message: "expected `FROM`".into(),
            token: "FORM".into(),
            line: 2,
            column: 10,
        });
        assert_eq!(err.code(), ErrorCode::Syntax);
        let qe = err.to_query_error();
        assert_eq!((qe.line, qe.column), (Some(2), Some(10)));
    }

    #[test]
    fn storage_classification() {
        let err = EngineError::Storage(StorageError::TableNotFound("t".into()));
        assert_eq!(err.code(), ErrorCode::SchemaMissing);
        let err = EngineError::Storage(StorageError::Io(std::io::Error::other("disk")));
        assert_eq!(err.code(), ErrorCode::Internal);
    }

    #[test]
    fn constraint_classification() {
        assert_eq!(
            EngineError::NotNullViolation("name".into()).code(),
            ErrorCode::NotNullViolation
        );
        assert_eq!(
            EngineError::FkViolation("c.pid".into()).code(),
            ErrorCode::FkViolation
        );
        assert_eq!(
            EngineError::LockConflict("t".into()).code(),
            ErrorCode::LockConflict
        );
    }
}
