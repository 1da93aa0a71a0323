//! Storage error types.

/// Errors that can occur in the row store and its persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("table already exists: {0}")]
    TableExists(String),

    #[error("database not found: {0}")]
    DatabaseNotFound(String),

    #[error("database already exists: {0}")]
    DatabaseExists(String),

    #[error("row {row_id} not found in table {table}")]
    RowNotFound { table: String, row_id: u64 },

    #[error("invalid schema: {0}")]
    Schema(#[from] rill_core::schema::SchemaError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt data file {path} at line {line}: {reason}")]
    Corrupt {
        path: String,
        line: usize,
        reason: String,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience alias used throughout the storage crate.
pub type Result<T> = std::result::Result<T, StorageError>;

impl StorageError {
    /// Returns `true` if this is a missing-table error.
    pub fn is_table_missing(&self) -> bool {
        matches!(self, Self::TableNotFound(_))
    }
}
