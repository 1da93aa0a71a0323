//! Core types shared by every rill crate: runtime values, table schemas and
//! statement results.

pub mod result;
pub mod schema;
pub mod types;
pub mod value;

pub use result::{ErrorCode, QueryError, QueryResult};
pub use schema::{
    ColumnDescriptor, ForeignKeyRef, IndexDescriptor, IndexKind, ReferentialAction, SchemaError,
    TableSchema,
};
pub use types::{DataType, TypeFamily};
pub use value::{lookup, Row, Value};
