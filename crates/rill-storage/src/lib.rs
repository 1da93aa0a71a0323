//! Persistent tabular storage for rill.
//!
//! A [`Store`] owns the row data and schema catalog of one active database
//! under a data directory; sibling databases are sibling subdirectories.

pub mod error;
mod persist;
pub mod store;
pub mod table;

pub use error::{Result, StorageError};
pub use store::Store;
pub use table::{InsertOutcome, TableData};
