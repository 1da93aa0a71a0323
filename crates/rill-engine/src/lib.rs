//! The rill SQL engine: parse, plan, execute.
//!
//! [`Database`] is the embeddable entry point. It owns the storage for one
//! data directory, the index trees, and the session's transaction state;
//! `query` takes SQL text and always hands back a [`QueryResult`], carrying
//! a classified error when the statement failed.

pub mod error;
mod eval;
mod executor;
pub mod planner;
pub mod txn;

use std::path::Path;
use std::time::{Duration, Instant};

use tracing::debug;

use rill_core::result::QueryResult;
use rill_core::schema::TableSchema;
use rill_index::IndexManager;
use rill_sql::ast::Statement;
use rill_sql::{parse_statement, split_statements};
use rill_storage::Store;

pub use error::{EngineError, Result};
pub use planner::{JoinMethod, Plan, ScanType};

/// Default database name used when none is given.
pub const DEFAULT_DATABASE: &str = "main";

pub struct Database {
    store: Store,
    indexes: IndexManager,
    txns: txn::TransactionManager,
    current_txn: Option<u64>,
    timeout: Option<Duration>,
}

impl Database {
    /// Opens (or creates) a data directory with the default database.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        Self::open_database(root, DEFAULT_DATABASE)
    }

    pub fn open_database(root: impl AsRef<Path>, database: &str) -> Result<Self> {
        let store = Store::open(root.as_ref().to_path_buf(), database)?;
        let indexes = store.load_indexes()?;
        Ok(Database {
            store,
            indexes,
            txns: txn::TransactionManager::new(),
            current_txn: None,
            timeout: None,
        })
    }

    /// Sets the per-statement wall-clock timeout; `None` disables it.
    pub fn set_statement_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    // -- Queries -------------------------------------------------------------

    /// Executes one statement. Errors come back inside the result, already
    /// classified.
    pub fn query(&mut self, sql: &str) -> QueryResult {
        let started = Instant::now();
        let result = match parse_statement(sql) {
            Ok(statement) => self.execute(&statement),
            Err(e) => Err(EngineError::Sql(e)),
        };
        match result {
            Ok(result) => result.timed(started.elapsed()),
            Err(e) => {
                debug!(error = %e, "statement failed");
                QueryResult::failure(e.to_query_error()).timed(started.elapsed())
            }
        }
    }

    /// Splits on top-level semicolons and executes in order. Execution
    /// continues past runtime failures but stops at the first syntax error.
    pub fn query_multiple(&mut self, sql: &str) -> Vec<QueryResult> {
        let mut results = Vec::new();
        for statement in split_statements(sql) {
            let result = self.query(&statement);
            let stop = !result.success
                && result.error_code() == Some(rill_core::result::ErrorCode::Syntax);
            results.push(result);
            if stop {
                break;
            }
        }
        results
    }

    fn execute(&mut self, statement: &Statement) -> Result<QueryResult> {
        let mut exec = executor::Executor::new(
            &mut self.store,
            &mut self.indexes,
            &mut self.txns,
            &mut self.current_txn,
            self.timeout,
        );
        exec.execute(statement)
    }

    /// Plans a SELECT without executing it.
    pub fn plan(&self, sql: &str) -> Result<Plan> {
        match parse_statement(sql)? {
            Statement::Select(select) | Statement::Explain(select) => {
                planner::plan_select(&select, &self.store, &self.indexes)
            }
            _ => Err(EngineError::Internal(
                "only SELECT statements can be planned".into(),
            )),
        }
    }

    // -- Metadata ------------------------------------------------------------

    pub fn list_tables(&self) -> Vec<String> {
        self.store.list_tables()
    }

    pub fn get_schema(&self, table: &str) -> Result<&TableSchema> {
        Ok(self.store.schema(table)?)
    }

    pub fn list_databases(&self) -> Result<Vec<String>> {
        Ok(self.store.list_databases()?)
    }

    pub fn current_database(&self) -> &str {
        self.store.current_database()
    }

    /// Whether the session currently has an open transaction.
    pub fn in_transaction(&self) -> bool {
        self.current_txn.is_some()
    }

    // -- Session transaction control ------------------------------------------

    pub fn begin_transaction(&mut self) -> Result<()> {
        self.execute(&Statement::Begin).map(|_| ())
    }

    pub fn commit(&mut self) -> Result<()> {
        self.execute(&Statement::Commit).map(|_| ())
    }

    pub fn rollback(&mut self) -> Result<()> {
        self.execute(&Statement::Rollback { savepoint: None }).map(|_| ())
    }

    pub fn savepoint(&mut self, name: &str) -> Result<()> {
        self.execute(&Statement::Savepoint {
            name: name.to_string(),
        })
        .map(|_| ())
    }

    pub fn rollback_to_savepoint(&mut self, name: &str) -> Result<()> {
        self.execute(&Statement::Rollback {
            savepoint: Some(name.to_string()),
        })
        .map(|_| ())
    }

    pub fn release_savepoint(&mut self, name: &str) -> Result<()> {
        self.execute(&Statement::ReleaseSavepoint {
            name: name.to_string(),
        })
        .map(|_| ())
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("database", &self.store.current_database())
            .field("in_transaction", &self.current_txn.is_some())
            .finish_non_exhaustive()
    }
}
