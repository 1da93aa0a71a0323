//! Statement execution.
//!
//! An [`Executor`] borrows the engine's mutable state for the duration of
//! one statement. SELECT evaluation is in `select.rs`/`window.rs`, DML in
//! `dml.rs`, DDL in `ddl.rs`, expression evaluation in the crate-level
//! `eval` module.

pub(crate) mod ddl;
pub(crate) mod dml;
pub(crate) mod select;
pub(crate) mod window;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rill_core::result::QueryResult;
use rill_core::value::{Row, Value};
use rill_index::IndexManager;
use rill_sql::ast::{SelectStatement, Statement};
use rill_storage::Store;

use crate::error::{EngineError, Result};
use crate::planner;
use crate::txn::{TransactionManager, TxnOp};

pub(crate) struct Executor<'a> {
    pub store: &'a mut Store,
    pub indexes: &'a mut IndexManager,
    pub txns: &'a mut TransactionManager,
    /// The session's open transaction, if any.
    pub current_txn: &'a mut Option<u64>,
    /// Wall-clock cutoff for this statement.
    pub deadline: Option<Instant>,
    pub timeout: Option<Duration>,
    /// Outer-row stack for correlated subqueries, innermost last.
    pub(crate) outer_rows: Vec<Row>,
    /// Results of non-correlated subqueries, keyed by statement address,
    /// valid for the current statement only.
    pub(crate) subquery_cache: HashMap<usize, (Vec<String>, Vec<Vec<Value>>)>,
}

impl<'a> Executor<'a> {
    pub fn new(
        store: &'a mut Store,
        indexes: &'a mut IndexManager,
        txns: &'a mut TransactionManager,
        current_txn: &'a mut Option<u64>,
        timeout: Option<Duration>,
    ) -> Self {
        Executor {
            store,
            indexes,
            txns,
            current_txn,
            deadline: timeout.map(|t| Instant::now() + t),
            timeout,
            outer_rows: Vec::new(),
            subquery_cache: HashMap::new(),
        }
    }

    /// Cooperative cancellation check, called at scan and join boundaries.
    pub(crate) fn check_deadline(&self) -> Result<()> {
        if let (Some(deadline), Some(timeout)) = (self.deadline, self.timeout) {
            if Instant::now() > deadline {
                return Err(EngineError::Timeout(timeout));
            }
        }
        Ok(())
    }

    pub fn execute(&mut self, stmt: &Statement) -> Result<QueryResult> {
        match stmt {
            Statement::Select(select) => {
                let (columns, rows) = self.run_select(select)?;
                Ok(QueryResult::with_rows(columns, rows))
            }
            Statement::Insert(insert) => self.run_insert(insert),
            Statement::Update(update) => self.run_update(update),
            Statement::Delete(delete) => self.run_delete(delete),
            Statement::CreateTable(create) => self.run_create_table(create),
            Statement::DropTable { name, if_exists } => self.run_drop_table(name, *if_exists),
            Statement::AlterTable { table, op } => self.run_alter_table(table, op),
            Statement::CreateIndex(create) => self.run_create_index(create),
            Statement::DropIndex { table, name } => self.run_drop_index(table, name),
            Statement::CreateDatabase {
                name,
                if_not_exists,
            } => self.run_create_database(name, *if_not_exists),
            Statement::DropDatabase { name, if_exists } => {
                self.run_drop_database(name, *if_exists)
            }
            Statement::Use { database } => {
                self.store.use_database(database)?;
                *self.indexes = self.store.load_indexes()?;
                Ok(QueryResult::ok())
            }
            Statement::Begin => self.run_begin(),
            Statement::Commit => self.run_commit(),
            Statement::Rollback { savepoint } => self.run_rollback(savepoint.as_deref()),
            Statement::Savepoint { name } => self.run_savepoint(name),
            Statement::ReleaseSavepoint { name } => self.run_release_savepoint(name),
            Statement::Truncate { table } => self.run_truncate(table),
            Statement::ShowTables => self.run_show_tables(),
            Statement::ShowDatabases => self.run_show_databases(),
            Statement::Describe { table } => self.run_describe(table),
            Statement::Explain(select) => self.run_explain(select),
            Statement::SetTransactionIsolation { .. } => {
                // Recognized for client compatibility; no semantics attached.
                Ok(QueryResult::ok())
            }
        }
    }

    // -- Transaction statements ----------------------------------------------

    pub(crate) fn run_begin(&mut self) -> Result<QueryResult> {
        if let Some(id) = *self.current_txn {
            // An implicit commit of the previous transaction, MySQL-style.
            self.txns.commit(id)?;
            self.store.flush_all()?;
            self.store.save_indexes(self.indexes)?;
        }
        *self.current_txn = Some(self.txns.begin());
        Ok(QueryResult::ok())
    }

    pub(crate) fn run_commit(&mut self) -> Result<QueryResult> {
        let id = self.current_txn.take().ok_or(EngineError::NoActiveTransaction)?;
        self.txns.commit(id)?;
        self.store.flush_all()?;
        self.store.save_indexes(self.indexes)?;
        Ok(QueryResult::ok())
    }

    pub(crate) fn run_rollback(&mut self, savepoint: Option<&str>) -> Result<QueryResult> {
        let id = (*self.current_txn).ok_or(EngineError::NoActiveTransaction)?;
        match savepoint {
            Some(name) => {
                let ops = self.txns.rollback_to_savepoint(id, name)?;
                self.undo_ops(ops)?;
            }
            None => {
                let ops = self.txns.rollback(id)?;
                *self.current_txn = None;
                self.undo_ops(ops)?;
                self.store.flush_all()?;
                self.store.save_indexes(self.indexes)?;
            }
        }
        Ok(QueryResult::ok())
    }

    pub(crate) fn run_savepoint(&mut self, name: &str) -> Result<QueryResult> {
        let id = (*self.current_txn).ok_or(EngineError::NoActiveTransaction)?;
        self.txns.savepoint(id, name)?;
        Ok(QueryResult::ok())
    }

    pub(crate) fn run_release_savepoint(&mut self, name: &str) -> Result<QueryResult> {
        let id = (*self.current_txn).ok_or(EngineError::NoActiveTransaction)?;
        self.txns.release_savepoint(id, name)?;
        Ok(QueryResult::ok())
    }

    /// Applies inverse operations, newest first, bypassing constraint checks
    /// (the images were valid when logged).
    pub(crate) fn undo_ops(&mut self, ops: Vec<TxnOp>) -> Result<()> {
        for op in ops {
            match op {
                TxnOp::Insert { table, row_id, row } => {
                    self.store.table_mut(&table)?.remove(row_id);
                    self.indexes.remove_row_from_all(&table, &row, row_id)?;
                }
                TxnOp::Update {
                    table,
                    row_id,
                    before,
                    after,
                } => {
                    self.store.table_mut(&table)?.replace(row_id, before.clone());
                    self.indexes
                        .update_row_in_all(&table, &after, &before, row_id)?;
                }
                TxnOp::Delete { table, row_id, row } => {
                    self.store.table_mut(&table)?.restore(row_id, row.clone());
                    self.indexes.add_row_to_all(&table, &row, row_id)?;
                }
            }
        }
        Ok(())
    }

    // -- Mutation bookkeeping ------------------------------------------------

    /// Takes the table lock when inside an explicit transaction and reports
    /// contention from other transactions immediately.
    pub(crate) fn acquire_write(&mut self, table: &str) -> Result<()> {
        match *self.current_txn {
            Some(id) => self.txns.lock(id, table),
            None => {
                if self.txns.is_locked(table, None) {
                    Err(EngineError::LockConflict(table.to_string()))
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Persists a table (and the index file) unless an explicit transaction
    /// is open; in-transaction work is flushed at COMMIT.
    pub(crate) fn autocommit_flush(&mut self, table: &str) -> Result<()> {
        if self.current_txn.is_none() {
            self.store.flush_table(table)?;
            self.store.save_indexes(self.indexes)?;
        }
        Ok(())
    }

    // -- EXPLAIN -------------------------------------------------------------

    pub(crate) fn run_explain(&mut self, select: &SelectStatement) -> Result<QueryResult> {
        let plan = planner::plan_select(select, self.store, self.indexes)?;
        Ok(planner::render_plan(&plan))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rill_sql::parse_statement;

    struct Harness {
        _dir: tempfile::TempDir,
        store: Store,
        indexes: IndexManager,
        txns: TransactionManager,
        txn: Option<u64>,
    }

    impl Harness {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let store = Store::open(dir.path(), "main").unwrap();
            Harness {
                _dir: dir,
                store,
                indexes: IndexManager::new(),
                txns: TransactionManager::new(),
                txn: None,
            }
        }

        fn try_run(&mut self, sql: &str) -> Result<QueryResult> {
            let stmt = parse_statement(sql).unwrap();
            let mut exec = Executor::new(
                &mut self.store,
                &mut self.indexes,
                &mut self.txns,
                &mut self.txn,
                None,
            );
            exec.execute(&stmt)
        }

        fn run(&mut self, sql: &str) -> QueryResult {
            self.try_run(sql).unwrap()
        }
    }

    #[test]
    fn commit_releases_locks_and_closes_the_transaction() {
        let mut h = Harness::new();
        h.run("CREATE TABLE t (x INT)");
        h.run("BEGIN");
        h.run("INSERT INTO t VALUES (1)");
        assert!(h.txns.is_locked("t", None));
        h.run("COMMIT");
        assert!(!h.txns.is_locked("t", None));
        assert!(h.txn.is_none());
    }

    #[test]
    fn nested_begin_implicitly_commits_the_previous_transaction() {
        let mut h = Harness::new();
        h.run("CREATE TABLE t (x INT)");
        h.run("BEGIN");
        h.run("INSERT INTO t VALUES (1)");
        h.run("BEGIN");
        h.run("ROLLBACK");
        // The first transaction's insert was committed by the second BEGIN,
        // so the rollback has nothing to undo.
        let count = h.run("SELECT COUNT(*) FROM t");
        assert_eq!(count.rows, vec![vec![Value::Integer(1)]]);
    }

    #[test]
    fn commit_and_rollback_require_an_open_transaction() {
        let mut h = Harness::new();
        assert!(matches!(
            h.try_run("COMMIT"),
            Err(EngineError::NoActiveTransaction)
        ));
        assert!(matches!(
            h.try_run("ROLLBACK"),
            Err(EngineError::NoActiveTransaction)
        ));
    }

    #[test]
    fn rollback_to_unknown_savepoint_is_an_error() {
        let mut h = Harness::new();
        h.run("BEGIN");
        assert!(matches!(
            h.try_run("ROLLBACK TO SAVEPOINT missing"),
            Err(EngineError::UnknownSavepoint(name)) if name == "missing"
        ));
        // The transaction itself stays open.
        assert!(h.txn.is_some());
    }

    #[test]
    fn isolation_level_statement_is_acknowledged_without_effect() {
        let mut h = Harness::new();
        let result = h.run("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ");
        assert!(result.success);
        assert!(h.txn.is_none());
    }

    #[test]
    fn deadline_check_reports_timeout() {
        let mut h = Harness::new();
        let exec = Executor::new(
            &mut h.store,
            &mut h.indexes,
            &mut h.txns,
            &mut h.txn,
            Some(Duration::from_nanos(1)),
        );
        std::thread::sleep(Duration::from_millis(2));
        assert!(matches!(
            exec.check_deadline(),
            Err(EngineError::Timeout(_))
        ));
    }

    #[test]
    fn use_statement_switches_databases_and_reloads_indexes() {
        let mut h = Harness::new();
        h.run("CREATE TABLE t (x INT UNIQUE)");
        h.run("CREATE DATABASE other");
        h.run("USE other");
        assert!(h.store.list_tables().is_empty());
        assert!(!h.indexes.has_index("t", "uq_t_x"));
        h.run("USE main");
        assert!(h.indexes.has_index("t", "uq_t_x"));
    }
}
