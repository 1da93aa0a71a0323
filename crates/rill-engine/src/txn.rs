//! Transactions: per-transaction operation logs, savepoints and table locks.
//!
//! Rollback works by inverse application: the executor replays the log the
//! manager hands back, newest first. Images are deep copies, so undo is
//! independent of anything that happened to the live rows since.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::debug;

use rill_core::value::Row;

use crate::error::{EngineError, Result};

/// One logged mutation with the images needed to invert it.
#[derive(Debug, Clone)]
pub enum TxnOp {
    Insert {
        table: String,
        row_id: u64,
        row: Row,
    },
    Update {
        table: String,
        row_id: u64,
        before: Row,
        after: Row,
    },
    Delete {
        table: String,
        row_id: u64,
        row: Row,
    },
}

impl TxnOp {
    pub fn table(&self) -> &str {
        match self {
            TxnOp::Insert { table, .. }
            | TxnOp::Update { table, .. }
            | TxnOp::Delete { table, .. } => table,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnStatus {
    Active,
    Committed,
    RolledBack,
}

/// State of one open transaction.
#[derive(Debug)]
pub struct TransactionContext {
    pub id: u64,
    pub started_at: DateTime<Utc>,
    pub status: TxnStatus,
    ops: Vec<TxnOp>,
    savepoints: HashMap<String, usize>,
    locked: HashSet<String>,
}

impl TransactionContext {
    pub fn op_count(&self) -> usize {
        self.ops.len()
    }

    pub fn locked_tables(&self) -> impl Iterator<Item = &String> {
        self.locked.iter()
    }
}

/// All active transactions plus the table-lock table.
#[derive(Debug, Default)]
pub struct TransactionManager {
    next_id: u64,
    active: HashMap<u64, TransactionContext>,
    locks: HashMap<String, u64>,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a fresh transaction and returns its id.
    pub fn begin(&mut self) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.active.insert(
            id,
            TransactionContext {
                id,
                started_at: Utc::now(),
                status: TxnStatus::Active,
                ops: Vec::new(),
                savepoints: HashMap::new(),
                locked: HashSet::new(),
            },
        );
        debug!(txn = id, "transaction started");
        id
    }

    pub fn is_active(&self, id: u64) -> bool {
        self.active.contains_key(&id)
    }

    pub fn context(&self, id: u64) -> Option<&TransactionContext> {
        self.active.get(&id)
    }

    fn context_mut(&mut self, id: u64) -> Result<&mut TransactionContext> {
        self.active
            .get_mut(&id)
            .ok_or(EngineError::NoActiveTransaction)
    }

    // -- Locking -------------------------------------------------------------

    /// Whether another transaction than `except` holds the table.
    pub fn is_locked(&self, table: &str, except: Option<u64>) -> bool {
        match self.locks.get(table) {
            Some(&holder) => Some(holder) != except,
            None => false,
        }
    }

    /// Acquires the table lock for a transaction. Never waits: contention is
    /// an immediate [`EngineError::LockConflict`].
    pub fn lock(&mut self, id: u64, table: &str) -> Result<()> {
        if !self.active.contains_key(&id) {
            return Err(EngineError::NoActiveTransaction);
        }
        match self.locks.get(table) {
            Some(&holder) if holder != id => {
                return Err(EngineError::LockConflict(table.to_string()));
            }
            _ => {}
        }
        self.locks.insert(table.to_string(), id);
        self.context_mut(id)?.locked.insert(table.to_string());
        Ok(())
    }

    fn release_locks(&mut self, ctx: &TransactionContext) {
        for table in &ctx.locked {
            self.locks.remove(table);
        }
    }

    // -- Logging -------------------------------------------------------------

    pub fn record_insert(&mut self, id: u64, table: &str, row_id: u64, row: Row) -> Result<()> {
        self.context_mut(id)?.ops.push(TxnOp::Insert {
            table: table.to_string(),
            row_id,
            row,
        });
        Ok(())
    }

    pub fn record_update(
        &mut self,
        id: u64,
        table: &str,
        row_id: u64,
        before: Row,
        after: Row,
    ) -> Result<()> {
        self.context_mut(id)?.ops.push(TxnOp::Update {
            table: table.to_string(),
            row_id,
            before,
            after,
        });
        Ok(())
    }

    pub fn record_delete(&mut self, id: u64, table: &str, row_id: u64, row: Row) -> Result<()> {
        self.context_mut(id)?.ops.push(TxnOp::Delete {
            table: table.to_string(),
            row_id,
            row,
        });
        Ok(())
    }

    // -- Savepoints ----------------------------------------------------------

    /// Marks the current log length under `name`. Re-using a name moves the
    /// mark.
    pub fn savepoint(&mut self, id: u64, name: &str) -> Result<()> {
        let ctx = self.context_mut(id)?;
        let mark = ctx.ops.len();
        ctx.savepoints.insert(name.to_string(), mark);
        Ok(())
    }

    /// Truncates the log back to the savepoint, returning the discarded
    /// operations newest-first for inverse application. Savepoints set after
    /// the mark are forgotten; the savepoint itself stays usable.
    pub fn rollback_to_savepoint(&mut self, id: u64, name: &str) -> Result<Vec<TxnOp>> {
        let ctx = self.context_mut(id)?;
        let mark = *ctx
            .savepoints
            .get(name)
            .ok_or_else(|| EngineError::UnknownSavepoint(name.to_string()))?;
        let mut undone = ctx.ops.split_off(mark);
        undone.reverse();
        ctx.savepoints.retain(|_, &mut m| m <= mark);
        debug!(txn = id, savepoint = name, undone = undone.len(), "rolled back to savepoint");
        Ok(undone)
    }

    pub fn release_savepoint(&mut self, id: u64, name: &str) -> Result<()> {
        let ctx = self.context_mut(id)?;
        ctx.savepoints
            .remove(name)
            .ok_or_else(|| EngineError::UnknownSavepoint(name.to_string()))?;
        Ok(())
    }

    // -- Termination ---------------------------------------------------------

    /// Commits: the log is dropped and all locks release. The context is
    /// discarded (terminal state).
    pub fn commit(&mut self, id: u64) -> Result<()> {
        let mut ctx = self
            .active
            .remove(&id)
            .ok_or(EngineError::NoActiveTransaction)?;
        ctx.status = TxnStatus::Committed;
        self.release_locks(&ctx);
        debug!(txn = id, ops = ctx.ops.len(), "transaction committed");
        Ok(())
    }

    /// Rolls back: returns the whole log newest-first and releases locks.
    pub fn rollback(&mut self, id: u64) -> Result<Vec<TxnOp>> {
        let mut ctx = self
            .active
            .remove(&id)
            .ok_or(EngineError::NoActiveTransaction)?;
        ctx.status = TxnStatus::RolledBack;
        self.release_locks(&ctx);
        let mut ops = std::mem::take(&mut ctx.ops);
        ops.reverse();
        debug!(txn = id, ops = ops.len(), "transaction rolled back");
        Ok(ops)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rill_core::value::Value;

    fn row(v: i64) -> Row {
        Row::from([("x".to_string(), Value::Integer(v))])
    }

    #[test]
    fn begin_assigns_fresh_ids() {
        let mut mgr = TransactionManager::new();
        let a = mgr.begin();
        let b = mgr.begin();
        assert_ne!(a, b);
        assert!(mgr.is_active(a) && mgr.is_active(b));
    }

    #[test]
    fn commit_discards_context_and_releases_locks() {
        let mut mgr = TransactionManager::new();
        let id = mgr.begin();
        mgr.lock(id, "t").unwrap();
        assert!(mgr.is_locked("t", None));
        mgr.commit(id).unwrap();
        assert!(!mgr.is_active(id));
        assert!(!mgr.is_locked("t", None));
    }

    #[test]
    fn rollback_returns_ops_newest_first() {
        let mut mgr = TransactionManager::new();
        let id = mgr.begin();
        mgr.record_insert(id, "t", 1, row(1)).unwrap();
        mgr.record_delete(id, "t", 2, row(2)).unwrap();
        let ops = mgr.rollback(id).unwrap();
        assert_eq!(ops.len(), 2);
        assert!(matches!(ops[0], TxnOp::Delete { row_id: 2, .. }));
        assert!(matches!(ops[1], TxnOp::Insert { row_id: 1, .. }));
    }

    #[test]
    fn lock_conflict_is_immediate() {
        let mut mgr = TransactionManager::new();
        let a = mgr.begin();
        let b = mgr.begin();
        mgr.lock(a, "t").unwrap();
        // Re-entrant for the holder.
        mgr.lock(a, "t").unwrap();
        let err = mgr.lock(b, "t").unwrap_err();
        assert!(matches!(err, EngineError::LockConflict(_)));
        assert!(!mgr.is_locked("t", Some(a)));
        assert!(mgr.is_locked("t", Some(b)));
    }

    #[test]
    fn savepoint_truncates_and_returns_tail() {
        let mut mgr = TransactionManager::new();
        let id = mgr.begin();
        mgr.record_insert(id, "t", 1, row(1)).unwrap();
        mgr.savepoint(id, "sp").unwrap();
        mgr.record_insert(id, "t", 2, row(2)).unwrap();
        mgr.record_insert(id, "t", 3, row(3)).unwrap();

        let undone = mgr.rollback_to_savepoint(id, "sp").unwrap();
        assert_eq!(undone.len(), 2);
        assert!(matches!(undone[0], TxnOp::Insert { row_id: 3, .. }));
        assert_eq!(mgr.context(id).unwrap().op_count(), 1);

        // The savepoint survives and can be rolled back to again.
        mgr.record_insert(id, "t", 4, row(4)).unwrap();
        let undone = mgr.rollback_to_savepoint(id, "sp").unwrap();
        assert_eq!(undone.len(), 1);
    }

    #[test]
    fn later_savepoints_are_forgotten_on_rollback_to_earlier() {
        let mut mgr = TransactionManager::new();
        let id = mgr.begin();
        mgr.savepoint(id, "a").unwrap();
        mgr.record_insert(id, "t", 1, row(1)).unwrap();
        mgr.savepoint(id, "b").unwrap();
        mgr.rollback_to_savepoint(id, "a").unwrap();
        assert!(matches!(
            mgr.rollback_to_savepoint(id, "b"),
            Err(EngineError::UnknownSavepoint(_))
        ));
    }

    #[test]
    fn release_savepoint_forgets_the_mark() {
        let mut mgr = TransactionManager::new();
        let id = mgr.begin();
        mgr.savepoint(id, "sp").unwrap();
        mgr.release_savepoint(id, "sp").unwrap();
        assert!(matches!(
            mgr.rollback_to_savepoint(id, "sp"),
            Err(EngineError::UnknownSavepoint(_))
        ));
    }
}
