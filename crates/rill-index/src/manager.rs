//! Per-table index bookkeeping.
//!
//! Every index is a B-tree from composite key to the sorted set of row-ids
//! carrying that key. The manager keeps the trees consistent with row
//! mutations and answers "which index should this query use".

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use rill_core::schema::IndexKind;
use rill_core::value::{lookup, Row, Value};

use crate::btree::{BTree, RangeOp, DEFAULT_ORDER};
use crate::key::IndexKey;

/// Errors from index maintenance.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("index {index} already exists on table {table}")]
    DuplicateIndex { table: String, index: String },

    #[error("index {index} not found on table {table}")]
    UnknownIndex { table: String, index: String },

    #[error("duplicate entry {key} for unique index {index}")]
    UniqueViolation { index: String, key: String },
}

pub type Result<T> = std::result::Result<T, IndexError>;

/// One named index: its tree plus the metadata needed to derive keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableIndex {
    pub tree: BTree<IndexKey, BTreeSet<u64>>,
    pub columns: Vec<String>,
    pub unique: bool,
    pub kind: IndexKind,
}

impl TableIndex {
    /// Derives this index's key for a row: one value per indexed column,
    /// missing columns keying as null.
    pub fn key_for(&self, row: &Row) -> IndexKey {
        IndexKey(
            self.columns
                .iter()
                .map(|col| lookup(row, col).cloned().unwrap_or(Value::Null))
                .collect(),
        )
    }
}

/// All indexes, keyed by `(table, index name)`.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct IndexManager {
    tables: HashMap<String, HashMap<String, TableIndex>>,
}

impl IndexManager {
    pub fn new() -> Self {
        Self::default()
    }

    // -- Index lifecycle -----------------------------------------------------

    /// Creates an empty index. Fails when the name is already taken on the
    /// table.
    pub fn create_index(
        &mut self,
        table: &str,
        name: &str,
        columns: Vec<String>,
        unique: bool,
        kind: IndexKind,
        order: usize,
    ) -> Result<()> {
        let table_indexes = self.tables.entry(table.to_string()).or_default();
        if table_indexes.contains_key(name) {
            return Err(IndexError::DuplicateIndex {
                table: table.to_string(),
                index: name.to_string(),
            });
        }
        debug!(table, index = name, ?columns, unique, "creating index");
        table_indexes.insert(
            name.to_string(),
            TableIndex {
                tree: BTree::with_order(order.max(2)),
                columns,
                unique,
                kind,
            },
        );
        Ok(())
    }

    /// Creates an index with the default B-tree order.
    pub fn create_default_index(
        &mut self,
        table: &str,
        name: &str,
        columns: Vec<String>,
        unique: bool,
    ) -> Result<()> {
        self.create_index(table, name, columns, unique, IndexKind::BTree, DEFAULT_ORDER)
    }

    pub fn drop_index(&mut self, table: &str, name: &str) -> Result<()> {
        let removed = self
            .tables
            .get_mut(table)
            .and_then(|indexes| indexes.remove(name));
        if removed.is_none() {
            return Err(IndexError::UnknownIndex {
                table: table.to_string(),
                index: name.to_string(),
            });
        }
        debug!(table, index = name, "dropped index");
        Ok(())
    }

    /// Drops every index of a table (DROP TABLE / TRUNCATE rebuild).
    pub fn drop_table(&mut self, table: &str) {
        if self.tables.remove(table).is_some() {
            debug!(table, "dropped all indexes");
        }
    }

    pub fn rename_table(&mut self, from: &str, to: &str) {
        if let Some(indexes) = self.tables.remove(from) {
            self.tables.insert(to.to_string(), indexes);
        }
    }

    /// Rewrites a renamed column in every index's column list. Existing keys
    /// stay valid; only the derivation metadata changes.
    pub fn rename_column(&mut self, table: &str, from: &str, to: &str) {
        if let Some(indexes) = self.tables.get_mut(table) {
            for index in indexes.values_mut() {
                for col in &mut index.columns {
                    if col == from {
                        *col = to.to_string();
                    }
                }
            }
        }
    }

    pub fn get(&self, table: &str, name: &str) -> Option<&TableIndex> {
        self.tables.get(table)?.get(name)
    }

    /// All indexes of a table as `(name, index)` pairs, name-sorted for
    /// deterministic iteration.
    pub fn indexes_of(&self, table: &str) -> Vec<(&String, &TableIndex)> {
        let mut out: Vec<_> = self
            .tables
            .get(table)
            .map(|m| m.iter().collect())
            .unwrap_or_default();
        out.sort_by_key(|(name, _)| name.to_owned());
        out
    }

    pub fn has_index(&self, table: &str, name: &str) -> bool {
        self.get(table, name).is_some()
    }

    // -- Entry maintenance ---------------------------------------------------

    /// Adds `row_id` under `key`. On a unique index, an existing nonempty
    /// set that does not already contain `row_id` is a violation. Keys with
    /// a null component never collide (SQL unique semantics).
    pub fn add(&mut self, table: &str, name: &str, key: IndexKey, row_id: u64) -> Result<()> {
        let index = self.index_mut(table, name)?;
        let nullable_key = key.0.iter().any(|v| v.is_null());
        if let Some(existing) = index.tree.search(&key) {
            if index.unique && !nullable_key && !existing.is_empty() && !existing.contains(&row_id)
            {
                return Err(IndexError::UniqueViolation {
                    index: name.to_string(),
                    key: format_key(&key),
                });
            }
        }
        match index.tree.search(&key) {
            Some(_) => {
                // Re-search mutably: append to the existing set.
                let mut set = index.tree.delete(&key).expect("present");
                set.insert(row_id);
                index.tree.insert(key, set);
            }
            None => {
                index.tree.insert(key, BTreeSet::from([row_id]));
            }
        }
        Ok(())
    }

    /// Removes `row_id` from `key`, dropping the key once its set empties.
    pub fn remove(&mut self, table: &str, name: &str, key: &IndexKey, row_id: u64) -> Result<()> {
        let index = self.index_mut(table, name)?;
        if let Some(mut set) = index.tree.delete(key) {
            set.remove(&row_id);
            if !set.is_empty() {
                index.tree.insert(key.clone(), set);
            }
        }
        Ok(())
    }

    /// Adds a row to every index of its table. A unique violation rolls the
    /// already-applied additions back before returning.
    pub fn add_row_to_all(&mut self, table: &str, row: &Row, row_id: u64) -> Result<()> {
        let names: Vec<String> = self.index_names(table);
        let mut applied: Vec<(String, IndexKey)> = Vec::new();
        for name in names {
            let key = self
                .get(table, &name)
                .expect("listed index exists")
                .key_for(row);
            if let Err(e) = self.add(table, &name, key.clone(), row_id) {
                for (undo_name, undo_key) in applied {
                    let _ = self.remove(table, &undo_name, &undo_key, row_id);
                }
                return Err(e);
            }
            applied.push((name, key));
        }
        Ok(())
    }

    pub fn remove_row_from_all(&mut self, table: &str, row: &Row, row_id: u64) -> Result<()> {
        for name in self.index_names(table) {
            let key = self
                .get(table, &name)
                .expect("listed index exists")
                .key_for(row);
            self.remove(table, &name, &key, row_id)?;
        }
        Ok(())
    }

    /// Moves a row's entries for the indexes whose derived key actually
    /// changed.
    pub fn update_row_in_all(
        &mut self,
        table: &str,
        old_row: &Row,
        new_row: &Row,
        row_id: u64,
    ) -> Result<()> {
        for name in self.index_names(table) {
            let index = self.get(table, &name).expect("listed index exists");
            let old_key = index.key_for(old_row);
            let new_key = index.key_for(new_row);
            if old_key == new_key {
                continue;
            }
            self.remove(table, &name, &old_key, row_id)?;
            self.add(table, &name, new_key, row_id)?;
        }
        Ok(())
    }

    fn index_names(&self, table: &str) -> Vec<String> {
        self.indexes_of(table)
            .into_iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn index_mut(&mut self, table: &str, name: &str) -> Result<&mut TableIndex> {
        self.tables
            .get_mut(table)
            .and_then(|indexes| indexes.get_mut(name))
            .ok_or_else(|| IndexError::UnknownIndex {
                table: table.to_string(),
                index: name.to_string(),
            })
    }

    // -- Queries -------------------------------------------------------------

    /// Row-ids under exactly `key`, in ascending row-id order.
    pub fn search(&self, table: &str, name: &str, key: &IndexKey) -> Vec<u64> {
        self.get(table, name)
            .and_then(|index| index.tree.search(key))
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Row-ids for `lo <= key <= hi`, flattened in key order.
    pub fn search_range(&self, table: &str, name: &str, lo: &IndexKey, hi: &IndexKey) -> Vec<u64> {
        self.get(table, name)
            .map(|index| flatten(index.tree.search_range(lo, hi)))
            .unwrap_or_default()
    }

    /// Row-ids for `key <op> bound`, flattened in ascending key order.
    pub fn search_with_operator(
        &self,
        table: &str,
        name: &str,
        bound: &IndexKey,
        op: RangeOp,
    ) -> Vec<u64> {
        self.get(table, name)
            .map(|index| flatten(index.tree.search_with_operator(bound, op)))
            .unwrap_or_default()
    }

    // -- Index selection -----------------------------------------------------

    /// Picks the index whose leading columns best cover `cols`. Scoring:
    /// a decaying bonus per leading matched column, a large bonus when the
    /// whole of a unique index is covered, and a width penalty for indexes
    /// much wider than what they match. Returns `None` when nothing scores
    /// positive.
    pub fn find_best(&self, table: &str, cols: &[String]) -> Option<String> {
        let mut best: Option<(f64, String)> = None;
        for (name, index) in self.indexes_of(table) {
            let mut score = 0.0;
            let mut matched = 0usize;
            for (i, col) in index.columns.iter().enumerate() {
                if cols.iter().any(|c| c == col) {
                    score += 10.0 / (i + 1) as f64;
                    matched += 1;
                } else {
                    break;
                }
            }
            if matched == 0 {
                continue;
            }
            if index.unique && matched == index.columns.len() {
                score += 20.0;
            }
            if index.columns.len() > matched + 1 {
                score -= 2.0;
            }
            if score > 0.0 && best.as_ref().map_or(true, |(s, _)| score > *s) {
                best = Some((score, name.clone()));
            }
        }
        best.map(|(_, name)| name)
    }
}

fn flatten(entries: Vec<(&IndexKey, &BTreeSet<u64>)>) -> Vec<u64> {
    entries
        .into_iter()
        .flat_map(|(_, set)| set.iter().copied())
        .collect()
}

fn format_key(key: &IndexKey) -> String {
    let parts: Vec<String> = key.0.iter().map(|v| v.to_string()).collect();
    format!("({})", parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn row(pairs: &[(&str, i64)]) -> Row {
        pairs
            .iter()
            .map(|&(k, v)| (k.to_string(), Value::Integer(v)))
            .collect()
    }

    fn manager_with(table: &str, name: &str, columns: &[&str], unique: bool) -> IndexManager {
        let mut mgr = IndexManager::new();
        mgr.create_index(
            table,
            name,
            columns.iter().map(|c| c.to_string()).collect(),
            unique,
            IndexKind::BTree,
            3,
        )
        .unwrap();
        mgr
    }

    #[test]
    fn create_duplicate_index_fails() {
        let mut mgr = manager_with("t", "ix", &["a"], false);
        let err = mgr
            .create_index("t", "ix", vec!["a".into()], false, IndexKind::BTree, 3)
            .unwrap_err();
        assert!(matches!(err, IndexError::DuplicateIndex { .. }));
    }

    #[test]
    fn add_and_search_accumulates_row_ids() {
        let mut mgr = manager_with("t", "ix", &["a"], false);
        let key = IndexKey::single(Value::Integer(7));
        mgr.add("t", "ix", key.clone(), 1).unwrap();
        mgr.add("t", "ix", key.clone(), 3).unwrap();
        mgr.add("t", "ix", key.clone(), 2).unwrap();
        assert_eq!(mgr.search("t", "ix", &key), vec![1, 2, 3]);
    }

    #[test]
    fn unique_index_rejects_second_row() {
        let mut mgr = manager_with("t", "uq", &["a"], true);
        let key = IndexKey::single(Value::Integer(1));
        mgr.add("t", "uq", key.clone(), 10).unwrap();
        // Same row-id again is fine (idempotent re-add).
        mgr.add("t", "uq", key.clone(), 10).unwrap();
        let err = mgr.add("t", "uq", key, 11).unwrap_err();
        assert!(matches!(err, IndexError::UniqueViolation { .. }));
    }

    #[test]
    fn unique_index_allows_multiple_nulls() {
        let mut mgr = manager_with("t", "uq", &["a"], true);
        let key = IndexKey::single(Value::Null);
        mgr.add("t", "uq", key.clone(), 1).unwrap();
        mgr.add("t", "uq", key.clone(), 2).unwrap();
        assert_eq!(mgr.search("t", "uq", &key), vec![1, 2]);
    }

    #[test]
    fn remove_drops_emptied_keys() {
        let mut mgr = manager_with("t", "ix", &["a"], false);
        let key = IndexKey::single(Value::Integer(5));
        mgr.add("t", "ix", key.clone(), 1).unwrap();
        mgr.remove("t", "ix", &key, 1).unwrap();
        assert!(mgr.search("t", "ix", &key).is_empty());
        assert!(!mgr.get("t", "ix").unwrap().tree.has(&key));
    }

    #[test]
    fn fan_out_add_remove_update() {
        let mut mgr = manager_with("t", "by_a", &["a"], false);
        mgr.create_index("t", "by_ab", vec!["a".into(), "b".into()], false, IndexKind::BTree, 3)
            .unwrap();

        let r1 = row(&[("a", 1), ("b", 2)]);
        mgr.add_row_to_all("t", &r1, 100).unwrap();
        assert_eq!(
            mgr.search("t", "by_a", &IndexKey::single(Value::Integer(1))),
            vec![100]
        );

        // Change b only: by_a key unchanged, by_ab key moves.
        let r2 = row(&[("a", 1), ("b", 9)]);
        mgr.update_row_in_all("t", &r1, &r2, 100).unwrap();
        let old_ab = IndexKey(vec![Value::Integer(1), Value::Integer(2)]);
        let new_ab = IndexKey(vec![Value::Integer(1), Value::Integer(9)]);
        assert!(mgr.search("t", "by_ab", &old_ab).is_empty());
        assert_eq!(mgr.search("t", "by_ab", &new_ab), vec![100]);

        mgr.remove_row_from_all("t", &r2, 100).unwrap();
        assert!(mgr
            .search("t", "by_a", &IndexKey::single(Value::Integer(1)))
            .is_empty());
    }

    #[test]
    fn fan_out_unique_violation_rolls_back() {
        let mut mgr = manager_with("t", "by_a", &["a"], false);
        mgr.create_index("t", "uq_b", vec!["b".into()], true, IndexKind::BTree, 3)
            .unwrap();

        mgr.add_row_to_all("t", &row(&[("a", 1), ("b", 5)]), 1).unwrap();
        // Second row collides on b; the by_a entry must not survive.
        let err = mgr
            .add_row_to_all("t", &row(&[("a", 2), ("b", 5)]), 2)
            .unwrap_err();
        assert!(matches!(err, IndexError::UniqueViolation { .. }));
        assert!(mgr
            .search("t", "by_a", &IndexKey::single(Value::Integer(2)))
            .is_empty());
    }

    #[test]
    fn range_and_operator_queries_flatten_in_key_order() {
        let mut mgr = manager_with("t", "ix", &["a"], false);
        for (row_id, a) in [(1u64, 5i64), (2, 3), (3, 8), (4, 3), (5, 1)] {
            mgr.add("t", "ix", IndexKey::single(Value::Integer(a)), row_id)
                .unwrap();
        }
        assert_eq!(
            mgr.search_range(
                "t",
                "ix",
                &IndexKey::single(Value::Integer(3)),
                &IndexKey::single(Value::Integer(5))
            ),
            vec![2, 4, 1]
        );
        assert_eq!(
            mgr.search_with_operator(
                "t",
                "ix",
                &IndexKey::single(Value::Integer(3)),
                RangeOp::Gt
            ),
            vec![1, 3]
        );
    }

    #[test]
    fn find_best_prefers_unique_full_match() {
        let mut mgr = manager_with("t", "by_ab", &["a", "b"], false);
        mgr.create_index("t", "uq_a", vec!["a".into()], true, IndexKind::BTree, 3)
            .unwrap();
        let best = mgr.find_best("t", &["a".to_string()]);
        assert_eq!(best.as_deref(), Some("uq_a"));
    }

    #[test]
    fn find_best_requires_leading_column() {
        let mgr = manager_with("t", "by_ab", &["a", "b"], false);
        assert_eq!(mgr.find_best("t", &["b".to_string()]), None);
    }
}
