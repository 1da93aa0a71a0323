//! INSERT / UPDATE / DELETE execution.
//!
//! Validation order per row: types, NOT NULL, uniqueness, foreign keys,
//! referenced-side actions, then storage and index maintenance. Rows apply
//! one at a time, so when row k fails, rows before it stay applied and the
//! error names the failing row.

use rill_core::result::QueryResult;
use rill_core::schema::{ForeignKeyRef, ReferentialAction, TableSchema};
use rill_core::value::{Row, Value};
use rill_index::IndexKey;
use rill_sql::ast::{DeleteStatement, Expr, InsertStatement, UpdateStatement};

use crate::error::{EngineError, Result};
use crate::executor::Executor;

impl Executor<'_> {
    // -- INSERT --------------------------------------------------------------

    pub(crate) fn run_insert(&mut self, insert: &InsertStatement) -> Result<QueryResult> {
        let schema = self.store.schema(&insert.table)?.clone();
        self.acquire_write(&insert.table)?;

        let mut affected = 0u64;
        let mut insert_id = None;
        for (row_no, tuple) in insert.values.iter().enumerate() {
            let result = self
                .build_insert_row(&schema, &insert.columns, tuple)
                .and_then(|row| {
                    self.validate_row(&schema, &row, None)?;
                    self.apply_insert(&insert.table, row)
                });
            match result {
                Ok(outcome) => {
                    affected += 1;
                    if let Some(auto) = outcome.auto_value {
                        insert_id = Some(auto);
                    }
                }
                Err(e) if insert.ignore && is_constraint_error(&e) => continue,
                Err(e) => {
                    // Earlier rows stay applied.
                    self.autocommit_flush(&insert.table)?;
                    return Err(with_row_context(e, row_no));
                }
            }
        }

        self.autocommit_flush(&insert.table)?;
        let mut result = QueryResult::with_affected(affected);
        result.insert_id = insert_id;
        Ok(result)
    }

    /// Materializes one row from a value tuple: explicit values first, then
    /// column defaults, leaving auto-increment columns for storage to fill.
    fn build_insert_row(
        &mut self,
        schema: &TableSchema,
        columns: &[String],
        tuple: &[Expr],
    ) -> Result<Row> {
        let target_columns: Vec<&str> = if columns.is_empty() {
            schema.columns.iter().map(|c| c.name.as_str()).collect()
        } else {
            for col in columns {
                if !schema.has_column(col) {
                    return Err(EngineError::ColumnMissing(col.clone()));
                }
            }
            columns.iter().map(String::as_str).collect()
        };
        if tuple.len() != target_columns.len() {
            return Err(EngineError::TypeMismatch(format!(
                "expected {} values, got {}",
                target_columns.len(),
                tuple.len()
            )));
        }

        let empty = Row::new();
        let mut row = Row::with_capacity(schema.columns.len());
        for (col_name, expr) in target_columns.iter().zip(tuple) {
            let descriptor = schema.column(col_name).expect("validated above");
            let value = match expr {
                Expr::Default => descriptor.default.clone().unwrap_or(Value::Null),
                other => self.eval(other, &empty)?,
            };
            row.insert(descriptor.name.clone(), value);
        }
        // Unmentioned columns take their default when they have one.
        for descriptor in &schema.columns {
            if !row.contains_key(&descriptor.name) {
                if let Some(default) = &descriptor.default {
                    row.insert(descriptor.name.clone(), default.clone());
                }
            }
        }
        Ok(row)
    }

    // -- UPDATE --------------------------------------------------------------

    pub(crate) fn run_update(&mut self, update: &UpdateStatement) -> Result<QueryResult> {
        let schema = self.store.schema(&update.table)?.clone();
        for (col, _) in &update.assignments {
            if !schema.has_column(col) {
                return Err(EngineError::ColumnMissing(col.clone()));
            }
        }
        self.acquire_write(&update.table)?;

        let targets = self.matching_rows(&update.table, update.where_clause.as_ref())?;
        let mut affected = 0u64;
        for (row_id, old_row) in targets {
            let eval_row = qualify(&old_row, &update.table);
            let mut new_row = old_row.clone();
            for (col, expr) in &update.assignments {
                let descriptor = schema.column(col).expect("checked above");
                let value = match expr {
                    Expr::Default => descriptor.default.clone().unwrap_or(Value::Null),
                    other => self.eval(other, &eval_row)?,
                };
                new_row.insert(col.clone(), value);
            }

            self.validate_row(&schema, &new_row, Some(row_id))?;

            // Referenced-side actions for every changed, referenced column.
            for (col, _) in &update.assignments {
                let old_value = old_row.get(col).cloned().unwrap_or(Value::Null);
                let new_value = new_row.get(col).cloned().unwrap_or(Value::Null);
                if !old_value.sql_eq(&new_value) {
                    self.propagate_parent_update(&update.table, col, &old_value, &new_value)?;
                }
            }

            self.apply_update(&update.table, row_id, new_row)?;
            affected += 1;
        }

        self.autocommit_flush(&update.table)?;
        Ok(QueryResult::with_affected(affected))
    }

    // -- DELETE --------------------------------------------------------------

    pub(crate) fn run_delete(&mut self, delete: &DeleteStatement) -> Result<QueryResult> {
        self.store.schema(&delete.table)?;
        self.acquire_write(&delete.table)?;
        let targets = self.matching_rows(&delete.table, delete.where_clause.as_ref())?;
        let ids: Vec<u64> = targets.iter().map(|(id, _)| *id).collect();
        let affected = self.delete_rows_checked(&delete.table, &ids)?;
        self.autocommit_flush(&delete.table)?;
        Ok(QueryResult::with_affected(affected))
    }

    /// Deletes rows after applying referenced-side actions; cascade deletes
    /// re-enter here for the child table.
    fn delete_rows_checked(&mut self, table: &str, row_ids: &[u64]) -> Result<u64> {
        let referenced: Vec<String> = self.referenced_columns_of(table);
        let mut affected = 0u64;
        for &row_id in row_ids {
            let Some(row) = self.store.table(table)?.get(row_id).cloned() else {
                // Already gone via an earlier cascade in this statement.
                continue;
            };
            for col in &referenced {
                let value = row.get(col).cloned().unwrap_or(Value::Null);
                if !value.is_null() {
                    self.propagate_parent_delete(table, col, &value)?;
                }
            }
            self.apply_delete(table, row_id)?;
            affected += 1;
        }
        Ok(affected)
    }

    // -- Row-level mutation with bookkeeping ---------------------------------

    pub(crate) fn apply_insert(
        &mut self,
        table: &str,
        row: Row,
    ) -> Result<rill_storage::InsertOutcome> {
        let outcome = self.store.insert(table, row)?;
        let stored = self
            .store
            .table(table)?
            .get(outcome.row_id)
            .cloned()
            .ok_or_else(|| EngineError::Internal("freshly inserted row vanished".into()))?;
        self.indexes.add_row_to_all(table, &stored, outcome.row_id)?;
        if let Some(txn) = *self.current_txn {
            self.txns.record_insert(txn, table, outcome.row_id, stored)?;
        }
        Ok(outcome)
    }

    pub(crate) fn apply_update(&mut self, table: &str, row_id: u64, new_row: Row) -> Result<()> {
        let old_row = self
            .store
            .table_mut(table)?
            .replace(row_id, new_row.clone())
            .ok_or(rill_storage::StorageError::RowNotFound {
                table: table.to_string(),
                row_id,
            })?;
        self.indexes
            .update_row_in_all(table, &old_row, &new_row, row_id)?;
        if let Some(txn) = *self.current_txn {
            self.txns
                .record_update(txn, table, row_id, old_row, new_row)?;
        }
        Ok(())
    }

    pub(crate) fn apply_delete(&mut self, table: &str, row_id: u64) -> Result<()> {
        let row = self.store.table_mut(table)?.remove(row_id).ok_or(
            rill_storage::StorageError::RowNotFound {
                table: table.to_string(),
                row_id,
            },
        )?;
        self.indexes.remove_row_from_all(table, &row, row_id)?;
        if let Some(txn) = *self.current_txn {
            self.txns.record_delete(txn, table, row_id, row)?;
        }
        Ok(())
    }

    // -- Shared validation ---------------------------------------------------

    /// Rows of `table` matching the predicate, as `(row_id, stored row)`.
    pub(crate) fn matching_rows(
        &mut self,
        table: &str,
        predicate: Option<&Expr>,
    ) -> Result<Vec<(u64, Row)>> {
        let snapshot: Vec<(u64, Row)> = self
            .store
            .table(table)?
            .iter()
            .map(|(id, row)| (id, row.clone()))
            .collect();
        let mut out = Vec::new();
        for (i, (row_id, row)) in snapshot.into_iter().enumerate() {
            if i % 512 == 0 {
                self.check_deadline()?;
            }
            let keep = match predicate {
                None => true,
                Some(expr) => {
                    let eval_row = qualify(&row, table);
                    self.eval_predicate(expr, &eval_row)?
                }
            };
            if keep {
                out.push((row_id, row));
            }
        }
        Ok(out)
    }

    /// Type, NOT NULL, uniqueness and FK checks for a row about to be
    /// written. `exclude` is the row's own id during UPDATE.
    pub(crate) fn validate_row(
        &mut self,
        schema: &TableSchema,
        row: &Row,
        exclude: Option<u64>,
    ) -> Result<()> {
        for col in &schema.columns {
            let value = row.get(&col.name).cloned().unwrap_or(Value::Null);
            if value.is_null() {
                // Auto-increment fills in at storage time; a default would
                // already have been applied.
                if !col.nullable && !col.auto_increment {
                    return Err(EngineError::NotNullViolation(col.name.clone()));
                }
                continue;
            }
            col.data_type
                .check(&value)
                .map_err(EngineError::TypeMismatch)?;
        }

        // Uniqueness through the table's unique indexes. Keys containing a
        // null never collide, matching the usual SQL unique semantics.
        let unique_indexes: Vec<(String, IndexKey)> = self
            .indexes
            .indexes_of(&schema.name)
            .into_iter()
            .filter(|(_, index)| index.unique)
            .map(|(name, index)| (name.clone(), index.key_for(row)))
            .collect();
        for (index_name, key) in unique_indexes {
            if key.0.iter().any(Value::is_null) {
                continue;
            }
            let holders = self.indexes.search(&schema.name, &index_name, &key);
            if holders.iter().any(|&id| Some(id) != exclude) {
                return Err(EngineError::UniqueViolation(index_name));
            }
        }

        for (col, fk) in schema.foreign_keys() {
            let value = row.get(&col.name).cloned().unwrap_or(Value::Null);
            if value.is_null() {
                continue;
            }
            if !self.referenced_value_exists(fk, &value)? {
                return Err(EngineError::FkViolation(format!(
                    "{}.{} = {} has no match in {}.{}",
                    schema.name, col.name, value, fk.table, fk.column
                )));
            }
        }
        Ok(())
    }

    /// Whether the referenced table holds `fk.column = value`, preferring a
    /// single-column index over a scan.
    fn referenced_value_exists(&mut self, fk: &ForeignKeyRef, value: &Value) -> Result<bool> {
        let index_name = self
            .indexes
            .indexes_of(&fk.table)
            .into_iter()
            .find(|(_, index)| index.columns.len() == 1 && index.columns[0] == fk.column)
            .map(|(name, _)| name.clone());
        if let Some(name) = index_name {
            let key = IndexKey::single(value.clone());
            return Ok(!self.indexes.search(&fk.table, &name, &key).is_empty());
        }
        let target_column = fk.column.clone();
        let needle = value.clone();
        let rows = self.store.select(
            &fk.table,
            None,
            Some(&move |row: &Row| {
                row.get(&target_column)
                    .map(|v| !v.is_null() && v.sql_eq(&needle))
                    .unwrap_or(false)
            }),
        )?;
        Ok(!rows.is_empty())
    }

    // -- Referential actions -------------------------------------------------

    /// Columns of `parent` that some child table's FK points at.
    fn referenced_columns_of(&self, parent: &str) -> Vec<String> {
        let mut cols = Vec::new();
        for table in self.store.list_tables() {
            let Ok(schema) = self.store.schema(&table) else {
                continue;
            };
            for (_, fk) in schema.foreign_keys() {
                if fk.table == parent && !cols.contains(&fk.column) {
                    cols.push(fk.column.clone());
                }
            }
        }
        cols
    }

    /// Child tables referencing `parent.column`, with the child column name
    /// and its actions.
    fn children_of(&self, parent: &str, column: &str) -> Vec<(String, String, ForeignKeyRef)> {
        let mut out = Vec::new();
        for table in self.store.list_tables() {
            let Ok(schema) = self.store.schema(&table) else {
                continue;
            };
            for (col, fk) in schema.foreign_keys() {
                if fk.table == parent && fk.column == column {
                    out.push((table.clone(), col.name.clone(), fk.clone()));
                }
            }
        }
        out
    }

    fn rows_with_value(&mut self, table: &str, column: &str, value: &Value) -> Result<Vec<u64>> {
        Ok(self
            .store
            .table(table)?
            .iter()
            .filter(|(_, row)| {
                row.get(column)
                    .map(|v| !v.is_null() && v.sql_eq(value))
                    .unwrap_or(false)
            })
            .map(|(id, _)| id)
            .collect())
    }

    fn propagate_parent_update(
        &mut self,
        parent: &str,
        column: &str,
        old_value: &Value,
        new_value: &Value,
    ) -> Result<()> {
        for (child_table, child_col, fk) in self.children_of(parent, column) {
            let child_ids = self.rows_with_value(&child_table, &child_col, old_value)?;
            if child_ids.is_empty() {
                continue;
            }
            match fk.on_update {
                ReferentialAction::Restrict | ReferentialAction::NoAction => {
                    return Err(EngineError::FkViolation(format!(
                        "{child_table}.{child_col} still references {parent}.{column} = {old_value}"
                    )));
                }
                ReferentialAction::Cascade => {
                    self.write_child_column(&child_table, &child_col, &child_ids, new_value.clone())?;
                    // The child column may itself be referenced further down.
                    self.propagate_parent_update(&child_table, &child_col, old_value, new_value)?;
                }
                ReferentialAction::SetNull => {
                    self.write_child_column(&child_table, &child_col, &child_ids, Value::Null)?;
                }
                ReferentialAction::SetDefault => {
                    let default = self.child_default(&child_table, &child_col)?;
                    self.write_child_column(&child_table, &child_col, &child_ids, default)?;
                }
            }
        }
        Ok(())
    }

    fn propagate_parent_delete(&mut self, parent: &str, column: &str, value: &Value) -> Result<()> {
        for (child_table, child_col, fk) in self.children_of(parent, column) {
            let child_ids = self.rows_with_value(&child_table, &child_col, value)?;
            if child_ids.is_empty() {
                continue;
            }
            match fk.on_delete {
                ReferentialAction::Restrict | ReferentialAction::NoAction => {
                    return Err(EngineError::FkViolation(format!(
                        "{child_table}.{child_col} still references {parent}.{column} = {value}"
                    )));
                }
                ReferentialAction::Cascade => {
                    self.acquire_write(&child_table)?;
                    self.delete_rows_checked(&child_table, &child_ids)?;
                    self.autocommit_flush(&child_table)?;
                }
                ReferentialAction::SetNull => {
                    self.write_child_column(&child_table, &child_col, &child_ids, Value::Null)?;
                }
                ReferentialAction::SetDefault => {
                    let default = self.child_default(&child_table, &child_col)?;
                    self.write_child_column(&child_table, &child_col, &child_ids, default)?;
                }
            }
        }
        Ok(())
    }

    fn child_default(&self, table: &str, column: &str) -> Result<Value> {
        Ok(self
            .store
            .schema(table)?
            .column(column)
            .and_then(|c| c.default.clone())
            .unwrap_or(Value::Null))
    }

    fn write_child_column(
        &mut self,
        table: &str,
        column: &str,
        row_ids: &[u64],
        value: Value,
    ) -> Result<()> {
        self.acquire_write(table)?;
        for &row_id in row_ids {
            let Some(old) = self.store.table(table)?.get(row_id).cloned() else {
                continue;
            };
            let mut new_row = old;
            new_row.insert(column.to_string(), value.clone());
            self.apply_update(table, row_id, new_row)?;
        }
        self.autocommit_flush(table)?;
        Ok(())
    }
}

/// A stored row widened with `table.column` qualified keys so predicates can
/// use either spelling.
pub(crate) fn qualify(row: &Row, table: &str) -> Row {
    let mut out = row.clone();
    for (k, v) in row {
        if !k.contains('.') {
            out.insert(format!("{table}.{k}"), v.clone());
        }
    }
    out
}

fn is_constraint_error(e: &EngineError) -> bool {
    matches!(
        e,
        EngineError::NotNullViolation(_)
            | EngineError::UniqueViolation(_)
            | EngineError::FkViolation(_)
            | EngineError::TypeMismatch(_)
            | EngineError::Index(rill_index::IndexError::UniqueViolation { .. })
    )
}

/// Stamps the failing tuple's 1-based position into constraint errors so
/// multi-row INSERTs report which row broke.
fn with_row_context(e: EngineError, row_no: usize) -> EngineError {
    let n = row_no + 1;
    match e {
        EngineError::NotNullViolation(s) => {
            EngineError::NotNullViolation(format!("{s} (row {n})"))
        }
        EngineError::UniqueViolation(s) => {
            EngineError::UniqueViolation(format!("{s} (row {n})"))
        }
        EngineError::FkViolation(s) => EngineError::FkViolation(format!("{s} (row {n})")),
        EngineError::TypeMismatch(s) => EngineError::TypeMismatch(format!("{s} (row {n})")),
        other => other,
    }
}
