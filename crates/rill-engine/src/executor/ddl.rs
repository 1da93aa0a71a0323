//! DDL execution: tables, indexes, databases, TRUNCATE and the
//! introspection statements (SHOW, DESCRIBE).

use tracing::info;

use rill_core::result::QueryResult;
use rill_core::schema::{ForeignKeyRef, IndexDescriptor, IndexKind, TableSchema};
use rill_core::value::{Row, Value};
use rill_index::IndexKey;
use rill_sql::ast::{AlterOp, CreateIndexStatement, CreateTableStatement};

use crate::error::{EngineError, Result};
use crate::executor::Executor;

impl Executor<'_> {
    // -- CREATE / DROP TABLE -------------------------------------------------

    pub(crate) fn run_create_table(&mut self, create: &CreateTableStatement) -> Result<QueryResult> {
        if self.store.has_table(&create.name) {
            if create.if_not_exists {
                return Ok(QueryResult::ok());
            }
            return Err(rill_storage::StorageError::TableExists(create.name.clone()).into());
        }

        let mut schema = TableSchema::new(create.name.clone(), create.columns.clone());
        schema.indexes = create.indexes.clone();
        if let Some(engine) = &create.engine {
            schema.engine = engine.clone();
        }
        if let Some(charset) = &create.charset {
            schema.charset = charset.clone();
        }

        for (col, fk) in schema.foreign_keys() {
            self.check_fk_target(&schema.name, col.name.as_str(), &col.data_type, fk)?;
        }

        self.store.create_table(schema.clone())?;
        self.create_constraint_indexes(&schema)?;
        for descriptor in &schema.indexes {
            self.build_index(&schema.name, descriptor, true)?;
        }
        self.store.save_indexes(self.indexes)?;
        info!(table = %create.name, "created table");
        Ok(QueryResult::ok())
    }

    /// The synthetic indexes backing PRIMARY KEY and single-column UNIQUE
    /// constraints.
    fn create_constraint_indexes(&mut self, schema: &TableSchema) -> Result<()> {
        let pk = schema.primary_key();
        if !pk.is_empty() {
            let descriptor = IndexDescriptor {
                name: format!("pk_{}", schema.name),
                columns: pk.iter().map(|c| c.to_string()).collect(),
                unique: true,
                kind: IndexKind::BTree,
            };
            self.build_index(&schema.name, &descriptor, false)?;
        }
        for col in &schema.columns {
            if col.unique && !(col.primary_key && pk.len() == 1) {
                let descriptor = IndexDescriptor {
                    name: format!("uq_{}_{}", schema.name, col.name),
                    columns: vec![col.name.clone()],
                    unique: true,
                    kind: IndexKind::BTree,
                };
                self.build_index(&schema.name, &descriptor, false)?;
            }
        }
        Ok(())
    }

    pub(crate) fn run_drop_table(&mut self, name: &str, if_exists: bool) -> Result<QueryResult> {
        if !self.store.has_table(name) {
            if if_exists {
                return Ok(QueryResult::ok());
            }
            return Err(rill_storage::StorageError::TableNotFound(name.to_string()).into());
        }
        self.store.drop_table(name)?;
        self.indexes.drop_table(name);
        self.store.save_indexes(self.indexes)?;
        Ok(QueryResult::ok())
    }

    pub(crate) fn run_truncate(&mut self, table: &str) -> Result<QueryResult> {
        self.acquire_write(table)?;
        let affected = self.store.table(table)?.len() as u64;
        // Re-create every index empty rather than deleting entry by entry.
        let metadata: Vec<(String, Vec<String>, bool)> = self
            .indexes
            .indexes_of(table)
            .into_iter()
            .map(|(name, index)| (name.clone(), index.columns.clone(), index.unique))
            .collect();
        self.indexes.drop_table(table);
        for (name, columns, unique) in metadata {
            self.indexes
                .create_default_index(table, &name, columns, unique)?;
        }
        self.store.table_mut(table)?.clear();
        self.store.flush_table(table)?;
        self.store.save_indexes(self.indexes)?;
        Ok(QueryResult::with_affected(affected))
    }

    // -- Indexes -------------------------------------------------------------

    pub(crate) fn run_create_index(&mut self, create: &CreateIndexStatement) -> Result<QueryResult> {
        let descriptor = IndexDescriptor {
            name: create.name.clone(),
            columns: create.columns.clone(),
            unique: create.unique,
            kind: IndexKind::BTree,
        };
        self.build_index(&create.table, &descriptor, true)?;
        self.store.flush_table(&create.table)?;
        self.store.save_indexes(self.indexes)?;
        Ok(QueryResult::ok())
    }

    /// Validates columns, scans for duplicates when unique, creates the tree
    /// and loads existing rows. Optionally records the descriptor in the
    /// schema (constraint indexes stay out of the schema's index list).
    fn build_index(
        &mut self,
        table: &str,
        descriptor: &IndexDescriptor,
        record_in_schema: bool,
    ) -> Result<()> {
        let schema = self.store.schema(table)?.clone();
        for col in &descriptor.columns {
            if !schema.has_column(col) {
                return Err(EngineError::ColumnMissing(col.clone()));
            }
        }

        let rows: Vec<(u64, Row)> = self
            .store
            .table(table)?
            .iter()
            .map(|(id, row)| (id, row.clone()))
            .collect();

        if descriptor.unique {
            let mut seen = std::collections::HashSet::new();
            for (_, row) in &rows {
                let key = derive_key(&descriptor.columns, row);
                if key.0.iter().any(Value::is_null) {
                    continue;
                }
                if !seen.insert(crate::eval::tuple_key(&key.0)) {
                    return Err(EngineError::UniqueViolation(descriptor.name.clone()));
                }
            }
        }

        self.indexes.create_default_index(
            table,
            &descriptor.name,
            descriptor.columns.clone(),
            descriptor.unique,
        )?;
        for (row_id, row) in rows {
            let key = derive_key(&descriptor.columns, &row);
            self.indexes.add(table, &descriptor.name, key, row_id)?;
        }

        if record_in_schema {
            let schema = self.store.schema_mut(table)?;
            if !schema.indexes.iter().any(|d| d.name == descriptor.name) {
                schema.indexes.push(descriptor.clone());
                schema.touch();
            }
        }
        Ok(())
    }

    pub(crate) fn run_drop_index(&mut self, table: &str, name: &str) -> Result<QueryResult> {
        self.indexes.drop_index(table, name)?;
        let schema = self.store.schema_mut(table)?;
        schema.indexes.retain(|d| d.name != name);
        schema.touch();
        self.store.flush_table(table)?;
        self.store.save_indexes(self.indexes)?;
        Ok(QueryResult::ok())
    }

    // -- Databases -----------------------------------------------------------

    pub(crate) fn run_create_database(
        &mut self,
        name: &str,
        if_not_exists: bool,
    ) -> Result<QueryResult> {
        match self.store.create_database(name) {
            Ok(()) => Ok(QueryResult::ok()),
            Err(rill_storage::StorageError::DatabaseExists(_)) if if_not_exists => {
                Ok(QueryResult::ok())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) fn run_drop_database(&mut self, name: &str, if_exists: bool) -> Result<QueryResult> {
        match self.store.drop_database(name) {
            Ok(()) => Ok(QueryResult::ok()),
            Err(rill_storage::StorageError::DatabaseNotFound(_)) if if_exists => {
                Ok(QueryResult::ok())
            }
            Err(e) => Err(e.into()),
        }
    }

    // -- ALTER TABLE ---------------------------------------------------------

    pub(crate) fn run_alter_table(&mut self, table: &str, op: &AlterOp) -> Result<QueryResult> {
        self.store.schema(table)?;
        match op {
            AlterOp::AddColumn(col) => {
                if self.store.schema(table)?.has_column(&col.name) {
                    return Err(EngineError::Internal(format!(
                        "column {} already exists",
                        col.name
                    )));
                }
                if let Some(fk) = &col.references {
                    self.check_fk_target(table, &col.name, &col.data_type, fk)?;
                }
                let default = col.default.clone();
                let col_name = col.name.clone();
                let unique = col.unique;
                {
                    let schema = self.store.schema_mut(table)?;
                    schema.columns.push(col.clone());
                    schema.touch();
                    schema.validate().map_err(rill_storage::StorageError::from)?;
                }
                // Existing rows pick up the default (or null).
                let fill = default.unwrap_or(Value::Null);
                let ids: Vec<u64> =
                    self.store.table(table)?.iter().map(|(id, _)| id).collect();
                for row_id in ids {
                    if let Some(mut row) = self.store.table(table)?.get(row_id).cloned() {
                        row.insert(col_name.clone(), fill.clone());
                        self.store.table_mut(table)?.replace(row_id, row);
                    }
                }
                if unique {
                    let descriptor = IndexDescriptor {
                        name: format!("uq_{table}_{col_name}"),
                        columns: vec![col_name],
                        unique: true,
                        kind: IndexKind::BTree,
                    };
                    self.build_index(table, &descriptor, false)?;
                }
            }
            AlterOp::DropColumn(name) => {
                if !self.store.schema(table)?.has_column(name) {
                    return Err(EngineError::ColumnMissing(name.clone()));
                }
                // Indexes touching the column go away with it.
                let doomed: Vec<String> = self
                    .indexes
                    .indexes_of(table)
                    .into_iter()
                    .filter(|(_, index)| index.columns.iter().any(|c| c == name))
                    .map(|(index_name, _)| index_name.clone())
                    .collect();
                for index_name in doomed {
                    self.indexes.drop_index(table, &index_name)?;
                    self.store
                        .schema_mut(table)?
                        .indexes
                        .retain(|d| d.name != index_name);
                }
                {
                    let schema = self.store.schema_mut(table)?;
                    schema.columns.retain(|c| &c.name != name);
                    schema.touch();
                }
                let ids: Vec<u64> =
                    self.store.table(table)?.iter().map(|(id, _)| id).collect();
                for row_id in ids {
                    if let Some(mut row) = self.store.table(table)?.get(row_id).cloned() {
                        row.remove(name);
                        self.store.table_mut(table)?.replace(row_id, row);
                    }
                }
            }
            AlterOp::ModifyColumn(new_col) => {
                let schema = self.store.schema_mut(table)?;
                let slot = schema
                    .column_mut(&new_col.name)
                    .ok_or_else(|| EngineError::ColumnMissing(new_col.name.clone()))?;
                *slot = new_col.clone();
                schema.touch();
                schema.validate().map_err(rill_storage::StorageError::from)?;
            }
            AlterOp::RenameColumn { from, to } => {
                {
                    let schema = self.store.schema_mut(table)?;
                    if schema.has_column(to) {
                        return Err(EngineError::Internal(format!(
                            "column {to} already exists"
                        )));
                    }
                    let slot = schema
                        .column_mut(from)
                        .ok_or_else(|| EngineError::ColumnMissing(from.clone()))?;
                    slot.name = to.clone();
                    for descriptor in &mut schema.indexes {
                        for col in &mut descriptor.columns {
                            if col == from {
                                *col = to.clone();
                            }
                        }
                    }
                    schema.touch();
                }
                self.indexes.rename_column(table, from, to);
                // Every row's key moves with the column.
                let ids: Vec<u64> =
                    self.store.table(table)?.iter().map(|(id, _)| id).collect();
                for row_id in ids {
                    if let Some(mut row) = self.store.table(table)?.get(row_id).cloned() {
                        if let Some(value) = row.remove(from) {
                            row.insert(to.clone(), value);
                        }
                        self.store.table_mut(table)?.replace(row_id, row);
                    }
                }
                // Foreign keys elsewhere that point at the old name follow.
                let tables = self.store.list_tables();
                for other in tables {
                    let schema = self.store.schema_mut(&other)?;
                    let mut changed = false;
                    for col in &mut schema.columns {
                        if let Some(fk) = &mut col.references {
                            if fk.table == table && &fk.column == from {
                                fk.column = to.clone();
                                changed = true;
                            }
                        }
                    }
                    if changed {
                        schema.touch();
                        self.store.flush_table(&other)?;
                    }
                }
            }
            AlterOp::AddIndex(descriptor) => {
                self.build_index(table, descriptor, true)?;
            }
            AlterOp::DropIndex(name) => {
                self.indexes.drop_index(table, name)?;
                let schema = self.store.schema_mut(table)?;
                schema.indexes.retain(|d| &d.name != name);
                schema.touch();
            }
            AlterOp::AddPrimaryKey(cols) => {
                {
                    let schema = self.store.schema_mut(table)?;
                    for col in cols {
                        let slot = schema
                            .column_mut(col)
                            .ok_or_else(|| EngineError::ColumnMissing(col.clone()))?;
                        slot.primary_key = true;
                        slot.nullable = false;
                    }
                    schema.touch();
                }
                let descriptor = IndexDescriptor {
                    name: format!("pk_{table}"),
                    columns: cols.clone(),
                    unique: true,
                    kind: IndexKind::BTree,
                };
                self.build_index(table, &descriptor, false)?;
            }
            AlterOp::DropPrimaryKey => {
                {
                    let schema = self.store.schema_mut(table)?;
                    for col in &mut schema.columns {
                        col.primary_key = false;
                    }
                    schema.touch();
                }
                let pk_name = format!("pk_{table}");
                if self.indexes.has_index(table, &pk_name) {
                    self.indexes.drop_index(table, &pk_name)?;
                }
            }
            AlterOp::AddForeignKey { column, reference } => {
                let data_type = self
                    .store
                    .schema(table)?
                    .column(column)
                    .ok_or_else(|| EngineError::ColumnMissing(column.clone()))?
                    .data_type
                    .clone();
                self.check_fk_target(table, column, &data_type, reference)?;
                // Existing rows must already satisfy the constraint.
                let rows: Vec<Row> = self
                    .store
                    .table(table)?
                    .iter()
                    .map(|(_, row)| row.clone())
                    .collect();
                for row in rows {
                    let value = row.get(column).cloned().unwrap_or(Value::Null);
                    if value.is_null() {
                        continue;
                    }
                    if self
                        .indexes
                        .search(
                            &reference.table,
                            &format!("pk_{}", reference.table),
                            &IndexKey::single(value.clone()),
                        )
                        .is_empty()
                        && !self.value_exists_by_scan(&reference.table, &reference.column, &value)?
                    {
                        return Err(EngineError::FkViolation(format!(
                            "{table}.{column} = {value} has no match in {}.{}",
                            reference.table, reference.column
                        )));
                    }
                }
                let schema = self.store.schema_mut(table)?;
                let slot = schema
                    .column_mut(column)
                    .ok_or_else(|| EngineError::ColumnMissing(column.clone()))?;
                slot.references = Some(reference.clone());
                schema.touch();
            }
            AlterOp::DropForeignKey { column } => {
                let schema = self.store.schema_mut(table)?;
                let slot = schema
                    .column_mut(column)
                    .ok_or_else(|| EngineError::ColumnMissing(column.clone()))?;
                slot.references = None;
                schema.touch();
            }
            AlterOp::RenameTable(new_name) => {
                self.store.rename_table(table, new_name)?;
                self.indexes.rename_table(table, new_name);
                self.store.save_indexes(self.indexes)?;
                return Ok(QueryResult::ok());
            }
        }
        self.store.flush_table(table)?;
        self.store.save_indexes(self.indexes)?;
        Ok(QueryResult::ok())
    }

    fn value_exists_by_scan(
        &mut self,
        table: &str,
        column: &str,
        value: &Value,
    ) -> Result<bool> {
        Ok(self
            .store
            .table(table)?
            .iter()
            .any(|(_, row)| {
                row.get(column)
                    .map(|v| !v.is_null() && v.sql_eq(value))
                    .unwrap_or(false)
            }))
    }

    /// A foreign key must name an existing table and a column of compatible
    /// type. Self-references are allowed.
    fn check_fk_target(
        &self,
        own_table: &str,
        own_column: &str,
        own_type: &rill_core::types::DataType,
        fk: &ForeignKeyRef,
    ) -> Result<()> {
        let target_schema = if fk.table == own_table {
            None
        } else {
            Some(self.store.schema(&fk.table)?)
        };
        let target_col = match target_schema {
            Some(schema) => schema.column(&fk.column).cloned(),
            // Self-referencing FK: the schema is not stored yet.
            None => self.store.schema(own_table).ok().and_then(|s| s.column(&fk.column).cloned()),
        };
        let Some(target_col) = target_col else {
            if fk.table == own_table {
                return Ok(()); // checked once the table exists
            }
            return Err(EngineError::ColumnMissing(format!(
                "{}.{}",
                fk.table, fk.column
            )));
        };
        if !own_type.compatible_with(&target_col.data_type) {
            return Err(EngineError::TypeMismatch(format!(
                "{own_table}.{own_column} ({own_type}) cannot reference {}.{} ({})",
                fk.table, fk.column, target_col.data_type
            )));
        }
        Ok(())
    }

    // -- Introspection -------------------------------------------------------

    pub(crate) fn run_show_tables(&mut self) -> Result<QueryResult> {
        let rows = self
            .store
            .list_tables()
            .into_iter()
            .map(|name| vec![Value::Text(name)])
            .collect();
        Ok(QueryResult::with_rows(vec!["table".into()], rows))
    }

    pub(crate) fn run_show_databases(&mut self) -> Result<QueryResult> {
        let rows = self
            .store
            .list_databases()?
            .into_iter()
            .map(|name| vec![Value::Text(name)])
            .collect();
        Ok(QueryResult::with_rows(vec!["database".into()], rows))
    }

    pub(crate) fn run_describe(&mut self, table: &str) -> Result<QueryResult> {
        let schema = self.store.schema(table)?;
        let rows = schema
            .columns
            .iter()
            .map(|col| {
                let key = if col.primary_key {
                    "PRI"
                } else if col.unique {
                    "UNI"
                } else {
                    ""
                };
                let extra = if col.auto_increment {
                    "auto_increment"
                } else {
                    ""
                };
                vec![
                    Value::Text(col.name.clone()),
                    Value::Text(col.data_type.to_string()),
                    Value::Text(if col.nullable { "YES" } else { "NO" }.into()),
                    Value::Text(key.into()),
                    col.default.clone().unwrap_or(Value::Null),
                    Value::Text(extra.into()),
                ]
            })
            .collect();
        Ok(QueryResult::with_rows(
            vec![
                "field".into(),
                "type".into(),
                "null".into(),
                "key".into(),
                "default".into(),
                "extra".into(),
            ],
            rows,
        ))
    }
}

fn derive_key(columns: &[String], row: &Row) -> IndexKey {
    IndexKey(
        columns
            .iter()
            .map(|col| row.get(col).cloned().unwrap_or(Value::Null))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rill_index::IndexManager;
    use rill_sql::parse_statement;
    use rill_storage::Store;

    use crate::executor::Executor;
    use crate::txn::TransactionManager;

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
    fn create_table_builds_constraint_indexes() {
        let mut h = Harness::new();
        h.run("CREATE TABLE t (id INT PRIMARY KEY, email VARCHAR(64) UNIQUE)");
        assert!(h.indexes.has_index("t", "pk_t"));
        assert!(h.indexes.has_index("t", "uq_t_email"));
    }

    #[test]
    fn unique_index_build_scans_existing_rows_for_duplicates() {
        let mut h = Harness::new();
        h.run("CREATE TABLE t (x INT)");
        h.run("INSERT INTO t VALUES (1), (1)");

        let err = h.try_run("CREATE UNIQUE INDEX uq ON t (x)").unwrap_err();
        assert!(matches!(err, EngineError::UniqueViolation(_)));
        assert!(!h.indexes.has_index("t", "uq"));

        // A non-unique index over the same data is fine and gets loaded.
        h.run("CREATE INDEX ix ON t (x)");
        assert_eq!(
            h.indexes
                .search("t", "ix", &IndexKey::single(Value::Integer(1))),
            vec![1, 2]
        );
    }

    #[test]
    fn create_index_rejects_unknown_columns() {
        let mut h = Harness::new();
        h.run("CREATE TABLE t (x INT)");
        let err = h.try_run("CREATE INDEX ix ON t (missing)").unwrap_err();
        assert!(matches!(err, EngineError::ColumnMissing(c) if c == "missing"));
    }

    #[test]
    fn alter_primary_key_round_trip() {
        let mut h = Harness::new();
        h.run("CREATE TABLE t (x INT)");
        h.run("INSERT INTO t VALUES (1), (2)");

        h.run("ALTER TABLE t ADD PRIMARY KEY (x)");
        assert!(h.indexes.has_index("t", "pk_t"));
        let schema = h.store.schema("t").unwrap();
        assert_eq!(schema.primary_key(), vec!["x"]);
        assert!(!schema.column("x").unwrap().nullable);

        h.run("ALTER TABLE t DROP PRIMARY KEY");
        assert!(!h.indexes.has_index("t", "pk_t"));
        assert!(h.store.schema("t").unwrap().primary_key().is_empty());
    }

    #[test]
    fn add_foreign_key_validates_existing_rows() {
        let mut h = Harness::new();
        h.run("CREATE TABLE p (id INT PRIMARY KEY)");
        h.run("CREATE TABLE c (pid INT)");
        h.run("INSERT INTO p VALUES (1)");
        h.run("INSERT INTO c VALUES (2)");

        let err = h
            .try_run("ALTER TABLE c ADD FOREIGN KEY (pid) REFERENCES p(id)")
            .unwrap_err();
        assert!(matches!(err, EngineError::FkViolation(_)));

        h.run("UPDATE c SET pid = 1");
        h.run("ALTER TABLE c ADD FOREIGN KEY (pid) REFERENCES p(id)");
        let fk = h
            .store
            .schema("c")
            .unwrap()
            .column("pid")
            .unwrap()
            .references
            .clone()
            .unwrap();
        assert_eq!(fk.table, "p");
        assert_eq!(fk.on_delete, rill_core::schema::ReferentialAction::Restrict);
    }

    #[test]
    fn dropping_a_column_drops_indexes_that_touch_it() {
        let mut h = Harness::new();
        h.run("CREATE TABLE t (a INT, b INT)");
        h.run("CREATE INDEX ix_a ON t (a)");
        h.run("CREATE INDEX ix_ab ON t (a, b)");
        h.run("CREATE INDEX ix_b ON t (b)");

        h.run("ALTER TABLE t DROP COLUMN a");
        assert!(!h.indexes.has_index("t", "ix_a"));
        assert!(!h.indexes.has_index("t", "ix_ab"));
        assert!(h.indexes.has_index("t", "ix_b"));
        assert!(!h.store.schema("t").unwrap().has_column("a"));
    }

    #[test]
    fn truncate_keeps_index_definitions_but_empties_them() {
        let mut h = Harness::new();
        h.run("CREATE TABLE t (x INT)");
        h.run("CREATE INDEX ix ON t (x)");
        h.run("INSERT INTO t VALUES (5)");
        let key = IndexKey::single(Value::Integer(5));
        assert_eq!(h.indexes.search("t", "ix", &key), vec![1]);

        h.run("TRUNCATE TABLE t");
        assert!(h.indexes.has_index("t", "ix"));
        assert!(h.indexes.search("t", "ix", &key).is_empty());

        // New rows keep flowing into the rebuilt tree.
        h.run("INSERT INTO t VALUES (5)");
        assert_eq!(h.indexes.search("t", "ix", &key), vec![2]);
    }

    #[test]
    fn rename_column_rewrites_index_metadata_and_child_fks() {
        let mut h = Harness::new();
        h.run("CREATE TABLE p (id INT PRIMARY KEY)");
        h.run("CREATE TABLE c (pid INT REFERENCES p(id))");
        h.run("ALTER TABLE p RENAME COLUMN id TO pk");

        let index = h.indexes.get("p", "pk_p").unwrap();
        assert_eq!(index.columns, vec!["pk"]);
        let fk = h
            .store
            .schema("c")
            .unwrap()
            .column("pid")
            .unwrap()
            .references
            .clone()
            .unwrap();
        assert_eq!(fk.column, "pk");
    }
}
