//! [`Store`] -- the directory-backed table store.
//!
//! Owns every table of the active database exclusively; all mutation goes
//! through its methods. Writes are flushed per table at statement boundaries
//! by the caller ([`Store::flush_table`]), not per row.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use tracing::{debug, info};

use rill_core::schema::TableSchema;
use rill_core::value::Row;
use rill_index::IndexManager;

use crate::error::{Result, StorageError};
use crate::persist;
use crate::table::{InsertOutcome, TableData};

pub struct Store {
    root: PathBuf,
    database: String,
    tables: HashMap<String, TableData>,
}

impl Store {
    /// Opens (or creates) the data directory and loads the given database.
    pub fn open(root: impl Into<PathBuf>, database: &str) -> Result<Self> {
        let root = root.into();
        info!(?root, database, "opening store");
        fs::create_dir_all(root.join(database))?;
        let mut store = Self {
            root,
            database: database.to_string(),
            tables: HashMap::new(),
        };
        store.load_database()?;
        Ok(store)
    }

    fn db_dir(&self) -> PathBuf {
        self.root.join(&self.database)
    }

    fn load_database(&mut self) -> Result<()> {
        self.tables.clear();
        let dir = self.db_dir();
        for name in persist::list_tables(&dir)? {
            let table = persist::load_table(&dir, &name)?;
            debug!(table = %name, rows = table.len(), "loaded table");
            self.tables.insert(name, table);
        }
        Ok(())
    }

    // -- Databases -----------------------------------------------------------

    pub fn current_database(&self) -> &str {
        &self.database
    }

    /// Sibling subdirectories of the root, sorted.
    pub fn list_databases(&self) -> Result<Vec<String>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    out.push(name.to_string());
                }
            }
        }
        out.sort();
        Ok(out)
    }

    pub fn create_database(&self, name: &str) -> Result<()> {
        let dir = self.root.join(name);
        if dir.exists() {
            return Err(StorageError::DatabaseExists(name.to_string()));
        }
        fs::create_dir_all(dir)?;
        info!(database = name, "created database");
        Ok(())
    }

    /// Removes a database directory. Dropping the active database leaves the
    /// session tableless until the next `USE`.
    pub fn drop_database(&mut self, name: &str) -> Result<()> {
        let dir = self.root.join(name);
        if !dir.is_dir() {
            return Err(StorageError::DatabaseNotFound(name.to_string()));
        }
        fs::remove_dir_all(dir)?;
        if name == self.database {
            self.tables.clear();
        }
        info!(database = name, "dropped database");
        Ok(())
    }

    /// Flushes the active database and switches to another existing one.
    pub fn use_database(&mut self, name: &str) -> Result<()> {
        if !self.root.join(name).is_dir() {
            return Err(StorageError::DatabaseNotFound(name.to_string()));
        }
        self.flush_all()?;
        self.database = name.to_string();
        self.load_database()?;
        info!(database = name, "switched database");
        Ok(())
    }

    // -- Catalog -------------------------------------------------------------

    pub fn create_table(&mut self, schema: TableSchema) -> Result<()> {
        schema.validate()?;
        if self.tables.contains_key(&schema.name) {
            return Err(StorageError::TableExists(schema.name.clone()));
        }
        let name = schema.name.clone();
        let table = TableData::new(schema);
        persist::save_table(&self.db_dir(), &name, &table)?;
        self.tables.insert(name.clone(), table);
        info!(table = %name, "created table");
        Ok(())
    }

    pub fn drop_table(&mut self, name: &str) -> Result<()> {
        if self.tables.remove(name).is_none() {
            return Err(StorageError::TableNotFound(name.to_string()));
        }
        persist::remove_table_files(&self.db_dir(), name)?;
        info!(table = name, "dropped table");
        Ok(())
    }

    pub fn rename_table(&mut self, from: &str, to: &str) -> Result<()> {
        let mut table = self
            .tables
            .remove(from)
            .ok_or_else(|| StorageError::TableNotFound(from.to_string()))?;
        table.schema.name = to.to_string();
        table.schema.touch();
        persist::remove_table_files(&self.db_dir(), from)?;
        persist::save_table(&self.db_dir(), to, &table)?;
        self.tables.insert(to.to_string(), table);
        Ok(())
    }

    pub fn list_tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn schema(&self, name: &str) -> Result<&TableSchema> {
        self.table(name).map(|t| &t.schema)
    }

    /// Mutable schema access for ALTER TABLE; the caller flushes afterwards.
    pub fn schema_mut(&mut self, name: &str) -> Result<&mut TableSchema> {
        self.table_mut(name).map(|t| &mut t.schema)
    }

    pub fn table(&self, name: &str) -> Result<&TableData> {
        self.tables
            .get(name)
            .ok_or_else(|| StorageError::TableNotFound(name.to_string()))
    }

    pub fn table_mut(&mut self, name: &str) -> Result<&mut TableData> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| StorageError::TableNotFound(name.to_string()))
    }

    // -- Row operations ------------------------------------------------------

    /// Inserts a row, assigning its row-id and auto-increment value.
    pub fn insert(&mut self, table: &str, row: Row) -> Result<InsertOutcome> {
        Ok(self.table_mut(table)?.insert(row))
    }

    /// Applies `patch` to every row matching `predicate` (all rows when
    /// `None`), returning the affected count.
    pub fn update_where(
        &mut self,
        table: &str,
        patch: &Row,
        predicate: Option<&dyn Fn(&Row) -> bool>,
    ) -> Result<u64> {
        let data = self.table_mut(table)?;
        let targets: Vec<u64> = data
            .iter()
            .filter(|(_, row)| predicate.map_or(true, |p| p(row)))
            .map(|(id, _)| id)
            .collect();
        for &row_id in &targets {
            let mut row = data.get(row_id).cloned().expect("listed row exists");
            for (col, value) in patch {
                row.insert(col.clone(), value.clone());
            }
            data.replace(row_id, row);
        }
        Ok(targets.len() as u64)
    }

    /// Deletes every row matching `predicate` (all rows when `None`).
    pub fn delete_where(
        &mut self,
        table: &str,
        predicate: Option<&dyn Fn(&Row) -> bool>,
    ) -> Result<u64> {
        let data = self.table_mut(table)?;
        let targets: Vec<u64> = data
            .iter()
            .filter(|(_, row)| predicate.map_or(true, |p| p(row)))
            .map(|(id, _)| id)
            .collect();
        for &row_id in &targets {
            data.remove(row_id);
        }
        Ok(targets.len() as u64)
    }

    /// Rows matching `predicate`, optionally narrowed to a projection of
    /// columns, in row-id order.
    pub fn select(
        &self,
        table: &str,
        projection: Option<&[String]>,
        predicate: Option<&dyn Fn(&Row) -> bool>,
    ) -> Result<Vec<Row>> {
        let data = self.table(table)?;
        let mut out = Vec::new();
        for (_, row) in data.iter() {
            if predicate.map_or(true, |p| p(row)) {
                out.push(match projection {
                    None => row.clone(),
                    Some(cols) => cols
                        .iter()
                        .filter_map(|c| row.get(c).map(|v| (c.clone(), v.clone())))
                        .collect(),
                });
            }
        }
        Ok(out)
    }

    // -- Persistence ---------------------------------------------------------

    pub fn flush_table(&self, name: &str) -> Result<()> {
        let table = self.table(name)?;
        persist::save_table(&self.db_dir(), name, table)
    }

    pub fn flush_all(&self) -> Result<()> {
        for (name, table) in &self.tables {
            persist::save_table(&self.db_dir(), name, table)?;
        }
        Ok(())
    }

    pub fn save_indexes(&self, manager: &IndexManager) -> Result<()> {
        persist::save_indexes(&self.db_dir(), manager)
    }

    pub fn load_indexes(&self) -> Result<IndexManager> {
        persist::load_indexes(&self.db_dir())
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("database", &self.database)
            .field("tables", &self.tables.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rill_core::schema::ColumnDescriptor;
    use rill_core::types::DataType;
    use rill_core::value::Value;

    fn users_schema() -> TableSchema {
        TableSchema::new(
            "users",
            vec![
                ColumnDescriptor {
                    primary_key: true,
                    auto_increment: true,
                    nullable: false,
                    ..ColumnDescriptor::new("id", DataType::Int)
                },
                ColumnDescriptor::new("name", DataType::VarChar(32)),
                ColumnDescriptor::new("age", DataType::Int),
            ],
        )
    }

    fn user(name: &str, age: i64) -> Row {
        Row::from([
            ("name".to_string(), Value::Text(name.into())),
            ("age".to_string(), Value::Integer(age)),
        ])
    }

    #[test]
    fn create_insert_select() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open(dir.path(), "main").unwrap();
        store.create_table(users_schema()).unwrap();
        store.insert("users", user("ada", 36)).unwrap();
        store.insert("users", user("brian", 41)).unwrap();

        let adults = store
            .select("users", None, Some(&|row: &Row| {
                row.get("age").and_then(Value::as_i64).unwrap_or(0) >= 40
            }))
            .unwrap();
        assert_eq!(adults.len(), 1);
        assert_eq!(adults[0].get("name"), Some(&Value::Text("brian".into())));
    }

    #[test]
    fn duplicate_create_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open(dir.path(), "main").unwrap();
        store.create_table(users_schema()).unwrap();
        assert!(matches!(
            store.create_table(users_schema()),
            Err(StorageError::TableExists(_))
        ));
    }

    #[test]
    fn update_and_delete_where() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open(dir.path(), "main").unwrap();
        store.create_table(users_schema()).unwrap();
        for (n, a) in [("a", 10), ("b", 20), ("c", 30)] {
            store.insert("users", user(n, a)).unwrap();
        }

        let patch = Row::from([("age".to_string(), Value::Integer(99))]);
        let updated = store
            .update_where(
                "users",
                &patch,
                Some(&|row: &Row| row.get("age").and_then(Value::as_i64) == Some(20)),
            )
            .unwrap();
        assert_eq!(updated, 1);

        let deleted = store.delete_where("users", None).unwrap();
        assert_eq!(deleted, 3);
        assert!(store.table("users").unwrap().is_empty());
    }

    #[test]
    fn reopen_restores_state() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = Store::open(dir.path(), "main").unwrap();
            store.create_table(users_schema()).unwrap();
            store.insert("users", user("ada", 36)).unwrap();
            store.flush_all().unwrap();
        }
        let store = Store::open(dir.path(), "main").unwrap();
        assert_eq!(store.list_tables(), vec!["users"]);
        let table = store.table("users").unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.next_row_id(), 2);
        assert_eq!(
            table.get(1).unwrap().get("name"),
            Some(&Value::Text("ada".into()))
        );
    }

    #[test]
    fn database_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open(dir.path(), "main").unwrap();
        store.create_database("analytics").unwrap();
        assert!(matches!(
            store.create_database("analytics"),
            Err(StorageError::DatabaseExists(_))
        ));
        assert_eq!(
            store.list_databases().unwrap(),
            vec!["analytics", "main"]
        );

        store.create_table(users_schema()).unwrap();
        store.use_database("analytics").unwrap();
        assert!(store.list_tables().is_empty());

        store.use_database("main").unwrap();
        assert_eq!(store.list_tables(), vec!["users"]);

        store.drop_database("analytics").unwrap();
        assert!(matches!(
            store.use_database("analytics"),
            Err(StorageError::DatabaseNotFound(_))
        ));
    }

    #[test]
    fn rename_table_moves_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open(dir.path(), "main").unwrap();
        store.create_table(users_schema()).unwrap();
        store.insert("users", user("ada", 36)).unwrap();
        store.flush_all().unwrap();
        store.rename_table("users", "people").unwrap();

        let store = Store::open(dir.path(), "main").unwrap();
        assert_eq!(store.list_tables(), vec!["people"]);
        assert_eq!(store.schema("people").unwrap().name, "people");
    }
}
