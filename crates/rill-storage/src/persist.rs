//! On-disk layout: one directory per database, per table a schema JSON file
//! and a rows JSON-lines file, plus one file of serialized B-trees.
//!
//! The encoding is an implementation detail; the contract is that reopening
//! the same directory reproduces the logical state, row-ids and counters
//! included.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use rill_core::schema::TableSchema;
use rill_core::value::Row;
use rill_index::IndexManager;

use crate::error::{Result, StorageError};
use crate::table::TableData;

const SCHEMA_SUFFIX: &str = ".schema.json";
const ROWS_SUFFIX: &str = ".rows.jsonl";
const INDEX_FILE: &str = "indexes.json";

#[derive(Serialize)]
struct TableFileRef<'a> {
    schema: &'a TableSchema,
    next_row_id: u64,
    auto_increment: u64,
}

#[derive(Deserialize)]
struct TableFile {
    schema: TableSchema,
    next_row_id: u64,
    auto_increment: u64,
}

/// One persisted row: its stable id plus the column map.
#[derive(Serialize, Deserialize)]
struct RowRecord {
    id: u64,
    row: Row,
}

pub(crate) fn schema_path(dir: &Path, table: &str) -> PathBuf {
    dir.join(format!("{table}{SCHEMA_SUFFIX}"))
}

pub(crate) fn rows_path(dir: &Path, table: &str) -> PathBuf {
    dir.join(format!("{table}{ROWS_SUFFIX}"))
}

/// Writes a table's schema, counters and rows.
pub(crate) fn save_table(dir: &Path, name: &str, table: &TableData) -> Result<()> {
    let header = TableFileRef {
        schema: &table.schema,
        next_row_id: table.next_row_id(),
        auto_increment: table.auto_increment(),
    };
    let schema_file = File::create(schema_path(dir, name))?;
    serde_json::to_writer_pretty(BufWriter::new(schema_file), &header)?;

    let rows_file = File::create(rows_path(dir, name))?;
    let mut writer = BufWriter::new(rows_file);
    for (id, row) in table.iter() {
        let record = RowRecord {
            id,
            row: row.clone(),
        };
        serde_json::to_writer(&mut writer, &record)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

/// Reads a table back; the rows file may be absent for an empty table.
pub(crate) fn load_table(dir: &Path, name: &str) -> Result<TableData> {
    let schema_file = File::open(schema_path(dir, name))?;
    let header: TableFile = serde_json::from_reader(BufReader::new(schema_file))?;

    let mut rows = BTreeMap::new();
    let rows_path = rows_path(dir, name);
    if rows_path.exists() {
        let reader = BufReader::new(File::open(&rows_path)?);
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let record: RowRecord =
                serde_json::from_str(trimmed).map_err(|e| StorageError::Corrupt {
                    path: rows_path.display().to_string(),
                    line: line_no + 1,
                    reason: e.to_string(),
                })?;
            rows.insert(record.id, record.row);
        }
    }

    Ok(TableData::from_parts(
        header.schema,
        rows,
        header.next_row_id,
        header.auto_increment,
    ))
}

/// Table names present in a database directory, sorted.
pub(crate) fn list_tables(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    if !dir.exists() {
        return Ok(names);
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        if let Some(table) = file_name.strip_suffix(SCHEMA_SUFFIX) {
            names.push(table.to_string());
        }
    }
    names.sort();
    Ok(names)
}

pub(crate) fn remove_table_files(dir: &Path, name: &str) -> Result<()> {
    for path in [schema_path(dir, name), rows_path(dir, name)] {
        if path.exists() {
            fs::remove_file(path)?;
        }
    }
    Ok(())
}

pub(crate) fn save_indexes(dir: &Path, manager: &IndexManager) -> Result<()> {
    let file = File::create(dir.join(INDEX_FILE))?;
    serde_json::to_writer(BufWriter::new(file), manager)?;
    Ok(())
}

/// Missing index file means no indexes yet.
pub(crate) fn load_indexes(dir: &Path) -> Result<IndexManager> {
    let path = dir.join(INDEX_FILE);
    if !path.exists() {
        return Ok(IndexManager::new());
    }
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rill_core::schema::ColumnDescriptor;
    use rill_core::types::DataType;
    use rill_core::value::Value;

    fn sample_table() -> TableData {
        let schema = TableSchema::new(
            "t",
            vec![
                ColumnDescriptor {
                    primary_key: true,
                    auto_increment: true,
                    nullable: false,
                    ..ColumnDescriptor::new("id", DataType::Int)
                },
                ColumnDescriptor::new("name", DataType::Text),
            ],
        );
        let mut table = TableData::new(schema);
        for name in ["a", "b"] {
            table.insert(Row::from([(
                "name".to_string(),
                Value::Text(name.into()),
            )]));
        }
        table
    }

    #[test]
    fn table_roundtrip_preserves_ids_and_counters() {
        let dir = tempfile::tempdir().unwrap();
        let table = sample_table();
        save_table(dir.path(), "t", &table).unwrap();

        let loaded = load_table(dir.path(), "t").unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.next_row_id(), table.next_row_id());
        assert_eq!(loaded.auto_increment(), table.auto_increment());
        assert_eq!(loaded.get(1), table.get(1));
        assert_eq!(loaded.get(2), table.get(2));
    }

    #[test]
    fn list_and_remove_table_files() {
        let dir = tempfile::tempdir().unwrap();
        save_table(dir.path(), "one", &sample_table()).unwrap();
        save_table(dir.path(), "two", &sample_table()).unwrap();
        assert_eq!(list_tables(dir.path()).unwrap(), vec!["one", "two"]);

        remove_table_files(dir.path(), "one").unwrap();
        assert_eq!(list_tables(dir.path()).unwrap(), vec!["two"]);
    }

    #[test]
    fn corrupt_row_reports_line_number() {
        let dir = tempfile::tempdir().unwrap();
        save_table(dir.path(), "t", &sample_table()).unwrap();
        let path = rows_path(dir.path(), "t");
        let mut content = fs::read_to_string(&path).unwrap();
        content.push_str("not-json\n");
        fs::write(&path, content).unwrap();

        let err = load_table(dir.path(), "t").unwrap_err();
        match err {
            StorageError::Corrupt { line, .. } => assert_eq!(line, 3),
            other => panic!("expected corrupt error, got {other:?}"),
        }
    }

    #[test]
    fn missing_index_file_is_empty_manager() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = load_indexes(dir.path()).unwrap();
        assert!(mgr.indexes_of("t").is_empty());
    }
}
