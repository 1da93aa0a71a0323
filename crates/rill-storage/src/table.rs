//! In-memory state of a single table: live rows keyed by row-id.

use std::collections::BTreeMap;

use rill_core::schema::TableSchema;
use rill_core::value::{Row, Value};

/// One table's rows plus its id and auto-increment counters.
///
/// Row-ids are monotone and never reused; the `BTreeMap` keeps iteration in
/// insertion (row-id) order.
#[derive(Debug, Clone)]
pub struct TableData {
    pub schema: TableSchema,
    rows: BTreeMap<u64, Row>,
    next_row_id: u64,
    auto_increment: u64,
}

/// Outcome of an insert: the assigned row-id and the auto-increment value
/// filled in, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertOutcome {
    pub row_id: u64,
    pub auto_value: Option<u64>,
}

impl TableData {
    pub fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            rows: BTreeMap::new(),
            next_row_id: 1,
            auto_increment: 1,
        }
    }

    /// Rebuilds table state from persisted parts.
    pub fn from_parts(
        schema: TableSchema,
        rows: BTreeMap<u64, Row>,
        next_row_id: u64,
        auto_increment: u64,
    ) -> Self {
        Self {
            schema,
            rows,
            next_row_id,
            auto_increment,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn next_row_id(&self) -> u64 {
        self.next_row_id
    }

    pub fn auto_increment(&self) -> u64 {
        self.auto_increment
    }

    pub fn get(&self, row_id: u64) -> Option<&Row> {
        self.rows.get(&row_id)
    }

    /// Live rows in row-id order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &Row)> {
        self.rows.iter().map(|(&id, row)| (id, row))
    }

    /// Assigns a row-id, fills the auto-increment column when its value is
    /// absent or null, and stores the row.
    pub fn insert(&mut self, mut row: Row) -> InsertOutcome {
        let mut auto_value = None;
        if let Some(col) = self.schema.auto_increment_column() {
            let name = col.name.clone();
            let current = row.get(&name);
            match current.and_then(Value::as_i64) {
                None => {
                    let assigned = self.auto_increment;
                    self.auto_increment += 1;
                    row.insert(name, Value::Integer(assigned as i64));
                    auto_value = Some(assigned);
                }
                Some(explicit) if explicit >= 0 => {
                    // An explicit value advances the counter past itself.
                    if explicit as u64 >= self.auto_increment {
                        self.auto_increment = explicit as u64 + 1;
                    }
                }
                Some(_) => {}
            }
        }
        let row_id = self.next_row_id;
        self.next_row_id += 1;
        self.rows.insert(row_id, row);
        InsertOutcome { row_id, auto_value }
    }

    /// Reinstates a row under its original id (transaction rollback). The
    /// id counter never moves backwards.
    pub fn restore(&mut self, row_id: u64, row: Row) {
        if row_id >= self.next_row_id {
            self.next_row_id = row_id + 1;
        }
        self.rows.insert(row_id, row);
    }

    /// Replaces a row in place, returning the previous image.
    pub fn replace(&mut self, row_id: u64, row: Row) -> Option<Row> {
        match self.rows.get_mut(&row_id) {
            Some(slot) => Some(std::mem::replace(slot, row)),
            None => None,
        }
    }

    pub fn remove(&mut self, row_id: u64) -> Option<Row> {
        self.rows.remove(&row_id)
    }

    /// Drops every row. Counters are not reset; ids stay monotone across a
    /// TRUNCATE.
    pub fn clear(&mut self) {
        self.rows.clear();
    }

    /// Consumes the table into its persistable parts.
    pub fn into_parts(self) -> (TableSchema, BTreeMap<u64, Row>, u64, u64) {
        (self.schema, self.rows, self.next_row_id, self.auto_increment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rill_core::schema::ColumnDescriptor;
    use rill_core::types::DataType;

    fn schema_with_auto() -> TableSchema {
        TableSchema::new(
            "t",
            vec![
                ColumnDescriptor {
                    primary_key: true,
                    auto_increment: true,
                    nullable: false,
                    ..ColumnDescriptor::new("id", DataType::Int)
                },
                ColumnDescriptor::new("name", DataType::VarChar(32)),
            ],
        )
    }

    fn named_row(name: &str) -> Row {
        Row::from([("name".to_string(), Value::Text(name.into()))])
    }

    #[test]
    fn insert_assigns_monotone_ids_and_auto_values() {
        let mut table = TableData::new(schema_with_auto());
        let a = table.insert(named_row("a"));
        let b = table.insert(named_row("b"));
        assert_eq!((a.row_id, a.auto_value), (1, Some(1)));
        assert_eq!((b.row_id, b.auto_value), (2, Some(2)));
        assert_eq!(
            table.get(1).unwrap().get("id"),
            Some(&Value::Integer(1))
        );
    }

    #[test]
    fn explicit_auto_value_advances_counter() {
        let mut table = TableData::new(schema_with_auto());
        let mut row = named_row("x");
        row.insert("id".into(), Value::Integer(10));
        let out = table.insert(row);
        assert_eq!(out.auto_value, None);
        let next = table.insert(named_row("y"));
        assert_eq!(next.auto_value, Some(11));
    }

    #[test]
    fn row_ids_are_never_reused() {
        let mut table = TableData::new(schema_with_auto());
        table.insert(named_row("a"));
        let b = table.insert(named_row("b"));
        table.remove(b.row_id);
        let c = table.insert(named_row("c"));
        assert_eq!(c.row_id, 3);
    }

    #[test]
    fn truncate_keeps_counters() {
        let mut table = TableData::new(schema_with_auto());
        table.insert(named_row("a"));
        table.insert(named_row("b"));
        table.clear();
        assert!(table.is_empty());
        let next = table.insert(named_row("c"));
        assert_eq!(next.row_id, 3);
        assert_eq!(next.auto_value, Some(3));
    }

    #[test]
    fn restore_bumps_next_id() {
        let mut table = TableData::new(schema_with_auto());
        table.restore(7, named_row("seven"));
        let next = table.insert(named_row("eight"));
        assert_eq!(next.row_id, 8);
    }
}
