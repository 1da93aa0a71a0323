//! Table schemas: column descriptors, index descriptors, foreign keys.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::DataType;
use crate::value::Value;

/// Action applied to child rows when a referenced parent row changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReferentialAction {
    /// Reject the parent mutation while children reference it.
    #[default]
    Restrict,
    /// Same as RESTRICT at statement time (no deferred checking here).
    NoAction,
    /// Propagate the change into the child rows.
    Cascade,
    /// Null out the child FK column.
    SetNull,
    /// Write the child column's default.
    SetDefault,
}

impl ReferentialAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::SetDefault => "SET DEFAULT",
        }
    }
}

/// Foreign-key target carried on the referencing column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKeyRef {
    /// Referenced table name.
    pub table: String,
    /// Referenced column name.
    pub column: String,
    pub on_delete: ReferentialAction,
    pub on_update: ReferentialAction,
}

/// A single column definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub auto_increment: bool,
    #[serde(default)]
    pub references: Option<ForeignKeyRef>,
    /// Raw CHECK expression text, kept verbatim.
    #[serde(default)]
    pub check: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
}

impl ColumnDescriptor {
    /// A plain nullable column with no constraints.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
            default: None,
            primary_key: false,
            unique: false,
            auto_increment: false,
            references: None,
            check: None,
            comment: None,
        }
    }
}

/// Kind of index structure. Only B-trees are materialized today; the kind is
/// kept so declarations like `USING HASH` round-trip through the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IndexKind {
    #[default]
    BTree,
    Hash,
}

/// A named index over one or more columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub kind: IndexKind,
}

/// A full table schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDescriptor>,
    #[serde(default)]
    pub indexes: Vec<IndexDescriptor>,
    #[serde(default = "default_engine")]
    pub engine: String,
    #[serde(default = "default_charset")]
    pub charset: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_engine() -> String {
    "rill".to_string()
}

fn default_charset() -> String {
    "utf8mb4".to_string()
}

/// Schema-level invariant violations.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("duplicate column name: {0}")]
    DuplicateColumn(String),

    #[error("table has more than one AUTO_INCREMENT column")]
    MultipleAutoIncrement,

    #[error("AUTO_INCREMENT column {0} must be part of the primary key")]
    AutoIncrementOutsidePrimaryKey(String),

    #[error("enum column {0} has an empty value list")]
    EmptyEnum(String),

    #[error("column {0} not found")]
    UnknownColumn(String),

    #[error("index {0} references unknown column {1}")]
    IndexUnknownColumn(String, String),

    #[error("duplicate index name: {0}")]
    DuplicateIndex(String),
}

impl TableSchema {
    /// A fresh schema stamped with the current time.
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDescriptor>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            columns,
            indexes: Vec::new(),
            engine: default_engine(),
            charset: default_charset(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Looks a column up by name.
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut ColumnDescriptor> {
        self.columns.iter_mut().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// The primary-key column names, in declaration order.
    pub fn primary_key(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.as_str())
            .collect()
    }

    /// Columns that carry a foreign-key reference: `(column, fk)`.
    pub fn foreign_keys(&self) -> Vec<(&ColumnDescriptor, &ForeignKeyRef)> {
        self.columns
            .iter()
            .filter_map(|c| c.references.as_ref().map(|fk| (c, fk)))
            .collect()
    }

    /// The auto-increment column, if any.
    pub fn auto_increment_column(&self) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.auto_increment)
    }

    /// Verifies the structural invariants: unique column names, at most one
    /// auto-increment column participating in the PK, nonempty enum lists,
    /// index columns that exist, unique index names.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let mut seen = std::collections::HashSet::new();
        for col in &self.columns {
            if !seen.insert(col.name.as_str()) {
                return Err(SchemaError::DuplicateColumn(col.name.clone()));
            }
            if let DataType::Enum(vals) = &col.data_type {
                if vals.is_empty() {
                    return Err(SchemaError::EmptyEnum(col.name.clone()));
                }
            }
        }

        let auto: Vec<_> = self.columns.iter().filter(|c| c.auto_increment).collect();
        if auto.len() > 1 {
            return Err(SchemaError::MultipleAutoIncrement);
        }
        if let Some(col) = auto.first() {
            if !col.primary_key {
                return Err(SchemaError::AutoIncrementOutsidePrimaryKey(
                    col.name.clone(),
                ));
            }
        }

        let mut index_names = std::collections::HashSet::new();
        for idx in &self.indexes {
            if !index_names.insert(idx.name.as_str()) {
                return Err(SchemaError::DuplicateIndex(idx.name.clone()));
            }
            for col in &idx.columns {
                if !self.has_column(col) {
                    return Err(SchemaError::IndexUnknownColumn(
                        idx.name.clone(),
                        col.clone(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Marks the schema as mutated now.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn col(name: &str, ty: DataType) -> ColumnDescriptor {
        ColumnDescriptor::new(name, ty)
    }

    fn pk_auto(name: &str) -> ColumnDescriptor {
        ColumnDescriptor {
            primary_key: true,
            auto_increment: true,
            nullable: false,
            ..ColumnDescriptor::new(name, DataType::Int)
        }
    }

    #[test]
    fn validate_accepts_plain_schema() {
        let schema = TableSchema::new(
            "t",
            vec![pk_auto("id"), col("name", DataType::VarChar(32))],
        );
        schema.validate().unwrap();
        assert_eq!(schema.primary_key(), vec!["id"]);
    }

    #[test]
    fn validate_rejects_duplicate_columns() {
        let schema = TableSchema::new("t", vec![col("a", DataType::Int), col("a", DataType::Int)]);
        assert!(matches!(
            schema.validate(),
            Err(SchemaError::DuplicateColumn(_))
        ));
    }

    #[test]
    fn validate_rejects_auto_increment_outside_pk() {
        let mut c = col("n", DataType::Int);
        c.auto_increment = true;
        let schema = TableSchema::new("t", vec![c]);
        assert!(matches!(
            schema.validate(),
            Err(SchemaError::AutoIncrementOutsidePrimaryKey(_))
        ));
    }

    #[test]
    fn validate_rejects_empty_enum() {
        let schema = TableSchema::new("t", vec![col("e", DataType::Enum(vec![]))]);
        assert!(matches!(schema.validate(), Err(SchemaError::EmptyEnum(_))));
    }

    #[test]
    fn validate_rejects_index_on_missing_column() {
        let mut schema = TableSchema::new("t", vec![col("a", DataType::Int)]);
        schema.indexes.push(IndexDescriptor {
            name: "ix".into(),
            columns: vec!["missing".into()],
            unique: false,
            kind: IndexKind::BTree,
        });
        assert!(matches!(
            schema.validate(),
            Err(SchemaError::IndexUnknownColumn(..))
        ));
    }

    #[test]
    fn schema_serde_roundtrip() {
        let schema = TableSchema::new(
            "users",
            vec![pk_auto("id"), col("email", DataType::VarChar(255))],
        );
        let json = serde_json::to_string(&schema).unwrap();
        let back: TableSchema = serde_json::from_str(&json).unwrap();
        assert_eq!(schema, back);
    }
}
