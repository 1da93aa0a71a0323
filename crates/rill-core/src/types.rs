//! SQL column data types.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// A column's declared type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    Float,
    Double,
    /// DECIMAL(precision, scale).
    Decimal(u8, u8),
    /// CHAR(n).
    Char(u32),
    /// VARCHAR(n).
    VarChar(u32),
    TinyText,
    Text,
    MediumText,
    LongText,
    TinyBlob,
    Blob,
    MediumBlob,
    LongBlob,
    Date,
    Time,
    DateTime,
    Timestamp,
    Year,
    Boolean,
    Json,
    Uuid,
    /// ENUM('a', 'b', ...) -- the value list is never empty.
    Enum(Vec<String>),
    /// SET('a', 'b', ...).
    Set(Vec<String>),
}

/// Coarse grouping of [`DataType`]s, used for FK compatibility checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeFamily {
    Integer,
    Float,
    Decimal,
    String,
    Blob,
    Temporal,
    Boolean,
    Json,
    Uuid,
    Enum,
    Set,
}

impl DataType {
    /// Parses a type name (without any parenthesized arguments) as written in
    /// SQL, case-insensitively. Returns `None` for unknown names.
    pub fn from_name(name: &str) -> Option<DataType> {
        Some(match name.to_ascii_uppercase().as_str() {
            "TINYINT" => DataType::TinyInt,
            "SMALLINT" => DataType::SmallInt,
            "INT" | "INTEGER" => DataType::Int,
            "BIGINT" => DataType::BigInt,
            "FLOAT" | "REAL" => DataType::Float,
            "DOUBLE" => DataType::Double,
            "DECIMAL" | "NUMERIC" => DataType::Decimal(10, 0),
            "CHAR" => DataType::Char(1),
            "VARCHAR" => DataType::VarChar(255),
            "TINYTEXT" => DataType::TinyText,
            "TEXT" => DataType::Text,
            "MEDIUMTEXT" => DataType::MediumText,
            "LONGTEXT" => DataType::LongText,
            "TINYBLOB" => DataType::TinyBlob,
            "BLOB" => DataType::Blob,
            "MEDIUMBLOB" => DataType::MediumBlob,
            "LONGBLOB" => DataType::LongBlob,
            "DATE" => DataType::Date,
            "TIME" => DataType::Time,
            "DATETIME" => DataType::DateTime,
            "TIMESTAMP" => DataType::Timestamp,
            "YEAR" => DataType::Year,
            "BOOLEAN" | "BOOL" => DataType::Boolean,
            "JSON" => DataType::Json,
            "UUID" => DataType::Uuid,
            "ENUM" => DataType::Enum(Vec::new()),
            "SET" => DataType::Set(Vec::new()),
            _ => return None,
        })
    }

    /// The family this type belongs to.
    pub fn family(&self) -> TypeFamily {
        use DataType::*;
        match self {
            TinyInt | SmallInt | Int | BigInt | Year => TypeFamily::Integer,
            Float | Double => TypeFamily::Float,
            Decimal(..) => TypeFamily::Decimal,
            Char(_) | VarChar(_) | TinyText | Text | MediumText | LongText => TypeFamily::String,
            TinyBlob | Blob | MediumBlob | LongBlob => TypeFamily::Blob,
            Date | Time | DateTime | Timestamp => TypeFamily::Temporal,
            Boolean => TypeFamily::Boolean,
            Json => TypeFamily::Json,
            Uuid => TypeFamily::Uuid,
            Enum(_) => TypeFamily::Enum,
            Set(_) => TypeFamily::Set,
        }
    }

    /// Whether a column of this type can be referenced by a foreign key
    /// column of type `other`. Families must match, except that any numeric
    /// family pairs with any other numeric family.
    pub fn compatible_with(&self, other: &DataType) -> bool {
        let numeric = |f: TypeFamily| {
            matches!(
                f,
                TypeFamily::Integer | TypeFamily::Float | TypeFamily::Decimal
            )
        };
        let (a, b) = (self.family(), other.family());
        a == b || (numeric(a) && numeric(b))
    }

    /// Checks that `value` is storable in a column of this type.
    ///
    /// Nulls are always accepted here; nullability is a column property, not
    /// a type property. Returns a description of the mismatch on failure.
    pub fn check(&self, value: &Value) -> Result<(), String> {
        if value.is_null() {
            return Ok(());
        }
        let ok = match self.family() {
            TypeFamily::Integer => value.as_i64().is_some(),
            TypeFamily::Float | TypeFamily::Decimal => value.as_f64().is_some(),
            TypeFamily::String => matches!(value, Value::Text(_) | Value::Integer(_) | Value::Float(_)),
            TypeFamily::Blob => matches!(value, Value::Bytes(_) | Value::Text(_)),
            TypeFamily::Temporal => match value {
                Value::Text(s) => parse_temporal(self, s),
                _ => false,
            },
            TypeFamily::Boolean => {
                matches!(value, Value::Boolean(_)) || value.as_i64().is_some_and(|n| n == 0 || n == 1)
            }
            TypeFamily::Json => matches!(value, Value::Json(_) | Value::Text(_)),
            TypeFamily::Uuid => match value {
                Value::Text(s) => is_uuid(s),
                _ => false,
            },
            TypeFamily::Enum => match (self, value) {
                (DataType::Enum(allowed), Value::Text(s)) => allowed.iter().any(|a| a == s),
                _ => false,
            },
            TypeFamily::Set => match (self, value) {
                (DataType::Set(allowed), Value::Text(s)) => s
                    .split(',')
                    .filter(|p| !p.is_empty())
                    .all(|p| allowed.iter().any(|a| a == p)),
                _ => false,
            },
        };
        if ok {
            Ok(())
        } else {
            Err(format!("value {value} is not valid for type {self}"))
        }
    }
}

/// Validates a temporal literal against the expected shape for `ty`.
fn parse_temporal(ty: &DataType, s: &str) -> bool {
    use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
    match ty {
        DataType::Date => NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok(),
        DataType::Time => NaiveTime::parse_from_str(s, "%H:%M:%S").is_ok(),
        DataType::DateTime | DataType::Timestamp => {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").is_ok()
                || NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").is_ok()
        }
        _ => false,
    }
}

fn is_uuid(s: &str) -> bool {
    let bytes = s.as_bytes();
    if bytes.len() != 36 {
        return false;
    }
    for (i, b) in bytes.iter().enumerate() {
        match i {
            8 | 13 | 18 | 23 => {
                if *b != b'-' {
                    return false;
                }
            }
            _ => {
                if !b.is_ascii_hexdigit() {
                    return false;
                }
            }
        }
    }
    true
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use DataType::*;
        match self {
            TinyInt => f.write_str("TINYINT"),
            SmallInt => f.write_str("SMALLINT"),
            Int => f.write_str("INT"),
            BigInt => f.write_str("BIGINT"),
            Float => f.write_str("FLOAT"),
            Double => f.write_str("DOUBLE"),
            Decimal(p, s) => write!(f, "DECIMAL({p},{s})"),
            Char(n) => write!(f, "CHAR({n})"),
            VarChar(n) => write!(f, "VARCHAR({n})"),
            TinyText => f.write_str("TINYTEXT"),
            Text => f.write_str("TEXT"),
            MediumText => f.write_str("MEDIUMTEXT"),
            LongText => f.write_str("LONGTEXT"),
            TinyBlob => f.write_str("TINYBLOB"),
            Blob => f.write_str("BLOB"),
            MediumBlob => f.write_str("MEDIUMBLOB"),
            LongBlob => f.write_str("LONGBLOB"),
            Date => f.write_str("DATE"),
            Time => f.write_str("TIME"),
            DateTime => f.write_str("DATETIME"),
            Timestamp => f.write_str("TIMESTAMP"),
            Year => f.write_str("YEAR"),
            Boolean => f.write_str("BOOLEAN"),
            Json => f.write_str("JSON"),
            Uuid => f.write_str("UUID"),
            Enum(vals) => write!(f, "ENUM({})", quote_list(vals)),
            Set(vals) => write!(f, "SET({})", quote_list(vals)),
        }
    }
}

fn quote_list(vals: &[String]) -> String {
    vals.iter()
        .map(|v| format!("'{v}'"))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_common_names() {
        assert_eq!(DataType::from_name("int"), Some(DataType::Int));
        assert_eq!(DataType::from_name("Integer"), Some(DataType::Int));
        assert_eq!(DataType::from_name("VARCHAR"), Some(DataType::VarChar(255)));
        assert_eq!(DataType::from_name("wibble"), None);
    }

    #[test]
    fn fk_compatibility_spans_numeric_families() {
        assert!(DataType::Int.compatible_with(&DataType::BigInt));
        assert!(DataType::Int.compatible_with(&DataType::Decimal(10, 2)));
        assert!(!DataType::Int.compatible_with(&DataType::Text));
        assert!(DataType::VarChar(32).compatible_with(&DataType::Text));
    }

    #[test]
    fn check_enum_values() {
        let ty = DataType::Enum(vec!["red".into(), "green".into()]);
        assert!(ty.check(&Value::Text("red".into())).is_ok());
        assert!(ty.check(&Value::Text("blue".into())).is_err());
        assert!(ty.check(&Value::Null).is_ok());
    }

    #[test]
    fn check_temporal_shapes() {
        assert!(DataType::Date.check(&Value::Text("2024-02-29".into())).is_ok());
        assert!(DataType::Date.check(&Value::Text("2023-02-29".into())).is_err());
        assert!(DataType::DateTime
            .check(&Value::Text("2024-01-01 10:00:00".into()))
            .is_ok());
    }

    #[test]
    fn check_uuid_shape() {
        assert!(DataType::Uuid
            .check(&Value::Text("550e8400-e29b-41d4-a716-446655440000".into()))
            .is_ok());
        assert!(DataType::Uuid.check(&Value::Text("nope".into())).is_err());
    }

    #[test]
    fn display_roundtrips_arguments() {
        assert_eq!(DataType::Decimal(8, 2).to_string(), "DECIMAL(8,2)");
        assert_eq!(
            DataType::Enum(vec!["a".into(), "b".into()]).to_string(),
            "ENUM('a','b')"
        );
    }
}
