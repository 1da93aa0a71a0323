//! Runtime SQL values and the row model.
//!
//! A [`Value`] is a tagged sum over every type the engine can store. Rows are
//! maps from column name to value; during joins the same map also carries
//! `alias.column` qualified keys, and the two keyspaces are kept in sync by
//! the executor.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A dynamically-typed SQL value.
///
/// `Null` is a distinct value, not an absent one. Decimal columns carry their
/// text form in `Text` and are compared numerically by [`Value::total_cmp`].
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
    /// A JSON document (object or array; scalars round-trip as their own tag).
    Json(serde_json::Value),
    Bytes(Vec<u8>),
}

/// A row: column name -> value. Qualified (`alias.col`) and bare keys coexist.
pub type Row = HashMap<String, Value>;

impl Value {
    /// Returns `true` for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view of the value, if it has one.
    ///
    /// Integers, floats, booleans (0/1) and numeric-looking text (decimals
    /// come through storage as text) all widen to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            Value::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Text(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    /// Integer view, truncating floats that are whole numbers.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            Value::Boolean(b) => Some(i64::from(*b)),
            Value::Text(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
    }

    /// The string rendering used for GROUP_CONCAT and text coercion.
    ///
    /// Returns `None` for `Null` (aggregates skip nulls).
    pub fn as_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Text(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Truthiness for WHERE results: NULL and false are not true.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Boolean(b) => *b,
            Value::Integer(n) => *n != 0,
            Value::Float(f) => *f != 0.0,
            Value::Text(s) => !s.is_empty(),
            Value::Json(_) | Value::Bytes(_) => true,
        }
    }

    /// Rank used to order values of different types relative to each other.
    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::Integer(_) | Value::Float(_) => 2,
            Value::Text(_) => 3,
            Value::Bytes(_) => 4,
            Value::Json(_) => 5,
        }
    }

    /// The single total order used everywhere: B-tree comparators, ORDER BY,
    /// MIN/MAX and uniqueness checks. Nulls sort first; integers and floats
    /// compare numerically; mixed numeric/text falls back to numeric parsing
    /// of the text when possible.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        use Value::*;
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Null, _) => Ordering::Less,
            (_, Null) => Ordering::Greater,
            (Boolean(a), Boolean(b)) => a.cmp(b),
            (Integer(a), Integer(b)) => a.cmp(b),
            (Text(a), Text(b)) => a.cmp(b),
            (Bytes(a), Bytes(b)) => a.cmp(b),
            (Json(a), Json(b)) => a.to_string().cmp(&b.to_string()),
            _ => {
                // Mixed numerics (and numeric-looking text vs number).
                match (self.as_f64(), other.as_f64()) {
                    (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
                    _ => self.type_rank().cmp(&other.type_rank()),
                }
            }
        }
    }

    /// SQL equality under the same total order. Never call on `Null` operands
    /// when three-valued logic is required; the evaluator handles that case.
    pub fn sql_eq(&self, other: &Value) -> bool {
        self.total_cmp(other) == Ordering::Equal
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.total_cmp(other) == Ordering::Equal
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Integer(n) => write!(f, "{n}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(s) => f.write_str(s),
            Value::Boolean(b) => f.write_str(if *b { "1" } else { "0" }),
            Value::Json(j) => write!(f, "{j}"),
            Value::Bytes(b) => {
                for byte in b {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}

// Values persist as plain JSON where possible; bytes and JSON documents get a
// one-key wrapper object so the reader can tell them apart from text.
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Integer(n) => serializer.serialize_i64(*n),
            Value::Float(v) => serializer.serialize_f64(*v),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Boolean(b) => serializer.serialize_bool(*b),
            Value::Json(j) => {
                use serde::ser::SerializeMap;
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("$json", j)?;
                map.end()
            }
            Value::Bytes(b) => {
                use serde::ser::SerializeMap;
                let hex: String = b.iter().map(|byte| format!("{byte:02x}")).collect();
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("$hex", &hex)?;
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        Value::try_from(raw).map_err(D::Error::custom)
    }
}

impl TryFrom<serde_json::Value> for Value {
    type Error = String;

    fn try_from(raw: serde_json::Value) -> Result<Self, String> {
        Ok(match raw {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Integer(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::Text(s),
            serde_json::Value::Object(map) if map.len() == 1 && map.contains_key("$json") => {
                Value::Json(map.into_iter().next().map(|(_, v)| v).unwrap_or_default())
            }
            serde_json::Value::Object(map) if map.len() == 1 && map.contains_key("$hex") => {
                let hex = map
                    .into_iter()
                    .next()
                    .and_then(|(_, v)| v.as_str().map(str::to_owned))
                    .ok_or("$hex wrapper must hold a string")?;
                Value::Bytes(decode_hex(&hex)?)
            }
            other @ (serde_json::Value::Array(_) | serde_json::Value::Object(_)) => {
                Value::Json(other)
            }
        })
    }
}

fn decode_hex(s: &str) -> Result<Vec<u8>, String> {
    if s.len() % 2 != 0 {
        return Err(format!("odd-length hex string: {s:?}"));
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|e| e.to_string()))
        .collect()
}

/// Looks a value up by column reference, trying the bare name first and the
/// qualified `alias.col` spelling second (and vice versa for qualified refs).
pub fn lookup<'a>(row: &'a Row, name: &str) -> Option<&'a Value> {
    if let Some(v) = row.get(name) {
        return Some(v);
    }
    if let Some((_, bare)) = name.split_once('.') {
        return row.get(bare);
    }
    // Bare name: accept a unique qualified match.
    let mut found = None;
    for (key, v) in row {
        if key.split_once('.').is_some_and(|(_, col)| col == name) {
            if found.is_some() {
                return None; // ambiguous
            }
            found = Some(v);
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn nulls_sort_first() {
        let mut vals = vec![
            Value::Integer(3),
            Value::Null,
            Value::Integer(1),
            Value::Null,
        ];
        vals.sort_by(|a, b| a.total_cmp(b));
        assert!(vals[0].is_null() && vals[1].is_null());
        assert_eq!(vals[2], Value::Integer(1));
    }

    #[test]
    fn mixed_numerics_compare_numerically() {
        assert_eq!(
            Value::Integer(2).total_cmp(&Value::Float(2.0)),
            Ordering::Equal
        );
        assert_eq!(
            Value::Float(1.5).total_cmp(&Value::Integer(2)),
            Ordering::Less
        );
        // Decimal text vs integer.
        assert_eq!(
            Value::Text("10.50".into()).total_cmp(&Value::Integer(10)),
            Ordering::Greater
        );
    }

    #[test]
    fn text_compares_lexicographically() {
        assert_eq!(
            Value::Text("apple".into()).total_cmp(&Value::Text("banana".into())),
            Ordering::Less
        );
    }

    #[test]
    fn serde_roundtrip_scalars() {
        for v in [
            Value::Null,
            Value::Integer(-7),
            Value::Float(2.25),
            Value::Text("hi".into()),
            Value::Boolean(true),
            Value::Bytes(vec![0xde, 0xad]),
            Value::Json(serde_json::json!({"a": [1, 2]})),
        ] {
            let encoded = serde_json::to_string(&v).unwrap();
            let decoded: Value = serde_json::from_str(&encoded).unwrap();
            assert_eq!(v, decoded, "roundtrip of {encoded}");
        }
    }

    #[test]
    fn lookup_resolves_qualified_and_bare() {
        let mut row = Row::new();
        row.insert("id".into(), Value::Integer(1));
        row.insert("u.id".into(), Value::Integer(1));
        row.insert("o.id".into(), Value::Integer(9));

        assert_eq!(lookup(&row, "u.id"), Some(&Value::Integer(1)));
        assert_eq!(lookup(&row, "o.id"), Some(&Value::Integer(9)));
        // Bare hit wins over qualified candidates.
        assert_eq!(lookup(&row, "id"), Some(&Value::Integer(1)));
    }

    #[test]
    fn lookup_ambiguous_bare_is_none() {
        let mut row = Row::new();
        row.insert("u.name".into(), Value::Text("a".into()));
        row.insert("o.name".into(), Value::Text("b".into()));
        assert_eq!(lookup(&row, "name"), None);
    }
}
