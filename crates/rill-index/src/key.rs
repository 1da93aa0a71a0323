//! Composite index keys.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use rill_core::value::Value;

/// A B-tree key: one value per indexed column.
///
/// Ordering is lexicographic over [`Value::total_cmp`], with nulls first and
/// shorter tuples before longer ones when a shared prefix is equal. The same
/// order backs uniqueness checks, so "index says equal" and "executor says
/// equal" can never diverge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexKey(pub Vec<Value>);

impl IndexKey {
    pub fn single(value: Value) -> Self {
        IndexKey(vec![value])
    }

    pub fn from_values(values: Vec<Value>) -> Self {
        IndexKey(values)
    }
}

impl Eq for IndexKey {}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            match a.total_cmp(b) {
                Ordering::Equal => continue,
                non_eq => return non_eq,
            }
        }
        self.0.len().cmp(&other.0.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn key(vals: &[i64]) -> IndexKey {
        IndexKey(vals.iter().map(|&n| Value::Integer(n)).collect())
    }

    #[test]
    fn lexicographic_order() {
        assert!(key(&[1, 2]) < key(&[1, 3]));
        assert!(key(&[1, 2]) < key(&[2, 0]));
        assert_eq!(key(&[4, 5]).cmp(&key(&[4, 5])), Ordering::Equal);
    }

    #[test]
    fn shorter_prefix_sorts_first() {
        assert!(key(&[1]) < key(&[1, 0]));
        assert!(key(&[1, 2]) < key(&[1, 2, 0]));
    }

    #[test]
    fn null_sorts_before_everything() {
        let with_null = IndexKey(vec![Value::Null, Value::Integer(9)]);
        assert!(with_null < key(&[0, 0]));
        let null_second = IndexKey(vec![Value::Integer(1), Value::Null]);
        assert!(null_second < key(&[1, 0]));
    }

    #[test]
    fn mixed_numeric_keys_compare_numerically() {
        let float_key = IndexKey(vec![Value::Float(2.0)]);
        assert_eq!(float_key.cmp(&key(&[2])), Ordering::Equal);
    }
}
