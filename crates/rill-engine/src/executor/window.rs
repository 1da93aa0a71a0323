//! Window function evaluation.
//!
//! Only the default frame is supported: ranking functions see the partition
//! ordered by the OVER clause's ORDER BY, and windowed aggregates are
//! computed over the entire partition. Explicit framing clauses are not part
//! of the dialect.

use std::cmp::Ordering;
use std::collections::HashMap;

use rill_core::value::{Row, Value};
use rill_sql::ast::{AggregateCall, WindowCall, WindowFunc};

use crate::error::{EngineError, Result};
use crate::eval::{tuple_key, window_fingerprint};
use crate::executor::Executor;

/// A partition: row indices sorted by the call's ORDER BY, plus the sort
/// keys used for peer detection in RANK/DENSE_RANK.
struct Partition {
    indices: Vec<usize>,
    sort_keys: Vec<Vec<Value>>,
}

impl Executor<'_> {
    /// Computes every window call and stashes per-row results under the
    /// call's fingerprint key. Rows are then reordered by the first call's
    /// partitioning and ordering, which is the order the result naturally
    /// reads in when no outer ORDER BY overrides it.
    pub(crate) fn compute_windows(
        &mut self,
        mut rows: Vec<Row>,
        calls: &[WindowCall],
    ) -> Result<Vec<Row>> {
        let mut final_order: Option<Vec<usize>> = None;

        for (call_no, call) in calls.iter().enumerate() {
            self.check_deadline()?;
            let partitions = self.partition_rows(&rows, call)?;
            let fingerprint = window_fingerprint(call);

            for partition in &partitions {
                let values = self.compute_partition(call, &rows, partition)?;
                for (&row_idx, value) in partition.indices.iter().zip(values) {
                    rows[row_idx].insert(fingerprint.clone(), value);
                }
            }

            if call_no == 0 {
                final_order = Some(
                    partitions
                        .into_iter()
                        .flat_map(|p| p.indices)
                        .collect::<Vec<_>>(),
                );
            }
        }

        if let Some(order) = final_order {
            let mut slots: Vec<Option<Row>> = rows.into_iter().map(Some).collect();
            rows = order
                .into_iter()
                .map(|i| slots[i].take().expect("each index appears once"))
                .collect();
        }
        Ok(rows)
    }

    /// Splits row indices by the PARTITION BY key (partitions keep first-
    /// appearance order) and sorts each partition by the ORDER BY keys.
    fn partition_rows(&mut self, rows: &[Row], call: &WindowCall) -> Result<Vec<Partition>> {
        let mut order: Vec<String> = Vec::new();
        let mut buckets: HashMap<String, Vec<usize>> = HashMap::new();

        for (idx, row) in rows.iter().enumerate() {
            let mut key_values = Vec::with_capacity(call.partition_by.len());
            for expr in &call.partition_by {
                key_values.push(self.eval(expr, row)?);
            }
            let key = tuple_key(&key_values);
            if !buckets.contains_key(&key) {
                order.push(key.clone());
                buckets.insert(key.clone(), Vec::new());
            }
            buckets.get_mut(&key).expect("just inserted").push(idx);
        }

        let mut partitions = Vec::with_capacity(order.len());
        for key in order {
            let indices = buckets.remove(&key).unwrap_or_default();
            let mut keyed: Vec<(Vec<Value>, usize)> = Vec::with_capacity(indices.len());
            for idx in indices {
                let mut sort_key = Vec::with_capacity(call.order_by.len());
                for k in &call.order_by {
                    sort_key.push(self.eval(&k.expr, &rows[idx])?);
                }
                keyed.push((sort_key, idx));
            }
            keyed.sort_by(|(a, _), (b, _)| {
                for (i, k) in call.order_by.iter().enumerate() {
                    let ord = a[i].total_cmp(&b[i]);
                    let ord = if k.descending { ord.reverse() } else { ord };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
            let (sort_keys, indices): (Vec<_>, Vec<_>) = keyed.into_iter().unzip();
            partitions.push(Partition { indices, sort_keys });
        }
        Ok(partitions)
    }

    /// One value per partition row, in partition order.
    fn compute_partition(
        &mut self,
        call: &WindowCall,
        rows: &[Row],
        partition: &Partition,
    ) -> Result<Vec<Value>> {
        let count = partition.indices.len();
        let peers_equal = |a: &[Value], b: &[Value]| {
            a.len() == b.len()
                && a.iter()
                    .zip(b)
                    .all(|(x, y)| x.total_cmp(y) == Ordering::Equal)
        };

        match &call.func {
            WindowFunc::RowNumber => {
                Ok((1..=count as i64).map(Value::Integer).collect())
            }
            WindowFunc::Rank => {
                let mut out = Vec::with_capacity(count);
                let mut rank = 1i64;
                for pos in 0..count {
                    if pos > 0
                        && !peers_equal(&partition.sort_keys[pos], &partition.sort_keys[pos - 1])
                    {
                        rank = pos as i64 + 1;
                    }
                    out.push(Value::Integer(rank));
                }
                Ok(out)
            }
            WindowFunc::DenseRank => {
                let mut out = Vec::with_capacity(count);
                let mut rank = 1i64;
                for pos in 0..count {
                    if pos > 0
                        && !peers_equal(&partition.sort_keys[pos], &partition.sort_keys[pos - 1])
                    {
                        rank += 1;
                    }
                    out.push(Value::Integer(rank));
                }
                Ok(out)
            }
            WindowFunc::Ntile => {
                let n = match call.args.first() {
                    Some(expr) => {
                        let first_row = &rows[partition.indices[0]];
                        self.eval(expr, first_row)?.as_i64().unwrap_or(0)
                    }
                    None => 0,
                };
                if n <= 0 {
                    return Err(EngineError::TypeMismatch(
                        "NTILE requires a positive bucket count".into(),
                    ));
                }
                let bucket_size = count.div_ceil(n as usize).max(1);
                Ok((0..count)
                    .map(|pos| Value::Integer((pos / bucket_size) as i64 + 1))
                    .collect())
            }
            WindowFunc::Lead | WindowFunc::Lag => {
                let value_expr = call.args.first().ok_or_else(|| {
                    EngineError::TypeMismatch("LEAD/LAG requires a value expression".into())
                })?;
                let offset = match call.args.get(1) {
                    Some(expr) => self
                        .eval(expr, &rows[partition.indices[0]])?
                        .as_i64()
                        .unwrap_or(1),
                    None => 1,
                };
                let default = match call.args.get(2) {
                    Some(expr) => self.eval(expr, &rows[partition.indices[0]])?,
                    None => Value::Null,
                };
                let mut out = Vec::with_capacity(count);
                for pos in 0..count {
                    let neighbor = if matches!(call.func, WindowFunc::Lead) {
                        pos.checked_add(offset as usize)
                    } else {
                        pos.checked_sub(offset as usize)
                    };
                    let value = match neighbor.and_then(|p| partition.indices.get(p)) {
                        Some(&row_idx) => self.eval(value_expr, &rows[row_idx])?,
                        None => default.clone(),
                    };
                    out.push(value);
                }
                Ok(out)
            }
            WindowFunc::FirstValue | WindowFunc::LastValue => {
                let value_expr = call.args.first().ok_or_else(|| {
                    EngineError::TypeMismatch(
                        "FIRST_VALUE/LAST_VALUE requires a value expression".into(),
                    )
                })?;
                let endpoint = if matches!(call.func, WindowFunc::FirstValue) {
                    *partition.indices.first().expect("nonempty partition")
                } else {
                    *partition.indices.last().expect("nonempty partition")
                };
                let value = self.eval(value_expr, &rows[endpoint])?;
                Ok(vec![value; count])
            }
            WindowFunc::Agg(func) => {
                let member_rows: Vec<Row> = partition
                    .indices
                    .iter()
                    .map(|&i| rows[i].clone())
                    .collect();
                let agg = AggregateCall {
                    func: *func,
                    arg: call.args.first().cloned().map(Box::new),
                    distinct: false,
                };
                let value = self.compute_aggregate(&agg, &member_rows)?;
                Ok(vec![value; count])
            }
        }
    }
}
