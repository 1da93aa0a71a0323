//! The SELECT pipeline: FROM resolution, joins, filtering, grouping,
//! windows, ordering, projection and set operations, in that order.

use std::collections::{HashMap, HashSet};

use rill_core::value::{lookup, Row, Value};
use rill_index::{IndexKey, RangeOp};
use rill_sql::ast::{
    AggregateCall, AggregateFunc, BinaryOp, Expr, FromClause, Join, JoinConstraint, JoinKind,
    OrderKey, SelectStatement, SetOpKind, WindowCall,
};

use crate::error::{EngineError, Result};
use crate::eval::{agg_fingerprint, tuple_key};
use crate::executor::Executor;

/// How often scan loops poll the statement deadline.
const DEADLINE_STRIDE: usize = 512;

/// A resolved row source: its rows, the bare column names in declaration
/// order, and the label rows are qualified under.
struct Source {
    rows: Vec<Row>,
    columns: Vec<String>,
    label: String,
}

impl Executor<'_> {
    /// Runs a full SELECT, producing output column names and value tuples.
    pub(crate) fn run_select(
        &mut self,
        select: &SelectStatement,
    ) -> Result<(Vec<String>, Vec<Vec<Value>>)> {
        // 1-2. FROM and joins. When a WHERE conjunct can drive an index on
        // the base table, fetch candidate row-ids through it; the full WHERE
        // still runs over whatever comes back.
        let (mut rows, mut scope) = match &select.from {
            Some(from) => {
                let prefilter = match (from, &select.where_clause) {
                    (FromClause::Table { name, alias }, Some(predicate)) => {
                        let label = alias.as_deref().unwrap_or(name);
                        self.index_candidates(name, label, predicate)
                    }
                    _ => None,
                };
                let source = self.resolve_source_filtered(from, prefilter.as_deref())?;
                (source.rows, source.columns)
            }
            None => (vec![Row::new()], Vec::new()),
        };
        for join in &select.joins {
            self.check_deadline()?;
            let inner = self.resolve_source(&join.source)?;
            for col in &inner.columns {
                if !scope.contains(col) {
                    scope.push(col.clone());
                }
            }
            rows = self.apply_join(rows, inner, join)?;
        }

        // 3. WHERE.
        if let Some(predicate) = &select.where_clause {
            let mut kept = Vec::with_capacity(rows.len());
            for (i, row) in rows.into_iter().enumerate() {
                if i % DEADLINE_STRIDE == 0 {
                    self.check_deadline()?;
                }
                if self.eval_predicate(predicate, &row)? {
                    kept.push(row);
                }
            }
            rows = kept;
        }

        // 4-5. GROUP BY / implicit aggregation, then HAVING.
        let aggregates = collect_aggregates(select);
        if !select.group_by.is_empty() || !aggregates.is_empty() {
            rows = self.group_rows(select, rows, &aggregates)?;
            if let Some(having) = &select.having {
                let mut kept = Vec::with_capacity(rows.len());
                for row in rows {
                    if self.eval_predicate(having, &row)? {
                        kept.push(row);
                    }
                }
                rows = kept;
            }
        }

        // 6. Window functions.
        let windows = collect_windows(select);
        if !windows.is_empty() {
            rows = self.compute_windows(rows, &windows)?;
        }

        // 7. ORDER BY.
        if !select.order_by.is_empty() {
            rows = self.sort_rows(rows, &select.order_by, &select.projection)?;
        }

        // 10 (and 8). Projection, then DISTINCT over projected tuples.
        let (columns, mut tuples) = self.project(select, &rows, &scope)?;
        if select.distinct {
            dedup_tuples(&mut tuples);
        }

        // 9. OFFSET then LIMIT.
        let offset = select.offset.unwrap_or(0) as usize;
        if offset > 0 {
            tuples.drain(..offset.min(tuples.len()));
        }
        if let Some(limit) = select.limit {
            tuples.truncate(limit as usize);
        }

        // 11. Set-operation tail.
        for set_op in &select.set_ops {
            let (right_cols, right_rows) = self.run_select(&set_op.select)?;
            if right_cols.len() != columns.len() {
                return Err(EngineError::TypeMismatch(format!(
                    "set operation arms have {} and {} columns",
                    columns.len(),
                    right_cols.len()
                )));
            }
            tuples = match set_op.kind {
                SetOpKind::UnionAll => {
                    tuples.extend(right_rows);
                    tuples
                }
                SetOpKind::Union => {
                    tuples.extend(right_rows);
                    dedup_tuples(&mut tuples);
                    tuples
                }
                SetOpKind::Intersect => {
                    let right_keys: HashSet<String> =
                        right_rows.iter().map(|t| tuple_key(t)).collect();
                    tuples.retain(|t| right_keys.contains(&tuple_key(t)));
                    dedup_tuples(&mut tuples);
                    tuples
                }
                SetOpKind::Except => {
                    let right_keys: HashSet<String> =
                        right_rows.iter().map(|t| tuple_key(t)).collect();
                    tuples.retain(|t| !right_keys.contains(&tuple_key(t)));
                    dedup_tuples(&mut tuples);
                    tuples
                }
            };
        }

        Ok((columns, tuples))
    }

    // -- FROM ----------------------------------------------------------------

    fn resolve_source(&mut self, from: &FromClause) -> Result<Source> {
        self.resolve_source_filtered(from, None)
    }

    /// Materializes a row source. Every schema column is present both bare
    /// and as `label.column`, the two keyspaces staying in sync from here on.
    /// `prefilter` narrows a table scan to index-selected row-ids.
    fn resolve_source_filtered(
        &mut self,
        from: &FromClause,
        prefilter: Option<&[u64]>,
    ) -> Result<Source> {
        match from {
            FromClause::Table { name, alias } => {
                let label = alias.clone().unwrap_or_else(|| name.clone());
                let schema = self.store.schema(name)?.clone();
                let columns: Vec<String> =
                    schema.columns.iter().map(|c| c.name.clone()).collect();
                let table = self.store.table(name)?;
                let stored_rows: Vec<&Row> = match prefilter {
                    Some(ids) => ids.iter().filter_map(|&id| table.get(id)).collect(),
                    None => table.iter().map(|(_, row)| row).collect(),
                };
                let mut rows = Vec::with_capacity(stored_rows.len());
                for (i, stored) in stored_rows.into_iter().enumerate() {
                    if i % DEADLINE_STRIDE == 0 {
                        self.check_deadline()?;
                    }
                    let mut row = Row::with_capacity(columns.len() * 2);
                    for col in &columns {
                        let value = stored.get(col).cloned().unwrap_or(Value::Null);
                        row.insert(format!("{label}.{col}"), value.clone());
                        row.insert(col.clone(), value);
                    }
                    rows.push(row);
                }
                Ok(Source {
                    rows,
                    columns,
                    label,
                })
            }
            FromClause::Subquery { select, alias } => {
                let (columns, tuples) = self.run_select(select)?;
                let mut rows = Vec::with_capacity(tuples.len());
                for tuple in tuples {
                    let mut row = Row::with_capacity(columns.len() * 2);
                    for (col, value) in columns.iter().zip(tuple) {
                        row.insert(format!("{alias}.{col}"), value.clone());
                        row.insert(col.clone(), value);
                    }
                    rows.push(row);
                }
                Ok(Source {
                    rows,
                    columns,
                    label: alias.clone(),
                })
            }
        }
    }

    // -- Index-driven access -------------------------------------------------

    /// Row-ids satisfying one indexable WHERE conjunct, fetched through the
    /// best single-column index, or `None` when nothing applies. Only sound
    /// for AND-spine conditions, which is all this looks at.
    fn index_candidates(&mut self, table: &str, label: &str, predicate: &Expr) -> Option<Vec<u64>> {
        let mut conds = Vec::new();
        gather_indexable(predicate, &mut conds);
        for (reference, op) in conds {
            let column = match reference.split_once('.') {
                Some((qualifier, col)) if qualifier == label || qualifier == table => {
                    col.to_string()
                }
                Some(_) => continue,
                None => reference,
            };
            let Some(best) = self.indexes.find_best(table, std::slice::from_ref(&column))
            else {
                continue;
            };
            let leading_only = self
                .indexes
                .get(table, &best)
                .is_some_and(|idx| idx.columns.len() == 1 && idx.columns[0] == column);
            if !leading_only {
                continue;
            }
            let ids = match op {
                IndexableOp::Eq(v) => {
                    self.indexes
                        .search(table, &best, &IndexKey::single(v))
                }
                IndexableOp::In(values) => {
                    let mut ids = Vec::new();
                    for v in values {
                        ids.extend(self.indexes.search(table, &best, &IndexKey::single(v)));
                    }
                    ids.sort_unstable();
                    ids.dedup();
                    ids
                }
                IndexableOp::Cmp(range_op, v) => self.indexes.search_with_operator(
                    table,
                    &best,
                    &IndexKey::single(v),
                    range_op,
                ),
                IndexableOp::Between(lo, hi) => self.indexes.search_range(
                    table,
                    &best,
                    &IndexKey::single(lo),
                    &IndexKey::single(hi),
                ),
                IndexableOp::IsNull => {
                    self.indexes
                        .search(table, &best, &IndexKey::single(Value::Null))
                }
            };
            return Some(ids);
        }
        None
    }

    // -- Joins ---------------------------------------------------------------

    fn apply_join(&mut self, outer: Vec<Row>, inner: Source, join: &Join) -> Result<Vec<Row>> {
        let inner_template = null_template(&inner);
        let outer_template: Row = outer
            .first()
            .map(|row| row.keys().map(|k| (k.clone(), Value::Null)).collect())
            .unwrap_or_default();

        let mut combined = Vec::new();
        let mut matched_inner = vec![false; inner.rows.len()];

        for (i, outer_row) in outer.iter().enumerate() {
            if i % DEADLINE_STRIDE == 0 {
                self.check_deadline()?;
            }
            let mut outer_matched = false;
            for (j, inner_row) in inner.rows.iter().enumerate() {
                let merged = merge_rows(outer_row, inner_row);
                let hit = match &join.constraint {
                    JoinConstraint::None => true,
                    JoinConstraint::On(predicate) => self.eval_predicate(predicate, &merged)?,
                    JoinConstraint::Using(cols) => using_match(outer_row, inner_row, cols),
                };
                if hit {
                    outer_matched = true;
                    matched_inner[j] = true;
                    combined.push(merged);
                }
            }
            if !outer_matched && matches!(join.kind, JoinKind::Left | JoinKind::Full) {
                combined.push(merge_rows(outer_row, &inner_template));
            }
        }

        if matches!(join.kind, JoinKind::Right | JoinKind::Full) {
            for (j, inner_row) in inner.rows.iter().enumerate() {
                if !matched_inner[j] {
                    combined.push(merge_rows(&outer_template, inner_row));
                }
            }
        }

        Ok(combined)
    }

    // -- Grouping ------------------------------------------------------------

    /// Collapses rows into one representative row per group, with each
    /// aggregate's value stashed under its fingerprint key. With no GROUP BY
    /// the whole input is a single group, even when empty.
    fn group_rows(
        &mut self,
        select: &SelectStatement,
        rows: Vec<Row>,
        aggregates: &[AggregateCall],
    ) -> Result<Vec<Row>> {
        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Vec<Row>> = HashMap::new();

        if select.group_by.is_empty() {
            order.push(String::new());
            groups.insert(String::new(), rows);
        } else {
            for row in rows {
                let mut key_values = Vec::with_capacity(select.group_by.len());
                for expr in &select.group_by {
                    key_values.push(self.eval(expr, &row)?);
                }
                let key = tuple_key(&key_values);
                if !groups.contains_key(&key) {
                    order.push(key.clone());
                    groups.insert(key.clone(), Vec::new());
                }
                groups.get_mut(&key).expect("just inserted").push(row);
            }
        }

        let mut out = Vec::with_capacity(order.len());
        for key in order {
            let members = groups.remove(&key).unwrap_or_default();
            let mut representative = members.first().cloned().unwrap_or_default();
            for call in aggregates {
                let value = self.compute_aggregate(call, &members)?;
                representative.insert(agg_fingerprint(call), value);
            }
            out.push(representative);
        }
        Ok(out)
    }

    pub(crate) fn compute_aggregate(
        &mut self,
        call: &AggregateCall,
        rows: &[Row],
    ) -> Result<Value> {
        let arg = match &call.arg {
            None => return Ok(Value::Integer(rows.len() as i64)),
            Some(arg) => arg,
        };
        let mut values = Vec::with_capacity(rows.len());
        for row in rows {
            let v = self.eval(arg, row)?;
            if !v.is_null() {
                values.push(v);
            }
        }
        if call.distinct {
            let mut seen = HashSet::new();
            values.retain(|v| seen.insert(tuple_key(std::slice::from_ref(v))));
        }
        Ok(match call.func {
            AggregateFunc::Count => Value::Integer(values.len() as i64),
            AggregateFunc::Sum => numeric_sum(&values)?,
            AggregateFunc::Avg => match numeric_sum(&values)? {
                Value::Null => Value::Null,
                sum => {
                    let total = sum.as_f64().unwrap_or(0.0);
                    Value::Float(total / values.len() as f64)
                }
            },
            AggregateFunc::Min => values
                .iter()
                .cloned()
                .min_by(|a, b| a.total_cmp(b))
                .unwrap_or(Value::Null),
            AggregateFunc::Max => values
                .iter()
                .cloned()
                .max_by(|a, b| a.total_cmp(b))
                .unwrap_or(Value::Null),
            AggregateFunc::GroupConcat => {
                if values.is_empty() {
                    Value::Null
                } else {
                    let parts: Vec<String> =
                        values.iter().filter_map(|v| v.as_text()).collect();
                    Value::Text(parts.join(","))
                }
            }
        })
    }

    // -- Ordering ------------------------------------------------------------

    /// Stable multi-key sort. Projection aliases are usable as sort keys.
    fn sort_rows(
        &mut self,
        rows: Vec<Row>,
        order_by: &[OrderKey],
        projection: &[rill_sql::ast::SelectItem],
    ) -> Result<Vec<Row>> {
        let resolved: Vec<(Expr, bool)> = order_by
            .iter()
            .map(|key| {
                let expr = match &key.expr {
                    Expr::Column(name) => projection
                        .iter()
                        .find(|item| item.alias.as_deref() == Some(name.as_str()))
                        .map(|item| item.expr.clone())
                        .unwrap_or_else(|| key.expr.clone()),
                    other => other.clone(),
                };
                (expr, key.descending)
            })
            .collect();

        let mut keyed = Vec::with_capacity(rows.len());
        for (i, row) in rows.into_iter().enumerate() {
            if i % DEADLINE_STRIDE == 0 {
                self.check_deadline()?;
            }
            let mut keys = Vec::with_capacity(resolved.len());
            for (expr, _) in &resolved {
                keys.push(self.eval(expr, &row)?);
            }
            keyed.push((keys, row));
        }

        keyed.sort_by(|(a, _), (b, _)| {
            for (i, (_, descending)) in resolved.iter().enumerate() {
                let ord = a[i].total_cmp(&b[i]);
                let ord = if *descending { ord.reverse() } else { ord };
                if !ord.is_eq() {
                    return ord;
                }
            }
            std::cmp::Ordering::Equal
        });

        Ok(keyed.into_iter().map(|(_, row)| row).collect())
    }

    // -- Projection ----------------------------------------------------------

    fn project(
        &mut self,
        select: &SelectStatement,
        rows: &[Row],
        scope: &[String],
    ) -> Result<(Vec<String>, Vec<Vec<Value>>)> {
        let mut columns = Vec::new();
        for item in &select.projection {
            match &item.expr {
                Expr::Wildcard => columns.extend(scope.iter().cloned()),
                expr => columns.push(
                    item.alias
                        .clone()
                        .unwrap_or_else(|| expr.display_name()),
                ),
            }
        }

        let mut tuples = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            if i % DEADLINE_STRIDE == 0 {
                self.check_deadline()?;
            }
            let mut tuple = Vec::with_capacity(columns.len());
            for item in &select.projection {
                match &item.expr {
                    Expr::Wildcard => {
                        for col in scope {
                            tuple.push(lookup(row, col).cloned().unwrap_or(Value::Null));
                        }
                    }
                    expr => tuple.push(self.eval(expr, row)?),
                }
            }
            tuples.push(tuple);
        }
        Ok((columns, tuples))
    }
}

// ---------------------------------------------------------------------------
// Indexable condition extraction
// ---------------------------------------------------------------------------

enum IndexableOp {
    Eq(Value),
    In(Vec<Value>),
    Cmp(RangeOp, Value),
    Between(Value, Value),
    IsNull,
}

/// Collects `column <op> constant` conjuncts from the AND spine. OR, NOT and
/// anything non-constant are skipped; they stay with the general evaluator.
fn gather_indexable(expr: &Expr, out: &mut Vec<(String, IndexableOp)>) {
    match expr {
        Expr::Binary {
            left,
            op: BinaryOp::And,
            right,
        } => {
            gather_indexable(left, out);
            gather_indexable(right, out);
        }
        Expr::Binary { left, op, right } if op.is_comparison() => {
            // Normalize `literal op column` to `column op' literal`.
            let (column, value, op) = match (&**left, &**right) {
                (Expr::Column(c), Expr::Literal(v)) => (c, v, *op),
                (Expr::Literal(v), Expr::Column(c)) => {
                    let flipped = match op {
                        BinaryOp::Lt => BinaryOp::Gt,
                        BinaryOp::Gt => BinaryOp::Lt,
                        BinaryOp::LtEq => BinaryOp::GtEq,
                        BinaryOp::GtEq => BinaryOp::LtEq,
                        other => *other,
                    };
                    (c, v, flipped)
                }
                _ => return,
            };
            let indexable = match op {
                BinaryOp::Eq => IndexableOp::Eq(value.clone()),
                BinaryOp::Lt => IndexableOp::Cmp(RangeOp::Lt, value.clone()),
                BinaryOp::Gt => IndexableOp::Cmp(RangeOp::Gt, value.clone()),
                BinaryOp::LtEq => IndexableOp::Cmp(RangeOp::Le, value.clone()),
                BinaryOp::GtEq => IndexableOp::Cmp(RangeOp::Ge, value.clone()),
                _ => return,
            };
            out.push((column.clone(), indexable));
        }
        Expr::InList {
            expr,
            list,
            negated: false,
        } => {
            if let Expr::Column(c) = &**expr {
                let mut values = Vec::with_capacity(list.len());
                for item in list {
                    match item {
                        Expr::Literal(v) => values.push(v.clone()),
                        _ => return,
                    }
                }
                out.push((c.clone(), IndexableOp::In(values)));
            }
        }
        Expr::Between {
            expr,
            low,
            high,
            negated: false,
        } => {
            if let (Expr::Column(c), Expr::Literal(lo), Expr::Literal(hi)) =
                (&**expr, &**low, &**high)
            {
                out.push((c.clone(), IndexableOp::Between(lo.clone(), hi.clone())));
            }
        }
        Expr::IsNull {
            expr,
            negated: false,
        } => {
            if let Expr::Column(c) = &**expr {
                out.push((c.clone(), IndexableOp::IsNull));
            }
        }
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Row plumbing
// ---------------------------------------------------------------------------

fn merge_rows(outer: &Row, inner: &Row) -> Row {
    let mut merged = outer.clone();
    for (k, v) in inner {
        merged.insert(k.clone(), v.clone());
    }
    merged
}

/// All of a source's keys mapped to NULL, for padding unmatched rows in
/// outer joins.
fn null_template(source: &Source) -> Row {
    let mut template = Row::new();
    for col in &source.columns {
        template.insert(col.clone(), Value::Null);
        template.insert(format!("{}.{col}", source.label), Value::Null);
    }
    template
}

/// USING(cols): all named columns non-null equal on both sides.
fn using_match(outer: &Row, inner: &Row, cols: &[String]) -> bool {
    cols.iter().all(|col| {
        match (lookup(outer, col), lookup(inner, col)) {
            (Some(a), Some(b)) => !a.is_null() && !b.is_null() && a.sql_eq(b),
            _ => false,
        }
    })
}

fn dedup_tuples(tuples: &mut Vec<Vec<Value>>) {
    let mut seen = HashSet::new();
    tuples.retain(|t| seen.insert(tuple_key(t)));
}

fn numeric_sum(values: &[Value]) -> Result<Value> {
    if values.is_empty() {
        return Ok(Value::Null);
    }
    if values.iter().all(|v| matches!(v, Value::Integer(_))) {
        let mut total = 0i64;
        for v in values {
            if let Value::Integer(n) = v {
                total = total.wrapping_add(*n);
            }
        }
        return Ok(Value::Integer(total));
    }
    let mut total = 0.0;
    for v in values {
        match v.as_f64() {
            Some(f) => total += f,
            None => {
                return Err(EngineError::TypeMismatch(format!(
                    "cannot sum non-numeric value {v}"
                )));
            }
        }
    }
    Ok(Value::Float(total))
}

// ---------------------------------------------------------------------------
// Call collection
// ---------------------------------------------------------------------------

/// Aggregate calls reachable from the projection, HAVING and ORDER BY,
/// deduplicated by fingerprint. Window internals are excluded; windowed
/// aggregates run over partitions, not groups.
pub(crate) fn collect_aggregates(select: &SelectStatement) -> Vec<AggregateCall> {
    let mut calls = Vec::new();
    let mut walk = |expr: &Expr| collect_agg_calls(expr, &mut calls);
    for item in &select.projection {
        walk(&item.expr);
    }
    if let Some(having) = &select.having {
        walk(having);
    }
    for key in &select.order_by {
        walk(&key.expr);
    }
    let mut seen = HashSet::new();
    calls.retain(|c| seen.insert(agg_fingerprint(c)));
    calls
}

fn collect_agg_calls(expr: &Expr, out: &mut Vec<AggregateCall>) {
    match expr {
        Expr::Aggregate(call) => out.push(call.clone()),
        Expr::Not(e) | Expr::Neg(e) => collect_agg_calls(e, out),
        Expr::Binary { left, right, .. } => {
            collect_agg_calls(left, out);
            collect_agg_calls(right, out);
        }
        Expr::IsNull { expr, .. } => collect_agg_calls(expr, out),
        Expr::InList { expr, list, .. } => {
            collect_agg_calls(expr, out);
            for item in list {
                collect_agg_calls(item, out);
            }
        }
        Expr::Between { expr, low, high, .. } => {
            collect_agg_calls(expr, out);
            collect_agg_calls(low, out);
            collect_agg_calls(high, out);
        }
        Expr::Like { expr, pattern, .. } | Expr::Regexp { expr, pattern, .. } => {
            collect_agg_calls(expr, out);
            collect_agg_calls(pattern, out);
        }
        Expr::Case {
            operand,
            branches,
            else_result,
        } => {
            if let Some(op) = operand {
                collect_agg_calls(op, out);
            }
            for (when, then) in branches {
                collect_agg_calls(when, out);
                collect_agg_calls(then, out);
            }
            if let Some(e) = else_result {
                collect_agg_calls(e, out);
            }
        }
        _ => {}
    }
}

/// Window calls in the projection, deduplicated by fingerprint.
pub(crate) fn collect_windows(select: &SelectStatement) -> Vec<WindowCall> {
    use crate::eval::window_fingerprint;
    let mut calls = Vec::new();
    for item in &select.projection {
        collect_win_calls(&item.expr, &mut calls);
    }
    let mut seen = HashSet::new();
    calls.retain(|c| seen.insert(window_fingerprint(c)));
    calls
}

fn collect_win_calls(expr: &Expr, out: &mut Vec<WindowCall>) {
    match expr {
        Expr::Window(call) => out.push((**call).clone()),
        Expr::Not(e) | Expr::Neg(e) => collect_win_calls(e, out),
        Expr::Binary { left, right, .. } => {
            collect_win_calls(left, out);
            collect_win_calls(right, out);
        }
        Expr::Case {
            operand,
            branches,
            else_result,
        } => {
            if let Some(op) = operand {
                collect_win_calls(op, out);
            }
            for (when, then) in branches {
                collect_win_calls(when, out);
                collect_win_calls(then, out);
            }
            if let Some(e) = else_result {
                collect_win_calls(e, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rill_sql::ast::Statement;
    use rill_sql::parse_statement;
    use rill_storage::Store;

    use crate::txn::TransactionManager;

    fn where_of(sql: &str) -> Expr {
        match parse_statement(sql).unwrap() {
            Statement::Select(s) => s.where_clause.expect("WHERE present"),
            other => panic!("expected SELECT, got {other:?}"),
        }
    }

    #[test]
    fn gather_indexable_walks_the_and_spine() {
        let mut conds = Vec::new();
        gather_indexable(
            &where_of("SELECT x FROM t WHERE a = 1 AND 5 > b AND name LIKE 'x%'"),
            &mut conds,
        );
        assert_eq!(conds.len(), 2);
        assert!(
            matches!(&conds[0], (c, IndexableOp::Eq(Value::Integer(1))) if c == "a")
        );
        // The reversed comparison flips around the column.
        assert!(
            matches!(&conds[1], (c, IndexableOp::Cmp(RangeOp::Lt, Value::Integer(5))) if c == "b")
        );
    }

    #[test]
    fn gather_indexable_recognizes_in_between_and_is_null() {
        let mut conds = Vec::new();
        gather_indexable(
            &where_of(
                "SELECT x FROM t WHERE a IN (1, 2) AND b BETWEEN 3 AND 4 AND c IS NULL",
            ),
            &mut conds,
        );
        assert_eq!(conds.len(), 3);
        assert!(matches!(&conds[0], (_, IndexableOp::In(values)) if values.len() == 2));
        assert!(matches!(&conds[1], (_, IndexableOp::Between(..))));
        assert!(matches!(&conds[2], (_, IndexableOp::IsNull)));
    }

    #[test]
    fn gather_indexable_skips_or_not_and_negated_forms() {
        let mut conds = Vec::new();
        gather_indexable(&where_of("SELECT x FROM t WHERE a = 1 OR b = 2"), &mut conds);
        assert!(conds.is_empty());
        gather_indexable(
            &where_of("SELECT x FROM t WHERE NOT a = 1 AND b NOT IN (1)"),
            &mut conds,
        );
        assert!(conds.is_empty());
    }

    #[test]
    fn numeric_sum_stays_integral_until_it_cannot() {
        assert_eq!(
            numeric_sum(&[Value::Integer(1), Value::Integer(2)]).unwrap(),
            Value::Integer(3)
        );
        assert_eq!(
            numeric_sum(&[Value::Integer(1), Value::Float(0.5)]).unwrap(),
            Value::Float(1.5)
        );
        assert_eq!(numeric_sum(&[]).unwrap(), Value::Null);
        assert!(numeric_sum(&[Value::Text("word".into())]).is_err());
    }

    #[test]
    fn dedup_tuples_keeps_first_occurrences_in_order() {
        let mut tuples = vec![
            vec![Value::Integer(2)],
            vec![Value::Integer(1)],
            vec![Value::Integer(2)],
            vec![Value::Text("2".into())],
        ];
        dedup_tuples(&mut tuples);
        // `2` and `'2'` are different tuples; the later integer 2 is not.
        assert_eq!(
            tuples,
            vec![
                vec![Value::Integer(2)],
                vec![Value::Integer(1)],
                vec![Value::Text("2".into())],
            ]
        );
    }

    #[test]
    fn collect_aggregates_deduplicates_across_clauses() {
        let Statement::Select(select) = parse_statement(
            "SELECT COUNT(*), SUM(v) FROM t GROUP BY g HAVING COUNT(*) > 1 ORDER BY COUNT(*)",
        )
        .unwrap() else {
            panic!("expected SELECT");
        };
        let calls = collect_aggregates(&select);
        // COUNT(*) appears three times but is computed once.
        assert_eq!(calls.len(), 2);
    }

    // -- Executor-level checks ------------------------------------------------

    struct Harness {
        _dir: tempfile::TempDir,
        store: Store,
        indexes: rill_index::IndexManager,
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
                indexes: rill_index::IndexManager::new(),
                txns: TransactionManager::new(),
                txn: None,
            }
        }

        fn exec(&mut self) -> Executor<'_> {
            Executor::new(
                &mut self.store,
                &mut self.indexes,
                &mut self.txns,
                &mut self.txn,
                None,
            )
        }

        fn run(&mut self, sql: &str) -> rill_core::result::QueryResult {
            let stmt = parse_statement(sql).unwrap();
            self.exec().execute(&stmt).unwrap()
        }
    }

    #[test]
    fn index_prefilter_agrees_with_the_full_scan() {
        let mut h = Harness::new();
        h.run("CREATE TABLE t (x INT)");
        for v in [5, 1, 4, 2, 3] {
            h.run(&format!("INSERT INTO t VALUES ({v})"));
        }
        h.run("CREATE INDEX ix ON t (x)");

        // The prefilter itself surfaces the matching row-ids in key order.
        let predicate = where_of("SELECT x FROM t WHERE x > 3");
        let ids = h.exec().index_candidates("t", "t", &predicate).unwrap();
        // x=4 is row 3, x=5 is row 1.
        assert_eq!(ids, vec![3, 1]);

        // And the query result matches what a plain scan would produce.
        let result = h.run("SELECT x FROM t WHERE x > 3 ORDER BY x");
        assert_eq!(
            result.rows,
            vec![vec![Value::Integer(4)], vec![Value::Integer(5)]]
        );
    }

    #[test]
    fn or_predicates_never_prefilter() {
        let mut h = Harness::new();
        h.run("CREATE TABLE t (x INT)");
        h.run("INSERT INTO t VALUES (1), (2)");
        h.run("CREATE INDEX ix ON t (x)");
        let predicate = where_of("SELECT x FROM t WHERE x = 1 OR x = 2");
        assert!(h.exec().index_candidates("t", "t", &predicate).is_none());
    }

    #[test]
    fn set_operation_arms_must_agree_on_arity() {
        let mut h = Harness::new();
        h.run("CREATE TABLE a (x INT)");
        h.run("CREATE TABLE b (x INT, y INT)");
        let stmt = parse_statement("SELECT x FROM a UNION SELECT x, y FROM b").unwrap();
        let err = h.exec().execute(&stmt).unwrap_err();
        assert!(matches!(err, EngineError::TypeMismatch(_)));
    }

    #[test]
    fn groups_keep_first_appearance_order() {
        let mut h = Harness::new();
        h.run("CREATE TABLE t (g VARCHAR(4))");
        h.run("INSERT INTO t VALUES ('b'), ('a'), ('b'), ('c')");
        // No ORDER BY: groups surface as first encountered.
        let result = h.run("SELECT g, COUNT(*) FROM t GROUP BY g");
        let labels: Vec<String> = result
            .rows
            .iter()
            .map(|r| r[0].as_text().unwrap())
            .collect();
        assert_eq!(labels, vec!["b", "a", "c"]);
    }
}
