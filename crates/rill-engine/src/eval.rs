//! Expression evaluation under three-valued logic.
//!
//! Comparisons involving NULL yield NULL, which filters treat as false but
//! projection preserves. Subqueries are detected as correlated by a
//! free-variable scan; non-correlated results are cached for the statement.

use rill_core::value::{lookup, Row, Value};
use rill_sql::ast::{
    AggregateCall, BinaryOp, Expr, FromClause, Quantifier, SelectStatement, WindowCall,
};

use crate::error::{EngineError, Result};
use crate::executor::Executor;

/// Row key under which a computed aggregate is stashed by the grouping step.
pub(crate) fn agg_fingerprint(call: &AggregateCall) -> String {
    format!("#agg:{call:?}")
}

/// Row key under which a computed window value is stashed.
pub(crate) fn window_fingerprint(call: &WindowCall) -> String {
    format!("#win:{call:?}")
}

/// A collision-free rendering of a value tuple, used for grouping keys,
/// DISTINCT and set operations. Each value is tagged with its type so that
/// `1` and `'1'` stay distinct.
pub(crate) fn tuple_key(values: &[Value]) -> String {
    let mut key = String::new();
    for v in values {
        match v {
            Value::Null => key.push_str("n:"),
            Value::Integer(n) => key.push_str(&format!("i:{n}")),
            Value::Float(f) => key.push_str(&format!("f:{f}")),
            Value::Text(s) => key.push_str(&format!("t:{s}")),
            Value::Boolean(b) => key.push_str(&format!("b:{b}")),
            Value::Json(j) => key.push_str(&format!("j:{j}")),
            Value::Bytes(b) => key.push_str(&format!("x:{b:?}")),
        }
        key.push('\u{1}');
    }
    key
}

/// Translates a SQL LIKE pattern into an anchored, case-insensitive regex.
pub(crate) fn like_to_regex(pattern: &str) -> String {
    let mut out = String::from("(?is)^");
    for ch in pattern.chars() {
        match ch {
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            c => out.push_str(&regex::escape(&c.to_string())),
        }
    }
    out.push('$');
    out
}

fn three_valued(b: Option<bool>) -> Value {
    match b {
        Some(v) => Value::Boolean(v),
        None => Value::Null,
    }
}

fn as_tvl(v: &Value) -> Option<bool> {
    match v {
        Value::Null => None,
        other => Some(other.is_truthy()),
    }
}

impl Executor<'_> {
    /// Evaluates an expression against a row.
    pub(crate) fn eval(&mut self, expr: &Expr, row: &Row) -> Result<Value> {
        match expr {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Column(name) => self.resolve_column(name, row),
            Expr::Wildcard => Err(EngineError::Internal(
                "`*` is only valid as a projection item".into(),
            )),
            Expr::Default => Err(EngineError::Internal(
                "DEFAULT is only valid in an INSERT value list".into(),
            )),
            Expr::Not(inner) => {
                let v = self.eval(inner, row)?;
                Ok(three_valued(as_tvl(&v).map(|b| !b)))
            }
            Expr::Neg(inner) => {
                let v = self.eval(inner, row)?;
                match v {
                    Value::Null => Ok(Value::Null),
                    Value::Integer(n) => Ok(Value::Integer(-n)),
                    other => match other.as_f64() {
                        Some(f) => Ok(Value::Float(-f)),
                        None => Err(EngineError::TypeMismatch(format!(
                            "cannot negate {other}"
                        ))),
                    },
                }
            }
            Expr::Binary { left, op, right } => self.eval_binary(left, *op, right, row),
            Expr::IsNull { expr, negated } => {
                let v = self.eval(expr, row)?;
                Ok(Value::Boolean(v.is_null() != *negated))
            }
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let v = self.eval(expr, row)?;
                let lo = self.eval(low, row)?;
                let hi = self.eval(high, row)?;
                let ge = compare(BinaryOp::GtEq, &v, &lo);
                let le = compare(BinaryOp::LtEq, &v, &hi);
                let both = tvl_and(as_tvl(&ge), as_tvl(&le));
                Ok(three_valued(if *negated { both.map(|b| !b) } else { both }))
            }
            Expr::InList {
                expr,
                list,
                negated,
            } => {
                let needle = self.eval(expr, row)?;
                let mut haystack = Vec::with_capacity(list.len());
                for item in list {
                    haystack.push(self.eval(item, row)?);
                }
                Ok(in_result(&needle, &haystack, *negated))
            }
            Expr::InSubquery {
                expr,
                subquery,
                negated,
            } => {
                let needle = self.eval(expr, row)?;
                let values = self.subquery_column(subquery, row)?;
                Ok(in_result(&needle, &values, *negated))
            }
            Expr::Like {
                expr,
                pattern,
                negated,
            } => self.eval_pattern(expr, pattern, row, *negated, true),
            Expr::Regexp {
                expr,
                pattern,
                negated,
            } => self.eval_pattern(expr, pattern, row, *negated, false),
            Expr::Exists { subquery, negated } => {
                let (_, rows) = self.run_subquery(subquery, row)?;
                Ok(Value::Boolean(rows.is_empty() == *negated))
            }
            Expr::Quantified {
                expr,
                op,
                quantifier,
                subquery,
            } => {
                let left = self.eval(expr, row)?;
                let values = self.subquery_column(subquery, row)?;
                Ok(quantified_result(&left, *op, *quantifier, &values))
            }
            Expr::ScalarSubquery(subquery) => {
                let (_, rows) = self.run_subquery(subquery, row)?;
                Ok(rows
                    .first()
                    .and_then(|r| r.first())
                    .cloned()
                    .unwrap_or(Value::Null))
            }
            Expr::Aggregate(call) => {
                let key = agg_fingerprint(call);
                row.get(&key).cloned().ok_or_else(|| {
                    EngineError::Internal("aggregate evaluated outside a grouped context".into())
                })
            }
            Expr::Window(call) => {
                let key = window_fingerprint(call);
                row.get(&key).cloned().ok_or_else(|| {
                    EngineError::Internal("window function evaluated outside its query".into())
                })
            }
            Expr::Case {
                operand,
                branches,
                else_result,
            } => {
                let operand_value = match operand {
                    Some(op) => Some(self.eval(op, row)?),
                    None => None,
                };
                for (when, then) in branches {
                    let hit = match &operand_value {
                        // Simple CASE: operand = WHEN value.
                        Some(op_value) => {
                            let w = self.eval(when, row)?;
                            !op_value.is_null() && !w.is_null() && op_value.sql_eq(&w)
                        }
                        // Searched CASE: WHEN is a predicate.
                        None => as_tvl(&self.eval(when, row)?).unwrap_or(false),
                    };
                    if hit {
                        return self.eval(then, row);
                    }
                }
                match else_result {
                    Some(e) => self.eval(e, row),
                    None => Ok(Value::Null),
                }
            }
        }
    }

    /// Truthiness of a predicate for filtering: NULL counts as false.
    pub(crate) fn eval_predicate(&mut self, expr: &Expr, row: &Row) -> Result<bool> {
        Ok(as_tvl(&self.eval(expr, row)?).unwrap_or(false))
    }

    fn resolve_column(&mut self, name: &str, row: &Row) -> Result<Value> {
        if let Some(v) = lookup(row, name) {
            return Ok(v.clone());
        }
        // Correlated reference: walk outer rows, innermost first.
        for outer in self.outer_rows.iter().rev() {
            if let Some(v) = lookup(outer, name) {
                return Ok(v.clone());
            }
        }
        Err(EngineError::ColumnMissing(name.to_string()))
    }

    fn eval_binary(&mut self, left: &Expr, op: BinaryOp, right: &Expr, row: &Row) -> Result<Value> {
        match op {
            BinaryOp::And => {
                let l = as_tvl(&self.eval(left, row)?);
                // Short-circuit: false AND anything is false.
                if l == Some(false) {
                    return Ok(Value::Boolean(false));
                }
                let r = as_tvl(&self.eval(right, row)?);
                Ok(three_valued(tvl_and(l, r)))
            }
            BinaryOp::Or => {
                let l = as_tvl(&self.eval(left, row)?);
                if l == Some(true) {
                    return Ok(Value::Boolean(true));
                }
                let r = as_tvl(&self.eval(right, row)?);
                Ok(three_valued(tvl_or(l, r)))
            }
            _ if op.is_comparison() => {
                let l = self.eval(left, row)?;
                let r = self.eval(right, row)?;
                Ok(compare(op, &l, &r))
            }
            _ => {
                let l = self.eval(left, row)?;
                let r = self.eval(right, row)?;
                arithmetic(op, &l, &r)
            }
        }
    }

    fn eval_pattern(
        &mut self,
        expr: &Expr,
        pattern: &Expr,
        row: &Row,
        negated: bool,
        is_like: bool,
    ) -> Result<Value> {
        let value = self.eval(expr, row)?;
        let pattern = self.eval(pattern, row)?;
        if value.is_null() || pattern.is_null() {
            return Ok(Value::Null);
        }
        let text = value.as_text().unwrap_or_default();
        let pattern_text = pattern.as_text().unwrap_or_default();
        let source = if is_like {
            like_to_regex(&pattern_text)
        } else {
            pattern_text.clone()
        };
        let re = regex::Regex::new(&source).map_err(|e| {
            EngineError::TypeMismatch(format!("invalid pattern {pattern_text:?}: {e}"))
        })?;
        Ok(Value::Boolean(re.is_match(&text) != negated))
    }

    // -- Subqueries ----------------------------------------------------------

    /// Runs a subquery with the current row available as the outer scope,
    /// using the statement-level cache when the subquery is closed over no
    /// free variables.
    pub(crate) fn run_subquery(
        &mut self,
        select: &SelectStatement,
        current: &Row,
    ) -> Result<(Vec<String>, Vec<Vec<Value>>)> {
        let correlated = is_correlated(select, self);
        let cache_key = select as *const SelectStatement as usize;
        if !correlated {
            if let Some(hit) = self.subquery_cache.get(&cache_key) {
                return Ok(hit.clone());
            }
        }
        self.outer_rows.push(current.clone());
        let result = self.run_select(select);
        self.outer_rows.pop();
        let result = result?;
        if !correlated {
            self.subquery_cache.insert(cache_key, result.clone());
        }
        Ok(result)
    }

    /// First projected column of a subquery's result.
    fn subquery_column(&mut self, select: &SelectStatement, current: &Row) -> Result<Vec<Value>> {
        let (_, rows) = self.run_subquery(select, current)?;
        Ok(rows
            .into_iter()
            .map(|mut r| {
                if r.is_empty() {
                    Value::Null
                } else {
                    r.swap_remove(0)
                }
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Pure value operations
// ---------------------------------------------------------------------------

/// A comparison under three-valued logic.
pub(crate) fn compare(op: BinaryOp, l: &Value, r: &Value) -> Value {
    if l.is_null() || r.is_null() {
        return Value::Null;
    }
    let ord = l.total_cmp(r);
    let result = match op {
        BinaryOp::Eq => ord.is_eq(),
        BinaryOp::NotEq => ord.is_ne(),
        BinaryOp::Lt => ord.is_lt(),
        BinaryOp::Gt => ord.is_gt(),
        BinaryOp::LtEq => ord.is_le(),
        BinaryOp::GtEq => ord.is_ge(),
        _ => unreachable!("compare called with non-comparison operator"),
    };
    Value::Boolean(result)
}

fn arithmetic(op: BinaryOp, l: &Value, r: &Value) -> Result<Value> {
    if l.is_null() || r.is_null() {
        return Ok(Value::Null);
    }
    // Integer arithmetic stays integral except for division.
    if let (Value::Integer(a), Value::Integer(b)) = (l, r) {
        return Ok(match op {
            BinaryOp::Add => Value::Integer(a.wrapping_add(*b)),
            BinaryOp::Sub => Value::Integer(a.wrapping_sub(*b)),
            BinaryOp::Mul => Value::Integer(a.wrapping_mul(*b)),
            BinaryOp::Div => {
                if *b == 0 {
                    Value::Null
                } else if a % b == 0 {
                    Value::Integer(a / b)
                } else {
                    Value::Float(*a as f64 / *b as f64)
                }
            }
            BinaryOp::Mod => {
                if *b == 0 {
                    Value::Null
                } else {
                    Value::Integer(a % b)
                }
            }
            _ => unreachable!("arithmetic called with non-arithmetic operator"),
        });
    }
    let (a, b) = match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            return Err(EngineError::TypeMismatch(format!(
                "cannot apply {} to {l} and {r}",
                op.as_str()
            )));
        }
    };
    Ok(match op {
        BinaryOp::Add => Value::Float(a + b),
        BinaryOp::Sub => Value::Float(a - b),
        BinaryOp::Mul => Value::Float(a * b),
        BinaryOp::Div => {
            if b == 0.0 {
                Value::Null
            } else {
                Value::Float(a / b)
            }
        }
        BinaryOp::Mod => {
            if b == 0.0 {
                Value::Null
            } else {
                Value::Float(a % b)
            }
        }
        _ => unreachable!("arithmetic called with non-arithmetic operator"),
    })
}

fn tvl_and(l: Option<bool>, r: Option<bool>) -> Option<bool> {
    match (l, r) {
        (Some(false), _) | (_, Some(false)) => Some(false),
        (Some(true), Some(true)) => Some(true),
        _ => None,
    }
}

fn tvl_or(l: Option<bool>, r: Option<bool>) -> Option<bool> {
    match (l, r) {
        (Some(true), _) | (_, Some(true)) => Some(true),
        (Some(false), Some(false)) => Some(false),
        _ => None,
    }
}

/// `x [NOT] IN (haystack)` under three-valued logic: a match wins, otherwise
/// any NULL on either side makes the result unknown.
fn in_result(needle: &Value, haystack: &[Value], negated: bool) -> Value {
    if needle.is_null() {
        return Value::Null;
    }
    let mut saw_null = false;
    for candidate in haystack {
        if candidate.is_null() {
            saw_null = true;
        } else if needle.sql_eq(candidate) {
            return Value::Boolean(!negated);
        }
    }
    if saw_null {
        Value::Null
    } else {
        Value::Boolean(negated)
    }
}

/// `left op ANY/ALL (values)` with short-circuiting.
fn quantified_result(left: &Value, op: BinaryOp, quantifier: Quantifier, values: &[Value]) -> Value {
    match quantifier {
        Quantifier::Any => {
            let mut saw_null = false;
            for v in values {
                match compare(op, left, v) {
                    Value::Boolean(true) => return Value::Boolean(true),
                    Value::Null => saw_null = true,
                    _ => {}
                }
            }
            if saw_null {
                Value::Null
            } else {
                Value::Boolean(false)
            }
        }
        Quantifier::All => {
            let mut saw_null = false;
            for v in values {
                match compare(op, left, v) {
                    Value::Boolean(false) => return Value::Boolean(false),
                    Value::Null => saw_null = true,
                    _ => {}
                }
            }
            if saw_null {
                Value::Null
            } else {
                Value::Boolean(true)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Correlation analysis
// ---------------------------------------------------------------------------

/// Free-variable scan: a subquery is correlated when it references a column
/// that none of its own sources can produce. Nested subqueries are treated
/// as correlated conservatively (their free variables are not chased).
pub(crate) fn is_correlated(select: &SelectStatement, exec: &Executor<'_>) -> bool {
    let mut labels: Vec<String> = Vec::new();
    let mut local_columns: Vec<String> = Vec::new();
    let mut sources: Vec<&FromClause> = Vec::new();
    if let Some(from) = &select.from {
        sources.push(from);
    }
    for join in &select.joins {
        sources.push(&join.source);
    }
    for source in &sources {
        labels.push(source.label().to_string());
        match source {
            FromClause::Table { name, .. } => {
                labels.push(name.clone());
                if let Ok(schema) = exec.store.schema(name) {
                    for col in &schema.columns {
                        local_columns.push(col.name.clone());
                    }
                }
            }
            FromClause::Subquery { select: inner, .. } => {
                for item in &inner.projection {
                    local_columns.push(
                        item.alias
                            .clone()
                            .unwrap_or_else(|| item.expr.display_name()),
                    );
                }
            }
        }
    }

    let mut refs = Vec::new();
    for item in &select.projection {
        item.expr.referenced_columns(&mut refs);
    }
    if let Some(w) = &select.where_clause {
        w.referenced_columns(&mut refs);
    }
    if let Some(h) = &select.having {
        h.referenced_columns(&mut refs);
    }
    for g in &select.group_by {
        g.referenced_columns(&mut refs);
    }
    for k in &select.order_by {
        k.expr.referenced_columns(&mut refs);
    }

    for name in refs {
        match name.split_once('.') {
            Some((qualifier, _)) => {
                if !labels.iter().any(|l| l == qualifier) {
                    return true;
                }
            }
            None => {
                if !local_columns.iter().any(|c| c == &name) {
                    return true;
                }
            }
        }
    }

    // Nested subqueries may close over this scope or the outer one; without
    // chasing them, treat their presence as correlation.
    contains_subquery(select)
}

fn contains_subquery(select: &SelectStatement) -> bool {
    fn expr_has_subquery(expr: &Expr) -> bool {
        match expr {
            Expr::InSubquery { .. }
            | Expr::Exists { .. }
            | Expr::Quantified { .. }
            | Expr::ScalarSubquery(_) => true,
            Expr::Not(e) | Expr::Neg(e) => expr_has_subquery(e),
            Expr::Binary { left, right, .. } => {
                expr_has_subquery(left) || expr_has_subquery(right)
            }
            Expr::IsNull { expr, .. } => expr_has_subquery(expr),
            Expr::InList { expr, list, .. } => {
                expr_has_subquery(expr) || list.iter().any(expr_has_subquery)
            }
            Expr::Between { expr, low, high, .. } => {
                expr_has_subquery(expr) || expr_has_subquery(low) || expr_has_subquery(high)
            }
            Expr::Like { expr, pattern, .. } | Expr::Regexp { expr, pattern, .. } => {
                expr_has_subquery(expr) || expr_has_subquery(pattern)
            }
            Expr::Case {
                operand,
                branches,
                else_result,
            } => {
                operand.as_deref().is_some_and(expr_has_subquery)
                    || branches
                        .iter()
                        .any(|(w, t)| expr_has_subquery(w) || expr_has_subquery(t))
                    || else_result.as_deref().is_some_and(expr_has_subquery)
            }
            _ => false,
        }
    }

    select
        .where_clause
        .as_ref()
        .is_some_and(expr_has_subquery)
        || select.having.as_ref().is_some_and(expr_has_subquery)
        || select
            .projection
            .iter()
            .any(|item| expr_has_subquery(&item.expr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn like_translation() {
        assert_eq!(like_to_regex("a%"), "(?is)^a.*$");
        assert_eq!(like_to_regex("_b"), "(?is)^.b$");
        // Regex metacharacters in the pattern are literals.
        assert_eq!(like_to_regex("a.c"), r"(?is)^a\.c$");
    }

    #[test]
    fn compare_with_null_is_null() {
        assert_eq!(
            compare(BinaryOp::Eq, &Value::Null, &Value::Integer(1)),
            Value::Null
        );
        assert_eq!(
            compare(BinaryOp::Lt, &Value::Integer(1), &Value::Integer(2)),
            Value::Boolean(true)
        );
    }

    #[test]
    fn in_list_three_valued() {
        let hay = [Value::Integer(1), Value::Null];
        // Match wins over the null.
        assert_eq!(in_result(&Value::Integer(1), &hay, false), Value::Boolean(true));
        // No match, but a null makes it unknown.
        assert_eq!(in_result(&Value::Integer(2), &hay, false), Value::Null);
        // Without nulls a miss is a plain false.
        assert_eq!(
            in_result(&Value::Integer(2), &[Value::Integer(1)], false),
            Value::Boolean(false)
        );
        assert_eq!(
            in_result(&Value::Integer(2), &[Value::Integer(1)], true),
            Value::Boolean(true)
        );
    }

    #[test]
    fn quantified_short_circuits() {
        let vals = [Value::Integer(5), Value::Integer(10)];
        assert_eq!(
            quantified_result(&Value::Integer(7), BinaryOp::Gt, Quantifier::Any, &vals),
            Value::Boolean(true)
        );
        assert_eq!(
            quantified_result(&Value::Integer(7), BinaryOp::Gt, Quantifier::All, &vals),
            Value::Boolean(false)
        );
        assert_eq!(
            quantified_result(&Value::Integer(1), BinaryOp::Gt, Quantifier::Any, &[]),
            Value::Boolean(false)
        );
        assert_eq!(
            quantified_result(&Value::Integer(1), BinaryOp::Gt, Quantifier::All, &[]),
            Value::Boolean(true)
        );
    }

    #[test]
    fn integer_division_widens_only_when_needed() {
        let v = arithmetic(BinaryOp::Div, &Value::Integer(6), &Value::Integer(3)).unwrap();
        assert_eq!(v, Value::Integer(2));
        let v = arithmetic(BinaryOp::Div, &Value::Integer(7), &Value::Integer(2)).unwrap();
        assert_eq!(v, Value::Float(3.5));
        let v = arithmetic(BinaryOp::Div, &Value::Integer(7), &Value::Integer(0)).unwrap();
        assert_eq!(v, Value::Null);
    }

    #[test]
    fn tuple_keys_distinguish_types() {
        assert_ne!(
            tuple_key(&[Value::Integer(1)]),
            tuple_key(&[Value::Text("1".into())])
        );
        assert_eq!(
            tuple_key(&[Value::Integer(1), Value::Null]),
            tuple_key(&[Value::Integer(1), Value::Null])
        );
    }
}
