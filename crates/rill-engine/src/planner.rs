//! Heuristic cost-based planning for SELECT.
//!
//! The planner never executes anything; it classifies WHERE fragments,
//! scores candidate indexes, picks scan types and join methods, and prices
//! the result with a fixed cost model. `EXPLAIN` renders its output.

use rill_core::result::QueryResult;
use rill_core::value::Value;
use rill_index::IndexManager;
use rill_sql::ast::{BinaryOp, Expr, FromClause, JoinConstraint, SelectStatement};
use rill_storage::Store;

use crate::error::Result;

// Cost model constants.
const SEQ_PAGE_COST: f64 = 1.0;
const RANDOM_PAGE_COST: f64 = 4.0;
const CPU_TUPLE_COST: f64 = 0.01;
const CPU_INDEX_TUPLE_COST: f64 = 0.005;
const HASH_QUAL_COST: f64 = 0.02;
#[allow(dead_code)]
const MERGE_QUAL_COST: f64 = 0.01;
const ROWS_PER_PAGE: f64 = 100.0;

/// Inner row count below which a hash join fits working memory.
const HASH_JOIN_ROW_THRESHOLD: f64 = 10_000.0;
/// Row count above which a full scan draws a warning.
const LARGE_TABLE_ROWS: usize = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanType {
    UniqueScan,
    IndexLookup,
    IndexRangeScan,
    IndexScan,
    FullTableScan,
}

impl ScanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanType::UniqueScan => "UNIQUE_SCAN",
            ScanType::IndexLookup => "INDEX_LOOKUP",
            ScanType::IndexRangeScan => "INDEX_RANGE_SCAN",
            ScanType::IndexScan => "INDEX_SCAN",
            ScanType::FullTableScan => "FULL_TABLE_SCAN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinMethod {
    IndexNestedLoop,
    HashJoin,
    NestedLoop,
    /// Reserved for inputs already sorted on the join key; never chosen by
    /// the current planner.
    MergeJoin,
}

impl JoinMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            JoinMethod::IndexNestedLoop => "INDEX_NESTED_LOOP",
            JoinMethod::HashJoin => "HASH_JOIN",
            JoinMethod::NestedLoop => "NESTED_LOOP",
            JoinMethod::MergeJoin => "MERGE_JOIN",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TableAccessPlan {
    pub table: String,
    pub label: String,
    pub scan_type: ScanType,
    pub index: Option<String>,
    pub estimated_rows: f64,
    pub cost: f64,
}

#[derive(Debug, Clone)]
pub struct JoinPlan {
    pub table: String,
    pub method: JoinMethod,
    pub key: Option<String>,
    pub cost: f64,
}

#[derive(Debug, Clone)]
pub struct SortPlan {
    pub using_index: bool,
    pub cost: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationStrategy {
    Hash,
    Index,
}

#[derive(Debug, Clone)]
pub struct AggregationPlan {
    pub strategy: AggregationStrategy,
    pub group_columns: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Plan {
    pub table_access: Vec<TableAccessPlan>,
    pub joins: Vec<JoinPlan>,
    pub sort: Option<SortPlan>,
    pub aggregation: Option<AggregationPlan>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub estimated_rows: f64,
    pub estimated_cost: f64,
    pub warnings: Vec<String>,
    pub hints: Vec<String>,
}

// ---------------------------------------------------------------------------
// Condition classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CondOp {
    Eq,
    NotEq,
    Range,
    In(usize),
    LikeAnchored,
    LikeFloating,
    IsNull,
    IsNotNull,
}

impl CondOp {
    /// Whether the condition can drive an index.
    fn indexable(&self) -> bool {
        !matches!(self, CondOp::NotEq | CondOp::LikeAnchored | CondOp::LikeFloating)
    }

    fn selectivity(&self) -> f64 {
        match self {
            CondOp::Eq => 0.1,
            CondOp::NotEq => 0.9,
            CondOp::Range => 0.3,
            CondOp::In(n) => (0.05 * *n as f64).min(0.5),
            CondOp::LikeAnchored => 0.1,
            CondOp::LikeFloating => 0.5,
            CondOp::IsNull => 0.05,
            CondOp::IsNotNull => 0.95,
        }
    }
}

#[derive(Debug, Clone)]
struct Condition {
    qualifier: Option<String>,
    column: String,
    op: CondOp,
}

/// Walks the AND-conjunction spine of a WHERE clause collecting conditions
/// of the shape `column <op> constant`. OR branches and anything fancier are
/// left to the executor.
fn classify_conditions(expr: &Expr, out: &mut Vec<Condition>) {
    match expr {
        Expr::Binary {
            left,
            op: BinaryOp::And,
            right,
        } => {
            classify_conditions(left, out);
            classify_conditions(right, out);
        }
        Expr::Binary { left, op, right } if op.is_comparison() => {
            let column = match (&**left, &**right) {
                (Expr::Column(c), Expr::Literal(_)) => c,
                (Expr::Literal(_), Expr::Column(c)) => c,
                _ => return,
            };
            let cond_op = match op {
                BinaryOp::Eq => CondOp::Eq,
                BinaryOp::NotEq => CondOp::NotEq,
                _ => CondOp::Range,
            };
            out.push(make_condition(column, cond_op));
        }
        Expr::InList { expr, list, negated } if !negated => {
            if let Expr::Column(c) = &**expr {
                if list.iter().all(|e| matches!(e, Expr::Literal(_))) {
                    out.push(make_condition(c, CondOp::In(list.len())));
                }
            }
        }
        Expr::Between { expr, low, high, negated } if !negated => {
            if let (Expr::Column(c), Expr::Literal(_), Expr::Literal(_)) =
                (&**expr, &**low, &**high)
            {
                out.push(make_condition(c, CondOp::Range));
            }
        }
        Expr::IsNull { expr, negated } => {
            if let Expr::Column(c) = &**expr {
                let op = if *negated {
                    CondOp::IsNotNull
                } else {
                    CondOp::IsNull
                };
                out.push(make_condition(c, op));
            }
        }
        Expr::Like { expr, pattern, negated } if !negated => {
            if let (Expr::Column(c), Expr::Literal(Value::Text(p))) = (&**expr, &**pattern) {
                let op = if p.starts_with('%') {
                    CondOp::LikeFloating
                } else {
                    CondOp::LikeAnchored
                };
                out.push(make_condition(c, op));
            }
        }
        _ => {}
    }
}

fn make_condition(reference: &str, op: CondOp) -> Condition {
    match reference.split_once('.') {
        Some((qualifier, column)) => Condition {
            qualifier: Some(qualifier.to_string()),
            column: column.to_string(),
            op,
        },
        None => Condition {
            qualifier: None,
            column: reference.to_string(),
            op,
        },
    }
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

pub(crate) fn plan_select(
    select: &SelectStatement,
    store: &Store,
    indexes: &IndexManager,
) -> Result<Plan> {
    let mut conditions = Vec::new();
    if let Some(where_clause) = &select.where_clause {
        classify_conditions(where_clause, &mut conditions);
    }

    let order_columns: Vec<(String, bool)> = select
        .order_by
        .iter()
        .filter_map(|k| match &k.expr {
            Expr::Column(c) => Some((bare(c), k.descending)),
            _ => None,
        })
        .collect();
    let group_columns: Vec<String> = select
        .group_by
        .iter()
        .filter_map(|e| match e {
            Expr::Column(c) => Some(bare(c)),
            _ => None,
        })
        .collect();

    let mut plan = Plan {
        table_access: Vec::new(),
        joins: Vec::new(),
        sort: None,
        aggregation: None,
        limit: select.limit,
        offset: select.offset,
        estimated_rows: 0.0,
        estimated_cost: 0.0,
        warnings: Vec::new(),
        hints: Vec::new(),
    };

    // Leading table.
    let mut outer_rows = 1.0;
    if let Some(FromClause::Table { name, alias }) = &select.from {
        let label = alias.clone().unwrap_or_else(|| name.clone());
        let access = plan_table_access(
            name,
            &label,
            &conditions,
            &order_columns,
            &group_columns,
            store,
            indexes,
            &mut plan,
        );
        outer_rows = access.estimated_rows;
        plan.estimated_cost += access.cost;
        plan.table_access.push(access);
    }

    // Joins, left to right.
    for join in &select.joins {
        let FromClause::Table { name, alias } = &join.source else {
            continue;
        };
        let label = alias.clone().unwrap_or_else(|| name.clone());
        let mut access = plan_table_access(
            name,
            &label,
            &conditions,
            &[],
            &[],
            store,
            indexes,
            &mut plan,
        );
        let inner_rows = row_count(store, name);

        let join_key = equality_join_key(join, &label, store, name);
        let (method, key, join_cost) = match &join_key {
            Some(column) if indexes.find_best(name, std::slice::from_ref(column)).is_some() => {
                let index = indexes
                    .find_best(name, std::slice::from_ref(column))
                    .expect("checked above");
                access.scan_type = ScanType::IndexLookup;
                access.index = Some(index);
                access.estimated_rows = (inner_rows * 0.1).max(1.0);
                (
                    JoinMethod::IndexNestedLoop,
                    Some(column.clone()),
                    outer_rows * (RANDOM_PAGE_COST + CPU_INDEX_TUPLE_COST),
                )
            }
            Some(column) if inner_rows <= HASH_JOIN_ROW_THRESHOLD => (
                JoinMethod::HashJoin,
                Some(column.clone()),
                (inner_rows + outer_rows) * HASH_QUAL_COST,
            ),
            _ => (
                JoinMethod::NestedLoop,
                join_key.clone(),
                outer_rows * inner_rows * CPU_TUPLE_COST,
            ),
        };

        outer_rows = (outer_rows * access.estimated_rows).max(1.0);
        plan.estimated_cost += access.cost + join_cost;
        plan.joins.push(JoinPlan {
            table: label,
            method,
            key,
            cost: join_cost,
        });
        plan.table_access.push(access);
    }

    plan.estimated_rows = outer_rows;

    // Sort strategy.
    if !select.order_by.is_empty() {
        let using_index = plan
            .table_access
            .first()
            .and_then(|a| a.index.as_ref().map(|i| (a, i)))
            .and_then(|(a, index_name)| indexes.get(&a.table, index_name))
            .map(|index| {
                !order_columns.is_empty()
                    && order_columns.iter().all(|(_, desc)| !desc)
                    && order_columns.len() <= index.columns.len()
                    && order_columns
                        .iter()
                        .zip(&index.columns)
                        .all(|((col, _), index_col)| col == index_col)
            })
            .unwrap_or(false);
        let cost = if using_index {
            0.0
        } else {
            let n = plan.estimated_rows.max(2.0);
            n * n.log2() * CPU_TUPLE_COST
        };
        plan.estimated_cost += cost;
        plan.sort = Some(SortPlan { using_index, cost });
    }

    // Aggregation strategy.
    if !select.group_by.is_empty() {
        let index_covers = plan
            .table_access
            .first()
            .and_then(|a| a.index.as_ref().map(|i| (a, i)))
            .and_then(|(a, index_name)| indexes.get(&a.table, index_name))
            .map(|index| {
                !group_columns.is_empty()
                    && group_columns.len() <= index.columns.len()
                    && group_columns
                        .iter()
                        .zip(&index.columns)
                        .all(|(col, index_col)| col == index_col)
            })
            .unwrap_or(false);
        plan.aggregation = Some(AggregationPlan {
            strategy: if index_covers {
                AggregationStrategy::Index
            } else {
                AggregationStrategy::Hash
            },
            group_columns,
        });
    }

    // Warnings and hints.
    if select
        .projection
        .iter()
        .any(|item| matches!(item.expr, Expr::Wildcard))
    {
        plan.warnings
            .push("SELECT * fetches every column; name the columns you need".into());
    }
    if select.limit.is_some() && select.order_by.is_empty() {
        plan.warnings
            .push("LIMIT without ORDER BY returns an arbitrary slice".into());
    }
    if plan.joins.len() > 1 {
        let first_join_rows = plan
            .table_access
            .get(1)
            .map(|a| a.estimated_rows)
            .unwrap_or(0.0);
        if plan
            .table_access
            .iter()
            .skip(2)
            .any(|a| a.estimated_rows < first_join_rows)
        {
            plan.hints
                .push("joining the smallest table first would shrink intermediate results".into());
        }
    }

    Ok(plan)
}

fn bare(reference: &str) -> String {
    match reference.split_once('.') {
        Some((_, column)) => column.to_string(),
        None => reference.to_string(),
    }
}

fn row_count(store: &Store, table: &str) -> f64 {
    store.table(table).map(|t| t.len() as f64).unwrap_or(0.0)
}

/// The inner-side column of an equality ON condition, when there is one.
fn equality_join_key(
    join: &rill_sql::ast::Join,
    inner_label: &str,
    store: &Store,
    inner_table: &str,
) -> Option<String> {
    let on = match &join.constraint {
        JoinConstraint::On(expr) => expr,
        JoinConstraint::Using(cols) => return cols.first().cloned(),
        JoinConstraint::None => return None,
    };
    let Expr::Binary {
        left,
        op: BinaryOp::Eq,
        right,
    } = on
    else {
        return None;
    };
    let columns = match (&**left, &**right) {
        (Expr::Column(a), Expr::Column(b)) => [a, b],
        _ => return None,
    };
    for reference in columns {
        match reference.split_once('.') {
            Some((qualifier, column)) if qualifier == inner_label => {
                return Some(column.to_string());
            }
            None => {
                let is_inner_column = store
                    .schema(inner_table)
                    .map(|s| s.has_column(reference))
                    .unwrap_or(false);
                if is_inner_column {
                    return Some(reference.clone());
                }
            }
            _ => {}
        }
    }
    None
}

#[allow(clippy::too_many_arguments)]
fn plan_table_access(
    table: &str,
    label: &str,
    conditions: &[Condition],
    order_columns: &[(String, bool)],
    group_columns: &[String],
    store: &Store,
    indexes: &IndexManager,
    plan: &mut Plan,
) -> TableAccessPlan {
    let rows = row_count(store, table);
    let schema_columns: Vec<String> = store
        .schema(table)
        .map(|s| s.columns.iter().map(|c| c.name.clone()).collect())
        .unwrap_or_default();

    // Conditions that belong to this table instance.
    let mine: Vec<&Condition> = conditions
        .iter()
        .filter(|c| match &c.qualifier {
            Some(q) => q == label || q == table,
            None => schema_columns.contains(&c.column),
        })
        .collect();

    let selectivity: f64 = mine.iter().map(|c| c.op.selectivity()).product();
    let estimated_rows = (rows * selectivity).max(if rows > 0.0 { 1.0 } else { 0.0 });

    // Score each candidate index against the indexable conditions.
    let mut best: Option<(f64, String, ScanType)> = None;
    for (name, index) in indexes.indexes_of(table) {
        let mut score = 0.0;
        let mut matched = 0usize;
        let mut all_eq = true;
        let mut leading_range = false;
        for (i, index_col) in index.columns.iter().enumerate() {
            let Some(cond) = mine
                .iter()
                .find(|c| c.op.indexable() && &c.column == index_col)
            else {
                break;
            };
            score += 10.0 / (i + 1) as f64;
            matched += 1;
            match cond.op {
                CondOp::Eq | CondOp::In(_) => {
                    if i == 0 {
                        score += 5.0;
                    }
                }
                CondOp::Range => {
                    if i == 0 {
                        score += 3.0;
                        leading_range = true;
                    }
                    all_eq = false;
                    // A range stops further prefix matching.
                    break;
                }
                _ => {
                    all_eq = false;
                }
            }
        }
        if matched == 0 {
            continue;
        }
        if index.unique && all_eq && matched == index.columns.len() {
            score += 20.0;
        }
        if index.columns.len() > matched + 1 {
            score -= 2.0;
        }
        if score <= 0.0 {
            continue;
        }
        let scan_type = if index.unique && index.columns.len() == 1 && all_eq {
            ScanType::UniqueScan
        } else if leading_range {
            ScanType::IndexRangeScan
        } else {
            ScanType::IndexLookup
        };
        if best.as_ref().map_or(true, |(s, _, _)| score > *s) {
            best = Some((score, name.clone(), scan_type));
        }
    }

    // Without a condition-driven index, an index covering the sort or group
    // prefix still beats a plain scan.
    if best.is_none() {
        for (name, index) in indexes.indexes_of(table) {
            let covers_order = !order_columns.is_empty()
                && order_columns.iter().all(|(_, desc)| !desc)
                && order_columns.len() <= index.columns.len()
                && order_columns
                    .iter()
                    .zip(&index.columns)
                    .all(|((col, _), index_col)| col == index_col);
            let covers_group = !group_columns.is_empty()
                && group_columns.len() <= index.columns.len()
                && group_columns
                    .iter()
                    .zip(&index.columns)
                    .all(|(col, index_col)| col == index_col);
            if covers_order || covers_group {
                best = Some((0.0, name.clone(), ScanType::IndexScan));
                break;
            }
        }
    }

    let (scan_type, index, cost) = match best {
        Some((_, name, scan_type)) => {
            let tree_descent = RANDOM_PAGE_COST * (1.0 + rows.max(1.0).log10());
            let cost = tree_descent
                + estimated_rows * CPU_INDEX_TUPLE_COST
                + estimated_rows * CPU_TUPLE_COST;
            (scan_type, Some(name), cost)
        }
        None => {
            if rows as usize > LARGE_TABLE_ROWS {
                plan.warnings
                    .push(format!("full table scan on large table {table}"));
            }
            for cond in &mine {
                if cond.op == CondOp::Eq {
                    plan.hints.push(format!(
                        "an index on {table}({}) would avoid this scan",
                        cond.column
                    ));
                }
            }
            let pages = (rows / ROWS_PER_PAGE).ceil();
            let cost = pages * SEQ_PAGE_COST + rows * CPU_TUPLE_COST;
            (ScanType::FullTableScan, None, cost)
        }
    };

    TableAccessPlan {
        table: table.to_string(),
        label: label.to_string(),
        scan_type,
        index,
        estimated_rows,
        cost,
    }
}

// ---------------------------------------------------------------------------
// EXPLAIN rendering
// ---------------------------------------------------------------------------

pub(crate) fn render_plan(plan: &Plan) -> QueryResult {
    let columns = vec![
        "step".to_string(),
        "object".to_string(),
        "detail".to_string(),
        "rows".to_string(),
        "cost".to_string(),
    ];
    let mut rows = Vec::new();
    for access in &plan.table_access {
        let detail = match &access.index {
            Some(index) => format!("{} via {index}", access.scan_type.as_str()),
            None => access.scan_type.as_str().to_string(),
        };
        rows.push(vec![
            Value::Text("access".into()),
            Value::Text(access.label.clone()),
            Value::Text(detail),
            Value::Float(access.estimated_rows),
            Value::Float(access.cost),
        ]);
    }
    for join in &plan.joins {
        let detail = match &join.key {
            Some(key) => format!("{} on {key}", join.method.as_str()),
            None => join.method.as_str().to_string(),
        };
        rows.push(vec![
            Value::Text("join".into()),
            Value::Text(join.table.clone()),
            Value::Text(detail),
            Value::Null,
            Value::Float(join.cost),
        ]);
    }
    if let Some(sort) = &plan.sort {
        rows.push(vec![
            Value::Text("sort".into()),
            Value::Text(String::new()),
            Value::Text(if sort.using_index {
                "using_index".into()
            } else {
                "explicit sort".to_string()
            }),
            Value::Null,
            Value::Float(sort.cost),
        ]);
    }
    if let Some(agg) = &plan.aggregation {
        rows.push(vec![
            Value::Text("aggregate".into()),
            Value::Text(agg.group_columns.join(",")),
            Value::Text(
                match agg.strategy {
                    AggregationStrategy::Hash => "HASH",
                    AggregationStrategy::Index => "INDEX",
                }
                .to_string(),
            ),
            Value::Null,
            Value::Null,
        ]);
    }
    rows.push(vec![
        Value::Text("total".into()),
        Value::Text(String::new()),
        Value::Text(String::new()),
        Value::Float(plan.estimated_rows),
        Value::Float(plan.estimated_cost),
    ]);
    for warning in &plan.warnings {
        rows.push(vec![
            Value::Text("warning".into()),
            Value::Text(String::new()),
            Value::Text(warning.clone()),
            Value::Null,
            Value::Null,
        ]);
    }
    for hint in &plan.hints {
        rows.push(vec![
            Value::Text("hint".into()),
            Value::Text(String::new()),
            Value::Text(hint.clone()),
            Value::Null,
            Value::Null,
        ]);
    }
    QueryResult::with_rows(columns, rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rill_core::schema::{ColumnDescriptor, TableSchema};
    use rill_core::types::DataType;
    use rill_core::value::Row;
    use rill_sql::ast::Statement;
    use rill_sql::parse_statement;

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Store,
        indexes: IndexManager,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let store = Store::open(dir.path(), "main").unwrap();
            Fixture {
                _dir: dir,
                store,
                indexes: IndexManager::new(),
            }
        }

        /// An integer table with `rows` rows; every column holds the row
        /// number so estimates stay easy to reason about.
        fn table(&mut self, name: &str, columns: &[&str], rows: usize) {
            let schema = TableSchema::new(
                name,
                columns
                    .iter()
                    .map(|c| ColumnDescriptor::new(*c, DataType::Int))
                    .collect(),
            );
            self.store.create_table(schema).unwrap();
            for i in 0..rows {
                let row: Row = columns
                    .iter()
                    .map(|c| (c.to_string(), Value::Integer(i as i64)))
                    .collect();
                self.store.insert(name, row).unwrap();
            }
        }

        fn index(&mut self, table: &str, name: &str, columns: &[&str], unique: bool) {
            self.indexes
                .create_default_index(
                    table,
                    name,
                    columns.iter().map(|c| c.to_string()).collect(),
                    unique,
                )
                .unwrap();
        }

        fn plan(&self, sql: &str) -> Plan {
            let Statement::Select(select) = parse_statement(sql).unwrap() else {
                panic!("expected SELECT: {sql}");
            };
            plan_select(&select, &self.store, &self.indexes).unwrap()
        }
    }

    #[test]
    fn unique_single_column_equality_is_unique_scan() {
        let mut fx = Fixture::new();
        fx.table("users", &["id", "age"], 100);
        fx.index("users", "pk_users", &["id"], true);

        let plan = fx.plan("SELECT age FROM users WHERE id = 7");
        let access = &plan.table_access[0];
        assert_eq!(access.scan_type, ScanType::UniqueScan);
        assert_eq!(access.index.as_deref(), Some("pk_users"));
        // Equality selectivity 0.1 over 100 rows.
        assert!((access.estimated_rows - 10.0).abs() < 1e-9);
    }

    #[test]
    fn leading_range_is_index_range_scan() {
        let mut fx = Fixture::new();
        fx.table("t", &["x"], 100);
        fx.index("t", "ix_x", &["x"], false);

        let plan = fx.plan("SELECT x FROM t WHERE x > 5");
        let access = &plan.table_access[0];
        assert_eq!(access.scan_type, ScanType::IndexRangeScan);
        // Range selectivity 0.3.
        assert!((access.estimated_rows - 30.0).abs() < 1e-9);
    }

    #[test]
    fn equality_prefix_on_composite_index_is_index_lookup() {
        let mut fx = Fixture::new();
        fx.table("t", &["a", "b"], 50);
        fx.index("t", "ix_ab", &["a", "b"], false);

        let plan = fx.plan("SELECT a FROM t WHERE a = 1 AND b = 2");
        let access = &plan.table_access[0];
        assert_eq!(access.scan_type, ScanType::IndexLookup);
        assert_eq!(access.index.as_deref(), Some("ix_ab"));
    }

    #[test]
    fn unmatched_conditions_fall_back_to_full_scan_with_hint() {
        let mut fx = Fixture::new();
        fx.table("big", &["x"], 1_200);

        let plan = fx.plan("SELECT x FROM big WHERE x = 1");
        assert_eq!(plan.table_access[0].scan_type, ScanType::FullTableScan);
        assert!(plan
            .warnings
            .iter()
            .any(|w| w.contains("full table scan on large table big")));
        assert!(plan.hints.iter().any(|h| h.contains("big(x)")));
    }

    #[test]
    fn join_method_follows_inner_index_and_size() {
        let mut fx = Fixture::new();
        fx.table("users", &["id"], 50);
        fx.table("orders", &["id", "user_id"], 50);
        fx.index("orders", "idx_user", &["user_id"], false);
        let plan =
            fx.plan("SELECT * FROM users u JOIN orders o ON o.user_id = u.id");
        assert_eq!(plan.joins[0].method, JoinMethod::IndexNestedLoop);
        assert_eq!(plan.table_access[1].scan_type, ScanType::IndexLookup);
        assert_eq!(plan.table_access[1].index.as_deref(), Some("idx_user"));

        // No usable index, but the inner side fits working memory.
        let mut fx = Fixture::new();
        fx.table("users", &["id"], 50);
        fx.table("orders", &["id", "user_id"], 50);
        let plan =
            fx.plan("SELECT * FROM users u JOIN orders o ON o.user_id = u.id");
        assert_eq!(plan.joins[0].method, JoinMethod::HashJoin);

        // A non-equality condition leaves only a nested loop.
        let plan = fx.plan("SELECT * FROM users u JOIN orders o ON o.user_id > u.id");
        assert_eq!(plan.joins[0].method, JoinMethod::NestedLoop);
    }

    #[test]
    fn order_by_covered_by_chosen_index_skips_the_sort() {
        let mut fx = Fixture::new();
        fx.table("t", &["x"], 40);
        fx.index("t", "ix_x", &["x"], false);

        let plan = fx.plan("SELECT x FROM t WHERE x = 1 ORDER BY x");
        let sort = plan.sort.as_ref().unwrap();
        assert!(sort.using_index);
        assert_eq!(sort.cost, 0.0);

        // Direction matters.
        let plan = fx.plan("SELECT x FROM t WHERE x = 1 ORDER BY x DESC");
        let sort = plan.sort.as_ref().unwrap();
        assert!(!sort.using_index);
        assert!(sort.cost > 0.0);
    }

    #[test]
    fn bare_order_by_on_indexed_column_is_an_index_scan() {
        let mut fx = Fixture::new();
        fx.table("t", &["x"], 40);
        fx.index("t", "ix_x", &["x"], false);

        let plan = fx.plan("SELECT x FROM t ORDER BY x");
        assert_eq!(plan.table_access[0].scan_type, ScanType::IndexScan);
        assert!(plan.sort.as_ref().unwrap().using_index);
    }

    #[test]
    fn aggregation_strategy_follows_the_chosen_index() {
        let mut fx = Fixture::new();
        fx.table("t", &["x", "y"], 40);
        fx.index("t", "ix_x", &["x"], false);

        let plan = fx.plan("SELECT x, COUNT(*) FROM t WHERE x = 1 GROUP BY x");
        assert_eq!(
            plan.aggregation.as_ref().unwrap().strategy,
            AggregationStrategy::Index
        );

        let plan = fx.plan("SELECT y, COUNT(*) FROM t WHERE x = 1 GROUP BY y");
        assert_eq!(
            plan.aggregation.as_ref().unwrap().strategy,
            AggregationStrategy::Hash
        );
    }

    #[test]
    fn wildcard_and_unordered_limit_draw_warnings() {
        let mut fx = Fixture::new();
        fx.table("t", &["x"], 5);

        let plan = fx.plan("SELECT * FROM t LIMIT 3");
        assert!(plan.warnings.iter().any(|w| w.contains("SELECT *")));
        assert!(plan
            .warnings
            .iter()
            .any(|w| w.contains("LIMIT without ORDER BY")));
    }

    #[test]
    fn selectivities_combine_independently() {
        let mut fx = Fixture::new();
        fx.table("t", &["a", "b"], 1_000);

        // 0.1 (eq) * 0.3 (range) over 1000 rows.
        let plan = fx.plan("SELECT a FROM t WHERE a = 1 AND b > 2");
        assert!((plan.table_access[0].estimated_rows - 30.0).abs() < 1e-9);

        // IN selectivity is 0.05 per value, capped at 0.5.
        let plan = fx.plan("SELECT a FROM t WHERE a IN (1, 2, 3)");
        assert!((plan.table_access[0].estimated_rows - 150.0).abs() < 1e-9);
    }
}
