//! The parsed statement tree.
//!
//! One tagged [`Statement`] per SQL statement, with expression and predicate
//! grammar merged into a single [`Expr`] type (predicates are expressions
//! that evaluate to a boolean under three-valued logic).

use rill_core::schema::{ColumnDescriptor, ForeignKeyRef, IndexDescriptor};
use rill_core::value::Value;

/// A parsed SQL statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select(Box<SelectStatement>),
    Insert(InsertStatement),
    Update(UpdateStatement),
    Delete(DeleteStatement),
    CreateTable(CreateTableStatement),
    DropTable {
        name: String,
        if_exists: bool,
    },
    AlterTable {
        table: String,
        op: AlterOp,
    },
    CreateIndex(CreateIndexStatement),
    DropIndex {
        table: String,
        name: String,
    },
    CreateDatabase {
        name: String,
        if_not_exists: bool,
    },
    DropDatabase {
        name: String,
        if_exists: bool,
    },
    Use {
        database: String,
    },
    Begin,
    Commit,
    Rollback {
        savepoint: Option<String>,
    },
    Savepoint {
        name: String,
    },
    ReleaseSavepoint {
        name: String,
    },
    Truncate {
        table: String,
    },
    ShowTables,
    ShowDatabases,
    Describe {
        table: String,
    },
    Explain(Box<SelectStatement>),
    /// `SET TRANSACTION ISOLATION LEVEL ...` -- parsed, acknowledged, ignored.
    SetTransactionIsolation {
        level: String,
    },
}

// ---------------------------------------------------------------------------
// SELECT
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectStatement {
    pub distinct: bool,
    pub projection: Vec<SelectItem>,
    pub from: Option<FromClause>,
    pub joins: Vec<Join>,
    pub where_clause: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
    pub order_by: Vec<OrderKey>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    /// UNION / INTERSECT / EXCEPT tail, applied left-to-right.
    pub set_ops: Vec<SetOp>,
}

/// One projection item: an expression with an optional alias. `*` appears as
/// [`Expr::Wildcard`].
#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    pub expr: Expr,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FromClause {
    Table {
        name: String,
        alias: Option<String>,
    },
    /// A parenthesized sub-select; the alias is mandatory.
    Subquery {
        select: Box<SelectStatement>,
        alias: String,
    },
}

impl FromClause {
    /// The name the source is addressable by: the alias when present, the
    /// table name otherwise.
    pub fn label(&self) -> &str {
        match self {
            FromClause::Table { name, alias } => alias.as_deref().unwrap_or(name),
            FromClause::Subquery { alias, .. } => alias,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JoinConstraint {
    On(Expr),
    Using(Vec<String>),
    /// CROSS JOIN carries no constraint.
    None,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub source: FromClause,
    pub constraint: JoinConstraint,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderKey {
    pub expr: Expr,
    pub descending: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOpKind {
    Union,
    UnionAll,
    Intersect,
    Except,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetOp {
    pub kind: SetOpKind,
    pub select: Box<SelectStatement>,
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    And,
    Or,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinaryOp {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::NotEq
                | BinaryOp::Lt
                | BinaryOp::Gt
                | BinaryOp::LtEq
                | BinaryOp::GtEq
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::LtEq => "<=",
            BinaryOp::GtEq => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantifier {
    Any,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    GroupConcat,
}

impl AggregateFunc {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name.to_ascii_uppercase().as_str() {
            "COUNT" => AggregateFunc::Count,
            "SUM" => AggregateFunc::Sum,
            "AVG" => AggregateFunc::Avg,
            "MIN" => AggregateFunc::Min,
            "MAX" => AggregateFunc::Max,
            "GROUP_CONCAT" => AggregateFunc::GroupConcat,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateFunc::Count => "COUNT",
            AggregateFunc::Sum => "SUM",
            AggregateFunc::Avg => "AVG",
            AggregateFunc::Min => "MIN",
            AggregateFunc::Max => "MAX",
            AggregateFunc::GroupConcat => "GROUP_CONCAT",
        }
    }
}

/// An aggregate call. `arg == None` means `COUNT(*)`.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateCall {
    pub func: AggregateFunc,
    pub arg: Option<Box<Expr>>,
    pub distinct: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WindowFunc {
    RowNumber,
    Rank,
    DenseRank,
    Ntile,
    Lead,
    Lag,
    FirstValue,
    LastValue,
    /// A windowed aggregate, computed over the whole partition.
    Agg(AggregateFunc),
}

impl WindowFunc {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name.to_ascii_uppercase().as_str() {
            "ROW_NUMBER" => WindowFunc::RowNumber,
            "RANK" => WindowFunc::Rank,
            "DENSE_RANK" => WindowFunc::DenseRank,
            "NTILE" => WindowFunc::Ntile,
            "LEAD" => WindowFunc::Lead,
            "LAG" => WindowFunc::Lag,
            "FIRST_VALUE" => WindowFunc::FirstValue,
            "LAST_VALUE" => WindowFunc::LastValue,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WindowFunc::RowNumber => "ROW_NUMBER",
            WindowFunc::Rank => "RANK",
            WindowFunc::DenseRank => "DENSE_RANK",
            WindowFunc::Ntile => "NTILE",
            WindowFunc::Lead => "LEAD",
            WindowFunc::Lag => "LAG",
            WindowFunc::FirstValue => "FIRST_VALUE",
            WindowFunc::LastValue => "LAST_VALUE",
            WindowFunc::Agg(a) => a.as_str(),
        }
    }
}

/// A window function call with its OVER clause.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowCall {
    pub func: WindowFunc,
    pub args: Vec<Expr>,
    pub partition_by: Vec<Expr>,
    pub order_by: Vec<OrderKey>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// A column reference, possibly qualified (`t.c`).
    Column(String),
    /// `*` in a projection or inside `COUNT(*)`.
    Wildcard,
    /// The `DEFAULT` keyword in an INSERT value list.
    Default,
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    InSubquery {
        expr: Box<Expr>,
        subquery: Box<SelectStatement>,
        negated: bool,
    },
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
    },
    Like {
        expr: Box<Expr>,
        pattern: Box<Expr>,
        negated: bool,
    },
    Regexp {
        expr: Box<Expr>,
        pattern: Box<Expr>,
        negated: bool,
    },
    Exists {
        subquery: Box<SelectStatement>,
        negated: bool,
    },
    /// `expr op ANY/ALL/SOME (subquery)`.
    Quantified {
        expr: Box<Expr>,
        op: BinaryOp,
        quantifier: Quantifier,
        subquery: Box<SelectStatement>,
    },
    ScalarSubquery(Box<SelectStatement>),
    Aggregate(AggregateCall),
    Window(Box<WindowCall>),
    Case {
        /// Simple CASE operand; `None` for the searched form.
        operand: Option<Box<Expr>>,
        branches: Vec<(Expr, Expr)>,
        else_result: Option<Box<Expr>>,
    },
}

impl Expr {
    pub fn column(name: impl Into<String>) -> Expr {
        Expr::Column(name.into())
    }

    pub fn literal(value: Value) -> Expr {
        Expr::Literal(value)
    }

    pub fn binary(left: Expr, op: BinaryOp, right: Expr) -> Expr {
        Expr::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    /// Whether any aggregate call appears in this expression outside of a
    /// window. Used to decide implicit whole-result grouping.
    pub fn contains_aggregate(&self) -> bool {
        match self {
            Expr::Aggregate(_) => true,
            Expr::Not(e) | Expr::Neg(e) => e.contains_aggregate(),
            Expr::Binary { left, right, .. } => {
                left.contains_aggregate() || right.contains_aggregate()
            }
            Expr::IsNull { expr, .. } | Expr::Like { expr, .. } | Expr::Regexp { expr, .. } => {
                expr.contains_aggregate()
            }
            Expr::Between { expr, low, high, .. } => {
                expr.contains_aggregate() || low.contains_aggregate() || high.contains_aggregate()
            }
            Expr::InList { expr, list, .. } => {
                expr.contains_aggregate() || list.iter().any(Expr::contains_aggregate)
            }
            Expr::Case {
                operand,
                branches,
                else_result,
            } => {
                operand.as_deref().is_some_and(Expr::contains_aggregate)
                    || branches
                        .iter()
                        .any(|(w, t)| w.contains_aggregate() || t.contains_aggregate())
                    || else_result.as_deref().is_some_and(Expr::contains_aggregate)
            }
            _ => false,
        }
    }

    /// Whether a window call appears in this expression.
    pub fn contains_window(&self) -> bool {
        match self {
            Expr::Window(_) => true,
            Expr::Not(e) | Expr::Neg(e) => e.contains_window(),
            Expr::Binary { left, right, .. } => left.contains_window() || right.contains_window(),
            Expr::Case {
                operand,
                branches,
                else_result,
            } => {
                operand.as_deref().is_some_and(Expr::contains_window)
                    || branches
                        .iter()
                        .any(|(w, t)| w.contains_window() || t.contains_window())
                    || else_result.as_deref().is_some_and(Expr::contains_window)
            }
            _ => false,
        }
    }

    /// Column names referenced directly by this expression, qualified names
    /// included. Does not descend into subqueries (those have their own
    /// scopes; free-variable analysis is the evaluator's concern).
    pub fn referenced_columns(&self, out: &mut Vec<String>) {
        match self {
            Expr::Column(name) => out.push(name.clone()),
            Expr::Not(e) | Expr::Neg(e) => e.referenced_columns(out),
            Expr::Binary { left, right, .. } => {
                left.referenced_columns(out);
                right.referenced_columns(out);
            }
            Expr::IsNull { expr, .. } => expr.referenced_columns(out),
            Expr::InList { expr, list, .. } => {
                expr.referenced_columns(out);
                for item in list {
                    item.referenced_columns(out);
                }
            }
            Expr::InSubquery { expr, .. } | Expr::Quantified { expr, .. } => {
                expr.referenced_columns(out)
            }
            Expr::Between {
                expr, low, high, ..
            } => {
                expr.referenced_columns(out);
                low.referenced_columns(out);
                high.referenced_columns(out);
            }
            Expr::Like { expr, pattern, .. } | Expr::Regexp { expr, pattern, .. } => {
                expr.referenced_columns(out);
                pattern.referenced_columns(out);
            }
            Expr::Aggregate(call) => {
                if let Some(arg) = &call.arg {
                    arg.referenced_columns(out);
                }
            }
            Expr::Window(call) => {
                for arg in &call.args {
                    arg.referenced_columns(out);
                }
                for p in &call.partition_by {
                    p.referenced_columns(out);
                }
                for k in &call.order_by {
                    k.expr.referenced_columns(out);
                }
            }
            Expr::Case {
                operand,
                branches,
                else_result,
            } => {
                if let Some(op) = operand {
                    op.referenced_columns(out);
                }
                for (when, then) in branches {
                    when.referenced_columns(out);
                    then.referenced_columns(out);
                }
                if let Some(e) = else_result {
                    e.referenced_columns(out);
                }
            }
            Expr::Literal(_)
            | Expr::Wildcard
            | Expr::Default
            | Expr::Exists { .. }
            | Expr::ScalarSubquery(_) => {}
        }
    }

    /// A display name for an unaliased projection of this expression.
    pub fn display_name(&self) -> String {
        match self {
            Expr::Column(name) => name.clone(),
            Expr::Literal(v) => v.to_string(),
            Expr::Wildcard => "*".to_string(),
            Expr::Default => "DEFAULT".to_string(),
            Expr::Aggregate(call) => {
                let arg = match &call.arg {
                    None => "*".to_string(),
                    Some(a) => a.display_name(),
                };
                if call.distinct {
                    format!("{}(DISTINCT {arg})", call.func.as_str())
                } else {
                    format!("{}({arg})", call.func.as_str())
                }
            }
            Expr::Window(call) => format!("{}()", call.func.as_str()),
            Expr::Binary { left, op, right } => {
                format!("{} {} {}", left.display_name(), op.as_str(), right.display_name())
            }
            Expr::Not(e) => format!("NOT {}", e.display_name()),
            Expr::Neg(e) => format!("-{}", e.display_name()),
            Expr::Case { .. } => "CASE".to_string(),
            Expr::ScalarSubquery(_) => "(subquery)".to_string(),
            _ => "expr".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// DML
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct InsertStatement {
    pub table: String,
    /// Target columns; empty means all columns in schema order.
    pub columns: Vec<String>,
    /// One expression tuple per row.
    pub values: Vec<Vec<Expr>>,
    /// INSERT IGNORE: skip rows that fail validation instead of failing.
    pub ignore: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStatement {
    pub table: String,
    pub assignments: Vec<(String, Expr)>,
    pub where_clause: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStatement {
    pub table: String,
    pub where_clause: Option<Expr>,
}

// ---------------------------------------------------------------------------
// DDL
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct CreateTableStatement {
    pub name: String,
    pub if_not_exists: bool,
    pub columns: Vec<ColumnDescriptor>,
    /// Table-level UNIQUE/INDEX/KEY declarations.
    pub indexes: Vec<IndexDescriptor>,
    pub engine: Option<String>,
    pub charset: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateIndexStatement {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlterOp {
    AddColumn(ColumnDescriptor),
    DropColumn(String),
    ModifyColumn(ColumnDescriptor),
    RenameColumn { from: String, to: String },
    AddIndex(IndexDescriptor),
    DropIndex(String),
    AddPrimaryKey(Vec<String>),
    DropPrimaryKey,
    AddForeignKey { column: String, reference: ForeignKeyRef },
    DropForeignKey { column: String },
    RenameTable(String),
}
