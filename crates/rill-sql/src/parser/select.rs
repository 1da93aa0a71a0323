//! SELECT grammar: projection, FROM, joins, grouping, ordering, limits and
//! the set-operation tail.

use crate::ast::{
    FromClause, Join, JoinConstraint, JoinKind, SelectItem, SelectStatement, SetOp, SetOpKind,
};
use crate::error::Result;
use crate::parser::Parser;
use crate::token::TokenKind;

impl Parser<'_> {
    /// A full SELECT including any UNION/INTERSECT/EXCEPT tail.
    pub(crate) fn select_statement(&mut self) -> Result<SelectStatement> {
        let mut select = self.select_core()?;
        loop {
            let kind = if self.eat_kw("UNION") {
                if self.eat_kw("ALL") {
                    SetOpKind::UnionAll
                } else {
                    SetOpKind::Union
                }
            } else if self.eat_kw("INTERSECT") {
                SetOpKind::Intersect
            } else if self.eat_kw("EXCEPT") {
                SetOpKind::Except
            } else {
                break;
            };
            let right = self.select_core()?;
            select.set_ops.push(SetOp {
                kind,
                select: Box::new(right),
            });
        }
        Ok(select)
    }

    /// One SELECT without a set-operation tail.
    fn select_core(&mut self) -> Result<SelectStatement> {
        self.expect_kw("SELECT")?;
        let mut select = SelectStatement {
            distinct: self.eat_kw("DISTINCT"),
            ..SelectStatement::default()
        };

        select.projection.push(self.select_item()?);
        while self.eat_op(",") {
            select.projection.push(self.select_item()?);
        }

        if self.eat_kw("FROM") {
            select.from = Some(self.from_source()?);
            select.joins = self.joins()?;
        }

        if self.eat_kw("WHERE") {
            select.where_clause = Some(self.expr()?);
        }

        if self.eat_kw("GROUP") {
            self.expect_kw("BY")?;
            select.group_by.push(self.expr()?);
            while self.eat_op(",") {
                select.group_by.push(self.expr()?);
            }
            if self.eat_kw("HAVING") {
                select.having = Some(self.expr()?);
            }
        }

        if self.eat_kw("ORDER") {
            self.expect_kw("BY")?;
            select.order_by.push(self.order_key()?);
            while self.eat_op(",") {
                select.order_by.push(self.order_key()?);
            }
        }

        if self.eat_kw("LIMIT") {
            let first = self.expect_integer("a LIMIT count")?;
            if self.eat_op(",") {
                // `LIMIT offset, count`
                select.offset = Some(first);
                select.limit = Some(self.expect_integer("a LIMIT count")?);
            } else {
                select.limit = Some(first);
                if self.eat_kw("OFFSET") {
                    select.offset = Some(self.expect_integer("an OFFSET count")?);
                }
            }
        }

        Ok(select)
    }

    fn select_item(&mut self) -> Result<SelectItem> {
        let expr = self.expr()?;
        let alias = self.alias()?;
        Ok(SelectItem { expr, alias })
    }

    /// An optional alias: `AS name`, or a bare identifier/string.
    fn alias(&mut self) -> Result<Option<String>> {
        if self.eat_kw("AS") {
            return Ok(Some(self.alias_name()?));
        }
        match self.peek() {
            Some(tok) if tok.kind == TokenKind::Str => Ok(Some(self.alias_name()?)),
            Some(tok) if tok.as_identifier().is_some() => Ok(Some(self.alias_name()?)),
            _ => Ok(None),
        }
    }

    fn alias_name(&mut self) -> Result<String> {
        match self.peek() {
            Some(tok) if tok.kind == TokenKind::Str => {
                let name = tok.text.clone();
                self.advance();
                Ok(name)
            }
            _ => self.expect_identifier("an alias"),
        }
    }

    /// A table reference or a parenthesized sub-select (alias required).
    fn from_source(&mut self) -> Result<FromClause> {
        if self.eat_op("(") {
            let select = Box::new(self.select_statement()?);
            self.expect_op(")")?;
            self.eat_kw("AS");
            let alias = self.expect_identifier("an alias for the sub-select")?;
            return Ok(FromClause::Subquery { select, alias });
        }
        let name = self.expect_identifier("a table name")?;
        let alias = self.alias()?;
        Ok(FromClause::Table { name, alias })
    }

    fn joins(&mut self) -> Result<Vec<Join>> {
        let mut joins = Vec::new();
        loop {
            let kind = if self.eat_kw("CROSS") {
                self.expect_kw("JOIN")?;
                JoinKind::Cross
            } else if self.eat_kw("INNER") {
                self.expect_kw("JOIN")?;
                JoinKind::Inner
            } else if self.eat_kw("LEFT") {
                self.eat_kw("OUTER");
                self.expect_kw("JOIN")?;
                JoinKind::Left
            } else if self.eat_kw("RIGHT") {
                self.eat_kw("OUTER");
                self.expect_kw("JOIN")?;
                JoinKind::Right
            } else if self.eat_kw("FULL") {
                self.eat_kw("OUTER");
                self.expect_kw("JOIN")?;
                JoinKind::Full
            } else if self.eat_kw("JOIN") {
                JoinKind::Inner
            } else {
                return Ok(joins);
            };

            let source = self.from_source()?;
            let constraint = if kind == JoinKind::Cross {
                JoinConstraint::None
            } else if self.eat_kw("ON") {
                JoinConstraint::On(self.expr()?)
            } else if self.eat_kw("USING") {
                self.expect_op("(")?;
                let mut cols = vec![self.expect_identifier("a column name")?];
                while self.eat_op(",") {
                    cols.push(self.expect_identifier("a column name")?);
                }
                self.expect_op(")")?;
                JoinConstraint::Using(cols)
            } else {
                return Err(self.expected("`ON` or `USING` after join"));
            };

            joins.push(Join {
                kind,
                source,
                constraint,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Expr, Statement};
    use crate::parser::parse_statement;
    use pretty_assertions::assert_eq;

    fn select(sql: &str) -> SelectStatement {
        match parse_statement(sql).unwrap() {
            Statement::Select(s) => *s,
            other => panic!("expected SELECT, got {other:?}"),
        }
    }

    #[test]
    fn minimal_select() {
        let s = select("SELECT 1");
        assert_eq!(s.projection.len(), 1);
        assert!(s.from.is_none());
    }

    #[test]
    fn projection_aliases() {
        let s = select("SELECT id, name AS n, amount total FROM t");
        assert_eq!(s.projection[0].alias, None);
        assert_eq!(s.projection[1].alias.as_deref(), Some("n"));
        assert_eq!(s.projection[2].alias.as_deref(), Some("total"));
    }

    #[test]
    fn from_with_alias_and_joins() {
        let s = select(
            "SELECT u.name, o.id FROM users u \
             INNER JOIN orders o ON o.user_id = u.id \
             LEFT OUTER JOIN payments p ON p.order_id = o.id",
        );
        assert_eq!(s.joins.len(), 2);
        assert_eq!(s.joins[0].kind, JoinKind::Inner);
        assert_eq!(s.joins[1].kind, JoinKind::Left);
        assert_eq!(s.from.as_ref().unwrap().label(), "u");
    }

    #[test]
    fn join_using() {
        let s = select("SELECT * FROM a JOIN b USING (id, kind)");
        match &s.joins[0].constraint {
            JoinConstraint::Using(cols) => assert_eq!(cols, &["id", "kind"]),
            other => panic!("expected USING, got {other:?}"),
        }
    }

    #[test]
    fn cross_join_has_no_constraint() {
        let s = select("SELECT * FROM a CROSS JOIN b");
        assert_eq!(s.joins[0].kind, JoinKind::Cross);
        assert_eq!(s.joins[0].constraint, JoinConstraint::None);
    }

    #[test]
    fn subselect_in_from_requires_alias() {
        let s = select("SELECT t.x FROM (SELECT 1 AS x) AS t");
        assert!(matches!(
            s.from,
            Some(FromClause::Subquery { ref alias, .. }) if alias == "t"
        ));
        assert!(parse_statement("SELECT x FROM (SELECT 1 AS x)").is_err());
    }

    #[test]
    fn group_by_having_order_by() {
        let s = select(
            "SELECT region, COUNT(*) FROM sales \
             GROUP BY region HAVING COUNT(*) > 1 ORDER BY region DESC",
        );
        assert_eq!(s.group_by.len(), 1);
        assert!(s.having.is_some());
        assert!(s.order_by[0].descending);
    }

    #[test]
    fn limit_offset_both_forms() {
        let s = select("SELECT * FROM t LIMIT 10 OFFSET 5");
        assert_eq!((s.limit, s.offset), (Some(10), Some(5)));
        let s = select("SELECT * FROM t LIMIT 5, 10");
        assert_eq!((s.limit, s.offset), (Some(10), Some(5)));
    }

    #[test]
    fn set_operation_tail() {
        let s = select("SELECT a FROM t UNION ALL SELECT a FROM u EXCEPT SELECT a FROM v");
        assert_eq!(s.set_ops.len(), 2);
        assert_eq!(s.set_ops[0].kind, SetOpKind::UnionAll);
        assert_eq!(s.set_ops[1].kind, SetOpKind::Except);
    }

    #[test]
    fn distinct_flag() {
        assert!(select("SELECT DISTINCT a FROM t").distinct);
    }

    #[test]
    fn where_with_subquery() {
        let s = select("SELECT * FROM t WHERE id IN (SELECT t_id FROM u WHERE u.active = 1)");
        assert!(matches!(s.where_clause, Some(Expr::InSubquery { .. })));
    }
}
