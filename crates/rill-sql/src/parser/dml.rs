//! INSERT / UPDATE / DELETE grammar.

use crate::ast::{DeleteStatement, InsertStatement, Statement, UpdateStatement};
use crate::error::Result;
use crate::parser::Parser;

impl Parser<'_> {
    /// `INSERT [IGNORE] INTO t [(cols)] VALUES (tuple) [, (tuple)]*`
    pub(crate) fn insert_statement(&mut self) -> Result<Statement> {
        self.expect_kw("INSERT")?;
        let ignore = self.eat_kw("IGNORE");
        self.expect_kw("INTO")?;
        let table = self.expect_identifier("a table name")?;

        let mut columns = Vec::new();
        if self.eat_op("(") {
            columns.push(self.expect_identifier("a column name")?);
            while self.eat_op(",") {
                columns.push(self.expect_identifier("a column name")?);
            }
            self.expect_op(")")?;
        }

        self.expect_kw("VALUES")?;
        let mut values = vec![self.value_tuple()?];
        while self.eat_op(",") {
            values.push(self.value_tuple()?);
        }

        Ok(Statement::Insert(InsertStatement {
            table,
            columns,
            values,
            ignore,
        }))
    }

    fn value_tuple(&mut self) -> Result<Vec<crate::ast::Expr>> {
        self.expect_op("(")?;
        let mut tuple = vec![self.expr()?];
        while self.eat_op(",") {
            tuple.push(self.expr()?);
        }
        self.expect_op(")")?;
        Ok(tuple)
    }

    /// `UPDATE t SET col = expr [, col = expr]* [WHERE pred]`
    pub(crate) fn update_statement(&mut self) -> Result<Statement> {
        self.expect_kw("UPDATE")?;
        let table = self.expect_identifier("a table name")?;
        self.expect_kw("SET")?;

        let mut assignments = Vec::new();
        loop {
            let column = self.expect_identifier("a column name")?;
            self.expect_op("=")?;
            let value = self.expr()?;
            assignments.push((column, value));
            if !self.eat_op(",") {
                break;
            }
        }

        let where_clause = if self.eat_kw("WHERE") {
            Some(self.expr()?)
        } else {
            None
        };

        Ok(Statement::Update(UpdateStatement {
            table,
            assignments,
            where_clause,
        }))
    }

    /// `DELETE FROM t [WHERE pred]`
    pub(crate) fn delete_statement(&mut self) -> Result<Statement> {
        self.expect_kw("DELETE")?;
        self.expect_kw("FROM")?;
        let table = self.expect_identifier("a table name")?;
        let where_clause = if self.eat_kw("WHERE") {
            Some(self.expr()?)
        } else {
            None
        };
        Ok(Statement::Delete(DeleteStatement {
            table,
            where_clause,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Expr;
    use crate::parser::parse_statement;
    use pretty_assertions::assert_eq;
    use rill_core::value::Value;

    #[test]
    fn insert_multiple_tuples() {
        let stmt = parse_statement("INSERT INTO t (name) VALUES ('a'), ('b'), ('c')").unwrap();
        let Statement::Insert(ins) = stmt else {
            panic!("expected INSERT");
        };
        assert_eq!(ins.table, "t");
        assert_eq!(ins.columns, vec!["name"]);
        assert_eq!(ins.values.len(), 3);
        assert!(!ins.ignore);
        assert_eq!(ins.values[0][0], Expr::Literal(Value::Text("a".into())));
    }

    #[test]
    fn insert_ignore_without_column_list() {
        let stmt = parse_statement("INSERT IGNORE INTO u VALUES (1, NULL)").unwrap();
        let Statement::Insert(ins) = stmt else {
            panic!("expected INSERT");
        };
        assert!(ins.ignore);
        assert!(ins.columns.is_empty());
        assert_eq!(ins.values[0][1], Expr::Literal(Value::Null));
    }

    #[test]
    fn insert_default_keyword() {
        let stmt = parse_statement("INSERT INTO t (a, b) VALUES (1, DEFAULT)").unwrap();
        let Statement::Insert(ins) = stmt else {
            panic!("expected INSERT");
        };
        assert_eq!(ins.values[0][1], Expr::Default);
    }

    #[test]
    fn update_with_where() {
        let stmt = parse_statement("UPDATE t SET a = 1, b = b + 1 WHERE id = 7").unwrap();
        let Statement::Update(upd) = stmt else {
            panic!("expected UPDATE");
        };
        assert_eq!(upd.assignments.len(), 2);
        assert_eq!(upd.assignments[0].0, "a");
        assert!(upd.where_clause.is_some());
    }

    #[test]
    fn delete_without_where_hits_all_rows() {
        let stmt = parse_statement("DELETE FROM t").unwrap();
        let Statement::Delete(del) = stmt else {
            panic!("expected DELETE");
        };
        assert!(del.where_clause.is_none());
    }

    #[test]
    fn insert_requires_values() {
        assert!(parse_statement("INSERT INTO t (a)").is_err());
    }
}
