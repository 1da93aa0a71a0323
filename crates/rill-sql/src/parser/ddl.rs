//! DDL grammar: CREATE/DROP/ALTER TABLE, CREATE/DROP INDEX, databases.

use rill_core::schema::{
    ColumnDescriptor, ForeignKeyRef, IndexDescriptor, IndexKind, ReferentialAction,
};
use rill_core::types::DataType;
use rill_core::value::Value;

use crate::ast::{AlterOp, CreateIndexStatement, CreateTableStatement, Statement};
use crate::error::Result;
use crate::parser::Parser;
use crate::token::TokenKind;

impl Parser<'_> {
    pub(crate) fn create_statement(&mut self) -> Result<Statement> {
        self.expect_kw("CREATE")?;
        if self.eat_kw("DATABASE") {
            let if_not_exists = self.if_not_exists()?;
            let name = self.expect_identifier("a database name")?;
            return Ok(Statement::CreateDatabase {
                name,
                if_not_exists,
            });
        }
        if self.eat_kw("UNIQUE") {
            self.expect_kw("INDEX")?;
            return self.create_index(true);
        }
        if self.eat_kw("INDEX") {
            return self.create_index(false);
        }
        self.expect_kw("TABLE")?;
        self.create_table()
    }

    pub(crate) fn drop_statement(&mut self) -> Result<Statement> {
        self.expect_kw("DROP")?;
        if self.eat_kw("DATABASE") {
            let if_exists = self.if_exists()?;
            let name = self.expect_identifier("a database name")?;
            return Ok(Statement::DropDatabase { name, if_exists });
        }
        if self.eat_kw("INDEX") {
            let name = self.expect_identifier("an index name")?;
            self.expect_kw("ON")?;
            let table = self.expect_identifier("a table name")?;
            return Ok(Statement::DropIndex { table, name });
        }
        self.expect_kw("TABLE")?;
        let if_exists = self.if_exists()?;
        let name = self.expect_identifier("a table name")?;
        Ok(Statement::DropTable { name, if_exists })
    }

    fn if_not_exists(&mut self) -> Result<bool> {
        if self.eat_kw("IF") {
            self.expect_kw("NOT")?;
            self.expect_kw("EXISTS")?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn if_exists(&mut self) -> Result<bool> {
        if self.eat_kw("IF") {
            self.expect_kw("EXISTS")?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn create_index(&mut self, unique: bool) -> Result<Statement> {
        let name = self.expect_identifier("an index name")?;
        self.expect_kw("ON")?;
        let table = self.expect_identifier("a table name")?;
        let columns = self.column_name_list()?;
        Ok(Statement::CreateIndex(CreateIndexStatement {
            name,
            table,
            columns,
            unique,
        }))
    }

    fn column_name_list(&mut self) -> Result<Vec<String>> {
        self.expect_op("(")?;
        let mut cols = vec![self.expect_identifier("a column name")?];
        while self.eat_op(",") {
            cols.push(self.expect_identifier("a column name")?);
        }
        self.expect_op(")")?;
        Ok(cols)
    }

    // -- CREATE TABLE --------------------------------------------------------

    fn create_table(&mut self) -> Result<Statement> {
        let if_not_exists = self.if_not_exists()?;
        let name = self.expect_identifier("a table name")?;
        self.expect_op("(")?;

        let mut columns: Vec<ColumnDescriptor> = Vec::new();
        let mut indexes: Vec<IndexDescriptor> = Vec::new();
        let mut pk_columns: Vec<String> = Vec::new();
        let mut fk_constraints: Vec<(String, ForeignKeyRef)> = Vec::new();

        loop {
            if self.eat_kw("CONSTRAINT") {
                // The constraint name is tolerated and discarded.
                self.expect_identifier("a constraint name")?;
            }
            if self.eat_kw("PRIMARY") {
                self.expect_kw("KEY")?;
                pk_columns = self.column_name_list()?;
            } else if self.eat_kw("FOREIGN") {
                self.expect_kw("KEY")?;
                let cols = self.column_name_list()?;
                let Some(col) = cols.into_iter().next() else {
                    return Err(self.expected("a referencing column"));
                };
                let reference = self.references_clause()?;
                fk_constraints.push((col, reference));
            } else if self.eat_kw("UNIQUE") {
                let _ = self.eat_kw("KEY") || self.eat_kw("INDEX");
                let idx_name = self.optional_index_name();
                let cols = self.column_name_list()?;
                indexes.push(IndexDescriptor {
                    name: idx_name.unwrap_or_else(|| format!("uq_{}", cols.join("_"))),
                    columns: cols,
                    unique: true,
                    kind: IndexKind::BTree,
                });
            } else if self.eat_kw("INDEX") || self.eat_kw("KEY") {
                let idx_name = self.optional_index_name();
                let cols = self.column_name_list()?;
                indexes.push(IndexDescriptor {
                    name: idx_name.unwrap_or_else(|| format!("ix_{}", cols.join("_"))),
                    columns: cols,
                    unique: false,
                    kind: IndexKind::BTree,
                });
            } else {
                columns.push(self.column_definition()?);
            }

            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(")")?;

        // Fold table-level constraints into the column descriptors.
        for pk in &pk_columns {
            if let Some(col) = columns.iter_mut().find(|c| &c.name == pk) {
                col.primary_key = true;
                col.nullable = false;
            }
        }
        for (col_name, reference) in fk_constraints {
            if let Some(col) = columns.iter_mut().find(|c| c.name == col_name) {
                col.references = Some(reference);
            }
        }

        let (engine, charset) = self.table_trailers()?;

        Ok(Statement::CreateTable(CreateTableStatement {
            name,
            if_not_exists,
            columns,
            indexes,
            engine,
            charset,
        }))
    }

    fn optional_index_name(&mut self) -> Option<String> {
        if self.peek_op("(") {
            return None;
        }
        let name = self
            .peek()
            .and_then(|t| t.as_identifier().map(str::to_owned))?;
        self.advance();
        Some(name)
    }

    /// `ENGINE [=] word` and `[DEFAULT] CHARSET|CHARACTER SET [=] word`, in
    /// either order.
    fn table_trailers(&mut self) -> Result<(Option<String>, Option<String>)> {
        let mut engine = None;
        let mut charset = None;
        loop {
            if self.eat_kw("ENGINE") {
                self.eat_op("=");
                engine = Some(self.expect_word("an engine name")?);
            } else if self.eat_kw("DEFAULT") || self.peek_kw("CHARSET") || self.peek_kw("CHARACTER")
            {
                if self.eat_kw("CHARSET") {
                    self.eat_op("=");
                    charset = Some(self.expect_word("a charset name")?);
                } else if self.eat_kw("CHARACTER") {
                    self.expect_kw("SET")?;
                    self.eat_op("=");
                    charset = Some(self.expect_word("a charset name")?);
                } else {
                    return Err(self.expected("`CHARSET` or `CHARACTER SET`"));
                }
            } else {
                return Ok((engine, charset));
            }
        }
    }

    // -- Column definitions --------------------------------------------------

    pub(crate) fn column_definition(&mut self) -> Result<ColumnDescriptor> {
        let name = self.expect_identifier("a column name")?;
        let data_type = self.data_type()?;
        let mut col = ColumnDescriptor::new(name, data_type);

        loop {
            if self.eat_kw("NOT") {
                self.expect_kw("NULL")?;
                col.nullable = false;
            } else if self.eat_kw("NULL") {
                col.nullable = true;
            } else if self.eat_kw("DEFAULT") {
                col.default = Some(self.literal_value()?);
            } else if self.eat_kw("PRIMARY") {
                self.expect_kw("KEY")?;
                col.primary_key = true;
                col.nullable = false;
            } else if self.eat_kw("UNIQUE") {
                self.eat_kw("KEY");
                col.unique = true;
            } else if self.eat_kw("AUTO_INCREMENT") {
                col.auto_increment = true;
            } else if self.eat_kw("REFERENCES") {
                // Inline form: defaults to RESTRICT actions.
                col.references = Some(self.references_target()?);
            } else if self.eat_kw("CHECK") {
                col.check = Some(self.raw_parenthesized()?);
            } else if self.eat_kw("COMMENT") {
                col.comment = Some(self.string_literal("a comment string")?);
            } else {
                return Ok(col);
            }
        }
    }

    fn data_type(&mut self) -> Result<DataType> {
        let type_name = self.expect_word("a data type")?;
        let base = DataType::from_name(&type_name)
            .ok_or_else(|| self.expected("a known data type"))?;

        if !self.peek_op("(") {
            return Ok(base);
        }
        self.expect_op("(")?;
        let ty = match base {
            DataType::Decimal(..) => {
                let precision = self.expect_integer("a precision")? as u8;
                let scale = if self.eat_op(",") {
                    self.expect_integer("a scale")? as u8
                } else {
                    0
                };
                DataType::Decimal(precision, scale)
            }
            DataType::Char(_) => DataType::Char(self.expect_integer("a length")? as u32),
            DataType::VarChar(_) => DataType::VarChar(self.expect_integer("a length")? as u32),
            DataType::Enum(_) => DataType::Enum(self.string_list()?),
            DataType::Set(_) => DataType::Set(self.string_list()?),
            // Display widths like INT(11) parse and are discarded.
            other => {
                self.expect_integer("a display width")?;
                other
            }
        };
        self.expect_op(")")?;
        Ok(ty)
    }

    fn string_list(&mut self) -> Result<Vec<String>> {
        let mut out = vec![self.string_literal("a string value")?];
        while self.eat_op(",") {
            out.push(self.string_literal("a string value")?);
        }
        Ok(out)
    }

    fn string_literal(&mut self, what: &str) -> Result<String> {
        match self.peek() {
            Some(tok) if tok.kind == TokenKind::Str => {
                let text = tok.text.clone();
                self.advance();
                Ok(text)
            }
            _ => Err(self.expected(what)),
        }
    }

    /// A literal usable as a column default.
    fn literal_value(&mut self) -> Result<Value> {
        if self.eat_kw("NULL") {
            return Ok(Value::Null);
        }
        if self.eat_kw("TRUE") {
            return Ok(Value::Boolean(true));
        }
        if self.eat_kw("FALSE") {
            return Ok(Value::Boolean(false));
        }
        let negative = self.eat_op("-");
        match self.peek() {
            Some(tok) if tok.kind == TokenKind::Str && !negative => {
                let text = tok.text.clone();
                self.advance();
                Ok(Value::Text(text))
            }
            Some(tok) if tok.kind == TokenKind::Number => {
                let text = tok.text.clone();
                self.advance();
                if let Ok(n) = text.parse::<i64>() {
                    Ok(Value::Integer(if negative { -n } else { n }))
                } else {
                    let f: f64 = text.parse().map_err(|_| self.expected("a literal"))?;
                    Ok(Value::Float(if negative { -f } else { f }))
                }
            }
            _ => Err(self.expected("a literal default value")),
        }
    }

    /// Captures the raw text of a balanced parenthesized group, e.g. a CHECK
    /// expression, without interpreting it.
    fn raw_parenthesized(&mut self) -> Result<String> {
        self.expect_op("(")?;
        let mut depth = 1usize;
        let mut parts: Vec<String> = Vec::new();
        loop {
            let Some(tok) = self.advance() else {
                return Err(self.expected("`)`"));
            };
            if tok.is_op("(") {
                depth += 1;
            } else if tok.is_op(")") {
                depth -= 1;
                if depth == 0 {
                    return Ok(parts.join(" "));
                }
            }
            parts.push(match tok.quote {
                Some(q) => format!("{q}{}{q}", tok.text),
                None => tok.text.clone(),
            });
        }
    }

    /// `REFERENCES t (c) [ON DELETE action] [ON UPDATE action]`.
    fn references_clause(&mut self) -> Result<ForeignKeyRef> {
        self.expect_kw("REFERENCES")?;
        self.references_target()
    }

    fn references_target(&mut self) -> Result<ForeignKeyRef> {
        let table = self.expect_identifier("a referenced table")?;
        self.expect_op("(")?;
        let column = self.expect_identifier("a referenced column")?;
        self.expect_op(")")?;

        let mut on_delete = ReferentialAction::Restrict;
        let mut on_update = ReferentialAction::Restrict;
        while self.eat_kw("ON") {
            if self.eat_kw("DELETE") {
                on_delete = self.referential_action()?;
            } else if self.eat_kw("UPDATE") {
                on_update = self.referential_action()?;
            } else {
                return Err(self.expected("`DELETE` or `UPDATE` after `ON`"));
            }
        }

        Ok(ForeignKeyRef {
            table,
            column,
            on_delete,
            on_update,
        })
    }

    fn referential_action(&mut self) -> Result<ReferentialAction> {
        if self.eat_kw("RESTRICT") {
            Ok(ReferentialAction::Restrict)
        } else if self.eat_kw("CASCADE") {
            Ok(ReferentialAction::Cascade)
        } else if self.eat_kw("NO") {
            self.expect_kw("ACTION")?;
            Ok(ReferentialAction::NoAction)
        } else if self.eat_kw("SET") {
            if self.eat_kw("NULL") {
                Ok(ReferentialAction::SetNull)
            } else if self.eat_kw("DEFAULT") {
                Ok(ReferentialAction::SetDefault)
            } else {
                Err(self.expected("`NULL` or `DEFAULT` after `SET`"))
            }
        } else {
            Err(self.expected("a referential action"))
        }
    }

    // -- ALTER TABLE ---------------------------------------------------------

    pub(crate) fn alter_statement(&mut self) -> Result<Statement> {
        self.expect_kw("ALTER")?;
        self.expect_kw("TABLE")?;
        let table = self.expect_identifier("a table name")?;

        let op = if self.eat_kw("ADD") {
            self.alter_add()?
        } else if self.eat_kw("DROP") {
            self.alter_drop()?
        } else if self.eat_kw("MODIFY") {
            self.eat_kw("COLUMN");
            AlterOp::ModifyColumn(self.column_definition()?)
        } else if self.eat_kw("RENAME") {
            if self.eat_kw("COLUMN") {
                let from = self.expect_identifier("a column name")?;
                self.expect_kw("TO")?;
                let to = self.expect_identifier("a column name")?;
                AlterOp::RenameColumn { from, to }
            } else {
                self.eat_kw("TO");
                AlterOp::RenameTable(self.expect_identifier("a table name")?)
            }
        } else {
            return Err(self.expected("`ADD`, `DROP`, `MODIFY` or `RENAME`"));
        };

        Ok(Statement::AlterTable { table, op })
    }

    fn alter_add(&mut self) -> Result<AlterOp> {
        if self.eat_kw("PRIMARY") {
            self.expect_kw("KEY")?;
            return Ok(AlterOp::AddPrimaryKey(self.column_name_list()?));
        }
        if self.eat_kw("FOREIGN") {
            self.expect_kw("KEY")?;
            let cols = self.column_name_list()?;
            let Some(column) = cols.into_iter().next() else {
                return Err(self.expected("a referencing column"));
            };
            let reference = self.references_clause()?;
            return Ok(AlterOp::AddForeignKey { column, reference });
        }
        if self.eat_kw("UNIQUE") {
            let _ = self.eat_kw("INDEX") || self.eat_kw("KEY");
            let name = self.expect_identifier("an index name")?;
            let columns = self.column_name_list()?;
            return Ok(AlterOp::AddIndex(IndexDescriptor {
                name,
                columns,
                unique: true,
                kind: IndexKind::BTree,
            }));
        }
        if self.eat_kw("INDEX") || self.eat_kw("KEY") {
            let name = self.expect_identifier("an index name")?;
            let columns = self.column_name_list()?;
            return Ok(AlterOp::AddIndex(IndexDescriptor {
                name,
                columns,
                unique: false,
                kind: IndexKind::BTree,
            }));
        }
        self.eat_kw("COLUMN");
        Ok(AlterOp::AddColumn(self.column_definition()?))
    }

    fn alter_drop(&mut self) -> Result<AlterOp> {
        if self.eat_kw("PRIMARY") {
            self.expect_kw("KEY")?;
            return Ok(AlterOp::DropPrimaryKey);
        }
        if self.eat_kw("FOREIGN") {
            self.expect_kw("KEY")?;
            let column = self.expect_identifier("a column name")?;
            return Ok(AlterOp::DropForeignKey { column });
        }
        if self.eat_kw("INDEX") || self.eat_kw("KEY") {
            let name = self.expect_identifier("an index name")?;
            return Ok(AlterOp::DropIndex(name));
        }
        self.eat_kw("COLUMN");
        Ok(AlterOp::DropColumn(self.expect_identifier("a column name")?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_statement;
    use pretty_assertions::assert_eq;

    fn create(sql: &str) -> CreateTableStatement {
        match parse_statement(sql).unwrap() {
            Statement::CreateTable(c) => c,
            other => panic!("expected CREATE TABLE, got {other:?}"),
        }
    }

    #[test]
    fn create_table_with_inline_constraints() {
        let c = create(
            "CREATE TABLE t (\
               id INT PRIMARY KEY AUTO_INCREMENT,\
               name VARCHAR(32) NOT NULL,\
               score DECIMAL(8,2) DEFAULT 0,\
               note TEXT COMMENT 'freeform'\
             )",
        );
        assert_eq!(c.name, "t");
        assert_eq!(c.columns.len(), 4);
        let id = &c.columns[0];
        assert!(id.primary_key && id.auto_increment && !id.nullable);
        assert_eq!(c.columns[1].data_type, DataType::VarChar(32));
        assert!(!c.columns[1].nullable);
        assert_eq!(c.columns[2].default, Some(Value::Integer(0)));
        assert_eq!(c.columns[3].comment.as_deref(), Some("freeform"));
    }

    #[test]
    fn create_table_if_not_exists_and_trailers() {
        let c = create(
            "CREATE TABLE IF NOT EXISTS t (id INT) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
        );
        assert!(c.if_not_exists);
        assert_eq!(c.engine.as_deref(), Some("INNODB"));
        assert_eq!(c.charset.as_deref(), Some("UTF8MB4"));
    }

    #[test]
    fn table_level_primary_key_folds_into_columns() {
        let c = create("CREATE TABLE t (a INT, b INT, PRIMARY KEY (a, b))");
        assert!(c.columns[0].primary_key && c.columns[1].primary_key);
        assert!(!c.columns[0].nullable);
    }

    #[test]
    fn foreign_key_with_actions() {
        let c = create(
            "CREATE TABLE c (\
               id INT PRIMARY KEY,\
               pid INT,\
               FOREIGN KEY (pid) REFERENCES p(id) ON DELETE CASCADE ON UPDATE SET NULL\
             )",
        );
        let fk = c.columns[1].references.as_ref().unwrap();
        assert_eq!(fk.table, "p");
        assert_eq!(fk.on_delete, ReferentialAction::Cascade);
        assert_eq!(fk.on_update, ReferentialAction::SetNull);
    }

    #[test]
    fn inline_references_defaults_to_restrict() {
        let c = create("CREATE TABLE c (pid INT REFERENCES p(id))");
        let fk = c.columns[0].references.as_ref().unwrap();
        assert_eq!(fk.on_delete, ReferentialAction::Restrict);
        assert_eq!(fk.on_update, ReferentialAction::Restrict);
    }

    #[test]
    fn enum_and_set_types() {
        let c = create("CREATE TABLE t (color ENUM('red','green'), tags SET('a','b'))");
        assert_eq!(
            c.columns[0].data_type,
            DataType::Enum(vec!["red".into(), "green".into()])
        );
        assert_eq!(
            c.columns[1].data_type,
            DataType::Set(vec!["a".into(), "b".into()])
        );
    }

    #[test]
    fn table_level_indexes() {
        let c = create("CREATE TABLE t (a INT, b INT, UNIQUE KEY uq_ab (a, b), INDEX (b))");
        assert_eq!(c.indexes.len(), 2);
        assert!(c.indexes[0].unique);
        assert_eq!(c.indexes[0].name, "uq_ab");
        assert_eq!(c.indexes[1].name, "ix_b");
    }

    #[test]
    fn check_text_is_kept_verbatim() {
        let c = create("CREATE TABLE t (age INT CHECK (age >= 0 AND age < 200))");
        assert_eq!(c.columns[0].check.as_deref(), Some("age >= 0 AND age < 200"));
    }

    #[test]
    fn display_width_is_discarded() {
        let c = create("CREATE TABLE t (id INT(11))");
        assert_eq!(c.columns[0].data_type, DataType::Int);
    }

    #[test]
    fn create_unique_index() {
        let stmt = parse_statement("CREATE UNIQUE INDEX uq_email ON users (email)").unwrap();
        let Statement::CreateIndex(ci) = stmt else {
            panic!("expected CREATE INDEX");
        };
        assert!(ci.unique);
        assert_eq!(ci.columns, vec!["email"]);
    }

    #[test]
    fn drop_statements() {
        assert_eq!(
            parse_statement("DROP TABLE IF EXISTS t").unwrap(),
            Statement::DropTable {
                name: "t".into(),
                if_exists: true
            }
        );
        assert_eq!(
            parse_statement("DROP INDEX ix ON t").unwrap(),
            Statement::DropIndex {
                table: "t".into(),
                name: "ix".into()
            }
        );
        assert_eq!(
            parse_statement("DROP DATABASE d").unwrap(),
            Statement::DropDatabase {
                name: "d".into(),
                if_exists: false
            }
        );
    }

    #[test]
    fn alter_table_variants() {
        let cases: Vec<(&str, fn(&AlterOp) -> bool)> = vec![
            ("ALTER TABLE t ADD COLUMN x INT", |op| {
                matches!(op, AlterOp::AddColumn(c) if c.name == "x")
            }),
            ("ALTER TABLE t DROP COLUMN x", |op| {
                matches!(op, AlterOp::DropColumn(c) if c == "x")
            }),
            ("ALTER TABLE t MODIFY COLUMN x BIGINT NOT NULL", |op| {
                matches!(op, AlterOp::ModifyColumn(c) if c.data_type == DataType::BigInt)
            }),
            ("ALTER TABLE t RENAME COLUMN a TO b", |op| {
                matches!(op, AlterOp::RenameColumn { from, to } if from == "a" && to == "b")
            }),
            ("ALTER TABLE t RENAME TO t2", |op| {
                matches!(op, AlterOp::RenameTable(n) if n == "t2")
            }),
            ("ALTER TABLE t ADD INDEX ix (a)", |op| {
                matches!(op, AlterOp::AddIndex(ix) if !ix.unique)
            }),
            ("ALTER TABLE t ADD UNIQUE INDEX uq (a)", |op| {
                matches!(op, AlterOp::AddIndex(ix) if ix.unique)
            }),
            ("ALTER TABLE t DROP INDEX ix", |op| {
                matches!(op, AlterOp::DropIndex(n) if n == "ix")
            }),
            ("ALTER TABLE t ADD PRIMARY KEY (a)", |op| {
                matches!(op, AlterOp::AddPrimaryKey(cols) if cols == &["a"])
            }),
            ("ALTER TABLE t DROP PRIMARY KEY", |op| {
                matches!(op, AlterOp::DropPrimaryKey)
            }),
            (
                "ALTER TABLE t ADD FOREIGN KEY (pid) REFERENCES p(id) ON DELETE SET NULL",
                |op| {
                    matches!(op, AlterOp::AddForeignKey { reference, .. }
                        if reference.on_delete == ReferentialAction::SetNull)
                },
            ),
            ("ALTER TABLE t DROP FOREIGN KEY pid", |op| {
                matches!(op, AlterOp::DropForeignKey { column } if column == "pid")
            }),
        ];
        for (sql, check) in cases {
            match parse_statement(sql).unwrap() {
                Statement::AlterTable { op, .. } => {
                    assert!(check(&op), "unexpected op for {sql}: {op:?}")
                }
                other => panic!("expected ALTER TABLE for {sql}, got {other:?}"),
            }
        }
    }
}
