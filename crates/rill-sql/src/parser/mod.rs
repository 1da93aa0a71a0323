//! Recursive-descent SQL parser.
//!
//! Statement dispatch and the token cursor live here; SELECT, expression,
//! DML and DDL grammar are in sibling modules. Every error carries the
//! offending token's text and its 1-based position in the original input.

mod ddl;
mod dml;
mod expr;
mod select;

use crate::ast::Statement;
use crate::error::{Result, SqlError};
use crate::lexer::tokenize;
use crate::token::{Token, TokenKind};

/// Parses a single SQL statement. A trailing semicolon is tolerated; any
/// other trailing input is a syntax error.
pub fn parse_statement(sql: &str) -> Result<Statement> {
    let tokens = tokenize(sql)?;
    let mut parser = Parser::new(&tokens);
    let stmt = parser.statement()?;
    parser.eat_op(";");
    if let Some(tok) = parser.peek() {
        return Err(parser.unexpected(tok.clone(), "end of statement"));
    }
    Ok(stmt)
}

pub(crate) struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    pub(crate) fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    // -- Cursor --------------------------------------------------------------

    pub(crate) fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    pub(crate) fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    pub(crate) fn advance(&mut self) -> Option<&Token> {
        let tok = self.tokens.get(self.pos);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    pub(crate) fn peek_kw(&self, kw: &str) -> bool {
        self.peek().is_some_and(|t| t.is_kw(kw))
    }

    pub(crate) fn peek_op(&self, op: &str) -> bool {
        self.peek().is_some_and(|t| t.is_op(op))
    }

    /// Consumes the next token if it is the given keyword.
    pub(crate) fn eat_kw(&mut self, kw: &str) -> bool {
        if self.peek_kw(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    pub(crate) fn eat_op(&mut self, op: &str) -> bool {
        if self.peek_op(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    // -- Errors --------------------------------------------------------------

    /// Builds a syntax error pointing at the current token (or at the end of
    /// the last one when input ran out).
    pub(crate) fn expected(&self, what: &str) -> SqlError {
        match self.peek() {
            Some(tok) => SqlError::Syntax {
                message: format!("expected {what}"),
                token: tok.text.clone(),
                line: tok.line,
                column: tok.column,
            },
            None => {
                let (line, column) = self
                    .tokens
                    .last()
                    .map(|t| (t.line, t.column + t.text.len() as u32))
                    .unwrap_or((1, 1));
                SqlError::Syntax {
                    message: format!("expected {what}"),
                    token: "end of input".into(),
                    line,
                    column,
                }
            }
        }
    }

    pub(crate) fn unexpected(&self, tok: Token, context: &str) -> SqlError {
        SqlError::Syntax {
            message: format!("expected {context}"),
            token: tok.text,
            line: tok.line,
            column: tok.column,
        }
    }

    // -- Required tokens -----------------------------------------------------

    pub(crate) fn expect_kw(&mut self, kw: &str) -> Result<()> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            Err(self.expected(&format!("`{kw}`")))
        }
    }

    pub(crate) fn expect_op(&mut self, op: &str) -> Result<()> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.expected(&format!("`{op}`")))
        }
    }

    /// Consumes an identifier: a backticked name or a non-reserved word.
    pub(crate) fn expect_identifier(&mut self, what: &str) -> Result<String> {
        match self.peek().and_then(|t| t.as_identifier().map(str::to_owned)) {
            Some(name) => {
                self.pos += 1;
                Ok(name)
            }
            None => Err(self.expected(what)),
        }
    }

    /// Consumes any bare word (reserved or not), uppercased. Used where the
    /// grammar wants a keyword-ish word such as an isolation level.
    pub(crate) fn expect_word(&mut self, what: &str) -> Result<String> {
        match self.peek() {
            Some(tok) if tok.kind == TokenKind::Word => {
                let word = tok.text.to_ascii_uppercase();
                self.pos += 1;
                Ok(word)
            }
            _ => Err(self.expected(what)),
        }
    }

    /// Consumes an unsigned integer literal.
    pub(crate) fn expect_integer(&mut self, what: &str) -> Result<u64> {
        match self.peek() {
            Some(tok) if tok.kind == TokenKind::Number => {
                let n = tok
                    .text
                    .parse::<u64>()
                    .map_err(|_| self.expected(what))?;
                self.pos += 1;
                Ok(n)
            }
            _ => Err(self.expected(what)),
        }
    }

    // -- Statement dispatch --------------------------------------------------

    pub(crate) fn statement(&mut self) -> Result<Statement> {
        let Some(tok) = self.peek() else {
            return Err(self.expected("a statement"));
        };
        let head = tok.text.to_ascii_uppercase();
        match head.as_str() {
            "SELECT" => Ok(Statement::Select(Box::new(self.select_statement()?))),
            "INSERT" => self.insert_statement(),
            "UPDATE" => self.update_statement(),
            "DELETE" => self.delete_statement(),
            "CREATE" => self.create_statement(),
            "DROP" => self.drop_statement(),
            "ALTER" => self.alter_statement(),
            "USE" => {
                self.advance();
                let database = self.expect_identifier("a database name")?;
                Ok(Statement::Use { database })
            }
            "BEGIN" => {
                self.advance();
                self.eat_kw("TRANSACTION");
                Ok(Statement::Begin)
            }
            "START" => {
                self.advance();
                self.expect_kw("TRANSACTION")?;
                Ok(Statement::Begin)
            }
            "COMMIT" => {
                self.advance();
                Ok(Statement::Commit)
            }
            "ROLLBACK" => {
                self.advance();
                let savepoint = if self.eat_kw("TO") {
                    self.eat_kw("SAVEPOINT");
                    Some(self.expect_identifier("a savepoint name")?)
                } else {
                    None
                };
                Ok(Statement::Rollback { savepoint })
            }
            "SAVEPOINT" => {
                self.advance();
                let name = self.expect_identifier("a savepoint name")?;
                Ok(Statement::Savepoint { name })
            }
            "RELEASE" => {
                self.advance();
                self.eat_kw("SAVEPOINT");
                let name = self.expect_identifier("a savepoint name")?;
                Ok(Statement::ReleaseSavepoint { name })
            }
            "TRUNCATE" => {
                self.advance();
                self.eat_kw("TABLE");
                let table = self.expect_identifier("a table name")?;
                Ok(Statement::Truncate { table })
            }
            "SHOW" => {
                self.advance();
                if self.eat_kw("TABLES") {
                    Ok(Statement::ShowTables)
                } else if self.eat_kw("DATABASES") {
                    Ok(Statement::ShowDatabases)
                } else {
                    Err(self.expected("`TABLES` or `DATABASES`"))
                }
            }
            "DESCRIBE" | "DESC" => {
                self.advance();
                let table = self.expect_identifier("a table name")?;
                Ok(Statement::Describe { table })
            }
            "EXPLAIN" => {
                self.advance();
                if !self.peek_kw("SELECT") {
                    return Err(self.expected("`SELECT` after `EXPLAIN`"));
                }
                Ok(Statement::Explain(Box::new(self.select_statement()?)))
            }
            "SET" => self.set_statement(),
            _ => Err(self.expected("a statement keyword")),
        }
    }

    /// `SET TRANSACTION ISOLATION LEVEL <words>` -- recognized and ignored.
    fn set_statement(&mut self) -> Result<Statement> {
        self.expect_kw("SET")?;
        self.expect_kw("TRANSACTION")?;
        self.expect_kw("ISOLATION")?;
        self.expect_kw("LEVEL")?;
        let mut words = vec![self.expect_word("an isolation level")?];
        while let Some(tok) = self.peek() {
            if tok.kind == TokenKind::Word && !tok.is_op(";") {
                words.push(tok.text.to_ascii_uppercase());
                self.pos += 1;
            } else {
                break;
            }
        }
        Ok(Statement::SetTransactionIsolation {
            level: words.join(" "),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_control_statements() {
        assert_eq!(parse_statement("BEGIN").unwrap(), Statement::Begin);
        assert_eq!(
            parse_statement("START TRANSACTION;").unwrap(),
            Statement::Begin
        );
        assert_eq!(parse_statement("COMMIT").unwrap(), Statement::Commit);
        assert_eq!(
            parse_statement("ROLLBACK").unwrap(),
            Statement::Rollback { savepoint: None }
        );
        assert_eq!(
            parse_statement("ROLLBACK TO SAVEPOINT sp1").unwrap(),
            Statement::Rollback {
                savepoint: Some("sp1".into())
            }
        );
        assert_eq!(
            parse_statement("RELEASE SAVEPOINT sp1").unwrap(),
            Statement::ReleaseSavepoint { name: "sp1".into() }
        );
    }

    #[test]
    fn truncate_with_optional_table_keyword() {
        assert_eq!(
            parse_statement("TRUNCATE TABLE t").unwrap(),
            Statement::Truncate { table: "t".into() }
        );
        assert_eq!(
            parse_statement("TRUNCATE t").unwrap(),
            Statement::Truncate { table: "t".into() }
        );
    }

    #[test]
    fn show_and_describe() {
        assert_eq!(parse_statement("SHOW TABLES").unwrap(), Statement::ShowTables);
        assert_eq!(
            parse_statement("SHOW DATABASES").unwrap(),
            Statement::ShowDatabases
        );
        assert_eq!(
            parse_statement("DESC users").unwrap(),
            Statement::Describe {
                table: "users".into()
            }
        );
    }

    #[test]
    fn isolation_level_parses_and_is_tagged() {
        let stmt = parse_statement("SET TRANSACTION ISOLATION LEVEL READ COMMITTED").unwrap();
        assert_eq!(
            stmt,
            Statement::SetTransactionIsolation {
                level: "READ COMMITTED".into()
            }
        );
    }

    #[test]
    fn syntax_error_carries_position() {
        let err = parse_statement("SELEKT 1").unwrap_err();
        match err {
            SqlError::Syntax { token, line, column, .. } => {
                assert_eq!(token, "SELEKT");
                assert_eq!((line, column), (1, 1));
            }
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    #[test]
    fn trailing_garbage_is_rejected() {
        assert!(parse_statement("COMMIT COMMIT").is_err());
    }

    #[test]
    fn use_statement() {
        assert_eq!(
            parse_statement("USE analytics").unwrap(),
            Statement::Use {
                database: "analytics".into()
            }
        );
    }
}
