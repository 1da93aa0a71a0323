//! Expression and predicate grammar.
//!
//! Precedence, highest to lowest: unary minus, `* / %`, `+ -`, comparison
//! (including IS NULL / IN / BETWEEN / LIKE / REGEXP / quantified forms),
//! NOT, AND, OR.

use rill_core::value::Value;

use crate::ast::{
    AggregateCall, AggregateFunc, BinaryOp, Expr, OrderKey, Quantifier, WindowCall, WindowFunc,
};
use crate::error::Result;
use crate::parser::Parser;
use crate::token::TokenKind;

impl Parser<'_> {
    pub(crate) fn expr(&mut self) -> Result<Expr> {
        self.or_expr()
    }

    fn or_expr(&mut self) -> Result<Expr> {
        let mut left = self.and_expr()?;
        while self.eat_kw("OR") {
            let right = self.and_expr()?;
            left = Expr::binary(left, BinaryOp::Or, right);
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr> {
        let mut left = self.not_expr()?;
        while self.eat_kw("AND") {
            let right = self.not_expr()?;
            left = Expr::binary(left, BinaryOp::And, right);
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Expr> {
        if self.eat_kw("NOT") {
            let inner = self.not_expr()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.comparison()
    }

    /// One comparison-level construct over an additive operand.
    fn comparison(&mut self) -> Result<Expr> {
        let left = self.additive()?;

        // IS [NOT] NULL
        if self.eat_kw("IS") {
            let negated = self.eat_kw("NOT");
            self.expect_kw("NULL")?;
            return Ok(Expr::IsNull {
                expr: Box::new(left),
                negated,
            });
        }

        // Postfix NOT: `a NOT IN ...`, `a NOT BETWEEN ...`, `a NOT LIKE ...`
        let negated = self.eat_kw("NOT");

        if self.eat_kw("IN") {
            return self.in_tail(left, negated);
        }
        if self.eat_kw("BETWEEN") {
            let low = self.additive()?;
            self.expect_kw("AND")?;
            let high = self.additive()?;
            return Ok(Expr::Between {
                expr: Box::new(left),
                low: Box::new(low),
                high: Box::new(high),
                negated,
            });
        }
        if self.eat_kw("LIKE") {
            let pattern = self.additive()?;
            return Ok(Expr::Like {
                expr: Box::new(left),
                pattern: Box::new(pattern),
                negated,
            });
        }
        if self.eat_kw("REGEXP") || self.eat_kw("RLIKE") {
            let pattern = self.additive()?;
            return Ok(Expr::Regexp {
                expr: Box::new(left),
                pattern: Box::new(pattern),
                negated,
            });
        }
        if negated {
            return Err(self.expected("`IN`, `BETWEEN`, `LIKE` or `REGEXP` after `NOT`"));
        }

        if let Some(op) = self.comparison_op() {
            // expr op ANY/ALL/SOME (subquery)
            for (kw, quantifier) in [
                ("ANY", Quantifier::Any),
                ("SOME", Quantifier::Any),
                ("ALL", Quantifier::All),
            ] {
                if self.eat_kw(kw) {
                    self.expect_op("(")?;
                    let subquery = Box::new(self.select_statement()?);
                    self.expect_op(")")?;
                    return Ok(Expr::Quantified {
                        expr: Box::new(left),
                        op,
                        quantifier,
                        subquery,
                    });
                }
            }
            let right = self.additive()?;
            return Ok(Expr::binary(left, op, right));
        }

        Ok(left)
    }

    fn in_tail(&mut self, left: Expr, negated: bool) -> Result<Expr> {
        self.expect_op("(")?;
        if self.peek_kw("SELECT") {
            let subquery = Box::new(self.select_statement()?);
            self.expect_op(")")?;
            return Ok(Expr::InSubquery {
                expr: Box::new(left),
                subquery,
                negated,
            });
        }
        let mut list = vec![self.expr()?];
        while self.eat_op(",") {
            list.push(self.expr()?);
        }
        self.expect_op(")")?;
        Ok(Expr::InList {
            expr: Box::new(left),
            list,
            negated,
        })
    }

    fn comparison_op(&mut self) -> Option<BinaryOp> {
        let op = match self.peek()?.text.as_str() {
            "=" | "==" => BinaryOp::Eq,
            "!=" | "<>" => BinaryOp::NotEq,
            "<" => BinaryOp::Lt,
            ">" => BinaryOp::Gt,
            "<=" => BinaryOp::LtEq,
            ">=" => BinaryOp::GtEq,
            _ => return None,
        };
        if self.peek()?.kind != TokenKind::Op {
            return None;
        }
        self.advance();
        Some(op)
    }

    fn additive(&mut self) -> Result<Expr> {
        let mut left = self.multiplicative()?;
        loop {
            let op = if self.eat_op("+") {
                BinaryOp::Add
            } else if self.eat_op("-") {
                BinaryOp::Sub
            } else {
                return Ok(left);
            };
            let right = self.multiplicative()?;
            left = Expr::binary(left, op, right);
        }
    }

    fn multiplicative(&mut self) -> Result<Expr> {
        let mut left = self.unary()?;
        loop {
            let op = if self.eat_op("*") {
                BinaryOp::Mul
            } else if self.eat_op("/") {
                BinaryOp::Div
            } else if self.eat_op("%") {
                BinaryOp::Mod
            } else {
                return Ok(left);
            };
            let right = self.unary()?;
            left = Expr::binary(left, op, right);
        }
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.eat_op("-") {
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        if self.eat_op("+") {
            return self.unary();
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr> {
        let Some(tok) = self.peek() else {
            return Err(self.expected("an expression"));
        };

        match tok.kind {
            TokenKind::Number => {
                let text = tok.text.clone();
                self.advance();
                let value = if let Ok(n) = text.parse::<i64>() {
                    Value::Integer(n)
                } else {
                    text.parse::<f64>()
                        .map(Value::Float)
                        .map_err(|_| self.expected("a numeric literal"))?
                };
                Ok(Expr::Literal(value))
            }
            TokenKind::Str => {
                let text = tok.text.clone();
                self.advance();
                Ok(Expr::Literal(Value::Text(text)))
            }
            TokenKind::Op if tok.is_op("(") => {
                self.advance();
                if self.peek_kw("SELECT") {
                    let subquery = Box::new(self.select_statement()?);
                    self.expect_op(")")?;
                    return Ok(Expr::ScalarSubquery(subquery));
                }
                let inner = self.expr()?;
                self.expect_op(")")?;
                Ok(inner)
            }
            TokenKind::Op if tok.is_op("*") => {
                self.advance();
                Ok(Expr::Wildcard)
            }
            TokenKind::Word | TokenKind::Ident => self.word_expr(),
            _ => {
                let tok = tok.clone();
                Err(self.unexpected(tok, "an expression"))
            }
        }
    }

    /// A word-led expression: literal keyword, CASE, EXISTS, function call or
    /// column reference.
    fn word_expr(&mut self) -> Result<Expr> {
        if self.eat_kw("NULL") {
            return Ok(Expr::Literal(Value::Null));
        }
        if self.eat_kw("TRUE") {
            return Ok(Expr::Literal(Value::Boolean(true)));
        }
        if self.eat_kw("FALSE") {
            return Ok(Expr::Literal(Value::Boolean(false)));
        }
        if self.eat_kw("DEFAULT") {
            return Ok(Expr::Default);
        }
        if self.eat_kw("CASE") {
            return self.case_expr();
        }
        if self.eat_kw("EXISTS") {
            self.expect_op("(")?;
            let subquery = Box::new(self.select_statement()?);
            self.expect_op(")")?;
            return Ok(Expr::Exists {
                subquery,
                negated: false,
            });
        }

        // Function call?
        let is_call = self.peek_at(1).is_some_and(|t| t.is_op("("));
        if is_call {
            let name = self.peek().expect("peeked").text.clone();
            if let Some(func) = AggregateFunc::from_name(&name) {
                self.advance();
                return self.aggregate_call(func);
            }
            if let Some(func) = WindowFunc::from_name(&name) {
                self.advance();
                return self.window_call(func);
            }
            let tok = self.peek().expect("peeked").clone();
            return Err(self.unexpected(tok, "a known function name"));
        }

        self.column_ref()
    }

    /// `name` or `qualifier.name`, each part a word or backticked identifier.
    fn column_ref(&mut self) -> Result<Expr> {
        let first = self.expect_identifier("a column reference")?;
        if self.eat_op(".") {
            let second = self.expect_identifier("a column name after `.`")?;
            Ok(Expr::Column(format!("{first}.{second}")))
        } else {
            Ok(Expr::Column(first))
        }
    }

    fn case_expr(&mut self) -> Result<Expr> {
        let operand = if self.peek_kw("WHEN") {
            None
        } else {
            Some(Box::new(self.expr()?))
        };
        let mut branches = Vec::new();
        while self.eat_kw("WHEN") {
            let when = self.expr()?;
            self.expect_kw("THEN")?;
            let then = self.expr()?;
            branches.push((when, then));
        }
        if branches.is_empty() {
            return Err(self.expected("at least one `WHEN` branch"));
        }
        let else_result = if self.eat_kw("ELSE") {
            Some(Box::new(self.expr()?))
        } else {
            None
        };
        self.expect_kw("END")?;
        Ok(Expr::Case {
            operand,
            branches,
            else_result,
        })
    }

    /// Parses `(...)` after an aggregate name; an OVER clause turns the call
    /// into a windowed aggregate.
    fn aggregate_call(&mut self, func: AggregateFunc) -> Result<Expr> {
        self.expect_op("(")?;
        let distinct = self.eat_kw("DISTINCT");
        let arg = if self.eat_op("*") {
            None
        } else {
            Some(Box::new(self.expr()?))
        };
        self.expect_op(")")?;

        if self.peek_kw("OVER") {
            if distinct {
                return Err(self.expected("no DISTINCT inside a windowed aggregate"));
            }
            let (partition_by, order_by) = self.over_clause()?;
            return Ok(Expr::Window(Box::new(WindowCall {
                func: WindowFunc::Agg(func),
                args: arg.map(|a| vec![*a]).unwrap_or_default(),
                partition_by,
                order_by,
            })));
        }

        Ok(Expr::Aggregate(AggregateCall {
            func,
            arg,
            distinct,
        }))
    }

    fn window_call(&mut self, func: WindowFunc) -> Result<Expr> {
        self.expect_op("(")?;
        let mut args = Vec::new();
        if !self.peek_op(")") {
            args.push(self.expr()?);
            while self.eat_op(",") {
                args.push(self.expr()?);
            }
        }
        self.expect_op(")")?;
        let (partition_by, order_by) = self.over_clause()?;
        Ok(Expr::Window(Box::new(WindowCall {
            func,
            args,
            partition_by,
            order_by,
        })))
    }

    /// `OVER ( [PARTITION BY exprs] [ORDER BY keys] )`. Framing clauses are
    /// not part of the dialect.
    fn over_clause(&mut self) -> Result<(Vec<Expr>, Vec<OrderKey>)> {
        self.expect_kw("OVER")?;
        self.expect_op("(")?;
        let mut partition_by = Vec::new();
        if self.eat_kw("PARTITION") {
            self.expect_kw("BY")?;
            partition_by.push(self.expr()?);
            while self.eat_op(",") {
                partition_by.push(self.expr()?);
            }
        }
        let mut order_by = Vec::new();
        if self.eat_kw("ORDER") {
            self.expect_kw("BY")?;
            order_by.push(self.order_key()?);
            while self.eat_op(",") {
                order_by.push(self.order_key()?);
            }
        }
        self.expect_op(")")?;
        Ok((partition_by, order_by))
    }

    /// `expr [ASC | DESC]`.
    pub(crate) fn order_key(&mut self) -> Result<OrderKey> {
        let expr = self.expr()?;
        let descending = if self.eat_kw("DESC") {
            true
        } else {
            self.eat_kw("ASC");
            false
        };
        Ok(OrderKey { expr, descending })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn expr(sql: &str) -> Expr {
        let tokens = tokenize(sql).unwrap();
        let mut p = Parser::new(&tokens);
        let e = p.expr().unwrap();
        assert!(p.peek().is_none(), "unconsumed input in {sql:?}");
        e
    }

    #[test]
    fn precedence_not_cmp_and_or() {
        // a = 1 OR b = 2 AND NOT c = 3  =>  (a=1) OR ((b=2) AND (NOT (c=3)))
        let e = expr("a = 1 OR b = 2 AND NOT c = 3");
        let Expr::Binary { op: BinaryOp::Or, right, .. } = e else {
            panic!("top must be OR");
        };
        let Expr::Binary { op: BinaryOp::And, right, .. } = *right else {
            panic!("right of OR must be AND");
        };
        assert!(matches!(*right, Expr::Not(_)));
    }

    #[test]
    fn arithmetic_precedence() {
        // 1 + 2 * 3  =>  1 + (2 * 3)
        let e = expr("1 + 2 * 3");
        let Expr::Binary { op: BinaryOp::Add, right, .. } = e else {
            panic!("top must be +");
        };
        assert!(matches!(*right, Expr::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn postfix_not_forms() {
        assert!(matches!(
            expr("x NOT IN (1, 2)"),
            Expr::InList { negated: true, .. }
        ));
        assert!(matches!(
            expr("x NOT BETWEEN 1 AND 5"),
            Expr::Between { negated: true, .. }
        ));
        assert!(matches!(
            expr("name NOT LIKE 'a%'"),
            Expr::Like { negated: true, .. }
        ));
        assert!(matches!(
            expr("name NOT REGEXP '^a'"),
            Expr::Regexp { negated: true, .. }
        ));
    }

    #[test]
    fn is_null_forms() {
        assert!(matches!(
            expr("x IS NULL"),
            Expr::IsNull { negated: false, .. }
        ));
        assert!(matches!(
            expr("x IS NOT NULL"),
            Expr::IsNull { negated: true, .. }
        ));
    }

    #[test]
    fn qualified_column_refs() {
        assert_eq!(expr("u.id"), Expr::Column("u.id".into()));
        assert_eq!(expr("`order`.`from`"), Expr::Column("order.from".into()));
    }

    #[test]
    fn aggregate_calls() {
        let e = expr("COUNT(*)");
        assert!(matches!(
            e,
            Expr::Aggregate(AggregateCall {
                func: AggregateFunc::Count,
                arg: None,
                distinct: false,
            })
        ));
        let e = expr("SUM(DISTINCT amount)");
        assert!(matches!(
            e,
            Expr::Aggregate(AggregateCall {
                func: AggregateFunc::Sum,
                distinct: true,
                ..
            })
        ));
    }

    #[test]
    fn window_call_with_over() {
        let e = expr("ROW_NUMBER() OVER (PARTITION BY region ORDER BY amount DESC)");
        let Expr::Window(call) = e else {
            panic!("expected window call");
        };
        assert_eq!(call.func, WindowFunc::RowNumber);
        assert_eq!(call.partition_by.len(), 1);
        assert!(call.order_by[0].descending);
    }

    #[test]
    fn windowed_aggregate() {
        let e = expr("SUM(amount) OVER (PARTITION BY region)");
        let Expr::Window(call) = e else {
            panic!("expected window call");
        };
        assert_eq!(call.func, WindowFunc::Agg(AggregateFunc::Sum));
        assert_eq!(call.args.len(), 1);
    }

    #[test]
    fn case_searched_and_simple() {
        let e = expr("CASE WHEN x > 1 THEN 'big' ELSE 'small' END");
        assert!(matches!(e, Expr::Case { operand: None, .. }));
        let e = expr("CASE x WHEN 1 THEN 'one' END");
        assert!(matches!(e, Expr::Case { operand: Some(_), .. }));
    }

    #[test]
    fn quantified_comparison() {
        let e = expr("x > ANY (SELECT y FROM t)");
        assert!(matches!(
            e,
            Expr::Quantified {
                quantifier: Quantifier::Any,
                op: BinaryOp::Gt,
                ..
            }
        ));
    }

    #[test]
    fn double_equals_is_equality() {
        assert!(matches!(
            expr("a == 1"),
            Expr::Binary { op: BinaryOp::Eq, .. }
        ));
    }
}
