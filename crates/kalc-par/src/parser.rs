//! Operator-precedence (Pratt-style) expression parser over [`kalc_lex`]'s
//! token stream, extensible at runtime by the `binary`/`unary` operators a
//! `def` installs.
//!
//! The parser keeps a single token of lookahead, `cur_tok`, mirroring the
//! source's `CurTok`/`getNextToken` pair: every production below leaves
//! `cur_tok` pointing just past what it consumed.

use kalc_lex::{Lexer, Token};
use kalc_util::{OperatorKind, PrecedenceTable, Prototype};
use thiserror::Error;

use crate::ast::{Expr, Function, TopLevelItem, ANON_EXPR_NAME};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct ParseError(pub String);

fn err<T>(message: impl Into<String>) -> Result<T, ParseError> {
    Err(ParseError(message.into()))
}

pub struct Parser {
    lexer: Lexer,
    cur_tok: Token,
}

impl Parser {
    pub fn new(lexer: Lexer) -> Self {
        let mut parser = Parser {
            lexer,
            cur_tok: Token::Eof,
        };
        parser.advance();
        parser
    }

    pub fn lexer_mut(&mut self) -> &mut Lexer {
        &mut self.lexer
    }

    pub fn cur_tok(&self) -> &Token {
        &self.cur_tok
    }

    pub fn is_eof(&self) -> bool {
        self.cur_tok.is_eof()
    }

    pub fn is_semicolon(&self) -> bool {
        self.cur_tok.is_char(';')
    }

    /// Consume exactly one token. Used both internally and by the driver's
    /// error-recovery skip.
    pub fn skip_token(&mut self) {
        self.advance();
    }

    fn advance(&mut self) -> Token {
        self.cur_tok = self.lexer.next_token();
        self.cur_tok.clone()
    }

    fn expect_char(&mut self, c: char, message: &str) -> Result<(), ParseError> {
        if self.cur_tok.is_char(c) {
            self.advance();
            Ok(())
        } else {
            err(message.to_string())
        }
    }

    /// `top := ';' | definition | external | toplevel_expr`. The caller is
    /// expected to have already special-cased `';'` and end-of-input.
    pub fn parse_item(&mut self, precedence: &PrecedenceTable) -> Result<TopLevelItem, ParseError> {
        match self.cur_tok {
            Token::Def => self.parse_definition(precedence).map(TopLevelItem::Definition),
            Token::Extern => self.parse_extern().map(TopLevelItem::Extern),
            _ => self
                .parse_top_level_expr(precedence)
                .map(TopLevelItem::Expression),
        }
    }

    /// `definition := 'def' prototype expression`
    fn parse_definition(&mut self, precedence: &PrecedenceTable) -> Result<Function, ParseError> {
        self.advance(); // eat 'def'
        let proto = self.parse_prototype()?;
        let body = self.parse_expression(precedence)?;
        Ok(Function { proto, body })
    }

    /// `external := 'extern' prototype`
    fn parse_extern(&mut self) -> Result<Prototype, ParseError> {
        self.advance(); // eat 'extern'
        self.parse_prototype()
    }

    /// `toplevel_expr := expression`, wrapped in the synthetic 0-ary
    /// `__anon_expr` prototype.
    fn parse_top_level_expr(&mut self, precedence: &PrecedenceTable) -> Result<Function, ParseError> {
        let body = self.parse_expression(precedence)?;
        let proto = Prototype::new(ANON_EXPR_NAME.to_string(), Vec::new(), OperatorKind::None, None);
        Ok(Function { proto, body })
    }

    /// ```text
    /// prototype := id '(' id* ')'
    ///            | 'unary'  op          '(' id ')'
    ///            | 'binary' op [number] '(' id id ')'
    /// ```
    fn parse_prototype(&mut self) -> Result<Prototype, ParseError> {
        let (name, kind, precedence) = match self.cur_tok.clone() {
            Token::Identifier(name) => {
                self.advance();
                (name, OperatorKind::None, None)
            }
            Token::Unary => {
                self.advance();
                let Token::Char(op) = self.cur_tok else {
                    return err("Expected unary operator");
                };
                self.advance();
                (format!("unary{op}"), OperatorKind::Unary, None)
            }
            Token::Binary => {
                self.advance();
                let Token::Char(op) = self.cur_tok else {
                    return err("Expected binary operator");
                };
                self.advance();

                let mut prec: u8 = 30;
                if let Token::Number(n) = self.cur_tok {
                    if !(1.0..=100.0).contains(&n) || n.fract() != 0.0 {
                        return err("Invalid Precedence: must be [1..100]");
                    }
                    prec = n as u8;
                    self.advance();
                }
                (format!("binary{op}"), OperatorKind::Binary, Some(prec))
            }
            _ => return err("Expected function name in prototype"),
        };

        self.expect_char('(', "Expected '(' in prototype")?;

        let mut params = Vec::new();
        while let Token::Identifier(param) = self.cur_tok.clone() {
            params.push(param);
            self.advance();
        }
        self.expect_char(')', "Expected ')' in prototype")?;

        match kind {
            OperatorKind::Unary if params.len() != 1 => {
                return err("Invalid number of operands for unary operator");
            }
            OperatorKind::Binary if params.len() != 2 => {
                return err("Invalid number of operands for binary operator");
            }
            _ => {}
        }

        Ok(Prototype::new(name, params, kind, precedence))
    }

    /// `expression := unary (binop unary)*`, precedence-climbed.
    fn parse_expression(&mut self, precedence: &PrecedenceTable) -> Result<Expr, ParseError> {
        let lhs = self.parse_unary(precedence)?;
        self.parse_bin_op_rhs(0, lhs, precedence)
    }

    fn tok_precedence(&self, precedence: &PrecedenceTable) -> i32 {
        match self.cur_tok {
            Token::Char(c) => precedence.precedence_of(c),
            _ => -1,
        }
    }

    fn parse_bin_op_rhs(
        &mut self,
        min_prec: i32,
        mut lhs: Expr,
        precedence: &PrecedenceTable,
    ) -> Result<Expr, ParseError> {
        loop {
            let tok_prec = self.tok_precedence(precedence);
            if tok_prec < min_prec {
                return Ok(lhs);
            }

            let Token::Char(op) = self.cur_tok else {
                unreachable!("tok_precedence only returns >= 0 for Token::Char");
            };
            self.advance(); // eat the operator

            let mut rhs = self.parse_unary(precedence)?;

            let next_prec = self.tok_precedence(precedence);
            if tok_prec < next_prec {
                rhs = self.parse_bin_op_rhs(tok_prec + 1, rhs, precedence)?;
            }

            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    /// `unary := primary | operator-char unary`. Unary operators bind
    /// tighter than any binary operator and have no precedence slot.
    fn parse_unary(&mut self, precedence: &PrecedenceTable) -> Result<Expr, ParseError> {
        let op = match self.cur_tok {
            Token::Char(c) if c != '(' && c != ',' => c,
            _ => return self.parse_primary(precedence),
        };
        self.advance();
        let operand = self.parse_unary(precedence)?;
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    fn parse_primary(&mut self, precedence: &PrecedenceTable) -> Result<Expr, ParseError> {
        match self.cur_tok.clone() {
            Token::Number(n) => {
                self.advance();
                Ok(Expr::Number(n))
            }
            Token::Identifier(name) => self.parse_identifier_expr(name, precedence),
            Token::If => self.parse_if_expr(precedence),
            Token::For => self.parse_for_expr(precedence),
            Token::Var => self.parse_var_expr(precedence),
            Token::Char('(') => self.parse_paren_expr(precedence),
            _ => err("Unknown token when expecting an expression"),
        }
    }

    fn parse_paren_expr(&mut self, precedence: &PrecedenceTable) -> Result<Expr, ParseError> {
        self.advance(); // eat '('
        let e = self.parse_expression(precedence)?;
        self.expect_char(')', "Expected ')'")?;
        Ok(e)
    }

    /// `identifier ('(' expr (',' expr)* ')')?`
    fn parse_identifier_expr(
        &mut self,
        name: String,
        precedence: &PrecedenceTable,
    ) -> Result<Expr, ParseError> {
        self.advance(); // eat identifier
        if !self.cur_tok.is_char('(') {
            return Ok(Expr::Variable(name));
        }
        self.advance(); // eat '('

        let mut args = Vec::new();
        if !self.cur_tok.is_char(')') {
            loop {
                args.push(self.parse_expression(precedence)?);
                if self.cur_tok.is_char(')') {
                    break;
                }
                self.expect_char(',', "Expected ')' or ',' in argument list")?;
            }
        }
        self.advance(); // eat ')'
        Ok(Expr::Call(name, args))
    }

    /// `'if' expression 'then' expression 'else' expression`
    fn parse_if_expr(&mut self, precedence: &PrecedenceTable) -> Result<Expr, ParseError> {
        self.advance(); // eat 'if'
        let cond = self.parse_expression(precedence)?;
        if self.cur_tok != Token::Then {
            return err("Expected 'then' keyword in an if statement");
        }
        self.advance(); // eat 'then'
        let then_branch = self.parse_expression(precedence)?;
        if self.cur_tok != Token::Else {
            return err("Expected 'else' keyword in an if statement");
        }
        self.advance(); // eat 'else'
        let else_branch = self.parse_expression(precedence)?;
        Ok(Expr::If {
            cond: Box::new(cond),
            then_branch: Box::new(then_branch),
            else_branch: Box::new(else_branch),
        })
    }

    /// `'for' id '=' expr ',' expr (',' expr)? 'in' expr`
    fn parse_for_expr(&mut self, precedence: &PrecedenceTable) -> Result<Expr, ParseError> {
        self.advance(); // eat 'for'
        let Token::Identifier(var) = self.cur_tok.clone() else {
            return err("Expected identifier after 'for'");
        };
        self.advance();
        self.expect_char('=', "Expected '=' initializing loop variable")?;

        let start = self.parse_expression(precedence)?;
        self.expect_char(',', "Expected ',' after initializing loop variable")?;
        let end = self.parse_expression(precedence)?;

        let step = if self.cur_tok.is_char(',') {
            self.advance();
            Some(Box::new(self.parse_expression(precedence)?))
        } else {
            None
        };

        if self.cur_tok != Token::In {
            return err("Expected 'in' after for");
        }
        self.advance(); // eat 'in'
        let body = self.parse_expression(precedence)?;

        Ok(Expr::For {
            var,
            start: Box::new(start),
            end: Box::new(end),
            step,
            body: Box::new(body),
        })
    }

    /// `'var' id ('=' expr)? (',' id ('=' expr)?)* 'in' expr`
    fn parse_var_expr(&mut self, precedence: &PrecedenceTable) -> Result<Expr, ParseError> {
        self.advance(); // eat 'var'
        let mut bindings = Vec::new();
        loop {
            let Token::Identifier(name) = self.cur_tok.clone() else {
                return err("Expected identifier after 'var'");
            };
            self.advance();

            let init = if self.cur_tok.is_char('=') {
                self.advance();
                Some(self.parse_expression(precedence)?)
            } else {
                None
            };
            bindings.push((name, init));

            if self.cur_tok.is_char(',') {
                self.advance();
            } else {
                break;
            }
        }

        if self.cur_tok != Token::In {
            return err("Expected 'in' keyword after 'var'");
        }
        self.advance(); // eat 'in'
        let body = self.parse_expression(precedence)?;

        Ok(Expr::Var {
            bindings,
            body: Box::new(body),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser_for(src: &str) -> Parser {
        let mut lexer = Lexer::new();
        lexer.set_str(src);
        Parser::new(lexer)
    }

    #[test]
    fn parses_arithmetic_with_precedence() {
        let precedence = PrecedenceTable::new();
        let mut parser = parser_for("4 + 5 * 3;");
        let item = parser.parse_item(&precedence).unwrap();
        let TopLevelItem::Expression(func) = item else {
            panic!("expected expression item");
        };
        assert_eq!(
            func.body,
            Expr::Binary(
                '+',
                Box::new(Expr::Number(4.0)),
                Box::new(Expr::Binary(
                    '*',
                    Box::new(Expr::Number(5.0)),
                    Box::new(Expr::Number(3.0)),
                )),
            )
        );
    }

    #[test]
    fn assignment_binds_looser_than_less_than() {
        let precedence = PrecedenceTable::new();
        let mut parser = parser_for("a = b < 1;");
        let item = parser.parse_item(&precedence).unwrap();
        let TopLevelItem::Expression(func) = item else {
            panic!("expected expression item");
        };
        assert_eq!(
            func.body,
            Expr::Binary(
                '=',
                Box::new(Expr::Variable("a".into())),
                Box::new(Expr::Binary(
                    '<',
                    Box::new(Expr::Variable("b".into())),
                    Box::new(Expr::Number(1.0)),
                )),
            )
        );
    }

    #[test]
    fn rejects_out_of_range_precedence() {
        let precedence = PrecedenceTable::new();
        let mut parser = parser_for("def binary : 101 (x y) y;");
        let result = parser.parse_item(&precedence);
        assert!(result.is_err());
    }

    #[test]
    fn parses_if_for_and_var() {
        let precedence = PrecedenceTable::new();
        let mut parser = parser_for("if 1 then 2 else 3;");
        assert!(matches!(
            parser.parse_item(&precedence).unwrap(),
            TopLevelItem::Expression(_)
        ));

        let mut parser = parser_for("for i = 0, i < 10, 1 in i;");
        assert!(matches!(
            parser.parse_item(&precedence).unwrap(),
            TopLevelItem::Expression(_)
        ));

        let mut parser = parser_for("var a = 1, b in a;");
        assert!(matches!(
            parser.parse_item(&precedence).unwrap(),
            TopLevelItem::Expression(_)
        ));
    }
}
