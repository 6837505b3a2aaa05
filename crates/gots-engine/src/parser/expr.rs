//! Expression parsing: assignment → ternary → logical-or → logical-and →
//! equality → comparison → additive → multiplicative → exponentiation
//! (right-associative) → unary → postfix (call / member / index),
//! exactly the precedence ladder of spec.md §4.2.

use super::ast::{BinOp, Expr, Param, UnOp};
use super::token::TokenKind;
use super::Parser;
use crate::error::ParseError;

impl Parser {
    pub(super) fn parse_expression(&mut self) -> Result<Expr, ParseError> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Result<Expr, ParseError> {
        let target = self.parse_ternary()?;
        if self.match_token(&TokenKind::Assign) {
            let start = target.span().start;
            let value = self.parse_assignment()?;
            let span = self.span_from(start);
            return Ok(Expr::Assign {
                target: Box::new(target),
                value: Box::new(value),
                span,
                inferred_ty: None,
            });
        }
        for (tok, op) in [
            (TokenKind::PlusAssign, BinOp::Add),
            (TokenKind::MinusAssign, BinOp::Sub),
            (TokenKind::StarAssign, BinOp::Mul),
            (TokenKind::SlashAssign, BinOp::Div),
        ] {
            if self.check(&tok) {
                self.advance();
                let start = target.span().start;
                let rhs = self.parse_assignment()?;
                let span = self.span_from(start);
                let value = Expr::Binary {
                    op,
                    left: Box::new(target.clone()),
                    right: Box::new(rhs),
                    span,
                    inferred_ty: None,
                };
                return Ok(Expr::Assign {
                    target: Box::new(target),
                    value: Box::new(value),
                    span,
                    inferred_ty: None,
                });
            }
        }
        Ok(target)
    }

    fn parse_ternary(&mut self) -> Result<Expr, ParseError> {
        let cond = self.parse_logical_or()?;
        if self.match_token(&TokenKind::Question) {
            let start = cond.span().start;
            let then_expr = self.parse_assignment()?;
            self.expect(&TokenKind::Colon, "':' in ternary expression")?;
            let else_expr = self.parse_assignment()?;
            let span = self.span_from(start);
            return Ok(Expr::Ternary {
                cond: Box::new(cond),
                then_expr: Box::new(then_expr),
                else_expr: Box::new(else_expr),
                span,
                inferred_ty: None,
            });
        }
        Ok(cond)
    }

    fn parse_logical_or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_logical_and()?;
        while self.match_token(&TokenKind::Or) {
            let start = left.span().start;
            let right = self.parse_logical_and()?;
            let span = self.span_from(start);
            left = Expr::Binary {
                op: BinOp::Or,
                left: Box::new(left),
                right: Box::new(right),
                span,
                inferred_ty: None,
            };
        }
        Ok(left)
    }

    fn parse_logical_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_equality()?;
        while self.match_token(&TokenKind::And) {
            let start = left.span().start;
            let right = self.parse_equality()?;
            let span = self.span_from(start);
            left = Expr::Binary {
                op: BinOp::And,
                left: Box::new(left),
                right: Box::new(right),
                span,
                inferred_ty: None,
            };
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_comparison()?;
        loop {
            let op = if self.match_token(&TokenKind::StrictEq) {
                BinOp::StrictEq
            } else if self.match_token(&TokenKind::Eq) {
                BinOp::Eq
            } else if self.match_token(&TokenKind::NotEq) {
                BinOp::NotEq
            } else {
                break;
            };
            let start = left.span().start;
            let right = self.parse_comparison()?;
            let span = self.span_from(start);
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span,
                inferred_ty: None,
            };
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_additive()?;
        loop {
            let op = if self.match_token(&TokenKind::Lt) {
                BinOp::Lt
            } else if self.match_token(&TokenKind::Gt) {
                BinOp::Gt
            } else if self.match_token(&TokenKind::Le) {
                BinOp::Le
            } else if self.match_token(&TokenKind::Ge) {
                BinOp::Ge
            } else {
                break;
            };
            let start = left.span().start;
            let right = self.parse_additive()?;
            let span = self.span_from(start);
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span,
                inferred_ty: None,
            };
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = if self.match_token(&TokenKind::Plus) {
                BinOp::Add
            } else if self.match_token(&TokenKind::Minus) {
                BinOp::Sub
            } else {
                break;
            };
            let start = left.span().start;
            let right = self.parse_multiplicative()?;
            let span = self.span_from(start);
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span,
                inferred_ty: None,
            };
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_exponent()?;
        loop {
            let op = if self.match_token(&TokenKind::Star) {
                BinOp::Mul
            } else if self.match_token(&TokenKind::Slash) {
                BinOp::Div
            } else if self.match_token(&TokenKind::Percent) {
                BinOp::Mod
            } else {
                break;
            };
            let start = left.span().start;
            let right = self.parse_exponent()?;
            let span = self.span_from(start);
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span,
                inferred_ty: None,
            };
        }
        Ok(left)
    }

    /// Right-associative: `2 ** 3 ** 2 == 2 ** (3 ** 2)`.
    fn parse_exponent(&mut self) -> Result<Expr, ParseError> {
        let left = self.parse_unary()?;
        if self.match_token(&TokenKind::StarStar) {
            let start = left.span().start;
            let right = self.parse_exponent()?;
            let span = self.span_from(start);
            return Ok(Expr::Binary {
                op: BinOp::Pow,
                left: Box::new(left),
                right: Box::new(right),
                span,
                inferred_ty: None,
            });
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let start = self.peek().span.start;
        if self.match_token(&TokenKind::Minus) {
            let operand = self.parse_unary()?;
            let span = self.span_from(start);
            return Ok(Expr::Unary {
                op: UnOp::Neg,
                operand: Box::new(operand),
                span,
                inferred_ty: None,
            });
        }
        if self.match_token(&TokenKind::Not) {
            let operand = self.parse_unary()?;
            let span = self.span_from(start);
            return Ok(Expr::Unary {
                op: UnOp::Not,
                operand: Box::new(operand),
                span,
                inferred_ty: None,
            });
        }
        if self.match_token(&TokenKind::PlusPlus) {
            let operand = self.parse_unary()?;
            let span = self.span_from(start);
            return Ok(Expr::Unary {
                op: UnOp::PreIncr,
                operand: Box::new(operand),
                span,
                inferred_ty: None,
            });
        }
        if self.match_token(&TokenKind::MinusMinus) {
            let operand = self.parse_unary()?;
            let span = self.span_from(start);
            return Ok(Expr::Unary {
                op: UnOp::PreDecr,
                operand: Box::new(operand),
                span,
                inferred_ty: None,
            });
        }
        if self.match_token(&TokenKind::Go) {
            let call = self.parse_unary()?;
            let span = self.span_from(start);
            return Ok(Expr::Spawn {
                call: Box::new(call),
                span,
                inferred_ty: None,
            });
        }
        if self.match_token(&TokenKind::Await) {
            let promise = self.parse_unary()?;
            let span = self.span_from(start);
            return Ok(Expr::Await {
                promise: Box::new(promise),
                span,
                inferred_ty: None,
            });
        }
        self.parse_postfix()
    }

    /// Call / member / index, plus postfix `++`/`--`.
    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        loop {
            let start = expr.span().start;
            if self.match_token(&TokenKind::LParen) {
                let mut args = Vec::new();
                if !self.check(&TokenKind::RParen) {
                    loop {
                        args.push(self.parse_assignment()?);
                        if !self.match_token(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(&TokenKind::RParen, "')' after call arguments")?;
                let span = self.span_from(start);
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                    span,
                    inferred_ty: None,
                };
            } else if self.match_token(&TokenKind::Dot) {
                let property = self.expect_identifier()?;
                let span = self.span_from(start);
                expr = Expr::Member {
                    object: Box::new(expr),
                    property,
                    span,
                    inferred_ty: None,
                };
            } else if self.match_token(&TokenKind::LBracket) {
                let index = self.parse_expression()?;
                self.expect(&TokenKind::RBracket, "']' after index expression")?;
                let span = self.span_from(start);
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                    span,
                    inferred_ty: None,
                };
            } else if self.match_token(&TokenKind::PlusPlus) {
                let span = self.span_from(start);
                expr = Expr::Unary {
                    op: UnOp::PostIncr,
                    operand: Box::new(expr),
                    span,
                    inferred_ty: None,
                };
            } else if self.match_token(&TokenKind::MinusMinus) {
                let span = self.span_from(start);
                expr = Expr::Unary {
                    op: UnOp::PostDecr,
                    operand: Box::new(expr),
                    span,
                    inferred_ty: None,
                };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let start = self.peek().span.start;
        match self.peek_kind().clone() {
            TokenKind::IntLiteral(v) => {
                self.advance();
                Ok(Expr::IntLiteral {
                    value: v,
                    span: self.span_from(start),
                    inferred_ty: None,
                })
            }
            TokenKind::FloatLiteral(v) => {
                self.advance();
                Ok(Expr::FloatLiteral {
                    value: v,
                    span: self.span_from(start),
                    inferred_ty: None,
                })
            }
            TokenKind::StringLiteral(v) => {
                self.advance();
                Ok(Expr::StringLiteral {
                    value: v,
                    span: self.span_from(start),
                    inferred_ty: None,
                })
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::BoolLiteral {
                    value: true,
                    span: self.span_from(start),
                    inferred_ty: None,
                })
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::BoolLiteral {
                    value: false,
                    span: self.span_from(start),
                    inferred_ty: None,
                })
            }
            TokenKind::Null => {
                self.advance();
                Ok(Expr::NullLiteral {
                    span: self.span_from(start),
                    inferred_ty: None,
                })
            }
            TokenKind::This => {
                self.advance();
                Ok(Expr::This {
                    span: self.span_from(start),
                    inferred_ty: None,
                })
            }
            TokenKind::New => {
                self.advance();
                let class_name = self.expect_identifier()?;
                self.expect(&TokenKind::LParen, "'(' after class name in `new`")?;
                let mut args = Vec::new();
                if !self.check(&TokenKind::RParen) {
                    loop {
                        args.push(self.parse_assignment()?);
                        if !self.match_token(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(&TokenKind::RParen, "')' after `new` arguments")?;
                Ok(Expr::New {
                    class_name,
                    args,
                    span: self.span_from(start),
                    inferred_ty: None,
                })
            }
            TokenKind::Function => {
                self.advance();
                self.expect(&TokenKind::LParen, "'(' after `function`")?;
                let params = self.parse_params()?;
                let ret_ty = self.parse_type_annotation()?;
                self.expect(&TokenKind::LBrace, "'{' to open function body")?;
                let body = self.parse_block_body()?;
                Ok(Expr::FunctionExpr {
                    params,
                    ret_ty,
                    body,
                    span: self.span_from(start),
                    inferred_ty: None,
                })
            }
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(Expr::Identifier {
                    name,
                    span: self.span_from(start),
                    inferred_ty: None,
                })
            }
            TokenKind::LBracket => {
                self.advance();
                let mut elements = Vec::new();
                if !self.check(&TokenKind::RBracket) {
                    loop {
                        elements.push(self.parse_assignment()?);
                        if !self.match_token(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(&TokenKind::RBracket, "']' to close array literal")?;
                Ok(Expr::Array {
                    elements,
                    span: self.span_from(start),
                    inferred_ty: None,
                })
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expression()?;
                self.expect(&TokenKind::RParen, "')' to close parenthesized expression")?;
                Ok(inner)
            }
            _ => Err(self.unexpected("expression")),
        }
    }

    pub(super) fn parse_params(&mut self) -> Result<Vec<Param>, ParseError> {
        let mut params = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                let name = self.expect_identifier()?;
                let ty = self.parse_type_annotation()?;
                let default = if self.match_token(&TokenKind::Assign) {
                    Some(self.parse_assignment()?)
                } else {
                    None
                };
                params.push(Param { name, ty, default });
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen, "')' after parameter list")?;
        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser as P;

    fn parse_expr(src: &str) -> Expr {
        let full = format!("let __t = {src};");
        let prog = P::parse_source(&full).unwrap();
        match prog.statements.into_iter().next().unwrap() {
            super::super::ast::Stmt::VarDecl { init, .. } => init.unwrap(),
            _ => panic!("expected var decl"),
        }
    }

    #[test]
    fn exponentiation_is_right_associative() {
        let e = parse_expr("2 ** 3 ** 2");
        match e {
            Expr::Binary {
                op: BinOp::Pow,
                right,
                ..
            } => assert!(matches!(*right, Expr::Binary { op: BinOp::Pow, .. })),
            _ => panic!("expected pow"),
        }
    }

    #[test]
    fn precedence_multiplicative_over_additive() {
        let e = parse_expr("1 + 2 * 3");
        match e {
            Expr::Binary {
                op: BinOp::Add,
                right,
                ..
            } => assert!(matches!(*right, Expr::Binary { op: BinOp::Mul, .. })),
            _ => panic!("expected add"),
        }
    }

    #[test]
    fn ternary_binds_looser_than_logical_or() {
        let e = parse_expr("a || b ? 1 : 2");
        assert!(matches!(e, Expr::Ternary { .. }));
    }

    #[test]
    fn postfix_call_member_index_chain() {
        let e = parse_expr("obj.method(1)[0]");
        assert!(matches!(e, Expr::Index { .. }));
    }

    #[test]
    fn go_and_await_parse_as_prefix_unary() {
        assert!(matches!(parse_expr("go worker(1)"), Expr::Spawn { .. }));
        assert!(matches!(parse_expr("await p"), Expr::Await { .. }));
    }
}
