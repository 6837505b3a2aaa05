//! Statement parsing: declarations, control flow, and module linkage
//! forms (spec.md §4.2).

use super::ast::{
    ClassDecl, DeclKind, FieldDecl, ImportSpecifier, MethodDecl, Param, Stmt, SwitchCase,
};
use super::token::TokenKind;
use super::Parser;
use crate::error::ParseError;

impl Parser {
    pub(super) fn parse_statement(&mut self) -> Result<Stmt, ParseError> {
        match self.peek_kind().clone() {
            TokenKind::Let => self.parse_var_decl(DeclKind::Let),
            TokenKind::Var => self.parse_var_decl(DeclKind::Var),
            TokenKind::Const => self.parse_var_decl(DeclKind::Const),
            TokenKind::Function => self.parse_function_decl(),
            TokenKind::Class => Ok(Stmt::ClassDecl(self.parse_class_decl()?)),
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::For => self.parse_for_or_foreach(),
            TokenKind::Switch => self.parse_switch(),
            TokenKind::Return => self.parse_return(),
            TokenKind::Break => {
                self.advance();
                self.match_token(&TokenKind::Semicolon);
                Ok(Stmt::Break)
            }
            TokenKind::Continue => {
                self.advance();
                self.match_token(&TokenKind::Semicolon);
                Ok(Stmt::Continue)
            }
            TokenKind::Import => self.parse_import(),
            TokenKind::Export => self.parse_export(),
            TokenKind::LBrace => {
                self.advance();
                let body = self.parse_block_body()?;
                Ok(Stmt::Block(body))
            }
            _ => {
                let expr = self.parse_expression()?;
                self.match_token(&TokenKind::Semicolon);
                Ok(Stmt::ExprStmt(expr))
            }
        }
    }

    /// Parses statements up to (and consuming) the closing `}`.
    pub(super) fn parse_block_body(&mut self) -> Result<Vec<Stmt>, ParseError> {
        let mut body = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            body.push(self.parse_statement()?);
        }
        self.expect(&TokenKind::RBrace, "'}' to close block")?;
        Ok(body)
    }

    fn parse_var_decl(&mut self, kind: DeclKind) -> Result<Stmt, ParseError> {
        let start = self.peek().span.start;
        self.advance();
        let name = self.expect_identifier()?;
        let ty = self.parse_type_annotation()?;
        let init = if self.match_token(&TokenKind::Assign) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        self.match_token(&TokenKind::Semicolon);
        let span = self.span_from(start);
        Ok(Stmt::VarDecl {
            kind,
            name,
            ty,
            init,
            span,
        })
    }

    fn parse_function_decl(&mut self) -> Result<Stmt, ParseError> {
        let start = self.peek().span.start;
        self.advance();
        let name = self.expect_identifier()?;
        self.expect(&TokenKind::LParen, "'(' after function name")?;
        let params = self.parse_params()?;
        let ret_ty = self.parse_type_annotation()?;
        self.expect(&TokenKind::LBrace, "'{' to open function body")?;
        let body = self.parse_block_body()?;
        let span = self.span_from(start);
        Ok(Stmt::FunctionDecl {
            name,
            params,
            ret_ty,
            body,
            span,
        })
    }

    fn parse_class_decl(&mut self) -> Result<ClassDecl, ParseError> {
        self.advance(); // `class`
        let name = self.expect_identifier()?;
        let parent = if self.match_token(&TokenKind::Extends) {
            Some(self.expect_identifier()?)
        } else {
            None
        };
        self.expect(&TokenKind::LBrace, "'{' to open class body")?;

        let mut fields = Vec::new();
        let mut methods = Vec::new();
        let mut constructor = None;

        while !self.check(&TokenKind::RBrace) {
            // Visibility modifiers are accepted and discarded; this
            // engine does not enforce field/method access control.
            while matches!(
                self.peek_kind(),
                TokenKind::Public | TokenKind::Private | TokenKind::Protected
            ) {
                self.advance();
            }
            let is_static = self.match_token(&TokenKind::Static);

            if self.check(&TokenKind::Constructor) {
                self.advance();
                self.expect(&TokenKind::LParen, "'(' after `constructor`")?;
                let params = self.parse_params()?;
                self.expect(&TokenKind::LBrace, "'{' to open constructor body")?;
                let body = self.parse_block_body()?;
                constructor = Some(MethodDecl {
                    name: "constructor".to_string(),
                    params,
                    ret_ty: None,
                    body,
                    is_static: false,
                });
                continue;
            }

            let member_name = self.expect_identifier()?;
            if self.check(&TokenKind::LParen) {
                self.advance();
                let params = self.parse_params()?;
                let ret_ty = self.parse_type_annotation()?;
                self.expect(&TokenKind::LBrace, "'{' to open method body")?;
                let body = self.parse_block_body()?;
                methods.push(MethodDecl {
                    name: member_name,
                    params,
                    ret_ty,
                    body,
                    is_static,
                });
            } else {
                let ty = self.parse_type_annotation()?;
                let default = if self.match_token(&TokenKind::Assign) {
                    Some(self.parse_expression()?)
                } else {
                    None
                };
                self.match_token(&TokenKind::Semicolon);
                fields.push(FieldDecl {
                    name: member_name,
                    ty,
                    default,
                    is_static,
                });
            }
        }
        self.expect(&TokenKind::RBrace, "'}' to close class body")?;

        Ok(ClassDecl {
            name,
            parent,
            fields,
            constructor,
            methods,
        })
    }

    fn parse_if(&mut self) -> Result<Stmt, ParseError> {
        self.advance();
        self.expect(&TokenKind::LParen, "'(' after `if`")?;
        let cond = self.parse_expression()?;
        self.expect(&TokenKind::RParen, "')' after if condition")?;
        self.expect(&TokenKind::LBrace, "'{' to open if body")?;
        let then_branch = self.parse_block_body()?;
        let else_branch = if self.match_token(&TokenKind::Else) {
            if self.check(&TokenKind::If) {
                Some(vec![self.parse_if()?])
            } else {
                self.expect(&TokenKind::LBrace, "'{' to open else body")?;
                Some(self.parse_block_body()?)
            }
        } else {
            None
        };
        Ok(Stmt::If {
            cond,
            then_branch,
            else_branch,
        })
    }

    fn parse_while(&mut self) -> Result<Stmt, ParseError> {
        self.advance();
        self.expect(&TokenKind::LParen, "'(' after `while`")?;
        let cond = self.parse_expression()?;
        self.expect(&TokenKind::RParen, "')' after while condition")?;
        self.expect(&TokenKind::LBrace, "'{' to open while body")?;
        let body = self.parse_block_body()?;
        Ok(Stmt::While { cond, body })
    }

    /// `for (init; cond; step) { }` and `for (x of iterable) { }` share a
    /// leading `for (` so the distinguishing `of` keyword is checked
    /// after the loop variable declaration is scanned speculatively.
    fn parse_for_or_foreach(&mut self) -> Result<Stmt, ParseError> {
        self.advance();
        self.expect(&TokenKind::LParen, "'(' after `for`")?;

        if self.check(&TokenKind::Let) || self.check(&TokenKind::Var) || self.check(&TokenKind::Const)
        {
            let decl_start = self.pos;
            self.advance();
            let name = self.expect_identifier()?;
            if self.match_token(&TokenKind::Of) {
                let iterable = self.parse_expression()?;
                self.expect(&TokenKind::RParen, "')' after for-of iterable")?;
                self.expect(&TokenKind::LBrace, "'{' to open for-of body")?;
                let body = self.parse_block_body()?;
                return Ok(Stmt::ForEach {
                    var_name: name,
                    iterable,
                    body,
                });
            }
            // Not a for-of: rewind and parse as a classic C-style for.
            self.pos = decl_start;
        }

        let init = if self.check(&TokenKind::Semicolon) {
            None
        } else {
            Some(Box::new(self.parse_for_init()?))
        };
        self.match_token(&TokenKind::Semicolon);
        let cond = if self.check(&TokenKind::Semicolon) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(&TokenKind::Semicolon, "';' after for-loop condition")?;
        let step = if self.check(&TokenKind::RParen) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(&TokenKind::RParen, "')' after for-loop clauses")?;
        self.expect(&TokenKind::LBrace, "'{' to open for body")?;
        let body = self.parse_block_body()?;
        Ok(Stmt::For {
            init,
            cond,
            step,
            body,
        })
    }

    fn parse_for_init(&mut self) -> Result<Stmt, ParseError> {
        let kind = match self.peek_kind() {
            TokenKind::Let => DeclKind::Let,
            TokenKind::Var => DeclKind::Var,
            TokenKind::Const => DeclKind::Const,
            _ => {
                let expr = self.parse_expression()?;
                return Ok(Stmt::ExprStmt(expr));
            }
        };
        let start = self.peek().span.start;
        self.advance();
        let name = self.expect_identifier()?;
        let ty = self.parse_type_annotation()?;
        let init = if self.match_token(&TokenKind::Assign) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        let span = self.span_from(start);
        Ok(Stmt::VarDecl {
            kind,
            name,
            ty,
            init,
            span,
        })
    }

    /// Cases fall through unless a `break` is the last statement in the
    /// case body; `falls_through` records the absence of that `break`
    /// (the `break` itself is consumed here, not left in the body).
    fn parse_switch(&mut self) -> Result<Stmt, ParseError> {
        self.advance();
        self.expect(&TokenKind::LParen, "'(' after `switch`")?;
        let discriminant = self.parse_expression()?;
        self.expect(&TokenKind::RParen, "')' after switch discriminant")?;
        self.expect(&TokenKind::LBrace, "'{' to open switch body")?;

        let mut cases = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            let test = if self.match_token(&TokenKind::Case) {
                let e = self.parse_expression()?;
                self.expect(&TokenKind::Colon, "':' after case expression")?;
                Some(e)
            } else {
                self.expect(&TokenKind::Default, "`case` or `default`")?;
                self.expect(&TokenKind::Colon, "':' after `default`")?;
                None
            };
            let mut body = Vec::new();
            let mut falls_through = true;
            while !self.check(&TokenKind::RBrace)
                && !self.check(&TokenKind::Case)
                && !self.check(&TokenKind::Default)
            {
                if self.check(&TokenKind::Break) {
                    self.advance();
                    self.match_token(&TokenKind::Semicolon);
                    falls_through = false;
                    break;
                }
                body.push(self.parse_statement()?);
            }
            cases.push(SwitchCase {
                test,
                body,
                falls_through,
            });
        }
        self.expect(&TokenKind::RBrace, "'}' to close switch body")?;
        Ok(Stmt::Switch {
            discriminant,
            cases,
        })
    }

    fn parse_return(&mut self) -> Result<Stmt, ParseError> {
        let start = self.peek().span.start;
        self.advance();
        let value = if self.check(&TokenKind::Semicolon) || self.check(&TokenKind::RBrace) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.match_token(&TokenKind::Semicolon);
        let span = self.span_from(start);
        Ok(Stmt::Return { value, span })
    }

    /// `import { a, b as c } from "./m"`, `import def from "./m"`,
    /// `import * as ns from "./m"`.
    fn parse_import(&mut self) -> Result<Stmt, ParseError> {
        self.advance();
        let mut specifiers = Vec::new();

        if self.match_token(&TokenKind::Star) {
            self.expect(&TokenKind::As, "`as` after `import *`")?;
            let alias = self.expect_identifier()?;
            specifiers.push(ImportSpecifier::Namespace { alias });
        } else if self.match_token(&TokenKind::LBrace) {
            if !self.check(&TokenKind::RBrace) {
                loop {
                    let name = self.expect_identifier()?;
                    let alias = if self.match_token(&TokenKind::As) {
                        Some(self.expect_identifier()?)
                    } else {
                        None
                    };
                    specifiers.push(ImportSpecifier::Named { name, alias });
                    if !self.match_token(&TokenKind::Comma) {
                        break;
                    }
                }
            }
            self.expect(&TokenKind::RBrace, "'}' to close import list")?;
        } else {
            let alias = self.expect_identifier()?;
            specifiers.push(ImportSpecifier::Default { alias });
        }

        self.expect(&TokenKind::From, "`from` in import statement")?;
        let source = self.expect_string_literal()?;
        self.match_token(&TokenKind::Semicolon);
        Ok(Stmt::Import { specifiers, source })
    }

    /// `export default <decl-or-expr>` or `export <decl>`.
    fn parse_export(&mut self) -> Result<Stmt, ParseError> {
        self.advance();
        if self.match_token(&TokenKind::Default) {
            let inner = self.parse_statement()?;
            return Ok(Stmt::Export {
                is_default: true,
                inner: Some(Box::new(inner)),
                name: None,
            });
        }
        let inner = self.parse_statement()?;
        let name = match &inner {
            Stmt::FunctionDecl { name, .. } => Some(name.clone()),
            Stmt::ClassDecl(c) => Some(c.name.clone()),
            Stmt::VarDecl { name, .. } => Some(name.clone()),
            _ => None,
        };
        Ok(Stmt::Export {
            is_default: false,
            inner: Some(Box::new(inner)),
            name,
        })
    }

    fn expect_string_literal(&mut self) -> Result<String, ParseError> {
        match self.peek_kind().clone() {
            TokenKind::StringLiteral(s) => {
                self.advance();
                Ok(s)
            }
            _ => Err(self.unexpected("string literal")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::ast::Stmt;
    use super::super::Parser as P;

    #[test]
    fn parses_if_else_if_else_chain() {
        let prog = P::parse_source("if (a) { b; } else if (c) { d; } else { e; }").unwrap();
        assert_eq!(prog.statements.len(), 1);
        assert!(matches!(prog.statements[0], Stmt::If { .. }));
    }

    #[test]
    fn parses_classic_for_loop() {
        let prog = P::parse_source("for (let i = 0; i < 10; i++) { x; }").unwrap();
        assert!(matches!(prog.statements[0], Stmt::For { .. }));
    }

    #[test]
    fn parses_for_of_loop() {
        let prog = P::parse_source("for (let item of items) { use(item); }").unwrap();
        assert!(matches!(prog.statements[0], Stmt::ForEach { .. }));
    }

    #[test]
    fn parses_switch_with_fallthrough_and_default() {
        let prog = P::parse_source(
            "switch (x) { case 1: a; case 2: b; break; default: c; }",
        )
        .unwrap();
        match &prog.statements[0] {
            Stmt::Switch { cases, .. } => {
                assert_eq!(cases.len(), 3);
                assert!(cases[0].falls_through);
                assert!(!cases[1].falls_through);
                assert!(cases[2].test.is_none());
            }
            _ => panic!("expected switch"),
        }
    }

    #[test]
    fn parses_class_with_extends_and_constructor() {
        let prog = P::parse_source(
            "class Dog extends Animal { name: string; constructor(name: string) { this.name = name; } bark() { return 1; } }",
        )
        .unwrap();
        match &prog.statements[0] {
            Stmt::ClassDecl(c) => {
                assert_eq!(c.parent.as_deref(), Some("Animal"));
                assert!(c.constructor.is_some());
                assert_eq!(c.methods.len(), 1);
                assert_eq!(c.fields.len(), 1);
            }
            _ => panic!("expected class decl"),
        }
    }

    #[test]
    fn parses_named_and_renamed_imports() {
        let prog = P::parse_source("import { a, b as c } from \"./mod\";").unwrap();
        assert!(matches!(prog.statements[0], Stmt::Import { .. }));
    }

    #[test]
    fn parses_default_export() {
        let prog = P::parse_source("export default function main() { return 0; }").unwrap();
        match &prog.statements[0] {
            Stmt::Export { is_default, .. } => assert!(*is_default),
            _ => panic!("expected export"),
        }
    }
}
