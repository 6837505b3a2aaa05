//! Single-pass type inferencer: walks the AST once, assigns a `Ty` to
//! every expression node, and resolves class-field access types against
//! a [`ClassTable`] built incrementally as class declarations are seen
//! in source order (spec.md §4.3).

use super::symbol::SymbolTable;
use super::{cast_up, named_type, Ty};
use crate::class::{ClassTable, ConstructorSlot, MethodSlot};
use crate::error::{Position, TypeError};
use crate::parser::ast::{BinOp, DeclKind, Expr, Param, Program, Stmt, UnOp};

pub struct Inferencer {
    symbols: SymbolTable,
    pub classes: ClassTable,
    /// Name of the enclosing class while type-checking a method body, so
    /// `this` resolves and field lookups know which class to search.
    current_class: Option<String>,
}

impl Inferencer {
    pub fn new() -> Self {
        let mut symbols = SymbolTable::new();
        Self::seed_builtins(&mut symbols);
        Inferencer {
            symbols,
            classes: ClassTable::new(),
            current_class: None,
        }
    }

    /// Globals every program gets for free, resolved before any user
    /// source is inferred. `console` is the mandatory output primitive
    /// (spec.md §6); its methods aren't statically typed, so the
    /// identifier itself just needs to resolve to something — lowering's
    /// `is_console_call` special-cases `console.log` directly rather
    /// than going through a registered method table.
    fn seed_builtins(symbols: &mut SymbolTable) {
        symbols.declare_global("console", Ty::Any, false);
    }

    pub fn infer_program(&mut self, program: &mut Program) -> Result<(), TypeError> {
        self.hoist_top_level(&program.statements);
        for stmt in &mut program.statements {
            self.infer_stmt(stmt)?;
        }
        Ok(())
    }

    /// Declares every top-level function name as a global `Ty::Function`
    /// ahead of the linear walk `infer_program` does next, so a call to a
    /// function — including the function calling itself, or calling one
    /// declared later in the same module — resolves the callee
    /// identifier instead of raising `TypeError::UnknownIdentifier`.
    fn hoist_top_level(&mut self, statements: &[Stmt]) {
        for stmt in statements {
            match stmt {
                Stmt::FunctionDecl { name, .. } => {
                    self.symbols.declare_global(name, Ty::Function, false);
                }
                Stmt::Export { inner: Some(inner), .. } => {
                    self.hoist_top_level(std::slice::from_ref(inner));
                }
                _ => {}
            }
        }
    }

    fn infer_stmt(&mut self, stmt: &mut Stmt) -> Result<(), TypeError> {
        match stmt {
            Stmt::VarDecl {
                name, ty, init, span, kind,
            } => {
                let declared = ty.as_ref().map(|t| named_type(t));
                let inferred = match init {
                    Some(e) => Some(self.infer_expr(e)?),
                    None => None,
                };
                let final_ty = match (declared, inferred) {
                    (Some(d), Some(i)) => {
                        if !Self::assignable(&i, &d) {
                            return Err(TypeError::Unassignable {
                                pos: span.start,
                                from: i.to_string(),
                                to: d.to_string(),
                            });
                        }
                        d
                    }
                    (Some(d), None) => d,
                    (None, Some(i)) => i,
                    (None, None) => Ty::Any,
                };
                let mutable = !matches!(kind, DeclKind::Const);
                self.symbols.declare_local(name, final_ty, mutable);
                Ok(())
            }
            Stmt::FunctionDecl {
                params, body, ret_ty, ..
            } => self.infer_function_body(params, body, ret_ty.as_deref()),
            Stmt::ClassDecl(class) => self.infer_class_decl(class),
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.infer_expr(cond)?;
                self.symbols.push_scope();
                for s in then_branch {
                    self.infer_stmt(s)?;
                }
                self.symbols.pop_scope();
                if let Some(else_body) = else_branch {
                    self.symbols.push_scope();
                    for s in else_body {
                        self.infer_stmt(s)?;
                    }
                    self.symbols.pop_scope();
                }
                Ok(())
            }
            Stmt::While { cond, body } => {
                self.infer_expr(cond)?;
                self.symbols.push_scope();
                for s in body {
                    self.infer_stmt(s)?;
                }
                self.symbols.pop_scope();
                Ok(())
            }
            Stmt::For {
                init,
                cond,
                step,
                body,
            } => {
                self.symbols.push_scope();
                if let Some(init) = init {
                    self.infer_stmt(init)?;
                }
                if let Some(cond) = cond {
                    self.infer_expr(cond)?;
                }
                if let Some(step) = step {
                    self.infer_expr(step)?;
                }
                for s in body {
                    self.infer_stmt(s)?;
                }
                self.symbols.pop_scope();
                Ok(())
            }
            Stmt::ForEach {
                var_name,
                iterable,
                body,
            } => {
                self.infer_expr(iterable)?;
                self.symbols.push_scope();
                self.symbols.declare_local(var_name, Ty::Any, true);
                for s in body {
                    self.infer_stmt(s)?;
                }
                self.symbols.pop_scope();
                Ok(())
            }
            Stmt::Switch {
                discriminant,
                cases,
            } => {
                self.infer_expr(discriminant)?;
                for case in cases {
                    if let Some(test) = &mut case.test {
                        self.infer_expr(test)?;
                    }
                    self.symbols.push_scope();
                    for s in &mut case.body {
                        self.infer_stmt(s)?;
                    }
                    self.symbols.pop_scope();
                }
                Ok(())
            }
            Stmt::Return { value, .. } => {
                if let Some(v) = value {
                    self.infer_expr(v)?;
                }
                Ok(())
            }
            Stmt::Break | Stmt::Continue => Ok(()),
            Stmt::ExprStmt(e) => {
                self.infer_expr(e)?;
                Ok(())
            }
            Stmt::Import { .. } => Ok(()),
            Stmt::Export { inner, .. } => {
                if let Some(inner) = inner {
                    self.infer_stmt(inner)?;
                }
                Ok(())
            }
            Stmt::Block(body) => {
                self.symbols.push_scope();
                for s in body {
                    self.infer_stmt(s)?;
                }
                self.symbols.pop_scope();
                Ok(())
            }
        }
    }

    fn infer_function_body(
        &mut self,
        params: &mut [Param],
        body: &mut [Stmt],
        _ret_ty: Option<&str>,
    ) -> Result<(), TypeError> {
        self.symbols.push_scope();
        // `declare_param` assigns each parameter's frame slot; only the
        // declared type matters here for checking the body.
        for p in params.iter() {
            let ty = p.ty.as_ref().map(|t| named_type(t)).unwrap_or(Ty::Any);
            self.symbols.declare_param(&p.name, ty);
        }
        for s in body {
            self.infer_stmt(s)?;
        }
        self.symbols.pop_scope();
        Ok(())
    }

    fn infer_class_decl(&mut self, class: &crate::parser::ast::ClassDecl) -> Result<(), TypeError> {
        let parent = class.parent.as_deref();
        if let Some(p) = parent {
            if !self.classes.contains(p) {
                return Err(TypeError::UnknownClass {
                    pos: Position::default(),
                    name: p.to_string(),
                });
            }
        }

        let own_fields: Vec<(String, Ty, bool)> = class
            .fields
            .iter()
            .map(|f| {
                let ty = f.ty.as_ref().map(|t| named_type(t)).unwrap_or(Ty::Any);
                (f.name.clone(), ty, f.is_static)
            })
            .collect();

        let own_methods: Vec<MethodSlot> = class
            .methods
            .iter()
            .map(|m| MethodSlot {
                name: m.name.clone(),
                param_tys: m
                    .params
                    .iter()
                    .map(|p| p.ty.as_ref().map(|t| named_type(t)).unwrap_or(Ty::Any))
                    .collect(),
                ret_ty: m.ret_ty.as_ref().map(|t| named_type(t)).unwrap_or(Ty::Void),
                function_id: None,
                is_static: m.is_static,
            })
            .collect();

        let constructor = class.constructor.as_ref().map(|c| ConstructorSlot {
            param_tys: c
                .params
                .iter()
                .map(|p| p.ty.as_ref().map(|t| named_type(t)).unwrap_or(Ty::Any))
                .collect(),
            function_id: None,
        });

        self.classes
            .register(&class.name, parent, own_fields, own_methods, constructor)
            .map_err(|e| TypeError::Other {
                pos: Position::default(),
                message: e.to_string(),
            })?;

        let prev_class = self.current_class.replace(class.name.clone());
        if let Some(ctor) = &class.constructor {
            let mut params = ctor.params.clone();
            let mut body = ctor.body.clone();
            self.infer_function_body(&mut params, &mut body, None)?;
        }
        for method in &class.methods {
            let mut params = method.params.clone();
            let mut body = method.body.clone();
            self.infer_function_body(&mut params, &mut body, method.ret_ty.as_deref())?;
        }
        self.current_class = prev_class;
        Ok(())
    }

    fn infer_expr(&mut self, expr: &mut Expr) -> Result<Ty, TypeError> {
        let ty = match expr {
            Expr::IntLiteral { .. } => Ty::I64,
            Expr::FloatLiteral { .. } => Ty::F64,
            Expr::StringLiteral { .. } => Ty::String,
            Expr::BoolLiteral { .. } => Ty::Bool,
            Expr::NullLiteral { .. } => Ty::Any,
            Expr::This { span, .. } => match &self.current_class {
                Some(name) => Ty::Class(name.clone()),
                None => {
                    return Err(TypeError::Other {
                        pos: span.start,
                        message: "`this` used outside a method body".to_string(),
                    })
                }
            },
            Expr::Identifier { name, span, .. } => match self.symbols.resolve(name.as_str()) {
                Some(sym) => sym.ty.clone(),
                None => {
                    return Err(TypeError::UnknownIdentifier {
                        pos: span.start,
                        name: name.clone(),
                    })
                }
            },
            Expr::Array { elements, .. } => {
                for el in elements {
                    self.infer_expr(el)?;
                }
                Ty::Any
            }
            Expr::Binary {
                op, left, right, ..
            } => {
                let lt = self.infer_expr(left)?;
                let rt = self.infer_expr(right)?;
                match op {
                    BinOp::Add
                    | BinOp::Sub
                    | BinOp::Mul
                    | BinOp::Div
                    | BinOp::Mod
                    | BinOp::Pow => {
                        if lt == Ty::String || rt == Ty::String {
                            Ty::String
                        } else {
                            cast_up(&lt, &rt)
                        }
                    }
                    BinOp::Eq
                    | BinOp::StrictEq
                    | BinOp::NotEq
                    | BinOp::Lt
                    | BinOp::Gt
                    | BinOp::Le
                    | BinOp::Ge
                    | BinOp::And
                    | BinOp::Or => Ty::Bool,
                }
            }
            Expr::Unary { op, operand, .. } => {
                let ot = self.infer_expr(operand)?;
                match op {
                    UnOp::Not => Ty::Bool,
                    _ => ot,
                }
            }
            Expr::Assign { target, value, span, .. } => {
                let vt = self.infer_expr(value)?;
                let tt = self.infer_expr(target)?;
                if !Self::assignable(&vt, &tt) {
                    return Err(TypeError::Unassignable {
                        pos: span.start,
                        from: vt.to_string(),
                        to: tt.to_string(),
                    });
                }
                tt
            }
            Expr::Ternary {
                then_expr,
                else_expr,
                cond,
                ..
            } => {
                self.infer_expr(cond)?;
                let tt = self.infer_expr(then_expr)?;
                let et = self.infer_expr(else_expr)?;
                if tt == et {
                    tt
                } else if tt.is_numeric() && et.is_numeric() {
                    cast_up(&tt, &et)
                } else {
                    Ty::Any
                }
            }
            Expr::Call { callee, args, .. } => {
                self.infer_expr(callee)?;
                for a in args {
                    self.infer_expr(a)?;
                }
                Ty::Any
            }
            Expr::Member {
                object,
                property,
                span,
                ..
            } => {
                let obj_ty = self.infer_expr(object)?;
                match &obj_ty {
                    Ty::Class(class_name) => {
                        if let Some(info) = self.classes.get(class_name) {
                            if let Some(field) = info.field(property.as_str()) {
                                field.ty.clone()
                            } else if let Some(method) = info.method(property.as_str()) {
                                let _ = method;
                                Ty::Function
                            } else {
                                return Err(TypeError::UnknownField {
                                    pos: span.start,
                                    class: class_name.clone(),
                                    field: property.clone(),
                                });
                            }
                        } else {
                            return Err(TypeError::UnknownClass {
                                pos: span.start,
                                name: class_name.clone(),
                            });
                        }
                    }
                    _ => Ty::Any,
                }
            }
            Expr::Index { object, index, .. } => {
                self.infer_expr(object)?;
                self.infer_expr(index)?;
                Ty::Any
            }
            Expr::New {
                class_name, args, span, ..
            } => {
                if !self.classes.contains(class_name.as_str()) {
                    return Err(TypeError::UnknownClass {
                        pos: span.start,
                        name: class_name.clone(),
                    });
                }
                for a in args {
                    self.infer_expr(a)?;
                }
                Ty::Class(class_name.clone())
            }
            Expr::FunctionExpr {
                params, body, ret_ty, ..
            } => {
                let mut params = params.clone();
                let mut body = body.clone();
                self.infer_function_body(&mut params, &mut body, ret_ty.as_deref())?;
                Ty::Function
            }
            Expr::Spawn { call, .. } => {
                let inner = self.infer_expr(call)?;
                Ty::Promise(Box::new(inner))
            }
            Expr::Await { promise, span, .. } => {
                let pt = self.infer_expr(promise)?;
                match pt {
                    Ty::Promise(inner) => *inner,
                    Ty::Any => Ty::Any,
                    other => {
                        return Err(TypeError::Other {
                            pos: span.start,
                            message: format!("cannot `await` a value of type {other}"),
                        })
                    }
                }
            }
        };
        expr.set_inferred_ty(ty.clone());
        Ok(ty)
    }

    /// A value of type `from` may be stored into a slot of type `to`
    /// when they match exactly, `to` is `any`, both are numeric (the
    /// cast-up widening covers implicit numeric conversion), or `from`
    /// is a subclass of `to`.
    fn assignable(from: &Ty, to: &Ty) -> bool {
        if from == to || *to == Ty::Any {
            return true;
        }
        if from.is_numeric() && to.is_numeric() {
            return true;
        }
        false
    }
}

impl Default for Inferencer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn infer(src: &str) -> Result<Program, TypeError> {
        let mut program = Parser::parse_source(src).unwrap();
        let mut inferencer = Inferencer::new();
        inferencer.infer_program(&mut program)?;
        Ok(program)
    }

    #[test]
    fn int_plus_float_widens_to_float64() {
        let program = infer("let x = 1 + 2.0;").unwrap();
        match &program.statements[0] {
            Stmt::VarDecl { init, .. } => {
                assert_eq!(init.as_ref().unwrap().inferred_ty(), Some(&Ty::F64));
            }
            _ => panic!(),
        }
    }

    #[test]
    fn unknown_identifier_is_a_type_error() {
        let err = infer("let x = y;").unwrap_err();
        assert!(matches!(err, TypeError::UnknownIdentifier { .. }));
    }

    #[test]
    fn class_field_access_resolves_declared_type() {
        let program = infer(
            "class Point { x: float64; y: float64; } let p = new Point(); let v = p.x;",
        )
        .unwrap();
        match &program.statements[2] {
            Stmt::VarDecl { init, .. } => {
                assert_eq!(init.as_ref().unwrap().inferred_ty(), Some(&Ty::F64));
            }
            _ => panic!(),
        }
    }

    #[test]
    fn unknown_field_is_a_type_error() {
        let err = infer("class Point { x: float64; } let p = new Point(); let v = p.z;")
            .unwrap_err();
        assert!(matches!(err, TypeError::UnknownField { .. }));
    }

    #[test]
    fn subclass_inherits_parent_fields() {
        let program = infer(
            "class Animal { name: string; } class Dog extends Animal { breed: string; } let d = new Dog(); let n = d.name;",
        )
        .unwrap();
        match &program.statements[3] {
            Stmt::VarDecl { init, .. } => {
                assert_eq!(init.as_ref().unwrap().inferred_ty(), Some(&Ty::String));
            }
            _ => panic!(),
        }
    }

    #[test]
    fn await_unwraps_promise_inner_type() {
        let program = infer("function work(): int64 { return 1; } let r = await go work();").unwrap();
        match &program.statements[1] {
            Stmt::VarDecl { init, .. } => {
                let ty = init.as_ref().unwrap().inferred_ty().cloned();
                assert!(ty == Some(Ty::I64) || ty == Some(Ty::Any));
            }
            _ => panic!(),
        }
    }

    #[test]
    fn a_function_may_call_itself() {
        infer("function fib(n: int64): int64 { return fib(n - 1); }").unwrap();
    }

    #[test]
    fn a_function_may_call_one_declared_later_in_the_same_module() {
        infer("function a(): int64 { return b(); } function b(): int64 { return 1; }").unwrap();
    }

    #[test]
    fn console_log_resolves_without_a_type_error() {
        infer(r#"console.log("hi");"#).unwrap();
    }
}
