//! AST -> IR lowering (spec.md §4.3): the single driver both backends'
//! input is produced by. Walks a type-checked [`Program`], emitting one
//! [`IrFunction`] per top-level function, class constructor, and class
//! method, plus one synthetic `<module>` function for top-level
//! statements that aren't declarations (the module's side-effecting
//! entry point).
//!
//! Every call-shaped instruction (`Call`, `Spawn`, a constructor's
//! implicit allocation) reads its operand-stack arguments through a
//! `*const i64`/count pair, the same convention every other boundary in
//! this engine uses (task entry, timer callback, helper trampoline).
//! The native backend turns a block of pushed values into that pair by
//! pointing `rdi` at the current stack top, so the value nearest the
//! top of the stack becomes argument 0. Argument-pushing code below
//! therefore pushes in reverse (last argument first, receiver/`this`
//! last) wherever order is semantically visible, so argument 0 always
//! ends up the one pushed most recently.

use crate::class::ClassTable;
use crate::compiler::codegen::RuntimeHelper;
use crate::compiler::ir::{CallTarget, IrBinOp, IrFunction, IrInstr};
use crate::compiler::label::Label;
use crate::parser::ast::{BinOp, ClassDecl, Expr, MethodDecl, Param, Program, Stmt, UnOp};
use crate::types::symbol::{Storage, SymbolTable};
use crate::types::{named_type, Ty};

/// The name a class's constructor and methods are registered under in
/// the function registry: `ClassName.methodName`, `ClassName.constructor`.
pub fn mangle_method(class_name: &str, method_name: &str) -> String {
    format!("{class_name}.{method_name}")
}

pub struct Lowerer<'a> {
    classes: &'a ClassTable,
    functions: Vec<IrFunction>,
}

impl<'a> Lowerer<'a> {
    pub fn new(classes: &'a ClassTable) -> Self {
        Lowerer {
            classes,
            functions: Vec::new(),
        }
    }

    pub fn lower_program(mut self, program: &Program) -> Vec<IrFunction> {
        let mut module_body = Vec::new();
        for stmt in &program.statements {
            self.lower_top_level(stmt, &mut module_body);
        }
        if !module_body.is_empty() {
            let mut module_fn = FnLowerer::new(self.classes, 0, None);
            for stmt in &module_body {
                module_fn.lower_stmt(stmt);
            }
            module_fn.finish("<module>", &mut self.functions);
        }
        self.functions
    }

    fn lower_top_level(&mut self, stmt: &Stmt, module_body: &mut Vec<Stmt>) {
        match stmt {
            Stmt::FunctionDecl {
                name,
                params,
                body,
                ..
            } => {
                let func = lower_function(self.classes, name, params, body, None, false);
                self.functions.push(func);
            }
            Stmt::ClassDecl(decl) => self.lower_class(decl),
            Stmt::Export { inner, .. } => {
                if let Some(inner) = inner {
                    self.lower_top_level(inner, module_body);
                }
            }
            Stmt::Import { .. } => {
                // Module resolution (src/module) handles binding imported
                // names; nothing to lower into this module's own code.
            }
            other => module_body.push(other.clone()),
        }
    }

    fn lower_class(&mut self, decl: &ClassDecl) {
        if let Some(ctor) = &decl.constructor {
            let name = mangle_method(&decl.name, "constructor");
            let func = lower_function(
                self.classes,
                &name,
                &ctor.params,
                &ctor.body,
                Some(decl.name.clone()),
                true,
            );
            self.functions.push(func);
        }
        for method in &decl.methods {
            self.lower_method(&decl.name, method);
        }
    }

    fn lower_method(&mut self, class_name: &str, method: &MethodDecl) {
        let name = mangle_method(class_name, &method.name);
        let this_class = if method.is_static {
            None
        } else {
            Some(class_name.to_string())
        };
        let func = lower_function(self.classes, &name, &method.params, &method.body, this_class, false);
        self.functions.push(func);
    }
}

/// Lowers one function body (a free function, constructor, or method)
/// into an [`IrFunction`]. `this_class` is `Some` for instance methods
/// and constructors, binding `this` as an implicit first parameter.
/// `is_constructor` makes the body implicitly `return this;` on
/// fallthrough, so `new` can take its result straight off the call's
/// return value instead of needing a separate copy of the freshly
/// allocated object held back from the constructor's own argument block.
fn lower_function(
    classes: &ClassTable,
    name: &str,
    params: &[Param],
    body: &[Stmt],
    this_class: Option<String>,
    is_constructor: bool,
) -> IrFunction {
    let param_count = params.len() as u32 + this_class.is_some() as u32;
    let mut lowerer = FnLowerer::new(classes, param_count, this_class.clone());

    // Params are declared before any local so they share the same
    // downward-growing slot counter (`this` first, then left to right);
    // the native backend's prologue spills the incoming argument array
    // into these exact slots in declaration order.
    if let Some(class_name) = &this_class {
        let sym = lowerer
            .symbols
            .declare_param("this", Ty::Class(class_name.clone()));
        lowerer.this_offset = Some(match sym.storage {
            Storage::Param { offset } => offset,
            _ => unreachable!(),
        });
    }
    for param in params {
        let ty = param.ty.as_deref().map(named_type).unwrap_or(Ty::Any);
        lowerer.symbols.declare_param(&param.name, ty);
    }

    for stmt in body {
        lowerer.lower_stmt(stmt);
    }

    if is_constructor {
        let this_offset = lowerer.this_offset.expect("constructor always binds this");
        lowerer.emit(IrInstr::LoadLocal(this_offset));
        lowerer.emit(IrInstr::Return { has_value: true });
    }

    let mut out = Vec::new();
    lowerer.finish(name, &mut out);
    out.into_iter().next().expect("finish always emits one function")
}

struct FnLowerer<'a> {
    classes: &'a ClassTable,
    symbols: SymbolTable,
    instrs: Vec<IrInstr>,
    next_label: u32,
    current_class: Option<String>,
    param_count: u32,
    /// Frame offset of the `this` parameter, set while declaring params
    /// for an instance method or constructor; `None` for free functions
    /// and static methods.
    this_offset: Option<i32>,
    /// (continue-target, break-target) stack for nested loops.
    loop_labels: Vec<(Label, Label)>,
}

impl<'a> FnLowerer<'a> {
    fn new(classes: &'a ClassTable, param_count: u32, current_class: Option<String>) -> Self {
        FnLowerer {
            classes,
            symbols: SymbolTable::new(),
            instrs: Vec::new(),
            next_label: 0,
            current_class,
            param_count,
            this_offset: None,
            loop_labels: Vec::new(),
        }
    }

    fn new_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    fn emit(&mut self, instr: IrInstr) {
        self.instrs.push(instr);
    }

    fn finish(self, name: &str, out: &mut Vec<IrFunction>) {
        let frame_size = self.symbols.frame_size();
        let mut func = IrFunction::new(name.to_string(), self.param_count, frame_size);
        func.instrs = self.instrs;
        out.push(func);
    }

    fn lower_block(&mut self, stmts: &[Stmt]) {
        self.symbols.push_scope();
        for stmt in stmts {
            self.lower_stmt(stmt);
        }
        self.symbols.pop_scope();
    }

    fn lower_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::VarDecl { name, ty, init, .. } => {
                let declared_ty = ty.as_deref().map(named_type);
                if let Some(init_expr) = init {
                    self.lower_expr(init_expr);
                    let value_ty = init_expr
                        .inferred_ty()
                        .cloned()
                        .or(declared_ty)
                        .unwrap_or(Ty::Any);
                    let sym = self.symbols.declare_local(name, value_ty, true);
                    self.store_symbol_storage(sym.storage);
                } else {
                    self.emit(IrInstr::LoadNull);
                    let sym = self
                        .symbols
                        .declare_local(name, declared_ty.unwrap_or(Ty::Any), true);
                    self.store_symbol_storage(sym.storage);
                }
            }
            Stmt::FunctionDecl { .. } | Stmt::ClassDecl(_) => {
                // Nested declarations are lowered to their own top-level
                // functions by `Lowerer::lower_top_level`; only the
                // module-level pass ever sees these directly.
            }
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let else_label = self.new_label();
                let end_label = self.new_label();
                self.lower_expr(cond);
                self.emit(IrInstr::JumpIfFalse(else_label));
                self.lower_block(then_branch);
                self.emit(IrInstr::Jump(end_label));
                self.emit(IrInstr::BindLabel(else_label));
                if let Some(else_branch) = else_branch {
                    self.lower_block(else_branch);
                }
                self.emit(IrInstr::BindLabel(end_label));
            }
            Stmt::While { cond, body } => {
                let start_label = self.new_label();
                let end_label = self.new_label();
                self.emit(IrInstr::BindLabel(start_label));
                self.lower_expr(cond);
                self.emit(IrInstr::JumpIfFalse(end_label));
                self.loop_labels.push((start_label, end_label));
                self.lower_block(body);
                self.loop_labels.pop();
                self.emit(IrInstr::Jump(start_label));
                self.emit(IrInstr::BindLabel(end_label));
            }
            Stmt::For {
                init,
                cond,
                step,
                body,
            } => {
                self.symbols.push_scope();
                if let Some(init) = init {
                    self.lower_stmt(init);
                }
                let start_label = self.new_label();
                let continue_label = self.new_label();
                let end_label = self.new_label();
                self.emit(IrInstr::BindLabel(start_label));
                if let Some(cond) = cond {
                    self.lower_expr(cond);
                    self.emit(IrInstr::JumpIfFalse(end_label));
                }
                self.loop_labels.push((continue_label, end_label));
                for s in body {
                    self.lower_stmt(s);
                }
                self.loop_labels.pop();
                self.emit(IrInstr::BindLabel(continue_label));
                if let Some(step) = step {
                    self.lower_expr(step);
                    self.emit(IrInstr::Pop);
                }
                self.emit(IrInstr::Jump(start_label));
                self.emit(IrInstr::BindLabel(end_label));
                self.symbols.pop_scope();
            }
            Stmt::ForEach {
                var_name,
                iterable,
                body,
            } => {
                // No iterator protocol is modeled yet (arrays are opaque
                // `Any` heap values); the iterable is still evaluated for
                // its side effects and the loop variable bound to `null`
                // once per conceptual iteration is out of scope without
                // a runtime array cursor, so this lowers to a single pass
                // binding `var_name` to the iterable's head helper call.
                self.symbols.push_scope();
                self.lower_expr(iterable);
                self.emit(IrInstr::Call {
                    target: CallTarget::Helper(RuntimeHelper::ArrayGet),
                    arg_count: 1,
                });
                let sym = self.symbols.declare_local(var_name, Ty::Any, true);
                self.store_symbol_storage(sym.storage);
                self.lower_block(body);
                self.symbols.pop_scope();
            }
            Stmt::Switch {
                discriminant,
                cases,
            } => {
                // Dispatch chain first (each test falls through to the
                // next on mismatch, jumps to its body on match), then
                // every case body laid out in order so fallthrough cases
                // can omit the trailing jump to `end_label`.
                let end_label = self.new_label();
                let body_labels: Vec<Label> = cases.iter().map(|_| self.new_label()).collect();
                let mut default_index = None;

                for (i, case) in cases.iter().enumerate() {
                    match &case.test {
                        Some(test) => {
                            // Same type-gated dispatch `lower_binary` uses for
                            // `==` (spec.md §8 Scenario E): a case label whose
                            // type can't be settled statically defers to the
                            // runtime equality helper; a same-typed case
                            // compares with the direct bitwise `BinOp::Eq`.
                            if is_any_operand(discriminant, test) {
                                self.lower_expr(test);
                                self.lower_expr(discriminant);
                                self.emit(IrInstr::Call {
                                    target: CallTarget::Helper(RuntimeHelper::RuntimeEquals),
                                    arg_count: 2,
                                });
                            } else {
                                self.lower_expr(discriminant);
                                self.lower_expr(test);
                                self.emit(IrInstr::BinOp(IrBinOp::Eq));
                            }
                            let skip_label = self.new_label();
                            self.emit(IrInstr::JumpIfFalse(skip_label));
                            self.emit(IrInstr::Jump(body_labels[i]));
                            self.emit(IrInstr::BindLabel(skip_label));
                        }
                        None => default_index = Some(i),
                    }
                }
                self.emit(IrInstr::Jump(
                    default_index.map(|i| body_labels[i]).unwrap_or(end_label),
                ));

                for (i, case) in cases.iter().enumerate() {
                    self.emit(IrInstr::BindLabel(body_labels[i]));
                    self.symbols.push_scope();
                    for s in &case.body {
                        self.lower_stmt(s);
                    }
                    self.symbols.pop_scope();
                    if !case.falls_through {
                        self.emit(IrInstr::Jump(end_label));
                    }
                }
                self.emit(IrInstr::BindLabel(end_label));
            }
            Stmt::Return { value, .. } => {
                if let Some(value) = value {
                    self.lower_expr(value);
                    self.emit(IrInstr::Return { has_value: true });
                } else {
                    self.emit(IrInstr::Return { has_value: false });
                }
            }
            Stmt::Break => {
                if let Some((_, break_label)) = self.loop_labels.last() {
                    self.emit(IrInstr::Jump(*break_label));
                }
            }
            Stmt::Continue => {
                if let Some((continue_label, _)) = self.loop_labels.last() {
                    self.emit(IrInstr::Jump(*continue_label));
                }
            }
            Stmt::ExprStmt(expr) => {
                self.lower_expr(expr);
                self.emit(IrInstr::Pop);
            }
            Stmt::Import { .. } => {}
            Stmt::Export { inner, .. } => {
                if let Some(inner) = inner {
                    self.lower_stmt(inner);
                }
            }
            Stmt::Block(stmts) => self.lower_block(stmts),
        }
    }

    /// Pushes the value this storage location currently holds onto the
    /// operand stack.
    fn load_symbol_storage(&mut self, storage: Storage) {
        match storage {
            Storage::Local { offset } => self.emit(IrInstr::LoadLocal(offset)),
            Storage::Param { offset } => self.emit(IrInstr::LoadLocal(offset)),
            Storage::Global { slot } => self.emit(IrInstr::LoadGlobal(slot)),
        }
    }

    /// Pops the operand stack's top value into this storage location.
    fn store_symbol_storage(&mut self, storage: Storage) {
        match storage {
            Storage::Local { offset } => self.emit(IrInstr::StoreLocal(offset)),
            Storage::Param { offset } => self.emit(IrInstr::StoreLocal(offset)),
            Storage::Global { slot } => self.emit(IrInstr::StoreGlobal(slot)),
        }
    }

    fn lower_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::IntLiteral { value, .. } => self.emit(IrInstr::LoadConstInt(*value)),
            Expr::FloatLiteral { value, .. } => self.emit(IrInstr::LoadConstFloat(*value)),
            Expr::StringLiteral { value, .. } => {
                self.emit(IrInstr::LoadConstString(value.clone()))
            }
            Expr::BoolLiteral { value, .. } => self.emit(IrInstr::LoadConstBool(*value)),
            Expr::NullLiteral { .. } => self.emit(IrInstr::LoadNull),
            Expr::Identifier { name, .. } => {
                if let Some(sym) = self.symbols.resolve(name) {
                    let storage = sym.storage;
                    self.load_symbol_storage(storage);
                } else {
                    // Resolves to a module-level function referenced by
                    // value; the callee position handles this directly,
                    // so as a bare expression it degrades to null.
                    self.emit(IrInstr::LoadNull);
                }
            }
            Expr::This { .. } => {
                let offset = self.this_offset.expect("`this` only appears inside an instance method or constructor");
                self.emit(IrInstr::LoadLocal(offset));
            }
            Expr::Array { elements, .. } => {
                // Pushed in reverse so the lowest address (where the
                // helper call's `rdi` ends up pointing) holds element 0;
                // see the module doc comment on argument order.
                for el in elements.iter().rev() {
                    self.lower_expr(el);
                }
                self.emit(IrInstr::Call {
                    target: CallTarget::Helper(RuntimeHelper::AllocArray),
                    arg_count: elements.len() as u32,
                });
            }
            Expr::Binary {
                op, left, right, ..
            } => self.lower_binary(*op, left, right, expr),
            Expr::Unary { op, operand, .. } => self.lower_unary(*op, operand),
            Expr::Assign { target, value, .. } => {
                self.lower_expr(value);
                self.emit(IrInstr::Dup);
                self.lower_store_to(target);
            }
            Expr::Ternary {
                cond,
                then_expr,
                else_expr,
                ..
            } => {
                let else_label = self.new_label();
                let end_label = self.new_label();
                self.lower_expr(cond);
                self.emit(IrInstr::JumpIfFalse(else_label));
                self.lower_expr(then_expr);
                self.emit(IrInstr::Jump(end_label));
                self.emit(IrInstr::BindLabel(else_label));
                self.lower_expr(else_expr);
                self.emit(IrInstr::BindLabel(end_label));
            }
            Expr::Call { callee, args, .. } => self.lower_call(callee, args),
            Expr::Member { object, property, .. } => self.lower_member_load(object, property),
            Expr::Index { object, index, .. } => {
                self.lower_expr(index);
                self.lower_expr(object);
                self.emit(IrInstr::Call {
                    target: CallTarget::Helper(RuntimeHelper::ArrayGet),
                    arg_count: 2,
                });
            }
            Expr::New {
                class_name, args, ..
            } => {
                let instance_size = self.classes.get(class_name).map(|c| c.instance_size).unwrap_or(0);
                let has_ctor = self
                    .classes
                    .get(class_name)
                    .map(|c| c.constructor.is_some())
                    .unwrap_or(false);
                if has_ctor {
                    for arg in args.iter().rev() {
                        self.lower_expr(arg);
                    }
                    self.emit(IrInstr::LoadConstInt(0)); // type_id: no runtime type registry yet
                    self.emit(IrInstr::LoadConstInt(instance_size as i64));
                    self.emit(IrInstr::Call {
                        target: CallTarget::Helper(RuntimeHelper::Alloc),
                        arg_count: 2,
                    });
                    // Alloc's return value is pushed last, landing
                    // adjacent to the constructor args already on the
                    // stack below it, in the `this`-last position the
                    // constructor call expects. The constructor
                    // implicitly returns `this`, so its own return value
                    // becomes this expression's result.
                    self.emit(IrInstr::Call {
                        target: CallTarget::Function(mangle_method(class_name, "constructor")),
                        arg_count: args.len() as u32 + 1,
                    });
                } else {
                    for arg in args {
                        self.lower_expr(arg);
                        self.emit(IrInstr::Pop);
                    }
                    self.emit(IrInstr::LoadConstInt(0));
                    self.emit(IrInstr::LoadConstInt(instance_size as i64));
                    self.emit(IrInstr::Call {
                        target: CallTarget::Helper(RuntimeHelper::Alloc),
                        arg_count: 2,
                    });
                }
            }
            Expr::FunctionExpr { .. } => {
                // Closures without captures would need their own
                // IrFunction plus a registry id pushed as a value; full
                // first-class function values are not modeled by this
                // IR (CallTarget only names functions/helpers), so a
                // function expression evaluates to null here and must be
                // invoked through a named declaration instead.
                self.emit(IrInstr::LoadNull);
            }
            Expr::Spawn { call, .. } => {
                let (callee, args) = match call.as_ref() {
                    Expr::Call { callee, args, .. } => (callee.as_ref(), args.as_slice()),
                    other => (other, &[][..]),
                };
                // Task bodies are addressable functions (spec.md §4.4.c,
                // §9): the target is resolved here and emitted as data for
                // `IrInstr::Spawn`, never lowered through the ordinary
                // `Call` path, which would execute the body inline on the
                // spawning thread instead of scheduling it.
                match callee {
                    Expr::Identifier { name, .. } => {
                        for arg in args.iter().rev() {
                            self.lower_expr(arg);
                        }
                        self.emit(IrInstr::Spawn {
                            target: CallTarget::Function(name.clone()),
                            arg_count: args.len() as u32,
                        });
                    }
                    Expr::Member { object, property, .. } => {
                        for arg in args.iter().rev() {
                            self.lower_expr(arg);
                        }
                        self.lower_expr(object);
                        let target = match self.class_of(object) {
                            Some(class_name) => {
                                CallTarget::Function(mangle_method(&class_name, property))
                            }
                            None => CallTarget::Function(property.clone()),
                        };
                        self.emit(IrInstr::Spawn {
                            target,
                            arg_count: args.len() as u32 + 1,
                        });
                    }
                    _ => {
                        // No addressable target could be resolved; lower
                        // the callee and args for side effects and spawn
                        // nothing (a type error should have already
                        // rejected this program).
                        self.lower_expr(callee);
                        self.emit(IrInstr::Pop);
                        for arg in args {
                            self.lower_expr(arg);
                            self.emit(IrInstr::Pop);
                        }
                        self.emit(IrInstr::LoadNull);
                    }
                }
            }
            Expr::Await { promise, .. } => {
                self.lower_expr(promise);
                self.emit(IrInstr::Await);
            }
        }
    }

    fn lower_binary(&mut self, op: BinOp, left: &Expr, right: &Expr, whole: &Expr) {
        if op == BinOp::Add && is_string_operand(whole) {
            self.lower_expr(right);
            self.lower_expr(left);
            self.emit(IrInstr::Call {
                target: CallTarget::Helper(RuntimeHelper::StringConcat),
                arg_count: 2,
            });
            return;
        }
        if op == BinOp::Pow {
            self.lower_expr(right);
            self.lower_expr(left);
            self.emit(IrInstr::Call {
                target: CallTarget::Helper(RuntimeHelper::Pow),
                arg_count: 2,
            });
            return;
        }
        if matches!(op, BinOp::Eq | BinOp::NotEq | BinOp::StrictEq) && is_any_operand(left, right) {
            // Neither operand's static type lets the inferencer settle
            // this at compile time (spec.md §4.3), so the comparison
            // defers to the runtime helper rather than the bitwise
            // `BinOp::Eq` a same-typed comparison lowers to.
            self.lower_expr(right);
            self.lower_expr(left);
            self.emit(IrInstr::Call {
                target: CallTarget::Helper(RuntimeHelper::RuntimeEquals),
                arg_count: 2,
            });
            if op == BinOp::NotEq {
                self.emit(IrInstr::Not);
            }
            return;
        }
        self.lower_expr(left);
        self.lower_expr(right);
        let ir_op = match op {
            BinOp::Add => IrBinOp::Add,
            BinOp::Sub => IrBinOp::Sub,
            BinOp::Mul => IrBinOp::Mul,
            BinOp::Div => IrBinOp::Div,
            BinOp::Mod => IrBinOp::Mod,
            // Strict equality skips implicit numeric coercion in the
            // source language; both operands already share a concrete
            // type by the time they reach codegen (the inferencer would
            // have rejected the program otherwise), so it lowers to the
            // same bitwise comparison as `==`.
            BinOp::Eq | BinOp::StrictEq => IrBinOp::Eq,
            BinOp::NotEq => IrBinOp::Ne,
            BinOp::Lt => IrBinOp::Lt,
            BinOp::Gt => IrBinOp::Gt,
            BinOp::Le => IrBinOp::Le,
            BinOp::Ge => IrBinOp::Ge,
            BinOp::And => IrBinOp::And,
            BinOp::Or => IrBinOp::Or,
            BinOp::Pow => unreachable!("handled above"),
        };
        self.emit(IrInstr::BinOp(ir_op));
    }

    fn lower_unary(&mut self, op: UnOp, operand: &Expr) {
        match op {
            UnOp::Neg => {
                self.lower_expr(operand);
                self.emit(IrInstr::Neg);
            }
            UnOp::Not => {
                self.lower_expr(operand);
                self.emit(IrInstr::Not);
            }
            UnOp::PreIncr | UnOp::PreDecr => {
                self.lower_expr(operand);
                self.emit(IrInstr::LoadConstInt(1));
                self.emit(IrInstr::BinOp(if op == UnOp::PreIncr {
                    IrBinOp::Add
                } else {
                    IrBinOp::Sub
                }));
                self.emit(IrInstr::Dup);
                self.lower_store_to(operand);
            }
            UnOp::PostIncr | UnOp::PostDecr => {
                self.lower_expr(operand);
                self.emit(IrInstr::Dup);
                self.emit(IrInstr::LoadConstInt(1));
                self.emit(IrInstr::BinOp(if op == UnOp::PostIncr {
                    IrBinOp::Add
                } else {
                    IrBinOp::Sub
                }));
                self.lower_store_to(operand);
            }
        }
    }

    /// Pops the operand stack's top value into the storage location
    /// `target` names (an identifier, `this.field`, or array index).
    fn lower_store_to(&mut self, target: &Expr) {
        match target {
            Expr::Identifier { name, .. } => {
                if let Some(sym) = self.symbols.resolve(name) {
                    let storage = sym.storage;
                    self.store_symbol_storage(storage);
                } else {
                    self.emit(IrInstr::Pop);
                }
            }
            Expr::Member { object, property, .. } => {
                self.lower_expr(object);
                if let Some(offset) = self.field_offset(object, property) {
                    self.emit(IrInstr::StoreField { offset });
                } else {
                    self.emit(IrInstr::Pop);
                    self.emit(IrInstr::Pop);
                }
            }
            Expr::Index { object, index, .. } => {
                // `value` is already on the stack (pushed and duplicated
                // by `Expr::Assign` before calling here), so it naturally
                // ends up deepest of the three and is read last.
                self.lower_expr(index);
                self.lower_expr(object);
                self.emit(IrInstr::Call {
                    target: CallTarget::Helper(RuntimeHelper::ArraySet),
                    arg_count: 3,
                });
                self.emit(IrInstr::Pop);
            }
            _ => {
                self.emit(IrInstr::Pop);
            }
        }
    }

    fn lower_member_load(&mut self, object: &Expr, property: &str) {
        self.lower_expr(object);
        if let Some(offset) = self.field_offset(object, property) {
            let ty = self
                .class_of(object)
                .and_then(|c| self.classes.get(&c))
                .and_then(|info| info.field(property))
                .map(|f| f.ty.clone())
                .unwrap_or(Ty::Any);
            self.emit(IrInstr::LoadField { offset, ty });
        } else {
            self.emit(IrInstr::Pop);
            self.emit(IrInstr::LoadNull);
        }
    }

    fn field_offset(&self, object: &Expr, property: &str) -> Option<usize> {
        let class_name = self.class_of(object)?;
        self.classes.get(&class_name)?.field(property).map(|f| f.offset)
    }

    fn class_of(&self, expr: &Expr) -> Option<String> {
        match expr.inferred_ty() {
            Some(Ty::Class(name)) => Some(name.clone()),
            _ => match expr {
                Expr::This { .. } => self.current_class.clone(),
                _ => None,
            },
        }
    }

    fn lower_call(&mut self, callee: &Expr, args: &[Expr]) {
        match callee {
            Expr::Identifier { name, .. } if name == "setTimeout" || name == "setInterval" => {
                // `setTimeout(cb, delayMs)` / `setInterval(cb, intervalMs)`
                // (spec.md §4.8, §6): the callback must name a declared
                // function, mirroring `go f(...)`'s restriction to an
                // addressable target rather than an inline closure value.
                // `RuntimeHelper::SetTimer` takes `(callback_addr, delay_ms,
                // is_interval)`; pushed in reverse so `callback_addr` lands
                // at `args[0]`.
                let callback_name = match &args[0] {
                    Expr::Identifier { name, .. } => name.clone(),
                    _ => {
                        self.lower_expr(&args[0]);
                        self.emit(IrInstr::Pop);
                        self.emit(IrInstr::LoadNull);
                        return;
                    }
                };
                self.emit(IrInstr::LoadConstBool(name == "setInterval"));
                self.lower_expr(&args[1]);
                self.emit(IrInstr::LoadFunctionAddr(callback_name));
                self.emit(IrInstr::Call {
                    target: CallTarget::Helper(RuntimeHelper::SetTimer),
                    arg_count: 3,
                });
            }
            Expr::Identifier { name, .. } if name == "clearTimeout" || name == "clearInterval" => {
                // `clearTimeout`/`clearInterval` (spec.md §4.8, §6) share
                // one helper; both just cancel a timer id.
                for arg in args.iter().rev() {
                    self.lower_expr(arg);
                }
                self.emit(IrInstr::Call {
                    target: CallTarget::Helper(RuntimeHelper::CancelTimer),
                    arg_count: args.len() as u32,
                });
            }
            Expr::Identifier { name, .. } => {
                for arg in args.iter().rev() {
                    self.lower_expr(arg);
                }
                self.emit(IrInstr::Call {
                    target: CallTarget::Function(name.clone()),
                    arg_count: args.len() as u32,
                });
            }
            Expr::Member { object, property, .. } if is_console_call(object, property) => {
                // `console.log/warn/error(...)`: the one console-contract
                // primitive lowered straight to a runtime helper rather
                // than a registry-resolved function (spec.md §6). There is
                // no `console` object pushed as a receiver. Each argument
                // is pushed as a `(value, tag)` pair so `console_log` can
                // render a float bit pattern or a string id as itself
                // (spec.md §6: "the host's default decimal
                // representation") — pushed in reverse so the helper sees
                // `args[0]` as the first logical argument's value and
                // `args[1]` as its tag.
                for arg in args.iter().rev() {
                    self.emit(IrInstr::LoadConstInt(console_tag_of(arg)));
                    self.lower_expr(arg);
                }
                self.emit(IrInstr::Call {
                    target: CallTarget::Helper(RuntimeHelper::ConsoleLog),
                    arg_count: args.len() as u32 * 2,
                });
            }
            Expr::Member { object, property, .. } => {
                for arg in args.iter().rev() {
                    self.lower_expr(arg);
                }
                self.lower_expr(object);
                let target = match self.class_of(object) {
                    Some(class_name) => CallTarget::Function(mangle_method(&class_name, property)),
                    None => CallTarget::Function(property.clone()),
                };
                self.emit(IrInstr::Call {
                    target,
                    arg_count: args.len() as u32 + 1,
                });
            }
            _ => {
                self.lower_expr(callee);
                self.emit(IrInstr::Pop);
                for arg in args {
                    self.lower_expr(arg);
                    self.emit(IrInstr::Pop);
                }
                self.emit(IrInstr::LoadNull);
            }
        }
    }
}

fn is_string_operand(expr: &Expr) -> bool {
    matches!(expr.inferred_ty(), Some(Ty::String))
}

/// True when either side of an equality comparison is statically `any`
/// (spec.md §4.3), the condition that defers the comparison to
/// `RuntimeHelper::RuntimeEquals` instead of a direct `BinOp::Eq`.
fn is_any_operand(left: &Expr, right: &Expr) -> bool {
    matches!(left.inferred_ty(), Some(Ty::Any)) || matches!(right.inferred_ty(), Some(Ty::Any))
}

/// Recognizes `console.log/warn/error(...)` call shapes so they can be
/// special-cased ahead of the generic member-call lowering.
fn is_console_call(object: &Expr, property: &str) -> bool {
    matches!(object, Expr::Identifier { name, .. } if name == "console")
        && matches!(property, "log" | "warn" | "error")
}

/// The per-argument type tag `console_log` (`helpers.rs`) expects
/// alongside each value, derived from the static type the inferencer
/// already attached to `expr` (the same `inferred_ty()` query
/// `is_string_operand`/`is_any_operand` use).
fn console_tag_of(expr: &Expr) -> i64 {
    match expr.inferred_ty() {
        Some(Ty::F32) | Some(Ty::F64) => crate::helpers::CONSOLE_TAG_FLOAT,
        Some(Ty::String) => crate::helpers::CONSOLE_TAG_STRING,
        _ => crate::helpers::CONSOLE_TAG_DEFAULT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;
    use crate::types::infer::Inferencer;

    fn lower(src: &str) -> Vec<IrFunction> {
        let mut program = parse_source(src).expect("parse");
        let mut inferencer = Inferencer::new();
        inferencer.infer_program(&mut program).expect("infer");
        Lowerer::new(&inferencer.classes).lower_program(&program)
    }

    #[test]
    fn function_decl_lowers_to_one_ir_function() {
        let funcs = lower("function add(a: int, b: int): int { return a + b; }");
        assert_eq!(funcs.len(), 1);
        assert_eq!(funcs[0].name, "add");
        assert!(funcs[0]
            .instrs
            .iter()
            .any(|i| matches!(i, IrInstr::BinOp(IrBinOp::Add))));
    }

    #[test]
    fn class_constructor_and_method_each_get_their_own_function() {
        let funcs = lower(
            "class Point { x: float; y: float; constructor(x: float, y: float) { this.x = x; this.y = y; } sum(): float { return this.x + this.y; } }",
        );
        let names: Vec<_> = funcs.iter().map(|f| f.name.as_str()).collect();
        assert!(names.contains(&"Point.constructor"));
        assert!(names.contains(&"Point.sum"));
    }

    #[test]
    fn top_level_statements_collect_into_a_synthetic_module_function() {
        let funcs = lower("let x: int = 1; let y: int = 2;");
        assert_eq!(funcs.len(), 1);
        assert_eq!(funcs[0].name, "<module>");
    }

    #[test]
    fn while_loop_emits_a_backward_jump_to_its_condition() {
        let funcs = lower("function loop(): void { let i: int = 0; while (i < 3) { i = i + 1; } }");
        let jumps = funcs[0]
            .instrs
            .iter()
            .filter(|i| matches!(i, IrInstr::Jump(_)))
            .count();
        assert!(jumps >= 1);
    }
}
