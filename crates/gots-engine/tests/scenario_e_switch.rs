//! Scenario E (spec.md §8): two switches with identical cases, one
//! keyed on a typed `int64` discriminant and one on an `any`-typed
//! value. The first two tests check at the lowering level that only
//! the `any`-typed switch calls the runtime equality helper, with the
//! typed form staying on the direct `IrBinOp::Eq` comparison; the third
//! actually runs both forms through the JIT and confirms they choose
//! identical branches for identical inputs.

use gots_engine::compiler::codegen::lower::Lowerer;
use gots_engine::compiler::codegen::RuntimeHelper;
use gots_engine::compiler::ir::{CallTarget, IrBinOp, IrInstr};
use gots_engine::parser::parse_source;
use gots_engine::pipeline::{self, EngineOptions};
use gots_engine::types::infer::Inferencer;

fn lower(src: &str) -> Vec<gots_engine::compiler::ir::IrFunction> {
    let mut program = parse_source(src).expect("parse");
    let mut inferencer = Inferencer::new();
    inferencer.infer_program(&mut program).expect("infer");
    Lowerer::new(&inferencer.classes).lower_program(&program)
}

fn calls_runtime_equals(func: &gots_engine::compiler::ir::IrFunction) -> bool {
    func.instrs.iter().any(|i| {
        matches!(
            i,
            IrInstr::Call {
                target: CallTarget::Helper(RuntimeHelper::RuntimeEquals),
                ..
            }
        )
    })
}

fn direct_eq_count(func: &gots_engine::compiler::ir::IrFunction) -> usize {
    func.instrs
        .iter()
        .filter(|i| matches!(i, IrInstr::BinOp(IrBinOp::Eq)))
        .count()
}

#[test]
fn a_typed_int_switch_never_calls_the_runtime_equality_helper() {
    let funcs = lower(
        r#"
        function pick(n: int64): int64 {
            switch (n) {
                case 1: return 10;
                case 2: return 20;
                default: return 0;
            }
        }
        "#,
    );
    let pick = &funcs[0];
    assert!(!calls_runtime_equals(pick), "typed discriminant must stay on the direct compare");
    assert_eq!(direct_eq_count(pick), 2, "one comparison per case label");
}

#[test]
fn an_any_typed_switch_defers_each_case_test_to_the_runtime_helper() {
    let funcs = lower(
        r#"
        function pick(n) {
            switch (n) {
                case 1: return 10;
                case "two": return 20;
                default: return 0;
            }
        }
        "#,
    );
    let pick = &funcs[0];
    assert!(calls_runtime_equals(pick), "an `any` discriminant must defer to the runtime helper");
    assert_eq!(direct_eq_count(pick), 0, "no raw compare once either side is `any`");
}

#[test]
fn class_instance_field_equality_also_stays_on_the_direct_path() {
    // `===` between two same-typed (non-`any`) operands is the "same
    // static type" branch of spec.md §4.3's equality rule, not the
    // `any` one, regardless of operator spelling.
    let funcs = lower("function same(a: int64, b: int64): bool { return a === b; }");
    let same = funcs.iter().find(|f| f.name == "same").unwrap();
    assert!(!calls_runtime_equals(same));
}

#[test]
fn typed_and_any_switches_choose_the_same_branch_for_the_same_input() {
    let source = r#"
    function pickTyped(n: int64): int64 {
        switch (n) {
            case 1: return 10;
            case 2: return 20;
            default: return 0;
        }
    }
    function pickAny(n) {
        switch (n) {
            case 1: return 10;
            case 2: return 20;
            default: return 0;
        }
    }
    "#;
    pipeline::compile_and_install(source, EngineOptions::default()).expect("compiles and loads");
    for n in [1i64, 2, 7] {
        let typed = pipeline::call_function("pickTyped", &[n]).expect("pickTyped registered");
        let any = pipeline::call_function("pickAny", &[n]).expect("pickAny registered");
        assert_eq!(typed, any, "typed and any dispatch must agree for n={n}");
    }
}
