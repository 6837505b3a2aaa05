//! Scenario A (spec.md §8): a recursive `fib` call compiled through the
//! full front end (lex -> parse -> infer -> lower), the native backend,
//! then actually mapped executable and invoked — `fib(5)` must return
//! `5`, not just compile.

use gots_engine::class::ClassTable;
use gots_engine::compiler::codegen::lower::Lowerer;
use gots_engine::compiler::codegen::native::NativeX86Backend;
use gots_engine::compiler::codegen::stack::StackBackend;
use gots_engine::compiler::codegen::{CodegenBackend, RelocationTarget};
use gots_engine::parser::parse_source;
use gots_engine::pipeline::{self, EngineOptions};
use gots_engine::types::infer::Inferencer;

const SOURCE: &str = r#"
function fib(n: int64): int64 {
    if (n <= 1) {
        return n;
    }
    return fib(n - 1) + fib(n - 2);
}
console.log(fib(5));
"#;

#[test]
fn fib_five_runs_through_the_native_backend_end_to_end() {
    pipeline::compile_and_install(SOURCE, EngineOptions::default()).expect("compiles and loads");
    let result = pipeline::call_function("fib", &[5]).expect("fib is registered");
    assert_eq!(result, 5, "fib(5) == 5, the scenario's literal expectation");
}

#[test]
fn fib_five_compiles_through_the_native_backend_with_a_self_call() {
    let mut program = parse_source(SOURCE).unwrap();
    let mut inferencer = Inferencer::new();
    inferencer.infer_program(&mut program).unwrap();
    let classes: ClassTable = inferencer.classes;

    let functions = Lowerer::new(&classes).lower_program(&program);
    let fib = functions.iter().find(|f| f.name == "fib").expect("fib lowered");

    let backend = NativeX86Backend::new();
    let compiled = backend.compile_function(fib).unwrap();

    let self_calls = compiled
        .relocations
        .iter()
        .filter(|r| matches!(&r.target, RelocationTarget::Function(name) if name == "fib"))
        .count();
    assert_eq!(self_calls, 2, "fib(n-1) + fib(n-2) is two self-calls");
}

#[test]
fn fib_five_also_compiles_through_the_stack_machine_backend() {
    let mut program = parse_source(SOURCE).unwrap();
    let mut inferencer = Inferencer::new();
    inferencer.infer_program(&mut program).unwrap();
    let classes: ClassTable = inferencer.classes;

    let functions = Lowerer::new(&classes).lower_program(&program);
    let fib = functions.iter().find(|f| f.name == "fib").expect("fib lowered");

    let backend = StackBackend::new();
    let compiled = backend.compile_function(fib).unwrap();
    assert!(!compiled.code.is_empty());
}
