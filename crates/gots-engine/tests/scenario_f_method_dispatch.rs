//! Scenario F (spec.md §8): `class C{ v:int64; constructor(x:int64){this.v=x;}
//! get(){return this.v;}} new C(42).get()` prints `42`. The first three
//! tests check class layout and lowering structurally: the instance has
//! a single field `v` at offset 0, `new` emits exactly one call into
//! `C.constructor`, and the chained `.get()` mangles to the class's own
//! method rather than a bare top-level function named `get`. The last
//! test actually runs `new C(42).get()` through the JIT and checks the
//! returned `42` — the scenario this whole file is named for, and the
//! direct regression check for the allocation argument order `new`'s
//! lowering depends on.

use gots_engine::compiler::codegen::lower::Lowerer;
use gots_engine::compiler::ir::{CallTarget, IrInstr};
use gots_engine::parser::parse_source;
use gots_engine::pipeline::{self, EngineOptions};
use gots_engine::types::infer::Inferencer;

const SOURCE: &str = r#"
class C {
    v: int64;
    constructor(x: int64) {
        this.v = x;
    }
    get(): int64 {
        return this.v;
    }
}
console.log(new C(42).get());
"#;

#[test]
fn instance_layout_has_one_field_at_offset_zero() {
    let mut program = parse_source(SOURCE).unwrap();
    let mut inferencer = Inferencer::new();
    inferencer.infer_program(&mut program).unwrap();
    let class = inferencer.classes.get("C").unwrap();
    assert_eq!(class.fields.len(), 1);
    assert_eq!(class.fields[0].name, "v");
    assert_eq!(class.fields[0].offset, 0);
    assert_eq!(class.instance_size, 8);
}

#[test]
fn constructor_and_method_each_lower_to_their_own_mangled_function() {
    let mut program = parse_source(SOURCE).unwrap();
    let mut inferencer = Inferencer::new();
    inferencer.infer_program(&mut program).unwrap();
    let classes = &inferencer.classes;
    let funcs = Lowerer::new(classes).lower_program(&program);
    let names: Vec<&str> = funcs.iter().map(|f| f.name.as_str()).collect();
    assert!(names.contains(&"C.constructor"));
    assert!(names.contains(&"C.get"));
    assert!(!names.contains(&"get"), "the method must mangle under its class, not stand alone");
}

#[test]
fn new_emits_exactly_one_constructor_call() {
    let mut program = parse_source(SOURCE).unwrap();
    let mut inferencer = Inferencer::new();
    inferencer.infer_program(&mut program).unwrap();
    let classes = &inferencer.classes;
    let funcs = Lowerer::new(classes).lower_program(&program);
    let module_fn = funcs.iter().find(|f| f.name == "<module>").unwrap();

    let ctor_calls = module_fn
        .instrs
        .iter()
        .filter(|i| {
            matches!(
                i,
                IrInstr::Call { target: CallTarget::Function(n), .. } if n == "C.constructor"
            )
        })
        .count();
    assert_eq!(ctor_calls, 1, "the constructor runs exactly once per `new`");

    let get_calls = module_fn
        .instrs
        .iter()
        .filter(|i| {
            matches!(
                i,
                IrInstr::Call { target: CallTarget::Function(n), .. } if n == "C.get"
            )
        })
        .count();
    assert_eq!(get_calls, 1);
}

const RUN_SOURCE: &str = r#"
class C {
    v: int64;
    constructor(x: int64) {
        this.v = x;
    }
    get(): int64 {
        return this.v;
    }
}
function run(): int64 {
    return new C(42).get();
}
"#;

#[test]
fn new_c_42_get_returns_42_through_the_jit() {
    pipeline::compile_and_install(RUN_SOURCE, EngineOptions::default()).expect("compiles and loads");
    let result = pipeline::call_function("run", &[]).expect("run is registered");
    assert_eq!(result, 42, "new C(42).get() == 42");
}
