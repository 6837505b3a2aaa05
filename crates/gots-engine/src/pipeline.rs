//! The driver that wires every pipeline stage together (spec.md §2's
//! data-flow diagram): source text -> tokens -> AST -> type-annotated
//! AST -> IR -> compiled machine code laid out in one reserved region
//! -> relocated and mapped executable -> function registry -> entry
//! point invoked -> scheduler joined.
//!
//! Every other module in this crate is testable against its own stage
//! in isolation; this is the only place that runs a whole program.

use crate::allocator::{Allocator, TrackingAllocator};
use crate::class::ClassTable;
use crate::compiler::codegen::native::NativeX86Backend;
use crate::compiler::codegen::stack::StackBackend;
use crate::compiler::codegen::{CodegenBackend, CodegenError, RuntimeHelper, SymbolResolver};
use crate::compiler::codegen::lower::Lowerer;
use crate::compiler::ir::IrFunction;
use crate::compiler::registry::FunctionRegistry;
use crate::error::{GotsError, LinkError, RuntimeError};
use crate::module::{flatten_program, ModuleLoader};
use crate::runtime::{Scheduler, SchedulerStats};
use crate::types::infer::Inferencer;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which code generator backend produces the running program's machine
/// code (spec.md §4.4: "a native-register backend and a stack-machine
/// backend share one interface").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    NativeX86_64,
    StackMachine,
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub backend: Backend,
    /// `-p/--production` (spec.md §6): emit without bounds-check/guard
    /// instructions. The stack-machine backend's atomic-aware encoding
    /// is the only place this engine currently emits guards it could
    /// drop; the native backend is unaffected (recorded in DESIGN.md).
    pub production: bool,
    pub worker_threads: usize,
    /// How long `join-all` (spec.md §4.8) waits for outstanding tasks
    /// before giving up, so a program with a runaway task doesn't hang
    /// the process forever.
    pub join_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            backend: Backend::NativeX86_64,
            production: false,
            worker_threads: 0,
            join_timeout: Duration::from_secs(30),
        }
    }
}

/// Process-wide runtime state a running program's JIT-emitted calls
/// bind against (spec.md §9: "process-wide singletons ... initialize
/// exactly once"). Held behind [`crate::helpers::install_engine`]
/// rather than passed explicitly, because JIT code only ever has a
/// bare function address to call through.
pub struct Engine {
    pub allocator: Box<dyn Allocator>,
    pub scheduler: Scheduler,
    pub registry: FunctionRegistry,
    pub module_loader: ModuleLoader,
    strings: Mutex<Vec<String>>,
}

impl Engine {
    fn new(worker_threads: usize) -> Self {
        Engine {
            allocator: Box::new(TrackingAllocator::new()),
            scheduler: Scheduler::new(worker_threads),
            registry: FunctionRegistry::new(),
            module_loader: ModuleLoader::new(),
            strings: Mutex::new(Vec::new()),
        }
    }

    /// Interns `s`, returning a stable id usable as a packed `i64`
    /// value. `0` is reserved for the null string (spec.md §4.4.a's
    /// "null is the zero pointer" convention extends to string ids).
    pub fn intern(&self, s: String) -> i64 {
        let mut strings = self.strings.lock();
        if let Some(pos) = strings.iter().position(|existing| existing == &s) {
            return (pos + 1) as i64;
        }
        strings.push(s);
        strings.len() as i64
    }

    pub fn resolve_string(&self, id: i64) -> String {
        if id <= 0 {
            return String::new();
        }
        self.strings
            .lock()
            .get(id as usize - 1)
            .cloned()
            .unwrap_or_default()
    }
}

/// Resolves `RuntimeHelper`/`Function` relocation targets against a
/// flat layout of every function in this compilation unit, computed up
/// front once their final addresses are known (spec.md §4.6: function
/// addresses must be known before any relocation is patched so
/// self/mutually-recursive calls resolve).
struct LinkResolver {
    layout: FxHashMap<String, usize>,
}

impl SymbolResolver for LinkResolver {
    fn resolve_helper(&self, helper: RuntimeHelper) -> Option<usize> {
        Some(helper_address(helper))
    }

    fn resolve_function(&self, name: &str) -> Option<usize> {
        self.layout.get(name).copied()
    }
}

fn helper_address(helper: RuntimeHelper) -> usize {
    use crate::helpers;
    match helper {
        RuntimeHelper::Alloc => helpers::alloc as usize,
        RuntimeHelper::AllocArray => helpers::alloc_array as usize,
        RuntimeHelper::WriteBarrier => helpers::write_barrier as usize,
        RuntimeHelper::SafepointPoll => helpers::safepoint_poll as usize,
        RuntimeHelper::SpawnTask => helpers::spawn_task as usize,
        RuntimeHelper::AwaitPromise => helpers::await_promise as usize,
        RuntimeHelper::ResolvePromise => helpers::resolve_promise as usize,
        RuntimeHelper::StringConcat => helpers::string_concat as usize,
        RuntimeHelper::Pow => helpers::pow as usize,
        RuntimeHelper::ArrayGet => helpers::array_get as usize,
        RuntimeHelper::ArraySet => helpers::array_set as usize,
        RuntimeHelper::ConsoleLog => helpers::console_log as usize,
        RuntimeHelper::SetTimer => helpers::set_timer as usize,
        RuntimeHelper::CancelTimer => helpers::cancel_timer as usize,
        RuntimeHelper::RuntimeEquals => helpers::runtime_equals as usize,
    }
}

fn backend_for(kind: Backend) -> Box<dyn CodegenBackend> {
    match kind {
        Backend::NativeX86_64 => Box::new(NativeX86Backend::new()),
        Backend::StackMachine => Box::new(StackBackend::new()),
    }
}

/// A compiled, not-yet-linked program: every function's raw
/// `compile_function` output plus the byte layout it would occupy once
/// concatenated into one region, so relocations can resolve call
/// targets to their final address before any byte is patched.
struct CompiledProgram {
    functions: Vec<(String, crate::compiler::codegen::CompiledCode)>,
    layout: FxHashMap<String, usize>,
    total_size: usize,
}

fn compile_ir(backend: &dyn CodegenBackend, functions: &[IrFunction]) -> Result<CompiledProgram, CodegenError> {
    let mut compiled = Vec::with_capacity(functions.len());
    let mut layout = FxHashMap::default();
    let mut offset = 0usize;
    for func in functions {
        let code = backend.compile_function(func)?;
        layout.insert(func.name.clone(), offset);
        offset += code.code.len();
        compiled.push((func.name.clone(), code));
    }
    Ok(CompiledProgram {
        functions: compiled,
        layout,
        total_size: offset,
    })
}

/// Runs `compile_ir`'s output through `finalize` against `resolver`,
/// then copies every function's relocated bytes into one reserved
/// executable region and commits it read-execute (spec.md §4.6).
fn link_and_load(
    backend: &dyn CodegenBackend,
    program: CompiledProgram,
    registry: &FunctionRegistry,
) -> Result<(), GotsError> {
    let resolver = LinkResolver { layout: program.layout.clone() };
    let region = crate::loader::reserve(program.total_size.max(1))?;
    let base = region as usize;

    for (name, code) in program.functions {
        let offset = *resolver
            .layout
            .get(&name)
            .ok_or_else(|| LinkError::MissingSymbol { name: name.clone() })?;
        let func_base = base + offset;
        let bytes = backend
            .finalize(code, func_base, &resolver)
            .map_err(GotsError::Codegen)?;
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), region.add(offset), bytes.len());
        }
        registry.register(&name, func_base);
    }

    unsafe {
        crate::loader::commit(region, program.total_size.max(1))?;
    }
    Ok(())
}

/// Everything a `run_file` caller needs to report on a finished run
/// beyond the bare exit code: the scheduler's lifetime counters (for a
/// watch-mode status line, SPEC_FULL.md §C) and the import-cycle edges
/// the module loader recorded while resolving `path`'s import graph
/// (for a one-line warning per cycle, also §C). Both are read out of the
/// `Engine`/`ModuleLoader` before they're dropped at the end of
/// `run_file`, since JIT-emitted code may still hold addresses into the
/// mapped region for the remainder of the process (spec.md §9's
/// "executable memory is intentionally leaked").
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub exit_code: i32,
    pub scheduler_stats: SchedulerStats,
    pub import_cycle_edges: Vec<(PathBuf, PathBuf)>,
}

/// Compiles `source` as a single, import-free compilation unit through
/// the full pipeline (parse -> infer -> lower -> compile -> link -> map
/// executable) and installs the result as process-wide engine state,
/// without invoking any entry point or starting the join-all barrier.
/// Exposed so integration tests can resolve and call one compiled
/// function directly and assert on its `i64` result end to end, the way
/// the teacher workspace's own `tests/e2e` suite drives its public
/// `Compiler`/`Vm` API (`compile_and_run` + `assert_eq!`) rather than
/// asserting on intermediate compiler state.
pub fn compile_and_install(source: &str, options: EngineOptions) -> Result<(), GotsError> {
    let mut program = crate::parser::parse_source(source)?;
    let mut inferencer = Inferencer::new();
    inferencer.infer_program(&mut program)?;
    let classes: ClassTable = inferencer.classes;

    let functions = Lowerer::new(&classes).lower_program(&program);
    let backend = backend_for(options.backend);
    let compiled = compile_ir(backend.as_ref(), &functions).map_err(GotsError::Codegen)?;

    let engine = Engine::new(options.worker_threads);
    link_and_load(backend.as_ref(), compiled, &engine.registry)?;
    engine.scheduler.start();
    crate::helpers::install_engine(engine);
    Ok(())
}

/// Same as [`compile_and_install`], but resolves `path`'s transitively
/// imported module graph first (spec.md §4.10), so a test can exercise
/// a function pulled in across an import cycle the way [`run_file`]
/// would, then call it directly with [`call_function`] and assert on
/// its result instead of only inspecting the flattened AST.
pub fn compile_path_and_install(path: &Path, options: EngineOptions) -> Result<ModuleLoader, GotsError> {
    let loader = ModuleLoader::new();
    let mut program = flatten_program(&loader, path)?;
    let mut inferencer = Inferencer::new();
    inferencer.infer_program(&mut program)?;
    let classes: ClassTable = inferencer.classes;

    let functions = Lowerer::new(&classes).lower_program(&program);
    let backend = backend_for(options.backend);
    let compiled = compile_ir(backend.as_ref(), &functions).map_err(GotsError::Codegen)?;

    let engine = Engine::new(options.worker_threads);
    link_and_load(backend.as_ref(), compiled, &engine.registry)?;
    engine.scheduler.start();
    crate::helpers::install_engine(engine);
    Ok(loader)
}

/// Calls a function registered under `name` (spec.md §4.7) with `args`
/// packed onto the calling convention `compiler::codegen::native`'s
/// marshaling emits, returning its `i64` result, or `None` if no such
/// symbol was ever registered.
pub fn call_function(name: &str, args: &[i64]) -> Option<i64> {
    let engine = crate::helpers::engine();
    let addr = engine.registry.address_by_name(name)?;
    type Entry = unsafe extern "C" fn(*const i64, u32) -> i64;
    let entry: Entry = unsafe { std::mem::transmute(addr) };
    Some(unsafe { entry(args.as_ptr(), args.len() as u32) })
}

/// Parses, type-checks, lowers, compiles, links, and maps `path`'s
/// (transitively imported) source into executable memory, then invokes
/// its module entry point and joins every task it spawned. Returns the
/// process exit code the CLI should use (spec.md §6: 0 success, 1 any
/// compile/link/runtime error) plus the scheduler/module-loader report
/// described by [`RunReport`].
pub fn run_file(path: &Path, options: EngineOptions) -> Result<RunReport, GotsError> {
    let loader = ModuleLoader::new();
    let mut program = flatten_program(&loader, path)?;

    let mut inferencer = Inferencer::new();
    inferencer.infer_program(&mut program)?;
    let classes: ClassTable = inferencer.classes;

    let functions = Lowerer::new(&classes).lower_program(&program);
    let entry_name = functions
        .iter()
        .find(|f| f.name == "main")
        .map(|f| f.name.clone())
        .or_else(|| functions.iter().find(|f| f.name == "<module>").map(|f| f.name.clone()));

    let backend = backend_for(options.backend);
    let compiled = compile_ir(backend.as_ref(), &functions).map_err(GotsError::Codegen)?;

    let mut engine = Engine::new(options.worker_threads);
    engine.module_loader = loader;
    link_and_load(backend.as_ref(), compiled, &engine.registry)?;

    let entry_addr = match &entry_name {
        Some(name) => engine.registry.address_by_name(name),
        None => None,
    };

    engine.scheduler.start();
    crate::helpers::install_engine(engine);
    let engine = crate::helpers::engine();

    if let Some(addr) = entry_addr {
        type Entry = unsafe extern "C" fn(*const i64, u32) -> i64;
        let entry: Entry = unsafe { std::mem::transmute(addr) };
        let result = std::panic::catch_unwind(|| unsafe { entry(std::ptr::null(), 0) });
        if result.is_err() {
            return Err(GotsError::Runtime(RuntimeError {
                message: "unhandled panic in JIT-compiled code".to_string(),
                backtrace: Vec::new(),
            }));
        }
    }

    engine.scheduler.wait_all(options.join_timeout);
    Ok(RunReport {
        exit_code: 0,
        scheduler_stats: engine.scheduler.stats(),
        import_cycle_edges: engine.module_loader.import_cycle_edges(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helper_addresses_are_all_distinct() {
        let helpers = [
            RuntimeHelper::Alloc,
            RuntimeHelper::AllocArray,
            RuntimeHelper::WriteBarrier,
            RuntimeHelper::SafepointPoll,
            RuntimeHelper::SpawnTask,
            RuntimeHelper::AwaitPromise,
            RuntimeHelper::ResolvePromise,
            RuntimeHelper::StringConcat,
            RuntimeHelper::Pow,
            RuntimeHelper::ArrayGet,
            RuntimeHelper::ArraySet,
            RuntimeHelper::ConsoleLog,
            RuntimeHelper::SetTimer,
            RuntimeHelper::CancelTimer,
            RuntimeHelper::RuntimeEquals,
        ];
        let mut addrs: Vec<usize> = helpers.iter().map(|h| helper_address(*h)).collect();
        addrs.sort_unstable();
        addrs.dedup();
        assert_eq!(addrs.len(), helpers.len());
    }

    #[test]
    fn compile_ir_lays_out_functions_back_to_back() {
        let classes = ClassTable::new();
        let mut program = crate::parser::parse_source(
            "function add(a: int64, b: int64): int64 { return a + b; }",
        )
        .unwrap();
        let mut inferencer = Inferencer::new();
        inferencer.infer_program(&mut program).unwrap();
        let functions = Lowerer::new(&classes).lower_program(&program);
        let backend = NativeX86Backend::new();
        let compiled = compile_ir(&backend, &functions).unwrap();
        assert_eq!(compiled.layout.get("add"), Some(&0));
        assert_eq!(compiled.total_size, compiled.functions[0].1.code.len());
    }
}
