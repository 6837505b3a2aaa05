//! The shared `CodegenBackend` interface both backends implement
//! (spec.md §4.4): a target ISA, a way to turn an [`IrFunction`] into
//! unlinked machine code, and a way to finalize it against resolved
//! symbol addresses.

pub mod lower;
pub mod native;
pub mod stack;

use crate::compiler::ir::IrFunction;

/// Recognized instruction set architectures. Only `X86_64` has a real
/// backend; `AArch64` is a named-but-unsupported target (spec.md §4.4,
/// "a target ISA" — this engine only ships one).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetArch {
    X86_64,
    AArch64,
}

#[derive(Debug, Clone, Copy)]
pub struct TargetInfo {
    pub arch: TargetArch,
    pub pointer_size: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum CodegenError {
    #[error("codegen backend error: {0}")]
    Backend(String),
    #[error("unsupported target architecture: {0:?}")]
    UnsupportedTarget(TargetArch),
}

/// Fixed set of helper routines JIT code calls into rather than
/// inlining (allocation, promise primitives, task spawn/await).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeHelper {
    Alloc,
    AllocArray,
    WriteBarrier,
    SafepointPoll,
    SpawnTask,
    AwaitPromise,
    ResolvePromise,
    StringConcat,
    Pow,
    ArrayGet,
    ArraySet,
    /// `console.log(...)`: the one console-contract primitive the code
    /// generator lowers to directly (spec.md §6) rather than a named
    /// user function call.
    ConsoleLog,
    /// `setTimeout`/`setInterval` (spec.md §4.8, §6): registers a timer
    /// against the calling task.
    SetTimer,
    /// `clearTimeout`/`clearInterval` (spec.md §4.8, §6).
    CancelTimer,
    /// Strict-equality deferred to the runtime when either operand is
    /// statically `any` (spec.md §4.3: "strict-equality requires same
    /// static type or is deferred to the runtime equality helper when
    /// either side is `any`"). A same-typed comparison never emits this
    /// call — see Scenario E in spec.md §8.
    RuntimeEquals,
}

#[derive(Debug, Clone)]
pub enum RelocationTarget {
    RuntimeHelper(RuntimeHelper),
    Function(String),
    Absolute(usize),
}

/// How a relocation's resolved address gets written into the code
/// buffer: as a `call rel32` displacement, or as a full 64-bit immediate
/// sitting inside a preceding `mov reg, imm64`. A `Function` target can
/// appear in either form — `call rel32` for direct calls, `Abs64` when a
/// function's address is being passed as data (e.g. a spawn target).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocKind {
    Rel32,
    Abs64,
}

#[derive(Debug, Clone)]
pub struct Relocation {
    pub code_offset: usize,
    pub target: RelocationTarget,
    pub kind: RelocKind,
}

#[derive(Debug)]
pub struct CompiledCode {
    pub code: Vec<u8>,
    pub entry_offset: usize,
    pub relocations: Vec<Relocation>,
}

pub trait SymbolResolver {
    fn resolve_helper(&self, helper: RuntimeHelper) -> Option<usize>;
    fn resolve_function(&self, name: &str) -> Option<usize>;
}

/// The backend-agnostic code generation trait. Pipeline:
/// `IrFunction -> compile_function() -> CompiledCode -> finalize() -> relocated bytes`.
///
/// `finalize` no longer maps memory itself (spec.md §4.6): every
/// function in a compilation unit is laid out into one reserved region
/// before any relocation is patched, so that self- and
/// mutually-recursive calls can resolve to their own final addresses.
/// That reservation, the per-function offset bookkeeping, and the final
/// `mprotect` to read-execute live in [`crate::pipeline`].
pub trait CodegenBackend: Send + Sync {
    fn name(&self) -> &str;

    fn compile_function(&self, func: &IrFunction) -> Result<CompiledCode, CodegenError>;

    /// Applies relocations against addresses from `resolver`, computing
    /// PC-relative displacements against `code_base + code_offset` (the
    /// address this function's bytes will execute from once copied into
    /// the pipeline's reserved region starting at `code_base`), and
    /// returns the patched bytes ready to be copied in.
    fn finalize(
        &self,
        code: CompiledCode,
        code_base: usize,
        resolver: &dyn SymbolResolver,
    ) -> Result<Vec<u8>, CodegenError>;

    fn target_info(&self) -> TargetInfo;
}
