//! Error kinds produced by each pipeline stage.
//!
//! One variant per error kind named in the language specification's error
//! handling design: lexical and parse errors abort the current compilation;
//! type errors abort compilation; link errors abort before the code buffer
//! is mapped executable; module-not-found errors abort the outermost load
//! and carry the import stack; `NoTaskContextError` is recoverable (the
//! call site gets a sentinel id and execution continues); `RuntimeError`
//! terminates the process after printing a trace.

use std::path::PathBuf;

/// Source position used by every diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LexError {
    #[error("{pos}: unterminated string literal")]
    UnterminatedString { pos: Position },
    #[error("{pos}: unterminated block comment")]
    UnterminatedBlockComment { pos: Position },
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("{pos}: unexpected token {found:?}, expected {expected}")]
    UnexpectedToken {
        pos: Position,
        found: String,
        expected: String,
    },
    #[error("{pos}: unexpected end of input, expected {expected}")]
    UnexpectedEof { pos: Position, expected: String },
}

#[derive(Debug, thiserror::Error)]
pub enum TypeError {
    #[error("{pos}: unknown field `{field}` on class `{class}`")]
    UnknownField {
        pos: Position,
        class: String,
        field: String,
    },
    #[error("{pos}: cannot assign value of type {from} to variable of type {to}")]
    Unassignable {
        pos: Position,
        from: String,
        to: String,
    },
    #[error("{pos}: unknown identifier `{name}`")]
    UnknownIdentifier { pos: Position, name: String },
    #[error("{pos}: unknown class `{name}`")]
    UnknownClass { pos: Position, name: String },
    #[error("{pos}: {message}")]
    Other { pos: Position, message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("unresolved label `{label}` referenced at offset {patch_site}")]
    UnresolvedLabel { label: String, patch_site: usize },
    #[error("symbol `{name}` not registered in the function registry")]
    MissingSymbol { name: String },
}

#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    #[error("mmap failed while reserving {size} bytes for executable code: {errno}")]
    MapFailed { size: usize, errno: i32 },
    #[error("mprotect failed while marking {size} bytes read-execute: {errno}")]
    ProtectFailed { size: usize, errno: i32 },
}

#[derive(Debug, thiserror::Error)]
#[error("module not found: {path} (tried: {tried:?}); import stack: {import_stack:?}")]
pub struct ModuleNotFoundError {
    pub path: String,
    pub tried: Vec<PathBuf>,
    pub import_stack: Vec<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
#[error("runtime error: {message}")]
pub struct RuntimeError {
    pub message: String,
    pub backtrace: Vec<String>,
}

/// Informational: a module still `loading` (on the current import
/// stack) was observed by another import, establishing a circular-import
/// edge. Collected by the module loader rather than propagated as a
/// `GotsError` — load proceeds with a partial export record.
#[derive(Debug, Clone, thiserror::Error)]
#[error("circular import: {importer:?} observed {target:?} while it was still loading")]
pub struct CircularImportWarning {
    pub importer: PathBuf,
    pub target: PathBuf,
}

/// A timer primitive was invoked with no task installed on the calling
/// thread. Per spec.md §7 this is recoverable: the caller gets a
/// sentinel timer id back and execution continues, so this is logged
/// via `tracing::warn!` rather than raised as a `GotsError`.
#[derive(Debug, thiserror::Error)]
#[error("timer primitive called outside any task context")]
pub struct NoTaskContextError;

/// Top-level error type the CLI downcasts against to pick an exit code.
#[derive(Debug, thiserror::Error)]
pub enum GotsError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Type(#[from] TypeError),
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error(transparent)]
    ModuleNotFound(#[from] ModuleNotFoundError),
    #[error(transparent)]
    Loader(#[from] LoaderError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Codegen(#[from] crate::compiler::codegen::CodegenError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<crate::parser::CompileError> for GotsError {
    fn from(err: crate::parser::CompileError) -> Self {
        match err {
            crate::parser::CompileError::Lex(e) => GotsError::Lex(e),
            crate::parser::CompileError::Parse(e) => GotsError::Parse(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, GotsError>;
