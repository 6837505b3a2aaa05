//! Compilation pipeline: a shared intermediate instruction form lowered
//! from the AST, a code buffer with label-based forward-reference
//! resolution, a function registry, and two interchangeable codegen
//! backends behind one trait (spec.md §4.4-§4.7).

pub mod buffer;
pub mod codegen;
pub mod ir;
pub mod label;
pub mod registry;

pub use buffer::CodeBuffer;
pub use ir::{IrBinOp, IrFunction, IrInstr};
pub use label::{Label, LabelResolver};
pub use registry::FunctionRegistry;
