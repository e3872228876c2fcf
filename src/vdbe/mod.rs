//! Bytecode virtual machine
//!
//! Queries compile to a flat sequence of register-based instructions which
//! this module defines (`ops`), builds (`builder`) and executes (`engine`).

pub mod builder;
pub mod cast;
pub mod engine;
pub mod ops;
pub mod registers;
pub mod sort;
pub mod value;

pub use builder::{BytecodeBuilder, BytecodeVector, CachedRegKind, ScratchRegisters};
pub use engine::Interpreter;
pub use ops::{bytecode_to_string, opcode_name, Bytecode};
pub use registers::{Range, RegHandle, RegValue, Span};
pub use value::{
    CastFilterValueListResult, CastFilterValueResult, FetchedType, NoFilterValueFetcher, Validity,
    ValueFetcher,
};
