//! Strata Compiler - Type and Dispatch Core
//!
//! This crate implements the type manager of a compiler that lowers
//! class-file-based bytecode into WebAssembly: it discovers every reference
//! type reachable from compiled code, computes instance layouts, builds the
//! virtual and interface dispatch tables, emits the per-type metadata blobs
//! the synthetic dispatch routines index into, and synthesizes those routines
//! as WebAssembly text.
//!
//! # Architecture
//!
//! The compilation pipeline is:
//! 1. Bytecode translation registers types through [`TypeRegistry::value_of`]
//!    and friends, marks fields needed and methods used.
//! 2. [`TypeRegistry::scan_type_hierarchy`] walks superclass and interface
//!    chains and fills every descriptor's layout and dispatch tables.
//! 3. [`TypeRegistry::prepare_finish`] latches the registry, assigns type
//!    codes and writes metadata blobs plus the type table to the data image.
//!
//! The dispatch routines in [`dispatch`] are produced on demand and are
//! independent of the phase order. Everything is single-threaded; the finish
//! latch is an advisory guard, not a synchronization primitive.

pub mod dispatch;
pub mod error;
pub mod functions;
pub mod signature;
pub mod strings;
pub mod types;

pub use error::{CompileError, CompileResult};
pub use functions::{FunctionManager, FunctionName, SyntheticFunction};
pub use signature::SignatureParser;
pub use strings::StringPool;
pub use types::emit::{BlockTypeDef, ModuleWriter, StructTypeDef};
pub use types::{
    primitive_index, BlockTypeId, FieldLayout, TypeDescriptor, TypeKind, TypeRegistry,
};

// Re-export the shared vocabulary so downstream passes need one import.
pub use strata_wasm::{TypeId, ValueType, WasmType};

/// Compiler configuration consulted by the type manager.
#[derive(Debug, Clone, Default)]
pub struct CompilerOptions {
    /// Use GC struct and array types for object storage. Off, arrays live in
    /// linear memory and the storage field holds an address; on, a native
    /// array sibling type is registered and referenced instead.
    pub use_gc: bool,
}
