//! Strata WebAssembly Type Vocabulary
//!
//! This crate provides the WebAssembly-side vocabulary shared by the Strata
//! compiler: value types with their binary codes, the value-or-reference
//! `WasmType` sum, stable type handles, and the little-endian writer used to
//! build the linear-memory data image.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod value;
pub mod writer;

pub use value::{TypeId, ValueType, WasmType};
pub use writer::{read_i32, DataWriter};
