//! WebAssembly value types and type handles

use std::fmt;

/// Unique handle for a struct type registered with the type registry.
///
/// Handles are stable for the lifetime of a compilation and are the only way
/// collaborating subsystems refer to a registered type; the registry retains
/// exclusive ownership of the descriptors themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeId(u32);

impl TypeId {
    /// Create a handle from an arena slot.
    pub fn new(index: u32) -> Self {
        TypeId(index)
    }

    /// The arena slot this handle points at.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeId({})", self.0)
    }
}

/// WebAssembly value types used for fields, locals and signatures.
///
/// The packed storage types (`I8`, `I16`, `U16`, `Bool`) only occur in struct
/// field positions; everywhere else they widen to `I32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// 1-byte boolean storage
    Bool,
    /// 8-bit signed integer storage
    I8,
    /// 16-bit unsigned integer storage (UTF-16 code unit)
    U16,
    /// 16-bit signed integer storage
    I16,
    /// 32-bit integer
    I32,
    /// 64-bit integer
    I64,
    /// 32-bit float
    F32,
    /// 64-bit float
    F64,
    /// 128-bit SIMD vector
    V128,
    /// reference to a function
    Funcref,
    /// reference to an equality-comparable GC value
    Eqref,
    /// opaque host reference
    Externref,
}

impl ValueType {
    /// The binary code of this type as written into type metadata.
    ///
    /// Numeric types use the WebAssembly binary encodings; the storage types
    /// without a WebAssembly encoding (`Bool`, `U16`) take adjacent unassigned
    /// codes. The codes are ABI: the reflection runtime reads them back out of
    /// the field descriptor lists.
    pub fn code(self) -> i32 {
        match self {
            ValueType::I32 => -1,
            ValueType::I64 => -2,
            ValueType::F32 => -3,
            ValueType::F64 => -4,
            ValueType::V128 => -5,
            ValueType::Bool => -7,
            ValueType::I8 => -8,
            ValueType::I16 => -9,
            ValueType::U16 => -10,
            ValueType::Funcref => -16,
            ValueType::Externref => -17,
            ValueType::Eqref => -19,
        }
    }

    /// True for the reference types.
    pub fn is_ref_type(self) -> bool {
        matches!(
            self,
            ValueType::Funcref | ValueType::Eqref | ValueType::Externref
        )
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Bool => "bool",
            ValueType::I8 => "i8",
            ValueType::U16 => "u16",
            ValueType::I16 => "i16",
            ValueType::I32 => "i32",
            ValueType::I64 => "i64",
            ValueType::F32 => "f32",
            ValueType::F64 => "f64",
            ValueType::V128 => "v128",
            ValueType::Funcref => "funcref",
            ValueType::Eqref => "eqref",
            ValueType::Externref => "externref",
        };
        write!(f, "{}", name)
    }
}

/// A type as it appears in a field, parameter or result position: either a
/// plain value type or a reference to a registered struct type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WasmType {
    /// A WebAssembly value type
    Value(ValueType),
    /// A reference to a struct type owned by the registry
    Ref(TypeId),
}

impl WasmType {
    /// True if this is a reference type (struct reference or reference-kind
    /// value type).
    pub fn is_ref_type(self) -> bool {
        match self {
            WasmType::Value(v) => v.is_ref_type(),
            WasmType::Ref(_) => true,
        }
    }

    /// Get the value type if this is one.
    pub fn as_value(self) -> Option<ValueType> {
        match self {
            WasmType::Value(v) => Some(v),
            WasmType::Ref(_) => None,
        }
    }

    /// Get the struct type handle if this is a reference.
    pub fn as_ref_id(self) -> Option<TypeId> {
        match self {
            WasmType::Value(_) => None,
            WasmType::Ref(id) => Some(id),
        }
    }
}

impl From<ValueType> for WasmType {
    fn from(v: ValueType) -> Self {
        WasmType::Value(v)
    }
}

impl fmt::Display for WasmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WasmType::Value(v) => write!(f, "{}", v),
            WasmType::Ref(id) => write!(f, "ref {}", id),
        }
    }
}
