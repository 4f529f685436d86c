//! Metadata emission
//!
//! Freezes the registry and writes the per-type metadata blobs, the type
//! table and the type-section definitions. The blob layout is ABI: the
//! dispatch routines index into it with the `TYPE_DESCRIPTION_*` byte
//! offsets.
//!
//! ```text
//! ┌───────────────────────────────────────┐
//! │ Offset to the i-table       [4 bytes] │
//! │ Offset to the instanceof    [4 bytes] │
//! │ String id of the class name [4 bytes] │
//! │ Array component type        [4 bytes] │
//! │ Offset to field descript.   [4 bytes] │
//! ├───────────────────────────────────────┤
//! │ v-table entries         [4 bytes each]│
//! ├───────────────────────────────────────┤
//! │ i-table blocks, zero-terminated       │
//! ├───────────────────────────────────────┤
//! │ instanceof count + class indices      │
//! ├───────────────────────────────────────┤
//! │ field (name id, type code) pairs      │
//! └───────────────────────────────────────┘
//! ```

use tracing::debug;

use strata_wasm::{DataWriter, TypeId, ValueType, WasmType};

use crate::error::{CompileError, CompileResult};
use crate::functions::{FunctionManager, FunctionName, SyntheticFunction};
use crate::strings::StringPool;

use super::{FieldLayout, TypeKind, TypeRegistry, VTABLE_FIRST_FUNCTION_INDEX};

/// Byte size of the metadata blob header.
const HEADER_BYTES: i32 = 4 * VTABLE_FIRST_FUNCTION_INDEX as i32;

/// A struct type definition recorded for the module's type section.
#[derive(Debug, Clone)]
pub struct StructTypeDef {
    /// Type name
    pub name: String,
    /// Field layout
    pub fields: Vec<FieldLayout>,
}

/// A function-shaped block type recorded for the module's type section.
#[derive(Debug, Clone)]
pub struct BlockTypeDef {
    /// Parameter types
    pub params: Vec<WasmType>,
    /// Result types
    pub results: Vec<WasmType>,
}

/// Collects the type-section definitions and the linear-memory data image.
///
/// Struct and block types share one code space; codes are handed out in
/// write order and never reused. The full binary writer lives downstream;
/// this is the part of it the type manager talks to.
#[derive(Debug, Default)]
pub struct ModuleWriter {
    data: Vec<u8>,
    struct_types: Vec<StructTypeDef>,
    block_types: Vec<BlockTypeDef>,
}

impl ModuleWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a struct type and assign its code.
    pub fn write_struct_type(&mut self, def: StructTypeDef) -> u32 {
        let code = (self.struct_types.len() + self.block_types.len()) as u32;
        self.struct_types.push(def);
        code
    }

    /// Record a block type and assign its code.
    pub fn write_block_type(&mut self, def: BlockTypeDef) -> i32 {
        let code = (self.struct_types.len() + self.block_types.len()) as i32;
        self.block_types.push(def);
        code
    }

    /// The data image written so far.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable access to the data image.
    pub fn data_mut(&mut self) -> &mut Vec<u8> {
        &mut self.data
    }

    /// Recorded struct type definitions, in code order.
    pub fn struct_types(&self) -> &[StructTypeDef] {
        &self.struct_types
    }

    /// Recorded block type definitions.
    pub fn block_types(&self) -> &[BlockTypeDef] {
        &self.block_types
    }
}

impl TypeRegistry {
    /// Finish the prepare phase and write all types.
    ///
    /// Latches the registry: no type or field registration is accepted
    /// afterwards. Struct codes are assigned for every descriptor first, so
    /// field descriptor lists can reference types registered later; then the
    /// metadata blobs go out in registration order, then the block types,
    /// then the type table, and the table-offset accessor is registered with
    /// the function manager.
    pub fn prepare_finish(
        &mut self,
        writer: &mut ModuleWriter,
        functions: &mut FunctionManager,
        strings: &mut StringPool,
    ) -> CompileResult<()> {
        if self.finished {
            return Err(CompileError::Internal {
                message: "types were already written".to_string(),
            });
        }
        self.finished = true;
        functions.assign_function_ids();

        for index in 0..self.size() {
            let id = TypeId::new(index as u32);
            let descriptor = self.get(id);
            let def = StructTypeDef {
                name: descriptor.name().to_string(),
                fields: descriptor.fields().to_vec(),
            };
            let code = writer.write_struct_type(def);
            self.get_mut(id).code = Some(code);
        }

        for index in 0..self.size() {
            self.write_type_metadata(TypeId::new(index as u32), writer, functions, strings)?;
        }

        for index in 0..self.block_types.len() {
            let (key, _) = self
                .block_types
                .get_index(index)
                .expect("block index in range");
            let def = BlockTypeDef {
                params: key.0.clone(),
                results: key.1.clone(),
            };
            let code = writer.write_block_type(def);
            if let Some((_, slot)) = self.block_types.get_index_mut(index) {
                *slot = Some(code);
            }
        }

        self.type_table_offset = writer.data().len() as u32;
        let mut table = DataWriter::new();
        for descriptor in &self.arena {
            if descriptor.class_index() < 0 {
                continue;
            }
            let offset = descriptor.vtable_offset().ok_or_else(|| CompileError::Internal {
                message: format!("no metadata offset for type {}", descriptor.name()),
            })?;
            table.write_u32(offset);
        }
        table.write_to(writer.data_mut());

        functions.add_replacement(self.type_table_accessor());
        functions.assign_function_ids();
        Ok(())
    }

    /// The accessor user code calls to locate the type table: a single
    /// `i32.const` with the table's offset.
    fn type_table_accessor(&self) -> SyntheticFunction {
        SyntheticFunction {
            name: FunctionName::new("java/lang/Class", "typeTableMemoryOffset", "()I"),
            params: Vec::new(),
            results: vec![WasmType::Value(ValueType::I32)],
            wat: format!("i32.const {}", self.type_table_offset),
        }
    }

    fn write_type_metadata(
        &mut self,
        id: TypeId,
        writer: &mut ModuleWriter,
        functions: &FunctionManager,
        strings: &mut StringPool,
    ) -> CompileResult<()> {
        let vtable_offset = writer.data().len() as u32;
        {
            let descriptor = self.get_mut(id);
            debug!("write type: {}", descriptor.name);
            if descriptor.vtable_offset.is_some() {
                return Err(CompileError::Internal {
                    message: format!("metadata written twice for type {}", descriptor.name),
                });
            }
            descriptor.vtable_offset = Some(vtable_offset);
        }

        let descriptor = self.get(id);
        let mut header = DataWriter::new();
        let mut data = DataWriter::new();

        for func in descriptor.vtable() {
            data.write_i32(function_id(functions, func)?);
        }

        header.write_i32(data.len() as i32 + HEADER_BYTES);
        for (&interface_type, methods) in descriptor.interface_methods() {
            data.write_i32(self.get(interface_type).class_index());
            data.write_i32(4 * (2 + methods.len() as i32));
            for func in methods {
                data.write_i32(function_id(functions, func)?);
            }
        }
        // class index 0 terminates the i-table walk
        data.write_i32(0);

        header.write_i32(data.len() as i32 + HEADER_BYTES);
        data.write_i32(descriptor.instance_ofs().len() as i32);
        for &instance_type in descriptor.instance_ofs() {
            data.write_i32(self.get(instance_type).class_index());
        }

        let name_id = strings.get(&descriptor.name().replace('/', "."));
        header.write_i32(name_id);
        header.write_i32(descriptor.component_class_index());

        header.write_i32(data.len() as i32 + HEADER_BYTES);
        if descriptor.kind() == TypeKind::Normal {
            for field in descriptor.fields() {
                data.write_i32(strings.get(&field.name));
                data.write_i32(self.type_code(field.ty)?);
            }
        }

        header.write_to(writer.data_mut());
        data.write_to(writer.data_mut());
        Ok(())
    }

    /// The binary code of a field type: value types carry their own code,
    /// references the struct code assigned by the module writer.
    fn type_code(&self, ty: WasmType) -> CompileResult<i32> {
        match ty {
            WasmType::Value(value) => Ok(value.code()),
            WasmType::Ref(id) => {
                self.get(id)
                    .code()
                    .map(|code| code as i32)
                    .ok_or_else(|| CompileError::Internal {
                        message: format!("no struct code for type {}", self.get(id).name()),
                    })
            }
        }
    }
}

/// The numeric id of a dispatched function; every function reaching a
/// dispatch table was marked used, so a missing id is a broken invariant.
fn function_id(functions: &FunctionManager, func: &FunctionName) -> CompileResult<i32> {
    functions
        .function_id(func)
        .map(|id| id as i32)
        .ok_or_else(|| CompileError::Internal {
            message: format!("no function id for {}", func),
        })
}

