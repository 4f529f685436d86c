//! Type registry and descriptors
//!
//! The registry owns one [`TypeDescriptor`] per type reachable from compiled
//! code and is the single authority for class indices, instance layouts,
//! dispatch tables and the per-type metadata written into the data image.
//! Descriptors are created on demand while bytecode is translated, with empty
//! layouts; the hierarchy scan ([`scan`]) fills them in, and emission
//! ([`emit`]) freezes the registry and writes the metadata.
//!
//! Collaborating subsystems hold [`TypeId`] handles into the registry's arena
//! and never own descriptors themselves, so cyclic references between types
//! (a class with a field of its own type, mutually recursive interfaces) need
//! no special handling.

pub mod emit;
pub mod scan;

use std::fmt;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::trace;

use strata_classfile::{BootstrapMethod, ClassFile, ClassFileLoader};
use strata_wasm::{TypeId, ValueType, WasmType};

use crate::error::{CompileError, CompileResult};
use crate::functions::FunctionName;
use crate::signature::SignatureParser;
use crate::CompilerOptions;

/// Byte position in a type metadata blob of the offset to the i-table.
pub const TYPE_DESCRIPTION_INTERFACE_OFFSET: i32 = 0;

/// Byte position in a type metadata blob of the offset to the instanceof
/// list.
pub const TYPE_DESCRIPTION_INSTANCEOF_OFFSET: i32 = 4;

/// Byte position in a type metadata blob of the class-name string-pool id.
pub const TYPE_DESCRIPTION_TYPE_NAME: i32 = 8;

/// Byte position in a type metadata blob of the array component class index.
pub const TYPE_DESCRIPTION_ARRAY_TYPE: i32 = 12;

/// Byte position in a type metadata blob of the offset to the field
/// descriptor list.
pub const TYPE_DESCRIPTION_FIELDS_OFFSET: i32 = 16;

/// V-table index of the first virtual function.
///
/// The first five 4-byte slots of a blob hold the header fields above;
/// multiplying an index by 4 gives the byte offset used by `callVirtual`.
pub const VTABLE_FIRST_FUNCTION_INDEX: u32 = 5;

/// Field name of the v-table pointer; starts with a point so it can never
/// collide with a source-level identifier.
pub const FIELD_VTABLE: &str = ".vtable";

/// Field name of the system hash code.
pub const FIELD_HASHCODE: &str = ".hashcode";

/// Field name of the array storage slot.
pub const FIELD_VALUE: &str = ".array";

/// Name of the top type every reference type is assignable to.
pub const OBJECT_CLASS: &str = "java/lang/Object";

/// The primitive classes in canonical order.
///
/// The order is load-bearing: it fixes class indices 0..8, array component
/// lookup relies on it, and the reflection-side primitive-class lookup maps a
/// name to its index by linear search over this table.
pub const PRIMITIVE_CLASSES: [&str; 9] = [
    "boolean", "byte", "char", "double", "float", "int", "long", "short", "void",
];

/// Class index of a primitive, by name.
pub fn primitive_index(name: &str) -> Option<i32> {
    PRIMITIVE_CLASSES
        .iter()
        .position(|&p| p == name)
        .map(|i| i as i32)
}

/// Stable 31-based string hash used in synthetic type names.
pub(crate) fn name_hash(s: &str) -> i32 {
    s.chars()
        .fold(0i32, |h, c| h.wrapping_mul(31).wrapping_add(c as i32))
}

/// The kind of a type descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    /// One of the nine primitive classes
    Primitive,
    /// An ordinary class or interface
    Normal,
    /// An array type
    Array,
    /// The native storage sibling of an array type; carries class index -1
    /// and never appears in the type table
    ArrayNative,
    /// A synthetic closure-conversion type
    Lambda,
}

/// One slot of an instance layout: the declaring class, the field name and
/// its storage type.
#[derive(Debug, Clone)]
pub struct FieldLayout {
    /// Class that declared the field; `None` for synthetic slots
    pub declaring_class: Option<String>,
    /// Field name
    pub name: String,
    /// Storage type
    pub ty: WasmType,
}

impl FieldLayout {
    /// Create a field layout slot.
    pub fn new(declaring_class: Option<&str>, name: &str, ty: WasmType) -> Self {
        Self {
            declaring_class: declaring_class.map(str::to_string),
            name: name.to_string(),
            ty,
        }
    }
}

/// Array-specific descriptor data.
#[derive(Debug, Clone)]
pub struct ArrayData {
    /// Element type of the array
    pub element: WasmType,
    /// Class index of the element type (primitives 0..7, reference elements
    /// the owner's index, opaque references the index of the top type)
    pub component_class_index: i32,
    /// The registered native storage sibling; present only with GC arrays
    pub native_type: Option<TypeId>,
}

/// Lambda-specific descriptor data.
#[derive(Debug, Clone)]
pub struct LambdaData {
    /// Captured parameters, named `arg$1`, `arg$2` and so on
    pub param_fields: Vec<FieldLayout>,
    /// The implemented interface
    pub interface_type: TypeId,
    /// Name of the implemented interface method
    pub interface_method_name: String,
    /// The synthetic wrapper: loads captures, forwards parameters, calls the
    /// implementation method
    pub method: FunctionName,
    /// The implementation method behind the call site
    pub impl_method: FunctionName,
    /// Source line of the conversion, for diagnostics
    pub line_number: u32,
}

/// A registered type: identity, instance layout and dispatch tables.
///
/// Layout attributes are empty until the hierarchy scan runs; `code` and
/// `vtable_offset` stay unset until emission.
#[derive(Debug)]
pub struct TypeDescriptor {
    name: String,
    kind: TypeKind,
    class_index: i32,
    code: Option<u32>,
    needed_fields: FxHashSet<String>,
    fields: Vec<FieldLayout>,
    vtable: Vec<FunctionName>,
    instance_ofs: IndexSet<TypeId>,
    interface_methods: IndexMap<TypeId, Vec<FunctionName>>,
    vtable_offset: Option<u32>,
    array: Option<ArrayData>,
    lambda: Option<LambdaData>,
}

impl TypeDescriptor {
    fn new(name: String, kind: TypeKind, class_index: i32) -> Self {
        Self {
            name,
            kind,
            class_index,
            code: None,
            needed_fields: FxHashSet::default(),
            fields: Vec::new(),
            vtable: Vec::new(),
            instance_ofs: IndexSet::new(),
            interface_methods: IndexMap::new(),
            vtable_offset: None,
            array: None,
            lambda: None,
        }
    }

    /// The canonical type name (`/`-separated, `[`-prefixed for arrays).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The descriptor kind.
    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    /// The unique class index; -1 for native array siblings.
    pub fn class_index(&self) -> i32 {
        self.class_index
    }

    /// The struct type code assigned by the module writer; set at emission.
    pub fn code(&self) -> Option<u32> {
        self.code
    }

    /// Field names referenced by any compiled method on this type.
    pub fn needed_fields(&self) -> &FxHashSet<String> {
        &self.needed_fields
    }

    /// The instance layout, populated by the hierarchy scan.
    pub fn fields(&self) -> &[FieldLayout] {
        &self.fields
    }

    /// The v-table: slot `i` holds the function called for virtual-method
    /// index `i + 5`.
    pub fn vtable(&self) -> &[FunctionName] {
        &self.vtable
    }

    /// The types this one is assignable to, most-derived first; the type
    /// itself comes first.
    pub fn instance_ofs(&self) -> &IndexSet<TypeId> {
        &self.instance_ofs
    }

    /// Per-interface lists of the concrete functions realizing the
    /// interface's used methods, in i-table index order.
    pub fn interface_methods(&self) -> &IndexMap<TypeId, Vec<FunctionName>> {
        &self.interface_methods
    }

    /// Byte offset of this type's metadata blob in the data image; set
    /// exactly once during emission.
    pub fn vtable_offset(&self) -> Option<u32> {
        self.vtable_offset
    }

    /// Array data for `Array`/`ArrayNative` descriptors.
    pub fn array(&self) -> Option<&ArrayData> {
        self.array.as_ref()
    }

    /// Lambda data for `Lambda` descriptors.
    pub fn lambda(&self) -> Option<&LambdaData> {
        self.lambda.as_ref()
    }

    /// The component class index written into the metadata blob; -1 for
    /// everything that is not an array.
    pub fn component_class_index(&self) -> i32 {
        match self.kind {
            TypeKind::Array => self
                .array
                .as_ref()
                .map(|a| a.component_class_index)
                .unwrap_or(-1),
            _ => -1,
        }
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.name)
    }
}

/// Handle for an interned block type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockTypeId(usize);

impl BlockTypeId {
    /// The interning slot.
    pub fn index(self) -> usize {
        self.0
    }
}

type BlockKey = (Vec<WasmType>, Vec<WasmType>);

/// The canonical registry of all types used by a compilation unit.
pub struct TypeRegistry {
    options: CompilerOptions,
    arena: Vec<TypeDescriptor>,
    names: FxHashMap<String, TypeId>,
    arrays: FxHashMap<WasmType, TypeId>,
    /// Interned block types; the value is the code assigned at emission.
    block_types: IndexMap<BlockKey, Option<i32>>,
    next_class_index: i32,
    finished: bool,
    type_table_offset: u32,
}

impl TypeRegistry {
    /// Create an empty registry. The primitive classes are materialized on
    /// the first registration.
    pub fn new(options: CompilerOptions) -> Self {
        Self {
            options,
            arena: Vec::new(),
            names: FxHashMap::default(),
            arrays: FxHashMap::default(),
            block_types: IndexMap::new(),
            next_class_index: 0,
            finished: false,
            type_table_offset: 0,
        }
    }

    /// The compiler configuration this registry was created with.
    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    /// Count of registered descriptors.
    pub fn size(&self) -> usize {
        self.arena.len()
    }

    /// True once the scan phase finished; no registration is accepted after.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// The descriptor behind a handle.
    pub fn get(&self, id: TypeId) -> &TypeDescriptor {
        &self.arena[id.index()]
    }

    pub(crate) fn get_mut(&mut self, id: TypeId) -> &mut TypeDescriptor {
        &mut self.arena[id.index()]
    }

    /// Look up an already-registered type by name without creating it.
    pub fn by_name(&self, name: &str) -> Option<TypeId> {
        self.names.get(name).copied()
    }

    /// Iterate descriptors in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (TypeId, &TypeDescriptor)> {
        self.arena
            .iter()
            .enumerate()
            .map(|(i, d)| (TypeId::new(i as u32), d))
    }

    /// Byte offset of the type table in the data image; valid after
    /// emission.
    pub fn type_table_offset(&self) -> u32 {
        self.type_table_offset
    }

    /// The function user code calls to turn a class index into a class
    /// constant.
    pub fn class_constant_function() -> FunctionName {
        FunctionName::new("java/lang/Class", "classConstant", "(I)Ljava/lang/Class;")
    }

    fn check_state(&mut self, requested: &str) -> CompileResult<()> {
        trace!("type: {}", requested);
        if self.finished {
            return Err(CompileError::LateRegistration {
                name: requested.to_string(),
            });
        }
        if self.arena.is_empty() {
            for name in PRIMITIVE_CLASSES {
                let id = self.push_descriptor(name.to_string(), TypeKind::Primitive);
                self.names.insert(name.to_string(), id);
            }
        }
        Ok(())
    }

    fn push_descriptor(&mut self, name: String, kind: TypeKind) -> TypeId {
        let class_index = match kind {
            TypeKind::ArrayNative => -1,
            _ => {
                let index = self.next_class_index;
                self.next_class_index += 1;
                index
            }
        };
        let id = TypeId::new(self.arena.len() as u32);
        self.arena.push(TypeDescriptor::new(name, kind, class_index));
        id
    }

    /// Get the descriptor for `name`, creating it on first lookup.
    ///
    /// Names starting with `[` are parsed as array descriptors and resolve
    /// through [`array_type`](Self::array_type).
    pub fn value_of(&mut self, name: &str) -> CompileResult<TypeId> {
        if let Some(&id) = self.names.get(name) {
            return Ok(id);
        }
        if name.starts_with('[') {
            let mut parser = SignatureParser::new(name);
            let ty = parser
                .next(self)?
                .and_then(WasmType::as_ref_id)
                .ok_or_else(|| CompileError::InvalidSignature {
                    signature: name.to_string(),
                })?;
            return Ok(ty);
        }
        self.check_state(name)?;
        let id = self.push_descriptor(name.to_string(), TypeKind::Normal);
        self.names.insert(name.to_string(), id);
        Ok(id)
    }

    /// Get the array descriptor over the given element type, creating it on
    /// first lookup.
    pub fn array_type(&mut self, element: WasmType) -> CompileResult<TypeId> {
        if let Some(&id) = self.arrays.get(&element) {
            return Ok(id);
        }

        let component_class_index = match element {
            WasmType::Value(value) => match value {
                ValueType::Bool => 0,
                ValueType::I8 => 1,
                ValueType::U16 => 2,
                ValueType::F64 => 3,
                ValueType::F32 => 4,
                ValueType::I32 => 5,
                ValueType::I64 => 6,
                ValueType::I16 => 7,
                ValueType::Eqref | ValueType::Externref => {
                    let object = self.value_of(OBJECT_CLASS)?;
                    self.get(object).class_index
                }
                ValueType::V128 | ValueType::Funcref => {
                    return Err(CompileError::UnsupportedType {
                        type_name: value.to_string(),
                    });
                }
            },
            WasmType::Ref(id) => self.get(id).class_index,
        };

        let name = self.array_name(element);
        self.check_state(&name)?;

        // The native sibling precedes the array in the registry, so its blob
        // lands first in the data image.
        let native_type = if self.options.use_gc {
            let native_name = format!("{}.native", name);
            let native_id = self.push_descriptor(native_name.clone(), TypeKind::ArrayNative);
            self.get_mut(native_id).array = Some(ArrayData {
                element,
                component_class_index,
                native_type: None,
            });
            self.names.insert(native_name, native_id);
            Some(native_id)
        } else {
            None
        };

        let id = self.push_descriptor(name.clone(), TypeKind::Array);
        self.get_mut(id).array = Some(ArrayData {
            element,
            component_class_index,
            native_type,
        });
        self.names.insert(name, id);
        self.arrays.insert(element, id);
        Ok(id)
    }

    fn array_name(&self, element: WasmType) -> String {
        match element {
            WasmType::Value(value) => match value {
                ValueType::Bool => "[Z".to_string(),
                ValueType::I8 => "[B".to_string(),
                ValueType::U16 => "[C".to_string(),
                ValueType::F64 => "[D".to_string(),
                ValueType::F32 => "[F".to_string(),
                ValueType::I32 => "[I".to_string(),
                ValueType::I64 => "[J".to_string(),
                ValueType::I16 => "[S".to_string(),
                ValueType::Eqref | ValueType::Externref => "[Ljava/lang/Object;".to_string(),
                ValueType::V128 | ValueType::Funcref => format!("[{}", value),
            },
            WasmType::Ref(id) => {
                let element_type = self.get(id);
                match element_type.kind() {
                    TypeKind::Array => format!("[{}", element_type.name()),
                    _ => format!("[L{};", element_type.name()),
                }
            }
        }
    }

    /// Get the synthetic type for a closure-conversion call site, creating it
    /// on first lookup.
    ///
    /// The key combines the implementation method's owner and name with the
    /// name's hash, so the same call site always resolves to the same
    /// descriptor. Captured parameter types come from the factory signature;
    /// its trailing return names the implemented interface.
    pub fn lambda_type(
        &mut self,
        bootstrap: &BootstrapMethod,
        factory_signature: &str,
        interface_method_name: &str,
        line_number: u32,
    ) -> CompileResult<TypeId> {
        let mut parser = SignatureParser::new(factory_signature);
        let mut params = Vec::new();
        while let Some(ty) = parser.next(self)? {
            params.push(ty);
        }
        let interface_type = parser
            .next(self)?
            .and_then(WasmType::as_ref_id)
            .ok_or_else(|| CompileError::InvalidSignature {
                signature: factory_signature.to_string(),
            })?;

        let type_name = format!(
            "{}$${}/{}",
            bootstrap.impl_class,
            bootstrap.impl_name,
            name_hash(&bootstrap.impl_name).unsigned_abs()
        );
        if let Some(&id) = self.names.get(&type_name) {
            return Ok(id);
        }
        self.check_state(&type_name)?;

        let param_fields = params
            .iter()
            .enumerate()
            .map(|(i, &ty)| FieldLayout::new(None, &format!("arg${}", i + 1), ty))
            .collect();
        let method = FunctionName::new(&type_name, interface_method_name, &bootstrap.sam_signature);
        let impl_method = FunctionName::new(
            &bootstrap.impl_class,
            &bootstrap.impl_name,
            &bootstrap.impl_signature,
        );

        let id = self.push_descriptor(type_name.clone(), TypeKind::Lambda);
        self.get_mut(id).lambda = Some(LambdaData {
            param_fields,
            interface_type,
            interface_method_name: interface_method_name.to_string(),
            method,
            impl_method,
            line_number,
        });
        self.names.insert(type_name, id);
        Ok(id)
    }

    /// Intern a block type by structural equality.
    pub fn block_type(&mut self, params: Vec<WasmType>, results: Vec<WasmType>) -> BlockTypeId {
        let key = (params, results);
        if let Some(index) = self.block_types.get_index_of(&key) {
            return BlockTypeId(index);
        }
        let index = self.block_types.len();
        self.block_types.insert(key, None);
        BlockTypeId(index)
    }

    /// The (params, results) shape of an interned block type.
    pub fn block_signature(&self, id: BlockTypeId) -> (&[WasmType], &[WasmType]) {
        let ((params, results), _) = self
            .block_types
            .get_index(id.index())
            .expect("block type handle out of range");
        (params, results)
    }

    /// The code assigned to a block type by the module writer; set at
    /// emission.
    pub fn block_code(&self, id: BlockTypeId) -> Option<i32> {
        self.block_types
            .get_index(id.index())
            .and_then(|(_, code)| *code)
    }

    /// Count of interned block types.
    pub fn block_type_count(&self) -> usize {
        self.block_types.len()
    }

    /// Mark a field as referenced by compiled code. Only allowed before the
    /// scan phase finishes.
    pub fn use_field_name(&mut self, id: TypeId, field: &str) -> CompileResult<()> {
        if self.finished {
            return Err(CompileError::LateRegistration {
                name: format!("{}.{}", self.get(id).name, field),
            });
        }
        self.get_mut(id).needed_fields.insert(field.to_string());
        Ok(())
    }

    /// Compile-time subtype test: is `sub` assignable to `sup`?
    ///
    /// Walks superclass and interface chains through the loader; loader I/O
    /// is wrapped with the class being resolved.
    pub fn is_sub_type_of(
        &self,
        sub: TypeId,
        sup: TypeId,
        loader: &mut dyn ClassFileLoader,
    ) -> CompileResult<bool> {
        if sub == sup {
            return Ok(true);
        }
        let sub_type = self.get(sub);
        let sup_type = self.get(sup);
        if sub_type.kind() == TypeKind::Lambda {
            let interface = sub_type.lambda.as_ref().map(|l| l.interface_type);
            return Ok(interface == Some(sup));
        }
        if sub_type.kind() != sup_type.kind() {
            return Ok(false);
        }

        let sup_name = sup_type.name();
        let mut current = sub_type.name().to_string();
        loop {
            let Some(class_file) = load_class(loader, &current)? else {
                return Ok(false);
            };
            if implements_interface(loader, &class_file, sup_name)? {
                return Ok(true);
            }
            match class_file.super_class() {
                None => return Ok(false),
                Some(super_name) => {
                    if super_name == sup_name {
                        return Ok(true);
                    }
                    current = super_name.to_string();
                }
            }
        }
    }
}

/// Resolve a class through the loader, wrapping I/O with the class name.
pub(crate) fn load_class(
    loader: &mut dyn ClassFileLoader,
    name: &str,
) -> CompileResult<Option<Arc<ClassFile>>> {
    loader.get(name).map_err(|source| CompileError::Io {
        class_name: name.to_string(),
        source,
    })
}

fn implements_interface(
    loader: &mut dyn ClassFileLoader,
    class_file: &ClassFile,
    target: &str,
) -> CompileResult<bool> {
    for interface_name in class_file.interfaces() {
        if interface_name == target {
            return Ok(true);
        }
        if let Some(interface_file) = load_class(loader, interface_name)? {
            if implements_interface(loader, &interface_file, target)? {
                return Ok(true);
            }
        }
    }
    Ok(false)
}
