//! Synthetic dispatch routines
//!
//! Dynamic dispatch and subtype testing compile to calls into four small
//! routines that index into the type metadata blobs (see [`crate::types`] for
//! the blob layout). The routines are assembled as WebAssembly text, parsed
//! by the same parser as user code, and registered with the function manager
//! as replacements for the bytecode-level primitives of the same role. Text
//! instead of raw binary keeps them debuggable.
//!
//! Every virtual call site calls `callVirtual`, every interface call site
//! `callInterface`, every `instanceof` check and checked cast the remaining
//! two; the names and signatures are ABI shared with the bytecode
//! translator.

use strata_classfile::ClassFileLoader;
use strata_wasm::{TypeId, ValueType, WasmType};

use crate::error::CompileResult;
use crate::functions::{FunctionManager, FunctionName, SyntheticFunction};
use crate::signature::SignatureParser;
use crate::types::{
    load_class, LambdaData, TypeRegistry, FIELD_VTABLE, OBJECT_CLASS,
    TYPE_DESCRIPTION_INSTANCEOF_OFFSET, TYPE_DESCRIPTION_INTERFACE_OFFSET,
};

/// Register the four dispatch routines with the function manager.
pub fn register_dispatch_functions(
    types: &mut TypeRegistry,
    functions: &mut FunctionManager,
) -> CompileResult<()> {
    functions.add_replacement(call_virtual(types)?);
    functions.add_replacement(call_interface(types)?);
    functions.add_replacement(instance_of(types)?);
    functions.add_replacement(cast(types)?);
    Ok(())
}

/// `callVirtual(this, vFuncIndex) -> functionIndex`
///
/// Loads the v-table pointer from the receiver's first field, adds the
/// virtual index as a byte offset and reads the function index stored there.
pub fn call_virtual(types: &mut TypeRegistry) -> CompileResult<SyntheticFunction> {
    let object = types.value_of(OBJECT_CLASS)?;
    let wat = format!(
        r#"local.get 0
struct.get {object} {vtable}
local.get 1
i32.add
i32.load offset=0 align=4
return"#,
        object = OBJECT_CLASS,
        vtable = FIELD_VTABLE,
    );
    Ok(SyntheticFunction {
        name: FunctionName::new("", "callVirtual", "(Ljava/lang/Object;I)I"),
        params: vec![WasmType::Ref(object), WasmType::Value(ValueType::I32)],
        results: vec![WasmType::Value(ValueType::I32)],
        wat,
    })
}

/// `callInterface(this, classIndex, vFuncIndex) -> functionIndex`
///
/// Locates the i-table behind the receiver's v-table pointer and walks its
/// linked blocks: a block whose class index matches yields the function index
/// at the given byte offset; class index 0 ends the walk and traps (the
/// failed-cast slot); anything else advances by the next-block offset stored
/// at block+4.
pub fn call_interface(types: &mut TypeRegistry) -> CompileResult<SyntheticFunction> {
    let object = types.value_of(OBJECT_CLASS)?;
    let wat = format!(
        r#"local.get 0
struct.get {object} {vtable}
local.tee 3
i32.load offset={interfaces} align=4
local.get 3
i32.add
local.set 3
loop
  local.get 3
  i32.load offset=0 align=4
  local.tee 4
  local.get 1
  i32.eq
  if
    local.get 3
    local.get 2
    i32.add
    i32.load offset=0 align=4
    return
  end
  local.get 4
  i32.eqz
  if
    unreachable
  end
  local.get 3
  i32.const 4
  i32.add
  i32.load offset=0 align=4
  local.get 3
  i32.add
  local.set 3
  br 0
end
unreachable"#,
        object = OBJECT_CLASS,
        vtable = FIELD_VTABLE,
        interfaces = TYPE_DESCRIPTION_INTERFACE_OFFSET,
    );
    Ok(SyntheticFunction {
        name: FunctionName::new("", "callInterface", "(Ljava/lang/Object;II)I"),
        params: vec![
            WasmType::Ref(object),
            WasmType::Value(ValueType::I32),
            WasmType::Value(ValueType::I32),
        ],
        results: vec![WasmType::Value(ValueType::I32)],
        wat,
    })
}

/// `instanceof(this, classIndex) -> {0, 1}`
///
/// Null is never an instance. Otherwise reads the instanceof list behind the
/// v-table pointer and scans its class indices for a match.
pub fn instance_of(types: &mut TypeRegistry) -> CompileResult<SyntheticFunction> {
    let object = types.value_of(OBJECT_CLASS)?;
    let wat = format!(
        r#"local.get 0
ref.is_null
if
  i32.const 0
  return
end
local.get 0
struct.get {object} {vtable}
local.tee 2
i32.load offset={instance_ofs} align=4
local.get 2
i32.add
local.tee 2
i32.load offset=0 align=4
i32.const 4
i32.mul
local.get 2
i32.add
local.set 3
loop
  local.get 2
  local.get 3
  i32.eq
  if
    i32.const 0
    return
  end
  local.get 2
  i32.const 4
  i32.add
  local.tee 2
  i32.load offset=0 align=4
  local.get 1
  i32.ne
  br_if 0
end
i32.const 1
return"#,
        object = OBJECT_CLASS,
        vtable = FIELD_VTABLE,
        instance_ofs = TYPE_DESCRIPTION_INSTANCEOF_OFFSET,
    );
    Ok(SyntheticFunction {
        name: instance_of_name(),
        params: vec![WasmType::Ref(object), WasmType::Value(ValueType::I32)],
        results: vec![WasmType::Value(ValueType::I32)],
        wat,
    })
}

/// `cast(this, classIndex) -> this`
///
/// Null passes through; otherwise delegates to `instanceof` and traps on a
/// mismatch.
pub fn cast(types: &mut TypeRegistry) -> CompileResult<SyntheticFunction> {
    let object = types.value_of(OBJECT_CLASS)?;
    let wat = format!(
        r#"local.get 0
ref.is_null
if
  local.get 0
  return
end
local.get 0
local.get 1
call ${instance_of}
if
  local.get 0
  return
end
unreachable"#,
        instance_of = instance_of_name().full_name(),
    );
    Ok(SyntheticFunction {
        name: FunctionName::new("", "cast", "(Ljava/lang/Object;I)Ljava/lang/Object;"),
        params: vec![WasmType::Ref(object), WasmType::Value(ValueType::I32)],
        results: vec![WasmType::Ref(object)],
        wat,
    })
}

fn instance_of_name() -> FunctionName {
    FunctionName::new("", "instanceof", "(Ljava/lang/Object;I)I")
}

/// Build the wrapper function of a lambda type: load the captured fields,
/// forward the declared parameters and call the implementation method.
///
/// Returns the wrapper and whether the implementation method takes a
/// receiver (an instance implementation captures it as `arg$1`).
pub(crate) fn lambda_wrapper(
    types: &mut TypeRegistry,
    id: TypeId,
    lambda: &LambdaData,
    loader: &mut dyn ClassFileLoader,
) -> CompileResult<(SyntheticFunction, bool)> {
    let type_name = lambda.method.class_name.clone();

    let mut parser = SignatureParser::new(&lambda.method.signature);
    let mut sam_params = Vec::new();
    while let Some(ty) = parser.next(types)? {
        sam_params.push(ty);
    }
    let sam_result = parser.next(types)?;

    let mut wat = String::new();
    for field in &lambda.param_fields {
        wat.push_str("local.get 0\n");
        wat.push_str(&format!("struct.get {} {}\n", type_name, field.name));
    }
    for index in 1..=sam_params.len() {
        wat.push_str(&format!("local.get {}\n", index));
    }
    wat.push_str(&format!("call ${}\n", lambda.impl_method.full_name()));
    wat.push_str("return");

    let impl_needs_this = load_class(loader, &lambda.impl_method.class_name)?
        .as_ref()
        .and_then(|class_file| {
            class_file.method(&lambda.impl_method.method_name, &lambda.impl_method.signature)
        })
        .map(|method| !method.is_static)
        .unwrap_or(false);

    let mut params = Vec::with_capacity(sam_params.len() + 1);
    params.push(WasmType::Ref(id));
    params.extend(sam_params);
    let results = sam_result.into_iter().collect();

    let wrapper = SyntheticFunction {
        name: lambda.method.clone(),
        params,
        results,
        wat,
    };
    Ok((wrapper, impl_needs_this))
}
