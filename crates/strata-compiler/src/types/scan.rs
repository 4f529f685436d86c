//! Hierarchy scanning
//!
//! Once bytecode translation has registered every referenced type and marked
//! the reachable methods and fields, the scan walks each descriptor's
//! superclass and interface chains and fills in the instance layout, the
//! v-table, the i-tables and the instanceof set. The scan runs before the
//! finish latch; types first referenced while scanning (field types,
//! superclasses) are appended to the registry and scanned in the same pass.

use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use rustc_hash::FxHashSet;
use tracing::debug;

use strata_classfile::{ClassFile, ClassFileLoader, ClassKind, MethodRecord, CONSTRUCTOR};
use strata_wasm::{TypeId, ValueType, WasmType};

use crate::dispatch;
use crate::error::{CompileError, CompileResult};
use crate::functions::{FunctionManager, FunctionName};
use crate::signature::SignatureParser;

use super::{
    load_class, ArrayData, FieldLayout, TypeKind, TypeRegistry, FIELD_HASHCODE, FIELD_VALUE,
    FIELD_VTABLE, OBJECT_CLASS, VTABLE_FIRST_FUNCTION_INDEX,
};

/// Layout and dispatch tables under construction for one descriptor.
///
/// Built aside and written back in one step, so walking the hierarchy can
/// keep resolving (and registering) other types through the registry.
#[derive(Default)]
struct ScanState {
    fields: Vec<FieldLayout>,
    vtable: Vec<FunctionName>,
    instance_ofs: IndexSet<TypeId>,
    interface_methods: IndexMap<TypeId, Vec<FunctionName>>,
}

impl ScanState {
    fn push_object_header(&mut self, declaring_class: &str) {
        self.fields.push(FieldLayout::new(
            Some(declaring_class),
            FIELD_VTABLE,
            WasmType::Value(ValueType::I32),
        ));
        self.fields.push(FieldLayout::new(
            Some(declaring_class),
            FIELD_HASHCODE,
            WasmType::Value(ValueType::I32),
        ));
    }
}

impl TypeRegistry {
    /// Scan the hierarchy of every registered type.
    ///
    /// Iterates in registration order; descriptors appended during the scan
    /// are picked up before the pass ends.
    pub fn scan_type_hierarchy(
        &mut self,
        functions: &mut FunctionManager,
        loader: &mut dyn ClassFileLoader,
    ) -> CompileResult<()> {
        let mut index = 0;
        while index < self.size() {
            self.scan_type(TypeId::new(index as u32), functions, loader)?;
            index += 1;
        }
        Ok(())
    }

    fn scan_type(
        &mut self,
        id: TypeId,
        functions: &mut FunctionManager,
        loader: &mut dyn ClassFileLoader,
    ) -> CompileResult<()> {
        let name = self.get(id).name().to_string();
        debug!("scan type hierarchy: {}", name);

        let mut state = ScanState::default();
        state.instance_ofs.insert(id);

        match self.get(id).kind() {
            TypeKind::Primitive => {}
            TypeKind::Array => {
                let mut all_needed = FxHashSet::default();
                self.list_struct_fields(&mut state, OBJECT_CLASS, functions, loader, &mut all_needed)?;
                state.fields.push(FieldLayout::new(
                    None,
                    FIELD_VALUE,
                    self.array_storage_type(id)?,
                ));
            }
            TypeKind::ArrayNative => {
                // the single flexible slot carrying the element storage
                let element = self.array_data(id)?.element;
                state.fields.push(FieldLayout::new(None, "", element));
            }
            TypeKind::Lambda => {
                let mut all_needed = FxHashSet::default();
                self.list_struct_fields(&mut state, OBJECT_CLASS, functions, loader, &mut all_needed)?;

                let Some(lambda) = self.get(id).lambda().cloned() else {
                    return Err(CompileError::Internal {
                        message: format!("lambda descriptor without lambda data: {}", name),
                    });
                };
                state.fields.extend(lambda.param_fields.iter().cloned());
                state
                    .interface_methods
                    .insert(lambda.interface_type, vec![lambda.method.clone()]);

                let interface_name = self.get(lambda.interface_type).name().to_string();
                functions.set_itable_index(
                    &FunctionName::new(
                        &interface_name,
                        &lambda.interface_method_name,
                        &lambda.method.signature,
                    ),
                    2,
                );

                let (wrapper, impl_needs_this) = dispatch::lambda_wrapper(self, id, &lambda, loader)?;
                functions.add_replacement(wrapper);
                functions.mark_as_needed(&lambda.impl_method, impl_needs_this);
            }
            TypeKind::Normal => {
                self.list_interfaces(&name, &mut state, functions, loader)?;
                let mut all_needed = FxHashSet::default();
                self.list_struct_fields(&mut state, &name, functions, loader, &mut all_needed)?;
            }
        }

        let descriptor = self.get_mut(id);
        descriptor.fields = state.fields;
        descriptor.vtable = state.vtable;
        descriptor.instance_ofs = state.instance_ofs;
        descriptor.interface_methods = state.interface_methods;
        Ok(())
    }

    fn array_data(&self, id: TypeId) -> CompileResult<&ArrayData> {
        self.get(id).array().ok_or_else(|| CompileError::Internal {
            message: format!("array descriptor without array data: {}", self.get(id).name()),
        })
    }

    fn array_storage_type(&self, id: TypeId) -> CompileResult<WasmType> {
        let array = self.array_data(id)?;
        Ok(match array.native_type {
            // GC arrays hold a reference to the native storage sibling
            Some(native) => WasmType::Ref(native),
            // linear-memory arrays hold the storage address
            None => WasmType::Value(ValueType::I32),
        })
    }

    /// List the instance fields of `class_name` and its superclasses into the
    /// scan state, and build the v-table while walking back down.
    ///
    /// The aggregate needed-field set grows while descending, so fields a
    /// subclass uses on a superclass are kept when that level's fields are
    /// appended. The base object header is written at the hierarchy root, so
    /// every layout shares the same prefix.
    fn list_struct_fields(
        &mut self,
        state: &mut ScanState,
        class_name: &str,
        functions: &mut FunctionManager,
        loader: &mut dyn ClassFileLoader,
        all_needed: &mut FxHashSet<String>,
    ) -> CompileResult<()> {
        let class_file =
            load_class(loader, class_name)?.ok_or_else(|| CompileError::MissingClass {
                name: class_name.to_string(),
            })?;

        // interfaces carry no state, but need the header prefix so an
        // interface reference can be treated as the top type
        if class_file.kind() == ClassKind::Interface {
            state.push_object_header(class_name);
            return Ok(());
        }

        if let Some(type_id) = self.by_name(class_name) {
            let needed: Vec<String> = self.get(type_id).needed_fields().iter().cloned().collect();
            all_needed.extend(needed);
            state.instance_ofs.insert(type_id);
        }

        match class_file.super_class() {
            Some(super_name) => {
                self.list_struct_fields(state, super_name, functions, loader, all_needed)?;
            }
            None => state.push_object_header(class_name),
        }

        for field in class_file.fields() {
            if field.is_static || !all_needed.contains(&field.name) {
                continue;
            }
            let mut parser = SignatureParser::new(&field.descriptor);
            let ty = parser
                .next(self)?
                .ok_or_else(|| CompileError::InvalidSignature {
                    signature: field.descriptor.clone(),
                })?;
            state
                .fields
                .push(FieldLayout::new(Some(class_name), &field.name, ty));
        }

        for method in class_file.methods() {
            if method.is_static || method.name == CONSTRUCTOR {
                continue;
            }
            let func = FunctionName::from_method(class_name, method);
            add_or_update_vtable(state, functions, func, false);
        }

        // used default implementations from the direct interfaces
        for interface_name in class_file.interfaces() {
            let Some(interface_file) = load_class(loader, interface_name)? else {
                continue;
            };
            for method in interface_file.methods() {
                let func = FunctionName::from_method(interface_name, method);
                if functions.is_used(&func) {
                    add_or_update_vtable(state, functions, func, true);
                }
            }
        }
        Ok(())
    }

    /// Enumerate every interface implemented anywhere in the hierarchy, add
    /// them to the instanceof set, and build the i-table entry lists.
    ///
    /// Abstract classes never have instances, so no i-tables are built for
    /// them; the instanceof entries still are.
    fn list_interfaces(
        &mut self,
        name: &str,
        state: &mut ScanState,
        functions: &mut FunctionManager,
        loader: &mut dyn ClassFileLoader,
    ) -> CompileResult<()> {
        let mut interface_types: IndexSet<TypeId> = IndexSet::new();
        let mut interface_names: IndexSet<String> = IndexSet::new();
        let mut class_files: Vec<Arc<ClassFile>> = Vec::new();

        let mut class_file =
            load_class(loader, name)?.ok_or_else(|| CompileError::MissingClass {
                name: name.to_string(),
            })?;
        loop {
            self.list_interface_types(
                &class_file,
                state,
                loader,
                &mut interface_types,
                &mut interface_names,
            )?;
            let super_name = class_file.super_class().map(str::to_string);
            class_files.push(class_file);
            match super_name {
                None => break,
                Some(super_name) => {
                    class_file = load_class(loader, &super_name)?.ok_or_else(|| {
                        CompileError::MissingClass { name: super_name.clone() }
                    })?;
                }
            }
        }

        if class_files[0].is_abstract() {
            return Ok(());
        }

        for interface_type in interface_types {
            let interface_name = self.get(interface_type).name().to_string();
            let Some(interface_file) = load_class(loader, &interface_name)? else {
                continue;
            };
            for interface_method in interface_file.methods() {
                let interface_func = FunctionName::from_method(&interface_name, interface_method);
                if !functions.is_used(&interface_func) {
                    continue;
                }

                let mut implementation: Option<(String, MethodRecord)> = None;
                for class_file in &class_files {
                    if let Some(method) = concrete_method(class_file, &interface_func) {
                        implementation = Some((class_file.name().to_string(), method.clone()));
                        break;
                    }
                }
                if implementation.is_none() {
                    // a default implementation in any visited interface
                    for candidate in &interface_names {
                        if let Some(candidate_file) = load_class(loader, candidate)? {
                            if let Some(method) = concrete_method(&candidate_file, &interface_func)
                            {
                                implementation = Some((candidate.clone(), method.clone()));
                                break;
                            }
                        }
                    }
                }

                match implementation {
                    Some((owner, method)) => {
                        let implementation_func = FunctionName::from_method(&owner, &method);
                        functions.mark_as_needed(&implementation_func, !method.is_static);
                        let methods = state.interface_methods.entry(interface_type).or_default();
                        methods.push(implementation_func);
                        // the class index and next-block offset take the
                        // first two i-table slots
                        functions.set_itable_index(&interface_func, methods.len() as u32 + 1);
                    }
                    None => {
                        return Err(CompileError::MissingImplementation {
                            method: interface_func.full_name(),
                            type_name: name.to_string(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Collect interfaces reachable from `class_file`: direct interfaces
    /// first, transitive ones deferred to a second pass. The deferral keeps
    /// default-method resolution preferring the nearest declaration.
    fn list_interface_types(
        &self,
        class_file: &ClassFile,
        state: &mut ScanState,
        loader: &mut dyn ClassFileLoader,
        interface_types: &mut IndexSet<TypeId>,
        interface_names: &mut IndexSet<String>,
    ) -> CompileResult<()> {
        let mut deferred: Vec<Arc<ClassFile>> = Vec::new();
        for interface_name in class_file.interfaces() {
            if interface_names.insert(interface_name.clone()) {
                if let Some(type_id) = self.by_name(interface_name) {
                    interface_types.insert(type_id);
                    state.instance_ofs.insert(type_id);
                }
                if let Some(interface_file) = load_class(loader, interface_name)? {
                    deferred.push(interface_file);
                }
            }
        }
        for interface_file in deferred {
            self.list_interface_types(
                &interface_file,
                state,
                loader,
                interface_types,
                interface_names,
            )?;
        }
        Ok(())
    }
}

fn concrete_method<'a>(class_file: &'a ClassFile, func: &FunctionName) -> Option<&'a MethodRecord> {
    class_file
        .method(&func.method_name, &func.signature)
        .filter(|m| !m.is_abstract)
}

/// Add `func` to the v-table or update the slot an override already holds.
///
/// A same-name default method never displaces a slot that already has an
/// i-table index assigned, so the first default wins when two interfaces
/// collide. Whoever ends up in a slot is recorded with the slot's virtual
/// index, offset past the reserved metadata header slots.
fn add_or_update_vtable(
    state: &mut ScanState,
    functions: &mut FunctionManager,
    func: FunctionName,
    is_default: bool,
) {
    let slot = state
        .vtable
        .iter()
        .position(|existing| {
            existing.method_name == func.method_name && existing.signature == func.signature
        });
    match slot {
        Some(index) => {
            let keep_existing = is_default && functions.itable_index(&state.vtable[index]).is_some();
            if !keep_existing {
                state.vtable[index] = func.clone();
                // an override of a used method is itself reachable
                functions.mark_as_needed(&func, true);
            }
            functions.set_vtable_index(&func, index as u32 + VTABLE_FIRST_FUNCTION_INDEX);
        }
        None => {
            if functions.is_used(&func) {
                state.vtable.push(func.clone());
                let index = (state.vtable.len() - 1) as u32;
                functions.set_vtable_index(&func, index + VTABLE_FIRST_FUNCTION_INDEX);
            }
        }
    }
}
