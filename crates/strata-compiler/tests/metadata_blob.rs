//! Emission tests: the bit-exact metadata blob layout, the type table and
//! the synthetic accessors, read back out of the data image with the ABI
//! byte offsets.

use strata_classfile::{ClassFile, ClassKind, MemoryClassLoader};
use strata_compiler::dispatch::register_dispatch_functions;
use strata_compiler::{
    CompileError, CompilerOptions, FunctionManager, FunctionName, ModuleWriter, StringPool,
    TypeRegistry, ValueType, WasmType,
};
use strata_wasm::read_i32;

const INTERFACE_OFFSET: usize = 0;
const INSTANCEOF_OFFSET: usize = 4;
const TYPE_NAME: usize = 8;
const ARRAY_TYPE: usize = 12;
const FIELDS_OFFSET: usize = 16;

struct Emitted {
    types: TypeRegistry,
    functions: FunctionManager,
    strings: StringPool,
    writer: ModuleWriter,
}

/// Object, `app/A { int x; }` (x needed), interface `app/I { default f }`
/// (f used) and `app/C implements I`, scanned and written.
fn emit_sample(options: CompilerOptions) -> Emitted {
    let mut loader = MemoryClassLoader::new();
    loader.add(ClassFile::root("java/lang/Object"));
    loader.add(ClassFile::new("app/A", ClassKind::Class).with_field("x", "I"));
    loader.add(ClassFile::new("app/I", ClassKind::Interface).with_method("f", "()V"));
    loader.add(ClassFile::new("app/C", ClassKind::Class).with_interface("app/I"));

    let mut types = TypeRegistry::new(options);
    let mut functions = FunctionManager::new();
    let mut strings = StringPool::new();
    let mut writer = ModuleWriter::new();

    // registers java/lang/Object as the first reference type, the way the
    // compiler driver does before translating any method
    register_dispatch_functions(&mut types, &mut functions).unwrap();

    let a = types.value_of("app/A").unwrap();
    types.use_field_name(a, "x").unwrap();
    types.value_of("app/I").unwrap();
    types.value_of("app/C").unwrap();
    types.array_type(WasmType::Value(ValueType::I32)).unwrap();
    functions.mark_as_needed(&FunctionName::new("app/I", "f", "()V"), true);

    types.scan_type_hierarchy(&mut functions, &mut loader).unwrap();
    types
        .prepare_finish(&mut writer, &mut functions, &mut strings)
        .unwrap();

    Emitted {
        types,
        functions,
        strings,
        writer,
    }
}

fn blob_offset(emitted: &Emitted, name: &str) -> usize {
    let id = emitted.types.by_name(name).unwrap();
    emitted.types.get(id).vtable_offset().unwrap() as usize
}

#[test]
fn test_type_table_is_keyed_by_class_index() {
    let emitted = emit_sample(CompilerOptions::default());
    let data = emitted.writer.data();
    let table = emitted.types.type_table_offset() as usize;

    for (_, descriptor) in emitted.types.iter() {
        if descriptor.class_index() < 0 {
            continue;
        }
        let entry = table + 4 * descriptor.class_index() as usize;
        assert_eq!(
            read_i32(data, entry),
            descriptor.vtable_offset().unwrap() as i32,
            "type table entry of {}",
            descriptor.name()
        );
    }
}

#[test]
fn test_type_table_excludes_native_array_siblings() {
    let emitted = emit_sample(CompilerOptions { use_gc: true });
    let data = emitted.writer.data();
    let table = emitted.types.type_table_offset() as usize;

    let indexable = emitted
        .types
        .iter()
        .filter(|(_, d)| d.class_index() >= 0)
        .count();
    assert_eq!(data.len(), table + 4 * indexable);

    // the table still lines up past the sibling
    for (_, descriptor) in emitted.types.iter() {
        if descriptor.class_index() < 0 {
            continue;
        }
        let entry = table + 4 * descriptor.class_index() as usize;
        assert_eq!(
            read_i32(data, entry),
            descriptor.vtable_offset().unwrap() as i32
        );
    }
}

#[test]
fn test_scalar_field_blob() {
    let emitted = emit_sample(CompilerOptions::default());
    let data = emitted.writer.data().to_vec();
    let blob = blob_offset(&emitted, "app/A");

    // no virtual methods: the i-table starts right after the header and
    // holds only the terminator
    assert_eq!(read_i32(&data, blob + INTERFACE_OFFSET), 20);
    assert_eq!(read_i32(&data, blob + 20), 0);

    // instanceof: count 2, app/A first, java/lang/Object second
    let instance_ofs = blob + read_i32(&data, blob + INSTANCEOF_OFFSET) as usize;
    assert_eq!(read_i32(&data, instance_ofs), 2);
    let a = emitted.types.by_name("app/A").unwrap();
    let object = emitted.types.by_name("java/lang/Object").unwrap();
    assert_eq!(
        read_i32(&data, instance_ofs + 4),
        emitted.types.get(a).class_index()
    );
    assert_eq!(
        read_i32(&data, instance_ofs + 8),
        emitted.types.get(object).class_index()
    );

    // not an array
    assert_eq!(read_i32(&data, blob + ARRAY_TYPE), -1);

    // field descriptor list: (.vtable, .hashcode, x) as (name id, i32) pairs
    let fields = blob + read_i32(&data, blob + FIELDS_OFFSET) as usize;
    let i32_code = ValueType::I32.code();
    for (slot, name) in [".vtable", ".hashcode", "x"].iter().enumerate() {
        let entry = fields + 8 * slot;
        let name_id = read_i32(&data, entry);
        assert_eq!(emitted.strings.lookup(name_id), Some(*name));
        assert_eq!(read_i32(&data, entry + 4), i32_code);
    }
}

#[test]
fn test_type_name_round_trips_dotted() {
    let emitted = emit_sample(CompilerOptions::default());
    let data = emitted.writer.data();

    let blob = blob_offset(&emitted, "app/A");
    let name_id = read_i32(data, blob + TYPE_NAME);
    assert_eq!(emitted.strings.lookup(name_id), Some("app.A"));

    let blob = blob_offset(&emitted, "java/lang/Object");
    let name_id = read_i32(data, blob + TYPE_NAME);
    assert_eq!(emitted.strings.lookup(name_id), Some("java.lang.Object"));
}

#[test]
fn test_interface_dispatch_blob() {
    let emitted = emit_sample(CompilerOptions::default());
    let data = emitted.writer.data();
    let blob = blob_offset(&emitted, "app/C");

    let i = emitted.types.by_name("app/I").unwrap();
    let i_f = FunctionName::new("app/I", "f", "()V");

    // one i-table block: interface class index, next-block offset, one slot
    let itable = blob + read_i32(data, blob + INTERFACE_OFFSET) as usize;
    assert_eq!(read_i32(data, itable), emitted.types.get(i).class_index());
    assert_eq!(read_i32(data, itable + 4), 12);
    // the method sits at byte offset i-table-index * 4 inside the block
    assert_eq!(emitted.functions.itable_index(&i_f), Some(2));
    assert_eq!(
        read_i32(data, itable + 8),
        emitted.functions.function_id(&i_f).unwrap() as i32
    );
    // terminator follows the block
    assert_eq!(read_i32(data, itable + 12), 0);
}

#[test]
fn test_vtable_slots_hold_function_ids() {
    let emitted = emit_sample(CompilerOptions::default());
    let data = emitted.writer.data();
    let blob = blob_offset(&emitted, "app/C");

    let c = emitted.types.by_name("app/C").unwrap();
    let vtable = emitted.types.get(c).vtable();
    assert!(!vtable.is_empty());
    for (slot, func) in vtable.iter().enumerate() {
        assert_eq!(
            read_i32(data, blob + 20 + 4 * slot),
            emitted.functions.function_id(func).unwrap() as i32
        );
        assert_eq!(
            emitted.functions.vtable_index(func),
            Some(slot as u32 + 5)
        );
    }
}

#[test]
fn test_primitive_array_blob() {
    let emitted = emit_sample(CompilerOptions { use_gc: true });
    let data = emitted.writer.data();
    let blob = blob_offset(&emitted, "[I");

    // component class index of int
    assert_eq!(read_i32(data, blob + ARRAY_TYPE), 5);

    let ints = emitted.types.by_name("[I").unwrap();
    let descriptor = emitted.types.get(ints);
    let names: Vec<&str> = descriptor.fields().iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec![".vtable", ".hashcode", ".array"]);

    // GC arrays reference the native sibling
    let native = descriptor.array().unwrap().native_type.unwrap();
    assert_eq!(descriptor.fields()[2].ty, WasmType::Ref(native));
    assert_eq!(emitted.types.get(native).class_index(), -1);
    // the sibling's single slot carries the element storage
    assert_eq!(
        emitted.types.get(native).fields()[0].ty,
        WasmType::Value(ValueType::I32)
    );

    // arrays are not Normal kind: the field list region stays empty, so the
    // fields offset points at the blob end
    let fields_offset = read_i32(data, blob + FIELDS_OFFSET);
    let next_blob_or_table = emitted
        .types
        .iter()
        .filter_map(|(_, d)| d.vtable_offset())
        .map(|o| o as usize)
        .chain(std::iter::once(emitted.types.type_table_offset() as usize))
        .filter(|&o| o > blob)
        .min()
        .unwrap();
    assert_eq!(blob + fields_offset as usize, next_blob_or_table);
}

#[test]
fn test_instanceof_blob_excludes_unrelated_types() {
    let emitted = emit_sample(CompilerOptions::default());
    let data = emitted.writer.data();
    let blob = blob_offset(&emitted, "app/A");

    let i = emitted.types.by_name("app/I").unwrap();
    let unrelated = emitted.types.get(i).class_index();

    let instance_ofs = blob + read_i32(data, blob + INSTANCEOF_OFFSET) as usize;
    let count = read_i32(data, instance_ofs) as usize;
    let entries: Vec<i32> = (0..count)
        .map(|k| read_i32(data, instance_ofs + 4 + 4 * k))
        .collect();
    assert!(!entries.contains(&unrelated));
}

#[test]
fn test_struct_codes_follow_registration_order() {
    let emitted = emit_sample(CompilerOptions::default());
    let mut previous = None;
    for (_, descriptor) in emitted.types.iter() {
        let code = descriptor.code().unwrap();
        if let Some(previous) = previous {
            assert!(code > previous);
        }
        previous = Some(code);
    }
    assert_eq!(
        emitted.writer.struct_types().len(),
        emitted.types.size()
    );
}

#[test]
fn test_block_types_receive_codes_at_finish() {
    let mut loader = MemoryClassLoader::new();
    loader.add(ClassFile::root("java/lang/Object"));

    let mut types = TypeRegistry::new(CompilerOptions::default());
    let mut functions = FunctionManager::new();
    let mut strings = StringPool::new();
    let mut writer = ModuleWriter::new();

    types.value_of("java/lang/Object").unwrap();
    let with_result = types.block_type(vec![], vec![WasmType::Value(ValueType::I32)]);
    let with_param = types.block_type(vec![WasmType::Value(ValueType::I64)], vec![]);
    assert_eq!(types.block_code(with_result), None);

    types.scan_type_hierarchy(&mut functions, &mut loader).unwrap();
    types
        .prepare_finish(&mut writer, &mut functions, &mut strings)
        .unwrap();

    let a = types.block_code(with_result).unwrap();
    let b = types.block_code(with_param).unwrap();
    assert_ne!(a, b);
    assert_eq!(writer.block_types().len(), 2);
}

#[test]
fn test_type_table_accessor_is_registered() {
    let emitted = emit_sample(CompilerOptions::default());
    let accessor = FunctionName::new("java/lang/Class", "typeTableMemoryOffset", "()I");
    let synthetic = emitted.functions.replacement(&accessor).unwrap();
    assert_eq!(
        synthetic.wat,
        format!("i32.const {}", emitted.types.type_table_offset())
    );
    assert!(emitted.functions.function_id(&accessor).is_some());
}

#[test]
fn test_registration_after_finish_fails() {
    let mut emitted = emit_sample(CompilerOptions::default());
    assert!(emitted.types.is_finished());

    let err = emitted.types.value_of("app/Late").unwrap_err();
    assert!(matches!(err, CompileError::LateRegistration { name } if name == "app/Late"));

    let a = emitted.types.by_name("app/A").unwrap();
    let err = emitted.types.use_field_name(a, "y").unwrap_err();
    assert!(matches!(err, CompileError::LateRegistration { .. }));

    // already-registered names still resolve
    assert!(emitted.types.value_of("app/A").is_ok());
}

#[test]
fn test_primitive_lookup_after_finish() {
    let mut emitted = emit_sample(CompilerOptions::default());
    let int = emitted.types.value_of("int").unwrap();
    assert_eq!(emitted.types.get(int).class_index(), 5);
    assert_eq!(strata_compiler::primitive_index("int"), Some(5));
}
