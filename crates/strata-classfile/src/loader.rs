//! The class-file loader seam

use std::io;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::class::ClassFile;

/// Resolves a type name to its parsed class file.
///
/// The loader owns whatever cache it keeps; lookups hand out shared handles so
/// callers can hold several class files at once while the cache keeps filling.
/// A name that cannot be resolved yields `Ok(None)`; whether that is fatal is
/// the caller's call. I/O failures surface as `io::Error` and are wrapped with
/// class context by the compiler.
pub trait ClassFileLoader {
    /// Resolve `name` (e.g. `java/lang/Object`) to its class file.
    fn get(&mut self, name: &str) -> io::Result<Option<Arc<ClassFile>>>;
}

/// An in-memory loader over a fixed set of class files.
///
/// Used by the compiler driver for classes resolved ahead of time and by
/// tests to assemble hierarchies without touching the filesystem.
#[derive(Debug, Default)]
pub struct MemoryClassLoader {
    classes: FxHashMap<String, Arc<ClassFile>>,
}

impl MemoryClassLoader {
    /// Create an empty loader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a class file, replacing any previous entry with the same name.
    pub fn add(&mut self, class_file: ClassFile) {
        self.classes
            .insert(class_file.name().to_string(), Arc::new(class_file));
    }

    /// Number of resolvable classes.
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// True if no classes were added.
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl ClassFileLoader for MemoryClassLoader {
    fn get(&mut self, name: &str) -> io::Result<Option<Arc<ClassFile>>> {
        Ok(self.classes.get(name).cloned())
    }
}
