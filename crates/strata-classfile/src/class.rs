//! Resolved class-file records

/// Method name of instance constructors in class-file bytecode.
pub const CONSTRUCTOR: &str = "<init>";

/// Whether a class file declares a class or an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassKind {
    /// An ordinary (possibly abstract) class
    Class,
    /// An interface; always abstract, carries no instance state
    Interface,
}

/// A field declaration.
#[derive(Debug, Clone)]
pub struct FieldRecord {
    /// Field name
    pub name: String,
    /// Field type as a JVM descriptor, e.g. `I` or `Ljava/lang/String;`
    pub descriptor: String,
    /// True for static fields (excluded from instance layout)
    pub is_static: bool,
}

/// A method declaration.
#[derive(Debug, Clone)]
pub struct MethodRecord {
    /// Method name
    pub name: String,
    /// Method signature as a JVM descriptor, e.g. `(I)V`
    pub signature: String,
    /// True for static methods (excluded from dispatch tables)
    pub is_static: bool,
    /// True when the method carries no code (interface methods without a
    /// default body, abstract methods)
    pub is_abstract: bool,
}

/// A parsed class file, reduced to what type scanning needs.
#[derive(Debug, Clone)]
pub struct ClassFile {
    name: String,
    kind: ClassKind,
    super_class: Option<String>,
    interfaces: Vec<String>,
    fields: Vec<FieldRecord>,
    methods: Vec<MethodRecord>,
    is_abstract: bool,
}

impl ClassFile {
    /// Create a class file record.
    ///
    /// Interfaces get `java/lang/Object` as their superclass, the way the
    /// binary format records them; the root class itself is created with
    /// [`ClassFile::root`].
    pub fn new(name: &str, kind: ClassKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            super_class: Some("java/lang/Object".to_string()),
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            is_abstract: kind == ClassKind::Interface,
        }
    }

    /// Create the hierarchy root (no superclass).
    pub fn root(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ClassKind::Class,
            super_class: None,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            is_abstract: false,
        }
    }

    /// Set the superclass name.
    pub fn with_super(mut self, super_class: &str) -> Self {
        self.super_class = Some(super_class.to_string());
        self
    }

    /// Add an implemented (or extended, for interfaces) interface.
    pub fn with_interface(mut self, name: &str) -> Self {
        self.interfaces.push(name.to_string());
        self
    }

    /// Add an instance field.
    pub fn with_field(mut self, name: &str, descriptor: &str) -> Self {
        self.fields.push(FieldRecord {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            is_static: false,
        });
        self
    }

    /// Add a static field.
    pub fn with_static_field(mut self, name: &str, descriptor: &str) -> Self {
        self.fields.push(FieldRecord {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            is_static: true,
        });
        self
    }

    /// Add an instance method with a body.
    pub fn with_method(mut self, name: &str, signature: &str) -> Self {
        self.methods.push(MethodRecord {
            name: name.to_string(),
            signature: signature.to_string(),
            is_static: false,
            is_abstract: false,
        });
        self
    }

    /// Add a static method.
    pub fn with_static_method(mut self, name: &str, signature: &str) -> Self {
        self.methods.push(MethodRecord {
            name: name.to_string(),
            signature: signature.to_string(),
            is_static: true,
            is_abstract: false,
        });
        self
    }

    /// Add a bodyless method (abstract method or non-default interface
    /// method).
    pub fn with_abstract_method(mut self, name: &str, signature: &str) -> Self {
        self.methods.push(MethodRecord {
            name: name.to_string(),
            signature: signature.to_string(),
            is_static: false,
            is_abstract: true,
        });
        self
    }

    /// Mark the class abstract.
    pub fn as_abstract(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    /// The class name, `/`-separated.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Class or interface.
    pub fn kind(&self) -> ClassKind {
        self.kind
    }

    /// The superclass name, `None` only for the hierarchy root.
    pub fn super_class(&self) -> Option<&str> {
        self.super_class.as_deref()
    }

    /// Directly implemented interfaces, in declaration order.
    pub fn interfaces(&self) -> &[String] {
        &self.interfaces
    }

    /// Declared fields, in declaration order.
    pub fn fields(&self) -> &[FieldRecord] {
        &self.fields
    }

    /// Declared methods, in declaration order.
    pub fn methods(&self) -> &[MethodRecord] {
        &self.methods
    }

    /// True for interfaces and abstract classes.
    pub fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    /// Look up a declared method by name and signature.
    pub fn method(&self, name: &str, signature: &str) -> Option<&MethodRecord> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.signature == signature)
    }
}

/// A bootstrap-method record for a closure-conversion call site.
///
/// Carries the reference to the implementation method the call site was
/// compiled against and the erased signature of the single abstract method
/// the synthetic type implements.
#[derive(Debug, Clone)]
pub struct BootstrapMethod {
    /// Class declaring the implementation method
    pub impl_class: String,
    /// Name of the implementation method
    pub impl_name: String,
    /// Signature of the implementation method
    pub impl_signature: String,
    /// Erased signature of the implemented interface method
    pub sam_signature: String,
}

impl BootstrapMethod {
    /// Create a bootstrap-method record.
    pub fn new(impl_class: &str, impl_name: &str, impl_signature: &str, sam_signature: &str) -> Self {
        Self {
            impl_class: impl_class.to_string(),
            impl_name: impl_name.to_string(),
            impl_signature: impl_signature.to_string(),
            sam_signature: sam_signature.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interface_defaults() {
        let iface = ClassFile::new("app/Greeter", ClassKind::Interface);
        assert!(iface.is_abstract());
        assert_eq!(iface.super_class(), Some("java/lang/Object"));
    }

    #[test]
    fn test_root_has_no_super() {
        let root = ClassFile::root("java/lang/Object");
        assert_eq!(root.super_class(), None);
        assert!(!root.is_abstract());
    }

    #[test]
    fn test_method_lookup_matches_signature() {
        let cf = ClassFile::new("app/A", ClassKind::Class)
            .with_method("m", "()V")
            .with_method("m", "(I)V");
        assert!(cf.method("m", "(I)V").is_some());
        assert!(cf.method("m", "(J)V").is_none());
        assert!(cf.method("n", "()V").is_none());
    }

    #[test]
    fn test_static_fields_flagged() {
        let cf = ClassFile::new("app/A", ClassKind::Class)
            .with_field("x", "I")
            .with_static_field("COUNT", "I");
        assert!(!cf.fields()[0].is_static);
        assert!(cf.fields()[1].is_static);
    }
}
