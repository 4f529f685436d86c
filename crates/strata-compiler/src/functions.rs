//! Function manager
//!
//! Tracks which functions are reachable from compiled code, hands out v-table
//! and i-table indices during the hierarchy scan, stores synthetic WAT
//! replacements, and assigns the numeric function ids the metadata emitter
//! writes into dispatch tables.

use std::fmt;

use rustc_hash::FxHashMap;
use strata_wasm::WasmType;

use strata_classfile::MethodRecord;

/// Fully qualified name of a function: declaring class, method name and JVM
/// signature.
///
/// Synthetic module-level functions (the dispatch routines) use an empty
/// class name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionName {
    /// Declaring class, `/`-separated; empty for module-level synthetics
    pub class_name: String,
    /// Method name
    pub method_name: String,
    /// JVM signature, e.g. `(I)V`
    pub signature: String,
}

impl FunctionName {
    /// Create a function name.
    pub fn new(class_name: &str, method_name: &str, signature: &str) -> Self {
        Self {
            class_name: class_name.to_string(),
            method_name: method_name.to_string(),
            signature: signature.to_string(),
        }
    }

    /// Name a method declared by `class_name`.
    pub fn from_method(class_name: &str, method: &MethodRecord) -> Self {
        Self::new(class_name, &method.name, &method.signature)
    }

    /// The unique printable name, `class.method(sig)ret`.
    pub fn full_name(&self) -> String {
        if self.class_name.is_empty() {
            format!("{}{}", self.method_name, self.signature)
        } else {
            format!("{}.{}{}", self.class_name, self.method_name, self.signature)
        }
    }
}

impl fmt::Display for FunctionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_name())
    }
}

/// A synthetic function whose body is WAT text instead of translated
/// bytecode.
///
/// The WAT is parsed by the same parser as user code and compiles to an
/// ordinary function; registration replaces whatever bytecode-level function
/// carried the same name.
#[derive(Debug, Clone)]
pub struct SyntheticFunction {
    /// The name call sites use
    pub name: FunctionName,
    /// Parameter types, receiver first where there is one
    pub params: Vec<WasmType>,
    /// Result types
    pub results: Vec<WasmType>,
    /// The function body as WebAssembly text
    pub wat: String,
}

#[derive(Debug, Default)]
struct FunctionState {
    needed: bool,
    needs_this: bool,
    vtable_index: Option<u32>,
    itable_index: Option<u32>,
    function_id: Option<u32>,
    replacement: Option<SyntheticFunction>,
}

/// Registry of function reachability, dispatch indices and ids.
#[derive(Debug, Default)]
pub struct FunctionManager {
    states: FxHashMap<FunctionName, FunctionState>,
    /// Needed-marking order; function ids follow it.
    order: Vec<FunctionName>,
}

impl FunctionManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    fn state_mut(&mut self, name: &FunctionName) -> &mut FunctionState {
        self.states.entry(name.clone()).or_default()
    }

    /// Mark a function reachable. `needs_this` records whether call sites
    /// pass a receiver.
    pub fn mark_as_needed(&mut self, name: &FunctionName, needs_this: bool) {
        let state = self.states.entry(name.clone()).or_default();
        if !state.needed {
            state.needed = true;
            self.order.push(name.clone());
        }
        state.needs_this |= needs_this;
    }

    /// True once the function was marked reachable.
    pub fn is_used(&self, name: &FunctionName) -> bool {
        self.states.get(name).is_some_and(|s| s.needed)
    }

    /// Whether any call site passes a receiver to this function.
    pub fn needs_this(&self, name: &FunctionName) -> bool {
        self.states.get(name).is_some_and(|s| s.needs_this)
    }

    /// Record the v-table index of a virtual method. The first assignment
    /// wins; a method keeps the slot of its first declaration.
    pub fn set_vtable_index(&mut self, name: &FunctionName, index: u32) {
        let state = self.state_mut(name);
        if state.vtable_index.is_none() {
            state.vtable_index = Some(index);
        }
    }

    /// The v-table index recorded for this function, if any.
    pub fn vtable_index(&self, name: &FunctionName) -> Option<u32> {
        self.states.get(name).and_then(|s| s.vtable_index)
    }

    /// Record the i-table index of an interface method. First assignment
    /// wins.
    pub fn set_itable_index(&mut self, name: &FunctionName, index: u32) {
        let state = self.state_mut(name);
        if state.itable_index.is_none() {
            state.itable_index = Some(index);
        }
    }

    /// The i-table index recorded for this interface method, if any.
    pub fn itable_index(&self, name: &FunctionName) -> Option<u32> {
        self.states.get(name).and_then(|s| s.itable_index)
    }

    /// Register a synthetic WAT function, marking it reachable.
    pub fn add_replacement(&mut self, function: SyntheticFunction) {
        let name = function.name.clone();
        self.mark_as_needed(&name, false);
        self.state_mut(&name).replacement = Some(function);
    }

    /// The WAT replacement registered under this name, if any.
    pub fn replacement(&self, name: &FunctionName) -> Option<&SyntheticFunction> {
        self.states.get(name).and_then(|s| s.replacement.as_ref())
    }

    /// Assign numeric ids to every reachable function, in needed order.
    /// Idempotent; ids never change once handed out.
    pub fn assign_function_ids(&mut self) {
        let mut next = self
            .states
            .values()
            .filter(|s| s.function_id.is_some())
            .count() as u32;
        let order = self.order.clone();
        for name in &order {
            let state = self.state_mut(name);
            if state.function_id.is_none() {
                state.function_id = Some(next);
                next += 1;
            }
        }
    }

    /// The numeric id of a reachable function; available once
    /// [`assign_function_ids`](Self::assign_function_ids) ran.
    pub fn function_id(&self, name: &FunctionName) -> Option<u32> {
        self.states.get(name).and_then(|s| s.function_id)
    }

    /// Iterate reachable functions in needed order.
    pub fn iter_needed(&self) -> impl Iterator<Item = &FunctionName> {
        self.order.iter()
    }

    /// Count of reachable functions.
    pub fn needed_count(&self) -> usize {
        self.order.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(class: &str, method: &str) -> FunctionName {
        FunctionName::new(class, method, "()V")
    }

    #[test]
    fn test_needed_marking() {
        let mut functions = FunctionManager::new();
        let m = name("app/A", "m");
        assert!(!functions.is_used(&m));
        functions.mark_as_needed(&m, true);
        assert!(functions.is_used(&m));
        assert!(functions.needs_this(&m));
        functions.mark_as_needed(&m, true);
        assert_eq!(functions.needed_count(), 1);
    }

    #[test]
    fn test_needs_this_is_sticky() {
        let mut functions = FunctionManager::new();
        let m = name("app/A", "m");
        functions.mark_as_needed(&m, false);
        assert!(!functions.needs_this(&m));
        functions.mark_as_needed(&m, true);
        functions.mark_as_needed(&m, false);
        assert!(functions.needs_this(&m));
    }

    #[test]
    fn test_first_vtable_index_wins() {
        let mut functions = FunctionManager::new();
        let m = name("app/A", "m");
        functions.set_vtable_index(&m, 5);
        functions.set_vtable_index(&m, 9);
        assert_eq!(functions.vtable_index(&m), Some(5));
    }

    #[test]
    fn test_itable_index_independent_of_vtable() {
        let mut functions = FunctionManager::new();
        let m = name("app/I", "f");
        assert_eq!(functions.itable_index(&m), None);
        functions.set_itable_index(&m, 2);
        assert_eq!(functions.itable_index(&m), Some(2));
        assert_eq!(functions.vtable_index(&m), None);
    }

    #[test]
    fn test_function_ids_follow_needed_order() {
        let mut functions = FunctionManager::new();
        let a = name("app/A", "a");
        let b = name("app/B", "b");
        let c = name("app/C", "c");
        functions.mark_as_needed(&b, false);
        functions.mark_as_needed(&a, false);
        functions.assign_function_ids();
        assert_eq!(functions.function_id(&b), Some(0));
        assert_eq!(functions.function_id(&a), Some(1));

        // late arrivals get the next free id, earlier ids are stable
        functions.mark_as_needed(&c, false);
        functions.assign_function_ids();
        assert_eq!(functions.function_id(&b), Some(0));
        assert_eq!(functions.function_id(&c), Some(2));
    }

    #[test]
    fn test_replacement_marks_needed() {
        let mut functions = FunctionManager::new();
        let f = SyntheticFunction {
            name: FunctionName::new("", "callVirtual", "(Ljava/lang/Object;I)I"),
            params: vec![],
            results: vec![],
            wat: "return".to_string(),
        };
        functions.add_replacement(f);
        let key = FunctionName::new("", "callVirtual", "(Ljava/lang/Object;I)I");
        assert!(functions.is_used(&key));
        assert!(functions.replacement(&key).is_some());
    }

    #[test]
    fn test_full_name_format() {
        assert_eq!(name("app/A", "m").full_name(), "app/A.m()V");
        assert_eq!(
            FunctionName::new("", "instanceof", "(Ljava/lang/Object;I)I").full_name(),
            "instanceof(Ljava/lang/Object;I)I"
        );
    }
}
