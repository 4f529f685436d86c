//! JVM type-descriptor parsing
//!
//! Field and method descriptors from class files are streamed into
//! [`WasmType`]s: `(ILjava/lang/String;)V` yields `i32`, then a reference to
//! `java/lang/String`, then the end-of-parameters marker. Reference and array
//! elements resolve through the registry, so parsing a descriptor is also
//! what first registers the types it mentions.

use strata_wasm::{ValueType, WasmType};

use crate::error::{CompileError, CompileResult};
use crate::types::TypeRegistry;

/// Streaming parser over a JVM field or method descriptor.
pub struct SignatureParser<'s> {
    signature: &'s str,
    pos: usize,
}

impl<'s> SignatureParser<'s> {
    /// Create a parser. A leading `(` is skipped so method descriptors can be
    /// streamed from the first parameter.
    pub fn new(signature: &'s str) -> Self {
        let pos = usize::from(signature.starts_with('('));
        Self { signature, pos }
    }

    /// The next type in the descriptor.
    ///
    /// Returns `Ok(None)` at the parameter/result separator `)`, at `V`, and
    /// at the end of the input; callers iterating a method descriptor collect
    /// parameters until the first `None` and then read the return type with
    /// one more call.
    pub fn next(&mut self, types: &mut TypeRegistry) -> CompileResult<Option<WasmType>> {
        let Some(&tag) = self.signature.as_bytes().get(self.pos) else {
            return Ok(None);
        };
        self.pos += 1;
        let ty = match tag {
            b')' | b'V' => return Ok(None),
            b'Z' => WasmType::Value(ValueType::Bool),
            b'B' => WasmType::Value(ValueType::I8),
            b'C' => WasmType::Value(ValueType::U16),
            b'S' => WasmType::Value(ValueType::I16),
            b'I' => WasmType::Value(ValueType::I32),
            b'J' => WasmType::Value(ValueType::I64),
            b'F' => WasmType::Value(ValueType::F32),
            b'D' => WasmType::Value(ValueType::F64),
            b'L' => {
                let rest = &self.signature[self.pos..];
                let end = rest.find(';').ok_or_else(|| self.invalid())?;
                let name = &rest[..end];
                self.pos += end + 1;
                WasmType::Ref(types.value_of(name)?)
            }
            b'[' => {
                let element = self.next(types)?.ok_or_else(|| self.invalid())?;
                WasmType::Ref(types.array_type(element)?)
            }
            _ => return Err(self.invalid()),
        };
        Ok(Some(ty))
    }

    fn invalid(&self) -> CompileError {
        CompileError::InvalidSignature {
            signature: self.signature.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CompilerOptions;

    fn registry() -> TypeRegistry {
        TypeRegistry::new(CompilerOptions::default())
    }

    #[test]
    fn test_primitive_descriptors() {
        let mut types = registry();
        let mut parser = SignatureParser::new("I");
        assert_eq!(
            parser.next(&mut types).unwrap(),
            Some(WasmType::Value(ValueType::I32))
        );
        assert_eq!(parser.next(&mut types).unwrap(), None);
    }

    #[test]
    fn test_method_descriptor_streams_params_then_return() {
        let mut types = registry();
        let mut parser = SignatureParser::new("(IJ)D");
        let mut params = Vec::new();
        while let Some(ty) = parser.next(&mut types).unwrap() {
            params.push(ty);
        }
        assert_eq!(
            params,
            vec![
                WasmType::Value(ValueType::I32),
                WasmType::Value(ValueType::I64),
            ]
        );
        assert_eq!(
            parser.next(&mut types).unwrap(),
            Some(WasmType::Value(ValueType::F64))
        );
        assert_eq!(parser.next(&mut types).unwrap(), None);
    }

    #[test]
    fn test_void_return_reads_as_none() {
        let mut types = registry();
        let mut parser = SignatureParser::new("(Z)V");
        assert_eq!(
            parser.next(&mut types).unwrap(),
            Some(WasmType::Value(ValueType::Bool))
        );
        assert_eq!(parser.next(&mut types).unwrap(), None); // ')'
        assert_eq!(parser.next(&mut types).unwrap(), None); // 'V'
    }

    #[test]
    fn test_object_reference_registers_type() {
        let mut types = registry();
        let mut parser = SignatureParser::new("Ljava/lang/String;");
        let ty = parser.next(&mut types).unwrap().unwrap();
        let id = ty.as_ref_id().unwrap();
        assert_eq!(types.get(id).name(), "java/lang/String");
    }

    #[test]
    fn test_array_descriptor() {
        let mut types = registry();
        let mut parser = SignatureParser::new("[[Ljava/lang/String;");
        let ty = parser.next(&mut types).unwrap().unwrap();
        let id = ty.as_ref_id().unwrap();
        assert_eq!(types.get(id).name(), "[[Ljava/lang/String;");
    }

    #[test]
    fn test_unterminated_reference_is_invalid() {
        let mut types = registry();
        let mut parser = SignatureParser::new("Ljava/lang/String");
        assert!(matches!(
            parser.next(&mut types),
            Err(CompileError::InvalidSignature { .. })
        ));
    }

    #[test]
    fn test_unknown_tag_is_invalid() {
        let mut types = registry();
        let mut parser = SignatureParser::new("Q");
        assert!(matches!(
            parser.next(&mut types),
            Err(CompileError::InvalidSignature { .. })
        ));
    }
}
