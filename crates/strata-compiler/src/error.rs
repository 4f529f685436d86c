//! Compilation errors
//!
//! Every error here is fatal to the compilation unit; nothing is retried.

use thiserror::Error;

/// Result alias for compiler operations.
pub type CompileResult<T> = Result<T, CompileError>;

/// Errors raised by the type and dispatch core.
#[derive(Debug, Error)]
pub enum CompileError {
    /// The class-file loader cannot resolve a required class.
    #[error("Missing class: {name}")]
    MissingClass {
        /// Name of the unresolvable class
        name: String,
    },

    /// An interface method is marked used but no concrete implementation
    /// exists anywhere in the hierarchy.
    #[error("No implementation of used interface method {method} for type {type_name}")]
    MissingImplementation {
        /// Full name of the interface method
        method: String,
        /// The type whose i-table was being built
        type_name: String,
    },

    /// A type or field registration arrived after the scan-finish latch.
    #[error("Register needed type after scanning: {name}")]
    LateRegistration {
        /// The offending type or field
        name: String,
    },

    /// An array was requested over an element kind the target cannot store.
    #[error("Not supported array type: {type_name}")]
    UnsupportedType {
        /// The rejected element type
        type_name: String,
    },

    /// A malformed type descriptor in a signature.
    #[error("Invalid type signature: {signature}")]
    InvalidSignature {
        /// The signature that failed to parse
        signature: String,
    },

    /// Class-file loader I/O, surfaced with the class being resolved.
    #[error("I/O error while loading class {class_name}")]
    Io {
        /// The class whose resolution failed
        class_name: String,
        /// The underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// A broken compiler invariant.
    #[error("Internal compiler error: {message}")]
    Internal {
        /// What went wrong
        message: String,
    },
}
