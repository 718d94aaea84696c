//! Emission errors
//!
//! Any error aborts the whole compile; a reference-counting or branch-offset
//! mistake is unsafe to ship even partially, so there is no best-effort
//! output. `Internal` variants are emitter defects, never user-triggerable.

use thiserror::Error;

pub type EmitResult<T> = Result<T, EmitError>;

#[derive(Debug, Error)]
pub enum EmitError {
    #[error("undefined variable: {name}")]
    UndefinedVariable { name: String },

    #[error("undefined function: {name}")]
    UndefinedFunction { name: String },

    #[error("unknown field {field} on {class}")]
    UnknownField { class: String, field: String },

    #[error("unknown method {method} on {class}")]
    UnknownMethod { class: String, method: String },

    #[error("no entry function `main`")]
    MissingEntry,

    #[error("too many local variables in {function} (max 4096)")]
    TooManyLocals { function: String },

    #[error("too many constants (max 65535)")]
    TooManyConstants,

    #[error("invalid break statement (not in loop or switch)")]
    InvalidBreak,

    #[error("invalid continue statement (not in loop)")]
    InvalidContinue,

    #[error("class hierarchy cycle involving {class}")]
    InheritanceCycle { class: String },

    /// An operand cannot be represented in the target's addressable range.
    /// Silently truncating would corrupt the program, so this is fatal.
    #[error("encoding error: {message}")]
    Encoding { message: String },

    /// An emitter invariant was violated; always a defect.
    #[error("internal emitter error: {message}")]
    Internal { message: String },
}

impl EmitError {
    pub fn internal(message: impl Into<String>) -> Self {
        EmitError::Internal {
            message: message.into(),
        }
    }

    pub fn encoding(message: impl Into<String>) -> Self {
        EmitError::Encoding {
            message: message.into(),
        }
    }
}
