// src/template/error.rs
//! Compile-time and evaluation-time template errors

use thiserror::Error;

/// Failure to turn an expression string into a [`CompiledTemplate`].
///
/// Offsets are byte offsets into the original template string.
///
/// [`CompiledTemplate`]: crate::template::CompiledTemplate
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("unterminated action starting at offset {0}")]
    UnterminatedAction(usize),

    #[error("unterminated string literal at offset {0}")]
    UnterminatedString(usize),

    #[error("unexpected character '{ch}' at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },

    #[error("unexpected {found} at offset {offset}, expected {expected}")]
    UnexpectedToken {
        found: String,
        expected: &'static str,
        offset: usize,
    },

    #[error("empty action at offset {0}")]
    EmptyAction(usize),

    #[error("invalid number literal '{0}'")]
    InvalidNumber(String),

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("parentheses nested deeper than {limit} at offset {offset}")]
    TooDeep { limit: usize, offset: usize },

    #[error("function '{name}' takes {expected} arguments, got {got}")]
    Arity {
        name: &'static str,
        expected: String,
        got: usize,
    },
}

/// Runtime fault while evaluating a compiled template.
///
/// Always local to the field being evaluated.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("{func}: argument out of range: {reason}")]
    OutOfRange { func: &'static str, reason: String },

    #[error("{func}: expected {expected}, got {found}")]
    TypeMismatch {
        func: &'static str,
        expected: &'static str,
        found: &'static str,
    },

    #[error("{func}: {reason}")]
    Invalid { func: &'static str, reason: String },

    #[error("field '.{0}' is not defined")]
    MissingField(String),

    #[error("env: variable '{0}' is not readable from templates")]
    EnvNotAllowed(String),
}
