// src/utils/errors.rs
//! Crate-level error type
//!
//! - **ConfigError**: a whole document (or the process settings) rejected
//! - **CompileError**: one spec rejected, the rest of the document proceeds
//! - **EvalError**: one iteration skipped
//! - **FetchFailed**: a config location could not be read
//! - **ShutdownTimeout**: instances missed the grace deadline and were aborted

use crate::template::{CompileError, EvalError, ParamCompileError, ParamEvalError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("compile error: {0}")]
    CompileError(String),

    #[error("evaluation error: {0}")]
    EvalError(String),

    #[error("fetch from {location} failed: {reason}")]
    FetchFailed { location: String, reason: String },

    #[error("shutdown timed out; aborted {}", instances.join(", "))]
    ShutdownTimeout { instances: Vec<String> },

    #[error("settings error: {0}")]
    Settings(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CompileError> for EngineError {
    fn from(err: CompileError) -> Self {
        EngineError::CompileError(err.to_string())
    }
}

impl From<ParamCompileError> for EngineError {
    fn from(err: ParamCompileError) -> Self {
        EngineError::CompileError(err.to_string())
    }
}

impl From<EvalError> for EngineError {
    fn from(err: EvalError) -> Self {
        EngineError::EvalError(err.to_string())
    }
}

impl From<ParamEvalError> for EngineError {
    fn from(err: ParamEvalError) -> Self {
        EngineError::EvalError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_error_conversion() {
        let err: EngineError = CompileError::UnknownFunction("nope".to_string()).into();
        assert!(matches!(err, EngineError::CompileError(ref msg) if msg.contains("nope")));
    }

    #[test]
    fn test_shutdown_timeout_lists_instances() {
        let err = EngineError::ShutdownTimeout {
            instances: vec!["abc#0".to_string(), "abc#1".to_string()],
        };
        assert_eq!(err.to_string(), "shutdown timed out; aborted abc#0, abc#1");
    }
}
