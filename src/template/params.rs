// src/template/params.rs
//! Compiled parameter trees
//!
//! A job's `args` mapping is compiled once when the spec is accepted.
//! Strings containing `{{` become templates; everything else is kept as a
//! literal, and subtrees without any template collapse into one literal.

use crate::template::context::EvalContext;
use crate::template::error::{CompileError, EvalError};
use crate::template::{CompiledTemplate, ACTION_OPEN};
use serde_json::{Map, Value as Json};
use thiserror::Error;

/// Template compile failure at a parameter path
#[derive(Debug, Clone, PartialEq, Error)]
#[error("parameter '{path}': {source}")]
pub struct ParamCompileError {
    pub path: String,
    #[source]
    pub source: CompileError,
}

/// Template evaluation failure at a parameter path
#[derive(Debug, Clone, PartialEq, Error)]
#[error("parameter '{path}': {source}")]
pub struct ParamEvalError {
    pub path: String,
    #[source]
    pub source: EvalError,
}

#[derive(Debug, Clone)]
pub enum CompiledParams {
    Literal(Json),
    Template(CompiledTemplate),
    Object(Vec<(String, CompiledParams)>),
    Array(Vec<CompiledParams>),
}

impl Default for CompiledParams {
    fn default() -> Self {
        CompiledParams::Literal(Json::Object(Map::new()))
    }
}

impl CompiledParams {
    pub fn compile(value: &Json) -> Result<Self, ParamCompileError> {
        Self::compile_at(value, "args")
    }

    fn compile_at(value: &Json, path: &str) -> Result<Self, ParamCompileError> {
        let compiled = match value {
            Json::String(s) if s.contains(ACTION_OPEN) => {
                let template = CompiledTemplate::compile(s).map_err(|source| ParamCompileError {
                    path: path.to_string(),
                    source,
                })?;
                CompiledParams::Template(template)
            }
            Json::Object(map) => {
                let mut fields = Vec::with_capacity(map.len());
                for (key, child) in map {
                    let child_path = format!("{}.{}", path, key);
                    fields.push((key.clone(), Self::compile_at(child, &child_path)?));
                }
                if fields.iter().all(|(_, f)| f.is_static()) {
                    CompiledParams::Literal(value.clone())
                } else {
                    CompiledParams::Object(fields)
                }
            }
            Json::Array(items) => {
                let mut compiled = Vec::with_capacity(items.len());
                for (i, child) in items.iter().enumerate() {
                    compiled.push(Self::compile_at(child, &format!("{}[{}]", path, i))?);
                }
                if compiled.iter().all(CompiledParams::is_static) {
                    CompiledParams::Literal(value.clone())
                } else {
                    CompiledParams::Array(compiled)
                }
            }
            other => CompiledParams::Literal(other.clone()),
        };

        Ok(compiled)
    }

    /// True when evaluation always yields the same value
    pub fn is_static(&self) -> bool {
        matches!(self, CompiledParams::Literal(_))
    }

    /// Number of templates in the tree
    pub fn template_count(&self) -> usize {
        match self {
            CompiledParams::Literal(_) => 0,
            CompiledParams::Template(_) => 1,
            CompiledParams::Object(fields) => fields.iter().map(|(_, f)| f.template_count()).sum(),
            CompiledParams::Array(items) => items.iter().map(CompiledParams::template_count).sum(),
        }
    }

    /// Produce a fresh JSON value for one iteration
    pub fn evaluate(&self, ctx: &mut EvalContext) -> Result<Json, ParamEvalError> {
        self.evaluate_at(ctx, "args")
    }

    fn evaluate_at(&self, ctx: &mut EvalContext, path: &str) -> Result<Json, ParamEvalError> {
        match self {
            CompiledParams::Literal(value) => Ok(value.clone()),
            CompiledParams::Template(template) => template
                .evaluate(ctx)
                .map(|v| v.into_json())
                .map_err(|source| ParamEvalError {
                    path: path.to_string(),
                    source,
                }),
            CompiledParams::Object(fields) => {
                let mut map = Map::with_capacity(fields.len());
                for (key, field) in fields {
                    let value = field.evaluate_at(ctx, &format!("{}.{}", path, key))?;
                    map.insert(key.clone(), value);
                }
                Ok(Json::Object(map))
            }
            CompiledParams::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    out.push(item.evaluate_at(ctx, &format!("{}[{}]", path, i))?);
                }
                Ok(Json::Array(out))
            }
        }
    }
}
