// src/template/mod.rs
//! Sandboxed template expressions
//!
//! Job parameters may embed `{{ ... }}` actions that are re-evaluated on
//! every iteration:
//!
//! - **Lexer / Parser**: turn an expression string into nodes, resolving
//!   every function name against the builtin table at compile time
//! - **Functions**: the fixed builtin table (encoders, arithmetic, random
//!   draws, counters, clock, allow-listed environment)
//! - **Context**: per-instance random generator and counters
//! - **Params**: compiled trees for nested parameter mappings
//!
//! # Example
//!
//! ```text
//! "id-{{ counter }}"                  -> "id-1", "id-2", ...
//! "{{ random_int 1 10 }}"             -> 7          (stays an integer)
//! "{{ .targets | random_choice }}"    -> "a.example"
//! "{{ random_alphanum 8 | base64_encode }}"
//! ```
//!
//! There is no way to define functions, loop, or reach the host from a
//! template; what the table lists is all a configuration can do.

pub mod context;
pub mod error;
pub mod functions;
mod lexer;
pub mod params;
mod parser;
pub mod value;

pub use context::{EnvPolicy, EvalContext, TemplateData};
pub use error::{CompileError, EvalError};
pub use params::{CompiledParams, ParamCompileError, ParamEvalError};
pub use value::Value;

use parser::{Command, Node, Operand, Pipeline};

/// Marker that makes a string a template
pub const ACTION_OPEN: &str = "{{";

/// Parsed, reusable form of one expression string
#[derive(Debug, Clone)]
pub struct CompiledTemplate {
    source: String,
    nodes: Vec<Node>,
    stateful: bool,
}

impl CompiledTemplate {
    /// Parse `source`, failing on malformed syntax or unknown functions
    pub fn compile(source: &str) -> Result<Self, CompileError> {
        let nodes = parser::parse(source)?;
        let stateful = nodes.iter().any(|node| match node {
            Node::Action(pipeline) => pipeline_is_stateful(pipeline),
            Node::Text(_) => false,
        });

        Ok(Self {
            source: source.to_string(),
            nodes,
            stateful,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// True when the template contains no actions at all
    pub fn is_literal(&self) -> bool {
        self.nodes.iter().all(|node| matches!(node, Node::Text(_)))
    }

    /// True when any called function is stateful
    pub fn is_stateful(&self) -> bool {
        self.stateful
    }

    /// Evaluate against `ctx`
    ///
    /// A template consisting of exactly one action yields that action's
    /// value unchanged; anything else is rendered to a string. Text
    /// produced by actions is bounded by [`functions::MAX_GENERATED_LEN`].
    pub fn evaluate(&self, ctx: &mut EvalContext) -> Result<Value, EvalError> {
        if let [Node::Action(pipeline)] = self.nodes.as_slice() {
            return eval_pipeline(pipeline, ctx);
        }

        let mut out = String::with_capacity(self.source.len());
        let mut generated = 0usize;
        for node in &self.nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Action(pipeline) => {
                    let rendered = eval_pipeline(pipeline, ctx)?.to_string();
                    generated = generated.saturating_add(rendered.len());
                    functions::check_len("template", generated)?;
                    out.push_str(&rendered);
                }
            }
        }
        Ok(Value::Str(out))
    }

    /// Evaluate and render to a string
    pub fn render(&self, ctx: &mut EvalContext) -> Result<String, EvalError> {
        Ok(self.evaluate(ctx)?.to_string())
    }
}

/// Compile an expression string
pub fn compile(source: &str) -> Result<CompiledTemplate, CompileError> {
    CompiledTemplate::compile(source)
}

fn pipeline_is_stateful(pipeline: &Pipeline) -> bool {
    pipeline.commands.iter().any(|command| match command {
        Command::Call { func, args } => func.stateful || args.iter().any(operand_is_stateful),
        Command::Operand(operand) => operand_is_stateful(operand),
    })
}

fn operand_is_stateful(operand: &Operand) -> bool {
    match operand {
        Operand::Pipeline(inner) => pipeline_is_stateful(inner),
        Operand::Literal(_) | Operand::Field(_) => false,
    }
}

fn eval_pipeline(pipeline: &Pipeline, ctx: &mut EvalContext) -> Result<Value, EvalError> {
    let mut previous: Option<Value> = None;

    for command in &pipeline.commands {
        let value = match command {
            Command::Operand(operand) => eval_operand(operand, ctx)?,
            Command::Call { func, args } => {
                let mut values = Vec::with_capacity(args.len() + 1);
                for arg in args {
                    values.push(eval_operand(arg, ctx)?);
                }
                if let Some(piped) = previous.take() {
                    values.push(piped);
                }
                func.call(ctx, values)?
            }
        };
        previous = Some(value);
    }

    previous.ok_or(EvalError::Invalid {
        func: "pipeline",
        reason: "empty pipeline".to_string(),
    })
}

fn eval_operand(operand: &Operand, ctx: &mut EvalContext) -> Result<Value, EvalError> {
    match operand {
        Operand::Literal(value) => Ok(value.clone()),
        Operand::Field(path) => ctx.field(path),
        Operand::Pipeline(inner) => eval_pipeline(inner, ctx),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_literal_template() {
        let tpl = compile("GET / HTTP/1.1").unwrap();
        assert!(tpl.is_literal());
        assert!(!tpl.is_stateful());
        let mut ctx = EvalContext::with_seed(3);
        for _ in 0..3 {
            assert_eq!(tpl.evaluate(&mut ctx).unwrap(), Value::from("GET / HTTP/1.1"));
        }
    }

    #[test]
    fn test_single_action_keeps_type() {
        let mut ctx = EvalContext::with_seed(3);
        let tpl = compile("{{ add 40 2 }}").unwrap();
        assert_eq!(tpl.evaluate(&mut ctx).unwrap(), Value::Int(42));

        let mixed = compile("n={{ add 40 2 }}").unwrap();
        assert_eq!(mixed.evaluate(&mut ctx).unwrap(), Value::from("n=42"));
    }

    #[test]
    fn test_pipes_append_last_argument() {
        let mut ctx = EvalContext::with_seed(3);
        let tpl = compile(r#"{{ "a,b" | split "," | join "-" | upper }}"#).unwrap();
        assert_eq!(tpl.render(&mut ctx).unwrap(), "A-B");
    }

    #[test]
    fn test_counters_per_context() {
        let tpl = compile("id-{{ counter }}").unwrap();
        assert!(tpl.is_stateful());

        let mut first = EvalContext::with_seed(1);
        let mut second = EvalContext::with_seed(1);

        assert_eq!(tpl.render(&mut first).unwrap(), "id-1");
        assert_eq!(tpl.render(&mut first).unwrap(), "id-2");
        assert_eq!(tpl.render(&mut second).unwrap(), "id-1");
        assert_eq!(tpl.render(&mut first).unwrap(), "id-3");
    }

    #[test]
    fn test_independent_random_streams() {
        let tpl = compile("{{ random_hex 16 }}").unwrap();
        let mut a = EvalContext::with_seed(11);
        let mut b = EvalContext::with_seed(12);

        let from_a: Vec<String> = (0..4).map(|_| tpl.render(&mut a).unwrap()).collect();
        let from_b: Vec<String> = (0..4).map(|_| tpl.render(&mut b).unwrap()).collect();
        assert_ne!(from_a, from_b);

        // Same seed replays the same stream; draws in `b` did not disturb it
        let mut replay = EvalContext::with_seed(11);
        let replayed: Vec<String> = (0..4).map(|_| tpl.render(&mut replay).unwrap()).collect();
        assert_eq!(from_a, replayed);
    }

    #[test]
    fn test_eval_error_is_reported() {
        let tpl = compile("{{ random_int_n (sub 1 1) }}").unwrap();
        let mut ctx = EvalContext::with_seed(3);
        assert!(matches!(
            tpl.evaluate(&mut ctx).unwrap_err(),
            EvalError::OutOfRange { func: "random_int_n", .. }
        ));
    }

    #[test]
    fn test_rendered_output_is_bounded() {
        let mut ctx = EvalContext::with_seed(3);
        let tpl = compile(r#"{{ repeat 1000000 "x" }}-{{ repeat 1000000 "y" }}"#).unwrap();
        assert!(matches!(
            tpl.evaluate(&mut ctx).unwrap_err(),
            EvalError::OutOfRange { func: "template", .. }
        ));

        let tpl = compile(r#"{{ replace "a" (repeat 1000 "x") (repeat 10000 "a") }}"#).unwrap();
        assert!(tpl.evaluate(&mut ctx).is_err());
    }

    #[test]
    fn test_deep_nesting_is_a_compile_error() {
        let depth = 10_000;
        let source = format!("{{{{ {}1{} }}}}", "(".repeat(depth), ")".repeat(depth));
        assert!(matches!(
            compile(&source).unwrap_err(),
            CompileError::TooDeep { .. }
        ));

        let shallow = format!("{{{{ {}1{} }}}}", "(".repeat(8), ")".repeat(8));
        let mut ctx = EvalContext::with_seed(3);
        assert_eq!(compile(&shallow).unwrap().evaluate(&mut ctx).unwrap(), Value::Int(1));
    }

    #[test]
    fn test_compile_rejects_unknown_function() {
        assert_eq!(
            compile("x{{ read_file \"/etc/passwd\" }}").unwrap_err(),
            CompileError::UnknownFunction("read_file".to_string())
        );
    }

    proptest! {
        #[test]
        fn prop_text_without_actions_is_unchanged(text in "[^{]*") {
            let tpl = compile(&text).unwrap();
            let mut ctx = EvalContext::with_seed(5);
            for _ in 0..3 {
                prop_assert_eq!(tpl.render(&mut ctx).unwrap(), text.clone());
            }
        }
    }
}
