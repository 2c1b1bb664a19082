// src/template/parser.rs
//! Parser turning template text into literal and action nodes
//!
//! Function names are resolved against the builtin table here, so an
//! unknown function or a wrong argument count is a compile error rather
//! than an evaluation error.

use crate::template::error::CompileError;
use crate::template::functions::{self, Builtin};
use crate::template::lexer::{tokenize, Spanned, Token};
use crate::template::value::Value;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Deepest allowed nesting of parenthesized pipelines
pub(crate) const MAX_NESTING: usize = 64;

#[derive(Debug, Clone)]
pub(crate) enum Node {
    Text(String),
    Action(Pipeline),
}

#[derive(Debug, Clone)]
pub(crate) struct Pipeline {
    pub commands: Vec<Command>,
}

#[derive(Debug, Clone)]
pub(crate) enum Command {
    Operand(Operand),
    Call {
        func: &'static Builtin,
        args: Vec<Operand>,
    },
}

#[derive(Debug, Clone)]
pub(crate) enum Operand {
    Literal(Value),
    Field(Vec<String>),
    Pipeline(Box<Pipeline>),
}

/// Split `src` into text and parsed actions
pub(crate) fn parse(src: &str) -> Result<Vec<Node>, CompileError> {
    let mut nodes = Vec::new();
    let mut rest = 0;

    while let Some(found) = src[rest..].find(OPEN) {
        let open = rest + found;
        if open > rest {
            nodes.push(Node::Text(src[rest..open].to_string()));
        }

        let body_start = open + OPEN.len();
        let body_end = find_close(src, body_start).ok_or(CompileError::UnterminatedAction(open))?;

        let tokens = tokenize(&src[body_start..body_end], body_start)?;
        if tokens.is_empty() {
            return Err(CompileError::EmptyAction(open));
        }

        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
            end: body_end,
            depth: 0,
        };
        let pipeline = parser.parse_pipeline()?;
        if let Some(extra) = parser.peek() {
            return Err(CompileError::UnexpectedToken {
                found: extra.token.describe(),
                expected: "'|' or end of action",
                offset: extra.offset,
            });
        }

        nodes.push(Node::Action(pipeline));
        rest = body_end + CLOSE.len();
    }

    if rest < src.len() {
        nodes.push(Node::Text(src[rest..].to_string()));
    }

    Ok(nodes)
}

/// Find the `}}` closing an action, skipping string literals
fn find_close(src: &str, from: usize) -> Option<usize> {
    let bytes = src.as_bytes();
    let mut i = from;
    let mut in_string = false;

    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            match b {
                b'\\' => i += 1,
                b'"' => in_string = false,
                _ => {}
            }
        } else if b == b'"' {
            in_string = true;
        } else if b == b'}' && bytes.get(i + 1) == Some(&b'}') {
            return Some(i);
        }
        i += 1;
    }

    None
}

struct Parser<'a> {
    tokens: &'a [Spanned],
    pos: usize,
    /// Offset of the action end, for errors at end of input
    end: usize,
    /// Open parentheses around the current position
    depth: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Spanned> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&'a Spanned> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn parse_pipeline(&mut self) -> Result<Pipeline, CompileError> {
        let mut commands = Vec::new();

        loop {
            let piped = !commands.is_empty();
            commands.push(self.parse_command(piped)?);

            match self.peek() {
                Some(Spanned { token: Token::Pipe, .. }) => {
                    self.advance();
                }
                _ => break,
            }
        }

        Ok(Pipeline { commands })
    }

    fn parse_command(&mut self, piped: bool) -> Result<Command, CompileError> {
        let Some(next) = self.peek() else {
            return Err(CompileError::EmptyAction(self.end));
        };

        if let Token::Ident(name) = &next.token {
            self.advance();
            let func = functions::lookup(name)
                .ok_or_else(|| CompileError::UnknownFunction(name.clone()))?;

            let mut args = Vec::new();
            while self.peek().map_or(false, |s| starts_operand(&s.token)) {
                args.push(self.parse_operand()?);
            }

            let got = args.len() + usize::from(piped);
            if !func.accepts(got) {
                return Err(CompileError::Arity {
                    name: func.name,
                    expected: func.arity_text(),
                    got,
                });
            }

            return Ok(Command::Call { func, args });
        }

        if piped || !starts_operand(&next.token) {
            return Err(CompileError::UnexpectedToken {
                found: next.token.describe(),
                expected: if piped { "function name" } else { "function or value" },
                offset: next.offset,
            });
        }

        Ok(Command::Operand(self.parse_operand()?))
    }

    fn parse_operand(&mut self) -> Result<Operand, CompileError> {
        let Some(next) = self.advance() else {
            return Err(CompileError::EmptyAction(self.end));
        };

        let operand = match &next.token {
            Token::Str(s) => Operand::Literal(Value::Str(s.clone())),
            Token::Int(i) => Operand::Literal(Value::Int(*i)),
            Token::Float(f) => Operand::Literal(Value::Float(*f)),
            Token::Bool(b) => Operand::Literal(Value::Bool(*b)),
            Token::Field(path) => Operand::Field(path.clone()),
            Token::LParen => {
                if self.depth >= MAX_NESTING {
                    return Err(CompileError::TooDeep {
                        limit: MAX_NESTING,
                        offset: next.offset,
                    });
                }
                self.depth += 1;
                let inner = self.parse_pipeline()?;
                self.depth -= 1;
                match self.advance() {
                    Some(Spanned { token: Token::RParen, .. }) => {}
                    Some(other) => {
                        return Err(CompileError::UnexpectedToken {
                            found: other.token.describe(),
                            expected: "')'",
                            offset: other.offset,
                        })
                    }
                    None => {
                        return Err(CompileError::UnexpectedToken {
                            found: "end of action".to_string(),
                            expected: "')'",
                            offset: self.end,
                        })
                    }
                }
                Operand::Pipeline(Box::new(inner))
            }
            other => {
                return Err(CompileError::UnexpectedToken {
                    found: other.describe(),
                    expected: "value",
                    offset: next.offset,
                })
            }
        };

        Ok(operand)
    }
}

fn starts_operand(token: &Token) -> bool {
    matches!(
        token,
        Token::Str(_)
            | Token::Int(_)
            | Token::Float(_)
            | Token::Bool(_)
            | Token::Field(_)
            | Token::LParen
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_only() {
        let nodes = parse("plain text").unwrap();
        assert_eq!(nodes.len(), 1);
        assert!(matches!(&nodes[0], Node::Text(t) if t == "plain text"));
    }

    #[test]
    fn test_mixed_nodes() {
        let nodes = parse("a {{ upper \"b\" }} c").unwrap();
        assert_eq!(nodes.len(), 3);
        assert!(matches!(&nodes[1], Node::Action(p) if p.commands.len() == 1));
    }

    #[test]
    fn test_close_inside_string_literal() {
        let nodes = parse(r#"{{ concat "}}" "x" }}"#).unwrap();
        assert_eq!(nodes.len(), 1);
    }

    #[test]
    fn test_nested_pipeline() {
        let nodes = parse("{{ add (random_int_n 5) 1 | str }}").unwrap();
        match &nodes[0] {
            Node::Action(p) => {
                assert_eq!(p.commands.len(), 2);
                match &p.commands[0] {
                    Command::Call { func, args } => {
                        assert_eq!(func.name, "add");
                        assert!(matches!(args[0], Operand::Pipeline(_)));
                    }
                    other => panic!("unexpected command {:?}", other),
                }
            }
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn test_nesting_limit() {
        let at_limit = format!(
            "{{{{ {}1{} }}}}",
            "(".repeat(MAX_NESTING),
            ")".repeat(MAX_NESTING)
        );
        assert!(parse(&at_limit).is_ok());

        let past_limit = format!(
            "{{{{ {}1{} }}}}",
            "(".repeat(MAX_NESTING + 1),
            ")".repeat(MAX_NESTING + 1)
        );
        assert_eq!(
            parse(&past_limit).unwrap_err(),
            CompileError::TooDeep {
                limit: MAX_NESTING,
                offset: 3 + MAX_NESTING,
            }
        );
    }

    #[test]
    fn test_unknown_function() {
        assert_eq!(
            parse("{{ exec \"rm\" }}").unwrap_err(),
            CompileError::UnknownFunction("exec".to_string())
        );
    }

    #[test]
    fn test_arity_counts_piped_argument() {
        assert!(parse("{{ \"a\" | upper }}").is_ok());
        assert!(matches!(
            parse("{{ \"a\" | upper \"b\" }}").unwrap_err(),
            CompileError::Arity { name: "upper", got: 2, .. }
        ));
    }

    #[test]
    fn test_malformed_actions() {
        assert_eq!(parse("x {{ upper").unwrap_err(), CompileError::UnterminatedAction(2));
        assert_eq!(parse("{{   }}").unwrap_err(), CompileError::EmptyAction(0));
        assert!(matches!(
            parse("{{ \"a\" \"b\" }}").unwrap_err(),
            CompileError::UnexpectedToken { .. }
        ));
        assert!(matches!(
            parse("{{ \"a\" | \"b\" }}").unwrap_err(),
            CompileError::UnexpectedToken { expected: "function name", .. }
        ));
        assert!(matches!(
            parse("{{ upper (lower \"A\" }}").unwrap_err(),
            CompileError::UnexpectedToken { expected: "')'", .. }
        ));
    }
}
