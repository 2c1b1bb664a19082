// src/template/lexer.rs
//! Tokenizer for the inside of `{{ ... }}` actions

use crate::template::error::CompileError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Ident(String),
    /// `.a.b` field path
    Field(Vec<String>),
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Pipe,
    LParen,
    RParen,
}

impl Token {
    pub(crate) fn describe(&self) -> String {
        match self {
            Token::Ident(name) => format!("identifier '{}'", name),
            Token::Field(path) => format!("field '.{}'", path.join(".")),
            Token::Str(_) => "string literal".to_string(),
            Token::Int(_) | Token::Float(_) => "number".to_string(),
            Token::Bool(_) => "boolean".to_string(),
            Token::Pipe => "'|'".to_string(),
            Token::LParen => "'('".to_string(),
            Token::RParen => "')'".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    pub token: Token,
    pub offset: usize,
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Tokenize one action body. `base` is the body's offset in the template.
pub(crate) fn tokenize(src: &str, base: usize) -> Result<Vec<Spanned>, CompileError> {
    let chars: Vec<(usize, char)> = src.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (pos, c) = chars[i];
        let offset = base + pos;

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        match c {
            '|' => {
                tokens.push(Spanned { token: Token::Pipe, offset });
                i += 1;
            }
            '(' => {
                tokens.push(Spanned { token: Token::LParen, offset });
                i += 1;
            }
            ')' => {
                tokens.push(Spanned { token: Token::RParen, offset });
                i += 1;
            }
            '"' => {
                let (text, next) = lex_string(&chars, i, offset)?;
                tokens.push(Spanned { token: Token::Str(text), offset });
                i = next;
            }
            '.' => {
                let mut path = Vec::new();
                while i < chars.len() && chars[i].1 == '.' {
                    i += 1;
                    let start = i;
                    while i < chars.len() && is_ident_char(chars[i].1) {
                        i += 1;
                    }
                    if start == i {
                        let (bad_pos, bad) = chars.get(i).copied().unwrap_or((src.len(), '.'));
                        return Err(CompileError::UnexpectedChar {
                            ch: bad,
                            offset: base + bad_pos,
                        });
                    }
                    path.push(chars[start..i].iter().map(|(_, c)| *c).collect());
                }
                tokens.push(Spanned { token: Token::Field(path), offset });
            }
            c if c.is_ascii_digit()
                || (c == '-' && chars.get(i + 1).map_or(false, |(_, n)| n.is_ascii_digit())) =>
            {
                let start = i;
                i += 1;
                while i < chars.len()
                    && (chars[i].1.is_ascii_digit()
                        || chars[i].1 == '.'
                        || chars[i].1 == 'e'
                        || chars[i].1 == 'E')
                {
                    i += 1;
                }
                let text: String = chars[start..i].iter().map(|(_, c)| *c).collect();
                let token = if text.contains(['.', 'e', 'E']) {
                    text.parse::<f64>()
                        .map(Token::Float)
                        .map_err(|_| CompileError::InvalidNumber(text.clone()))?
                } else {
                    text.parse::<i64>()
                        .map(Token::Int)
                        .map_err(|_| CompileError::InvalidNumber(text.clone()))?
                };
                tokens.push(Spanned { token, offset });
            }
            c if is_ident_start(c) => {
                let start = i;
                while i < chars.len() && is_ident_char(chars[i].1) {
                    i += 1;
                }
                let word: String = chars[start..i].iter().map(|(_, c)| *c).collect();
                let token = match word.as_str() {
                    "true" => Token::Bool(true),
                    "false" => Token::Bool(false),
                    _ => Token::Ident(word),
                };
                tokens.push(Spanned { token, offset });
            }
            other => {
                return Err(CompileError::UnexpectedChar { ch: other, offset });
            }
        }
    }

    Ok(tokens)
}

fn lex_string(
    chars: &[(usize, char)],
    open: usize,
    offset: usize,
) -> Result<(String, usize), CompileError> {
    let mut out = String::new();
    let mut i = open + 1;

    while i < chars.len() {
        match chars[i].1 {
            '"' => return Ok((out, i + 1)),
            '\\' => {
                let escaped = chars
                    .get(i + 1)
                    .map(|(_, c)| *c)
                    .ok_or(CompileError::UnterminatedString(offset))?;
                out.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => other,
                });
                i += 2;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }

    Err(CompileError::UnterminatedString(offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Token> {
        tokenize(src, 0).unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn test_call_with_args() {
        assert_eq!(
            kinds(r#"random_int 1 -5 "x y" 2.5 true"#),
            vec![
                Token::Ident("random_int".into()),
                Token::Int(1),
                Token::Int(-5),
                Token::Str("x y".into()),
                Token::Float(2.5),
                Token::Bool(true),
            ]
        );
    }

    #[test]
    fn test_fields_and_pipes() {
        assert_eq!(
            kinds(".vars.region | upper"),
            vec![
                Token::Field(vec!["vars".into(), "region".into()]),
                Token::Pipe,
                Token::Ident("upper".into()),
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(kinds(r#""a\"b\n""#), vec![Token::Str("a\"b\n".into())]);
    }

    #[test]
    fn test_offsets_are_absolute() {
        let tokens = tokenize("  upper", 10).unwrap();
        assert_eq!(tokens[0].offset, 12);
    }

    #[test]
    fn test_errors() {
        assert_eq!(
            tokenize(r#""open"#, 3).unwrap_err(),
            CompileError::UnterminatedString(3)
        );
        assert!(matches!(
            tokenize("a ; b", 0).unwrap_err(),
            CompileError::UnexpectedChar { ch: ';', offset: 2 }
        ));
        assert!(matches!(
            tokenize(". x", 0).unwrap_err(),
            CompileError::UnexpectedChar { .. }
        ));
        assert!(matches!(
            tokenize("1.2.3", 0).unwrap_err(),
            CompileError::InvalidNumber(_)
        ));
    }
}
