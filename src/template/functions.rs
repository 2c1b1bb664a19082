// src/template/functions.rs
//! The fixed builtin function table
//!
//! Every function a template may call is listed in [`BUILTINS`]. Nothing in
//! this table touches the file system, spawns processes or opens sockets;
//! the only ambient reads are the clock and allow-listed environment
//! variables. Stateful functions draw from the per-instance
//! [`EvalContext`].
//!
//! Argument order follows the pipe convention: the data argument comes
//! last, so `{{ .targets | join "," }}` calls `join "," .targets`.

use crate::template::context::EvalContext;
use crate::template::error::EvalError;
use crate::template::value::Value;
use base64::Engine as _;
use once_cell::sync::Lazy;
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::net::Ipv4Addr;

/// Upper bound for any generated string, in bytes
pub const MAX_GENERATED_LEN: usize = 1 << 20;

pub(crate) type BuiltinFn = fn(&mut EvalContext, Vec<Value>) -> Result<Value, EvalError>;

/// One entry of the builtin table
pub struct Builtin {
    pub name: &'static str,

    /// Minimum number of arguments, including a piped one
    pub min_args: usize,

    /// Maximum number of arguments, `None` for variadic
    pub max_args: Option<usize>,

    /// Whether results depend on per-instance state, the clock or the environment
    pub stateful: bool,

    func: BuiltinFn,
}

impl std::fmt::Debug for Builtin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builtin")
            .field("name", &self.name)
            .field("stateful", &self.stateful)
            .finish()
    }
}

impl Builtin {
    const fn pure(name: &'static str, min: usize, max: Option<usize>, func: BuiltinFn) -> Self {
        Self {
            name,
            min_args: min,
            max_args: max,
            stateful: false,
            func,
        }
    }

    const fn stateful(name: &'static str, min: usize, max: Option<usize>, func: BuiltinFn) -> Self {
        Self {
            name,
            min_args: min,
            max_args: max,
            stateful: true,
            func,
        }
    }

    pub fn accepts(&self, count: usize) -> bool {
        count >= self.min_args && self.max_args.map_or(true, |max| count <= max)
    }

    pub(crate) fn arity_text(&self) -> String {
        match self.max_args {
            Some(max) if max == self.min_args => max.to_string(),
            Some(max) => format!("{} to {}", self.min_args, max),
            None => format!("at least {}", self.min_args),
        }
    }

    pub(crate) fn call(&self, ctx: &mut EvalContext, args: Vec<Value>) -> Result<Value, EvalError> {
        (self.func)(ctx, args)
    }
}

/// The complete set of callable functions
pub static BUILTINS: Lazy<HashMap<&'static str, Builtin>> = Lazy::new(|| {
    let table = [
        // strings
        Builtin::pure("upper", 1, Some(1), upper),
        Builtin::pure("lower", 1, Some(1), lower),
        Builtin::pure("trim", 1, Some(1), trim),
        Builtin::pure("concat", 0, None, concat),
        Builtin::pure("join", 2, Some(2), join),
        Builtin::pure("split", 2, Some(2), split),
        Builtin::pure("repeat", 2, Some(2), repeat),
        Builtin::pure("replace", 3, Some(3), replace),
        Builtin::pure("len", 1, Some(1), len),
        Builtin::pure("substr", 3, Some(3), substr),
        Builtin::pure("str", 1, Some(1), to_str),
        Builtin::pure("int", 1, Some(1), to_int),
        Builtin::pure("default", 2, Some(2), default),
        // encoding
        Builtin::pure("base64_encode", 1, Some(1), base64_encode),
        Builtin::pure("base64_decode", 1, Some(1), base64_decode),
        Builtin::pure("hex_encode", 1, Some(1), hex_encode),
        Builtin::pure("sha256", 1, Some(1), sha256),
        // arithmetic and logic
        Builtin::pure("add", 2, Some(2), add),
        Builtin::pure("sub", 2, Some(2), sub),
        Builtin::pure("mul", 2, Some(2), mul),
        Builtin::pure("div", 2, Some(2), div),
        Builtin::pure("mod", 2, Some(2), modulo),
        Builtin::pure("eq", 2, Some(2), eq),
        Builtin::pure("ne", 2, Some(2), ne),
        Builtin::pure("lt", 2, Some(2), lt),
        Builtin::pure("le", 2, Some(2), le),
        Builtin::pure("gt", 2, Some(2), gt),
        Builtin::pure("ge", 2, Some(2), ge),
        Builtin::pure("not", 1, Some(1), not),
        Builtin::pure("and", 1, None, and),
        Builtin::pure("or", 1, None, or),
        // lists
        Builtin::pure("list", 0, None, list),
        Builtin::pure("index", 2, Some(2), index),
        // randomness
        Builtin::stateful("random_int", 2, Some(2), random_int),
        Builtin::stateful("random_int_n", 1, Some(1), random_int_n),
        Builtin::stateful("random_float", 0, Some(0), random_float),
        Builtin::stateful("random_bool", 0, Some(0), random_bool),
        Builtin::stateful("random_choice", 1, Some(1), random_choice),
        Builtin::stateful("random_alphanum", 1, Some(1), random_alphanum),
        Builtin::stateful("random_hex", 1, Some(1), random_hex),
        Builtin::stateful("random_uuid", 0, Some(0), random_uuid),
        Builtin::stateful("random_ulid", 0, Some(0), random_ulid),
        Builtin::stateful("random_ip", 0, Some(0), random_ip),
        Builtin::stateful("random_port", 0, Some(0), random_port),
        // counters, clock, environment
        Builtin::stateful("counter", 0, Some(1), counter),
        Builtin::stateful("now_unix", 0, Some(0), now_unix),
        Builtin::stateful("now_unix_ms", 0, Some(0), now_unix_ms),
        Builtin::stateful("now_rfc3339", 0, Some(0), now_rfc3339),
        Builtin::stateful("env", 1, Some(1), env),
    ];

    table.into_iter().map(|b| (b.name, b)).collect()
});

/// Resolve a function name against the table
pub fn lookup(name: &str) -> Option<&'static Builtin> {
    BUILTINS.get(name)
}

/// Sorted list of every builtin name
pub fn names() -> Vec<&'static str> {
    let mut names: Vec<_> = BUILTINS.keys().copied().collect();
    names.sort_unstable();
    names
}

// Argument helpers. Arity is checked at compile time, so positional
// access below cannot go out of bounds.

fn string_arg(func: &'static str, value: &Value) -> Result<String, EvalError> {
    match value {
        Value::List(_) => Err(EvalError::TypeMismatch {
            func,
            expected: "string",
            found: "list",
        }),
        other => Ok(other.to_string()),
    }
}

fn length_arg(func: &'static str, value: &Value) -> Result<usize, EvalError> {
    let n = value.to_i64(func)?;
    if n < 0 || n as usize > MAX_GENERATED_LEN {
        return Err(EvalError::OutOfRange {
            func,
            reason: format!("length {} outside 0..={}", n, MAX_GENERATED_LEN),
        });
    }
    Ok(n as usize)
}

/// Reject a result of `len` bytes past [`MAX_GENERATED_LEN`]
pub(crate) fn check_len(func: &'static str, len: usize) -> Result<(), EvalError> {
    if len > MAX_GENERATED_LEN {
        return Err(EvalError::OutOfRange {
            func,
            reason: format!("result of {} bytes exceeds {}", len, MAX_GENERATED_LEN),
        });
    }
    Ok(())
}

fn is_number(value: &Value) -> bool {
    matches!(value, Value::Int(_) | Value::Float(_))
}

fn upper(_: &mut EvalContext, args: Vec<Value>) -> Result<Value, EvalError> {
    Ok(Value::Str(string_arg("upper", &args[0])?.to_uppercase()))
}

fn lower(_: &mut EvalContext, args: Vec<Value>) -> Result<Value, EvalError> {
    Ok(Value::Str(string_arg("lower", &args[0])?.to_lowercase()))
}

fn trim(_: &mut EvalContext, args: Vec<Value>) -> Result<Value, EvalError> {
    Ok(Value::Str(string_arg("trim", &args[0])?.trim().to_string()))
}

fn concat(_: &mut EvalContext, args: Vec<Value>) -> Result<Value, EvalError> {
    let mut out = String::new();
    for arg in &args {
        out.push_str(&arg.to_string());
        if out.len() > MAX_GENERATED_LEN {
            return Err(EvalError::OutOfRange {
                func: "concat",
                reason: "result too large".to_string(),
            });
        }
    }
    Ok(Value::Str(out))
}

fn join(_: &mut EvalContext, mut args: Vec<Value>) -> Result<Value, EvalError> {
    let items = args.pop().unwrap_or(Value::List(Vec::new())).into_list("join")?;
    let sep = string_arg("join", &args[0])?;
    let parts: Vec<String> = items.iter().map(Value::to_string).collect();
    let total = parts
        .iter()
        .map(String::len)
        .sum::<usize>()
        .saturating_add(sep.len().saturating_mul(parts.len().saturating_sub(1)));
    check_len("join", total)?;
    Ok(Value::Str(parts.join(&sep)))
}

fn split(_: &mut EvalContext, args: Vec<Value>) -> Result<Value, EvalError> {
    let sep = string_arg("split", &args[0])?;
    let text = string_arg("split", &args[1])?;
    if sep.is_empty() {
        return Err(EvalError::Invalid {
            func: "split",
            reason: "separator must not be empty".to_string(),
        });
    }
    Ok(Value::List(
        text.split(sep.as_str()).map(Value::from).collect(),
    ))
}

fn repeat(_: &mut EvalContext, args: Vec<Value>) -> Result<Value, EvalError> {
    let count = args[0].to_i64("repeat")?;
    let text = string_arg("repeat", &args[1])?;
    if count < 0 || (count as usize).saturating_mul(text.len()) > MAX_GENERATED_LEN {
        return Err(EvalError::OutOfRange {
            func: "repeat",
            reason: format!("count {} for a {}-byte string", count, text.len()),
        });
    }
    Ok(Value::Str(text.repeat(count as usize)))
}

fn replace(_: &mut EvalContext, args: Vec<Value>) -> Result<Value, EvalError> {
    let from = string_arg("replace", &args[0])?;
    let to = string_arg("replace", &args[1])?;
    let text = string_arg("replace", &args[2])?;
    if from.is_empty() {
        return Ok(Value::Str(text));
    }
    let hits = text.matches(from.as_str()).count();
    let total = (text.len() - hits * from.len()).saturating_add(hits.saturating_mul(to.len()));
    check_len("replace", total)?;
    Ok(Value::Str(text.replace(&from, &to)))
}

fn len(_: &mut EvalContext, args: Vec<Value>) -> Result<Value, EvalError> {
    let n = match &args[0] {
        Value::List(items) => items.len(),
        other => other.to_string().chars().count(),
    };
    Ok(Value::Int(n as i64))
}

fn substr(_: &mut EvalContext, args: Vec<Value>) -> Result<Value, EvalError> {
    let start = args[0].to_i64("substr")?;
    let end = args[1].to_i64("substr")?;
    let chars: Vec<char> = string_arg("substr", &args[2])?.chars().collect();
    if start < 0 || end < start || end as usize > chars.len() {
        return Err(EvalError::OutOfRange {
            func: "substr",
            reason: format!("range {}..{} for length {}", start, end, chars.len()),
        });
    }
    Ok(Value::Str(chars[start as usize..end as usize].iter().collect()))
}

fn to_str(_: &mut EvalContext, args: Vec<Value>) -> Result<Value, EvalError> {
    Ok(Value::Str(args[0].to_string()))
}

fn to_int(_: &mut EvalContext, args: Vec<Value>) -> Result<Value, EvalError> {
    match &args[0] {
        Value::Float(f) if f.is_finite() => Ok(Value::Int(f.trunc() as i64)),
        other => Ok(Value::Int(other.to_i64("int")?)),
    }
}

fn default(_: &mut EvalContext, mut args: Vec<Value>) -> Result<Value, EvalError> {
    let value = args.pop().unwrap_or(Value::Str(String::new()));
    if value.is_empty() {
        Ok(args.swap_remove(0))
    } else {
        Ok(value)
    }
}

fn base64_encode(_: &mut EvalContext, args: Vec<Value>) -> Result<Value, EvalError> {
    let text = string_arg("base64_encode", &args[0])?;
    Ok(Value::Str(
        base64::engine::general_purpose::STANDARD.encode(text.as_bytes()),
    ))
}

fn base64_decode(_: &mut EvalContext, args: Vec<Value>) -> Result<Value, EvalError> {
    let text = string_arg("base64_decode", &args[0])?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(text.trim())
        .map_err(|e| EvalError::Invalid {
            func: "base64_decode",
            reason: e.to_string(),
        })?;
    String::from_utf8(bytes)
        .map(Value::Str)
        .map_err(|_| EvalError::Invalid {
            func: "base64_decode",
            reason: "decoded bytes are not UTF-8".to_string(),
        })
}

fn hex_encode(_: &mut EvalContext, args: Vec<Value>) -> Result<Value, EvalError> {
    Ok(Value::Str(hex::encode(string_arg("hex_encode", &args[0])?)))
}

fn sha256(_: &mut EvalContext, args: Vec<Value>) -> Result<Value, EvalError> {
    let digest = Sha256::digest(string_arg("sha256", &args[0])?.as_bytes());
    Ok(Value::Str(hex::encode(digest)))
}

fn arithmetic(
    func: &'static str,
    args: &[Value],
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value, EvalError> {
    match (&args[0], &args[1]) {
        (Value::Int(a), Value::Int(b)) => int_op(*a, *b).map(Value::Int).ok_or_else(|| {
            EvalError::OutOfRange {
                func,
                reason: format!("{} {} {} overflows", a, func, b),
            }
        }),
        (a, b) => Ok(Value::Float(float_op(a.to_f64(func)?, b.to_f64(func)?))),
    }
}

fn add(_: &mut EvalContext, args: Vec<Value>) -> Result<Value, EvalError> {
    arithmetic("add", &args, i64::checked_add, |a, b| a + b)
}

fn sub(_: &mut EvalContext, args: Vec<Value>) -> Result<Value, EvalError> {
    arithmetic("sub", &args, i64::checked_sub, |a, b| a - b)
}

fn mul(_: &mut EvalContext, args: Vec<Value>) -> Result<Value, EvalError> {
    arithmetic("mul", &args, i64::checked_mul, |a, b| a * b)
}

fn div(_: &mut EvalContext, args: Vec<Value>) -> Result<Value, EvalError> {
    if args[1].to_f64("div")? == 0.0 {
        return Err(EvalError::OutOfRange {
            func: "div",
            reason: "division by zero".to_string(),
        });
    }
    arithmetic("div", &args, i64::checked_div, |a, b| a / b)
}

fn modulo(_: &mut EvalContext, args: Vec<Value>) -> Result<Value, EvalError> {
    let a = args[0].to_i64("mod")?;
    let b = args[1].to_i64("mod")?;
    if b == 0 {
        return Err(EvalError::OutOfRange {
            func: "mod",
            reason: "modulo by zero".to_string(),
        });
    }
    a.checked_rem_euclid(b)
        .map(Value::Int)
        .ok_or_else(|| EvalError::OutOfRange {
            func: "mod",
            reason: format!("{} mod {} overflows", a, b),
        })
}

fn compare(func: &'static str, a: &Value, b: &Value) -> Result<std::cmp::Ordering, EvalError> {
    if is_number(a) && is_number(b) {
        let (x, y) = (a.to_f64(func)?, b.to_f64(func)?);
        return x.partial_cmp(&y).ok_or(EvalError::Invalid {
            func,
            reason: "cannot compare NaN".to_string(),
        });
    }
    Ok(a.to_string().cmp(&b.to_string()))
}

fn eq(_: &mut EvalContext, args: Vec<Value>) -> Result<Value, EvalError> {
    Ok(Value::Bool(compare("eq", &args[0], &args[1])?.is_eq()))
}

fn ne(_: &mut EvalContext, args: Vec<Value>) -> Result<Value, EvalError> {
    Ok(Value::Bool(compare("ne", &args[0], &args[1])?.is_ne()))
}

fn lt(_: &mut EvalContext, args: Vec<Value>) -> Result<Value, EvalError> {
    Ok(Value::Bool(compare("lt", &args[0], &args[1])?.is_lt()))
}

fn le(_: &mut EvalContext, args: Vec<Value>) -> Result<Value, EvalError> {
    Ok(Value::Bool(compare("le", &args[0], &args[1])?.is_le()))
}

fn gt(_: &mut EvalContext, args: Vec<Value>) -> Result<Value, EvalError> {
    Ok(Value::Bool(compare("gt", &args[0], &args[1])?.is_gt()))
}

fn ge(_: &mut EvalContext, args: Vec<Value>) -> Result<Value, EvalError> {
    Ok(Value::Bool(compare("ge", &args[0], &args[1])?.is_ge()))
}

fn not(_: &mut EvalContext, args: Vec<Value>) -> Result<Value, EvalError> {
    Ok(Value::Bool(!args[0].is_truthy()))
}

fn and(_: &mut EvalContext, args: Vec<Value>) -> Result<Value, EvalError> {
    Ok(Value::Bool(args.iter().all(Value::is_truthy)))
}

fn or(_: &mut EvalContext, args: Vec<Value>) -> Result<Value, EvalError> {
    Ok(Value::Bool(args.iter().any(Value::is_truthy)))
}

fn list(_: &mut EvalContext, args: Vec<Value>) -> Result<Value, EvalError> {
    Ok(Value::List(args))
}

fn index(_: &mut EvalContext, mut args: Vec<Value>) -> Result<Value, EvalError> {
    let items = args.pop().unwrap_or(Value::List(Vec::new())).into_list("index")?;
    let i = args[0].to_i64("index")?;
    if i < 0 || i as usize >= items.len() {
        return Err(EvalError::OutOfRange {
            func: "index",
            reason: format!("index {} for list of length {}", i, items.len()),
        });
    }
    Ok(items.into_iter().nth(i as usize).unwrap_or(Value::Str(String::new())))
}

fn random_int(ctx: &mut EvalContext, args: Vec<Value>) -> Result<Value, EvalError> {
    let min = args[0].to_i64("random_int")?;
    let max = args[1].to_i64("random_int")?;
    if min >= max {
        return Err(EvalError::OutOfRange {
            func: "random_int",
            reason: format!("empty range {}..{}", min, max),
        });
    }
    Ok(Value::Int(ctx.rng().gen_range(min..max)))
}

fn random_int_n(ctx: &mut EvalContext, args: Vec<Value>) -> Result<Value, EvalError> {
    let n = args[0].to_i64("random_int_n")?;
    if n <= 0 {
        return Err(EvalError::OutOfRange {
            func: "random_int_n",
            reason: format!("bound {} must be positive", n),
        });
    }
    Ok(Value::Int(ctx.rng().gen_range(0..n)))
}

fn random_float(ctx: &mut EvalContext, _: Vec<Value>) -> Result<Value, EvalError> {
    Ok(Value::Float(ctx.rng().gen::<f64>()))
}

fn random_bool(ctx: &mut EvalContext, _: Vec<Value>) -> Result<Value, EvalError> {
    Ok(Value::Bool(ctx.rng().gen::<bool>()))
}

fn random_choice(ctx: &mut EvalContext, mut args: Vec<Value>) -> Result<Value, EvalError> {
    let items = args.pop().unwrap_or(Value::List(Vec::new())).into_list("random_choice")?;
    if items.is_empty() {
        return Err(EvalError::OutOfRange {
            func: "random_choice",
            reason: "empty list".to_string(),
        });
    }
    let i = ctx.rng().gen_range(0..items.len());
    Ok(items.into_iter().nth(i).unwrap_or(Value::Str(String::new())))
}

fn random_alphanum(ctx: &mut EvalContext, args: Vec<Value>) -> Result<Value, EvalError> {
    let n = length_arg("random_alphanum", &args[0])?;
    let text: String = (0..n)
        .map(|_| char::from(ctx.rng().sample(Alphanumeric)))
        .collect();
    Ok(Value::Str(text))
}

fn random_hex(ctx: &mut EvalContext, args: Vec<Value>) -> Result<Value, EvalError> {
    let n = length_arg("random_hex", &args[0])?;
    if n * 2 > MAX_GENERATED_LEN {
        return Err(EvalError::OutOfRange {
            func: "random_hex",
            reason: format!("{} bytes encode past the size limit", n),
        });
    }
    let mut bytes = vec![0u8; n];
    ctx.rng().fill(bytes.as_mut_slice());
    Ok(Value::Str(hex::encode(bytes)))
}

fn random_uuid(ctx: &mut EvalContext, _: Vec<Value>) -> Result<Value, EvalError> {
    let bytes: [u8; 16] = ctx.rng().gen();
    Ok(Value::Str(
        uuid::Builder::from_random_bytes(bytes).into_uuid().to_string(),
    ))
}

fn random_ulid(ctx: &mut EvalContext, _: Vec<Value>) -> Result<Value, EvalError> {
    let ms = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0);
    Ok(Value::Str(
        ulid::Ulid::from_parts(ms, ctx.rng().gen::<u128>()).to_string(),
    ))
}

fn random_ip(ctx: &mut EvalContext, _: Vec<Value>) -> Result<Value, EvalError> {
    Ok(Value::Str(Ipv4Addr::from(ctx.rng().gen::<u32>()).to_string()))
}

fn random_port(ctx: &mut EvalContext, _: Vec<Value>) -> Result<Value, EvalError> {
    Ok(Value::Int(ctx.rng().gen_range(1024..=65535)))
}

fn counter(ctx: &mut EvalContext, args: Vec<Value>) -> Result<Value, EvalError> {
    let name = match args.first() {
        Some(v) => string_arg("counter", v)?,
        None => String::new(),
    };
    let next = ctx.next_counter(&name)?;
    Ok(Value::Int(i64::try_from(next).unwrap_or(i64::MAX)))
}

fn now_unix(_: &mut EvalContext, _: Vec<Value>) -> Result<Value, EvalError> {
    Ok(Value::Int(chrono::Utc::now().timestamp()))
}

fn now_unix_ms(_: &mut EvalContext, _: Vec<Value>) -> Result<Value, EvalError> {
    Ok(Value::Int(chrono::Utc::now().timestamp_millis()))
}

fn now_rfc3339(_: &mut EvalContext, _: Vec<Value>) -> Result<Value, EvalError> {
    Ok(Value::Str(chrono::Utc::now().to_rfc3339()))
}

fn env(ctx: &mut EvalContext, args: Vec<Value>) -> Result<Value, EvalError> {
    let name = string_arg("env", &args[0])?;
    ctx.read_env(&name).map(Value::Str)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: Vec<Value>) -> Result<Value, EvalError> {
        let mut ctx = EvalContext::with_seed(7);
        lookup(name).unwrap().call(&mut ctx, args)
    }

    #[test]
    fn test_table_has_no_capability_functions() {
        for forbidden in ["exec", "read_file", "open", "system", "http_get", "shell"] {
            assert!(lookup(forbidden).is_none(), "{} must not be callable", forbidden);
        }
        assert!(names().len() >= 40);
    }

    #[test]
    fn test_string_functions() {
        assert_eq!(call("upper", vec!["ab".into()]).unwrap(), Value::from("AB"));
        assert_eq!(
            call("join", vec![",".into(), Value::List(vec!["a".into(), "b".into()])]).unwrap(),
            Value::from("a,b")
        );
        assert_eq!(
            call("split", vec![",".into(), "a,b".into()]).unwrap(),
            Value::List(vec!["a".into(), "b".into()])
        );
        assert_eq!(
            call("replace", vec!["a".into(), "o".into(), "banana".into()]).unwrap(),
            Value::from("bonono")
        );
        assert_eq!(
            call("substr", vec![Value::Int(1), Value::Int(3), "hello".into()]).unwrap(),
            Value::from("el")
        );
        assert_eq!(
            call("default", vec!["fallback".into(), "".into()]).unwrap(),
            Value::from("fallback")
        );
    }

    #[test]
    fn test_encoders() {
        assert_eq!(call("base64_encode", vec!["hi".into()]).unwrap(), Value::from("aGk="));
        assert_eq!(call("base64_decode", vec!["aGk=".into()]).unwrap(), Value::from("hi"));
        assert_eq!(call("hex_encode", vec!["hi".into()]).unwrap(), Value::from("6869"));
        assert!(call("base64_decode", vec!["***".into()]).is_err());
        assert_eq!(
            call("sha256", vec!["".into()]).unwrap(),
            Value::from("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855")
        );
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(call("add", vec![Value::Int(2), Value::Int(3)]).unwrap(), Value::Int(5));
        assert_eq!(call("mul", vec![Value::Int(2), Value::Float(1.5)]).unwrap(), Value::Float(3.0));
        assert_eq!(call("mod", vec![Value::Int(-1), Value::Int(3)]).unwrap(), Value::Int(2));
        assert!(matches!(
            call("div", vec![Value::Int(1), Value::Int(0)]).unwrap_err(),
            EvalError::OutOfRange { func: "div", .. }
        ));
        assert!(call("add", vec![Value::Int(i64::MAX), Value::Int(1)]).is_err());
        assert!(matches!(
            call("mod", vec![Value::Int(i64::MIN), Value::Int(-1)]).unwrap_err(),
            EvalError::OutOfRange { func: "mod", .. }
        ));
        assert!(matches!(
            call("div", vec![Value::Int(i64::MIN), Value::Int(-1)]).unwrap_err(),
            EvalError::OutOfRange { func: "div", .. }
        ));
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(call("eq", vec![Value::Int(2), Value::Float(2.0)]).unwrap(), Value::Bool(true));
        assert_eq!(call("lt", vec!["a".into(), "b".into()]).unwrap(), Value::Bool(true));
        assert_eq!(
            call("and", vec![Value::Bool(true), Value::from("")]).unwrap(),
            Value::Bool(false)
        );
    }

    #[test]
    fn test_random_ranges() {
        for _ in 0..100 {
            match call("random_int", vec![Value::Int(5), Value::Int(7)]).unwrap() {
                Value::Int(n) => assert!((5..7).contains(&n)),
                other => panic!("unexpected {:?}", other),
            }
        }
        assert!(matches!(
            call("random_int", vec![Value::Int(5), Value::Int(5)]).unwrap_err(),
            EvalError::OutOfRange { .. }
        ));
        assert!(call("random_int_n", vec![Value::Int(0)]).is_err());
        assert!(call("random_choice", vec![Value::List(vec![])]).is_err());
    }

    #[test]
    fn test_generated_sizes() {
        match call("random_alphanum", vec![Value::Int(12)]).unwrap() {
            Value::Str(s) => {
                assert_eq!(s.len(), 12);
                assert!(s.chars().all(|c| c.is_ascii_alphanumeric()));
            }
            other => panic!("unexpected {:?}", other),
        }
        match call("random_hex", vec![Value::Int(4)]).unwrap() {
            Value::Str(s) => assert_eq!(s.len(), 8),
            other => panic!("unexpected {:?}", other),
        }
        let too_big = Value::Int(MAX_GENERATED_LEN as i64 + 1);
        assert!(call("random_alphanum", vec![too_big]).is_err());
        assert!(call("repeat", vec![Value::Int(1 << 21), "x".into()]).is_err());
    }

    #[test]
    fn test_growing_functions_respect_size_limit() {
        let big = Value::Str("x".repeat(1000));
        let text = Value::Str("a".repeat(10_000));
        assert!(matches!(
            call("replace", vec!["a".into(), big.clone(), text]).unwrap_err(),
            EvalError::OutOfRange { func: "replace", .. }
        ));
        assert_eq!(
            call("replace", vec!["aa".into(), "b".into(), "aaa".into()]).unwrap(),
            Value::from("ba")
        );

        let items = Value::List(vec![big; 2000]);
        assert!(matches!(
            call("join", vec![",".into(), items]).unwrap_err(),
            EvalError::OutOfRange { func: "join", .. }
        ));
    }

    #[test]
    fn test_identifiers_are_well_formed() {
        match call("random_uuid", vec![]).unwrap() {
            Value::Str(s) => assert!(uuid::Uuid::parse_str(&s).is_ok()),
            other => panic!("unexpected {:?}", other),
        }
        match call("random_ulid", vec![]).unwrap() {
            Value::Str(s) => assert_eq!(s.len(), 26),
            other => panic!("unexpected {:?}", other),
        }
        match call("random_ip", vec![]).unwrap() {
            Value::Str(s) => assert!(s.parse::<Ipv4Addr>().is_ok()),
            other => panic!("unexpected {:?}", other),
        }
    }
}
