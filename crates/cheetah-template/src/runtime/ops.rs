/*
 * ops.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Operators and methods of plain values.
//!
//! Arithmetic, comparison and `%` formatting follow the host expression
//! language: ints promote to floats, `/` is true division, `//` and `%`
//! floor towards negative infinity, and bools count as ints.

use crate::class::{BoundMethod, CallArgs, Method, MethodBody, NativeCall};
use crate::error::{RenderError, RenderErrorKind};
use crate::expr::{BinaryOp, CompareOp};
use crate::ir::MethodKind;
use crate::value::{Value, repr_str};
use std::cmp::Ordering;
use std::sync::Arc;

enum Num {
    Int(i64),
    Float(f64),
}

fn number(value: &Value) -> Option<Num> {
    match value {
        Value::Int(i) => Some(Num::Int(*i)),
        Value::Bool(b) => Some(Num::Int(i64::from(*b))),
        Value::Float(f) => Some(Num::Float(*f)),
        _ => None,
    }
}

fn as_f64(n: &Num) -> f64 {
    match n {
        Num::Int(i) => *i as f64,
        Num::Float(f) => *f,
    }
}

fn unsupported(op: &str, left: &Value, right: &Value) -> RenderError {
    RenderError::type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op,
        left.type_name(),
        right.type_name()
    ))
}

fn overflow() -> RenderError {
    RenderError::new(RenderErrorKind::OverflowError, "integer overflow")
}

fn zero_division(what: &str) -> RenderError {
    RenderError::new(RenderErrorKind::ZeroDivisionError, what.to_string())
}

fn repeat<T: Clone>(items: &[T], times: i64) -> Vec<T> {
    let times = usize::try_from(times).unwrap_or(0);
    let mut out = Vec::with_capacity(items.len() * times);
    for _ in 0..times {
        out.extend_from_slice(items);
    }
    out
}

/// Apply a binary operator.
pub(crate) fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, RenderError> {
    match (op, left, right) {
        (BinaryOp::Add, Value::Str(a), Value::Str(b)) => return Ok(Value::Str(format!("{}{}", a, b))),
        (BinaryOp::Add, Value::List(a), Value::List(b)) => {
            return Ok(Value::List(a.iter().chain(b.iter()).cloned().collect()));
        }
        (BinaryOp::Mul, Value::Str(s), n) | (BinaryOp::Mul, n, Value::Str(s)) => {
            if let Some(Num::Int(times)) = number(n) {
                return Ok(Value::Str(s.repeat(usize::try_from(times).unwrap_or(0))));
            }
        }
        (BinaryOp::Mul, Value::List(items), n) | (BinaryOp::Mul, n, Value::List(items)) => {
            if let Some(Num::Int(times)) = number(n) {
                return Ok(Value::List(repeat(items, times)));
            }
        }
        (BinaryOp::Mod, Value::Str(format), args) => return format_percent(format, args).map(Value::Str),
        _ => {}
    }

    let symbol = match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::FloorDiv => "//",
        BinaryOp::Mod => "%",
        BinaryOp::Pow => "** or pow()",
    };
    let (Some(a), Some(b)) = (number(left), number(right)) else {
        return Err(unsupported(symbol, left, right));
    };

    if let (Num::Int(x), Num::Int(y)) = (&a, &b) {
        let (x, y) = (*x, *y);
        return match op {
            BinaryOp::Add => x.checked_add(y).map(Value::Int).ok_or_else(overflow),
            BinaryOp::Sub => x.checked_sub(y).map(Value::Int).ok_or_else(overflow),
            BinaryOp::Mul => x.checked_mul(y).map(Value::Int).ok_or_else(overflow),
            BinaryOp::Div => {
                if y == 0 {
                    Err(zero_division("division by zero"))
                } else {
                    Ok(Value::Float(x as f64 / y as f64))
                }
            }
            BinaryOp::FloorDiv => {
                if y == 0 {
                    return Err(zero_division("integer division or modulo by zero"));
                }
                let q = x.checked_div(y).ok_or_else(overflow)?;
                Ok(Value::Int(if (x % y != 0) && ((x < 0) != (y < 0)) { q - 1 } else { q }))
            }
            BinaryOp::Mod => {
                if y == 0 {
                    return Err(zero_division("integer division or modulo by zero"));
                }
                let r = x.checked_rem(y).ok_or_else(overflow)?;
                Ok(Value::Int(if r != 0 && ((r < 0) != (y < 0)) { r + y } else { r }))
            }
            BinaryOp::Pow => match u32::try_from(y) {
                Ok(exp) => x.checked_pow(exp).map(Value::Int).ok_or_else(overflow),
                Err(_) if y < 0 => {
                    if x == 0 {
                        Err(zero_division("0.0 cannot be raised to a negative power"))
                    } else {
                        Ok(Value::Float((x as f64).powf(y as f64)))
                    }
                }
                Err(_) => Err(overflow()),
            },
        };
    }

    let (x, y) = (as_f64(&a), as_f64(&b));
    let result = match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div => {
            if y == 0.0 {
                return Err(zero_division("float division by zero"));
            }
            x / y
        }
        BinaryOp::FloorDiv => {
            if y == 0.0 {
                return Err(zero_division("float floor division by zero"));
            }
            (x / y).floor()
        }
        BinaryOp::Mod => {
            if y == 0.0 {
                return Err(zero_division("float modulo"));
            }
            let r = x % y;
            if r != 0.0 && ((r < 0.0) != (y < 0.0)) { r + y } else { r }
        }
        BinaryOp::Pow => x.powf(y),
    };
    Ok(Value::Float(result))
}

pub(crate) fn negate(value: &Value) -> Result<Value, RenderError> {
    match number(value) {
        Some(Num::Int(i)) => i.checked_neg().map(Value::Int).ok_or_else(overflow),
        Some(Num::Float(f)) => Ok(Value::Float(-f)),
        None => Err(RenderError::type_error(format!(
            "bad operand type for unary -: '{}'",
            value.type_name()
        ))),
    }
}

pub(crate) fn positive(value: &Value) -> Result<Value, RenderError> {
    match number(value) {
        Some(Num::Int(i)) => Ok(Value::Int(i)),
        Some(Num::Float(f)) => Ok(Value::Float(f)),
        None => Err(RenderError::type_error(format!(
            "bad operand type for unary +: '{}'",
            value.type_name()
        ))),
    }
}

fn order(left: &Value, right: &Value) -> Result<Ordering, RenderError> {
    if let (Some(a), Some(b)) = (number(left), number(right)) {
        return match (a, b) {
            (Num::Int(x), Num::Int(y)) => Ok(x.cmp(&y)),
            (a, b) => as_f64(&a)
                .partial_cmp(&as_f64(&b))
                .ok_or_else(|| RenderError::type_error("cannot order NaN")),
        };
    }
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
        (Value::List(a), Value::List(b)) => {
            for (x, y) in a.iter().zip(b.iter()) {
                if x != y {
                    return order(x, y);
                }
            }
            Ok(a.len().cmp(&b.len()))
        }
        _ => Err(RenderError::type_error(format!(
            "'<' not supported between instances of '{}' and '{}'",
            left.type_name(),
            right.type_name()
        ))),
    }
}

fn contains(container: &Value, item: &Value) -> Result<bool, RenderError> {
    match container {
        Value::Str(s) => match item {
            Value::Str(needle) => Ok(s.contains(needle.as_str())),
            other => Err(RenderError::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::List(items) => Ok(items.contains(item)),
        Value::Map(m) => Ok(m.contains_key(&map_key(item)?)),
        Value::Instance(inst) if inst.data().is_some() => {
            let key = map_key(item)?;
            Ok(inst.data().is_some_and(|d| d.contains_key(&key)))
        }
        other => Err(RenderError::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

pub(crate) fn compare(op: CompareOp, left: &Value, right: &Value) -> Result<bool, RenderError> {
    Ok(match op {
        CompareOp::Eq => left == right,
        CompareOp::Ne => left != right,
        CompareOp::Lt => order(left, right)? == Ordering::Less,
        CompareOp::Le => order(left, right)? != Ordering::Greater,
        CompareOp::Gt => order(left, right)? == Ordering::Greater,
        CompareOp::Ge => order(left, right)? != Ordering::Less,
        CompareOp::In => contains(right, left)?,
        CompareOp::NotIn => !contains(right, left)?,
        CompareOp::Is => left.type_name() == right.type_name() && left == right,
        CompareOp::IsNot => !(left.type_name() == right.type_name() && left == right),
    })
}

/// Key used to index a mapping.
pub(crate) fn map_key(value: &Value) -> Result<String, RenderError> {
    match value {
        Value::Str(s) => Ok(s.clone()),
        Value::None | Value::Bool(_) | Value::Int(_) | Value::Float(_) => Ok(value.repr()),
        other => Err(RenderError::type_error(format!(
            "unhashable type: '{}'",
            other.type_name()
        ))),
    }
}

/// `value[index]`.
pub(crate) fn index(value: &Value, index: &Value) -> Result<Value, RenderError> {
    match value {
        Value::List(items) => {
            let i = sequence_index(index, items.len())?;
            Ok(items[i].clone())
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let i = sequence_index(index, chars.len())?;
            Ok(Value::Str(chars[i].to_string()))
        }
        Value::Map(m) => {
            let key = map_key(index)?;
            m.get(&key).cloned().ok_or_else(|| key_error(&key))
        }
        Value::Instance(inst) if inst.data().is_some() => {
            let key = map_key(index)?;
            inst.data()
                .and_then(|d| d.get(&key))
                .cloned()
                .ok_or_else(|| key_error(&key))
        }
        other => Err(RenderError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

fn key_error(key: &str) -> RenderError {
    RenderError::new(RenderErrorKind::KeyError, repr_str(key))
}

fn sequence_index(index: &Value, len: usize) -> Result<usize, RenderError> {
    let Some(Num::Int(i)) = number(index) else {
        return Err(RenderError::type_error(format!(
            "indices must be integers, not {}",
            index.type_name()
        )));
    };
    let len = len as i64;
    let resolved = if i < 0 { i + len } else { i };
    if resolved < 0 || resolved >= len {
        return Err(RenderError::new(RenderErrorKind::IndexError, "index out of range"));
    }
    Ok(resolved as usize)
}

/// Items visited by `#for`.
pub(crate) fn iterate(value: &Value) -> Result<Vec<Value>, RenderError> {
    match value {
        Value::List(items) => Ok(items.clone()),
        Value::Map(m) => Ok(m.keys().map(|k| Value::from(k.as_str())).collect()),
        Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
        Value::Instance(inst) if inst.data().is_some() => Ok(inst
            .data()
            .map(|d| d.keys().map(|k| Value::from(k.as_str())).collect())
            .unwrap_or_default()),
        other => Err(RenderError::type_error(format!(
            "'{}' object is not iterable",
            other.type_name()
        ))),
    }
}

struct Spec {
    left: bool,
    zero: bool,
    plus: bool,
    width: usize,
    precision: Option<usize>,
    conversion: char,
}

fn parse_spec(chars: &[char], mut i: usize) -> Result<(Spec, usize), RenderError> {
    let mut spec = Spec {
        left: false,
        zero: false,
        plus: false,
        width: 0,
        precision: None,
        conversion: 's',
    };
    while let Some(c) = chars.get(i) {
        match c {
            '-' => spec.left = true,
            '0' => spec.zero = true,
            '+' => spec.plus = true,
            ' ' | '#' => {}
            _ => break,
        }
        i += 1;
    }
    while let Some(d) = chars.get(i).and_then(|c| c.to_digit(10)) {
        spec.width = spec.width * 10 + d as usize;
        i += 1;
    }
    if chars.get(i) == Some(&'.') {
        i += 1;
        let mut precision = 0;
        while let Some(d) = chars.get(i).and_then(|c| c.to_digit(10)) {
            precision = precision * 10 + d as usize;
            i += 1;
        }
        spec.precision = Some(precision);
    }
    match chars.get(i) {
        Some(c) if "srdifFxX".contains(*c) => {
            spec.conversion = *c;
            Ok((spec, i + 1))
        }
        Some(c) => Err(RenderError::new(
            RenderErrorKind::ValueError,
            format!("unsupported format character '{}'", c),
        )),
        None => Err(RenderError::new(RenderErrorKind::ValueError, "incomplete format")),
    }
}

fn convert(spec: &Spec, value: &Value) -> Result<String, RenderError> {
    let numeric = || {
        number(value).ok_or_else(|| {
            RenderError::type_error(format!(
                "%{} format: a number is required, not {}",
                spec.conversion,
                value.type_name()
            ))
        })
    };
    let body = match spec.conversion {
        's' => super::display(value)?,
        'r' => value.repr(),
        'd' | 'i' => match numeric()? {
            Num::Int(i) => i.to_string(),
            Num::Float(f) => format!("{}", f.trunc() as i64),
        },
        'f' | 'F' => format!("{:.*}", spec.precision.unwrap_or(6), as_f64(&numeric()?)),
        'x' | 'X' => {
            let Num::Int(i) = numeric()? else {
                return Err(RenderError::type_error("%x format: an integer is required"));
            };
            let digits = format!("{:x}", i.unsigned_abs());
            let digits = if spec.conversion == 'X' { digits.to_uppercase() } else { digits };
            if i < 0 { format!("-{}", digits) } else { digits }
        }
        other => {
            return Err(RenderError::new(
                RenderErrorKind::ValueError,
                format!("unsupported format character '{}'", other),
            ));
        }
    };
    let body = match spec.conversion {
        's' | 'r' => match spec.precision {
            Some(p) => body.chars().take(p).collect(),
            None => body,
        },
        _ if spec.plus && !body.starts_with('-') => format!("+{}", body),
        _ => body,
    };
    let len = body.chars().count();
    if len >= spec.width {
        return Ok(body);
    }
    let fill = spec.width - len;
    Ok(if spec.left {
        format!("{}{}", body, " ".repeat(fill))
    } else if spec.zero && !matches!(spec.conversion, 's' | 'r') {
        let (sign, digits) = match body.strip_prefix(['-', '+']) {
            Some(rest) => (&body[..1], rest),
            None => ("", body.as_str()),
        };
        format!("{}{}{}", sign, "0".repeat(fill), digits)
    } else {
        format!("{}{}", " ".repeat(fill), body)
    })
}

/// `format % args`.
pub(crate) fn format_percent(format: &str, args: &Value) -> Result<String, RenderError> {
    let chars: Vec<char> = format.chars().collect();
    let specs = count_specs(&chars);
    let args: Vec<Value> = match args {
        Value::List(items) if specs != 1 || items.len() == 1 => items.clone(),
        other => vec![other.clone()],
    };
    let mut next = args.iter();
    let mut out = String::new();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] != '%' {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        if chars.get(i + 1) == Some(&'%') {
            out.push('%');
            i += 2;
            continue;
        }
        let (spec, end) = parse_spec(&chars, i + 1)?;
        let value = next.next().ok_or_else(|| {
            RenderError::type_error("not enough arguments for format string")
        })?;
        out.push_str(&convert(&spec, value)?);
        i = end;
    }
    if next.next().is_some() {
        return Err(RenderError::type_error(
            "not all arguments converted during string formatting",
        ));
    }
    Ok(out)
}

fn count_specs(chars: &[char]) -> usize {
    let mut count = 0;
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '%' {
            if chars.get(i + 1) == Some(&'%') {
                i += 2;
                continue;
            }
            count += 1;
        }
        i += 1;
    }
    count
}

type ValueMethod = fn(NativeCall<'_>) -> Result<Value, RenderError>;

const STR_METHODS: &[(&str, ValueMethod)] = &[
    ("upper", str_upper),
    ("lower", str_lower),
    ("strip", str_strip),
    ("split", str_split),
    ("join", str_join),
    ("replace", str_replace),
    ("startswith", str_startswith),
    ("endswith", str_endswith),
];

const MAP_METHODS: &[(&str, ValueMethod)] = &[
    ("get", map_get),
    ("keys", map_keys),
    ("values", map_values),
    ("items", map_items),
];

/// Methods of strings and mappings, bound to the value.
pub(crate) fn value_method(value: &Value, name: &str) -> Option<Value> {
    let table = match value {
        Value::Str(_) => STR_METHODS,
        Value::Map(_) => MAP_METHODS,
        _ => return None,
    };
    let (_, f) = table.iter().find(|(n, _)| *n == name)?;
    Some(Value::Method(Arc::new(BoundMethod {
        receiver: Some(value.clone()),
        owner: None,
        method: Method {
            name: name.to_string(),
            kind: MethodKind::Instance,
            body: MethodBody::Native(Arc::new(*f)),
        },
    })))
}

fn receiver_str<'a>(call: &'a NativeCall<'_>) -> &'a str {
    call.receiver.and_then(Value::as_str).unwrap_or_default()
}

fn str_arg<'a>(args: &'a CallArgs, i: usize, method: &str) -> Result<&'a str, RenderError> {
    args.positional
        .get(i)
        .and_then(Value::as_str)
        .ok_or_else(|| RenderError::type_error(format!("{}() expects a string argument", method)))
}

fn str_upper(call: NativeCall<'_>) -> Result<Value, RenderError> {
    Ok(Value::from(receiver_str(&call).to_uppercase()))
}

fn str_lower(call: NativeCall<'_>) -> Result<Value, RenderError> {
    Ok(Value::from(receiver_str(&call).to_lowercase()))
}

fn str_strip(call: NativeCall<'_>) -> Result<Value, RenderError> {
    let s = receiver_str(&call);
    Ok(Value::from(match call.args.positional.first().and_then(Value::as_str) {
        Some(chars) => s.trim_matches(|c| chars.contains(c)),
        None => s.trim(),
    }))
}

fn str_split(call: NativeCall<'_>) -> Result<Value, RenderError> {
    let s = receiver_str(&call);
    let parts: Vec<Value> = match call.args.positional.first().and_then(Value::as_str) {
        Some(sep) if !sep.is_empty() => s.split(sep).map(Value::from).collect(),
        Some(_) => return Err(RenderError::new(RenderErrorKind::ValueError, "empty separator")),
        None => s.split_whitespace().map(Value::from).collect(),
    };
    Ok(Value::List(parts))
}

fn str_join(call: NativeCall<'_>) -> Result<Value, RenderError> {
    let sep = receiver_str(&call);
    let items = match call.args.positional.first() {
        Some(Value::List(items)) => items,
        _ => return Err(RenderError::type_error("join() expects a list")),
    };
    let parts = items
        .iter()
        .map(|v| match v {
            Value::Str(s) => Ok(s.as_str()),
            other => Err(RenderError::type_error(format!(
                "sequence item: expected str instance, {} found",
                other.type_name()
            ))),
        })
        .collect::<Result<Vec<&str>, _>>()?;
    Ok(Value::from(parts.join(sep)))
}

fn str_replace(call: NativeCall<'_>) -> Result<Value, RenderError> {
    let old = str_arg(&call.args, 0, "replace")?;
    let new = str_arg(&call.args, 1, "replace")?;
    Ok(Value::from(receiver_str(&call).replace(old, new)))
}

fn str_startswith(call: NativeCall<'_>) -> Result<Value, RenderError> {
    let prefix = str_arg(&call.args, 0, "startswith")?;
    Ok(Value::Bool(receiver_str(&call).starts_with(prefix)))
}

fn str_endswith(call: NativeCall<'_>) -> Result<Value, RenderError> {
    let suffix = str_arg(&call.args, 0, "endswith")?;
    Ok(Value::Bool(receiver_str(&call).ends_with(suffix)))
}

fn receiver_map(call: &NativeCall<'_>) -> crate::value::Namespace {
    call.receiver
        .and_then(Value::as_map)
        .cloned()
        .unwrap_or_default()
}

fn map_get(call: NativeCall<'_>) -> Result<Value, RenderError> {
    let key = match call.args.positional.first() {
        Some(key) => map_key(key)?,
        None => return Err(RenderError::type_error("get() expects a key")),
    };
    Ok(receiver_map(&call)
        .get(&key)
        .cloned()
        .or_else(|| call.args.positional.get(1).cloned())
        .unwrap_or(Value::None))
}

fn map_keys(call: NativeCall<'_>) -> Result<Value, RenderError> {
    Ok(Value::List(
        receiver_map(&call).keys().map(|k| Value::from(k.as_str())).collect(),
    ))
}

fn map_values(call: NativeCall<'_>) -> Result<Value, RenderError> {
    Ok(Value::List(receiver_map(&call).values().cloned().collect()))
}

fn map_items(call: NativeCall<'_>) -> Result<Value, RenderError> {
    Ok(Value::List(
        receiver_map(&call)
            .into_iter()
            .map(|(k, v)| Value::List(vec![Value::Str(k), v]))
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_python_arithmetic() {
        assert_eq!(binary(BinaryOp::Mul, &Value::Int(99), &Value::Int(10)).unwrap(), Value::Int(990));
        assert_eq!(binary(BinaryOp::Div, &Value::Int(7), &Value::Int(2)).unwrap(), Value::Float(3.5));
        assert_eq!(binary(BinaryOp::FloorDiv, &Value::Int(-7), &Value::Int(2)).unwrap(), Value::Int(-4));
        assert_eq!(binary(BinaryOp::Mod, &Value::Int(-7), &Value::Int(3)).unwrap(), Value::Int(2));
        assert_eq!(binary(BinaryOp::Pow, &Value::Int(2), &Value::Int(10)).unwrap(), Value::Int(1024));
        assert_eq!(binary(BinaryOp::Add, &Value::Int(1), &Value::Float(0.5)).unwrap(), Value::Float(1.5));
        assert!(binary(BinaryOp::Div, &Value::Int(1), &Value::Int(0)).unwrap_err().matches("ZeroDivisionError"));
        assert!(binary(BinaryOp::Add, &Value::Int(i64::MAX), &Value::Int(1)).unwrap_err().matches("OverflowError"));
    }

    #[test]
    fn test_sequence_operators() {
        assert_eq!(
            binary(BinaryOp::Add, &Value::from(vec![4, 5]), &Value::from(vec![1, 2, 3])).unwrap(),
            Value::from(vec![4, 5, 1, 2, 3])
        );
        assert_eq!(binary(BinaryOp::Mul, &Value::from("ab"), &Value::Int(3)).unwrap(), Value::from("ababab"));
        assert!(binary(BinaryOp::Add, &Value::from("a"), &Value::Int(1)).unwrap_err().matches("TypeError"));
    }

    #[test]
    fn test_percent_formatting() {
        assert_eq!(format_percent("$foo = %s", &Value::from("bar")).unwrap(), "$foo = bar");
        assert_eq!(format_percent("%d%%", &Value::Float(12.9)).unwrap(), "12%");
        assert_eq!(format_percent("%.2f|%5s|%-3d|", &Value::from(vec![Value::Float(3.14159), Value::from("x"), Value::Int(7)])).unwrap(), "3.14|    x|7  |");
        assert_eq!(format_percent("%05d %x %r", &Value::from(vec![Value::Int(-42), Value::Int(255), Value::from("q")])).unwrap(), "-0042 ff 'q'");
        assert_eq!(format_percent("%s", &Value::from(vec![1, 2])).unwrap(), "[1, 2]");
        assert!(format_percent("%s %s", &Value::from("a")).unwrap_err().matches("TypeError"));
        assert!(format_percent("x", &Value::from("a")).unwrap_err().matches("TypeError"));
    }

    #[test]
    fn test_comparisons() {
        assert!(compare(CompareOp::Lt, &Value::Int(1), &Value::Float(1.5)).unwrap());
        assert!(compare(CompareOp::In, &Value::from("ell"), &Value::from("hello")).unwrap());
        assert!(compare(CompareOp::NotIn, &Value::Int(4), &Value::from(vec![1, 2])).unwrap());
        assert!(compare(CompareOp::Is, &Value::None, &Value::None).unwrap());
        assert!(!compare(CompareOp::Is, &Value::Int(1), &Value::Float(1.0)).unwrap());
        assert!(compare(CompareOp::Lt, &Value::from("a"), &Value::Int(1)).is_err());
    }

    #[test]
    fn test_index_and_methods() {
        let list = Value::from(vec![1, 2, 3]);
        assert_eq!(index(&list, &Value::Int(-1)).unwrap(), Value::Int(3));
        assert!(index(&list, &Value::Int(3)).unwrap_err().matches("IndexError"));
        assert!(index(&Value::Map(Default::default()), &Value::from("k")).unwrap_err().matches("LookupError"));
        let Some(Value::Method(upper)) = value_method(&Value::from("abc"), "upper") else {
            panic!("expected bound method");
        };
        let MethodBody::Native(f) = &upper.method.body else {
            panic!("expected native method");
        };
        let result = f(NativeCall {
            receiver: upper.receiver.as_ref(),
            args: CallArgs::new(),
        })
        .unwrap();
        assert_eq!(result, Value::from("ABC"));
    }
}
