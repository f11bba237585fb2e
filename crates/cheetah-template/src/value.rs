/*
 * value.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Runtime values for compiled templates.
//!
//! [`Value`] is the data model that flows through search lists, module
//! globals, method arguments and results. Scalars and containers mirror
//! the host expression language; classes, instances, modules and callables
//! are reference values compared by identity.
//!
//! Values convert from `serde_json::Value`, so callers can hand a JSON
//! document to a template as its namespace.

use crate::builtins::BuiltinFunction;
use crate::class::{BoundMethod, ClassRef};
use crate::instance::InstanceRef;
use crate::registry::ModuleNamespace;
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;

/// An ordered string-keyed mapping of values.
pub type Namespace = IndexMap<String, Value>;

/// A value that can be used in template evaluation.
#[derive(Clone, Default)]
pub enum Value {
    /// The absent value (renders as empty text in placeholders).
    #[default]
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(Namespace),
    /// A class: a built-in type, a native class, or a compiled template.
    Class(ClassRef),
    /// An instance of a template class.
    Instance(InstanceRef),
    /// A loaded module.
    Module(Arc<ModuleNamespace>),
    /// A method bound to its receiver.
    Method(Arc<BoundMethod>),
    /// A built-in function.
    Builtin(BuiltinFunction),
}

impl Value {
    /// The type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Map(_) => "dict",
            Value::Class(_) => "type",
            Value::Instance(_) => "instance",
            Value::Module(_) => "module",
            Value::Method(_) => "method",
            Value::Builtin(_) => "builtin_function",
        }
    }

    /// Python truthiness.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Map(m) => !m.is_empty(),
            _ => true,
        }
    }

    /// Whether calling this value is meaningful (used for autocalling).
    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Method(_) | Value::Builtin(_) | Value::Class(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Namespace> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_class(&self) -> Option<&ClassRef> {
        match self {
            Value::Class(c) => Some(c),
            _ => None,
        }
    }

    /// `str()` of the value. Instances are rendered by the runtime, so
    /// here they only get a placeholder description.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::None => "None".to_string(),
            Value::Str(s) => s.clone(),
            Value::Instance(inst) => format!("<{} instance>", inst.class().name()),
            other => other.repr(),
        }
    }

    /// `repr()` of the value.
    pub fn repr(&self) -> String {
        match self {
            Value::None => "None".to_string(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Str(s) => repr_str(s),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.repr()).collect();
                format!("[{}]", parts.join(", "))
            }
            Value::Map(m) => {
                let parts: Vec<String> = m
                    .iter()
                    .map(|(k, v)| format!("{}: {}", repr_str(k), v.repr()))
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
            Value::Class(c) => format!("<class '{}.{}'>", c.module_name(), c.name()),
            Value::Instance(inst) => format!(
                "<{}.{} instance>",
                inst.class().module_name(),
                inst.class().name()
            ),
            Value::Module(m) => format!("<module '{}'>", m.name()),
            Value::Method(m) => format!("<bound method {}>", m.name()),
            Value::Builtin(b) => format!("<built-in function {}>", b.name()),
        }
    }

    /// Convert to JSON when the value is plain data.
    pub fn to_json(&self) -> Option<serde_json::Value> {
        Some(match self {
            Value::None => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Value::from(*f),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => serde_json::Value::Array(
                items.iter().map(|v| v.to_json()).collect::<Option<Vec<_>>>()?,
            ),
            Value::Map(m) => {
                let mut map = serde_json::Map::new();
                for (k, v) in m {
                    map.insert(k.clone(), v.to_json()?);
                }
                serde_json::Value::Object(map)
            }
            _ => return None,
        })
    }

    /// Append a stable description of this value for cache fingerprints.
    ///
    /// Reference values are described by identity.
    pub(crate) fn write_fingerprint(&self, out: &mut String) {
        match self {
            Value::Class(c) => out.push_str(&format!("class#{}", c.uid())),
            Value::Instance(i) => out.push_str(&format!("instance#{}", i.uid())),
            Value::Module(m) => out.push_str(&format!("module:{}", m.name())),
            Value::Method(m) => out.push_str(&format!("method:{}", m.name())),
            Value::List(items) => {
                out.push('[');
                for item in items {
                    item.write_fingerprint(out);
                    out.push(',');
                }
                out.push(']');
            }
            Value::Map(m) => {
                out.push('{');
                for (k, v) in m {
                    out.push_str(&repr_str(k));
                    out.push(':');
                    v.write_fingerprint(out);
                    out.push(',');
                }
                out.push('}');
            }
            other => out.push_str(&other.repr()),
        }
    }
}

/// Format a float the way Python's `repr` does for common values.
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        let text = if f > 0.0 { "inf" } else { "-inf" };
        text.to_string()
    } else if f.abs() >= 1e16 || (f != 0.0 && f.abs() < 1e-4) {
        let s = format!("{:e}", f);
        match s.split_once('e') {
            Some((mantissa, exp)) if !exp.starts_with('-') => format!("{}e+{}", mantissa, exp),
            _ => s,
        }
    } else if f.fract() == 0.0 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}

/// Quote a string the way Python's `repr` does.
pub fn repr_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Class(a), Value::Class(b)) => Arc::ptr_eq(a, b),
            (Value::Instance(a), Value::Instance(b)) => Arc::ptr_eq(a, b),
            (Value::Module(a), Value::Module(b)) => Arc::ptr_eq(a, b),
            (Value::Method(a), Value::Method(b)) => Arc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a.name() == b.name(),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl From<Namespace> for Value {
    fn from(m: Namespace) -> Self {
        Value::Map(m)
    }
}

impl From<ClassRef> for Value {
    fn from(c: ClassRef) -> Self {
        Value::Class(c)
    }
}

impl From<InstanceRef> for Value {
    fn from(i: InstanceRef) -> Self {
        Value::Instance(i)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::None,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

/// Build a [`Namespace`] from a JSON object; anything else yields an empty
/// namespace.
pub fn namespace_from_json(json: serde_json::Value) -> Namespace {
    match Value::from(json) {
        Value::Map(m) => m,
        _ => Namespace::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truthiness() {
        assert!(!Value::None.is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(Value::Int(3).is_truthy());
        assert!(!Value::Str(String::new()).is_truthy());
        assert!(Value::Str("false".to_string()).is_truthy());
        assert!(!Value::List(vec![]).is_truthy());
        assert!(Value::List(vec![Value::None]).is_truthy());
        assert!(!Value::Map(Namespace::new()).is_truthy());
    }

    #[test]
    fn test_repr_matches_python() {
        assert_eq!(Value::from(vec![1, 2, 3]).repr(), "[1, 2, 3]");
        assert_eq!(Value::from("it's").repr(), "\"it's\"");
        assert_eq!(Value::from("a\nb").repr(), "'a\\nb'");
        assert_eq!(Value::Bool(true).repr(), "True");
        assert_eq!(Value::Float(990.0).repr(), "990.0");
        assert_eq!(Value::Float(0.5).repr(), "0.5");
        assert_eq!(Value::Float(1e20).repr(), "1e+20");
    }

    #[test]
    fn test_display_string() {
        assert_eq!(Value::Int(1234).to_display_string(), "1234");
        assert_eq!(Value::from("text").to_display_string(), "text");
        assert_eq!(Value::None.to_display_string(), "None");
    }

    #[test]
    fn test_from_json() {
        let value = Value::from(json!({"foo": 1234, "items": ["a", 1.5, null]}));
        let map = value.as_map().unwrap();
        assert_eq!(map.get("foo"), Some(&Value::Int(1234)));
        assert_eq!(
            map.get("items"),
            Some(&Value::List(vec![
                Value::from("a"),
                Value::Float(1.5),
                Value::None
            ]))
        );
    }

    #[test]
    fn test_to_json_roundtrip_for_data() {
        let json = json!({"a": [1, true, "x"], "b": {"c": null}});
        assert_eq!(Value::from(json.clone()).to_json(), Some(json));
    }

    #[test]
    fn test_numeric_equality_across_types() {
        assert_eq!(Value::Int(2), Value::Float(2.0));
        assert_ne!(Value::Int(2), Value::from("2"));
    }

    #[test]
    fn test_fingerprint_is_stable_for_data() {
        let mut a = String::new();
        let mut b = String::new();
        Value::from(json!({"x": [1, 2]})).write_fingerprint(&mut a);
        Value::from(json!({"x": [1, 2]})).write_fingerprint(&mut b);
        assert_eq!(a, b);
    }
}
