/*
 * builtins.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Built-in classes, functions and modules.
//!
//! The classes `object`, `Template` and `dict` are process-wide singletons,
//! so every factory and registry agrees on their identity (a unit compiled
//! against `Template` in one factory is a `Template` subclass everywhere).

use crate::class::{BuiltinKind, CallArgs, ClassKind, ClassParts, ClassRef, Member, Method, MethodBody, NativeCall};
use crate::error::{RenderError, RenderErrorKind};
use crate::ir::MethodKind;
use crate::registry::ModuleNamespace;
use crate::value::{Namespace, Value};
use once_cell::sync::Lazy;
use std::fmt;
use std::sync::Arc;

type BuiltinFn = fn(CallArgs) -> Result<Value, RenderError>;

/// A built-in function such as `len` or `range`.
#[derive(Clone)]
pub struct BuiltinFunction {
    name: &'static str,
    func: BuiltinFn,
}

impl BuiltinFunction {
    pub fn name(&self) -> &str {
        self.name
    }

    pub(crate) fn call(&self, args: CallArgs) -> Result<Value, RenderError> {
        (self.func)(args)
    }
}

impl fmt::Debug for BuiltinFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<built-in function {}>", self.name)
    }
}

const FUNCTIONS: &[BuiltinFunction] = &[
    BuiltinFunction { name: "len", func: builtin_len },
    BuiltinFunction { name: "str", func: builtin_str },
    BuiltinFunction { name: "repr", func: builtin_repr },
    BuiltinFunction { name: "int", func: builtin_int },
    BuiltinFunction { name: "float", func: builtin_float },
    BuiltinFunction { name: "bool", func: builtin_bool },
    BuiltinFunction { name: "range", func: builtin_range },
];

struct BuiltinClasses {
    object: ClassRef,
    template: ClassRef,
    dict: ClassRef,
}

static CLASSES: Lazy<BuiltinClasses> = Lazy::new(|| {
    let object = ClassParts::new("object", "builtins", ClassKind::Builtin(BuiltinKind::Object))
        .assemble();

    let mut template = ClassParts::new(
        "Template",
        "Cheetah.Template",
        ClassKind::Builtin(BuiltinKind::Template),
    );
    template.bases.push(object.clone());
    native_method(&mut template.members, "getVar", template_get_var);
    native_method(&mut template.members, "hasVar", template_has_var);

    let mut dict = ClassParts::new("dict", "builtins", ClassKind::Builtin(BuiltinKind::Dict));
    dict.bases.push(object.clone());
    native_method(&mut dict.members, "get", dict_get);
    native_method(&mut dict.members, "keys", dict_keys);
    native_method(&mut dict.members, "values", dict_values);
    native_method(&mut dict.members, "items", dict_items);

    BuiltinClasses {
        object,
        template: template.assemble(),
        dict: dict.assemble(),
    }
});

fn native_method(
    members: &mut indexmap::IndexMap<String, Member>,
    name: &str,
    f: fn(NativeCall<'_>) -> Result<Value, RenderError>,
) {
    members.insert(
        name.to_string(),
        Member::Method(Method {
            name: name.to_string(),
            kind: MethodKind::Instance,
            body: MethodBody::Native(Arc::new(f)),
        }),
    );
}

/// The library's base template class.
pub fn template_class() -> ClassRef {
    CLASSES.template.clone()
}

/// The built-in mapping class; subclasses take dict data.
pub fn dict_class() -> ClassRef {
    CLASSES.dict.clone()
}

pub fn object_class() -> ClassRef {
    CLASSES.object.clone()
}

/// Look up a built-in name.
pub(crate) fn lookup(name: &str) -> Option<Value> {
    match name {
        "object" => return Some(Value::Class(object_class())),
        "Template" => return Some(Value::Class(template_class())),
        "dict" => return Some(Value::Class(dict_class())),
        "True" => return Some(Value::Bool(true)),
        "False" => return Some(Value::Bool(false)),
        "None" => return Some(Value::None),
        _ => {}
    }
    FUNCTIONS
        .iter()
        .find(|f| f.name == name)
        .map(|f| Value::Builtin(f.clone()))
}

/// Modules every registry starts with.
pub(crate) fn builtin_modules() -> Vec<ModuleNamespace> {
    let mut sys = Namespace::new();
    sys.insert(
        "version".to_string(),
        Value::from(format!("cheetah-template {}", env!("CARGO_PKG_VERSION"))),
    );
    sys.insert("platform".to_string(), Value::from(std::env::consts::OS));
    vec![
        ModuleNamespace::new("sys", sys),
        ModuleNamespace::for_class("Cheetah.Template", &template_class()),
    ]
}

fn exactly_one(name: &str, args: CallArgs) -> Result<Value, RenderError> {
    let CallArgs { mut positional, keywords } = args;
    if positional.len() != 1 || !keywords.is_empty() {
        return Err(RenderError::type_error(format!(
            "{}() takes exactly one argument ({} given)",
            name,
            positional.len() + keywords.len()
        )));
    }
    Ok(positional.remove(0))
}

fn value_error(message: String) -> RenderError {
    RenderError::new(RenderErrorKind::ValueError, message)
}

fn builtin_len(args: CallArgs) -> Result<Value, RenderError> {
    let n = match exactly_one("len", args)? {
        Value::Str(s) => s.chars().count(),
        Value::List(items) => items.len(),
        Value::Map(m) => m.len(),
        Value::Instance(inst) if inst.data().is_some() => inst.data().map_or(0, |d| d.len()),
        other => {
            return Err(RenderError::type_error(format!(
                "object of type '{}' has no len()",
                other.type_name()
            )));
        }
    };
    Ok(Value::Int(n as i64))
}

fn builtin_str(args: CallArgs) -> Result<Value, RenderError> {
    if args.positional.is_empty() && args.keywords.is_empty() {
        return Ok(Value::from(""));
    }
    let value = exactly_one("str", args)?;
    crate::runtime::display(&value).map(Value::Str)
}

fn builtin_repr(args: CallArgs) -> Result<Value, RenderError> {
    Ok(Value::Str(exactly_one("repr", args)?.repr()))
}

fn builtin_int(args: CallArgs) -> Result<Value, RenderError> {
    match exactly_one("int", args)? {
        Value::Int(i) => Ok(Value::Int(i)),
        Value::Bool(b) => Ok(Value::Int(i64::from(b))),
        Value::Float(f) if f.is_finite() => Ok(Value::Int(f.trunc() as i64)),
        Value::Float(f) => Err(RenderError::new(
            RenderErrorKind::OverflowError,
            format!("cannot convert float {} to integer", crate::value::format_float(f)),
        )),
        Value::Str(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| value_error(format!("invalid literal for int() with base 10: {}", crate::value::repr_str(&s)))),
        other => Err(RenderError::type_error(format!(
            "int() argument must be a string or a number, not '{}'",
            other.type_name()
        ))),
    }
}

fn builtin_float(args: CallArgs) -> Result<Value, RenderError> {
    match exactly_one("float", args)? {
        Value::Int(i) => Ok(Value::Float(i as f64)),
        Value::Bool(b) => Ok(Value::Float(if b { 1.0 } else { 0.0 })),
        Value::Float(f) => Ok(Value::Float(f)),
        Value::Str(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| value_error(format!("could not convert string to float: {}", crate::value::repr_str(&s)))),
        other => Err(RenderError::type_error(format!(
            "float() argument must be a string or a number, not '{}'",
            other.type_name()
        ))),
    }
}

fn builtin_bool(args: CallArgs) -> Result<Value, RenderError> {
    if args.positional.is_empty() && args.keywords.is_empty() {
        return Ok(Value::Bool(false));
    }
    Ok(Value::Bool(exactly_one("bool", args)?.is_truthy()))
}

fn builtin_range(args: CallArgs) -> Result<Value, RenderError> {
    let ints = args
        .positional
        .iter()
        .map(|v| match v {
            Value::Int(i) => Ok(*i),
            Value::Bool(b) => Ok(i64::from(*b)),
            other => Err(RenderError::type_error(format!(
                "'{}' object cannot be interpreted as an integer",
                other.type_name()
            ))),
        })
        .collect::<Result<Vec<i64>, _>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => {
            return Err(RenderError::type_error(format!(
                "range expected 1 to 3 arguments, got {}",
                ints.len()
            )));
        }
    };
    if step == 0 {
        return Err(value_error("range() arg 3 must not be zero".to_string()));
    }
    let mut items = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        items.push(Value::Int(i));
        match i.checked_add(step) {
            Some(next) => i = next,
            None => break,
        }
    }
    Ok(Value::List(items))
}

fn receiver_instance<'a>(
    call: &'a NativeCall<'_>,
    method: &str,
) -> Result<&'a crate::instance::InstanceRef, RenderError> {
    match call.receiver {
        Some(Value::Instance(inst)) => Ok(inst),
        _ => Err(RenderError::type_error(format!(
            "{}() must be called on an instance",
            method
        ))),
    }
}

fn var_name(call: &NativeCall<'_>, method: &str) -> Result<String, RenderError> {
    match call.args.positional.first() {
        Some(Value::Str(name)) => Ok(name.clone()),
        _ => Err(RenderError::type_error(format!(
            "{}() expects a variable name",
            method
        ))),
    }
}

fn template_get_var(call: NativeCall<'_>) -> Result<Value, RenderError> {
    let inst = receiver_instance(&call, "getVar")?;
    let name = var_name(&call, "getVar")?;
    match crate::runtime::search_instance(inst, &name) {
        Some(value) => Ok(value),
        None => match call.args.positional.get(1) {
            Some(default) => Ok(default.clone()),
            None => Err(RenderError::not_found(&name)),
        },
    }
}

fn template_has_var(call: NativeCall<'_>) -> Result<Value, RenderError> {
    let inst = receiver_instance(&call, "hasVar")?;
    let name = var_name(&call, "hasVar")?;
    Ok(Value::Bool(crate::runtime::search_instance(inst, &name).is_some()))
}

fn dict_data(call: &NativeCall<'_>, method: &str) -> Result<Namespace, RenderError> {
    Ok(receiver_instance(call, method)?
        .data()
        .cloned()
        .unwrap_or_default())
}

fn dict_get(call: NativeCall<'_>) -> Result<Value, RenderError> {
    let data = dict_data(&call, "get")?;
    let key = var_name(&call, "get")?;
    Ok(data
        .get(&key)
        .cloned()
        .or_else(|| call.args.positional.get(1).cloned())
        .unwrap_or(Value::None))
}

fn dict_keys(call: NativeCall<'_>) -> Result<Value, RenderError> {
    let data = dict_data(&call, "keys")?;
    Ok(Value::List(data.keys().map(|k| Value::from(k.as_str())).collect()))
}

fn dict_values(call: NativeCall<'_>) -> Result<Value, RenderError> {
    let data = dict_data(&call, "values")?;
    Ok(Value::List(data.values().cloned().collect()))
}

fn dict_items(call: NativeCall<'_>) -> Result<Value, RenderError> {
    let data = dict_data(&call, "items")?;
    Ok(Value::List(
        data.into_iter()
            .map(|(k, v)| Value::List(vec![Value::Str(k), v]))
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: Vec<Value>) -> Result<Value, RenderError> {
        match lookup(name) {
            Some(Value::Builtin(f)) => f.call(CallArgs {
                positional: args,
                keywords: Namespace::new(),
            }),
            other => panic!("not a builtin function: {:?}", other),
        }
    }

    #[test]
    fn test_singleton_classes() {
        assert_eq!(template_class().uid(), template_class().uid());
        assert!(template_class().is_subclass_of(&object_class()));
        assert!(dict_class().is_dict_based());
        assert_eq!(template_class().module_name(), "Cheetah.Template");
    }

    #[test]
    fn test_len_and_range() {
        assert_eq!(call("len", vec![Value::from("héllo")]).unwrap(), Value::Int(5));
        assert_eq!(
            call("range", vec![Value::Int(1), Value::Int(7), Value::Int(2)]).unwrap(),
            Value::from(vec![1, 3, 5])
        );
        assert!(call("range", vec![Value::Int(1), Value::Int(2), Value::Int(0)]).is_err());
        assert!(call("len", vec![Value::Int(3)]).unwrap_err().matches("TypeError"));
    }

    #[test]
    fn test_conversions() {
        assert_eq!(call("int", vec![Value::from(" 42 ")]).unwrap(), Value::Int(42));
        assert_eq!(call("int", vec![Value::Float(-2.7)]).unwrap(), Value::Int(-2));
        assert!(call("int", vec![Value::from("x")]).unwrap_err().matches("ValueError"));
        assert_eq!(call("float", vec![Value::Int(3)]).unwrap(), Value::Float(3.0));
        assert_eq!(call("str", vec![Value::Float(2.5)]).unwrap(), Value::from("2.5"));
        assert_eq!(call("repr", vec![Value::from("a")]).unwrap(), Value::from("'a'"));
        assert_eq!(call("bool", vec![Value::List(vec![])]).unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_builtin_modules() {
        let names: Vec<String> = builtin_modules().iter().map(|m| m.name().to_string()).collect();
        assert_eq!(names, vec!["sys", "Cheetah.Template"]);
    }
}
