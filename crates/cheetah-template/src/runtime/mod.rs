/*
 * mod.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Interpreter for loaded unit code.
//!
//! Generated methods run as tree-walking evaluation of the unit IR. Each
//! call gets a [`Frame`] holding its locals, the module scope of the class
//! that defined the method, and the receiver (`self` or `cls`).
//!
//! Placeholder lookup walks, in order: locals, keyword arguments, the
//! instance's `#set global` variables, the receiver (dict data, then class
//! members along the resolution order), the search list, module globals
//! and builtins. Bare names skip the receiver and search list.

mod ops;

use crate::class::{BoundMethod, CallArgs, ClassRef, Member, MethodBody, NativeCall};
use crate::error::{RenderError, RenderErrorKind};
use crate::expr::{Accessor, Arg, Expr, Literal, UnaryOp};
use crate::instance::{InitArgs, InstanceRef, TemplateInstance};
use crate::ir::{FunctionDef, Import, MethodKind, Stmt, StmtKind};
use crate::registry::ModuleRegistry;
use crate::value::{Namespace, Value};
use std::cell::Cell;
use std::sync::Arc;

/// Deepest nesting of template method calls.
const MAX_CALL_DEPTH: usize = 50;

thread_local! {
    static CALL_DEPTH: Cell<usize> = const { Cell::new(0) };
}

struct DepthGuard;

impl DepthGuard {
    fn enter() -> Result<Self, RenderError> {
        CALL_DEPTH.with(|depth| {
            if depth.get() >= MAX_CALL_DEPTH {
                return Err(RenderError::new(
                    RenderErrorKind::RecursionError,
                    "maximum template call depth exceeded",
                ));
            }
            depth.set(depth.get() + 1);
            Ok(DepthGuard)
        })
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        CALL_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// How a block finished.
enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

struct Frame<'a> {
    /// Module scope.
    globals: &'a Namespace,
    /// Class whose code is running; also visible by name.
    owner: Option<&'a ClassRef>,
    receiver: Option<&'a Value>,
    locals: Namespace,
    kwargs_name: Option<&'a str>,
    autocall: bool,
    out: String,
}

impl<'a> Frame<'a> {
    fn module_scope(globals: &'a Namespace) -> Self {
        Frame {
            globals,
            owner: None,
            receiver: None,
            locals: Namespace::new(),
            kwargs_name: None,
            autocall: true,
            out: String::new(),
        }
    }

    fn instance(&self) -> Option<&'a InstanceRef> {
        match self.receiver {
            Some(Value::Instance(inst)) => Some(inst),
            _ => None,
        }
    }

    fn registry(&self) -> Result<Arc<ModuleRegistry>, RenderError> {
        self.owner.and_then(|o| o.registry()).ok_or_else(|| {
            RenderError::new(RenderErrorKind::ImportError, "no module registry available")
        })
    }

    fn module_global(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.globals.get(name) {
            return Some(value.clone());
        }
        self.owner
            .filter(|owner| owner.name() == name)
            .map(|owner| Value::Class(owner.clone()))
    }

    fn lookup_name(&self, name: &str) -> Result<Value, RenderError> {
        self.locals
            .get(name)
            .cloned()
            .or_else(|| self.module_global(name))
            .or_else(|| crate::builtins::lookup(name))
            .ok_or_else(|| {
                RenderError::new(
                    RenderErrorKind::NameError,
                    format!("name '{}' is not defined", name),
                )
            })
    }

    fn lookup_placeholder(&self, name: &str) -> Result<Value, RenderError> {
        if let Some(value) = self.locals.get(name) {
            return Ok(value.clone());
        }
        let kwargs = self
            .kwargs_name
            .and_then(|k| self.locals.get(k))
            .and_then(Value::as_map);
        if let Some(value) = kwargs.and_then(|m| m.get(name)) {
            return Ok(value.clone());
        }
        let found = match self.receiver {
            Some(Value::Instance(inst)) => search_instance(inst, name),
            Some(Value::Class(cls)) => class_attribute(cls, name),
            _ => None,
        };
        found
            .or_else(|| self.module_global(name))
            .or_else(|| crate::builtins::lookup(name))
            .ok_or_else(|| RenderError::not_found(name))
    }
}

/// Instance-side placeholder lookup: `#set global` variables, the instance
/// itself, then its search list.
pub(crate) fn search_instance(inst: &InstanceRef, name: &str) -> Option<Value> {
    if let Some(value) = inst.global_var(name) {
        return Some(value);
    }
    if let Some(value) = instance_attribute(inst, name) {
        return Some(value);
    }
    inst.search_list().iter().find_map(|ns| match ns {
        Value::Map(m) => m.get(name).cloned(),
        Value::Instance(other) => instance_attribute(other, name),
        Value::Class(cls) => class_attribute(cls, name),
        Value::Module(m) => m.get(name).cloned(),
        _ => None,
    })
}

fn bind(owner: ClassRef, receiver: Option<Value>, method: crate::class::Method) -> Value {
    Value::Method(Arc::new(BoundMethod {
        receiver,
        owner: Some(owner),
        method,
    }))
}

/// `instance.name`: dict data, then class members.
pub(crate) fn instance_attribute(inst: &InstanceRef, name: &str) -> Option<Value> {
    if let Some(value) = inst.data().and_then(|d| d.get(name)) {
        return Some(value.clone());
    }
    let (owner, member) = inst.class().lookup(name)?;
    Some(match member {
        Member::Attribute(value) => value,
        Member::Method(method) => {
            let receiver = match method.kind {
                MethodKind::Instance => Some(Value::Instance(inst.clone())),
                MethodKind::Class => Some(Value::Class(inst.class().clone())),
                MethodKind::Static => None,
            };
            bind(owner, receiver, method)
        }
    })
}

/// `Class.name`. Instance methods come back unbound.
pub(crate) fn class_attribute(cls: &ClassRef, name: &str) -> Option<Value> {
    let (owner, member) = cls.lookup(name)?;
    Some(match member {
        Member::Attribute(value) => value,
        Member::Method(method) => {
            let receiver = match method.kind {
                MethodKind::Class => Some(Value::Class(cls.clone())),
                MethodKind::Instance | MethodKind::Static => None,
            };
            bind(owner, receiver, method)
        }
    })
}

fn get_attr(value: &Value, name: &str) -> Result<Value, RenderError> {
    let found = match value {
        Value::Instance(inst) => instance_attribute(inst, name),
        Value::Class(cls) => class_attribute(cls, name),
        Value::Module(module) => module.get(name).cloned(),
        Value::Map(m) => m.get(name).cloned().or_else(|| ops::value_method(value, name)),
        Value::Str(_) => ops::value_method(value, name),
        _ => None,
    };
    found.ok_or_else(|| match value {
        Value::Map(_) | Value::Instance(_) => RenderError::not_found(name),
        other => RenderError::new(
            RenderErrorKind::AttributeError,
            format!("'{}' object has no attribute '{}'", other.type_name(), name),
        ),
    })
}

/// Call anything callable.
pub(crate) fn call_value(target: &Value, args: CallArgs) -> Result<Value, RenderError> {
    match target {
        Value::Method(bound) => call_bound(bound, args),
        Value::Builtin(f) => f.call(args),
        Value::Class(cls) => call_class(cls, args),
        other => Err(RenderError::type_error(format!(
            "'{}' object is not callable",
            other.type_name()
        ))),
    }
}

fn call_bound(bound: &BoundMethod, mut args: CallArgs) -> Result<Value, RenderError> {
    let _depth = DepthGuard::enter()?;
    let method = &bound.method;
    // Unbound instance methods take the instance as the first argument.
    let receiver = match (&bound.receiver, method.kind) {
        (None, MethodKind::Instance) => {
            if args.positional.is_empty() {
                return Err(RenderError::type_error(format!(
                    "{}() missing 1 required positional argument: 'self'",
                    method.name()
                )));
            }
            Some(args.positional.remove(0))
        }
        (receiver, _) => receiver.clone(),
    };
    match &method.body {
        MethodBody::Native(f) => f(NativeCall {
            receiver: receiver.as_ref(),
            args,
        }),
        MethodBody::Generated(def) => {
            let Some(owner) = &bound.owner else {
                return Err(RenderError::type_error(format!(
                    "method '{}' has no defining class",
                    method.name()
                )));
            };
            run_function(owner, def, receiver.as_ref(), args)
        }
    }
}

fn call_class(cls: &ClassRef, args: CallArgs) -> Result<Value, RenderError> {
    // `dict(...)` builds a plain mapping.
    if cls.uid() == crate::builtins::dict_class().uid() {
        let mut map = Namespace::new();
        for arg in &args.positional {
            match arg {
                Value::Map(m) => map.extend(m.clone()),
                other => {
                    return Err(RenderError::type_error(format!(
                        "cannot convert '{}' to a dict",
                        other.type_name()
                    )));
                }
            }
        }
        map.extend(args.keywords);
        return Ok(Value::Map(map));
    }
    let mut init = InitArgs::from_mapping(&args.keywords)
        .map_err(|e| RenderError::type_error(e.to_string()))?;
    for arg in args.positional {
        match arg {
            Value::Map(m) if cls.is_dict_based() && init.data.is_none() => init.data = Some(m),
            Value::List(items) => init.namespaces.extend(items),
            other => init.namespaces.push(other),
        }
    }
    instantiate(cls, init).map(Value::Instance)
}

pub(crate) fn instantiate(cls: &ClassRef, args: InitArgs) -> Result<InstanceRef, RenderError> {
    TemplateInstance::new(cls.clone(), args)
}

/// `str(value)`.
pub(crate) fn display(value: &Value) -> Result<String, RenderError> {
    match value {
        Value::Instance(inst) => render_instance(inst),
        other => Ok(other.to_display_string()),
    }
}

/// Render an instance through the render method of its class.
pub(crate) fn render_instance(inst: &InstanceRef) -> Result<String, RenderError> {
    let Some(name) = inst.class().str_method.as_deref() else {
        return Err(RenderError::type_error(format!(
            "'{}' has no main method to render",
            inst.class().name()
        )));
    };
    let target = instance_attribute(inst, name).ok_or_else(|| {
        RenderError::new(
            RenderErrorKind::AttributeError,
            format!("'{}' object has no attribute '{}'", inst.class().name(), name),
        )
    })?;
    let result = call_value(&target, CallArgs::new())?;
    display(&result)
}

/// Bind the names an import statement introduces into `scope`.
pub(crate) fn bind_import(
    registry: &ModuleRegistry,
    import: &Import,
    scope: &mut Namespace,
) -> Result<(), RenderError> {
    match import {
        Import::Module { path, alias: None } => {
            let root = path.split('.').next().unwrap_or(path);
            scope.insert(root.to_string(), registry.import_module(path)?);
        }
        Import::Module {
            path,
            alias: Some(alias),
        } => {
            scope.insert(alias.clone(), registry.import_module_as(path)?);
        }
        Import::From { module, names } => {
            for (name, alias) in names {
                let value = registry.import_from(module, name)?;
                scope.insert(alias.as_ref().unwrap_or(name).clone(), value);
            }
        }
    }
    Ok(())
}

/// Evaluate an expression at module scope (class attributes).
pub(crate) fn eval_module_expr(expr: &Expr, globals: &Namespace) -> Result<Value, RenderError> {
    Frame::module_scope(globals).eval(expr)
}

fn run_function(
    owner: &ClassRef,
    def: &FunctionDef,
    receiver: Option<&Value>,
    args: CallArgs,
) -> Result<Value, RenderError> {
    let mut frame = Frame {
        globals: &owner.globals,
        owner: Some(owner),
        receiver,
        locals: Namespace::new(),
        kwargs_name: def.kwargs.as_deref(),
        autocall: owner.autocall,
        out: String::new(),
    };
    let receiver_name = match def.kind {
        MethodKind::Instance => Some("self"),
        MethodKind::Class => Some("cls"),
        MethodKind::Static => None,
    };
    if let (Some(name), Some(value)) = (receiver_name, receiver) {
        frame.locals.insert(name.to_string(), value.clone());
    }
    let result = frame
        .bind_arguments(def, args)
        .map_err(|e| e.at_line(def.line))
        .and_then(|()| frame.exec_block(&def.body));
    match result {
        Ok(Flow::Return(value)) => Ok(value),
        Ok(_) => Ok(Value::Str(frame.out)),
        Err(mut err) => {
            err.push_frame(
                owner.module_name(),
                owner.name(),
                &def.name,
                owner.traceback_source().as_deref(),
            );
            Err(err)
        }
    }
}

impl Frame<'_> {
    fn bind_arguments(&mut self, def: &FunctionDef, args: CallArgs) -> Result<(), RenderError> {
        let CallArgs {
            positional,
            mut keywords,
        } = args;
        if positional.len() > def.params.len() {
            return Err(RenderError::type_error(format!(
                "{}() takes {} positional arguments but {} were given",
                def.name,
                def.params.len(),
                positional.len()
            )));
        }
        let mut positional = positional.into_iter();
        for param in &def.params {
            let value = match positional.next() {
                Some(value) => {
                    if keywords.contains_key(&param.name) {
                        return Err(RenderError::type_error(format!(
                            "{}() got multiple values for argument '{}'",
                            def.name, param.name
                        )));
                    }
                    value
                }
                None => match keywords.shift_remove(&param.name) {
                    Some(value) => value,
                    None => match &param.default {
                        Some(default) => self.eval(default)?,
                        None => {
                            return Err(RenderError::type_error(format!(
                                "{}() missing required argument: '{}'",
                                def.name, param.name
                            )));
                        }
                    },
                },
            };
            self.locals.insert(param.name.clone(), value);
        }
        match &def.kwargs {
            Some(kwargs) => {
                self.locals.insert(kwargs.clone(), Value::Map(keywords));
            }
            None => {
                if let Some(name) = keywords.keys().next() {
                    return Err(RenderError::type_error(format!(
                        "{}() got an unexpected keyword argument '{}'",
                        def.name, name
                    )));
                }
            }
        }
        Ok(())
    }

    fn exec_block(&mut self, body: &[Stmt]) -> Result<Flow, RenderError> {
        for stmt in body {
            match self.exec(stmt).map_err(|e| e.at_line(stmt.line))? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt) -> Result<Flow, RenderError> {
        match &stmt.kind {
            StmtKind::Write(text) => self.out.push_str(text),
            StmtKind::Emit(expr) => {
                let value = self.eval(expr)?;
                if !matches!(value, Value::None) {
                    let text = display(&value)?;
                    self.out.push_str(&text);
                }
            }
            StmtKind::Set {
                name,
                value,
                global,
            } => {
                let value = self.eval(value)?;
                match self.instance() {
                    Some(inst) if *global => inst.set_global_var(name, value),
                    _ => {
                        self.locals.insert(name.clone(), value);
                    }
                }
            }
            StmtKind::If {
                branches,
                otherwise,
            } => {
                for (condition, body) in branches {
                    if self.eval(condition)?.is_truthy() {
                        return self.exec_block(body);
                    }
                }
                if let Some(body) = otherwise {
                    return self.exec_block(body);
                }
            }
            StmtKind::For {
                targets,
                iter,
                body,
            } => {
                let items = ops::iterate(&self.eval(iter)?)?;
                for item in items {
                    self.assign_targets(targets, item)?;
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Normal | Flow::Continue => {}
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
            }
            StmtKind::Try {
                body,
                handlers,
                finally,
            } => return self.exec_try(body, handlers, finally.as_deref()),
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Import(import) => {
                let registry = self.registry()?;
                bind_import(&registry, import, &mut self.locals)?;
            }
            StmtKind::Eval(expr) => {
                self.eval(expr)?;
            }
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Pass => {}
        }
        Ok(Flow::Normal)
    }

    fn assign_targets(&mut self, targets: &[String], item: Value) -> Result<(), RenderError> {
        if let [target] = targets {
            self.locals.insert(target.clone(), item);
            return Ok(());
        }
        let items = match item {
            Value::List(items) if items.len() == targets.len() => items,
            other => {
                return Err(RenderError::new(
                    RenderErrorKind::ValueError,
                    format!("cannot unpack {} into {} names", other.repr(), targets.len()),
                ));
            }
        };
        for (target, value) in targets.iter().zip(items) {
            self.locals.insert(target.clone(), value);
        }
        Ok(())
    }

    fn exec_try(
        &mut self,
        body: &[Stmt],
        handlers: &[crate::ir::ExceptHandler],
        finally: Option<&[Stmt]>,
    ) -> Result<Flow, RenderError> {
        let mut result = self.exec_block(body);
        if let Err(err) = &result {
            let handler = handlers
                .iter()
                .find(|h| h.name.as_deref().is_none_or(|name| err.matches(name)));
            if let Some(handler) = handler {
                if let Some(binding) = &handler.binding {
                    self.locals
                        .insert(binding.clone(), Value::Str(err.message.clone()));
                }
                tracing::trace!(error = %err, "exception handled by template");
                result = self.exec_block(&handler.body);
            }
        }
        if let Some(finally) = finally {
            match self.exec_block(finally)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        result
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value, RenderError> {
        match expr {
            Expr::Literal(literal) => Ok(match literal {
                Literal::None => Value::None,
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Int(i) => Value::Int(*i),
                Literal::Float(f) => Value::Float(*f),
                Literal::Str(s) => Value::Str(s.clone()),
            }),
            Expr::List(items) => Ok(Value::List(
                items
                    .iter()
                    .map(|item| self.eval(item))
                    .collect::<Result<_, _>>()?,
            )),
            Expr::Dict(entries) => {
                let mut map = Namespace::new();
                for (key, value) in entries {
                    let key = ops::map_key(&self.eval(key)?)?;
                    let value = self.eval(value)?;
                    map.insert(key, value);
                }
                Ok(Value::Map(map))
            }
            Expr::Name(name) => self.lookup_name(name),
            Expr::Placeholder(placeholder) => {
                let mut value = self.lookup_placeholder(&placeholder.name)?;
                let chain = &placeholder.chain;
                for (i, accessor) in chain.iter().enumerate() {
                    value = self.autocall(value, chain.get(i))?;
                    value = match accessor {
                        Accessor::Attr(name) => get_attr(&value, name)?,
                        Accessor::Index(index) => ops::index(&value, &self.eval(index)?)?,
                        Accessor::Call(args) => {
                            let args = self.eval_args(args)?;
                            call_value(&value, args)?
                        }
                    };
                }
                self.autocall(value, None)
            }
            Expr::Attr(base, name) => get_attr(&self.eval(base)?, name),
            Expr::Index(base, index) => {
                let base = self.eval(base)?;
                ops::index(&base, &self.eval(index)?)
            }
            Expr::Call(callee, args) => {
                let callee = self.eval(callee)?;
                let args = self.eval_args(args)?;
                call_value(&callee, args)
            }
            Expr::Unary(op, operand) => {
                let operand = self.eval(operand)?;
                match op {
                    UnaryOp::Neg => ops::negate(&operand),
                    UnaryOp::Pos => ops::positive(&operand),
                }
            }
            Expr::Binary(op, left, right) => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                ops::binary(*op, &left, &right)
            }
            Expr::Compare(op, left, right) => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                ops::compare(*op, &left, &right).map(Value::Bool)
            }
            Expr::And(left, right) => {
                let left = self.eval(left)?;
                if left.is_truthy() { self.eval(right) } else { Ok(left) }
            }
            Expr::Or(left, right) => {
                let left = self.eval(left)?;
                if left.is_truthy() { Ok(left) } else { self.eval(right) }
            }
            Expr::Not(operand) => Ok(Value::Bool(!self.eval(operand)?.is_truthy())),
            Expr::Conditional {
                condition,
                then,
                otherwise,
            } => {
                if self.eval(condition)?.is_truthy() {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
        }
    }

    /// Call a method value unless the next accessor calls it explicitly.
    fn autocall(&self, value: Value, next: Option<&Accessor>) -> Result<Value, RenderError> {
        if !self.autocall || matches!(next, Some(Accessor::Call(_))) {
            return Ok(value);
        }
        match &value {
            Value::Method(bound) => call_bound(bound, CallArgs::new()),
            _ => Ok(value),
        }
    }

    fn eval_args(&mut self, args: &[Arg]) -> Result<CallArgs, RenderError> {
        let mut call = CallArgs::new();
        for arg in args {
            let value = self.eval(&arg.value)?;
            match &arg.name {
                Some(name) => {
                    call.keywords.insert(name.clone(), value);
                }
                None => call.positional.push(value),
            }
        }
        Ok(call)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parse_expression;

    fn eval(text: &str, globals: &Namespace) -> Result<Value, RenderError> {
        eval_module_expr(&parse_expression(text, "$").unwrap(), globals)
    }

    fn globals(pairs: &[(&str, Value)]) -> Namespace {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_module_scope_expressions() {
        let g = globals(&[("a", Value::Int(99))]);
        assert_eq!(eval("$a * 10", &g).unwrap(), Value::Int(990));
        assert_eq!(eval("a + 1", &g).unwrap(), Value::Int(100));
        assert_eq!(eval("'x' if a > 5 else 'y'", &g).unwrap(), Value::from("x"));
        assert_eq!(eval("len([1, 2, 3])", &g).unwrap(), Value::Int(3));
        assert_eq!(eval("0 or 'z'", &g).unwrap(), Value::from("z"));
    }

    #[test]
    fn test_lookup_failures() {
        let g = Namespace::new();
        assert!(eval("$missing", &g).unwrap_err().matches("NotFound"));
        assert!(eval("missing", &g).unwrap_err().matches("NameError"));
    }

    #[test]
    fn test_placeholder_chains_autocall_methods() {
        let g = globals(&[
            ("name", Value::from("cheetah")),
            ("data", Value::from(serde_json::json!({"items": ["a", "b"]}))),
        ]);
        assert_eq!(eval("$name.upper", &g).unwrap(), Value::from("CHEETAH"));
        assert_eq!(eval("$name.upper()", &g).unwrap(), Value::from("CHEETAH"));
        assert_eq!(eval("$data.items[1]", &g).unwrap(), Value::from("b"));
        assert_eq!(eval("', '.join($data['items'])", &g).unwrap(), Value::from("a, b"));
    }

    #[test]
    fn test_dict_call_builds_mapping() {
        let value = eval("dict(a=1)", &Namespace::new()).unwrap();
        assert_eq!(value.as_map().and_then(|m| m.get("a")), Some(&Value::Int(1)));
    }

    #[test]
    fn test_search_list_order() {
        let class = crate::builtins::template_class();
        let first = Value::Map(globals(&[("x", Value::Int(1))]));
        let second = Value::Map(globals(&[("x", Value::Int(2)), ("y", Value::Int(3))]));
        let inst = instantiate(&class, InitArgs::new().namespace(first).namespace(second)).unwrap();
        assert_eq!(search_instance(&inst, "x"), Some(Value::Int(1)));
        assert_eq!(search_instance(&inst, "y"), Some(Value::Int(3)));
        inst.set_global_var("x", Value::Int(7));
        assert_eq!(search_instance(&inst, "x"), Some(Value::Int(7)));
    }

    #[test]
    fn test_render_without_main_method() {
        let inst = instantiate(&crate::builtins::template_class(), InitArgs::new()).unwrap();
        assert!(render_instance(&inst).unwrap_err().matches("TypeError"));
    }
}
