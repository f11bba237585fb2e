/*
 * class.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template classes.
//!
//! A [`TemplateClass`] is the executable unit the pipeline produces: a
//! named class with an ordered member table, bases, and (for compiled
//! classes) the generated code it was loaded from. Built-in classes
//! (`Template`, `dict`, `object`) and host-defined native classes share the
//! same representation, so compiled templates can inherit from either.
//!
//! Method resolution is explicit: a class's own members come first, then
//! the primary base's resolution order, then each mixin's, in listed order.

use crate::error::{RenderError, TemplateError, TemplateResult};
use crate::factory::{CompileRequest, FactoryShared, TemplateFactory};
use crate::ir::{FunctionDef, MethodKind};
use crate::registry::ModuleRegistry;
use crate::value::{Namespace, Value};
use indexmap::IndexMap;
use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

/// Shared handle to a class.
pub type ClassRef = Arc<TemplateClass>;

/// Host function implementing a native method.
pub type NativeFn = Arc<dyn Fn(NativeCall<'_>) -> Result<Value, RenderError> + Send + Sync>;

static NEXT_UID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_uid() -> u64 {
    NEXT_UID.fetch_add(1, Ordering::Relaxed)
}

/// Arguments of a call into template code or a native method.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    pub positional: Vec<Value>,
    pub keywords: Namespace,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.keywords.insert(name.into(), value.into());
        self
    }
}

/// What a native method receives.
pub struct NativeCall<'a> {
    /// The instance (instance methods) or class (class methods) the
    /// method was called on; `None` for static methods.
    pub receiver: Option<&'a Value>,
    pub args: CallArgs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BuiltinKind {
    Object,
    Template,
    Dict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ClassKind {
    Builtin(BuiltinKind),
    Native,
    Compiled,
}

#[derive(Clone)]
pub(crate) enum MethodBody {
    Generated(Arc<FunctionDef>),
    Native(NativeFn),
}

/// A method in a class's member table.
#[derive(Clone)]
pub struct Method {
    pub(crate) name: String,
    pub(crate) kind: MethodKind,
    pub(crate) body: MethodBody,
}

impl Method {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> MethodKind {
        self.kind
    }
}

#[derive(Clone)]
pub(crate) enum Member {
    Method(Method),
    Attribute(Value),
}

/// A method bound to its receiver.
pub struct BoundMethod {
    pub(crate) receiver: Option<Value>,
    /// Class that defined the method; generated methods evaluate in its
    /// module scope.
    pub(crate) owner: Option<ClassRef>,
    pub(crate) method: Method,
}

impl BoundMethod {
    pub fn name(&self) -> &str {
        &self.method.name
    }
}

/// A compiled, built-in or native class.
pub struct TemplateClass {
    pub(crate) uid: u64,
    pub(crate) name: String,
    pub(crate) module_name: String,
    pub(crate) kind: ClassKind,
    pub(crate) bases: Vec<ClassRef>,
    /// Resolution order after the class itself.
    pub(crate) ancestors: Vec<ClassRef>,
    pub(crate) members: IndexMap<String, Member>,
    /// Main render method introduced by this class.
    pub(crate) main_method: Option<String>,
    /// Method that `render()` dispatches to.
    pub(crate) str_method: Option<String>,
    pub(crate) autocall: bool,
    /// Module scope of generated methods.
    pub(crate) globals: Namespace,
    pub(crate) generated_code: Option<Arc<str>>,
    /// Set at load time, or by the first cache hit that writes a file.
    pub(crate) origin: OnceLock<PathBuf>,
    pub(crate) in_compilation_cache: bool,
    /// Compile settings inherited by `subclass`.
    pub(crate) compiler_settings: Namespace,
    pub(crate) module_globals: Namespace,
    pub(crate) factory: Weak<FactoryShared>,
    pub(crate) registry: Weak<ModuleRegistry>,
}

/// Everything needed to assemble a class; the resolution order and
/// render method are derived.
pub(crate) struct ClassParts {
    pub name: String,
    pub module_name: String,
    pub kind: ClassKind,
    pub bases: Vec<ClassRef>,
    pub members: IndexMap<String, Member>,
    pub main_method: Option<String>,
    pub autocall: bool,
    pub globals: Namespace,
    pub generated_code: Option<Arc<str>>,
    pub origin: Option<PathBuf>,
    pub in_compilation_cache: bool,
    pub compiler_settings: Namespace,
    pub module_globals: Namespace,
    pub factory: Weak<FactoryShared>,
    pub registry: Weak<ModuleRegistry>,
}

impl ClassParts {
    pub fn new(name: impl Into<String>, module_name: impl Into<String>, kind: ClassKind) -> Self {
        Self {
            name: name.into(),
            module_name: module_name.into(),
            kind,
            bases: Vec::new(),
            members: IndexMap::new(),
            main_method: None,
            autocall: true,
            globals: Namespace::new(),
            generated_code: None,
            origin: None,
            in_compilation_cache: false,
            compiler_settings: Namespace::new(),
            module_globals: Namespace::new(),
            factory: Weak::new(),
            registry: Weak::new(),
        }
    }

    pub fn assemble(self) -> ClassRef {
        let mut seen = HashSet::new();
        let mut ancestors = Vec::new();
        for base in &self.bases {
            for class in std::iter::once(base).chain(base.ancestors.iter()) {
                if seen.insert(class.uid) {
                    ancestors.push(class.clone());
                }
            }
        }
        let str_method = ancestors
            .iter()
            .find_map(|a| a.str_method.clone())
            .or_else(|| self.main_method.clone());
        Arc::new(TemplateClass {
            uid: next_uid(),
            name: self.name,
            module_name: self.module_name,
            kind: self.kind,
            bases: self.bases,
            ancestors,
            members: self.members,
            main_method: self.main_method,
            str_method,
            autocall: self.autocall,
            globals: self.globals,
            generated_code: self.generated_code,
            origin: self.origin.map(OnceLock::from).unwrap_or_default(),
            in_compilation_cache: self.in_compilation_cache,
            compiler_settings: self.compiler_settings,
            module_globals: self.module_globals,
            factory: self.factory,
            registry: self.registry,
        })
    }
}

impl TemplateClass {
    /// Start defining a native class.
    pub fn native(name: impl Into<String>) -> NativeClassBuilder {
        NativeClassBuilder {
            parts: ClassParts::new(name, "__native__", ClassKind::Native),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    /// Process-unique identity of this class.
    pub fn uid(&self) -> u64 {
        self.uid
    }

    pub fn bases(&self) -> &[ClassRef] {
        &self.bases
    }

    /// The generated code, when it was retained at load time.
    pub fn generated_module_code(&self) -> Option<&str> {
        self.generated_code.as_deref()
    }

    /// Whether this class is the compilation cache's entry for its
    /// fingerprint.
    pub fn is_in_compilation_cache(&self) -> bool {
        self.in_compilation_cache
    }

    /// File the generated code was written to for tracebacks.
    pub fn origin(&self) -> Option<&Path> {
        self.origin.get().map(PathBuf::as_path)
    }

    /// Keep the first file recorded as the origin.
    pub(crate) fn record_origin(&self, path: &Path) {
        self.origin.get_or_init(|| path.to_path_buf());
    }

    /// Main render method introduced by this class.
    pub fn main_method_name(&self) -> Option<&str> {
        self.main_method.as_deref()
    }

    /// Names of the members defined directly on this class.
    pub fn member_names(&self) -> impl Iterator<Item = &str> {
        self.members.keys().map(String::as_str)
    }

    /// Resolution order, starting with this class.
    pub fn mro(self: &Arc<Self>) -> Vec<ClassRef> {
        std::iter::once(self.clone())
            .chain(self.ancestors.iter().cloned())
            .collect()
    }

    pub fn is_subclass_of(&self, other: &TemplateClass) -> bool {
        self.uid == other.uid || self.ancestors.iter().any(|a| a.uid == other.uid)
    }

    pub(crate) fn is_dict_based(&self) -> bool {
        std::iter::once(self)
            .chain(self.ancestors.iter().map(|a| a.as_ref()))
            .any(|c| c.kind == ClassKind::Builtin(BuiltinKind::Dict))
    }

    /// Find a member along the resolution order, with the class that
    /// defines it.
    pub(crate) fn lookup(self: &Arc<Self>, name: &str) -> Option<(ClassRef, Member)> {
        if let Some(member) = self.members.get(name) {
            return Some((self.clone(), member.clone()));
        }
        self.ancestors
            .iter()
            .find_map(|a| a.members.get(name).map(|m| (a.clone(), m.clone())))
    }

    /// Whether any class in the resolution order defines `name`.
    pub fn has_member(self: &Arc<Self>, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Attribute access on the class (`Cls.name`).
    pub fn get(self: &Arc<Self>, name: &str) -> Option<Value> {
        crate::runtime::class_attribute(self, name)
    }

    /// Call a class or static method, or any attribute that is callable.
    pub fn call_method(self: &Arc<Self>, name: &str, args: CallArgs) -> TemplateResult<Value> {
        let target = self.get(name).ok_or_else(|| {
            RenderError::new(
                crate::error::RenderErrorKind::AttributeError,
                format!("class '{}' has no attribute '{}'", self.name, name),
            )
        })?;
        Ok(crate::runtime::call_value(&target, args)?)
    }

    /// Compile `request` as a subclass of this class.
    ///
    /// Uses the factory that produced this class, or the process-wide
    /// default factory for built-in and native classes.
    pub fn subclass(self: &Arc<Self>, request: CompileRequest) -> TemplateResult<ClassRef> {
        match self.factory.upgrade() {
            Some(shared) => TemplateFactory::from_shared(shared).subclass(self, request),
            None => crate::factory::default_factory().subclass(self, request),
        }
    }

    pub(crate) fn registry(&self) -> Option<Arc<ModuleRegistry>> {
        self.registry.upgrade()
    }

    /// Generated code text for traceback source lines: the retained code,
    /// else the file written for tracebacks.
    pub(crate) fn traceback_source(&self) -> Option<Cow<'_, str>> {
        if let Some(code) = &self.generated_code {
            return Some(Cow::Borrowed(&**code));
        }
        let path = self.origin.get()?;
        std::fs::read_to_string(path).ok().map(Cow::Owned)
    }
}

impl fmt::Debug for TemplateClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateClass")
            .field("name", &self.name)
            .field("module", &self.module_name)
            .field("kind", &self.kind)
            .field(
                "bases",
                &self.bases.iter().map(|b| b.name.as_str()).collect::<Vec<_>>(),
            )
            .field("members", &self.members.keys().collect::<Vec<_>>())
            .field("in_compilation_cache", &self.in_compilation_cache)
            .finish()
    }
}

/// Builder for host-defined classes usable as bases and mixins.
pub struct NativeClassBuilder {
    parts: ClassParts,
}

impl NativeClassBuilder {
    pub fn module(mut self, module_name: impl Into<String>) -> Self {
        self.parts.module_name = module_name.into();
        self
    }

    pub fn base(mut self, base: ClassRef) -> Self {
        self.parts.bases.push(base);
        self
    }

    fn method_of_kind(
        mut self,
        kind: MethodKind,
        name: impl Into<String>,
        f: impl Fn(NativeCall<'_>) -> Result<Value, RenderError> + Send + Sync + 'static,
    ) -> Self {
        let name = name.into();
        self.parts.members.insert(
            name.clone(),
            Member::Method(Method {
                name,
                kind,
                body: MethodBody::Native(Arc::new(f)),
            }),
        );
        self
    }

    /// Add an instance method.
    pub fn method(
        self,
        name: impl Into<String>,
        f: impl Fn(NativeCall<'_>) -> Result<Value, RenderError> + Send + Sync + 'static,
    ) -> Self {
        self.method_of_kind(MethodKind::Instance, name, f)
    }

    pub fn class_method(
        self,
        name: impl Into<String>,
        f: impl Fn(NativeCall<'_>) -> Result<Value, RenderError> + Send + Sync + 'static,
    ) -> Self {
        self.method_of_kind(MethodKind::Class, name, f)
    }

    pub fn static_method(
        self,
        name: impl Into<String>,
        f: impl Fn(NativeCall<'_>) -> Result<Value, RenderError> + Send + Sync + 'static,
    ) -> Self {
        self.method_of_kind(MethodKind::Static, name, f)
    }

    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parts
            .members
            .insert(name.into(), Member::Attribute(value.into()));
        self
    }

    /// Name the method `render()` calls on instances of this class.
    pub fn main_method(mut self, name: impl Into<String>) -> Self {
        self.parts.main_method = Some(name.into());
        self
    }

    pub fn build(mut self) -> TemplateResult<ClassRef> {
        if !crate::expr::is_identifier(&self.parts.name) {
            return Err(TemplateError::configuration(
                "className",
                format!("'{}' is not a valid identifier", self.parts.name),
            ));
        }
        if self.parts.bases.is_empty() {
            self.parts.bases.push(crate::builtins::object_class());
        }
        Ok(self.parts.assemble())
    }
}
