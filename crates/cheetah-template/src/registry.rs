/*
 * registry.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Module registry.
//!
//! Every loaded unit is registered under its module name so later units
//! can import it (`#from base import Base`, or the import generated for
//! `#extends base`). Built-in modules are always present; host code can
//! register more, or plug in a [`ModuleProvider`] that supplies modules
//! on first import.

use crate::class::ClassRef;
use crate::error::{RenderError, RenderErrorKind};
use crate::value::{Namespace, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

/// A loaded module: a named namespace.
#[derive(Debug)]
pub struct ModuleNamespace {
    name: String,
    members: Namespace,
    origin: Option<PathBuf>,
}

impl ModuleNamespace {
    pub fn new(name: impl Into<String>, members: Namespace) -> Self {
        Self {
            name: name.into(),
            members,
            origin: None,
        }
    }

    /// Module holding a single class under the class's name.
    pub fn for_class(module_name: impl Into<String>, class: &ClassRef) -> Self {
        let mut members = Namespace::new();
        members.insert(class.name().to_string(), Value::Class(class.clone()));
        Self {
            name: module_name.into(),
            members,
            origin: class.origin().map(|p| p.to_path_buf()),
        }
    }

    pub fn with_origin(mut self, origin: PathBuf) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.members.get(name)
    }

    pub fn members(&self) -> &Namespace {
        &self.members
    }

    pub fn origin(&self) -> Option<&std::path::Path> {
        self.origin.as_deref()
    }
}

/// Supplies modules the registry does not hold yet.
pub trait ModuleProvider: Send + Sync {
    /// Find a module by its dotted name, or `None` if this provider does
    /// not know it.
    fn find_module(&self, name: &str) -> Option<ModuleNamespace>;
}

/// Provider backed by an in-memory map of module name to members.
#[derive(Debug, Clone, Default)]
pub struct MemoryProvider {
    modules: HashMap<String, Namespace>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, members: Namespace) -> &mut Self {
        self.modules.insert(name.into(), members);
        self
    }
}

impl ModuleProvider for MemoryProvider {
    fn find_module(&self, name: &str) -> Option<ModuleNamespace> {
        self.modules
            .get(name)
            .map(|members| ModuleNamespace::new(name, members.clone()))
    }
}

/// Name-indexed table of loaded modules.
pub struct ModuleRegistry {
    modules: RwLock<HashMap<String, Arc<ModuleNamespace>>>,
    providers: RwLock<Vec<Box<dyn ModuleProvider>>>,
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleRegistry {
    /// A registry holding the built-in modules.
    pub fn new() -> Self {
        let registry = Self {
            modules: RwLock::new(HashMap::new()),
            providers: RwLock::new(Vec::new()),
        };
        for module in crate::builtins::builtin_modules() {
            registry.register(module);
        }
        registry
    }

    /// Register (or replace) a module under its name.
    pub fn register(&self, module: ModuleNamespace) -> Arc<ModuleNamespace> {
        let module = Arc::new(module);
        self.modules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(module.name().to_string(), module.clone());
        module
    }

    /// Register a provider consulted, in registration order, for modules
    /// not yet loaded.
    pub fn add_provider(&self, provider: impl ModuleProvider + 'static) {
        self.providers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(provider));
    }

    pub fn get(&self, name: &str) -> Option<Arc<ModuleNamespace>> {
        if let Some(module) = self
            .modules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return Some(module.clone());
        }
        let found = self
            .providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find_map(|p| p.find_module(name))?;
        tracing::debug!(module = %name, "module supplied by provider");
        Some(self.register(found))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn remove(&self, name: &str) -> Option<Arc<ModuleNamespace>> {
        self.modules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    /// Names of all loaded modules, sorted.
    pub fn module_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .modules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// `import a.b.c`: the value bound to `a`.
    ///
    /// For a dotted path the module itself must exist; the bound value is
    /// a package view whose attributes lead down to it.
    pub fn import_module(&self, path: &str) -> Result<Value, RenderError> {
        let Some(target) = self.get(path) else {
            return Err(import_error(format!("No module named '{}'", path)));
        };
        let mut segments: Vec<&str> = path.split('.').collect();
        if segments.len() == 1 {
            return Ok(Value::Module(target));
        }
        // Build the package chain from the innermost module outward.
        let mut value = Value::Module(target);
        while segments.len() > 1 {
            let child = segments.pop().unwrap_or_default();
            let package = segments.join(".");
            let mut members = self
                .get(&package)
                .map(|m| m.members().clone())
                .unwrap_or_default();
            members.insert(child.to_string(), value);
            value = Value::Module(Arc::new(ModuleNamespace::new(package, members)));
        }
        Ok(value)
    }

    /// `import a.b.c as x`: the module itself.
    pub fn import_module_as(&self, path: &str) -> Result<Value, RenderError> {
        self.get(path)
            .map(Value::Module)
            .ok_or_else(|| import_error(format!("No module named '{}'", path)))
    }

    /// `from module import name`.
    pub fn import_from(&self, module: &str, name: &str) -> Result<Value, RenderError> {
        let Some(namespace) = self.get(module) else {
            return Err(import_error(format!("No module named '{}'", module)));
        };
        if let Some(value) = namespace.get(name) {
            return Ok(value.clone());
        }
        // Submodule import: `from a import b` where `a.b` is a module.
        self.get(&format!("{}.{}", module, name))
            .map(Value::Module)
            .ok_or_else(|| import_error(format!("cannot import name '{}' from '{}'", name, module)))
    }
}

fn import_error(message: String) -> RenderError {
    RenderError::new(RenderErrorKind::ImportError, message)
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.module_names())
            .finish()
    }
}
