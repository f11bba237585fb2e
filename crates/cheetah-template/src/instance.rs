/*
 * instance.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template instances.
//!
//! An instance pairs a class with the data it renders against: the search
//! list of namespaces, optional dict data for dict-derived classes, and
//! the variables set with `#set global` while rendering.

use crate::class::{CallArgs, ClassRef, TemplateClass, next_uid};
use crate::error::{RenderError, RenderErrorKind, TemplateError, TemplateResult};
use crate::value::{Namespace, Value};
use std::sync::{Arc, Mutex, PoisonError};

/// Shared handle to an instance.
pub type InstanceRef = Arc<TemplateInstance>;

/// Construction arguments for an instance.
#[derive(Debug, Clone, Default)]
pub struct InitArgs {
    /// Data for dict-derived classes.
    pub data: Option<Namespace>,
    /// Namespaces searched by placeholders, first match wins.
    pub namespaces: Vec<Value>,
}

impl InitArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn data(mut self, data: Namespace) -> Self {
        self.data = Some(data);
        self
    }

    /// Append a namespace to the search list.
    pub fn namespace(mut self, namespace: impl Into<Value>) -> Self {
        self.namespaces.push(namespace.into());
        self
    }

    /// Read `namespaces` (or its alias `searchList`) from a mapping.
    ///
    /// A single mapping is one namespace; a list is several.
    pub fn from_mapping(mapping: &Namespace) -> TemplateResult<Self> {
        let mut args = InitArgs::new();
        let namespaces = mapping
            .get("namespaces")
            .or_else(|| mapping.get("searchList"));
        match namespaces {
            None | Some(Value::None) => {}
            Some(Value::List(items)) => args.namespaces.extend(items.iter().cloned()),
            Some(value @ (Value::Map(_) | Value::Instance(_))) => {
                args.namespaces.push(value.clone())
            }
            Some(other) => {
                return Err(TemplateError::configuration(
                    "templateInitArgs",
                    format!("namespaces must be a mapping or list, got {}", other.type_name()),
                ));
            }
        }
        Ok(args)
    }
}

/// An instance of a template class.
pub struct TemplateInstance {
    uid: u64,
    class: ClassRef,
    data: Option<Namespace>,
    search_list: Vec<Value>,
    globals: Mutex<Namespace>,
}

impl TemplateClass {
    /// Create an instance of this class.
    pub fn instantiate(self: &Arc<Self>, args: InitArgs) -> TemplateResult<InstanceRef> {
        Ok(crate::runtime::instantiate(self, args)?)
    }
}

impl TemplateInstance {
    pub(crate) fn new(class: ClassRef, args: InitArgs) -> Result<InstanceRef, RenderError> {
        if args.data.is_some() && !class.is_dict_based() {
            return Err(RenderError::type_error(format!(
                "'{}' does not take dict data",
                class.name()
            )));
        }
        Ok(Arc::new(TemplateInstance {
            uid: next_uid(),
            class,
            data: args.data,
            search_list: args.namespaces,
            globals: Mutex::new(Namespace::new()),
        }))
    }

    pub fn class(&self) -> &ClassRef {
        &self.class
    }

    pub fn uid(&self) -> u64 {
        self.uid
    }

    /// Dict data of a dict-derived instance.
    pub fn data(&self) -> Option<&Namespace> {
        self.data.as_ref()
    }

    pub fn search_list(&self) -> &[Value] {
        &self.search_list
    }

    pub fn generated_module_code(&self) -> Option<&str> {
        self.class.generated_module_code()
    }

    /// Render the instance through its class's render method.
    pub fn render(self: &Arc<Self>) -> TemplateResult<String> {
        Ok(crate::runtime::render_instance(self)?)
    }

    /// Call a method (or callable attribute) by name.
    pub fn call_method(self: &Arc<Self>, name: &str, args: CallArgs) -> TemplateResult<Value> {
        let target = self.get(name).ok_or_else(|| {
            RenderError::new(
                RenderErrorKind::AttributeError,
                format!("'{}' object has no attribute '{}'", self.class.name(), name),
            )
        })?;
        Ok(crate::runtime::call_value(&target, args)?)
    }

    /// Attribute access on the instance.
    pub fn get(self: &Arc<Self>, name: &str) -> Option<Value> {
        crate::runtime::instance_attribute(self, name)
    }

    pub(crate) fn global_var(&self, name: &str) -> Option<Value> {
        self.globals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub(crate) fn set_global_var(&self, name: &str, value: Value) {
        self.globals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), value);
    }
}

impl std::fmt::Debug for TemplateInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateInstance")
            .field("class", &self.class.name())
            .field("uid", &self.uid)
            .field("namespaces", &self.search_list.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::{dict_class, template_class};

    #[test]
    fn test_init_args_from_mapping() {
        let mut ns = Namespace::new();
        ns.insert("foo".to_string(), Value::Int(1));
        let mut mapping = Namespace::new();
        mapping.insert("namespaces".to_string(), Value::Map(ns.clone()));
        let args = InitArgs::from_mapping(&mapping).unwrap();
        assert_eq!(args.namespaces, vec![Value::Map(ns)]);

        let mut bad = Namespace::new();
        bad.insert("searchList".to_string(), Value::Int(3));
        assert!(InitArgs::from_mapping(&bad).is_err());
    }

    #[test]
    fn test_dict_data_requires_dict_class() {
        let data = Namespace::new();
        assert!(TemplateInstance::new(template_class(), InitArgs::new().data(data.clone())).is_err());
        let inst = TemplateInstance::new(dict_class(), InitArgs::new().data(data)).unwrap();
        assert!(inst.data().is_some());
    }

    #[test]
    fn test_global_vars() {
        let inst = TemplateInstance::new(template_class(), InitArgs::new()).unwrap();
        assert_eq!(inst.global_var("x"), None);
        inst.set_global_var("x", Value::Int(2));
        assert_eq!(inst.global_var("x"), Some(Value::Int(2)));
    }
}
