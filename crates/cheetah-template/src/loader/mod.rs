/*
 * mod.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Code loader.
//!
//! Turns generated unit code into a live [`TemplateClass`]:
//!
//! 1. [`reader`] parses the code back into the unit IR,
//! 2. the module scope is built from the module globals, the bound base
//!    class and the unit's imports,
//! 3. base names are resolved and class attributes evaluated,
//! 4. the class is assembled and registered under its module name.
//!
//! Optionally the code is written to disk first, so traceback frames can
//! show generated source lines even when the code text is not retained.

pub(crate) mod reader;

use crate::class::{ClassKind, ClassParts, ClassRef, Member, Method, MethodBody, TemplateClass};
use crate::compiler::GeneratedArtifact;
use crate::error::{RenderErrorKind, TemplateError, TemplateResult};
use crate::factory::FactoryShared;
use crate::ir::{Import, UnitModule};
use crate::registry::{ModuleNamespace, ModuleRegistry};
use crate::settings::DEFAULT_MAIN_METHOD_NAME;
use crate::value::{Namespace, Value};
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

/// File extension of generated code written for tracebacks.
pub const MODULE_FILE_EXTENSION: &str = "unit";

/// The base class of a compile: a name resolved at load time, or a class
/// handle used as-is.
#[derive(Debug, Clone)]
pub enum BaseClassRef {
    ByName(String),
    Direct(ClassRef),
}

impl Default for BaseClassRef {
    fn default() -> Self {
        BaseClassRef::Direct(crate::builtins::template_class())
    }
}

impl From<&str> for BaseClassRef {
    fn from(name: &str) -> Self {
        BaseClassRef::ByName(name.to_string())
    }
}

impl From<String> for BaseClassRef {
    fn from(name: String) -> Self {
        BaseClassRef::ByName(name)
    }
}

impl From<ClassRef> for BaseClassRef {
    fn from(class: ClassRef) -> Self {
        BaseClassRef::Direct(class)
    }
}

impl From<&ClassRef> for BaseClassRef {
    fn from(class: &ClassRef) -> Self {
        BaseClassRef::Direct(class.clone())
    }
}

impl BaseClassRef {
    /// Name the generated code uses for this base.
    pub(crate) fn code_name(&self) -> String {
        match self {
            BaseClassRef::ByName(name) => name.clone(),
            BaseClassRef::Direct(class) => direct_base_alias(class),
        }
    }

    /// Stable description for cache fingerprints.
    pub(crate) fn fingerprint(&self) -> String {
        match self {
            BaseClassRef::ByName(name) => format!("name:{}", name),
            BaseClassRef::Direct(class) => format!("class#{}", class.uid()),
        }
    }
}

/// Module-scope alias a directly passed base class is bound under.
fn direct_base_alias(class: &TemplateClass) -> String {
    format!("_dynamic_base_{}", class.name())
}

/// Default directory for module files written for tracebacks.
pub fn default_module_dir() -> PathBuf {
    std::env::temp_dir().join("cheetah-modules")
}

/// Everything [`load`] needs besides the generated code.
#[derive(Debug, Clone)]
pub struct LoadOptions<'a> {
    pub base: &'a BaseClassRef,
    pub module_globals: &'a Namespace,
    /// Main method name requested by the caller, checked against inherited
    /// members.
    pub requested_main_method: Option<&'a str>,
    pub keep_ref_to_generated_code: bool,
    pub cache_module_files_for_tracebacks: bool,
    pub cache_dir_for_module_files: Option<&'a Path>,
    pub in_compilation_cache: bool,
    /// Compiler settings mapping remembered for `subclass`.
    pub compiler_settings: &'a Namespace,
}

/// Materialize a class from generated code.
pub fn load(
    artifact: &GeneratedArtifact,
    options: &LoadOptions<'_>,
    registry: &Arc<ModuleRegistry>,
    factory: Weak<FactoryShared>,
) -> TemplateResult<ClassRef> {
    let module_name = &artifact.identity.module_name;
    let unit = reader::read_unit(&artifact.code).map_err(|err| TemplateError::CodeGeneration {
        module: module_name.clone(),
        line: err.line,
        message: err.message,
    })?;

    let origin = if options.cache_module_files_for_tracebacks {
        let dir = module_file_dir(options.cache_dir_for_module_files);
        Some(write_module_file(&dir, module_name, &artifact.code)?)
    } else {
        None
    };

    let mut globals = options.module_globals.clone();
    if let BaseClassRef::Direct(class) = options.base {
        globals.insert(direct_base_alias(class), Value::Class(class.clone()));
    }
    bind_imports(&unit, module_name, registry, &mut globals)?;

    let bases = unit
        .class
        .bases
        .iter()
        .map(|name| resolve_base(name, &globals, module_name))
        .collect::<TemplateResult<Vec<ClassRef>>>()?;

    if let Some(requested) = options.requested_main_method {
        check_main_method(requested, &bases)?;
    }

    let mut members: IndexMap<String, Member> = IndexMap::new();
    for (name, expr) in &unit.class.attributes {
        let value = crate::runtime::eval_module_expr(expr, &globals)?;
        members.insert(name.clone(), Member::Attribute(value));
    }
    let UnitModule { class: def, .. } = unit;
    for method in def.methods {
        members.insert(
            method.name.clone(),
            Member::Method(Method {
                name: method.name.clone(),
                kind: method.kind,
                body: MethodBody::Generated(Arc::new(method)),
            }),
        );
    }

    let mut parts = ClassParts::new(def.name, module_name.clone(), ClassKind::Compiled);
    parts.bases = bases;
    parts.members = members;
    parts.main_method = Some(def.main_method);
    parts.autocall = def.autocall;
    parts.globals = globals;
    parts.generated_code = options
        .keep_ref_to_generated_code
        .then(|| Arc::from(artifact.code.as_str()));
    parts.origin = origin;
    parts.in_compilation_cache = options.in_compilation_cache;
    parts.compiler_settings = options.compiler_settings.clone();
    parts.module_globals = options.module_globals.clone();
    parts.factory = factory;
    parts.registry = Arc::downgrade(registry);
    let class = parts.assemble();

    registry.register(ModuleNamespace::for_class(module_name.clone(), &class));
    tracing::debug!(
        module = %module_name,
        class = %class.name(),
        bases = ?class.bases().iter().map(|b| b.name()).collect::<Vec<_>>(),
        "loaded template unit"
    );
    Ok(class)
}

/// Directory module files go to: the configured one, else the default.
pub(crate) fn module_file_dir(configured: Option<&Path>) -> PathBuf {
    configured
        .map(Path::to_path_buf)
        .unwrap_or_else(default_module_dir)
}

/// Write `<dir>/<module>.unit`.
pub(crate) fn write_module_file(dir: &Path, module_name: &str, code: &str) -> TemplateResult<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.{}", module_name, MODULE_FILE_EXTENSION));
    std::fs::write(&path, code)?;
    tracing::debug!(module = %module_name, path = %path.display(), "wrote module file for tracebacks");
    Ok(path)
}

fn bind_imports(
    unit: &UnitModule,
    module_name: &str,
    registry: &ModuleRegistry,
    globals: &mut Namespace,
) -> TemplateResult<()> {
    for import in &unit.imports {
        if let Err(err) = crate::runtime::bind_import(registry, import, globals) {
            let names_base = import
                .bound_names()
                .iter()
                .any(|name| unit.class.bases.iter().any(|b| base_root(b) == name));
            if names_base && err.kind == RenderErrorKind::ImportError {
                return Err(TemplateError::NameResolution {
                    name: import_target(import),
                    module: module_name.to_string(),
                });
            }
            return Err(err.into());
        }
    }
    Ok(())
}

fn base_root(name: &str) -> &str {
    name.split('.').next().unwrap_or(name)
}

fn import_target(import: &Import) -> String {
    match import {
        Import::Module { path, .. } => path.clone(),
        Import::From { module, names } => match names.as_slice() {
            [(name, _)] => format!("{}.{}", module, name),
            _ => module.clone(),
        },
    }
}

/// Resolve a base name through the module scope, then builtins.
fn resolve_base(name: &str, globals: &Namespace, module_name: &str) -> TemplateResult<ClassRef> {
    let unresolved = || TemplateError::NameResolution {
        name: name.to_string(),
        module: module_name.to_string(),
    };
    let mut segments = name.split('.');
    let root = segments.next().unwrap_or(name);
    let mut value = globals
        .get(root)
        .cloned()
        .or_else(|| crate::builtins::lookup(root))
        .ok_or_else(unresolved)?;
    for segment in segments {
        value = match &value {
            Value::Module(module) => module.get(segment).cloned(),
            Value::Class(class) => class.get(segment),
            _ => None,
        }
        .ok_or_else(unresolved)?;
    }
    match value {
        Value::Class(class) => Ok(class),
        other => Err(TemplateError::Render(crate::error::RenderError::type_error(
            format!("base '{}' is a {}, not a class", name, other.type_name()),
        ))),
    }
}

fn check_main_method(requested: &str, bases: &[ClassRef]) -> TemplateResult<()> {
    if requested == DEFAULT_MAIN_METHOD_NAME {
        return Ok(());
    }
    for base in bases {
        if let Some((owner, _)) = base.lookup(requested) {
            return Err(TemplateError::NameConflict {
                name: requested.to_string(),
                base: owner.name().to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{CompileTarget, compile_source};
    use crate::instance::InitArgs;
    use crate::settings::CompilerSettings;

    fn artifact(source: &str, module: &str, base: &BaseClassRef) -> GeneratedArtifact {
        let target = CompileTarget {
            module_name: module.to_string(),
            class_name: "Cls".to_string(),
            base_name: base.code_name(),
        };
        compile_source(source, &CompilerSettings::default(), &target).unwrap()
    }

    fn options<'a>(base: &'a BaseClassRef, globals: &'a Namespace) -> LoadOptions<'a> {
        LoadOptions {
            base,
            module_globals: globals,
            requested_main_method: None,
            keep_ref_to_generated_code: true,
            cache_module_files_for_tracebacks: false,
            cache_dir_for_module_files: None,
            in_compilation_cache: false,
            compiler_settings: globals,
        }
    }

    #[test]
    fn test_load_and_render() {
        let registry = Arc::new(ModuleRegistry::new());
        let base = BaseClassRef::default();
        let globals = Namespace::new();
        let artifact = artifact("Hello $who!", "loader_test_1", &base);
        let class = load(&artifact, &options(&base, &globals), &registry, Weak::new()).unwrap();
        let mut ns = Namespace::new();
        ns.insert("who".to_string(), Value::from("world"));
        let inst = class.instantiate(InitArgs::new().namespace(ns)).unwrap();
        assert_eq!(inst.render().unwrap(), "Hello world!");
        assert!(registry.contains("loader_test_1"));
        assert!(class.generated_module_code().is_some());
    }

    #[test]
    fn test_corrupt_code_is_code_generation_error() {
        let registry = Arc::new(ModuleRegistry::new());
        let base = BaseClassRef::default();
        let globals = Namespace::new();
        let mut artifact = artifact("text", "loader_test_2", &base);
        artifact.code.push_str("  stray\n");
        let err = load(&artifact, &options(&base, &globals), &registry, Weak::new()).unwrap_err();
        assert!(matches!(err, TemplateError::CodeGeneration { .. }));
    }

    #[test]
    fn test_unknown_base_name() {
        let registry = Arc::new(ModuleRegistry::new());
        let base = BaseClassRef::from("NoSuchBase");
        let globals = Namespace::new();
        let artifact = artifact("text", "loader_test_3", &base);
        let err = load(&artifact, &options(&base, &globals), &registry, Weak::new()).unwrap_err();
        assert!(
            matches!(err, TemplateError::NameResolution { ref name, .. } if name == "NoSuchBase")
        );
    }

    #[test]
    fn test_main_method_conflict() {
        let registry = Arc::new(ModuleRegistry::new());
        let base = BaseClassRef::default();
        let globals = Namespace::new();
        let artifact = artifact("text", "loader_test_4", &base);
        let mut opts = options(&base, &globals);
        opts.requested_main_method = Some("getVar");
        let err = load(&artifact, &opts, &registry, Weak::new()).unwrap_err();
        assert!(matches!(err, TemplateError::NameConflict { ref base, .. } if base == "Template"));
    }

    #[test]
    fn test_module_file_for_tracebacks() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(ModuleRegistry::new());
        let base = BaseClassRef::default();
        let globals = Namespace::new();
        let artifact = artifact("text", "loader_test_5", &base);
        let mut opts = options(&base, &globals);
        opts.cache_module_files_for_tracebacks = true;
        opts.keep_ref_to_generated_code = false;
        let modules = dir.path().join("modules");
        opts.cache_dir_for_module_files = Some(&modules);
        let class = load(&artifact, &opts, &registry, Weak::new()).unwrap();
        let origin = class.origin().unwrap();
        assert_eq!(origin.parent(), Some(modules.as_path()));
        assert_eq!(std::fs::read_to_string(origin).unwrap(), artifact.code);
        assert!(class.generated_module_code().is_none());
    }
}
