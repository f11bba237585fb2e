/*
 * factory.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template factory: the `compile` / `subclass` entry points.
//!
//! `compile` drives the whole pipeline:
//!
//! 1. normalize and apply the preprocessors,
//! 2. resolve the unit identity (explicit names, then preprocessor names,
//!    then generated defaults),
//! 3. consult the compilation cache; a hit is still placed under the
//!    requested module name,
//! 4. on a miss, run the source compiler and the code loader,
//! 5. store the class in the cache.
//!
//! A factory owns its compilation cache and module registry, so separate
//! factories are isolated from each other. [`default_factory`] backs the
//! free function [`crate::compile`].

use crate::cache::{CompilationCache, FingerprintInput};
use crate::class::ClassRef;
use crate::compiler::{CompileTarget, compile_source};
use crate::error::{TemplateError, TemplateResult};
use crate::expr::{is_dotted_name, is_identifier};
use crate::loader::{self, BaseClassRef, LoadOptions};
use crate::preprocess::{self, PreprocessorSpec, SourceIdentity};
use crate::registry::{ModuleNamespace, ModuleRegistry};
use crate::settings::CompilerSettings;
use crate::value::{Namespace, Value};
use once_cell::sync::Lazy;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Class name used when neither the request nor a preprocessor names one.
pub const DEFAULT_CLASS_NAME: &str = "DynamicallyCompiledCheetahTemplate";

/// Prefix of generated module names.
pub const GENERATED_MODULE_PREFIX: &str = "cheetah_DynamicallyCompiledCheetahTemplate";

/// One compile: source plus everything that shapes the resulting class.
#[derive(Debug, Clone)]
pub struct CompileRequest {
    pub source: String,
    /// Raw compiler settings; `None` lets `subclass` inherit the parent's.
    pub compiler_settings: Option<Namespace>,
    pub preprocessors: Option<PreprocessorSpec>,
    /// Defaults to the library's `Template` class.
    pub base_class: Option<BaseClassRef>,
    pub class_name: Option<String>,
    pub module_name: Option<String>,
    pub main_method_name: Option<String>,
    /// `None` lets `subclass` inherit the parent's.
    pub module_globals: Option<Namespace>,
    pub cache_compilation_results: bool,
    pub cache_module_files_for_tracebacks: bool,
    pub cache_dir_for_module_files: Option<PathBuf>,
    pub keep_ref_to_generated_code: bool,
}

impl CompileRequest {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            compiler_settings: None,
            preprocessors: None,
            base_class: None,
            class_name: None,
            module_name: None,
            main_method_name: None,
            module_globals: None,
            cache_compilation_results: true,
            cache_module_files_for_tracebacks: false,
            cache_dir_for_module_files: None,
            keep_ref_to_generated_code: true,
        }
    }

    pub fn compiler_settings(mut self, settings: Namespace) -> Self {
        self.compiler_settings = Some(settings);
        self
    }

    /// Set one compiler setting.
    pub fn compiler_setting(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.compiler_settings
            .get_or_insert_with(Namespace::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn preprocessors(mut self, spec: impl Into<PreprocessorSpec>) -> Self {
        self.preprocessors = Some(spec.into());
        self
    }

    pub fn base_class(mut self, base: impl Into<BaseClassRef>) -> Self {
        self.base_class = Some(base.into());
        self
    }

    pub fn class_name(mut self, name: impl Into<String>) -> Self {
        self.class_name = Some(name.into());
        self
    }

    pub fn module_name(mut self, name: impl Into<String>) -> Self {
        self.module_name = Some(name.into());
        self
    }

    pub fn main_method_name(mut self, name: impl Into<String>) -> Self {
        self.main_method_name = Some(name.into());
        self
    }

    pub fn module_globals(mut self, globals: Namespace) -> Self {
        self.module_globals = Some(globals);
        self
    }

    /// Set one module global.
    pub fn module_global(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.module_globals
            .get_or_insert_with(Namespace::new)
            .insert(name.into(), value.into());
        self
    }

    pub fn cache_compilation_results(mut self, enabled: bool) -> Self {
        self.cache_compilation_results = enabled;
        self
    }

    pub fn cache_module_files_for_tracebacks(mut self, enabled: bool) -> Self {
        self.cache_module_files_for_tracebacks = enabled;
        self
    }

    pub fn cache_dir_for_module_files(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir_for_module_files = Some(dir.into());
        self
    }

    pub fn keep_ref_to_generated_code(mut self, enabled: bool) -> Self {
        self.keep_ref_to_generated_code = enabled;
        self
    }
}

/// State shared by a factory and the classes it produced.
pub struct FactoryShared {
    cache: Arc<CompilationCache>,
    registry: Arc<ModuleRegistry>,
    module_counter: AtomicU64,
}

/// Compiles template source into classes.
#[derive(Clone)]
pub struct TemplateFactory {
    shared: Arc<FactoryShared>,
}

impl Default for TemplateFactory {
    fn default() -> Self {
        Self::new()
    }
}

static DEFAULT_FACTORY: Lazy<TemplateFactory> = Lazy::new(TemplateFactory::new);

/// The process-wide factory behind [`crate::compile`].
pub fn default_factory() -> &'static TemplateFactory {
    &DEFAULT_FACTORY
}

impl TemplateFactory {
    /// A factory with its own cache and module registry.
    pub fn new() -> Self {
        Self::with_cache(Arc::new(CompilationCache::new()))
    }

    /// A factory sharing `cache` with others.
    pub fn with_cache(cache: Arc<CompilationCache>) -> Self {
        Self {
            shared: Arc::new(FactoryShared {
                cache,
                registry: Arc::new(ModuleRegistry::new()),
                module_counter: AtomicU64::new(0),
            }),
        }
    }

    pub(crate) fn from_shared(shared: Arc<FactoryShared>) -> Self {
        Self { shared }
    }

    pub fn cache(&self) -> &Arc<CompilationCache> {
        &self.shared.cache
    }

    /// Registry of the modules this factory has loaded.
    pub fn modules(&self) -> &Arc<ModuleRegistry> {
        &self.shared.registry
    }

    /// Compile a request into a class.
    pub fn compile(&self, request: CompileRequest) -> TemplateResult<ClassRef> {
        let CompileRequest {
            source,
            compiler_settings,
            preprocessors,
            base_class,
            class_name,
            module_name,
            main_method_name,
            module_globals,
            cache_compilation_results,
            cache_module_files_for_tracebacks,
            cache_dir_for_module_files,
            keep_ref_to_generated_code,
        } = request;

        let requested = SourceIdentity {
            module_name: module_name.clone(),
            class_name: class_name.clone(),
        };
        let (source, preprocessed) = match &preprocessors {
            Some(spec) => {
                let function = preprocess::normalize(spec)?;
                let given = (requested != SourceIdentity::default()).then_some(&requested);
                function.apply(&source, given, self)?
            }
            None => (source, None),
        };
        let preprocessed = preprocessed.unwrap_or_default();

        let class_name = class_name
            .or_else(|| module_name.clone())
            .or(preprocessed.class_name)
            .or_else(|| preprocessed.module_name.clone())
            .unwrap_or_else(|| DEFAULT_CLASS_NAME.to_string());
        let module_name = module_name
            .or(preprocessed.module_name)
            .unwrap_or_else(|| self.next_module_name());
        if !is_identifier(&class_name) {
            return Err(TemplateError::configuration(
                "className",
                format!("'{}' is not a valid identifier", class_name),
            ));
        }
        if !is_dotted_name(&module_name) {
            return Err(TemplateError::configuration(
                "moduleName",
                format!("'{}' is not a valid module name", module_name),
            ));
        }

        let mut settings_mapping = compiler_settings.unwrap_or_default();
        let stored_settings = settings_mapping.clone();
        if let Some(main) = &main_method_name {
            settings_mapping.insert("mainMethodName".to_string(), Value::from(main.as_str()));
        }
        let settings = CompilerSettings::from_mapping(&settings_mapping)?;
        let module_globals = module_globals.unwrap_or_default();
        let base = base_class.unwrap_or_default();

        let fingerprint = FingerprintInput {
            source: &source,
            settings: &settings.fingerprint(),
            class_name: &class_name,
            base: &base.fingerprint(),
            module_globals: &module_globals,
            main_method_name: main_method_name.as_deref(),
        }
        .compute();

        if cache_compilation_results {
            if let Some(class) = self.shared.cache.get(&fingerprint) {
                tracing::debug!(%fingerprint, class = %class.name(), "compilation cache hit");
                let module_file_dir = cache_module_files_for_tracebacks
                    .then(|| loader::module_file_dir(cache_dir_for_module_files.as_deref()));
                self.place_cached(&class, &module_name, module_file_dir.as_deref(), || {
                    let target = CompileTarget {
                        module_name: class.module_name().to_string(),
                        class_name: class.name().to_string(),
                        base_name: base.code_name(),
                    };
                    Ok(compile_source(&source, &settings, &target)?.code)
                })?;
                return Ok(class);
            }
            tracing::debug!(%fingerprint, "compilation cache miss");
        }

        let target = CompileTarget {
            module_name: module_name.clone(),
            class_name,
            base_name: base.code_name(),
        };
        let artifact = compile_source(&source, &settings, &target)?;
        let options = LoadOptions {
            base: &base,
            module_globals: &module_globals,
            requested_main_method: main_method_name.as_deref(),
            keep_ref_to_generated_code,
            cache_module_files_for_tracebacks,
            cache_dir_for_module_files: cache_dir_for_module_files.as_deref(),
            in_compilation_cache: cache_compilation_results,
            compiler_settings: &stored_settings,
        };
        let class = loader::load(
            &artifact,
            &options,
            &self.shared.registry,
            Arc::downgrade(&self.shared),
        )?;

        if cache_compilation_results {
            self.shared.cache.put(fingerprint, class.clone());
        }
        Ok(class)
    }

    /// Compile `request` with `parent` as its base class.
    ///
    /// Module globals and compiler settings default to the parent's.
    pub fn subclass(&self, parent: &ClassRef, mut request: CompileRequest) -> TemplateResult<ClassRef> {
        request.base_class = Some(BaseClassRef::Direct(parent.clone()));
        if request.module_globals.is_none() {
            request.module_globals = Some(parent.module_globals.clone());
        }
        if request.compiler_settings.is_none() && !parent.compiler_settings.is_empty() {
            request.compiler_settings = Some(parent.compiler_settings.clone());
        }
        self.compile(request)
    }

    /// Make a class served from the cache importable as `module_name`,
    /// writing its module file into `module_file_dir` when given.
    ///
    /// The file holds the retained code, else the origin file's contents,
    /// else code from `regenerate`.
    fn place_cached(
        &self,
        class: &ClassRef,
        module_name: &str,
        module_file_dir: Option<&Path>,
        regenerate: impl FnOnce() -> TemplateResult<String>,
    ) -> TemplateResult<()> {
        let mut module = ModuleNamespace::for_class(module_name, class);
        if let Some(dir) = module_file_dir {
            let code = match class.traceback_source() {
                Some(code) => code.into_owned(),
                None => regenerate()?,
            };
            let path = loader::write_module_file(dir, module_name, &code)?;
            class.record_origin(&path);
            module = module.with_origin(path);
        }
        self.shared.registry.register(module);
        tracing::debug!(module = %module_name, class = %class.name(), "placed cached class");
        Ok(())
    }

    fn next_module_name(&self) -> String {
        let n = self.shared.module_counter.fetch_add(1, Ordering::Relaxed);
        format!("{}_{}", GENERATED_MODULE_PREFIX, n)
    }
}

impl std::fmt::Debug for TemplateFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateFactory")
            .field("cache", &self.shared.cache)
            .field("modules", &self.shared.registry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::InitArgs;

    fn foo_namespace() -> Namespace {
        let mut ns = Namespace::new();
        ns.insert("foo".to_string(), Value::Int(1234));
        ns
    }

    #[test]
    fn test_generated_identity() {
        let factory = TemplateFactory::new();
        let class = factory.compile(CompileRequest::new("$foo")).unwrap();
        assert_eq!(class.name(), DEFAULT_CLASS_NAME);
        assert!(class.module_name().starts_with(GENERATED_MODULE_PREFIX));
        assert!(factory.modules().contains(class.module_name()));
    }

    #[test]
    fn test_module_name_names_class() {
        let factory = TemplateFactory::new();
        let class = factory
            .compile(CompileRequest::new("$foo").module_name("foo99"))
            .unwrap();
        assert_eq!(class.name(), "foo99");
        assert_eq!(class.module_name(), "foo99");
    }

    #[test]
    fn test_invalid_names_are_rejected() {
        let factory = TemplateFactory::new();
        let err = factory
            .compile(CompileRequest::new("x").class_name("not valid"))
            .unwrap_err();
        assert!(matches!(err, TemplateError::Configuration { ref setting, .. } if setting == "className"));
        let err = factory
            .compile(CompileRequest::new("x").module_name("a..b"))
            .unwrap_err();
        assert!(matches!(err, TemplateError::Configuration { ref setting, .. } if setting == "moduleName"));
    }

    #[test]
    fn test_cache_hit_is_same_class() {
        let factory = TemplateFactory::new();
        let a = factory.compile(CompileRequest::new("$foo").class_name("Shared")).unwrap();
        let b = factory
            .compile(CompileRequest::new("$foo").class_name("Shared").module_name("elsewhere"))
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(factory.cache().len(), 1);
    }

    #[test]
    fn test_factories_are_isolated() {
        let a = TemplateFactory::new();
        let b = TemplateFactory::new();
        let x = a.compile(CompileRequest::new("$foo")).unwrap();
        let y = b.compile(CompileRequest::new("$foo")).unwrap();
        assert!(!Arc::ptr_eq(&x, &y));
        let shared = TemplateFactory::with_cache(a.cache().clone());
        let z = shared.compile(CompileRequest::new("$foo")).unwrap();
        assert!(Arc::ptr_eq(&x, &z));
    }

    #[test]
    fn test_subclass_inherits_module_globals() {
        let factory = TemplateFactory::new();
        let parent = factory
            .compile(CompileRequest::new("$foo").module_globals(foo_namespace()))
            .unwrap();
        let child = factory
            .subclass(&parent, CompileRequest::new("[$foo]"))
            .unwrap();
        let inst = child.instantiate(InitArgs::new()).unwrap();
        assert_eq!(inst.render().unwrap(), "[1234]");
        assert!(child.is_subclass_of(&parent));
    }
}
