/*
 * lib.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template-to-code compiler with cached, inheritable template classes.
//!
//! Template source mixes literal text with placeholders (`$name`,
//! `${expr}`) and directives (`#if`, `#for`, `#def`, `#extends`, ...).
//! Compiling it produces a [`TemplateClass`]: a named class that can be
//! instantiated with data and rendered, subclassed by further templates,
//! or used as a base for them.
//!
//! # Pipeline
//!
//! - [`preprocess`]: normalizes the preprocessors of a request into one
//!   source-to-source function.
//! - [`compiler`]: scans and parses template source into the unit IR and
//!   prints it as generated code.
//! - [`loader`]: reads generated code back and materializes the class,
//!   optionally writing the code to disk for tracebacks.
//! - [`cache`]: memoizes classes by a fingerprint of the compile.
//! - [`factory`]: the `compile` / `subclass` entry points tying it all
//!   together.
//!
//! # Example
//!
//! ```
//! use cheetah_template::{CompileRequest, InitArgs, Namespace, Value, compile};
//!
//! let class = compile(CompileRequest::new("Hello, $name!"))?;
//! let mut ns = Namespace::new();
//! ns.insert("name".to_string(), Value::from("World"));
//! let output = class.instantiate(InitArgs::new().namespace(ns))?.render()?;
//! assert_eq!(output, "Hello, World!");
//! # Ok::<(), cheetah_template::TemplateError>(())
//! ```

pub mod builtins;
pub mod cache;
pub mod class;
pub mod compiler;
pub mod error;
pub mod expr;
pub mod factory;
pub mod instance;
pub mod ir;
pub mod loader;
pub mod preprocess;
pub mod registry;
mod runtime;
pub mod settings;
pub mod value;

// Re-export main types at crate root
pub use builtins::{dict_class, object_class, template_class};
pub use cache::{CompilationCache, Fingerprint};
pub use class::{CallArgs, ClassRef, NativeCall, TemplateClass};
pub use compiler::{GeneratedArtifact, UnitIdentity};
pub use error::{RenderError, RenderErrorKind, SyntaxError, TemplateError, TemplateResult};
pub use factory::{CompileRequest, TemplateFactory, default_factory};
pub use instance::{InitArgs, InstanceRef, TemplateInstance};
pub use loader::BaseClassRef;
pub use preprocess::{
    Preprocess, PreprocessorFunction, PreprocessorSettings, PreprocessorSpec, SourceIdentity,
};
pub use registry::{MemoryProvider, ModuleNamespace, ModuleProvider, ModuleRegistry};
pub use settings::CompilerSettings;
pub use value::{Namespace, Value, namespace_from_json};

/// Compile a request with the process-wide default factory.
pub fn compile(request: CompileRequest) -> TemplateResult<ClassRef> {
    default_factory().compile(request)
}
