/*
 * preprocess.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Preprocessor normalization.
//!
//! A compile request may name preprocessors in several shapes (a token
//! shorthand, a settings mapping or struct, a ready preprocessor, a bare
//! closure, or a list of these). [`normalize`] turns any of them into one
//! [`PreprocessorFunction`]. Normalizing a `PreprocessorFunction` returns
//! it unchanged.
//!
//! Settings-based preprocessors compile the source as a template using
//! the preprocessing tokens (default `"@ %"`), render it, and hand the
//! output on as the new source.

use crate::error::{TemplateError, TemplateResult};
use crate::factory::{CompileRequest, TemplateFactory};
use crate::instance::InitArgs;
use crate::loader::BaseClassRef;
use crate::settings::CompilerSettings;
use crate::value::{Namespace, Value};
use std::fmt;
use std::sync::Arc;

/// Tokens used by settings-based preprocessors when none are given.
pub const DEFAULT_PREPROCESSOR_TOKENS: &str = "@ %";

/// Names a source being compiled, as seen by preprocessors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceIdentity {
    pub module_name: Option<String>,
    pub class_name: Option<String>,
}

/// A source-to-source transform.
pub trait Preprocess: Send + Sync {
    /// Transform `source`. Returning `None` for the identity keeps the
    /// current one.
    fn preprocess(
        &self,
        source: &str,
        identity: Option<&SourceIdentity>,
        factory: &TemplateFactory,
    ) -> TemplateResult<(String, Option<SourceIdentity>)>;
}

/// Signature of closures usable as preprocessors.
pub type PreprocessorCallable = dyn Fn(&str, Option<&SourceIdentity>) -> TemplateResult<(String, Option<SourceIdentity>)>
    + Send
    + Sync;

/// A normalized preprocessor.
#[derive(Clone)]
pub struct PreprocessorFunction(Arc<dyn Preprocess>);

impl PreprocessorFunction {
    pub fn new(preprocessor: impl Preprocess + 'static) -> Self {
        PreprocessorFunction(Arc::new(preprocessor))
    }

    /// Preprocessor that compiles and renders the source as a template.
    pub fn template(settings: &PreprocessorSettings) -> TemplateResult<Self> {
        Ok(Self::new(TemplatePreprocessor::new(settings)?))
    }

    pub fn apply(
        &self,
        source: &str,
        identity: Option<&SourceIdentity>,
        factory: &TemplateFactory,
    ) -> TemplateResult<(String, Option<SourceIdentity>)> {
        self.0.preprocess(source, identity, factory)
    }

    pub fn ptr_eq(&self, other: &PreprocessorFunction) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for PreprocessorFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PreprocessorFunction")
    }
}

/// Settings for a template preprocessor.
///
/// `compiler_settings`, when given, wins over `tokens`.
#[derive(Debug, Clone, Default)]
pub struct PreprocessorSettings {
    /// `"<varToken> <directiveToken>"`.
    pub tokens: Option<String>,
    /// Globals visible while the preprocessing template renders.
    pub namespaces: Option<Namespace>,
    pub compiler_settings: Option<Namespace>,
    /// Constructor arguments for the preprocessing template instance.
    pub template_init_args: Option<Namespace>,
    /// Base class of the preprocessing template.
    pub template_api_class: Option<BaseClassRef>,
}

impl PreprocessorSettings {
    pub fn tokens(tokens: impl Into<String>) -> Self {
        Self {
            tokens: Some(tokens.into()),
            ..Self::default()
        }
    }

    /// Read the recognized keys of a mapping; other keys are ignored.
    pub fn from_mapping(mapping: &Namespace) -> TemplateResult<Self> {
        let mut settings = PreprocessorSettings::default();
        for (key, value) in mapping {
            match key.as_str() {
                "tokens" => settings.tokens = Some(expect_str(key, value)?),
                "namespaces" | "searchList" => settings.namespaces = Some(expect_map(key, value)?),
                "compilerSettings" => settings.compiler_settings = Some(expect_map(key, value)?),
                "templateInitArgs" => settings.template_init_args = Some(expect_map(key, value)?),
                "templateAPIClass" => {
                    settings.template_api_class = Some(match value {
                        Value::Class(class) => BaseClassRef::Direct(class.clone()),
                        Value::Str(name) => BaseClassRef::ByName(name.clone()),
                        other => {
                            return Err(TemplateError::configuration(
                                key,
                                format!("expected a class, got {}", other.type_name()),
                            ));
                        }
                    })
                }
                _ => {}
            }
        }
        Ok(settings)
    }

    fn is_empty(&self) -> bool {
        self.tokens.is_none()
            && self.namespaces.is_none()
            && self.compiler_settings.is_none()
            && self.template_init_args.is_none()
            && self.template_api_class.is_none()
    }
}

fn expect_str(key: &str, value: &Value) -> TemplateResult<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| TemplateError::configuration(key, format!("expected a string, got {}", value.type_name())))
}

fn expect_map(key: &str, value: &Value) -> TemplateResult<Namespace> {
    match value {
        Value::Map(m) => Ok(m.clone()),
        Value::None => Ok(Namespace::new()),
        other => Err(TemplateError::configuration(
            key,
            format!("expected a mapping, got {}", other.type_name()),
        )),
    }
}

/// Compiler settings for a token shorthand.
pub fn settings_for_tokens(tokens: &str) -> TemplateResult<Namespace> {
    let parts: Vec<&str> = tokens.split_whitespace().collect();
    let [var_token, directive_token] = parts.as_slice() else {
        return Err(TemplateError::configuration(
            "tokens",
            format!(
                "expected '<varToken> <directiveToken>', got '{}'",
                tokens
            ),
        ));
    };
    let mut settings = Namespace::new();
    settings.insert("cheetahVarStartToken".to_string(), Value::from(*var_token));
    settings.insert("directiveStartToken".to_string(), Value::from(*directive_token));
    settings.insert(
        "commentStartToken".to_string(),
        Value::from(directive_token.repeat(2)),
    );
    Ok(settings)
}

/// Any accepted preprocessor shape.
#[derive(Clone)]
pub enum PreprocessorSpec {
    Tokens(String),
    Mapping(Namespace),
    Object(PreprocessorSettings),
    Function(PreprocessorFunction),
    Callable(Arc<PreprocessorCallable>),
    Chain(Vec<PreprocessorSpec>),
}

impl PreprocessorSpec {
    pub fn callable(
        f: impl Fn(&str, Option<&SourceIdentity>) -> TemplateResult<(String, Option<SourceIdentity>)>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        PreprocessorSpec::Callable(Arc::new(f))
    }
}

impl fmt::Debug for PreprocessorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreprocessorSpec::Tokens(tokens) => f.debug_tuple("Tokens").field(tokens).finish(),
            PreprocessorSpec::Mapping(m) => f.debug_tuple("Mapping").field(m).finish(),
            PreprocessorSpec::Object(s) => f.debug_tuple("Object").field(s).finish(),
            PreprocessorSpec::Function(_) => f.write_str("Function"),
            PreprocessorSpec::Callable(_) => f.write_str("Callable"),
            PreprocessorSpec::Chain(specs) => f.debug_tuple("Chain").field(specs).finish(),
        }
    }
}

impl From<&str> for PreprocessorSpec {
    fn from(tokens: &str) -> Self {
        PreprocessorSpec::Tokens(tokens.to_string())
    }
}

impl From<String> for PreprocessorSpec {
    fn from(tokens: String) -> Self {
        PreprocessorSpec::Tokens(tokens)
    }
}

impl From<Namespace> for PreprocessorSpec {
    fn from(mapping: Namespace) -> Self {
        PreprocessorSpec::Mapping(mapping)
    }
}

impl From<PreprocessorSettings> for PreprocessorSpec {
    fn from(settings: PreprocessorSettings) -> Self {
        PreprocessorSpec::Object(settings)
    }
}

impl From<PreprocessorFunction> for PreprocessorSpec {
    fn from(function: PreprocessorFunction) -> Self {
        PreprocessorSpec::Function(function)
    }
}

impl From<Vec<PreprocessorSpec>> for PreprocessorSpec {
    fn from(chain: Vec<PreprocessorSpec>) -> Self {
        PreprocessorSpec::Chain(chain)
    }
}

/// Turn any preprocessor shape into one function.
pub fn normalize(spec: &PreprocessorSpec) -> TemplateResult<PreprocessorFunction> {
    match spec {
        PreprocessorSpec::Tokens(tokens) => {
            PreprocessorFunction::template(&PreprocessorSettings::tokens(tokens.clone()))
        }
        PreprocessorSpec::Mapping(mapping) => {
            PreprocessorFunction::template(&PreprocessorSettings::from_mapping(mapping)?)
        }
        PreprocessorSpec::Object(settings) => {
            if settings.is_empty() {
                return Err(TemplateError::configuration(
                    "preprocessors",
                    "settings object has none of tokens, namespaces, compilerSettings, \
                     templateInitArgs or templateAPIClass",
                ));
            }
            PreprocessorFunction::template(settings)
        }
        PreprocessorSpec::Function(function) => Ok(function.clone()),
        PreprocessorSpec::Callable(f) => Ok(PreprocessorFunction::new(CallablePreprocessor(f.clone()))),
        PreprocessorSpec::Chain(specs) => {
            let steps = specs.iter().map(normalize).collect::<TemplateResult<Vec<_>>>()?;
            Ok(PreprocessorFunction::new(ChainPreprocessor(steps)))
        }
    }
}

struct CallablePreprocessor(Arc<PreprocessorCallable>);

impl Preprocess for CallablePreprocessor {
    fn preprocess(
        &self,
        source: &str,
        identity: Option<&SourceIdentity>,
        _factory: &TemplateFactory,
    ) -> TemplateResult<(String, Option<SourceIdentity>)> {
        (self.0)(source, identity)
    }
}

struct ChainPreprocessor(Vec<PreprocessorFunction>);

impl Preprocess for ChainPreprocessor {
    fn preprocess(
        &self,
        source: &str,
        identity: Option<&SourceIdentity>,
        factory: &TemplateFactory,
    ) -> TemplateResult<(String, Option<SourceIdentity>)> {
        let mut source = source.to_string();
        let mut current = identity.cloned();
        let mut changed = None;
        for step in &self.0 {
            let (next, identity) = step.apply(&source, current.as_ref(), factory)?;
            source = next;
            if let Some(identity) = identity {
                current = Some(identity.clone());
                changed = Some(identity);
            }
        }
        Ok((source, changed))
    }
}

/// Compiles the source as a template with preprocessing tokens and
/// renders it.
struct TemplatePreprocessor {
    compiler_settings: Namespace,
    module_globals: Namespace,
    init_args: InitArgs,
    base: BaseClassRef,
}

impl TemplatePreprocessor {
    fn new(settings: &PreprocessorSettings) -> TemplateResult<Self> {
        let compiler_settings = match &settings.compiler_settings {
            Some(compiler_settings) if !compiler_settings.is_empty() => compiler_settings.clone(),
            _ => settings_for_tokens(
                settings
                    .tokens
                    .as_deref()
                    .unwrap_or(DEFAULT_PREPROCESSOR_TOKENS),
            )?,
        };
        // Fail at normalization rather than on first use.
        CompilerSettings::from_mapping(&compiler_settings)?;
        let init_args = match &settings.template_init_args {
            Some(args) => InitArgs::from_mapping(args)?,
            None => InitArgs::new(),
        };
        Ok(Self {
            compiler_settings,
            module_globals: settings.namespaces.clone().unwrap_or_default(),
            init_args,
            base: settings.template_api_class.clone().unwrap_or_default(),
        })
    }
}

impl Preprocess for TemplatePreprocessor {
    fn preprocess(
        &self,
        source: &str,
        _identity: Option<&SourceIdentity>,
        factory: &TemplateFactory,
    ) -> TemplateResult<(String, Option<SourceIdentity>)> {
        let request = CompileRequest::new(source)
            .compiler_settings(self.compiler_settings.clone())
            .module_globals(self.module_globals.clone())
            .base_class(self.base.clone());
        let class = factory.compile(request)?;
        let output = class.instantiate(self.init_args.clone())?.render()?;
        tracing::debug!(
            input_bytes = source.len(),
            output_bytes = output.len(),
            "applied template preprocessor"
        );
        Ok((output, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(spec: impl Into<PreprocessorSpec>, source: &str) -> String {
        let factory = TemplateFactory::new();
        let function = normalize(&spec.into()).unwrap();
        function.apply(source, None, &factory).unwrap().0
    }

    #[test]
    fn test_token_shorthand() {
        assert_eq!(settings_for_tokens("@ %").unwrap().get("commentStartToken"), Some(&Value::from("%%")));
        assert_eq!(run("@ %", "%set foo = 12\n%%comment\n$(@foo*10)"), "$(12*10)");
    }

    #[test]
    fn test_bad_token_shorthand() {
        let err = normalize(&PreprocessorSpec::from("@")).unwrap_err();
        assert!(matches!(err, TemplateError::Configuration { ref setting, .. } if setting == "tokens"));
    }

    #[test]
    fn test_empty_settings_object_is_rejected() {
        let err = normalize(&PreprocessorSpec::Object(PreprocessorSettings::default())).unwrap_err();
        assert!(matches!(err, TemplateError::Configuration { .. }));
    }

    #[test]
    fn test_mapping_ignores_unknown_keys() {
        let mut mapping = Namespace::new();
        mapping.insert("tokens".to_string(), Value::from("@ %"));
        mapping.insert("somethingElse".to_string(), Value::Int(1));
        let settings = PreprocessorSettings::from_mapping(&mapping).unwrap();
        assert_eq!(settings.tokens.as_deref(), Some("@ %"));
        assert!(settings.namespaces.is_none());
    }

    #[test]
    fn test_normalizing_a_function_is_identity() {
        let function = normalize(&PreprocessorSpec::from("@ %")).unwrap();
        let again = normalize(&PreprocessorSpec::Function(function.clone())).unwrap();
        assert!(function.ptr_eq(&again));
    }

    #[test]
    fn test_chain_threads_source_and_identity() {
        let chain = PreprocessorSpec::Chain(vec![
            PreprocessorSpec::callable(|src, _| Ok((format!("{}!", src), None))),
            PreprocessorSpec::callable(|src, identity| {
                assert!(identity.is_none());
                Ok((
                    src.to_uppercase(),
                    Some(SourceIdentity {
                        module_name: Some("renamed".to_string()),
                        class_name: None,
                    }),
                ))
            }),
        ]);
        let factory = TemplateFactory::new();
        let (source, identity) = normalize(&chain).unwrap().apply("hi", None, &factory).unwrap();
        assert_eq!(source, "HI!");
        assert_eq!(identity.and_then(|i| i.module_name).as_deref(), Some("renamed"));
    }
}
