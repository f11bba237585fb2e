/*
 * preprocessors.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Tests for compiling through preprocessors.

use cheetah_template::{
    CompileRequest, InitArgs, Namespace, PreprocessorFunction, PreprocessorSettings,
    PreprocessorSpec, SourceIdentity, TemplateClass, TemplateError, TemplateFactory, Value,
    template_class,
};
use pretty_assertions::assert_eq;

fn render(factory: &TemplateFactory, request: CompileRequest) -> String {
    factory
        .compile(request)
        .unwrap()
        .instantiate(InitArgs::new())
        .unwrap()
        .render()
        .unwrap()
}

fn mapping(pairs: &[(&str, Value)]) -> Namespace {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[test]
fn test_namespaces_feed_the_preprocessor() {
    let source = "%set foo = @a\n$(@foo*10)\n@a";
    let spec = mapping(&[
        ("tokens", Value::from("@ %")),
        ("namespaces", Value::Map(mapping(&[("a", Value::Int(99))]))),
    ]);
    let factory = TemplateFactory::new();
    assert_eq!(render(&factory, CompileRequest::new(source).preprocessors(spec)), "990\n99");
}

#[test]
fn test_preprocessor_spec_variants() {
    let source = "%set foo = 12\n%%comment\n$(@foo*10)";

    let compiler_settings = Value::Map(mapping(&[
        ("cheetahVarStartToken", Value::from("@")),
        ("directiveStartToken", Value::from("%")),
        ("commentStartToken", Value::from("%%")),
    ]));
    let template_subclass = TemplateClass::native("TemplateSubclass")
        .base(template_class())
        .build()
        .unwrap();
    let settings_object = PreprocessorSettings::tokens("@ %");
    let preproc_obj = PreprocessorFunction::template(&settings_object).unwrap();

    let variants: Vec<PreprocessorSpec> = vec![
        "@ %".into(),
        mapping(&[("tokens", Value::from("@ %"))]).into(),
        mapping(&[("compilerSettings", compiler_settings.clone())]).into(),
        mapping(&[
            ("compilerSettings", compiler_settings),
            ("templateInitArgs", Value::Map(Namespace::new())),
        ])
        .into(),
        mapping(&[
            ("tokens", Value::from("@ %")),
            ("templateAPIClass", Value::from(template_subclass)),
        ])
        .into(),
        settings_object.clone().into(),
        preproc_obj.into(),
        PreprocessorSpec::callable(|_, _| Ok(("$(12*10)".to_string(), None))),
    ];

    let factory = TemplateFactory::new();
    for spec in variants {
        let label = format!("{:?}", spec);
        let output = render(&factory, CompileRequest::new(source).preprocessors(spec));
        assert_eq!(output, "120", "variant {}", label);
    }
}

#[test]
fn test_chained_preprocessors_run_in_order() {
    let chain = PreprocessorSpec::Chain(vec![
        PreprocessorSpec::callable(|src, _| Ok((src.replace("NAME", "@who"), None))),
        "@ %".into(),
    ]);
    let source = "%set who = 'chain'\nhello NAME";
    let factory = TemplateFactory::new();
    assert_eq!(
        render(&factory, CompileRequest::new(source).preprocessors(chain)),
        "hello chain"
    );
}

#[test]
fn test_preprocessor_can_name_the_class() {
    let spec = PreprocessorSpec::callable(|src, identity| {
        assert!(identity.is_none());
        Ok((
            src.to_string(),
            Some(SourceIdentity {
                module_name: Some("named_by_preprocessor".to_string()),
                class_name: None,
            }),
        ))
    });
    let factory = TemplateFactory::new();
    let class = factory
        .compile(CompileRequest::new("x").preprocessors(spec))
        .unwrap();
    assert_eq!(class.module_name(), "named_by_preprocessor");
    assert_eq!(class.name(), "named_by_preprocessor");
}

#[test]
fn test_explicit_names_reach_the_preprocessor() {
    let spec = PreprocessorSpec::callable(|src, identity| {
        let identity = identity.cloned().unwrap_or_default();
        assert_eq!(identity.class_name.as_deref(), Some("Given"));
        Ok((src.to_string(), None))
    });
    let factory = TemplateFactory::new();
    let class = factory
        .compile(CompileRequest::new("x").class_name("Given").preprocessors(spec))
        .unwrap();
    assert_eq!(class.name(), "Given");
}

#[test]
fn test_invalid_specs_are_configuration_errors() {
    let factory = TemplateFactory::new();

    let err = factory
        .compile(CompileRequest::new("x").preprocessors("@"))
        .unwrap_err();
    assert!(matches!(err, TemplateError::Configuration { .. }));

    let err = factory
        .compile(CompileRequest::new("x").preprocessors(PreprocessorSettings::default()))
        .unwrap_err();
    assert!(matches!(err, TemplateError::Configuration { .. }));

    let bad_init_args = mapping(&[
        ("tokens", Value::from("@ %")),
        ("templateInitArgs", Value::Int(3)),
    ]);
    let err = factory
        .compile(CompileRequest::new("x").preprocessors(bad_init_args))
        .unwrap_err();
    assert!(
        matches!(err, TemplateError::Configuration { ref setting, .. } if setting == "templateInitArgs")
    );
}

#[test]
fn test_preprocessor_errors_propagate() {
    let spec = PreprocessorSpec::callable(|_, _| {
        Err(TemplateError::Configuration {
            setting: "custom".to_string(),
            message: "refused".to_string(),
        })
    });
    let factory = TemplateFactory::new();
    let err = factory
        .compile(CompileRequest::new("x").preprocessors(spec))
        .unwrap_err();
    assert!(matches!(err, TemplateError::Configuration { ref setting, .. } if setting == "custom"));
}
