/*
 * compile_api.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Tests for the compile / subclass entry points and their options.

use cheetah_template::{
    BaseClassRef, CallArgs, ClassRef, CompileRequest, InitArgs, Namespace, TemplateClass,
    TemplateError, TemplateFactory, Value, dict_class, template_class,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn foo() -> Namespace {
    let mut ns = Namespace::new();
    ns.insert("foo".to_string(), Value::Int(1234));
    ns
}

fn render_with_namespace(class: &ClassRef) -> String {
    class
        .instantiate(InitArgs::new().namespace(foo()))
        .unwrap()
        .render()
        .unwrap()
}

fn render_with_data(class: &ClassRef) -> String {
    class
        .instantiate(InitArgs::new().data(foo()))
        .unwrap()
        .render()
        .unwrap()
}

#[test]
fn test_basic_usage() {
    let factory = TemplateFactory::new();
    let class = factory.compile(CompileRequest::new("$foo")).unwrap();
    assert_eq!(render_with_namespace(&class), "1234");
}

#[test]
fn test_free_compile_uses_default_factory() {
    let class = cheetah_template::compile(CompileRequest::new("[$foo]")).unwrap();
    assert_eq!(render_with_namespace(&class), "[1234]");
    let again = cheetah_template::compile(CompileRequest::new("[$foo]")).unwrap();
    assert!(Arc::ptr_eq(&class, &again));
}

#[test]
fn test_base_class_variants() {
    let factory = TemplateFactory::new();

    let klass = factory
        .compile(CompileRequest::new("$foo").base_class(dict_class()))
        .unwrap();
    assert_eq!(render_with_data(&klass), "1234");

    let klass2 = factory
        .compile(CompileRequest::new("$foo").base_class(&klass))
        .unwrap();
    assert_eq!(render_with_data(&klass2), "1234");
    assert!(klass2.is_subclass_of(&klass));

    // `#implements` renames the main method; rendering uses the inherited one.
    let klass3 = factory
        .compile(CompileRequest::new("#implements dummy\n$bar").base_class(&klass2))
        .unwrap();
    assert_eq!(render_with_data(&klass3), "1234");

    let klass4 = factory
        .compile(CompileRequest::new("$foo").base_class("dict"))
        .unwrap();
    assert_eq!(render_with_data(&klass4), "1234");
}

#[test]
fn test_dict_data_needs_dict_base() {
    let factory = TemplateFactory::new();
    let class = factory.compile(CompileRequest::new("$foo")).unwrap();
    let err = class.instantiate(InitArgs::new().data(foo())).unwrap_err();
    match err {
        TemplateError::Render(e) => assert!(e.matches("TypeError")),
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_module_file_caching() {
    let dir = tempfile::tempdir().unwrap();
    let factory = TemplateFactory::new();
    let class = factory
        .compile(
            CompileRequest::new("$foo")
                .cache_module_files_for_tracebacks(true)
                .cache_dir_for_module_files(dir.path()),
        )
        .unwrap();
    let origin = class.origin().unwrap();
    assert!(origin.exists());
    assert_eq!(origin.parent(), Some(dir.path()));
    assert_eq!(
        origin.file_name().and_then(|n| n.to_str()),
        Some(format!("{}.unit", class.module_name()).as_str())
    );
}

#[test]
fn test_cache_hit_writes_requested_module_file() {
    let dir = tempfile::tempdir().unwrap();
    let factory = TemplateFactory::new();
    let plain = factory
        .compile(
            CompileRequest::new("$foo")
                .module_name("plain")
                .keep_ref_to_generated_code(false),
        )
        .unwrap();
    assert!(plain.origin().is_none());

    let traced = factory
        .compile(
            CompileRequest::new("$foo")
                .class_name("plain")
                .module_name("traced")
                .cache_module_files_for_tracebacks(true)
                .cache_dir_for_module_files(dir.path()),
        )
        .unwrap();
    assert!(Arc::ptr_eq(&plain, &traced));
    let origin = traced.origin().unwrap().to_path_buf();
    assert_eq!(origin, dir.path().join("traced.unit"));
    let code = std::fs::read_to_string(&origin).unwrap();
    assert!(code.contains("class plain("));
    let module = factory.modules().get("traced").unwrap();
    assert_eq!(module.origin(), Some(origin.as_path()));
    assert_eq!(render_with_namespace(&traced), "1234");
}

#[test]
fn test_class_name_arg() {
    let factory = TemplateFactory::new();
    let class = factory
        .compile(CompileRequest::new("$foo").class_name("foo123"))
        .unwrap();
    assert_eq!(class.name(), "foo123");
    assert_eq!(render_with_namespace(&class), "1234");
}

#[test]
fn test_module_name_arg() {
    let factory = TemplateFactory::new();
    let class = factory
        .compile(CompileRequest::new("$foo").module_name("foo99"))
        .unwrap();
    assert!(factory.modules().contains("foo99"));
    assert_eq!(class.name(), "foo99");
    assert_eq!(render_with_namespace(&class), "1234");

    let class = factory
        .compile(CompileRequest::new("$foo").module_name("foo1").class_name("foo2"))
        .unwrap();
    assert!(factory.modules().contains("foo1"));
    assert_eq!(class.name(), "foo2");
    assert_eq!(class.module_name(), "foo1");
    assert_eq!(render_with_namespace(&class), "1234");

    let module = factory.modules().get("foo1").unwrap();
    assert!(module.get("foo2").is_some());
}

#[test]
fn test_cache_hit_registers_requested_module() {
    let factory = TemplateFactory::new();
    let first = factory
        .compile(CompileRequest::new("$foo").class_name("X").module_name("m1"))
        .unwrap();
    let second = factory
        .compile(CompileRequest::new("$foo").class_name("X").module_name("m2"))
        .unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(second.module_name(), "m1");
    assert!(factory.modules().contains("m1"));
    assert!(factory.modules().contains("m2"));

    match factory.modules().import_from("m2", "X").unwrap() {
        Value::Class(class) => assert!(Arc::ptr_eq(&class, &first)),
        other => panic!("unexpected value {:?}", other),
    }
    let user = factory
        .compile(CompileRequest::new("#from m2 import X\n${X(dict(foo=5))}"))
        .unwrap();
    let output = user.instantiate(InitArgs::new()).unwrap().render().unwrap();
    assert_eq!(output, "5");
}

#[test]
fn test_main_method_name_arg() {
    let factory = TemplateFactory::new();
    let class = factory
        .compile(
            CompileRequest::new("$foo")
                .class_name("foo123")
                .main_method_name("testMeth"),
        )
        .unwrap();
    assert_eq!(class.name(), "foo123");
    let inst = class.instantiate(InitArgs::new().namespace(foo())).unwrap();
    assert_eq!(inst.render().unwrap(), "1234");
    assert_eq!(
        inst.call_method("testMeth", CallArgs::new()).unwrap(),
        Value::from("1234")
    );

    let class = factory
        .compile(
            CompileRequest::new("$foo")
                .module_name("fooXXX")
                .class_name("foo123")
                .main_method_name("testMeth")
                .base_class(dict_class()),
        )
        .unwrap();
    let inst = class.instantiate(InitArgs::new().data(foo())).unwrap();
    assert_eq!(inst.render().unwrap(), "1234");
    assert_eq!(
        inst.call_method("testMeth", CallArgs::new()).unwrap(),
        Value::from("1234")
    );
}

#[test]
fn test_main_method_name_conflict() {
    let factory = TemplateFactory::new();
    let err = factory
        .compile(CompileRequest::new("$foo").main_method_name("getVar"))
        .unwrap_err();
    assert!(matches!(err, TemplateError::NameConflict { ref name, .. } if name == "getVar"));
}

#[test]
fn test_module_globals_arg() {
    let factory = TemplateFactory::new();

    let class = factory
        .compile(CompileRequest::new("$foo").module_globals(foo()))
        .unwrap();
    let inst = class.instantiate(InitArgs::new()).unwrap();
    assert_eq!(inst.render().unwrap(), "1234");

    let class2 = factory
        .compile(
            CompileRequest::new("$foo")
                .base_class("Test1")
                .module_global("Test1", dict_class()),
        )
        .unwrap();
    assert_eq!(render_with_data(&class2), "1234");

    let class3 = factory
        .compile(
            CompileRequest::new("$foo")
                .base_class("Test1")
                .module_global("Test1", dict_class())
                .module_global("foo", 1234),
        )
        .unwrap();
    let inst = class3.instantiate(InitArgs::new()).unwrap();
    assert_eq!(inst.render().unwrap(), "1234");
}

#[test]
fn test_unknown_base_name() {
    let factory = TemplateFactory::new();
    let err = factory
        .compile(CompileRequest::new("$foo").base_class(BaseClassRef::ByName("Nowhere".into())))
        .unwrap_err();
    assert!(matches!(err, TemplateError::NameResolution { ref name, .. } if name == "Nowhere"));
}

#[test]
fn test_keep_ref_to_generated_code_arg() {
    let factory = TemplateFactory::new();

    let klass = factory
        .compile(
            CompileRequest::new("$foo")
                .class_name("unique58")
                .cache_compilation_results(false)
                .keep_ref_to_generated_code(false),
        )
        .unwrap();
    let inst = klass.instantiate(InitArgs::new().namespace(foo())).unwrap();
    assert_eq!(inst.render().unwrap(), "1234");
    assert!(inst.generated_module_code().is_none());

    let klass2 = factory
        .compile(
            CompileRequest::new("$foo")
                .class_name("unique58")
                .keep_ref_to_generated_code(true),
        )
        .unwrap();
    let inst = klass2.instantiate(InitArgs::new().namespace(foo())).unwrap();
    assert_eq!(inst.render().unwrap(), "1234");
    assert!(inst.generated_module_code().is_some());

    // Served from the cache, so the code reference is still there.
    let klass3 = factory
        .compile(
            CompileRequest::new("$foo")
                .class_name("unique58")
                .keep_ref_to_generated_code(false),
        )
        .unwrap();
    assert!(Arc::ptr_eq(&klass2, &klass3));
    let inst = klass3.instantiate(InitArgs::new().namespace(foo())).unwrap();
    assert!(inst.generated_module_code().is_some());
}

#[test]
fn test_compilation_cache_flags() {
    let factory = TemplateFactory::new();

    let klass = factory
        .compile(
            CompileRequest::new("$foo")
                .class_name("unique111")
                .cache_compilation_results(false),
        )
        .unwrap();
    assert_eq!(render_with_namespace(&klass), "1234");
    assert!(!klass.is_in_compilation_cache());
    assert!(factory.cache().is_empty());

    let klass = factory
        .compile(
            CompileRequest::new("$foo")
                .class_name("unique111")
                .cache_compilation_results(true),
        )
        .unwrap();
    assert_eq!(render_with_namespace(&klass), "1234");
    assert!(klass.is_in_compilation_cache());

    let klass = factory
        .compile(CompileRequest::new("$foo").class_name("unique999099"))
        .unwrap();
    assert!(klass.is_in_compilation_cache());
    assert_eq!(factory.cache().len(), 2);
}

#[test]
fn test_different_settings_do_not_share_cache_entries() {
    let factory = TemplateFactory::new();
    let a = factory.compile(CompileRequest::new("$foo")).unwrap();
    let b = factory
        .compile(CompileRequest::new("$foo").compiler_setting("useAutocalling", false))
        .unwrap();
    assert!(!Arc::ptr_eq(&a, &b));
}

#[test]
fn test_subclass_chain() {
    let factory = TemplateFactory::new();
    let klass = factory
        .compile(CompileRequest::new("$foo").base_class(dict_class()))
        .unwrap();
    assert_eq!(render_with_data(&klass), "1234");

    let klass2 = klass.subclass(CompileRequest::new("$foo")).unwrap();
    assert_eq!(render_with_data(&klass2), "1234");
    assert!(factory.modules().contains(klass2.module_name()));

    let klass3 = klass2
        .subclass(CompileRequest::new("#implements dummy\n$bar"))
        .unwrap();
    assert_eq!(render_with_data(&klass3), "1234");
    assert!(klass3.is_subclass_of(&klass));
}

#[test]
fn test_class_and_static_methods() {
    let factory = TemplateFactory::new();
    let source = "
            #@classmethod
            #def myClassMethod()
                #return '$foo = %s' % $foo
            #end def
        ";
    let class = factory.compile(CompileRequest::new(source)).unwrap();
    let rc = class
        .call_method("myClassMethod", CallArgs::new().kwarg("foo", "bar"))
        .unwrap();
    assert_eq!(rc, Value::from("$foo = bar"));

    let source = "
            #@staticmethod
            #def myStaticMethod()
                #return '$foo = %s' % $foo
            #end def
        ";
    let class = factory.compile(CompileRequest::new(source)).unwrap();
    let rc = class
        .call_method("myStaticMethod", CallArgs::new().kwarg("foo", "bar"))
        .unwrap();
    assert_eq!(rc, Value::from("$foo = bar"));
}

#[test]
fn test_multiple_inheritance() {
    let useless = TemplateClass::native("Useless")
        .method("boink", |_| Ok(Value::from(vec![1, 2, 3])))
        .build()
        .unwrap();
    let source = "
            #extends Template, Useless
            #def foo()
                #return [4,5] + $boink()
            #end def
        ";
    let factory = TemplateFactory::new();
    let class = factory
        .compile(
            CompileRequest::new(source)
                .module_global("Useless", useless.clone())
                .compiler_setting("autoImportForExtendsDirective", false),
        )
        .unwrap();
    assert!(class.is_subclass_of(&useless));
    let inst = class.instantiate(InitArgs::new()).unwrap();
    let result = inst.call_method("foo", CallArgs::new()).unwrap();
    assert_eq!(result, Value::from(vec![4, 5, 1, 2, 3]));
}

#[test]
fn test_native_subclass_attributes_are_searchable() {
    let sub = TemplateClass::native("Sub")
        .base(template_class())
        .attribute("greeting", "Hola")
        .build()
        .unwrap();
    let factory = TemplateFactory::new();
    let class = factory
        .subclass(&sub, CompileRequest::new("When we meet, I say \"${greeting}\""))
        .unwrap();
    let inst = class.instantiate(InitArgs::new()).unwrap();
    assert_eq!(inst.render().unwrap(), "When we meet, I say \"Hola\"");
}

#[test]
fn test_nested_import_in_try_block() {
    let source = "
            #def myFunction()
                Ahoy!
                #try
                    #import sys
                #except ImportError
                    $print \"This will never happen!\"
                #end try
            #end def
            ";
    let factory = TemplateFactory::new();
    let class = factory
        .compile(CompileRequest::new(source).compiler_setting("useLegacyImportMode", false))
        .unwrap();
    let inst = class.instantiate(InitArgs::new().namespace(foo())).unwrap();
    let output = inst.call_method("myFunction", CallArgs::new()).unwrap();
    assert!(output.to_display_string().contains("Ahoy!"));
    assert!(!output.to_display_string().contains("never"));
}

#[test]
fn test_syntax_errors_surface_with_location() {
    let factory = TemplateFactory::new();
    let err = factory
        .compile(CompileRequest::new("line one\n#if $x\nunterminated\n"))
        .unwrap_err();
    let syntax = err.as_syntax().unwrap();
    assert_eq!(syntax.line, 2);
    assert!(factory.cache().is_empty());
}

#[test]
fn test_render_errors_carry_a_traceback() {
    let factory = TemplateFactory::new();
    let class = factory
        .compile(CompileRequest::new("#def boom()\n$missing\n#end def\n$boom()"))
        .unwrap();
    let inst = class.instantiate(InitArgs::new()).unwrap();
    match inst.render().unwrap_err() {
        TemplateError::Render(e) => {
            assert!(e.matches("NotFound"));
            assert!(e.traceback.iter().any(|frame| frame.method == "boom"));
            assert!(e.traceback_text().starts_with("Traceback"));
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_concurrent_compiles_share_one_cache() {
    let factory = TemplateFactory::new();
    std::thread::scope(|scope| {
        for t in 0..8 {
            let factory = &factory;
            scope.spawn(move || {
                for i in 0..20 {
                    let n = (t + i) % 5;
                    let class = factory
                        .compile(
                            CompileRequest::new(format!("{}:$foo", n))
                                .class_name(format!("Concurrent{}", n)),
                        )
                        .unwrap();
                    assert_eq!(class.name(), format!("Concurrent{}", n));
                    assert_eq!(render_with_namespace(&class), format!("{}:1234", n));
                }
            });
        }
    });
    assert_eq!(factory.cache().len(), 5);
    let again = factory
        .compile(CompileRequest::new("3:$foo").class_name("Concurrent3"))
        .unwrap();
    assert!(again.is_in_compilation_cache());
    assert_eq!(factory.cache().len(), 5);
}
