/*
 * mod.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Source compiler.
//!
//! Turns template source into generated unit code in three passes:
//!
//! 1. [`scanner`] splits the source into text, placeholders and directives
//!    using the configured tokens,
//! 2. [`parser`] folds directives into the unit IR,
//! 3. [`codegen`] prints the IR as generated code.

pub mod codegen;
pub(crate) mod parser;
pub(crate) mod scanner;

use crate::error::TemplateResult;
use crate::ir::Import;
use crate::settings::CompilerSettings;

/// The resolved (module, class) pair naming a compiled unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnitIdentity {
    pub module_name: String,
    pub class_name: String,
}

/// What the compiler generates code for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileTarget {
    pub module_name: String,
    pub class_name: String,
    /// Base class name used when the source has no `#extends`.
    pub base_name: String,
}

/// Generated code plus what the compiler detected while producing it.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedArtifact {
    pub code: String,
    /// Primary base named by an `#extends` directive.
    pub detected_base: Option<String>,
    /// Names bound by module-level imports.
    pub detected_imports: Vec<String>,
    pub identity: UnitIdentity,
}

/// Compile template source into generated code.
pub fn compile_source(
    source: &str,
    settings: &CompilerSettings,
    target: &CompileTarget,
) -> TemplateResult<GeneratedArtifact> {
    let chunks = scanner::scan(source, settings)?;
    let unit = parser::build_unit(source, chunks, settings, target)?;
    let code = codegen::generate(&unit.module);
    tracing::trace!(
        module = %target.module_name,
        class = %target.class_name,
        bytes = code.len(),
        "generated unit code"
    );
    Ok(GeneratedArtifact {
        code,
        detected_base: unit.detected_base,
        detected_imports: unit
            .module
            .imports
            .iter()
            .flat_map(Import::bound_names)
            .collect(),
        identity: UnitIdentity {
            module_name: target.module_name.clone(),
            class_name: target.class_name.clone(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TemplateError;

    fn target() -> CompileTarget {
        CompileTarget {
            module_name: "mod1".to_string(),
            class_name: "Cls".to_string(),
            base_name: "Template".to_string(),
        }
    }

    #[test]
    fn test_compile_source_produces_code() {
        let artifact =
            compile_source("$foo", &CompilerSettings::default(), &target()).unwrap();
        assert!(artifact.code.contains("class Cls(Template):"));
        assert!(artifact.code.contains("emit($foo)"));
        assert_eq!(artifact.identity.module_name, "mod1");
        assert_eq!(artifact.detected_base, None);
    }

    #[test]
    fn test_detected_imports_and_base() {
        let artifact = compile_source(
            "#from lib import helper\n#extends basemod\n",
            &CompilerSettings::default(),
            &target(),
        )
        .unwrap();
        assert_eq!(artifact.detected_base.as_deref(), Some("basemod"));
        assert_eq!(artifact.detected_imports, vec!["helper", "basemod"]);
    }

    #[test]
    fn test_syntax_error_surfaces_as_template_error() {
        let err = compile_source("#def f\n", &CompilerSettings::default(), &target())
            .unwrap_err();
        assert!(matches!(err, TemplateError::Syntax(_)));
        assert_eq!(err.as_syntax().map(|e| e.line), Some(1));
    }
}
