/*
 * settings.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Compiler settings.
//!
//! Settings arrive as a loose `name -> value` mapping (the way template
//! authors and preprocessors write them) and are normalized into
//! [`CompilerSettings`]. Keys use the camelCase spelling of the original
//! template language (`cheetahVarStartToken`, `useLegacyImportMode`, ...).
//! Unknown keys are ignored.

use crate::error::{TemplateError, TemplateResult};
use crate::value::Namespace;
use serde::{Deserialize, Serialize};

/// Name of the main render method when nothing renames it.
pub const DEFAULT_MAIN_METHOD_NAME: &str = "respond";

/// Normalized settings consumed by the source compiler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CompilerSettings {
    /// Token introducing a placeholder (`$foo`).
    pub cheetah_var_start_token: String,
    /// Token introducing a directive (`#if`).
    pub directive_start_token: String,
    /// Token that may close a directive before the end of its line.
    pub directive_end_token: String,
    /// Token introducing a comment that runs to the end of the line.
    pub comment_start_token: String,
    pub multi_line_comment_start_token: String,
    pub multi_line_comment_end_token: String,
    /// Hoist every nested `#import` to module scope.
    pub use_legacy_import_mode: bool,
    /// Generate an import for each name listed by `#extends`.
    pub auto_import_for_extends_directive: bool,
    /// Call placeholders that resolve to callables.
    pub use_autocalling: bool,
    /// Name of the generated main render method.
    pub main_method_name: String,
}

impl Default for CompilerSettings {
    fn default() -> Self {
        Self {
            cheetah_var_start_token: "$".to_string(),
            directive_start_token: "#".to_string(),
            directive_end_token: "#".to_string(),
            comment_start_token: "##".to_string(),
            multi_line_comment_start_token: "#*".to_string(),
            multi_line_comment_end_token: "*#".to_string(),
            use_legacy_import_mode: true,
            auto_import_for_extends_directive: true,
            use_autocalling: true,
            main_method_name: DEFAULT_MAIN_METHOD_NAME.to_string(),
        }
    }
}

impl CompilerSettings {
    /// Normalize a settings mapping.
    ///
    /// When `directiveStartToken` is given, the comment and end tokens
    /// that are not given are derived from it.
    pub fn from_mapping(mapping: &Namespace) -> TemplateResult<Self> {
        let mut object = serde_json::Map::new();
        for (key, value) in mapping {
            let json = value.to_json().ok_or_else(|| {
                TemplateError::configuration(
                    key,
                    format!("expected plain data, got {}", value.type_name()),
                )
            })?;
            object.insert(key.clone(), json);
        }

        if let Some(serde_json::Value::String(directive)) = object.get("directiveStartToken") {
            let directive = directive.clone();
            let derived = [
                ("directiveEndToken", directive.clone()),
                ("commentStartToken", directive.repeat(2)),
                ("multiLineCommentStartToken", format!("{}*", directive)),
                ("multiLineCommentEndToken", format!("*{}", directive)),
            ];
            for (key, token) in derived {
                object
                    .entry(key)
                    .or_insert(serde_json::Value::String(token));
            }
        }

        let settings: CompilerSettings = match serde_json::from_value(serde_json::Value::Object(
            object.clone(),
        )) {
            Ok(settings) => settings,
            Err(err) => return Err(blame_setting(&object, err)),
        };
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> TemplateResult<()> {
        let tokens = [
            ("cheetahVarStartToken", &self.cheetah_var_start_token),
            ("directiveStartToken", &self.directive_start_token),
            ("directiveEndToken", &self.directive_end_token),
            ("commentStartToken", &self.comment_start_token),
            ("multiLineCommentStartToken", &self.multi_line_comment_start_token),
            ("multiLineCommentEndToken", &self.multi_line_comment_end_token),
        ];
        for (key, token) in tokens {
            if token.is_empty() || token.chars().any(char::is_whitespace) {
                return Err(TemplateError::configuration(
                    key,
                    "tokens must be non-empty and contain no whitespace",
                ));
            }
        }
        if !crate::expr::is_identifier(&self.main_method_name) {
            return Err(TemplateError::configuration(
                "mainMethodName",
                format!("'{}' is not a valid identifier", self.main_method_name),
            ));
        }
        Ok(())
    }

    /// Canonical text used in compilation cache fingerprints.
    pub(crate) fn fingerprint(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Find which key made deserialization fail, so the error names it.
fn blame_setting(
    object: &serde_json::Map<String, serde_json::Value>,
    err: serde_json::Error,
) -> TemplateError {
    for (key, value) in object {
        let mut single = serde_json::Map::new();
        single.insert(key.clone(), value.clone());
        if let Err(key_err) =
            serde_json::from_value::<CompilerSettings>(serde_json::Value::Object(single))
        {
            return TemplateError::configuration(key, key_err.to_string());
        }
    }
    TemplateError::configuration("compilerSettings", err.to_string())
}
