/*
 * error.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Error types for template compilation, loading and rendering.
//!
//! Compilation failures ([`TemplateError`]) are kept apart from failures
//! raised by the template's own logic while it renders ([`RenderError`]),
//! so a defect in generated code is never mistaken for a missing variable.

use std::fmt;
use std::ops::Range;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by the compile/subclass pipeline.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// A preprocessor spec or compiler setting is malformed.
    #[error("Configuration error in '{setting}': {message}")]
    Configuration { setting: String, message: String },

    /// Malformed template directive structure.
    #[error("{0}")]
    Syntax(Box<SyntaxError>),

    /// A base class (or import) name could not be resolved.
    #[error("Cannot resolve '{name}' while loading module '{module}'")]
    NameResolution { name: String, module: String },

    /// A renamed main method collides with an inherited member.
    #[error("Main method name '{name}' collides with a member inherited from '{base}'")]
    NameConflict { name: String, base: String },

    /// Generated code failed to load. This is a compiler defect, not a
    /// template error.
    #[error("Generated code for module '{module}' failed to load at line {line}: {message}")]
    CodeGeneration {
        module: String,
        line: usize,
        message: String,
    },

    /// Error raised by template logic (at render time, or while evaluating
    /// class attributes during load).
    #[error(transparent)]
    Render(#[from] RenderError),

    /// I/O error (e.g., writing a traceback module file).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TemplateError {
    pub(crate) fn configuration(setting: impl Into<String>, message: impl Into<String>) -> Self {
        TemplateError::Configuration {
            setting: setting.into(),
            message: message.into(),
        }
    }

    /// The syntax error details, if this is a syntax error.
    pub fn as_syntax(&self) -> Option<&SyntaxError> {
        match self {
            TemplateError::Syntax(err) => Some(err),
            _ => None,
        }
    }
}

impl From<SyntaxError> for TemplateError {
    fn from(err: SyntaxError) -> Self {
        TemplateError::Syntax(Box::new(err))
    }
}

/// Result type for pipeline operations.
pub type TemplateResult<T> = Result<T, TemplateError>;

/// A template syntax error with its position in the template source.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxError {
    /// Human-readable description.
    pub message: String,
    /// 1-based line number.
    pub line: usize,
    /// 1-based column, counted in characters.
    pub column: usize,
    /// Byte range of the offending construct.
    pub span: Range<usize>,
    source: Arc<str>,
}

impl SyntaxError {
    pub(crate) fn new(message: impl Into<String>, source: &str, span: Range<usize>) -> Self {
        let start = span.start.min(source.len());
        let before = &source[..start];
        let line = before.matches('\n').count() + 1;
        let line_start = before.rfind('\n').map_or(0, |i| i + 1);
        let column = source[line_start..start].chars().count() + 1;
        Self {
            message: message.into(),
            line,
            column,
            span: start..span.end.clamp(start, source.len()),
            source: Arc::from(source),
        }
    }

    /// The full text of the line the error points at.
    pub fn excerpt(&self) -> &str {
        self.source.lines().nth(self.line - 1).unwrap_or("")
    }

    /// Render the error as an annotated source report.
    pub fn to_report(&self) -> String {
        use ariadne::{Config, Label, Report, ReportKind, Source};

        let name = "<template>".to_string();
        // ariadne spans count characters, not bytes
        let char_start = self.source[..self.span.start].chars().count();
        let char_end = char_start + self.source[self.span.clone()].chars().count().max(1);

        let report = Report::build(ReportKind::Error, name.clone(), char_start)
            .with_config(Config::default().with_color(false))
            .with_message(&self.message)
            .with_label(Label::new((name.clone(), char_start..char_end)).with_message(&self.message))
            .finish();

        let mut output = Vec::new();
        match report.write((name, Source::from(&*self.source)), &mut output) {
            Ok(()) => String::from_utf8_lossy(&output).into_owned(),
            Err(_) => self.to_string(),
        }
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Syntax error at line {}, column {}: {}\n    {}\n    {}^",
            self.line,
            self.column,
            self.message,
            self.excerpt(),
            " ".repeat(self.column - 1)
        )
    }
}

impl std::error::Error for SyntaxError {}

/// Kinds of errors raised while a compiled template runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderErrorKind {
    /// Placeholder lookup failed through the whole search list.
    NotFound,
    NameError,
    ImportError,
    TypeError,
    ValueError,
    KeyError,
    IndexError,
    AttributeError,
    ZeroDivisionError,
    OverflowError,
    /// Template methods nested deeper than the interpreter allows.
    RecursionError,
}

impl RenderErrorKind {
    /// The exception name matched by `#except` clauses.
    pub fn name(&self) -> &'static str {
        match self {
            RenderErrorKind::NotFound => "NotFound",
            RenderErrorKind::NameError => "NameError",
            RenderErrorKind::ImportError => "ImportError",
            RenderErrorKind::TypeError => "TypeError",
            RenderErrorKind::ValueError => "ValueError",
            RenderErrorKind::KeyError => "KeyError",
            RenderErrorKind::IndexError => "IndexError",
            RenderErrorKind::AttributeError => "AttributeError",
            RenderErrorKind::ZeroDivisionError => "ZeroDivisionError",
            RenderErrorKind::OverflowError => "OverflowError",
            RenderErrorKind::RecursionError => "RecursionError",
        }
    }

    fn is_lookup(&self) -> bool {
        matches!(
            self,
            RenderErrorKind::NotFound | RenderErrorKind::KeyError | RenderErrorKind::IndexError
        )
    }

    fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            RenderErrorKind::ZeroDivisionError | RenderErrorKind::OverflowError
        )
    }
}

/// One frame of a render-time traceback.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceFrame {
    pub module: String,
    pub class: String,
    pub method: String,
    /// 1-based line in the generated code.
    pub line: usize,
    /// The generated source line, when the code text is available.
    pub source_line: Option<String>,
}

/// An error raised by template logic while rendering.
#[derive(Debug, Clone, Error)]
#[error("{}: {}", .kind.name(), .message)]
pub struct RenderError {
    pub kind: RenderErrorKind,
    pub message: String,
    /// Innermost frame first.
    pub traceback: Vec<TraceFrame>,
    pending_line: Option<usize>,
}

impl RenderError {
    pub fn new(kind: RenderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            traceback: Vec::new(),
            pending_line: None,
        }
    }

    pub(crate) fn not_found(name: &str) -> Self {
        Self::new(
            RenderErrorKind::NotFound,
            format!("cannot find '{}'", name),
        )
    }

    pub(crate) fn type_error(message: impl Into<String>) -> Self {
        Self::new(RenderErrorKind::TypeError, message)
    }

    /// Whether an `#except <name>` clause catches this error.
    pub fn matches(&self, name: &str) -> bool {
        match name {
            "Exception" => true,
            "LookupError" => self.kind.is_lookup(),
            "ArithmeticError" => self.kind.is_arithmetic(),
            _ => self.kind.name() == name,
        }
    }

    /// Record the generated-code line of the statement that failed, unless
    /// an inner statement already did.
    pub(crate) fn at_line(mut self, line: usize) -> Self {
        if self.pending_line.is_none() {
            self.pending_line = Some(line);
        }
        self
    }

    pub(crate) fn push_frame(
        &mut self,
        module: &str,
        class: &str,
        method: &str,
        source: Option<&str>,
    ) {
        let line = self.pending_line.take().unwrap_or(0);
        let source_line = source
            .and_then(|text| line.checked_sub(1).and_then(|i| text.lines().nth(i)))
            .map(|l| l.trim().to_string());
        self.traceback.push(TraceFrame {
            module: module.to_string(),
            class: class.to_string(),
            method: method.to_string(),
            line,
            source_line,
        });
    }

    /// Python-style traceback text, outermost frame first.
    pub fn traceback_text(&self) -> String {
        let mut out = String::from("Traceback (most recent call last):\n");
        for frame in self.traceback.iter().rev() {
            out.push_str(&format!(
                "  Module {}, line {}, in {}.{}\n",
                frame.module, frame.line, frame.class, frame.method
            ));
            if let Some(line) = &frame.source_line {
                out.push_str(&format!("    {}\n", line));
            }
        }
        out.push_str(&self.to_string());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syntax_error_position() {
        let source = "line one\n  #end def\n";
        let err = SyntaxError::new("no open block", source, 11..19);
        assert_eq!(err.line, 2);
        assert_eq!(err.column, 3);
        assert_eq!(err.excerpt(), "  #end def");
    }

    #[test]
    fn test_syntax_error_display_has_excerpt_and_caret() {
        let err = SyntaxError::new("bad", "abc\nxyz", 5..6);
        let text = err.to_string();
        assert!(text.contains("line 2, column 2"));
        assert!(text.contains("    xyz\n     ^"));
    }

    #[test]
    fn test_syntax_error_report_mentions_message() {
        let err = SyntaxError::new("unterminated #def", "#def foo\nbody\n", 0..8);
        let report = err.to_report();
        assert!(report.contains("unterminated #def"));
        assert!(report.contains("#def foo"));
    }

    #[test]
    fn test_render_error_matching() {
        let err = RenderError::not_found("foo");
        assert!(err.matches("NotFound"));
        assert!(err.matches("LookupError"));
        assert!(err.matches("Exception"));
        assert!(!err.matches("ImportError"));
    }

    #[test]
    fn test_render_error_frames() {
        let mut err = RenderError::type_error("boom").at_line(2).at_line(5);
        err.push_frame("mod", "Cls", "respond", Some("a\n  emit($x)\nc"));
        assert_eq!(err.traceback[0].line, 2);
        assert_eq!(err.traceback[0].source_line.as_deref(), Some("emit($x)"));
        assert!(err.traceback_text().ends_with("TypeError: boom"));
    }
}
