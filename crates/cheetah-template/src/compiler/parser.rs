/*
 * parser.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Directive structure.
//!
//! Folds the scanner's chunks into a [`UnitModule`]: directives open and
//! close blocks on a frame stack, `#def`/`#block` bodies become class-level
//! methods (nested ones are flattened), and the remaining top-level content
//! becomes the main render method.

use super::CompileTarget;
use super::scanner::{Chunk, ChunkKind, Directive};
use crate::error::SyntaxError;
use crate::expr::{Arg, Expr, ExprError, ExprParser};
use crate::ir::{
    ClassDef, ExceptHandler, FunctionDef, Import, MethodKind, Param, Stmt, StmtKind, UnitModule,
};
use crate::settings::{CompilerSettings, DEFAULT_MAIN_METHOD_NAME};
use std::collections::HashSet;
use std::ops::Range;

/// Main method name used by templates that `#extends` another class, so
/// the inherited entry point keeps rendering the page.
pub(crate) const EXTENDS_MAIN_METHOD_NAME: &str = "writeBody";

/// Class names provided by the runtime; `#extends` never imports them.
pub(crate) const BUILTIN_CLASS_NAMES: &[&str] = &["Template", "dict", "object"];

/// Name of the keyword-argument collector on generated methods.
pub(crate) const KWARGS_NAME: &str = "KWS";

/// Deepest nesting of directive blocks.
const MAX_BLOCK_DEPTH: usize = 50;

/// The unit built from a template, plus what was detected on the way.
#[derive(Debug)]
pub(crate) struct ParsedUnit {
    pub module: UnitModule,
    pub detected_base: Option<String>,
}

pub(crate) fn build_unit(
    source: &str,
    chunks: Vec<Chunk>,
    settings: &CompilerSettings,
    target: &CompileTarget,
) -> Result<ParsedUnit, SyntaxError> {
    let mut builder = UnitBuilder {
        source,
        settings,
        imports: Vec::new(),
        extends: None,
        implements: None,
        attributes: Vec::new(),
        methods: Vec::new(),
        stack: vec![Frame {
            kind: FrameKind::Main,
            body: Vec::new(),
            span: 0..0,
        }],
        decorator: None,
    };
    for chunk in chunks {
        builder.chunk(chunk)?;
    }
    builder.finish(target)
}

struct Frame {
    kind: FrameKind,
    body: Vec<Stmt>,
    /// Span of the directive that opened the frame.
    span: Range<usize>,
}

enum FrameKind {
    Main,
    Def {
        name: String,
        kind: MethodKind,
        params: Vec<Param>,
        block: bool,
    },
    If {
        branches: Vec<(Expr, Vec<Stmt>)>,
        /// Condition of the open branch; `None` once `#else` was seen.
        condition: Option<Expr>,
    },
    For {
        targets: Vec<String>,
        iter: Expr,
    },
    Try {
        body: Option<Vec<Stmt>>,
        handlers: Vec<ExceptHandler>,
        section: TrySection,
    },
}

enum TrySection {
    Body,
    Except {
        name: Option<String>,
        binding: Option<String>,
    },
    Finally,
}

impl FrameKind {
    fn end_name(&self) -> &'static str {
        match self {
            FrameKind::Main => "",
            FrameKind::Def { block: false, .. } => "def",
            FrameKind::Def { block: true, .. } => "block",
            FrameKind::If { .. } => "if",
            FrameKind::For { .. } => "for",
            FrameKind::Try { .. } => "try",
        }
    }
}

struct UnitBuilder<'a> {
    source: &'a str,
    settings: &'a CompilerSettings,
    imports: Vec<Import>,
    extends: Option<Vec<String>>,
    implements: Option<String>,
    attributes: Vec<(String, Expr)>,
    methods: Vec<(FunctionDef, Range<usize>)>,
    stack: Vec<Frame>,
    decorator: Option<(MethodKind, Range<usize>)>,
}

impl<'a> UnitBuilder<'a> {
    fn error(&self, message: impl Into<String>, span: Range<usize>) -> SyntaxError {
        SyntaxError::new(message, self.source, span)
    }

    fn open(&mut self, kind: FrameKind, span: Range<usize>) -> Result<(), SyntaxError> {
        // the main frame does not count
        if self.stack.len() > MAX_BLOCK_DEPTH {
            return Err(self.error("directives nested too deeply", span));
        }
        self.stack.push(Frame {
            kind,
            body: Vec::new(),
            span,
        });
        Ok(())
    }

    fn expr_error(&self, err: ExprError, directive: &Directive) -> SyntaxError {
        err.into_syntax(self.source, directive.args_start)
    }

    fn push(&mut self, kind: StmtKind) {
        if let Some(frame) = self.stack.last_mut() {
            frame.body.push(Stmt::new(kind));
        }
    }

    fn at_top_level(&self) -> bool {
        self.stack.len() == 1
    }

    fn chunk(&mut self, chunk: Chunk) -> Result<(), SyntaxError> {
        if let Some((_, span)) = &self.decorator {
            let allowed = match &chunk.kind {
                ChunkKind::Directive(d) => d.name == "def",
                ChunkKind::Text(text) => text.trim().is_empty(),
                ChunkKind::Placeholder(_) => false,
            };
            if !allowed {
                return Err(self.error("a method decorator must be followed by #def", span.clone()));
            }
        }
        match chunk.kind {
            ChunkKind::Text(text) => {
                self.push(StmtKind::Write(text));
                Ok(())
            }
            ChunkKind::Placeholder(expr) => {
                self.push(StmtKind::Emit(expr));
                Ok(())
            }
            ChunkKind::Directive(directive) => self.directive(directive, chunk.span),
        }
    }

    fn expression(&self, directive: &Directive) -> Result<Expr, SyntaxError> {
        if directive.args.is_empty() {
            return Err(self.error(
                format!("#{} needs an expression", directive.name),
                directive.args_start..directive.args_start + 1,
            ));
        }
        let mut parser = ExprParser::new(
            &directive.args,
            0,
            &self.settings.cheetah_var_start_token,
        );
        parser
            .expression()
            .and_then(|expr| parser.expect_end().map(|_| expr))
            .map_err(|err| self.expr_error(err, directive))
    }

    fn no_args(&self, directive: &Directive) -> Result<(), SyntaxError> {
        if directive.args.is_empty() {
            Ok(())
        } else {
            Err(self.error(
                format!("#{} takes no arguments", directive.name),
                directive.args_start..directive.args_start + directive.args.len(),
            ))
        }
    }

    fn directive(&mut self, directive: Directive, span: Range<usize>) -> Result<(), SyntaxError> {
        match directive.name.as_str() {
            "extends" => self.extends_directive(&directive, span),
            "implements" => {
                if !self.at_top_level() {
                    return Err(self.error("#implements must be at the top level", span));
                }
                let mut parser = self.parser(&directive);
                let name = parser
                    .variable_name()
                    .and_then(|n| parser.expect_end().map(|_| n))
                    .map_err(|e| self.expr_error(e, &directive))?;
                self.implements = Some(name);
                Ok(())
            }
            "import" | "from" => self.import_directive(&directive),
            "def" | "block" => self.def_directive(&directive, span),
            "@classmethod" | "@staticmethod" => {
                self.no_args(&directive)?;
                if self.decorator.is_some() {
                    return Err(self.error("only one method decorator is allowed", span));
                }
                let kind = if directive.name == "@classmethod" {
                    MethodKind::Class
                } else {
                    MethodKind::Static
                };
                self.decorator = Some((kind, span));
                Ok(())
            }
            "set" => self.set_directive(&directive),
            "attr" => {
                if !self.at_top_level() {
                    return Err(self.error("#attr must be at the top level", span));
                }
                let (name, value) = self.assignment(&directive)?;
                self.attributes.push((name, value));
                Ok(())
            }
            "if" => {
                let condition = self.expression(&directive)?;
                self.open(
                    FrameKind::If {
                        branches: Vec::new(),
                        condition: Some(condition),
                    },
                    span,
                )
            }
            "elif" => {
                let condition = self.expression(&directive)?;
                self.next_if_branch(Some(condition), &directive, span)
            }
            "else" => {
                self.no_args(&directive)?;
                self.next_if_branch(None, &directive, span)
            }
            "for" => self.for_directive(&directive, span),
            "try" => {
                self.no_args(&directive)?;
                self.open(
                    FrameKind::Try {
                        body: None,
                        handlers: Vec::new(),
                        section: TrySection::Body,
                    },
                    span,
                )
            }
            "except" => self.except_directive(&directive, span),
            "finally" => {
                self.no_args(&directive)?;
                let error = self.error("#finally without a matching #try", span.clone());
                let duplicate = self.error("#try has more than one #finally", span);
                let Some(frame) = self.stack.last_mut() else {
                    return Err(error);
                };
                let FrameKind::Try {
                    body,
                    handlers,
                    section,
                } = &mut frame.kind
                else {
                    return Err(error);
                };
                let current = std::mem::take(&mut frame.body);
                match std::mem::replace(section, TrySection::Finally) {
                    TrySection::Body => *body = Some(current),
                    TrySection::Except { name, binding } => handlers.push(ExceptHandler {
                        name,
                        binding,
                        body: current,
                    }),
                    TrySection::Finally => return Err(duplicate),
                }
                Ok(())
            }
            "return" => {
                if !self.in_method() {
                    return Err(self.error("#return outside of a #def", span));
                }
                let value = if directive.args.is_empty() {
                    None
                } else {
                    Some(self.expression(&directive)?)
                };
                self.push(StmtKind::Return(value));
                Ok(())
            }
            "pass" => {
                self.no_args(&directive)?;
                self.push(StmtKind::Pass);
                Ok(())
            }
            "break" | "continue" => {
                self.no_args(&directive)?;
                if !self.in_loop() {
                    return Err(self.error(format!("#{} outside of a #for", directive.name), span));
                }
                self.push(if directive.name == "break" {
                    StmtKind::Break
                } else {
                    StmtKind::Continue
                });
                Ok(())
            }
            "silent" => {
                let expr = self.expression(&directive)?;
                self.push(StmtKind::Eval(expr));
                Ok(())
            }
            "echo" => {
                let expr = self.expression(&directive)?;
                self.push(StmtKind::Emit(expr));
                Ok(())
            }
            "end" => self.end_directive(&directive, span),
            other => Err(self.error(format!("unsupported directive #{}", other), span)),
        }
    }

    /// Close the open `#if` branch and start the next one (`None` for
    /// `#else`).
    fn next_if_branch(
        &mut self,
        next: Option<Expr>,
        directive: &Directive,
        span: Range<usize>,
    ) -> Result<(), SyntaxError> {
        let open = matches!(
            self.stack.last(),
            Some(Frame {
                kind: FrameKind::If {
                    condition: Some(_),
                    ..
                },
                ..
            })
        );
        if !open {
            return Err(self.error(
                format!("#{} without a matching #if", directive.name),
                span,
            ));
        }
        if let Some(Frame {
            kind: FrameKind::If {
                branches,
                condition,
            },
            body,
            ..
        }) = self.stack.last_mut()
        {
            if let Some(previous) = std::mem::replace(condition, next) {
                branches.push((previous, std::mem::take(body)));
            }
        }
        Ok(())
    }

    fn parser<'d>(&'d self, directive: &'d Directive) -> ExprParser<'d> {
        ExprParser::new(&directive.args, 0, &self.settings.cheetah_var_start_token)
    }

    fn in_method(&self) -> bool {
        self.stack
            .iter()
            .any(|f| matches!(f.kind, FrameKind::Def { .. }))
    }

    fn in_loop(&self) -> bool {
        for frame in self.stack.iter().rev() {
            match frame.kind {
                FrameKind::For { .. } => return true,
                FrameKind::Def { .. } | FrameKind::Main => return false,
                _ => {}
            }
        }
        false
    }

    /// Parse `[$]name = expr`.
    fn assignment(&self, directive: &Directive) -> Result<(String, Expr), SyntaxError> {
        let mut parser = self.parser(directive);
        let result = parser.variable_name().and_then(|name| {
            parser.expect("=")?;
            let value = parser.expression()?;
            parser.expect_end()?;
            Ok((name, value))
        });
        result.map_err(|e| self.expr_error(e, directive))
    }

    fn set_directive(&mut self, directive: &Directive) -> Result<(), SyntaxError> {
        let mut parser = self.parser(directive);
        let global = parser.eat_keyword("global");
        let offset = parser.position();
        let rest = Directive {
            name: directive.name.clone(),
            args: directive.args[offset..].trim_start().to_string(),
            args_start: directive.args_start + offset
                + (directive.args[offset..].len() - directive.args[offset..].trim_start().len()),
        };
        let (name, value) = self.assignment(&rest)?;
        self.push(StmtKind::Set {
            name,
            value,
            global,
        });
        Ok(())
    }

    fn extends_directive(&mut self, directive: &Directive, span: Range<usize>) -> Result<(), SyntaxError> {
        if !self.at_top_level() {
            return Err(self.error("#extends must be at the top level", span));
        }
        if self.extends.is_some() {
            return Err(self.error("only one #extends is allowed", span));
        }
        let mut names = Vec::new();
        let mut parser = self.parser(directive);
        let result: Result<(), ExprError> = (|| {
            loop {
                names.push(parser.dotted_name()?);
                if parser.at(",") {
                    parser.expect(",")?;
                    continue;
                }
                return parser.expect_end();
            }
        })();
        result.map_err(|e| self.expr_error(e, directive))?;
        self.extends = Some(names);
        Ok(())
    }

    fn import_directive(&mut self, directive: &Directive) -> Result<(), SyntaxError> {
        let mut parser = self.parser(directive);
        let parsed: Result<Vec<Import>, ExprError> = (|| {
            let mut imports = Vec::new();
            if directive.name == "from" {
                let module = parser.dotted_name()?;
                if !parser.eat_keyword("import") {
                    parser.expect("import")?;
                }
                let mut names = Vec::new();
                loop {
                    parser.skip_ws();
                    let name = parser.identifier()?;
                    let alias = if parser.eat_keyword("as") {
                        parser.skip_ws();
                        Some(parser.identifier()?)
                    } else {
                        None
                    };
                    names.push((name, alias));
                    if !parser.at(",") {
                        break;
                    }
                    parser.expect(",")?;
                }
                imports.push(Import::From { module, names });
            } else {
                loop {
                    let path = parser.dotted_name()?;
                    let alias = if parser.eat_keyword("as") {
                        parser.skip_ws();
                        Some(parser.identifier()?)
                    } else {
                        None
                    };
                    imports.push(Import::Module { path, alias });
                    if !parser.at(",") {
                        break;
                    }
                    parser.expect(",")?;
                }
            }
            parser.expect_end()?;
            Ok(imports)
        })();
        let imports = parsed.map_err(|e| self.expr_error(e, directive))?;

        if self.at_top_level() || self.settings.use_legacy_import_mode {
            self.imports.extend(imports);
        } else {
            for import in imports {
                self.push(StmtKind::Import(import));
            }
        }
        Ok(())
    }

    fn def_directive(&mut self, directive: &Directive, span: Range<usize>) -> Result<(), SyntaxError> {
        let block = directive.name == "block";
        let kind = match self.decorator.take() {
            Some((_, decorator_span)) if block => {
                return Err(self.error("#block cannot be decorated", decorator_span));
            }
            Some((kind, _)) => kind,
            None => MethodKind::Instance,
        };

        let mut parser = self.parser(directive);
        let parsed: Result<(String, Vec<Param>), ExprError> = (|| {
            parser.skip_ws();
            let name = parser.identifier()?;
            let mut params = Vec::new();
            if parser.eat("(") {
                loop {
                    if parser.at(")") {
                        parser.expect(")")?;
                        break;
                    }
                    let param = parser.variable_name()?;
                    let default = if parser.at("=") {
                        parser.expect("=")?;
                        Some(parser.expression()?)
                    } else {
                        None
                    };
                    params.push(Param {
                        name: param,
                        default,
                    });
                    if parser.at(",") {
                        parser.expect(",")?;
                    } else {
                        parser.expect(")")?;
                        break;
                    }
                }
            }
            parser.expect_end()?;
            Ok((name, params))
        })();
        let (name, params) = parsed.map_err(|e| self.expr_error(e, directive))?;

        if block {
            self.push(StmtKind::Emit(Expr::Call(
                Box::new(Expr::Attr(Box::new(Expr::Name("self".to_string())), name.clone())),
                Vec::<Arg>::new(),
            )));
        }
        self.open(
            FrameKind::Def {
                name,
                kind,
                params,
                block,
            },
            span,
        )
    }

    fn for_directive(&mut self, directive: &Directive, span: Range<usize>) -> Result<(), SyntaxError> {
        let mut parser = self.parser(directive);
        let parsed: Result<(Vec<String>, Expr), ExprError> = (|| {
            let mut targets = vec![parser.variable_name()?];
            while parser.at(",") {
                parser.expect(",")?;
                targets.push(parser.variable_name()?);
            }
            if !parser.eat_keyword("in") {
                parser.expect("in")?;
            }
            let iter = parser.expression()?;
            parser.expect_end()?;
            Ok((targets, iter))
        })();
        let (targets, iter) = parsed.map_err(|e| self.expr_error(e, directive))?;
        self.open(FrameKind::For { targets, iter }, span)
    }

    fn except_directive(&mut self, directive: &Directive, span: Range<usize>) -> Result<(), SyntaxError> {
        let (name, binding) = if directive.args.is_empty() {
            (None, None)
        } else {
            let mut parser = self.parser(directive);
            let parsed: Result<(String, Option<String>), ExprError> = (|| {
                let name = parser.dotted_name()?;
                let binding = if parser.eat_keyword("as") || parser.at(",") {
                    parser.eat(",");
                    Some(parser.variable_name()?)
                } else {
                    None
                };
                parser.expect_end()?;
                Ok((name, binding))
            })();
            let (name, binding) = parsed.map_err(|e| self.expr_error(e, directive))?;
            (Some(name), binding)
        };

        let error = self.error("#except without a matching #try", span.clone());
        let late = self.error("#except after #finally", span);
        let Some(frame) = self.stack.last_mut() else {
            return Err(error);
        };
        let FrameKind::Try {
            body,
            handlers,
            section,
        } = &mut frame.kind
        else {
            return Err(error);
        };
        let current = std::mem::take(&mut frame.body);
        match std::mem::replace(section, TrySection::Except { name, binding }) {
            TrySection::Body => *body = Some(current),
            TrySection::Except { name, binding } => handlers.push(ExceptHandler {
                name,
                binding,
                body: current,
            }),
            TrySection::Finally => return Err(late),
        }
        Ok(())
    }

    fn end_directive(&mut self, directive: &Directive, span: Range<usize>) -> Result<(), SyntaxError> {
        if self.at_top_level() {
            return Err(self.error(
                format!("#end {} without an open block", directive.args),
                span,
            ));
        }
        let Some(frame) = self.stack.pop() else {
            return Err(self.error("#end without an open block", span));
        };
        let expected = frame.kind.end_name();
        if !directive.args.is_empty() && directive.args != expected {
            let opened = SyntaxError::new("", self.source, frame.span.clone());
            return Err(self.error(
                format!(
                    "#end {} does not match #{} opened at line {}",
                    directive.args, expected, opened.line
                ),
                span,
            ));
        }

        match frame.kind {
            FrameKind::Main => Ok(()),
            FrameKind::Def {
                name,
                kind,
                params,
                ..
            } => {
                let def = FunctionDef {
                    name,
                    kind,
                    params,
                    kwargs: Some(KWARGS_NAME.to_string()),
                    body: frame.body,
                    line: 0,
                };
                self.methods.push((def, frame.span));
                Ok(())
            }
            FrameKind::If {
                mut branches,
                condition,
            } => {
                let otherwise = match condition {
                    Some(condition) => {
                        branches.push((condition, frame.body));
                        None
                    }
                    None => Some(frame.body),
                };
                self.push(StmtKind::If {
                    branches,
                    otherwise,
                });
                Ok(())
            }
            FrameKind::For { targets, iter } => {
                self.push(StmtKind::For {
                    targets,
                    iter,
                    body: frame.body,
                });
                Ok(())
            }
            FrameKind::Try {
                body,
                mut handlers,
                section,
            } => {
                let (body, finally) = match section {
                    TrySection::Body => {
                        return Err(self.error("#try needs an #except or #finally", frame.span));
                    }
                    TrySection::Except { name, binding } => {
                        handlers.push(ExceptHandler {
                            name,
                            binding,
                            body: frame.body,
                        });
                        (body.unwrap_or_default(), None)
                    }
                    TrySection::Finally => (body.unwrap_or_default(), Some(frame.body)),
                };
                self.push(StmtKind::Try {
                    body,
                    handlers,
                    finally,
                });
                Ok(())
            }
        }
    }

    fn finish(mut self, target: &CompileTarget) -> Result<ParsedUnit, SyntaxError> {
        if let Some((_, span)) = self.decorator.take() {
            return Err(self.error("a method decorator must be followed by #def", span));
        }
        if self.stack.len() > 1 {
            if let Some(frame) = self.stack.last() {
                return Err(self.error(
                    format!("unterminated #{}", frame.kind.end_name()),
                    frame.span.clone(),
                ));
            }
        }
        let main_body = self.stack.pop().map(|f| f.body).unwrap_or_default();

        // bases
        let mut detected_base = None;
        let bases = match self.extends.take() {
            Some(names) => {
                let mut bases = Vec::new();
                let bound: HashSet<String> =
                    self.imports.iter().flat_map(|i| i.bound_names()).collect();
                for name in names {
                    let auto_import = self.settings.auto_import_for_extends_directive
                        && !BUILTIN_CLASS_NAMES.contains(&name.as_str())
                        && !bound.contains(&name);
                    let base = if auto_import {
                        let (module, class) = match name.rsplit_once('.') {
                            Some((module, class)) => (module.to_string(), class.to_string()),
                            None => (name.clone(), name.clone()),
                        };
                        self.imports.push(Import::From {
                            module,
                            names: vec![(class.clone(), None)],
                        });
                        class
                    } else {
                        name
                    };
                    detected_base.get_or_insert_with(|| base.clone());
                    bases.push(base);
                }
                bases
            }
            None => vec![target.base_name.clone()],
        };

        let main_method = match self.implements.take() {
            Some(name) => name,
            None if detected_base.is_some()
                && self.settings.main_method_name == DEFAULT_MAIN_METHOD_NAME =>
            {
                EXTENDS_MAIN_METHOD_NAME.to_string()
            }
            None => self.settings.main_method_name.clone(),
        };

        let mut methods = vec![FunctionDef {
            name: main_method.clone(),
            kind: MethodKind::Instance,
            params: Vec::new(),
            kwargs: Some(KWARGS_NAME.to_string()),
            body: main_body,
            line: 0,
        }];
        let mut seen: HashSet<String> = HashSet::from([main_method.clone()]);
        for (def, span) in self.methods {
            if !seen.insert(def.name.clone()) {
                return Err(SyntaxError::new(
                    format!("method '{}' is defined more than once", def.name),
                    self.source,
                    span,
                ));
            }
            methods.push(def);
        }

        Ok(ParsedUnit {
            module: UnitModule {
                header: vec![
                    format!("module {}", target.module_name),
                    format!("class {}", target.class_name),
                ],
                imports: self.imports,
                class: ClassDef {
                    name: target.class_name.clone(),
                    bases,
                    main_method,
                    autocall: self.settings.use_autocalling,
                    attributes: self.attributes,
                    methods,
                },
            },
            detected_base,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::scanner::scan;
    use pretty_assertions::assert_eq;

    fn target() -> CompileTarget {
        CompileTarget {
            module_name: "m".to_string(),
            class_name: "C".to_string(),
            base_name: "Template".to_string(),
        }
    }

    fn build_with(source: &str, settings: &CompilerSettings) -> Result<ParsedUnit, SyntaxError> {
        let chunks = scan(source, settings)?;
        build_unit(source, chunks, settings, &target())
    }

    fn build(source: &str) -> Result<ParsedUnit, SyntaxError> {
        build_with(source, &CompilerSettings::default())
    }

    fn method<'u>(unit: &'u ParsedUnit, name: &str) -> &'u FunctionDef {
        unit.module
            .class
            .methods
            .iter()
            .find(|m| m.name == name)
            .unwrap_or_else(|| panic!("no method {}", name))
    }

    #[test]
    fn test_main_method_collects_top_level_content() {
        let unit = build("Hello $name").unwrap();
        let main = method(&unit, "respond");
        assert_eq!(main.body.len(), 2);
        assert_eq!(main.body[0].kind, StmtKind::Write("Hello ".to_string()));
    }

    #[test]
    fn test_nested_def_is_flattened() {
        let unit = build("#def outer\na\n#def inner\nb\n#end def\n#end def\n").unwrap();
        let names: Vec<&str> = unit
            .module
            .class
            .methods
            .iter()
            .map(|m| m.name.as_str())
            .collect();
        assert_eq!(names, vec!["respond", "inner", "outer"]);
    }

    #[test]
    fn test_decorators_set_method_kind() {
        let unit = build("#@classmethod\n#def a\n#end def\n#@staticmethod\n#def b\n#end def\n")
            .unwrap();
        assert_eq!(method(&unit, "a").kind, MethodKind::Class);
        assert_eq!(method(&unit, "b").kind, MethodKind::Static);
    }

    #[test]
    fn test_extends_auto_imports_and_renames_main() {
        let unit = build("#extends pkg.Base, Template\n").unwrap();
        assert_eq!(unit.module.class.bases, vec!["Base", "Template"]);
        assert_eq!(
            unit.module.imports,
            vec![Import::From {
                module: "pkg".to_string(),
                names: vec![("Base".to_string(), None)],
            }]
        );
        assert_eq!(unit.detected_base.as_deref(), Some("Base"));
        assert_eq!(unit.module.class.main_method, EXTENDS_MAIN_METHOD_NAME);
    }

    #[test]
    fn test_extends_without_auto_import() {
        let mut settings = CompilerSettings::default();
        settings.auto_import_for_extends_directive = false;
        let unit = build_with("#extends Template, Useless\n", &settings).unwrap();
        assert_eq!(unit.module.class.bases, vec!["Template", "Useless"]);
        assert!(unit.module.imports.is_empty());
    }

    #[test]
    fn test_implements_names_main_method() {
        let unit = build("#implements dummy\n$bar").unwrap();
        assert_eq!(unit.module.class.main_method, "dummy");
        assert_eq!(unit.module.class.bases, vec!["Template"]);
    }

    #[test]
    fn test_nested_import_placement() {
        let source = "#def f\n#try\n#import sys\n#except ImportError\nno\n#end try\n#end def\n";
        let legacy = build(source).unwrap();
        assert_eq!(legacy.module.imports.len(), 1);

        let mut settings = CompilerSettings::default();
        settings.use_legacy_import_mode = false;
        let in_place = build_with(source, &settings).unwrap();
        assert!(in_place.module.imports.is_empty());
        match &method(&in_place, "f").body[0].kind {
            StmtKind::Try { body, handlers, .. } => {
                assert!(matches!(body[0].kind, StmtKind::Import(_)));
                assert_eq!(handlers[0].name.as_deref(), Some("ImportError"));
            }
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn test_if_elif_else() {
        let unit = build("#if $a\n1\n#elif $b\n2\n#else\n3\n#end if\n").unwrap();
        match &method(&unit, "respond").body[0].kind {
            StmtKind::If {
                branches,
                otherwise,
            } => {
                assert_eq!(branches.len(), 2);
                assert!(otherwise.is_some());
            }
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn test_block_renders_in_place() {
        let unit = build("a\n#block content\nx\n#end block\nb").unwrap();
        let main = method(&unit, "respond");
        assert_eq!(main.body[1].kind.clone(), StmtKind::Emit(
            crate::expr::parse_expression("self.content()", "$").unwrap()
        ));
        assert!(unit.module.class.methods.iter().any(|m| m.name == "content"));
    }

    #[test]
    fn test_unterminated_def_reports_opening_line() {
        let err = build("text\n#def foo\nbody\n").unwrap_err();
        assert!(err.message.contains("unterminated #def"));
        assert_eq!(err.line, 2);
    }

    #[test]
    fn test_mismatched_end() {
        let err = build("#if $x\n#end def\n").unwrap_err();
        assert!(err.message.contains("does not match"));
        assert_eq!(err.line, 2);

        let err = build("#end if\n").unwrap_err();
        assert!(err.message.contains("without an open block"));
    }

    #[test]
    fn test_duplicate_method() {
        let err = build("#def a\n#end def\n#def a\n#end def\n").unwrap_err();
        assert!(err.message.contains("more than once"));
        assert_eq!(err.line, 3);
    }

    #[test]
    fn test_dangling_decorator() {
        let err = build("#@classmethod\nfoo\n").unwrap_err();
        assert!(err.message.contains("decorator"));
    }

    #[test]
    fn test_break_outside_loop() {
        assert!(build("#break\n").is_err());
        assert!(build("#for $i in [1]\n#break\n#end for\n").is_ok());
    }

    #[test]
    fn test_bad_expression_points_into_directive() {
        let err = build("ok\n#set x = (1 +\n").unwrap_err();
        assert_eq!(err.line, 2);
    }

    #[test]
    fn test_directive_nesting_limit() {
        let nested = |depth: usize| {
            format!("{}x\n{}", "#if True\n".repeat(depth), "#end if\n".repeat(depth))
        };
        assert!(build(&nested(MAX_BLOCK_DEPTH)).is_ok());
        let err = build(&nested(1000)).unwrap_err();
        assert_eq!(err.message, "directives nested too deeply");
        assert_eq!(err.line, MAX_BLOCK_DEPTH + 1);

        let loops = "#for $i in [1]\n".repeat(MAX_BLOCK_DEPTH) + "#def f\n";
        let err = build(&loops).unwrap_err();
        assert_eq!(err.message, "directives nested too deeply");
        assert_eq!(err.line, MAX_BLOCK_DEPTH + 1);
    }
}
