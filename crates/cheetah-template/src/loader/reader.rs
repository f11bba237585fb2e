/*
 * reader.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Generated code reader.
//!
//! Parses generated unit code back into the IR, recording the line of
//! every statement so render-time tracebacks can point into the code.
//! Anything this reader rejects is a defect in the generated code.

use crate::expr::{Arg, Expr, ExprParser, Literal, MAX_NESTING};
use crate::ir::{
    ClassDef, ExceptHandler, FunctionDef, Import, MethodKind, Param, Stmt, StmtKind, UnitModule,
};

const INDENT_WIDTH: usize = 4;
const VAR_TOKEN: &str = "$";
/// Printed expressions are fully parenthesized, which at most doubles
/// their nesting.
const GENERATED_MAX_NESTING: usize = 2 * MAX_NESTING + 2;

/// A problem found in generated code.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ReadError {
    /// 1-based line in the generated code.
    pub line: usize,
    pub message: String,
}

type ReadResult<T> = Result<T, ReadError>;

#[derive(Clone, Copy)]
struct Line<'a> {
    number: usize,
    depth: usize,
    text: &'a str,
}

/// Read generated code into a unit module.
pub(crate) fn read_unit(code: &str) -> ReadResult<UnitModule> {
    let mut header = Vec::new();
    let mut lines = Vec::new();
    for (i, raw) in code.lines().enumerate() {
        let number = i + 1;
        let text = raw.trim_start_matches(' ');
        if text.trim().is_empty() {
            continue;
        }
        if let Some(comment) = text.strip_prefix('#') {
            if lines.is_empty() {
                header.push(comment.trim().to_string());
            }
            continue;
        }
        let indent = raw.len() - text.len();
        if text.starts_with('\t') || indent % INDENT_WIDTH != 0 {
            return Err(ReadError {
                line: number,
                message: "inconsistent indentation".to_string(),
            });
        }
        lines.push(Line {
            number,
            depth: indent / INDENT_WIDTH,
            text: text.trim_end(),
        });
    }

    let mut reader = Reader { lines, pos: 0 };
    let mut imports = Vec::new();
    while let Some(line) = reader.peek() {
        if line.depth != 0 {
            return Err(reader.error_at(line.number, "unexpected indent"));
        }
        if line.text.starts_with("class ") {
            break;
        }
        let line = reader.next_line()?;
        imports.push(read_import(line.text).map_err(|m| reader.error_at(line.number, m))?);
    }
    let class = reader.class()?;
    if let Some(line) = reader.peek() {
        return Err(reader.error_at(line.number, "unexpected statement after class body"));
    }
    Ok(UnitModule {
        header,
        imports,
        class,
    })
}

struct Reader<'a> {
    lines: Vec<Line<'a>>,
    pos: usize,
}

fn parser(text: &str) -> ExprParser<'_> {
    ExprParser::new(text, 0, VAR_TOKEN).with_max_depth(GENERATED_MAX_NESTING)
}

fn expr(text: &str) -> Result<Expr, String> {
    let mut parser = parser(text);
    parser
        .expression()
        .and_then(|expr| parser.expect_end().map(|()| expr))
        .map_err(|e| e.to_string())
}

fn identifier(text: &str) -> Result<String, String> {
    let text = text.trim();
    if crate::expr::is_identifier(text) {
        Ok(text.to_string())
    } else {
        Err(format!("'{}' is not an identifier", text))
    }
}

fn aliased(parser: &mut ExprParser<'_>) -> Result<Option<String>, String> {
    if parser.eat_keyword("as") {
        parser.skip_ws();
        parser.identifier().map(Some).map_err(|e| e.to_string())
    } else {
        Ok(None)
    }
}

fn read_import(text: &str) -> Result<Import, String> {
    let mut parser = parser(text);
    if parser.eat_keyword("import") {
        let path = parser.dotted_name().map_err(|e| e.to_string())?;
        let alias = aliased(&mut parser)?;
        parser.expect_end().map_err(|e| e.to_string())?;
        return Ok(Import::Module { path, alias });
    }
    if parser.eat_keyword("from") {
        let module = parser.dotted_name().map_err(|e| e.to_string())?;
        if !parser.eat_keyword("import") {
            return Err("expected 'import'".to_string());
        }
        let mut names = Vec::new();
        loop {
            parser.skip_ws();
            let name = parser.identifier().map_err(|e| e.to_string())?;
            names.push((name, aliased(&mut parser)?));
            if !parser.at(",") {
                break;
            }
            parser.eat(",");
        }
        parser.expect_end().map_err(|e| e.to_string())?;
        return Ok(Import::From { module, names });
    }
    Err(format!("expected an import, found '{}'", text))
}

impl<'a> Reader<'a> {
    fn peek(&self) -> Option<&Line<'a>> {
        self.lines.get(self.pos)
    }

    fn next_line(&mut self) -> ReadResult<Line<'a>> {
        let last = self.lines.last().map_or(0, |l| l.number);
        let line = *self.lines.get(self.pos).ok_or(ReadError {
            line: last,
            message: "unexpected end of code".to_string(),
        })?;
        self.pos += 1;
        Ok(line)
    }

    fn error_at(&self, line: usize, message: impl Into<String>) -> ReadError {
        ReadError {
            line,
            message: message.into(),
        }
    }

    /// Whether the next line sits at `depth` and starts with `prefix`.
    fn next_is(&self, depth: usize, prefix: &str) -> bool {
        self.peek()
            .is_some_and(|l| l.depth == depth && l.text.starts_with(prefix))
    }

    fn class(&mut self) -> ReadResult<ClassDef> {
        let line = self.next_line()?;
        let number = line.number;
        let header = line
            .text
            .strip_prefix("class ")
            .and_then(|t| t.strip_suffix("):"))
            .ok_or_else(|| self.error_at(number, "malformed class header"))?;
        let (name, bases) = header
            .split_once('(')
            .ok_or_else(|| self.error_at(number, "malformed class header"))?;
        let name = identifier(name).map_err(|m| self.error_at(number, m))?;
        let bases: Vec<String> = bases
            .split(',')
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty())
            .collect();
        if bases.is_empty() || !bases.iter().all(|b| crate::expr::is_dotted_name(b)) {
            return Err(self.error_at(number, "malformed base class list"));
        }

        let mut main_method = None;
        let mut autocall = true;
        let mut attributes = Vec::new();
        let mut methods = Vec::new();
        let mut decorator: Option<(MethodKind, usize)> = None;

        while let Some(line) = self.peek() {
            if line.depth == 0 {
                break;
            }
            if line.depth != 1 {
                return Err(self.error_at(line.number, "unexpected indent"));
            }
            let line = self.next_line()?;
            let (number, text) = (line.number, line.text);
            let fail = |m: String| ReadError {
                line: number,
                message: m,
            };
            if let Some(rest) = text.strip_prefix("main ") {
                main_method = Some(identifier(rest).map_err(fail)?);
            } else if let Some(rest) = text.strip_prefix("autocall ") {
                autocall = match rest.trim() {
                    "True" => true,
                    "False" => false,
                    other => return Err(fail(format!("bad autocall flag '{}'", other))),
                };
            } else if let Some(rest) = text.strip_prefix("attr ") {
                let (name, value) = rest
                    .split_once('=')
                    .ok_or_else(|| fail("expected 'attr name = value'".to_string()))?;
                attributes.push((identifier(name).map_err(fail)?, expr(value).map_err(fail)?));
            } else if text == "@classmethod" || text == "@staticmethod" {
                if decorator.is_some() {
                    return Err(fail("stacked decorators".to_string()));
                }
                let kind = if text == "@classmethod" {
                    MethodKind::Class
                } else {
                    MethodKind::Static
                };
                decorator = Some((kind, number));
            } else if text.starts_with("def ") {
                let kind = decorator.take().map_or(MethodKind::Instance, |(k, _)| k);
                methods.push(self.function(kind, number, text)?);
            } else {
                return Err(fail(format!("unexpected class member '{}'", text)));
            }
        }
        if let Some((_, line)) = decorator {
            return Err(self.error_at(line, "decorator without a method"));
        }
        let main_method = main_method.ok_or_else(|| self.error_at(number, "class has no main method"))?;
        if !methods.iter().any(|m: &FunctionDef| m.name == main_method) {
            return Err(self.error_at(number, format!("main method '{}' is not defined", main_method)));
        }
        Ok(ClassDef {
            name,
            bases,
            main_method,
            autocall,
            attributes,
            methods,
        })
    }

    fn function(&mut self, kind: MethodKind, number: usize, text: &str) -> ReadResult<FunctionDef> {
        let fail = |m: String| ReadError {
            line: number,
            message: m,
        };
        let header = text
            .strip_suffix(':')
            .ok_or_else(|| fail("expected ':' after def".to_string()))?;
        let mut parser = parser(header);
        parser.eat_keyword("def");
        parser.skip_ws();
        let name = parser.identifier().map_err(|e| fail(e.to_string()))?;
        parser.expect("(").map_err(|e| fail(e.to_string()))?;

        let receiver = match kind {
            MethodKind::Instance => Some("self"),
            MethodKind::Class => Some("cls"),
            MethodKind::Static => None,
        };
        if let Some(receiver) = receiver {
            parser.skip_ws();
            let first = parser.identifier().map_err(|e| fail(e.to_string()))?;
            if first != receiver {
                return Err(fail(format!("expected '{}' as first parameter", receiver)));
            }
            if !parser.at(")") {
                parser.expect(",").map_err(|e| fail(e.to_string()))?;
            }
        }

        let mut params = Vec::new();
        let mut kwargs = None;
        let parsed: Result<(), crate::expr::ExprError> = (|| {
            loop {
                if parser.at(")") {
                    parser.expect(")")?;
                    break;
                }
                if parser.eat("**") {
                    parser.skip_ws();
                    kwargs = Some(parser.identifier()?);
                    parser.expect(")")?;
                    break;
                }
                parser.skip_ws();
                let name = parser.identifier()?;
                let default = if parser.at("=") {
                    parser.expect("=")?;
                    Some(parser.expression()?)
                } else {
                    None
                };
                params.push(Param { name, default });
                if parser.at(",") {
                    parser.expect(",")?;
                } else {
                    parser.expect(")")?;
                    break;
                }
            }
            parser.expect_end()
        })();
        parsed.map_err(|e| fail(e.to_string()))?;

        let body = self.block(2)?;
        Ok(FunctionDef {
            name,
            kind,
            params,
            kwargs,
            body,
            line: number,
        })
    }

    /// Read an indented block at `depth`.
    fn block(&mut self, depth: usize) -> ReadResult<Vec<Stmt>> {
        let mut body = Vec::new();
        while let Some(line) = self.peek() {
            if line.depth < depth {
                break;
            }
            if line.depth > depth {
                return Err(self.error_at(line.number, "unexpected indent"));
            }
            body.push(self.statement(depth)?);
        }
        if body.is_empty() {
            let line = self
                .lines
                .get(self.pos.saturating_sub(1))
                .map_or(0, |l| l.number);
            return Err(self.error_at(line, "expected an indented block"));
        }
        Ok(body)
    }

    fn statement(&mut self, depth: usize) -> ReadResult<Stmt> {
        let line = self.next_line()?;
        let (number, text) = (line.number, line.text);
        let fail = |m: String| ReadError {
            line: number,
            message: m,
        };
        let header = |keyword: &str| -> Option<&str> {
            text.strip_prefix(keyword)
                .and_then(|rest| rest.strip_suffix(':'))
                .map(str::trim)
        };

        let kind = if let Some(condition) = header("if ") {
            let mut branches = vec![(expr(condition).map_err(fail)?, self.block(depth + 1)?)];
            let mut otherwise = None;
            loop {
                if self.next_is(depth, "elif ") {
                    let line = self.next_line()?;
                    let n = line.number;
                    let condition = line
                        .text
                        .strip_prefix("elif ")
                        .and_then(|r| r.strip_suffix(':'))
                        .ok_or_else(|| self.error_at(n, "malformed elif"))?;
                    let condition = expr(condition).map_err(|m| self.error_at(n, m))?;
                    branches.push((condition, self.block(depth + 1)?));
                } else if self.next_is(depth, "else:") {
                    self.next_line()?;
                    otherwise = Some(self.block(depth + 1)?);
                    break;
                } else {
                    break;
                }
            }
            StmtKind::If {
                branches,
                otherwise,
            }
        } else if let Some(rest) = header("for ") {
            let mut parser = parser(rest);
            let parsed: Result<(Vec<String>, Expr), crate::expr::ExprError> = (|| {
                parser.skip_ws();
                let mut targets = vec![parser.identifier()?];
                while parser.at(",") {
                    parser.expect(",")?;
                    parser.skip_ws();
                    targets.push(parser.identifier()?);
                }
                if !parser.eat_keyword("in") {
                    parser.expect("in")?;
                }
                let iter = parser.expression()?;
                parser.expect_end()?;
                Ok((targets, iter))
            })();
            let (targets, iter) = parsed.map_err(|e| fail(e.to_string()))?;
            StmtKind::For {
                targets,
                iter,
                body: self.block(depth + 1)?,
            }
        } else if text == "try:" {
            let body = self.block(depth + 1)?;
            let mut handlers = Vec::new();
            let mut finally = None;
            while self.next_is(depth, "except") {
                let line = self.next_line()?;
                let n = line.number;
                let clause = line
                    .text
                    .strip_prefix("except")
                    .and_then(|r| r.strip_suffix(':'))
                    .map(str::trim)
                    .ok_or_else(|| self.error_at(n, "malformed except"))?;
                let (name, binding) = if clause.is_empty() {
                    (None, None)
                } else {
                    match clause.split_once(" as ") {
                        Some((name, binding)) => (
                            Some(name.trim().to_string()),
                            Some(identifier(binding).map_err(|m| self.error_at(n, m))?),
                        ),
                        None => (Some(clause.to_string()), None),
                    }
                };
                handlers.push(ExceptHandler {
                    name,
                    binding,
                    body: self.block(depth + 1)?,
                });
            }
            if self.next_is(depth, "finally:") {
                self.next_line()?;
                finally = Some(self.block(depth + 1)?);
            }
            if handlers.is_empty() && finally.is_none() {
                return Err(fail("try without except or finally".to_string()));
            }
            StmtKind::Try {
                body,
                handlers,
                finally,
            }
        } else if text.starts_with("write(") || text.starts_with("emit(") || text.starts_with("eval(") {
            let (function, arg) = match expr(text).map_err(fail)? {
                Expr::Call(callee, mut args) => match (*callee, args.len()) {
                    (Expr::Name(function), 1) => match args.pop() {
                        Some(Arg { name: None, value }) => (function, value),
                        _ => return Err(fail("expected one positional argument".to_string())),
                    },
                    _ => return Err(fail("expected one positional argument".to_string())),
                },
                _ => return Err(fail(format!("malformed statement '{}'", text))),
            };
            match (function.as_str(), arg) {
                ("write", Expr::Literal(Literal::Str(s))) => StmtKind::Write(s),
                ("write", _) => return Err(fail("write() takes a string literal".to_string())),
                ("emit", value) => StmtKind::Emit(value),
                (_, value) => StmtKind::Eval(value),
            }
        } else if let Some(rest) = text.strip_prefix("set ") {
            let (global, rest) = match rest.strip_prefix("global ") {
                Some(rest) => (true, rest),
                None => (false, rest),
            };
            let (name, value) = rest
                .split_once('=')
                .ok_or_else(|| fail("expected 'set name = value'".to_string()))?;
            StmtKind::Set {
                name: identifier(name).map_err(fail)?,
                value: expr(value).map_err(fail)?,
                global,
            }
        } else if text == "return" {
            StmtKind::Return(None)
        } else if let Some(value) = text.strip_prefix("return ") {
            StmtKind::Return(Some(expr(value).map_err(fail)?))
        } else if text.starts_with("import ") || text.starts_with("from ") {
            StmtKind::Import(read_import(text).map_err(fail)?)
        } else {
            match text {
                "break" => StmtKind::Break,
                "continue" => StmtKind::Continue,
                "pass" => StmtKind::Pass,
                _ => return Err(fail(format!("unknown statement '{}'", text))),
            }
        };
        Ok(Stmt { kind, line: number })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::codegen::generate;
    use crate::compiler::parser::build_unit;
    use crate::compiler::scanner::scan;
    use crate::compiler::CompileTarget;
    use crate::settings::CompilerSettings;
    use pretty_assertions::assert_eq;

    fn strip_lines(stmts: &mut [Stmt]) {
        for stmt in stmts {
            stmt.line = 0;
            match &mut stmt.kind {
                StmtKind::If {
                    branches,
                    otherwise,
                } => {
                    for (_, body) in branches {
                        strip_lines(body);
                    }
                    if let Some(body) = otherwise {
                        strip_lines(body);
                    }
                }
                StmtKind::For { body, .. } => strip_lines(body),
                StmtKind::Try {
                    body,
                    handlers,
                    finally,
                } => {
                    strip_lines(body);
                    for h in handlers {
                        strip_lines(&mut h.body);
                    }
                    if let Some(body) = finally {
                        strip_lines(body);
                    }
                }
                _ => {}
            }
        }
    }

    #[test]
    fn test_reads_back_compiled_template() {
        let source = "#from lib import x as y\n\
                      #attr title = 'T'\n\
                      Hi $name!\n\
                      #for $i, $j in $pairs\n\
                      #if $i > 1\n$i#elif $j\nj#else\nnone\n#end if\n\
                      #end for\n\
                      #@staticmethod\n\
                      #def helper($a, $b=2)\n\
                      #try\n#set global z = $a % $b\n#except KeyError as e\n#pass\n#finally\n#silent $a\n#end try\n\
                      #return [$a, {'k': None}]\n\
                      #end def\n";
        let settings = CompilerSettings::default();
        let target = CompileTarget {
            module_name: "m".to_string(),
            class_name: "C".to_string(),
            base_name: "Template".to_string(),
        };
        let chunks = scan(source, &settings).unwrap();
        let unit = build_unit(source, chunks, &settings, &target).unwrap().module;
        let code = generate(&unit);

        let mut read = read_unit(&code).unwrap();
        for method in &mut read.class.methods {
            method.line = 0;
            strip_lines(&mut method.body);
        }
        assert_eq!(read, unit);
    }

    #[test]
    fn test_statement_lines_are_recorded() {
        let code = "class C(Template):\n    main respond\n    def respond(self, **KWS):\n        write('a')\n        emit($b)\n";
        let unit = read_unit(code).unwrap();
        let body = &unit.class.methods[0].body;
        assert_eq!(body[0].line, 4);
        assert_eq!(body[1].line, 5);
        assert_eq!(unit.class.methods[0].line, 3);
    }

    #[test]
    fn test_empty_block_is_rejected() {
        let code = "class C(Template):\n    main respond\n    def respond(self, **KWS):\n        if $x:\n        pass\n";
        let err = read_unit(code).unwrap_err();
        assert_eq!(err.line, 4);
        assert!(err.message.contains("indented block"));
    }

    #[test]
    fn test_bad_indentation_is_rejected() {
        let code = "class C(Template):\n   main respond\n";
        assert_eq!(read_unit(code).unwrap_err().line, 2);
    }

    #[test]
    fn test_missing_main_method() {
        let code = "class C(Template):\n    main respond\n    def other(self, **KWS):\n        pass\n";
        let err = read_unit(code).unwrap_err();
        assert!(err.message.contains("main method"));
    }
}
