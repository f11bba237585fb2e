/*
 * codegen.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Generated code printer.
//!
//! Prints a [`UnitModule`] as indentation-structured unit code. The code
//! loader's reader accepts exactly this format, so the text is both the
//! introspectable artifact and the loader's input.

use crate::ir::{ClassDef, FunctionDef, Import, MethodKind, Stmt, StmtKind, UnitModule};
use crate::value::repr_str;

const INDENT: &str = "    ";

struct CodeWriter {
    out: String,
    depth: usize,
}

impl CodeWriter {
    fn line(&mut self, text: &str) {
        for _ in 0..self.depth {
            self.out.push_str(INDENT);
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn blank(&mut self) {
        self.out.push('\n');
    }

    fn indented(&mut self, f: impl FnOnce(&mut Self)) {
        self.depth += 1;
        f(self);
        self.depth -= 1;
    }
}

/// Print a unit module as generated code.
pub fn generate(module: &UnitModule) -> String {
    let mut w = CodeWriter {
        out: String::new(),
        depth: 0,
    };
    for line in &module.header {
        w.line(&format!("# {}", line));
    }
    for import in &module.imports {
        w.line(&import_line(import));
    }
    class(&mut w, &module.class);
    w.out
}

fn import_line(import: &Import) -> String {
    match import {
        Import::Module { path, alias } => match alias {
            Some(alias) => format!("import {} as {}", path, alias),
            None => format!("import {}", path),
        },
        Import::From { module, names } => {
            let names: Vec<String> = names
                .iter()
                .map(|(name, alias)| match alias {
                    Some(alias) => format!("{} as {}", name, alias),
                    None => name.clone(),
                })
                .collect();
            format!("from {} import {}", module, names.join(", "))
        }
    }
}

fn class(w: &mut CodeWriter, class: &ClassDef) {
    w.blank();
    w.line(&format!("class {}({}):", class.name, class.bases.join(", ")));
    w.indented(|w| {
        w.line(&format!("main {}", class.main_method));
        if !class.autocall {
            w.line("autocall False");
        }
        for (name, value) in &class.attributes {
            w.line(&format!("attr {} = {}", name, value));
        }
        for method in &class.methods {
            w.blank();
            function(w, method);
        }
    });
}

fn function(w: &mut CodeWriter, def: &FunctionDef) {
    let mut params = Vec::new();
    match def.kind {
        MethodKind::Instance => params.push("self".to_string()),
        MethodKind::Class => {
            w.line("@classmethod");
            params.push("cls".to_string());
        }
        MethodKind::Static => w.line("@staticmethod"),
    }
    for param in &def.params {
        match &param.default {
            Some(default) => params.push(format!("{}={}", param.name, default)),
            None => params.push(param.name.clone()),
        }
    }
    if let Some(kwargs) = &def.kwargs {
        params.push(format!("**{}", kwargs));
    }
    w.line(&format!("def {}({}):", def.name, params.join(", ")));
    block(w, &def.body);
}

fn block(w: &mut CodeWriter, body: &[Stmt]) {
    w.indented(|w| {
        if body.is_empty() {
            w.line("pass");
        }
        for stmt in body {
            statement(w, stmt);
        }
    });
}

fn statement(w: &mut CodeWriter, stmt: &Stmt) {
    match &stmt.kind {
        StmtKind::Write(text) => w.line(&format!("write({})", repr_str(text))),
        StmtKind::Emit(expr) => w.line(&format!("emit({})", expr)),
        StmtKind::Set {
            name,
            value,
            global,
        } => {
            let scope = if *global { "global " } else { "" };
            w.line(&format!("set {}{} = {}", scope, name, value));
        }
        StmtKind::If {
            branches,
            otherwise,
        } => {
            for (i, (condition, body)) in branches.iter().enumerate() {
                let keyword = if i == 0 { "if" } else { "elif" };
                w.line(&format!("{} {}:", keyword, condition));
                block(w, body);
            }
            if let Some(body) = otherwise {
                w.line("else:");
                block(w, body);
            }
        }
        StmtKind::For {
            targets,
            iter,
            body,
        } => {
            w.line(&format!("for {} in {}:", targets.join(", "), iter));
            block(w, body);
        }
        StmtKind::Try {
            body,
            handlers,
            finally,
        } => {
            w.line("try:");
            block(w, body);
            for handler in handlers {
                let header = match (&handler.name, &handler.binding) {
                    (Some(name), Some(binding)) => format!("except {} as {}:", name, binding),
                    (Some(name), None) => format!("except {}:", name),
                    (None, _) => "except:".to_string(),
                };
                w.line(&header);
                block(w, &handler.body);
            }
            if let Some(body) = finally {
                w.line("finally:");
                block(w, body);
            }
        }
        StmtKind::Return(None) => w.line("return"),
        StmtKind::Return(Some(expr)) => w.line(&format!("return {}", expr)),
        StmtKind::Import(import) => w.line(&import_line(import)),
        StmtKind::Eval(expr) => w.line(&format!("eval({})", expr)),
        StmtKind::Break => w.line("break"),
        StmtKind::Continue => w.line("continue"),
        StmtKind::Pass => w.line("pass"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parse_expression;
    use crate::ir::{ExceptHandler, Param};
    use pretty_assertions::assert_eq;

    fn stmt(kind: StmtKind) -> Stmt {
        Stmt::new(kind)
    }

    #[test]
    fn test_generate_module() {
        let module = UnitModule {
            header: vec!["module m".to_string()],
            imports: vec![Import::From {
                module: "base".to_string(),
                names: vec![("Base".to_string(), None)],
            }],
            class: ClassDef {
                name: "C".to_string(),
                bases: vec!["Base".to_string()],
                main_method: "respond".to_string(),
                autocall: true,
                attributes: vec![],
                methods: vec![
                    FunctionDef {
                        name: "respond".to_string(),
                        kind: MethodKind::Instance,
                        params: vec![],
                        kwargs: Some("KWS".to_string()),
                        body: vec![
                            stmt(StmtKind::Write("it's\n".to_string())),
                            stmt(StmtKind::Emit(parse_expression("$foo", "$").unwrap())),
                        ],
                        line: 0,
                    },
                    FunctionDef {
                        name: "m".to_string(),
                        kind: MethodKind::Class,
                        params: vec![Param {
                            name: "a".to_string(),
                            default: Some(parse_expression("1", "$").unwrap()),
                        }],
                        kwargs: Some("KWS".to_string()),
                        body: vec![],
                        line: 0,
                    },
                ],
            },
        };
        assert_eq!(
            generate(&module),
            "# module m\n\
             from base import Base\n\
             \n\
             class C(Base):\n    \
                 main respond\n\
             \n    \
                 def respond(self, **KWS):\n        \
                     write(\"it's\\n\")\n        \
                     emit($foo)\n\
             \n    \
                 @classmethod\n    \
                 def m(cls, a=1, **KWS):\n        \
                     pass\n"
        );
    }

    #[test]
    fn test_empty_try_body_gets_pass() {
        let mut w = CodeWriter {
            out: String::new(),
            depth: 0,
        };
        statement(
            &mut w,
            &stmt(StmtKind::Try {
                body: vec![],
                handlers: vec![ExceptHandler {
                    name: Some("ImportError".to_string()),
                    binding: None,
                    body: vec![stmt(StmtKind::Pass)],
                }],
                finally: None,
            }),
        );
        assert_eq!(w.out, "try:\n    pass\nexcept ImportError:\n    pass\n");
    }
}
