/*
 * ir.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Unit IR.
//!
//! The source compiler lowers a template into a [`UnitModule`] and prints
//! it as generated code; the code loader reads that text back into the
//! same types before materializing a class. Statement line numbers refer
//! to the generated code and are filled in by the loader's reader.

use crate::expr::Expr;

/// One generated module: imports plus exactly one class.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitModule {
    /// Header comment lines (without the comment marker).
    pub header: Vec<String>,
    pub imports: Vec<Import>,
    pub class: ClassDef,
}

/// An import statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Import {
    /// `import a.b [as c]`
    Module { path: String, alias: Option<String> },
    /// `from a.b import c [as d], e`
    From {
        module: String,
        names: Vec<(String, Option<String>)>,
    },
}

impl Import {
    /// Names this import binds in the importing scope.
    pub fn bound_names(&self) -> Vec<String> {
        match self {
            Import::Module { path, alias } => vec![alias.clone().unwrap_or_else(|| {
                path.split('.').next().unwrap_or(path).to_string()
            })],
            Import::From { names, .. } => names
                .iter()
                .map(|(name, alias)| alias.clone().unwrap_or_else(|| name.clone()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassDef {
    pub name: String,
    /// Base names, primary first. Dotted names are allowed.
    pub bases: Vec<String>,
    /// Main render method defined by this class.
    pub main_method: String,
    /// Whether placeholders resolving to methods are called implicitly.
    pub autocall: bool,
    /// Class attributes in definition order.
    pub attributes: Vec<(String, Expr)>,
    pub methods: Vec<FunctionDef>,
}

/// Calling convention of a generated method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MethodKind {
    /// Receives the instance as `self`.
    #[default]
    Instance,
    /// Receives the class as `cls`.
    Class,
    /// Receives neither.
    Static,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub kind: MethodKind,
    pub params: Vec<Param>,
    /// Name of the keyword-argument collector (`**KWS`).
    pub kwargs: Option<String>,
    pub body: Vec<Stmt>,
    /// Line of the `def` header in the generated code.
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub default: Option<Expr>,
}

/// A statement together with its generated-code line.
#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub line: usize,
}

impl Stmt {
    pub fn new(kind: StmtKind) -> Self {
        Self { kind, line: 0 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// Literal template text.
    Write(String),
    /// Render a value into the output.
    Emit(Expr),
    Set {
        name: String,
        value: Expr,
        global: bool,
    },
    If {
        branches: Vec<(Expr, Vec<Stmt>)>,
        otherwise: Option<Vec<Stmt>>,
    },
    For {
        targets: Vec<String>,
        iter: Expr,
        body: Vec<Stmt>,
    },
    Try {
        body: Vec<Stmt>,
        handlers: Vec<ExceptHandler>,
        finally: Option<Vec<Stmt>>,
    },
    Return(Option<Expr>),
    Import(Import),
    /// Evaluate and discard (`#silent`).
    Eval(Expr),
    Break,
    Continue,
    Pass,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExceptHandler {
    /// Error name to match; `None` catches everything.
    pub name: Option<String>,
    /// Local bound to the error message (`except KeyError as e`).
    pub binding: Option<String>,
    pub body: Vec<Stmt>,
}
