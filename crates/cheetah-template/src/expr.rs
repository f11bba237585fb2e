/*
 * expr.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Host expression language.
//!
//! Directive arguments, placeholder arguments and enclosed placeholders
//! (`${...}`, `$(...)`, `$[...]`) are written in a small Python-like
//! expression language. This module parses it into [`Expr`] and prints
//! `Expr` back out in a canonical form.
//!
//! The same parser serves two clients:
//!
//! - the source compiler, which parses template text with the configured
//!   placeholder token (e.g. `@` during preprocessing), and
//! - the code loader, which re-parses canonical generated code where the
//!   placeholder token is always `$`.
//!
//! Literals keep host-language meaning; the compiler never reinterprets
//! them.

use crate::error::SyntaxError;
use crate::value::{format_float, repr_str};
use std::fmt;

/// A parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    List(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    /// A bare name: local variable, module global or builtin.
    Name(String),
    /// A search-list lookup (`$foo.bar(1)`).
    Placeholder(Placeholder),
    Attr(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call(Box<Expr>, Vec<Arg>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Compare(CompareOp, Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Conditional {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

/// A placeholder: a name looked up through the search list, followed by
/// attribute, index and call accessors.
#[derive(Debug, Clone, PartialEq)]
pub struct Placeholder {
    pub name: String,
    pub chain: Vec<Accessor>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Accessor {
    Attr(String),
    Index(Expr),
    Call(Vec<Arg>),
}

/// A call argument, optionally passed by keyword.
#[derive(Debug, Clone, PartialEq)]
pub struct Arg {
    pub name: Option<String>,
    pub value: Expr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Is,
    IsNot,
}

impl BinaryOp {
    fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::FloorDiv => "//",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "**",
        }
    }
}

impl CompareOp {
    fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::In => "in",
            CompareOp::NotIn => "not in",
            CompareOp::Is => "is",
            CompareOp::IsNot => "is not",
        }
    }
}

const KEYWORDS: &[&str] = &[
    "and", "or", "not", "in", "is", "if", "else", "True", "False", "None", "lambda", "for",
];

pub fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

pub fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Whether `s` is a valid (non-keyword) identifier.
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if is_ident_start(c))
        && chars.all(is_ident_char)
        && !KEYWORDS.contains(&s)
}

/// Whether `s` is a dotted name made of identifiers (`a.b.C`).
pub fn is_dotted_name(s: &str) -> bool {
    !s.is_empty() && s.split('.').all(is_identifier)
}

/// A parse failure with a byte offset into the parsed text.
#[derive(Debug, Clone, PartialEq)]
pub struct ExprError {
    pub message: String,
    pub offset: usize,
}

impl ExprError {
    fn new(message: impl Into<String>, offset: usize) -> Self {
        Self {
            message: message.into(),
            offset,
        }
    }

    /// Convert to a template syntax error; `base` is the offset of the
    /// parsed text inside `source`.
    pub fn into_syntax(self, source: &str, base: usize) -> SyntaxError {
        let start = base + self.offset;
        SyntaxError::new(self.message, source, start..start + 1)
    }
}

impl fmt::Display for ExprError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (at offset {})", self.message, self.offset)
    }
}

type ParseResult<T> = Result<T, ExprError>;

/// Deepest expression nesting accepted in template source.
pub const MAX_NESTING: usize = 64;

/// Recursive-descent parser over a string slice.
pub struct ExprParser<'a> {
    src: &'a str,
    pos: usize,
    var_token: &'a str,
    bare_names_as_placeholders: bool,
    depth: usize,
    max_depth: usize,
}

impl<'a> ExprParser<'a> {
    pub fn new(src: &'a str, pos: usize, var_token: &'a str) -> Self {
        Self {
            src,
            pos,
            var_token,
            bare_names_as_placeholders: false,
            depth: 0,
            max_depth: MAX_NESTING,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Enter one level of nesting; the enclosing `expression` call restores
    /// the depth on return.
    fn descend(&mut self) -> ParseResult<()> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(ExprError::new("expression nested too deeply", self.pos));
        }
        Ok(())
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.rest().chars().nth(n)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    pub fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.bump();
        }
    }

    pub fn eat(&mut self, s: &str) -> bool {
        if self.rest().starts_with(s) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    /// Whether `s` comes next (after whitespace).
    pub fn at(&mut self, s: &str) -> bool {
        self.skip_ws();
        self.rest().starts_with(s)
    }

    /// Parse a name that may carry the placeholder token (`$item` or
    /// `item`), as written in `#for`, `#set` and `#def` headers.
    pub fn variable_name(&mut self) -> ParseResult<String> {
        self.skip_ws();
        self.eat(self.var_token);
        let start = self.pos;
        let name = self.identifier()?;
        if KEYWORDS.contains(&name.as_str()) {
            return Err(ExprError::new(format!("'{}' is a keyword", name), start));
        }
        Ok(name)
    }

    pub fn expect(&mut self, s: &str) -> ParseResult<()> {
        self.skip_ws();
        if self.eat(s) {
            Ok(())
        } else {
            Err(ExprError::new(format!("expected '{}'", s), self.pos))
        }
    }

    /// Whether the keyword `kw` comes next (after whitespace).
    pub fn peek_keyword(&mut self, kw: &str) -> bool {
        self.skip_ws();
        let rest = self.rest();
        rest.starts_with(kw) && !rest[kw.len()..].starts_with(is_ident_char)
    }

    pub fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.peek_keyword(kw) {
            self.pos += kw.len();
            true
        } else {
            false
        }
    }

    /// Parse an identifier at the current position (no leading whitespace
    /// skipped).
    pub fn identifier(&mut self) -> ParseResult<String> {
        let start = self.pos;
        match self.peek() {
            Some(c) if is_ident_start(c) => {}
            _ => return Err(ExprError::new("expected an identifier", self.pos)),
        }
        while matches!(self.peek(), Some(c) if is_ident_char(c)) {
            self.bump();
        }
        Ok(self.src[start..self.pos].to_string())
    }

    /// Parse a dotted name (`a.b.C`) after optional whitespace.
    pub fn dotted_name(&mut self) -> ParseResult<String> {
        self.skip_ws();
        let mut name = self.identifier()?;
        while self.peek() == Some('.') && matches!(self.peek_at(1), Some(c) if is_ident_start(c)) {
            self.bump();
            name.push('.');
            name.push_str(&self.identifier()?);
        }
        Ok(name)
    }

    /// Succeed only if nothing but whitespace remains.
    pub fn expect_end(&mut self) -> ParseResult<()> {
        self.skip_ws();
        match self.peek() {
            None => Ok(()),
            Some(c) => Err(ExprError::new(format!("unexpected '{}'", c), self.pos)),
        }
    }

    /// Parse a placeholder starting at the placeholder token.
    ///
    /// Returns `None` (without consuming anything) when the token is not
    /// followed by an identifier or an enclosure, in which case the token
    /// is plain text.
    pub fn placeholder(&mut self) -> ParseResult<Option<Expr>> {
        if !self.rest().starts_with(self.var_token) {
            return Ok(None);
        }
        let after = self.pos + self.var_token.len();
        let next = self.src[after..].chars().next();
        match next {
            Some(open @ ('{' | '(' | '[')) => {
                let close = match open {
                    '{' => "}",
                    '(' => ")",
                    _ => "]",
                };
                let saved = (self.pos, self.bare_names_as_placeholders);
                self.pos = after + 1;
                self.bare_names_as_placeholders = true;
                let result = self.expression().and_then(|expr| {
                    self.expect(close)?;
                    Ok(expr)
                });
                self.bare_names_as_placeholders = saved.1;
                match result {
                    Ok(expr) => Ok(Some(expr)),
                    Err(err) => {
                        self.pos = saved.0;
                        Err(err)
                    }
                }
            }
            Some(c) if is_ident_start(c) => {
                self.pos = after;
                let name = self.identifier()?;
                let chain = self.placeholder_chain()?;
                Ok(Some(Expr::Placeholder(Placeholder { name, chain })))
            }
            _ => Ok(None),
        }
    }

    /// Accessors directly following a placeholder name. Whitespace ends
    /// the chain.
    fn placeholder_chain(&mut self) -> ParseResult<Vec<Accessor>> {
        let mut chain = Vec::new();
        loop {
            match self.peek() {
                Some('.') if matches!(self.peek_at(1), Some(c) if is_ident_start(c)) => {
                    self.bump();
                    chain.push(Accessor::Attr(self.identifier()?));
                }
                Some('(') => {
                    self.bump();
                    chain.push(Accessor::Call(self.arguments()?));
                }
                Some('[') => {
                    self.bump();
                    let index = self.expression()?;
                    self.expect("]")?;
                    chain.push(Accessor::Index(index));
                }
                _ => return Ok(chain),
            }
        }
    }

    /// Parse a full expression.
    pub fn expression(&mut self) -> ParseResult<Expr> {
        let depth = self.depth;
        let result = self.descend().and_then(|()| self.conditional());
        self.depth = depth;
        result
    }

    fn conditional(&mut self) -> ParseResult<Expr> {
        let value = self.or_expr()?;
        if self.peek_keyword("if") {
            let saved = self.pos;
            self.eat_keyword("if");
            let condition = self.or_expr()?;
            if !self.eat_keyword("else") {
                self.pos = saved;
                return Err(ExprError::new("expected 'else' in conditional expression", saved));
            }
            let otherwise = self.expression()?;
            return Ok(Expr::Conditional {
                condition: Box::new(condition),
                then: Box::new(value),
                otherwise: Box::new(otherwise),
            });
        }
        Ok(value)
    }

    fn or_expr(&mut self) -> ParseResult<Expr> {
        let mut left = self.and_expr()?;
        while self.eat_keyword("or") {
            self.descend()?;
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> ParseResult<Expr> {
        let mut left = self.not_expr()?;
        while self.eat_keyword("and") {
            self.descend()?;
            let right = self.not_expr()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> ParseResult<Expr> {
        if self.eat_keyword("not") {
            self.descend()?;
            return Ok(Expr::Not(Box::new(self.not_expr()?)));
        }
        self.comparison()
    }

    fn comparison_op(&mut self) -> Option<CompareOp> {
        self.skip_ws();
        let ops = [
            ("==", CompareOp::Eq),
            ("!=", CompareOp::Ne),
            ("<=", CompareOp::Le),
            (">=", CompareOp::Ge),
            ("<", CompareOp::Lt),
            (">", CompareOp::Gt),
        ];
        for (symbol, op) in ops {
            if self.eat(symbol) {
                return Some(op);
            }
        }
        let saved = self.pos;
        if self.eat_keyword("in") {
            return Some(CompareOp::In);
        }
        if self.eat_keyword("not") {
            if self.eat_keyword("in") {
                return Some(CompareOp::NotIn);
            }
            self.pos = saved;
            return None;
        }
        if self.eat_keyword("is") {
            if self.eat_keyword("not") {
                return Some(CompareOp::IsNot);
            }
            return Some(CompareOp::Is);
        }
        None
    }

    fn comparison(&mut self) -> ParseResult<Expr> {
        let mut left = self.sum()?;
        while let Some(op) = self.comparison_op() {
            self.descend()?;
            let right = self.sum()?;
            left = Expr::Compare(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn sum(&mut self) -> ParseResult<Expr> {
        let mut left = self.term()?;
        loop {
            self.skip_ws();
            let op = if self.eat("+") {
                BinaryOp::Add
            } else if self.eat("-") {
                BinaryOp::Sub
            } else {
                return Ok(left);
            };
            self.descend()?;
            let right = self.term()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn term(&mut self) -> ParseResult<Expr> {
        let mut left = self.unary()?;
        loop {
            self.skip_ws();
            let op = if self.rest().starts_with("**") {
                return Ok(left);
            } else if self.eat("//") {
                BinaryOp::FloorDiv
            } else if self.eat("*") {
                BinaryOp::Mul
            } else if self.eat("/") {
                BinaryOp::Div
            } else if self.eat("%") {
                BinaryOp::Mod
            } else {
                return Ok(left);
            };
            self.descend()?;
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn unary(&mut self) -> ParseResult<Expr> {
        self.skip_ws();
        if self.eat("-") {
            self.descend()?;
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.unary()?)));
        }
        if self.eat("+") {
            self.descend()?;
            return Ok(Expr::Unary(UnaryOp::Pos, Box::new(self.unary()?)));
        }
        self.power()
    }

    fn power(&mut self) -> ParseResult<Expr> {
        let base = self.postfix()?;
        self.skip_ws();
        if self.eat("**") {
            self.descend()?;
            let exponent = self.unary()?;
            return Ok(Expr::Binary(BinaryOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn postfix(&mut self) -> ParseResult<Expr> {
        self.skip_ws();
        let parenthesized = self.peek() == Some('(');
        let mut expr = self.atom()?;
        if matches!(expr, Expr::Placeholder(_)) && !parenthesized {
            // the placeholder already consumed its adjacent accessors
            return Ok(expr);
        }
        loop {
            self.skip_ws();
            if matches!(self.peek(), Some('.' | '(' | '[')) {
                self.descend()?;
            }
            match self.peek() {
                Some('.') => {
                    self.bump();
                    self.skip_ws();
                    let name = self.identifier()?;
                    expr = Expr::Attr(Box::new(expr), name);
                }
                Some('(') => {
                    self.bump();
                    let args = self.arguments()?;
                    expr = Expr::Call(Box::new(expr), args);
                }
                Some('[') => {
                    self.bump();
                    let index = self.expression()?;
                    self.expect("]")?;
                    expr = Expr::Index(Box::new(expr), Box::new(index));
                }
                _ => return Ok(expr),
            }
        }
    }

    /// Parse call arguments after the opening parenthesis.
    fn arguments(&mut self) -> ParseResult<Vec<Arg>> {
        let mut args = Vec::new();
        loop {
            self.skip_ws();
            if self.eat(")") {
                return Ok(args);
            }
            let saved = self.pos;
            let mut name = None;
            if let Ok(ident) = self.identifier() {
                self.skip_ws();
                if self.rest().starts_with('=') && !self.rest().starts_with("==") {
                    self.bump();
                    name = Some(ident);
                } else {
                    self.pos = saved;
                }
            } else {
                self.pos = saved;
            }
            let value = self.expression()?;
            args.push(Arg { name, value });
            self.skip_ws();
            if self.eat(",") {
                continue;
            }
            self.expect(")")?;
            return Ok(args);
        }
    }

    fn sequence(&mut self, close: &str) -> ParseResult<Vec<Expr>> {
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.eat(close) {
                return Ok(items);
            }
            items.push(self.expression()?);
            self.skip_ws();
            if !self.eat(",") {
                self.expect(close)?;
                return Ok(items);
            }
        }
    }

    fn atom(&mut self) -> ParseResult<Expr> {
        self.skip_ws();
        let start = self.pos;
        if let Some(placeholder) = self.placeholder()? {
            return Ok(placeholder);
        }
        match self.peek() {
            None => Err(ExprError::new("unexpected end of expression", start)),
            Some('(') => {
                self.bump();
                let inner = self.expression()?;
                self.skip_ws();
                if self.eat(",") {
                    // a tuple is represented as a list
                    let mut items = vec![inner];
                    items.extend(self.sequence(")")?);
                    return Ok(Expr::List(items));
                }
                self.expect(")")?;
                Ok(inner)
            }
            Some('[') => {
                self.bump();
                Ok(Expr::List(self.sequence("]")?))
            }
            Some('{') => {
                self.bump();
                let mut entries = Vec::new();
                loop {
                    self.skip_ws();
                    if self.eat("}") {
                        return Ok(Expr::Dict(entries));
                    }
                    let key = self.expression()?;
                    self.expect(":")?;
                    let value = self.expression()?;
                    entries.push((key, value));
                    self.skip_ws();
                    if !self.eat(",") {
                        self.expect("}")?;
                        return Ok(Expr::Dict(entries));
                    }
                }
            }
            Some(q @ ('\'' | '"')) => self.string(q),
            Some(c) if c.is_ascii_digit() => self.number(),
            Some('.') if matches!(self.peek_at(1), Some(c) if c.is_ascii_digit()) => self.number(),
            Some(c) if is_ident_start(c) => {
                let name = self.identifier()?;
                match name.as_str() {
                    "True" => Ok(Expr::Literal(Literal::Bool(true))),
                    "False" => Ok(Expr::Literal(Literal::Bool(false))),
                    "None" => Ok(Expr::Literal(Literal::None)),
                    kw if KEYWORDS.contains(&kw) => {
                        Err(ExprError::new(format!("unexpected keyword '{}'", kw), start))
                    }
                    _ if self.bare_names_as_placeholders => {
                        let chain = self.placeholder_chain()?;
                        Ok(Expr::Placeholder(Placeholder { name, chain }))
                    }
                    _ => Ok(Expr::Name(name)),
                }
            }
            Some(c) => Err(ExprError::new(format!("unexpected '{}'", c), start)),
        }
    }

    fn number(&mut self) -> ParseResult<Expr> {
        let start = self.pos;
        let mut is_float = false;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.bump();
        }
        if self.peek() == Some('.') && matches!(self.peek_at(1), Some(c) if c.is_ascii_digit()) {
            is_float = true;
            self.bump();
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.bump();
            }
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let sign = matches!(self.peek_at(1), Some('+' | '-'));
            let digit_at = if sign { 2 } else { 1 };
            if matches!(self.peek_at(digit_at), Some(c) if c.is_ascii_digit()) {
                is_float = true;
                for _ in 0..digit_at {
                    self.bump();
                }
                while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                    self.bump();
                }
            }
        }
        let text = &self.src[start..self.pos];
        if is_float {
            text.parse::<f64>()
                .map(|f| Expr::Literal(Literal::Float(f)))
                .map_err(|_| ExprError::new(format!("invalid number '{}'", text), start))
        } else {
            text.parse::<i64>()
                .map(|i| Expr::Literal(Literal::Int(i)))
                .map_err(|_| ExprError::new(format!("integer '{}' out of range", text), start))
        }
    }

    fn string(&mut self, quote: char) -> ParseResult<Expr> {
        let start = self.pos;
        self.bump();
        let mut value = String::new();
        loop {
            match self.bump() {
                None | Some('\n') => {
                    return Err(ExprError::new("unterminated string literal", start));
                }
                Some(c) if c == quote => return Ok(Expr::Literal(Literal::Str(value))),
                Some('\\') => match self.bump() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some('r') => value.push('\r'),
                    Some('0') => value.push('\0'),
                    Some('\\') => value.push('\\'),
                    Some('\'') => value.push('\''),
                    Some('"') => value.push('"'),
                    Some(other) => {
                        value.push('\\');
                        value.push(other);
                    }
                    None => return Err(ExprError::new("unterminated string literal", start)),
                },
                Some(c) => value.push(c),
            }
        }
    }
}

/// Parse `text` as one complete expression.
pub fn parse_expression(text: &str, var_token: &str) -> Result<Expr, ExprError> {
    let mut parser = ExprParser::new(text, 0, var_token);
    let expr = parser.expression()?;
    parser.expect_end()?;
    Ok(expr)
}

fn write_args(f: &mut fmt::Formatter<'_>, args: &[Arg]) -> fmt::Result {
    f.write_str("(")?;
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        if let Some(name) = &arg.name {
            write!(f, "{}=", name)?;
        }
        write!(f, "{}", arg.value)?;
    }
    f.write_str(")")
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::None => f.write_str("None"),
            Literal::Bool(true) => f.write_str("True"),
            Literal::Bool(false) => f.write_str("False"),
            Literal::Int(i) => write!(f, "{}", i),
            Literal::Float(x) => f.write_str(&format_float(*x)),
            Literal::Str(s) => f.write_str(&repr_str(s)),
        }
    }
}

/// Canonical form: binary and unary operations are fully parenthesized and
/// placeholders always use `$`.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(lit) => write!(f, "{}", lit),
            Expr::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Expr::Dict(entries) => {
                f.write_str("{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                f.write_str("}")
            }
            Expr::Name(name) => f.write_str(name),
            Expr::Placeholder(p) => {
                write!(f, "${}", p.name)?;
                for accessor in &p.chain {
                    match accessor {
                        Accessor::Attr(name) => write!(f, ".{}", name)?,
                        Accessor::Index(index) => write!(f, "[{}]", index)?,
                        Accessor::Call(args) => write_args(f, args)?,
                    }
                }
                Ok(())
            }
            Expr::Attr(base, name) => match base.as_ref() {
                Expr::Literal(Literal::Int(_) | Literal::Float(_)) | Expr::Placeholder(_) => {
                    write!(f, "({}).{}", base, name)
                }
                _ => write!(f, "{}.{}", base, name),
            },
            Expr::Index(base, index) => match base.as_ref() {
                Expr::Placeholder(_) => write!(f, "({})[{}]", base, index),
                _ => write!(f, "{}[{}]", base, index),
            },
            Expr::Call(callee, args) => {
                match callee.as_ref() {
                    Expr::Placeholder(_) => write!(f, "({})", callee)?,
                    _ => write!(f, "{}", callee)?,
                }
                write_args(f, args)
            }
            Expr::Unary(UnaryOp::Neg, operand) => write!(f, "(-{})", operand),
            Expr::Unary(UnaryOp::Pos, operand) => write!(f, "(+{})", operand),
            Expr::Binary(op, l, r) => write!(f, "({} {} {})", l, op.symbol(), r),
            Expr::Compare(op, l, r) => write!(f, "({} {} {})", l, op.symbol(), r),
            Expr::And(l, r) => write!(f, "({} and {})", l, r),
            Expr::Or(l, r) => write!(f, "({} or {})", l, r),
            Expr::Not(operand) => write!(f, "(not {})", operand),
            Expr::Conditional {
                condition,
                then,
                otherwise,
            } => write!(f, "({} if {} else {})", then, condition, otherwise),
        }
    }
}
