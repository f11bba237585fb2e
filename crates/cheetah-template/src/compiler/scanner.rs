/*
 * scanner.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template scanner.
//!
//! Splits template source into literal text, placeholders and directives
//! using the configured tokens. Comments are dropped here. A directive or
//! comment that is alone on its line consumes the whole line, including
//! its indentation and newline, so directive-only lines leave no trace in
//! the output.

use crate::error::SyntaxError;
use crate::expr::{Expr, ExprParser, is_ident_char, is_ident_start};
use crate::settings::CompilerSettings;
use std::ops::Range;

/// Directive names recognized after the directive start token. Any other
/// name is literal text.
pub(crate) const DIRECTIVES: &[&str] = &[
    "extends",
    "implements",
    "import",
    "from",
    "def",
    "block",
    "set",
    "if",
    "elif",
    "else",
    "for",
    "try",
    "except",
    "finally",
    "return",
    "pass",
    "silent",
    "echo",
    "break",
    "continue",
    "attr",
    "end",
    "@classmethod",
    "@staticmethod",
];

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Chunk {
    pub kind: ChunkKind,
    /// Byte range in the template source.
    pub span: Range<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ChunkKind {
    Text(String),
    Placeholder(Expr),
    Directive(Directive),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Directive {
    pub name: String,
    /// Argument text with surrounding whitespace trimmed.
    pub args: String,
    /// Byte offset of `args` in the template source.
    pub args_start: usize,
}

/// Scan template source into chunks.
pub(crate) fn scan(source: &str, settings: &CompilerSettings) -> Result<Vec<Chunk>, SyntaxError> {
    let mut scanner = Scanner {
        src: source,
        settings,
        pos: 0,
        chunks: Vec::new(),
        text: String::new(),
        text_start: 0,
    };
    scanner.run()?;
    Ok(scanner.chunks)
}

struct Scanner<'a> {
    src: &'a str,
    settings: &'a CompilerSettings,
    pos: usize,
    chunks: Vec<Chunk>,
    text: String,
    text_start: usize,
}

impl<'a> Scanner<'a> {
    fn run(&mut self) -> Result<(), SyntaxError> {
        let var = self.settings.cheetah_var_start_token.as_str();
        let directive = self.settings.directive_start_token.as_str();
        let multi_start = self.settings.multi_line_comment_start_token.as_str();
        let comment = self.settings.comment_start_token.as_str();

        while self.pos < self.src.len() {
            let rest = &self.src[self.pos..];

            if let Some(escaped) = rest.strip_prefix('\\') {
                if escaped.starts_with(var) {
                    self.push_text(var, 1 + var.len());
                    continue;
                }
                if escaped.starts_with(directive) {
                    self.push_text(directive, 1 + directive.len());
                    continue;
                }
            }

            if rest.starts_with(multi_start) {
                self.multi_line_comment()?;
            } else if rest.starts_with(comment) {
                self.line_comment();
            } else if rest.starts_with(directive) {
                if !self.directive()? {
                    self.push_text(directive, directive.len());
                }
            } else if rest.starts_with(var) {
                let mut parser = ExprParser::new(self.src, self.pos, var);
                match parser.placeholder() {
                    Ok(Some(expr)) => {
                        let start = self.pos;
                        self.flush_text();
                        self.pos = parser.position();
                        self.chunks.push(Chunk {
                            kind: ChunkKind::Placeholder(expr),
                            span: start..self.pos,
                        });
                        self.text_start = self.pos;
                    }
                    Ok(None) => self.push_text(var, var.len()),
                    Err(err) => return Err(err.into_syntax(self.src, 0)),
                }
            } else {
                let c = rest.chars().next().unwrap_or_default();
                let mut buf = [0u8; 4];
                self.push_text(c.encode_utf8(&mut buf), c.len_utf8());
            }
        }
        self.flush_text();
        Ok(())
    }

    /// Append `text` to the pending literal and advance by `consumed` bytes.
    fn push_text(&mut self, text: &str, consumed: usize) {
        if self.text.is_empty() {
            self.text_start = self.pos;
        }
        self.text.push_str(text);
        self.pos += consumed;
    }

    fn flush_text(&mut self) {
        if !self.text.is_empty() {
            self.chunks.push(Chunk {
                kind: ChunkKind::Text(std::mem::take(&mut self.text)),
                span: self.text_start..self.pos,
            });
        }
        self.text_start = self.pos;
    }

    fn line_end(&self, from: usize) -> usize {
        self.src[from..].find('\n').map_or(self.src.len(), |i| from + i)
    }

    /// If the construct at `start..end` is alone on its line, drop the
    /// line's indentation from the pending text and return the position
    /// after the newline.
    fn slurp_line(&mut self, start: usize, end: usize) -> Option<usize> {
        let line_start = self.src[..start].rfind('\n').map_or(0, |i| i + 1);
        let indent = &self.src[line_start..start];
        if !indent.chars().all(|c| c == ' ' || c == '\t') {
            return None;
        }
        let eol = self.line_end(end);
        if !self.src[end..eol].trim().is_empty() {
            return None;
        }
        if self.text.len() < indent.len() {
            return None;
        }
        let keep = self.text.len() - indent.len();
        self.text.truncate(keep);
        Some((eol + 1).min(self.src.len()))
    }

    /// Finish a construct occupying `start..end`; comments and directives
    /// both go through here.
    fn finish_construct(&mut self, start: usize, end: usize) {
        self.pos = self.slurp_line(start, end).unwrap_or(end);
    }

    fn line_comment(&mut self) {
        let start = self.pos;
        let end = self.line_end(start);
        self.finish_construct(start, end);
    }

    fn multi_line_comment(&mut self) -> Result<(), SyntaxError> {
        let start = self.pos;
        let open = &self.settings.multi_line_comment_start_token;
        let close = &self.settings.multi_line_comment_end_token;
        let body_start = start + open.len();
        match self.src[body_start..].find(close.as_str()) {
            Some(i) => {
                let end = body_start + i + close.len();
                self.finish_construct(start, end);
                Ok(())
            }
            None => Err(SyntaxError::new(
                "unterminated multi-line comment",
                self.src,
                start..body_start,
            )),
        }
    }

    /// Scan a directive at the current position. Returns `false` when the
    /// text after the directive token is not a known directive.
    fn directive(&mut self) -> Result<bool, SyntaxError> {
        let start = self.pos;
        let name_start = start + self.settings.directive_start_token.len();
        let rest = &self.src[name_start..];

        let ident_len = |s: &str| {
            let mut chars = s.char_indices();
            match chars.next() {
                Some((_, c)) if is_ident_start(c) => chars
                    .find(|(_, c)| !is_ident_char(*c))
                    .map_or(s.len(), |(i, _)| i),
                _ => 0,
            }
        };
        let name_len = match rest.strip_prefix('@') {
            Some(decorated) => match ident_len(decorated) {
                0 => 0,
                n => n + 1,
            },
            None => ident_len(rest),
        };
        let name = &rest[..name_len];
        if name_len == 0 || !DIRECTIVES.contains(&name) {
            return Ok(false);
        }

        let args_from = name_start + name_len;
        let (args_end, end) = self.directive_args_end(args_from);
        let raw_args = &self.src[args_from..args_end];
        let leading = raw_args.len() - raw_args.trim_start().len();

        let directive = Directive {
            name: name.to_string(),
            args: raw_args.trim().to_string(),
            args_start: args_from + leading,
        };
        self.finish_construct(start, end);
        // slurping may have trimmed indentation from the pending text
        self.flush_pending_before(start);
        self.chunks.push(Chunk {
            kind: ChunkKind::Directive(directive),
            span: start..end,
        });
        self.text_start = self.pos;
        Ok(true)
    }

    /// Pending text trimmed by slurping must be emitted before the
    /// directive chunk.
    fn flush_pending_before(&mut self, directive_start: usize) {
        if !self.text.is_empty() {
            self.chunks.push(Chunk {
                kind: ChunkKind::Text(std::mem::take(&mut self.text)),
                span: self.text_start..directive_start,
            });
        }
    }

    /// Find where directive arguments end.
    ///
    /// Returns `(args_end, directive_end)`. Arguments run to the end of the
    /// line, to an unquoted and unnested directive end token (which is
    /// consumed), or to a comment (which is consumed up to the newline).
    fn directive_args_end(&self, from: usize) -> (usize, usize) {
        let end_token = self.settings.directive_end_token.as_str();
        let comment = self.settings.comment_start_token.as_str();
        let mut depth = 0usize;
        let mut quote: Option<char> = None;
        let mut escaped = false;
        let mut i = from;
        while i < self.src.len() {
            let rest = &self.src[i..];
            let c = rest.chars().next().unwrap_or_default();
            if c == '\n' {
                return (i, i);
            }
            if let Some(q) = quote {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
            } else if c == '\'' || c == '"' {
                quote = Some(c);
            } else if matches!(c, '(' | '[' | '{') {
                depth += 1;
            } else if matches!(c, ')' | ']' | '}') {
                depth = depth.saturating_sub(1);
            } else if depth == 0 && rest.starts_with(comment) {
                return (i, self.line_end(i));
            } else if depth == 0 && rest.starts_with(end_token) {
                return (i, i + end_token.len());
            }
            i += c.len_utf8();
        }
        (self.src.len(), self.src.len())
    }
}
