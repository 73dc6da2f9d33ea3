//! S-expression reader for SWANK message payloads.
//!
//! Every frame received from a SWANK server carries exactly one top-level
//! list. This module turns that text into a [`Node`] tree of atoms and
//! lists without interpreting it any further; the session layer decides
//! what the atoms mean.
//!
//! # Grammar
//!
//! ```text
//! list    := '(' item* ')' | '[' item* ']'
//! item    := list | string | atom | comment | whitespace
//! string  := '"' (escape | any-but-quote)* '"'
//! atom    := (escape | any-but-delimiter)+
//! comment := ';' any-but-newline* ('\n' | EOF)
//! escape  := '\' any
//! ```
//!
//! Atoms are stored raw, so a quoted string keeps its quotes and escapes
//! until [`Node::text`] (or [`unquote`]) is asked for the literal value.
//! This keeps the symbol `nil` distinguishable from the string `"nil"`.

use std::fmt;

use thiserror::Error;

/// Default bound on list nesting accepted by [`Parser::default`].
pub const DEFAULT_MAX_DEPTH: usize = 512;

/// A parsed s-expression element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// A symbol, number, keyword or still-quoted string literal.
    Atom(String),
    /// An ordered list (or vector) of nested nodes.
    List(Vec<Node>),
}

impl Node {
    /// Build an atom node.
    pub fn atom(text: impl Into<String>) -> Self {
        Node::Atom(text.into())
    }

    /// Raw atom text, if this node is an atom.
    pub fn as_atom(&self) -> Option<&str> {
        match self {
            Node::Atom(text) => Some(text),
            Node::List(_) => None,
        }
    }

    /// Child nodes, if this node is a list.
    pub fn as_list(&self) -> Option<&[Node]> {
        match self {
            Node::List(items) => Some(items),
            Node::Atom(_) => None,
        }
    }

    /// Literal value of an atom: string quotes and escapes removed.
    pub fn text(&self) -> Option<String> {
        self.as_atom().map(unquote)
    }

    /// Case-insensitive comparison against a keyword or symbol name.
    pub fn is_keyword(&self, keyword: &str) -> bool {
        self.as_atom()
            .is_some_and(|text| text.eq_ignore_ascii_case(keyword))
    }

    /// True for the symbol `nil` and for the empty list.
    pub fn is_nil(&self) -> bool {
        match self {
            Node::Atom(text) => text.eq_ignore_ascii_case("nil"),
            Node::List(items) => items.is_empty(),
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Atom(text) => f.write_str(text),
            Node::List(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str(")")
            }
        }
    }
}

/// The distinguishable ways a payload can fail to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseErrorKind {
    /// Something other than whitespace precedes the first opening brace.
    #[error("s-expression does not start with an opening brace")]
    NoStartBrace,
    /// Input ended inside a list, or a list was closed with the wrong brace.
    #[error("s-expression is not closed with a matching brace")]
    NoCloseBrace,
    /// Input ended inside a string literal.
    #[error("string is not closed with a double quote")]
    NoCloseString,
    /// An escape character has no literal left to apply to.
    #[error("literal is missing after the escape character")]
    MissingLiteral,
    /// Input contains nothing but whitespace.
    #[error("s-expression is empty")]
    Empty,
    /// Lists are nested deeper than the parser allows.
    #[error("s-expression nesting exceeds the maximum depth")]
    TooDeep,
}

/// A parse failure together with whatever was built before it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}")]
pub struct ParseError {
    /// What went wrong.
    pub kind: ParseErrorKind,
    /// Best-effort partial tree (always a list).
    pub partial: Node,
}

/// A successfully parsed top-level list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parsed {
    /// Bytes consumed, up to and including the closing brace.
    pub consumed: usize,
    /// The top-level list.
    pub node: Node,
}

type ListResult = Result<(usize, Vec<Node>), (ParseErrorKind, Vec<Node>)>;

/// Recursive-descent s-expression parser with a nesting bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parser {
    max_depth: usize,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}

impl Parser {
    /// Create a parser that rejects lists nested deeper than `max_depth`.
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    /// Parse the first list in `text`.
    ///
    /// Leading whitespace is skipped. Anything after the closing brace of
    /// the first list is left unconsumed.
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] carrying the [`ParseErrorKind`] and the
    /// partial tree built up to the failure.
    pub fn parse(&self, text: &str) -> Result<Parsed, ParseError> {
        let bytes = text.as_bytes();
        let start = match bytes.iter().position(|&b| !is_space(b)) {
            Some(pos) => pos,
            None => return Err(fail(ParseErrorKind::Empty, Vec::new())),
        };

        let close = match bytes[start] {
            b'(' => b')',
            b'[' => b']',
            _ => return Err(fail(ParseErrorKind::NoStartBrace, Vec::new())),
        };

        match self.parse_list(text, start + 1, close, 1) {
            Ok((consumed, items)) => Ok(Parsed {
                consumed,
                node: Node::List(items),
            }),
            Err((kind, items)) => Err(fail(kind, items)),
        }
    }

    /// Parse list items from `start` until `close`; returns the offset just
    /// past the closing brace.
    fn parse_list(&self, text: &str, start: usize, close: u8, depth: usize) -> ListResult {
        if depth > self.max_depth {
            return Err((ParseErrorKind::TooDeep, Vec::new()));
        }

        let bytes = text.as_bytes();
        let mut items = Vec::new();
        let mut pos = start;

        while pos < bytes.len() {
            let c = bytes[pos];
            if is_space(c) {
                pos += 1;
            } else if c == b';' {
                pos = skip_comment(bytes, pos);
            } else if c == b'"' {
                match scan_string(text, pos) {
                    Ok(end) => {
                        items.push(Node::atom(&text[pos..end]));
                        pos = end;
                    }
                    Err(kind) => return Err((kind, items)),
                }
            } else if c == b'(' || c == b'[' {
                let sub_close = if c == b'(' { b')' } else { b']' };
                match self.parse_list(text, pos + 1, sub_close, depth + 1) {
                    Ok((end, sub)) => {
                        items.push(Node::List(sub));
                        pos = end;
                    }
                    Err((kind, sub)) => {
                        items.push(Node::List(sub));
                        return Err((kind, items));
                    }
                }
            } else if c == close {
                return Ok((pos + 1, items));
            } else if c == b')' || c == b']' {
                return Err((ParseErrorKind::NoCloseBrace, items));
            } else {
                match scan_atom(text, pos) {
                    Ok(end) => {
                        items.push(Node::atom(&text[pos..end]));
                        pos = end;
                    }
                    Err(kind) => return Err((kind, items)),
                }
            }
        }

        Err((ParseErrorKind::NoCloseBrace, items))
    }
}

/// Parse with the default nesting bound.
///
/// # Errors
///
/// See [`Parser::parse`].
pub fn parse(text: &str) -> Result<Parsed, ParseError> {
    Parser::default().parse(text)
}

fn fail(kind: ParseErrorKind, items: Vec<Node>) -> ParseError {
    ParseError {
        kind,
        partial: Node::List(items),
    }
}

fn is_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c)
}

fn is_delimiter(b: u8) -> bool {
    is_space(b) || matches!(b, b'(' | b')' | b'[' | b']' | b'"' | b';')
}

fn skip_comment(bytes: &[u8], start: usize) -> usize {
    match bytes[start..].iter().position(|&b| b == b'\n') {
        Some(offset) => start + offset + 1,
        None => bytes.len(),
    }
}

/// Offset just past the escaped literal that follows the backslash at `pos`.
///
/// An escape is missing its literal when nothing follows it, and also when
/// its literal is the final byte: the list around it can then never close.
fn skip_escape(text: &str, pos: usize) -> Result<usize, ParseErrorKind> {
    let literal = text[pos + 1..]
        .chars()
        .next()
        .ok_or(ParseErrorKind::MissingLiteral)?;
    let end = pos + 1 + literal.len_utf8();
    if end >= text.len() {
        return Err(ParseErrorKind::MissingLiteral);
    }
    Ok(end)
}

fn scan_string(text: &str, start: usize) -> Result<usize, ParseErrorKind> {
    let bytes = text.as_bytes();
    let mut pos = start + 1;
    while pos < bytes.len() {
        match bytes[pos] {
            b'\\' => pos = skip_escape(text, pos)?,
            b'"' => return Ok(pos + 1),
            _ => pos += 1,
        }
    }
    Err(ParseErrorKind::NoCloseString)
}

fn scan_atom(text: &str, start: usize) -> Result<usize, ParseErrorKind> {
    let bytes = text.as_bytes();
    let mut pos = start;
    while pos < bytes.len() {
        match bytes[pos] {
            b'\\' => pos = skip_escape(text, pos)?,
            b if is_delimiter(b) => break,
            _ => pos += 1,
        }
    }
    Ok(pos)
}

/// Strip surrounding double quotes and resolve backslash escapes.
///
/// Text that is not a quoted literal is returned unchanged.
pub fn unquote(text: &str) -> String {
    if text.len() < 2 || !text.starts_with('"') || !text.ends_with('"') {
        return text.to_string();
    }

    let inner = &text[1..text.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(escaped) => out.push(escaped),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Quote `text` as a Lisp string literal.
pub fn requote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Look up the value of `key` in a property list.
///
/// Keys are only matched at even positions; a repeated key yields its last
/// value.
pub fn plist_get<'a>(items: &'a [Node], key: &str) -> Option<&'a Node> {
    items
        .chunks_exact(2)
        .rev()
        .find(|pair| pair[0].is_keyword(key))
        .map(|pair| &pair[1])
}
