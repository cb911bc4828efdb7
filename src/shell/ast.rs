//! Syntax tree produced by the shell parser.

use std::sync::Arc;

/// A parsed script, ready to run against a [`Runner`](super::Runner).
#[derive(Debug, Clone)]
pub struct Program {
    /// Display name of the source (usually its path).
    pub source_name: String,
    /// Top-level command list.
    pub body: List,
}

/// A sequence of and-or lists separated by `;` or newlines.
pub type List = Vec<AndOr>;

/// Pipelines joined by `&&` / `||`.
#[derive(Debug, Clone)]
pub struct AndOr {
    pub first: Pipeline,
    pub rest: Vec<(Connector, Pipeline)>,
}

/// Connector between two pipelines of an and-or list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connector {
    And,
    Or,
}

/// Commands joined by `|`, optionally negated with `!`.
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub negated: bool,
    pub commands: Vec<Command>,
}

#[derive(Debug, Clone)]
pub enum Command {
    Simple(SimpleCommand),
    Compound(CompoundCommand, Vec<Redirect>),
    FunctionDef {
        name: String,
        body: Arc<CompoundCommand>,
    },
}

#[derive(Debug, Clone)]
pub enum CompoundCommand {
    BraceGroup(List),
    Subshell(List),
    If {
        /// `(condition, body)` for the `if` and every `elif`.
        branches: Vec<(List, List)>,
        else_branch: Option<List>,
    },
    While {
        condition: List,
        body: List,
        /// `until` loops run while the condition fails.
        until: bool,
    },
    For {
        var: String,
        /// `None` iterates over the positional parameters.
        items: Option<Vec<Word>>,
        body: List,
    },
}

#[derive(Debug, Clone)]
pub struct SimpleCommand {
    pub assignments: Vec<Assignment>,
    pub words: Vec<Word>,
    pub redirects: Vec<Redirect>,
    /// Line the command starts on, for diagnostics.
    pub line: usize,
}

#[derive(Debug, Clone)]
pub struct Assignment {
    pub name: String,
    pub value: Word,
}

#[derive(Debug, Clone)]
pub struct Redirect {
    pub kind: RedirectKind,
    pub target: Word,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectKind {
    /// `> file`
    Output,
    /// `>> file`
    Append,
    /// `< file`
    Input,
}

/// A shell word made of literal and expandable parts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Word {
    pub parts: Vec<WordPart>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WordPart {
    /// Unquoted literal text.
    Literal(String),
    /// Escaped or single-quoted text, never split or treated as a keyword.
    Quoted(String),
    /// Contents of a double-quoted string.
    DoubleQuoted(Vec<WordPart>),
    Param(ParamExpansion),
    /// Raw source of a `$(...)` or backquote substitution.
    CommandSub(String),
    /// Raw source of a `$((...))` expression.
    Arithmetic(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamExpansion {
    pub name: String,
    pub op: Option<ParamOp>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParamOp {
    /// `${#name}`
    Length,
    /// `${name:-word}` (`colon`) or `${name-word}`
    Default { word: Word, colon: bool },
    /// `${name:=word}` or `${name=word}`
    Assign { word: Word, colon: bool },
    /// `${name:+word}` or `${name+word}`
    Alternative { word: Word, colon: bool },
}

impl Word {
    /// Create a word holding a single unquoted literal.
    pub fn literal(text: impl Into<String>) -> Self {
        Self {
            parts: vec![WordPart::Literal(text.into())],
        }
    }

    /// The text of the word if it is a single unquoted literal.
    ///
    /// Reserved words and function names are only recognized in this form.
    pub fn as_literal(&self) -> Option<&str> {
        match self.parts.as_slice() {
            [WordPart::Literal(text)] => Some(text),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

/// Returns true if `name` is a valid variable or function name.
pub fn is_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}
