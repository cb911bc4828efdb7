//! Error types raised by the shell engine.

use thiserror::Error;

/// A script could not be parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{source_name}:{line}:{column}: {message}")]
pub struct ParseError {
    /// Display name of the source being parsed.
    pub source_name: String,
    /// 1-based line of the offending token.
    pub line: usize,
    /// 1-based column of the offending token.
    pub column: usize,
    /// Human-readable description.
    pub message: String,
}

impl ParseError {
    pub fn new(
        source_name: impl Into<String>,
        line: usize,
        column: usize,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source_name: source_name.into(),
            line,
            column,
            message: message.into(),
        }
    }
}

/// A parsed program failed while running.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The program finished with a nonzero exit status.
    #[error("script exited with status {0}")]
    ExitStatus(i32),

    /// Execution was cancelled through its [`CancelToken`](super::CancelToken).
    #[error("execution cancelled")]
    Cancelled,

    /// The per-execution command budget was exhausted.
    #[error("script exceeded command limit of {0}")]
    CommandLimit(u64),

    /// Function, `eval` or `source` nesting went too deep.
    #[error("maximum call depth of {0} exceeded")]
    CallDepth(usize),

    /// Invalid arithmetic expression.
    #[error("arithmetic error: {0}")]
    Arithmetic(String),

    /// Malformed `${...}` expansion or nested parse failure.
    #[error("bad substitution: {0}")]
    BadSubstitution(String),

    /// Redirection or output stream failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
