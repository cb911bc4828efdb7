//! Error types for shellbridge.

use thiserror::Error;

use crate::handle::Handle;
use crate::shell::{ParseError, RuntimeError};

/// Common error type for shellbridge.
///
/// Every variant is flattened to a failure status at the C boundary; the
/// variant itself is only ever seen by Rust callers and in logs.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The script source could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The script source is not a valid program.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// A new execution context could not be created.
    #[error("context construction failed: {0}")]
    Construction(String),

    /// The program failed while running.
    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    /// The handle is null, stale, or was never minted.
    #[error("invalid handle: {0}")]
    InvalidHandle(Handle),

    /// A previous call panicked while holding the context.
    #[error("context {0} is poisoned")]
    ContextPoisoned(Handle),

    /// A required pointer argument was null.
    #[error("null argument: {0}")]
    NullArgument(&'static str),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Validation error.
    #[error("validation error: {0}")]
    Validation(String),
}

impl BridgeError {
    /// Short label for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::Io(_) => "io",
            BridgeError::Parse(_) => "parse",
            BridgeError::Construction(_) => "construction",
            BridgeError::Runtime(_) => "runtime",
            BridgeError::InvalidHandle(_) => "invalid_handle",
            BridgeError::ContextPoisoned(_) => "context_poisoned",
            BridgeError::NullArgument(_) => "null_argument",
            BridgeError::Config(_) => "config",
            BridgeError::Validation(_) => "validation",
        }
    }
}

/// Result type alias for shellbridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;
