//! Built-in POSIX-style shell engine.
//!
//! Supports quoting, parameter and arithmetic expansion, command
//! substitution, pipelines, and-or lists, `if`/`while`/`until`/`for`,
//! functions, redirections, a set of builtins, and external commands.
//! Globbing, job control and `case` are not supported.

mod arith;
pub mod ast;
mod builtins;
mod error;
mod expand;
pub mod lexer;
pub mod parser;
mod runner;

pub use ast::Program;
pub use error::{ParseError, RuntimeError};
pub use parser::parse;
pub use runner::{CancelToken, Runner, SharedBuffer};

use tracing::debug;

use crate::config::RunnerConfig;
use crate::engine::Engine;
use crate::{BridgeError, Result};

/// [`Engine`] implementation backed by [`Runner`].
#[derive(Debug, Clone, Default)]
pub struct ShellEngine {
    config: RunnerConfig,
}

impl ShellEngine {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }
}

impl Engine for ShellEngine {
    type Program = Program;
    type Context = Runner;

    fn parse(&self, source: &[u8], name: &str) -> Result<Program> {
        let text = std::str::from_utf8(source).map_err(|e| {
            let line = source[..e.valid_up_to()].iter().filter(|b| **b == b'\n').count() + 1;
            ParseError::new(name, line, 1, "script is not valid UTF-8")
        })?;
        let program = parser::parse(text, name)?;
        debug!(source = name, commands = program.body.len(), "parsed script");
        Ok(program)
    }

    fn new_context(&self) -> Result<Runner> {
        Runner::new(&self.config)
            .map_err(|e| BridgeError::Construction(format!("cannot determine working directory: {e}")))
    }

    fn execute(&self, context: &mut Runner, program: &Program, cancel: &CancelToken) -> Result<()> {
        context.run(program, cancel)?;
        Ok(())
    }
}
