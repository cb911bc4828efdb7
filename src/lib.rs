//! shellbridge - run shell scripts from foreign callers
//!
//! Loads a script from a path, parses it, runs it in a fresh or recovered
//! execution context, and reports a single status code. Contexts cross the
//! C boundary as opaque, checked handles.

pub mod bridge;
pub mod config;
pub mod engine;
pub mod error;
pub mod ffi;
pub mod handle;
pub mod logging;
pub mod shell;
pub mod source;

pub use bridge::{Bridge, Status};
pub use config::Config;
pub use engine::Engine;
pub use error::{BridgeError, Result};
pub use handle::{Handle, HandleRegistry};
pub use shell::{CancelToken, ParseError, Program, Runner, RuntimeError, SharedBuffer, ShellEngine};
pub use source::load_source;
