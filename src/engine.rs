//! The scripting engine seen from the bridge.

use crate::shell::CancelToken;
use crate::Result;

/// A script interpreter the bridge can drive.
///
/// The bridge never looks inside a program or a context; it only moves them
/// between these three calls.
pub trait Engine: Send + Sync {
    /// Parsed, executable representation of a script.
    type Program;
    /// Mutable state a program runs against.
    type Context: Send;

    /// Parse raw source. `name` is used only in diagnostics.
    fn parse(&self, source: &[u8], name: &str) -> Result<Self::Program>;

    /// Create an independent execution context.
    fn new_context(&self) -> Result<Self::Context>;

    /// Run `program` against `context` until it completes or `cancel` fires.
    fn execute(
        &self,
        context: &mut Self::Context,
        program: &Self::Program,
        cancel: &CancelToken,
    ) -> Result<()>;
}
