//! Typed bridge entry points.
//!
//! A run moves through `Loading -> Parsing -> ContextReady -> Executing`
//! and ends in success or failure. Any error skips straight to failure and
//! is collapsed into a [`Status`]; the error itself is logged, never
//! returned to a foreign caller.

use std::fmt;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::handle::{Handle, HandleRegistry};
use crate::shell::CancelToken;
use crate::source::load_source;
use crate::{BridgeError, Result};

/// Outcome of a bridge call as seen by a foreign caller.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success = 0,
    Failure = 1,
}

impl Status {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// `Success` for `Ok`, `Failure` for any error.
    pub fn from_result<T>(result: &Result<T>) -> Self {
        match result {
            Ok(_) => Status::Success,
            Err(_) => Status::Failure,
        }
    }
}

impl From<Status> for i32 {
    fn from(status: Status) -> Self {
        status.code()
    }
}

/// The step a run is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Loading,
    Parsing,
    ContextReady,
    Executing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Loading => "loading",
            Stage::Parsing => "parsing",
            Stage::ContextReady => "context",
            Stage::Executing => "executing",
        })
    }
}

/// An engine plus the contexts handed out for it.
pub struct Bridge<E: Engine> {
    engine: E,
    contexts: HandleRegistry<E::Context>,
}

impl<E: Engine> Bridge<E> {
    /// Create a bridge allowing at most `max_contexts` live handles.
    pub fn new(engine: E, max_contexts: usize) -> Self {
        Self {
            engine,
            contexts: HandleRegistry::new(max_contexts),
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn contexts(&self) -> &HandleRegistry<E::Context> {
        &self.contexts
    }

    /// Build a fresh context and return a handle to it.
    pub fn create_context(&self) -> Result<Handle> {
        let context = self.engine.new_context()?;
        self.contexts.mint(context)
    }

    /// Destroy the context behind `handle`.
    pub fn release_context(&self, handle: Handle) -> Result<()> {
        self.contexts.release(handle)
    }

    /// Run `f` with exclusive access to the context behind `handle`.
    pub fn with_context<R>(&self, handle: Handle, f: impl FnOnce(&mut E::Context) -> R) -> Result<R> {
        let context = self.contexts.recover(handle)?;
        let mut guard = context
            .lock()
            .map_err(|_| BridgeError::ContextPoisoned(handle))?;
        Ok(f(&mut guard))
    }

    /// Run the script at `path` in a fresh context that is dropped afterwards.
    pub fn run_script(&self, path: impl AsRef<Path>) -> Status {
        self.run_script_in(path, None)
    }

    /// Run the script at `path` in the context behind `handle`, or in a
    /// fresh one when `handle` is `None` or null.
    pub fn run_script_in(&self, path: impl AsRef<Path>, handle: Option<Handle>) -> Status {
        self.run_script_with_cancel(path, handle, &CancelToken::new())
    }

    /// Like [`run_script_in`](Self::run_script_in), stopping early once
    /// `cancel` fires.
    pub fn run_script_with_cancel(
        &self,
        path: impl AsRef<Path>,
        handle: Option<Handle>,
        cancel: &CancelToken,
    ) -> Status {
        Status::from_result(&self.try_run_script(path.as_ref(), handle, cancel))
    }

    /// Run a script and return the error instead of a status.
    pub fn try_run_script(
        &self,
        path: &Path,
        handle: Option<Handle>,
        cancel: &CancelToken,
    ) -> Result<()> {
        let mut stage = Stage::Loading;
        let result = self.run_stages(path, handle, cancel, &mut stage);

        match &result {
            Ok(()) => info!(path = %path.display(), "script completed"),
            Err(e) => warn!(
                path = %path.display(),
                stage = %stage,
                kind = e.kind(),
                error = %e,
                "script failed"
            ),
        }
        result
    }

    fn run_stages(
        &self,
        path: &Path,
        handle: Option<Handle>,
        cancel: &CancelToken,
        stage: &mut Stage,
    ) -> Result<()> {
        debug!(path = %path.display(), "loading script");
        let source = load_source(path)?;

        *stage = Stage::Parsing;
        let name = path.display().to_string();
        let program = self.engine.parse(&source, &name)?;
        drop(source);

        *stage = Stage::ContextReady;
        match handle.filter(|h| !h.is_null()) {
            Some(handle) => {
                let context = self.contexts.recover(handle)?;
                let mut guard = context
                    .lock()
                    .map_err(|_| BridgeError::ContextPoisoned(handle))?;

                *stage = Stage::Executing;
                debug!(path = %name, %handle, "executing script");
                self.engine.execute(&mut guard, &program, cancel)
            }
            None => {
                let mut context = self.engine.new_context()?;

                *stage = Stage::Executing;
                debug!(path = %name, "executing script in implicit context");
                self.engine.execute(&mut context, &program, cancel)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunnerConfig;
    use crate::shell::{RuntimeError, ShellEngine};
    use std::path::PathBuf;

    fn bridge() -> Bridge<ShellEngine> {
        Bridge::new(ShellEngine::default(), 16)
    }

    fn script(dir: &tempfile::TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(Status::Success.code(), 0);
        assert_eq!(Status::Failure.code(), 1);
        assert_eq!(i32::from(Status::Failure), 1);
        assert_eq!(Status::from_result(&Ok(())), Status::Success);
        assert_eq!(
            Status::from_result::<()>(&Err(BridgeError::Validation("x".into()))),
            Status::Failure
        );
    }

    #[test]
    fn test_run_script_success() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(&dir, "ok.sh", "X=1\ntrue\n");
        assert_eq!(bridge().run_script(&path), Status::Success);
    }

    #[test]
    fn test_run_script_failures() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = bridge();

        assert_eq!(bridge.run_script(dir.path().join("missing.sh")), Status::Failure);
        assert_eq!(bridge.run_script(dir.path()), Status::Failure);
        let unparsable = script(&dir, "bad.sh", "if true; then\n");
        assert_eq!(bridge.run_script(&unparsable), Status::Failure);
        let failing = script(&dir, "fail.sh", "exit 2\n");
        assert_eq!(bridge.run_script(&failing), Status::Failure);
    }

    #[test]
    fn test_try_run_script_reports_kind() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = bridge();
        let cancel = CancelToken::new();

        let err = bridge
            .try_run_script(&dir.path().join("missing.sh"), None, &cancel)
            .unwrap_err();
        assert_eq!(err.kind(), "io");

        let bad = script(&dir, "bad.sh", "while true; do\n");
        let err = bridge.try_run_script(&bad, None, &cancel).unwrap_err();
        assert_eq!(err.kind(), "parse");
    }

    #[test]
    fn test_context_persists_between_runs() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = bridge();
        let handle = bridge.create_context().unwrap();

        let set = script(&dir, "set.sh", "export SHARED=value\n");
        let check = script(&dir, "check.sh", "[ \"$SHARED\" = value ]\n");

        assert_eq!(bridge.run_script_in(&set, Some(handle)), Status::Success);
        assert_eq!(bridge.run_script_in(&check, Some(handle)), Status::Success);
        // A fresh context does not see the variable.
        assert_eq!(bridge.run_script(&check), Status::Failure);

        let value = bridge
            .with_context(handle, |runner| runner.var("SHARED").map(str::to_string))
            .unwrap();
        assert_eq!(value.as_deref(), Some("value"));
    }

    #[test]
    fn test_null_handle_uses_implicit_context() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(&dir, "ok.sh", "true\n");
        assert_eq!(bridge().run_script_in(&path, Some(Handle::NULL)), Status::Success);
    }

    #[test]
    fn test_released_handle_fails() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = bridge();
        let handle = bridge.create_context().unwrap();
        bridge.release_context(handle).unwrap();

        let path = script(&dir, "ok.sh", "true\n");
        assert_eq!(bridge.run_script_in(&path, Some(handle)), Status::Failure);
        assert!(matches!(
            bridge.release_context(handle),
            Err(BridgeError::InvalidHandle(_))
        ));
    }

    #[test]
    fn test_cancelled_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(&dir, "spin.sh", "while true; do :; done\n");
        let cancel = CancelToken::new();
        cancel.cancel();

        let bridge = bridge();
        let err = bridge.try_run_script(&path, None, &cancel).unwrap_err();
        assert!(matches!(err, BridgeError::Runtime(RuntimeError::Cancelled)));
        assert_eq!(
            bridge.run_script_with_cancel(&path, None, &cancel),
            Status::Failure
        );
    }

    #[test]
    fn test_context_limit() {
        let bridge = Bridge::new(ShellEngine::new(RunnerConfig::default()), 1);
        let first = bridge.create_context().unwrap();
        assert!(matches!(
            bridge.create_context(),
            Err(BridgeError::Construction(_))
        ));
        bridge.release_context(first).unwrap();
        assert!(bridge.create_context().is_ok());
    }
}
