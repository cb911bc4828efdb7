//! Test helpers for integration tests.
//!
//! Provides script fixtures in temporary directories and a counting engine
//! that records how often each engine capability is invoked.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use tempfile::TempDir;

use shellbridge::config::RunnerConfig;
use shellbridge::{Bridge, CancelToken, Engine, Program, Result, Runner, SharedBuffer, ShellEngine};

/// A temporary directory holding test scripts.
pub struct ScriptDir {
    dir: TempDir,
}

impl ScriptDir {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("failed to create temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `body` to `name` and return its path.
    pub fn script(&self, name: &str, body: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, body).expect("failed to write script");
        path
    }

    /// A path inside the directory that does not exist.
    pub fn missing(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

/// Wraps [`ShellEngine`] and counts calls to each capability.
///
/// Contexts capture their output so tests stay quiet.
#[derive(Default)]
pub struct CountingEngine {
    inner: ShellEngine,
    pub parses: AtomicUsize,
    pub contexts: AtomicUsize,
    pub executions: AtomicUsize,
}

impl CountingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: RunnerConfig) -> Self {
        Self {
            inner: ShellEngine::new(config),
            ..Self::default()
        }
    }

    pub fn parses(&self) -> usize {
        self.parses.load(Ordering::SeqCst)
    }

    pub fn contexts(&self) -> usize {
        self.contexts.load(Ordering::SeqCst)
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

impl Engine for CountingEngine {
    type Program = Program;
    type Context = Runner;

    fn parse(&self, source: &[u8], name: &str) -> Result<Program> {
        self.parses.fetch_add(1, Ordering::SeqCst);
        self.inner.parse(source, name)
    }

    fn new_context(&self) -> Result<Runner> {
        self.contexts.fetch_add(1, Ordering::SeqCst);
        let runner = self.inner.new_context()?;
        Ok(runner.with_output(SharedBuffer::new(), SharedBuffer::new()))
    }

    fn execute(&self, context: &mut Runner, program: &Program, cancel: &CancelToken) -> Result<()> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        self.inner.execute(context, program, cancel)
    }
}

/// A bridge over a fresh [`CountingEngine`].
pub fn counting_bridge() -> Bridge<CountingEngine> {
    Bridge::new(CountingEngine::new(), 64)
}
