//! Execution context for parsed shell programs.

use std::collections::HashMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::{Command as Process, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use tracing::{debug, trace};

use super::ast::{
    AndOr, Command, CompoundCommand, Connector, List, Pipeline, Program, Redirect, RedirectKind,
    SimpleCommand,
};
use super::builtins;
use super::error::RuntimeError;
use super::parser;
use crate::config::RunnerConfig;

/// Cooperative cancellation flag shared between a caller and a running program.
///
/// The runner checks the flag before every command and loop iteration.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Already running external processes finish first.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// A cloneable in-memory output sink.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, decoded lossily as UTF-8.
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.lock()).into_owned()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn append(&self, data: &[u8]) {
        self.lock().extend_from_slice(data);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<u8>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.append(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Where a runner's top-level output goes.
#[derive(Debug, Clone)]
enum OutputStream {
    Stdout,
    Stderr,
    Capture(SharedBuffer),
}

impl OutputStream {
    fn write_all(&self, data: &[u8]) -> io::Result<()> {
        match self {
            OutputStream::Stdout => {
                let mut out = io::stdout().lock();
                out.write_all(data)?;
                out.flush()
            }
            OutputStream::Stderr => io::stderr().lock().write_all(data),
            OutputStream::Capture(buffer) => {
                buffer.append(data);
                Ok(())
            }
        }
    }

    fn stdio(&self) -> Stdio {
        match self {
            OutputStream::Capture(_) => Stdio::piped(),
            _ => Stdio::inherit(),
        }
    }

    fn is_captured(&self) -> bool {
        matches!(self, OutputStream::Capture(_))
    }
}

#[derive(Debug, Clone)]
pub(super) struct Variable {
    pub(super) value: String,
    pub(super) exported: bool,
}

/// How control leaves a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Flow {
    Normal,
    Break(usize),
    Continue(usize),
    Return,
    Exit,
}

#[derive(Debug)]
enum Sink {
    Capture(Vec<u8>),
    File(File),
}

/// Redirections in effect for a command or pipeline stage.
#[derive(Debug, Default)]
struct IoFrame {
    stdin: Option<Vec<u8>>,
    stdout: Option<Sink>,
}

enum LoopStep {
    Next,
    Stop,
    Propagate(Flow),
}

fn loop_step(flow: Flow) -> LoopStep {
    match flow {
        Flow::Normal | Flow::Continue(1) => LoopStep::Next,
        Flow::Break(1) => LoopStep::Stop,
        Flow::Break(n) => LoopStep::Propagate(Flow::Break(n - 1)),
        Flow::Continue(n) => LoopStep::Propagate(Flow::Continue(n - 1)),
        other => LoopStep::Propagate(other),
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

/// The mutable state a shell program runs against.
///
/// Variables, working directory, functions and positional parameters persist
/// across [`Runner::run`] calls, so one runner can execute several programs
/// in sequence.
pub struct Runner {
    pub(super) vars: HashMap<String, Variable>,
    pub(super) functions: HashMap<String, Arc<CompoundCommand>>,
    pub(super) cwd: PathBuf,
    pub(super) script_name: String,
    pub(super) positional: Vec<String>,
    pub(super) last_status: i32,
    pub(super) errexit: bool,
    pub(super) loop_depth: usize,
    stdout: OutputStream,
    stderr: OutputStream,
    frames: Vec<IoFrame>,
    config: RunnerConfig,
    cancel: CancelToken,
    commands_run: u64,
    depth: usize,
    condition_depth: usize,
    errexit_pending: bool,
    pub(super) substitutions: u64,
}

impl fmt::Debug for Runner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runner")
            .field("cwd", &self.cwd)
            .field("vars", &self.vars.len())
            .field("functions", &self.functions.len())
            .field("last_status", &self.last_status)
            .finish_non_exhaustive()
    }
}

impl Runner {
    /// Create a runner rooted at the process's current directory.
    ///
    /// With `inherit_env` set, every process environment variable becomes an
    /// exported shell variable.
    pub fn new(config: &RunnerConfig) -> io::Result<Self> {
        let cwd = std::env::current_dir()?;

        let mut vars = HashMap::new();
        if config.inherit_env {
            for (name, value) in std::env::vars_os() {
                if let (Ok(name), Ok(value)) = (name.into_string(), value.into_string()) {
                    vars.insert(
                        name,
                        Variable {
                            value,
                            exported: true,
                        },
                    );
                }
            }
        }
        vars.insert(
            "PWD".to_string(),
            Variable {
                value: cwd.display().to_string(),
                exported: true,
            },
        );

        Ok(Self {
            vars,
            functions: HashMap::new(),
            cwd,
            script_name: "shellbridge".to_string(),
            positional: Vec::new(),
            last_status: 0,
            errexit: false,
            loop_depth: 0,
            stdout: OutputStream::Stdout,
            stderr: OutputStream::Stderr,
            frames: Vec::new(),
            config: config.clone(),
            cancel: CancelToken::new(),
            commands_run: 0,
            depth: 0,
            condition_depth: 0,
            errexit_pending: false,
            substitutions: 0,
        })
    }

    /// Send output to in-memory buffers instead of the process's streams.
    pub fn with_output(mut self, stdout: SharedBuffer, stderr: SharedBuffer) -> Self {
        self.stdout = OutputStream::Capture(stdout);
        self.stderr = OutputStream::Capture(stderr);
        self
    }

    /// Run a parsed program to completion.
    ///
    /// `$?` starts at 0 for every program. Fails with
    /// [`RuntimeError::ExitStatus`] when the program finishes with a nonzero
    /// status.
    pub fn run(&mut self, program: &Program, cancel: &CancelToken) -> Result<(), RuntimeError> {
        self.cancel = cancel.clone();
        self.commands_run = 0;
        self.depth = 0;
        self.condition_depth = 0;
        self.loop_depth = 0;
        self.errexit_pending = false;
        self.last_status = 0;
        self.frames.clear();
        self.script_name = program.source_name.clone();

        let result = self.exec_list(&program.body);
        self.frames.clear();
        result?;

        if self.last_status != 0 {
            return Err(RuntimeError::ExitStatus(self.last_status));
        }
        Ok(())
    }

    pub fn var(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(|v| v.value.as_str())
    }

    pub fn is_exported(&self, name: &str) -> bool {
        self.vars.get(name).is_some_and(|v| v.exported)
    }

    /// Set a variable, keeping its export flag if it already exists.
    pub fn set_var(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.vars.get_mut(name) {
            Some(var) => var.value = value,
            None => {
                self.vars.insert(
                    name.to_string(),
                    Variable {
                        value,
                        exported: false,
                    },
                );
            }
        }
    }

    pub fn export_var(&mut self, name: &str) {
        self.vars
            .entry(name.to_string())
            .or_insert_with(|| Variable {
                value: String::new(),
                exported: false,
            })
            .exported = true;
    }

    pub fn unset_var(&mut self, name: &str) {
        self.vars.remove(name);
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn last_status(&self) -> i32 {
        self.last_status
    }

    pub fn positional(&self) -> &[String] {
        &self.positional
    }

    pub fn set_positional(&mut self, args: Vec<String>) {
        self.positional = args;
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub(super) fn exported_env(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars
            .iter()
            .filter(|(_, v)| v.exported)
            .map(|(k, v)| (k.as_str(), v.value.as_str()))
    }

    pub(super) fn resolve_path(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.cwd.join(path)
        }
    }

    pub(super) fn write_stdout(&mut self, data: &[u8]) -> Result<(), RuntimeError> {
        if let Some(sink) = self.frames.iter_mut().rev().find_map(|f| f.stdout.as_mut()) {
            match sink {
                Sink::Capture(buffer) => buffer.extend_from_slice(data),
                Sink::File(file) => file.write_all(data)?,
            }
            return Ok(());
        }
        self.stdout.write_all(data)?;
        Ok(())
    }

    pub(super) fn write_stderr(&mut self, data: &[u8]) -> Result<(), RuntimeError> {
        self.stderr.write_all(data)?;
        Ok(())
    }

    /// Print a diagnostic prefixed with the script name.
    pub(super) fn report(&mut self, message: &str) -> Result<(), RuntimeError> {
        let line = format!("{}: {}\n", self.script_name, message);
        self.write_stderr(line.as_bytes())
    }

    /// Read one line from the innermost redirected stdin, or the process stdin.
    pub(super) fn read_line(&mut self) -> Result<Option<String>, RuntimeError> {
        if let Some(data) = self.frames.iter_mut().rev().find_map(|f| f.stdin.as_mut()) {
            if data.is_empty() {
                return Ok(None);
            }
            let end = data.iter().position(|b| *b == b'\n');
            let line: Vec<u8> = match end {
                Some(end) => {
                    let mut line: Vec<u8> = data.drain(..=end).collect();
                    line.pop();
                    line
                }
                None => std::mem::take(data),
            };
            return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
        }

        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line)? == 0 {
            return Ok(None);
        }
        if line.ends_with('\n') {
            line.pop();
        }
        Ok(Some(line))
    }

    fn current_stdin(&self) -> Option<Vec<u8>> {
        self.frames.iter().rev().find_map(|f| f.stdin.clone())
    }

    fn stdout_captured(&self) -> bool {
        self.frames.iter().any(|f| f.stdout.is_some()) || self.stdout.is_captured()
    }

    fn tick(&mut self) -> Result<(), RuntimeError> {
        if self.cancel.is_cancelled() {
            return Err(RuntimeError::Cancelled);
        }
        self.commands_run += 1;
        let limit = self.config.max_commands;
        if limit > 0 && self.commands_run > limit {
            return Err(RuntimeError::CommandLimit(limit));
        }
        Ok(())
    }

    fn enter_call(&mut self) -> Result<(), RuntimeError> {
        if self.depth >= self.config.max_call_depth {
            return Err(RuntimeError::CallDepth(self.config.max_call_depth));
        }
        self.depth += 1;
        Ok(())
    }

    /// Parse and run `source` in this context, as `eval` and `source` do.
    ///
    /// A syntax error is reported on stderr and yields status 2.
    pub(super) fn run_nested(&mut self, source: &str, name: &str) -> Result<Flow, RuntimeError> {
        let program = match parser::parse(source, name) {
            Ok(program) => program,
            Err(e) => {
                self.write_stderr(format!("{e}\n").as_bytes())?;
                self.last_status = 2;
                return Ok(Flow::Normal);
            }
        };

        self.enter_call()?;
        let result = self.exec_list(&program.body);
        self.depth -= 1;
        result
    }

    /// Run `list` with its output captured, isolated like a subshell.
    pub(super) fn capture_output(&mut self, list: &List) -> Result<Vec<u8>, RuntimeError> {
        self.enter_call()?;
        self.frames.push(IoFrame {
            stdin: None,
            stdout: Some(Sink::Capture(Vec::new())),
        });
        let result = self.exec_subshell(list);
        let frame = self.frames.pop();
        self.depth -= 1;
        result?;

        Ok(match frame.and_then(|f| f.stdout) {
            Some(Sink::Capture(buffer)) => buffer,
            _ => Vec::new(),
        })
    }

    pub(super) fn exec_list(&mut self, list: &List) -> Result<Flow, RuntimeError> {
        for and_or in list {
            let flow = self.exec_and_or(and_or)?;
            if flow != Flow::Normal {
                return Ok(flow);
            }
            if self.errexit && self.errexit_pending && self.condition_depth == 0 {
                debug!(status = self.last_status, "errexit triggered");
                return Ok(Flow::Exit);
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_and_or(&mut self, and_or: &AndOr) -> Result<Flow, RuntimeError> {
        let count = 1 + and_or.rest.len();
        let mut flow = self.exec_guarded(&and_or.first, count > 1)?;
        let mut final_ran = count == 1;

        for (index, (connector, pipeline)) in and_or.rest.iter().enumerate() {
            if flow != Flow::Normal {
                return Ok(flow);
            }
            let run = match connector {
                Connector::And => self.last_status == 0,
                Connector::Or => self.last_status != 0,
            };
            if run {
                let is_final = index + 2 == count;
                flow = self.exec_guarded(pipeline, !is_final)?;
                final_ran = is_final;
            }
        }

        let final_negated = and_or
            .rest
            .last()
            .map_or(and_or.first.negated, |(_, p)| p.negated);
        self.errexit_pending = final_ran && !final_negated && self.last_status != 0;
        Ok(flow)
    }

    /// Run a pipeline, exempting it from errexit when `guarded`.
    fn exec_guarded(&mut self, pipeline: &Pipeline, guarded: bool) -> Result<Flow, RuntimeError> {
        if !guarded {
            return self.exec_pipeline(pipeline);
        }
        self.condition_depth += 1;
        let result = self.exec_pipeline(pipeline);
        self.condition_depth -= 1;
        result
    }

    fn exec_condition(&mut self, list: &List) -> Result<Flow, RuntimeError> {
        self.condition_depth += 1;
        let result = self.exec_list(list);
        self.condition_depth -= 1;
        result
    }

    fn exec_pipeline(&mut self, pipeline: &Pipeline) -> Result<Flow, RuntimeError> {
        if pipeline.negated {
            self.condition_depth += 1;
        }
        let result = self.exec_stages(&pipeline.commands);
        if pipeline.negated {
            self.condition_depth -= 1;
            self.last_status = i32::from(self.last_status == 0);
        }
        result
    }

    fn exec_stages(&mut self, commands: &[Command]) -> Result<Flow, RuntimeError> {
        if let [command] = commands {
            return self.exec_command(command);
        }

        let last = commands.len() - 1;
        let mut input: Option<Vec<u8>> = None;
        let mut flow = Flow::Normal;

        for (index, command) in commands.iter().enumerate() {
            let capture = index < last;
            self.frames.push(IoFrame {
                stdin: if index > 0 { Some(input.take().unwrap_or_default()) } else { None },
                stdout: capture.then(|| Sink::Capture(Vec::new())),
            });
            let result = self.exec_command(command);
            let frame = self.frames.pop();
            let stage_flow = result?;

            if capture {
                input = match frame.and_then(|f| f.stdout) {
                    Some(Sink::Capture(buffer)) => Some(buffer),
                    _ => None,
                };
            } else {
                flow = stage_flow;
            }
        }

        Ok(flow)
    }

    fn exec_command(&mut self, command: &Command) -> Result<Flow, RuntimeError> {
        match command {
            Command::Simple(simple) => self.exec_simple(simple),
            Command::Compound(compound, redirects) => {
                self.tick()?;
                self.with_redirects(redirects, |runner| runner.exec_compound(compound))
            }
            Command::FunctionDef { name, body } => {
                self.tick()?;
                self.functions.insert(name.clone(), Arc::clone(body));
                self.last_status = 0;
                Ok(Flow::Normal)
            }
        }
    }

    fn with_redirects(
        &mut self,
        redirects: &[Redirect],
        f: impl FnOnce(&mut Self) -> Result<Flow, RuntimeError>,
    ) -> Result<Flow, RuntimeError> {
        if redirects.is_empty() {
            return f(self);
        }

        let Some(frame) = self.open_redirects(redirects)? else {
            return Ok(Flow::Normal);
        };
        self.frames.push(frame);
        let result = f(self);
        if let Some(IoFrame {
            stdout: Some(Sink::File(mut file)),
            ..
        }) = self.frames.pop()
        {
            file.flush()?;
        }
        result
    }

    /// Open redirection targets. On failure the error is reported, the
    /// status set to 1, and `None` returned so the command is skipped.
    fn open_redirects(&mut self, redirects: &[Redirect]) -> Result<Option<IoFrame>, RuntimeError> {
        let mut frame = IoFrame::default();

        for redirect in redirects {
            let target = self.expand_word(&redirect.target)?;
            let path = self.resolve_path(&target);
            let opened = match redirect.kind {
                RedirectKind::Output => File::create(&path).map(|file| {
                    frame.stdout = Some(Sink::File(file));
                }),
                RedirectKind::Append => OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .map(|file| {
                        frame.stdout = Some(Sink::File(file));
                    }),
                RedirectKind::Input => std::fs::read(&path).map(|data| {
                    frame.stdin = Some(data);
                }),
            };

            if let Err(e) = opened {
                self.report(&format!("{target}: {e}"))?;
                self.last_status = 1;
                return Ok(None);
            }
        }

        Ok(Some(frame))
    }

    fn exec_simple(&mut self, command: &SimpleCommand) -> Result<Flow, RuntimeError> {
        self.tick()?;

        let substitutions = self.substitutions;
        let mut args = Vec::new();
        for word in &command.words {
            args.extend(self.expand_fields(word)?);
        }
        let mut assignments = Vec::with_capacity(command.assignments.len());
        for assignment in &command.assignments {
            let value = self.expand_word(&assignment.value)?;
            assignments.push((assignment.name.clone(), value));
        }

        if args.is_empty() {
            for (name, value) in assignments {
                self.set_var(&name, value);
            }
            if self.substitutions == substitutions {
                self.last_status = 0;
            }
            if !command.redirects.is_empty() && self.open_redirects(&command.redirects)?.is_some() {
                self.last_status = 0;
            }
            return Ok(Flow::Normal);
        }

        trace!(command = %args[0], line = command.line, "executing command");
        self.with_redirects(&command.redirects, |runner| {
            runner.dispatch(&args, &assignments)
        })
    }

    fn dispatch(
        &mut self,
        args: &[String],
        assignments: &[(String, String)],
    ) -> Result<Flow, RuntimeError> {
        let name = args[0].as_str();

        if let Some(body) = self.functions.get(name).cloned() {
            return self.with_temp_vars(assignments, |runner| {
                runner.call_function(&body, &args[1..])
            });
        }
        if let Some(builtin) = builtins::lookup(name) {
            return self.with_temp_vars(assignments, |runner| builtin(runner, args));
        }
        self.spawn_external(args, assignments)
    }

    fn with_temp_vars(
        &mut self,
        assignments: &[(String, String)],
        f: impl FnOnce(&mut Self) -> Result<Flow, RuntimeError>,
    ) -> Result<Flow, RuntimeError> {
        if assignments.is_empty() {
            return f(self);
        }

        let saved: Vec<(String, Option<Variable>)> = assignments
            .iter()
            .map(|(name, value)| {
                let previous = self.vars.insert(
                    name.clone(),
                    Variable {
                        value: value.clone(),
                        exported: true,
                    },
                );
                (name.clone(), previous)
            })
            .collect();

        let result = f(self);

        for (name, previous) in saved.into_iter().rev() {
            match previous {
                Some(var) => {
                    self.vars.insert(name, var);
                }
                None => {
                    self.vars.remove(&name);
                }
            }
        }
        result
    }

    fn call_function(
        &mut self,
        body: &CompoundCommand,
        args: &[String],
    ) -> Result<Flow, RuntimeError> {
        self.enter_call()?;
        let saved = std::mem::replace(&mut self.positional, args.to_vec());
        let result = self.exec_compound(body);
        self.positional = saved;
        self.depth -= 1;

        match result? {
            Flow::Exit => Ok(Flow::Exit),
            _ => Ok(Flow::Normal),
        }
    }

    fn exec_compound(&mut self, compound: &CompoundCommand) -> Result<Flow, RuntimeError> {
        match compound {
            CompoundCommand::BraceGroup(list) => self.exec_list(list),
            CompoundCommand::Subshell(list) => self.exec_subshell(list),
            CompoundCommand::If {
                branches,
                else_branch,
            } => {
                for (condition, body) in branches {
                    let flow = self.exec_condition(condition)?;
                    if flow != Flow::Normal {
                        return Ok(flow);
                    }
                    if self.last_status == 0 {
                        return self.exec_list(body);
                    }
                }
                match else_branch {
                    Some(body) => self.exec_list(body),
                    None => {
                        self.last_status = 0;
                        Ok(Flow::Normal)
                    }
                }
            }
            CompoundCommand::While {
                condition,
                body,
                until,
            } => {
                self.loop_depth += 1;
                let result = self.exec_while(condition, body, *until);
                self.loop_depth -= 1;
                result
            }
            CompoundCommand::For { var, items, body } => {
                let values = match items {
                    Some(words) => {
                        let mut values = Vec::new();
                        for word in words {
                            values.extend(self.expand_fields(word)?);
                        }
                        values
                    }
                    None => self.positional.clone(),
                };
                self.loop_depth += 1;
                let result = self.exec_for(var, values, body);
                self.loop_depth -= 1;
                result
            }
        }
    }

    fn exec_while(&mut self, condition: &List, body: &List, until: bool) -> Result<Flow, RuntimeError> {
        let mut status = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Err(RuntimeError::Cancelled);
            }
            let flow = self.exec_condition(condition)?;
            if flow != Flow::Normal {
                return Ok(flow);
            }
            if (self.last_status == 0) == until {
                break;
            }

            let step = loop_step(self.exec_list(body)?);
            status = self.last_status;
            match step {
                LoopStep::Next => {}
                LoopStep::Stop => break,
                LoopStep::Propagate(flow) => return Ok(flow),
            }
        }

        self.last_status = status;
        Ok(Flow::Normal)
    }

    fn exec_for(&mut self, var: &str, values: Vec<String>, body: &List) -> Result<Flow, RuntimeError> {
        let mut status = 0;

        for value in values {
            if self.cancel.is_cancelled() {
                return Err(RuntimeError::Cancelled);
            }
            self.set_var(var, value);

            let step = loop_step(self.exec_list(body)?);
            status = self.last_status;
            match step {
                LoopStep::Next => {}
                LoopStep::Stop => break,
                LoopStep::Propagate(flow) => return Ok(flow),
            }
        }

        self.last_status = status;
        Ok(Flow::Normal)
    }

    /// Run `list` without letting variable, function, directory or
    /// positional changes escape.
    fn exec_subshell(&mut self, list: &List) -> Result<Flow, RuntimeError> {
        let vars = self.vars.clone();
        let functions = self.functions.clone();
        let cwd = self.cwd.clone();
        let positional = self.positional.clone();
        let loop_depth = std::mem::take(&mut self.loop_depth);

        let result = self.exec_list(list);

        self.vars = vars;
        self.functions = functions;
        self.cwd = cwd;
        self.positional = positional;
        self.loop_depth = loop_depth;
        result?;
        Ok(Flow::Normal)
    }

    fn spawn_external(
        &mut self,
        args: &[String],
        assignments: &[(String, String)],
    ) -> Result<Flow, RuntimeError> {
        let name = &args[0];
        let stdin_data = self.current_stdin();
        let capture_stdout = self.stdout_captured();

        let mut command = Process::new(name);
        command
            .args(&args[1..])
            .current_dir(&self.cwd)
            .env_clear()
            .envs(self.exported_env())
            .envs(assignments.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if stdin_data.is_some() {
                Stdio::piped()
            } else {
                Stdio::inherit()
            })
            .stdout(if capture_stdout {
                Stdio::piped()
            } else {
                Stdio::inherit()
            })
            .stderr(self.stderr.stdio());

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                debug!(command = %name, error = %e, "failed to spawn command");
                let (status, message) = match e.kind() {
                    io::ErrorKind::NotFound => (127, format!("{name}: command not found")),
                    io::ErrorKind::PermissionDenied => (126, format!("{name}: permission denied")),
                    _ => (126, format!("{name}: {e}")),
                };
                self.report(&message)?;
                self.last_status = status;
                return Ok(Flow::Normal);
            }
        };

        let writer = match (child.stdin.take(), stdin_data) {
            (Some(mut pipe), Some(data)) => Some(thread::spawn(move || {
                // The child may exit without reading everything.
                let _ = pipe.write_all(&data);
            })),
            _ => None,
        };

        let output = child.wait_with_output()?;
        if let Some(writer) = writer {
            let _ = writer.join();
        }

        if capture_stdout {
            self.write_stdout(&output.stdout)?;
        }
        if !output.stderr.is_empty() {
            self.write_stderr(&output.stderr)?;
        }
        self.last_status = exit_code(output.status);
        Ok(Flow::Normal)
    }
}
