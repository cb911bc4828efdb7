//! C ABI over a process-wide [`Bridge`].
//!
//! The caller's side of the contract is documented in
//! `include/shellbridge.h`. Every entry point returns a status code or a
//! handle; no panic unwinds into the caller.

#![allow(non_snake_case)]

use std::ffi::{c_char, c_int, CStr};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::OnceLock;

use tracing::{error, info, warn};

use crate::bridge::{Bridge, Status};
use crate::config::Config;
use crate::handle::Handle;
use crate::shell::ShellEngine;
use crate::{logging, BridgeError, Result};

static BRIDGE: OnceLock<Bridge<ShellEngine>> = OnceLock::new();

/// The global bridge, configured and logging on first use.
fn bridge() -> &'static Bridge<ShellEngine> {
    BRIDGE.get_or_init(|| {
        let (config, config_error) = match Config::from_env() {
            Ok(config) => (config, None),
            Err(e) => (Config::default(), Some(e)),
        };

        if let Err(e) = logging::init(&config.logging) {
            logging::init_console_only(&config.logging.level);
            warn!(file = %config.logging.file, error = %e, "cannot open log file, logging to stderr only");
        }
        if let Some(e) = config_error {
            warn!(error = %e, "invalid configuration, using defaults");
        }
        info!(
            max_contexts = config.handles.max_contexts,
            max_commands = config.runner.max_commands,
            "shellbridge initialized"
        );

        Bridge::new(ShellEngine::new(config.runner), config.handles.max_contexts)
    })
}

/// Run `f`, turning a panic into `fallback`.
fn guard<T>(entry: &'static str, fallback: T, f: impl FnOnce() -> T) -> T {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(_) => {
            error!(entry, "panic caught at the C boundary");
            fallback
        }
    }
}

/// Copy a C path string.
///
/// # Safety
///
/// `path` must be null or point to a NUL-terminated string.
unsafe fn path_from_c(path: *const c_char) -> Result<PathBuf> {
    if path.is_null() {
        return Err(BridgeError::NullArgument("path"));
    }
    let bytes = CStr::from_ptr(path).to_bytes();

    #[cfg(unix)]
    {
        use std::os::unix::ffi::OsStrExt;
        Ok(PathBuf::from(std::ffi::OsStr::from_bytes(bytes)))
    }
    #[cfg(not(unix))]
    {
        std::str::from_utf8(bytes)
            .map(PathBuf::from)
            .map_err(|_| BridgeError::Validation("path is not valid UTF-8".to_string()))
    }
}

/// Create a runner and return its handle, or 0 on failure.
#[no_mangle]
pub extern "C" fn NewRunner() -> usize {
    guard("NewRunner", Handle::NULL.into_raw(), || {
        match bridge().create_context() {
            Ok(handle) => handle.into_raw(),
            Err(e) => {
                warn!(kind = e.kind(), error = %e, "failed to create runner");
                Handle::NULL.into_raw()
            }
        }
    })
}

/// Run the script at `path` in a fresh runner. Returns 0 on success, 1 on failure.
///
/// # Safety
///
/// `path` must be null or point to a NUL-terminated string that stays valid
/// for the duration of the call.
#[no_mangle]
pub unsafe extern "C" fn RunScript(path: *const c_char) -> c_int {
    RunScriptWithRunner(Handle::NULL.into_raw(), path)
}

/// Run the script at `path` in the runner behind `runner`, or in a fresh
/// runner when `runner` is 0. Returns 0 on success, 1 on failure.
///
/// # Safety
///
/// `path` must be null or point to a NUL-terminated string that stays valid
/// for the duration of the call.
#[no_mangle]
pub unsafe extern "C" fn RunScriptWithRunner(runner: usize, path: *const c_char) -> c_int {
    let path = path_from_c(path);
    guard("RunScriptWithRunner", Status::Failure.code(), move || {
        let path = match path {
            Ok(path) => path,
            Err(e) => {
                warn!(kind = e.kind(), error = %e, "rejected script path");
                return Status::Failure.code();
            }
        };
        bridge()
            .run_script_in(&path, Some(Handle::from_raw(runner)))
            .code()
    })
}

/// Destroy the runner behind `runner`. Returns 0 on success, 1 for a null,
/// unknown or already freed handle.
#[no_mangle]
pub extern "C" fn FreeRunner(runner: usize) -> c_int {
    guard("FreeRunner", Status::Failure.code(), || {
        let result = bridge().release_context(Handle::from_raw(runner));
        if let Err(e) = &result {
            warn!(kind = e.kind(), error = %e, "failed to free runner");
        }
        Status::from_result(&result).code()
    })
}
