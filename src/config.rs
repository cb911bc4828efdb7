//! Configuration module for shellbridge.

use serde::Deserialize;
use std::path::Path;

use crate::{BridgeError, Result};

/// Environment variable naming a config file for the C ABI.
pub const CONFIG_ENV: &str = "SHELLBRIDGE_CONFIG";

/// Environment variable overriding `logging.level`.
pub const LOG_LEVEL_ENV: &str = "SHELLBRIDGE_LOG_LEVEL";

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Optional log file. Empty means stderr only.
    #[serde(default)]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: String::new(),
        }
    }
}

/// Settings applied to every new execution context.
#[derive(Debug, Clone, Deserialize)]
pub struct RunnerConfig {
    /// Copy the process environment into new contexts as exported variables.
    #[serde(default = "default_inherit_env")]
    pub inherit_env: bool,
    /// Commands one execution may run before it is stopped. 0 is unlimited.
    #[serde(default)]
    pub max_commands: u64,
    /// Nesting limit for functions, `eval`, `source` and substitutions.
    #[serde(default = "default_max_call_depth")]
    pub max_call_depth: usize,
}

fn default_inherit_env() -> bool {
    true
}

fn default_max_call_depth() -> usize {
    128
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            inherit_env: default_inherit_env(),
            max_commands: 0,
            max_call_depth: default_max_call_depth(),
        }
    }
}

/// Handle registry configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HandlesConfig {
    /// Maximum number of live contexts behind handles.
    #[serde(default = "default_max_contexts")]
    pub max_contexts: usize,
}

fn default_max_contexts() -> usize {
    1024
}

impl Default for HandlesConfig {
    fn default() -> Self {
        Self {
            max_contexts: default_max_contexts(),
        }
    }
}

/// Main configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Execution context configuration.
    #[serde(default)]
    pub runner: RunnerConfig,
    /// Handle registry configuration.
    #[serde(default)]
    pub handles: HandlesConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(BridgeError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Like [`load_with_env`](Self::load_with_env), but a missing file
    /// yields the defaults with environment overrides applied.
    pub fn load_optional<P: AsRef<Path>>(path: P) -> Result<Self> {
        match Self::load_with_env(path) {
            Err(BridgeError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut config = Self::default();
                config.apply_env_overrides();
                Ok(config)
            }
            other => other,
        }
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| BridgeError::Validation(format!("config parse error: {e}")))
    }

    /// Configuration for the C ABI.
    ///
    /// Loads the file named by `SHELLBRIDGE_CONFIG` when set, otherwise
    /// starts from defaults. Environment overrides are applied either way.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var_os(CONFIG_ENV) {
            Some(path) if !path.is_empty() => Self::load(&path).map_err(|e| {
                BridgeError::Config(format!("{}: {e}", Path::new(&path).display()))
            })?,
            _ => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `SHELLBRIDGE_LOG_LEVEL`: Override the log level
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var(LOG_LEVEL_ENV) {
            if !level.is_empty() {
                self.logging.level = level;
            }
        }
    }

    /// Validate the configuration.
    ///
    /// Returns an error if:
    /// - `max_call_depth` is zero
    /// - `max_contexts` is zero
    pub fn validate(&self) -> Result<()> {
        if self.runner.max_call_depth == 0 {
            return Err(BridgeError::Validation(
                "runner.max_call_depth must be at least 1".to_string(),
            ));
        }
        if self.handles.max_contexts == 0 {
            return Err(BridgeError::Validation(
                "handles.max_contexts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.logging.level, "info");
        assert!(config.logging.file.is_empty());
        assert!(config.runner.inherit_env);
        assert_eq!(config.runner.max_commands, 0);
        assert_eq!(config.runner.max_call_depth, 128);
        assert_eq!(config.handles.max_contexts, 1024);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[logging]
level = "debug"
file = "logs/bridge.log"

[runner]
inherit_env = false
max_commands = 5000
max_call_depth = 32

[handles]
max_contexts = 16
"#;

        let config = Config::parse(toml).unwrap();

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.file, "logs/bridge.log");
        assert!(!config.runner.inherit_env);
        assert_eq!(config.runner.max_commands, 5000);
        assert_eq!(config.runner.max_call_depth, 32);
        assert_eq!(config.handles.max_contexts, 16);
    }

    #[test]
    fn test_parse_partial_config() {
        let toml = r#"
[runner]
max_commands = 10
"#;

        let config = Config::parse(toml).unwrap();

        assert_eq!(config.runner.max_commands, 10);
        // Other fields keep their defaults
        assert!(config.runner.inherit_env);
        assert_eq!(config.runner.max_call_depth, 128);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_empty_config() {
        let config = Config::parse("").unwrap();

        assert_eq!(config.handles.max_contexts, 1024);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_invalid_config() {
        let toml = "this is not valid toml [[[";
        let result = Config::parse(toml);

        assert!(result.is_err());
        if let Err(BridgeError::Validation(msg)) = result {
            assert!(msg.contains("config parse error"));
        } else {
            panic!("Expected Validation error");
        }
    }

    #[test]
    fn test_parse_wrong_type() {
        let result = Config::parse("[runner]\nmax_commands = \"many\"\n");
        assert!(matches!(result, Err(BridgeError::Validation(_))));
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = Config::load("nonexistent.toml");

        assert!(result.is_err());
        assert!(matches!(result, Err(BridgeError::Io(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[handles]\nmax_contexts = 3").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.handles.max_contexts, 3);
    }

    #[test]
    fn test_load_optional() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_optional(dir.path().join("config.toml")).unwrap();
        assert_eq!(config.handles.max_contexts, 1024);
        assert_eq!(config.runner.max_call_depth, 128);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[handles]\nmax_contexts = 3").unwrap();
        assert_eq!(Config::load_optional(file.path()).unwrap().handles.max_contexts, 3);

        // Anything other than a missing file is still an error.
        assert!(matches!(
            Config::load_optional(dir.path()),
            Err(BridgeError::Io(_))
        ));
        let mut broken = tempfile::NamedTempFile::new().unwrap();
        writeln!(broken, "[handles\nmax_contexts = 3").unwrap();
        assert!(Config::load_optional(broken.path()).is_err());
    }

    // Environment variables are process-wide, so every env-dependent
    // assertion lives in this one test.
    #[test]
    fn test_env_overrides_and_from_env() {
        let original_level = std::env::var(LOG_LEVEL_ENV).ok();
        let original_config = std::env::var(CONFIG_ENV).ok();

        std::env::set_var(LOG_LEVEL_ENV, "trace");
        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.logging.level, "trace");

        // Empty values do not override
        std::env::set_var(LOG_LEVEL_ENV, "");
        let mut config = Config::default();
        config.logging.level = "warn".to_string();
        config.apply_env_overrides();
        assert_eq!(config.logging.level, "warn");

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[runner]\nmax_call_depth = 7").unwrap();
        std::env::set_var(CONFIG_ENV, file.path());
        let config = Config::from_env().unwrap();
        assert_eq!(config.runner.max_call_depth, 7);

        std::env::set_var(CONFIG_ENV, "/nonexistent/shellbridge.toml");
        assert!(matches!(Config::from_env(), Err(BridgeError::Config(_))));

        std::env::remove_var(CONFIG_ENV);
        assert_eq!(Config::from_env().unwrap().runner.max_call_depth, 128);

        // Restore original
        match original_level {
            Some(val) => std::env::set_var(LOG_LEVEL_ENV, val),
            None => std::env::remove_var(LOG_LEVEL_ENV),
        }
        if let Some(val) = original_config {
            std::env::set_var(CONFIG_ENV, val);
        }
    }

    #[test]
    fn test_validate_zero_call_depth() {
        let mut config = Config::default();
        config.runner.max_call_depth = 0;

        let result = config.validate();
        assert!(result.is_err());
        if let Err(BridgeError::Validation(msg)) = result {
            assert!(msg.contains("max_call_depth"));
        }
    }

    #[test]
    fn test_validate_zero_contexts() {
        let mut config = Config::default();
        config.handles.max_contexts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_defaults() {
        assert!(Config::default().validate().is_ok());
    }
}
