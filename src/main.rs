use std::process::ExitCode;

use tracing::{error, info};

use shellbridge::{Bridge, Config, ShellEngine, Status};

fn main() -> ExitCode {
    // Load configuration
    let config = match Config::load_optional("config.toml") {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config.toml: {e}");
            eprintln!("Using default configuration.");
            let mut config = Config::default();
            config.apply_env_overrides();
            config
        }
    };
    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {e}");
        return ExitCode::from(2);
    }

    // Initialize logging
    if let Err(e) = shellbridge::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        // Fall back to console-only logging
        shellbridge::logging::init_console_only(&config.logging.level);
    }

    let scripts: Vec<String> = std::env::args().skip(1).collect();
    if scripts.is_empty() {
        eprintln!("usage: shellbridge SCRIPT...");
        return ExitCode::from(2);
    }

    let bridge = Bridge::new(
        ShellEngine::new(config.runner.clone()),
        config.handles.max_contexts,
    );

    let mut status = Status::Success;
    for script in &scripts {
        info!(script = %script, "running script");
        let result = bridge.run_script(script);
        if result == Status::Failure && status == Status::Success {
            error!(script = %script, "script failed");
            status = result;
        }
    }

    ExitCode::from(status.code() as u8)
}
