//! rdeploy - Entry Point
//!
//! Runs local build commands, uploads artifacts over SFTP and drives
//! remote deploy scripts for the projects in `config.json`.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use rdeploy::app::options::AppOptions;
use rdeploy::app::run::{run, Command};
use rdeploy::filesys::dir::Dir;
use rdeploy::logs::{init_logging, LogLevel, LogOptions};
use rdeploy::storage::layout::StorageLayout;
use rdeploy::utils::version_info;

use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version_info()) {
            Ok(version) => println!("{}", version),
            Err(e) => eprintln!("Failed to render version: {e}"),
        }
        return ExitCode::SUCCESS;
    }

    // Initialize logging
    let log_level = match cli_args.get("log-level").map(|l| l.parse::<LogLevel>()) {
        Some(Ok(level)) => level,
        Some(Err(e)) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
        None => LogLevel::Warn,
    };
    let layout = StorageLayout::default();

    // A bare --log-dir uses the layout's logs directory
    let log_dir = cli_args.get("log-dir").map(|dir| match dir.as_str() {
        "true" => layout.logs_dir(),
        dir => Dir::new(dir),
    });
    if let Some(dir) = &log_dir {
        if let Err(e) = dir.create().await {
            eprintln!("Unable to create log directory {}: {e}", dir.path().display());
            return ExitCode::FAILURE;
        }
    }

    let log_options = LogOptions {
        log_level,
        json_format: cli_args.contains_key("json-logs"),
        log_dir: log_dir.map(|dir| dir.path().to_path_buf()),
        ..Default::default()
    };
    // Flushes the log file on exit
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    let command = match Command::from_args(&cli_args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let options = AppOptions {
        storage: layout,
        config_path: cli_args.get("config").map(PathBuf::from),
        ..Default::default()
    };

    info!("Running {:?} with options: {:?}", command, options);
    match run(options, command, await_shutdown_signal()).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("Failed to run: {e}");
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                warn!("Unable to listen for SIGTERM: {e}");
                match tokio::signal::ctrl_c().await {
                    Ok(()) => info!("Ctrl+C received, stopping..."),
                    Err(e) => {
                        warn!("Unable to listen for Ctrl+C: {e}");
                        std::future::pending::<()>().await;
                    }
                }
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, stopping...");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, stopping...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Unable to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
        info!("Ctrl+C received, stopping...");
    }
}
