//! Command-line run loop

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use colored::Colorize;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::app::options::AppOptions;
use crate::deploy::cancel::StopToken;
use crate::deploy::events::{ChannelSink, Event, TracingSink};
use crate::deploy::executor::{Deployer, Invocation, Operation};
use crate::deploy::session::SshConnector;
use crate::errors::DeployError;
use crate::filesys::file::File;
use crate::models::project::{ScriptKind, ServerTarget};
use crate::storage::config::ConfigStore;

/// What the binary was asked to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Write the default config file if missing
    Init,

    /// Print configured servers and projects
    List,

    /// Open and close a session to a named server
    TestServer { server: String },

    /// Run an operation against a configured project
    Project { project: String, operation: Operation },

    /// Upload one file to a named server
    UploadFile {
        server: String,
        local: PathBuf,
        remote: String,
    },
}

impl Command {
    /// Build a command from `--key=value` arguments
    pub fn from_args(args: &HashMap<String, String>) -> Result<Self, DeployError> {
        if args.contains_key("init") {
            return Ok(Command::Init);
        }
        if args.contains_key("list") {
            return Ok(Command::List);
        }
        if let Some(server) = args.get("test-server") {
            return Ok(Command::TestServer {
                server: server.clone(),
            });
        }
        if let Some(local) = args.get("upload-file") {
            let server = required(args, "server")?;
            let remote = required(args, "remote")?;
            return Ok(Command::UploadFile {
                server,
                local: PathBuf::from(local),
                remote,
            });
        }
        if let Some(project) = args.get("project") {
            let action = args.get("action").map(String::as_str).unwrap_or("deploy");
            let operation = match action {
                "deploy" => Operation::FullDeploy,
                "upload" => Operation::UploadOnly,
                "pre" => Operation::PreCommandsOnly,
                "script" => {
                    let kind = required(args, "script")?
                        .parse::<ScriptKind>()
                        .map_err(DeployError::ValidationError)?;
                    Operation::RunScript(kind)
                }
                other => {
                    return Err(DeployError::ValidationError(format!(
                        "unknown action '{}', expected deploy, upload, pre or script",
                        other
                    )))
                }
            };
            return Ok(Command::Project {
                project: project.clone(),
                operation,
            });
        }
        Err(DeployError::ValidationError(
            "nothing to do: pass --project=<id>, --upload-file=<path>, --test-server=<name>, --list or --init"
                .to_string(),
        ))
    }
}

fn required(args: &HashMap<String, String>, key: &str) -> Result<String, DeployError> {
    args.get(key)
        .filter(|v| !v.trim().is_empty())
        .cloned()
        .ok_or_else(|| DeployError::ValidationError(format!("missing --{}=<value>", key)))
}

/// Run one command. Returns whether it succeeded.
///
/// `shutdown_signal` resolving requests a cooperative stop of the running
/// operation; the loop still waits for its terminal event.
pub async fn run(
    options: AppOptions,
    command: Command,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<bool, DeployError> {
    let config_file = options.config_file();

    if command == Command::Init {
        if ConfigStore::ensure_exists(&config_file).await? {
            println!("Created {}", config_file.path().display());
        } else {
            println!("{} already exists", config_file.path().display());
        }
        return Ok(true);
    }

    let config = load_config(&config_file).await?;

    let invocation = match command {
        Command::Init => return Ok(true),
        Command::List => {
            print_config(&config);
            return Ok(true);
        }
        Command::TestServer { server } => {
            let server = config.server(&server)?.clone();
            return test_server(options, server).await;
        }
        Command::Project { project, operation } => {
            let (project, server) = config.resolve(&project)?;
            match operation {
                Operation::PreCommandsOnly => Invocation::pre_commands(project),
                operation => Invocation::new(operation, project, server),
            }
        }
        Command::UploadFile {
            server,
            local,
            remote,
        } => Invocation::upload_file(config.server(&server)?.clone(), local, remote),
    };

    let (sink, events) = ChannelSink::new();
    let deployer = Arc::new(Deployer::new(
        Arc::new(SshConnector),
        Arc::new(sink),
        options.deploy.clone(),
    ));
    let stop = StopToken::new();
    let worker = deployer.spawn(invocation, stop.clone())?;
    // The worker holds the only other handle; the channel closes when it exits
    drop(deployer);

    let reported = pump_events(events, &stop, shutdown_signal).await;

    let joined = tokio::task::spawn_blocking(move || worker.join())
        .await
        .map_err(|e| DeployError::Internal(e.to_string()))?;
    match joined {
        Ok(success) => Ok(reported.unwrap_or(success)),
        Err(_) => Err(DeployError::Internal("deployment worker panicked".to_string())),
    }
}

async fn load_config(file: &File) -> Result<ConfigStore, DeployError> {
    if ConfigStore::ensure_exists(file).await? {
        println!(
            "{}",
            format!("Created default config at {}", file.path().display()).yellow()
        );
    }
    let config = ConfigStore::load(file).await?;
    debug!(
        "Loaded {} server(s) and {} project(s)",
        config.servers.len(),
        config.projects.len()
    );
    Ok(config)
}

/// Print events until the terminal one arrives or the worker goes away.
/// Returns the reported success flag, if any.
async fn pump_events(
    mut events: mpsc::UnboundedReceiver<Event>,
    stop: &StopToken,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Option<bool> {
    tokio::pin!(shutdown_signal);
    let mut stop_requested = false;
    let mut completed = 0u32;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(Event::Progress { delta }) => {
                    completed += delta;
                    println!("{}", format!("  [{} file(s) done]", completed).dimmed());
                }
                Some(Event::Log { line }) => println!("{}", line),
                Some(Event::Finished { success, message }) => {
                    if success {
                        println!("{}", format!("✓ {}", message).green().bold());
                    } else {
                        println!("{}", format!("✗ {}", message).red().bold());
                    }
                    return Some(success);
                }
                None => {
                    error!("Worker exited without reporting a result");
                    return None;
                }
            },
            _ = &mut shutdown_signal, if !stop_requested => {
                info!("Requesting stop");
                println!("{}", "Stopping, waiting for the current step to wind down...".yellow());
                stop.request_stop();
                stop_requested = true;
            }
        }
    }
}

async fn test_server(
    options: AppOptions,
    server: ServerTarget,
) -> Result<bool, DeployError> {
    let address = server.address();
    println!("Testing connection to {}...", address);

    let result = tokio::task::spawn_blocking(move || {
        Deployer::new(Arc::new(SshConnector), Arc::new(TracingSink), options.deploy)
            .test_connection(&server)
    })
    .await
    .map_err(|e| DeployError::Internal(e.to_string()))?;

    match result {
        Ok(()) => {
            println!("{}", format!("✓ Connected to {}", address).green().bold());
            Ok(true)
        }
        Err(e) => {
            println!("{}", format!("✗ Connection failed: {}", e).red().bold());
            Ok(false)
        }
    }
}

fn print_config(config: &ConfigStore) {
    println!("{}", "Servers:".bold());
    for (name, server) in &config.servers {
        println!("  {:<20} {}@{}", name, server.username, server.address());
    }
    println!("{}", "Projects:".bold());
    for (id, project) in &config.projects {
        println!(
            "  {:<20} {} -> {} ({} file(s), {} pre-command(s))",
            id,
            project.name,
            project.server,
            project.files.len(),
            project.pre_commands.len()
        );
    }
}
