//! Deployment orchestrator
//!
//! Chains the stages for each user-facing operation and turns the outcome
//! into exactly one `Finished` event. [`Deployer::spawn`] runs an operation
//! on its own worker thread; at most one runs at a time per [`Deployer`].

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{error, info, info_span, warn};
use uuid::Uuid;

use crate::app::options::DeployOptions;
use crate::deploy::background::{BackgroundScript, RemoteJobHandle};
use crate::deploy::cancel::StopToken;
use crate::deploy::events::{EventSink, Reporter};
use crate::deploy::interactive::{run_interactive, InteractiveOptions};
use crate::deploy::local::LocalRunner;
use crate::deploy::session::{Connector, OpenSession, RemoteSession};
use crate::deploy::transfer::{resolve_remote_path, upload_file, upload_mappings, UploadSummary};
use crate::errors::DeployError;
use crate::models::project::{FileMapping, ProjectSpec, ScriptKind, ServerTarget};

/// Message of the terminal event when the stop token ended an operation
pub const STOPPED_MESSAGE: &str = "Operation stopped";

/// A user-initiated operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Pre-commands, upload, then the deploy script on a PTY
    FullDeploy,

    /// Upload the project's files only.
    ///
    /// Pre-commands are not run first; use `FullDeploy` to build and upload
    /// in one go.
    UploadOnly,

    /// Run the project's local pre-commands only
    PreCommandsOnly,

    /// Run one lifecycle script detached
    RunScript(ScriptKind),

    /// Upload one ad-hoc file
    UploadSingle { local: PathBuf, remote: String },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::FullDeploy => "full_deploy",
            Operation::UploadOnly => "upload",
            Operation::PreCommandsOnly => "pre_commands",
            Operation::RunScript(_) => "script",
            Operation::UploadSingle { .. } => "upload_file",
        }
    }

    fn failure_prefix(&self) -> &'static str {
        match self {
            Operation::FullDeploy => "Deployment failed",
            Operation::UploadOnly | Operation::UploadSingle { .. } => "Upload failed",
            Operation::PreCommandsOnly => "Pre-commands failed",
            Operation::RunScript(_) => "Script failed",
        }
    }
}

/// Snapshot of everything one operation needs
#[derive(Debug, Clone)]
pub struct Invocation {
    pub operation: Operation,
    pub project: ProjectSpec,
    pub server: Option<ServerTarget>,
}

impl Invocation {
    pub fn new(operation: Operation, project: ProjectSpec, server: ServerTarget) -> Self {
        Self {
            operation,
            project,
            server: Some(server),
        }
    }

    /// Pre-commands need no server
    pub fn pre_commands(project: ProjectSpec) -> Self {
        Self {
            operation: Operation::PreCommandsOnly,
            project,
            server: None,
        }
    }

    pub fn upload_file(server: ServerTarget, local: impl Into<PathBuf>, remote: impl Into<String>) -> Self {
        Self {
            operation: Operation::UploadSingle {
                local: local.into(),
                remote: remote.into(),
            },
            project: ProjectSpec::default(),
            server: Some(server),
        }
    }

    fn server(&self) -> Result<&ServerTarget, DeployError> {
        self.server
            .as_ref()
            .ok_or_else(|| DeployError::ConfigError("no server configured for this operation".to_string()))
    }
}

/// Held while an operation runs; clears the active flag on drop
struct ActiveGuard {
    active: Arc<AtomicBool>,
}

impl ActiveGuard {
    fn acquire(active: &Arc<AtomicBool>) -> Option<Self> {
        active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self {
                active: active.clone(),
            })
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

/// Deployment orchestrator
pub struct Deployer {
    connector: Arc<dyn Connector>,
    sink: Arc<dyn EventSink>,
    options: DeployOptions,
    active: Arc<AtomicBool>,
}

impl Deployer {
    pub fn new(connector: Arc<dyn Connector>, sink: Arc<dyn EventSink>, options: DeployOptions) -> Self {
        Self {
            connector,
            sink,
            options,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether an operation is currently running
    pub fn is_busy(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Run an operation on the calling thread.
    ///
    /// Returns the success flag that was reported, or `Busy` (with no
    /// events emitted) if another operation is running.
    pub fn run(&self, invocation: Invocation, stop: &StopToken) -> Result<bool, DeployError> {
        let _guard = ActiveGuard::acquire(&self.active).ok_or(DeployError::Busy)?;
        Ok(self.run_reported(&invocation, stop))
    }

    /// Run an operation on a dedicated worker thread.
    pub fn spawn(
        self: &Arc<Self>,
        invocation: Invocation,
        stop: StopToken,
    ) -> Result<JoinHandle<bool>, DeployError> {
        let guard = ActiveGuard::acquire(&self.active).ok_or(DeployError::Busy)?;
        let deployer = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(format!("deploy-{}", invocation.operation.name()))
            .spawn(move || {
                let _guard = guard;
                deployer.run_reported(&invocation, &stop)
            })?;
        Ok(handle)
    }

    /// Open and close a session with the bounded connect timeout
    pub fn test_connection(&self, server: &ServerTarget) -> Result<(), DeployError> {
        if server.host.trim().is_empty() || server.username.trim().is_empty() {
            return Err(DeployError::ValidationError(
                "host and username must not be empty".to_string(),
            ));
        }
        let session = self
            .connector
            .connect(server, Some(self.options.connect_timeout))?;
        OpenSession::new(session).close()?;
        info!("Connection test succeeded: {}", server.address());
        Ok(())
    }

    fn run_reported(&self, invocation: &Invocation, stop: &StopToken) -> bool {
        let op_id = Uuid::new_v4();
        let span = info_span!("operation", id = %op_id, kind = invocation.operation.name());
        let _enter = span.enter();

        info!("Starting {}", invocation.operation.name());
        let reporter = Reporter::new(self.sink.clone());

        match self.execute(invocation, stop, &reporter) {
            Ok(message) => {
                info!("{}", message);
                reporter.finish(true, message);
                true
            }
            Err(DeployError::UserStopped) => {
                info!("Stopped by request");
                reporter.finish(false, STOPPED_MESSAGE);
                false
            }
            Err(e) => {
                error!("{} failed: {}", invocation.operation.name(), e);
                reporter.finish(false, format!("{}: {}", invocation.operation.failure_prefix(), e));
                false
            }
        }
    }

    fn execute(
        &self,
        invocation: &Invocation,
        stop: &StopToken,
        reporter: &Reporter,
    ) -> Result<String, DeployError> {
        if stop.is_stop_requested() {
            return Err(DeployError::UserStopped);
        }

        match &invocation.operation {
            Operation::FullDeploy => self.full_deploy(invocation, stop, reporter),
            Operation::UploadOnly => self.upload_only(invocation, stop, reporter),
            Operation::PreCommandsOnly => self.pre_commands_only(&invocation.project, stop, reporter),
            Operation::RunScript(kind) => self.run_script(invocation, *kind, stop, reporter),
            Operation::UploadSingle { local, remote } => {
                self.upload_single(invocation, local, remote, reporter)
            }
        }
    }

    fn full_deploy(
        &self,
        invocation: &Invocation,
        stop: &StopToken,
        reporter: &Reporter,
    ) -> Result<String, DeployError> {
        let project = &invocation.project;
        self.pre_commands_stage(project, stop, reporter)?;
        if stop.is_stop_requested() {
            return Err(DeployError::UserStopped);
        }

        let files = checked_files(project)?;
        let server = invocation.server()?;
        let session = self.open_session(server, reporter)?;

        self.upload_stage(session.session(), files, stop, reporter)?;
        if stop.is_stop_requested() {
            reporter.log("🛑 Deployment stopped");
            return Err(DeployError::UserStopped);
        }

        reporter.log("Upload complete, running deploy script...");
        let script = project.scripts.deploy.trim();
        if script.is_empty() {
            reporter.log("⚠ No deploy script configured, skipping");
        } else {
            let options = InteractiveOptions {
                poll_interval: self.options.poll_interval,
                check_exit_status: self.options.check_exit_status,
            };
            run_interactive(session.session(), script, stop, reporter, &options)?;
        }

        close_quietly(session);
        Ok("Deployment completed".to_string())
    }

    fn upload_only(
        &self,
        invocation: &Invocation,
        stop: &StopToken,
        reporter: &Reporter,
    ) -> Result<String, DeployError> {
        let files = checked_files(&invocation.project)?;
        let server = invocation.server()?;
        let session = self.open_session(server, reporter)?;

        let summary = self.upload_stage(session.session(), files, stop, reporter)?;

        close_quietly(session);
        Ok(format!(
            "Upload completed, {} of {} file(s) uploaded",
            summary.uploaded, summary.configured
        ))
    }

    fn pre_commands_only(
        &self,
        project: &ProjectSpec,
        stop: &StopToken,
        reporter: &Reporter,
    ) -> Result<String, DeployError> {
        if project.pre_commands.is_empty() {
            return Err(DeployError::ValidationError(
                "project has no pre-commands configured".to_string(),
            ));
        }
        self.pre_commands_stage(project, stop, reporter)?;
        Ok("Pre-commands completed".to_string())
    }

    fn run_script(
        &self,
        invocation: &Invocation,
        kind: ScriptKind,
        stop: &StopToken,
        reporter: &Reporter,
    ) -> Result<String, DeployError> {
        let script = invocation.project.scripts.get(kind).trim();
        if script.is_empty() {
            return Err(DeployError::ValidationError(format!(
                "{} script is not configured",
                kind
            )));
        }
        let server = invocation.server()?;
        let session = self.open_session(server, reporter)?;

        let handle = RemoteJobHandle::now(&self.options.remote_temp_dir);
        let mut job = BackgroundScript::new(session.session(), handle, self.options.job.clone());
        job.run(script, stop, reporter)?;

        close_quietly(session);
        Ok(format!("Script {} completed", kind))
    }

    fn upload_single(
        &self,
        invocation: &Invocation,
        local: &Path,
        remote: &str,
        reporter: &Reporter,
    ) -> Result<String, DeployError> {
        if !local.exists() {
            return Err(DeployError::LocalFileMissing(local.to_path_buf()));
        }
        let server = invocation.server()?;
        let session = self.open_session(server, reporter)?;

        let fs = session.session().open_transfer()?;
        let remote = resolve_remote_path(local, remote);
        upload_file(fs.as_ref(), local, &remote, reporter)?;
        drop(fs);

        close_quietly(session);
        Ok("File uploaded".to_string())
    }

    fn pre_commands_stage(
        &self,
        project: &ProjectSpec,
        stop: &StopToken,
        reporter: &Reporter,
    ) -> Result<(), DeployError> {
        if project.pre_commands.is_empty() {
            return Ok(());
        }

        reporter.separator();
        reporter.log("Running pre-commands...");
        reporter.separator();

        LocalRunner::new(self.options.poll_interval).run_all(&project.pre_commands, stop, reporter)?;

        reporter.separator();
        reporter.log("Pre-commands completed");
        reporter.separator();
        Ok(())
    }

    fn upload_stage(
        &self,
        session: &dyn RemoteSession,
        files: &[FileMapping],
        stop: &StopToken,
        reporter: &Reporter,
    ) -> Result<UploadSummary, DeployError> {
        let fs = session.open_transfer()?;
        upload_mappings(fs.as_ref(), files, stop, reporter)
    }

    fn open_session(&self, server: &ServerTarget, reporter: &Reporter) -> Result<OpenSession, DeployError> {
        let session = self.connector.connect(server, None).map_err(|e| match e {
            DeployError::ConnectionFailed(_) => e,
            other => DeployError::ConnectionFailed(other.to_string()),
        })?;
        reporter.log(format!("✓ SSH connected: {}", server.host));
        Ok(OpenSession::new(session))
    }
}

fn checked_files(project: &ProjectSpec) -> Result<&[FileMapping], DeployError> {
    if project.files.is_empty() {
        return Err(DeployError::NoFilesConfigured);
    }
    Ok(&project.files)
}

fn close_quietly(session: OpenSession) {
    if let Err(e) = session.close() {
        warn!("Error while closing session: {}", e);
    }
}
