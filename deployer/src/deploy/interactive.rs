//! Interactive script stage: one command on a pseudo-terminal

use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::deploy::cancel::StopToken;
use crate::deploy::events::Reporter;
use crate::deploy::session::{LineRead, RemoteSession};
use crate::errors::DeployError;

/// Interactive stage settings
#[derive(Debug, Clone)]
pub struct InteractiveOptions {
    /// Sleep between empty polls
    pub poll_interval: Duration,

    /// Fail the stage when the remote command exits nonzero
    pub check_exit_status: bool,
}

impl Default for InteractiveOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            check_exit_status: true,
        }
    }
}

/// Run `command` attached to a PTY and stream its output until it exits
/// or the stop token fires.
pub fn run_interactive(
    session: &dyn RemoteSession,
    command: &str,
    stop: &StopToken,
    reporter: &Reporter,
    options: &InteractiveOptions,
) -> Result<(), DeployError> {
    reporter.log(format!("Executing command: {}", command));
    info!("Running remote command on pty: {}", command);

    let mut process = session.spawn(command, true)?;

    loop {
        if stop.is_stop_requested() {
            reporter.log("🛑 Operation stopped");
            if let Err(e) = process.interrupt() {
                warn!("Failed to interrupt remote command: {}", e);
            }
            let _ = process.close();
            return Err(DeployError::UserStopped);
        }

        match process.read_line()? {
            LineRead::Line(line) => reporter.log(line.trim_end()),
            LineRead::Eof => break,
            LineRead::Pending => thread::sleep(options.poll_interval),
        }
    }

    let status = process.wait_exit()?;
    debug!("Remote command exited with {:?}", status);

    if options.check_exit_status {
        if let Some(code) = status.filter(|code| *code != 0) {
            reporter.log(format!("✗ Remote command exited with code {}", code));
            return Err(DeployError::RemoteScriptFailed(code.to_string()));
        }
    }
    Ok(())
}
