//! Local pre-command runner

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::deploy::cancel::StopToken;
use crate::deploy::decode::LineDecoder;
use crate::deploy::events::Reporter;
use crate::errors::DeployError;

/// Runs shell commands one at a time, streaming merged output
#[derive(Debug, Clone)]
pub struct LocalRunner {
    decoder: LineDecoder,
    poll_interval: Duration,
}

impl LocalRunner {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            decoder: LineDecoder::native(),
            poll_interval,
        }
    }

    /// Run every command in order.
    ///
    /// Stops at the first nonzero exit with `LocalCommandFailed`, and
    /// returns `UserStopped` if the token is observed before a command
    /// starts or between output lines.
    pub fn run_all(
        &self,
        commands: &[String],
        stop: &StopToken,
        reporter: &Reporter,
    ) -> Result<(), DeployError> {
        let total = commands.len();
        for (idx, command) in commands.iter().enumerate() {
            if stop.is_stop_requested() {
                reporter.log("🛑 Operation stopped");
                return Err(DeployError::UserStopped);
            }

            reporter.log(format!("Running pre-command [{}/{}]: {}", idx + 1, total, command));
            self.run_one(command, stop, reporter)?;
            reporter.log("✓ Command succeeded");
        }
        Ok(())
    }

    fn run_one(
        &self,
        command: &str,
        stop: &StopToken,
        reporter: &Reporter,
    ) -> Result<(), DeployError> {
        info!("Running local command: {}", command);

        // The shell folds stderr into stdout, so one pipe carries both in order
        let mut child = shell_command(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                reporter.log(format!("✗ Failed to start command: {}", e));
                DeployError::IoError(e)
            })?;

        let (tx, rx) = mpsc::channel::<Vec<u8>>();
        if let Some(stdout) = child.stdout.take() {
            spawn_line_reader(stdout, tx);
        }

        loop {
            if stop.is_stop_requested() {
                return Err(stop_child(&mut child, reporter));
            }

            match rx.recv_timeout(self.poll_interval) {
                Ok(bytes) => {
                    let line = self.decoder.decode_line(&bytes);
                    reporter.log(format!("  {}", line));
                }
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
                // Output pipe closed
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }

        // The process may outlive its output pipe
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if stop.is_stop_requested() {
                return Err(stop_child(&mut child, reporter));
            }
            thread::sleep(self.poll_interval);
        };
        if status.success() {
            debug!("Local command finished: {}", command);
            return Ok(());
        }

        if stop.is_stop_requested() {
            return Err(DeployError::UserStopped);
        }

        let code = status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        reporter.log(format!("✗ Command failed, exit code: {}", code));
        Err(DeployError::LocalCommandFailed {
            command: command.to_string(),
            code,
        })
    }
}

impl Default for LocalRunner {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

fn spawn_line_reader<R>(pipe: R, tx: mpsc::Sender<Vec<u8>>)
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut reader = BufReader::new(pipe);
        loop {
            let mut line = Vec::new();
            match reader.read_until(b'\n', &mut line) {
                Ok(0) => break,
                Ok(_) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!("Output pipe read error: {}", e);
                    break;
                }
            }
        }
    });
}

fn stop_child(child: &mut Child, reporter: &Reporter) -> DeployError {
    reporter.log("🛑 Operation stopped, terminating process...");
    terminate(child);
    DeployError::UserStopped
}

fn terminate(child: &mut Child) {
    if let Err(e) = child.kill() {
        warn!("Failed to terminate local command: {}", e);
    }
    let _ = child.wait();
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.args(["/C", &format!("({}) 2>&1", command)]);
    cmd
}

#[cfg(not(windows))]
fn shell_command(command: &str) -> Command {
    let shell = if std::path::Path::new("/bin/bash").exists() {
        "/bin/bash"
    } else {
        "/bin/sh"
    };
    let mut cmd = Command::new(shell);
    cmd.arg("-c").arg(format!("exec 2>&1\n{}", command));
    cmd
}
