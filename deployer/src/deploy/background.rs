//! Background script stage
//!
//! The command runs detached on the remote host through a generated
//! wrapper script. The wrapper writes the command's exit code into a
//! done-flag file, which is how a detached job reports completion to a
//! tailer that may have lost its connection. Output goes to a log file
//! that is followed with `tail -f` on a pseudo-terminal.

use std::borrow::Cow;
use std::sync::LazyLock;
use std::thread;
use std::time::Instant;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::deploy::cancel::StopToken;
use crate::deploy::events::Reporter;
use crate::deploy::fsm::{JobEvent, JobFsm, JobState, JobTimings};
use crate::deploy::session::{LineRead, RemoteProcess, RemoteSession};
use crate::errors::DeployError;

static ANSI_COLOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*m").expect("valid ANSI color pattern"));

/// Remove ANSI color escape sequences
pub fn strip_ansi(line: &str) -> Cow<'_, str> {
    ANSI_COLOR.replace_all(line, "")
}

/// Remote temp paths for one background run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteJobHandle {
    pub script_file: String,
    pub log_file: String,
    pub done_file: String,
}

impl RemoteJobHandle {
    pub fn from_timestamp(temp_dir: &str, timestamp: i64) -> Self {
        let dir = temp_dir.trim_end_matches('/');
        Self {
            script_file: format!("{}/deploy_script_{}.sh", dir, timestamp),
            log_file: format!("{}/deploy_log_{}.log", dir, timestamp),
            done_file: format!("{}/deploy_done_{}.flag", dir, timestamp),
        }
    }

    /// Handle stamped with the current unix time
    pub fn now(temp_dir: &str) -> Self {
        Self::from_timestamp(temp_dir, chrono::Utc::now().timestamp())
    }

    /// Shell text that writes the wrapper script and marks it executable
    pub fn create_command(&self, command: &str) -> String {
        format!(
            "cat > {script} << 'EOFSCRIPT'\n{body}\nEOFSCRIPT\nchmod +x {script}",
            script = self.script_file,
            body = wrapper_script(command, &self.done_file),
        )
    }

    /// Start the wrapper detached, output into the log file
    pub fn launch_command(&self) -> String {
        format!(
            "nohup {} > {} 2>&1 &",
            self.script_file, self.log_file
        )
    }

    pub fn tail_command(&self) -> String {
        format!("tail -f {}", self.log_file)
    }

    /// Prints `DONE` once the done flag exists
    pub fn check_command(&self) -> String {
        format!("test -f {} && echo 'DONE'", self.done_file)
    }

    /// Prints the recorded exit code, or nothing if the flag is missing
    pub fn read_exit_command(&self) -> String {
        format!("cat {} 2>/dev/null", self.done_file)
    }

    pub fn cleanup_command(&self) -> String {
        format!(
            "rm -f {} {} {}",
            self.script_file, self.log_file, self.done_file
        )
    }
}

/// Wrapper that loads the login environment, runs `command`, and records
/// its exit code in `done_file`
pub fn wrapper_script(command: &str, done_file: &str) -> String {
    format!(
        "#!/bin/bash\n\
         source /etc/profile 2>/dev/null || true\n\
         source ~/.bashrc 2>/dev/null || true\n\
         source ~/.bash_profile 2>/dev/null || true\n\
         {command}\n\
         exit_code=$?\n\
         echo \"=== Script finished, exit code: $exit_code ===\"\n\
         echo $exit_code > {done_file}\n\
         exit $exit_code\n"
    )
}

/// Runs one command detached and follows it to completion
pub struct BackgroundScript<'a> {
    session: &'a dyn RemoteSession,
    handle: RemoteJobHandle,
    timings: JobTimings,
    fsm: JobFsm,
}

impl<'a> BackgroundScript<'a> {
    pub fn new(session: &'a dyn RemoteSession, handle: RemoteJobHandle, timings: JobTimings) -> Self {
        Self {
            session,
            handle,
            timings,
            fsm: JobFsm::new(),
        }
    }

    /// Run the job. Cleanup always happens before this returns.
    pub fn run(
        &mut self,
        command: &str,
        stop: &StopToken,
        reporter: &Reporter,
    ) -> Result<(), DeployError> {
        reporter.log(format!("Executing command: {}", command));
        reporter.separator();

        let mut tail: Option<Box<dyn RemoteProcess>> = None;
        let result = self.start_and_tail(command, stop, reporter, &mut tail);
        if let Err(e) = &result {
            if !e.is_stop() {
                self.transition(JobEvent::Failed(e.to_string()));
            }
        }

        let exit_code = self.cleanup(tail, reporter);
        result?;

        match self.fsm.ended_in() {
            Some(JobState::Stopped) => Err(DeployError::UserStopped),
            Some(state) if state.is_timeout() && exit_code.is_none() => Err(DeployError::Timeout(
                "script did not report completion, exit code unknown; it may still be running"
                    .to_string(),
            )),
            _ => match exit_code.as_deref().unwrap_or("0") {
                "0" => Ok(()),
                code => Err(DeployError::RemoteScriptFailed(code.to_string())),
            },
        }
    }

    fn start_and_tail(
        &mut self,
        command: &str,
        stop: &StopToken,
        reporter: &Reporter,
        tail: &mut Option<Box<dyn RemoteProcess>>,
    ) -> Result<(), DeployError> {
        if stop.is_stop_requested() {
            self.transition(JobEvent::StopRequested);
            return Ok(());
        }

        self.session.exec(&self.handle.create_command(command))?;
        self.session.exec(&self.handle.launch_command())?;
        reporter.log("Script started in background, reading log...");
        info!("Launched background script {}", self.handle.script_file);

        thread::sleep(self.timings.startup_delay);

        *tail = Some(self.session.spawn(&self.handle.tail_command(), true)?);
        self.transition(JobEvent::Launched);

        if let Some(process) = tail.as_mut() {
            self.tail_loop(process.as_mut(), stop, reporter)?;
        }
        Ok(())
    }

    fn tail_loop(
        &mut self,
        tail: &mut dyn RemoteProcess,
        stop: &StopToken,
        reporter: &Reporter,
    ) -> Result<(), DeployError> {
        let started = Instant::now();
        let mut last_line = started;
        let mut last_check = started;

        loop {
            if stop.is_stop_requested() {
                reporter.log("🛑 Operation stopped, cleaning up...");
                self.transition(JobEvent::StopRequested);
                return Ok(());
            }

            let now = Instant::now();

            if now.duration_since(last_check) >= self.timings.check_interval {
                let check = self.session.exec(&self.handle.check_command())?;
                if check.trim() == "DONE" {
                    reporter.log("Detected script completion flag");
                    thread::sleep(self.timings.settle_delay);
                    drain(tail, reporter)?;
                    self.transition(JobEvent::SentinelSeen);
                    return Ok(());
                }
                last_check = now;
            }

            if now.duration_since(last_line) > self.timings.idle_timeout {
                reporter.log(format!(
                    "No log output for {}s, the script has probably finished",
                    self.timings.idle_timeout.as_secs()
                ));
                self.transition(JobEvent::IdleElapsed);
                return Ok(());
            }

            if now.duration_since(started) > self.timings.hard_timeout {
                reporter.log(format!(
                    "Execution timed out after {}s",
                    self.timings.hard_timeout.as_secs()
                ));
                self.transition(JobEvent::DeadlineElapsed);
                return Ok(());
            }

            match tail.read_line()? {
                LineRead::Line(line) => {
                    last_line = now;
                    emit_clean(&line, reporter);
                }
                LineRead::Pending | LineRead::Eof => thread::sleep(self.timings.poll_interval),
            }
        }
    }

    /// Close the tail, read the exit code, remove temp files.
    /// Returns the recorded exit code, `None` when the flag is missing.
    fn cleanup(
        &mut self,
        tail: Option<Box<dyn RemoteProcess>>,
        reporter: &Reporter,
    ) -> Option<String> {
        if let Some(mut tail) = tail {
            if let Err(e) = tail.close() {
                debug!("Ignoring tail close error: {}", e);
            }
        }

        let exit_code = match self.session.exec(&self.handle.read_exit_command()) {
            Ok(out) => Some(out.trim().to_string()).filter(|code| !code.is_empty()),
            Err(e) => {
                warn!("Failed to read exit code: {}", e);
                None
            }
        };

        if let Err(e) = self.session.exec(&self.handle.cleanup_command()) {
            warn!("Failed to remove remote temp files: {}", e);
        }

        reporter.separator();
        self.transition(JobEvent::Cleanup);
        exit_code
    }

    fn transition(&mut self, event: JobEvent) {
        if let Err(e) = self.fsm.process(event) {
            warn!("{}", e);
        }
    }
}

fn emit_clean(line: &str, reporter: &Reporter) {
    let clean = strip_ansi(line.trim_end());
    if !clean.is_empty() {
        reporter.log(clean);
    }
}

fn drain(tail: &mut dyn RemoteProcess, reporter: &Reporter) -> Result<(), DeployError> {
    while let LineRead::Line(line) = tail.read_line()? {
        emit_clean(&line, reporter);
    }
    Ok(())
}
