//! In-memory implementations of the remote session traits

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rdeploy::deploy::cancel::StopToken;
use rdeploy::deploy::session::{Connector, LineRead, RemoteFs, RemoteProcess, RemoteSession};
use rdeploy::errors::DeployError;
use rdeploy::models::project::ServerTarget;

#[derive(Debug, Default)]
pub struct RemoteState {
    pub dirs: BTreeSet<String>,
    pub files: BTreeMap<String, Vec<u8>>,
    pub mkdir_calls: Vec<String>,
    pub exec_log: Vec<String>,
    pub spawned: Vec<(String, bool)>,
    pub connects: usize,
    pub connect_timeouts: Vec<Option<Duration>>,
    pub closes: usize,
    pub interrupts: usize,
    pub connect_error: Option<String>,
    /// Requested once the first upload has been written
    pub stop_on_upload: Option<StopToken>,

    /// Output and exit status of PTY commands other than `tail -f`
    pub pty_lines: Vec<String>,
    pub pty_exit: Option<i32>,
    /// PTY command never reaches EOF on its own
    pub pty_endless: bool,

    /// Lines served by the background log tail
    pub tail_lines: Vec<String>,
    /// Content of the done flag, once it becomes visible
    pub sentinel: Option<String>,
    /// Number of flag checks that report nothing before it becomes visible
    pub sentinel_after_checks: usize,
    pub checks: usize,
}

impl RemoteState {
    fn sentinel_visible(&self) -> Option<&str> {
        self.sentinel
            .as_deref()
            .filter(|_| self.checks > self.sentinel_after_checks)
    }
}

/// A fake remote host; clones share state
#[derive(Debug, Clone, Default)]
pub struct FakeRemote {
    state: Arc<Mutex<RemoteState>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(setup: impl FnOnce(&mut RemoteState)) -> Self {
        let remote = Self::new();
        setup(&mut remote.state());
        remote
    }

    pub fn state(&self) -> MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap()
    }
}

impl Connector for FakeRemote {
    fn connect(
        &self,
        _server: &ServerTarget,
        timeout: Option<Duration>,
    ) -> Result<Box<dyn RemoteSession>, DeployError> {
        let mut state = self.state();
        state.connect_timeouts.push(timeout);
        if let Some(error) = &state.connect_error {
            return Err(DeployError::ConnectionFailed(error.clone()));
        }
        state.connects += 1;
        Ok(Box::new(FakeSession {
            state: self.state.clone(),
        }))
    }
}

pub struct FakeSession {
    state: Arc<Mutex<RemoteState>>,
}

impl RemoteSession for FakeSession {
    fn open_transfer(&self) -> Result<Box<dyn RemoteFs>, DeployError> {
        Ok(Box::new(FakeFs {
            state: self.state.clone(),
        }))
    }

    fn exec(&self, command: &str) -> Result<String, DeployError> {
        let mut state = self.state.lock().unwrap();
        state.exec_log.push(command.to_string());

        if command.starts_with("test -f ") {
            state.checks += 1;
            return Ok(match state.sentinel_visible() {
                Some(_) => "DONE\n".to_string(),
                None => String::new(),
            });
        }
        if command.starts_with("cat ") && command.contains("deploy_done_") {
            return Ok(state
                .sentinel_visible()
                .map(|code| format!("{}\n", code))
                .unwrap_or_default());
        }
        Ok(String::new())
    }

    fn spawn(&self, command: &str, pty: bool) -> Result<Box<dyn RemoteProcess>, DeployError> {
        let mut state = self.state.lock().unwrap();
        state.spawned.push((command.to_string(), pty));

        let process = if command.starts_with("tail -f ") {
            FakeProcess {
                lines: state.tail_lines.iter().cloned().collect(),
                exit: None,
                endless: true,
                state: self.state.clone(),
            }
        } else {
            FakeProcess {
                lines: state.pty_lines.iter().cloned().collect(),
                exit: state.pty_exit,
                endless: state.pty_endless,
                state: self.state.clone(),
            }
        };
        Ok(Box::new(process))
    }

    fn close(&mut self) -> Result<(), DeployError> {
        self.state.lock().unwrap().closes += 1;
        Ok(())
    }
}

pub struct FakeFs {
    state: Arc<Mutex<RemoteState>>,
}

impl FakeFs {
    pub fn new(remote: &FakeRemote) -> Self {
        Self {
            state: remote.state.clone(),
        }
    }
}

impl RemoteFs for FakeFs {
    fn exists(&self, path: &str) -> bool {
        let state = self.state.lock().unwrap();
        state.dirs.contains(path) || state.files.contains_key(path)
    }

    fn mkdir(&self, path: &str) -> Result<(), DeployError> {
        let mut state = self.state.lock().unwrap();
        state.mkdir_calls.push(path.to_string());
        state.dirs.insert(path.to_string());
        Ok(())
    }

    fn upload(
        &self,
        local: &Path,
        remote: &str,
        progress: &mut dyn FnMut(u64, u64),
    ) -> Result<(), DeployError> {
        let bytes = std::fs::read(local)?;
        let total = bytes.len() as u64;
        for chunk in 1..=4u64 {
            progress(total * chunk / 4, total);
        }
        let mut state = self.state.lock().unwrap();
        state.files.insert(remote.to_string(), bytes);
        if let Some(stop) = state.stop_on_upload.take() {
            stop.request_stop();
        }
        Ok(())
    }
}

pub struct FakeProcess {
    lines: VecDeque<String>,
    exit: Option<i32>,
    endless: bool,
    state: Arc<Mutex<RemoteState>>,
}

impl RemoteProcess for FakeProcess {
    fn read_line(&mut self) -> Result<LineRead, DeployError> {
        Ok(match self.lines.pop_front() {
            Some(line) => LineRead::Line(line),
            None if self.endless => LineRead::Pending,
            None => LineRead::Eof,
        })
    }

    fn interrupt(&mut self) -> Result<(), DeployError> {
        self.state.lock().unwrap().interrupts += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), DeployError> {
        Ok(())
    }

    fn wait_exit(&mut self) -> Result<Option<i32>, DeployError> {
        Ok(self.exit)
    }
}
