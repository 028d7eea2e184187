//! Finite state machine for detached remote script runs

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing knobs for the background script stage
#[derive(Debug, Clone)]
pub struct JobTimings {
    /// Sleep between empty tail polls
    pub poll_interval: Duration,

    /// How often to check for the done-flag file
    pub check_interval: Duration,

    /// Stop tailing after this long without a new line
    pub idle_timeout: Duration,

    /// Give up after this long regardless of activity
    pub hard_timeout: Duration,

    /// Wait after launch before attaching the tail
    pub startup_delay: Duration,

    /// Wait after the done flag appears so trailing output lands in the log
    pub settle_delay: Duration,
}

impl Default for JobTimings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            check_interval: Duration::from_secs(2),
            idle_timeout: Duration::from_secs(60),
            hard_timeout: Duration::from_secs(600),
            startup_delay: Duration::from_secs(1),
            settle_delay: Duration::from_secs(1),
        }
    }
}

/// Background job state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Writing and launching the wrapper script
    Starting,

    /// Following the remote log file
    Tailing,

    /// Done flag observed
    Done,

    /// Stop token observed
    Stopped,

    /// No output for longer than the idle timeout
    IdleTimeout,

    /// Absolute deadline reached
    HardTimeout,

    /// Temp files removed, tail closed
    CleanedUp,
}

impl JobState {
    /// States that end the tail loop
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Done | JobState::Stopped | JobState::IdleTimeout | JobState::HardTimeout
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, JobState::IdleTimeout | JobState::HardTimeout)
    }
}

/// Background job event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    /// Script written and started detached
    Launched,

    /// Done-flag file exists
    SentinelSeen,

    /// Stop token observed
    StopRequested,

    /// Idle timeout elapsed
    IdleElapsed,

    /// Absolute timeout elapsed
    DeadlineElapsed,

    /// Cleanup ran (always, from any state except `CleanedUp`)
    Cleanup,

    /// Start or tail failed before reaching a terminal state
    Failed(String),
}

/// Background job FSM
#[derive(Debug, Clone)]
pub struct JobFsm {
    state: JobState,
    ended_in: Option<JobState>,
    error: Option<String>,
}

impl JobFsm {
    /// Create a new FSM in the starting state
    pub fn new() -> Self {
        Self {
            state: JobState::Starting,
            ended_in: None,
            error: None,
        }
    }

    /// Get current state
    pub fn state(&self) -> JobState {
        self.state
    }

    /// The terminal state reached before cleanup, if any
    pub fn ended_in(&self) -> Option<JobState> {
        self.ended_in
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: JobEvent) -> Result<(), String> {
        let new_state = match (&self.state, &event) {
            // From Starting
            (JobState::Starting, JobEvent::Launched) => JobState::Tailing,
            (JobState::Starting, JobEvent::StopRequested) => JobState::Stopped,

            // From Tailing
            (JobState::Tailing, JobEvent::SentinelSeen) => JobState::Done,
            (JobState::Tailing, JobEvent::StopRequested) => JobState::Stopped,
            (JobState::Tailing, JobEvent::IdleElapsed) => JobState::IdleTimeout,
            (JobState::Tailing, JobEvent::DeadlineElapsed) => JobState::HardTimeout,

            // Failures keep the state; cleanup still follows
            (JobState::Starting | JobState::Tailing, JobEvent::Failed(err)) => {
                self.error = Some(err.clone());
                self.state
            }

            // Cleanup always runs once
            (state, JobEvent::Cleanup) if *state != JobState::CleanedUp => {
                if state.is_terminal() {
                    self.ended_in = Some(*state);
                }
                JobState::CleanedUp
            }

            // Invalid transitions
            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        Ok(())
    }
}

impl Default for JobFsm {
    fn default() -> Self {
        Self::new()
    }
}
