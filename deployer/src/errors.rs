//! Error types for the deployment engine

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for rdeploy
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("SSH error: {0}")]
    SshError(#[from] ssh2::Error),

    /// The stop token was observed. Never fatal, reported as "not completed".
    #[error("Operation stopped")]
    UserStopped,

    #[error("Command `{command}` failed with exit code {code}")]
    LocalCommandFailed { command: String, code: String },

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Local file does not exist: {}", .0.display())]
    LocalFileMissing(PathBuf),

    #[error("Remote command exited with code {0}")]
    RemoteScriptFailed(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Project has no files configured")]
    NoFilesConfigured,

    #[error("No files were uploaded ({0} entries skipped)")]
    NothingUploaded(usize),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Another operation is already running")]
    Busy,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeployError {
    /// Whether this error is the cooperative stop rather than a failure
    pub fn is_stop(&self) -> bool {
        matches!(self, DeployError::UserStopped)
    }
}
