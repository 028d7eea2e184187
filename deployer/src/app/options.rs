//! Application configuration options

use std::path::PathBuf;
use std::time::Duration;

use crate::deploy::fsm::JobTimings;
use crate::filesys::file::File;
use crate::storage::layout::StorageLayout;

/// Main application options
#[derive(Debug, Clone, Default)]
pub struct AppOptions {
    /// Config and log locations
    pub storage: StorageLayout,

    /// Overrides the config file location from the storage layout
    pub config_path: Option<PathBuf>,

    /// Deployment engine settings
    pub deploy: DeployOptions,
}

impl AppOptions {
    /// The config document to read
    pub fn config_file(&self) -> File {
        match &self.config_path {
            Some(path) => File::new(path.clone()),
            None => self.storage.config_file(),
        }
    }
}

/// Deployment engine settings
#[derive(Debug, Clone)]
pub struct DeployOptions {
    /// Sleep between polls of local and remote output
    pub poll_interval: Duration,

    /// Connect timeout for connection tests; operations have none
    pub connect_timeout: Duration,

    /// Remote directory for background job files
    pub remote_temp_dir: String,

    /// Fail the interactive deploy script on nonzero exit
    pub check_exit_status: bool,

    /// Background script timings
    pub job: JobTimings,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            connect_timeout: Duration::from_secs(5),
            remote_temp_dir: "/tmp".to_string(),
            check_exit_status: true,
            job: JobTimings::default(),
        }
    }
}
