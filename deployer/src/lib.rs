//! rdeploy library
//!
//! Deployment engine that builds locally, uploads over SFTP, and runs
//! remote scripts over SSH, reporting progress through an event channel.

pub mod app;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod storage;
pub mod utils;
