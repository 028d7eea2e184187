//! Persistent storage

pub mod config;
pub mod layout;
