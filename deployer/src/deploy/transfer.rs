//! File transfer stage

use std::path::Path;

use tracing::{debug, info, warn};

use crate::deploy::cancel::StopToken;
use crate::deploy::events::Reporter;
use crate::deploy::session::RemoteFs;
use crate::errors::DeployError;
use crate::models::project::FileMapping;

const MIB: f64 = 1024.0 * 1024.0;

/// Bytes expressed in MiB, two decimals
pub fn format_mib(bytes: u64) -> String {
    format!("{:.2}MiB", bytes as f64 / MIB)
}

/// Append the local base name when `remote` names a directory
pub fn resolve_remote_path(local: &Path, remote: &str) -> String {
    if remote.ends_with('/') {
        let name = local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!("{}{}", remote, name)
    } else {
        remote.to_string()
    }
}

/// Directory part of a remote path (`/opt/app/a.jar` → `/opt/app`)
pub fn remote_parent(remote: &str) -> Option<&str> {
    let (parent, _) = remote.rsplit_once('/')?;
    if parent.is_empty() {
        None
    } else {
        Some(parent)
    }
}

/// Create every missing segment of `dir`, checking each one first.
pub fn mkdir_recursive(fs: &dyn RemoteFs, dir: &str) -> Result<(), DeployError> {
    let mut path = String::new();
    if dir.starts_with('/') {
        path.push('/');
    }
    for part in dir.split('/').filter(|p| !p.is_empty()) {
        if !path.is_empty() && !path.ends_with('/') {
            path.push('/');
        }
        path.push_str(part);
        if !fs.exists(&path) {
            debug!("Creating remote directory {}", path);
            fs.mkdir(&path)?;
        }
    }
    Ok(())
}

/// Throttles progress logging to 10-point steps plus completion
#[derive(Debug, Default, Clone)]
pub struct TransferProgress {
    last_percent: u32,
}

impl TransferProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the percentage to log, if this update crosses a step
    pub fn update(&mut self, transferred: u64, total: u64) -> Option<u32> {
        if total == 0 {
            return None;
        }
        let percent = (transferred.saturating_mul(100) / total) as u32;
        if percent >= self.last_percent + 10 || transferred == total {
            self.last_percent = percent;
            Some(percent)
        } else {
            None
        }
    }
}

/// Counts for one transfer run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UploadSummary {
    pub configured: usize,
    pub uploaded: usize,
    pub skipped: usize,
}

/// Upload one file, creating its remote parent directory first.
pub fn upload_file(
    fs: &dyn RemoteFs,
    local: &Path,
    remote: &str,
    reporter: &Reporter,
) -> Result<(), DeployError> {
    if let Some(parent) = remote_parent(remote) {
        mkdir_recursive(fs, parent)?;
    }

    let size = std::fs::metadata(local)?.len();
    let name = local
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| local.display().to_string());
    reporter.log(format!("Starting upload: {} ({})", name, format_mib(size)));

    let mut progress = TransferProgress::new();
    fs.upload(local, remote, &mut |transferred, total| {
        if let Some(percent) = progress.update(transferred, total) {
            reporter.log(format!(
                "  Upload progress: {}% ({} / {})",
                percent,
                format_mib(transferred),
                format_mib(total)
            ));
        }
    })?;

    reporter.progress(1);
    reporter.log(format!("✓ Uploaded: {} -> {}", name, remote));
    info!("Uploaded {} -> {}", local.display(), remote);
    Ok(())
}

/// Upload every mapping in order.
///
/// Invalid entries and missing local files are logged and skipped. The
/// stop token is checked between files only.
pub fn upload_mappings(
    fs: &dyn RemoteFs,
    mappings: &[FileMapping],
    stop: &StopToken,
    reporter: &Reporter,
) -> Result<UploadSummary, DeployError> {
    let mut summary = UploadSummary {
        configured: mappings.len(),
        ..Default::default()
    };
    reporter.log(format!("Uploading {} file(s)...", mappings.len()));

    for mapping in mappings {
        if stop.is_stop_requested() {
            reporter.log("🛑 Upload stopped");
            return Err(DeployError::UserStopped);
        }

        if !mapping.is_valid() {
            reporter.log(format!(
                "⚠ Skipping invalid entry: local={:?} remote={:?}",
                mapping.local, mapping.remote
            ));
            summary.skipped += 1;
            continue;
        }

        let local = Path::new(mapping.local.trim());
        if !local.exists() {
            let missing = DeployError::LocalFileMissing(local.to_path_buf());
            warn!("{}", missing);
            reporter.log(format!("✗ {}", missing));
            summary.skipped += 1;
            continue;
        }

        let remote = resolve_remote_path(local, mapping.remote.trim());
        upload_file(fs, local, &remote, reporter)?;
        summary.uploaded += 1;
    }

    if summary.uploaded == 0 && summary.configured > 0 {
        return Err(DeployError::NothingUploaded(summary.skipped));
    }
    Ok(summary)
}
