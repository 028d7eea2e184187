//! Transfer stage tests

use std::sync::Arc;

use rdeploy::deploy::cancel::StopToken;
use rdeploy::deploy::events::{MemorySink, Reporter};
use rdeploy::deploy::transfer::{mkdir_recursive, upload_mappings, UploadSummary};
use rdeploy::errors::DeployError;
use rdeploy::models::project::FileMapping;

use crate::fakes::{FakeFs, FakeRemote};

fn reporter() -> (Arc<MemorySink>, Reporter) {
    let sink = Arc::new(MemorySink::new());
    let reporter = Reporter::new(sink.clone());
    (sink, reporter)
}

fn artifact(dir: &tempfile::TempDir, name: &str, size: usize) -> String {
    let path = dir.path().join(name);
    std::fs::write(&path, vec![b'x'; size]).unwrap();
    path.display().to_string()
}

#[test]
fn test_mkdir_only_creates_missing_segments() {
    let remote = FakeRemote::with(|s| {
        s.dirs.insert("/opt".to_string());
    });
    let fs = FakeFs::new(&remote);

    mkdir_recursive(&fs, "/opt/app/lib").unwrap();
    mkdir_recursive(&fs, "/opt/app/lib").unwrap();

    assert_eq!(remote.state().mkdir_calls, vec!["/opt/app", "/opt/app/lib"]);
}

#[test]
fn test_relative_remote_dir() {
    let remote = FakeRemote::new();
    let fs = FakeFs::new(&remote);

    mkdir_recursive(&fs, "releases/v2").unwrap();

    assert_eq!(remote.state().mkdir_calls, vec!["releases", "releases/v2"]);
}

#[test]
fn test_upload_into_directory_and_report_progress() {
    let dir = tempfile::tempdir().unwrap();
    let jar = artifact(&dir, "app.jar", 4096);
    let remote = FakeRemote::new();
    let fs = FakeFs::new(&remote);
    let (sink, reporter) = reporter();

    let summary = upload_mappings(
        &fs,
        &[FileMapping::new(jar, "/opt/app/")],
        &StopToken::new(),
        &reporter,
    )
    .unwrap();

    assert_eq!(
        summary,
        UploadSummary {
            configured: 1,
            uploaded: 1,
            skipped: 0
        }
    );
    let state = remote.state();
    assert_eq!(state.files.get("/opt/app/app.jar").map(Vec::len), Some(4096));
    assert_eq!(state.mkdir_calls, vec!["/opt", "/opt/app"]);
    assert_eq!(sink.progress(), 1);

    let lines = sink.lines();
    assert_eq!(lines[0], "Uploading 1 file(s)...");
    assert!(lines.contains(&"Starting upload: app.jar (0.00MiB)".to_string()));
    assert!(lines.iter().any(|l| l.starts_with("  Upload progress: 100%")));
    assert!(lines.contains(&"✓ Uploaded: app.jar -> /opt/app/app.jar".to_string()));
}

#[test]
fn test_skips_missing_and_invalid_entries() {
    let dir = tempfile::tempdir().unwrap();
    let present = artifact(&dir, "present.txt", 10);
    let missing = dir.path().join("missing.txt").display().to_string();
    let remote = FakeRemote::new();
    let fs = FakeFs::new(&remote);
    let (sink, reporter) = reporter();

    let summary = upload_mappings(
        &fs,
        &[
            FileMapping::new(missing.clone(), "/srv/missing.txt"),
            FileMapping::new("", "/srv/empty.txt"),
            FileMapping::new(present, "/srv/present.txt"),
        ],
        &StopToken::new(),
        &reporter,
    )
    .unwrap();

    assert_eq!(summary.uploaded, 1);
    assert_eq!(summary.skipped, 2);
    assert_eq!(
        remote.state().files.keys().collect::<Vec<_>>(),
        vec!["/srv/present.txt"]
    );
    assert!(sink
        .lines()
        .contains(&format!("✗ Local file does not exist: {}", missing)));
}

#[test]
fn test_all_entries_skipped_is_an_error() {
    let remote = FakeRemote::new();
    let fs = FakeFs::new(&remote);
    let (_sink, reporter) = reporter();

    let err = upload_mappings(
        &fs,
        &[FileMapping::new("/definitely/not/here.jar", "/opt/")],
        &StopToken::new(),
        &reporter,
    )
    .unwrap_err();

    assert!(matches!(err, DeployError::NothingUploaded(1)));
    assert!(remote.state().files.is_empty());
}

#[test]
fn test_stop_is_checked_between_files() {
    let dir = tempfile::tempdir().unwrap();
    let file = artifact(&dir, "a.bin", 1);
    let remote = FakeRemote::new();
    let fs = FakeFs::new(&remote);
    let (sink, reporter) = reporter();
    let stop = StopToken::new();
    stop.request_stop();

    let err = upload_mappings(&fs, &[FileMapping::new(file, "/srv/")], &stop, &reporter)
        .unwrap_err();

    assert!(err.is_stop());
    assert!(remote.state().files.is_empty());
    assert!(sink.lines().contains(&"🛑 Upload stopped".to_string()));
}
