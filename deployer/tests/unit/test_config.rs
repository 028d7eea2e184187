//! Config store tests

use rdeploy::app::options::AppOptions;
use rdeploy::errors::DeployError;
use rdeploy::filesys::file::File;
use rdeploy::models::project::FileMapping;
use rdeploy::storage::config::ConfigStore;
use rdeploy::storage::layout::StorageLayout;
use secrecy::ExposeSecret;

#[test]
fn test_ensure_exists_writes_demo_once() {
    let dir = tempfile::tempdir().unwrap();
    let file = StorageLayout::new(dir.path()).config_file();

    assert!(tokio_test::block_on(ConfigStore::ensure_exists(&file)).unwrap());
    assert!(!tokio_test::block_on(ConfigStore::ensure_exists(&file)).unwrap());

    let config = tokio_test::block_on(ConfigStore::load(&file)).unwrap();
    let (project, server) = config.resolve("demo-project").unwrap();
    assert_eq!(server.username, "root");
    assert_eq!(server.password.expose_secret(), "123456");
    assert_eq!(project.files.len(), 1);
}

#[test]
fn test_save_and_reload() {
    let dir = tempfile::tempdir().unwrap();
    let file = File::new(dir.path().join("nested").join("deploy.json"));

    let mut config = ConfigStore::demo();
    if let Some(project) = config.projects.get_mut("demo-project") {
        project.files.push(FileMapping::new("dist/web.zip", "/srv/www/"));
    }
    tokio_test::block_on(config.save(&file)).unwrap();

    let reloaded = tokio_test::block_on(ConfigStore::load(&file)).unwrap();
    let (project, _) = reloaded.resolve("demo-project").unwrap();
    assert_eq!(project.files[1], FileMapping::new("dist/web.zip", "/srv/www/"));
}

#[test]
fn test_load_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let file = File::new(dir.path().join("absent.json"));

    let err = tokio_test::block_on(ConfigStore::load(&file)).unwrap_err();
    assert!(matches!(err, DeployError::ConfigError(_)));
}

#[test]
fn test_config_path_override() {
    let options = AppOptions {
        storage: StorageLayout::new("/var/lib/rdeploy"),
        ..Default::default()
    };
    assert_eq!(
        options.config_file().path(),
        std::path::Path::new("/var/lib/rdeploy/config.json")
    );

    let options = AppOptions {
        config_path: Some("/etc/rdeploy.json".into()),
        ..options
    };
    assert_eq!(options.config_file().path(), std::path::Path::new("/etc/rdeploy.json"));
}
