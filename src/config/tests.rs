//! Server configuration tests

use super::*;
use std::io::Write;

fn write_config(dir: &tempfile::TempDir, content: &str) -> PathBuf {
    let path = dir.path().join("config.toml");
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(content.as_bytes()).unwrap();
    path
}

#[test]
fn test_defaults() {
    let config = Config::default();
    assert_eq!(config.bind_addr.port(), 8000);
    assert_eq!(config.profiles_dir, PathBuf::from("configs/mod_profiles"));
    assert!(config.log_dir.is_none());
    assert_eq!(config.logging.level, "info");
    assert!(config.scheduler.enabled);
    assert_eq!(config.scheduler.check_interval_minutes, 10);
    assert!(config.memory_guard);
}

#[test]
fn test_missing_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load(Some(&dir.path().join("nope.toml")));
    assert_eq!(config.bind_addr.port(), 8000);
}

#[test]
fn test_file_overrides() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        r#"
bind_addr = "0.0.0.0:9100"
profiles_dir = "/data/profiles"
log_dir = "/var/log/gb"
memory_guard = false

[logging]
level = "debug"

[scheduler]
enabled = false
check_interval_minutes = 30
"#,
    );

    let config = Config::load(Some(&path));
    assert_eq!(config.bind_addr.port(), 9100);
    assert_eq!(config.profiles_dir, PathBuf::from("/data/profiles"));
    assert_eq!(config.log_dir, Some(PathBuf::from("/var/log/gb")));
    assert_eq!(config.logging.level, "debug");
    assert!(!config.scheduler.enabled);
    assert_eq!(config.scheduler.check_interval_minutes, 30);
    assert!(!config.memory_guard);
}

#[test]
fn test_partial_file_keeps_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "[scheduler]\ncheck_interval_minutes = 5\n");

    let config = Config::load(Some(&path));
    assert_eq!(config.scheduler.check_interval_minutes, 5);
    assert!(config.scheduler.enabled);
    assert_eq!(config.bind_addr.port(), 8000);
}

#[test]
fn test_invalid_file_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "this is not toml = = =");
    let config = Config::load(Some(&path));
    assert_eq!(config.bind_addr.port(), 8000);
}

#[test]
fn test_invalid_bind_addr_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "bind_addr = \"not-an-addr\"\n");
    let config = Config::load(Some(&path));
    assert_eq!(config.bind_addr.port(), 8000);
}
