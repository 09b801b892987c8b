//! Settings resolution and validation against real files.
//!
//! Covers:
//! - Resolution order (CLI > SNAPAGG_CONFIG > SNAPAGG_CONFIG_DIR > XDG)
//! - Relative path handling
//! - Validation failures surfacing through `load_settings`

use snapagg_config::{
    load_settings, resolve_settings_path, ConfigError, ConfigOptions, ConfigSource,
    ValidationError,
};
use std::env;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, OnceLock};
use tempfile::TempDir;

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

struct EnvGuard {
    keys: Vec<String>,
    saved: Vec<Option<String>>,
}

impl EnvGuard {
    fn new(keys: &[&str]) -> Self {
        let mut saved = Vec::with_capacity(keys.len());
        for key in keys {
            saved.push(env::var(key).ok());
        }
        Self {
            keys: keys.iter().map(|k| k.to_string()).collect(),
            saved,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (idx, key) in self.keys.iter().enumerate() {
            match self.saved.get(idx).and_then(|v| v.as_ref()) {
                Some(val) => env::set_var(key, val),
                None => env::remove_var(key),
            }
        }
    }
}

fn with_env_lock<T>(f: impl FnOnce() -> T) -> T {
    let _guard = ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    f()
}

fn write_settings(dir: &Path, body: &str) -> std::path::PathBuf {
    fs::create_dir_all(dir).expect("create settings dir");
    let path = dir.join("settings.json");
    fs::write(&path, body).expect("write settings");
    path
}

const ENV_KEYS: &[&str] = &["SNAPAGG_CONFIG", "SNAPAGG_CONFIG_DIR", "XDG_CONFIG_HOME"];

#[test]
fn test_resolve_cli_over_env() {
    with_env_lock(|| {
        let _guard = EnvGuard::new(ENV_KEYS);
        let tmp = TempDir::new().unwrap();
        let cli = write_settings(&tmp.path().join("cli"), "{}");
        let from_env = write_settings(&tmp.path().join("env"), "{}");
        env::set_var("SNAPAGG_CONFIG", &from_env);

        let (path, source) = resolve_settings_path(Some(&cli));
        assert_eq!(path, Some(cli));
        assert_eq!(source, ConfigSource::CliArgument);
    });
}

#[test]
fn test_resolve_env_path_over_config_dir() {
    with_env_lock(|| {
        let _guard = EnvGuard::new(ENV_KEYS);
        let tmp = TempDir::new().unwrap();
        let direct = write_settings(&tmp.path().join("direct"), "{}");
        let dir = tmp.path().join("dir");
        write_settings(&dir, "{}");
        env::set_var("SNAPAGG_CONFIG", &direct);
        env::set_var("SNAPAGG_CONFIG_DIR", &dir);

        let (path, source) = resolve_settings_path(None);
        assert_eq!(path, Some(direct));
        assert_eq!(source, ConfigSource::Environment);
    });
}

#[test]
fn test_resolve_missing_env_path_falls_through_to_config_dir() {
    with_env_lock(|| {
        let _guard = EnvGuard::new(ENV_KEYS);
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("dir");
        let expected = write_settings(&dir, "{}");
        env::set_var("SNAPAGG_CONFIG", tmp.path().join("missing.json"));
        env::set_var("SNAPAGG_CONFIG_DIR", &dir);

        let (path, source) = resolve_settings_path(None);
        assert_eq!(path, Some(expected));
        assert_eq!(source, ConfigSource::Environment);
    });
}

#[test]
fn test_resolve_xdg_config_home() {
    with_env_lock(|| {
        let _guard = EnvGuard::new(ENV_KEYS);
        env::remove_var("SNAPAGG_CONFIG");
        env::remove_var("SNAPAGG_CONFIG_DIR");
        let tmp = TempDir::new().unwrap();
        let expected = write_settings(&tmp.path().join("snapagg"), "{}");
        env::set_var("XDG_CONFIG_HOME", tmp.path());

        let (path, source) = resolve_settings_path(None);
        assert_eq!(path, Some(expected));
        assert_eq!(source, ConfigSource::XdgConfig);
    });
}

#[test]
fn test_load_relative_paths_resolve_against_settings_dir() {
    with_env_lock(|| {
        let _guard = EnvGuard::new(ENV_KEYS);
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("conf");
        write_settings(
            &dir,
            r#"{
                "schema_version": "1.0.0",
                "global": {"output_dir": "../data", "log_dir": "logs", "data_retention_days": 30},
                "workers": {"smax": {"command": "bin/smax.sh", "queue": "BIA"}}
            }"#,
        );
        env::set_var("SNAPAGG_CONFIG_DIR", &dir);
        env::remove_var("SNAPAGG_CONFIG");

        let resolved = load_settings(&ConfigOptions::default()).unwrap();
        let settings = &resolved.settings;
        assert_eq!(resolved.source, ConfigSource::Environment);
        assert_eq!(settings.global.output_dir, dir.join("../data"));
        assert_eq!(settings.global.log_dir, dir.join("logs"));
        assert_eq!(settings.global.data_retention_days, 30);
        let smax = settings.worker("smax").unwrap();
        assert_eq!(smax.command.as_deref(), Some(dir.join("bin/smax.sh").as_path()));
        assert_eq!(smax.params["queue"], "BIA");
    });
}

#[test]
fn test_load_rejects_invalid_worker_name() {
    let tmp = TempDir::new().unwrap();
    let path = write_settings(tmp.path(), r#"{"workers": {"Bad Name": {}}}"#);
    let err = load_settings(&ConfigOptions {
        settings_path: Some(path),
        output_dir: None,
    })
    .unwrap_err();
    assert!(matches!(
        err,
        ConfigError::ValidationError(ValidationError::InvalidValue { .. })
    ));
}

#[test]
fn test_load_rejects_version_mismatch() {
    let tmp = TempDir::new().unwrap();
    let path = write_settings(tmp.path(), r#"{"schema_version": "2.0.0"}"#);
    let err = load_settings(&ConfigOptions {
        settings_path: Some(path),
        output_dir: None,
    })
    .unwrap_err();
    assert!(matches!(
        err,
        ConfigError::ValidationError(ValidationError::VersionMismatch { .. })
    ));
}
