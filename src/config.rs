//! Configuration file support.
//!
//! A single YAML document drives the tunables that do not warrant CLI
//! flags: per-backend executables and extra options, extra launcher
//! options, and the columns of `profile list`.
//!
//! ```yaml
//! backends:
//!   podman:
//!     executable: /opt/podman/bin/podman
//!     options: ["--log-level=error"]
//!     run_options: ["--ipc=host"]
//! launcher_options: ["-q"]
//! profile_list_columns: [selected, name, backend, image]
//! ```
//!
//! Values set in the environment (`E4S_CL_*`) have priority over the
//! configuration file; compiled-in defaults come last.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::util;

/// Per-backend configuration block.
///
/// Option lists are keyed by scope: the plain `options` key applies to
/// every invocation, `<scope>_options` only to the matching sub-command
/// of the backend (e.g. `run_options` for `podman run`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackendConfig {
    pub executable: Option<String>,

    #[serde(flatten)]
    pub option_lists: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backends: BTreeMap<String, BackendConfig>,

    #[serde(default)]
    pub launcher_options: Vec<String>,

    #[serde(default)]
    pub profile_list_columns: Vec<String>,
}

impl Config {
    /// Load the configuration from the default location, tolerating a
    /// missing file. `E4S_CL_CONFIG_FILE` overrides the path.
    pub fn load_default() -> Self {
        let path = match util::get_env("config_file") {
            Some(path) => PathBuf::from(path),
            None => match directories::ProjectDirs::from("", "", "e4s-cl") {
                Some(dirs) => dirs.config_dir().join("e4s-cl.yaml"),
                None => return Self::default(),
            },
        };

        Self::load(&path).unwrap_or_default()
    }

    /// Load the configuration from a specific path.
    pub fn load(path: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;

        match serde_yaml::from_str(&content) {
            Ok(config) => Some(config),
            Err(err) => {
                debug!("Failed to parse configuration {}: {err}", path.display());
                None
            }
        }
    }

    /// Extra options for a backend, resolved environment first.
    ///
    /// The marker is `<backend>[_<scope>]_options`: in the environment it
    /// is read as `E4S_CL_<MARKER>` and split shell-style, in the
    /// configuration as `backends.<backend>.[<scope>_]options`.
    pub fn backend_options(&self, backend: &str, scope: Option<&str>) -> Vec<String> {
        let marker: String = [Some(backend), scope, Some("options")]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join("_");

        if let Some(env_options) = util::get_env(&marker) {
            debug!("{backend} additional options (from env): {env_options}");
            return shlex::split(&env_options).unwrap_or_default();
        }

        let key = match scope {
            Some(scope) => format!("{scope}_options"),
            None => "options".to_string(),
        };

        self.backends
            .get(backend)
            .and_then(|entry| entry.option_lists.get(&key))
            .cloned()
            .unwrap_or_default()
    }

    /// Path to a backend's executable, resolved environment first, then
    /// configuration, then a `PATH` lookup of the canonical name.
    pub fn backend_executable(&self, backend: &str, default_name: &str) -> Option<PathBuf> {
        if let Some(env_path) = util::get_env(&format!("{backend}_executable")) {
            let path = PathBuf::from(&env_path);
            if path.is_file() {
                debug!("{backend} executable (from env): {env_path}");
                return Some(path);
            }
            tracing::error!("Invalid executable path for {backend}: {env_path}");
        }

        if let Some(config_path) = self
            .backends
            .get(backend)
            .and_then(|entry| entry.executable.as_deref())
        {
            let path = PathBuf::from(config_path);
            if path.is_file() {
                debug!("{backend} executable (from config): {config_path}");
                return Some(path);
            }
            tracing::error!("Invalid executable path for {backend}: {config_path}");
        }

        if default_name.is_empty() {
            return None;
        }

        util::which(default_name)
    }

    /// Extra options appended to the launcher part of the command line.
    pub fn launcher_options(&self) -> Vec<String> {
        if let Some(env_options) = std::env::var("LAUNCHER_OPTIONS").ok().filter(|s| !s.is_empty())
        {
            return shlex::split(&env_options).unwrap_or_default();
        }

        self.launcher_options.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn sample() -> Config {
        serde_yaml::from_str(
            r#"
backends:
  podman:
    executable: /opt/podman
    options: ["--log-level=error"]
    run_options: ["--ipc=host"]
launcher_options: ["-q"]
profile_list_columns: [selected, name]
"#,
        )
        .unwrap()
    }

    #[test]
    #[serial]
    fn test_options_from_config() {
        let config = sample();
        assert_eq!(config.backend_options("podman", None), vec!["--log-level=error"]);
        assert_eq!(config.backend_options("podman", Some("run")), vec!["--ipc=host"]);
        assert!(config.backend_options("podman", Some("exec")).is_empty());
        assert!(config.backend_options("docker", None).is_empty());
    }

    #[test]
    #[serial]
    fn test_env_overrides_config() {
        let config = sample();
        unsafe { std::env::set_var("E4S_CL_PODMAN_OPTIONS", "--root /tmp") };
        assert_eq!(config.backend_options("podman", None), vec!["--root", "/tmp"]);
        unsafe { std::env::remove_var("E4S_CL_PODMAN_OPTIONS") };
        assert_eq!(config.backend_options("podman", None), vec!["--log-level=error"]);
    }

    #[test]
    #[serial]
    fn test_scoped_env_marker() {
        let config = sample();
        unsafe { std::env::set_var("E4S_CL_PODMAN_RUN_OPTIONS", "--pid=host") };
        assert_eq!(config.backend_options("podman", Some("run")), vec!["--pid=host"]);
        unsafe { std::env::remove_var("E4S_CL_PODMAN_RUN_OPTIONS") };
    }

    #[test]
    #[serial]
    fn test_launcher_options() {
        let config = sample();
        unsafe { std::env::remove_var("LAUNCHER_OPTIONS") };
        assert_eq!(config.launcher_options(), vec!["-q"]);

        unsafe { std::env::set_var("LAUNCHER_OPTIONS", "--timeout 60") };
        assert_eq!(config.launcher_options(), vec!["--timeout", "60"]);
        unsafe { std::env::remove_var("LAUNCHER_OPTIONS") };
    }

    #[test]
    fn test_missing_file_is_default() {
        assert!(Config::load(Path::new("/nonexistent/e4s-cl.yaml")).is_none());
    }
}
