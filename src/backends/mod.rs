//! Container backend drivers.
//!
//! One [`Container`] type carries the user-set state (image, bound files,
//! environment, preloads, library paths) and dispatches command
//! construction to the backend selected at creation. Backends differ in
//! how binds and environment reach the contained process; the
//! [`BackendKind`] enum plus per-module `prepare` functions replace the
//! dynamic plug-in discovery a scripting runtime would use.

mod apptainer;
mod containerless;
mod docker;
mod podman;
mod shifter;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::binds::{BindMode, BindRequest, BindSet};
use crate::command_runner::{CommandOptions, CommandRunner};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::ldcache::LdCache;

/// Directory in which files are bound when in containers.
pub const CONTAINER_DIR: &str = "/.e4s-cl";
/// Path of the script to execute in the container.
pub const CONTAINER_SCRIPT: &str = "/.e4s-cl/script";
/// Path of the libraries bound in the container.
pub const CONTAINER_LIBRARY_DIR: &str = "/.e4s-cl/hostlibs";
/// Path of the executables bound in the container.
pub const CONTAINER_BINARY_DIR: &str = "/.e4s-cl/executables";

/// The supported container technologies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Apptainer and its Singularity ancestor, separated only by the
    /// name of their environment prefix and bind variable.
    Apptainer { legacy_singularity: bool },
    Podman,
    Docker,
    Shifter,
    /// No container: a symlink tree on the host plus `LD_LIBRARY_PATH`.
    Containerless,
}

/// Registry entry tying a backend name to its kind and defaults.
pub struct BackendSpec {
    pub name: &'static str,
    pub kind: BackendKind,
    pub executable_name: &'static str,
    /// Image suffixes identifying this backend.
    pub mimes: &'static [&'static str],
}

/// The static backend registry.
pub const BACKENDS: &[BackendSpec] = &[
    BackendSpec {
        name: "apptainer",
        kind: BackendKind::Apptainer {
            legacy_singularity: false,
        },
        executable_name: "apptainer",
        mimes: &[".sif", ".simg"],
    },
    BackendSpec {
        name: "singularity",
        kind: BackendKind::Apptainer {
            legacy_singularity: true,
        },
        executable_name: "singularity",
        mimes: &[],
    },
    BackendSpec {
        name: "podman",
        kind: BackendKind::Podman,
        executable_name: "podman",
        mimes: &[],
    },
    BackendSpec {
        name: "docker",
        kind: BackendKind::Docker,
        executable_name: "docker",
        mimes: &[],
    },
    BackendSpec {
        name: "shifter",
        kind: BackendKind::Shifter,
        executable_name: "shifter",
        mimes: &[],
    },
    BackendSpec {
        name: "containerless",
        kind: BackendKind::Containerless,
        executable_name: "bash",
        mimes: &[],
    },
];

/// Comma-joined list of backend names, for messages and help text.
pub fn exposed_backends() -> String {
    BACKENDS
        .iter()
        .map(|spec| spec.name)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Look a backend up by name.
pub fn backend_for_name(name: &str) -> Result<&'static BackendSpec> {
    BACKENDS
        .iter()
        .find(|spec| spec.name == name)
        .ok_or_else(|| Error::BackendUnsupported {
            name: name.to_string(),
            available: exposed_backends(),
        })
}

/// Guess a backend from an image's suffix, when exactly one matches.
pub fn guess_backend(image: &Path) -> Option<&'static str> {
    let suffix = format!(".{}", image.extension()?.to_str()?);
    let matches: Vec<&BackendSpec> = BACKENDS
        .iter()
        .filter(|spec| spec.mimes.contains(&suffix.as_str()))
        .collect();

    match matches.as_slice() {
        [only] => Some(only.name),
        _ => None,
    }
}

/// Outcome of the in-container analysis probe.
#[derive(Debug, Clone, Default)]
pub enum AnalysisState {
    #[default]
    Fresh,
    Cached {
        libc_version: String,
        cache: LdCache,
    },
}

/// A configured container invocation.
pub struct Container {
    spec: &'static BackendSpec,
    pub image: Option<String>,
    pub binds: BindSet,
    env: BTreeMap<String, String>,
    ld_preload: Vec<String>,
    ld_library_path: Vec<String>,
    analysis: AnalysisState,
    /// Staging directory for backends that build a tree on disk; kept
    /// alive as long as the container object.
    staging: Option<tempfile::TempDir>,
}

impl Container {
    pub fn new(backend: &str, image: Option<String>) -> Result<Self> {
        let spec = backend_for_name(backend)?;
        Ok(Self {
            spec,
            image,
            binds: BindSet::new(),
            env: BTreeMap::new(),
            ld_preload: Vec::new(),
            ld_library_path: Vec::new(),
            analysis: AnalysisState::Fresh,
            staging: None,
        })
    }

    pub fn backend_name(&self) -> &'static str {
        self.spec.name
    }

    pub fn kind(&self) -> BackendKind {
        self.spec.kind
    }

    /// In-container directory receiving imported libraries.
    pub fn import_library_dir(&self) -> PathBuf {
        PathBuf::from(CONTAINER_LIBRARY_DIR)
    }

    /// In-container path of the sourced script.
    pub fn script_path(&self) -> PathBuf {
        PathBuf::from(CONTAINER_SCRIPT)
    }

    /// Resolve the backend executable: environment, configuration, then
    /// `PATH` lookup of the canonical name.
    pub fn executable(&self, config: &Config) -> Result<PathBuf> {
        config
            .backend_executable(self.spec.name, self.spec.executable_name)
            .ok_or_else(|| Error::BackendNotAvailable(self.spec.name.to_string()))
    }

    /// Add a bind request. Without a destination the path is bound in
    /// place, with `..` segments expanded.
    pub fn bind_file(&mut self, origin: &Path, destination: Option<&Path>, mode: BindMode) {
        match destination {
            Some(destination) => self
                .binds
                .add(BindRequest::new(origin, destination, mode)),
            None => self.binds.add_unrelative(origin, mode),
        }
    }

    /// Request that the contained process observes `key=value`.
    pub fn bind_env(&mut self, key: &str, value: &str) {
        self.env.insert(key.to_string(), value.to_string());
    }

    /// Add to the list forming the in-container `LD_PRELOAD`.
    pub fn add_preload(&mut self, path: &Path) {
        let entry = path.display().to_string();
        if !self.ld_preload.contains(&entry) {
            self.ld_preload.push(entry);
        }
    }

    /// Add to the list forming the in-container `LD_LIBRARY_PATH`.
    pub fn add_library_path(&mut self, path: &Path) {
        let entry = path.display().to_string();
        if !self.ld_library_path.contains(&entry) {
            self.ld_library_path.push(entry);
        }
    }

    /// Return the argv to exec for `command` in this container.
    ///
    /// With `overload` unset, produce the minimum argv to run inside the
    /// image for analysis: no injected binds, no preloads, no extra
    /// environment.
    pub fn prepare(
        &mut self,
        command: &[String],
        overload: bool,
        config: &Config,
    ) -> Result<Vec<String>> {
        match self.spec.kind {
            BackendKind::Apptainer { .. } => apptainer::prepare(self, command, overload, config),
            BackendKind::Podman => podman::prepare(self, command, overload, config),
            BackendKind::Docker => docker::prepare(self, command, overload, config),
            BackendKind::Shifter => shifter::prepare(self, command, overload, config),
            BackendKind::Containerless => {
                containerless::prepare(self, command, overload, config)
            }
        }
    }

    /// Environment variables to layer over the spawn.
    pub fn spawn_env(&self) -> Vec<(String, String)> {
        self.env
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Run `command` in the container.
    pub fn run(
        &mut self,
        command: &[String],
        overload: bool,
        config: &Config,
        runner: &dyn CommandRunner,
    ) -> Result<i32> {
        let argv = self.prepare(command, overload, config)?;
        let options = CommandOptions::with_env(self.spawn_env());

        let _fd_guard = match self.spec.kind {
            // Podman refuses to start unless the inherited descriptor
            // table is contiguous
            BackendKind::Podman => Some(podman::FdFiller::fill()?),
            _ => None,
        };

        let status = runner
            .run_status(&argv[0], &argv[1..], &options)
            .map_err(|err| Error::Internal(err.to_string()))?;

        Ok(status.code().unwrap_or(crate::error::EXIT_FAILURE))
    }

    /// Run the analysis probe inside the container and cache the result.
    ///
    /// Dumps the image's linker cache to read its soname map and libc
    /// version, falling back to `ldconfig --version` for caches without a
    /// generator string. Idempotent; a non-zero probe is fatal.
    pub fn get_data(
        &mut self,
        config: &Config,
        runner: &dyn CommandRunner,
    ) -> Result<&AnalysisState> {
        if matches!(self.analysis, AnalysisState::Cached { .. }) {
            return Ok(&self.analysis);
        }

        // Containerless sees the host linker configuration directly
        if self.spec.kind == BackendKind::Containerless {
            let cache = LdCache::host();
            self.analysis = AnalysisState::Cached {
                libc_version: cache.libc_version().unwrap_or_default(),
                cache,
            };
            return Ok(&self.analysis);
        }

        let argv = self.prepare(
            &["cat".to_string(), "/etc/ld.so.cache".to_string()],
            false,
            config,
        )?;
        let output = runner
            .run_output(&argv[0], &argv[1..], &CommandOptions::default())
            .map_err(|err| Error::Internal(err.to_string()))?;

        if !output.status.success() {
            return Err(Error::AnalysisFailure(output.status.code().unwrap_or(-1)));
        }

        let cache = LdCache::from_bytes(&output.stdout);
        let libc_version = match cache.libc_version() {
            Some(version) => version,
            None => {
                // Older caches carry no generator; ask ldconfig instead
                let argv = self.prepare(
                    &["ldconfig".to_string(), "--version".to_string()],
                    false,
                    config,
                )?;
                let output = runner
                    .run_output(&argv[0], &argv[1..], &CommandOptions::default())
                    .map_err(|err| Error::Internal(err.to_string()))?;

                String::from_utf8_lossy(&output.stdout)
                    .lines()
                    .next()
                    .and_then(|line| line.split_whitespace().last())
                    .unwrap_or_default()
                    .to_string()
            }
        };

        tracing::debug!("Detected container glibc version: {libc_version}");
        self.analysis = AnalysisState::Cached {
            libc_version,
            cache,
        };
        Ok(&self.analysis)
    }

    // ---- helpers shared by the backend modules ----

    fn image_ref(&self) -> Result<&str> {
        self.image
            .as_deref()
            .ok_or_else(|| Error::Usage("no container image configured".into()))
    }

    fn preload_string(&self) -> String {
        self.ld_preload.join(":")
    }

    fn library_path_string(&self) -> String {
        self.ld_library_path.join(":")
    }

    fn staging_dir(&mut self) -> Result<&Path> {
        if self.staging.is_none() {
            self.staging = Some(tempfile::tempdir()?);
        }
        Ok(self.staging.as_ref().unwrap().path())
    }

    /// Whether the host linker cache advertises nvidia libraries.
    fn has_nvidia(&self) -> bool {
        LdCache::host()
            .sonames()
            .any(|soname| soname.contains("nvidia"))
    }
}
