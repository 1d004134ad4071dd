//! Containerless execution.
//!
//! No container at all: libraries requested through the import directory
//! are exposed as a symlink tree in a temporary directory, which is
//! prepended to `LD_LIBRARY_PATH` before running the command on the host.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{CONTAINER_SCRIPT, Container};
use crate::config::Config;
use crate::error::Result;
use crate::wi4mpi;

/// Populate the staging directory with symlinks to the bound libraries
/// and return its path.
fn setup_import(container: &mut Container, staging: &Path) -> Result<PathBuf> {
    let import_dir = container.import_library_dir();
    let script_name = Path::new(CONTAINER_SCRIPT)
        .file_name()
        .expect("constant script path has a file name");

    for bind in container.binds.bound().cloned().collect::<Vec<_>>() {
        let origin = bind.origin.canonicalize().unwrap_or(bind.origin.clone());
        if !origin.is_file() {
            continue;
        }

        if bind.destination.file_name() == Some(script_name) {
            // The source script is copied, not linked, so it can be
            // made executable in place
            let target = staging.join(script_name);
            std::fs::copy(&origin, &target)?;
            std::fs::set_permissions(&target, std::fs::Permissions::from_mode(0o755))?;
            continue;
        }

        let Ok(relative) = bind.destination.strip_prefix(&import_dir) else {
            debug!(
                "{} is not under {}",
                bind.destination.display(),
                import_dir.display()
            );
            continue;
        };

        let link = staging.join(relative);
        if let Some(parent) = link.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if !link.exists() {
            std::os::unix::fs::symlink(&origin, &link)?;
        }
    }

    Ok(staging.to_path_buf())
}

pub(super) fn prepare(
    container: &mut Container,
    command: &[String],
    overload: bool,
    _config: &Config,
) -> Result<Vec<String>> {
    if !overload {
        return Ok(command.to_vec());
    }

    let staging = container.staging_dir()?.to_path_buf();
    let library_dir = setup_import(container, &staging)?;

    // When the translation shim drives the run it preloads its own
    // libraries; otherwise preload everything that was staged
    if wi4mpi::shim_root_from_env().is_none() {
        let mut staged = Vec::new();
        collect_sofiles(&library_dir, &mut staged);
        for path in staged {
            container.add_preload(&path);
        }
        let preload = container.preload_string();
        if !preload.is_empty() {
            container.bind_env("LD_PRELOAD", &preload);
        }
    }

    let mut library_path = library_dir.display().to_string();
    if let Ok(existing) = std::env::var("LD_LIBRARY_PATH") {
        if !existing.is_empty() {
            library_path = format!("{library_path}:{existing}");
        }
    }
    container.bind_env("LD_LIBRARY_PATH", &library_path);

    Ok(command.to_vec())
}

/// Collect the shared objects staged under a directory.
fn collect_sofiles(directory: &Path, found: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(directory) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_sofiles(&path, found);
        } else if path
            .file_name()
            .is_some_and(|name| name.to_string_lossy().contains(".so"))
        {
            found.push(path);
        }
    }
    found.sort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binds::BindMode;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_prepare_stages_symlinks() {
        let data = tempfile::tempdir().unwrap();
        let library = data.path().join("libmpi.so.40");
        std::fs::write(&library, b"stub").unwrap();

        let mut container = Container::new("containerless", None).unwrap();
        let destination = container.import_library_dir().join("libmpi.so.40");
        container.bind_file(&library, Some(&destination), BindMode::ReadOnly);

        let argv = container
            .prepare(&["./a.out".to_string()], true, &Config::default())
            .unwrap();
        assert_eq!(argv, vec!["./a.out".to_string()]);

        let env = container.spawn_env();
        let library_path = env
            .iter()
            .find(|(key, _)| key == "LD_LIBRARY_PATH")
            .map(|(_, value)| value.clone())
            .unwrap();
        let staging = library_path.split(':').next().unwrap();
        let link = Path::new(staging).join("libmpi.so.40");
        assert!(link.symlink_metadata().unwrap().file_type().is_symlink());
        assert_eq!(std::fs::read_link(&link).unwrap(), library.canonicalize().unwrap());

        // Staged libraries are preloaded outside translation runs
        assert!(env.iter().any(|(key, value)| key == "LD_PRELOAD"
            && value.contains("libmpi.so.40")));
    }

    #[test]
    #[serial]
    fn test_foreign_destinations_ignored() {
        let data = tempfile::tempdir().unwrap();
        let file = data.path().join("input.dat");
        std::fs::write(&file, b"data").unwrap();

        let mut container = Container::new("containerless", None).unwrap();
        container.bind_file(&file, Some(Path::new("/somewhere/input.dat")), BindMode::ReadOnly);

        container
            .prepare(&["true".to_string()], true, &Config::default())
            .unwrap();

        let env = container.spawn_env();
        let library_path = env
            .iter()
            .find(|(key, _)| key == "LD_LIBRARY_PATH")
            .map(|(_, value)| value.clone())
            .unwrap();
        let staging = library_path.split(':').next().unwrap().to_string();
        assert!(!Path::new(&staging).join("input.dat").exists());
    }

    #[test]
    #[serial]
    fn test_clean_invocation_is_verbatim() {
        let mut container = Container::new("containerless", None).unwrap();
        let argv = container
            .prepare(&["hostname".to_string()], false, &Config::default())
            .unwrap();
        assert_eq!(argv, vec!["hostname".to_string()]);
        assert!(container.spawn_env().is_empty());
    }
}
