//! Shifter support.
//!
//! Shifter only accepts directory volumes and forbids several system
//! destinations. Binds targeting the in-container import directory are
//! staged: copied into a temporary directory mounted once over the import
//! root.

use std::path::{Path, PathBuf};
use tracing::warn;

use super::{CONTAINER_DIR, Container};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::util;

/// Copy staged binds under `staging` and collect the volume list.
fn setup_import(container: &Container, staging: &Path) -> Result<Vec<String>> {
    let mut volumes = vec![(staging.to_path_buf(), PathBuf::from(CONTAINER_DIR))];

    for bind in container.binds.bound() {
        if bind.destination.starts_with("/etc") {
            return Err(Error::Usage(format!(
                "shifter does not support binding to '/etc' (requested for {})",
                bind.origin.display()
            )));
        }

        if util::path_contains(Path::new("/var"), &bind.destination) {
            warn!(
                "Omitting bind of {} to {}: forbidden bind path",
                bind.origin.display(),
                bind.destination.display()
            );
            continue;
        }

        if bind.destination.starts_with(CONTAINER_DIR) {
            let rebased = bind
                .destination
                .strip_prefix(CONTAINER_DIR)
                .expect("destination verified above");
            let temporary = staging.join(rebased);

            if let Some(parent) = temporary.parent() {
                std::fs::create_dir_all(parent)?;
            }
            copy_recursive(&bind.origin, &temporary)?;
        } else if bind.origin.is_dir() {
            volumes.push((bind.origin.clone(), bind.destination.clone()));
        } else {
            warn!(
                "Failed to bind '{}': backend does not support file binding. \
                 Performance may be impacted.",
                bind.origin.display()
            );
        }
    }

    Ok(volumes
        .into_iter()
        .map(|(source, destination)| {
            format!("--volume={}:{}", source.display(), destination.display())
        })
        .collect())
}

fn copy_recursive(source: &Path, destination: &Path) -> Result<()> {
    if source.is_dir() {
        std::fs::create_dir_all(destination)?;
        for entry in std::fs::read_dir(source)? {
            let entry = entry?;
            copy_recursive(&entry.path(), &destination.join(entry.file_name()))?;
        }
    } else {
        std::fs::copy(source, destination)?;
    }
    Ok(())
}

pub(super) fn prepare(
    container: &mut Container,
    command: &[String],
    overload: bool,
    config: &Config,
) -> Result<Vec<String>> {
    let executable = container.executable(config)?.display().to_string();
    let image = container.image_ref()?.to_string();

    if !overload {
        let mut argv = vec![executable, format!("--image={image}")];
        argv.extend_from_slice(command);
        return Ok(argv);
    }

    let mut argv = vec![executable, format!("--image={image}")];

    let preload = container.preload_string();
    if !preload.is_empty() {
        argv.push(format!("--env=LD_PRELOAD={preload}"));
    }
    let library_path = container.library_path_string();
    if !library_path.is_empty() {
        argv.push(format!("--env=LD_LIBRARY_PATH={library_path}"));
    }
    for (key, value) in container.spawn_env() {
        argv.push(format!("--env={key}={value}"));
    }

    let staging = container.staging_dir()?.to_path_buf();
    argv.extend(setup_import(container, &staging)?);
    argv.extend(config.backend_options(container.backend_name(), None));
    argv.extend_from_slice(command);
    Ok(argv)
}
