//! First-run initialization.
//!
//! Creates a starting profile for this system: a temporary record that
//! detection fills in, renamed after the MPI vendor and version when one
//! can be identified from the given installation.

use clap::Args;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::backends;
use crate::config::Config;
use crate::error::Result;
use crate::mpi;
use crate::output::Output;
use crate::profile::{INIT_TEMP_PROFILE_NAME, Profile, ProfileController};
use crate::storage::{Storage, StorageScope};
use crate::variables::ExecutionEnv;

#[derive(Debug, Args)]
pub struct InitArgs {
    /// Container backend recorded in the new profile
    #[arg(long)]
    pub backend: Option<String>,

    /// Container image recorded in the new profile
    #[arg(long)]
    pub image: Option<String>,

    /// Script to source before in-container execution
    #[arg(long)]
    pub source: Option<PathBuf>,

    /// MPI installation to build the profile from
    #[arg(long)]
    pub mpi: Option<PathBuf>,

    /// Name for the created profile, instead of the detected one
    #[arg(long)]
    pub profile: Option<String>,
}

/// Shared objects under an installation's library directories.
fn installed_libraries(prefix: &Path) -> Vec<PathBuf> {
    let mut libraries = Vec::new();

    for lib_dir in ["lib", "lib64"] {
        let directory = prefix.join(lib_dir);
        let Ok(entries) = std::fs::read_dir(&directory) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path
                .file_name()
                .is_some_and(|name| name.to_string_lossy().contains(".so"))
            {
                libraries.push(path);
            }
        }
    }

    libraries.sort();
    libraries
}

pub fn run(args: InitArgs, _env: &ExecutionEnv, _config: &Config) -> Result<i32> {
    let mut storage = Storage::open(StorageScope::User)?;
    let mut controller = ProfileController::new(&mut storage);

    let mut profile = Profile::named(
        args.profile
            .clone()
            .unwrap_or_else(|| INIT_TEMP_PROFILE_NAME.to_string()),
    );
    profile.backend = args.backend.clone();
    profile.image = args.image.clone();
    profile.source = args.source.as_ref().map(|path| path.display().to_string());

    // Guess the backend from the image suffix when it was not given
    if profile.backend.is_none() {
        if let Some(image) = &args.image {
            profile.backend = backends::guess_backend(Path::new(image)).map(str::to_string);
        }
    }

    if let Some(prefix) = &args.mpi {
        let libraries = installed_libraries(prefix);
        let mpi_libraries = mpi::filter_mpi_libs(&libraries);
        profile.libraries = libraries
            .iter()
            .map(|path| path.display().to_string())
            .collect();

        if args.profile.is_none() {
            if let Some(identifier) = mpi::detect_mpi(&mpi_libraries) {
                debug!("Found identifier {identifier} from the given installation");
                profile.name = mpi::suffix_name(&identifier.to_string(), &controller.names()?);
            }
        }
    }

    // Re-initializing replaces the previous record of the same name
    if let Some((eid, _)) = controller.one(&profile.name)? {
        controller.delete(eid)?;
    }

    let name = profile.name.clone();
    let eid = controller.create(profile)?;
    controller.select(eid)?;

    info!("Created and selected profile {name}");
    Output::success(format!("Initialized profile '{name}'"));
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn scoped_storage<T>(test: impl FnOnce() -> T) -> T {
        let dir = tempfile::tempdir().unwrap();
        unsafe { std::env::set_var("E4S_CL_USER_PREFIX", dir.path()) };
        let outcome = test();
        unsafe { std::env::remove_var("E4S_CL_USER_PREFIX") };
        outcome
    }

    #[test]
    #[serial]
    fn test_init_creates_and_selects_temp_profile() {
        scoped_storage(|| {
            let args = InitArgs {
                backend: Some("containerless".into()),
                image: None,
                source: None,
                mpi: None,
                profile: None,
            };
            run(args, &ExecutionEnv::default(), &Config::default()).unwrap();

            let mut storage = Storage::open(StorageScope::User).unwrap();
            let controller = ProfileController::new(&mut storage);
            let (_, selected) = controller.selected().unwrap().unwrap();
            assert_eq!(selected.name, INIT_TEMP_PROFILE_NAME);
            assert_eq!(selected.backend.as_deref(), Some("containerless"));
        })
    }

    #[test]
    #[serial]
    fn test_init_twice_overwrites() {
        scoped_storage(|| {
            for _ in 0..2 {
                let args = InitArgs {
                    backend: None,
                    image: Some("/images/app.sif".into()),
                    source: None,
                    mpi: None,
                    profile: None,
                };
                run(args, &ExecutionEnv::default(), &Config::default()).unwrap();
            }

            let mut storage = Storage::open(StorageScope::User).unwrap();
            let controller = ProfileController::new(&mut storage);
            assert_eq!(controller.count(), 1);

            // The backend was guessed from the image suffix
            let (_, profile) = controller.one(INIT_TEMP_PROFILE_NAME).unwrap().unwrap();
            assert_eq!(profile.backend.as_deref(), Some("apptainer"));
        })
    }
}
