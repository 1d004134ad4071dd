//! `profile edit` subcommand.
//!
//! Scalar options overwrite the corresponding field; the add/remove
//! options adjust the file and library lists. The name can be omitted to
//! edit the selected profile, or carry a wildcard to edit several
//! profiles at once.

use clap::Args;
use std::path::PathBuf;
use tracing::warn;

use super::{named_or_selected, open_storage};
use crate::error::Result;
use crate::output::Output;
use crate::profile::{Profile, ProfileController, Selector};
use crate::storage::Eid;
use crate::util;

#[derive(Debug, Args)]
pub struct EditArgs {
    /// Profile to edit; the selected profile when omitted. Accepts
    /// wildcards.
    pub name: Option<String>,

    /// Change the profile's name
    #[arg(long)]
    pub new_name: Option<String>,

    /// Change the profile's container technology
    #[arg(long)]
    pub backend: Option<String>,

    /// Change the profile's image
    #[arg(long)]
    pub image: Option<String>,

    /// Change the profile's setup script
    #[arg(long)]
    pub source: Option<PathBuf>,

    /// Add files to the profile
    #[arg(long, num_args = 1..)]
    pub add_files: Vec<String>,

    /// Remove files from the profile
    #[arg(long, num_args = 1..)]
    pub remove_files: Vec<String>,

    /// Add libraries to the profile
    #[arg(long, num_args = 1..)]
    pub add_libraries: Vec<String>,

    /// Remove libraries from the profile
    #[arg(long, num_args = 1..)]
    pub remove_libraries: Vec<String>,

    /// Root of the translation shim installation to use
    #[arg(long)]
    pub wi4mpi: Option<PathBuf>,

    /// Options to use with the translation shim
    #[arg(long)]
    pub wi4mpi_options: Option<String>,
}

fn apply_lists(args: &EditArgs, profile: &mut Profile) {
    let adjust = |list: &mut Vec<String>, add: &[String], remove: &[String], kind: &str| {
        for entry in add {
            let path = util::normalize_str(entry);
            if list.contains(&path) {
                warn!("File {path} already in profile's {kind}");
            } else {
                list.push(path);
            }
        }
        for entry in remove {
            let path = util::normalize_str(entry);
            if list.contains(&path) {
                list.retain(|existing| *existing != path);
            } else {
                warn!("File {path} not in profile's {kind}");
            }
        }
    };

    adjust(
        &mut profile.files,
        &args.add_files,
        &args.remove_files,
        "files",
    );
    adjust(
        &mut profile.libraries,
        &args.add_libraries,
        &args.remove_libraries,
        "libraries",
    );
}

fn edit_one(
    controller: &mut ProfileController<'_>,
    eid: Eid,
    mut profile: Profile,
    args: &EditArgs,
) -> Result<()> {
    if let Some(new_name) = &args.new_name {
        profile.name = new_name.clone();
    }
    if let Some(backend) = &args.backend {
        profile.backend = Some(backend.clone());
    }
    if let Some(image) = &args.image {
        profile.image = Some(image.clone());
    }
    if let Some(source) = &args.source {
        profile.source = Some(source.display().to_string());
    }
    if let Some(shim) = &args.wi4mpi {
        profile.wi4mpi = Some(shim.display().to_string());
    }
    if let Some(options) = &args.wi4mpi_options {
        profile.wi4mpi_options = Some(options.clone());
    }

    apply_lists(args, &mut profile);

    let name = profile.name.clone();
    controller.update(eid, profile)?;
    Output::success(format!("Updated profile '{name}'"));
    Ok(())
}

pub fn run(args: EditArgs) -> Result<i32> {
    let mut storage = open_storage()?;
    let mut controller = ProfileController::new(&mut storage);

    let targets: Vec<(Eid, Profile)> = match &args.name {
        Some(pattern) => {
            let matches = controller.resolve(&Selector::Pattern(pattern))?;
            if matches.is_empty() {
                return Err(crate::error::Error::ProfileNotFound(pattern.clone()));
            }
            matches
        }
        None => vec![named_or_selected(&controller, None)?],
    };

    for (eid, profile) in targets {
        edit_one(&mut controller, eid, profile, &args)?;
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> EditArgs {
        EditArgs {
            name: None,
            new_name: None,
            backend: None,
            image: None,
            source: None,
            add_files: Vec::new(),
            remove_files: Vec::new(),
            add_libraries: Vec::new(),
            remove_libraries: Vec::new(),
            wi4mpi: None,
            wi4mpi_options: None,
        }
    }

    #[test]
    fn test_add_files_is_idempotent() {
        let mut profile = Profile::named("test");

        let mut edit = args();
        edit.add_files = vec!["/tmp/x".into()];

        apply_lists(&edit, &mut profile);
        assert_eq!(profile.files, vec!["/tmp/x".to_string()]);

        // Applying the same addition again leaves the record unchanged
        apply_lists(&edit, &mut profile);
        assert_eq!(profile.files, vec!["/tmp/x".to_string()]);
    }

    #[test]
    fn test_remove_missing_file_warns_only() {
        let mut profile = Profile::named("test");
        profile.files = vec!["/data".into()];

        let mut edit = args();
        edit.remove_files = vec!["/absent".into()];
        apply_lists(&edit, &mut profile);
        assert_eq!(profile.files, vec!["/data".to_string()]);
    }
}
