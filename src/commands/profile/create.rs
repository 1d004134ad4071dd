//! `profile create` subcommand.

use clap::Args;
use std::path::PathBuf;

use super::open_storage;
use crate::error::Result;
use crate::output::Output;
use crate::profile::{Profile, ProfileController};

#[derive(Debug, Args)]
pub struct CreateArgs {
    /// Name of the new profile
    pub name: String,

    /// Container backend technology
    #[arg(long)]
    pub backend: Option<String>,

    /// Image identifier
    #[arg(long)]
    pub image: Option<String>,

    /// Comma-separated list of files to bind
    #[arg(long, value_delimiter = ',')]
    pub files: Vec<String>,

    /// Comma-separated list of libraries to bind
    #[arg(long, value_delimiter = ',')]
    pub libraries: Vec<String>,

    /// Script to source before execution
    #[arg(long)]
    pub source: Option<PathBuf>,

    /// Root of the translation shim installation to use
    #[arg(long)]
    pub wi4mpi: Option<PathBuf>,

    /// Options to use with the translation shim
    #[arg(long)]
    pub wi4mpi_options: Option<String>,
}

pub fn run(args: CreateArgs) -> Result<i32> {
    let mut storage = open_storage()?;
    let mut controller = ProfileController::new(&mut storage);

    let profile = Profile {
        name: args.name.clone(),
        backend: args.backend,
        image: args.image,
        files: args.files,
        libraries: args.libraries,
        source: args.source.map(|path| path.display().to_string()),
        wi4mpi: args.wi4mpi.map(|path| path.display().to_string()),
        wi4mpi_options: args.wi4mpi_options,
    };

    controller.create(profile)?;
    Output::success(format!("Created profile '{}'", args.name));
    Ok(0)
}
