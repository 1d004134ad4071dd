//! `profile show` subcommand.

use clap::Args;

use super::{named_or_selected, open_storage};
use crate::error::Result;
use crate::output::Output;
use crate::profile::ProfileController;

#[derive(Debug, Args)]
pub struct ShowArgs {
    /// Profile to show; the selected profile when omitted
    pub name: Option<String>,
}

pub fn run(args: ShowArgs) -> Result<i32> {
    let mut storage = open_storage()?;
    let controller = ProfileController::new(&mut storage);
    let (_, profile) = named_or_selected(&controller, args.name.as_deref())?;

    Output::kv("Name", &profile.name);
    Output::kv("Backend", profile.backend.as_deref().unwrap_or("None"));
    Output::kv("Image", profile.image.as_deref().unwrap_or("None"));
    Output::kv("Source", profile.source.as_deref().unwrap_or("None"));
    Output::kv("WI4MPI", profile.wi4mpi.as_deref().unwrap_or("None"));
    Output::kv(
        "WI4MPI opts",
        profile.wi4mpi_options.as_deref().unwrap_or("None"),
    );

    println!();
    Output::kv("Libraries", profile.libraries.len().to_string());
    for library in &profile.libraries {
        Output::list_item(library);
    }

    println!();
    Output::kv("Files", profile.files.len().to_string());
    for file in &profile.files {
        Output::list_item(file);
    }

    Ok(0)
}
