//! `profile copy` subcommand.

use clap::Args;

use super::{named_or_selected, open_storage};
use crate::error::Result;
use crate::output::Output;
use crate::profile::ProfileController;

#[derive(Debug, Args)]
pub struct CopyArgs {
    /// Profile to duplicate
    pub source: String,

    /// Name of the copy
    pub destination: String,
}

pub fn run(args: CopyArgs) -> Result<i32> {
    let mut storage = open_storage()?;
    let mut controller = ProfileController::new(&mut storage);

    let (_, mut profile) = named_or_selected(&controller, Some(&args.source))?;
    profile.name = args.destination.clone();
    controller.create(profile)?;

    Output::success(format!(
        "Copied profile '{}' to '{}'",
        args.source, args.destination
    ));
    Ok(0)
}
