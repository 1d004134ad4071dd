//! `profile select` and `profile unselect` subcommands.

use clap::Args;

use super::open_storage;
use crate::error::{Error, Result};
use crate::output::Output;
use crate::profile::ProfileController;

#[derive(Debug, Args)]
pub struct SelectArgs {
    /// Profile to select
    pub name: String,
}

pub fn run(args: SelectArgs) -> Result<i32> {
    let mut storage = open_storage()?;
    let mut controller = ProfileController::new(&mut storage);

    let (eid, _) = controller
        .one(&args.name)?
        .ok_or_else(|| Error::ProfileNotFound(args.name.clone()))?;
    controller.select(eid)?;

    Output::success(format!("Selected profile '{}'", args.name));
    Ok(0)
}

pub fn unselect() -> Result<i32> {
    let mut storage = open_storage()?;
    let mut controller = ProfileController::new(&mut storage);
    controller.unselect()?;

    Output::success("Cleared profile selection");
    Ok(0)
}
