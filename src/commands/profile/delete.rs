//! `profile delete` subcommand.
//!
//! The name accepts `#`/`*` wildcards, so several profiles can go at
//! once; every other character is matched literally.

use clap::Args;

use super::open_storage;
use crate::error::{Error, Result};
use crate::output::Output;
use crate::profile::{ProfileController, Selector};

#[derive(Debug, Args)]
pub struct DeleteArgs {
    /// Profile name or wildcard pattern
    pub name: String,
}

pub fn run(args: DeleteArgs) -> Result<i32> {
    let mut storage = open_storage()?;
    let mut controller = ProfileController::new(&mut storage);

    let matches = controller.resolve(&Selector::Pattern(&args.name))?;
    if matches.is_empty() {
        return Err(Error::ProfileNotFound(args.name));
    }

    for (eid, profile) in matches {
        controller.delete(eid)?;
        Output::success(format!("Deleted profile '{}'", profile.name));
    }
    Ok(0)
}
