//! `profile dump` subcommand.
//!
//! Prints profiles as a JSON array of full records, suitable for
//! re-import; unset scalars appear as `null`.

use clap::Args;

use super::open_storage;
use crate::error::{Error, Result};
use crate::profile::{ProfileController, Selector};

#[derive(Debug, Args)]
pub struct DumpArgs {
    /// Restrict the dump to profiles matching this name or wildcard
    pub name: Option<String>,
}

pub fn run(args: DumpArgs) -> Result<i32> {
    let mut storage = open_storage()?;
    let controller = ProfileController::new(&mut storage);

    let profiles = match &args.name {
        Some(pattern) => {
            let matches = controller.resolve(&Selector::Pattern(pattern))?;
            if matches.is_empty() {
                return Err(Error::ProfileNotFound(pattern.clone()));
            }
            matches
        }
        None => controller.all()?,
    };

    println!("{}", controller.dump(&profiles)?);
    Ok(0)
}
