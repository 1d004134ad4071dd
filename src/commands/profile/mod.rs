//! Profile management commands.

pub mod copy;
pub mod create;
pub mod delete;
pub mod detect;
pub mod diff;
pub mod dump;
pub mod edit;
pub mod list;
pub mod select;
pub mod show;

use clap::{Args, Subcommand};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::profile::{Profile, ProfileController};
use crate::storage::{Eid, Storage, StorageScope};
use crate::variables::ExecutionEnv;

#[derive(Debug, Args)]
pub struct ProfileArgs {
    #[command(subcommand)]
    pub action: ProfileAction,
}

#[derive(Debug, Subcommand)]
pub enum ProfileAction {
    /// Create a new profile
    Create(create::CreateArgs),

    /// Delete profiles by name or wildcard
    Delete(delete::DeleteArgs),

    /// Modify an existing profile
    Edit(edit::EditArgs),

    /// List profiles
    #[command(alias = "ls")]
    List(list::ListArgs),

    /// Show a profile's full contents
    Show(show::ShowArgs),

    /// Compare two profiles field by field
    Diff(diff::DiffArgs),

    /// Print profiles as a JSON array
    Dump(dump::DumpArgs),

    /// Mark a profile as selected
    Select(select::SelectArgs),

    /// Clear the profile selection
    Unselect,

    /// Duplicate a profile under a new name
    Copy(copy::CopyArgs),

    /// Build a profile by tracing a command's execution
    Detect(detect::DetectArgs),
}

pub fn run(args: ProfileArgs, env: &ExecutionEnv, config: &Config) -> Result<i32> {
    match args.action {
        ProfileAction::Create(args) => create::run(args),
        ProfileAction::Delete(args) => delete::run(args),
        ProfileAction::Edit(args) => edit::run(args),
        ProfileAction::List(args) => list::run(args, config),
        ProfileAction::Show(args) => show::run(args),
        ProfileAction::Diff(args) => diff::run(args),
        ProfileAction::Dump(args) => dump::run(args),
        ProfileAction::Select(args) => select::run(args),
        ProfileAction::Unselect => select::unselect(),
        ProfileAction::Copy(args) => copy::run(args),
        ProfileAction::Detect(args) => detect::run(args, env, config),
    }
}

/// Open the user scope for profile commands.
pub(crate) fn open_storage() -> Result<Storage> {
    Storage::open(StorageScope::User)
}

/// Fetch a profile by name, or the selected one when no name is given.
pub(crate) fn named_or_selected(
    controller: &ProfileController<'_>,
    name: Option<&str>,
) -> Result<(Eid, Profile)> {
    match name {
        Some(name) => controller
            .one(name)?
            .ok_or_else(|| Error::ProfileNotFound(name.to_string())),
        None => controller.selected()?.ok_or(Error::NoProfileSelected),
    }
}
