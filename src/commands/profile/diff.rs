//! `profile diff` subcommand.

use clap::Args;
use std::collections::BTreeSet;

use super::{named_or_selected, open_storage};
use crate::error::Result;
use crate::profile::{Profile, ProfileController};

#[derive(Debug, Args)]
pub struct DiffArgs {
    /// Left-hand profile
    pub left: String,

    /// Right-hand profile; the selected profile when omitted
    pub right: Option<String>,
}

fn diff_scalar(field: &str, left: Option<&str>, right: Option<&str>) {
    if left != right {
        println!(
            "- {field}: {}\n+ {field}: {}",
            left.unwrap_or("None"),
            right.unwrap_or("None")
        );
    }
}

fn diff_list(field: &str, left: &[String], right: &[String]) {
    let left: BTreeSet<&String> = left.iter().collect();
    let right: BTreeSet<&String> = right.iter().collect();

    for entry in left.difference(&right) {
        println!("- {field}: {entry}");
    }
    for entry in right.difference(&left) {
        println!("+ {field}: {entry}");
    }
}

fn print_diff(left: &Profile, right: &Profile) {
    diff_scalar("name", Some(&left.name), Some(&right.name));
    diff_scalar("backend", left.backend.as_deref(), right.backend.as_deref());
    diff_scalar("image", left.image.as_deref(), right.image.as_deref());
    diff_scalar("source", left.source.as_deref(), right.source.as_deref());
    diff_scalar("wi4mpi", left.wi4mpi.as_deref(), right.wi4mpi.as_deref());
    diff_scalar(
        "wi4mpi_options",
        left.wi4mpi_options.as_deref(),
        right.wi4mpi_options.as_deref(),
    );
    diff_list("files", &left.files, &right.files);
    diff_list("libraries", &left.libraries, &right.libraries);
}

pub fn run(args: DiffArgs) -> Result<i32> {
    let mut storage = open_storage()?;
    let controller = ProfileController::new(&mut storage);

    let (_, left) = named_or_selected(&controller, Some(&args.left))?;
    let (_, right) = named_or_selected(&controller, args.right.as_deref())?;

    print_diff(&left, &right);
    Ok(0)
}
