//! `profile list` subcommand.

use clap::Args;

use super::open_storage;
use crate::config::Config;
use crate::error::Result;
use crate::output::Output;
use crate::profile::{Profile, ProfileController};

/// Columns shown when the configuration does not say otherwise.
const DEFAULT_COLUMNS: &[&str] = &["selected", "name", "backend", "image", "libraries", "files"];

#[derive(Debug, Args)]
pub struct ListArgs {
    /// Only list names, one per line
    #[arg(short = 's', long)]
    pub short: bool,
}

fn cell(column: &str, profile: &Profile, selected: bool) -> String {
    match column {
        "selected" => if selected { "*" } else { "" }.to_string(),
        "name" => profile.name.clone(),
        "backend" => profile.backend.clone().unwrap_or_default(),
        "image" => profile.image.clone().unwrap_or_default(),
        "libraries" => profile.libraries.len().to_string(),
        "files" => profile.files.len().to_string(),
        "source" => profile.source.clone().unwrap_or_default(),
        "wi4mpi" => profile.wi4mpi.clone().unwrap_or_default(),
        _ => String::new(),
    }
}

pub fn run(args: ListArgs, config: &Config) -> Result<i32> {
    let mut storage = open_storage()?;
    let controller = ProfileController::new(&mut storage);

    let profiles = controller.all()?;
    let selected_eid = controller.storage().selected_eid();

    if args.short {
        for (_, profile) in &profiles {
            println!("{}", profile.name);
        }
        return Ok(0);
    }

    if profiles.is_empty() {
        Output::info("No profiles. Create one with `e4s-cl profile create` or `e4s-cl init`.");
        return Ok(0);
    }

    let columns: Vec<String> = if config.profile_list_columns.is_empty() {
        DEFAULT_COLUMNS.iter().map(|s| s.to_string()).collect()
    } else {
        config.profile_list_columns.clone()
    };

    Output::header(format!(
        "Profile Configurations ({})",
        controller.storage().path().display()
    ));

    let mut rows: Vec<Vec<String>> = vec![columns.clone()];
    for (eid, profile) in &profiles {
        rows.push(
            columns
                .iter()
                .map(|column| cell(column, profile, selected_eid == Some(*eid)))
                .collect(),
        );
    }

    let widths: Vec<usize> = (0..columns.len())
        .map(|index| rows.iter().map(|row| row[index].len()).max().unwrap_or(0))
        .collect();

    for (row_index, row) in rows.iter().enumerate() {
        let line = row
            .iter()
            .zip(widths.iter().copied())
            .map(|(value, width)| format!("{value:<width$}"))
            .collect::<Vec<_>>()
            .join("  ");
        println!("{}", line.trim_end());

        if row_index == 0 {
            println!("{}", "-".repeat(widths.iter().sum::<usize>() + 2 * (widths.len() - 1)));
        }
    }

    Ok(0)
}
