//! CLI argument definitions for e4s-cl.
//!
//! This module contains the clap-derived `Cli` and `Commands` types,
//! separated from `main.rs` so library code and shell completion
//! generation can reference them.

use clap::{Parser, Subcommand};

use crate::commands;

#[derive(Debug, Parser)]
#[command(name = "e4s-cl")]
#[command(about = "Container launcher for MPI applications")]
#[command(version)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable debug output
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    /// Only print errors
    #[arg(short = 'q', long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Show the command that would run without executing it
    #[arg(short = 'd', long, global = true)]
    pub dry_run: bool,

    /// Print the loaded configuration and exit
    #[arg(long, global = true)]
    pub print_config: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Launch a process in a container with a tailored environment
    Launch(commands::launch::LaunchArgs),

    /// Run one rank inside the container (internal)
    #[command(hide = true)]
    Execute(commands::execute::ExecuteArgs),

    /// Set up an initial profile for this system
    Init(commands::init::InitArgs),

    /// Manage launch profiles
    Profile(commands::profile::ProfileArgs),

    /// Generate shell completions
    Completions(commands::completions::CompletionsArgs),
}
