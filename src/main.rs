//! e4s-cl - Container launcher for MPI applications.

use clap::Parser;
use e4s_cl::cli::{Cli, Commands};
use e4s_cl::commands;
use e4s_cl::config::Config;
use e4s_cl::error::{EXIT_WARNING, Error};
use e4s_cl::output::Output;
use e4s_cl::variables::ExecutionEnv;
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: bool, quiet: bool) {
    let default_level = if verbose {
        "debug"
    } else if quiet {
        "error"
    } else {
        "info"
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let config = Config::load_default();
    if cli.print_config {
        match serde_yaml::to_string(&serde_json::json!({
            "launcher_options": config.launcher_options,
            "profile_list_columns": config.profile_list_columns,
            "backends": config.backends.keys().collect::<Vec<_>>(),
        })) {
            Ok(rendered) => print!("{rendered}"),
            Err(err) => eprintln!("Failed to render configuration: {err}"),
        }
        std::process::exit(0);
    }

    let env = ExecutionEnv::resolve(cli.dry_run);

    // A keyboard interrupt reaches the children through the process
    // group; the parent reports the non-optimal exit
    let _ = ctrlc::set_handler(move || {
        eprintln!("Interrupted");
        std::process::exit(EXIT_WARNING);
    });

    let outcome = match cli.command {
        Commands::Launch(args) => commands::launch::run(args, &env, &config),
        Commands::Execute(args) => commands::execute::run(args, &env, &config),
        Commands::Init(args) => commands::init::run(args, &env, &config),
        Commands::Profile(args) => commands::profile::run(args, &env, &config),
        Commands::Completions(args) => commands::completions::run(args),
    };

    match outcome {
        Ok(code) => std::process::exit(code),
        Err(error) => {
            match &error {
                Error::Usage(message) => Output::error(format!("usage error: {message}")),
                other if other.is_critical() => {
                    tracing::error!("{other}");
                    Output::error(other.to_string());
                }
                other => Output::error(other.to_string()),
            }
            std::process::exit(error.exit_code());
        }
    }
}
