//! The execute-child.
//!
//! Runs one rank inside the container: binds the requested libraries
//! under the driver's import directory and the files at their original
//! paths, wires the translation shim environment when present, optionally
//! sources a script, then execs the user program.

use clap::Args;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::backends::Container;
use crate::binds::BindMode;
use crate::command_runner::RealCommandRunner;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::variables::ExecutionEnv;
use crate::wi4mpi;

#[derive(Debug, Args)]
pub struct ExecuteArgs {
    /// Container backend to run the program with
    #[arg(long)]
    pub backend: String,

    /// Image identifier for the backend
    #[arg(long)]
    pub image: String,

    /// Script to source before running the program
    #[arg(long)]
    pub source: Option<PathBuf>,

    /// Root of the translation shim installation to import
    #[arg(long)]
    pub wi4mpi: Option<PathBuf>,

    /// Comma-separated list of libraries to import
    #[arg(long, value_delimiter = ',')]
    pub libraries: Vec<PathBuf>,

    /// Comma-separated list of files to make available
    #[arg(long, value_delimiter = ',')]
    pub files: Vec<PathBuf>,

    /// The program to run and its arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    pub cmd: Vec<String>,
}

/// Make a shim installation usable inside the container: the install
/// tree itself plus every configured family root.
fn import_shim(container: &mut Container, install_dir: &Path) {
    container.bind_file(install_dir, None, BindMode::ReadOnly);

    for (key, value) in wi4mpi::shim_config(install_dir) {
        if key.contains("ROOT") && !value.is_empty() {
            let root = PathBuf::from(&value);
            container.bind_file(&root, None, BindMode::ReadOnly);
            container.add_library_path(&root.join("lib"));
        }
    }

    // Forward the shim configuration exported by the parent
    for key in wi4mpi::SHIM_ENVIRONMENT {
        if let Ok(value) = std::env::var(key) {
            container.bind_env(key, &value);
        }
    }
}

pub fn run(args: ExecuteArgs, env: &ExecutionEnv, config: &Config) -> Result<i32> {
    let mut container = Container::new(&args.backend, Some(args.image.clone()))?;

    let import_dir = container.import_library_dir();
    for library in &args.libraries {
        let Some(name) = library.file_name() else {
            continue;
        };
        container.bind_file(library, Some(&import_dir.join(name)), BindMode::ReadOnly);
    }
    container.add_library_path(&import_dir);

    for file in &args.files {
        container.bind_file(file, None, BindMode::ReadOnly);
    }

    let shim_root = args.wi4mpi.clone().or_else(wi4mpi::shim_root_from_env);
    if let Some(install_dir) = &shim_root {
        import_shim(&mut container, install_dir);
    }

    let mut command = args.cmd.clone();
    if let Some(source) = &args.source {
        let script = container.script_path();
        container.bind_file(source, Some(&script), BindMode::ReadOnly);

        let joined = shlex::try_join(command.iter().map(String::as_str))
            .map_err(|err| Error::Internal(err.to_string()))?;
        command = vec![
            "bash".to_string(),
            "-c".to_string(),
            format!(". {} && {joined}", script.display()),
        ];
    }

    if env.dry_run {
        let argv = container.prepare(&command, true, config)?;
        println!("{}", argv.join(" "));
        return Ok(0);
    }

    debug!("Executing one rank with backend {}", container.backend_name());
    let code = container.run(&command, true, config, &RealCommandRunner)?;
    Ok(code)
}
