//! The launch pipeline.
//!
//! Merges the profile with CLI overrides, splits the command line into
//! launcher and program, decides whether MPI translation is needed, and
//! execs `launcher [launcher-args] [shim] e4s-cl execute [backend-args]
//! -- program [program-args]`. The launcher stays outside the container;
//! the execute-child runs one rank inside it.

use clap::Args;
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::command_runner::{CommandOptions, CommandRunner, RealCommandRunner};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::launchers::Registry;
use crate::mpi;
use crate::profile::{Profile, ProfileController};
use crate::storage::{Storage, StorageScope};
use crate::util;
use crate::variables::ExecutionEnv;
use crate::wi4mpi;

#[derive(Debug, Args)]
pub struct LaunchArgs {
    /// Profile to use; its fields are defaults that any other argument
    /// overrides
    #[arg(long)]
    pub profile: Option<String>,

    /// Path to the container image to run the program in
    #[arg(long)]
    pub image: Option<String>,

    /// Container backend used to launch the image
    #[arg(long)]
    pub backend: Option<String>,

    /// Path to a script to source before execution
    #[arg(long)]
    pub source: Option<PathBuf>,

    /// Comma-separated list of files to bind
    #[arg(long, value_delimiter = ',')]
    pub files: Vec<String>,

    /// Comma-separated list of libraries to bind
    #[arg(long, value_delimiter = ',')]
    pub libraries: Vec<String>,

    /// Root of a translation shim installation to use
    #[arg(long)]
    pub wi4mpi: Option<PathBuf>,

    /// MPI family the binary was compiled against; toggles MPI call
    /// translation when it differs from the profile's family
    #[arg(long = "from", value_parser = from_family)]
    pub from: Option<String>,

    /// Launcher and program, e.g. `mpirun -n 2 ./a.out`
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub cmd: Vec<String>,
}

fn from_family(value: &str) -> std::result::Result<String, String> {
    let lowered = value.to_lowercase();
    if wi4mpi::source_names().contains(&lowered.as_str()) {
        Ok(lowered)
    } else {
        Err(format!(
            "unknown MPI family '{value}'; available families: {}",
            wi4mpi::source_names().join(", ")
        ))
    }
}

/// Launch parameters after merging profile fields and CLI overrides.
#[derive(Debug, Clone, Default)]
pub struct Parameters {
    pub backend: Option<String>,
    pub image: Option<String>,
    pub source: Option<PathBuf>,
    pub files: Vec<PathBuf>,
    pub libraries: Vec<PathBuf>,
    pub wi4mpi: Option<PathBuf>,
    pub wi4mpi_options: Option<String>,
}

impl Parameters {
    /// Merge a profile with CLI arguments; CLI wins per field.
    pub fn merge(args: &LaunchArgs, profile: Option<&Profile>) -> Self {
        let field = |cli: Option<&String>, stored: Option<&String>| {
            cli.or(stored).cloned()
        };
        let path_field = |cli: Option<&PathBuf>, stored: Option<&String>| {
            cli.cloned().or_else(|| stored.map(PathBuf::from))
        };
        let list_field = |cli: &[String], stored: Option<&Vec<String>>| -> Vec<PathBuf> {
            let chosen: Vec<String> = if !cli.is_empty() {
                cli.to_vec()
            } else {
                stored.cloned().unwrap_or_default()
            };
            chosen.iter().map(|entry| PathBuf::from(entry)).collect()
        };

        Self {
            backend: field(args.backend.as_ref(), profile.and_then(|p| p.backend.as_ref())),
            image: field(args.image.as_ref(), profile.and_then(|p| p.image.as_ref())),
            source: path_field(args.source.as_ref(), profile.and_then(|p| p.source.as_ref())),
            files: list_field(&args.files, profile.map(|p| &p.files)),
            libraries: list_field(&args.libraries, profile.map(|p| &p.libraries)),
            wi4mpi: path_field(args.wi4mpi.as_ref(), profile.and_then(|p| p.wi4mpi.as_ref())),
            wi4mpi_options: profile.and_then(|p| p.wi4mpi_options.clone()),
        }
    }

    /// Argv of the execute-child, minus launcher and program.
    pub fn format_execute(&self, verbose: bool) -> Vec<String> {
        let this = std::env::current_exe()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|_| "e4s-cl".to_string());

        let mut argv = vec![this];
        if verbose {
            argv.push("-v".to_string());
        }
        argv.push("execute".to_string());

        if let Some(backend) = &self.backend {
            argv.extend(["--backend".to_string(), backend.clone()]);
        }
        if let Some(image) = &self.image {
            argv.extend(["--image".to_string(), image.clone()]);
        }
        if let Some(source) = &self.source {
            argv.extend(["--source".to_string(), source.display().to_string()]);
        }
        if let Some(shim) = &self.wi4mpi {
            argv.extend(["--wi4mpi".to_string(), shim.display().to_string()]);
        }
        if !self.libraries.is_empty() {
            argv.extend([
                "--libraries".to_string(),
                join_paths(&self.libraries),
            ]);
        }
        if !self.files.is_empty() {
            argv.extend(["--files".to_string(), join_paths(&self.files)]);
        }

        argv.push("--".to_string());
        argv
    }
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Configure translation when the declared binary family differs from
/// the profile's detected family. Returns the argv to place between the
/// launcher and the execute-child.
fn setup_translation(
    args: &LaunchArgs,
    parameters: &mut Parameters,
    launcher: &mut Vec<String>,
) -> Result<Vec<String>> {
    let Some(binary_family) = args.from.as_deref() else {
        return Ok(Vec::new());
    };

    let mpi_libraries = mpi::filter_mpi_libs(&parameters.libraries);
    let Some(profile_family) = mpi::detect_mpi(&mpi_libraries) else {
        warn!("No single MPI family could be detected in the parameters; skipping translation");
        return Ok(Vec::new());
    };
    debug!("Parameters contain the MPI library '{profile_family}'");

    let Some(target) = wi4mpi::metadata_for(&profile_family) else {
        warn!("Profile MPI family {profile_family} has no translation metadata");
        return Ok(Vec::new());
    };

    if binary_family == target.cli_name {
        // Same family on both sides, nothing to translate
        return Ok(Vec::new());
    }

    if !wi4mpi::translation_supported(binary_family, target.cli_name) {
        return Err(Error::TranslationSetup(format!(
            "translation from {binary_family} to {} is not supported",
            target.cli_name
        )));
    }

    let shim_root = parameters
        .wi4mpi
        .clone()
        .or_else(wi4mpi::shim_root_from_env)
        .ok_or_else(|| {
            Error::TranslationSetup(
                "a translation shim installation is required for this configuration; \
                 pass one with --wi4mpi"
                    .into(),
            )
        })?;
    parameters.wi4mpi = Some(shim_root.clone());

    let plan = wi4mpi::configure(&shim_root, binary_family, target, &mpi_libraries)?;

    parameters.files.push(plan.mpi_install.clone());

    // Profile-stored extra arguments ride along on the shim invocation
    let mut shim_argv = plan.argv_prefix.clone();
    if let Some(options) = &parameters.wi4mpi_options {
        shim_argv.extend(shlex::split(options).unwrap_or_default());
    }

    for (key, value) in &plan.env {
        unsafe { std::env::set_var(key, value) };
    }

    // OpenMPI's mpirun only forwards explicitly exported variables
    if profile_family.vendor == mpi::MpiVendor::OpenMpi
        && launcher
            .first()
            .and_then(|first| std::path::Path::new(first).file_name())
            .is_some_and(|name| name == "mpirun")
    {
        launcher.extend(plan.mpirun_export_args());
    }

    Ok(shim_argv)
}

pub fn run(args: LaunchArgs, env: &ExecutionEnv, config: &Config) -> Result<i32> {
    if args.cmd.is_empty() {
        return Err(Error::Usage("No command given".into()));
    }

    // Explicit --profile must exist; otherwise fall back on the selection
    let mut storage = Storage::open(StorageScope::User)?;
    let controller = ProfileController::new(&mut storage);
    let profile = match &args.profile {
        Some(name) => Some(
            controller
                .one(name)?
                .ok_or_else(|| Error::ProfileNotFound(name.clone()))?
                .1,
        ),
        None => {
            let selected = controller.selected()?;
            if let Some((_, profile)) = &selected {
                info!("Using selected profile {}", profile.name);
            }
            selected.map(|(_, profile)| profile)
        }
    };

    let mut parameters = Parameters::merge(&args, profile.as_ref());

    for field in ["backend", "image"] {
        let missing = match field {
            "backend" => parameters.backend.is_none(),
            _ => parameters.image.is_none(),
        };
        if missing {
            return Err(Error::Usage(format!(
                "Missing field: '{field}'. Specify it using the appropriate \
                 option or by selecting a profile."
            )));
        }
    }

    let registry = Registry::standard();
    let (mut launcher, program) = registry.interpret(&args.cmd, config);
    if program.is_empty() {
        return Err(Error::Usage("No program given after the launcher".into()));
    }

    // The launcher must reach its own support directories from inside
    let known_files: BTreeSet<PathBuf> = parameters.files.iter().cloned().collect();
    for path in registry.reserved_directories(&launcher) {
        if !known_files.contains(&path) {
            parameters.files.push(path);
        }
    }

    let shim_argv = setup_translation(&args, &mut parameters, &mut launcher)?;

    // Resolve the launcher binary so remote ranks get the exact path
    if let Some(first) = launcher.first_mut() {
        if let Some(resolved) = util::which(first) {
            *first = resolved.display().to_string();
        }
    }

    let mut full_command = launcher;
    full_command.extend(shim_argv);
    full_command.extend(parameters.format_execute(tracing::enabled!(tracing::Level::DEBUG)));
    full_command.extend(program);

    if env.dry_run {
        println!("{}", full_command.join(" "));
        return Ok(0);
    }

    let runner = RealCommandRunner;
    let status = runner
        .run_status(&full_command[0], &full_command[1..], &CommandOptions::default())
        .map_err(|err| Error::Internal(err.to_string()))?;

    Ok(status.code().unwrap_or(crate::error::EXIT_FAILURE))
}
