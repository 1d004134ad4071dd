//! `profile detect` subcommand.
//!
//! Builds a profile from the observed execution of an MPI command. Under
//! a multi-rank launcher the command re-invokes itself as a detect-child
//! per rank; each child traces its target, classifies the opened paths
//! into libraries and plain files, and emits one JSON object per line.
//! The parent unions the fragments and persists them.

use clap::Args;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::open_storage;
use crate::command_runner::{CommandOptions, CommandRunner, RealCommandRunner, reemit_stderr};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::launchers::Registry;
use crate::ldcache::LdCache;
use crate::linker;
use crate::mpi::{FilterPolicy, PollutionFilter};
use crate::output::Output;
use crate::profile::{INIT_TEMP_PROFILE_NAME, Profile, ProfileController};
use crate::relay;
use crate::util;
use crate::variables::{ExecutionEnv, ParentStatus};
use crate::{elf, trace};

/// Environment variable carrying the launcher name down to the ranks.
pub const LAUNCHER_VAR: &str = "__E4S_CL_DETECT_LAUNCHER";

/// Stderr lines re-emitted when a detection child fails.
const STDERR_TAIL: usize = 20;

#[derive(Debug, Args)]
pub struct DetectArgs {
    /// Output profile; the selected profile is overwritten when omitted
    #[arg(short = 'p', long = "profile")]
    pub profile_name: Option<String>,

    /// Policy for dropping MPI libraries foreign to the launcher
    #[arg(long = "mpi-filter", value_enum, default_value = "auto")]
    pub mpi_filter: FilterPolicy,

    /// Library basenames or path prefixes to exclude from the results
    #[arg(long = "exclude", num_args = 1..)]
    pub exclude: Vec<String>,

    /// Launcher and program to analyze, e.g. `mpirun -n 2 ./a.out`
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    pub cmd: Vec<String>,
}

/// One line of the detection wire format.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Fragment {
    files: Vec<String>,
    libraries: Vec<String>,
}

/// Directories whose contents are transient and never worth importing.
const BLACKLIST: &[&str] = &["/tmp", "/sys", "/proc", "/dev", "/run"];

/// Categorize traced paths into libraries and files.
///
/// Libraries are ELF objects the linker would resolve to themselves; they
/// are imported through the library directory. Everything else, orphan
/// ELF objects included, keeps its original path. Paths under transient
/// system directories are discarded unless the launcher reserves them.
fn classify(
    paths: &[PathBuf],
    launcher: &[String],
    program: Option<&Path>,
    filter: &PollutionFilter,
) -> (Vec<String>, Vec<String>) {
    let registry = Registry::standard();
    let reserved = registry.reserved_directories(launcher);
    let cache = LdCache::host();

    let waived = |path: &Path| {
        reserved
            .iter()
            .any(|directory| util::path_contains(directory, path))
    };
    let blacklisted = |path: &Path| {
        BLACKLIST
            .iter()
            .any(|directory| util::path_contains(Path::new(directory), path))
    };

    let candidates: Vec<&PathBuf> = paths
        .iter()
        .filter(|path| path.as_path() != Path::new(crate::ldcache::HOST_CACHE_PATH))
        .filter(|path| waived(path) || !blacklisted(path))
        .filter(|path| match path.metadata() {
            Ok(metadata) => !metadata.is_dir(),
            Err(_) => false,
        })
        .collect();

    let (elf_objects, regular): (Vec<&PathBuf>, Vec<&PathBuf>) = candidates
        .into_iter()
        .partition(|path| elf::is_elf(path));

    // Resolution sees the requesting binary's search paths on top of
    // each object's own
    let mut extra_rpath = Vec::new();
    let mut extra_runpath = Vec::new();
    if let Some(data) = program.and_then(elf::parse) {
        extra_rpath.extend(data.rpath);
        extra_runpath.extend(data.runpath);
    }
    for object in &elf_objects {
        if let Some(data) = elf::parse(object) {
            extra_rpath.extend(data.rpath);
            extra_runpath.extend(data.runpath);
        }
    }

    let (resolved, orphans): (Vec<&PathBuf>, Vec<&PathBuf>) =
        elf_objects.into_iter().partition(|path| {
            linker::resolves_to_self(path, &extra_rpath, &extra_runpath, &cache)
        });

    let launcher_path = launcher.first().and_then(|name| util::which(name));
    let libraries = filter.apply(
        resolved.into_iter().cloned().collect(),
        launcher_path.as_deref(),
    );

    let files: BTreeSet<String> = regular
        .into_iter()
        .cloned()
        .chain(orphans.into_iter().cloned())
        .map(|path| path.display().to_string())
        .collect();
    let libraries: BTreeSet<String> = libraries
        .into_iter()
        .map(|path| path.display().to_string())
        .collect();

    (
        libraries.into_iter().collect(),
        files.into_iter().collect(),
    )
}

/// Spawn one detect-child per rank under the launcher and union their
/// output fragments.
fn detect_subprocesses(
    args: &DetectArgs,
    launcher: &[String],
    program: &[String],
) -> Result<(Vec<String>, Vec<String>)> {
    let this = std::env::current_exe()
        .map_err(|err| Error::Internal(err.to_string()))?
        .display()
        .to_string();

    let mut argv: Vec<String> = launcher.to_vec();
    argv.push(this);
    argv.extend(["profile".to_string(), "detect".to_string()]);
    argv.push("--mpi-filter".to_string());
    argv.push(
        match args.mpi_filter {
            FilterPolicy::Auto => "auto",
            FilterPolicy::Off => "off",
            FilterPolicy::Manual => "manual",
        }
        .to_string(),
    );
    for exclude in &args.exclude {
        argv.extend(["--exclude".to_string(), exclude.clone()]);
    }
    argv.extend_from_slice(program);

    let _parent = ParentStatus::enter();
    unsafe { std::env::set_var(LAUNCHER_VAR, &launcher[0]) };
    let pipe = relay::Pipe::new()?;

    let runner = RealCommandRunner;
    let output = runner
        .run_output(&argv[0], &argv[1..], &CommandOptions::default())
        .map_err(|err| Error::Internal(err.to_string()))?;
    unsafe { std::env::remove_var(LAUNCHER_VAR) };

    let mut data = String::from_utf8_lossy(&output.stdout).into_owned();
    data.push('\n');
    data.push_str(&pipe.read_to_end()?);

    if !output.status.success() {
        Output::error("Failed to determine necessary libraries: see the launcher output below");
        reemit_stderr(&output, STDERR_TAIL);
        return Err(Error::SubprocessNonzero(output.status.code().unwrap_or(1)));
    }

    let mut files = BTreeSet::new();
    let mut libraries = BTreeSet::new();
    for line in data.lines() {
        // Launcher noise interleaves with the fragments; skip it
        let Ok(fragment) = serde_json::from_str::<Fragment>(line) else {
            continue;
        };
        files.extend(fragment.files);
        libraries.extend(fragment.libraries);
    }

    Ok((
        libraries.into_iter().collect(),
        files.into_iter().collect(),
    ))
}

/// Persist detection results into a profile.
fn save_to_profile(name: Option<&str>, libraries: Vec<String>, files: Vec<String>) -> Result<i32> {
    let mut storage = open_storage()?;
    let mut controller = ProfileController::new(&mut storage);

    let (eid, mut profile) = match name {
        Some(name) => match controller.one(name)? {
            Some(found) => found,
            None => {
                let eid = controller.create(Profile::named(name))?;
                (eid, Profile::named(name))
            }
        },
        None => {
            let Some((eid, profile)) = controller.selected()? else {
                Output::error("No output profile selected or given as an argument.");
                return Err(Error::NoProfileSelected);
            };
            if profile.name != INIT_TEMP_PROFILE_NAME {
                warn!("No profile specified: currently selected profile will be updated.");
            }
            (eid, profile)
        }
    };

    profile.libraries = libraries;
    profile.files = files;
    let profile_name = profile.name.clone();
    controller.update(eid, profile)?;

    Output::success(format!(
        "Profile '{profile_name}' updated from the detected execution"
    ));
    Ok(0)
}

pub fn run(args: DetectArgs, env: &ExecutionEnv, config: &Config) -> Result<i32> {
    if args.cmd.is_empty() {
        return Err(Error::Usage("No command given".into()));
    }

    let registry = Registry::standard();
    let (launcher, program) = registry.interpret(&args.cmd, config);

    let (libraries, files) = if !launcher.is_empty() {
        detect_subprocesses(&args, &launcher, &program)?
    } else {
        // Inside a rank (or no launcher at all): trace the target
        let inherited_launcher: Vec<String> = std::env::var(LAUNCHER_VAR)
            .map(|value| vec![value])
            .unwrap_or_default();

        let (code, paths) = trace::opened_files(&args.cmd)?;
        if code != 0 {
            warn!("Traced program exited with code {code}");
        }

        let filter = PollutionFilter {
            policy: args.mpi_filter,
            exclude: args.exclude.clone(),
        };
        let program_path = util::which(&args.cmd[0]);
        let (libraries, files) = classify(
            &paths,
            &inherited_launcher,
            program_path.as_deref(),
            &filter,
        );
        debug!(
            "Accessed files: {} libraries, {} files",
            libraries.len(),
            files.len()
        );
        (libraries, files)
    };

    if !env.is_parent() {
        // Children hand their fragment to the aggregating parent
        let fragment = serde_json::to_string(&Fragment { files, libraries })?;
        println!("{fragment}");
        if relay::attached() {
            let _ = relay::send_line(&fragment);
        }
        return Ok(0);
    }

    save_to_profile(args.profile_name.as_deref(), libraries, files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_filters_transient_paths() {
        let paths = vec![
            PathBuf::from("/etc/ld.so.cache"),
            PathBuf::from("/tmp/scratch.dat"),
            PathBuf::from("/proc/self/maps"),
            PathBuf::from("/sys/devices/cpu"),
            PathBuf::from("/dev/null"),
            PathBuf::from("/run/lock/a"),
        ];
        let (libraries, files) =
            classify(&paths, &[], None, &PollutionFilter::default());
        assert!(libraries.is_empty());
        assert!(files.is_empty());
    }

    #[test]
    fn test_classify_keeps_regular_files() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("input.dat");
        std::fs::write(&data, b"payload").unwrap();

        let (libraries, files) = classify(
            &[data.clone()],
            &[],
            None,
            &PollutionFilter::default(),
        );
        assert!(libraries.is_empty());
        assert_eq!(files, vec![data.display().to_string()]);
    }

    #[test]
    fn test_classify_reserved_directories_waived() {
        // Reserved launcher directories bypass the blacklist; use srun's
        // spool area with a path that exists only if slurm is installed,
        // so assert on the absence of filtering instead
        let paths = vec![PathBuf::from("/var/spool/slurm")];
        let launcher = vec!["srun".to_string()];
        // The path does not exist, so it is dropped by the existence
        // check either way; this exercises the waiver code path
        let (_, files) = classify(&paths, &launcher, None, &PollutionFilter::default());
        assert!(files.len() <= 1);
    }

    #[test]
    fn test_classify_drops_directories() {
        let dir = tempfile::tempdir().unwrap();
        let (libraries, files) = classify(
            &[dir.path().to_path_buf()],
            &[],
            None,
            &PollutionFilter::default(),
        );
        assert!(libraries.is_empty());
        assert!(files.is_empty());
    }

    #[test]
    fn test_fragment_wire_format() {
        let fragment: Fragment =
            serde_json::from_str(r#"{"files": ["/etc/hostname"], "libraries": []}"#).unwrap();
        assert_eq!(fragment.files, vec!["/etc/hostname"]);

        // Non-JSON lines are ignored by the aggregation loop
        assert!(serde_json::from_str::<Fragment>("Warning: something").is_err());
    }
}
