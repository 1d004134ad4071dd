//! MPI call-translation shim support.
//!
//! When the binary's MPI family differs from the host's, an ABI wrapper
//! (Wi4MPI) translates calls between the two at run time. This module
//! holds the family metadata the shim understands, the closed set of
//! supported translations, and the orchestrator that turns a (source,
//! target, libraries) triple into environment variables, preloads and an
//! argv prefix.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result};
use crate::mpi::{self, MpiIdentifier, MpiVendor};

/// Static metadata for an MPI family as the shim knows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MpiFamily {
    /// Vendor as returned by identification.
    pub vendor: MpiVendor,
    /// Name used by the shim on the command line.
    pub cli_name: &'static str,
    /// Name used by the shim in the environment.
    pub env_name: &'static str,
    /// The shim's environment variable for this family's root.
    pub path_key: &'static str,
    /// The shim's default-root variable for this family.
    pub default_path_key: &'static str,
    /// Default soname for this vendor's C library.
    pub mpi_c_soname: &'static str,
    /// Default soname for this vendor's Fortran library.
    pub mpi_f_soname: &'static str,
}

/// MPI vendor libraries metadata. On top of the different MPI families,
/// some vendors adopt standard paths different from the norm; this
/// collection keeps track of the metadata for each of them.
pub const FAMILY_METADATA: &[MpiFamily] = &[
    MpiFamily {
        vendor: MpiVendor::IntelMpi,
        cli_name: "intelmpi",
        env_name: "INTEL",
        path_key: "INTELMPI_ROOT",
        default_path_key: "INTELMPI_DEFAULT_ROOT",
        mpi_c_soname: "libmpi.so",
        mpi_f_soname: "libmpifort.so",
    },
    MpiFamily {
        vendor: MpiVendor::OpenMpi,
        cli_name: "openmpi",
        env_name: "OMPI",
        path_key: "OPENMPI_ROOT",
        default_path_key: "OPENMPI_DEFAULT_ROOT",
        mpi_c_soname: "libmpi.so",
        mpi_f_soname: "libmpi_mpifh.so",
    },
    MpiFamily {
        vendor: MpiVendor::SpectrumMpi,
        cli_name: "openmpi",
        env_name: "OMPI",
        path_key: "OPENMPI_ROOT",
        default_path_key: "OPENMPI_DEFAULT_ROOT",
        mpi_c_soname: "libmpi.so",
        mpi_f_soname: "libmpi_mpifh.so",
    },
    MpiFamily {
        vendor: MpiVendor::Mpich,
        cli_name: "mpich",
        env_name: "MPICH",
        path_key: "MPICH_ROOT",
        default_path_key: "MPICH_DEFAULT_ROOT",
        mpi_c_soname: "libmpi.so",
        mpi_f_soname: "libmpifort.so",
    },
    MpiFamily {
        vendor: MpiVendor::Mvapich,
        cli_name: "mpich",
        env_name: "MPICH",
        path_key: "MPICH_ROOT",
        default_path_key: "MPICH_DEFAULT_ROOT",
        mpi_c_soname: "libmpi.so",
        mpi_f_soname: "libmpifort.so",
    },
    MpiFamily {
        vendor: MpiVendor::CrayMpich,
        cli_name: "mpich",
        env_name: "MPICH",
        path_key: "MPICH_ROOT",
        default_path_key: "MPICH_DEFAULT_ROOT",
        mpi_c_soname: "libmpi_cray.so",
        mpi_f_soname: "libmpifort_cray.so",
    },
];

/// Translation pairs the shim supports, as (source, target) cli names.
pub const SUPPORTED_TRANSLATIONS: &[(&str, &str)] = &[
    ("intelmpi", "openmpi"),
    ("interface", "intelmpi"),
    ("interface", "mpich"),
    ("interface", "openmpi"),
    ("mpich", "openmpi"),
    ("openmpi", "intelmpi"),
    ("openmpi", "mpich"),
    ("openmpi", "openmpi"),
];

/// Cli names accepted as a translation source.
pub fn source_names() -> Vec<&'static str> {
    let mut names: Vec<&'static str> =
        FAMILY_METADATA.iter().map(|family| family.cli_name).collect();
    names.push("interface");
    names.sort();
    names.dedup();
    names
}

pub fn translation_supported(source: &str, target: &str) -> bool {
    SUPPORTED_TRANSLATIONS.contains(&(source, target))
}

/// Find the family metadata matching a vendor or cli name.
pub fn identify(value: &str) -> Option<&'static MpiFamily> {
    let lowered = value.to_lowercase();
    FAMILY_METADATA.iter().find(|family| {
        lowered == family.vendor.keyword().to_lowercase() || lowered == family.cli_name
    })
}

/// The shim's cli name for an identified MPI library.
pub fn qualifier(id: &MpiIdentifier) -> Option<&'static str> {
    metadata_for(id).map(|family| family.cli_name)
}

pub fn metadata_for(id: &MpiIdentifier) -> Option<&'static MpiFamily> {
    FAMILY_METADATA
        .iter()
        .find(|family| family.vendor == id.vendor)
}

/// Shim installation root advertised in the environment, if any.
pub fn shim_root_from_env() -> Option<PathBuf> {
    std::env::var("WI4MPI_ROOT")
        .ok()
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

/// Environment variables the shim reads; launchers must forward these to
/// the ranks.
pub const SHIM_ENVIRONMENT: &[&str] = &[
    "WI4MPI_ROOT",
    "WI4MPI_FROM",
    "WI4MPI_TO",
    "WI4MPI_RUN_MPI_C_LIB",
    "WI4MPI_RUN_MPI_F_LIB",
    "WI4MPI_RUN_MPIIO_C_LIB",
    "WI4MPI_RUN_MPIIO_F_LIB",
];

/// Parse a `key=value` shim configuration file, ignoring comments.
fn read_cfg(path: &Path) -> BTreeMap<String, String> {
    let mut values = BTreeMap::new();

    let Ok(content) = std::fs::read_to_string(path) else {
        debug!("Error accessing configuration {}", path.display());
        return values;
    };

    for line in content.lines() {
        let line = line.trim();
        if line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            values.insert(key.to_string(), value.trim_matches('"').to_string());
        }
    }

    values
}

/// Shim configuration: the installation's `etc/wi4mpi.cfg` overlaid with
/// the user's `~/.wi4mpi.cfg`.
pub fn shim_config(install_dir: &Path) -> BTreeMap<String, String> {
    let mut config = read_cfg(&install_dir.join("etc").join("wi4mpi.cfg"));

    if let Some(home) = std::env::var_os("HOME") {
        let user = read_cfg(&Path::new(&home).join(".wi4mpi.cfg"));
        config.extend(user);
    }

    config
}

/// Find a library with the given soname among the profile libraries or
/// their on-disk neighbors.
fn locate(soname: &str, available: &[PathBuf]) -> Option<PathBuf> {
    if let Some(found) = available.iter().find(|path| {
        path.file_name()
            .is_some_and(|name| name.to_string_lossy().starts_with(soname))
    }) {
        return Some(found.clone());
    }

    // Search the libraries' directories for the soname
    for directory in available.iter().filter_map(|path| {
        path.canonicalize().ok().and_then(|p| p.parent().map(Path::to_path_buf))
    }) {
        if let Ok(entries) = std::fs::read_dir(&directory) {
            for entry in entries.flatten() {
                if entry.file_name().to_string_lossy().starts_with(soname) {
                    return Some(entry.path());
                }
            }
        }
    }

    debug!("Failed to locate {soname} next to the profile libraries");
    None
}

/// A configured translation, ready to be injected into the launch.
#[derive(Debug, Clone)]
pub struct TranslationPlan {
    pub shim_root: PathBuf,
    /// Source family cli name (what the binary was compiled against).
    pub source: String,
    pub target: &'static MpiFamily,
    /// The target MPI's installation prefix, bound into the container.
    pub mpi_install: PathBuf,
    /// Environment to export before exec.
    pub env: Vec<(String, String)>,
    /// Prefix placed between the launcher and the execute-child.
    pub argv_prefix: Vec<String>,
    /// Fake-library preloads for the source family, when shipped.
    pub preload: Vec<PathBuf>,
}

/// Configure the shim for a supported (source, target) pair.
///
/// Locates the target's C and Fortran entry libraries among the profile
/// libraries, deduces the target installation prefix, and produces the
/// environment and argv prefix. Aborts rather than running without
/// translation when any step fails.
pub fn configure(
    shim_root: &Path,
    source: &str,
    target: &'static MpiFamily,
    mpi_libraries: &[PathBuf],
) -> Result<TranslationPlan> {
    if !translation_supported(source, target.cli_name) {
        return Err(Error::TranslationSetup(format!(
            "translation from {source} to {} is not supported",
            target.cli_name
        )));
    }

    let run_c_lib = locate(target.mpi_c_soname, mpi_libraries);
    let run_f_lib = locate(target.mpi_f_soname, mpi_libraries);

    let (Some(run_c_lib), Some(run_f_lib)) = (run_c_lib, run_f_lib) else {
        return Err(Error::TranslationSetup(format!(
            "could not determine MPI libraries to use (no {} or {} among the profile libraries)",
            target.mpi_c_soname, target.mpi_f_soname
        )));
    };

    let mpi_install = mpi::install_dir([&run_c_lib, &run_f_lib].into_iter())
        .ok_or_else(|| {
            Error::TranslationSetup(format!(
                "no common installation prefix for {} and {}",
                run_c_lib.display(),
                run_f_lib.display()
            ))
        })?;

    let env = vec![
        ("WI4MPI_ROOT".to_string(), shim_root.display().to_string()),
        ("WI4MPI_FROM".to_string(), source.to_string()),
        ("WI4MPI_TO".to_string(), target.cli_name.to_string()),
        (target.path_key.to_string(), mpi_install.display().to_string()),
        (
            "WI4MPI_RUN_MPI_C_LIB".to_string(),
            run_c_lib.display().to_string(),
        ),
        (
            "WI4MPI_RUN_MPI_F_LIB".to_string(),
            run_f_lib.display().to_string(),
        ),
        (
            "WI4MPI_RUN_MPIIO_C_LIB".to_string(),
            run_c_lib.display().to_string(),
        ),
        (
            "WI4MPI_RUN_MPIIO_F_LIB".to_string(),
            run_f_lib.display().to_string(),
        ),
    ];

    let argv_prefix = vec![
        shim_root.join("bin").join("wi4mpi").display().to_string(),
        "-f".to_string(),
        source.to_string(),
        "-t".to_string(),
        target.cli_name.to_string(),
    ];

    // Source families with a fake-library directory get those preloaded
    let fakelib_dir = shim_root
        .join("libexec")
        .join("wi4mpi")
        .join(format!("fakelib{source}"));
    let mut preload = Vec::new();
    if let Ok(entries) = std::fs::read_dir(&fakelib_dir) {
        for entry in entries.flatten() {
            if entry.file_name().to_string_lossy().starts_with("lib") {
                preload.push(entry.path());
            }
        }
    }

    debug!(
        "Translation configured: {source} -> {} (root {})",
        target.cli_name,
        shim_root.display()
    );

    Ok(TranslationPlan {
        shim_root: shim_root.to_path_buf(),
        source: source.to_string(),
        target,
        mpi_install,
        env,
        argv_prefix,
        preload,
    })
}

impl TranslationPlan {
    /// `-x VAR` forwarding arguments for OpenMPI's `mpirun`, which does
    /// not propagate arbitrary environment to remote ranks by itself.
    pub fn mpirun_export_args(&self) -> Vec<String> {
        self.env
            .iter()
            .flat_map(|(key, _)| ["-x".to_string(), key.clone()])
            .collect()
    }

    /// Paths to make visible inside the container: the shim installation
    /// and every configured family root.
    pub fn import_paths(&self) -> Vec<PathBuf> {
        let mut paths = vec![self.shim_root.clone(), self.mpi_install.clone()];

        for (key, value) in shim_config(&self.shim_root) {
            if key.contains("ROOT") && !value.is_empty() {
                paths.push(PathBuf::from(value));
            }
        }

        paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn openmpi_target() -> &'static MpiFamily {
        identify("openmpi").unwrap()
    }

    /// A fake target MPI installation with C and Fortran libraries.
    fn fake_install(root: &Path) -> Vec<PathBuf> {
        let lib = root.join("lib");
        fs::create_dir_all(&lib).unwrap();
        let c = lib.join("libmpi.so.40");
        let f = lib.join("libmpi_mpifh.so.40");
        fs::write(&c, b"stub").unwrap();
        fs::write(&f, b"stub").unwrap();
        vec![c, f]
    }

    #[test]
    fn test_identify_by_both_names() {
        assert_eq!(identify("openmpi").unwrap().vendor, MpiVendor::OpenMpi);
        assert_eq!(identify("Open MPI").unwrap().vendor, MpiVendor::OpenMpi);
        assert_eq!(identify("MPICH").unwrap().cli_name, "mpich");
        assert!(identify("foompi").is_none());
    }

    #[test]
    fn test_supported_translations() {
        assert!(translation_supported("mpich", "openmpi"));
        assert!(translation_supported("openmpi", "mpich"));
        assert!(!translation_supported("mpich", "mpich"));
        assert!(!translation_supported("openmpi", "interface"));
    }

    #[test]
    fn test_configure_sets_environment() {
        let temp = tempfile::tempdir().unwrap();
        let shim = temp.path().join("wi4mpi");
        let install = temp.path().join("openmpi");
        let libraries = fake_install(&install);

        let plan = configure(&shim, "mpich", openmpi_target(), &libraries).unwrap();

        let env: BTreeMap<_, _> = plan.env.iter().cloned().collect();
        assert_eq!(env.get("WI4MPI_FROM").unwrap(), "mpich");
        assert_eq!(env.get("WI4MPI_TO").unwrap(), "openmpi");
        assert_eq!(env.get("WI4MPI_ROOT").unwrap(), &shim.display().to_string());
        assert_eq!(
            env.get("OPENMPI_ROOT").unwrap(),
            &install.display().to_string()
        );
        for key in [
            "WI4MPI_RUN_MPI_C_LIB",
            "WI4MPI_RUN_MPI_F_LIB",
            "WI4MPI_RUN_MPIIO_C_LIB",
            "WI4MPI_RUN_MPIIO_F_LIB",
        ] {
            assert!(env.contains_key(key), "missing {key}");
        }

        assert_eq!(
            plan.argv_prefix,
            vec![
                shim.join("bin/wi4mpi").display().to_string(),
                "-f".to_string(),
                "mpich".to_string(),
                "-t".to_string(),
                "openmpi".to_string(),
            ]
        );
    }

    #[test]
    fn test_every_supported_pair_configures() {
        let temp = tempfile::tempdir().unwrap();
        let shim = temp.path().join("wi4mpi");

        for (source, target_name) in SUPPORTED_TRANSLATIONS {
            let target = identify(target_name).unwrap();
            let install = temp.path().join(format!("{source}-{target_name}"));
            let lib = install.join("lib");
            fs::create_dir_all(&lib).unwrap();
            fs::write(lib.join(format!("{}.40", target.mpi_c_soname)), b"stub").unwrap();
            fs::write(lib.join(format!("{}.40", target.mpi_f_soname)), b"stub").unwrap();
            let libraries = vec![
                lib.join(format!("{}.40", target.mpi_c_soname)),
                lib.join(format!("{}.40", target.mpi_f_soname)),
            ];

            let plan = configure(&shim, source, target, &libraries)
                .unwrap_or_else(|err| panic!("{source}->{target_name}: {err}"));

            let env: BTreeMap<_, _> = plan.env.iter().cloned().collect();
            assert_eq!(env.get("WI4MPI_FROM").map(String::as_str), Some(*source));
            assert_eq!(env.get("WI4MPI_TO").map(String::as_str), Some(*target_name));
            assert!(env.contains_key("WI4MPI_ROOT"));
            assert!(env.contains_key(target.path_key));
            for key in [
                "WI4MPI_RUN_MPI_C_LIB",
                "WI4MPI_RUN_MPI_F_LIB",
                "WI4MPI_RUN_MPIIO_C_LIB",
                "WI4MPI_RUN_MPIIO_F_LIB",
            ] {
                assert!(env.contains_key(key));
            }
        }
    }

    #[test]
    fn test_configure_unsupported_pair_fails() {
        let target = identify("intelmpi").unwrap();
        let err = configure(Path::new("/opt/wi4mpi"), "mpich", target, &[]).unwrap_err();
        assert!(matches!(err, Error::TranslationSetup(_)));
    }

    #[test]
    fn test_configure_missing_libraries_fails() {
        let err = configure(Path::new("/opt/wi4mpi"), "mpich", openmpi_target(), &[])
            .unwrap_err();
        assert!(matches!(err, Error::TranslationSetup(_)));
    }

    #[test]
    fn test_mpirun_export_args_cover_env() {
        let temp = tempfile::tempdir().unwrap();
        let libraries = fake_install(&temp.path().join("openmpi"));
        let plan = configure(
            &temp.path().join("wi4mpi"),
            "mpich",
            openmpi_target(),
            &libraries,
        )
        .unwrap();

        let args = plan.mpirun_export_args();
        assert!(args.chunks(2).all(|chunk| chunk[0] == "-x"));
        assert!(args.contains(&"WI4MPI_ROOT".to_string()));
        assert!(args.contains(&"OPENMPI_ROOT".to_string()));
    }

    #[test]
    fn test_shim_config_overlay() {
        let temp = tempfile::tempdir().unwrap();
        let etc = temp.path().join("etc");
        fs::create_dir_all(&etc).unwrap();
        fs::write(
            etc.join("wi4mpi.cfg"),
            "# comment\nOPENMPI_DEFAULT_ROOT=\"/opt/openmpi\"\nMPICH_DEFAULT_ROOT=/opt/mpich\n",
        )
        .unwrap();

        let config = shim_config(temp.path());
        assert_eq!(config.get("OPENMPI_DEFAULT_ROOT").unwrap(), "/opt/openmpi");
        assert_eq!(config.get("MPICH_DEFAULT_ROOT").unwrap(), "/opt/mpich");
    }
}
